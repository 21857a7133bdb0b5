use std::sync::Arc;

use bpf_common::{
    Probe,
    parsing::{Context, DecodeError, RawDecoder},
};
use thiserror::Error;

use crate::{
    cache::{ArgvCache, KernelSymbols},
    event::Payload,
    window::WindowFilters,
};

/// Why a correctly decoded record produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The value is benign, for example a scan which found nothing.
    Ignore,
    /// A window filter dropped it as noise.
    Filter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Emit,
    Suppress(SuppressReason),
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unknown event type {0}")]
    UnknownType(u32),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl EventError {
    pub fn is_truncation(&self) -> bool {
        matches!(self, EventError::Decode(err) if err.is_truncation())
    }
}

/// State shared by every decode: enrichment caches and noise filters.
pub struct DecodeState {
    pub argv_cache: ArgvCache,
    pub ksyms: Arc<KernelSymbols>,
    pub windows: WindowFilters,
}

impl DecodeState {
    pub fn new(argv_cache: ArgvCache, ksyms: Arc<KernelSymbols>, windows: WindowFilters) -> Self {
        Self {
            argv_cache,
            ksyms,
            windows,
        }
    }
}

impl Default for DecodeState {
    fn default() -> Self {
        Self::new(
            ArgvCache::default(),
            Arc::new(KernelSymbols::default()),
            WindowFilters::default(),
        )
    }
}

/// A kind of record produced by the kernel side.
///
/// A fresh instance is created for every record. [`KernelEvent::decode`]
/// fills it from the payload which follows the execution context, then
/// [`KernelEvent::into_payload`] turns it into the emitted payload.
pub trait KernelEvent: Send + 'static {
    /// Type code written by the kernel side in front of every record.
    fn id(&self) -> u32;

    fn name(&self) -> &'static str;

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        state: &DecodeState,
    ) -> Result<Verdict, EventError>;

    /// Programs the loader has to attach for this event.
    fn probes(&self) -> Vec<Probe>;

    fn into_payload(self: Box<Self>) -> Payload;

    fn as_exe_source(&self) -> Option<&dyn ExeSource> {
        None
    }

    fn as_cache_filler(&self) -> Option<&dyn CacheFiller> {
        None
    }

    fn as_active_scanner(&self) -> Option<&dyn ActiveScanner> {
        None
    }
}

/// Events carrying the path of the executable which generated them.
pub trait ExeSource {
    fn exe(&self) -> &str;
}

/// Events updating shared caches once they are known to be emitted.
pub trait CacheFiller {
    fn fill_cache(&self, context: &Context, state: &DecodeState);
}

/// Events produced on demand: a periodic trigger makes the kernel side
/// sample some state and emit a record.
pub trait ActiveScanner {
    /// Six fields cron expression, seconds first.
    fn schedule(&self) -> &'static str;

    /// Runs on a blocking thread.
    fn trigger(&self, ctx: &TriggerContext) -> Result<(), TriggerError>;
}

#[derive(Clone)]
pub struct TriggerContext {
    pub ksyms: Arc<KernelSymbols>,
}

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("kernel symbol {0} not found")]
    SymbolNotFound(String),
    #[error("trigger failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_detected_through_wrapping() {
        let err = EventError::from(DecodeError::Truncated {
            offset: 4,
            needed: 8,
            remaining: 2,
        });
        assert!(err.is_truncation());
        assert!(!EventError::UnknownType(9).is_truncation());
        assert!(!EventError::from(DecodeError::UnsupportedFamily(1)).is_truncation());
    }
}
