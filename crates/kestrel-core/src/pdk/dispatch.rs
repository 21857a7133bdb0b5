use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bpf_common::{
    RecordSource,
    bytes::Bytes,
    parsing::{Context, RawDecoder},
};
use tokio::{sync::watch, task::JoinHandle};

use super::{DecodeState, EventError, Registry, SuppressReason, Verdict};
use crate::{
    bus::Bus,
    event::{Event, Header},
};

/// Result of a single record decode.
#[derive(Debug)]
pub enum Decoded {
    Emit(Event),
    Suppressed(SuppressReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Emitted,
    Ignored,
    Filtered,
    Failed,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    emitted: AtomicU64,
    ignored: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Emitted => &self.emitted,
            DispatchOutcome::Ignored => &self.ignored,
            DispatchOutcome::Filtered => &self.filtered,
            DispatchOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            emitted: self.emitted.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub emitted: u64,
    pub ignored: u64,
    pub filtered: u64,
    pub failed: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "emitted: {}, ignored: {}, filtered: {}, failed: {}",
            self.emitted, self.ignored, self.filtered, self.failed
        )
    }
}

/// Turns raw records into events and publishes them on the [`Bus`].
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    state: Arc<DecodeState>,
    bus: Bus,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, state: Arc<DecodeState>, bus: Bus) -> Self {
        Self {
            registry,
            state,
            bus,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn state(&self) -> &DecodeState {
        &self.state
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Decode one record and publish the resulting event, if any.
    /// Failures are logged and counted, never propagated.
    pub fn dispatch(&self, record: &Bytes) -> DispatchOutcome {
        let outcome = match self.decode(record) {
            Ok(Decoded::Emit(event)) => {
                self.bus.send(event);
                DispatchOutcome::Emitted
            }
            Ok(Decoded::Suppressed(SuppressReason::Ignore)) => DispatchOutcome::Ignored,
            Ok(Decoded::Suppressed(SuppressReason::Filter)) => DispatchOutcome::Filtered,
            Err(err) if err.is_truncation() => {
                log::debug!("short record of {} bytes: {err}", record.len());
                DispatchOutcome::Failed
            }
            Err(err) => {
                log::warn!("failed to decode record: {err}");
                DispatchOutcome::Failed
            }
        };
        self.stats.record(outcome);
        outcome
    }

    /// Decode one record without publishing it.
    pub fn decode(&self, record: &Bytes) -> Result<Decoded, EventError> {
        let mut decoder = RawDecoder::new(record.clone());
        let type_code = decoder.read_u32()?;
        let entry = self
            .registry
            .get(type_code)
            .ok_or(EventError::UnknownType(type_code))?;
        let context = Context::decode(&mut decoder)?;
        let mut event = entry.create();
        match event.decode(&mut decoder, &self.state)? {
            Verdict::Emit => {}
            Verdict::Suppress(reason) => return Ok(Decoded::Suppressed(reason)),
        }
        if let Some(filler) = event.as_cache_filler() {
            filler.fill_cache(&context, &self.state);
        }
        let exe = match event.as_exe_source() {
            Some(source) => source.exe().to_string(),
            None => context.comm.clone(),
        };
        let header = Header {
            id: event.id(),
            name: event.name().into(),
            exe,
            context,
        };
        Ok(Decoded::Emit(Event::new(header, event.into_payload())))
    }

    /// Drain `source` on its own task until it is exhausted or `stop` fires.
    /// A record being decoded when `stop` fires is always completed.
    pub fn spawn_reader<S: RecordSource>(
        &self,
        mut source: S,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            loop {
                if *stop.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    record = source.next_record() => match record {
                        Some(record) => {
                            dispatcher.dispatch(&record);
                        }
                        None => {
                            log::debug!("record source exhausted");
                            break;
                        }
                    }
                }
            }
        })
    }
}
