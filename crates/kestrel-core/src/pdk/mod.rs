//! Building blocks of the decoding pipeline.
//!
//! Every kind of kernel record is a type implementing [`KernelEvent`],
//! registered once at startup into a [`Registry`]. The [`Dispatcher`]
//! reads records from a [`bpf_common::RecordSource`], looks up their type
//! code, decodes them into a fresh instance and publishes the resulting
//! [`Event`] on the bus.
//!
//! Optional behaviour is exposed through capability traits, returned by
//! the `as_*` accessors of [`KernelEvent`]:
//! - [`ExeSource`]: the event knows the executable path
//! - [`CacheFiller`]: the event updates the shared caches once emitted
//! - [`ActiveScanner`]: the event is produced by a periodic trigger, run by
//!   the [`Scheduler`]
//!
//! # Example
//!
//! ```
//! use bpf_common::{Probe, ProbeSet, parsing::RawDecoder};
//! use kestrel_core::event::{IdtHook, Payload};
//! use kestrel_core::pdk::{DecodeState, EventError, KernelEvent, Registry, Verdict};
//!
//! #[derive(Default)]
//! struct Vector {
//!     index: u64,
//! }
//!
//! impl KernelEvent for Vector {
//!     fn id(&self) -> u32 {
//!         4242
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "vector"
//!     }
//!
//!     fn decode(
//!         &mut self,
//!         decoder: &mut RawDecoder,
//!         _state: &DecodeState,
//!     ) -> Result<Verdict, EventError> {
//!         decoder.read_index()?;
//!         self.index = decoder.read_u64()?;
//!         Ok(Verdict::Emit)
//!     }
//!
//!     fn probes(&self) -> Vec<Probe> {
//!         ProbeSet::new().kprobe("do_vector").build()
//!     }
//!
//!     fn into_payload(self: Box<Self>) -> Payload {
//!         Payload::IdtHook(IdtHook {
//!             index: self.index,
//!             address: String::new(),
//!         })
//!     }
//! }
//!
//! let mut registry = Registry::new();
//! registry.register::<Vector>().unwrap();
//! assert!(registry.register::<Vector>().is_err());
//! ```

mod config;
mod dispatch;
mod kernel_event;
mod registry;
mod scheduler;

use std::sync::Arc;

pub use crate::event::Event;
pub use crate::event::Payload;
pub use config::*;
pub use dispatch::*;
pub use kernel_event::*;
pub use registry::*;
pub use scheduler::*;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Receive an event from a [[broadcast::Receiver]]. Log a warning if we have lost messages.
/// Returns `None` once the bus is closed.
pub async fn receive_from_broadcast(
    rx: &mut broadcast::Receiver<Arc<Event>>,
    consumer: &str,
) -> Option<Arc<Event>> {
    let mut lost: u64 = 0;
    loop {
        match rx.recv().await {
            Ok(value) => {
                if lost > 0 {
                    log::warn!(
                        target: consumer,
                        "broadcast channel lagged {lost} messages",
                    );
                }
                return Some(value);
            }
            Err(RecvError::Lagged(lagged)) => lost += lagged,
            Err(RecvError::Closed) => return None,
        }
    }
}
