mod record_source;
pub mod parsing;
pub mod program;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod time;

pub use program::{Probe, ProbeKind, ProbeSet};
pub use record_source::RecordSource;

pub use bytes;
