//! Cross-event enrichment state, shared by every decode.

mod argv;
mod ksyms;

pub use argv::{ArgvCache, ArgvCacheConfig};
pub use ksyms::{KernelSymbols, SymbolRef};
