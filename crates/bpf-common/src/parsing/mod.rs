pub mod context;
pub mod decoder;
pub mod kallsyms;

pub use context::{Context, CONTEXT_SIZE};
pub use decoder::{DecodeError, PidTree, RawDecoder, RemoteAddr};
pub use kallsyms::{KallsymsError, KernelSymbol};
