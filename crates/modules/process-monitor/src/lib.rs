//! Process execution events.
//!
//! Both `execve` and `execveat` records carry the same payload: the new
//! executable, its working directory and terminal, the socket the process
//! owns (if any), its ancestors and its command line and environment.

use kestrel_core::pdk::{Registry, RegistryError};

mod exec;

pub use exec::{Execve, Execveat};

pub const MODULE_NAME: &str = "process-monitor";

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register::<Execve>()?;
    registry.register::<Execveat>()?;
    Ok(())
}
