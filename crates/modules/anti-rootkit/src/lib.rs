//! Rootkit detection.
//!
//! Two kinds of checks live here:
//! - passive ones, hooked on the ways code gets into the kernel (module
//!   loading, firmware and module file reads, user mode helpers)
//! - active scans of the interrupt descriptor table and of the syscall
//!   table, triggered periodically from user space through uprobes on
//!   [`kestrel_trigger_idt_scan`] and [`kestrel_trigger_sct_scan`]

use kestrel_core::pdk::{Registry, RegistryError};

mod kernel;
mod scan;

pub use kernel::{KernelFileRead, ModuleInit, UsermodeHelperCall};
pub use scan::{IdtScan, SyscallTableScan, kestrel_trigger_idt_scan, kestrel_trigger_sct_scan};

pub const MODULE_NAME: &str = "anti-rootkit";

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register::<SyscallTableScan>()?;
    registry.register::<IdtScan>()?;
    registry.register::<ModuleInit>()?;
    registry.register::<KernelFileRead>()?;
    registry.register::<UsermodeHelperCall>()?;
    Ok(())
}
