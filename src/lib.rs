//! Kestrel is the user space half of a host intrusion detection agent.
//!
//! Kernel side eBPF programs, attached by an external loader, write binary
//! records into ring buffers. Kestrel turns those records into typed
//! [events](kestrel_core::event), suppresses the noisy ones and publishes
//! the rest on a broadcast [bus](kestrel_core::bus). It also triggers
//! periodic scans of kernel state (syscall table and interrupt descriptor
//! table) looking for rootkit hooks.
//!
//! ```sh
//! # Print the probes the loader has to attach
//! kestrel probes
//!
//! # Decode records dumped from a ring buffer
//! kestrel run --replay records.bin
//! ```
//!
//! ## Modules
//!
//! Every event kind implements [`KernelEvent`](kestrel_core::pdk::KernelEvent)
//! and is registered by its module into a
//! [`Registry`](kestrel_core::pdk::Registry). Check the
//! [example](kestrel_core::pdk#example) in the modules documentation.
//!
//! ## Feature flags
//!
//! - `default`: Enables `full`.
//! - `full`: Enables all the modules listed below.
//! - `process-monitor`: `execve` and `execveat` events.
//! - `network-monitor`: socket bind, connect and DNS answer events.
//! - `anti-rootkit`: module loading, kernel file reads, user mode helpers and
//!   the syscall table and IDT scans.

use kestrel_core::pdk::{Registry, RegistryError};

pub mod agent;
pub mod cli;
pub mod term_print;

pub type RegisterFn = fn(&mut Registry) -> Result<(), RegistryError>;

/// Modules compiled into the binary, with their registration function.
pub fn modules() -> Vec<(&'static str, RegisterFn)> {
    [
        #[cfg(feature = "process-monitor")]
        (process_monitor::MODULE_NAME, process_monitor::register as RegisterFn),
        #[cfg(feature = "network-monitor")]
        (network_monitor::MODULE_NAME, network_monitor::register as RegisterFn),
        #[cfg(feature = "anti-rootkit")]
        (anti_rootkit::MODULE_NAME, anti_rootkit::register as RegisterFn),
    ]
    .into_iter()
    .collect()
}

/// Registry with the events of every module. Fails if two events share a
/// type code.
pub fn registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    for (name, register) in modules() {
        register(&mut registry)?;
        log::debug!("registered module {name}");
    }
    Ok(registry)
}

/// Init logger. We log from info level and above, hide timestamp
/// and module path.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}
