use std::hint::black_box;

use bpf_common::{
    Probe, ProbeSet,
    parsing::{RawDecoder, decoder::MAX_ARRAY_LEN},
};
use kestrel_core::{
    event::{HookedSyscall, IdtHook, Payload, SyscallTableHook},
    pdk::{
        ActiveScanner, DecodeState, EventError, KernelEvent, SuppressReason, TriggerContext,
        TriggerError, Verdict,
    },
};

const SELF_EXE: &str = "/proc/self/exe";
const SCAN_SCHEDULE: &str = "0 */10 * * * *";

const IDT_TABLE: &str = "idt_table";
/// Vector of the legacy `int 0x80` syscall gate.
const IDT_SYSCALL_VECTOR: u64 = 0x80;

const SYS_CALL_TABLE: &str = "sys_call_table";
/// Table slots read by the kernel side on every scan, as many as one
/// record can carry.
const SCANNED_SYSCALLS: u64 = MAX_ARRAY_LEN as u64;

/// Uprobe target: the kernel side reads entry `index` of the IDT at
/// `idt_table` when this is called.
#[unsafe(no_mangle)]
#[inline(never)]
pub extern "C" fn kestrel_trigger_idt_scan(idt_table: u64, index: u64) {
    black_box((idt_table, index));
}

/// Uprobe target: the kernel side reads the first `count` handlers of the
/// syscall table at `sys_call_table` when this is called.
#[unsafe(no_mangle)]
#[inline(never)]
pub extern "C" fn kestrel_trigger_sct_scan(sys_call_table: u64, count: u64) {
    black_box((sys_call_table, count));
}

fn symbol(ctx: &TriggerContext, name: &str) -> Result<u64, TriggerError> {
    ctx.ksyms
        .lookup_name(name)
        .ok_or_else(|| TriggerError::SymbolNotFound(name.to_string()))
}

/// Handler of an interrupt vector which is not a kernel symbol.
#[derive(Debug, Default)]
pub struct IdtScan(pub IdtHook);

impl KernelEvent for IdtScan {
    fn id(&self) -> u32 {
        1201
    }

    fn name(&self) -> &'static str {
        "anti_rkt_idt_scan"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        decoder.read_index()?;
        let index = decoder.read_u64()?;
        decoder.read_index()?;
        let address = decoder.read_u64()?;
        if state.ksyms.resolve(address).is_some() {
            return Ok(Verdict::Suppress(SuppressReason::Ignore));
        }
        self.0 = IdtHook {
            index,
            address: format!("{address:x}"),
        };
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new()
            .uprobe("trigger_idt_scan", SELF_EXE, "kestrel_trigger_idt_scan")
            .build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::IdtHook(self.0)
    }

    fn as_active_scanner(&self) -> Option<&dyn ActiveScanner> {
        Some(self)
    }
}

impl ActiveScanner for IdtScan {
    fn schedule(&self) -> &'static str {
        SCAN_SCHEDULE
    }

    fn trigger(&self, ctx: &TriggerContext) -> Result<(), TriggerError> {
        let idt_table = symbol(ctx, IDT_TABLE)?;
        log::debug!("scanning IDT vector {IDT_SYSCALL_VECTOR:#x} at {idt_table:x}");
        kestrel_trigger_idt_scan(idt_table, IDT_SYSCALL_VECTOR);
        Ok(())
    }
}

/// Syscall table slots pointing outside of the kernel text.
#[derive(Debug, Default)]
pub struct SyscallTableScan(pub SyscallTableHook);

impl KernelEvent for SyscallTableScan {
    fn id(&self) -> u32 {
        1200
    }

    fn name(&self) -> &'static str {
        "anti_rkt_sct_scan"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        let ksyms = &state.ksyms;
        // zero slots were not read by the kernel side
        self.0.hooked = decoder
            .read_u64_array()?
            .into_iter()
            .enumerate()
            .filter(|(_, address)| *address != 0 && !ksyms.is_core_kernel_text(*address))
            .map(|(index, address)| HookedSyscall {
                index,
                address: format!("{address:x}"),
                module: ksyms
                    .nearest(address)
                    .and_then(|found| found.symbol.module.clone()),
            })
            .collect();
        if self.0.hooked.is_empty() {
            return Ok(Verdict::Suppress(SuppressReason::Ignore));
        }
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new()
            .uprobe("trigger_sct_scan", SELF_EXE, "kestrel_trigger_sct_scan")
            .build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::SyscallTableHook(self.0)
    }

    fn as_active_scanner(&self) -> Option<&dyn ActiveScanner> {
        Some(self)
    }
}

impl ActiveScanner for SyscallTableScan {
    fn schedule(&self) -> &'static str {
        SCAN_SCHEDULE
    }

    fn trigger(&self, ctx: &TriggerContext) -> Result<(), TriggerError> {
        let sys_call_table = symbol(ctx, SYS_CALL_TABLE)?;
        log::debug!("scanning {SCANNED_SYSCALLS} syscalls at {sys_call_table:x}");
        kestrel_trigger_sct_scan(sys_call_table, SCANNED_SYSCALLS);
        Ok(())
    }
}
