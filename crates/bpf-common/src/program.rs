//! [`Probe`] describes one kernel attach point of an eBPF program.
//!
//! Loading and attaching is done by the external loader: every event type
//! only declares which programs must be attached for its records to be
//! produced. [`ProbeSet`] is a small builder to list them.
use core::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Tracepoint,
    Kprobe,
    Kretprobe,
    Uprobe,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Tracepoint => write!(f, "tracepoint"),
            ProbeKind::Kprobe => write!(f, "kprobe"),
            ProbeKind::Kretprobe => write!(f, "kretprobe"),
            ProbeKind::Uprobe => write!(f, "uprobe"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Probe {
    /// Unique identifier, used by the loader to refer to the attachment
    pub uid: String,
    pub kind: ProbeKind,
    /// ELF section of the eBPF program, eg. `kprobe/security_socket_bind`
    pub section: String,
    /// Name of the eBPF function
    pub program: String,
    /// Tracepoint, kernel function or user-space symbol to attach to
    pub attach_to: String,
    /// Binary containing `attach_to`. Uprobes only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.binary_path {
            Some(binary) => write!(f, "{} {}:{}", self.kind, binary, self.attach_to),
            None => write!(f, "{} {}", self.kind, self.attach_to),
        }
    }
}

#[derive(Default)]
pub struct ProbeSet {
    probes: Vec<Probe>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `category` is the tracepoint subsystem, eg. `syscalls`.
    pub fn tracepoint(mut self, category: &str, tracepoint: &str) -> Self {
        self.probes.push(Probe {
            uid: format!("tracepoint_{tracepoint}"),
            kind: ProbeKind::Tracepoint,
            section: format!("tracepoint/{category}/{tracepoint}"),
            program: tracepoint.to_string(),
            attach_to: tracepoint.to_string(),
            binary_path: None,
        });
        self
    }

    pub fn kprobe(mut self, function: &str) -> Self {
        self.probes.push(Probe {
            uid: format!("kprobe_{function}"),
            kind: ProbeKind::Kprobe,
            section: format!("kprobe/{function}"),
            program: format!("kprobe_{function}"),
            attach_to: function.to_string(),
            binary_path: None,
        });
        self
    }

    pub fn kretprobe(mut self, function: &str) -> Self {
        self.probes.push(Probe {
            uid: format!("kretprobe_{function}"),
            kind: ProbeKind::Kretprobe,
            section: format!("kretprobe/{function}"),
            program: format!("kretprobe_{function}"),
            attach_to: function.to_string(),
            binary_path: None,
        });
        self
    }

    /// Attach the eBPF function `program` to `symbol` inside `binary`.
    pub fn uprobe(mut self, program: &str, binary: &str, symbol: &str) -> Self {
        self.probes.push(Probe {
            uid: format!("uprobe_{program}"),
            kind: ProbeKind::Uprobe,
            section: format!("uprobe/{program}"),
            program: program.to_string(),
            attach_to: symbol.to_string(),
            binary_path: Some(binary.to_string()),
        });
        self
    }

    pub fn build(self) -> Vec<Probe> {
        self.probes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_follow_program_kind() {
        let probes = ProbeSet::new()
            .tracepoint("syscalls", "sys_enter_execve")
            .kprobe("security_socket_bind")
            .kretprobe("udp_recvmsg")
            .uprobe("trigger_idt_scan", "/proc/self/exe", "kestrel_trigger_idt_scan")
            .build();
        let sections: Vec<_> = probes.iter().map(|p| p.section.as_str()).collect();
        assert_eq!(
            sections,
            [
                "tracepoint/syscalls/sys_enter_execve",
                "kprobe/security_socket_bind",
                "kretprobe/udp_recvmsg",
                "uprobe/trigger_idt_scan",
            ]
        );
        assert_eq!(
            probes[3].to_string(),
            "uprobe /proc/self/exe:kestrel_trigger_idt_scan"
        );
    }

    #[test]
    fn serialize_omits_binary_for_kernel_probes() {
        let probes = ProbeSet::new().kprobe("do_init_module").build();
        let json = serde_json::to_value(&probes[0]).unwrap();
        assert_eq!(json["kind"], "kprobe");
        assert!(json.get("binary_path").is_none());
    }
}
