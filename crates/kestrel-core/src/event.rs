use std::{borrow::Cow, fmt};

use bpf_common::parsing::Context;
use serde::Serialize;

/// A decoded kernel event, ready to be handed to the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub(crate) header: Header,
    pub(crate) payload: Payload,
}

impl Event {
    pub fn new(header: Header, payload: Payload) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        let time = header.context.timestamp;
        let exe = &header.exe;
        let pid = header.context.pid;
        let name = &header.name;
        let payload = self.payload();
        if f.alternate() {
            write!(f, "[{time} \x1b[1;30;46mEVENT\x1b[0m {exe} ({pid})] [{name}] {payload}")
        } else {
            write!(f, "[{time} EVENT {exe} ({pid})] [{name}] {payload}")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Header {
    /// Type code of the event
    pub id: u32,
    pub name: Cow<'static, str>,
    /// Executable path when known, otherwise the task command name
    pub exe: String,
    pub context: Context,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "content")]
pub enum Payload {
    Execve(ProcessExec),
    Execveat(ProcessExec),
    SocketBind(SocketBind),
    SocketConnect(SocketConnect),
    DnsResponse(DnsResponse),
    SyscallTableHook(SyscallTableHook),
    IdtHook(IdtHook),
    ModuleLoad(ModuleLoad),
    KernelReadFile(KernelReadFile),
    UsermodeHelper(UsermodeHelper),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Execve(exec) => write!(f, "Execve {exec}"),
            Payload::Execveat(exec) => write!(f, "Execveat {exec}"),
            Payload::SocketBind(SocketBind { local_addr, local_port, protocol, .. }) => write!(f, "Bind {{ address: {local_addr}, port: {local_port}, protocol: {protocol} }}"),
            Payload::SocketConnect(SocketConnect { local_addr, local_port, remote_addr, remote_port, .. }) => write!(f, "Connect {{ source: {local_addr}:{local_port}, destination: {remote_addr}:{remote_port} }}"),
            Payload::DnsResponse(DnsResponse { domain, qtype, rcode, .. }) => write!(f, "Dns Response {{ domain: {domain}, qtype: {qtype}, rcode: {rcode} }}"),
            Payload::SyscallTableHook(SyscallTableHook { hooked }) => {
                write!(f, "Syscall table hooked {{ entries: ")?;
                print_vec(f, hooked)?;
                write!(f, " }}")
            }
            Payload::IdtHook(IdtHook { index, address }) => write!(f, "IDT hooked {{ index: {index}, address: {address} }}"),
            Payload::ModuleLoad(ModuleLoad { modname, exe, .. }) => write!(f, "Module loaded {{ name: {modname}, loader: {exe} }}"),
            Payload::KernelReadFile(KernelReadFile { filename, read_type, .. }) => write!(f, "Kernel read file {{ filename: {filename}, type: {read_type} }}"),
            Payload::UsermodeHelper(UsermodeHelper { path, argv, .. }) => write!(f, "Usermode helper {{ path: {path}, argv: {argv} }}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessExec {
    pub exe: String,
    pub cwd: String,
    pub tty_name: String,
    pub stdin: String,
    pub stdout: String,
    /// Peer port of the socket owned by the process, if any
    pub dport: u16,
    /// Peer address of the socket owned by the process, `-1` if none
    pub dip: String,
    pub family: u16,
    /// Process owning the socket, it may differ from the executing one
    pub socket_pid: u32,
    /// Last command line seen for `socket_pid`
    pub socket_argv: String,
    pub pid_tree: String,
    pub argv: String,
    pub priv_escalation: u8,
    pub ssh_connection: String,
    pub ld_preload: String,
}

impl fmt::Display for ProcessExec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ exe: {}, argv: {}, pid_tree: {}, ld_preload: {} }}",
            self.exe, self.argv, self.pid_tree, self.ld_preload
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocketBind {
    pub family: i16,
    pub local_port: String,
    pub local_addr: String,
    pub protocol: u16,
    pub exe: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SocketConnect {
    pub family: u16,
    pub local_addr: String,
    pub local_port: u16,
    pub remote_addr: String,
    pub remote_port: u16,
    pub exe: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DnsResponse {
    pub opcode: i32,
    pub rcode: i32,
    pub qtype: i32,
    pub atype: i32,
    pub domain: String,
    pub exe: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyscallTableHook {
    pub hooked: Vec<HookedSyscall>,
}

/// A `sys_call_table` slot pointing outside of the core kernel text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookedSyscall {
    pub index: usize,
    pub address: String,
    /// Module owning the handler, if it resolves to one
    pub module: Option<String>,
}

impl fmt::Display for HookedSyscall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.module {
            Some(module) => write!(f, "({} - {} - {})", self.index, self.address, module),
            None => write!(f, "({} - {})", self.index, self.address),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdtHook {
    pub index: u64,
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleLoad {
    pub modname: String,
    pub exe: String,
    pub pid_tree: String,
    pub cwd: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KernelReadFile {
    pub filename: String,
    pub type_id: i32,
    /// Name of `enum kernel_read_file_id`
    pub read_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsermodeHelper {
    pub path: String,
    pub argv: String,
    pub envp: String,
    pub wait: i32,
    pub exe: String,
}

fn print_vec<T: fmt::Display>(f: &mut fmt::Formatter<'_>, v: &[T]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in v.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_tagged_payload() {
        let event = Event::new(
            Header {
                id: 1201,
                name: "anti_rkt_idt_scan".into(),
                exe: "kestrel".to_string(),
                context: Context::default(),
            },
            Payload::IdtHook(IdtHook {
                index: 128,
                address: "ffffffffc0de0000".to_string(),
            }),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["header"]["id"], 1201);
        assert_eq!(json["payload"]["type"], "IdtHook");
        assert_eq!(json["payload"]["content"]["address"], "ffffffffc0de0000");
    }

    #[test]
    fn display_hooked_entries() {
        let payload = Payload::SyscallTableHook(SyscallTableHook {
            hooked: vec![
                HookedSyscall {
                    index: 0,
                    address: "ffffffffc0a01000".to_string(),
                    module: Some("evil".to_string()),
                },
                HookedSyscall {
                    index: 59,
                    address: "dead".to_string(),
                    module: None,
                },
            ],
        });
        assert_eq!(
            payload.to_string(),
            "Syscall table hooked { entries: [(0 - ffffffffc0a01000 - evil), (59 - dead)] }"
        );
    }
}
