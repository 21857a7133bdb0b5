use bpf_common::{
    Probe, ProbeSet,
    parsing::{Context, RawDecoder},
};
use kestrel_core::{
    event::{Payload, ProcessExec},
    pdk::{
        CacheFiller, DecodeState, EventError, ExeSource, KernelEvent, SuppressReason, Verdict,
    },
};

const SSH_PREFIX: &str = "SSH_";
const SSH_CONNECTION: &str = "SSH_CONNECTION=";
const LD_PREFIX: &str = "LD_PRE";
const LD_PRELOAD: &str = "LD_PRELOAD=";
const MISSING: &str = "-1";

const FILTERED: Result<Verdict, EventError> = Ok(Verdict::Suppress(SuppressReason::Filter));

/// Decode the payload shared by `execve` and `execveat`.
///
/// The exe and the command line go through their window filters only once
/// the whole record is decoded, so a malformed record never counts as a hit.
fn decode_exec(
    exec: &mut ProcessExec,
    decoder: &mut RawDecoder,
    state: &DecodeState,
) -> Result<Verdict, EventError> {
    exec.exe = decoder.read_string()?;
    exec.cwd = decoder.read_string()?;
    exec.tty_name = decoder.read_string()?;
    exec.stdin = decoder.read_string()?;
    exec.stdout = decoder.read_string()?;

    let remote = decoder.read_remote_addr()?;
    exec.family = remote.family();
    exec.dport = remote.port();
    exec.dip = remote.ip_string();
    decoder.read_index()?;
    exec.socket_pid = decoder.read_u32()?;

    let pid_tree = decoder.read_pid_tree()?;
    exec.pid_tree = pid_tree.to_string();
    exec.priv_escalation = pid_tree.priv_escalation;

    exec.argv = decoder.read_str_array()?.join(" ");

    for env in decoder.read_str_array()? {
        if env.starts_with(SSH_PREFIX) {
            exec.ssh_connection = strip(&env, SSH_CONNECTION);
        } else if env.starts_with(LD_PREFIX) {
            exec.ld_preload = strip(&env, LD_PRELOAD);
        }
    }
    if exec.ssh_connection.is_empty() {
        exec.ssh_connection = MISSING.to_string();
    }
    if exec.ld_preload.is_empty() {
        exec.ld_preload = MISSING.to_string();
    }

    if !state.windows.exe.check(&exec.exe) {
        log::trace!("exec of {} over its window", exec.exe);
        return FILTERED;
    }
    if !state.windows.argv.check(&exec.argv) {
        log::trace!("command line {:?} over its window", exec.argv);
        return FILTERED;
    }

    exec.socket_argv = state.argv_cache.get(exec.socket_pid).unwrap_or_default();
    Ok(Verdict::Emit)
}

fn strip(env: &str, prefix: &str) -> String {
    env.strip_prefix(prefix).unwrap_or(env).to_string()
}

macro_rules! exec_event {
    ($event:ident, $id:expr, $name:expr, $variant:ident) => {
        #[derive(Debug, Default)]
        pub struct $event(pub ProcessExec);

        impl KernelEvent for $event {
            fn id(&self) -> u32 {
                $id
            }

            fn name(&self) -> &'static str {
                $name
            }

            fn decode(
                &mut self,
                decoder: &mut RawDecoder,
                state: &DecodeState,
            ) -> Result<Verdict, EventError> {
                decode_exec(&mut self.0, decoder, state)
            }

            fn probes(&self) -> Vec<Probe> {
                ProbeSet::new()
                    .tracepoint("syscalls", concat!("sys_enter_", $name))
                    .tracepoint("syscalls", concat!("sys_exit_", $name))
                    .build()
            }

            fn into_payload(self: Box<Self>) -> Payload {
                Payload::$variant(self.0)
            }

            fn as_exe_source(&self) -> Option<&dyn ExeSource> {
                Some(self)
            }

            fn as_cache_filler(&self) -> Option<&dyn CacheFiller> {
                Some(self)
            }
        }

        impl ExeSource for $event {
            fn exe(&self) -> &str {
                &self.0.exe
            }
        }

        impl CacheFiller for $event {
            fn fill_cache(&self, context: &Context, state: &DecodeState) {
                state.argv_cache.insert(context.pid, self.0.argv.clone());
            }
        }
    };
}

exec_event!(Execve, 700, "execve", Execve);
exec_event!(Execveat, 698, "execveat", Execveat);
