//! Execution context written by every eBPF program in front of its payload.

use serde::Serialize;

use super::{DecodeError, RawDecoder};
use crate::time::Timestamp;

pub const TASK_COMM_LEN: usize = 16;
pub const NODENAME_LEN: usize = 64;
/// Size in bytes of the encoded context.
pub const CONTEXT_SIZE: usize = 8 + 8 * 4 + 8 + 8 + TASK_COMM_LEN * 2 + NODENAME_LEN;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Context {
    pub timestamp: Timestamp,
    pub pid: u32,
    pub tid: u32,
    pub ppid: u32,
    pub pgid: u32,
    pub sid: u32,
    pub uid: u32,
    pub gid: u32,
    pub pid_ns: u32,
    pub cgroup_id: u64,
    pub retval: i64,
    pub comm: String,
    pub pcomm: String,
    pub nodename: String,
}

impl Context {
    pub fn decode(decoder: &mut RawDecoder) -> Result<Self, DecodeError> {
        // Fail early instead of leaving a half read context behind.
        if decoder.remaining() < CONTEXT_SIZE {
            return Err(DecodeError::Truncated {
                offset: decoder.offset(),
                needed: CONTEXT_SIZE,
                remaining: decoder.remaining(),
            });
        }
        Ok(Self {
            timestamp: decoder.read_u64()?.into(),
            pid: decoder.read_u32()?,
            tid: decoder.read_u32()?,
            ppid: decoder.read_u32()?,
            pgid: decoder.read_u32()?,
            sid: decoder.read_u32()?,
            uid: decoder.read_u32()?,
            gid: decoder.read_u32()?,
            pid_ns: decoder.read_u32()?,
            cgroup_id: decoder.read_u64()?,
            retval: decoder.read_i64()?,
            comm: decoder.read_fixed_str(TASK_COMM_LEN)?,
            pcomm: decoder.read_fixed_str(TASK_COMM_LEN)?,
            nodename: decoder.read_fixed_str(NODENAME_LEN)?,
        })
    }
}
