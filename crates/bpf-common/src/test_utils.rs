//! Build raw records the same way eBPF programs write them.
//!
//! Tagged items (strings, arrays, addresses, process trees, and fixed values
//! written with [`RecordBuilder::tagged`]) get an increasing argument index,
//! like `save_*_to_buf` helpers do on the kernel side.

use bytes::{BufMut, Bytes, BytesMut};

use crate::parsing::{
    Context,
    context::{NODENAME_LEN, TASK_COMM_LEN},
    decoder::{AF_INET, AF_INET6, AF_UNSPEC, MAX_ARRAY_LEN},
};

#[derive(Default)]
pub struct RecordBuilder {
    buf: BytesMut,
    next_index: u8,
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a full record: type code followed by the execution context.
    pub fn record(type_code: u32, context: &Context) -> Self {
        Self::new().u32(type_code).context(context)
    }

    pub fn context(mut self, ctx: &Context) -> Self {
        self.buf.put_u64_ne(ctx.timestamp.as_nanos());
        for value in [
            ctx.pid, ctx.tid, ctx.ppid, ctx.pgid, ctx.sid, ctx.uid, ctx.gid, ctx.pid_ns,
        ] {
            self.buf.put_u32_ne(value);
        }
        self.buf.put_u64_ne(ctx.cgroup_id);
        self.buf.put_i64_ne(ctx.retval);
        self.fixed_str(&ctx.comm, TASK_COMM_LEN)
            .fixed_str(&ctx.pcomm, TASK_COMM_LEN)
            .fixed_str(&ctx.nodename, NODENAME_LEN)
    }

    fn fixed_str(mut self, s: &str, len: usize) -> Self {
        let bytes = &s.as_bytes()[..s.len().min(len - 1)];
        self.buf.put_slice(bytes);
        self.buf.put_bytes(0, len - bytes.len());
        self
    }

    /// Write the next argument index. Use before fixed size values.
    pub fn tagged(mut self) -> Self {
        self.buf.put_u8(self.next_index);
        self.next_index += 1;
        self
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.put_u8(v);
        self
    }

    pub fn i16(mut self, v: i16) -> Self {
        self.buf.put_i16_ne(v);
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.buf.put_u16_ne(v);
        self
    }

    pub fn u16_be(mut self, v: u16) -> Self {
        self.buf.put_u16(v);
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.put_i32_ne(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.put_u32_ne(v);
        self
    }

    pub fn u32_be(mut self, v: u32) -> Self {
        self.buf.put_u32(v);
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.put_u64_ne(v);
        self
    }

    pub fn bytes(mut self, v: &[u8]) -> Self {
        self.buf.put_slice(v);
        self
    }

    fn sized_str(mut self, s: &str) -> Self {
        self.buf.put_i32_ne(s.len() as i32 + 1);
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(0);
        self
    }

    pub fn string(self, s: &str) -> Self {
        self.tagged().sized_str(s)
    }

    pub fn str_array(self, items: &[&str]) -> Self {
        let mut this = self.tagged().u8(items.len() as u8);
        for item in items {
            this = this.sized_str(item);
        }
        this
    }

    pub fn u64_array(self, items: &[u64]) -> Self {
        assert!(items.len() <= MAX_ARRAY_LEN, "u64 array too long");
        let mut this = self.tagged().u8(items.len() as u8);
        for item in items {
            this = this.u64(*item);
        }
        this
    }

    pub fn pid_tree(self, ancestors: &[(u32, &str)], priv_escalation: u8) -> Self {
        let mut this = self.tagged().u8(ancestors.len() as u8);
        for (pid, comm) in ancestors {
            this = this.u32(*pid).sized_str(comm);
        }
        this.u8(priv_escalation)
    }

    /// Body of a `sockaddr_in`, without family.
    pub fn sockaddr_in_body(self, port: u16, addr: [u8; 4]) -> Self {
        self.u16_be(port).bytes(&addr).bytes(&[0; 8])
    }

    /// Body of a `sockaddr_in6`, without family.
    pub fn sockaddr_in6_body(self, port: u16, flowinfo: u32, addr: [u8; 16], scope_id: u32) -> Self {
        self.u16_be(port).u32_be(flowinfo).bytes(&addr).u32(scope_id)
    }

    pub fn remote_v4(self, port: u16, addr: [u8; 4]) -> Self {
        self.tagged().u16(AF_INET).sockaddr_in_body(port, addr)
    }

    pub fn remote_v6(self, port: u16, addr: [u8; 16]) -> Self {
        self.tagged().u16(AF_INET6).sockaddr_in6_body(port, 0, addr, 0)
    }

    pub fn remote_unspec(self) -> Self {
        self.tagged().u16(AF_UNSPEC).bytes(&[0; 14])
    }

    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}
