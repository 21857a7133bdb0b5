//! [`RawDecoder`] is a cursor over the payload of a single kernel record.
//!
//! eBPF programs write their arguments one after the other into a per-cpu
//! buffer, each prefixed by a one byte argument index. Variable sized items
//! (strings, string arrays, process trees) carry their own length. The
//! decoder mirrors that write sequence with typed reads: every read consumes
//! exactly its width or fails with [`DecodeError::Truncated`] without
//! consuming anything.
//!
//! Integers are in native byte order, unless the method name ends with `_be`
//! (network order fields copied straight out of socket structures).

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6},
};

use bytes::{Buf, Bytes};
use thiserror::Error;

pub const AF_UNSPEC: u16 = 0;
pub const AF_INET: u16 = 2;
pub const AF_INET6: u16 = 10;

/// Largest element count of an array item, its count is a single byte.
pub const MAX_ARRAY_LEN: usize = u8::MAX as usize;

/// `sizeof(struct sockaddr) - sizeof(sa_family_t)`
const SOCKADDR_BODY_LEN: usize = 14;
/// `sin_zero` padding of `struct sockaddr_in`
const SIN_ZERO_LEN: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer too short at offset {offset}: {needed} bytes needed, {remaining} left")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("invalid length {len} at offset {offset}")]
    InvalidLength { offset: usize, len: i64 },
    #[error("unsupported address family {0}")]
    UnsupportedFamily(u16),
}

impl DecodeError {
    /// Short or cut records are expected under load and are not worth more
    /// than a debug line.
    pub fn is_truncation(&self) -> bool {
        matches!(self, DecodeError::Truncated { .. })
    }
}

pub struct RawDecoder {
    buffer: Bytes,
    len: usize,
}

impl RawDecoder {
    pub fn new(buffer: Bytes) -> Self {
        let len = buffer.len();
        Self { buffer, len }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> usize {
        self.len - self.buffer.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        !self.buffer.has_remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        let remaining = self.buffer.remaining();
        if remaining < needed {
            return Err(DecodeError::Truncated {
                offset: self.offset(),
                needed,
                remaining,
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buffer.get_u8())
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buffer.get_i16_ne())
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buffer.get_u16_ne())
    }

    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buffer.get_u16())
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buffer.get_i32_ne())
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buffer.get_u32_ne())
    }

    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buffer.get_u32())
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buffer.get_i64_ne())
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buffer.get_u64_ne())
    }

    /// Split off the next `len` bytes. No copy is made.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, DecodeError> {
        self.ensure(len)?;
        Ok(self.buffer.copy_to_bytes(len))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.ensure(N)?;
        let mut array = [0; N];
        self.buffer.copy_to_slice(&mut array);
        Ok(array)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.ensure(len)?;
        self.buffer.advance(len);
        Ok(())
    }

    /// Argument index written by the producer in front of every item.
    /// The index is informative only: the read sequence already tells
    /// which argument comes next.
    pub fn read_index(&mut self) -> Result<u8, DecodeError> {
        self.read_u8()
    }

    /// A NUL padded character array of fixed size, like `comm`.
    pub fn read_fixed_str(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(len)?;
        let end = bytes.iter().position(|c| *c == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// `size:i32 | bytes[size]`, where the last byte is the NUL terminator.
    fn read_sized_str(&mut self) -> Result<String, DecodeError> {
        let offset = self.offset();
        let size = self.read_i32()?;
        if size < 1 {
            return Err(DecodeError::InvalidLength {
                offset,
                len: size as i64,
            });
        }
        let bytes = self.read_bytes(size as usize)?;
        Ok(String::from_utf8_lossy(&bytes[..bytes.len() - 1]).into_owned())
    }

    /// An index tagged string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        self.read_index()?;
        self.read_sized_str()
    }

    /// An index tagged array of at most 255 strings.
    pub fn read_str_array(&mut self) -> Result<Vec<String>, DecodeError> {
        self.read_index()?;
        let count = self.read_u8()?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(self.read_sized_str()?);
        }
        Ok(items)
    }

    /// An index tagged array of at most 255 native u64.
    pub fn read_u64_array(&mut self) -> Result<Vec<u64>, DecodeError> {
        self.read_index()?;
        let count = self.read_u8()? as usize;
        self.ensure(count * 8)?;
        Ok((0..count).map(|_| self.buffer.get_u64_ne()).collect())
    }

    /// An index tagged `sockaddr`: family followed by its body.
    pub fn read_remote_addr(&mut self) -> Result<RemoteAddr, DecodeError> {
        self.read_index()?;
        let family = self.read_u16()?;
        self.read_sockaddr_body(family)
    }

    /// Body of a `sockaddr` whose family has already been read.
    ///
    /// `AF_UNSPEC` is emitted by the kernel side when the process has no
    /// connected socket: the body is skipped. Any other unknown family
    /// fails, since its size is unknown.
    pub fn read_sockaddr_body(&mut self, family: u16) -> Result<RemoteAddr, DecodeError> {
        match family {
            AF_UNSPEC => {
                self.skip(SOCKADDR_BODY_LEN)?;
                Ok(RemoteAddr::Unspec)
            }
            AF_INET => {
                let port = self.read_u16_be()?;
                let addr = self.read_u32_be()?;
                self.skip(SIN_ZERO_LEN)?;
                Ok(RemoteAddr::V4(SocketAddrV4::new(Ipv4Addr::from(addr), port)))
            }
            AF_INET6 => {
                let port = self.read_u16_be()?;
                let flowinfo = self.read_u32_be()?;
                let addr: [u8; 16] = self.read_array()?;
                let scope_id = self.read_u32()?;
                Ok(RemoteAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(addr),
                    port,
                    flowinfo,
                    scope_id,
                )))
            }
            other => Err(DecodeError::UnsupportedFamily(other)),
        }
    }

    /// An index tagged chain of ancestors, closest first, followed by the
    /// privilege escalation flag computed by the kernel side.
    pub fn read_pid_tree(&mut self) -> Result<PidTree, DecodeError> {
        self.read_index()?;
        let count = self.read_u8()?;
        let mut ancestors = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let pid = self.read_u32()?;
            let comm = self.read_sized_str()?;
            ancestors.push((pid, comm));
        }
        let priv_escalation = self.read_u8()?;
        Ok(PidTree {
            ancestors,
            priv_escalation,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAddr {
    Unspec,
    V4(SocketAddrV4),
    V6(SocketAddrV6),
}

impl RemoteAddr {
    pub fn family(&self) -> u16 {
        match self {
            RemoteAddr::Unspec => AF_UNSPEC,
            RemoteAddr::V4(_) => AF_INET,
            RemoteAddr::V6(_) => AF_INET6,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            RemoteAddr::Unspec => 0,
            RemoteAddr::V4(v) => v.port(),
            RemoteAddr::V6(v) => v.port(),
        }
    }

    /// Printable address, `-1` when there is none.
    pub fn ip_string(&self) -> String {
        match self {
            RemoteAddr::Unspec => "-1".to_string(),
            RemoteAddr::V4(v) => v.ip().to_string(),
            RemoteAddr::V6(v) => v.ip().to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidTree {
    pub ancestors: Vec<(u32, String)>,
    pub priv_escalation: u8,
}

impl fmt::Display for PidTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (pid, comm)) in self.ancestors.iter().enumerate() {
            if i > 0 {
                write!(f, "<")?;
            }
            write!(f, "{pid}.{comm}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder(bytes: &[u8]) -> RawDecoder {
        RawDecoder::new(Bytes::copy_from_slice(bytes))
    }

    fn sized(s: &str) -> Vec<u8> {
        let mut out = ((s.len() + 1) as i32).to_ne_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out.push(0);
        out
    }

    #[test]
    fn primitives_advance_by_their_width() {
        let mut bytes = vec![7u8];
        bytes.extend_from_slice(&513u16.to_ne_bytes());
        bytes.extend_from_slice(&0x1F90u16.to_be_bytes());
        bytes.extend_from_slice(&(-3i32).to_ne_bytes());
        bytes.extend_from_slice(&u64::MAX.to_ne_bytes());
        let mut d = decoder(&bytes);
        assert_eq!(d.read_u8(), Ok(7));
        assert_eq!(d.offset(), 1);
        assert_eq!(d.read_u16(), Ok(513));
        assert_eq!(d.read_u16_be(), Ok(8080));
        assert_eq!(d.read_i32(), Ok(-3));
        assert_eq!(d.read_u64(), Ok(u64::MAX));
        assert!(d.is_exhausted());
    }

    #[test]
    fn truncated_read_consumes_nothing() {
        let mut d = decoder(&[1, 2, 3]);
        assert_eq!(
            d.read_u32(),
            Err(DecodeError::Truncated {
                offset: 0,
                needed: 4,
                remaining: 3
            })
        );
        assert_eq!(d.offset(), 0);
        assert!(d.read_u32().unwrap_err().is_truncation());
    }

    #[test]
    fn string_drops_terminator() {
        let mut bytes = vec![0u8];
        bytes.extend(sized("/usr/bin/cat"));
        let mut d = decoder(&bytes);
        assert_eq!(d.read_string().unwrap(), "/usr/bin/cat");
        assert!(d.is_exhausted());
    }

    #[test]
    fn string_with_bad_size() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&0i32.to_ne_bytes());
        assert!(matches!(
            decoder(&bytes).read_string(),
            Err(DecodeError::InvalidLength { offset: 1, len: 0 })
        ));

        // a size larger than the record must not be trusted
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&i32::MAX.to_ne_bytes());
        bytes.extend_from_slice(b"abc\0");
        assert!(decoder(&bytes).read_string().unwrap_err().is_truncation());
    }

    #[test]
    fn str_array() {
        let mut bytes = vec![3u8, 2];
        bytes.extend(sized("ls"));
        bytes.extend(sized("-la"));
        let mut d = decoder(&bytes);
        assert_eq!(d.read_str_array().unwrap(), vec!["ls", "-la"]);
        assert!(d.is_exhausted());
    }

    #[test]
    fn str_array_missing_items() {
        let mut bytes = vec![3u8, 3];
        bytes.extend(sized("ls"));
        assert!(decoder(&bytes).read_str_array().unwrap_err().is_truncation());
    }

    #[test]
    fn u64_array() {
        let mut bytes = vec![0u8, 2];
        bytes.extend_from_slice(&0xffff_ffff_8100_0000u64.to_ne_bytes());
        bytes.extend_from_slice(&42u64.to_ne_bytes());
        let mut d = decoder(&bytes);
        assert_eq!(d.read_u64_array().unwrap(), vec![0xffff_ffff_8100_0000, 42]);
        assert!(decoder(&bytes[..10]).read_u64_array().is_err());
    }

    #[test]
    fn remote_addr_v4() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&AF_INET.to_ne_bytes());
        bytes.extend_from_slice(&443u16.to_be_bytes());
        bytes.extend_from_slice(&[10, 0, 0, 1]);
        bytes.extend_from_slice(&[0; 8]);
        let mut d = decoder(&bytes);
        let addr = d.read_remote_addr().unwrap();
        assert_eq!(addr.family(), AF_INET);
        assert_eq!(addr.port(), 443);
        assert_eq!(addr.ip_string(), "10.0.0.1");
        assert!(d.is_exhausted());
    }

    #[test]
    fn remote_addr_v6() {
        let ip: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&AF_INET6.to_ne_bytes());
        bytes.extend_from_slice(&22u16.to_be_bytes());
        bytes.extend_from_slice(&7u32.to_be_bytes());
        bytes.extend_from_slice(&ip.octets());
        bytes.extend_from_slice(&3u32.to_ne_bytes());
        let mut d = decoder(&bytes);
        assert_eq!(
            d.read_remote_addr().unwrap(),
            RemoteAddr::V6(SocketAddrV6::new(ip, 22, 7, 3))
        );
        assert!(d.is_exhausted());
    }

    #[test]
    fn remote_addr_unspec_and_unknown() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&AF_UNSPEC.to_ne_bytes());
        bytes.extend_from_slice(&[0; SOCKADDR_BODY_LEN]);
        let mut d = decoder(&bytes);
        let addr = d.read_remote_addr().unwrap();
        assert_eq!(addr, RemoteAddr::Unspec);
        assert_eq!(addr.ip_string(), "-1");
        assert!(d.is_exhausted());

        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&1u16.to_ne_bytes());
        bytes.extend_from_slice(&[0; 108]);
        let mut d = decoder(&bytes);
        assert_eq!(d.read_remote_addr(), Err(DecodeError::UnsupportedFamily(1)));
        assert_eq!(d.offset(), 3);
    }

    #[test]
    fn pid_tree() {
        let mut bytes = vec![4u8, 2];
        bytes.extend_from_slice(&100u32.to_ne_bytes());
        bytes.extend(sized("bash"));
        bytes.extend_from_slice(&1u32.to_ne_bytes());
        bytes.extend(sized("systemd"));
        bytes.push(1);
        let mut d = decoder(&bytes);
        let tree = d.read_pid_tree().unwrap();
        assert_eq!(tree.to_string(), "100.bash<1.systemd");
        assert_eq!(tree.priv_escalation, 1);
        assert!(d.is_exhausted());
    }

    #[test]
    fn fixed_str_stops_at_nul() {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(b"sshd");
        assert_eq!(decoder(&bytes).read_fixed_str(16).unwrap(), "sshd");
    }
}
