//! Socket activity: local binds, outgoing connections and DNS answers
//! received over UDP.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bpf_common::{
    Probe, ProbeSet,
    parsing::{
        DecodeError, RawDecoder, RemoteAddr,
        decoder::{AF_INET, AF_INET6},
    },
};
use kestrel_core::{
    event::{DnsResponse, Payload, SocketBind, SocketConnect},
    pdk::{
        DecodeState, EventError, ExeSource, KernelEvent, Registry, RegistryError, SuppressReason,
        Verdict,
    },
};

pub const MODULE_NAME: &str = "network-monitor";

pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register::<Bind>()?;
    registry.register::<Connect>()?;
    registry.register::<DnsAnswer>()?;
    Ok(())
}

/// `security_socket_bind` on an inet socket.
#[derive(Debug, Default)]
pub struct Bind(pub SocketBind);

impl KernelEvent for Bind {
    fn id(&self) -> u32 {
        1024
    }

    fn name(&self) -> &'static str {
        "socket_bind"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        _state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        let bind = &mut self.0;
        decoder.read_index()?;
        bind.family = decoder.read_i16()?;
        let local = match decoder.read_sockaddr_body(bind.family as u16)? {
            RemoteAddr::Unspec => return Err(DecodeError::UnsupportedFamily(0).into()),
            local => local,
        };
        bind.local_port = local.port().to_string();
        bind.local_addr = local.ip_string();
        bind.exe = decoder.read_string()?;
        decoder.read_index()?;
        bind.protocol = decoder.read_u16()?;
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new().kprobe("security_socket_bind").build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::SocketBind(self.0)
    }

    fn as_exe_source(&self) -> Option<&dyn ExeSource> {
        Some(self)
    }
}

impl ExeSource for Bind {
    fn exe(&self) -> &str {
        &self.0.exe
    }
}

/// A `connect` syscall, with both ends of the connection.
#[derive(Debug, Default)]
pub struct Connect(pub SocketConnect);

impl KernelEvent for Connect {
    fn id(&self) -> u32 {
        42
    }

    fn name(&self) -> &'static str {
        "connect"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        _state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        let connect = &mut self.0;
        decoder.read_index()?;
        connect.family = decoder.read_u16()?;
        decoder.read_index()?;
        let (local, remote): (IpAddr, IpAddr) = match connect.family {
            AF_INET => (
                Ipv4Addr::from(decoder.read_u32_be()?).into(),
                Ipv4Addr::from(decoder.read_u32_be()?).into(),
            ),
            AF_INET6 => (
                Ipv6Addr::from(decoder.read_array::<16>()?).into(),
                Ipv6Addr::from(decoder.read_array::<16>()?).into(),
            ),
            other => return Err(DecodeError::UnsupportedFamily(other).into()),
        };
        connect.local_addr = local.to_string();
        connect.remote_addr = remote.to_string();
        connect.local_port = decoder.read_u16_be()?;
        connect.remote_port = decoder.read_u16_be()?;
        if connect.family == AF_INET6 {
            // flowinfo and scope id
            decoder.skip(8)?;
        }
        connect.exe = decoder.read_string()?;
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new()
            .tracepoint("syscalls", "sys_enter_connect")
            .tracepoint("syscalls", "sys_exit_connect")
            .build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::SocketConnect(self.0)
    }

    fn as_exe_source(&self) -> Option<&dyn ExeSource> {
        Some(self)
    }
}

impl ExeSource for Connect {
    fn exe(&self) -> &str {
        &self.0.exe
    }
}

/// A DNS answer parsed on the kernel side out of `udp_recvmsg`.
#[derive(Debug, Default)]
pub struct DnsAnswer(pub DnsResponse);

impl KernelEvent for DnsAnswer {
    fn id(&self) -> u32 {
        1025
    }

    fn name(&self) -> &'static str {
        "udp_recvmsg"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        let dns = &mut self.0;
        decoder.read_index()?;
        dns.opcode = decoder.read_i32()?;
        dns.rcode = decoder.read_i32()?;
        dns.qtype = decoder.read_i32()?;
        dns.atype = decoder.read_i32()?;
        dns.domain = decoder.read_string()?;
        dns.exe = decoder.read_string()?;
        if !state.windows.dns.check(&dns.domain) {
            log::trace!("dns answer for {} over its window", dns.domain);
            return Ok(Verdict::Suppress(SuppressReason::Filter));
        }
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new()
            .kprobe("udp_recvmsg")
            .kretprobe("udp_recvmsg")
            .build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::DnsResponse(self.0)
    }

    fn as_exe_source(&self) -> Option<&dyn ExeSource> {
        Some(self)
    }
}

impl ExeSource for DnsAnswer {
    fn exe(&self) -> &str {
        &self.0.exe
    }
}

#[cfg(test)]
mod tests {
    use bpf_common::test_utils::RecordBuilder;
    use kestrel_core::{
        test_utils::{assert_truncated_at_every_length, decode_exactly},
        window::{WindowConfig, WindowFilters},
    };

    use super::*;

    fn decode<E: KernelEvent + Default>(
        builder: RecordBuilder,
        state: &DecodeState,
    ) -> (E, Result<Verdict, EventError>) {
        decode_exactly(builder.build(), state)
    }

    fn bind_v4(port: u16, addr: [u8; 4]) -> RecordBuilder {
        RecordBuilder::new()
            .tagged()
            .i16(AF_INET as i16)
            .sockaddr_in_body(port, addr)
            .string("/usr/bin/redis-server")
            .tagged()
            .u16(6)
    }

    #[test]
    fn bind_ipv4() {
        let (event, verdict) = decode::<Bind>(bind_v4(0x18EB, [127, 0, 0, 1]), &Default::default());
        assert_eq!(verdict.unwrap(), Verdict::Emit);
        assert_eq!(
            event.0,
            SocketBind {
                family: 2,
                local_port: "6379".to_string(),
                local_addr: "127.0.0.1".to_string(),
                protocol: 6,
                exe: "/usr/bin/redis-server".to_string(),
            }
        );
    }

    #[test]
    fn bind_port_is_big_endian() {
        let (event, _) = decode::<Bind>(bind_v4(0x1F90, [0, 0, 0, 0]), &Default::default());
        assert_eq!(event.0.local_port, "8080");
        assert_eq!(event.0.local_addr, "0.0.0.0");
    }

    #[test]
    fn bind_ipv6() {
        let builder = RecordBuilder::new()
            .tagged()
            .i16(AF_INET6 as i16)
            .sockaddr_in6_body(22, 0, Ipv6Addr::LOCALHOST.octets(), 0)
            .string("/usr/sbin/sshd")
            .tagged()
            .u16(6);
        let (event, verdict) = decode::<Bind>(builder, &Default::default());
        assert_eq!(verdict.unwrap(), Verdict::Emit);
        assert_eq!(event.0.local_addr, "::1");
        assert_eq!(event.0.local_port, "22");
        assert_eq!(event.exe(), "/usr/sbin/sshd");
    }

    #[test]
    fn bind_other_family() {
        let builder = RecordBuilder::new().tagged().i16(1).bytes(&[0; 32]);
        let (_, verdict) = decode::<Bind>(builder, &Default::default());
        assert!(matches!(
            verdict,
            Err(EventError::Decode(DecodeError::UnsupportedFamily(1)))
        ));
    }

    fn connect_v4() -> RecordBuilder {
        RecordBuilder::new()
            .tagged()
            .u16(AF_INET)
            .tagged()
            .bytes(&[192, 168, 1, 10])
            .bytes(&[1, 1, 1, 1])
            .u16_be(51000)
            .u16_be(443)
            .string("/usr/bin/curl")
    }

    #[test]
    fn connect_ipv4() {
        let (event, verdict) = decode::<Connect>(connect_v4(), &Default::default());
        assert_eq!(verdict.unwrap(), Verdict::Emit);
        assert_eq!(
            event.0,
            SocketConnect {
                family: 2,
                local_addr: "192.168.1.10".to_string(),
                local_port: 51000,
                remote_addr: "1.1.1.1".to_string(),
                remote_port: 443,
                exe: "/usr/bin/curl".to_string(),
            }
        );
    }

    #[test]
    fn connect_ipv6() {
        let remote: Ipv6Addr = "2606:4700::1111".parse().unwrap();
        let builder = RecordBuilder::new()
            .tagged()
            .u16(AF_INET6)
            .tagged()
            .bytes(&Ipv6Addr::LOCALHOST.octets())
            .bytes(&remote.octets())
            .u16_be(40000)
            .u16_be(53)
            .u32_be(0)
            .u32(0)
            .string("/usr/bin/dig");
        let (event, verdict) = decode::<Connect>(builder, &Default::default());
        assert_eq!(verdict.unwrap(), Verdict::Emit);
        assert_eq!(event.0.remote_addr, "2606:4700::1111");
        assert_eq!(event.0.remote_port, 53);
        assert_eq!(event.0.exe, "/usr/bin/dig");
    }

    fn dns(domain: &str) -> RecordBuilder {
        RecordBuilder::new()
            .tagged()
            .i32(0)
            .i32(0)
            .i32(1)
            .i32(1)
            .string(domain)
            .string("/usr/bin/ping")
    }

    #[test]
    fn dns_answer() {
        let (event, verdict) = decode::<DnsAnswer>(dns("example.com"), &Default::default());
        assert_eq!(verdict.unwrap(), Verdict::Emit);
        assert_eq!(event.0.domain, "example.com");
        assert_eq!(event.0.qtype, 1);
        assert_eq!(event.0.exe, "/usr/bin/ping");
    }

    #[test]
    fn repeated_domain_is_filtered() {
        let state = DecodeState {
            windows: WindowFilters::new(
                WindowConfig::EXE,
                WindowConfig::ARGV,
                WindowConfig {
                    max_hits: 2,
                    ..WindowConfig::DNS
                },
            ),
            ..Default::default()
        };
        let verdicts: Vec<Verdict> = (0..3)
            .map(|_| decode::<DnsAnswer>(dns("example.com"), &state).1.unwrap())
            .collect();
        assert_eq!(
            verdicts,
            [
                Verdict::Emit,
                Verdict::Emit,
                Verdict::Suppress(SuppressReason::Filter)
            ]
        );
        let (_, verdict) = decode::<DnsAnswer>(dns("example.org"), &state);
        assert_eq!(verdict.unwrap(), Verdict::Emit);
    }

    #[test]
    fn truncated_anywhere() {
        let state = DecodeState::default;
        assert_truncated_at_every_length::<Bind>(&bind_v4(80, [127, 0, 0, 1]).build(), state);
        assert_truncated_at_every_length::<Connect>(&connect_v4().build(), state);
        assert_truncated_at_every_length::<DnsAnswer>(&dns("example.com").build(), state);
    }

    #[test]
    fn truncated_answer_leaves_window_untouched() {
        let state = DecodeState {
            windows: WindowFilters::new(
                WindowConfig::EXE,
                WindowConfig::ARGV,
                WindowConfig {
                    max_hits: 1,
                    ..WindowConfig::DNS
                },
            ),
            ..Default::default()
        };
        let full = dns("example.com").build();
        for _ in 0..3 {
            let (_, verdict) = decode_exactly::<DnsAnswer>(full.slice(..full.len() - 4), &state);
            assert!(verdict.unwrap_err().is_truncation());
        }
        let (event, verdict) = decode_exactly::<DnsAnswer>(full, &state);
        assert_eq!(verdict.unwrap(), Verdict::Emit);
        assert_eq!(event.0.domain, "example.com");
    }
}
