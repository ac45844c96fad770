// SPDX-License-Identifier: GPL-3.0-or-later

//! C1 — transport implementation.
//!
//! Turns the abstract notion "slave at (node, process)" into a pair of
//! byte streams (reliable, fast) and multiplexes packets over them.
//! Grounded in `ve_mp_posix.c`: the pipe-based local/thread transport,
//! the UDP fast-channel negotiation, and the dedicated spawn-helper
//! process that does all forking on the master's behalf.

pub mod spawn;

use std::io::{IoSlice, Read, Write};
use std::net::UdpSocket;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::error::TransportError;

/// Wire-level channel selector. Reliable is always available;
/// fast is only available on remote connections after `prepare()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Channel {
    Reliable = 0,
    Fast = 1,
}

/// Payload above this many bytes is never sent on the fast channel,
/// even if one exists (§4.1, invariant 4).
pub const MAX_PAYLOAD: usize = 30_000;

/// Sentinel injected at argv[1] of a spawned slave; argv[2] carries the
/// decimal slave id.
pub const SLAVE_SENTINEL: &str = "-vemp_slave";

/// Fixed header transmitted exactly as stored; no text framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub seq: u32,
    pub channel: u32,
    pub msg_class: u32,
    pub tag: u32,
    pub payload_len: u32,
}

pub const HEADER_LEN: usize = 20;

impl PacketHeader {
    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.seq.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.channel.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.msg_class.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.tag.to_ne_bytes());
        buf[16..20].copy_from_slice(&self.payload_len.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Self {
        PacketHeader {
            seq: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            channel: u32::from_ne_bytes(buf[4..8].try_into().unwrap()),
            msg_class: u32::from_ne_bytes(buf[8..12].try_into().unwrap()),
            tag: u32::from_ne_bytes(buf[12..16].try_into().unwrap()),
            payload_len: u32::from_ne_bytes(buf[16..20].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

/// How a slave connection was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMethod {
    Thread,
    Local,
    Remote,
}

/// Result of `recv()`.
pub enum RecvOutcome {
    Packet(Packet),
    Timeout,
}

/// A single stream endpoint: either a Unix pipe/socket (thread/local) or
/// a duplex pair of a reliable stream plus an optional UDP fast channel
/// (remote).
struct StreamState {
    reliable: UnixStream,
    fast: Option<UdpSocket>,
    fast_peer: Option<std::net::SocketAddr>,
    fast_key: u32,
    /// Buffers one partially-read header/payload per channel so that a
    /// timeout mid-read never drops bytes already pulled off the wire.
    reliable_buf: Vec<u8>,
    fast_buf: Vec<u8>,
    /// Fairness: remembers which channel was served last.
    last_served: Channel,
    next_seq: u32,
}

/// A connection to one slave, owned by the transport layer. Sends are
/// serialized by `send_lock`; `method` records how the slave was spawned.
pub struct Connection {
    pub method: SpawnMethod,
    pub node: String,
    pub process: String,
    send_lock: Mutex<()>,
    state: Mutex<StreamState>,
}

impl Connection {
    fn new(method: SpawnMethod, node: &str, process: &str, reliable: UnixStream) -> Self {
        Connection {
            method,
            node: node.to_string(),
            process: process.to_string(),
            send_lock: Mutex::new(()),
            state: Mutex::new(StreamState {
                reliable,
                fast: None,
                fast_peer: None,
                fast_key: 0,
                reliable_buf: Vec::new(),
                fast_buf: Vec::new(),
                last_served: Channel::Fast,
                next_seq: 0,
            }),
        }
    }

    pub fn has_fast_channel(&self) -> bool {
        self.state.lock().unwrap().fast.is_some()
    }

    /// Negotiates a UDP fast channel for a remote connection. No-op for
    /// thread/local methods, which share the single pipe for both
    /// channels (§4.1 `prepare`).
    pub fn prepare(&self) -> Result<(), TransportError> {
        if self.method != SpawnMethod::Remote {
            return Ok(());
        }
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;

        // Ask the slave which source IP it sees us as (BESTADDR), then
        // hand it our UDP address plus a random key/check word
        // (CONNUDP), matching the SYSDEP sub-messages in §6.
        let best_addr = self.sysdep_query_bestaddr()?;
        let key: u32 = rand::thread_rng().gen();
        let check: u32 = key.wrapping_mul(2_654_435_761).wrapping_add(1);

        let payload = format!("{} {} {} {}\0", best_addr, local_addr.port(), key, check);
        self.sysdep_send_connudp(payload.as_bytes())?;

        {
            let mut st = self.state.lock().unwrap();
            st.fast = Some(socket);
            st.fast_key = key;
        }
        debug!(node = %self.node, process = %self.process, "fast channel negotiated");
        Ok(())
    }

    /// Asks the slave what source address it sees us as, over the
    /// reliable channel (§6 SYSDEP/BESTADDR). The slave's reception loop
    /// is already running by the time a master reaches `prepare()`, so
    /// this blocks on our own `recv()` rather than going through the
    /// handler table (no reception thread owns this connection yet).
    fn sysdep_query_bestaddr(&self) -> Result<String, TransportError> {
        self.send(Packet {
            header: PacketHeader {
                seq: 0,
                channel: Channel::Reliable as u32,
                msg_class: crate::coordinator::MsgClass::Sysdep as u32,
                tag: SYSDEP_TAG_BESTADDR,
                payload_len: 0,
            },
            payload: Vec::new(),
        })?;

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::NegotiationFailed("BESTADDR query timed out".into()));
            }
            match self.recv(Some(remaining))? {
                RecvOutcome::Packet(pkt)
                    if pkt.header.msg_class == crate::coordinator::MsgClass::Sysdep as u32
                        && pkt.header.tag == SYSDEP_TAG_BESTADDR
                        && !pkt.payload.is_empty() =>
                {
                    let addr = String::from_utf8_lossy(&pkt.payload)
                        .trim_end_matches('\0')
                        .to_string();
                    return Ok(addr);
                }
                RecvOutcome::Packet(_) => continue,
                RecvOutcome::Timeout => {
                    return Err(TransportError::NegotiationFailed("BESTADDR query timed out".into()));
                }
            }
        }
    }

    fn sysdep_send_connudp(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.send(Packet {
            header: PacketHeader {
                seq: 0,
                channel: Channel::Reliable as u32,
                msg_class: crate::coordinator::MsgClass::Sysdep as u32,
                tag: SYSDEP_TAG_CONNUDP,
                payload_len: payload.len() as u32,
            },
            payload: payload.to_vec(),
        })
    }

    /// Accepts a peer-reported fast channel address, completing the
    /// negotiation on the slave side. The master only ever `bind()`s its
    /// UDP socket — it has no way to learn our ephemeral port ahead of
    /// time — so we send one ack datagram it can latch onto via its own
    /// `recv_from` (`try_recv_fast` already sets `fast_peer` from the
    /// source address of the first inbound packet).
    pub fn accept_fast_channel(
        &self,
        peer: std::net::SocketAddr,
        key: u32,
    ) -> Result<(), TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;
        socket
            .connect(peer)
            .map_err(|e| TransportError::NegotiationFailed(e.to_string()))?;

        let ack = PacketHeader {
            seq: 0,
            channel: Channel::Fast as u32,
            msg_class: crate::coordinator::MsgClass::Sysdep as u32,
            tag: SYSDEP_TAG_UDP_ACK,
            payload_len: 0,
        };
        socket.send(&ack.to_bytes()).map_err(TransportError::Io)?;

        let mut st = self.state.lock().unwrap();
        st.fast_peer = Some(peer);
        st.fast_key = key;
        st.fast = Some(socket);
        Ok(())
    }

    /// Drops the fast channel, forcing subsequent FAST sends to
    /// downgrade to RELIABLE. Used in tests for scenario 2 (§8) and by
    /// an application that wants to force reliable-only delivery.
    pub fn disable_fast_channel(&self) {
        let mut st = self.state.lock().unwrap();
        st.fast = None;
    }

    /// Serializes header+payload in one write. Downgrades FAST to
    /// RELIABLE if no fast channel exists or the payload is oversized.
    pub fn send(&self, mut packet: Packet) -> Result<(), TransportError> {
        let _guard = self.send_lock.lock().unwrap();
        let oversized = packet.payload.len() > MAX_PAYLOAD;
        let requested_fast = packet.header.channel == Channel::Fast as u32;

        let mut st = self.state.lock().unwrap();
        packet.header.seq = st.next_seq;
        st.next_seq = st.next_seq.wrapping_add(1);

        let use_fast = requested_fast && !oversized && st.fast.is_some() && st.fast_peer.is_some();
        if requested_fast && !use_fast {
            packet.header.channel = Channel::Reliable as u32;
            trace!(oversized, "downgrading FAST send to RELIABLE");
        }

        let header_bytes = packet.header.to_bytes();
        if use_fast {
            let socket = st.fast.as_ref().unwrap();
            let mut buf = Vec::with_capacity(HEADER_LEN + packet.payload.len());
            buf.extend_from_slice(&header_bytes);
            buf.extend_from_slice(&packet.payload);
            if let Some(peer) = st.fast_peer {
                socket.send_to(&buf, peer).map_err(TransportError::Io)?;
            } else {
                socket.send(&buf).map_err(TransportError::Io)?;
            }
        } else {
            let slices = [IoSlice::new(&header_bytes), IoSlice::new(&packet.payload)];
            write_vectored_all(&mut st.reliable, &slices).map_err(|e| {
                warn!(error = %e, "write failed on reliable channel");
                TransportError::Io(e)
            })?;
        }
        Ok(())
    }

    /// Buffered read across both channels; remembers which channel was
    /// served last and checks the other first next time (fairness).
    /// Once a header has arrived, the payload read ignores the caller's
    /// timeout to preserve framing.
    pub fn recv(&self, timeout: Option<Duration>) -> Result<RecvOutcome, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let first = {
                let st = self.state.lock().unwrap();
                match st.last_served {
                    Channel::Fast => Channel::Reliable,
                    Channel::Reliable => Channel::Fast,
                }
            };
            let order = [first, other_channel(first)];
            for &ch in &order {
                if let Some(pkt) = self.try_recv_channel(ch)? {
                    let mut st = self.state.lock().unwrap();
                    st.last_served = ch;
                    return Ok(RecvOutcome::Packet(pkt));
                }
            }

            // A header has landed but its payload hasn't fully arrived;
            // the caller's timeout must not cut this read short (§4.1
            // framing guarantee), so keep polling without a deadline
            // until the rest of the packet arrives or the fd errors out.
            let framing_in_progress = {
                let st = self.state.lock().unwrap();
                st.reliable_buf.len() >= HEADER_LEN || st.fast_buf.len() >= HEADER_LEN
            };
            if framing_in_progress {
                self.poll_readable(None)?;
                continue;
            }

            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    return Ok(RecvOutcome::Timeout);
                }
            }
            if self.poll_readable(deadline)? {
                continue;
            }
            return Ok(RecvOutcome::Timeout);
        }
    }

    fn poll_readable(&self, deadline: Option<Instant>) -> Result<bool, TransportError> {
        let st = self.state.lock().unwrap();
        let fds: Vec<RawFd> = std::iter::once(st.reliable.as_raw_fd())
            .chain(st.fast.as_ref().map(|s| s.as_raw_fd()))
            .collect();
        drop(st);
        let timeout_ms: i32 = match deadline {
            None => -1,
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                remaining.as_millis().min(i32::MAX as u128) as i32
            }
        };
        poll_fds(&fds, timeout_ms)
    }

    fn try_recv_channel(&self, channel: Channel) -> Result<Option<Packet>, TransportError> {
        match channel {
            Channel::Reliable => self.try_recv_reliable(),
            Channel::Fast => self.try_recv_fast(),
        }
    }

    fn try_recv_reliable(&self) -> Result<Option<Packet>, TransportError> {
        let mut st = self.state.lock().unwrap();
        if !fd_readable(st.reliable.as_raw_fd())? {
            return Ok(None);
        }
        let mut chunk = [0u8; 4096];
        let n = st.reliable.read(&mut chunk).map_err(TransportError::Io)?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        st.reliable_buf.extend_from_slice(&chunk[..n]);
        Self::drain_framed(&mut st.reliable_buf)
    }

    fn try_recv_fast(&self) -> Result<Option<Packet>, TransportError> {
        let mut st = self.state.lock().unwrap();
        let socket = match &st.fast {
            Some(s) => s.try_clone().map_err(TransportError::Io)?,
            None => return Ok(None),
        };
        if !fd_readable(socket.as_raw_fd())? {
            return Ok(None);
        }
        let mut buf = [0u8; 65536];
        let (n, from) = socket.recv_from(&mut buf).map_err(TransportError::Io)?;
        if st.fast_peer.is_none() {
            st.fast_peer = Some(from);
        }
        st.fast_buf.extend_from_slice(&buf[..n]);
        Self::drain_framed(&mut st.fast_buf)
    }

    /// Pulls exactly one framed packet (header + declared payload) out
    /// of `buf` if a full one is present, leaving any remainder.
    fn drain_framed(buf: &mut Vec<u8>) -> Result<Option<Packet>, TransportError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut hdr_bytes = [0u8; HEADER_LEN];
        hdr_bytes.copy_from_slice(&buf[..HEADER_LEN]);
        let header = PacketHeader::from_bytes(&hdr_bytes);
        let total = HEADER_LEN + header.payload_len as usize;
        if header.payload_len as usize > MAX_PAYLOAD * 4 {
            return Err(TransportError::PayloadOverflow(header.payload_len as usize));
        }
        if buf.len() < total {
            return Ok(None);
        }
        let payload = buf[HEADER_LEN..total].to_vec();
        buf.drain(..total);
        Ok(Some(Packet { header, payload }))
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        let st = self.state.lock().unwrap();
        std::iter::once(st.reliable.as_raw_fd())
            .chain(st.fast.as_ref().map(|s| s.as_raw_fd()))
            .collect()
    }
}

fn other_channel(ch: Channel) -> Channel {
    match ch {
        Channel::Reliable => Channel::Fast,
        Channel::Fast => Channel::Reliable,
    }
}

fn fd_readable(fd: RawFd) -> Result<bool, TransportError> {
    poll_fds(&[fd], 0)
}

/// Multiwait for readability across a set of raw fds.
fn poll_fds(fds: &[RawFd], timeout_ms: i32) -> Result<bool, TransportError> {
    use nix::poll::{poll, PollFd, PollFlags};
    if fds.is_empty() {
        return Ok(false);
    }
    let borrowed: Vec<std::os::fd::BorrowedFd> = fds
        .iter()
        .map(|&fd| unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) })
        .collect();
    let mut poll_fds: Vec<PollFd> = borrowed
        .iter()
        .map(|fd| PollFd::new(fd, PollFlags::POLLIN))
        .collect();
    let n = poll(&mut poll_fds, timeout_ms).map_err(|e| TransportError::Io(e.into()))?;
    Ok(n > 0)
}

fn write_vectored_all(stream: &mut UnixStream, slices: &[IoSlice]) -> std::io::Result<()> {
    // UnixStream::write_vectored may perform a short write; loop until
    // both slices are fully flushed so header and payload always land
    // contiguously on the wire as one logical message.
    let mut owned: Vec<u8> = Vec::new();
    for s in slices {
        owned.extend_from_slice(s);
    }
    stream.write_all(&owned)
}

pub const SYSDEP_TAG_CONNUDP: u32 = 1;
pub const SYSDEP_TAG_BESTADDR: u32 = 2;
pub const SYSDEP_TAG_UDP_ACK: u32 = 3;

/// Best-effort guess at an address this process can be reached on:
/// connects a UDP socket to a well-known external address (no packets
/// actually leave the host for a UDP `connect()`; it only picks a
/// route) and reads back the local address that route would use.
pub fn best_effort_local_address() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Strips the slave sentinel (`-vemp_slave <id>`) from argv if present.
/// Returns `Some(slave_id)` and the stripped argv, or `None` with argv
/// untouched if this process is the master.
pub fn slave_init(argv: &[String]) -> Result<(Option<u32>, Vec<String>), TransportError> {
    if argv.len() >= 3 && argv[1] == SLAVE_SENTINEL {
        let id: u32 = argv[2]
            .parse()
            .map_err(|_| TransportError::MalformedSentinel(argv[2].clone()))?;
        let mut stripped = Vec::with_capacity(argv.len() - 2);
        stripped.push(argv[0].clone());
        stripped.extend_from_slice(&argv[3..]);
        Ok((Some(id), stripped))
    } else {
        Ok((None, argv.to_vec()))
    }
}

/// Builds the argv a spawned slave should receive: the sentinel and id
/// injected right after argv[0].
pub fn inject_slave_args(template: &[String], id: u32) -> Vec<String> {
    let mut out = Vec::with_capacity(template.len() + 2);
    out.push(template[0].clone());
    out.push(SLAVE_SENTINEL.to_string());
    out.push(id.to_string());
    out.extend_from_slice(&template[1..]);
    out
}

pub(crate) fn connection_from_stream(
    method: SpawnMethod,
    node: &str,
    process: &str,
    stream: UnixStream,
) -> Connection {
    Connection::new(method, node, process, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let h = PacketHeader {
            seq: 42,
            channel: Channel::Fast as u32,
            msg_class: 3,
            tag: 7,
            payload_len: 16,
        };
        let bytes = h.to_bytes();
        assert_eq!(PacketHeader::from_bytes(&bytes), h);
    }

    #[test]
    fn slave_init_detects_sentinel() {
        let argv: Vec<String> = vec!["prog", "-vemp_slave", "3", "--other"]
            .into_iter()
            .map(String::from)
            .collect();
        let (id, stripped) = slave_init(&argv).unwrap();
        assert_eq!(id, Some(3));
        assert_eq!(stripped, vec!["prog".to_string(), "--other".to_string()]);
    }

    #[test]
    fn slave_init_master_untouched() {
        let argv: Vec<String> = vec!["prog", "--other"].into_iter().map(String::from).collect();
        let (id, stripped) = slave_init(&argv).unwrap();
        assert_eq!(id, None);
        assert_eq!(stripped, argv);
    }

    #[test]
    fn slave_init_malformed_id_is_fatal() {
        let argv: Vec<String> = vec!["prog", "-vemp_slave", "notanumber"]
            .into_iter()
            .map(String::from)
            .collect();
        assert!(matches!(
            slave_init(&argv),
            Err(TransportError::MalformedSentinel(_))
        ));
    }

    #[test]
    fn inject_slave_args_places_sentinel_at_1_and_2() {
        let template: Vec<String> = vec!["prog".to_string(), "--flag".to_string()];
        let injected = inject_slave_args(&template, 5);
        assert_eq!(injected[1], SLAVE_SENTINEL);
        assert_eq!(injected[2], "5");
        assert_eq!(injected[3], "--flag");
    }

    #[test]
    fn send_over_socketpair_round_trips_header_and_payload() {
        let (a, b) = UnixStream::pair().unwrap();
        let conn_a = Connection::new(SpawnMethod::Thread, "auto", "auto", a);
        let conn_b = Connection::new(SpawnMethod::Thread, "auto", "auto", b);

        conn_a
            .send(Packet {
                header: PacketHeader {
                    seq: 0,
                    channel: Channel::Reliable as u32,
                    msg_class: 1,
                    tag: 7,
                    payload_len: 4,
                },
                payload: vec![1, 2, 3, 4],
            })
            .unwrap();

        match conn_b.recv(Some(Duration::from_secs(2))).unwrap() {
            RecvOutcome::Packet(p) => {
                assert_eq!(p.payload, vec![1, 2, 3, 4]);
                assert_eq!(p.header.tag, 7);
            }
            RecvOutcome::Timeout => panic!("expected a packet"),
        }
    }

    #[test]
    fn oversized_fast_send_downgrades_to_reliable() {
        let (a, b) = UnixStream::pair().unwrap();
        let conn_a = Connection::new(SpawnMethod::Thread, "auto", "auto", a);
        let conn_b = Connection::new(SpawnMethod::Thread, "auto", "auto", b);

        let payload = vec![0u8; MAX_PAYLOAD + 1];
        conn_a
            .send(Packet {
                header: PacketHeader {
                    seq: 0,
                    channel: Channel::Fast as u32,
                    msg_class: 1,
                    tag: 1,
                    payload_len: payload.len() as u32,
                },
                payload,
            })
            .unwrap();

        match conn_b.recv(Some(Duration::from_secs(2))).unwrap() {
            RecvOutcome::Packet(p) => assert_eq!(p.header.channel, Channel::Reliable as u32),
            RecvOutcome::Timeout => panic!("expected a packet"),
        }
    }
}
