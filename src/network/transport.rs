//! Reliable Transport
//!
//! At-least-once delivery with per-sender deduplication on top of an
//! unreliable datagram socket. Every non-ACK envelope gets a fresh `seq`,
//! is kept pending until its ACK arrives, and is resent on a fixed timeout
//! until it runs out of tries.
//!
//! No ordering between distinct seqs is promised; handlers must tolerate
//! reordering.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::SocketAddr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::core::time::Millis;
use crate::network::codec::{Codec, CodecError, JsonCodec};
use crate::network::protocol::{Envelope, Packet, PacketError};
use crate::network::socket::DatagramSocket;

/// Transport errors. Only returned for packets this peer tries to send.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// An outgoing packet waiting for its ACK.
#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub seq: u32,
    pub addr: SocketAddr,
    pub bytes: Vec<u8>,
    pub sent_at: Millis,
    /// Resends so far
    pub tries: u32,
}

/// A validated, first-time packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub addr: SocketAddr,
    pub seq: u32,
    pub packet: Packet,
}

/// Outcome of reading one datagram.
#[derive(Debug)]
pub enum Polled {
    /// New packet for the application.
    Packet(Received),
    /// Datagram consumed internally (ACK, duplicate, malformed, invalid).
    Handled,
    /// Nothing queued.
    Empty,
}

/// Seqs remembered per peer for deduplication and ACK bookkeeping.
pub const HISTORY_WINDOW: usize = 1024;

/// Record `seq` in a bounded history. Returns whether it is new.
///
/// Once the window is full, anything older than the oldest kept seq counts
/// as already seen.
fn remember(history: &mut BTreeSet<u32>, seq: u32) -> bool {
    if history.len() >= HISTORY_WINDOW && history.first().is_some_and(|oldest| seq < *oldest) {
        return false;
    }
    let fresh = history.insert(seq);
    while history.len() > HISTORY_WINDOW {
        history.pop_first();
    }
    fresh
}

/// Sequenced, acknowledged, retried packet transport.
pub struct ReliableTransport<S, C = JsonCodec> {
    socket: S,
    codec: C,
    config: TransportConfig,
    next_seq: u32,
    pending: BTreeMap<u32, PendingPacket>,
    seen: BTreeMap<SocketAddr, BTreeSet<u32>>,
    completed: BTreeMap<SocketAddr, BTreeSet<u32>>,
    dropped: BTreeSet<u32>,
    recv_buf: Vec<u8>,
}

impl<S: DatagramSocket> ReliableTransport<S, JsonCodec> {
    /// Transport with the JSON codec.
    pub fn new(socket: S, config: TransportConfig) -> Self {
        let codec = JsonCodec::new(config.max_datagram);
        Self::with_codec(socket, codec, config)
    }
}

impl<S: DatagramSocket, C: Codec> ReliableTransport<S, C> {
    pub fn with_codec(socket: S, codec: C, config: TransportConfig) -> Self {
        let recv_buf = vec![0u8; config.max_datagram];
        Self {
            socket,
            codec,
            config,
            next_seq: 1,
            pending: BTreeMap::new(),
            seen: BTreeMap::new(),
            completed: BTreeMap::new(),
            dropped: BTreeSet::new(),
            recv_buf,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    // =========================================================================
    // SENDING
    // =========================================================================

    /// Send a typed packet reliably. Returns its seq.
    pub fn send(
        &mut self,
        addr: SocketAddr,
        packet: &Packet,
        now: Millis,
    ) -> Result<u32, TransportError> {
        let seq = self.next_seq;
        let envelope = Envelope::from_packet(packet, seq)?;
        self.send_envelope(addr, envelope, now)
    }

    /// Send an arbitrary scope/type/data triple reliably.
    ///
    /// The payload is not validated locally; the receiver will.
    pub fn send_raw(
        &mut self,
        addr: SocketAddr,
        scope: &str,
        kind: &str,
        data: Value,
        now: Millis,
    ) -> Result<u32, TransportError> {
        let envelope = Envelope {
            scope: Some(Value::String(scope.to_string())),
            kind: kind.to_string(),
            seq: self.next_seq,
            data: Some(data),
        };
        self.send_envelope(addr, envelope, now)
    }

    fn send_envelope(
        &mut self,
        addr: SocketAddr,
        envelope: Envelope,
        now: Millis,
    ) -> Result<u32, TransportError> {
        let seq = envelope.seq;
        let bytes = self.codec.encode(&envelope)?;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);

        // A failed first transmission is retried like a lost one
        if let Err(e) = self.socket.send_to(&bytes, addr) {
            warn!(%addr, seq, "send failed: {}", e);
        }
        #[cfg(feature = "debug-tracing")]
        tracing::trace!(%addr, seq, kind = %envelope.kind, bytes = bytes.len(), "sent");

        self.pending.insert(seq, PendingPacket { seq, addr, bytes, sent_at: now, tries: 0 });
        Ok(seq)
    }

    /// Send `packet` to every address. Failures are logged and skipped.
    pub fn broadcast(&mut self, addrs: &[SocketAddr], packet: &Packet, now: Millis) -> Vec<u32> {
        let mut seqs = Vec::with_capacity(addrs.len());
        for addr in addrs {
            match self.send(*addr, packet, now) {
                Ok(seq) => seqs.push(seq),
                Err(e) => warn!(%addr, "broadcast failed: {}", e),
            }
        }
        seqs
    }

    fn send_ack(&mut self, addr: SocketAddr, seq: u32) {
        let bytes = match self.codec.encode(&Envelope::ack(seq)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%addr, seq, "failed to encode ack: {}", e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, addr) {
            warn!(%addr, seq, "ack send failed: {}", e);
        }
    }

    // =========================================================================
    // RECEIVING
    // =========================================================================

    /// Read and process at most one datagram.
    pub fn poll_once(&mut self, _now: Millis) -> Polled {
        let (len, addr) = match self.socket.recv_from(&mut self.recv_buf) {
            Ok(Some(received)) => received,
            Ok(None) => return Polled::Empty,
            Err(e) => {
                // Transient (e.g. ICMP port unreachable on some platforms)
                debug!("recv error: {}", e);
                return Polled::Handled;
            }
        };

        let envelope = match self.codec.decode(&self.recv_buf[..len]) {
            Ok(envelope) => envelope,
            Err(e) => {
                let head = hex::encode(&self.recv_buf[..len.min(64)]);
                warn!(%addr, bytes = %head, "malformed datagram: {}", e);
                return Polled::Handled;
            }
        };

        if envelope.is_ack() {
            let ours = self.pending.get(&envelope.seq).map(|entry| entry.addr);
            match ours {
                Some(to) if to != addr => {
                    warn!(%addr, %to, seq = envelope.seq, "ACK from the wrong peer ignored");
                }
                Some(_) => {
                    self.pending.remove(&envelope.seq);
                    debug!(%addr, seq = envelope.seq, "acked");
                    remember(self.completed.entry(addr).or_default(), envelope.seq);
                }
                // Late ACK for a resent packet, or a stray
                None => debug!(%addr, seq = envelope.seq, "unmatched ACK"),
            }
            return Polled::Handled;
        }

        let first_time = remember(self.seen.entry(addr).or_default(), envelope.seq);
        self.send_ack(addr, envelope.seq);
        if !first_time {
            debug!(%addr, seq = envelope.seq, kind = %envelope.kind, "duplicate re-acked");
            return Polled::Handled;
        }

        match Packet::decode(&envelope) {
            Ok(packet) => {
                #[cfg(feature = "debug-tracing")]
                tracing::trace!(%addr, seq = envelope.seq, kind = %envelope.kind, "received");
                Polled::Packet(Received { addr, seq: envelope.seq, packet })
            }
            Err(e) => {
                warn!(%addr, seq = envelope.seq, kind = %envelope.kind, "rejected packet: {}", e);
                Polled::Handled
            }
        }
    }

    /// Next new packet, or `None` once the socket is drained.
    pub fn poll(&mut self, now: Millis) -> Option<Received> {
        loop {
            match self.poll_once(now) {
                Polled::Packet(received) => return Some(received),
                Polled::Handled => continue,
                Polled::Empty => return None,
            }
        }
    }

    // =========================================================================
    // RETRIES
    // =========================================================================

    /// Resend overdue packets and drop those out of tries.
    pub fn tick(&mut self, now: Millis) {
        let timeout = self.config.resend_timeout_ms;
        let max_tries = self.config.max_tries;
        let mut give_up = Vec::new();

        for entry in self.pending.values_mut() {
            if now.saturating_sub(entry.sent_at) < timeout {
                continue;
            }
            if entry.tries >= max_tries {
                give_up.push(entry.seq);
                continue;
            }
            entry.tries += 1;
            entry.sent_at = now;
            debug!(addr = %entry.addr, seq = entry.seq, tries = entry.tries, "resend");
            if let Err(e) = self.socket.send_to(&entry.bytes, entry.addr) {
                warn!(addr = %entry.addr, seq = entry.seq, "resend failed: {}", e);
            }
        }

        for seq in give_up {
            if let Some(entry) = self.pending.remove(&seq) {
                warn!(addr = %entry.addr, seq, tries = entry.tries, "dropped");
                remember(&mut self.dropped, seq);
            }
        }
    }

    /// Whether `addr` acknowledged `seq`.
    pub fn completed(&self, addr: SocketAddr, seq: u32) -> bool {
        self.completed.get(&addr).is_some_and(|seqs| seqs.contains(&seq))
    }

    /// Whether `seq` ran out of tries.
    pub fn is_dropped(&self, seq: u32) -> bool {
        self.dropped.contains(&seq)
    }

    pub fn is_pending(&self, seq: u32) -> bool {
        self.pending.contains_key(&seq)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget everything learned about `addr`.
    pub fn forget_peer(&mut self, addr: SocketAddr) {
        self.seen.remove(&addr);
        self.completed.remove(&addr);
        self.pending.retain(|_, entry| entry.addr != addr);
    }
}

// =============================================================================
// TESTS
// =============================================================================
