//! # Reliability Layer
//!
//! Reliable, ordered message delivery over unreliable datagrams.
//!
//! ## Design
//!
//! - Every payload packet carries a `u16` sequence number
//! - Every packet carries a cumulative `ack` (all sequences up to and
//!   including it were received) and `ack_bits` for the 32 sequences after
//!   the first gap
//! - Unacknowledged packets are resent after a fixed timeout, forever; the
//!   connection timeout decides when a peer is gone
//! - Messages larger than one packet are split into fragments; ordered
//!   delivery makes reassembly a simple append
//! - At most `max_in_flight` packets are unacknowledged; the rest queue
//!
//! Time is supplied by the caller, so the channel is deterministic.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use tracing::warn;

use crate::config::UdpConfig;
use crate::transport::{TransportError, TransportResult};

/// Largest datagram sent.
pub const MAX_PACKET_SIZE: usize = 1200;

/// Bytes of every payload packet not available to message data.
pub const PACKET_OVERHEAD: usize = PacketHeader::SIZE + 2;

/// Largest fragment of message data in one packet.
pub const MAX_FRAGMENT_SIZE: usize = MAX_PACKET_SIZE - PACKET_OVERHEAD;

/// Largest message accepted by [`ReliableChannel::send`].
pub const MAX_MESSAGE_SIZE: usize = 1 << 18;

/// Sequences further than this ahead of the next expected one are ignored.
const RECEIVE_WINDOW: i16 = 8192;

const FRAGMENT_MORE: u8 = 1;
const FRAGMENT_LAST: u8 = 0;

/// Packet header - present in every packet.
///
/// Total size: 8 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PacketHeader {
    /// Sequence number of this packet; unused outside payload packets.
    pub sequence: u16,
    /// Every sequence up to this one has been received.
    pub ack: u16,
    /// Bit `i` set: sequence `ack + 2 + i` has been received.
    pub ack_bits: u32,
}

impl PacketHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 8;

    /// Creates a new packet header.
    #[inline]
    #[must_use]
    pub const fn new(sequence: u16, ack: u16, ack_bits: u32) -> Self {
        Self {
            sequence,
            ack,
            ack_bits,
        }
    }
}

/// Signed distance from `b` to `a` in sequence space.
#[inline]
#[allow(clippy::cast_possible_wrap)]
const fn sequence_offset(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

struct InFlight {
    sequence: u16,
    body: Vec<u8>,
    last_sent: Option<Duration>,
}

/// Per-peer reliable ordered channel.
pub struct ReliableChannel {
    resend_timeout: Duration,
    max_in_flight: usize,
    next_sequence: u16,
    in_flight: VecDeque<InFlight>,
    queued: VecDeque<Vec<u8>>,
    next_expected: u16,
    out_of_order: HashMap<u16, Vec<u8>>,
    partial: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    ack_pending: bool,
    resends: u64,
}

impl ReliableChannel {
    /// Creates a channel with the configured timeouts and window.
    #[must_use]
    pub fn new(config: &UdpConfig) -> Self {
        let window = usize::from(RECEIVE_WINDOW.unsigned_abs());
        Self {
            resend_timeout: config.resend_timeout(),
            max_in_flight: config.max_in_flight.clamp(1, window),
            next_sequence: 0,
            in_flight: VecDeque::new(),
            queued: VecDeque::new(),
            next_expected: 0,
            out_of_order: HashMap::new(),
            partial: Vec::new(),
            ready: VecDeque::new(),
            ack_pending: false,
            resends: 0,
        }
    }

    /// Queues a message, splitting it into fragments.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MessageTooLarge`] above [`MAX_MESSAGE_SIZE`].
    pub fn send(&mut self, message: &[u8]) -> TransportResult<()> {
        if message.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: message.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if message.is_empty() {
            self.queued.push_back(vec![FRAGMENT_LAST]);
            return Ok(());
        }
        let count = message.len().div_ceil(MAX_FRAGMENT_SIZE);
        for (i, chunk) in message.chunks(MAX_FRAGMENT_SIZE).enumerate() {
            let mut body = Vec::with_capacity(chunk.len() + 1);
            body.push(if i + 1 == count { FRAGMENT_LAST } else { FRAGMENT_MORE });
            body.extend_from_slice(chunk);
            self.queued.push_back(body);
        }
        Ok(())
    }

    /// Payload packets due at `now`: fresh ones admitted to the window and
    /// timed-out ones. Returns `(sequence, body)` pairs.
    pub fn poll_transmit(&mut self, now: Duration) -> Vec<(u16, Vec<u8>)> {
        while self.in_flight.len() < self.max_in_flight {
            let Some(body) = self.queued.pop_front() else {
                break;
            };
            self.in_flight.push_back(InFlight {
                sequence: self.next_sequence,
                body,
                last_sent: None,
            });
            self.next_sequence = self.next_sequence.wrapping_add(1);
        }

        let mut due = Vec::new();
        for packet in &mut self.in_flight {
            let expired = match packet.last_sent {
                None => true,
                Some(sent) => now.saturating_sub(sent) >= self.resend_timeout,
            };
            if expired {
                if packet.last_sent.is_some() {
                    self.resends += 1;
                }
                packet.last_sent = Some(now);
                due.push((packet.sequence, packet.body.clone()));
            }
        }
        due
    }

    /// Header for an outgoing packet, carrying the current acknowledgement.
    pub fn header(&mut self, sequence: u16) -> PacketHeader {
        self.ack_pending = false;
        let ack = self.next_expected.wrapping_sub(1);
        let mut ack_bits = 0u32;
        for i in 0..32u16 {
            if self.out_of_order.contains_key(&ack.wrapping_add(2 + i)) {
                ack_bits |= 1 << i;
            }
        }
        PacketHeader::new(sequence, ack, ack_bits)
    }

    /// Applies the acknowledgement carried by a received header.
    pub fn process_ack(&mut self, header: &PacketHeader) {
        let ack = header.ack;
        self.in_flight.retain(|packet| {
            if sequence_offset(ack, packet.sequence) >= 0 {
                return false;
            }
            let bit = packet.sequence.wrapping_sub(ack).wrapping_sub(2);
            !(bit < 32 && header.ack_bits & (1 << bit) != 0)
        });
    }

    /// Accepts a received payload packet.
    pub fn receive_payload(&mut self, sequence: u16, body: &[u8]) {
        self.ack_pending = true;
        let offset = sequence_offset(sequence, self.next_expected);
        if !(0..RECEIVE_WINDOW).contains(&offset) {
            return;
        }
        self.out_of_order
            .entry(sequence)
            .or_insert_with(|| body.to_vec());
        while let Some(body) = self.out_of_order.remove(&self.next_expected) {
            self.next_expected = self.next_expected.wrapping_add(1);
            self.deliver_fragment(&body);
        }
    }

    fn deliver_fragment(&mut self, body: &[u8]) {
        let Some((&flag, data)) = body.split_first() else {
            warn!("empty fragment dropped");
            return;
        };
        if self.partial.len() + data.len() > MAX_MESSAGE_SIZE {
            warn!(size = self.partial.len() + data.len(), "oversized message dropped");
            self.partial.clear();
            return;
        }
        self.partial.extend_from_slice(data);
        if flag == FRAGMENT_LAST {
            self.ready.push_back(std::mem::take(&mut self.partial));
        }
    }

    /// Next fully received message.
    pub fn pop_message(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// True if received packets have not been acknowledged yet.
    #[must_use]
    pub const fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// Packets sent but not acknowledged.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Fragments waiting for window space.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Packets sent again so far.
    #[must_use]
    pub const fn resends(&self) -> u64 {
        self.resends
    }
}
