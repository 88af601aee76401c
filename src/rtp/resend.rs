/// Resend requests for missing audio packets
///
/// The sender keeps a short history of packets and retransmits a range when
/// asked on its control port. The request is a fixed 8-byte message (not a
/// standard RTCP NACK). Requests are stateless: overlapping or duplicate
/// ranges are fine, the sender just retransmits again.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::seq::Seq;

/// Marker byte (RTP version 2, no padding/extension/CSRC)
pub const RESEND_MARKER: u8 = 0x80;
/// Payload type of a resend request, with the marker bit set
pub const RESEND_TYPE: u8 = 0x55 | 0x80;
/// Our request counter; the sender does not check it
const REQUEST_COUNTER: u16 = 1;
/// Wire size of one request
pub const RESEND_REQUEST_LEN: usize = 8;

/// Anything that can ask the sender for a range of packets again
pub trait ResendSink: Send + Sync {
    /// Request the inclusive range `[first, last]`
    fn request(&self, first: Seq, last: Seq);
}

/// One "please resend" message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResendRequest {
    pub first: Seq,
    pub count: u16,
}

impl ResendRequest {
    /// Build a request for the inclusive, wrap-aware range `[first, last]`
    pub fn new(first: Seq, last: Seq) -> Self {
        Self {
            first,
            count: last.wrapping_sub(first).wrapping_add(1),
        }
    }

    pub fn last(&self) -> Seq {
        self.first.wrapping_add(self.count).wrapping_sub(1)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESEND_REQUEST_LEN);
        buf.put_u8(RESEND_MARKER);
        buf.put_u8(RESEND_TYPE);
        buf.put_u16(REQUEST_COUNTER);
        buf.put_u16(self.first);
        buf.put_u16(self.count);
        buf.freeze()
    }

    /// Parse a request (used by test senders and for diagnostics)
    pub fn parse(mut data: &[u8]) -> Option<Self> {
        if data.len() < RESEND_REQUEST_LEN {
            return None;
        }
        if data.get_u8() != RESEND_MARKER || data.get_u8() != RESEND_TYPE {
            return None;
        }
        let _counter = data.get_u16();
        let first = data.get_u16();
        let count = data.get_u16();
        Some(Self { first, count })
    }
}

/// Sends resend requests over UDP to the sender's control port
pub struct UdpResendRequester {
    socket: UdpSocket,
    control_addr: SocketAddr,
    sent: AtomicU64,
}

impl UdpResendRequester {
    pub fn new(socket: UdpSocket, control_addr: SocketAddr) -> Self {
        Self {
            socket,
            control_addr,
            sent: AtomicU64::new(0),
        }
    }

    /// Number of requests handed to the socket so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl ResendSink for UdpResendRequester {
    fn request(&self, first: Seq, last: Seq) {
        let req = ResendRequest::new(first, last);
        debug!(
            "Requesting resend of {} packets ({:04X}:{:04X})",
            req.count, first, last
        );

        match self.socket.send_to(&req.encode(), self.control_addr) {
            Ok(_) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("Failed to send resend request to {}: {}", self.control_addr, e),
        }
    }
}
