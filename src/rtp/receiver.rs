/// Audio data receiver
///
/// Owns the data socket. Every datagram is classified by RTP payload type;
/// audio and resend replies are decrypted, decoded and stored in the jitter
/// buffer, everything else is counted and dropped.

use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::jitter::{InsertOutcome, JitterBuffer};
use super::seq::Seq;
use super::RTP_HEADER_LEN;
use crate::audio::codec::{FrameDecoder, PacketCipher};

/// Timing sync from the sender; playback here is slave-clocked, so ignored
pub const PAYLOAD_SYNC: u8 = 0x54;
/// Reply to one of our resend requests, wrapped in a 4-byte prefix
pub const PAYLOAD_RESEND_REPLY: u8 = 0x56;
/// Regular audio data
pub const PAYLOAD_AUDIO: u8 = 0x60;

/// Extra header in front of a resent packet
const RESEND_PREFIX_LEN: usize = 4;

/// Payloads shorter than this cannot be a real frame
const MIN_AUDIO_PAYLOAD: usize = 16;

/// What a datagram turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datagram<'a> {
    Audio {
        seq: Seq,
        payload: &'a [u8],
        resent: bool,
    },
    Sync,
    /// Resend reply carrying sequence 0 and no audio
    ResendAnomaly,
    /// Audio or resend type, but too short to hold a frame
    Runt { payload_type: u8, seq: Seq },
    Unknown { payload_type: u8, len: usize },
}

/// Classify one datagram from the data socket
pub fn classify(data: &[u8]) -> Datagram<'_> {
    if data.len() < 2 {
        return Datagram::Unknown {
            payload_type: 0,
            len: data.len(),
        };
    }

    let payload_type = data[1] & 0x7F;
    match payload_type {
        PAYLOAD_SYNC => Datagram::Sync,
        PAYLOAD_AUDIO | PAYLOAD_RESEND_REPLY => {
            let resent = payload_type == PAYLOAD_RESEND_REPLY;
            let packet = if resent {
                data.get(RESEND_PREFIX_LEN..).unwrap_or(&[])
            } else {
                data
            };

            if packet.len() < RTP_HEADER_LEN {
                return Datagram::Runt {
                    payload_type,
                    seq: 0,
                };
            }

            let seq = u16::from_be_bytes([packet[2], packet[3]]);
            let payload = &packet[RTP_HEADER_LEN..];
            if payload.len() >= MIN_AUDIO_PAYLOAD {
                Datagram::Audio {
                    seq,
                    payload,
                    resent,
                }
            } else if resent && seq == 0 {
                Datagram::ResendAnomaly
            } else {
                Datagram::Runt { payload_type, seq }
            }
        }
        _ => Datagram::Unknown {
            payload_type,
            len: data.len(),
        },
    }
}

/// Counters kept by the receive loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub datagrams: u64,
    pub audio: u64,
    pub resent: u64,
    pub sync: u64,
    pub ignored: u64,
    pub decode_errors: u64,
}

pub struct AudioReceiver {
    socket: UdpSocket,
    buffer: Arc<JitterBuffer>,
    cipher: Box<dyn PacketCipher>,
    decoder: Box<dyn FrameDecoder>,
    scratch: Vec<u8>,
    samples: Vec<i16>,
    stats: ReceiverStats,
}

impl AudioReceiver {
    pub fn new(
        socket: UdpSocket,
        buffer: Arc<JitterBuffer>,
        cipher: Box<dyn PacketCipher>,
        decoder: Box<dyn FrameDecoder>,
    ) -> Self {
        let samples = buffer.config().params.samples_per_frame();
        Self {
            socket,
            buffer,
            cipher,
            decoder,
            scratch: Vec::with_capacity(2048),
            samples: Vec::with_capacity(samples),
            stats: ReceiverStats::default(),
        }
    }

    pub fn local_port(&self) -> std::io::Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Process one datagram; returns what the jitter buffer did with it
    pub fn handle_datagram(&mut self, data: &[u8]) -> Option<InsertOutcome> {
        self.stats.datagrams += 1;

        match classify(data) {
            Datagram::Audio {
                seq,
                payload,
                resent,
            } => {
                self.stats.audio += 1;
                if resent {
                    self.stats.resent += 1;
                }

                self.scratch.clear();
                self.scratch.extend_from_slice(payload);
                self.cipher.decrypt(&mut self.scratch);

                self.samples.clear();
                if let Err(e) = self.decoder.decode_into(&self.scratch, &mut self.samples) {
                    // Store silence so the sequence still counts as received
                    debug!("Decode failed for {:04X}: {}", seq, e);
                    self.stats.decode_errors += 1;
                    self.samples.clear();
                }

                let outcome = self.buffer.insert(seq, &self.samples);
                trace!("Packet {:04X} ({} bytes): {:?}", seq, payload.len(), outcome);
                Some(outcome)
            }
            Datagram::Sync => {
                self.stats.sync += 1;
                None
            }
            Datagram::ResendAnomaly => {
                trace!("Empty resend reply, ignoring");
                self.stats.ignored += 1;
                None
            }
            Datagram::Runt { payload_type, seq } => {
                trace!(
                    "Short packet of type 0x{:02X} ({} bytes) seq {:04X}",
                    payload_type,
                    data.len(),
                    seq
                );
                self.stats.ignored += 1;
                None
            }
            Datagram::Unknown { payload_type, len } => {
                warn!("Unknown RTP packet of type 0x{:02X} length {}", payload_type, len);
                self.stats.ignored += 1;
                None
            }
        }
    }

    /// Receive until cancelled
    pub async fn run(mut self, cancel: CancellationToken) -> ReceiverStats {
        let mut buf = [0u8; 2048];
        let mut first_packet_logged = false;

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            if !first_packet_logged {
                                info!("First audio packet received: {} bytes from {}", len, addr);
                                first_packet_logged = true;
                            }
                            self.handle_datagram(&buf[..len]);
                        }
                        Err(e) => {
                            warn!("Audio receive error: {}", e);
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("Audio receive cancelled");
                    break;
                }
            }
        }

        info!(
            "Audio receive done: {} datagrams, {} audio ({} resent), {} ignored",
            self.stats.datagrams, self.stats.audio, self.stats.resent, self.stats.ignored
        );
        self.stats
    }
}
