/// Stream format and the decrypt/decode collaborators
///
/// Session setup hands us an ALAC-style `fmtp` line; from it we only need
/// the frame size and sample rate. Decryption and decoding are pluggable:
/// the receiver runs every audio payload through a `PacketCipher` and then a
/// `FrameDecoder` before it reaches the jitter buffer.

use crate::error::{PlayerError, PlayerResult};

/// Output channels (interleaved stereo)
pub const CHANNELS: usize = 2;

/// Format of one audio stream, fixed for the life of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Stereo samples per packet
    pub frame_size: usize,
    /// Output sample rate (Hz)
    pub sample_rate: u32,
    /// Bits per sample (only 16 is supported)
    pub sample_size: u8,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            frame_size: 352,
            sample_rate: 44100,
            sample_size: 16,
        }
    }
}

impl StreamParams {
    /// Parse the 12-field `fmtp` attribute, e.g. `96 352 0 16 40 10 14 2 255 0 0 44100`
    pub fn from_fmtp(fmtp: &str) -> PlayerResult<Self> {
        let fields: Vec<u32> = fmtp
            .split_whitespace()
            .map(|f| {
                f.parse::<u32>()
                    .map_err(|_| PlayerError::InvalidParams(format!("bad fmtp field '{}'", f)))
            })
            .collect::<PlayerResult<_>>()?;

        if fields.len() != 12 {
            return Err(PlayerError::InvalidParams(format!(
                "fmtp has {} fields, expected 12",
                fields.len()
            )));
        }

        let sample_size = fields[3];
        if sample_size != 16 {
            return Err(PlayerError::UnsupportedFormat(format!(
                "{}-bit samples (only 16-bit supported)",
                sample_size
            )));
        }

        let params = Self {
            frame_size: fields[1] as usize,
            sample_rate: fields[11],
            sample_size: 16,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> PlayerResult<()> {
        if self.frame_size < 2 {
            return Err(PlayerError::InvalidParams(format!(
                "frame size {} too small",
                self.frame_size
            )));
        }
        if self.sample_rate == 0 {
            return Err(PlayerError::InvalidParams("sample rate is zero".to_string()));
        }
        Ok(())
    }

    /// Interleaved i16 values in one decoded frame
    #[inline]
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * CHANNELS
    }

    /// Bytes in one decoded frame
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * 2
    }
}

/// Per-packet stream cipher
pub trait PacketCipher: Send {
    /// Decrypt `payload` in place
    fn decrypt(&mut self, payload: &mut [u8]);
}

/// Unencrypted streams
#[derive(Debug, Default, Clone, Copy)]
pub struct Plaintext;

impl PacketCipher for Plaintext {
    fn decrypt(&mut self, _payload: &mut [u8]) {}
}

/// Turns one decrypted packet into interleaved 16-bit stereo samples
pub trait FrameDecoder: Send {
    fn decode_into(&mut self, payload: &[u8], output: &mut Vec<i16>) -> PlayerResult<()>;
}

/// Uncompressed big-endian 16-bit PCM (RTP L16)
#[derive(Debug, Default, Clone, Copy)]
pub struct L16Decoder;

impl FrameDecoder for L16Decoder {
    #[inline]
    fn decode_into(&mut self, payload: &[u8], output: &mut Vec<i16>) -> PlayerResult<()> {
        output.reserve(payload.len() / 2);
        for pair in payload.chunks_exact(2) {
            output.push(i16::from_be_bytes([pair[0], pair[1]]));
        }
        Ok(())
    }
}
