pub mod jitter;
pub mod receiver;
pub mod resend;
pub mod seq;

pub use jitter::{JitterBuffer, JitterBufferConfig};
pub use receiver::AudioReceiver;
pub use resend::{ResendSink, UdpResendRequester};

use std::time::Duration;

use crate::audio::codec::StreamParams;

/// Fixed RTP header preceding every audio payload
pub const RTP_HEADER_LEN: usize = 12;

/// Playing time represented by `frames` buffered packets
#[inline]
pub fn frames_to_duration(frames: usize, params: &StreamParams) -> Duration {
    let samples = frames as u64 * params.frame_size as u64;
    Duration::from_micros(samples * 1_000_000 / params.sample_rate.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_to_duration() {
        let params = StreamParams::default();
        // 220 packets of 352 samples at 44.1 kHz is about 1.76 s
        assert_eq!(frames_to_duration(220, &params).as_millis(), 1756);
        assert_eq!(frames_to_duration(0, &params), Duration::ZERO);
    }

    #[test]
    fn test_default_buffer_covers_four_seconds() {
        let params = StreamParams::default();
        assert!(frames_to_duration(512, &params) > Duration::from_secs(4));
    }
}
