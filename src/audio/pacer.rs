/// Playback pacing
///
/// Runs on the playback execution context: pulls one frame at a time from
/// the jitter buffer (silence while buffering or after an underrun), applies
/// volume, adapts the sample count to the drift-corrected rate and hands the
/// result to the sink. The sink's blocking `play` sets the cadence.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::codec::StreamParams;
use super::rate::RateAdapter;
use super::sink::AudioSink;
use super::volume::{Dither, VolumeControl, UNITY_GAIN};
use crate::error::PlayerResult;
use crate::rtp::jitter::JitterBuffer;

/// Default bound on how far the applied rate may stray from 1.0
pub const DEFAULT_MAX_RATE_DEVIATION: f64 = 0.02;

/// Bound a rate multiplier to `1.0 +- max_deviation`; garbage becomes 1.0
pub fn clamp_rate(rate: f64, max_deviation: f64) -> f64 {
    if !rate.is_finite() {
        return 1.0;
    }
    rate.clamp(1.0 - max_deviation, 1.0 + max_deviation)
}

/// What one `pull_and_render` call did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rendered {
    /// Stereo frames written to the sink
    pub frames: usize,
    /// Silence was played because no frame was available
    pub silent: bool,
    /// Rate actually applied (after clamping)
    pub rate: f64,
}

pub struct PlaybackPacer {
    buffer: Arc<JitterBuffer>,
    volume: Arc<VolumeControl>,
    adapter: Box<dyn RateAdapter>,
    sink: Box<dyn AudioSink>,
    max_rate_deviation: f64,
    dither: Dither<StdRng>,
    silence: Vec<i16>,
    scaled: Vec<i16>,
    output: Vec<i16>,
    volume_generation: u64,
    sink_volume: bool,
    frames_rendered: u64,
    frames_silent: u64,
}

impl PlaybackPacer {
    pub fn new(
        buffer: Arc<JitterBuffer>,
        volume: Arc<VolumeControl>,
        adapter: Box<dyn RateAdapter>,
        sink: Box<dyn AudioSink>,
        max_rate_deviation: f64,
    ) -> Self {
        let params: StreamParams = buffer.config().params;
        Self {
            buffer,
            volume,
            adapter,
            sink,
            max_rate_deviation,
            dither: Dither::new(StdRng::from_entropy()),
            silence: vec![0; params.samples_per_frame()],
            scaled: Vec::with_capacity(params.samples_per_frame()),
            output: Vec::with_capacity(params.samples_per_frame() + 16),
            volume_generation: 0,
            sink_volume: false,
            frames_rendered: 0,
            frames_silent: 0,
        }
    }

    /// Software gain for this frame; offers volume changes to the sink first
    fn current_gain(&mut self) -> i64 {
        let (gain, generation) = self.volume.snapshot();
        if generation != self.volume_generation {
            self.volume_generation = generation;
            self.sink_volume = self.sink.set_volume(self.volume.linear());
        }
        if self.sink_volume {
            UNITY_GAIN
        } else {
            gain
        }
    }

    /// Render one frame to the sink
    pub fn pull_and_render(&mut self) -> PlayerResult<Rendered> {
        // Buffer lock is taken and released inside take()
        let frame = self.buffer.take();
        let gain = self.current_gain();

        let (silent, rate) = match &frame {
            Some(f) => {
                let rate = clamp_rate(f.playback_rate, self.max_rate_deviation);
                self.dither.scale_into(&f.samples, gain, &mut self.scaled);
                (false, rate)
            }
            None => {
                self.scaled.clear();
                self.scaled.extend_from_slice(&self.silence);
                (true, 1.0)
            }
        };

        let frames = self.adapter.process(&self.scaled, rate, &mut self.output)?;
        self.sink.play(&self.output, frames)?;

        self.frames_rendered += 1;
        if silent {
            self.frames_silent += 1;
        }
        Ok(Rendered {
            frames,
            silent,
            rate,
        })
    }

    /// Playback loop; exits when `cancel` fires or the sink fails
    pub fn run(mut self, cancel: CancellationToken) -> PlayerResult<()> {
        info!("Playback started ({} rate adapter)", self.adapter.name());

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }
            if let Err(e) = self.pull_and_render() {
                break Err(e);
            }
        };

        self.sink.stop();
        debug!(
            "Playback stopped after {} frames ({} silent)",
            self.frames_rendered, self.frames_silent
        );
        result
    }

    /// `(frames rendered, of which silent)`
    pub fn counts(&self) -> (u64, u64) {
        (self.frames_rendered, self.frames_silent)
    }
}
