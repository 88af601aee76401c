/// Playback-rate adaptation
///
/// The drift estimator produces a rate multiplier near 1.0; a rate adapter
/// turns one input frame into slightly fewer (rate > 1) or slightly more
/// (rate < 1) output frames. Two strategies, picked per session:
///
/// - `Stuffer`: drops or inserts a single interpolated stereo sample per
///   frame, probabilistically, so the average matches the rate
/// - `Resampler`: continuous polynomial resampling via Rubato

use anyhow::anyhow;
use rand::{Rng, SeedableRng};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use std::str::FromStr;
use tracing::trace;

use super::codec::{StreamParams, CHANNELS};
use crate::error::{PlayerError, PlayerResult};

/// Largest relative ratio change the resampler is built for
const MAX_RELATIVE_RATIO: f64 = 1.1;

pub trait RateAdapter: Send {
    /// Adapt one interleaved stereo frame to `rate`, replacing `output`.
    /// Returns the number of stereo frames produced.
    fn process(&mut self, input: &[i16], rate: f64, output: &mut Vec<i16>) -> PlayerResult<usize>;

    fn name(&self) -> &'static str;
}

/// Which adapter a session uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateAdapterKind {
    #[default]
    Stuffing,
    Resample,
}

impl FromStr for RateAdapterKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stuffing" | "stuff" => Ok(RateAdapterKind::Stuffing),
            "resample" | "resampling" => Ok(RateAdapterKind::Resample),
            other => Err(anyhow!("unknown rate adapter '{}'", other)),
        }
    }
}

/// Build the adapter for a session
pub fn build_adapter(kind: RateAdapterKind, params: &StreamParams) -> PlayerResult<Box<dyn RateAdapter>> {
    match kind {
        RateAdapterKind::Stuffing => Ok(Box::new(Stuffer::new(rand::rngs::StdRng::from_entropy()))),
        RateAdapterKind::Resample => Ok(Box::new(Resampler::new(params.frame_size)?)),
    }
}

/// Single-sample stuffing
pub struct Stuffer<R: Rng + Send> {
    rng: R,
    inserted: u64,
    dropped: u64,
}

impl<R: Rng + Send> Stuffer<R> {
    pub fn new(rng: R) -> Self {
        Self {
            rng,
            inserted: 0,
            dropped: 0,
        }
    }

    /// `(inserted, dropped)` sample counts so far
    pub fn counts(&self) -> (u64, u64) {
        (self.inserted, self.dropped)
    }
}

/// Chance of stuffing one sample in a frame of `frames` samples at `rate`
pub fn stuff_probability(rate: f64, frames: usize) -> f64 {
    1.0 - (1.0 - (rate - 1.0).abs()).powi(frames as i32)
}

impl<R: Rng + Send> RateAdapter for Stuffer<R> {
    fn process(&mut self, input: &[i16], rate: f64, output: &mut Vec<i16>) -> PlayerResult<usize> {
        output.clear();
        let frames = input.len() / CHANNELS;
        if frames < 2 {
            output.extend_from_slice(&input[..frames * CHANNELS]);
            return Ok(frames);
        }

        let p_stuff = stuff_probability(rate, frames);
        if self.rng.gen::<f64>() >= p_stuff {
            output.extend_from_slice(&input[..frames * CHANNELS]);
            return Ok(frames);
        }

        let pos = self.rng.gen_range(0..frames - 1);
        output.reserve(input.len() + CHANNELS);
        output.extend_from_slice(&input[..pos * CHANNELS]);

        if rate > 1.0 {
            trace!("Dropping sample at {}", pos);
            self.dropped += 1;
            output.extend_from_slice(&input[(pos + 1) * CHANNELS..frames * CHANNELS]);
        } else {
            trace!("Inserting sample at {}", pos);
            self.inserted += 1;
            let prev = pos.saturating_sub(1);
            for ch in 0..CHANNELS {
                let a = input[prev * CHANNELS + ch] as i32;
                let b = input[pos * CHANNELS + ch] as i32;
                output.push(((a + b) >> 1) as i16);
            }
            output.extend_from_slice(&input[pos * CHANNELS..frames * CHANNELS]);
        }

        Ok(output.len() / CHANNELS)
    }

    fn name(&self) -> &'static str {
        "stuffing"
    }
}

/// Continuous resampling with Rubato's polynomial fixed-input resampler
pub struct Resampler {
    inner: FastFixedIn<f32>,
    frame_size: usize,
    ratio: f64,
    planar: Vec<Vec<f32>>,
}

impl Resampler {
    pub fn new(frame_size: usize) -> PlayerResult<Self> {
        let inner = FastFixedIn::<f32>::new(
            1.0,
            MAX_RELATIVE_RATIO,
            PolynomialDegree::Cubic,
            frame_size,
            CHANNELS,
        )
        .map_err(|e| PlayerError::Resampler(e.to_string()))?;

        Ok(Self {
            inner,
            frame_size,
            ratio: 1.0,
            planar: vec![vec![0.0; frame_size]; CHANNELS],
        })
    }
}

impl RateAdapter for Resampler {
    fn process(&mut self, input: &[i16], rate: f64, output: &mut Vec<i16>) -> PlayerResult<usize> {
        // Output/input ratio: playing faster means fewer output samples
        let ratio = 1.0 / rate;
        if (ratio - self.ratio).abs() > f64::EPSILON {
            self.inner
                .set_resample_ratio_relative(ratio, true)
                .map_err(|e| PlayerError::Resampler(e.to_string()))?;
            self.ratio = ratio;
        }

        for (i, channel) in self.planar.iter_mut().enumerate() {
            for (n, sample) in channel.iter_mut().enumerate() {
                *sample = input
                    .get(n * CHANNELS + i)
                    .map_or(0.0, |&s| s as f32 / 32768.0);
            }
        }

        let resampled = self
            .inner
            .process(&self.planar, None)
            .map_err(|e| PlayerError::Resampler(e.to_string()))?;

        output.clear();
        let frames = resampled.first().map_or(0, |c| c.len());
        output.reserve(frames * CHANNELS);
        for n in 0..frames {
            for channel in &resampled {
                let s = (channel[n] * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32);
                output.push(s as i16);
            }
        }
        Ok(frames)
    }

    fn name(&self) -> &'static str {
        "resample"
    }
}

impl std::fmt::Debug for Resampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resampler")
            .field("frame_size", &self.frame_size)
            .field("ratio", &self.ratio)
            .finish()
    }
}
