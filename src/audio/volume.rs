/// Software volume with dither
///
/// Volume arrives in AirPlay dB (0.0 is full scale, -144.0 is mute) from a
/// control context unrelated to playback, so it lives behind its own lock.
/// The pacer snapshots the gain once per frame and never holds this lock
/// together with the jitter buffer's.

use rand::Rng;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Fixed-point unity gain (16.16)
pub const UNITY_GAIN: i64 = 0x10000;

/// AirPlay's "mute" volume
pub const MUTE_DB: f64 = -144.0;

/// Convert AirPlay dB to a linear factor
pub fn db_to_linear(db: f64) -> f64 {
    if db <= MUTE_DB || db.is_nan() {
        0.0
    } else {
        10f64.powf(0.05 * db.min(0.0))
    }
}

#[derive(Debug, Clone, Copy)]
struct VolumeState {
    linear: f64,
    gain: i64,
    generation: u64,
}

/// Volume shared between the control context and the pacer
#[derive(Debug)]
pub struct VolumeControl {
    state: Mutex<VolumeState>,
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self {
            state: Mutex::new(VolumeState {
                linear: 1.0,
                gain: UNITY_GAIN,
                generation: 0,
            }),
        }
    }
}

impl VolumeControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VolumeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set volume in AirPlay dB
    pub fn set_db(&self, db: f64) {
        let linear = db_to_linear(db);
        let mut st = self.lock();
        st.linear = linear;
        st.gain = (UNITY_GAIN as f64 * linear) as i64;
        st.generation += 1;
        debug!("Volume set to {:.1} dB (linear {:.4})", db, linear);
    }

    pub fn linear(&self) -> f64 {
        self.lock().linear
    }

    /// `(fixed-point gain, generation)`; the generation bumps on every change
    pub fn snapshot(&self) -> (i64, u64) {
        let st = self.lock();
        (st.gain, st.generation)
    }
}

/// First-order noise dither for fixed-point gain
///
/// Adds the difference of two consecutive 16-bit random values before the
/// shift back to 16 bits, so quantisation error becomes noise instead of
/// distortion at low volume. At unity gain samples pass through untouched.
pub struct Dither<R: Rng> {
    rng: R,
    prev: i64,
}

impl<R: Rng> Dither<R> {
    pub fn new(rng: R) -> Self {
        Self { rng, prev: 0 }
    }

    #[inline]
    pub fn apply(&mut self, sample: i16, gain: i64) -> i16 {
        let mut out = sample as i64 * gain;
        if gain < UNITY_GAIN {
            let next = self.rng.gen::<i16>() as i64;
            out += next - self.prev;
            self.prev = next;
        }
        (out >> 16).clamp(i16::MIN as i64, i16::MAX as i64) as i16
    }

    /// Scale a whole frame into `output` (cleared first)
    pub fn scale_into(&mut self, input: &[i16], gain: i64, output: &mut Vec<i16>) {
        output.clear();
        output.extend(input.iter().map(|&s| self.apply(s, gain)));
    }
}
