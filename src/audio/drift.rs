/// Clock drift estimation from buffer fill
///
/// The sender's clock and our output clock never agree exactly, so the
/// jitter buffer slowly fills or drains. We turn the fill level into a
/// playback-rate multiplier with three second-order low-pass filters:
///
/// - error LPF (1/10 Hz): smooths `fill - desired_fill`
/// - derivative LPF (1/2 Hz): smooths the change in the smoothed error
/// - drift LPF (1/180 Hz): integrates a small-gain sum of both into the
///   persistent drift estimate
///
/// The result is `1.0 + proportional + drift`. Nothing here clamps the
/// rate; the pacer bounds it before use.

use std::f64::consts::PI;
use tracing::{debug, trace};

/// Updates spent learning the natural operating fill before steering
pub const WARMUP_UPDATES: u32 = 1000;

/// Proportional gain on the smoothed error
const CONTROL_A: f64 = 1e-4;
/// Loop gain feeding the drift integrator
const CONTROL_B: f64 = 1e-1;

/// Direct-form II biquad, coefficients normalised by a0
#[derive(Debug, Clone)]
struct Biquad {
    hist: [f64; 2],
    a: [f64; 2],
    b: [f64; 3],
}

impl Biquad {
    /// Low-pass at `freq` Hz for a filter clocked at `frame_rate` updates per second
    fn low_pass(freq: f64, q: f64, frame_rate: f64) -> Self {
        let w0 = 2.0 * PI * freq / frame_rate;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        let cos_w0 = w0.cos();

        let b0 = (1.0 - cos_w0) / (2.0 * a0);
        Self {
            hist: [0.0; 2],
            a: [-2.0 * cos_w0 / a0, (1.0 - alpha) / a0],
            b: [b0, (1.0 - cos_w0) / a0, b0],
        }
    }

    fn filter(&mut self, input: f64) -> f64 {
        let w = input - self.a[0] * self.hist[0] - self.a[1] * self.hist[1];
        let out = self.b[1] * self.hist[0] + self.b[2] * self.hist[1] + self.b[0] * w;
        self.hist[1] = self.hist[0];
        self.hist[0] = w;
        out
    }
}

#[derive(Debug, Clone)]
pub struct DriftEstimator {
    frame_rate: f64,
    drift_lpf: Biquad,
    err_lpf: Biquad,
    err_deriv_lpf: Biquad,
    est_drift: f64,
    est_err: f64,
    last_err: f64,
    desired_fill: f64,
    fill_count: u32,
    seed_fill: i32,
    playback_rate: f64,
}

impl DriftEstimator {
    /// Estimator for a stream producing one frame of `frame_size` samples
    /// per update at `sample_rate`
    pub fn new(sample_rate: u32, frame_size: u32) -> Self {
        let frame_rate = sample_rate as f64 / frame_size.max(1) as f64;
        let mut est = Self {
            frame_rate,
            drift_lpf: Biquad::low_pass(1.0 / 180.0, 0.3, frame_rate),
            err_lpf: Biquad::low_pass(1.0 / 10.0, 0.25, frame_rate),
            err_deriv_lpf: Biquad::low_pass(1.0 / 2.0, 0.2, frame_rate),
            est_drift: 0.0,
            est_err: 0.0,
            last_err: 0.0,
            desired_fill: 0.0,
            fill_count: 0,
            seed_fill: 0,
            playback_rate: 1.0,
        };
        est.seed(0);
        est
    }

    /// Start over: fresh filters, new warm-up, nominal rate
    pub fn seed(&mut self, initial_fill: i32) {
        self.drift_lpf = Biquad::low_pass(1.0 / 180.0, 0.3, self.frame_rate);
        self.err_lpf = Biquad::low_pass(1.0 / 10.0, 0.25, self.frame_rate);
        self.err_deriv_lpf = Biquad::low_pass(1.0 / 2.0, 0.2, self.frame_rate);
        self.est_drift = 0.0;
        self.est_err = 0.0;
        self.last_err = 0.0;
        self.desired_fill = 0.0;
        self.fill_count = 0;
        self.seed_fill = initial_fill;
        self.playback_rate = 1.0;
    }

    /// Feed the fill observed after consuming a frame; returns the new rate
    pub fn update(&mut self, fill: i32) -> f64 {
        // Most output chains swallow their own buffer's worth right after
        // playback starts, so the seed fill is not the operating point.
        if self.fill_count < WARMUP_UPDATES {
            self.desired_fill += fill as f64 / WARMUP_UPDATES as f64;
            self.fill_count += 1;
            return self.playback_rate;
        } else if self.fill_count == WARMUP_UPDATES {
            debug!(
                "Established desired fill of {:.1} frames, output chain buffered about {:.1} frames",
                self.desired_fill,
                self.seed_fill as f64 - self.desired_fill
            );
            self.fill_count += 1;
        }

        let buf_delta = fill as f64 - self.desired_fill;
        self.est_err = self.err_lpf.filter(buf_delta);
        let err_deriv = self.err_deriv_lpf.filter(self.est_err - self.last_err);
        let adj_error = CONTROL_A * self.est_err;

        self.est_drift = self
            .drift_lpf
            .filter(CONTROL_B * (adj_error + err_deriv) + self.est_drift);

        trace!(
            "fill {} err {:.4} drift {:.6} desired {:.1} deriv {:.6}",
            fill,
            self.est_err,
            self.est_drift,
            self.desired_fill,
            err_deriv
        );

        self.playback_rate = 1.0 + adj_error + self.est_drift;
        self.last_err = self.est_err;
        self.playback_rate
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Learned operating fill, once warm-up is over
    pub fn desired_fill(&self) -> Option<f64> {
        (self.fill_count >= WARMUP_UPDATES).then_some(self.desired_fill)
    }

    /// Estimated relative clock mismatch (the integral term)
    pub fn drift(&self) -> f64 {
        self.est_drift
    }
}
