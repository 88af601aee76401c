/// Audio output sinks
///
/// The sink is the clock master on our side: `play` blocks while its queue
/// is full, and that backpressure is what paces the playback loop.

use std::io::Write;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::{PlayerError, PlayerResult};

pub trait AudioSink: Send {
    fn start(&mut self, _sample_rate: u32) -> PlayerResult<()> {
        Ok(())
    }

    /// Play `frames` interleaved stereo frames from `samples`
    fn play(&mut self, samples: &[i16], frames: usize) -> PlayerResult<()>;

    /// Take over volume in hardware; `false` means "scale in software"
    fn set_volume(&mut self, _linear: f64) -> bool {
        false
    }

    fn stop(&mut self) {}
}

/// Frame-count deadline against a wall-clock epoch
///
/// Sinks with no backpressure of their own sleep on this so frames leave at
/// `sample_rate`, like a DAC draining its queue.
#[derive(Debug)]
struct RealtimeClock {
    sample_rate: u32,
    epoch: Option<Instant>,
    frames: u64,
}

impl RealtimeClock {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            epoch: None,
            frames: 0,
        }
    }

    fn restart(&mut self, sample_rate: u32) {
        *self = Self::new(sample_rate);
    }

    /// Block until `frames` more frames are due
    fn wait(&mut self, frames: usize) {
        let epoch = *self.epoch.get_or_insert_with(Instant::now);
        self.frames += frames as u64;
        let due = Duration::from_secs_f64(self.frames as f64 / self.sample_rate as f64);
        let elapsed = epoch.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }
}

/// Raw s16le interleaved PCM to any writer (stdout, a file, a pipe)
///
/// Writes are paced to the stream's sample rate; a file would otherwise
/// swallow frames as fast as the pacer can produce them.
pub struct WriterSink<W: Write + Send> {
    writer: W,
    bytes: Vec<u8>,
    frames_written: u64,
    clock: RealtimeClock,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes: Vec::new(),
            frames_written: 0,
            clock: RealtimeClock::new(44100),
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> AudioSink for WriterSink<W> {
    fn start(&mut self, sample_rate: u32) -> PlayerResult<()> {
        self.clock.restart(sample_rate);
        Ok(())
    }

    fn play(&mut self, samples: &[i16], frames: usize) -> PlayerResult<()> {
        let count = (frames * 2).min(samples.len());
        self.bytes.clear();
        for s in &samples[..count] {
            self.bytes.extend_from_slice(&s.to_le_bytes());
        }
        self.writer
            .write_all(&self.bytes)
            .map_err(|e| PlayerError::Sink(e.to_string()))?;
        self.frames_written += frames as u64;
        self.clock.wait(frames);
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush audio output: {}", e);
        }
    }
}

/// Discards audio at real-time pace
///
/// Useful for headless runs and soak tests of the drift loop.
#[derive(Debug)]
pub struct NullSink {
    clock: RealtimeClock,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            clock: RealtimeClock::new(44100),
        }
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn start(&mut self, sample_rate: u32) -> PlayerResult<()> {
        self.clock.restart(sample_rate);
        Ok(())
    }

    fn play(&mut self, _samples: &[i16], frames: usize) -> PlayerResult<()> {
        self.clock.wait(frames);
        Ok(())
    }
}
