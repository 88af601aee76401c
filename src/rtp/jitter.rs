/// Audio jitter buffer
/// Reassembles the lossy, reordered packet stream into a continuous play
/// sequence and feeds the drift estimator.
///
/// The buffer is a fixed ring of `capacity` slots (a power of two); the slot
/// for sequence `s` is always `s % capacity`. `write` is the newest sequence
/// accepted and `read` the next one to play, so the fill level is
/// `write - read + 1`. Both execution contexts (network receive and
/// playback) go through the one mutex; resend requests are sent only after
/// it has been released.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use super::resend::ResendSink;
use super::seq::{seq_diff, seq_is_after, seq_order, Seq};
use crate::audio::codec::StreamParams;
use crate::audio::drift::DriftEstimator;
use crate::error::{PlayerError, PlayerResult};

/// First offset ahead of `read` checked by the last-chance resend scan
const LAST_CHANCE_FIRST_OFFSET: u16 = 16;

/// Largest ring the 16-bit sequence space can address unambiguously
pub const MAX_CAPACITY: usize = 1 << 15;

/// Configuration for the jitter buffer
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    /// Number of slots; must be a power of two
    pub capacity: usize,
    /// Fill that ends buffering and starts playback
    pub start_fill: usize,
    /// Frame format of the stored payloads
    pub params: StreamParams,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            start_fill: 220,
            params: StreamParams::default(),
        }
    }
}

impl JitterBufferConfig {
    pub fn validate(&self) -> PlayerResult<()> {
        if !self.capacity.is_power_of_two() {
            return Err(PlayerError::CapacityNotPowerOfTwo(self.capacity));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(PlayerError::CapacityTooLarge {
                capacity: self.capacity,
                max: MAX_CAPACITY,
            });
        }
        if self.start_fill > self.capacity {
            return Err(PlayerError::StartFillTooLarge {
                start_fill: self.start_fill,
                capacity: self.capacity,
            });
        }
        self.params.validate()
    }
}

/// One frame handed to playback
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: Seq,
    /// Interleaved stereo samples, exactly one frame long
    pub samples: Vec<i16>,
    /// The packet never arrived; `samples` is silence
    pub missing: bool,
    /// Drift-corrected playback rate after this frame was consumed
    pub playback_rate: f64,
}

/// What `insert` did with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Next packet in sequence
    InOrder,
    /// Newer than expected; `[first, last]` were requested again
    Gap { first: Seq, last: Seq },
    /// Late (or resent) but not yet played
    Late,
    /// Already played; discarded
    TooLate,
}

/// Statistics about jitter buffer operation
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    pub packets_received: u64,
    pub packets_too_late: u64,
    /// Packets that replaced an identical, still-ready sequence
    pub packets_duplicate: u64,
    pub gaps: u64,
    pub resend_requests: u64,
    pub frames_played: u64,
    /// Frames played as silence because their packet never arrived
    pub frames_missing: u64,
    pub underruns: u64,
    pub overruns: u64,
}

#[derive(Debug)]
struct Slot {
    ready: bool,
    seq: Seq,
    data: Vec<i16>,
}

#[derive(Debug)]
struct BufferState {
    slots: Vec<Slot>,
    read: Seq,
    write: Seq,
    synced: bool,
    buffering: bool,
    drift: DriftEstimator,
    stats: BufferStats,
}

impl BufferState {
    /// Frames buffered but not yet played
    fn fill(&self) -> i32 {
        seq_diff(self.read, self.write) as i32 + 1
    }

    /// `write` ran more than half the sequence space ahead of `read`, so the
    /// 16-bit difference reads as negative
    fn fill_wrapped(&self) -> bool {
        self.fill() < 0
    }

    fn index(&self, seq: Seq) -> usize {
        seq as usize % self.slots.len()
    }

    fn is_ready(&self, seq: Seq) -> bool {
        let slot = &self.slots[self.index(seq)];
        slot.ready && slot.seq == seq
    }

    fn resync(&mut self) {
        for slot in &mut self.slots {
            slot.ready = false;
        }
        self.synced = false;
        self.buffering = true;
    }
}

pub struct JitterBuffer {
    config: JitterBufferConfig,
    state: Mutex<BufferState>,
    resend: Arc<dyn ResendSink>,
}

impl JitterBuffer {
    /// Allocate all slot storage up front; fails if the configuration is
    /// invalid or memory cannot be reserved.
    pub fn new(config: JitterBufferConfig, resend: Arc<dyn ResendSink>) -> PlayerResult<Self> {
        config.validate()?;

        let samples = config.params.samples_per_frame();
        let alloc_err = || PlayerError::Allocation {
            slots: config.capacity,
            frame_bytes: config.params.frame_bytes(),
        };

        let mut slots = Vec::new();
        slots.try_reserve_exact(config.capacity).map_err(|_| alloc_err())?;
        for _ in 0..config.capacity {
            let mut data = Vec::new();
            data.try_reserve_exact(samples).map_err(|_| alloc_err())?;
            data.resize(samples, 0);
            slots.push(Slot {
                ready: false,
                seq: 0,
                data,
            });
        }

        debug!(
            "Jitter buffer allocated: {} slots x {} bytes, start fill {}",
            config.capacity,
            config.params.frame_bytes(),
            config.start_fill
        );

        let drift = DriftEstimator::new(config.params.sample_rate, config.params.frame_size as u32);
        Ok(Self {
            config,
            state: Mutex::new(BufferState {
                slots,
                read: 0,
                write: 0,
                synced: false,
                buffering: true,
                drift,
                stats: BufferStats::default(),
            }),
            resend,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // A panic elsewhere must not take playback down with it
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a decoded frame received from the network
    ///
    /// `samples` is padded with silence or truncated to one frame.
    pub fn insert(&self, seq: Seq, samples: &[i16]) -> InsertOutcome {
        let outcome = {
            let mut st = self.lock();
            st.stats.packets_received += 1;

            if !st.synced {
                debug!("Syncing to first sequence {:04X}", seq);
                st.write = seq.wrapping_sub(1);
                st.read = seq;
                st.synced = true;
            }

            let outcome = if seq == st.write.wrapping_add(1) {
                st.write = seq;
                InsertOutcome::InOrder
            } else if seq_order(st.write, seq) {
                let first = st.write.wrapping_add(1);
                let last = seq.wrapping_sub(1);
                st.write = seq;
                st.stats.gaps += 1;
                st.stats.resend_requests += 1;
                InsertOutcome::Gap { first, last }
            } else if seq_is_after(st.read, seq) {
                InsertOutcome::Late
            } else {
                trace!("Late packet {:04X} ({:04X}:{:04X})", seq, st.read, st.write);
                st.stats.packets_too_late += 1;
                return InsertOutcome::TooLate;
            };

            let idx = st.index(seq);
            let duplicate = st.slots[idx].ready && st.slots[idx].seq == seq;
            if duplicate {
                st.stats.packets_duplicate += 1;
            }
            let slot = &mut st.slots[idx];
            let n = samples.len().min(slot.data.len());
            slot.data[..n].copy_from_slice(&samples[..n]);
            slot.data[n..].fill(0);
            slot.seq = seq;
            slot.ready = true;

            let fill = st.fill();
            if st.buffering && (fill >= self.config.start_fill as i32 || st.fill_wrapped()) {
                info!("Buffering over at fill {}, starting playback", fill);
                st.buffering = false;
                st.drift.seed(fill.clamp(0, self.config.capacity as i32));
            }

            outcome
        };

        if let InsertOutcome::Gap { first, last } = outcome {
            self.resend.request(first, last);
        }
        outcome
    }

    /// Next frame for playback, or `None` while buffering or after an
    /// underrun (the caller plays silence).
    pub fn take(&self) -> Option<Frame> {
        let mut last_chance: Vec<Seq> = Vec::new();

        let frame = {
            let mut st = self.lock();
            if st.buffering {
                return None;
            }

            let fill = st.fill();
            if !st.synced || fill == 0 {
                if st.synced {
                    warn!("Underrun at {:04X}, re-entering buffering", st.read);
                    st.stats.underruns += 1;
                }
                st.buffering = true;
                return None;
            }

            if fill >= self.config.capacity as i32 || st.fill_wrapped() {
                warn!(
                    "Overrun: fill {} >= {}, skipping ahead to {} frames behind {:04X}",
                    fill, self.config.capacity, self.config.start_fill, st.write
                );
                st.stats.overruns += 1;
                st.read = st.write.wrapping_sub(self.config.start_fill as u16);
            }

            let seq = st.read;
            st.read = seq.wrapping_add(1);
            let fill_after = st.fill();
            let playback_rate = st.drift.update(fill_after);

            // Packets needed soon that still have not shown up; nothing past
            // `write` has been sent yet
            let mut offset = LAST_CHANCE_FIRST_OFFSET;
            while (offset as usize) < self.config.start_fill / 2 && (offset as i32) < fill_after {
                let next = st.read.wrapping_add(offset);
                if !st.is_ready(next) {
                    last_chance.push(next);
                }
                offset = offset.saturating_mul(2);
            }
            st.stats.resend_requests += last_chance.len() as u64;

            let idx = st.index(seq);
            let present = st.is_ready(seq);
            st.stats.frames_played += 1;
            if !present {
                trace!("Missing frame {:04X}", seq);
                st.stats.frames_missing += 1;
            }

            let slot = &mut st.slots[idx];
            let samples = if present {
                slot.data.clone()
            } else {
                vec![0; slot.data.len()]
            };
            slot.ready = false;

            Frame {
                seq,
                samples,
                missing: !present,
                playback_rate,
            }
        };

        for seq in last_chance {
            self.resend.request(seq, seq);
        }
        Some(frame)
    }

    /// Forget everything buffered; the next packet re-seeds the session
    pub fn flush(&self) {
        let mut st = self.lock();
        st.resync();
        debug!("Jitter buffer flushed");
    }

    pub fn is_buffering(&self) -> bool {
        self.lock().buffering
    }

    pub fn is_synced(&self) -> bool {
        self.lock().synced
    }

    /// Current fill (0 before the first packet)
    pub fn fill(&self) -> i32 {
        let st = self.lock();
        if st.synced {
            st.fill()
        } else {
            0
        }
    }

    /// `(read, write)` cursors
    pub fn cursors(&self) -> (Seq, Seq) {
        let st = self.lock();
        (st.read, st.write)
    }

    pub fn playback_rate(&self) -> f64 {
        self.lock().drift.playback_rate()
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats.clone()
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }
}
