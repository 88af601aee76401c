//! Error types for the receiver core
//!
//! Only failures that stop a session from starting (or a sink from playing)
//! are errors. Gaps, late packets, underrun and overrun are recovered in
//! place and show up in `BufferStats` instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("buffer capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),

    #[error("buffer capacity {capacity} exceeds the addressable maximum {max}")]
    CapacityTooLarge { capacity: usize, max: usize },

    #[error("start fill {start_fill} exceeds buffer capacity {capacity}")]
    StartFillTooLarge { start_fill: usize, capacity: usize },

    #[error("invalid stream parameters: {0}")]
    InvalidParams(String),

    #[error("unsupported stream format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to allocate {slots} slots of {frame_bytes} bytes")]
    Allocation { slots: usize, frame_bytes: usize },

    #[error("no session is running")]
    NotRunning,

    #[error("audio sink error: {0}")]
    Sink(String),

    #[error("resampler error: {0}")]
    Resampler(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PlayerResult<T> = Result<T, PlayerError>;
