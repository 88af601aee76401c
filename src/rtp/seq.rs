//! Wrap-aware arithmetic on 16-bit RTP sequence numbers
//!
//! Sequence numbers wrap every 65536 packets (about 13 minutes of 44.1kHz
//! audio at 352 frames per packet), so ordering is decided by the sign of
//! the 16-bit difference and never by numeric magnitude.

/// RTP sequence number
pub type Seq = u16;

/// Half the sequence space: differences at or above this count as "behind"
const HALF_RANGE: u16 = 0x8000;

/// Signed distance from `a` to `b` (positive when `b` is ahead of `a`)
#[inline]
pub fn seq_diff(a: Seq, b: Seq) -> i16 {
    b.wrapping_sub(a) as i16
}

/// True when `b` is at or ahead of `a` in the wrapping sequence space
#[inline]
pub fn seq_is_after(a: Seq, b: Seq) -> bool {
    b.wrapping_sub(a) < HALF_RANGE
}

/// True when `b` is strictly ahead of `a`
#[inline]
pub fn seq_order(a: Seq, b: Seq) -> bool {
    seq_diff(a, b) > 0
}
