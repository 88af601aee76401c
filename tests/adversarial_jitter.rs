//! Adversarial Property-Based Tests for the Jitter Buffer and Packet Path
//!
//! # Attack Plan
//!
//! 1. **Malformed Datagrams**: Truncated headers, resend replies shorter than
//!    their prefix, unknown payload types, all-ones / all-zeros packets.
//!
//! 2. **Sequence Number Wraparound**: 65535 -> 0 transition while buffering,
//!    while playing, and inside a gap.
//!
//! 3. **Huge Forward Jumps**: A sender (or attacker) skipping almost half the
//!    sequence space must trigger an overrun skip, never an unbounded fill.
//!
//! 4. **Late / Duplicate Storms**: Replaying already-played sequences, or the
//!    same sequence thousands of times.
//!
//! 5. **Payload Size Attacks**: Empty, odd-length and oversized payloads.
//!
//! # Invariants
//!
//! - classify / ResendRequest::parse never panic on any input
//! - insert / take never panic on any sequence of operations
//! - Every frame handed to playback is exactly one frame long
//! - Playback never goes backwards (consecutive frames are wrap-aware increasing)
//! - Fill after a successful take is below capacity
//! - A jump of more than half the sequence space is an overrun, never an underrun
//! - A played sequence is never played again
//! - Gap requests always start right after the previous write cursor

use proptest::prelude::*;
use std::sync::{Arc, Mutex};

use airdac::audio::codec::StreamParams;
use airdac::rtp::jitter::{InsertOutcome, JitterBuffer, JitterBufferConfig};
use airdac::rtp::receiver::{classify, Datagram};
use airdac::rtp::resend::{ResendRequest, ResendSink};
use airdac::rtp::seq::{seq_order, Seq};

// ============================================================================
// HELPERS
// ============================================================================

const FRAME: usize = 4;

#[derive(Default)]
struct RecordingResend {
    calls: Mutex<Vec<(Seq, Seq)>>,
}

impl ResendSink for RecordingResend {
    fn request(&self, first: Seq, last: Seq) {
        self.calls.lock().unwrap().push((first, last));
    }
}

fn make_buffer(capacity: usize, start_fill: usize) -> (JitterBuffer, Arc<RecordingResend>) {
    let resend = Arc::new(RecordingResend::default());
    let buffer = JitterBuffer::new(
        JitterBufferConfig {
            capacity,
            start_fill,
            params: StreamParams {
                frame_size: FRAME,
                sample_rate: 44100,
                sample_size: 16,
            },
        },
        resend.clone(),
    )
    .unwrap();
    (buffer, resend)
}

fn payload(seq: Seq) -> Vec<i16> {
    vec![seq as i16; FRAME * 2]
}

#[derive(Debug, Clone)]
enum Op {
    Insert(Seq, usize),
    Take,
    Flush,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (any::<u16>(), 0usize..32).prop_map(|(s, n)| Op::Insert(s, n)),
        4 => Just(Op::Take),
        1 => Just(Op::Flush),
    ]
}

/// A stream that mostly advances, sometimes reorders, jumps or repeats
fn hostile_stream() -> impl Strategy<Value = Vec<Seq>> {
    (any::<u16>(), proptest::collection::vec(-40i32..200, 1..300)).prop_map(|(base, steps)| {
        let mut seq = base;
        steps
            .into_iter()
            .map(|step| {
                seq = match step {
                    s if s >= 190 => seq.wrapping_add(30_000),
                    s if s >= 100 => seq.wrapping_add(1),
                    s => seq.wrapping_add(s as u16),
                };
                seq
            })
            .collect()
    })
}

/// Generate malformed datagrams
fn malformed_datagram() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(vec![]),
        Just(vec![0x80]),
        Just(vec![0x80, 0x60]),
        Just(vec![0x80, 0xE0, 0x00, 0x01]),
        // Resend reply shorter than its prefix
        Just(vec![0x80, 0xD6, 0x00]),
        // Resend reply with prefix but truncated header
        Just(vec![0x80, 0xD6, 0x00, 0x01, 0x80, 0x60, 0x00]),
        // Header exactly, no payload
        Just(vec![0x80, 0x60, 0x00, 0x05, 0, 0, 0, 0, 0, 0, 0, 0]),
        Just(vec![0xFF; 100]),
        Just(vec![0x00; 100]),
        proptest::collection::vec(any::<u8>(), 0..40),
    ]
}

// ============================================================================
// INVARIANT: PARSERS NEVER PANIC
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(5000))]

    #[test]
    fn prop_classify_never_panics(data in proptest::collection::vec(any::<u8>(), 0..200)) {
        let _ = classify(&data);
    }

    #[test]
    fn prop_classify_malformed(data in malformed_datagram()) {
        if let Datagram::Audio { payload, .. } = classify(&data) {
            prop_assert!(payload.len() >= 16);
        }
    }

    #[test]
    fn prop_resend_parse_never_panics(data in proptest::collection::vec(any::<u8>(), 0..16)) {
        let _ = ResendRequest::parse(&data);
    }
}

// ============================================================================
// INVARIANT: BUFFER NEVER PANICS, FRAMES ARE WELL-FORMED
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_buffer_never_panics(ops in proptest::collection::vec(op_strategy(), 0..400)) {
        let (buffer, _) = make_buffer(64, 8);
        for op in ops {
            match op {
                Op::Insert(seq, len) => {
                    let _ = buffer.insert(seq, &vec![1i16; len]);
                }
                Op::Take => {
                    if let Some(frame) = buffer.take() {
                        prop_assert_eq!(frame.samples.len(), FRAME * 2);
                        prop_assert!(frame.playback_rate.is_finite());
                    }
                }
                Op::Flush => buffer.flush(),
            }
        }
    }

    #[test]
    fn prop_playback_never_goes_backwards(stream in hostile_stream(), takes in 1usize..4) {
        let (buffer, _) = make_buffer(128, 16);
        let mut last: Option<Seq> = None;

        for seq in stream {
            buffer.insert(seq, &payload(seq));
            for _ in 0..takes {
                if let Some(frame) = buffer.take() {
                    if let Some(prev) = last {
                        prop_assert!(
                            seq_order(prev, frame.seq),
                            "played {:04X} after {:04X}", frame.seq, prev
                        );
                    }
                    last = Some(frame.seq);
                    prop_assert!(buffer.fill() < 128, "fill {}", buffer.fill());
                }
            }
        }
    }

    #[test]
    fn prop_gap_requests_follow_write_cursor(stream in hostile_stream()) {
        let (buffer, resend) = make_buffer(256, 200);
        for seq in stream {
            let before = buffer.cursors().1;
            let synced = buffer.is_synced();
            if let InsertOutcome::Gap { first, last } = buffer.insert(seq, &payload(seq)) {
                prop_assert!(synced);
                prop_assert_eq!(first, before.wrapping_add(1));
                prop_assert_eq!(last, seq.wrapping_sub(1));
            }
        }
        // Nothing was taken, so every request came from a gap
        for (first, last) in resend.calls.lock().unwrap().iter() {
            prop_assert!(last.wrapping_sub(*first) < 0x8000);
        }
    }
}

// ============================================================================
// WRAPAROUND
// ============================================================================

#[test]
fn test_wraparound_while_buffering_and_playing() {
    let (buffer, resend) = make_buffer(64, 10);
    let seqs: Vec<Seq> = (65530..=65535).chain(0..30).collect();

    let mut played = Vec::new();
    for &seq in &seqs {
        assert_ne!(buffer.insert(seq, &payload(seq)), InsertOutcome::TooLate);
        if !buffer.is_buffering() {
            played.push(buffer.take().unwrap().seq);
        }
    }
    while let Some(frame) = buffer.take() {
        played.push(frame.seq);
    }

    assert_eq!(played, seqs);
    assert!(resend.calls.lock().unwrap().is_empty());
}

#[test]
fn test_gap_across_wrap() {
    let (buffer, resend) = make_buffer(64, 32);
    buffer.insert(65533, &payload(65533));
    assert_eq!(
        buffer.insert(2, &payload(2)),
        InsertOutcome::Gap {
            first: 65534,
            last: 1
        }
    );
    assert_eq!(*resend.calls.lock().unwrap(), vec![(65534, 1)]);
    assert_eq!(ResendRequest::new(65534, 1).count, 4);
}

// ============================================================================
// HUGE JUMPS
// ============================================================================

#[test]
fn test_half_space_jump_forces_overrun() {
    let (buffer, _) = make_buffer(64, 8);
    for seq in 0..8u16 {
        buffer.insert(seq, &payload(seq));
    }
    assert!(!buffer.is_buffering());

    buffer.insert(30_000, &payload(30_000));
    let frame = buffer.take().unwrap();
    // Skipped to start_fill frames behind the new write cursor
    assert_eq!(frame.seq, 30_000 - 8);
    assert!(frame.missing);
    assert_eq!(buffer.stats().overruns, 1);
    assert_eq!(buffer.fill(), 8);

    // Continue to the real packet
    let mut last = frame;
    while let Some(next) = buffer.take() {
        last = next;
    }
    assert_eq!(last.seq, 30_000);
    assert!(!last.missing);
}

#[test]
fn test_jump_past_half_space_from_steady_state_recovers() {
    let (buffer, _) = make_buffer(512, 220);
    for seq in 0..220u16 {
        buffer.insert(seq, &payload(seq));
    }
    assert!(!buffer.is_buffering());

    // write - read now exceeds 32767, so the 16-bit fill wraps negative
    let jump = 220 + (32_767 - 220) + 132;
    buffer.insert(jump, &payload(jump));

    let frame = buffer.take().expect("jump must not look like an underrun");
    assert_eq!(frame.seq, jump - 220);
    assert!(frame.missing);
    assert_eq!(buffer.stats().overruns, 1);
    assert_eq!(buffer.stats().underruns, 0);
    assert_eq!(buffer.fill(), 220);

    for seq in jump + 1..jump + 2001 {
        buffer.insert(seq, &payload(seq));
        assert!(buffer.take().is_some(), "stalled after {:04X}", seq);
    }
    assert!(!buffer.is_buffering());
    assert_eq!(buffer.stats().underruns, 0);
    assert_eq!(buffer.fill(), 220);
}

// ============================================================================
// LATE / DUPLICATE STORMS
// ============================================================================

#[test]
fn test_replay_flood_never_replays() {
    let (buffer, _) = make_buffer(64, 4);
    for seq in 100..110u16 {
        buffer.insert(seq, &payload(seq));
    }
    let mut played = Vec::new();
    for _ in 0..5 {
        played.push(buffer.take().unwrap().seq);
    }

    for _ in 0..1000 {
        for seq in 100..105u16 {
            assert_eq!(buffer.insert(seq, &payload(seq)), InsertOutcome::TooLate);
        }
    }
    while let Some(frame) = buffer.take() {
        played.push(frame.seq);
    }

    assert_eq!(played, (100..110).collect::<Vec<Seq>>());
    assert_eq!(buffer.stats().packets_too_late, 5000);
}

#[test]
fn test_duplicate_storm_plays_once() {
    let (buffer, _) = make_buffer(64, 2);
    for _ in 0..1000 {
        buffer.insert(7, &payload(7));
    }
    buffer.insert(8, &payload(8));

    assert_eq!(buffer.take().unwrap().seq, 7);
    assert_eq!(buffer.take().unwrap().seq, 8);
    assert!(buffer.take().is_none());
    assert_eq!(buffer.stats().packets_duplicate, 999);
}

// ============================================================================
// PAYLOAD SIZES
// ============================================================================

#[test]
fn test_payload_sizes_normalised() {
    let (buffer, _) = make_buffer(64, 1);
    buffer.insert(1, &[]);
    let frame = buffer.take().unwrap();
    assert_eq!(frame.samples, vec![0; FRAME * 2]);

    // Oversized payload is truncated to one frame
    buffer.insert(2, &vec![9; 10_000]);
    let frame = buffer.take().unwrap();
    assert_eq!(frame.samples, vec![9; FRAME * 2]);
}
