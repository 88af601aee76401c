/// Integration tests for the receive / resend / playback loop
/// Uses a mock sender that streams audio over UDP and answers resend requests

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use airdac::audio::codec::{L16Decoder, Plaintext, StreamParams};
use airdac::audio::sink::AudioSink;
use airdac::error::PlayerResult;
use airdac::rtp::jitter::JitterBufferConfig;
use airdac::rtp::resend::ResendRequest;
use airdac::session::{Session, SessionConfig, SessionState, StreamSetup};

const FRAME: usize = 8;

fn audio_packet(payload_type: u8, seq: u16) -> Vec<u8> {
    let mut p = vec![0x80, payload_type, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
    p[2..4].copy_from_slice(&seq.to_be_bytes());
    for _ in 0..FRAME * 2 {
        p.extend_from_slice(&(seq as i16).to_be_bytes());
    }
    p
}

/// Mock sender: streams packets, optionally answers resend requests
struct MockSender {
    data: UdpSocket,
    control: UdpSocket,
    running: Arc<AtomicBool>,
    answer_resends: bool,
    resend_requests: Arc<AtomicU32>,
    packets_resent: Arc<AtomicU32>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MockSender {
    fn new(answer_resends: bool) -> std::io::Result<Self> {
        let data = UdpSocket::bind("127.0.0.1:0")?;
        let control = UdpSocket::bind("127.0.0.1:0")?;
        control.set_read_timeout(Some(Duration::from_millis(50)))?;

        Ok(Self {
            data,
            control,
            running: Arc::new(AtomicBool::new(true)),
            answer_resends,
            resend_requests: Arc::new(AtomicU32::new(0)),
            packets_resent: Arc::new(AtomicU32::new(0)),
            thread: None,
        })
    }

    fn control_addr(&self) -> SocketAddr {
        self.control.local_addr().unwrap()
    }

    fn stream(&self, to: SocketAddr, seqs: impl IntoIterator<Item = u16>) {
        for seq in seqs {
            self.data.send_to(&audio_packet(0x60, seq), to).unwrap();
        }
    }

    /// Serve resend requests for one session on a background thread
    fn serve(&mut self, session_addr: SocketAddr) {
        let data = self.data.try_clone().unwrap();
        let control = self.control.try_clone().unwrap();
        let running = Arc::clone(&self.running);
        let resend_requests = Arc::clone(&self.resend_requests);
        let packets_resent = Arc::clone(&self.packets_resent);
        let answer_resends = self.answer_resends;

        self.thread = Some(thread::spawn(move || {
            let mut buf = [0u8; 64];
            while running.load(Ordering::SeqCst) {
                let Ok((len, from)) = control.recv_from(&mut buf) else {
                    continue;
                };
                assert_eq!(from, session_addr, "resend must come from the data socket");
                let request = ResendRequest::parse(&buf[..len]).expect("well-formed request");
                resend_requests.fetch_add(1, Ordering::SeqCst);

                if !answer_resends {
                    continue;
                }
                for i in 0..request.count {
                    let seq = request.first.wrapping_add(i);
                    let mut reply = vec![0x80, 0xD6, 0x00, 0x01];
                    reply.extend(audio_packet(0x60, seq));
                    let _ = data.send_to(&reply, session_addr);
                    packets_resent.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));
    }

    fn resend_requests(&self) -> u32 {
        self.resend_requests.load(Ordering::SeqCst)
    }

    fn packets_resent(&self) -> u32 {
        self.packets_resent.load(Ordering::SeqCst)
    }
}

impl Drop for MockSender {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

/// Records the sequence value carried by every non-silent frame
#[derive(Clone, Default)]
struct RecordingSink {
    values: Arc<Mutex<Vec<i16>>>,
}

impl AudioSink for RecordingSink {
    fn play(&mut self, samples: &[i16], frames: usize) -> PlayerResult<()> {
        if frames > 0 && samples[0] != 0 {
            self.values.lock().unwrap().push(samples[0]);
        }
        thread::sleep(Duration::from_micros(500));
        Ok(())
    }
}

fn session_config(start_fill: usize) -> SessionConfig {
    SessionConfig {
        buffer: JitterBufferConfig {
            capacity: 512,
            start_fill,
            params: StreamParams {
                frame_size: FRAME,
                sample_rate: 44100,
                sample_size: 16,
            },
        },
        ..Default::default()
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn start_setup(control_addr: SocketAddr, sink: RecordingSink) -> (StreamSetup, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();
    (
        StreamSetup {
            socket,
            control_addr,
            cipher: Box::new(Plaintext),
            decoder: Box::new(L16Decoder),
            sink: Box::new(sink),
        },
        addr,
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lossy_stream_recovered_by_resend() {
    let mut sender = MockSender::new(true).unwrap();
    let sink = RecordingSink::default();
    let values = Arc::clone(&sink.values);

    let mut session = Session::new(session_config(220));
    let (setup, session_addr) = start_setup(sender.control_addr(), sink);
    session.start(setup).await.unwrap();
    sender.serve(session_addr);

    let lost = [50u16, 51, 120];
    sender.stream(session_addr, (1..=300).filter(|s| !lost.contains(s)));

    assert!(
        wait_for(|| values.lock().unwrap().len() >= 300).await,
        "only {} frames played",
        values.lock().unwrap().len()
    );
    // Stream ended, so playback ran dry
    assert!(wait_for(|| session.state() == SessionState::Buffering).await);

    let summary = session.stop().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    let played = values.lock().unwrap().clone();
    assert_eq!(played, (1..=300).collect::<Vec<i16>>());
    assert_eq!(summary.buffer.gaps, 2);
    assert_eq!(summary.buffer.frames_missing, 0);
    // Last-chance requests may repeat a gap that was already in flight
    assert!(sender.resend_requests() >= 2);
    assert!(sender.packets_resent() >= 3);
    assert!(summary.receiver.resent >= 3);
    assert!(summary.resends_sent >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unanswered_loss_plays_silence() {
    let mut sender = MockSender::new(false).unwrap();
    let sink = RecordingSink::default();
    let values = Arc::clone(&sink.values);

    let mut session = Session::new(session_config(20));
    let (setup, session_addr) = start_setup(sender.control_addr(), sink);
    session.start(setup).await.unwrap();
    sender.serve(session_addr);

    sender.stream(session_addr, (1..=40).filter(|&s| s != 10));

    assert!(wait_for(|| values.lock().unwrap().len() >= 39).await);
    let summary = session.stop().await.unwrap();

    let played = values.lock().unwrap().clone();
    assert_eq!(played, (1..=40).filter(|&s| s != 10).collect::<Vec<i16>>());
    assert_eq!(summary.buffer.frames_missing, 1);
    assert!(wait_for(|| sender.resend_requests() >= 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_noise_on_data_port_ignored() {
    let sender = MockSender::new(false).unwrap();
    let sink = RecordingSink::default();
    let values = Arc::clone(&sink.values);

    let mut session = Session::new(session_config(10));
    let (setup, session_addr) = start_setup(sender.control_addr(), sink);
    session.start(setup).await.unwrap();

    let junk = UdpSocket::bind("127.0.0.1:0").unwrap();
    for seq in 1..=10u16 {
        // Timing sync, an unknown type and a runt around every audio packet
        junk.send_to(&[0x80, 0xD4, 0x00, 0x07, 0, 0, 0, 0], session_addr).unwrap();
        junk.send_to(&[0x80, 0x33, 0x00, 0x01], session_addr).unwrap();
        junk.send_to(&audio_packet(0x60, seq)[..20], session_addr).unwrap();
        sender.data.send_to(&audio_packet(0x60, seq), session_addr).unwrap();
    }

    assert!(wait_for(|| values.lock().unwrap().len() >= 10).await);
    let summary = session.stop().await.unwrap();

    assert_eq!(*values.lock().unwrap(), (1..=10).collect::<Vec<i16>>());
    assert_eq!(summary.receiver.audio, 10);
    assert_eq!(summary.receiver.sync, 10);
    assert_eq!(summary.receiver.ignored, 20);
    assert_eq!(summary.buffer.gaps, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_resyncs_on_new_stream() {
    let sender = MockSender::new(false).unwrap();
    let sink = RecordingSink::default();
    let values = Arc::clone(&sink.values);

    let mut session = Session::new(session_config(5));
    let (setup, first_addr) = start_setup(sender.control_addr(), sink.clone());
    session.start(setup).await.unwrap();
    sender.stream(first_addr, 1000..1005);
    assert!(wait_for(|| values.lock().unwrap().len() >= 5).await);

    // New stream starting at an unrelated sequence number
    let (setup, second_addr) = start_setup(sender.control_addr(), sink);
    session.start(setup).await.unwrap();
    sender.stream(second_addr, 7..12);
    assert!(wait_for(|| values.lock().unwrap().len() >= 10).await);
    session.stop().await.unwrap();

    let played = values.lock().unwrap().clone();
    assert_eq!(played, vec![1000, 1001, 1002, 1003, 1004, 7, 8, 9, 10, 11]);
}
