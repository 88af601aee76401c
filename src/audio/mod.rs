pub mod codec;
pub mod drift;
pub mod pacer;
pub mod rate;
pub mod sink;
pub mod volume;

pub use codec::{FrameDecoder, L16Decoder, PacketCipher, Plaintext, StreamParams};
pub use pacer::PlaybackPacer;
pub use rate::{RateAdapter, RateAdapterKind};
pub use sink::{AudioSink, NullSink, WriterSink};
pub use volume::VolumeControl;
