pub mod capture;
pub mod channel;
pub mod chunk;
pub mod playback;

pub use capture::{
    AudioCapture, AudioCaptureConfig, AudioCaptureError, AudioDeviceInfo, ChunkConsumer,
};
pub use channel::ChannelExtractor;
pub use chunk::{AudioChunk, AudioFormat, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use playback::{AudioError, AudioSink, CpalPlayback, PlaybackConfig};
