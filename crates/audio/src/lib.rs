//! chorus-audio – Audio-Pipelines des Voice-Clients
//!
//! - Capture: Geraete-Frames -> Segmentierung (20 ms) -> VAD -> Codec -> Queue
//! - Playback: Voice-Daten -> Sprecher-Pruefung -> Decoder -> Ausgabepuffer
//! - Geraete-Abstraktion mit cpal-Backend und virtuellem Backend
//! - Queue-Pumps zwischen Pipeline und Transport

pub mod buffer;
pub mod capture;
pub mod codec;
pub mod cpal_backend;
pub mod device;
pub mod error;
pub mod format;
pub mod playback;
pub mod pump;
pub mod segment;
pub mod vad;

// Bequeme Re-Exporte der wichtigsten Typen
pub use buffer::{playback_ring, PlaybackBuffer, PlaybackProducer, DEFAULT_PLAYBACK_CAPACITY};
pub use capture::{
    CaptureConfig, CapturePipeline, CaptureSession, FrameOutcome, LocalSpeaker, PayloadMode,
    VoiceFrame,
};
pub use codec::{codec_factory, CodecFactory, CodecKind, VoiceDecoder, VoiceEncoder};
pub use cpal_backend::{list_input_devices, list_output_devices, CpalBackend};
pub use device::{AudioBackend, DeviceHandle, VirtualBackend};
pub use error::{AudioError, AudioResult};
pub use format::AudioFormat;
pub use playback::{PlaybackConfig, PlaybackPipeline, SpeakerDirectory, VoiceDataOutcome};
pub use pump::Pump;
pub use segment::SegmentAccumulator;
pub use vad::{VadConfig, VoiceActivityDetector};
