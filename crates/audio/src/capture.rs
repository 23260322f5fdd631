//! AudioCapturePipeline – Mikrofon -> VAD -> Segmente -> Codec -> Sende-Queue
//!
//! ```text
//! Geraete-Frame (PCM i16 LE)
//!     -> gemutet? verwerfen
//!     -> VAD (Spitze ODER Energie), inaktiv: speaking=false, verwerfen
//!     -> Rest + Frame in volle Segmente zerlegen
//!     -> je Segment: encode (im PCM-Modus zusaetzlich wieder decode)
//!     -> VoiceFrame in die Sende-Queue, speaking=true
//! ```
//!
//! Die Sende-Queue wird von einem eigenen Pump (`pump::Pump`) geleert, so
//! bleibt das Timing des Geraets vom Netzwerk entkoppelt.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::codec::{CodecFactory, VoiceDecoder, VoiceEncoder};
use crate::device::{self, AudioBackend, DeviceHandle};
use crate::error::AudioResult;
use crate::format::{pcm_from_bytes, pcm_to_bytes, AudioFormat};
use crate::segment::SegmentAccumulator;
use crate::vad::{VadConfig, VoiceActivityDetector};

/// Inhalt des Voice-Payloads auf der Leitung
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// Kodierte Codec-Bytes, der Empfaenger dekodiert
    #[default]
    Encoded,
    /// Lokal kodiert und wieder dekodiert, gesendet wird PCM
    Pcm,
}

/// Ein Voice-Frame mit Absender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceFrame {
    pub username: String,
    pub payload: Bytes,
}

/// Lokaler Sprecher: liefert das Mute-Flag und nimmt das Speaking-Flag an
///
/// Wird aus dem Audio-Kontext aufgerufen, darf daher nicht blockieren.
pub trait LocalSpeaker: Send + Sync {
    fn is_muted(&self) -> bool;
    fn set_speaking(&self, speaking: bool);
}

/// Konfiguration der Capture-Pipeline
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub format: AudioFormat,
    pub vad: VadConfig,
    pub payload: PayloadMode,
    /// Ziel-Bitrate des Kanals
    pub bitrate: i32,
    /// Absender aller ausgehenden Frames
    pub username: String,
    /// Eingabegeraet (None = Standard)
    pub device: Option<usize>,
}

/// Ergebnis der Verarbeitung eines Geraete-Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Lokal gemutet, nichts passiert
    Muted,
    /// VAD hat keine Sprache erkannt
    Silent,
    /// Anzahl der in die Sende-Queue gestellten Frames (kann 0 sein)
    Queued(usize),
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Verarbeitet Geraete-Frames bis zur Sende-Queue
pub struct CapturePipeline {
    config: CaptureConfig,
    vad: VoiceActivityDetector,
    segments: SegmentAccumulator,
    encoder: Box<dyn VoiceEncoder>,
    /// Nur im PCM-Modus: dekodiert das eben Kodierte wieder
    verifier: Option<Box<dyn VoiceDecoder>>,
    speaker: Arc<dyn LocalSpeaker>,
    outbound: mpsc::UnboundedSender<VoiceFrame>,
    frames_queued: u64,
}

impl CapturePipeline {
    pub fn new(
        config: CaptureConfig,
        codecs: &dyn CodecFactory,
        speaker: Arc<dyn LocalSpeaker>,
        outbound: mpsc::UnboundedSender<VoiceFrame>,
    ) -> AudioResult<Self> {
        config.format.validieren()?;
        let encoder = codecs.encoder(config.bitrate)?;
        let verifier = match config.payload {
            PayloadMode::Pcm => Some(codecs.decoder()?),
            PayloadMode::Encoded => None,
        };

        Ok(Self {
            vad: VoiceActivityDetector::new(config.vad),
            segments: SegmentAccumulator::new(config.format.segment_bytes()),
            config,
            encoder,
            verifier,
            speaker,
            outbound,
            frames_queued: 0,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Anzahl bisher in die Sende-Queue gestellter Frames
    pub fn frames_queued(&self) -> u64 {
        self.frames_queued
    }

    /// Verarbeitet einen Frame vom Eingabegeraet
    pub fn process_frame(&mut self, pcm: &[u8]) -> FrameOutcome {
        if self.speaker.is_muted() {
            return FrameOutcome::Muted;
        }

        if !self.vad.is_active(&pcm_from_bytes(pcm)) {
            self.speaker.set_speaking(false);
            return FrameOutcome::Silent;
        }

        let mut queued = 0;
        for segment in self.segments.push(pcm) {
            let payload = match self.encode_segment(&segment) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Segment konnte nicht kodiert werden: {}", e);
                    continue;
                }
            };

            let frame = VoiceFrame {
                username: self.config.username.clone(),
                payload: Bytes::from(payload),
            };
            if self.outbound.send(frame).is_err() {
                trace!("Sende-Queue geschlossen, Segment verworfen");
                continue;
            }
            queued += 1;
            self.frames_queued += 1;
            self.speaker.set_speaking(true);
        }

        FrameOutcome::Queued(queued)
    }

    fn encode_segment(&mut self, segment: &[u8]) -> AudioResult<Vec<u8>> {
        let encoded = self.encoder.encode(&pcm_from_bytes(segment))?;
        match self.verifier.as_mut() {
            Some(decoder) => Ok(pcm_to_bytes(&decoder.decode(&encoded)?)),
            None => Ok(encoded),
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

/// Laufende Aufnahme: Eingabegeraet + Pipeline
///
/// Wird die Session gestoppt oder gedroppt, endet die Aufnahme und
/// Encoder/Decoder werden freigegeben.
pub struct CaptureSession {
    device: Option<Box<dyn DeviceHandle>>,
    speaker: Arc<dyn LocalSpeaker>,
}

impl CaptureSession {
    /// Oeffnet das Eingabegeraet und verbindet es mit der Pipeline
    pub fn start(backend: &dyn AudioBackend, mut pipeline: CapturePipeline) -> AudioResult<Self> {
        let format = pipeline.config.format;
        let device = pipeline.config.device;
        let bitrate = pipeline.config.bitrate;
        let speaker = Arc::clone(&pipeline.speaker);

        let handle = backend.open_capture(
            device,
            format,
            Box::new(move |pcm| {
                pipeline.process_frame(pcm);
            }),
            Box::new(|err| warn!("Capture-Geraet meldet Fehler: {}", err)),
        )?;

        info!(?device, bitrate, "Aufnahme gestartet");
        Ok(Self {
            device: Some(handle),
            speaker,
        })
    }

    /// Wie `start`, das Oeffnen laeuft aber auf dem Blocking-Pool
    pub async fn open(backend: Arc<dyn AudioBackend>, pipeline: CapturePipeline) -> AudioResult<Self> {
        device::blocking(move || Self::start(backend.as_ref(), pipeline)).await
    }

    pub fn is_running(&self) -> bool {
        self.device.as_ref().is_some_and(|d| d.is_running())
    }

    /// Stoppt die Aufnahme ohne den aufrufenden Runtime-Worker zu blockieren
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.device.take() {
            device::stop_device(handle).await;
            self.speaker.set_speaking(false);
            debug!("Aufnahme gestoppt");
        }
    }

    /// Stoppt die Aufnahme. Mehrfacher Aufruf ist harmlos.
    pub fn stop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
            self.speaker.set_speaking(false);
            debug!("Aufnahme gestoppt");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
