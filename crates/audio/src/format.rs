//! Audio-Format der Voice-Pipelines
//!
//! Das Format ist fuer die gesamte Lebensdauer einer Session fest:
//! 48 kHz, Mono, 16 Bit signed little-endian, 20 ms pro Codec-Frame.
//! Daraus ergibt sich die Segmentgroesse fuer die Capture-Pipeline:
//!
//! ```text
//! 48000 Hz * 20 ms / 1000 * 1 Kanal = 960 Samples = 1920 Bytes
//! ```

use crate::error::{AudioError, AudioResult};

/// Abtastrate in Hz
pub const SAMPLE_RATE: u32 = 48_000;
/// Kanalanzahl (Mono)
pub const CHANNELS: u16 = 1;
/// Bytes pro Sample (i16)
pub const BYTES_PER_SAMPLE: usize = 2;
/// Dauer eines Codec-Frames in Millisekunden
pub const FRAME_DURATION_MS: u32 = 20;

/// Beschreibung des PCM-Formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration_ms: u32,
}

impl AudioFormat {
    /// Standard-Format fuer Sprache
    pub const VOICE: AudioFormat = AudioFormat {
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
        frame_duration_ms: FRAME_DURATION_MS,
    };

    /// Samples pro Codec-Frame (ueber alle Kanaele)
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize / 1000)
            * self.channels as usize
    }

    /// Bytes pro Codec-Frame, also die Segmentgroesse der Capture-Pipeline
    pub fn segment_bytes(&self) -> usize {
        self.samples_per_frame() * BYTES_PER_SAMPLE
    }

    /// Prueft ob das Format vom Codec unterstuetzt wird
    pub fn validieren(&self) -> AudioResult<()> {
        if ![8_000, 12_000, 16_000, 24_000, 48_000].contains(&self.sample_rate) {
            return Err(AudioError::Config(format!(
                "Abtastrate {} Hz wird nicht unterstuetzt",
                self.sample_rate
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(AudioError::Config(format!(
                "Kanalanzahl {} wird nicht unterstuetzt",
                self.channels
            )));
        }
        if ![10, 20, 40, 60].contains(&self.frame_duration_ms) {
            return Err(AudioError::Config(format!(
                "Frame-Dauer {} ms wird nicht unterstuetzt",
                self.frame_duration_ms
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::VOICE
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

/// PCM-Bytes (i16 LE) -> Samples. Ein ueberzaehliges Einzelbyte wird ignoriert.
pub fn pcm_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

/// Samples -> PCM-Bytes (i16 LE)
pub fn pcm_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Normalisiert ein Sample auf -1.0..1.0
pub fn normalize(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// f32 (-1.0..1.0) -> i16 mit Begrenzung
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
