//! Codec-Schnittstelle und Implementierungen
//!
//! Der Sprach-Codec ist fuer die Pipelines eine undurchsichtige
//! Encode/Decode-Faehigkeit mit fester Frame-Groesse. Zwei Implementierungen:
//!
//! - `OpusCodec` – kapselt audiopus (i16-PCM)
//! - `PcmCodec` – reicht rohe PCM-Bytes durch (Loopback, Tests, Debugging)

use std::sync::Arc;

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AudioError, AudioResult};
use crate::format::{pcm_from_bytes, pcm_to_bytes, AudioFormat};

/// Maximale Groesse eines Opus-Pakets (laut Opus-Dokumentation)
const MAX_OPUS_PACKET: usize = 4000;

/// Von Opus akzeptierter Bitraten-Bereich
const MIN_BITRATE: i32 = 6_000;
const MAX_BITRATE: i32 = 510_000;

/// Auswahl des Codecs
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    #[default]
    Opus,
    Pcm,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Kodiert genau einen Codec-Frame
pub trait VoiceEncoder: Send {
    /// `pcm` muss exakt `AudioFormat::samples_per_frame` Samples enthalten
    fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>>;
}

/// Dekodiert ein Codec-Paket zu PCM-Samples
pub trait VoiceDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> AudioResult<Vec<i16>>;
}

/// Erzeugt Encoder und Decoder fuer ein festes Audio-Format
pub trait CodecFactory: Send + Sync {
    fn kind(&self) -> CodecKind;
    fn format(&self) -> AudioFormat;
    fn encoder(&self, bitrate: i32) -> AudioResult<Box<dyn VoiceEncoder>>;
    fn decoder(&self) -> AudioResult<Box<dyn VoiceDecoder>>;
}

/// Liefert die Factory fuer den gewaehlten Codec
pub fn codec_factory(kind: CodecKind, format: AudioFormat) -> AudioResult<Arc<dyn CodecFactory>> {
    format.validieren()?;
    Ok(match kind {
        CodecKind::Opus => Arc::new(OpusCodec::new(format)),
        CodecKind::Pcm => Arc::new(PcmCodec::new(format)),
    })
}

fn check_frame_len(pcm: &[i16], expected: usize) -> AudioResult<()> {
    if pcm.len() != expected {
        return Err(AudioError::Config(format!(
            "PCM-Frame muss {} Samples lang sein, war {}",
            expected,
            pcm.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Opus
// ---------------------------------------------------------------------------

/// Opus ueber audiopus
#[derive(Debug, Clone, Copy)]
pub struct OpusCodec {
    format: AudioFormat,
}

impl OpusCodec {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl CodecFactory for OpusCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Opus
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn encoder(&self, bitrate: i32) -> AudioResult<Box<dyn VoiceEncoder>> {
        Ok(Box::new(OpusVoiceEncoder::new(self.format, bitrate)?))
    }

    fn decoder(&self) -> AudioResult<Box<dyn VoiceDecoder>> {
        Ok(Box::new(OpusVoiceDecoder::new(self.format)?))
    }
}

/// Opus-Encoder: kodiert i16-PCM zu Opus-Bytes
pub struct OpusVoiceEncoder {
    encoder: Encoder,
    frame_samples: usize,
    output: Vec<u8>,
}

impl OpusVoiceEncoder {
    pub fn new(format: AudioFormat, bitrate: i32) -> AudioResult<Self> {
        let mut encoder = Encoder::new(
            to_audiopus_rate(format.sample_rate)?,
            to_audiopus_channels(format.channels),
            Application::Voip,
        )
        .map_err(|e| AudioError::Codec(e.to_string()))?;

        let effective = bitrate.clamp(MIN_BITRATE, MAX_BITRATE);
        if effective != bitrate {
            warn!(
                angefordert = bitrate,
                verwendet = effective,
                "Bitrate ausserhalb des Opus-Bereichs"
            );
        }
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(effective))
            .map_err(|e| AudioError::Codec(e.to_string()))?;

        debug!(
            bitrate = effective,
            frame_samples = format.samples_per_frame(),
            "Opus-Encoder erstellt"
        );

        Ok(Self {
            encoder,
            frame_samples: format.samples_per_frame(),
            output: vec![0u8; MAX_OPUS_PACKET],
        })
    }
}

impl VoiceEncoder for OpusVoiceEncoder {
    fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>> {
        check_frame_len(pcm, self.frame_samples)?;
        let written = self
            .encoder
            .encode(pcm, &mut self.output)
            .map_err(|e| AudioError::Codec(e.to_string()))?;
        Ok(self.output[..written].to_vec())
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu i16-PCM
pub struct OpusVoiceDecoder {
    decoder: Decoder,
    channels: usize,
    max_samples: usize,
}

impl OpusVoiceDecoder {
    pub fn new(format: AudioFormat) -> AudioResult<Self> {
        let decoder = Decoder::new(
            to_audiopus_rate(format.sample_rate)?,
            to_audiopus_channels(format.channels),
        )
        .map_err(|e| AudioError::Codec(e.to_string()))?;

        // Opus-Pakete koennen bis zu 120 ms enthalten
        let max_samples = format.sample_rate as usize * 120 / 1000 * format.channels as usize;

        Ok(Self {
            decoder,
            channels: format.channels as usize,
            max_samples,
        })
    }
}

impl VoiceDecoder for OpusVoiceDecoder {
    fn decode(&mut self, data: &[u8]) -> AudioResult<Vec<i16>> {
        if data.is_empty() {
            return Err(AudioError::Codec("Leeres Opus-Paket".into()));
        }
        let mut output = vec![0i16; self.max_samples];
        let decoded = self
            .decoder
            .decode(Some(data), &mut output, false)
            .map_err(|e| AudioError::Codec(e.to_string()))?;
        output.truncate(decoded * self.channels);
        Ok(output)
    }
}

fn to_audiopus_rate(rate: u32) -> AudioResult<SampleRate> {
    match rate {
        8_000 => Ok(SampleRate::Hz8000),
        12_000 => Ok(SampleRate::Hz12000),
        16_000 => Ok(SampleRate::Hz16000),
        24_000 => Ok(SampleRate::Hz24000),
        48_000 => Ok(SampleRate::Hz48000),
        other => Err(AudioError::Config(format!(
            "Abtastrate {other} Hz wird von Opus nicht unterstuetzt"
        ))),
    }
}

fn to_audiopus_channels(channels: u16) -> Channels {
    if channels >= 2 {
        Channels::Stereo
    } else {
        Channels::Mono
    }
}

// ---------------------------------------------------------------------------
// PCM-Passthrough
// ---------------------------------------------------------------------------

/// Reicht PCM unveraendert durch (i16 LE)
#[derive(Debug, Clone, Copy)]
pub struct PcmCodec {
    format: AudioFormat,
}

impl PcmCodec {
    pub fn new(format: AudioFormat) -> Self {
        Self { format }
    }
}

impl CodecFactory for PcmCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Pcm
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn encoder(&self, _bitrate: i32) -> AudioResult<Box<dyn VoiceEncoder>> {
        Ok(Box::new(PcmPassthrough {
            frame_samples: self.format.samples_per_frame(),
        }))
    }

    fn decoder(&self) -> AudioResult<Box<dyn VoiceDecoder>> {
        Ok(Box::new(PcmPassthrough {
            frame_samples: self.format.samples_per_frame(),
        }))
    }
}

struct PcmPassthrough {
    frame_samples: usize,
}

impl VoiceEncoder for PcmPassthrough {
    fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>> {
        check_frame_len(pcm, self.frame_samples)?;
        Ok(pcm_to_bytes(pcm))
    }
}

impl VoiceDecoder for PcmPassthrough {
    fn decode(&mut self, data: &[u8]) -> AudioResult<Vec<i16>> {
        Ok(pcm_from_bytes(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sinus(samples: usize) -> Vec<i16> {
        (0..samples)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect()
    }

    #[test]
    fn pcm_codec_reicht_durch() {
        let codec = codec_factory(CodecKind::Pcm, AudioFormat::VOICE).unwrap();
        let mut enc = codec.encoder(24_000).unwrap();
        let mut dec = codec.decoder().unwrap();

        let pcm = sinus(960);
        let bytes = enc.encode(&pcm).unwrap();
        assert_eq!(bytes.len(), 1920);
        assert_eq!(dec.decode(&bytes).unwrap(), pcm);
    }

    #[test]
    fn pcm_codec_falsche_frame_groesse() {
        let codec = PcmCodec::new(AudioFormat::VOICE);
        let mut enc = codec.encoder(24_000).unwrap();
        assert!(enc.encode(&[0i16; 100]).is_err());
    }

    #[test]
    fn opus_encoder_decoder() {
        let codec = codec_factory(CodecKind::Opus, AudioFormat::VOICE).unwrap();
        let mut enc = codec.encoder(24_000).unwrap();
        let mut dec = codec.decoder().unwrap();

        let encoded = enc.encode(&sinus(960)).expect("Encoding sollte funktionieren");
        assert!(!encoded.is_empty());
        assert!(encoded.len() < 1920);

        let decoded = dec.decode(&encoded).expect("Decoding sollte funktionieren");
        assert_eq!(decoded.len(), 960);
    }

    #[test]
    fn opus_bitrate_wird_begrenzt() {
        // Ausserhalb des gueltigen Bereichs, darf trotzdem nicht scheitern
        assert!(OpusVoiceEncoder::new(AudioFormat::VOICE, 1).is_ok());
        assert!(OpusVoiceEncoder::new(AudioFormat::VOICE, i32::MAX).is_ok());
    }

    #[test]
    fn opus_leeres_paket_ist_fehler() {
        let mut dec = OpusVoiceDecoder::new(AudioFormat::VOICE).unwrap();
        assert!(dec.decode(&[]).is_err());
    }

    #[test]
    fn factory_lehnt_ungueltiges_format_ab() {
        let format = AudioFormat {
            sample_rate: 44_100,
            ..AudioFormat::VOICE
        };
        assert!(codec_factory(CodecKind::Opus, format).is_err());
    }
}
