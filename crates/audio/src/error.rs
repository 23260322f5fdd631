//! Fehlertypen fuer die Audio-Pipelines

use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Pipelines
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("Audio-Geraet nicht gefunden: {0}")]
    DeviceNotFound(String),

    #[error("Audio-Geraet nicht verfuegbar: {0}")]
    DeviceUnavailable(String),

    #[error("Stream-Fehler: {0}")]
    Stream(String),

    #[error("Codec-Fehler: {0}")]
    Codec(String),

    #[error("Konfigurationsfehler: {0}")]
    Config(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
