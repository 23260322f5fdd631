//! Fehlertypen fuer das Paketformat

use thiserror::Error;

/// Alle Fehler beim Kodieren und Dekodieren von Paketen
///
/// Gilt immer nur fuer den einzelnen Dekodier-Versuch. Wie darauf reagiert
/// wird (Verbindung trennen oder Datagramm verwerfen) entscheidet der Transport.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unbekannte Paket-ID: {0}")]
    UnknownId(u16),

    #[error("Paket unvollstaendig: {needed} Bytes benoetigt, {available} vorhanden")]
    Truncated { needed: usize, available: usize },

    #[error("Ungueltiges Paket: {0}")]
    Malformed(String),

    #[error("Frame zu gross: {size} Bytes (Maximum: {max} Bytes)")]
    FrameTooLarge { size: usize, max: usize },

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Gibt true zurueck wenn der Fehler aus dem Paketinhalt stammt
    /// (und nicht aus dem darunterliegenden Transport)
    pub fn is_decode_error(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
