//! Fehlertypen der Session-Engine

use chorus_audio::AudioError;
use chorus_protocol::ProtocolError;
use thiserror::Error;

/// Fehler einer Verbindung (Control oder Voice)
///
/// Jeder dieser Fehler ist fuer die betroffene Verbindung endgueltig. Es gibt
/// keinen automatischen Neuversuch, eine neue Verbindung braucht einen neuen
/// `connect`-Aufruf.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Verbindung abgelehnt: {0}")]
    Refused(String),

    #[error("Verbindung getrennt: {0}")]
    Reset(String),

    #[error("Zeitueberschreitung: {0}")]
    Timeout(String),

    /// Verbindungsaufbau wurde abgebrochen (kein Fehler im eigentlichen Sinn)
    #[error("Verbindungsaufbau abgebrochen")]
    Cancelled,

    #[error("Nicht verbunden")]
    NotConnected,

    #[error("Protokollfehler: {0}")]
    Protocol(ProtocolError),

    #[error("IO-Fehler: {0}")]
    Io(std::io::Error),
}

impl TransportError {
    /// Abbruch ist ein normales Ergebnis, kein Fehler
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused => Self::Refused(e.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::Reset(e.to_string()),
            ErrorKind::TimedOut => Self::Timeout(e.to_string()),
            _ => Self::Io(e),
        }
    }
}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(io) => io.into(),
            other => Self::Protocol(other),
        }
    }
}

/// Fehler beim Laden oder Pruefen der Konfiguration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Konfigurationsdatei '{pfad}' nicht lesbar: {quelle}")]
    Lesen {
        pfad: String,
        quelle: std::io::Error,
    },

    #[error("Konfigurationsfehler: {0}")]
    Parsen(#[from] toml::de::Error),

    #[error("Ungueltiger Wert fuer '{feld}': {grund}")]
    Ungueltig { feld: &'static str, grund: String },
}

/// Fehler der Operationen des Orchestrators
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Audio-Fehler: {0}")]
    Audio(#[from] AudioError),

    #[error("Keine aktive Session")]
    NotConnected,
}

impl ClientError {
    /// Abbruch eines laufenden Verbindungsaufbaus
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_cancelled())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
pub type ClientResult<T> = Result<T, ClientError>;
