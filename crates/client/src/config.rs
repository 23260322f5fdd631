//! Client-Konfiguration
//!
//! Wird von der Praesentationsschicht erzeugt oder aus einer TOML-Datei
//! geladen und explizit an Orchestrator und Pipelines uebergeben. Alle Felder
//! haben Standardwerte, eine leere Datei ist gueltig (nur der Benutzername
//! muss vor dem Verbinden gesetzt sein).

use std::time::Duration;

use chorus_audio::{CodecKind, PayloadMode, VadConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximale Laenge des Benutzernamens in Bytes
pub const MAX_USERNAME_LEN: usize = 64;

/// Vollstaendige Client-Konfiguration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user: UserEinstellungen,
    pub audio: AudioEinstellungen,
    pub network: NetzwerkEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// Lokale Identitaet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserEinstellungen {
    pub username: String,
}

/// Audio-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Index des Eingabegeraets (leer = Standardgeraet)
    pub input_device: Option<usize>,
    /// Index des Ausgabegeraets (leer = Standardgeraet)
    pub output_device: Option<usize>,
    /// Sprach-Erkennung aktiv; sonst wird jeder Frame gesendet
    pub use_vad: bool,
    /// Schwelle fuer Spitzen- und Energie-Detektor
    pub vad_threshold: f32,
    /// Eigene Schwelle nur fuer den Energie-Detektor
    pub vad_energy_threshold: Option<f32>,
    pub codec: CodecKind,
    pub payload: PayloadMode,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            use_vad: true,
            vad_threshold: 0.02,
            vad_energy_threshold: None,
            codec: CodecKind::Opus,
            payload: PayloadMode::Encoded,
        }
    }
}

impl AudioEinstellungen {
    /// VAD-Konfiguration fuer die Capture-Pipeline
    pub fn vad(&self) -> VadConfig {
        if !self.use_vad {
            return VadConfig::disabled();
        }
        let mut vad = VadConfig::with_threshold(self.vad_threshold);
        if let Some(energy) = self.vad_energy_threshold {
            vad.energy_threshold = energy;
        }
        vad
    }
}

/// Netzwerk-Einstellungen (Zeiten in Millisekunden)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// UDP-Port des Servers (leer = gleicher Port wie TCP)
    pub voice_port: Option<u16>,
    /// Wartezeit auf `ClientConnected`
    pub handshake_timeout_ms: u64,
    /// Wartezeit auf `VoiceConnectAck`
    pub voice_ready_timeout_ms: u64,
    /// Abstand zwischen zwei `VoiceConnect`-Proben
    pub voice_retry_interval_ms: u64,
    /// Wartezeit auf `VoiceEstablishResponse`
    pub voice_establish_timeout_ms: u64,
    /// Maximale Frame-Groesse der Control-Verbindung in Bytes
    pub max_frame_size: usize,
    /// Nach dieser Zeit ohne Voice-Daten gilt ein Sprecher als still
    pub speaking_timeout_ms: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            voice_port: None,
            handshake_timeout_ms: 5000,
            voice_ready_timeout_ms: 5000,
            voice_retry_interval_ms: 100,
            voice_establish_timeout_ms: 5000,
            max_frame_size: chorus_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
            speaking_timeout_ms: 500,
        }
    }
}

impl NetzwerkEinstellungen {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn voice_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.voice_ready_timeout_ms)
    }

    pub fn voice_retry_interval(&self) -> Duration {
        Duration::from_millis(self.voice_retry_interval_ms)
    }

    pub fn voice_establish_timeout(&self) -> Duration {
        Duration::from_millis(self.voice_establish_timeout_ms)
    }

    pub fn speaking_timeout(&self) -> Duration {
        Duration::from_millis(self.speaking_timeout_ms)
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Level oder EnvFilter-Direktive, z.B. "info" oder "info,chorus_client=debug"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ClientConfig {
    /// Liest die Konfiguration aus einem TOML-String
    pub fn from_toml_str(inhalt: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(inhalt)?)
    }

    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::from_toml_str(&inhalt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(quelle) => Err(ConfigError::Lesen {
                pfad: pfad.to_string(),
                quelle,
            }),
        }
    }

    /// Prueft alle Werte, die fuer einen Verbindungsaufbau gelten muessen
    pub fn validieren(&self) -> Result<(), ConfigError> {
        username_pruefen(&self.user.username)?;
        self.werte_pruefen()
    }

    /// Wie `validieren`, aber ein leerer Benutzername ist erlaubt.
    /// Der Name wird erst beim Verbindungsaufbau verlangt.
    pub fn werte_pruefen(&self) -> Result<(), ConfigError> {
        schwelle_pruefen("audio.vad_threshold", self.audio.vad_threshold)?;
        if let Some(energy) = self.audio.vad_energy_threshold {
            schwelle_pruefen("audio.vad_energy_threshold", energy)?;
        }

        let n = &self.network;
        for (feld, wert) in [
            ("network.handshake_timeout_ms", n.handshake_timeout_ms),
            ("network.voice_ready_timeout_ms", n.voice_ready_timeout_ms),
            ("network.voice_retry_interval_ms", n.voice_retry_interval_ms),
            ("network.voice_establish_timeout_ms", n.voice_establish_timeout_ms),
            ("network.speaking_timeout_ms", n.speaking_timeout_ms),
        ] {
            if wert == 0 {
                return Err(ConfigError::Ungueltig {
                    feld,
                    grund: "darf nicht 0 sein".into(),
                });
            }
        }
        if n.max_frame_size == 0 {
            return Err(ConfigError::Ungueltig {
                feld: "network.max_frame_size",
                grund: "darf nicht 0 sein".into(),
            });
        }

        crate::logging::level_pruefen(&self.logging.level).map_err(|grund| {
            ConfigError::Ungueltig {
                feld: "logging.level",
                grund,
            }
        })?;
        self.logging
            .format
            .parse::<crate::logging::LogFormat>()
            .map_err(|grund| ConfigError::Ungueltig {
                feld: "logging.format",
                grund,
            })?;
        Ok(())
    }

    /// UDP-Port fuer einen gegebenen TCP-Port
    pub fn voice_port(&self, control_port: u16) -> u16 {
        self.network.voice_port.unwrap_or(control_port)
    }
}

/// Prueft einen Benutzernamen (nicht leer, hoechstens 64 Bytes)
pub fn username_pruefen(username: &str) -> Result<(), ConfigError> {
    if username.trim().is_empty() {
        return Err(ConfigError::Ungueltig {
            feld: "user.username",
            grund: "darf nicht leer sein".into(),
        });
    }
    if username.len() > MAX_USERNAME_LEN {
        return Err(ConfigError::Ungueltig {
            feld: "user.username",
            grund: format!("laenger als {MAX_USERNAME_LEN} Bytes"),
        });
    }
    Ok(())
}

fn schwelle_pruefen(feld: &'static str, wert: f32) -> Result<(), ConfigError> {
    if wert > 0.0 && wert <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Ungueltig {
            feld,
            grund: format!("{wert} liegt nicht in (0, 1]"),
        })
    }
}
