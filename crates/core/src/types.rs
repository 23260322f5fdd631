//! Gemeinsame Identifikationstypen fuer Chorus
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Kanal-ID und Korrelations-ID zur Compilezeit auszuschliessen.
//! Beide werden vom Server vergeben, der Client erzeugt nie eigene.

use serde::{Deserialize, Serialize};

/// Kanal-ID wie vom Server im `ChannelAdded`-Paket vergeben
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Korrelations-ID der Control-Session
///
/// Wird genau einmal beim Uebergang Connecting -> Connected gesetzt und
/// bindet die UDP-Verbindung an die TCP-Session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client:{}", self.0)
    }
}

/// Lebenszyklus einer Verbindung (Control oder Voice)
///
/// ```text
/// Idle -> Connecting -> Connected -> Disconnecting -> Disconnected
///              |                                           ^
///              +-------------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    /// Gibt true zurueck solange die Verbindung nutzbar ist
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Gibt true zurueck wenn der Abbau begonnen hat oder abgeschlossen ist
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnecting | Self::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_display() {
        let id = ChannelId::from("c1");
        assert_eq!(id.to_string(), "channel:c1");
        assert_eq!(id.as_str(), "c1");
    }

    #[test]
    fn client_id_display() {
        let id = ClientId::new("abc");
        assert!(id.to_string().starts_with("client:"));
    }

    #[test]
    fn connection_state_default_idle() {
        let state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Idle);
        assert!(!state.is_connected());
        assert!(!state.is_terminal());
    }

    #[test]
    fn connection_state_terminal() {
        assert!(ConnectionState::Disconnecting.is_terminal());
        assert!(ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
    }
}
