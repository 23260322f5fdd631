//! Paket-Definitionen
//!
//! Jedes Paket beginnt auf der Leitung mit seiner u16-Typ-ID, danach folgen
//! die Felder in Deklarationsreihenfolge (siehe `field`).
//!
//! Neue Pakettypen brauchen eine ID in `ids`, eine Variante hier und einen
//! Eintrag in `PacketRegistry::standard`. Bestehende Varianten bleiben dabei
//! unveraendert. Fuer Erweiterungen ohne eigene Variante gibt es
//! `Packet::Extension`.

use bytes::Bytes;
use chorus_core::{ChannelId, ClientId};

use crate::error::ProtocolResult;
use crate::field::FieldWriter;

/// Typ-IDs aller Standard-Pakete
pub mod ids {
    pub const CLIENT_CONNECTED: u16 = 1;
    pub const DISCONNECT: u16 = 2;
    pub const CHANNEL_ADDED: u16 = 3;
    pub const CHANNEL_USER_CONNECTED: u16 = 4;
    pub const CHANNEL_USER_DISCONNECTED: u16 = 5;
    pub const VOICE_ESTABLISH: u16 = 6;
    pub const VOICE_ESTABLISH_RESPONSE: u16 = 7;
    pub const REQUEST_CHANNEL_JOIN: u16 = 8;
    pub const REQUEST_CHANNEL_JOIN_RESPONSE: u16 = 9;
    pub const VOICE_DATA: u16 = 10;
    pub const VOICE_DATA_MULTICAST: u16 = 11;
    pub const UDP_DISCONNECT: u16 = 12;
    pub const CLIENT_HELLO: u16 = 13;
    pub const VOICE_CONNECT: u16 = 14;
    pub const VOICE_CONNECT_ACK: u16 = 15;

    /// IDs mit eigener `Packet`-Variante, fuer `Extension` gesperrt
    pub fn is_standard(id: u16) -> bool {
        (CLIENT_CONNECTED..=VOICE_CONNECT_ACK).contains(&id)
    }
}

/// Alle Pakete des Chorus-Protokolls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    // -----------------------------------------------------------------------
    // Control-Ebene (TCP)
    // -----------------------------------------------------------------------
    /// Server vergibt die Korrelations-ID der Session
    ClientConnected { client_id: ClientId },
    /// Server beendet die Session
    Disconnect { reason: String },
    ChannelAdded {
        channel_id: ChannelId,
        name: String,
        bitrate: i32,
        clients: Vec<String>,
    },
    ChannelUserConnected {
        channel_id: ChannelId,
        username: String,
    },
    ChannelUserDisconnected {
        channel_id: ChannelId,
        username: String,
    },
    /// Anfrage nach Sprech-Erlaubnis im aktuellen Kanal
    VoiceEstablish,
    VoiceEstablishResponse { allowed: bool },
    RequestChannelJoin { channel_id: ChannelId },
    RequestChannelJoinResponse { allowed: bool, reason: String },
    /// Erstes Paket des Clients, kuendigt den Benutzernamen an
    ClientHello { username: String },

    // -----------------------------------------------------------------------
    // Voice-Ebene (UDP)
    // -----------------------------------------------------------------------
    /// Client -> Server
    VoiceData { username: String, payload: Bytes },
    /// Server -> Client (Verteilung an alle Kanal-Mitglieder)
    VoiceDataMulticast { username: String, payload: Bytes },
    UdpDisconnect { username: String },
    /// Bereitschafts-Probe, wird bis zur Bestaetigung wiederholt
    VoiceConnect { client_id: ClientId },
    VoiceConnectAck,

    /// Pakettyp ausserhalb des Standard-Katalogs, Inhalt unverarbeitet
    Extension { id: u16, body: Bytes },
}

impl Packet {
    /// Typ-ID dieses Pakets auf der Leitung
    pub fn id(&self) -> u16 {
        match self {
            Self::ClientConnected { .. } => ids::CLIENT_CONNECTED,
            Self::Disconnect { .. } => ids::DISCONNECT,
            Self::ChannelAdded { .. } => ids::CHANNEL_ADDED,
            Self::ChannelUserConnected { .. } => ids::CHANNEL_USER_CONNECTED,
            Self::ChannelUserDisconnected { .. } => ids::CHANNEL_USER_DISCONNECTED,
            Self::VoiceEstablish => ids::VOICE_ESTABLISH,
            Self::VoiceEstablishResponse { .. } => ids::VOICE_ESTABLISH_RESPONSE,
            Self::RequestChannelJoin { .. } => ids::REQUEST_CHANNEL_JOIN,
            Self::RequestChannelJoinResponse { .. } => ids::REQUEST_CHANNEL_JOIN_RESPONSE,
            Self::ClientHello { .. } => ids::CLIENT_HELLO,
            Self::VoiceData { .. } => ids::VOICE_DATA,
            Self::VoiceDataMulticast { .. } => ids::VOICE_DATA_MULTICAST,
            Self::UdpDisconnect { .. } => ids::UDP_DISCONNECT,
            Self::VoiceConnect { .. } => ids::VOICE_CONNECT,
            Self::VoiceConnectAck => ids::VOICE_CONNECT_ACK,
            Self::Extension { id, .. } => *id,
        }
    }

    /// Kurzname fuer Logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientConnected { .. } => "ClientConnected",
            Self::Disconnect { .. } => "Disconnect",
            Self::ChannelAdded { .. } => "ChannelAdded",
            Self::ChannelUserConnected { .. } => "ChannelUserConnected",
            Self::ChannelUserDisconnected { .. } => "ChannelUserDisconnected",
            Self::VoiceEstablish => "VoiceEstablish",
            Self::VoiceEstablishResponse { .. } => "VoiceEstablishResponse",
            Self::RequestChannelJoin { .. } => "RequestChannelJoin",
            Self::RequestChannelJoinResponse { .. } => "RequestChannelJoinResponse",
            Self::ClientHello { .. } => "ClientHello",
            Self::VoiceData { .. } => "VoiceData",
            Self::VoiceDataMulticast { .. } => "VoiceDataMulticast",
            Self::UdpDisconnect { .. } => "UdpDisconnect",
            Self::VoiceConnect { .. } => "VoiceConnect",
            Self::VoiceConnectAck => "VoiceConnectAck",
            Self::Extension { .. } => "Extension",
        }
    }

    /// Gibt true zurueck fuer Pakete die ueber UDP laufen
    pub fn is_voice_plane(&self) -> bool {
        matches!(
            self,
            Self::VoiceData { .. }
                | Self::VoiceDataMulticast { .. }
                | Self::UdpDisconnect { .. }
                | Self::VoiceConnect { .. }
                | Self::VoiceConnectAck
        )
    }

    /// Schreibt die Felder (ohne Typ-ID) in den Writer
    pub(crate) fn write_fields(&self, w: &mut FieldWriter) -> ProtocolResult<()> {
        match self {
            Self::ClientConnected { client_id } => w.put_string(client_id.as_str())?,
            Self::Disconnect { reason } => w.put_string(reason)?,
            Self::ChannelAdded {
                channel_id,
                name,
                bitrate,
                clients,
            } => {
                w.put_string(channel_id.as_str())?;
                w.put_string(name)?;
                w.put_i32(*bitrate);
                w.put_string_list(clients)?;
            }
            Self::ChannelUserConnected {
                channel_id,
                username,
            }
            | Self::ChannelUserDisconnected {
                channel_id,
                username,
            } => {
                w.put_string(channel_id.as_str())?;
                w.put_string(username)?;
            }
            Self::VoiceEstablish | Self::VoiceConnectAck => {}
            Self::VoiceEstablishResponse { allowed } => w.put_bool(*allowed),
            Self::RequestChannelJoin { channel_id } => w.put_string(channel_id.as_str())?,
            Self::RequestChannelJoinResponse { allowed, reason } => {
                w.put_bool(*allowed);
                w.put_string(reason)?;
            }
            Self::ClientHello { username } | Self::UdpDisconnect { username } => {
                w.put_string(username)?
            }
            Self::VoiceData { username, payload }
            | Self::VoiceDataMulticast { username, payload } => {
                w.put_string(username)?;
                w.put_bytes(payload)?;
            }
            Self::VoiceConnect { client_id } => w.put_string(client_id.as_str())?,
            Self::Extension { body, .. } => w.put_raw(body),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_sind_eindeutig() {
        let pakete = [
            Packet::ClientConnected {
                client_id: ClientId::new("x"),
            },
            Packet::Disconnect { reason: "".into() },
            Packet::ChannelAdded {
                channel_id: "c".into(),
                name: "".into(),
                bitrate: 0,
                clients: vec![],
            },
            Packet::ChannelUserConnected {
                channel_id: "c".into(),
                username: "".into(),
            },
            Packet::ChannelUserDisconnected {
                channel_id: "c".into(),
                username: "".into(),
            },
            Packet::VoiceEstablish,
            Packet::VoiceEstablishResponse { allowed: true },
            Packet::RequestChannelJoin {
                channel_id: "c".into(),
            },
            Packet::RequestChannelJoinResponse {
                allowed: false,
                reason: "".into(),
            },
            Packet::VoiceData {
                username: "".into(),
                payload: Bytes::new(),
            },
            Packet::VoiceDataMulticast {
                username: "".into(),
                payload: Bytes::new(),
            },
            Packet::UdpDisconnect {
                username: "".into(),
            },
            Packet::ClientHello {
                username: "".into(),
            },
            Packet::VoiceConnect {
                client_id: ClientId::new("x"),
            },
            Packet::VoiceConnectAck,
        ];
        let mut ids: Vec<u16> = pakete.iter().map(Packet::id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, (1..=15).collect::<Vec<u16>>());
    }

    #[test]
    fn voice_ebene_erkennung() {
        assert!(Packet::VoiceConnectAck.is_voice_plane());
        assert!(!Packet::VoiceEstablish.is_voice_plane());
    }
}
