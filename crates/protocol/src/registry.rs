//! Paket-Registry – Typ-ID -> Lesefunktion
//!
//! Die Registry ist offen fuer Erweiterungen: `register` fuegt neue Typen
//! hinzu, ohne bestehende Eintraege anzufassen.

use std::collections::HashMap;
use std::sync::Arc;

use chorus_core::{ChannelId, ClientId};

use crate::error::ProtocolResult;
use crate::field::FieldReader;
use crate::packet::{ids, Packet};

/// Lesefunktion fuer einen Pakettyp (liest nur die Felder, ohne Typ-ID)
pub type PacketReader = Arc<dyn Fn(&mut FieldReader<'_>) -> ProtocolResult<Packet> + Send + Sync>;

/// Abbildung Typ-ID -> Lesefunktion
#[derive(Clone, Default)]
pub struct PacketRegistry {
    readers: HashMap<u16, PacketReader>,
}

impl std::fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&u16> = self.readers.keys().collect();
        ids.sort_unstable();
        f.debug_struct("PacketRegistry").field("ids", &ids).finish()
    }
}

impl PacketRegistry {
    /// Leere Registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry mit allen Standard-Paketen des Protokolls
    pub fn standard() -> Self {
        let mut reg = Self::new();

        reg.register(ids::CLIENT_CONNECTED, |r| {
            Ok(Packet::ClientConnected {
                client_id: ClientId(r.read_string()?),
            })
        });
        reg.register(ids::DISCONNECT, |r| {
            Ok(Packet::Disconnect {
                reason: r.read_string()?,
            })
        });
        reg.register(ids::CHANNEL_ADDED, |r| {
            Ok(Packet::ChannelAdded {
                channel_id: ChannelId(r.read_string()?),
                name: r.read_string()?,
                bitrate: r.read_i32()?,
                clients: r.read_string_list()?,
            })
        });
        reg.register(ids::CHANNEL_USER_CONNECTED, |r| {
            Ok(Packet::ChannelUserConnected {
                channel_id: ChannelId(r.read_string()?),
                username: r.read_string()?,
            })
        });
        reg.register(ids::CHANNEL_USER_DISCONNECTED, |r| {
            Ok(Packet::ChannelUserDisconnected {
                channel_id: ChannelId(r.read_string()?),
                username: r.read_string()?,
            })
        });
        reg.register(ids::VOICE_ESTABLISH, |_| Ok(Packet::VoiceEstablish));
        reg.register(ids::VOICE_ESTABLISH_RESPONSE, |r| {
            Ok(Packet::VoiceEstablishResponse {
                allowed: r.read_bool()?,
            })
        });
        reg.register(ids::REQUEST_CHANNEL_JOIN, |r| {
            Ok(Packet::RequestChannelJoin {
                channel_id: ChannelId(r.read_string()?),
            })
        });
        reg.register(ids::REQUEST_CHANNEL_JOIN_RESPONSE, |r| {
            Ok(Packet::RequestChannelJoinResponse {
                allowed: r.read_bool()?,
                reason: r.read_string()?,
            })
        });
        reg.register(ids::VOICE_DATA, |r| {
            Ok(Packet::VoiceData {
                username: r.read_string()?,
                payload: r.read_bytes()?,
            })
        });
        reg.register(ids::VOICE_DATA_MULTICAST, |r| {
            Ok(Packet::VoiceDataMulticast {
                username: r.read_string()?,
                payload: r.read_bytes()?,
            })
        });
        reg.register(ids::UDP_DISCONNECT, |r| {
            Ok(Packet::UdpDisconnect {
                username: r.read_string()?,
            })
        });
        reg.register(ids::CLIENT_HELLO, |r| {
            Ok(Packet::ClientHello {
                username: r.read_string()?,
            })
        });
        reg.register(ids::VOICE_CONNECT, |r| {
            Ok(Packet::VoiceConnect {
                client_id: ClientId(r.read_string()?),
            })
        });
        reg.register(ids::VOICE_CONNECT_ACK, |_| Ok(Packet::VoiceConnectAck));

        reg
    }

    /// Registriert eine Lesefunktion fuer eine Typ-ID
    ///
    /// Gibt false zurueck (und laesst den Eintrag unveraendert), wenn die ID
    /// bereits belegt ist.
    pub fn register<F>(&mut self, id: u16, reader: F) -> bool
    where
        F: Fn(&mut FieldReader<'_>) -> ProtocolResult<Packet> + Send + Sync + 'static,
    {
        if self.readers.contains_key(&id) {
            return false;
        }
        self.readers.insert(id, Arc::new(reader));
        true
    }

    /// Registriert eine ID deren Inhalt unverarbeitet als `Packet::Extension`
    /// durchgereicht wird
    pub fn register_opaque(&mut self, id: u16) -> bool {
        self.register(id, move |r| {
            Ok(Packet::Extension {
                id,
                body: bytes::Bytes::copy_from_slice(r.rest()),
            })
        })
    }

    pub fn get(&self, id: u16) -> Option<&PacketReader> {
        self.readers.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.readers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}
