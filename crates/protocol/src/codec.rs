//! PacketCodec – binaeres Kodieren und Dekodieren einzelner Pakete
//!
//! Arbeitet auf genau einem Paketinhalt (Typ-ID + Felder). Framing fuer den
//! TCP-Bytestrom liegt in `wire`, der UDP-Umschlag in `envelope`.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{ProtocolError, ProtocolResult};
use crate::field::{FieldReader, FieldWriter};
use crate::packet::{ids, Packet};
use crate::registry::PacketRegistry;

/// Groesse der Typ-ID in Bytes
pub const PACKET_ID_SIZE: usize = 2;

/// Kodiert und dekodiert Pakete anhand einer gemeinsamen Registry
#[derive(Debug, Clone)]
pub struct PacketCodec {
    registry: Arc<PacketRegistry>,
}

impl PacketCodec {
    pub fn new(registry: PacketRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Codec mit allen Standard-Paketen
    pub fn standard() -> Self {
        Self::new(PacketRegistry::standard())
    }

    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }

    /// Dekodiert einen vollstaendigen Paketinhalt
    ///
    /// # Fehler
    /// - `Truncated` wenn weniger Bytes vorliegen als das Paket braucht
    /// - `UnknownId` wenn fuer die Typ-ID kein Leser registriert ist
    /// - `Malformed` bei ungueltigen Feldwerten oder ueberzaehligen Bytes
    pub fn decode(&self, data: &[u8]) -> ProtocolResult<Packet> {
        let mut reader = FieldReader::new(data);
        self.decode_from(&mut reader)
    }

    /// Dekodiert ein Paket ab der aktuellen Leseposition bis zum Ende
    pub fn decode_from(&self, reader: &mut FieldReader<'_>) -> ProtocolResult<Packet> {
        let id = reader.read_u16()?;
        let read_fields = self.registry.get(id).ok_or(ProtocolError::UnknownId(id))?;
        let packet = read_fields(reader)?;
        reader.finish()?;
        Ok(packet)
    }

    /// Kodiert ein Paket (Typ-ID + Felder)
    pub fn encode(&self, packet: &Packet) -> ProtocolResult<Bytes> {
        let mut writer = FieldWriter::with_capacity(64);
        self.encode_into(packet, &mut writer)?;
        Ok(writer.freeze())
    }

    /// Haengt ein kodiertes Paket an einen bestehenden Writer an
    ///
    /// `Extension` mit einer Standard-ID ist `Malformed`, die Gegenseite
    /// wuerde den Inhalt als das Standard-Paket lesen.
    pub fn encode_into(&self, packet: &Packet, writer: &mut FieldWriter) -> ProtocolResult<()> {
        if let Packet::Extension { id, .. } = packet {
            if ids::is_standard(*id) {
                return Err(ProtocolError::Malformed(format!(
                    "Extension mit Standard-ID {id}"
                )));
            }
        }
        writer.put_u16(packet.id());
        packet.write_fields(writer)
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::standard()
    }
}
