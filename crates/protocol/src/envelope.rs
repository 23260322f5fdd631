//! Voice-Umschlag fuer UDP-Datagramme
//!
//! Ein Datagramm enthaelt genau ein Paket, ohne Laengen-Prefix. Datagramme
//! vom Client tragen vorneweg die Korrelations-ID, damit der Server sie der
//! Control-Session zuordnen kann:
//!
//! ```text
//! Client -> Server:  client_id (string) | Typ-ID | Felder
//! Server -> Client:                       Typ-ID | Felder
//! ```

use bytes::Bytes;
use chorus_core::ClientId;

use crate::codec::PacketCodec;
use crate::error::ProtocolResult;
use crate::field::{FieldReader, FieldWriter};
use crate::packet::Packet;

/// Maximale Nutzlast eines UDP-Datagramms
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Kodiert ein ausgehendes Datagramm mit Korrelations-ID
pub fn encode_outbound(
    codec: &PacketCodec,
    client_id: &ClientId,
    packet: &Packet,
) -> ProtocolResult<Bytes> {
    let mut writer = FieldWriter::with_capacity(client_id.as_str().len() + 64);
    writer.put_string(client_id.as_str())?;
    codec.encode_into(packet, &mut writer)?;
    Ok(writer.freeze())
}

/// Dekodiert ein Datagramm mit Korrelations-ID (Gegenstueck zu
/// `encode_outbound`, wird serverseitig und in Tests gebraucht)
pub fn decode_outbound(codec: &PacketCodec, data: &[u8]) -> ProtocolResult<(ClientId, Packet)> {
    let mut reader = FieldReader::new(data);
    let client_id = ClientId(reader.read_string()?);
    let packet = codec.decode_from(&mut reader)?;
    Ok((client_id, packet))
}

/// Kodiert ein Datagramm ohne Umschlag (Server -> Client)
pub fn encode_inbound(codec: &PacketCodec, packet: &Packet) -> ProtocolResult<Bytes> {
    codec.encode(packet)
}

/// Dekodiert ein eingehendes Datagramm vom Server
pub fn decode_inbound(codec: &PacketCodec, data: &[u8]) -> ProtocolResult<Packet> {
    codec.decode(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn umschlag_traegt_client_id() {
        let codec = PacketCodec::standard();
        let id = ClientId::new("a1b2");
        let paket = Packet::VoiceData {
            username: "alice".into(),
            payload: Bytes::from_static(&[9; 40]),
        };

        let datagramm = encode_outbound(&codec, &id, &paket).unwrap();
        // Beginnt mit dem Laengen-Feld der ID
        assert_eq!(&datagramm[..2], &[0x00, 0x04]);
        assert_eq!(&datagramm[2..6], b"a1b2");

        let (gelesen_id, gelesen) = decode_outbound(&codec, &datagramm).unwrap();
        assert_eq!(gelesen_id, id);
        assert_eq!(gelesen, paket);
    }

    #[test]
    fn eingehendes_datagramm_ohne_umschlag() {
        let codec = PacketCodec::standard();
        let paket = Packet::VoiceDataMulticast {
            username: "bob".into(),
            payload: Bytes::from_static(b"opus"),
        };
        let datagramm = encode_inbound(&codec, &paket).unwrap();
        assert_eq!(decode_inbound(&codec, &datagramm).unwrap(), paket);
    }

    #[test]
    fn kaputtes_datagramm_ist_fehler() {
        let codec = PacketCodec::standard();
        assert!(matches!(
            decode_inbound(&codec, &[0x00]),
            Err(ProtocolError::Truncated { .. })
        ));
    }
}
