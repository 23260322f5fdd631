//! Wire-Format fuer die Control-Verbindung (TCP)
//!
//! Frame-basiertes Protokoll: Laenge (u32 big-endian) + Paketinhalt.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE)                   | Typ-ID (u16 BE) | Felder    |
//! +--------+--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge zaehlt Typ-ID und Felder (ohne die 4 Laengen-Bytes).
//! Maximale Frame-Groesse ist konfigurierbar (Standard: 1 MB).

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::PacketCodec;
use crate::error::ProtocolError;
use crate::packet::Packet;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// ControlFrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer die Control-Verbindung
///
/// Implementiert `Encoder<Packet>` und `Decoder` fuer
/// `tokio_util::codec::Framed`. Ein unvollstaendiger Frame bleibt im Puffer,
/// bis alle Bytes eingetroffen sind.
#[derive(Debug, Clone)]
pub struct ControlFrameCodec {
    packets: PacketCodec,
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl ControlFrameCodec {
    /// Erstellt einen Codec mit Standard-Paketen und Standard-Limit
    pub fn new() -> Self {
        Self::with_codec(PacketCodec::standard(), DEFAULT_MAX_FRAME_SIZE)
    }

    /// Erstellt einen Codec mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self::with_codec(PacketCodec::standard(), max_frame_size)
    }

    /// Erstellt einen Codec mit eigener Registry
    pub fn with_codec(packets: PacketCodec, max_frame_size: usize) -> Self {
        Self {
            packets,
            max_frame_size,
        }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for ControlFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for ControlFrameCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen ohne den Buffer zu veraendern
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            // Speicher vorbelegen um Reallocations zu vermeiden
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let body = src.split_to(length);

        self.packets.decode(&body).map(Some)
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<Packet> for ControlFrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = self.packets.encode(&item)?;

        if body.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(LENGTH_FIELD_SIZE + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::ChannelId;

    fn join_paket(kanal: &str) -> Packet {
        Packet::RequestChannelJoin {
            channel_id: ChannelId::from(kanal),
        }
    }

    #[test]
    fn frame_codec_encode_decode() {
        let mut codec = ControlFrameCodec::new();
        let original = join_paket("c1");

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();

        // Laengen-Feld pruefen
        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        let decoded = codec
            .decode(&mut buf)
            .unwrap()
            .expect("Muss ein Paket enthalten");
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_unvollstaendiger_frame() {
        let mut codec = ControlFrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(join_paket("lobby"), &mut buf).unwrap();
        let gesamt = buf.clone();

        // Byte fuer Byte zufuettern: erst das letzte Byte liefert das Paket
        let mut eingang = BytesMut::new();
        for (i, byte) in gesamt.iter().enumerate() {
            eingang.put_u8(*byte);
            let ergebnis = codec.decode(&mut eingang).unwrap();
            if i + 1 < gesamt.len() {
                assert!(ergebnis.is_none(), "Zu frueh dekodiert bei Byte {i}");
            } else {
                assert_eq!(ergebnis, Some(join_paket("lobby")));
            }
        }
    }

    #[test]
    fn frame_codec_zu_wenig_bytes_fuer_laengenfeld() {
        let mut codec = ControlFrameCodec::new();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn frame_codec_ablehnung_zu_grosser_frame() {
        let mut codec = ControlFrameCodec::with_max_size(100);

        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: 200, max: 100 })
        ));
    }

    #[test]
    fn frame_codec_ablehnung_beim_encode_zu_grosses_paket() {
        let mut codec = ControlFrameCodec::with_max_size(10);
        let mut buf = BytesMut::new();
        let result = codec.encode(
            Packet::Disconnect {
                reason: "ein viel zu langer Grund".into(),
            },
            &mut buf,
        );
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_mehrere_pakete_im_buffer() {
        let mut codec = ControlFrameCodec::new();
        let mut buf = BytesMut::new();

        for i in 0..3 {
            codec.encode(join_paket(&format!("c{i}")), &mut buf).unwrap();
        }

        for i in 0..3 {
            let paket = codec.decode(&mut buf).unwrap().expect("Paket erwartet");
            assert_eq!(paket, join_paket(&format!("c{i}")));
        }

        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_unbekannte_id_im_frame() {
        let mut codec = ControlFrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(2);
        buf.put_u16(4242);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnknownId(4242))
        ));
    }

    #[test]
    fn frame_codec_default_max_size() {
        let codec = ControlFrameCodec::new();
        assert_eq!(codec.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }

    #[tokio::test]
    async fn framed_ueber_duplex_stream() {
        use futures_util::{SinkExt, StreamExt};
        use tokio_util::codec::Framed;

        let (a, b) = tokio::io::duplex(64);
        let mut sender = Framed::new(a, ControlFrameCodec::new());
        let mut empfaenger = Framed::new(b, ControlFrameCodec::new());

        let pakete = vec![
            Packet::VoiceEstablish,
            Packet::ChannelAdded {
                channel_id: ChannelId::from("c1"),
                name: "Lobby".into(),
                bitrate: 24000,
                clients: (0..20).map(|i| format!("user{i}")).collect(),
            },
            Packet::VoiceEstablishResponse { allowed: true },
        ];

        let zu_senden = pakete.clone();
        let schreiber = tokio::spawn(async move {
            for p in zu_senden {
                sender.send(p).await.unwrap();
            }
        });

        for erwartet in pakete {
            let paket = empfaenger.next().await.unwrap().unwrap();
            assert_eq!(paket, erwartet);
        }
        schreiber.await.unwrap();
    }
}
