//! Feld-Kodierung fuer Paketinhalte
//!
//! Alle Mehrbyte-Werte sind big-endian.
//!
//! ```text
//! string        u16 Laenge + UTF-8
//! bytes         u32 Laenge + Rohdaten
//! bool          1 Byte (0 oder 1)
//! i32           4 Bytes
//! list<string>  u16 Anzahl + Strings
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

// ---------------------------------------------------------------------------
// FieldReader
// ---------------------------------------------------------------------------

/// Liest Felder sequenziell aus einem Paketinhalt
///
/// Jeder Lesezugriff prueft zuerst, ob genug Bytes vorhanden sind, und
/// liefert sonst `Truncated`. Der Lesezeiger bewegt sich nur bei Erfolg.
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Anzahl der noch ungelesenen Bytes
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Gibt die ungelesenen Bytes zurueck und verbraucht sie
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    fn take(&mut self, n: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> ProtocolResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> ProtocolResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> ProtocolResult<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bool(&mut self) -> ProtocolResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::Malformed(format!(
                "Ungueltiger bool-Wert: {other}"
            ))),
        }
    }

    pub fn read_string(&mut self) -> ProtocolResult<String> {
        let len = self.read_u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| ProtocolError::Malformed(format!("String ist kein UTF-8: {e}")))
    }

    pub fn read_bytes(&mut self) -> ProtocolResult<Bytes> {
        let len = self.read_u32()? as usize;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    pub fn read_string_list(&mut self) -> ProtocolResult<Vec<String>> {
        let count = self.read_u16()? as usize;
        // Jeder Eintrag braucht mindestens sein Laengen-Feld
        if self.remaining() < count * 2 {
            return Err(ProtocolError::Truncated {
                needed: count * 2,
                available: self.remaining(),
            });
        }
        (0..count).map(|_| self.read_string()).collect()
    }

    /// Stellt sicher, dass das Paket vollstaendig gelesen wurde
    pub fn finish(&self) -> ProtocolResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::Malformed(format!(
                "{n} ueberzaehlige Bytes am Paketende"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldWriter
// ---------------------------------------------------------------------------

/// Schreibt Felder in einen wachsenden Puffer
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn put_string(&mut self, value: &str) -> ProtocolResult<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            ProtocolError::Malformed(format!(
                "String zu lang: {} Bytes (Maximum: {})",
                value.len(),
                u16::MAX
            ))
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> ProtocolResult<()> {
        let len = u32::try_from(value.len()).map_err(|_| {
            ProtocolError::Malformed(format!("Payload zu lang: {} Bytes", value.len()))
        })?;
        self.buf.put_u32(len);
        self.buf.put_slice(value);
        Ok(())
    }

    pub fn put_string_list(&mut self, values: &[String]) -> ProtocolResult<()> {
        let count = u16::try_from(values.len()).map_err(|_| {
            ProtocolError::Malformed(format!("Liste zu lang: {} Eintraege", values.len()))
        })?;
        self.buf.put_u16(count);
        for value in values {
            self.put_string(value)?;
        }
        Ok(())
    }

    /// Haengt Rohdaten ohne Laengen-Feld an
    pub fn put_raw(&mut self, value: &[u8]) {
        self.buf.put_slice(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}
