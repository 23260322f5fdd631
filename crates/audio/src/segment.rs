//! Segmentierung der Capture-Bytes in Codec-Frames
//!
//! Eingehende Bytes werden an den Rest des vorherigen Aufrufs angehaengt und
//! in volle Segmente zerlegt. Was nicht fuer ein ganzes Segment reicht, bleibt
//! als Rest fuer den naechsten Aufruf liegen. Kein Byte geht verloren oder
//! wird doppelt ausgegeben.

/// Sammelt PCM-Bytes und gibt volle Segmente fester Groesse aus
#[derive(Debug, Clone)]
pub struct SegmentAccumulator {
    segment_bytes: usize,
    residue: Vec<u8>,
}

impl SegmentAccumulator {
    /// `segment_bytes` muss groesser als 0 sein
    pub fn new(segment_bytes: usize) -> Self {
        Self {
            segment_bytes: segment_bytes.max(1),
            residue: Vec::with_capacity(segment_bytes),
        }
    }

    pub fn segment_bytes(&self) -> usize {
        self.segment_bytes
    }

    /// Noch nicht ausgegebene Bytes (immer kuerzer als ein Segment)
    pub fn residue(&self) -> &[u8] {
        &self.residue
    }

    /// Haengt `data` an und gibt alle nun vollstaendigen Segmente zurueck
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let total = self.residue.len() + data.len();
        let count = total / self.segment_bytes;
        if count == 0 {
            self.residue.extend_from_slice(data);
            return Vec::new();
        }

        let mut combined = std::mem::take(&mut self.residue);
        combined.extend_from_slice(data);

        let consumed = count * self.segment_bytes;
        let segments = combined[..consumed]
            .chunks_exact(self.segment_bytes)
            .map(<[u8]>::to_vec)
            .collect();

        self.residue = combined[consumed..].to_vec();
        segments
    }

    /// Verwirft den Rest (z.B. beim Stoppen der Aufnahme)
    pub fn clear(&mut self) {
        self.residue.clear();
    }
}
