//! Playback-Ring-Buffer (lock-free, ringbuf)
//!
//! ```text
//! Empfangs-Pump -> PlaybackProducer -> HeapRb<i16> -> PlaybackBuffer -> Geraete-Callback
//! ```
//!
//! Der Producer gehoert allein dem Empfangs-Pump und nimmt nie ein Lock.
//! Der Consumer liegt ausserhalb des Streams, damit er einen Neustart des
//! Ausgabegeraets ueberlebt. Der Callback greift nur per `try_lock` zu und
//! liefert Stille, falls beim Neustart kurz zwei Streams lesen.

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Standard-Kapazitaet: 2 Sekunden bei 48 kHz Mono
pub const DEFAULT_PLAYBACK_CAPACITY: usize = 48_000 * 2;

/// Erzeugt einen Ring mit `capacity` Samples und teilt ihn in Schreib- und
/// Leseseite.
pub fn playback_ring(capacity: usize) -> (PlaybackProducer, PlaybackBuffer) {
    let capacity = capacity.max(1);
    let (producer, consumer) = HeapRb::<i16>::new(capacity).split();
    let level = Arc::new(AtomicIsize::new(0));
    (
        PlaybackProducer {
            producer,
            level: Arc::clone(&level),
        },
        PlaybackBuffer {
            consumer: Arc::new(Mutex::new(consumer)),
            level,
            capacity,
        },
    )
}

/// Schreibseite, gehoert dem Empfangs-Pump
pub struct PlaybackProducer {
    producer: HeapProd<i16>,
    level: Arc<AtomicIsize>,
}

impl PlaybackProducer {
    /// Haengt Samples in Ankunftsreihenfolge an.
    ///
    /// Ist der Ring voll, wird der Rest verworfen (die neuesten Samples).
    /// Gibt die Anzahl verworfener Samples zurueck.
    pub fn push(&mut self, data: &[i16]) -> usize {
        let written = self.producer.push_slice(data);
        self.level.fetch_add(written as isize, Ordering::AcqRel);
        data.len() - written
    }
}

/// Leseseite fuer das Ausgabegeraet, klonbar (geteilter Consumer)
#[derive(Clone)]
pub struct PlaybackBuffer {
    consumer: Arc<Mutex<HeapCons<i16>>>,
    /// Fuellstand fuer Abfragen ausserhalb des Callbacks
    level: Arc<AtomicIsize>,
    capacity: usize,
}

impl std::fmt::Debug for PlaybackBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl PlaybackBuffer {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fuellt `out` aus dem Ring, fehlende Samples werden zu Stille.
    /// Gibt die Anzahl echter Samples zurueck. Blockiert nie.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let Some(mut consumer) = self.consumer.try_lock() else {
            out.fill(0);
            return 0;
        };
        let n = consumer.pop_slice(out);
        drop(consumer);
        self.level.fetch_sub(n as isize, Ordering::AcqRel);
        out[n..].fill(0);
        n
    }

    pub fn len(&self) -> usize {
        self.level.load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Verwirft alle gepufferten Samples (nur bei gestopptem Geraet aufrufen)
    pub fn clear(&self) {
        let removed = self.consumer.lock().clear();
        self.level.fetch_sub(removed as isize, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_reihenfolge() {
        let (mut producer, buf) = playback_ring(16);
        producer.push(&[1, 2, 3]);
        producer.push(&[4]);
        assert_eq!(buf.len(), 4);
        let mut out = [0i16; 6];
        assert_eq!(buf.pop_into(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4, 0, 0]);
        assert!(buf.is_empty());
    }

    #[test]
    fn ueberlauf_verwirft_neueste() {
        let (mut producer, buf) = playback_ring(4);
        assert_eq!(producer.push(&[1, 2, 3]), 0);
        assert_eq!(producer.push(&[4, 5, 6]), 2);
        assert_eq!(buf.len(), 4);

        let mut out = [0i16; 4];
        buf.pop_into(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn klone_teilen_den_inhalt() {
        let (mut producer, a) = playback_ring(8);
        let b = a.clone();
        producer.push(&[7]);
        assert_eq!(b.len(), 1);
        let mut out = [0i16; 1];
        assert_eq!(a.pop_into(&mut out), 1);
        assert!(b.is_empty());
    }

    #[test]
    fn leeren() {
        let (mut producer, buf) = playback_ring(8);
        producer.push(&[1, 2, 3]);
        buf.clear();
        assert!(buf.is_empty());
        producer.push(&[9]);
        let mut out = [0i16; 2];
        assert_eq!(buf.pop_into(&mut out), 1);
        assert_eq!(out, [9, 0]);
    }

    #[test]
    fn callback_blockiert_nicht_bei_belegtem_consumer() {
        let (mut producer, buf) = playback_ring(8);
        producer.push(&[1, 2]);

        // Zweiter Leser (z.B. alter Stream waehrend des Neustarts)
        let belegt = buf.consumer.lock();
        let mut out = [5i16; 3];
        assert_eq!(buf.pop_into(&mut out), 0);
        assert_eq!(out, [0, 0, 0]);

        // Schreiben braucht kein Lock
        assert_eq!(producer.push(&[3]), 0);
        drop(belegt);

        assert_eq!(buf.pop_into(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
    }

    #[test]
    fn producer_und_callback_auf_eigenen_threads() {
        let (mut producer, buf) = playback_ring(1024);
        let leser = buf.clone();
        let schreiber = std::thread::spawn(move || {
            for i in 0..100i16 {
                while producer.push(&[i]) > 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut gelesen = Vec::new();
        let mut out = [0i16; 7];
        while gelesen.len() < 100 {
            let n = leser.pop_into(&mut out);
            gelesen.extend_from_slice(&out[..n]);
        }
        schreiber.join().unwrap();
        assert_eq!(gelesen, (0..100).collect::<Vec<i16>>());
        assert!(buf.is_empty());
    }
}
