//! Geraete-Schnittstelle der Audio-Pipelines
//!
//! Die Pipelines kennen keine Hardware. Ein `AudioBackend` liefert
//! PCM-Frames ("deliver PCM frame") und nimmt Samples ab ("accept PCM frame").
//! Implementierungen:
//!
//! - `CpalBackend` (Modul `cpal_backend`) – echte Geraete via cpal
//! - `VirtualBackend` – Geraete ohne Hardware, Frames werden von Hand
//!   eingespeist (Headless-Betrieb und Tests)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::buffer::PlaybackBuffer;
use crate::error::{AudioError, AudioResult};
use crate::format::AudioFormat;

/// Wird fuer jeden aufgenommenen Frame aufgerufen (PCM i16 LE)
pub type FrameCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Wird aufgerufen wenn das Geraet einen Fehler meldet
pub type ErrorCallback = Box<dyn FnMut(AudioError) + Send + 'static>;

/// Laufender Geraete-Stream. Nach `stop` kommen keine Callbacks mehr.
pub trait DeviceHandle: Send {
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}

/// Zugriff auf Ein- und Ausgabegeraete
pub trait AudioBackend: Send + Sync {
    /// Oeffnet ein Eingabegeraet (None = Standardgeraet)
    fn open_capture(
        &self,
        device: Option<usize>,
        format: AudioFormat,
        on_frame: FrameCallback,
        on_error: ErrorCallback,
    ) -> AudioResult<Box<dyn DeviceHandle>>;

    /// Oeffnet ein Ausgabegeraet, das aus `buffer` liest
    fn open_playback(
        &self,
        device: Option<usize>,
        format: AudioFormat,
        buffer: PlaybackBuffer,
        on_error: ErrorCallback,
    ) -> AudioResult<Box<dyn DeviceHandle>>;
}

/// Fuehrt einen Geraete-Aufruf auf dem Blocking-Pool aus.
///
/// Oeffnen und Stoppen warten auf den Stream-Thread des Backends und duerfen
/// keinen Runtime-Worker belegen.
pub async fn blocking<T, F>(f: F) -> AudioResult<T>
where
    F: FnOnce() -> AudioResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AudioError::Stream(format!("Geraete-Aufruf abgebrochen: {e}")))?
}

/// Stoppt ein Geraet auf dem Blocking-Pool
pub async fn stop_device(mut handle: Box<dyn DeviceHandle>) {
    let ergebnis = blocking(move || {
        handle.stop();
        Ok(())
    })
    .await;
    if let Err(e) = ergebnis {
        warn!("Geraet nicht sauber gestoppt: {}", e);
    }
}

// ---------------------------------------------------------------------------
// VirtualBackend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct VirtualState {
    capture: Option<(u64, FrameCallback)>,
    capture_error: Option<(u64, ErrorCallback)>,
    playback: Option<(u64, PlaybackBuffer)>,
    playback_error: Option<(u64, ErrorCallback)>,
    next_id: u64,
    captures_opened: usize,
    playbacks_opened: usize,
    fail_capture: Option<AudioError>,
    capture_open_delay: Option<Duration>,
}

/// Audio-Backend ohne Hardware
///
/// Klone teilen denselben Zustand, so kann ein Test das Backend an die
/// Pipelines uebergeben und gleichzeitig Frames einspeisen.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Speist einen Frame in das offene Eingabegeraet ein.
    /// Gibt false zurueck wenn kein Eingabegeraet offen ist.
    pub fn feed_capture(&self, frame: &[u8]) -> bool {
        // Callback ausserhalb des Locks aufrufen
        let taken = self.state.lock().capture.take();
        match taken {
            Some((id, mut callback)) => {
                callback(frame);
                let mut state = self.state.lock();
                // Nur zuruecklegen wenn das Geraet nicht inzwischen gestoppt wurde
                if state.capture.is_none() && state.capture_error.as_ref().map(|e| e.0) == Some(id)
                {
                    state.capture = Some((id, callback));
                }
                true
            }
            None => false,
        }
    }

    /// Liest Samples aus dem offenen Ausgabegeraet (wie ein Playback-Callback)
    pub fn drain_playback(&self, out: &mut [i16]) -> usize {
        let buffer = self.state.lock().playback.as_ref().map(|(_, b)| b.clone());
        buffer.map(|b| b.pop_into(out)).unwrap_or(0)
    }

    /// Simuliert einen Fehler des Ausgabegeraets
    pub fn fail_playback(&self, error: AudioError) -> bool {
        let taken = self.state.lock().playback_error.take();
        match taken {
            Some((id, mut callback)) => {
                callback(error);
                let mut state = self.state.lock();
                if state.playback_error.is_none()
                    && state.playback.as_ref().map(|p| p.0) == Some(id)
                {
                    state.playback_error = Some((id, callback));
                }
                true
            }
            None => false,
        }
    }

    /// Das naechste `open_capture` schlaegt mit diesem Fehler fehl
    pub fn fail_next_capture(&self, error: AudioError) {
        self.state.lock().fail_capture = Some(error);
    }

    /// Das naechste `open_capture` braucht so lange wie ein langsamer Treiber
    pub fn delay_next_capture(&self, delay: Duration) {
        self.state.lock().capture_open_delay = Some(delay);
    }

    pub fn capture_active(&self) -> bool {
        self.state.lock().capture_error.is_some()
    }

    pub fn playback_active(&self) -> bool {
        self.state.lock().playback.is_some()
    }

    pub fn captures_opened(&self) -> usize {
        self.state.lock().captures_opened
    }

    pub fn playbacks_opened(&self) -> usize {
        self.state.lock().playbacks_opened
    }
}

impl AudioBackend for VirtualBackend {
    fn open_capture(
        &self,
        device: Option<usize>,
        format: AudioFormat,
        on_frame: FrameCallback,
        on_error: ErrorCallback,
    ) -> AudioResult<Box<dyn DeviceHandle>> {
        let delay = self.state.lock().capture_open_delay.take();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        if let Some(err) = state.fail_capture.take() {
            return Err(err);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.capture = Some((id, on_frame));
        state.capture_error = Some((id, on_error));
        state.captures_opened += 1;
        debug!(?device, ?format, "Virtuelles Eingabegeraet geoeffnet");
        Ok(Box::new(VirtualHandle {
            state: Arc::clone(&self.state),
            id,
            kind: VirtualKind::Capture,
            running: AtomicBool::new(true),
        }))
    }

    fn open_playback(
        &self,
        device: Option<usize>,
        format: AudioFormat,
        buffer: PlaybackBuffer,
        on_error: ErrorCallback,
    ) -> AudioResult<Box<dyn DeviceHandle>> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.playback = Some((id, buffer));
        state.playback_error = Some((id, on_error));
        state.playbacks_opened += 1;
        debug!(?device, ?format, "Virtuelles Ausgabegeraet geoeffnet");
        Ok(Box::new(VirtualHandle {
            state: Arc::clone(&self.state),
            id,
            kind: VirtualKind::Playback,
            running: AtomicBool::new(true),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
enum VirtualKind {
    Capture,
    Playback,
}

struct VirtualHandle {
    state: Arc<Mutex<VirtualState>>,
    id: u64,
    kind: VirtualKind,
    running: AtomicBool,
}

impl DeviceHandle for VirtualHandle {
    fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        match self.kind {
            VirtualKind::Capture => {
                if state.capture_error.as_ref().map(|e| e.0) == Some(self.id) {
                    state.capture = None;
                    state.capture_error = None;
                }
            }
            VirtualKind::Playback => {
                if state.playback.as_ref().map(|p| p.0) == Some(self.id) {
                    state.playback = None;
                    state.playback_error = None;
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for VirtualHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
