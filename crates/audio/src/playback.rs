//! AudioPlaybackPipeline – Voice-Daten -> Dekodieren -> Playback-Puffer
//!
//! ```text
//! VoiceData {username, payload}
//!     -> Sprecher im aktuellen Kanal? nein: verwerfen
//!     -> Sprecher markieren (speaking, letzte Aktivitaet)
//!     -> dekodieren (Decoder pro Sprecher) bzw. PCM uebernehmen
//!     -> Empfangs-Queue -> Pump -> Playback-Puffer -> Geraete-Callback
//! ```
//!
//! Meldet das Ausgabegeraet einen Fehler, wird es gestoppt und neu geoeffnet.
//! Der Playback-Puffer bleibt dabei erhalten.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{playback_ring, PlaybackBuffer, DEFAULT_PLAYBACK_CAPACITY};
use crate::capture::PayloadMode;
use crate::codec::{CodecFactory, VoiceDecoder};
use crate::device::{blocking, stop_device, AudioBackend, DeviceHandle};
use crate::error::AudioResult;
use crate::format::{pcm_from_bytes, AudioFormat};
use crate::pump::Pump;

/// Aufloesung von Absendern gegen den aktuellen Kanal
pub trait SpeakerDirectory: Send + Sync {
    /// Markiert den Sprecher als sprechend und aktualisiert seine letzte
    /// Aktivitaet. Gibt false zurueck wenn er nicht im aktuellen Kanal ist.
    fn mark_speaking(&self, username: &str) -> bool;
}

/// Konfiguration der Playback-Pipeline
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub format: AudioFormat,
    pub payload: PayloadMode,
    /// Ausgabegeraet (None = Standard)
    pub device: Option<usize>,
    /// Kapazitaet des Playback-Puffers in Samples
    pub buffer_capacity: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::VOICE,
            payload: PayloadMode::Encoded,
            device: None,
            buffer_capacity: DEFAULT_PLAYBACK_CAPACITY,
        }
    }
}

/// Ergebnis fuer ein eingehendes Voice-Paket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceDataOutcome {
    /// Anzahl Samples in die Empfangs-Queue gestellt
    Queued(usize),
    /// Absender nicht im aktuellen Kanal
    UnknownSpeaker,
    /// Payload konnte nicht dekodiert werden
    DecodeFailed,
    /// Pipeline ist gestoppt
    Stopped,
}

type SharedDevice = Arc<Mutex<Option<Box<dyn DeviceHandle>>>>;

// ---------------------------------------------------------------------------
// PlaybackPipeline
// ---------------------------------------------------------------------------

/// Laufende Wiedergabe
pub struct PlaybackPipeline {
    config: PlaybackConfig,
    codecs: Arc<dyn CodecFactory>,
    directory: Arc<dyn SpeakerDirectory>,
    decoders: Mutex<HashMap<String, Box<dyn VoiceDecoder>>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<Vec<i16>>>>,
    buffer: PlaybackBuffer,
    device: SharedDevice,
    pump: Mutex<Option<Pump>>,
    supervisor: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl PlaybackPipeline {
    /// Oeffnet das Ausgabegeraet und startet Pump und Neustart-Ueberwachung.
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn start(
        backend: Arc<dyn AudioBackend>,
        config: PlaybackConfig,
        codecs: Arc<dyn CodecFactory>,
        directory: Arc<dyn SpeakerDirectory>,
    ) -> AudioResult<Self> {
        config.format.validieren()?;
        let (mut producer, buffer) = playback_ring(config.buffer_capacity);

        // Fehler-Callback des Geraets -> Neustart-Anforderung
        let (restart_tx, restart_rx) = mpsc::unbounded_channel::<()>();
        let device: SharedDevice = Arc::new(Mutex::new(None));
        let first = open_output(&*backend, &config, &buffer, restart_tx.clone())?;
        *device.lock() = Some(first);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let pump = Pump::spawn("playback", inbound_rx, move |samples: Vec<i16>| {
            let dropped = producer.push(&samples);
            if dropped > 0 {
                warn!(dropped, "Playback-Puffer voll, Samples verworfen");
            }
            std::future::ready(())
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let supervisor = tokio::spawn(supervise_device(
            backend,
            config.clone(),
            buffer.clone(),
            Arc::clone(&device),
            restart_tx,
            restart_rx,
            stop_rx,
        ));

        info!(device = ?config.device, payload = ?config.payload, "Wiedergabe gestartet");

        Ok(Self {
            config,
            codecs,
            directory,
            decoders: Mutex::new(HashMap::new()),
            inbound: Mutex::new(Some(inbound_tx)),
            buffer,
            device,
            pump: Mutex::new(Some(pump)),
            supervisor: Mutex::new(Some((stop_tx, supervisor))),
        })
    }

    /// Gemeinsamer Playback-Puffer
    pub fn buffer(&self) -> &PlaybackBuffer {
        &self.buffer
    }

    pub fn is_running(&self) -> bool {
        self.inbound.lock().is_some()
    }

    /// Verarbeitet ein eingehendes Voice-Paket
    pub fn on_voice_data(&self, username: &str, payload: &[u8]) -> VoiceDataOutcome {
        let Some(inbound) = self.inbound.lock().clone() else {
            return VoiceDataOutcome::Stopped;
        };

        if !self.directory.mark_speaking(username) {
            trace!(username, "Voice-Daten von unbekanntem Sprecher verworfen");
            return VoiceDataOutcome::UnknownSpeaker;
        }

        let samples = match self.config.payload {
            PayloadMode::Pcm => pcm_from_bytes(payload),
            PayloadMode::Encoded => match self.decode(username, payload) {
                Ok(samples) => samples,
                Err(e) => {
                    debug!(username, "Voice-Daten nicht dekodierbar: {}", e);
                    return VoiceDataOutcome::DecodeFailed;
                }
            },
        };

        let count = samples.len();
        if inbound.send(samples).is_err() {
            return VoiceDataOutcome::Stopped;
        }
        VoiceDataOutcome::Queued(count)
    }

    fn decode(&self, username: &str, payload: &[u8]) -> AudioResult<Vec<i16>> {
        let mut decoders = self.decoders.lock();
        if !decoders.contains_key(username) {
            decoders.insert(username.to_string(), self.codecs.decoder()?);
        }
        match decoders.get_mut(username) {
            Some(decoder) => decoder.decode(payload),
            None => Ok(Vec::new()),
        }
    }

    /// Vergisst den Decoder-Zustand eines Sprechers (z.B. wenn er den Kanal verlaesst)
    pub fn forget_speaker(&self, username: &str) {
        self.decoders.lock().remove(username);
    }

    /// Stoppt Pump, Ueberwachung und Ausgabegeraet. Mehrfacher Aufruf ist harmlos.
    pub async fn stop(&self) {
        if self.inbound.lock().take().is_none() {
            return;
        }

        let supervisor = self.supervisor.lock().take();
        if let Some((stop_tx, task)) = supervisor {
            let _ = stop_tx.send(());
            let _ = task.await;
        }

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.stop().await;
        }

        let device = self.device.lock().take();
        if let Some(device) = device {
            stop_device(device).await;
        }

        self.decoders.lock().clear();
        self.buffer.clear();
        info!("Wiedergabe gestoppt");
    }
}

impl Drop for PlaybackPipeline {
    fn drop(&mut self) {
        if let Some((stop_tx, _)) = self.supervisor.lock().take() {
            let _ = stop_tx.send(());
        }
        if let Some(mut device) = self.device.lock().take() {
            device.stop();
        }
    }
}

// ---------------------------------------------------------------------------
// Geraete-Verwaltung
// ---------------------------------------------------------------------------

fn open_output(
    backend: &dyn AudioBackend,
    config: &PlaybackConfig,
    buffer: &PlaybackBuffer,
    restart_tx: mpsc::UnboundedSender<()>,
) -> AudioResult<Box<dyn DeviceHandle>> {
    backend.open_playback(
        config.device,
        config.format,
        buffer.clone(),
        Box::new(move |err| {
            error!("Playback-Geraet meldet Fehler: {}", err);
            let _ = restart_tx.send(());
        }),
    )
}

/// Startet das Ausgabegeraet nach einem Fehler neu (stop, dann neu oeffnen)
async fn supervise_device(
    backend: Arc<dyn AudioBackend>,
    config: PlaybackConfig,
    buffer: PlaybackBuffer,
    device: SharedDevice,
    restart_tx: mpsc::UnboundedSender<()>,
    mut restart_rx: mpsc::UnboundedReceiver<()>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            request = restart_rx.recv() => {
                if request.is_none() {
                    break;
                }
                // Mehrere Fehler kurz hintereinander -> nur ein Neustart
                while restart_rx.try_recv().is_ok() {}

                let old = device.lock().take();
                if let Some(old) = old {
                    stop_device(old).await;
                }

                let oeffnen = {
                    let backend = Arc::clone(&backend);
                    let config = config.clone();
                    let buffer = buffer.clone();
                    let restart_tx = restart_tx.clone();
                    move || open_output(&*backend, &config, &buffer, restart_tx)
                };
                match blocking(oeffnen).await {
                    Ok(handle) => {
                        *device.lock() = Some(handle);
                        info!("Playback-Geraet neu gestartet");
                    }
                    Err(e) => error!("Playback-Geraet konnte nicht neu gestartet werden: {}", e),
                }
            }
        }
    }
    debug!("Playback-Ueberwachung beendet");
}
