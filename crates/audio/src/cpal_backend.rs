//! Audio-Backend fuer echte Geraete via cpal
//!
//! cpal::Stream ist !Send, daher lebt jeder Stream in einem eigenen
//! std::thread. Der Thread oeffnet den Stream, meldet das Ergebnis zurueck
//! und wartet dann auf das Stop-Kommando (crossbeam-channel).
//!
//! Capture: der cpal-Callback kopiert nur die Bytes in eine begrenzte Queue.
//! Die eigentliche Verarbeitung (VAD, Codec) laeuft im Geraete-Thread, nicht
//! im Echtzeit-Callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, StreamError};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::buffer::PlaybackBuffer;
use crate::device::{AudioBackend, DeviceHandle, ErrorCallback, FrameCallback};
use crate::error::{AudioError, AudioResult};
use crate::format::{f32_to_i16, AudioFormat};

/// Maximale Anzahl wartender Capture-Frames bevor verworfen wird
const CAPTURE_QUEUE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Geraete-Enumeration
// ---------------------------------------------------------------------------

/// Namen aller Eingabegeraete, Index = Geraete-Index fuer die Konfiguration
pub fn list_input_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    let names: Vec<String> = devices
        .map(|d| d.name().unwrap_or_else(|_| "<unbekannt>".to_string()))
        .collect();
    debug!("Gefundene Eingabegeraete: {}", names.len());
    Ok(names)
}

/// Namen aller Ausgabegeraete, Index = Geraete-Index fuer die Konfiguration
pub fn list_output_devices() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    let names: Vec<String> = devices
        .map(|d| d.name().unwrap_or_else(|_| "<unbekannt>".to_string()))
        .collect();
    debug!("Gefundene Ausgabegeraete: {}", names.len());
    Ok(names)
}

fn load_input_device(index: Option<usize>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match index {
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::DeviceNotFound("Standard-Eingabegeraet".into())),
        Some(i) => host
            .input_devices()
            .map_err(|e| AudioError::Stream(e.to_string()))?
            .nth(i)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("Eingabegeraet #{i}"))),
    }
}

fn load_output_device(index: Option<usize>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match index {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("Standard-Ausgabegeraet".into())),
        Some(i) => host
            .output_devices()
            .map_err(|e| AudioError::Stream(e.to_string()))?
            .nth(i)
            .ok_or_else(|| AudioError::DeviceNotFound(format!("Ausgabegeraet #{i}"))),
    }
}

fn stream_config(format: AudioFormat) -> StreamConfig {
    StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

fn map_stream_error(err: StreamError) -> AudioError {
    match err {
        StreamError::DeviceNotAvailable => {
            AudioError::DeviceUnavailable("Geraet nicht mehr verfuegbar".into())
        }
        other => AudioError::Stream(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CpalBackend
// ---------------------------------------------------------------------------

/// Echte Audio-Geraete ueber den cpal-Standard-Host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(
        &self,
        device: Option<usize>,
        format: AudioFormat,
        mut on_frame: FrameCallback,
        on_error: ErrorCallback,
    ) -> AudioResult<Box<dyn DeviceHandle>> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<AudioResult<()>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("chorus-capture".to_string())
            .spawn(move || {
                let (frame_tx, frame_rx) = bounded::<Vec<u8>>(CAPTURE_QUEUE_DEPTH);
                let stream = match open_capture_stream(device, format, frame_tx, on_error) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }

                // Frames verarbeiten bis Stop; der Stream lebt in diesem Scope
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(frame_rx) -> frame => match frame {
                            Ok(bytes) => on_frame(&bytes),
                            Err(_) => break,
                        },
                    }
                }

                drop(stream);
                thread_running.store(false, Ordering::SeqCst);
                debug!("Capture-Thread beendet, cpal-Stream gedroppt");
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        wait_ready(ready_rx)?;
        info!(?device, "Capture-Stream geoeffnet");

        Ok(Box::new(CpalHandle {
            stop_tx,
            thread: Some(thread),
            running,
        }))
    }

    fn open_playback(
        &self,
        device: Option<usize>,
        format: AudioFormat,
        buffer: PlaybackBuffer,
        on_error: ErrorCallback,
    ) -> AudioResult<Box<dyn DeviceHandle>> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<AudioResult<()>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("chorus-playback".to_string())
            .spawn(move || {
                let stream = match open_playback_stream(device, format, buffer, on_error) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }

                // Stream am Leben halten bis Stop
                let _ = stop_rx.recv();

                drop(stream);
                thread_running.store(false, Ordering::SeqCst);
                debug!("Playback-Thread beendet, cpal-Stream gedroppt");
            })
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        wait_ready(ready_rx)?;
        info!(?device, "Playback-Stream geoeffnet");

        Ok(Box::new(CpalHandle {
            stop_tx,
            thread: Some(thread),
            running,
        }))
    }
}

fn wait_ready(ready_rx: Receiver<AudioResult<()>>) -> AudioResult<()> {
    ready_rx.recv().map_err(|_| {
        AudioError::Stream("Audio-Thread wurde vor der Initialisierung beendet".into())
    })?
}

/// Handle auf einen Stream-Thread
struct CpalHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl DeviceHandle for CpalHandle {
    fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio-Thread ist abgestuerzt");
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CpalHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Stream-Aufbau
// ---------------------------------------------------------------------------

fn open_capture_stream(
    device: Option<usize>,
    format: AudioFormat,
    frame_tx: Sender<Vec<u8>>,
    mut on_error: ErrorCallback,
) -> AudioResult<Stream> {
    let device = load_input_device(device)?;
    let config = stream_config(format);

    // Unterstuetzte Sample-Formate pruefen
    let sample_format = device
        .supported_input_configs()
        .map_err(|e| AudioError::Stream(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= format.sample_rate
                && c.max_sample_rate().0 >= format.sample_rate
                && c.channels() >= format.channels
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::I16);

    let err_fn = move |err: StreamError| on_error(map_stream_error(err));

    let deliver = move |bytes: Vec<u8>| {
        if frame_tx.try_send(bytes).is_err() {
            warn!("Capture-Queue voll, Frame verworfen");
        }
    };

    let stream = match sample_format {
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                let mut bytes = Vec::with_capacity(data.len() * 2);
                for s in data {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                deliver(bytes);
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                let mut bytes = Vec::with_capacity(data.len() * 2);
                for s in data {
                    bytes.extend_from_slice(&f32_to_i16(*s).to_le_bytes());
                }
                deliver(bytes);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(AudioError::Stream(format!(
                "Nicht unterstuetztes Sample-Format: {other:?}"
            )))
        }
    }
    .map_err(|e| AudioError::Stream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    Ok(stream)
}

fn open_playback_stream(
    device: Option<usize>,
    format: AudioFormat,
    buffer: PlaybackBuffer,
    mut on_error: ErrorCallback,
) -> AudioResult<Stream> {
    let device = load_output_device(device)?;
    let config = stream_config(format);

    let sample_format = device
        .supported_output_configs()
        .map_err(|e| AudioError::Stream(e.to_string()))?
        .find(|c| {
            c.min_sample_rate().0 <= format.sample_rate
                && c.max_sample_rate().0 >= format.sample_rate
                && c.channels() >= format.channels
        })
        .map(|c| c.sample_format())
        .unwrap_or(SampleFormat::I16);

    let err_fn = move |err: StreamError| on_error(map_stream_error(err));

    let stream = match sample_format {
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _| {
                buffer.pop_into(data);
            },
            err_fn,
            None,
        ),
        SampleFormat::F32 => {
            let mut scratch: Vec<i16> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    scratch.resize(data.len(), 0);
                    buffer.pop_into(&mut scratch);
                    for (out, s) in data.iter_mut().zip(scratch.iter()) {
                        *out = crate::format::normalize(*s);
                    }
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::Stream(format!(
                "Nicht unterstuetztes Sample-Format: {other:?}"
            )))
        }
    }
    .map_err(|e| AudioError::Stream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::Stream(e.to_string()))?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{playback_ring, DEFAULT_PLAYBACK_CAPACITY};

    #[test]
    fn stream_config_aus_format() {
        let cfg = stream_config(AudioFormat::VOICE);
        assert_eq!(cfg.channels, 1);
        assert_eq!(cfg.sample_rate.0, 48_000);
    }

    #[test]
    fn geraeteverlust_wird_unterschieden() {
        assert!(matches!(
            map_stream_error(StreamError::DeviceNotAvailable),
            AudioError::DeviceUnavailable(_)
        ));
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn eingabegeraete_auflistbar() {
        let devices = list_input_devices().expect("Liste sollte abrufbar sein");
        println!("Eingabegeraete: {devices:?}");
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn capture_stream_oeffnen() {
        let mut handle = CpalBackend::new()
            .open_capture(None, AudioFormat::VOICE, Box::new(|_| {}), Box::new(|_| {}))
            .expect("Capture-Stream sollte oeffenbar sein");
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn playback_stream_oeffnen() {
        let handle = CpalBackend::new().open_playback(
            None,
            AudioFormat::VOICE,
            playback_ring(DEFAULT_PLAYBACK_CAPACITY).1,
            Box::new(|_| {}),
        );
        assert!(handle.is_ok(), "Playback-Stream sollte oeffenbar sein");
    }
}
