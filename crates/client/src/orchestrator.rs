//! ClientOrchestrator – setzt Control, Voice, Kanaele und Audio zusammen
//!
//! ```text
//! connect(host, port)
//!     -> laufenden Aufbau abbrechen, alte Session beenden
//!     -> ControlSession (ClientHello, ClientConnected)
//!     -> VoiceTransport (VoiceConnect, VoiceConnectAck)
//!     -> Wiedergabe starten
//!     -> Tasks: Control-Ereignisse, Voice-Ereignisse, Speaking-Ablauf
//!
//! Control-Paket -> ChannelStateMachine::apply -> ChannelEffect ausfuehren
//!     BeginStreaming: VoiceEstablish senden, Antwort abwarten (begrenzt),
//!                     bei Zustimmung Aufnahme + Sende-Pump starten
//!     StopStreaming:  Aufnahme stoppen
//! ```
//!
//! Jede Trennung, lokal oder vom Server, laeuft ueber `teardown`. Eine
//! Generationsnummer stellt sicher, dass eine alte Session nie die neue
//! abbaut.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chorus_audio::device::blocking;
use chorus_audio::{
    codec_factory, AudioBackend, AudioFormat, AudioResult, CaptureConfig, CapturePipeline,
    CaptureSession, CpalBackend, PlaybackBuffer, PlaybackConfig, PlaybackPipeline, Pump,
    VoiceFrame, DEFAULT_PLAYBACK_CAPACITY,
};
use chorus_core::{ChannelId, ClientEvent, ClientId, ConnectionState, EventSink};
use chorus_protocol::Packet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channels::{
    Channel, ChannelClient, ChannelEffect, ChannelSpeakers, ChannelStateMachine, SharedChannels,
};
use crate::config::{username_pruefen, ClientConfig};
use crate::control::{ControlEvent, ControlSession};
use crate::error::{ClientError, ClientResult, ConfigError, TransportError};
use crate::voice::{VoiceEvent, VoiceTransport};

/// Hinweis an den Benutzer wenn kein gueltiger Name gesetzt ist
pub const NOTICE_USERNAME: &str = "Bitte in den Einstellungen einen gueltigen Benutzernamen setzen";

// ---------------------------------------------------------------------------
// Session-Zustand
// ---------------------------------------------------------------------------

/// Aufnahme einer Session
#[derive(Default)]
struct Streaming {
    capture: Mutex<Option<(CaptureSession, Pump)>>,
    /// Wartet auf `VoiceEstablishResponse`
    establish: Mutex<Option<oneshot::Sender<bool>>>,
}

impl Streaming {
    /// Nimmt Aufnahme und Sende-Pump heraus
    fn take(&self) -> Option<(CaptureSession, Pump)> {
        // Ein wartender Workflow sieht den Abbruch am geschlossenen Kanal
        let wartend = self.establish.lock().take();
        drop(wartend);
        self.capture.lock().take()
    }

    /// Stoppt Aufnahme und Sende-Pump. Gibt true zurueck wenn sie lief.
    async fn stop(&self) -> bool {
        match self.take() {
            Some(laufend) => {
                aufnahme_beenden(laufend).await;
                true
            }
            None => false,
        }
    }

    fn is_streaming(&self) -> bool {
        self.capture.lock().is_some()
    }
}

async fn aufnahme_beenden((capture, pump): (CaptureSession, Pump)) {
    capture.shutdown().await;
    pump.stop().await;
}

/// Verbundene Session (Control + Voice)
struct ActiveSession {
    generation: u64,
    /// Beim Verbindungsaufbau gepruefte Einstellungen
    config: ClientConfig,
    control: ControlSession,
    voice: Arc<VoiceTransport>,
    streaming: Streaming,
    /// Beendet alle Tasks der Session
    cancel: CancellationToken,
}

struct Inner {
    config: RwLock<ClientConfig>,
    backend: Arc<dyn AudioBackend>,
    sink: Arc<dyn EventSink>,
    channels: SharedChannels,
    speakers: ChannelSpeakers,
    state: Mutex<ConnectionState>,
    client_id: Mutex<Option<ClientId>>,
    session: tokio::sync::Mutex<Option<Arc<ActiveSession>>>,
    /// Serialisiert Verbindungsaufbau und lokale Trennung
    connect_lock: tokio::sync::Mutex<()>,
    /// Abbruch-Token des laufenden Verbindungsaufbaus
    pending: Mutex<Option<(u64, CancellationToken)>>,
    attempts: AtomicU64,
    generation: AtomicU64,
    playback: Mutex<Option<Arc<PlaybackPipeline>>>,
}

// ---------------------------------------------------------------------------
// ClientOrchestrator
// ---------------------------------------------------------------------------

/// Einstiegspunkt fuer die Praesentationsschicht
pub struct ClientOrchestrator {
    inner: Arc<Inner>,
}

impl ClientOrchestrator {
    pub fn new(config: ClientConfig, backend: Arc<dyn AudioBackend>, sink: Arc<dyn EventSink>) -> Self {
        let channels = ChannelStateMachine::shared(config.user.username.clone());
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                backend,
                sink,
                speakers: ChannelSpeakers::new(Arc::clone(&channels)),
                channels,
                state: Mutex::new(ConnectionState::Idle),
                client_id: Mutex::new(None),
                session: tokio::sync::Mutex::new(None),
                connect_lock: tokio::sync::Mutex::new(()),
                pending: Mutex::new(None),
                attempts: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                playback: Mutex::new(None),
            }),
        }
    }

    /// Orchestrator mit echten Audio-Geraeten
    pub fn with_cpal(config: ClientConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::new(config, Arc::new(CpalBackend::new()), sink)
    }

    pub fn config(&self) -> ClientConfig {
        self.inner.config.read().clone()
    }

    /// Neue Einstellungen, gelten ab dem naechsten Verbindungsaufbau.
    /// Bei ungueltigen Werten bleiben die bisherigen Einstellungen aktiv.
    pub fn set_config(&self, config: ClientConfig) -> Result<(), ConfigError> {
        config.werte_pruefen()?;
        *self.inner.config.write() = config;
        Ok(())
    }

    /// Verbindet mit `host:port` (Adresse wie vom Benutzer eingegeben)
    pub async fn connect_address(&self, address: &str) -> ClientResult<ClientId> {
        let (host, port) = parse_address(address)?;
        self.connect(&host, port).await
    }

    /// Baut eine neue Session auf. Eine bestehende Session wird vorher
    /// beendet, ein laufender Verbindungsaufbau abgebrochen.
    pub async fn connect(&self, host: &str, port: u16) -> ClientResult<ClientId> {
        let config = self.inner.config.read().clone();
        if let Err(e) = username_pruefen(&config.user.username) {
            self.inner
                .sink
                .dispatch(ClientEvent::Notice(NOTICE_USERNAME.to_string()));
            return Err(e.into());
        }
        config.validieren()?;

        let cancel = CancellationToken::new();
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let vorher = self
            .inner
            .pending
            .lock()
            .replace((attempt, cancel.clone()));
        if let Some((_, token)) = vorher {
            token.cancel();
        }

        let _guard = self.inner.connect_lock.lock().await;
        let result = if cancel.is_cancelled() {
            Err(TransportError::Cancelled.into())
        } else {
            self.inner.teardown(None, None, None).await;
            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *self.inner.state.lock() = ConnectionState::Connecting;
            self.inner
                .channels
                .write()
                .reset_for(config.user.username.clone());
            self.inner
                .establish(host, port, &config, &cancel, generation)
                .await
        };

        {
            let mut pending = self.inner.pending.lock();
            if pending.as_ref().is_some_and(|(a, _)| *a == attempt) {
                pending.take();
            }
        }

        if let Err(e) = &result {
            if self.inner.session.lock().await.is_none() {
                *self.inner.state.lock() = ConnectionState::Disconnected;
            }
            if e.is_cancelled() {
                info!("Verbindungsaufbau abgebrochen");
            } else {
                warn!("Verbindung fehlgeschlagen: {}", e);
                self.inner
                    .sink
                    .dispatch(ClientEvent::Notice(format!("Verbindung fehlgeschlagen: {e}")));
            }
        }
        result
    }

    /// Beendet die Session. Ohne Session passiert nichts.
    pub async fn disconnect(&self) {
        let pending = self.inner.pending.lock().take();
        if let Some((_, token)) = pending {
            token.cancel();
        }
        let _guard = self.inner.connect_lock.lock().await;
        self.inner.teardown(None, None, None).await;
    }

    /// Beim Beenden der Anwendung aufrufen
    pub async fn shutdown(&self) {
        self.disconnect().await;
        let playback = self.inner.playback.lock().take();
        if let Some(playback) = playback {
            playback.stop().await;
        }
        info!("Client beendet");
    }

    /// Fordert den Beitritt zu einem Kanal an.
    /// Gibt false zurueck wenn es bereits der aktuelle Kanal ist.
    pub async fn join_channel(&self, channel_id: impl Into<ChannelId>) -> ClientResult<bool> {
        let channel_id = channel_id.into();
        let session = self
            .inner
            .session
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;

        let anfrage = self.inner.channels.write().request_join(&channel_id);
        match anfrage {
            None => {
                debug!(%channel_id, "Bereits im Kanal");
                Ok(false)
            }
            Some(packet) => {
                debug!(%channel_id, "Beitritt angefragt");
                session.control.send(packet).await?;
                Ok(true)
            }
        }
    }

    /// Schaltet das eigene Mikrofon stumm bzw. wieder an.
    /// None wenn in keinem Kanal.
    pub fn toggle_mute(&self) -> Option<bool> {
        let muted = self.inner.channels.write().toggle_mute();
        if let Some(muted) = muted {
            debug!(muted, "Mute umgeschaltet");
            self.inner.sink.dispatch(ClientEvent::ChannelsChanged);
        }
        muted
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Korrelations-ID der aktuellen Session
    pub fn client_id(&self) -> Option<ClientId> {
        self.inner.client_id.lock().clone()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.inner.channels.read().channels().to_vec()
    }

    pub fn current_channel(&self) -> Option<Channel> {
        self.inner.channels.read().current_channel().cloned()
    }

    pub fn current_client(&self) -> Option<ChannelClient> {
        self.inner.channels.read().current_client().cloned()
    }

    pub fn is_not_connecting_to_channel(&self) -> bool {
        self.inner.channels.read().is_not_connecting_to_channel()
    }

    /// Laeuft gerade eine Aufnahme?
    pub async fn is_streaming(&self) -> bool {
        self.inner
            .session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.streaming.is_streaming())
    }

    /// Puffer der laufenden Wiedergabe
    pub fn playback_buffer(&self) -> Option<PlaybackBuffer> {
        self.inner
            .playback
            .lock()
            .as_ref()
            .map(|p| p.buffer().clone())
    }
}

impl Drop for ClientOrchestrator {
    fn drop(&mut self) {
        if let Some((_, token)) = self.inner.pending.lock().take() {
            token.cancel();
        }
        if let Ok(slot) = self.inner.session.try_lock() {
            if let Some(session) = slot.as_ref() {
                session.cancel.cancel();
                if let Some(laufend) = session.streaming.take() {
                    match tokio::runtime::Handle::try_current() {
                        Ok(runtime) => {
                            runtime.spawn(aufnahme_beenden(laufend));
                        }
                        Err(_) => drop(laufend),
                    }
                }
            }
        }
    }
}

/// Zerlegt "host:port"
pub fn parse_address(address: &str) -> Result<(String, u16), ConfigError> {
    let ungueltig = || ConfigError::Ungueltig {
        feld: "address",
        grund: format!("'{address}' hat nicht die Form host:port"),
    };
    let (host, port) = address.trim().rsplit_once(':').ok_or_else(ungueltig)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ungueltig());
    }
    let port: u16 = port.parse().map_err(|_| ungueltig())?;
    Ok((host.to_string(), port))
}

// ---------------------------------------------------------------------------
// Ablauf
// ---------------------------------------------------------------------------

impl Inner {
    async fn establish(
        self: &Arc<Self>,
        host: &str,
        port: u16,
        config: &ClientConfig,
        cancel: &CancellationToken,
        generation: u64,
    ) -> ClientResult<ClientId> {
        let username = config.user.username.clone();
        let (control, control_events) =
            ControlSession::connect(host, port, &username, &config.network, cancel).await?;
        let client_id = control.client_id().clone();

        let voice_port = config.voice_port(port);
        let voice = VoiceTransport::connect(
            client_id.clone(),
            &username,
            host,
            voice_port,
            &config.network,
            cancel,
        )
        .await;
        let (voice, voice_events) = match voice {
            Ok(v) => v,
            Err(e) => {
                control.disconnect().await;
                return Err(e.into());
            }
        };

        if cancel.is_cancelled() {
            voice.disconnect().await;
            control.disconnect().await;
            return Err(TransportError::Cancelled.into());
        }

        let playback = {
            let inner = Arc::clone(self);
            let config = config.clone();
            blocking(move || inner.start_playback(&config)).await
        };
        if let Err(e) = playback {
            warn!("Wiedergabe nicht verfuegbar: {}", e);
            self.sink.dispatch(ClientEvent::Notice(format!(
                "Wiedergabe konnte nicht gestartet werden: {e}"
            )));
        }

        let session = Arc::new(ActiveSession {
            generation,
            config: config.clone(),
            control,
            voice: Arc::new(voice),
            streaming: Streaming::default(),
            cancel: CancellationToken::new(),
        });
        *self.session.lock().await = Some(Arc::clone(&session));
        *self.client_id.lock() = Some(client_id.clone());
        *self.state.lock() = ConnectionState::Connected;

        info!(%client_id, generation, "Verbunden");
        self.sink.dispatch(ClientEvent::Connected {
            client_id: client_id.clone(),
        });

        tokio::spawn(run_control_events(
            Arc::clone(self),
            Arc::clone(&session),
            control_events,
        ));
        tokio::spawn(run_voice_events(
            Arc::clone(self),
            Arc::clone(&session),
            voice_events,
        ));
        tokio::spawn(run_speaking_expiry(Arc::clone(self), session));

        Ok(client_id)
    }

    /// Blockiert beim Oeffnen des Geraets, nur auf dem Blocking-Pool aufrufen
    fn start_playback(&self, config: &ClientConfig) -> AudioResult<()> {
        if self.playback.lock().is_some() {
            return Ok(());
        }
        let codecs = codec_factory(config.audio.codec, AudioFormat::VOICE)?;
        let playback = PlaybackPipeline::start(
            Arc::clone(&self.backend),
            PlaybackConfig {
                format: AudioFormat::VOICE,
                payload: config.audio.payload,
                device: config.audio.output_device,
                buffer_capacity: DEFAULT_PLAYBACK_CAPACITY,
            },
            codecs,
            Arc::new(self.speakers.clone()),
        )?;
        *self.playback.lock() = Some(Arc::new(playback));
        Ok(())
    }

    /// Baut die Session ab. Mit `generation` nur, wenn es noch dieselbe ist.
    /// `notice` geht nur an den Benutzer, wenn diese Session abgebaut wird.
    async fn teardown(
        &self,
        generation: Option<u64>,
        reason: Option<String>,
        notice: Option<String>,
    ) -> bool {
        let session = {
            let mut slot = self.session.lock().await;
            let passt = slot
                .as_ref()
                .is_some_and(|s| generation.map_or(true, |g| g == s.generation));
            if passt {
                slot.take()
            } else {
                None
            }
        };
        let Some(session) = session else {
            return false;
        };

        *self.state.lock() = ConnectionState::Disconnecting;
        if let Some(notice) = notice {
            self.sink.dispatch(ClientEvent::Notice(notice));
        }
        session.cancel.cancel();
        let was_streaming = session.streaming.stop().await;
        session.voice.disconnect().await;
        session.control.disconnect().await;

        self.channels.write().reset();
        *self.client_id.lock() = None;
        let playback = self.playback.lock().take();
        if let Some(playback) = playback {
            playback.stop().await;
        }
        *self.state.lock() = ConnectionState::Disconnected;

        info!(generation = session.generation, ?reason, "Session beendet");
        if was_streaming {
            self.sink.dispatch(ClientEvent::StreamingChanged(false));
        }
        self.sink.dispatch(ClientEvent::CurrentChannelChanged(None));
        self.sink.dispatch(ClientEvent::ChannelsChanged);
        self.sink.dispatch(ClientEvent::Disconnected { reason });
        true
    }

    async fn handle_packet(self: &Arc<Self>, session: &Arc<ActiveSession>, packet: Packet) {
        if let Packet::ChannelUserDisconnected { username, .. } = &packet {
            let playback = self.playback.lock().clone();
            if let Some(playback) = playback {
                playback.forget_speaker(username);
            }
        }
        let effects = self.channels.write().apply(&packet);
        for effect in effects {
            match effect {
                ChannelEffect::ChannelsChanged => self.sink.dispatch(ClientEvent::ChannelsChanged),
                ChannelEffect::CurrentChannelChanged(channel_id) => self
                    .sink
                    .dispatch(ClientEvent::CurrentChannelChanged(channel_id)),
                ChannelEffect::BeginStreaming {
                    channel_id,
                    bitrate,
                } => {
                    tokio::spawn(Arc::clone(self).begin_streaming(
                        Arc::clone(session),
                        channel_id,
                        bitrate,
                    ));
                }
                ChannelEffect::StopStreaming => {
                    if session.streaming.stop().await {
                        info!("Uebertragung gestoppt");
                        self.sink.dispatch(ClientEvent::StreamingChanged(false));
                    }
                }
                ChannelEffect::VoicePermission(allowed) => {
                    let wartend = session.streaming.establish.lock().take();
                    match wartend {
                        Some(tx) => {
                            let _ = tx.send(allowed);
                        }
                        None => debug!(allowed, "Sprech-Erlaubnis ohne offene Anfrage"),
                    }
                }
                ChannelEffect::JoinDenied { reason } => {
                    info!(%reason, "Kanal-Beitritt abgelehnt");
                    self.sink.dispatch(ClientEvent::Notice(reason));
                }
                ChannelEffect::Disconnected { reason } => {
                    info!(%reason, "Server hat die Session beendet");
                    let notice = format!("Vom Server getrennt. Grund: {reason}");
                    self.teardown(Some(session.generation), Some(reason), Some(notice))
                        .await;
                }
            }
        }
    }

    /// Sprech-Erlaubnis anfragen und bei Zustimmung die Aufnahme starten
    async fn begin_streaming(
        self: Arc<Self>,
        session: Arc<ActiveSession>,
        channel_id: ChannelId,
        bitrate: i32,
    ) {
        let (tx, rx) = oneshot::channel();
        let vorher = session.streaming.establish.lock().replace(tx);
        drop(vorher);

        if let Err(e) = session.control.send(Packet::VoiceEstablish).await {
            warn!("VoiceEstablish nicht gesendet: {}", e);
            return;
        }

        let timeout = session.config.network.voice_establish_timeout();
        let allowed = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return,
            antwort = tokio::time::timeout(timeout, rx) => match antwort {
                Ok(Ok(allowed)) => allowed,
                Ok(Err(_)) => {
                    debug!(%channel_id, "Warten auf Sprech-Erlaubnis abgebrochen");
                    return;
                }
                Err(_) => {
                    warn!(%channel_id, "Keine Antwort auf VoiceEstablish, Sprechen nicht erlaubt");
                    false
                }
            },
        };

        if !allowed {
            info!(%channel_id, "Sprech-Erlaubnis verweigert");
            return;
        }
        let noch_im_kanal = self.channels.read().current_channel_id() == Some(&channel_id);
        if !noch_im_kanal || session.cancel.is_cancelled() {
            debug!(%channel_id, "Kanal inzwischen verlassen, keine Aufnahme");
            return;
        }

        if let Err(e) = self.start_capture(&session, &channel_id, bitrate).await {
            warn!("Aufnahme konnte nicht gestartet werden: {}", e);
            self.sink.dispatch(ClientEvent::Notice(format!(
                "Mikrofon konnte nicht gestartet werden: {e}"
            )));
        }
    }

    async fn start_capture(
        &self,
        session: &ActiveSession,
        channel_id: &ChannelId,
        bitrate: i32,
    ) -> ClientResult<()> {
        let config = &session.config;
        let codecs = codec_factory(config.audio.codec, AudioFormat::VOICE)?;

        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<VoiceFrame>();
        let pipeline = CapturePipeline::new(
            CaptureConfig {
                format: AudioFormat::VOICE,
                vad: config.audio.vad(),
                payload: config.audio.payload,
                bitrate,
                username: config.user.username.clone(),
                device: config.audio.input_device,
            },
            codecs.as_ref(),
            Arc::new(self.speakers.clone()),
            frames_tx,
        )?;

        let voice = Arc::clone(&session.voice);
        let pump = Pump::spawn("voice-send", frames_rx, move |frame: VoiceFrame| {
            let voice = Arc::clone(&voice);
            async move {
                if let Err(e) = voice.send(frame.username, frame.payload).await {
                    trace!("Voice-Frame nicht gesendet: {}", e);
                }
            }
        });

        let capture = CaptureSession::open(Arc::clone(&self.backend), pipeline).await?;

        // Waehrend des Oeffnens kann die Session beendet oder der Kanal
        // verlassen worden sein. Teardown und StopStreaming nehmen die
        // Aufnahme unter demselben Lock heraus.
        let (vorher, verworfen) = {
            let mut slot = session.streaming.capture.lock();
            let gueltig = !session.cancel.is_cancelled()
                && self.generation.load(Ordering::SeqCst) == session.generation
                && self.channels.read().current_channel_id() == Some(channel_id);
            if gueltig {
                let vorher = slot.replace((capture, pump));
                info!(bitrate, "Uebertragung gestartet");
                self.sink.dispatch(ClientEvent::StreamingChanged(true));
                (vorher, None)
            } else {
                (None, Some((capture, pump)))
            }
        };

        if let Some(vorher) = vorher {
            aufnahme_beenden(vorher).await;
        }
        if let Some(verworfen) = verworfen {
            debug!(%channel_id, "Session oder Kanal gewechselt, Aufnahme verworfen");
            aufnahme_beenden(verworfen).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session-Tasks
// ---------------------------------------------------------------------------

async fn run_control_events(
    inner: Arc<Inner>,
    session: Arc<ActiveSession>,
    mut events: mpsc::UnboundedReceiver<ControlEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(ControlEvent::Packet(packet)) => inner.handle_packet(&session, packet).await,
            Some(ControlEvent::Closed(reason)) => {
                if let Some(text) = reason.describe() {
                    inner
                        .teardown(Some(session.generation), Some(text.clone()), Some(text))
                        .await;
                }
                break;
            }
            None => break,
        }
    }
    trace!(generation = session.generation, "Control-Ereignis-Task beendet");
}

async fn run_voice_events(
    inner: Arc<Inner>,
    session: Arc<ActiveSession>,
    mut events: mpsc::UnboundedReceiver<VoiceEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(VoiceEvent::Data { username, payload }) => {
                let playback = inner.playback.lock().clone();
                match playback {
                    Some(playback) => {
                        let outcome = playback.on_voice_data(&username, &payload);
                        trace!(%username, ?outcome, "Voice-Daten verarbeitet");
                    }
                    None => trace!(%username, "Keine Wiedergabe, Voice-Daten verworfen"),
                }
            }
            Some(VoiceEvent::Closed(reason)) => {
                if let Some(text) = reason.describe() {
                    inner
                        .teardown(Some(session.generation), Some(text.clone()), Some(text))
                        .await;
                }
                break;
            }
            None => break,
        }
    }
    trace!(generation = session.generation, "Voice-Ereignis-Task beendet");
}

/// Setzt das Speaking-Flag stiller Sprecher regelmaessig zurueck
async fn run_speaking_expiry(inner: Arc<Inner>, session: Arc<ActiveSession>) {
    let timeout = session.config.network.speaking_timeout();
    let mut interval = tokio::time::interval(timeout / 2);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => break,
            _ = interval.tick() => {
                let expired = inner.channels.write().expire_speaking(Instant::now(), timeout);
                if expired > 0 {
                    trace!(expired, "Sprecher verstummt");
                    inner.sink.dispatch(ClientEvent::ChannelsChanged);
                }
            }
        }
    }
}
