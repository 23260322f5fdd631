//! VoiceTransport – unzuverlaessige Voice-Verbindung (UDP)
//!
//! Jedes ausgehende Datagramm traegt die Korrelations-ID der Control-Session
//! (siehe `chorus_protocol::envelope`). Bereit ist der Transport erst, wenn
//! der Server eine `VoiceConnect`-Probe mit `VoiceConnectAck` bestaetigt hat.
//! Die Probe wird in festen Abstaenden wiederholt, das Warten ist durch
//! Timeout und Abbruch-Token begrenzt.
//!
//! Senden ist fire-and-forget: kein Neuversuch, keine Reihenfolge. Kaputte
//! Datagramme werden verworfen, die Verbindung bleibt bestehen.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chorus_core::{ClientId, ConnectionState};
use chorus_protocol::envelope::{self, MAX_DATAGRAM_SIZE};
use chorus_protocol::{Packet, PacketCodec};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::NetzwerkEinstellungen;
use crate::control::{begrenzt, CloseReason};
use crate::error::{TransportError, TransportResult};

/// Ereignisse der Voice-Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Voice-Daten eines anderen Teilnehmers
    Data { username: String, payload: Bytes },
    /// Letztes Ereignis, kommt genau einmal
    Closed(CloseReason),
}

/// Zaehler fuer Diagnose
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStats {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
}

struct Inner {
    socket: UdpSocket,
    client_id: ClientId,
    username: String,
    codec: PacketCodec,
    server: SocketAddr,
    state: Mutex<ConnectionState>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<VoiceEvent>>>,
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

impl Inner {
    fn emit(&self, event: VoiceEvent) -> bool {
        self.events
            .lock()
            .as_ref()
            .is_some_and(|events| events.send(event).is_ok())
    }

    fn finish(&self, reason: CloseReason) {
        *self.state.lock() = ConnectionState::Disconnected;
        if let Some(events) = self.events.lock().take() {
            let _ = events.send(VoiceEvent::Closed(reason));
        }
    }
}

/// Bereite Voice-Verbindung
pub struct VoiceTransport {
    inner: Arc<Inner>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl VoiceTransport {
    /// Oeffnet den UDP-Socket und wartet auf die Bestaetigung des Servers
    pub async fn connect(
        client_id: ClientId,
        username: &str,
        host: &str,
        port: u16,
        config: &NetzwerkEinstellungen,
        cancel: &CancellationToken,
    ) -> TransportResult<(Self, mpsc::UnboundedReceiver<VoiceEvent>)> {
        let server = tokio::net::lookup_host((host, port))
            .await?
            .next()
            .ok_or_else(|| TransportError::Refused(format!("Adresse {host}:{port} unbekannt")))?;

        // Port 0 = OS waehlt
        let bind: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(server).await?;
        info!(%server, local = ?socket.local_addr().ok(), "UDP-Socket gebunden");

        let codec = PacketCodec::standard();
        let anmeldung = envelope::encode_outbound(
            &codec,
            &client_id,
            &Packet::VoiceConnect {
                client_id: client_id.clone(),
            },
        )?;

        begrenzt(
            cancel,
            config.voice_ready_timeout(),
            "Warten auf VoiceConnectAck",
            await_ack(&socket, &codec, &anmeldung, config),
        )
        .await?;
        info!(%client_id, "Voice-Verbindung bereit");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            socket,
            client_id,
            username: username.to_string(),
            codec,
            server,
            state: Mutex::new(ConnectionState::Connected),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            events: Mutex::new(Some(events_tx)),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let recv_task = tokio::spawn(receive_loop(Arc::clone(&inner)));

        Ok((
            Self {
                inner,
                recv_task: Mutex::new(Some(recv_task)),
            },
            events_rx,
        ))
    }

    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.inner.server
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn stats(&self) -> VoiceStats {
        VoiceStats {
            sent: self.inner.sent.load(Ordering::Relaxed),
            received: self.inner.received.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    /// Sendet einen Voice-Frame (fire-and-forget)
    pub async fn send(&self, username: String, payload: Bytes) -> TransportResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let datagram = envelope::encode_outbound(
            &self.inner.codec,
            &self.inner.client_id,
            &Packet::VoiceData { username, payload },
        )?;
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Protocol(
                chorus_protocol::ProtocolError::FrameTooLarge {
                    size: datagram.len(),
                    max: MAX_DATAGRAM_SIZE,
                },
            ));
        }
        self.inner.socket.send(&datagram).await?;
        self.inner.sent.fetch_add(1, Ordering::Relaxed);
        trace!(bytes = datagram.len(), "Voice-Datagramm gesendet");
        Ok(())
    }

    /// Sendet eine Abmeldung (best effort) und gibt den Socket frei.
    /// Mehrfacher Aufruf ist harmlos.
    pub async fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.inner.state.lock() = ConnectionState::Disconnecting;

        let abmeldung = envelope::encode_outbound(
            &self.inner.codec,
            &self.inner.client_id,
            &Packet::UdpDisconnect {
                username: self.inner.username.clone(),
            },
        );
        match abmeldung {
            Ok(datagram) => {
                if let Err(e) = self.inner.socket.send(&datagram).await {
                    debug!("UdpDisconnect nicht zugestellt: {}", e);
                }
            }
            Err(e) => debug!("UdpDisconnect nicht kodierbar: {}", e),
        }

        self.inner.shutdown.cancel();
        let task = self.recv_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.finish(CloseReason::Local);
        info!(server = %self.inner.server, "Voice-Verbindung getrennt");
    }
}

impl Drop for VoiceTransport {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

/// Sendet Proben bis zur Bestaetigung
async fn await_ack(
    socket: &UdpSocket,
    codec: &PacketCodec,
    anmeldung: &[u8],
    config: &NetzwerkEinstellungen,
) -> TransportResult<()> {
    let mut interval = tokio::time::interval(config.voice_retry_interval());
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut versuche = 0u32;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                versuche += 1;
                trace!(versuche, "Sende VoiceConnect");
                if let Err(e) = socket.send(anmeldung).await {
                    // ICMP-Fehler auf UDP sind nicht endgueltig, weiter senden
                    debug!("VoiceConnect nicht gesendet: {}", e);
                }
            }
            received = socket.recv(&mut buf) => match received {
                Ok(n) => match envelope::decode_inbound(codec, &buf[..n]) {
                    Ok(Packet::VoiceConnectAck) => {
                        debug!(versuche, "VoiceConnectAck empfangen");
                        return Ok(());
                    }
                    Ok(other) => trace!(packet = other.name(), "Datagramm vor Bestaetigung ignoriert"),
                    Err(e) => debug!("Datagramm vor Bestaetigung verworfen: {}", e),
                },
                Err(e) => debug!("Empfangsfehler waehrend Voice-Handshake: {}", e),
            }
        }
    }
}

async fn receive_loop(inner: Arc<Inner>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            received = inner.socket.recv(&mut buf) => match received {
                Ok(n) => match envelope::decode_inbound(&inner.codec, &buf[..n]) {
                    Ok(Packet::VoiceDataMulticast { username, payload }) => {
                        inner.received.fetch_add(1, Ordering::Relaxed);
                        trace!(%username, bytes = payload.len(), "Voice-Daten empfangen");
                        if !inner.emit(VoiceEvent::Data { username, payload }) {
                            break;
                        }
                    }
                    Ok(Packet::VoiceConnectAck) => trace!("Verspaetete Bestaetigung ignoriert"),
                    Ok(other) => {
                        inner.dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(packet = other.name(), "Unerwartetes Voice-Paket verworfen");
                    }
                    Err(e) => {
                        // Auf UDP nur das eine Datagramm verwerfen
                        inner.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Ungueltiges Datagramm verworfen: {}", e);
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    // ICMP Port Unreachable, z.B. waehrend der Server neu startet
                    debug!("Voice-Empfang: {}", e);
                }
                Err(e) => {
                    warn!("Voice-Empfang fehlgeschlagen: {}", e);
                    if !inner.closed.swap(true, Ordering::SeqCst) {
                        inner.finish(CloseReason::Transport(e.to_string()));
                    }
                    break;
                }
            }
        }
    }
    trace!("Voice-Empfangs-Loop beendet");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FakeServer {
        socket: UdpSocket,
        codec: PacketCodec,
    }

    impl FakeServer {
        async fn start() -> (Self, u16) {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let port = socket.local_addr().unwrap().port();
            (
                Self {
                    socket,
                    codec: PacketCodec::standard(),
                },
                port,
            )
        }

        async fn recv(&self) -> (ClientId, Packet, SocketAddr) {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            let (n, from) = self.socket.recv_from(&mut buf).await.unwrap();
            let (id, packet) = envelope::decode_outbound(&self.codec, &buf[..n]).unwrap();
            (id, packet, from)
        }

        async fn send(&self, packet: &Packet, to: SocketAddr) {
            let data = envelope::encode_inbound(&self.codec, packet).unwrap();
            self.socket.send_to(&data, to).await.unwrap();
        }

        /// Wartet auf die erste Probe und bestaetigt sie
        async fn accept(&self) -> SocketAddr {
            let (id, packet, from) = self.recv().await;
            assert_eq!(packet, Packet::VoiceConnect { client_id: id });
            self.send(&Packet::VoiceConnectAck, from).await;
            from
        }
    }

    fn schnell() -> NetzwerkEinstellungen {
        NetzwerkEinstellungen {
            voice_ready_timeout_ms: 1000,
            voice_retry_interval_ms: 20,
            ..NetzwerkEinstellungen::default()
        }
    }

    async fn verbinden(port: u16, server: &FakeServer) -> (VoiceTransport, mpsc::UnboundedReceiver<VoiceEvent>, SocketAddr) {
        let cancel = CancellationToken::new();
        let config = schnell();
        let client = VoiceTransport::connect(
            ClientId::new("id-1"),
            "alice",
            "127.0.0.1",
            port,
            &config,
            &cancel,
        );
        let (client, from) = tokio::join!(client, server.accept());
        let (transport, events) = client.unwrap();
        (transport, events, from)
    }

    #[tokio::test]
    async fn handshake_und_voice_daten() {
        let (server, port) = FakeServer::start().await;
        let (transport, mut events, client_addr) = verbinden(port, &server).await;
        assert_eq!(transport.state(), ConnectionState::Connected);

        // Ungueltiges Datagramm wird verworfen, die Verbindung bleibt
        server.socket.send_to(&[0xFF], client_addr).await.unwrap();
        server
            .send(
                &Packet::VoiceDataMulticast {
                    username: "bob".into(),
                    payload: Bytes::from_static(&[1, 2, 3]),
                },
                client_addr,
            )
            .await;

        assert_eq!(
            events.recv().await,
            Some(VoiceEvent::Data {
                username: "bob".into(),
                payload: Bytes::from_static(&[1, 2, 3]),
            })
        );
        assert_eq!(transport.stats().dropped, 1);
        assert_eq!(transport.stats().received, 1);
    }

    #[tokio::test]
    async fn ausgehende_daten_tragen_korrelations_id() {
        let (server, port) = FakeServer::start().await;
        let (transport, _events, _) = verbinden(port, &server).await;

        transport
            .send("alice".into(), Bytes::from_static(&[9, 9]))
            .await
            .unwrap();

        // Weitere Proben koennen noch unterwegs sein
        loop {
            let (id, packet, _) = server.recv().await;
            assert_eq!(id.as_str(), "id-1");
            if let Packet::VoiceData { username, payload } = packet {
                assert_eq!(username, "alice");
                assert_eq!(&payload[..], &[9, 9]);
                break;
            }
        }
    }

    #[tokio::test]
    async fn disconnect_sendet_abmeldung() {
        let (server, port) = FakeServer::start().await;
        let (transport, mut events, _) = verbinden(port, &server).await;

        transport.disconnect().await;
        transport.disconnect().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        loop {
            let (_, packet, _) = server.recv().await;
            if let Packet::UdpDisconnect { username } = packet {
                assert_eq!(username, "alice");
                break;
            }
        }
        assert_eq!(events.recv().await, Some(VoiceEvent::Closed(CloseReason::Local)));
        assert_eq!(events.recv().await, None);
        assert!(matches!(
            transport.send("alice".into(), Bytes::new()).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn anmeldung_wird_wiederholt() {
        let (server, port) = FakeServer::start().await;
        let cancel = CancellationToken::new();
        let config = schnell();
        let client = VoiceTransport::connect(
            ClientId::new("id-2"),
            "bob",
            "127.0.0.1",
            port,
            &config,
            &cancel,
        );
        let bestaetigen = async {
            // Die ersten beiden Proben gehen "verloren"
            let _ = server.recv().await;
            let _ = server.recv().await;
            server.accept().await
        };
        let (client, _) = tokio::join!(client, bestaetigen);
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn ohne_bestaetigung_timeout() {
        let (_server, port) = FakeServer::start().await;
        let cancel = CancellationToken::new();
        let config = NetzwerkEinstellungen {
            voice_ready_timeout_ms: 80,
            voice_retry_interval_ms: 10,
            ..NetzwerkEinstellungen::default()
        };
        let result = VoiceTransport::connect(
            ClientId::new("id-3"),
            "carol",
            "127.0.0.1",
            port,
            &config,
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn abbruch_beendet_warten() {
        let (_server, port) = FakeServer::start().await;
        let cancel = CancellationToken::new();
        let abbrechen = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            abbrechen.cancel();
        });
        let result = VoiceTransport::connect(
            ClientId::new("id-4"),
            "dave",
            "127.0.0.1",
            port,
            &schnell(),
            &cancel,
        )
        .await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }
}
