//! ControlSession – zuverlaessige Verbindung zum Server (TCP)
//!
//! Ablauf:
//! 1. TCP-Verbindung oeffnen, `ClientHello` senden
//! 2. Auf `ClientConnected` warten (begrenzt durch Timeout und Abbruch-Token).
//!    Pakete die der Server vorher schickt werden zwischengespeichert.
//! 3. Empfangs-Loop starten: jedes Paket geht als `ControlEvent::Packet` an
//!    den Besitzer, am Ende genau einmal `ControlEvent::Closed`.
//!
//! Nach einem Dekodier-Fehler ist die Frame-Position im Byte-Strom nicht mehr
//! vertrauenswuerdig, die Session wird dann getrennt.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chorus_core::{ClientId, ConnectionState};
use chorus_protocol::{ControlFrameCodec, Packet};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::NetzwerkEinstellungen;
use crate::error::{TransportError, TransportResult};

/// Maximale Wartezeit beim Schliessen des Schreib-Kanals
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Warum eine Verbindung beendet wurde
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Lokal per `disconnect` beendet
    Local,
    /// Gegenstelle hat die Verbindung geschlossen oder sie ist abgerissen
    Transport(String),
    /// Empfangene Daten waren nicht dekodierbar
    Protocol(String),
}

impl CloseReason {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }

    /// Text fuer den Benutzer (None bei lokaler Trennung)
    pub fn describe(&self) -> Option<String> {
        match self {
            Self::Local => None,
            Self::Transport(grund) => Some(format!("Verbindung zum Server verloren: {grund}")),
            Self::Protocol(grund) => Some(format!("Ungueltige Daten vom Server: {grund}")),
        }
    }
}

/// Ereignisse der Control-Verbindung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Packet(Packet),
    /// Letztes Ereignis, kommt genau einmal
    Closed(CloseReason),
}

// ---------------------------------------------------------------------------
// Begrenztes Warten
// ---------------------------------------------------------------------------

/// Wartet auf `fut`, hoechstens `dauer` lang und nur bis `cancel` ausloest
pub(crate) async fn begrenzt<T, F>(
    cancel: &CancellationToken,
    dauer: Duration,
    was: &str,
    fut: F,
) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        ergebnis = tokio::time::timeout(dauer, fut) => match ergebnis {
            Ok(r) => r,
            Err(_) => Err(TransportError::Timeout(format!(
                "{was} nach {} ms",
                dauer.as_millis()
            ))),
        },
    }
}

// ---------------------------------------------------------------------------
// ControlSession
// ---------------------------------------------------------------------------

type Writer = FramedWrite<OwnedWriteHalf, ControlFrameCodec>;
type Reader = FramedRead<OwnedReadHalf, ControlFrameCodec>;

struct Inner {
    client_id: ClientId,
    username: String,
    peer: SocketAddr,
    state: Mutex<ConnectionState>,
    /// Ein Lock um den Schreib-Kanal, so werden Frames nie verschachtelt
    writer: tokio::sync::Mutex<Writer>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    /// Wird beim Trennen entfernt, danach kommen keine Ereignisse mehr
    events: Mutex<Option<mpsc::UnboundedSender<ControlEvent>>>,
}

impl Inner {
    /// Gemeinsamer Trennungspfad. Gibt false zurueck wenn bereits getrennt.
    async fn close(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.state.lock() = ConnectionState::Disconnecting;
        self.shutdown.cancel();

        let shutdown_write = async {
            let mut writer = self.writer.lock().await;
            let _ = writer.close().await;
        };
        if tokio::time::timeout(CLOSE_TIMEOUT, shutdown_write).await.is_err() {
            debug!("Schreib-Kanal konnte nicht rechtzeitig geschlossen werden");
        }

        *self.state.lock() = ConnectionState::Disconnected;
        match &reason {
            CloseReason::Local => info!(peer = %self.peer, "Control-Verbindung getrennt"),
            other => warn!(peer = %self.peer, reason = ?other, "Control-Verbindung beendet"),
        }
        if let Some(events) = self.events.lock().take() {
            let _ = events.send(ControlEvent::Closed(reason));
        }
        true
    }
}

/// Verbundene Control-Session
pub struct ControlSession {
    inner: Arc<Inner>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlSession {
    /// Verbindet sich mit dem Server und wartet auf die Korrelations-ID.
    ///
    /// Gibt die Session und den Empfaenger fuer ihre Ereignisse zurueck.
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        config: &NetzwerkEinstellungen,
        cancel: &CancellationToken,
    ) -> TransportResult<(Self, mpsc::UnboundedReceiver<ControlEvent>)> {
        let address = format!("{host}:{port}");
        info!("Verbinde mit {}", address);

        let stream = begrenzt(cancel, config.handshake_timeout(), "TCP-Verbindung", async {
            TcpStream::connect(&address)
                .await
                .map_err(TransportError::from)
        })
        .await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        debug!(%peer, "TCP-Verbindung hergestellt");

        let codec = ControlFrameCodec::with_max_size(config.max_frame_size);
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, codec.clone());
        let mut writer = FramedWrite::new(write_half, codec);

        writer
            .send(Packet::ClientHello {
                username: username.to_string(),
            })
            .await?;

        // Auf die Korrelations-ID warten, fruehe Pakete aufheben
        let (client_id, early) = begrenzt(
            cancel,
            config.handshake_timeout(),
            "Warten auf ClientConnected",
            handshake(&mut reader),
        )
        .await?;
        info!(%client_id, early = early.len(), "Control-Session verbunden");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        for packet in early {
            let _ = events_tx.send(ControlEvent::Packet(packet));
        }

        let inner = Arc::new(Inner {
            client_id,
            username: username.to_string(),
            peer,
            state: Mutex::new(ConnectionState::Connected),
            writer: tokio::sync::Mutex::new(writer),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            events: Mutex::new(Some(events_tx)),
        });

        let recv_task = tokio::spawn(receive_loop(Arc::clone(&inner), reader));

        Ok((
            Self {
                inner,
                recv_task: Mutex::new(Some(recv_task)),
            },
            events_rx,
        ))
    }

    /// Vom Server vergebene Korrelations-ID
    pub fn client_id(&self) -> &ClientId {
        &self.inner.client_id
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Sendet ein Paket. Darf parallel zum Empfangs-Loop aufgerufen werden.
    ///
    /// Ein Schreibfehler des Transports trennt die Session.
    pub async fn send(&self, packet: Packet) -> TransportResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        trace!(packet = packet.name(), "Sende Control-Paket");

        let result = {
            let mut writer = self.inner.writer.lock().await;
            writer.send(packet).await
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_decode_error() => Err(e.into()),
            Err(e) => {
                let err = TransportError::from(e);
                self.inner
                    .close(CloseReason::Transport(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    /// Trennt die Session. Mehrfacher Aufruf ist harmlos, das
    /// `Closed`-Ereignis kommt trotzdem nur einmal.
    pub async fn disconnect(&self) {
        self.inner.close(CloseReason::Local).await;
        let task = self.recv_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        // Ohne disconnect endet nur der Empfangs-Loop
        self.inner.shutdown.cancel();
    }
}

async fn handshake(reader: &mut Reader) -> TransportResult<(ClientId, Vec<Packet>)> {
    let mut early = Vec::new();
    loop {
        match reader.next().await {
            Some(Ok(Packet::ClientConnected { client_id })) => return Ok((client_id, early)),
            Some(Ok(packet)) => {
                trace!(packet = packet.name(), "Paket vor ClientConnected gepuffert");
                early.push(packet);
            }
            Some(Err(e)) => return Err(e.into()),
            None => {
                return Err(TransportError::Reset(
                    "Server hat die Verbindung waehrend des Handshakes geschlossen".into(),
                ))
            }
        }
    }
}

async fn receive_loop(inner: Arc<Inner>, mut reader: Reader) {
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            frame = reader.next() => match frame {
                Some(Ok(packet)) => {
                    trace!(packet = packet.name(), "Control-Paket empfangen");
                    let zugestellt = inner
                        .events
                        .lock()
                        .as_ref()
                        .is_some_and(|events| events.send(ControlEvent::Packet(packet)).is_ok());
                    if !zugestellt {
                        debug!("Niemand empfaengt mehr Control-Ereignisse");
                        break;
                    }
                }
                Some(Err(e)) if e.is_decode_error() => {
                    warn!("Dekodier-Fehler auf der Control-Verbindung: {}", e);
                    inner.close(CloseReason::Protocol(e.to_string())).await;
                    break;
                }
                Some(Err(e)) => {
                    inner.close(CloseReason::Transport(e.to_string())).await;
                    break;
                }
                None => {
                    inner
                        .close(CloseReason::Transport("Server hat die Verbindung geschlossen".into()))
                        .await;
                    break;
                }
            }
        }
    }
    trace!("Control-Empfangs-Loop beendet");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::ChannelId;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    type ServerSide = tokio_util::codec::Framed<TcpStream, ControlFrameCodec>;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn accept(listener: &TcpListener) -> ServerSide {
        let (stream, _) = listener.accept().await.unwrap();
        tokio_util::codec::Framed::new(stream, ControlFrameCodec::new())
    }

    fn schnell() -> NetzwerkEinstellungen {
        NetzwerkEinstellungen {
            handshake_timeout_ms: 500,
            ..NetzwerkEinstellungen::default()
        }
    }

    #[tokio::test]
    async fn handshake_mit_fruehen_paketen() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let mut framed = accept(&listener).await;
            let hello = framed.next().await.unwrap().unwrap();
            assert_eq!(
                hello,
                Packet::ClientHello {
                    username: "alice".into()
                }
            );
            framed
                .send(Packet::ChannelAdded {
                    channel_id: ChannelId::new("c1"),
                    name: "Lobby".into(),
                    bitrate: 24000,
                    clients: vec![],
                })
                .await
                .unwrap();
            framed
                .send(Packet::ClientConnected {
                    client_id: ClientId::new("id-1"),
                })
                .await
                .unwrap();
            framed
        });

        let cancel = CancellationToken::new();
        let (session, mut events) =
            ControlSession::connect("127.0.0.1", port, "alice", &schnell(), &cancel)
                .await
                .unwrap();
        assert_eq!(session.client_id().as_str(), "id-1");
        assert!(session.is_connected());

        // Frueh gesendetes Paket kommt nach dem Verbinden an
        match events.recv().await {
            Some(ControlEvent::Packet(Packet::ChannelAdded { name, .. })) => {
                assert_eq!(name, "Lobby")
            }
            other => panic!("Unerwartet: {other:?}"),
        }
        let _server = server.await.unwrap();
        session.disconnect().await;
    }

    #[tokio::test]
    async fn senden_und_empfangen() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let mut framed = accept(&listener).await;
            let _hello = framed.next().await;
            framed
                .send(Packet::ClientConnected {
                    client_id: ClientId::new("id-2"),
                })
                .await
                .unwrap();
            let anfrage = framed.next().await.unwrap().unwrap();
            assert_eq!(anfrage, Packet::VoiceEstablish);
            framed
                .send(Packet::VoiceEstablishResponse { allowed: true })
                .await
                .unwrap();
            framed
        });

        let cancel = CancellationToken::new();
        let (session, mut events) =
            ControlSession::connect("127.0.0.1", port, "bob", &schnell(), &cancel)
                .await
                .unwrap();
        session.send(Packet::VoiceEstablish).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(ControlEvent::Packet(Packet::VoiceEstablishResponse {
                allowed: true
            }))
        );
        let _server = server.await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_ist_idempotent() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let mut framed = accept(&listener).await;
            let _hello = framed.next().await;
            framed
                .send(Packet::ClientConnected {
                    client_id: ClientId::new("id-3"),
                })
                .await
                .unwrap();
            framed
        });

        let cancel = CancellationToken::new();
        let (session, mut events) =
            ControlSession::connect("127.0.0.1", port, "carol", &schnell(), &cancel)
                .await
                .unwrap();
        let _server = server.await.unwrap();

        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(
            events.recv().await,
            Some(ControlEvent::Closed(CloseReason::Local))
        );
        // Kein zweites Closed-Ereignis
        assert_eq!(events.recv().await, None);
        assert!(matches!(
            session.send(Packet::VoiceEstablish).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn dekodier_fehler_trennt_session() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await.unwrap();
            let mut hello = vec![0u8; u32::from_be_bytes(len) as usize];
            stream.read_exact(&mut hello).await.unwrap();

            let connected = chorus_protocol::PacketCodec::standard()
                .encode(&Packet::ClientConnected {
                    client_id: ClientId::new("id-4"),
                })
                .unwrap();
            stream
                .write_all(&(connected.len() as u32).to_be_bytes())
                .await
                .unwrap();
            stream.write_all(&connected).await.unwrap();
            // Frame mit unbekannter Paket-ID
            stream.write_all(&[0, 0, 0, 2, 0x7F, 0x7F]).await.unwrap();
            stream
        });

        let cancel = CancellationToken::new();
        let (session, mut events) =
            ControlSession::connect("127.0.0.1", port, "dave", &schnell(), &cancel)
                .await
                .unwrap();
        let _server = server.await.unwrap();

        match events.recv().await {
            Some(ControlEvent::Closed(CloseReason::Protocol(_))) => {}
            other => panic!("Unerwartet: {other:?}"),
        }
        assert_eq!(session.state(), ConnectionState::Disconnected);
        // Spaeteres disconnect loest kein weiteres Ereignis aus
        session.disconnect().await;
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn server_trennt_verbindung() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let mut framed = accept(&listener).await;
            let _hello = framed.next().await;
            framed
                .send(Packet::ClientConnected {
                    client_id: ClientId::new("id-5"),
                })
                .await
                .unwrap();
            // Verbindung faellt weg
        });

        let cancel = CancellationToken::new();
        let (_session, mut events) =
            ControlSession::connect("127.0.0.1", port, "erin", &schnell(), &cancel)
                .await
                .unwrap();
        server.await.unwrap();

        match events.recv().await {
            Some(ControlEvent::Closed(CloseReason::Transport(_))) => {}
            other => panic!("Unerwartet: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handshake_timeout() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            // Nimmt an, antwortet aber nie
            let framed = accept(&listener).await;
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(framed);
        });

        let cancel = CancellationToken::new();
        let config = NetzwerkEinstellungen {
            handshake_timeout_ms: 50,
            ..NetzwerkEinstellungen::default()
        };
        let result = ControlSession::connect("127.0.0.1", port, "frank", &config, &cancel).await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
        server.abort();
    }

    #[tokio::test]
    async fn abbruch_waehrend_handshake() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let framed = accept(&listener).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(framed);
        });

        let cancel = CancellationToken::new();
        let abbrechen = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            abbrechen.cancel();
        });
        let result = ControlSession::connect("127.0.0.1", port, "gina", &schnell(), &cancel).await;
        match result {
            Err(e) => assert!(e.is_cancelled()),
            Ok(_) => panic!("Verbindung haette abgebrochen werden muessen"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn verbindung_abgelehnt() {
        // Port belegen und sofort wieder freigeben
        let (listener, port) = listener().await;
        drop(listener);

        let cancel = CancellationToken::new();
        let result = ControlSession::connect("127.0.0.1", port, "hank", &schnell(), &cancel).await;
        assert!(matches!(result, Err(TransportError::Refused(_))));
    }
}
