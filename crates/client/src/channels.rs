//! ChannelStateMachine – Spiegel der Kanal- und Mitgliederliste des Servers
//!
//! Die Zustandsmaschine macht selbst kein I/O. `apply` verarbeitet ein
//! Control-Paket und gibt zurueck, was daraus folgt (`ChannelEffect`); der
//! Orchestrator fuehrt diese Folgen aus. Kanaele und Mitglieder entstehen nur
//! durch Server-Ereignisse, lokal wird nie etwas erfunden.
//!
//! Geteilt wird sie als `SharedChannels` (parking_lot RwLock): Netzwerk-Tasks
//! schreiben, Audio-Callbacks und die Praesentationsschicht lesen.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chorus_audio::{LocalSpeaker, SpeakerDirectory};
use chorus_core::ChannelId;
use chorus_protocol::Packet;
use parking_lot::RwLock;
use tracing::{debug, trace};

/// Mitglied eines Kanals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelClient {
    /// Eindeutig innerhalb des Kanals
    pub username: String,
    /// Nur lokal, wird nie an den Server gemeldet
    pub muted: bool,
    pub speaking: bool,
    pub last_voice_activity: Option<Instant>,
}

impl ChannelClient {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            muted: false,
            speaking: false,
            last_voice_activity: None,
        }
    }
}

/// Kanal wie vom Server gemeldet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// Ziel-Bitrate des Encoders
    pub bitrate: i32,
    pub clients: Vec<ChannelClient>,
}

impl Channel {
    pub fn client(&self, username: &str) -> Option<&ChannelClient> {
        self.clients.iter().find(|c| c.username == username)
    }

    fn client_mut(&mut self, username: &str) -> Option<&mut ChannelClient> {
        self.clients.iter_mut().find(|c| c.username == username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.client(username).is_some()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.username.clone()).collect()
    }

    /// Fuegt ein Mitglied hinzu, doppelte Namen werden ignoriert
    fn add_client(&mut self, username: &str) -> bool {
        if self.contains(username) {
            return false;
        }
        self.clients.push(ChannelClient::new(username));
        true
    }

    fn remove_client(&mut self, username: &str) -> bool {
        let vorher = self.clients.len();
        self.clients.retain(|c| c.username != username);
        self.clients.len() != vorher
    }
}

/// Folge eines Server-Ereignisses, ausgefuehrt vom Orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEffect {
    /// Kanal- oder Mitgliederliste geaendert
    ChannelsChanged,
    /// Eigener Kanal gewechselt
    CurrentChannelChanged(Option<ChannelId>),
    /// Eigener Benutzer ist beigetreten: Sprech-Erlaubnis anfragen und bei
    /// Zustimmung die Aufnahme starten
    BeginStreaming { channel_id: ChannelId, bitrate: i32 },
    /// Aufnahme und Encoder stoppen
    StopStreaming,
    /// Antwort auf `VoiceEstablish`
    VoicePermission(bool),
    /// Beitritt abgelehnt, Grund geht an den Benutzer
    JoinDenied { reason: String },
    /// Server beendet die Session
    Disconnected { reason: String },
}

// ---------------------------------------------------------------------------
// ChannelStateMachine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ChannelStateMachine {
    local_username: String,
    /// In der Reihenfolge, in der der Server sie gemeldet hat
    channels: Vec<Channel>,
    current: Option<ChannelId>,
    voice_permitted: Option<bool>,
    not_connecting: bool,
}

pub type SharedChannels = Arc<RwLock<ChannelStateMachine>>;

impl ChannelStateMachine {
    pub fn new(local_username: impl Into<String>) -> Self {
        Self {
            local_username: local_username.into(),
            channels: Vec::new(),
            current: None,
            voice_permitted: None,
            not_connecting: true,
        }
    }

    pub fn shared(local_username: impl Into<String>) -> SharedChannels {
        Arc::new(RwLock::new(Self::new(local_username)))
    }

    pub fn local_username(&self) -> &str {
        &self.local_username
    }

    /// Leert den gesamten Zustand (bei jeder Trennung)
    pub fn reset(&mut self) {
        self.channels.clear();
        self.current = None;
        self.voice_permitted = None;
        self.not_connecting = true;
        debug!("Kanal-Zustand zurueckgesetzt");
    }

    /// Zuruecksetzen und neue lokale Identitaet setzen (vor jedem Verbinden)
    pub fn reset_for(&mut self, local_username: impl Into<String>) {
        self.reset();
        self.local_username = local_username.into();
    }

    /// Verarbeitet ein Control-Paket
    pub fn apply(&mut self, packet: &Packet) -> Vec<ChannelEffect> {
        match packet {
            Packet::ChannelAdded {
                channel_id,
                name,
                bitrate,
                clients,
            } => self.channel_added(channel_id, name, *bitrate, clients),
            Packet::ChannelUserConnected {
                channel_id,
                username,
            } => self.user_connected(channel_id, username),
            Packet::ChannelUserDisconnected {
                channel_id,
                username,
            } => self.user_disconnected(channel_id, username),
            Packet::VoiceEstablishResponse { allowed } => {
                self.voice_permitted = Some(*allowed);
                self.not_connecting = true;
                vec![ChannelEffect::VoicePermission(*allowed)]
            }
            Packet::RequestChannelJoinResponse { allowed, reason } => {
                if *allowed {
                    // Mitgliedschaft kommt ueber ChannelUserConnected
                    Vec::new()
                } else {
                    self.not_connecting = true;
                    vec![ChannelEffect::JoinDenied {
                        reason: reason.clone(),
                    }]
                }
            }
            Packet::Disconnect { reason } => vec![ChannelEffect::Disconnected {
                reason: reason.clone(),
            }],
            other => {
                trace!(packet = other.name(), "Paket ohne Kanal-Bezug");
                Vec::new()
            }
        }
    }

    fn channel_added(
        &mut self,
        channel_id: &ChannelId,
        name: &str,
        bitrate: i32,
        clients: &[String],
    ) -> Vec<ChannelEffect> {
        match self.channel_mut(channel_id) {
            Some(channel) => {
                // Erneute Meldung aktualisiert Name und Bitrate
                channel.name = name.to_string();
                channel.bitrate = bitrate;
                for username in clients {
                    channel.add_client(username);
                }
            }
            None => {
                let mut channel = Channel {
                    id: channel_id.clone(),
                    name: name.to_string(),
                    bitrate,
                    clients: Vec::new(),
                };
                for username in clients {
                    channel.add_client(username);
                }
                debug!(%channel_id, name, bitrate, "Kanal hinzugefuegt");
                self.channels.push(channel);
            }
        }
        vec![ChannelEffect::ChannelsChanged]
    }

    fn user_connected(&mut self, channel_id: &ChannelId, username: &str) -> Vec<ChannelEffect> {
        let is_local = username == self.local_username;
        let Some(channel) = self.channel_mut(channel_id) else {
            trace!(%channel_id, username, "Beitritt zu unbekanntem Kanal ignoriert");
            return Vec::new();
        };
        if !channel.add_client(username) {
            trace!(%channel_id, username, "Doppelter Beitritt ignoriert");
            return Vec::new();
        }
        let bitrate = channel.bitrate;
        debug!(%channel_id, username, "Benutzer beigetreten");

        let mut effects = Vec::new();
        if is_local {
            // Wechsel ohne vorherige Abmeldung: alten Kanal verlassen
            if let Some(alt) = self.current.take() {
                let local = self.local_username.clone();
                if let Some(alter_kanal) = self.channel_mut(&alt) {
                    alter_kanal.remove_client(&local);
                }
                effects.push(ChannelEffect::StopStreaming);
            }
            self.current = Some(channel_id.clone());
            self.voice_permitted = None;
            self.not_connecting = false;
            effects.push(ChannelEffect::CurrentChannelChanged(Some(channel_id.clone())));
            effects.push(ChannelEffect::BeginStreaming {
                channel_id: channel_id.clone(),
                bitrate,
            });
        }
        effects.push(ChannelEffect::ChannelsChanged);
        effects
    }

    fn user_disconnected(&mut self, channel_id: &ChannelId, username: &str) -> Vec<ChannelEffect> {
        let Some(channel) = self.channel_mut(channel_id) else {
            trace!(%channel_id, username, "Abmeldung aus unbekanntem Kanal ignoriert");
            return Vec::new();
        };
        let removed = channel.remove_client(username);
        debug!(%channel_id, username, removed, "Benutzer hat den Kanal verlassen");

        let mut effects = Vec::new();
        if username == self.local_username {
            effects.push(ChannelEffect::StopStreaming);
            if self.current.as_ref() == Some(channel_id) {
                self.current = None;
                self.voice_permitted = None;
                self.not_connecting = true;
                effects.push(ChannelEffect::CurrentChannelChanged(None));
            }
        }
        if removed {
            effects.push(ChannelEffect::ChannelsChanged);
        }
        effects
    }

    /// Beitritts-Anfrage fuer einen Kanal.
    /// None wenn der Kanal bereits der aktuelle ist.
    pub fn request_join(&mut self, channel_id: &ChannelId) -> Option<Packet> {
        if self.current.as_ref() == Some(channel_id) {
            return None;
        }
        self.not_connecting = false;
        Some(Packet::RequestChannelJoin {
            channel_id: channel_id.clone(),
        })
    }

    /// Schaltet das lokale Mute-Flag um. None wenn in keinem Kanal.
    pub fn toggle_mute(&mut self) -> Option<bool> {
        let local = self.local_username.clone();
        let client = self.current_channel_mut()?.client_mut(&local)?;
        client.muted = !client.muted;
        Some(client.muted)
    }

    pub fn is_local_muted(&self) -> bool {
        self.current_client().is_some_and(|c| c.muted)
    }

    pub fn set_local_speaking(&mut self, speaking: bool) {
        let local = self.local_username.clone();
        if let Some(client) = self
            .current_channel_mut()
            .and_then(|c| c.client_mut(&local))
        {
            client.speaking = speaking;
        }
    }

    /// Markiert einen Sprecher im aktuellen Kanal.
    /// Gibt false zurueck wenn er dort nicht Mitglied ist.
    pub fn mark_voice_activity(&mut self, username: &str, now: Instant) -> bool {
        match self
            .current_channel_mut()
            .and_then(|c| c.client_mut(username))
        {
            Some(client) => {
                client.speaking = true;
                client.last_voice_activity = Some(now);
                true
            }
            None => false,
        }
    }

    /// Setzt das Speaking-Flag entfernter Sprecher zurueck, deren letzte
    /// Aktivitaet laenger als `timeout` her ist. Gibt die Anzahl zurueck.
    pub fn expire_speaking(&mut self, now: Instant, timeout: Duration) -> usize {
        let local = self.local_username.clone();
        let mut expired = 0;
        for client in self
            .channels
            .iter_mut()
            .flat_map(|c| c.clients.iter_mut())
            .filter(|c| c.speaking && c.username != local)
        {
            let abgelaufen = client
                .last_voice_activity
                .map_or(true, |t| now.saturating_duration_since(t) >= timeout);
            if abgelaufen {
                client.speaking = false;
                expired += 1;
            }
        }
        expired
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| &c.id == channel_id)
    }

    fn channel_mut(&mut self, channel_id: &ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| &c.id == channel_id)
    }

    pub fn current_channel_id(&self) -> Option<&ChannelId> {
        self.current.as_ref()
    }

    pub fn current_channel(&self) -> Option<&Channel> {
        self.current.as_ref().and_then(|id| self.channel(id))
    }

    fn current_channel_mut(&mut self) -> Option<&mut Channel> {
        let id = self.current.clone()?;
        self.channel_mut(&id)
    }

    /// Eigener Eintrag im aktuellen Kanal
    pub fn current_client(&self) -> Option<&ChannelClient> {
        self.current_channel()?.client(&self.local_username)
    }

    pub fn voice_permitted(&self) -> Option<bool> {
        self.voice_permitted
    }

    /// False zwischen einer Beitritts-Anfrage und der naechsten Antwort
    pub fn is_not_connecting_to_channel(&self) -> bool {
        self.not_connecting
    }
}

// ---------------------------------------------------------------------------
// Adapter fuer die Audio-Pipelines
// ---------------------------------------------------------------------------

/// Sicht der Audio-Pipelines auf den Kanal-Zustand
#[derive(Clone)]
pub struct ChannelSpeakers {
    state: SharedChannels,
}

impl ChannelSpeakers {
    pub fn new(state: SharedChannels) -> Self {
        Self { state }
    }
}

impl LocalSpeaker for ChannelSpeakers {
    fn is_muted(&self) -> bool {
        self.state.read().is_local_muted()
    }

    fn set_speaking(&self, speaking: bool) {
        self.state.write().set_local_speaking(speaking);
    }
}

impl SpeakerDirectory for ChannelSpeakers {
    fn mark_speaking(&self, username: &str) -> bool {
        self.state
            .write()
            .mark_voice_activity(username, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kanal(id: &str) -> Packet {
        Packet::ChannelAdded {
            channel_id: ChannelId::new(id),
            name: "Lobby".into(),
            bitrate: 24000,
            clients: vec![],
        }
    }

    fn beitritt(id: &str, username: &str) -> Packet {
        Packet::ChannelUserConnected {
            channel_id: ChannelId::new(id),
            username: username.into(),
        }
    }

    fn austritt(id: &str, username: &str) -> Packet {
        Packet::ChannelUserDisconnected {
            channel_id: ChannelId::new(id),
            username: username.into(),
        }
    }

    #[test]
    fn kanal_hinzufuegen() {
        let mut sm = ChannelStateMachine::new("alice");
        let effects = sm.apply(&Packet::ChannelAdded {
            channel_id: ChannelId::new("c1"),
            name: "Lobby".into(),
            bitrate: 24000,
            clients: vec!["bob".into(), "bob".into(), "carol".into()],
        });
        assert_eq!(effects, vec![ChannelEffect::ChannelsChanged]);
        let c1 = sm.channel(&ChannelId::new("c1")).unwrap();
        assert_eq!(c1.name, "Lobby");
        assert_eq!(c1.bitrate, 24000);
        assert_eq!(c1.usernames(), vec!["bob", "carol"]);
    }

    #[test]
    fn beitritt_und_austritt_leeren_kanal() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "bob"));
        assert_eq!(sm.channel(&ChannelId::new("c1")).unwrap().usernames(), vec!["bob"]);
        sm.apply(&austritt("c1", "bob"));
        assert!(sm.channel(&ChannelId::new("c1")).unwrap().clients.is_empty());
    }

    #[test]
    fn doppelter_beitritt_erzeugt_keinen_zweiten_eintrag() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "bob"));
        assert!(sm.apply(&beitritt("c1", "bob")).is_empty());
        assert_eq!(sm.channel(&ChannelId::new("c1")).unwrap().clients.len(), 1);
    }

    #[test]
    fn unbekannter_kanal_wird_ignoriert() {
        let mut sm = ChannelStateMachine::new("alice");
        assert!(sm.apply(&beitritt("x", "bob")).is_empty());
        assert!(sm.apply(&austritt("x", "bob")).is_empty());
        assert!(sm.channels().is_empty());
    }

    #[test]
    fn eigener_beitritt_startet_streaming() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        let effects = sm.apply(&beitritt("c1", "alice"));
        assert_eq!(
            effects,
            vec![
                ChannelEffect::CurrentChannelChanged(Some(ChannelId::new("c1"))),
                ChannelEffect::BeginStreaming {
                    channel_id: ChannelId::new("c1"),
                    bitrate: 24000
                },
                ChannelEffect::ChannelsChanged,
            ]
        );
        assert_eq!(sm.current_channel_id(), Some(&ChannelId::new("c1")));
        assert_eq!(sm.current_client().unwrap().username, "alice");
        assert!(!sm.is_not_connecting_to_channel());

        let effects = sm.apply(&Packet::VoiceEstablishResponse { allowed: false });
        assert_eq!(effects, vec![ChannelEffect::VoicePermission(false)]);
        assert_eq!(sm.voice_permitted(), Some(false));
        assert!(sm.is_not_connecting_to_channel());
    }

    #[test]
    fn eigener_austritt_stoppt_streaming() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "alice"));
        let effects = sm.apply(&austritt("c1", "alice"));
        assert_eq!(
            effects,
            vec![
                ChannelEffect::StopStreaming,
                ChannelEffect::CurrentChannelChanged(None),
                ChannelEffect::ChannelsChanged,
            ]
        );
        assert!(sm.current_channel().is_none());
        assert!(sm.current_client().is_none());
        assert!(sm.channel(&ChannelId::new("c1")).unwrap().clients.is_empty());
    }

    #[test]
    fn kanalwechsel_ohne_abmeldung() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&kanal("c2"));
        sm.apply(&beitritt("c1", "alice"));
        let effects = sm.apply(&beitritt("c2", "alice"));
        assert_eq!(effects[0], ChannelEffect::StopStreaming);
        assert!(!sm.channel(&ChannelId::new("c1")).unwrap().contains("alice"));
        assert_eq!(sm.current_channel_id(), Some(&ChannelId::new("c2")));
    }

    #[test]
    fn abgelehnter_beitritt() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        assert!(sm.request_join(&ChannelId::new("c1")).is_some());
        assert!(!sm.is_not_connecting_to_channel());

        let effects = sm.apply(&Packet::RequestChannelJoinResponse {
            allowed: false,
            reason: "Kanal ist voll".into(),
        });
        assert_eq!(
            effects,
            vec![ChannelEffect::JoinDenied {
                reason: "Kanal ist voll".into()
            }]
        );
        assert!(sm.is_not_connecting_to_channel());
        // Mitgliedschaft unveraendert
        assert!(sm.channel(&ChannelId::new("c1")).unwrap().clients.is_empty());
    }

    #[test]
    fn beitritt_zum_aktuellen_kanal_ist_noop() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "alice"));
        sm.apply(&Packet::VoiceEstablishResponse { allowed: true });
        assert!(sm.request_join(&ChannelId::new("c1")).is_none());
        assert!(sm.is_not_connecting_to_channel());
        assert_eq!(
            sm.request_join(&ChannelId::new("c2")),
            Some(Packet::RequestChannelJoin {
                channel_id: ChannelId::new("c2")
            })
        );
    }

    #[test]
    fn mute_umschalten() {
        let mut sm = ChannelStateMachine::new("alice");
        assert_eq!(sm.toggle_mute(), None);
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "alice"));
        assert_eq!(sm.toggle_mute(), Some(true));
        assert!(sm.is_local_muted());
        assert_eq!(sm.toggle_mute(), Some(false));
        assert!(!sm.is_local_muted());
    }

    #[test]
    fn sprecher_markieren_und_ablaufen_lassen() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "alice"));
        sm.apply(&beitritt("c1", "bob"));

        let start = Instant::now();
        assert!(sm.mark_voice_activity("bob", start));
        assert!(!sm.mark_voice_activity("mallory", start));
        assert!(sm.current_channel().unwrap().client("bob").unwrap().speaking);

        let timeout = Duration::from_millis(500);
        assert_eq!(sm.expire_speaking(start + Duration::from_millis(100), timeout), 0);
        assert_eq!(sm.expire_speaking(start + Duration::from_millis(600), timeout), 1);
        assert!(!sm.current_channel().unwrap().client("bob").unwrap().speaking);
    }

    #[test]
    fn lokales_speaking_laeuft_nicht_ab() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "alice"));
        sm.set_local_speaking(true);
        assert_eq!(
            sm.expire_speaking(Instant::now() + Duration::from_secs(10), Duration::from_millis(1)),
            0
        );
        assert!(sm.current_client().unwrap().speaking);
    }

    #[test]
    fn reset_leert_alles() {
        let mut sm = ChannelStateMachine::new("alice");
        sm.apply(&kanal("c1"));
        sm.apply(&beitritt("c1", "alice"));
        sm.reset();
        assert!(sm.channels().is_empty());
        assert!(sm.current_channel_id().is_none());
        assert!(sm.is_not_connecting_to_channel());
        assert_eq!(sm.voice_permitted(), None);
    }

    #[test]
    fn server_trennung() {
        let mut sm = ChannelStateMachine::new("alice");
        assert_eq!(
            sm.apply(&Packet::Disconnect {
                reason: "Wartung".into()
            }),
            vec![ChannelEffect::Disconnected {
                reason: "Wartung".into()
            }]
        );
    }

    #[test]
    fn adapter_fuer_audio() {
        let shared = ChannelStateMachine::shared("alice");
        {
            let mut sm = shared.write();
            sm.apply(&kanal("c1"));
            sm.apply(&beitritt("c1", "alice"));
            sm.apply(&beitritt("c1", "bob"));
        }
        let speakers = ChannelSpeakers::new(Arc::clone(&shared));
        assert!(speakers.mark_speaking("bob"));
        assert!(!speakers.mark_speaking("mallory"));
        assert!(!LocalSpeaker::is_muted(&speakers));
        shared.write().toggle_mute();
        assert!(LocalSpeaker::is_muted(&speakers));
        speakers.set_speaking(true);
        assert!(shared.read().current_client().unwrap().speaking);
    }
}
