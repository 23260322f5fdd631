//! Ereignisse an die Praesentationsschicht
//!
//! Die Session-Engine kennt kein UI. Alles was der Benutzer sehen soll
//! (Trennungsgrund, abgelehnter Kanal-Beitritt, Zustandswechsel) wird ueber
//! das `EventSink`-Trait nach aussen gereicht. Die Implementierung entscheidet
//! selbst, auf welchem Thread sie das Ereignis verarbeitet.

use std::sync::Mutex;

use crate::types::{ChannelId, ClientId};

/// Alle Ereignisse die die Engine an die Praesentationsschicht meldet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Control- und Voice-Verbindung stehen
    Connected { client_id: ClientId },
    /// Session wurde beendet (lokal oder vom Server)
    Disconnected { reason: Option<String> },
    /// Benutzer-Hinweis (z.B. Trennungsgrund, Beitritt abgelehnt)
    Notice(String),
    /// Kanal- oder Mitgliederliste hat sich geaendert
    ChannelsChanged,
    /// Eigener Kanal hat gewechselt (None = kein Kanal)
    CurrentChannelChanged(Option<ChannelId>),
    /// Mikrofon-Uebertragung gestartet/gestoppt
    StreamingChanged(bool),
}

/// Uebergabe-Schnittstelle an die Praesentationsschicht
///
/// Wird aus Netzwerk- und Audio-Kontexten aufgerufen und darf daher
/// nicht blockieren.
pub trait EventSink: Send + Sync + 'static {
    fn dispatch(&self, event: ClientEvent);
}

/// Verwirft alle Ereignisse
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&self, _event: ClientEvent) {}
}

/// Sammelt Ereignisse in einem Vec (fuer Tests und einfache Hosts)
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ClientEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gibt eine Kopie aller bisher gesammelten Ereignisse zurueck
    pub fn events(&self) -> Vec<ClientEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Gibt alle Hinweistexte zurueck
    pub fn notices(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Notice(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn dispatch(&self, event: ClientEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_sammelt_in_reihenfolge() {
        let sink = CollectingSink::new();
        sink.dispatch(ClientEvent::ChannelsChanged);
        sink.dispatch(ClientEvent::Notice("Kanal voll".into()));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ClientEvent::ChannelsChanged);
        assert_eq!(sink.notices(), vec!["Kanal voll".to_string()]);
    }

    #[test]
    fn null_sink_verwirft() {
        NullSink.dispatch(ClientEvent::StreamingChanged(true));
    }
}
