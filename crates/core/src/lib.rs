//! chorus-core – Gemeinsame Typen und Ereignisse
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die vom
//! Protokoll-, Audio- und Client-Crate gemeinsam genutzt werden.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::{ClientEvent, CollectingSink, EventSink, NullSink};
pub use types::{ChannelId, ClientId, ConnectionState};
