//! chorus-client – Session-Engine des Voice-Clients
//!
//! ## Architektur
//!
//! ```text
//! Praesentation
//!     |  connect / join_channel / toggle_mute / disconnect
//!     v
//! ClientOrchestrator ---- ClientEvent ----> EventSink
//!     |
//!     +-- ControlSession (TCP, ControlFrameCodec)
//!     +-- VoiceTransport (UDP, Voice-Envelope)
//!     +-- ChannelStateMachine (Kanaele, Mitglieder, Sprecher)
//!     +-- Capture / Playback (chorus-audio)
//! ```

pub mod channels;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod voice;

pub use channels::{
    Channel, ChannelClient, ChannelEffect, ChannelSpeakers, ChannelStateMachine, SharedChannels,
};
pub use config::{
    AudioEinstellungen, ClientConfig, LoggingEinstellungen, NetzwerkEinstellungen,
    UserEinstellungen,
};
pub use control::{CloseReason, ControlEvent, ControlSession};
pub use error::{
    ClientError, ClientResult, ConfigError, TransportError, TransportResult,
};
pub use logging::init_logging;
pub use orchestrator::{parse_address, ClientOrchestrator};
pub use voice::{VoiceEvent, VoiceStats, VoiceTransport};

pub use chorus_core::{
    ChannelId, ClientEvent, ClientId, CollectingSink, ConnectionState, EventSink, NullSink,
};
