//! Two-party audio/video call session core
//!
//! `peercall` drives the full lifecycle of a direct peer-to-peer call:
//! offer/answer negotiation over a pluggable signaling relay, trickled ICE
//! exchange, an in-band control channel for mute/camera/chat signals, and
//! media tracks that can be swapped without renegotiation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  SessionController                   │
//! │    lifecycle state machine, generation-tagged        │
//! │    snapshots, automatic re-arm after every call      │
//! └──────┬────────────────┬──────────────────┬───────────┘
//!        │                │                  │
//! ┌──────▼──────┐  ┌──────▼───────┐  ┌───────▼────────┐
//! │ Signaling   │  │ Control      │  │ Media          │
//! │ Relay       │  │ Channel      │  │ Pipeline       │
//! │ offer/answer│  │ mute/camera/ │  │ replace_track, │
//! │ + candidates│  │ text/binary  │  │ remote tracks  │
//! └─────────────┘  └──────────────┘  └────────────────┘
//! ```
//!
//! The controller is always ready: a fresh armed session exists from
//! construction on, and every teardown immediately arms the next one, so
//! hanging up and starting a new call needs no setup step in between.
//!
//! # Example
//!
//! ```no_run
//! use peercall::{CallConfig, MemoryRelay, SessionController, SilentMediaSource};
//! use std::sync::Arc;
//!
//! # async fn run() -> peercall::Result<()> {
//! let relay = MemoryRelay::new();
//!
//! let caller = SessionController::new(
//!     CallConfig::default(),
//!     relay.clone(),
//!     Arc::new(SilentMediaSource),
//! )
//! .await?;
//!
//! // Share the id out-of-band; the other side answers with it.
//! let call_id = caller.start_as_caller().await?;
//!
//! let answerer = SessionController::new(
//!     CallConfig::default(),
//!     relay,
//!     Arc::new(SilentMediaSource),
//! )
//! .await?;
//! answerer.answer_call(&call_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod session;
pub mod signaling;

pub use channels::{ChannelState, ControlChannel, ControlMessage};
pub use config::{CallConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use events::{CallEvent, CallStatus};
pub use media::{MediaPipeline, MediaSource, SilentMediaSource, TrackKind};
pub use session::SessionController;
pub use signaling::{
    CallId, CallRecord, CandidateRole, CandidateStream, CallRecordStream, MemoryRelay,
    SignalingRelay,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
