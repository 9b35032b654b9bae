//! Status and control events surfaced to the embedding application
//!
//! The session core never touches UI state; it only emits events on a
//! broadcast channel for an external presenter to render.

use tokio::sync::broadcast;

/// Capacity of the event broadcast channel. Slow subscribers that fall
/// further behind than this lose the oldest events (broadcast lag).
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle status of the call session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// Armed and ready: a fresh session exists, no negotiation started
    Idle,
    /// Offer/answer/candidate exchange in progress
    Negotiating,
    /// Control channel open, peers connected
    Connected,
    /// Session torn down (rearm follows automatically)
    Closed,
}

/// Events emitted by a [`SessionController`](crate::SessionController)
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The session status changed
    Status(CallStatus),

    /// The remote peer muted or unmuted its microphone
    RemoteAudio {
        /// true when the remote microphone is now muted
        muted: bool,
    },

    /// The remote peer turned its camera on or off
    RemoteCamera {
        /// true when the remote camera is now sending
        enabled: bool,
    },

    /// Text message received over the control channel
    RemoteText(String),

    /// Binary payload received over the control channel
    RemoteBinary(Vec<u8>),
}

/// Create the event channel used by a controller.
pub(crate) fn event_channel() -> broadcast::Sender<CallEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
