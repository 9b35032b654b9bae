//! Control channel wrapper over an RTCDataChannel

use super::ControlMessage;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Control channel state
///
/// `Closed` is terminal: closing is irreversible and triggers session
/// teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel created, transport negotiation not finished
    Connecting,
    /// Channel open and carrying control traffic
    Open,
    /// Channel closed (terminal)
    Closed,
}

/// Reliable, ordered, bidirectional control channel over the active session
pub struct ControlChannel {
    label: String,
    rtc_channel: Arc<RTCDataChannel>,
    state: Arc<RwLock<ChannelState>>,
}

impl ControlChannel {
    /// Create the channel on a peer connection (caller side).
    ///
    /// Reliable and ordered; this is what makes the channel usable as the
    /// call-lifetime signal.
    pub async fn create(peer_connection: &RTCPeerConnection, label: &str) -> Result<Self> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };

        let rtc_channel = peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::ChannelError(format!("Failed to create control channel: {}", e)))?;

        Ok(Self::from_rtc_channel(rtc_channel))
    }

    /// Wrap a channel received from the remote peer (answerer side).
    pub fn from_rtc_channel(rtc_channel: Arc<RTCDataChannel>) -> Self {
        Self {
            label: rtc_channel.label().to_string(),
            rtc_channel,
            state: Arc::new(RwLock::new(ChannelState::Connecting)),
        }
    }

    /// Get the channel label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get current state
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Check if the channel is open
    pub async fn is_open(&self) -> bool {
        *self.state.read().await == ChannelState::Open
    }

    /// Register the open handler.
    ///
    /// Fires once when the channel transitions to `Open`; this is the
    /// "two peers are now connected" signal.
    pub fn on_open<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let label = self.label.clone();

        self.rtc_channel.on_open(Box::new(move || {
            let state = Arc::clone(&state);
            let label = label.clone();
            let fut = handler();
            Box::pin(async move {
                debug!("control channel '{}' open", label);
                *state.write().await = ChannelState::Open;
                fut.await;
            })
        }));
    }

    /// Register the close handler.
    ///
    /// Closure is the hangup signal, however it was triggered (explicit
    /// hangup, peer-initiated close, or transport failure).
    pub fn on_close<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let label = self.label.clone();

        self.rtc_channel.on_close(Box::new(move || {
            let state = Arc::clone(&state);
            let label = label.clone();
            let fut = handler();
            Box::pin(async move {
                debug!("control channel '{}' closed", label);
                *state.write().await = ChannelState::Closed;
                fut.await;
            })
        }));
    }

    /// Register the inbound message handler.
    ///
    /// Payloads that fail to parse (malformed, or a kind this peer does not
    /// know) are dropped with a debug log, never an error.
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(ControlMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let label = self.label.clone();
        let handler = Arc::new(handler);

        self.rtc_channel.on_message(Box::new(move |msg| {
            let label = label.clone();
            let handler = Arc::clone(&handler);
            let data = msg.data.to_vec();

            Box::pin(async move {
                match ControlMessage::from_bytes(&data) {
                    Ok(parsed) => {
                        debug!("control channel '{}' received {}", label, parsed.kind());
                        handler(parsed).await;
                    }
                    Err(e) => {
                        debug!(
                            "control channel '{}' ignoring unrecognized message: {}",
                            label, e
                        );
                    }
                }
            })
        }));
    }

    /// Send a control message.
    ///
    /// Delivery is best-effort: a send while the channel is not open, or a
    /// send that loses the race with the channel closing, is dropped with a
    /// debug log. Closure reaches the caller through the close handler, not
    /// through this return value, so `Ok` is never a delivery guarantee.
    pub async fn send(&self, msg: &ControlMessage) -> Result<()> {
        if !self.is_open().await {
            debug!(
                "control channel '{}' not open, dropping {}",
                self.label,
                msg.kind()
            );
            return Ok(());
        }

        let bytes = msg
            .to_bytes()
            .map_err(|e| Error::SerializationError(format!("Failed to serialize {}: {}", msg.kind(), e)))?;

        if let Err(e) = self.rtc_channel.send(&Bytes::from(bytes)).await {
            debug!(
                "control channel '{}' dropped {} during close: {}",
                self.label,
                msg.kind(),
                e
            );
        }

        Ok(())
    }

    /// Close the channel.
    ///
    /// Idempotent: closing an already-closed channel is a no-op.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == ChannelState::Closed {
                return Ok(());
            }
            *state = ChannelState::Closed;
        }

        if let Err(e) = self.rtc_channel.close().await {
            warn!("control channel '{}' close failed: {}", self.label, e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CallConfig;
    use crate::session::build_peer_connection;

    async fn test_pc() -> Arc<RTCPeerConnection> {
        build_peer_connection(&CallConfig::loopback()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_starts_connecting() {
        let pc = test_pc().await;
        let channel = ControlChannel::create(&pc, "control").await.unwrap();

        assert_eq!(channel.label(), "control");
        assert_eq!(channel.state().await, ChannelState::Connecting);
        assert!(!channel.is_open().await);
    }

    #[tokio::test]
    async fn test_send_while_connecting_is_dropped_not_error() {
        let pc = test_pc().await;
        let channel = ControlChannel::create(&pc, "control").await.unwrap();

        // Channel never opened: send must be a silent no-op.
        channel.send(&ControlMessage::Mute).await.unwrap();
        channel
            .send(&ControlMessage::Text("dropped".into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pc = test_pc().await;
        let channel = ControlChannel::create(&pc, "control").await.unwrap();

        channel.close().await.unwrap();
        assert_eq!(channel.state().await, ChannelState::Closed);
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_losing_race_with_close_is_dropped() {
        let pc = test_pc().await;
        let channel = ControlChannel::create(&pc, "control").await.unwrap();

        // Wrapper state says open but the transport never got there: the
        // underlying send fails, and that failure must stay best-effort.
        *channel.state.write().await = ChannelState::Open;
        channel.send(&ControlMessage::Mute).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_is_dropped() {
        let pc = test_pc().await;
        let channel = ControlChannel::create(&pc, "control").await.unwrap();
        channel.close().await.unwrap();

        channel.send(&ControlMessage::Unmute).await.unwrap();
    }
}
