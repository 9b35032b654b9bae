//! Generation-tagged session snapshot
//!
//! Exactly one snapshot is current per controller at any instant. All
//! relay subscriptions and transport callbacks are scoped to the snapshot
//! that created them; teardown invalidates them atomically by bumping the
//! controller generation and aborting the watch tasks.

use super::build_peer_connection;
use crate::channels::ControlChannel;
use crate::config::CallConfig;
use crate::media::{MediaPipeline, MediaSource, TrackKind};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// One negotiation round: the peer connection plus everything scoped to it
pub(crate) struct SessionSnapshot {
    generation: u64,
    peer_connection: Arc<RTCPeerConnection>,
    media: Arc<MediaPipeline>,
    channel: RwLock<Option<Arc<ControlChannel>>>,
    /// Relay watch tasks; aborted on close so a stale subscription can
    /// never mutate the next snapshot.
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// Candidates already seen; replayed deliveries become no-ops here.
    applied_candidates: parking_lot::Mutex<HashSet<String>>,
    /// Candidates that arrived before the remote description; flushed the
    /// moment the description is applied (webrtc-rs rejects early
    /// candidates instead of queueing them).
    pending_candidates: parking_lot::Mutex<Vec<RTCIceCandidateInit>>,
    closed: AtomicBool,
}

impl SessionSnapshot {
    /// Create a fresh snapshot: peer connection, media pipeline, local
    /// capture tracks.
    ///
    /// Fails with `MediaUnavailable` when the media source cannot deliver
    /// a configured track; nothing has been published to any relay at that
    /// point.
    pub(crate) async fn new(
        config: &CallConfig,
        media_source: Arc<dyn MediaSource>,
        generation: u64,
    ) -> Result<Self> {
        let peer_connection = build_peer_connection(config).await?;

        let media = Arc::new(MediaPipeline::new(
            Arc::clone(&peer_connection),
            media_source,
        ));
        media.register_remote_handler();

        if config.enable_audio {
            media.acquire_local(TrackKind::Audio).await?;
        }
        if config.enable_video {
            media.acquire_local(TrackKind::Video).await?;
        }

        debug!(generation, "session snapshot armed");

        Ok(Self {
            generation,
            peer_connection,
            media,
            channel: RwLock::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
            applied_candidates: parking_lot::Mutex::new(HashSet::new()),
            pending_candidates: parking_lot::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    pub(crate) fn media(&self) -> &Arc<MediaPipeline> {
        &self.media
    }

    pub(crate) async fn channel(&self) -> Option<Arc<ControlChannel>> {
        self.channel.read().await.clone()
    }

    pub(crate) async fn set_channel(&self, channel: Arc<ControlChannel>) {
        *self.channel.write().await = Some(channel);
    }

    /// Track a relay watch task scoped to this snapshot.
    pub(crate) fn add_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    fn candidate_key(candidate: &RTCIceCandidateInit) -> String {
        format!(
            "{}|{}|{}",
            candidate.candidate,
            candidate.sdp_mid.as_deref().unwrap_or(""),
            candidate.sdp_mline_index.unwrap_or(0)
        )
    }

    /// Apply an inbound trickled candidate.
    ///
    /// Duplicate deliveries are no-ops; candidates arriving ahead of the
    /// remote description are queued and flushed by
    /// [`apply_remote_description`](Self::apply_remote_description).
    pub(crate) async fn apply_remote_candidate(
        &self,
        candidate: RTCIceCandidateInit,
    ) -> Result<()> {
        {
            let mut seen = self.applied_candidates.lock();
            if !seen.insert(Self::candidate_key(&candidate)) {
                debug!(generation = self.generation, "duplicate candidate ignored");
                return Ok(());
            }
        }

        if self.peer_connection.remote_description().await.is_none() {
            debug!(
                generation = self.generation,
                "candidate queued ahead of remote description"
            );
            self.pending_candidates.lock().push(candidate);
            return Ok(());
        }

        self.add_candidate(candidate).await
    }

    /// Apply the remote description exactly once.
    ///
    /// Returns `Ok(false)` without touching the transport when a remote
    /// description is already set (re-applying an answer is a no-op).
    /// Queued candidates are flushed right after a successful apply.
    pub(crate) async fn apply_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<bool> {
        if self.peer_connection.remote_description().await.is_some() {
            debug!(
                generation = self.generation,
                "remote description already set, ignoring"
            );
            return Ok(false);
        }

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        let pending: Vec<_> = self.pending_candidates.lock().drain(..).collect();
        if !pending.is_empty() {
            debug!(
                generation = self.generation,
                count = pending.len(),
                "flushing queued candidates"
            );
        }
        for candidate in pending {
            self.add_candidate(candidate).await?;
        }

        Ok(true)
    }

    async fn add_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add candidate: {}", e)))
    }

    /// Fully release this snapshot: watch tasks, control channel, local
    /// tracks, transport. Idempotent.
    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        if let Some(channel) = self.channel.write().await.take() {
            let _ = channel.close().await;
        }

        self.media.release_all().await;

        if let Err(e) = self.peer_connection.close().await {
            debug!(
                generation = self.generation,
                "peer connection close failed: {}", e
            );
        }

        debug!(generation = self.generation, "session snapshot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::SilentMediaSource;
    use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

    async fn snapshot() -> SessionSnapshot {
        SessionSnapshot::new(&CallConfig::loopback(), Arc::new(SilentMediaSource), 0)
            .await
            .unwrap()
    }

    fn candidate(s: &str) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: s.to_string(),
            ..Default::default()
        }
    }

    async fn remote_offer() -> RTCSessionDescription {
        // A real offer from a second peer connection; candidates can only
        // be added once a valid remote description is in place.
        let pc = build_peer_connection(&CallConfig::loopback()).await.unwrap();
        let _dc = pc.create_data_channel("control", None).await.unwrap();
        let offer = pc.create_offer(None).await.unwrap();
        pc.set_local_description(offer).await.unwrap();
        pc.local_description().await.unwrap()
    }

    #[tokio::test]
    async fn test_early_candidates_are_queued_then_flushed() {
        let snapshot = snapshot().await;

        snapshot
            .apply_remote_candidate(candidate("candidate:1 1 udp 1 127.0.0.1 50000 typ host"))
            .await
            .unwrap();
        snapshot
            .apply_remote_candidate(candidate("candidate:2 1 udp 1 127.0.0.1 50001 typ host"))
            .await
            .unwrap();
        assert_eq!(snapshot.pending_candidates.lock().len(), 2);

        let applied = snapshot
            .apply_remote_description(remote_offer().await)
            .await
            .unwrap();
        assert!(applied);
        // Both queued candidates were handed to the transport.
        assert!(snapshot.pending_candidates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_candidate_is_noop() {
        let snapshot = snapshot().await;

        let c = candidate("candidate:1 1 udp 1 127.0.0.1 50000 typ host");
        snapshot.apply_remote_candidate(c.clone()).await.unwrap();
        snapshot.apply_remote_candidate(c).await.unwrap();

        assert_eq!(snapshot.pending_candidates.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_remote_description_applied_exactly_once() {
        let snapshot = snapshot().await;

        assert!(snapshot
            .apply_remote_description(remote_offer().await)
            .await
            .unwrap());
        // Second apply is the guarded no-op.
        assert!(!snapshot
            .apply_remote_description(remote_offer().await)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let snapshot = snapshot().await;
        snapshot.close().await;
        snapshot.close().await;
    }
}
