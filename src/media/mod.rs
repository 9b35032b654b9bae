//! Media pipeline
//!
//! Binds local capture tracks to the active session and accumulates
//! received remote tracks. Local tracks are swapped with in-place
//! `replace_track`, so toggling camera or microphone never requires a new
//! offer/answer round. Mute is a stop, not a disable: the capture track is
//! released and a fresh one is acquired on re-enable. While stopped, a
//! silent placeholder occupies the sender so the slot keeps its negotiated
//! envelope (detaching the track entirely would make a later replace fail).
//!
//! Capture itself is an external concern: the [`MediaSource`] seam hands
//! the pipeline its outgoing tracks, and [`SilentMediaSource`] provides
//! placeholder tracks for tests, demos and headless use.

use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone / audio playout
    Audio,
    /// Camera / video rendering
    Video,
}

impl TrackKind {
    /// MIME type used for outgoing tracks of this kind
    pub fn mime_type(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio/opus",
            TrackKind::Video => "video/VP8",
        }
    }

    /// Codec capability for outgoing tracks of this kind
    pub fn codec_capability(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: self.mime_type().to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: self.mime_type().to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }

    /// Track identifier used for outgoing tracks of this kind
    pub fn track_id(self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// A track of the given kind that carries no samples.
fn silent_track(kind: TrackKind) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        kind.codec_capability(),
        kind.track_id().to_string(),
        "peercall".to_string(),
    ))
}

/// Source of local capture tracks
///
/// Device enumeration and capture are outside this crate; the embedding
/// application implements this trait over its capture stack. Acquisition
/// failure (device denied or unavailable) is `MediaUnavailable`.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a fresh outgoing track of the given kind.
    async fn acquire_track(&self, kind: TrackKind) -> Result<Arc<TrackLocalStaticSample>>;
}

/// Media source producing placeholder tracks that carry no samples
///
/// Useful for tests, signaling demos and headless peers: the tracks
/// negotiate normally but nothing is written to them.
#[derive(Debug, Default)]
pub struct SilentMediaSource;

#[async_trait]
impl MediaSource for SilentMediaSource {
    async fn acquire_track(&self, kind: TrackKind) -> Result<Arc<TrackLocalStaticSample>> {
        Ok(silent_track(kind))
    }
}

/// Per-session media state: outgoing senders and accumulated remote tracks
pub struct MediaPipeline {
    source: Arc<dyn MediaSource>,
    peer_connection: Arc<RTCPeerConnection>,
    senders: RwLock<HashMap<TrackKind, Arc<RTCRtpSender>>>,
    local_tracks: RwLock<HashMap<TrackKind, Arc<TrackLocalStaticSample>>>,
    remote_tracks: RwLock<Vec<Arc<TrackRemote>>>,
}

impl MediaPipeline {
    /// Create a pipeline bound to one peer connection.
    pub fn new(peer_connection: Arc<RTCPeerConnection>, source: Arc<dyn MediaSource>) -> Self {
        Self {
            source,
            peer_connection,
            senders: RwLock::new(HashMap::new()),
            local_tracks: RwLock::new(HashMap::new()),
            remote_tracks: RwLock::new(Vec::new()),
        }
    }

    /// Install the remote-track handler on the peer connection.
    ///
    /// Inbound tracks accumulate into a single remote-media surface per
    /// call, mirrored by [`remote_tracks`](Self::remote_tracks). The handler
    /// holds a `Weak` pipeline reference: the peer connection stores it, and
    /// a strong capture would keep the pipeline (and the connection itself)
    /// alive past teardown.
    pub fn register_remote_handler(self: &Arc<Self>) {
        let pipeline = Arc::downgrade(self);
        self.peer_connection
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                let pipeline = pipeline.clone();
                Box::pin(async move {
                    let Some(pipeline) = pipeline.upgrade() else {
                        return;
                    };
                    debug!(
                        "remote track added: kind={} id={}",
                        track.kind(),
                        track.id()
                    );
                    pipeline.remote_tracks.write().await.push(track);
                })
            }));
    }

    /// Acquire and attach a fresh local track of the given kind.
    pub async fn acquire_local(&self, kind: TrackKind) -> Result<()> {
        let track = self.source.acquire_track(kind).await?;
        self.attach_local_track(kind, track).await
    }

    /// Attach or replace the outgoing track of the given kind.
    ///
    /// Replacement is in-place on the existing RTP sender, so no
    /// renegotiation happens when local capture changes.
    pub async fn attach_local_track(
        &self,
        kind: TrackKind,
        track: Arc<TrackLocalStaticSample>,
    ) -> Result<()> {
        let mut senders = self.senders.write().await;

        match senders.get(&kind) {
            Some(sender) => {
                sender
                    .replace_track(Some(track.clone() as Arc<dyn TrackLocal + Send + Sync>))
                    .await
                    .map_err(|e| {
                        Error::MediaTrackError(format!("Failed to replace {:?} track: {}", kind, e))
                    })?;
                debug!("replaced outgoing {:?} track", kind);
            }
            None => {
                let sender = self
                    .peer_connection
                    .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                    .await
                    .map_err(|e| {
                        Error::MediaTrackError(format!("Failed to add {:?} track: {}", kind, e))
                    })?;
                senders.insert(kind, sender);
                debug!("added outgoing {:?} track", kind);
            }
        }

        self.local_tracks.write().await.insert(kind, track);
        Ok(())
    }

    /// Stop the outgoing track of the given kind.
    ///
    /// The sender keeps its slot and its negotiated envelope: a silent
    /// placeholder is swapped in rather than detaching the track, because a
    /// sender whose track has been removed rejects every later replacement.
    /// The capture track itself is dropped so the device is released, not
    /// merely paused.
    pub async fn stop_local(&self, kind: TrackKind) -> Result<()> {
        let senders = self.senders.read().await;
        let Some(sender) = senders.get(&kind) else {
            debug!("no outgoing {:?} track to stop", kind);
            return Ok(());
        };

        sender
            .replace_track(Some(silent_track(kind) as Arc<dyn TrackLocal + Send + Sync>))
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to detach {:?} track: {}", kind, e))
            })?;
        drop(senders);

        self.local_tracks.write().await.remove(&kind);
        debug!("stopped outgoing {:?} track", kind);
        Ok(())
    }

    /// Re-acquire a fresh capture track of the given kind and attach it.
    pub async fn restart_local(&self, kind: TrackKind) -> Result<()> {
        self.acquire_local(kind).await
    }

    /// Whether an outgoing track of the given kind is currently live.
    pub async fn is_sending(&self, kind: TrackKind) -> bool {
        self.local_tracks.read().await.contains_key(&kind)
    }

    /// Remote tracks received so far in this session.
    pub async fn remote_tracks(&self) -> Vec<Arc<TrackRemote>> {
        self.remote_tracks.read().await.clone()
    }

    /// Detach every outgoing track and forget remote tracks.
    ///
    /// Called during teardown before the peer connection closes; after this
    /// no session-scoped capture track is retained anywhere.
    pub async fn release_all(&self) {
        let senders = self.senders.read().await;
        for (kind, sender) in senders.iter() {
            if let Err(e) = sender.replace_track(None).await {
                warn!("failed to detach {:?} track during release: {}", kind, e);
            }
        }
        drop(senders);

        self.local_tracks.write().await.clear();
        self.remote_tracks.write().await.clear();
    }
}
