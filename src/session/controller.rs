//! Session controller: the call lifecycle state machine

use super::SessionSnapshot;
use crate::channels::{ControlChannel, ControlMessage};
use crate::config::CallConfig;
use crate::events::{event_channel, CallEvent, CallStatus};
use crate::media::{MediaSource, TrackKind};
use crate::signaling::{CallId, CandidateRole, SignalingRelay};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Drives one two-party call at a time: negotiation, control channel,
/// teardown and automatic re-arm.
///
/// The controller is always ready: a fresh armed session exists from
/// construction on, and every teardown (explicit hangup, peer hangup,
/// transport failure) re-enters the same arm routine, so the embedding
/// application never needs a separate "set up" step between calls.
pub struct SessionController {
    config: CallConfig,
    relay: Arc<dyn SignalingRelay>,
    media_source: Arc<dyn MediaSource>,
    /// The single live snapshot. Replaced wholesale on teardown; never
    /// mutated in place.
    current: RwLock<Option<Arc<SessionSnapshot>>>,
    /// Generation tag of the current snapshot. Bumped before teardown so
    /// callbacks belonging to the old snapshot self-detect staleness.
    generation: AtomicU64,
    status: RwLock<CallStatus>,
    events: broadcast::Sender<CallEvent>,
}

impl SessionController {
    /// Create a controller and arm the first session.
    ///
    /// Fails with `MediaUnavailable` if the media source cannot deliver
    /// the configured capture tracks.
    pub async fn new(
        config: CallConfig,
        relay: Arc<dyn SignalingRelay>,
        media_source: Arc<dyn MediaSource>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let controller = Arc::new(Self {
            config,
            relay,
            media_source,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
            status: RwLock::new(CallStatus::Idle),
            events: event_channel(),
        });

        controller.arm().await?;
        Ok(controller)
    }

    /// Subscribe to status and remote-control events.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle status.
    pub async fn status(&self) -> CallStatus {
        *self.status.read().await
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    async fn set_status(&self, status: CallStatus) {
        let mut current = self.status.write().await;
        if *current != status {
            debug!(from = ?*current, to = ?status, "status change");
            *current = status;
            drop(current);
            self.emit(CallEvent::Status(status));
        }
    }

    async fn current_snapshot(&self) -> Result<Arc<SessionSnapshot>> {
        self.current
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::PeerConnectionError("no armed session".to_string()))
    }

    /// Arm a fresh session if none exists.
    ///
    /// Idempotent and safe to invoke repeatedly, including from within the
    /// teardown path; this is the same routine used at construction.
    pub async fn arm(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.current.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let snapshot = Arc::new(
            SessionSnapshot::new(
                &self.config,
                Arc::clone(&self.media_source),
                generation,
            )
            .await?,
        );

        self.install_transport_handlers(&snapshot);
        *slot = Some(snapshot);
        drop(slot);

        self.set_status(CallStatus::Idle).await;
        Ok(())
    }

    /// Start a call as the caller and return the identifier to share with
    /// the answerer.
    #[instrument(skip(self))]
    pub async fn start_as_caller(self: &Arc<Self>) -> Result<CallId> {
        self.arm().await?;
        if self.status().await != CallStatus::Idle {
            return Err(Error::PeerConnectionError(
                "a call is already in progress".to_string(),
            ));
        }

        let snapshot = self.current_snapshot().await?;
        let call_id = self.relay.create_call().await?;

        // Creating the local channel here is what instantiates the control
        // channel on the caller side; the answerer receives it in-band.
        let channel = Arc::new(
            ControlChannel::create(snapshot.peer_connection(), &self.config.channel_label).await?,
        );
        self.install_channel(&snapshot, channel).await;

        self.install_candidate_publisher(&snapshot, call_id.clone(), CandidateRole::Caller);

        let pc = snapshot.peer_connection();
        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.relay.publish_offer(&call_id, offer).await?;

        self.spawn_answer_watch(&snapshot, call_id.clone()).await?;
        self.spawn_candidate_watch(&snapshot, call_id.clone(), CandidateRole::Answerer)
            .await?;

        self.set_status(CallStatus::Negotiating).await;
        info!(call_id = %call_id, "call started as caller");
        Ok(call_id)
    }

    /// Answer a call created by a remote caller.
    ///
    /// Fails with `CallNotFound` when the identifier does not resolve to a
    /// record with an offer; that check runs before any transport mutation.
    #[instrument(skip(self), fields(call_id = %call_id))]
    pub async fn answer_call(self: &Arc<Self>, call_id: &str) -> Result<()> {
        let record = self
            .relay
            .fetch_call(call_id)
            .await?
            .ok_or_else(|| Error::CallNotFound(call_id.to_string()))?;
        let offer = record
            .offer
            .ok_or_else(|| Error::CallNotFound(format!("{} has no offer", call_id)))?;

        self.arm().await?;
        if self.status().await != CallStatus::Idle {
            return Err(Error::PeerConnectionError(
                "a call is already in progress".to_string(),
            ));
        }

        let snapshot = self.current_snapshot().await?;

        self.install_candidate_publisher(&snapshot, call_id.to_string(), CandidateRole::Answerer);

        snapshot.apply_remote_description(offer).await?;

        let pc = snapshot.peer_connection();
        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        pc.set_local_description(answer.clone())
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.relay.publish_answer(call_id, answer).await?;

        self.spawn_candidate_watch(&snapshot, call_id.to_string(), CandidateRole::Caller)
            .await?;

        self.set_status(CallStatus::Negotiating).await;
        info!("call answered");
        Ok(())
    }

    /// Hang up the current call and re-arm for the next one.
    pub async fn hang_up(self: &Arc<Self>) -> Result<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.teardown_and_rearm(generation).await;
        Ok(())
    }

    /// Stop or restart the outgoing microphone track and tell the peer.
    pub async fn toggle_audio(&self, enabled: bool) -> Result<()> {
        let snapshot = self.current_snapshot().await?;
        if enabled {
            snapshot.media().restart_local(TrackKind::Audio).await?;
            self.send_control(&snapshot, ControlMessage::Unmute).await
        } else {
            snapshot.media().stop_local(TrackKind::Audio).await?;
            self.send_control(&snapshot, ControlMessage::Mute).await
        }
    }

    /// Stop or restart the outgoing camera track and tell the peer.
    pub async fn toggle_video(&self, enabled: bool) -> Result<()> {
        let snapshot = self.current_snapshot().await?;
        if enabled {
            snapshot.media().restart_local(TrackKind::Video).await?;
            self.send_control(&snapshot, ControlMessage::CameraOn).await
        } else {
            snapshot.media().stop_local(TrackKind::Video).await?;
            self.send_control(&snapshot, ControlMessage::CameraOff).await
        }
    }

    /// Send a text message over the control channel (best-effort).
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let snapshot = self.current_snapshot().await?;
        self.send_control(&snapshot, ControlMessage::Text(text.into()))
            .await
    }

    /// Send a binary payload over the control channel (best-effort).
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        let snapshot = self.current_snapshot().await?;
        self.send_control(&snapshot, ControlMessage::Binary(data))
            .await
    }

    async fn send_control(&self, snapshot: &SessionSnapshot, msg: ControlMessage) -> Result<()> {
        match snapshot.channel().await {
            Some(channel) => channel.send(&msg).await,
            None => {
                debug!("no control channel yet, dropping {}", msg.kind());
                Ok(())
            }
        }
    }

    /// Tear the current session down and immediately arm the next one.
    ///
    /// The generation compare-exchange is the re-entrancy guard: a close
    /// triggered while a close is already in progress (our own teardown
    /// closing the channel and transport fires their close callbacks) loses
    /// the exchange and becomes a logged no-op.
    async fn teardown_and_rearm(self: &Arc<Self>, generation: u64) {
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(generation, "stale teardown ignored");
            return;
        }

        info!(generation, "tearing down session");
        let old = self.current.write().await.take();
        if let Some(snapshot) = old {
            snapshot.close().await;
        }
        self.set_status(CallStatus::Closed).await;

        // Always-ready: the next call needs no external setup step.
        if let Err(e) = self.arm().await {
            warn!("failed to re-arm after teardown: {}", e);
        }
    }

    /// Install peer-connection-scoped handlers on a fresh snapshot.
    ///
    /// Handlers hold a `Weak` controller reference and the snapshot
    /// generation; both are re-checked before any effect is applied.
    fn install_transport_handlers(self: &Arc<Self>, snapshot: &Arc<SessionSnapshot>) {
        let generation = snapshot.generation();
        let pc = snapshot.peer_connection();

        // Transport failure or closure is equivalent to an explicit hangup.
        let weak: Weak<Self> = Arc::downgrade(self);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                debug!(?state, generation, "peer connection state change");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    if let Some(controller) = weak.upgrade() {
                        tokio::spawn(async move {
                            controller.teardown_and_rearm(generation).await;
                        });
                    }
                }
            })
        }));

        // The answerer side receives the control channel in-band; the
        // controller must be ready for it before negotiation completes.
        // The snapshot is captured weakly: the peer connection stores this
        // handler, and a strong capture would cycle back through the
        // snapshot and keep the whole session alive past teardown.
        let weak: Weak<Self> = Arc::downgrade(self);
        let snapshot_weak = Arc::downgrade(snapshot);
        let expected_label = self.config.channel_label.clone();
        pc.on_data_channel(Box::new(move |rtc_channel| {
            let weak = weak.clone();
            let snapshot_weak = snapshot_weak.clone();
            let expected_label = expected_label.clone();
            Box::pin(async move {
                if rtc_channel.label() != expected_label {
                    debug!(label = rtc_channel.label(), "ignoring unexpected data channel");
                    return;
                }
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                let Some(snapshot) = snapshot_weak.upgrade() else {
                    return;
                };
                if controller.generation.load(Ordering::SeqCst) != snapshot.generation() {
                    debug!("data channel for stale session ignored");
                    return;
                }
                let channel = Arc::new(ControlChannel::from_rtc_channel(rtc_channel));
                controller.install_channel(&snapshot, channel).await;
            })
        }));
    }

    /// Wire a control channel into the lifecycle: open means connected,
    /// close means hangup, messages become events.
    async fn install_channel(
        self: &Arc<Self>,
        snapshot: &Arc<SessionSnapshot>,
        channel: Arc<ControlChannel>,
    ) {
        let generation = snapshot.generation();

        let weak: Weak<Self> = Arc::downgrade(self);
        channel.on_open(move || {
            let weak = weak.clone();
            async move {
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                if controller.generation.load(Ordering::SeqCst) != generation {
                    debug!("open event for stale session ignored");
                    return;
                }
                controller.set_status(CallStatus::Connected).await;
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        channel.on_close(move || {
            let weak = weak.clone();
            async move {
                if let Some(controller) = weak.upgrade() {
                    // Spawned: teardown must not run inside the channel's
                    // own close callback.
                    tokio::spawn(async move {
                        controller.teardown_and_rearm(generation).await;
                    });
                }
            }
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        channel.on_message(move |msg| {
            let weak = weak.clone();
            async move {
                let Some(controller) = weak.upgrade() else {
                    return;
                };
                if controller.generation.load(Ordering::SeqCst) != generation {
                    debug!("control message for stale session ignored");
                    return;
                }
                controller.dispatch_control(msg);
            }
        });

        snapshot.set_channel(channel).await;
    }

    fn dispatch_control(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::Mute => self.emit(CallEvent::RemoteAudio { muted: true }),
            ControlMessage::Unmute => self.emit(CallEvent::RemoteAudio { muted: false }),
            ControlMessage::CameraOn => self.emit(CallEvent::RemoteCamera { enabled: true }),
            ControlMessage::CameraOff => self.emit(CallEvent::RemoteCamera { enabled: false }),
            ControlMessage::Text(text) => self.emit(CallEvent::RemoteText(text)),
            ControlMessage::Binary(data) => self.emit(CallEvent::RemoteBinary(data)),
        }
    }

    /// Forward locally gathered candidates to the relay.
    fn install_candidate_publisher(
        self: &Arc<Self>,
        snapshot: &Arc<SessionSnapshot>,
        call_id: CallId,
        role: CandidateRole,
    ) {
        let generation = snapshot.generation();
        let weak: Weak<Self> = Arc::downgrade(self);

        snapshot.peer_connection().on_ice_candidate(Box::new(
            move |candidate: Option<RTCIceCandidate>| {
                let weak = weak.clone();
                let call_id = call_id.clone();
                Box::pin(async move {
                    // End-of-gathering is signaled with None; nothing to publish.
                    let Some(candidate) = candidate else { return };
                    let Some(controller) = weak.upgrade() else { return };
                    if controller.generation.load(Ordering::SeqCst) != generation {
                        debug!("local candidate for stale session ignored");
                        return;
                    }

                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!("failed to serialize local candidate: {}", e);
                            return;
                        }
                    };

                    if let Err(e) = controller
                        .relay
                        .append_candidate(&call_id, role, init)
                        .await
                    {
                        warn!(call_id = %call_id, "failed to publish candidate: {}", e);
                    }
                })
            },
        ));
    }

    /// Watch the call record for the remote answer and apply it exactly once.
    async fn spawn_answer_watch(
        self: &Arc<Self>,
        snapshot: &Arc<SessionSnapshot>,
        call_id: CallId,
    ) -> Result<()> {
        let mut stream = self.relay.watch_call(&call_id).await?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let snapshot_ref = Arc::clone(snapshot);

        let handle = tokio::spawn(async move {
            while let Some(record) = stream.next().await {
                let Some(controller) = weak.upgrade() else { break };
                if controller.generation.load(Ordering::SeqCst) != snapshot_ref.generation() {
                    debug!("answer for stale session ignored");
                    break;
                }
                let Some(answer) = record.answer else { continue };

                match snapshot_ref.apply_remote_description(answer).await {
                    Ok(true) => {
                        debug!(call_id = %call_id, "remote answer applied");
                        break;
                    }
                    Ok(false) => {
                        debug!(call_id = %call_id, "answer already applied, ignoring");
                    }
                    Err(e) => {
                        warn!(call_id = %call_id, "failed to apply remote answer: {}", e);
                    }
                }
            }
        });

        snapshot.add_task(handle);
        Ok(())
    }

    /// Watch the peer's candidate stream and apply every append.
    async fn spawn_candidate_watch(
        self: &Arc<Self>,
        snapshot: &Arc<SessionSnapshot>,
        call_id: CallId,
        role: CandidateRole,
    ) -> Result<()> {
        let mut stream = self.relay.watch_candidates(&call_id, role).await?;
        let weak: Weak<Self> = Arc::downgrade(self);
        let snapshot_ref = Arc::clone(snapshot);

        let handle = tokio::spawn(async move {
            while let Some(candidate) = stream.next().await {
                let Some(controller) = weak.upgrade() else { break };
                if controller.generation.load(Ordering::SeqCst) != snapshot_ref.generation() {
                    debug!("candidate for stale session ignored");
                    break;
                }
                if let Err(e) = snapshot_ref.apply_remote_candidate(candidate).await {
                    warn!(call_id = %call_id, "failed to apply candidate: {}", e);
                }
            }
        });

        snapshot.add_task(handle);
        Ok(())
    }
}
