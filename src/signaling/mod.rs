//! Signaling relay abstraction
//!
//! The relay is a shared document store used purely to ferry negotiation
//! metadata between two not-yet-connected peers: one offer, one answer and
//! two append-only candidate streams per call. Once the direct session is
//! up the relay is no longer involved.

mod memory;

pub use memory::MemoryRelay;

use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Opaque identifier naming a call record in the relay.
///
/// Created by the caller and shared out-of-band (e.g. copy-paste) to the
/// answerer.
pub type CallId = String;

/// Which side of the call wrote a candidate stream.
///
/// The caller appends to the `Caller` stream and watches the `Answerer`
/// stream; the answerer does the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateRole {
    /// Candidates produced by the side that created the offer
    Caller,
    /// Candidates produced by the side that answered
    Answerer,
}

impl CandidateRole {
    /// The stream the opposite side writes to.
    pub fn remote(self) -> Self {
        match self {
            CandidateRole::Caller => CandidateRole::Answerer,
            CandidateRole::Answerer => CandidateRole::Caller,
        }
    }

    /// Stream name as stored in the relay.
    pub fn stream_name(self) -> &'static str {
        match self {
            CandidateRole::Caller => "offerCandidates",
            CandidateRole::Answerer => "answerCandidates",
        }
    }
}

/// One call's negotiation record.
///
/// Created empty, `offer` written once by the caller, `answer` written at
/// most once by the answerer. Never deleted by this core; cleanup is an
/// external concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallRecord {
    /// The caller's session description, set by `publish_offer`
    pub offer: Option<RTCSessionDescription>,

    /// The answerer's session description, set by `publish_answer`
    pub answer: Option<RTCSessionDescription>,
}

/// Lazy, infinite, restartable sequence of call record snapshots.
///
/// Emits the current state immediately on subscribe, then one snapshot per
/// change.
pub type CallRecordStream = Pin<Box<dyn Stream<Item = CallRecord> + Send>>;

/// Lazy, infinite, restartable sequence of candidate appends.
///
/// Replays every candidate appended before the watch started, then delivers
/// future appends. No ordering guarantee relative to the record stream.
pub type CandidateStream = Pin<Box<dyn Stream<Item = RTCIceCandidateInit> + Send>>;

/// Document-store relay carrying negotiation messages between two peers.
///
/// All reads and writes are idempotent from the consumer's perspective:
/// re-delivery of an already-applied candidate must be tolerated downstream.
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    /// Allocate a new call record with no offer or answer.
    async fn create_call(&self) -> Result<CallId>;

    /// Fetch the current state of a call record, if it exists.
    async fn fetch_call(&self, id: &str) -> Result<Option<CallRecord>>;

    /// Write the offer into the call record.
    ///
    /// Must be called before any candidate is published for the call: the
    /// answerer cannot resolve a call without an offer.
    async fn publish_offer(&self, id: &str, offer: RTCSessionDescription) -> Result<()>;

    /// Write the answer into the call record.
    ///
    /// At most one answer takes effect per call (first write wins).
    async fn publish_answer(&self, id: &str, answer: RTCSessionDescription) -> Result<()>;

    /// Append a candidate to the stream written by `role`.
    async fn append_candidate(
        &self,
        id: &str,
        role: CandidateRole,
        candidate: RTCIceCandidateInit,
    ) -> Result<()>;

    /// Watch a call record for changes (current state first).
    async fn watch_call(&self, id: &str) -> Result<CallRecordStream>;

    /// Watch the candidate stream written by `role`, replaying from start.
    async fn watch_candidates(&self, id: &str, role: CandidateRole) -> Result<CandidateStream>;
}
