//! In-process signaling relay
//!
//! Backs the integration tests and same-process loopback calls. Candidate
//! watches replay every existing append before delivering new ones, and
//! record watches emit the current snapshot first, matching the semantics
//! the session controller relies on regardless of subscribe timing.

use super::{CallId, CallRecord, CallRecordStream, CandidateRole, CandidateStream, SignalingRelay};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Per-call state held by the relay
#[derive(Default)]
struct CallState {
    record: CallRecord,
    offer_candidates: Vec<RTCIceCandidateInit>,
    answer_candidates: Vec<RTCIceCandidateInit>,
    record_watchers: Vec<mpsc::UnboundedSender<CallRecord>>,
    candidate_watchers: Vec<(CandidateRole, mpsc::UnboundedSender<RTCIceCandidateInit>)>,
}

impl CallState {
    fn candidates(&self, role: CandidateRole) -> &Vec<RTCIceCandidateInit> {
        match role {
            CandidateRole::Caller => &self.offer_candidates,
            CandidateRole::Answerer => &self.answer_candidates,
        }
    }

    fn candidates_mut(&mut self, role: CandidateRole) -> &mut Vec<RTCIceCandidateInit> {
        match role {
            CandidateRole::Caller => &mut self.offer_candidates,
            CandidateRole::Answerer => &mut self.answer_candidates,
        }
    }

    /// Fan the current record out to live watchers, dropping closed ones.
    fn notify_record(&mut self) {
        let record = self.record.clone();
        self.record_watchers
            .retain(|tx| tx.send(record.clone()).is_ok());
    }

    /// Fan a new candidate out to the watchers of its stream.
    fn notify_candidate(&mut self, role: CandidateRole, candidate: &RTCIceCandidateInit) {
        self.candidate_watchers
            .retain(|(r, tx)| *r != role || tx.send(candidate.clone()).is_ok());
    }
}

/// In-memory [`SignalingRelay`] implementation
#[derive(Default)]
pub struct MemoryRelay {
    calls: Mutex<HashMap<CallId, CallState>>,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of call records currently held (test/introspection helper).
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl SignalingRelay for MemoryRelay {
    async fn create_call(&self) -> Result<CallId> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut calls = self.calls.lock().await;
        calls.insert(id.clone(), CallState::default());
        debug!(call_id = %id, "call record created");
        Ok(id)
    }

    async fn fetch_call(&self, id: &str) -> Result<Option<CallRecord>> {
        let calls = self.calls.lock().await;
        Ok(calls.get(id).map(|state| state.record.clone()))
    }

    async fn publish_offer(&self, id: &str, offer: RTCSessionDescription) -> Result<()> {
        let mut calls = self.calls.lock().await;
        let state = calls
            .get_mut(id)
            .ok_or_else(|| Error::CallNotFound(id.to_string()))?;

        // First write wins; re-publishing an offer is ignored.
        if state.record.offer.is_some() {
            warn!(call_id = %id, "offer already published, ignoring");
            return Ok(());
        }

        state.record.offer = Some(offer);
        state.notify_record();
        debug!(call_id = %id, "offer published");
        Ok(())
    }

    async fn publish_answer(&self, id: &str, answer: RTCSessionDescription) -> Result<()> {
        let mut calls = self.calls.lock().await;
        let state = calls
            .get_mut(id)
            .ok_or_else(|| Error::CallNotFound(id.to_string()))?;

        // First write wins; a second answer on an answered record is ignored.
        if state.record.answer.is_some() {
            warn!(call_id = %id, "answer already published, ignoring");
            return Ok(());
        }

        state.record.answer = Some(answer);
        state.notify_record();
        debug!(call_id = %id, "answer published");
        Ok(())
    }

    async fn append_candidate(
        &self,
        id: &str,
        role: CandidateRole,
        candidate: RTCIceCandidateInit,
    ) -> Result<()> {
        let mut calls = self.calls.lock().await;
        let state = calls
            .get_mut(id)
            .ok_or_else(|| Error::CallNotFound(id.to_string()))?;

        state.candidates_mut(role).push(candidate.clone());
        state.notify_candidate(role, &candidate);
        debug!(
            call_id = %id,
            stream = role.stream_name(),
            "candidate appended"
        );
        Ok(())
    }

    async fn watch_call(&self, id: &str) -> Result<CallRecordStream> {
        let mut calls = self.calls.lock().await;
        let state = calls
            .get_mut(id)
            .ok_or_else(|| Error::CallNotFound(id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Current state first, then future changes.
        let _ = tx.send(state.record.clone());
        state.record_watchers.push(tx);

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn watch_candidates(&self, id: &str, role: CandidateRole) -> Result<CandidateStream> {
        let mut calls = self.calls.lock().await;
        let state = calls
            .get_mut(id)
            .ok_or_else(|| Error::CallNotFound(id.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Replay-from-start: no candidate is ever missed regardless of
        // subscribe timing.
        for candidate in state.candidates(role) {
            let _ = tx.send(candidate.clone());
        }
        state.candidate_watchers.push((role, tx));

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
