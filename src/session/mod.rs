//! Session lifecycle
//!
//! [`SessionController`] owns the negotiation state machine; each
//! negotiation lives in a generation-tagged [`SessionSnapshot`] so stale
//! asynchronous callbacks can detect that the session they belong to has
//! been replaced and become no-ops.

mod controller;
mod snapshot;

pub use controller::SessionController;
pub(crate) use snapshot::SessionSnapshot;

use crate::config::CallConfig;
use crate::{Error, Result};
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

/// Build a peer connection from the call configuration.
///
/// Default codecs and interceptors, ICE servers from config. One per
/// snapshot; the controller never reuses a peer connection across
/// negotiation rounds.
pub(crate) async fn build_peer_connection(config: &CallConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    let ice_servers: Vec<RTCIceServer> = config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect();

    let rtc_config = RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        ..Default::default()
    };

    let peer_connection = api
        .new_peer_connection(rtc_config)
        .await
        .map_err(|e| Error::PeerConnectionError(format!("Failed to create peer connection: {}", e)))?;

    Ok(Arc::new(peer_connection))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_peer_connection_loopback() {
        let pc = build_peer_connection(&CallConfig::loopback()).await.unwrap();
        assert!(pc.remote_description().await.is_none());
    }

    #[tokio::test]
    async fn test_build_peer_connection_with_ice_servers() {
        let pc = build_peer_connection(&CallConfig::default()).await.unwrap();
        assert!(pc.local_description().await.is_none());
    }
}
