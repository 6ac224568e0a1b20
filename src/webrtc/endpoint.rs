//! One side of the loopback peer pair

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

use super::config::IceConfig;
use super::signaling::{ConnectionState, EndpointRole, IceCandidate};
use crate::error::{AppError, Result};
use crate::stats::{ReportKind, StatsEntry, StatsSource};

/// Build the WebRTC API shared by both endpoints
pub fn build_api(ice: &IceConfig) -> Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    // Candidates never leave the process; mDNS would only add latency
    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
    setting_engine.set_include_loopback_candidate(ice.include_loopback);

    Ok(APIBuilder::new()
        .with_setting_engine(setting_engine)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Peer connection wrapper with event handling
#[derive(Clone)]
pub struct Endpoint {
    role: EndpointRole,
    pc: Arc<RTCPeerConnection>,
    state: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Endpoint {
    /// Create a new endpoint
    pub async fn new(api: &API, role: EndpointRole) -> Result<Self> {
        let pc = api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| {
                AppError::WebRtcError(format!("Failed to create peer connection {}: {}", role, e))
            })?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);

        let endpoint = Self {
            role,
            pc: Arc::new(pc),
            state: Arc::new(state_tx),
            state_rx,
        };
        endpoint.setup_state_handler();

        Ok(endpoint)
    }

    fn setup_state_handler(&self) {
        let state = self.state.clone();
        let role = self.role;

        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Endpoint {} connection state: {}", role, new_state);
                    let _ = state.send(new_state);
                })
            }));
    }

    /// Hand every locally gathered candidate straight to `other`
    ///
    /// Holds only a weak reference so the two endpoints do not keep each
    /// other alive.
    pub fn forward_candidates_to(&self, other: &Endpoint) {
        let target: Weak<RTCPeerConnection> = Arc::downgrade(&other.pc);
        let from = self.role;
        let to = other.role;

        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let target = target.clone();

                Box::pin(async move {
                    let Some(c) = candidate else {
                        debug!("Endpoint {} finished gathering candidates", from);
                        return;
                    };

                    let candidate = match c.to_json() {
                        Ok(init) => IceCandidate::from(init),
                        Err(e) => {
                            warn!("Endpoint {} produced unusable candidate: {}", from, e);
                            return;
                        }
                    };

                    let Some(pc) = target.upgrade() else {
                        return;
                    };

                    relay_candidate(&pc, candidate, from, to).await;
                })
            }));
    }

    /// Add a candidate gathered by `from`
    ///
    /// A rejected candidate is logged and reported as `false`; it never
    /// aborts the session.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate, from: EndpointRole) -> bool {
        relay_candidate(&self.pc, candidate, from, self.role).await
    }

    /// Create the data channel; must happen before the offer
    pub async fn create_data_channel(&self, label: &str) -> Result<Arc<RTCDataChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| AppError::negotiation("create data channel", e))?;

        info!("Endpoint {} created data channel '{}'", self.role, label);
        Ok(dc)
    }

    /// Channels announced by the remote side
    pub fn incoming_data_channels(&self) -> mpsc::Receiver<Arc<RTCDataChannel>> {
        let (tx, rx) = mpsc::channel(1);
        let role = self.role;

        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = tx.clone();

            Box::pin(async move {
                info!("Endpoint {} accepted data channel '{}'", role, dc.label());
                let _ = tx.send(dc).await;
            })
        }));

        rx
    }

    /// Generate an offer SDP
    pub async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::negotiation("create offer", e))?;
        Ok(offer.sdp)
    }

    /// Generate an answer SDP
    pub async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::negotiation("create answer", e))?;
        Ok(answer.sdp)
    }

    /// Apply a descriptor as this endpoint's local description
    pub async fn set_local_description(&self, sdp_type: RTCSdpType, sdp: &str) -> Result<()> {
        let desc = describe(sdp_type, sdp)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| AppError::negotiation("set local description", e))
    }

    /// Apply a descriptor as this endpoint's remote description
    pub async fn set_remote_description(&self, sdp_type: RTCSdpType, sdp: &str) -> Result<()> {
        let desc = describe(sdp_type, sdp)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| AppError::negotiation("set remote description", e))
    }

    /// Descriptor currently applied as this endpoint's remote description
    pub async fn remote_description(&self) -> Option<String> {
        self.pc.remote_description().await.map(|desc| desc.sdp)
    }

    /// Resolves once the peer connection reports `failed`
    pub async fn failed(&self) {
        let mut state_rx = self.state_rx.clone();
        let reached = state_rx
            .wait_for(|s| *s == ConnectionState::Failed)
            .await
            .is_ok();
        if !reached {
            // State handler gone; the connection can no longer fail
            std::future::pending::<()>().await;
        }
    }

    /// Close the connection
    pub async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to close endpoint {}: {}", self.role, e))
        })
    }
}

#[async_trait]
impl StatsSource for Endpoint {
    async fn stats(&self) -> Result<Vec<StatsEntry>> {
        let report = self.pc.get_stats().await;

        let entries = report
            .reports
            .into_iter()
            .map(|(id, stats)| match stats {
                StatsReportType::DataChannel(dc) => StatsEntry {
                    id,
                    kind: ReportKind::DataChannel,
                    counters: vec![
                        ("bytesReceived".to_string(), dc.bytes_received as u64),
                        ("bytesSent".to_string(), dc.bytes_sent as u64),
                        ("messagesReceived".to_string(), dc.messages_received as u64),
                        ("messagesSent".to_string(), dc.messages_sent as u64),
                    ],
                },
                _ => StatsEntry {
                    id,
                    kind: ReportKind::Other,
                    counters: Vec::new(),
                },
            })
            .collect();

        Ok(entries)
    }
}

async fn relay_candidate(
    pc: &RTCPeerConnection,
    candidate: IceCandidate,
    from: EndpointRole,
    to: EndpointRole,
) -> bool {
    debug!("ICE candidate {} -> {}: {}", from, to, candidate.candidate);

    let init: RTCIceCandidateInit = candidate.into();
    match pc.add_ice_candidate(init).await {
        Ok(()) => true,
        Err(e) => {
            // A subset of candidates is usually enough to connect
            warn!("Endpoint {} rejected candidate from {}: {}", to, from, e);
            false
        }
    }
}

fn describe(sdp_type: RTCSdpType, sdp: &str) -> Result<RTCSessionDescription> {
    let desc = match sdp_type {
        RTCSdpType::Offer => RTCSessionDescription::offer(sdp.to_string()),
        RTCSdpType::Answer => RTCSessionDescription::answer(sdp.to_string()),
        other => {
            return Err(AppError::negotiation(
                "parse descriptor",
                format!("unsupported descriptor type {}", other),
            ))
        }
    };
    desc.map_err(|e| AppError::negotiation("parse descriptor", e))
}

/// Wait until a data channel reports open
pub async fn wait_open(dc: &Arc<RTCDataChannel>, timeout: Duration) -> Result<()> {
    let opened = Arc::new(Notify::new());
    let notify = opened.clone();
    dc.on_open(Box::new(move || {
        notify.notify_one();
        Box::pin(async {})
    }));

    // The channel may have opened before the handler was installed
    if dc.ready_state() == RTCDataChannelState::Open {
        return Ok(());
    }

    tokio::time::timeout(timeout, opened.notified())
        .await
        .map_err(|_| {
            AppError::WebRtcError(format!(
                "Data channel '{}' did not open within {:?}",
                dc.label(),
                timeout
            ))
        })
}
