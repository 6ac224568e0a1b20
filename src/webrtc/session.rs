//! Loopback session bootstrap
//!
//! Builds both endpoints in-process and negotiates the data channel between
//! them:
//!
//! ```text
//! A: create channel, create offer ──limit──> B: set remote (limited offer)
//! A: set local (offer)
//!                                            B: create answer
//! A: set remote (limited answer) <──limit── B: set local (answer)
//! ```
//!
//! The bandwidth cap only travels to the peer. webrtc-rs accepts nothing but
//! the exact generated descriptor as the local description, so each side
//! keeps its own offer or answer unedited.
//!
//! Every step returns a `Result`; the first failure closes both endpoints and
//! is reported to the caller. There is no retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;

use super::config::WebRtcConfig;
use super::endpoint::{build_api, wait_open, Endpoint};
use super::sdp::{limit_bandwidth, BandwidthLimit, APPLICATION_MEDIA};
use super::signaling::{ChannelState, EndpointRole};
use crate::error::{AppError, Result};

/// Negotiates a [`PoseSession`]
pub struct SessionBootstrap {
    config: WebRtcConfig,
    limit: BandwidthLimit,
}

impl SessionBootstrap {
    pub fn new(config: WebRtcConfig, limit: BandwidthLimit) -> Self {
        Self { config, limit }
    }

    /// Create both endpoints, negotiate, and wait for the channel to open
    pub async fn connect(self) -> Result<PoseSession> {
        let api = build_api(&self.config.ice)?;
        let initiator = Endpoint::new(&api, EndpointRole::Initiator).await?;
        let acceptor = match Endpoint::new(&api, EndpointRole::Acceptor).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if let Err(close_err) = initiator.close().await {
                    warn!("{}", close_err);
                }
                return Err(e);
            }
        };

        let (receive_channel, send_channel) = match self.establish(&initiator, &acceptor).await {
            Ok(channels) => channels,
            Err(e) => {
                close_quietly(&initiator, &acceptor).await;
                return Err(e);
            }
        };

        let (state_tx, _) = watch::channel(ChannelState::Open);
        let state_tx = Arc::new(state_tx);
        watch_close(&receive_channel, state_tx.clone());

        info!(
            "Pose session established (bandwidth limit: {} kb/s)",
            self.limit
        );

        Ok(PoseSession {
            initiator,
            acceptor,
            receive_channel,
            send_channel,
            channel_state: state_tx,
            limit: self.limit,
        })
    }

    /// Wire both endpoints and return the (receive, send) channel ends
    async fn establish(
        &self,
        initiator: &Endpoint,
        acceptor: &Endpoint,
    ) -> Result<(Arc<RTCDataChannel>, Arc<RTCDataChannel>)> {
        initiator.forward_candidates_to(acceptor);
        acceptor.forward_candidates_to(initiator);

        let mut incoming = acceptor.incoming_data_channels();
        let receive_channel = initiator
            .create_data_channel(&self.config.channel_label)
            .await?;

        self.negotiate(initiator, acceptor).await?;

        let timeout = Duration::from_millis(self.config.ice.connection_timeout_ms);
        let opened = async {
            let send_channel = tokio::time::timeout(timeout, incoming.recv())
                .await
                .map_err(|_| {
                    AppError::WebRtcError(format!(
                        "Endpoint {} did not receive the data channel within {:?}",
                        EndpointRole::Acceptor,
                        timeout
                    ))
                })?
                .ok_or_else(|| AppError::WebRtcError("Data channel handler dropped".to_string()))?;

            wait_open(&receive_channel, timeout).await?;
            wait_open(&send_channel, timeout).await?;
            Ok::<_, AppError>(send_channel)
        };

        let send_channel = tokio::select! {
            result = opened => result?,
            _ = initiator.failed() => return Err(connection_failed(EndpointRole::Initiator)),
            _ = acceptor.failed() => return Err(connection_failed(EndpointRole::Acceptor)),
        };

        Ok((receive_channel, send_channel))
    }

    async fn negotiate(&self, a: &Endpoint, b: &Endpoint) -> Result<()> {
        let offer = a.create_offer().await?;
        let limited_offer = limit_bandwidth(&offer, APPLICATION_MEDIA, self.limit);
        debug!("Limited offer:\n{}", limited_offer);

        b.set_remote_description(RTCSdpType::Offer, &limited_offer)
            .await?;
        a.set_local_description(RTCSdpType::Offer, &offer).await?;

        let answer = b.create_answer().await?;
        let limited_answer = limit_bandwidth(&answer, APPLICATION_MEDIA, self.limit);
        debug!("Limited answer:\n{}", limited_answer);

        a.set_remote_description(RTCSdpType::Answer, &limited_answer)
            .await?;
        b.set_local_description(RTCSdpType::Answer, &answer).await?;

        info!("Offer/answer exchange complete");
        Ok(())
    }
}

fn connection_failed(role: EndpointRole) -> AppError {
    AppError::WebRtcError(format!("Endpoint {} connection failed", role))
}

async fn close_quietly(a: &Endpoint, b: &Endpoint) {
    for endpoint in [a, b] {
        if let Err(e) = endpoint.close().await {
            warn!("{}", e);
        }
    }
}

/// Move the channel state forward; closed is terminal
fn advance(state: &watch::Sender<ChannelState>, next: ChannelState) -> bool {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    })
}

fn watch_close(dc: &Arc<RTCDataChannel>, state: Arc<watch::Sender<ChannelState>>) {
    let label = dc.label().to_string();
    dc.on_close(Box::new(move || {
        if advance(&state, ChannelState::Closed) {
            info!("Data channel '{}' closed", label);
        }
        Box::pin(async {})
    }));
}

/// A negotiated loopback session
///
/// The initiator (A) owns the receiving end of the channel; the acceptor (B)
/// owns the sending end.
pub struct PoseSession {
    initiator: Endpoint,
    acceptor: Endpoint,
    receive_channel: Arc<RTCDataChannel>,
    send_channel: Arc<RTCDataChannel>,
    channel_state: Arc<watch::Sender<ChannelState>>,
    limit: BandwidthLimit,
}

impl PoseSession {
    /// Endpoint whose statistics reflect inbound pose traffic
    pub fn receiving_endpoint(&self) -> &Endpoint {
        &self.initiator
    }

    /// Channel end that poses are pushed onto
    pub fn send_channel(&self) -> Arc<RTCDataChannel> {
        self.send_channel.clone()
    }

    /// Channel end that poses arrive on
    pub fn receive_channel(&self) -> Arc<RTCDataChannel> {
        self.receive_channel.clone()
    }

    pub fn bandwidth_limit(&self) -> BandwidthLimit {
        self.limit
    }

    pub fn channel_state(&self) -> ChannelState {
        *self.channel_state.borrow()
    }

    /// Subscribe to channel state changes
    pub fn channel_state_watch(&self) -> watch::Receiver<ChannelState> {
        self.channel_state.subscribe()
    }

    /// Close both endpoints
    pub async fn close(&self) -> Result<()> {
        if advance(&self.channel_state, ChannelState::Closed) {
            info!("Closing pose session");
        }

        // Closing an already-closed peer connection is a no-op
        self.acceptor.close().await?;
        self.initiator.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_state_never_reopens() {
        let (tx, rx) = watch::channel(ChannelState::Open);

        assert!(advance(&tx, ChannelState::Closed));
        assert!(!advance(&tx, ChannelState::Open));
        assert!(!advance(&tx, ChannelState::Closed));
        assert_eq!(*rx.borrow(), ChannelState::Closed);
    }
}
