//! [`ConnectionAdapter`] на webrtc-rs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::peer::connection::{ConnectionAdapter, ConnectionEvent, PeerConnection, PeerHandle};
use crate::peer::media::{MediaStream, MediaTrack, TrackKind};
use crate::peer::types::{IceCandidate, ServerConfig, SessionDescription};
use crate::utils::add_ice_url_scheme;

fn negotiation(e: webrtc::Error) -> CallError {
    CallError::Negotiation(e.to_string())
}

/// Создаёт один `RTCPeerConnection` на звонок
#[derive(Debug, Default, Clone)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionAdapter for WebRtcConnector {
    async fn create(&self, config: &CallConfig) -> Result<PeerHandle> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(negotiation)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(negotiation)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(rtc_config(&config.ice_servers))
                .await
                .map_err(negotiation)?,
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let candidate_tx = tx.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(ConnectionEvent::LocalCandidate(from_init(init)));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                None => debug!("ICE candidate gathering completed (null candidate received)"),
            }
            Box::pin(async {})
        }));

        // Треки одного удалённого потока приходят по одному, сообщаем о
        // потоке заново каждый раз, когда он растёт
        let remote_streams: Arc<Mutex<HashMap<String, MediaStream>>> = Arc::default();
        let track_tx = tx;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                let stream_id = track.stream_id();
                info!("Remote {kind} track {} on stream {stream_id}", track.id());

                let stream = {
                    let mut streams = remote_streams
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    let stream = streams
                        .entry(stream_id.clone())
                        .or_insert_with(|| MediaStream::new(stream_id));
                    stream.tracks.push(MediaTrack {
                        id: track.id(),
                        kind,
                    });
                    stream.clone()
                };
                let _ = track_tx.send(ConnectionEvent::RemoteStream(stream));
                Box::pin(async {})
            },
        ));

        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            match st {
                RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                    warn!("Peer connection state changed to: {st:?}")
                }
                _ => debug!("Peer connection state changed to: {st:?}"),
            }
            Box::pin(async {})
        }));

        Ok(PeerHandle {
            connection: Arc::new(WebRtcPeer {
                pc,
                local_tracks: Mutex::default(),
            }),
            events: rx,
        })
    }
}

/// Peer connection webrtc-rs и подключённые к нему локальные треки
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    local_tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl WebRtcPeer {
    /// Приёмники сэмплов локальных треков, слой захвата пишет в них
    /// закодированное медиа
    pub fn local_tracks(&self) -> Vec<Arc<TrackLocalStaticSample>> {
        self.local_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn attach_local_stream(&self, stream: &MediaStream) -> Result<()> {
        for media_track in &stream.tracks {
            let capability = match media_track.kind {
                TrackKind::Audio => RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                TrackKind::Video => RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
            };
            let track = Arc::new(TrackLocalStaticSample::new(
                capability,
                media_track.id.clone(),
                stream.id.clone(),
            ));
            self.pc
                .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| CallError::MediaUnavailable(format!("failed to add track: {e}")))?;
            self.local_tracks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(track);
            debug!("Attached local {} track {}", media_track.kind, media_track.id);
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        from_rtc(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        from_rtc(&answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(&desc)?)
            .await
            .map_err(negotiation)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(&desc)?)
            .await
            .map_err(negotiation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(negotiation)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(negotiation)
    }
}

/// Конфигурация peer connection из ICE серверов конфигурации
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

// Обе стороны сериализуются как `{type, sdp}`
fn to_rtc(desc: &SessionDescription) -> Result<RTCSessionDescription> {
    serde_json::to_value(desc)
        .and_then(serde_json::from_value)
        .map_err(|e| CallError::Negotiation(format!("unusable session description: {e}")))
}

fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription> {
    serde_json::to_value(desc)
        .and_then(serde_json::from_value)
        .map_err(|e| CallError::Negotiation(format!("unusable session description: {e}")))
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}
