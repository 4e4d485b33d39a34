use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::Result;
use crate::media::MediaStream;
use crate::session::EventSink;
use crate::traversal::TraversalCandidateSet;
use crate::types::{CodecCapability, ConnectionStats, SendParameters, TrackKind};

/// Factory for addressable endpoints on a signaling service
pub trait PeerTransport: Send + Sync {
    /// Register an endpoint; `local_id` asks for a specific public id
    ///
    /// Everything the endpoint and its calls observe is reported through
    /// `events`, which tags it with the owning session.
    fn create_endpoint(
        &self,
        local_id: Option<&str>,
        traversal: &TraversalCandidateSet,
        events: EventSink,
    ) -> Result<Box<dyn PeerEndpoint>>;
}

/// A registered endpoint
pub trait PeerEndpoint: Send + Sync + fmt::Debug {
    /// Place a call carrying `stream`
    fn call(&self, remote_id: &str, stream: Arc<MediaStream>) -> Result<Box<dyn Call>>;

    /// Unregister and drop every call and connection
    fn destroy(&self);
}

/// One media call between two endpoints
pub trait Call: Send + Sync + fmt::Debug {
    fn peer(&self) -> &str;
    fn answer(&self, stream: Option<Arc<MediaStream>>) -> Result<()>;
    fn close(&self);
}

/// The peer connection underneath a call
#[async_trait]
pub trait PeerConnectionHandle: Send + Sync + fmt::Debug {
    fn senders(&self) -> Vec<Arc<dyn RtpSender>>;
    async fn stats(&self) -> Result<ConnectionStats>;
}

/// Outgoing RTP sender of one track
#[async_trait]
pub trait RtpSender: Send + Sync + fmt::Debug {
    fn kind(&self) -> TrackKind;
    /// Codecs the sender can negotiate
    fn codecs(&self) -> Vec<CodecCapability>;
    fn set_codec_preferences(&self, codecs: Vec<CodecCapability>) -> Result<()>;
    fn parameters(&self) -> SendParameters;
    async fn set_parameters(&self, parameters: SendParameters) -> Result<()>;
}
