use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;

use crate::session::ConnectivityState;
use crate::traversal::{BundlePolicy, TransportPolicy, TraversalCandidateSet, TraversalServer};

impl From<&TraversalServer> for RTCIceServer {
    fn from(server: &TraversalServer) -> Self {
        let (username, credential) = match &server.credentials {
            Some(credentials) => (credentials.username.clone(), credentials.credential.clone()),
            None => (String::new(), String::new()),
        };
        RTCIceServer {
            urls: vec![server.url()],
            username,
            credential,
            ..Default::default()
        }
    }
}

impl From<TransportPolicy> for RTCIceTransportPolicy {
    fn from(policy: TransportPolicy) -> Self {
        match policy {
            TransportPolicy::Any => RTCIceTransportPolicy::All,
            TransportPolicy::RelayOnly => RTCIceTransportPolicy::Relay,
        }
    }
}

impl From<BundlePolicy> for RTCBundlePolicy {
    fn from(policy: BundlePolicy) -> Self {
        match policy {
            BundlePolicy::Balanced => RTCBundlePolicy::Balanced,
            BundlePolicy::MaxCompat => RTCBundlePolicy::MaxCompat,
            BundlePolicy::MaxBundle => RTCBundlePolicy::MaxBundle,
        }
    }
}

/// Peer connection configuration for one attempt
impl From<&TraversalCandidateSet> for RTCConfiguration {
    fn from(set: &TraversalCandidateSet) -> Self {
        RTCConfiguration {
            ice_servers: set.servers().iter().map(RTCIceServer::from).collect(),
            ice_transport_policy: set.policy().into(),
            bundle_policy: set.bundle_policy().into(),
            ice_candidate_pool_size: set.candidate_pool_size(),
            ..Default::default()
        }
    }
}

impl From<RTCIceConnectionState> for ConnectivityState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => {
                ConnectivityState::New
            }
            RTCIceConnectionState::Checking => ConnectivityState::Checking,
            RTCIceConnectionState::Connected => ConnectivityState::Connected,
            RTCIceConnectionState::Completed => ConnectivityState::Completed,
            RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCIceConnectionState::Failed => ConnectivityState::Failed,
            RTCIceConnectionState::Closed => ConnectivityState::Closed,
        }
    }
}

/// Aggregate peer connection state, for transports that only expose that
impl From<RTCPeerConnectionState> for ConnectivityState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => {
                ConnectivityState::New
            }
            RTCPeerConnectionState::Connecting => ConnectivityState::Checking,
            RTCPeerConnectionState::Connected => ConnectivityState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectivityState::Failed,
            RTCPeerConnectionState::Closed => ConnectivityState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traversal::TraversalConfig;

    #[test]
    fn test_configuration_from_candidate_set() {
        let set = TraversalConfig::default().build(1);
        let config = RTCConfiguration::from(&set);

        assert_eq!(config.ice_servers.len(), set.servers().len());
        assert_eq!(config.ice_transport_policy, RTCIceTransportPolicy::Relay);
        assert_eq!(config.bundle_policy, RTCBundlePolicy::MaxBundle);
        assert_eq!(config.ice_candidate_pool_size, 10);

        let relay = config
            .ice_servers
            .iter()
            .find(|s| s.urls[0].starts_with("turn:"))
            .unwrap();
        assert_eq!(relay.username, "openrelayproject");
    }

    #[test]
    fn test_ice_state_mapping() {
        assert_eq!(
            ConnectivityState::from(RTCIceConnectionState::Completed),
            ConnectivityState::Completed
        );
        assert_eq!(
            ConnectivityState::from(RTCPeerConnectionState::Connecting),
            ConnectivityState::Checking
        );
    }
}
