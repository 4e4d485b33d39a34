/// Mapping onto `webrtc` crate types
///
/// Native transports built on webrtc-rs can turn a traversal candidate set
/// into an `RTCConfiguration` and report ICE state changes back as
/// `ConnectivityState`.
pub mod peer;
