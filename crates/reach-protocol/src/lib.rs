//! Binary frame codec, message payloads, and the session/server layers
//! that carry `ExecRequest`/`ExecResult` traffic between a client and the
//! execution daemon.

pub mod protocol;
pub mod server;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_NAME: &str = "reach-binary-protocol";

#[must_use]
pub fn is_supported(major: u16, minor: u16) -> bool {
    protocol::ProtocolVersion::V1_0.compatible_with(protocol::ProtocolVersion::new(major, minor))
}

#[must_use]
pub fn capabilities() -> protocol::ProtocolCapabilities {
    protocol::ProtocolCapabilities::default()
}
