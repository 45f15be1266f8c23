//! Discovery protocol: the status handshake used to find and confirm agents.
//!
//! A probe either reaches nothing (`Unreachable`), reaches something that is
//! not our agent (`Malformed`, `ForeignAgent`), or returns the agent's
//! handshake. Callers scanning a range treat every failure as "no agent
//! here"; only the unreachable case counts toward the scan's fault limit.

pub mod client;
pub mod wire;

pub use client::{AgentEndpoint, StreamOutcome, TcpProber, TransportError};
pub use wire::{AgentRequest, HandshakeResponse, AGENT_APP_TYPE};

use thiserror::Error;

/// Failure of a single handshake.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("port {port} unreachable: {source}")]
    Unreachable {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("port {port} sent an unreadable handshake: {reason}")]
    Malformed { port: u16, reason: String },

    #[error("port {port} belongs to {app_type:?}, not a flight profiler agent")]
    ForeignAgent { port: u16, app_type: String },
}

impl ProbeError {
    /// Whether something accepted the connection.
    pub fn is_reachable(&self) -> bool {
        !matches!(self, ProbeError::Unreachable { .. })
    }

    pub fn port(&self) -> u16 {
        match self {
            ProbeError::Unreachable { port, .. }
            | ProbeError::Malformed { port, .. }
            | ProbeError::ForeignAgent { port, .. } => *port,
        }
    }
}

impl From<ProbeError> for fp_common::Error {
    fn from(err: ProbeError) -> Self {
        let port = err.port();
        match err {
            ProbeError::Unreachable { source, .. } => fp_common::Error::Unreachable {
                port,
                reason: source.to_string(),
            },
            other => fp_common::Error::ProtocolMismatch {
                port,
                reason: other.to_string(),
            },
        }
    }
}

/// Runs the handshake against one local port.
///
/// The seam that lets discovery and verification run against in-memory
/// agents in tests.
pub trait Prober {
    fn probe(&self, port: u16) -> Result<HandshakeResponse, ProbeError>;
}

impl<P: Prober + ?Sized> Prober for &P {
    fn probe(&self, port: u16) -> Result<HandshakeResponse, ProbeError> {
        (**self).probe(port)
    }
}
