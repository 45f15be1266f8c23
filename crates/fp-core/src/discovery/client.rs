//! TCP transport to the in-process agent.
//!
//! Every exchange opens a fresh connection; nothing is held open between
//! commands.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

use super::wire::{AgentRequest, HandshakeResponse};
use super::{ProbeError, Prober};

/// Interval at which streaming reads check for an interrupt.
pub const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on a handshake reply.
const MAX_HANDSHAKE_BYTES: u64 = 64 * 1024;

/// Errors raised while talking to a confirmed agent.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot connect to agent at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("agent connection failed: {0}")]
    Io(#[from] io::Error),

    #[error("cannot encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How a streamed reply ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The agent closed the connection.
    Completed { bytes: u64 },
    /// The stop check fired before the agent finished.
    Interrupted { bytes: u64 },
}

/// Address and timeouts of one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentEndpoint {
    addr: SocketAddr,
    timeout: Duration,
}

impl AgentEndpoint {
    /// Agent on the loopback interface.
    pub fn local(port: u16, timeout: Duration) -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port), timeout)
    }

    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&self.addr, self.timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(stream)
    }

    fn send_request(&self, stream: &mut TcpStream, request: &AgentRequest) -> Result<(), TransportError> {
        let payload = request.encode()?;
        stream.write_all(&payload)?;
        stream.flush()?;
        stream.shutdown(Shutdown::Write)?;
        Ok(())
    }

    /// Run the handshake.
    ///
    /// Connect failures are `Unreachable`. Anything that goes wrong after the
    /// connection is accepted proves the port is live and is reported as a
    /// protocol problem instead.
    pub fn probe(&self) -> Result<HandshakeResponse, ProbeError> {
        let port = self.port();
        let mut stream = self
            .connect()
            .map_err(|source| ProbeError::Unreachable { port, source })?;

        let malformed = |reason: String| ProbeError::Malformed { port, reason };

        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| malformed(e.to_string()))?;
        self.send_request(&mut stream, &AgentRequest::status())
            .map_err(|e| malformed(e.to_string()))?;

        let mut reply = Vec::new();
        (&mut stream)
            .take(MAX_HANDSHAKE_BYTES)
            .read_to_end(&mut reply)
            .map_err(|e| malformed(e.to_string()))?;
        trace!(port, bytes = reply.len(), "handshake reply");

        let response = HandshakeResponse::decode(&reply).map_err(|e| malformed(e.to_string()))?;
        if !response.is_ours() {
            return Err(ProbeError::ForeignAgent {
                port,
                app_type: response.app_type,
            });
        }
        Ok(response)
    }

    /// Send a request without waiting for a reply body.
    pub fn send(&self, request: &AgentRequest) -> Result<(), TransportError> {
        let mut stream = self.connect().map_err(|source| TransportError::Connect {
            addr: self.addr,
            source,
        })?;
        self.send_request(&mut stream, request)
    }

    /// Send a request and copy the reply into `out` until the agent closes
    /// the connection or `should_stop` returns true.
    ///
    /// Plugin replies may run for minutes, so reads are bounded only by
    /// [`STREAM_POLL_INTERVAL`] to keep the stop check responsive.
    pub fn stream<W, F>(
        &self,
        request: &AgentRequest,
        out: &mut W,
        should_stop: F,
    ) -> Result<StreamOutcome, TransportError>
    where
        W: Write + ?Sized,
        F: Fn() -> bool,
    {
        let mut stream = self.connect().map_err(|source| TransportError::Connect {
            addr: self.addr,
            source,
        })?;
        self.send_request(&mut stream, request)?;
        stream.set_read_timeout(Some(STREAM_POLL_INTERVAL))?;

        let mut buf = [0u8; 8192];
        let mut bytes = 0u64;
        loop {
            if should_stop() {
                debug!(command = %request.target, bytes, "stream interrupted");
                out.flush()?;
                return Ok(StreamOutcome::Interrupted { bytes });
            }
            match stream.read(&mut buf) {
                Ok(0) => {
                    out.flush()?;
                    return Ok(StreamOutcome::Completed { bytes });
                }
                Ok(n) => {
                    out.write_all(&buf[..n])?;
                    out.flush()?;
                    bytes += n as u64;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }
}

/// Prober over real TCP sockets on the loopback interface.
#[derive(Debug, Clone, Copy)]
pub struct TcpProber {
    timeout: Duration,
}

impl TcpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Prober for TcpProber {
    fn probe(&self, port: u16) -> Result<HandshakeResponse, ProbeError> {
        AgentEndpoint::local(port, self.timeout).probe()
    }
}
