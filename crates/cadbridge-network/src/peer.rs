//! Server side of the protocol
//!
//! A minimal stand-in for the CAD server: accepts client connections, decodes their requests
//! and writes responses and pushed transactions. Used by integration tests and the demo.

use crate::codec::{
    decode_request, encode_failure, encode_list_response, encode_new_file, encode_new_version,
    encode_refacet_response, encode_transaction,
};
use crate::protocol::{MessageType, Protocol, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
use crate::request::Request;
use crate::types::{ListSnapshot, RefacetResult, Transaction};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Errors that can occur on the server side
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Accept timeout")]
    AcceptTimeout,
}

/// Configuration for the server peer
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// TCP no-delay setting
    pub tcp_nodelay: bool,
    /// Read timeout for accepted connections
    pub read_timeout: Option<Duration>,
    /// Accept timeout for new connections
    pub accept_timeout: Option<Duration>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tcp_nodelay: true,
            read_timeout: Some(Duration::from_secs(30)),
            accept_timeout: None, // Block by default
        }
    }
}

/// Listening server socket
pub struct ServerPeer {
    listener: TcpListener,
    protocol: Protocol,
    config: PeerConfig,
}

impl ServerPeer {
    /// Listen on the specified address
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, PeerError> {
        Self::bind_with_config(addr, PeerConfig::default())
    }

    /// Listen with custom configuration
    pub fn bind_with_config<A: ToSocketAddrs>(
        addr: A,
        config: PeerConfig,
    ) -> Result<Self, PeerError> {
        let listener =
            TcpListener::bind(addr).map_err(|e| PeerError::Bind(format!("Failed to bind: {e}")))?;

        info!("Server peer listening on {}", listener.local_addr()?);

        // Set non-blocking mode if accept timeout is specified
        if config.accept_timeout.is_some() {
            listener.set_nonblocking(true)?;
        }

        let protocol = Protocol::new().with_max_message_size(config.max_message_size);

        Ok(Self {
            listener,
            protocol,
            config,
        })
    }

    /// Get the local address the peer is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, PeerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one client connection
    pub fn accept(&self) -> Result<PeerConnection, PeerError> {
        let (stream, addr) = if let Some(timeout) = self.config.accept_timeout {
            let start = Instant::now();
            loop {
                match self.listener.accept() {
                    Ok(result) => break result,
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        if start.elapsed() > timeout {
                            return Err(PeerError::AcceptTimeout);
                        }
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        } else {
            self.listener.accept()?
        };

        info!("Accepted connection from {}", addr);

        stream.set_nonblocking(false)?;
        stream.set_nodelay(self.config.tcp_nodelay)?;
        stream.set_read_timeout(self.config.read_timeout)?;

        Ok(PeerConnection {
            stream,
            protocol: self.protocol,
            peer_addr: addr,
        })
    }
}

/// One accepted client
pub struct PeerConnection {
    stream: TcpStream,
    protocol: Protocol,
    peer_addr: SocketAddr,
}

impl PeerConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read and decode the next request
    pub fn read_request(&mut self) -> Result<(u32, Request), PeerError> {
        let payload = self.protocol.read_frame(&mut self.stream)?;
        let (request_id, request) = decode_request(&payload)?;
        debug!(
            "Request {} from {}: {:?}",
            request_id,
            self.peer_addr,
            request.message_type()
        );
        Ok((request_id, request))
    }

    /// Write an already encoded payload
    pub fn send_frame(&mut self, payload: &[u8]) -> Result<(), PeerError> {
        trace!("Sending {} bytes to {}", payload.len(), self.peer_addr);
        self.protocol.write_frame(&mut self.stream, payload)?;
        Ok(())
    }

    pub fn send_transaction(&mut self, transaction: &Transaction) -> Result<(), PeerError> {
        self.send_frame(&encode_transaction(transaction))
    }

    pub fn send_list(&mut self, request_id: u32, snapshot: &ListSnapshot) -> Result<(), PeerError> {
        self.send_frame(&encode_list_response(request_id, snapshot))
    }

    pub fn send_refacet(
        &mut self,
        request_id: u32,
        result: &RefacetResult,
    ) -> Result<(), PeerError> {
        self.send_frame(&encode_refacet_response(request_id, result))
    }

    pub fn send_failure(
        &mut self,
        message_type: MessageType,
        request_id: u32,
        code: u32,
    ) -> Result<(), PeerError> {
        self.send_frame(&encode_failure(message_type, request_id, code))
    }

    pub fn send_new_version(&mut self, filename: &str, version: u32) -> Result<(), PeerError> {
        self.send_frame(&encode_new_version(filename, version))
    }

    pub fn send_new_file(&mut self, filename: &str) -> Result<(), PeerError> {
        self.send_frame(&encode_new_file(filename))
    }

    /// Close the connection from the server side
    pub fn close(self) -> Result<(), PeerError> {
        debug!("Closing connection to {}", self.peer_addr);
        self.stream.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_config_default() {
        let config = PeerConfig::default();
        assert!(config.tcp_nodelay);
        assert!(config.accept_timeout.is_none());
    }

    #[test]
    fn test_peer_bind() {
        let peer = ServerPeer::bind("127.0.0.1:0").unwrap();
        assert!(peer.local_addr().is_ok());
    }

    #[test]
    fn test_accept_timeout() {
        let config = PeerConfig {
            accept_timeout: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let peer = ServerPeer::bind_with_config("127.0.0.1:0", config).unwrap();
        assert!(matches!(peer.accept(), Err(PeerError::AcceptTimeout)));
    }
}
