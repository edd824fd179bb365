//! # Miner API Client
//!
//! A Rust client library for the API socket of mining-rig monitoring daemons.
//!
//! ## Overview
//!
//! Every call is a single-shot session: connect, write one request, drain one reply,
//! close. There is no connection reuse, no retry and no shared state between calls,
//! so an [`ApiClient`] can be used from several threads for different daemons at once.
//!
//! The wire details (request encoding, NUL padding, drain strategies) live in the
//! [`minerapi_protocol`] crate; this crate adds the socket handling.
//!
//! ## Basic Usage
//!
//! ### Querying a Daemon
//!
//! ```ignore
//! use minerapi_client::ApiClient;
//!
//! let client = ApiClient::default();
//! let reply = client.call("127.0.0.1", 4028, "summary", None)?;
//! println!("{}", reply);
//! ```
//!
//! ### Choosing the Framing
//!
//! ```ignore
//! use minerapi_client::Builder;
//! use minerapi_protocol::{Drain, ParameterPolicy};
//! use std::time::Duration;
//!
//! let client = Builder::new()
//!     .parameter_policy(ParameterPolicy::AlwaysPresent)
//!     .drain(Drain::single_read())
//!     .connect_timeout(Duration::from_secs(3))
//!     .build();
//! let reply = client.call("10.0.0.12", 4028, "pga", Some("0"))?;
//! ```
//!
//! ### Cancelling a Call
//!
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let reply = client.call_async("127.0.0.1:4028", &request, &cancel).await?;
//! ```
//!
//! ## Error Handling
//!
//! [`ApiError`] separates failures to reach the daemon, failures on an open connection,
//! and replies that cannot be decoded. The socket is closed on every path; a failing
//! close is logged and never replaces the original error.
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Connections and closes are logged at `debug`,
//! raw payloads at `trace`, and transport failures at `error`.
use std::{
    error::Error,
    fmt::Display,
    io::{self, ErrorKind},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use minerapi_protocol::{
    ApiRequest, Drain, ParameterPolicy, PlainReply, RequestEncoding,
    codec::decode_json_reply,
    error::{DrainError, ReplyError},
};
use serde_json::Value;

mod async_call;
pub mod discovery;

pub use tokio_util::sync::CancellationToken;

/// Errors of a single API call.
#[derive(Debug)]
pub enum ApiError {
    /// The daemon could not be reached, or closed the connection without answering.
    Connection(io::Error),
    /// Sending or receiving failed on an open connection.
    Transport(io::Error),
    /// The reply could not be decoded.
    Protocol(ReplyError),
    /// A configured timeout elapsed before the exchange completed.
    TimedOut,
    /// The call was cancelled through its [`CancellationToken`].
    Cancelled,
}

impl From<ReplyError> for ApiError {
    fn from(value: ReplyError) -> Self {
        ApiError::Protocol(value)
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Connection(error) => write!(f, "Connection failed: {}", error),
            ApiError::Transport(error) => write!(f, "Transport error: {}", error),
            ApiError::Protocol(error) => write!(f, "Protocol error: {}", error),
            ApiError::TimedOut => write!(f, "Timed out"),
            ApiError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApiError::Connection(error) | ApiError::Transport(error) => Some(error),
            ApiError::Protocol(error) => Some(error),
            _ => None,
        }
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Classifies a failed read. A daemon that fails before sending anything is
/// treated as unreachable.
pub(crate) fn read_failure(received: usize, err: io::Error) -> ApiError {
    if is_timeout(&err) {
        ApiError::TimedOut
    } else if received == 0 {
        ApiError::Connection(err)
    } else {
        ApiError::Transport(err)
    }
}

impl From<DrainError> for ApiError {
    fn from(value: DrainError) -> Self {
        read_failure(value.received(), value.source)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub encoding: RequestEncoding,
    pub drain: Drain,
    /// `None` blocks until the operating system gives up
    pub connect_timeout: Option<Duration>,
    /// Applies to each read and write on the socket
    pub io_timeout: Option<Duration>,
}

/// Builder to create an [ApiClient] and modify configuration options
///
/// # Example
///
/// ```ignore
/// use minerapi_client::Builder;
/// use minerapi_protocol::Drain;
/// use std::time::Duration;
///
/// let client = Builder::new()
///     .drain(Drain::until_nul())
///     .io_timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Encode requests as JSON objects following `policy`
    pub fn parameter_policy(mut self, policy: ParameterPolicy) -> Self {
        self.config.encoding = RequestEncoding::Json(policy);
        self
    }

    pub fn encoding(mut self, encoding: RequestEncoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Set the strategy used to read the reply
    pub fn drain(mut self, drain: Drain) -> Self {
        self.config.drain = drain;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the TCP read and write timeout
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> ApiClient {
        ApiClient::new(self.config)
    }
}

/// A single open connection to an API daemon.
///
/// The session owns the socket; dropping it closes the connection.
/// [`ApiSession::close`] additionally shuts the connection down and logs failures.
pub struct ApiSession {
    tcp: TcpStream,
    peer: SocketAddr,
}

impl ApiSession {
    /// Connects to the first address that accepts a connection.
    pub fn connect(
        addr: impl ToSocketAddrs,
        timeout: Option<Duration>,
    ) -> Result<ApiSession, ApiError> {
        let mut last_err = None;
        let peers = addr.to_socket_addrs().map_err(|err| {
            log::error!("Resolving the daemon address failed: {}", err);
            ApiError::Connection(err)
        })?;
        for peer in peers {
            log::debug!("Connecting to {}", peer);
            let tcp = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&peer, timeout),
                None => TcpStream::connect(peer),
            };
            match tcp {
                Ok(tcp) => return Ok(ApiSession { tcp, peer }),
                Err(err) => {
                    log::debug!("Connecting to {} failed: {}", peer, err);
                    last_err = Some(err);
                }
            }
        }
        let err = last_err.unwrap_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidInput,
                "could not resolve to any addresses",
            )
        });
        log::error!("Socket connect failed: {}", err);
        Err(ApiError::Connection(err))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes `request` and drains the reply. The raw reply still carries its NUL padding.
    pub fn exchange(
        &mut self,
        request: &ApiRequest,
        encoding: RequestEncoding,
        drain: Drain,
        io_timeout: Option<Duration>,
    ) -> Result<Vec<u8>, ApiError> {
        self.tcp
            .set_read_timeout(io_timeout)
            .map_err(ApiError::Transport)?;
        self.tcp
            .set_write_timeout(io_timeout)
            .map_err(ApiError::Transport)?;

        let payload = request
            .to_bytes(encoding)
            .map_err(|err| ApiError::Transport(err.into()))?;
        log::trace!("Sending request: {}", String::from_utf8_lossy(&payload));
        if let Err(err) = io::Write::write_all(&mut self.tcp, &payload) {
            log::error!("Send failed: {}", err);
            return Err(if is_timeout(&err) {
                ApiError::TimedOut
            } else {
                ApiError::Transport(err)
            });
        }

        let reply = match drain.read_from(&mut self.tcp) {
            Ok(reply) => reply,
            // The daemon may answer in full and be slow to close
            Err(err) if err.is_timeout() && !err.partial.is_empty() => {
                log::warn!(
                    "Timed out waiting for {}, using the {} bytes received",
                    self.peer,
                    err.received()
                );
                err.partial
            }
            Err(err) => {
                log::error!("Recv failed: {}", err);
                return Err(err.into());
            }
        };
        log::debug!("Received {} reply bytes from {}", reply.len(), self.peer);
        log::trace!("Reply: {:02x?}", &reply[..]);
        Ok(reply)
    }

    /// Shuts the connection down. Failure is logged, never returned, so it
    /// cannot hide the outcome of the exchange.
    pub fn close(self) {
        match self.tcp.shutdown(Shutdown::Both) {
            Ok(()) => log::debug!("Closed connection to {}", self.peer),
            // The daemon closes its end after replying
            Err(err) if err.kind() == ErrorKind::NotConnected => {
                log::debug!("Connection to {} already closed", self.peer)
            }
            Err(err) => log::warn!("Closing connection to {} failed: {}", self.peer, err),
        }
    }
}

/// Client for the API socket of a mining-rig daemon.
///
/// Each call opens a fresh [`ApiSession`] that is closed before the call returns.
#[derive(Debug, Clone, Default)]
pub struct ApiClient {
    config: Config,
}

impl ApiClient {
    pub fn new(config: Config) -> ApiClient {
        ApiClient { config }
    }

    /// Sends `command` with an optional `parameter` to `host:port` and decodes the JSON reply.
    pub fn call(
        &self,
        host: &str,
        port: u16,
        command: &str,
        parameter: Option<&str>,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest::new(command, parameter.map(str::to_string));
        self.request((host, port), &request)
    }

    /// Performs one exchange and decodes the reply as JSON.
    pub fn request(
        &self,
        addr: impl ToSocketAddrs,
        request: &ApiRequest,
    ) -> Result<Value, ApiError> {
        let raw = self.exchange(addr, request, self.config.encoding)?;
        Ok(decode_json_reply(&raw)?)
    }

    /// Performs one exchange using the plain text encoding and parses the plain reply.
    pub fn call_plain(
        &self,
        addr: impl ToSocketAddrs,
        request: &ApiRequest,
    ) -> Result<PlainReply, ApiError> {
        let raw = self.exchange(addr, request, RequestEncoding::Plain)?;
        Ok(PlainReply::from_bytes(&raw)?)
    }

    /// Performs one exchange and returns the reply bytes as received.
    pub fn exchange(
        &self,
        addr: impl ToSocketAddrs,
        request: &ApiRequest,
        encoding: RequestEncoding,
    ) -> Result<Vec<u8>, ApiError> {
        let mut session = ApiSession::connect(addr, self.config.connect_timeout)?;
        log::info!("Sending '{}' to {}", request, session.peer());
        let result = session.exchange(
            request,
            encoding,
            self.config.drain,
            self.config.io_timeout,
        );
        session.close();
        result
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    /// Accepts one connection, reads the request and answers with `reply`.
    fn one_shot_daemon(reply: &'static [u8]) -> (SocketAddr, thread::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut tcp, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = tcp.read(&mut buf).unwrap();
            tcp.write_all(reply).unwrap();
            buf[..n].to_vec()
        });
        (addr, handle)
    }

    #[test]
    fn call_decodes_padded_reply() {
        let (addr, daemon) = one_shot_daemon(b"{\"STATUS\":[{\"STATUS\":\"S\"}],\"id\":1}\0\0\0");
        let client = ApiClient::default();
        let reply = client
            .call("127.0.0.1", addr.port(), "summary", None)
            .unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(daemon.join().unwrap(), br#"{"command":"summary"}"#.to_vec());
    }

    #[test]
    fn always_present_parameter_on_the_wire() {
        let (addr, daemon) = one_shot_daemon(b"{}\0");
        let client = Builder::new()
            .parameter_policy(ParameterPolicy::AlwaysPresent)
            .build();
        client.call("127.0.0.1", addr.port(), "devs", None).unwrap();
        assert_eq!(
            daemon.join().unwrap(),
            br#"{"command":"devs","parameter":""}"#.to_vec()
        );
    }

    #[test]
    fn non_json_reply_is_protocol_error() {
        let (addr, _daemon) = one_shot_daemon(b"STATUS=S,Code=11|\0");
        let client = ApiClient::default();
        match client.call("127.0.0.1", addr.port(), "summary", None) {
            Err(ApiError::Protocol(ReplyError::InvalidJson(_))) => {}
            other => panic!("expected Protocol error, got {:?}", other),
        }
    }

    #[test]
    fn plain_call() {
        let (addr, daemon) = one_shot_daemon(b"STATUS=S,Code=11,Msg=Summary|SUMMARY,Elapsed=5|\0");
        let client = ApiClient::default();
        let reply = client
            .call_plain(addr, &ApiRequest::parse("summary", '|'))
            .unwrap();
        assert_eq!(reply.sections()[1].title(), "SUMMARY");
        assert_eq!(daemon.join().unwrap(), b"summary".to_vec());
    }

    #[test]
    fn connect_failure_is_connection_error() {
        // Bind and drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = Builder::new()
            .connect_timeout(Duration::from_secs(2))
            .build();
        match client.call("127.0.0.1", port, "summary", None) {
            Err(ApiError::Connection(_)) => {}
            other => panic!("expected Connection error, got {:?}", other),
        }
    }

    #[test]
    fn unresolvable_address_is_connection_error() {
        // No port, so resolution fails without a lookup
        match ApiSession::connect("127.0.0.1", None) {
            Err(ApiError::Connection(err)) => assert_eq!(err.kind(), ErrorKind::InvalidInput),
            Err(other) => panic!("expected Connection error, got {:?}", other),
            Ok(_) => panic!("expected Connection error"),
        }
    }

    #[test]
    fn classify_read_failures() {
        assert!(matches!(
            read_failure(0, io::Error::from(ErrorKind::ConnectionReset)),
            ApiError::Connection(_)
        ));
        assert!(matches!(
            read_failure(12, io::Error::from(ErrorKind::ConnectionReset)),
            ApiError::Transport(_)
        ));
        assert!(matches!(
            read_failure(12, io::Error::from(ErrorKind::WouldBlock)),
            ApiError::TimedOut
        ));
    }
}
