//! # Multicast Discovery
//!
//! Daemons started with multicast enabled listen on a multicast group and answer
//! a `cgminer-<code>-<reply port>` datagram by sending a short datagram back to
//! the reply port of the sender. This module sends the request and collects the
//! answers that arrive within a wait window.
use std::{
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    time::{Duration, Instant},
};

use minerapi_protocol::DEFAULT_API_PORT;

pub const DEFAULT_CODE: &str = "FTW";
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 75);
pub const DEFAULT_REPLY_PORT: u16 = 4027;
pub const DEFAULT_WAIT: Duration = Duration::from_millis(1000);
pub const MAX_WAIT: Duration = Duration::from_secs(60);

const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Must match the code the daemons were started with
    pub code: String,
    pub group: Ipv4Addr,
    pub port: u16,
    /// Local port the answers are sent to
    pub reply_port: u16,
    /// How long to collect answers
    pub wait: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            code: DEFAULT_CODE.to_string(),
            group: DEFAULT_GROUP,
            port: DEFAULT_API_PORT,
            reply_port: DEFAULT_REPLY_PORT,
            wait: DEFAULT_WAIT,
        }
    }
}

impl DiscoveryConfig {
    /// The datagram sent to the multicast group
    pub fn request(&self) -> String {
        format!("cgminer-{}-{}", self.code, self.reply_port)
    }

    fn validate(&self) -> io::Result<()> {
        if self.port == 0 || self.reply_port == 0 {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "ports must be between 1 and 65535",
            ));
        }
        if self.wait > MAX_WAIT {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "wait must be between 0ms and 60000ms",
            ));
        }
        if !self.group.is_multicast() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a multicast address", self.group),
            ));
        }
        Ok(())
    }
}

/// An answer from a daemon.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Announcement {
    pub from: SocketAddr,
    pub message: String,
    /// Time between sending the request and receiving this answer
    pub elapsed: Duration,
}

/// Sends the discovery request and collects answers until the wait window closes.
pub fn discover(config: &DiscoveryConfig) -> io::Result<Vec<Announcement>> {
    config.validate()?;

    let listener = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.reply_port))?;
    let sender = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    let request = config.request();
    log::info!(
        "Sending {} to {}:{}",
        request,
        config.group,
        config.port
    );
    let start = Instant::now();
    sender.send_to(request.as_bytes(), (config.group, config.port))?;

    collect(&listener, start, config.wait)
}

pub(crate) fn collect(
    listener: &UdpSocket,
    start: Instant,
    wait: Duration,
) -> io::Result<Vec<Announcement>> {
    let mut announcements = Vec::new();
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let remaining = wait.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break;
        }
        listener.set_read_timeout(Some(remaining))?;
        match listener.recv_from(&mut buf) {
            Ok((n, from)) => {
                let announcement = Announcement {
                    from,
                    message: String::from_utf8_lossy(&buf[..n]).to_string(),
                    elapsed: start.elapsed(),
                };
                log::debug!("Got '{}' from {}", announcement.message, from);
                announcements.push(announcement);
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                break;
            }
            Err(err) => return Err(err),
        }
    }
    if announcements.is_empty() {
        log::info!("No replies received");
    }
    Ok(announcements)
}
