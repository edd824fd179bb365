//! Stub daemons and devices shared by the integration tests.
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener},
    thread::{self, JoinHandle},
    time::Duration,
};

use icarus_probe::fixtures;

/// What a stub daemon answers.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Send the request back verbatim, followed by `padding` NUL bytes.
    EchoPadded { padding: usize },
    /// Send these bytes.
    Fixed(Vec<u8>),
    /// Send these bytes, then keep the connection open for the given time.
    FixedThenHold(Vec<u8>, Duration),
}

impl Reply {
    fn answer(&self, request: &[u8]) -> (Vec<u8>, Option<Duration>) {
        match self {
            Reply::EchoPadded { padding } => {
                let mut reply = request.to_vec();
                reply.resize(request.len() + padding, 0);
                (reply, None)
            }
            Reply::Fixed(reply) => (reply.clone(), None),
            Reply::FixedThenHold(reply, hold) => (reply.clone(), Some(*hold)),
        }
    }
}

/// A daemon that serves exactly one connection on a loopback port.
pub struct StubDaemon {
    addr: SocketAddr,
    handle: JoinHandle<io::Result<Vec<u8>>>,
}

impl StubDaemon {
    pub fn spawn(reply: Reply) -> io::Result<StubDaemon> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let handle = thread::spawn(move || {
            let (mut tcp, _) = listener.accept()?;
            let mut buf = [0u8; 4096];
            let n = tcp.read(&mut buf)?;
            let request = buf[..n].to_vec();
            let (answer, hold) = reply.answer(&request);
            tcp.write_all(&answer)?;
            if let Some(hold) = hold {
                thread::sleep(hold);
            }
            Ok(request)
        });
        Ok(StubDaemon { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Waits for the daemon to finish and returns the request it received.
    pub fn received(self) -> io::Result<Vec<u8>> {
        self.handle
            .join()
            .map_err(|_| io::Error::other("stub daemon panicked"))?
    }
}

/// Async counterpart of [`StubDaemon`], served on the current tokio runtime.
pub async fn spawn_async_daemon(
    reply: Reply,
) -> io::Result<(SocketAddr, tokio::task::JoinHandle<io::Result<Vec<u8>>>)> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let (mut tcp, _) = listener.accept().await?;
        let mut buf = [0u8; 4096];
        let n = tcp.read(&mut buf).await?;
        let request = buf[..n].to_vec();
        let (answer, hold) = reply.answer(&request);
        tcp.write_all(&answer).await?;
        if let Some(hold) = hold {
            tokio::time::sleep(hold).await;
        }
        Ok(request)
    });
    Ok((addr, handle))
}

/// Emulates a working Icarus device: answers each known test vector with its
/// nonce and stays silent on anything else, timing out like a serial port.
#[derive(Default)]
pub struct IcarusEmulator {
    pending: Vec<u8>,
    replies: VecDeque<u8>,
    pub received: Vec<Vec<u8>>,
}

impl Read for IcarusEmulator {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replies.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(self.replies.len());
        for (slot, byte) in buf.iter_mut().zip(self.replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for IcarusEmulator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let work = std::mem::take(&mut self.pending);
        let known = fixtures().map_err(io::Error::other)?;
        if let Some(fixture) = known
            .iter()
            .find(|fixture| fixture.payload.as_bytes()[..] == work[..])
        {
            self.replies.extend(fixture.expected);
        }
        self.received.push(work);
        Ok(())
    }
}

/// A device that echoes every flushed write, optionally without the line end.
pub struct EchoDevice {
    pending: Vec<u8>,
    replies: VecDeque<u8>,
    strip_newline: bool,
}

impl EchoDevice {
    pub fn new(strip_newline: bool) -> EchoDevice {
        EchoDevice {
            pending: Vec::new(),
            replies: VecDeque::new(),
            strip_newline,
        }
    }
}

impl Read for EchoDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replies.is_empty() {
            return Err(io::Error::from(io::ErrorKind::TimedOut));
        }
        let n = buf.len().min(self.replies.len());
        for (slot, byte) in buf.iter_mut().zip(self.replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for EchoDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut echo = std::mem::take(&mut self.pending);
        if self.strip_newline {
            echo.retain(|b| *b != b'\n');
        }
        self.replies.extend(echo);
        Ok(())
    }
}
