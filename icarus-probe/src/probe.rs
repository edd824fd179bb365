use std::{
    io::{ErrorKind, Read, Write},
    time::{Duration, Instant},
};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::{
    error::ProbeError,
    payload::{Fixture, IcarusPayload, NONCE_LEN, encode_tokens, fixtures},
};

const LINE_TERMINATOR: u8 = b'\n';

#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// How long to wait for a reply
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Builder to open a [SerialProbe] with modified configuration options
///
/// # Example
///
/// ```ignore
/// use icarus_probe::Builder;
/// use std::time::Duration;
///
/// let probe = Builder::new()
///     .timeout(Duration::from_secs(5))
///     .open("/dev/ttyUSB0")?;
/// ```
#[derive(Default)]
pub struct Builder {
    config: SerialConfig,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    /// Set how long to wait for a reply
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Open the device and return the probe
    pub fn open(self, path: &str) -> Result<SerialProbe, ProbeError> {
        SerialProbe::open(path, &self.config)
    }
}

/// The answer of a device to a [`Fixture`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FixtureResult {
    pub payload: IcarusPayload,
    /// Up to four bytes; fewer if the device did not answer in time
    pub received: Vec<u8>,
    pub expected: [u8; NONCE_LEN],
}

impl FixtureResult {
    /// Whether the device found the expected nonce
    pub fn matches(&self) -> bool {
        self.received == self.expected
    }
}

/// A single session with a device on a serial link.
///
/// The link is closed when the probe is dropped.
pub struct SerialProbe<L = Box<dyn SerialPort>> {
    link: L,
    name: String,
    timeout: Duration,
}

impl SerialProbe {
    /// Opens `path` with 8 data bits, no parity and one stop bit.
    pub fn open(path: &str, config: &SerialConfig) -> Result<SerialProbe, ProbeError> {
        log::debug!(
            "Opening serial device {} at {} baud",
            path,
            config.baud_rate
        );
        let port = serialport::new(path, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(|err| {
                log::error!("Opening {} failed: {}", path, err);
                ProbeError::DeviceOpen(err)
            })?;
        log::info!("Opened serial device {}", path);
        Ok(SerialProbe::new(port, path, config.timeout))
    }
}

impl<L: Read + Write> SerialProbe<L> {
    /// Wraps an already open link. `timeout` bounds every reply.
    pub fn new(link: L, name: impl Into<String>, timeout: Duration) -> SerialProbe<L> {
        SerialProbe {
            link,
            name: name.into(),
            timeout,
        }
    }

    /// Sends both test vectors and reads the four byte answer to each.
    pub fn send_icarus_fixture(&mut self) -> Result<[FixtureResult; 2], ProbeError> {
        let [first, second] = fixtures()?;
        Ok([self.send_fixture(first)?, self.send_fixture(second)?])
    }

    fn send_fixture(&mut self, fixture: Fixture) -> Result<FixtureResult, ProbeError> {
        log::info!("Push payload to {}: {}", self.name, fixture.payload);
        self.write(fixture.payload.as_bytes())?;
        let received = self.read_up_to(NONCE_LEN)?;
        if received.len() < NONCE_LEN {
            log::warn!(
                "{} answered with {} of {} bytes",
                self.name,
                received.len(),
                NONCE_LEN
            );
        }
        Ok(FixtureResult {
            payload: fixture.payload,
            received,
            expected: fixture.expected,
        })
    }

    /// Sends the concatenated `tokens` and returns the first line of the reply.
    ///
    /// Without a line terminator, whatever arrived before the timeout is returned.
    pub fn send_generic<S: AsRef<str>>(&mut self, tokens: &[S]) -> Result<Vec<u8>, ProbeError> {
        let payload = encode_tokens(tokens)?;
        log::info!("Sending: 0x{}", hex::encode(&payload));
        self.write(&payload)?;
        self.read_line()
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), ProbeError> {
        log::trace!("Writing {:02x?}", payload);
        self.link
            .write_all(payload)
            .and_then(|_| self.link.flush())
            .map_err(|err| {
                log::error!("Writing to {} failed: {}", self.name, err);
                ProbeError::Transport(err)
            })
    }

    /// Reads until `len` bytes arrived, the link runs dry or the timeout elapses.
    pub fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>, ProbeError> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.link.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    break;
                }
                Err(err) => return Err(ProbeError::Transport(err)),
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        buf.truncate(filled);
        log::debug!("Read {} bytes from {}", filled, self.name);
        Ok(buf)
    }

    /// Reads up to and including the line terminator, or until the timeout elapses.
    pub fn read_line(&mut self) -> Result<Vec<u8>, ProbeError> {
        let deadline = Instant::now() + self.timeout;
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.link.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == LINE_TERMINATOR {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    break;
                }
                Err(err) => return Err(ProbeError::Transport(err)),
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        log::debug!("Read {} bytes from {}", line.len(), self.name);
        Ok(line)
    }

    /// Flushes and releases the link.
    pub fn close(mut self) {
        if let Err(err) = self.link.flush() {
            log::warn!("Flushing {} on close failed: {}", self.name, err);
        }
        log::debug!("Closed {}", self.name);
    }

    pub fn into_inner(self) -> L {
        self.link
    }
}
