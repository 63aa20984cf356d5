//! Byte-stream connections to the earbuds.
//!
//! On Linux the earbuds' RFCOMM channel shows up as a serial device once it
//! is bound (`rfcomm bind`), so [`SerialTransport`] is the usual choice.
//! [`TcpTransport`] covers setups where a bridge forwards the channel over
//! the network.

use crate::config::TransportConfig;
use crate::dummy_buds::DummyBuds;

use log::{debug, info};
use serial2::SerialPort;

use std::{
    borrow::Cow,
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

/// How long a single read waits for bytes before reporting a timeout.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Errors that end a connection.
#[derive(Debug)]
pub enum TransportError {
    /// The connection could not be established.
    Open {
        /// What we tried to open
        target: String,
        /// Why it failed
        source: io::Error,
    },
    /// The peer closed the connection.
    Disconnected,
    /// Any other I/O failure on an open connection.
    Io(io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use TransportError as TE;
        let msg = match self {
            TE::Open { target, source } => Cow::from(format!("failed to open {}: {}", target, source)),
            TE::Disconnected => Cow::from("connection closed by peer"),
            TE::Io(error) => Cow::from(format!("io error: {}", error)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// A bidirectional byte stream to the earbuds.
pub trait Transport: Send {
    /// Reads whatever has arrived into `buf`. Waits at most a short,
    /// implementation-defined timeout; `Ok(0)` means nothing arrived in
    /// that time, not that the stream ended.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Sends all of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Releases the connection. Called exactly once, when the reader exits.
    fn close(&mut self) {}

    /// A short human-readable name for logs.
    fn describe(&self) -> String;
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// A serial device, such as a bound RFCOMM channel.
#[derive(Debug)]
pub struct SerialTransport {
    port: SerialPort,
    path: PathBuf,
}

impl SerialTransport {
    /// Opens `path` at `baud_rate` with a short read timeout.
    pub fn open(path: impl AsRef<Path>, baud_rate: u32) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source: io::Error| TransportError::Open {
            target: path.display().to_string(),
            source,
        };
        let mut port = SerialPort::open(&path, baud_rate).map_err(open_error)?;
        port.set_read_timeout(READ_TIMEOUT).map_err(open_error)?;
        info!("Opened serial device {} at {} baud", path.display(), baud_rate);
        Ok(Self { port, path })
    }

    /// Serial devices present on this machine.
    pub fn available_ports() -> Result<Vec<PathBuf>, TransportError> {
        Ok(SerialPort::available_ports()?)
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        Ok(())
    }

    fn close(&mut self) {
        // the device itself is closed when the port is dropped
        debug!("Releasing serial device {}", self.path.display());
    }

    fn describe(&self) -> String {
        format!("serial {}", self.path.display())
    }
}

/// A TCP connection to a bridge that forwards the earbuds' byte stream.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    address: String,
}

impl TcpTransport {
    /// Connects to `address` (`host:port`) with a short read timeout.
    pub fn connect(address: &str) -> Result<Self, TransportError> {
        let open_error = |source: io::Error| TransportError::Open {
            target: address.to_owned(),
            source,
        };
        let addr = address
            .to_socket_addrs()
            .map_err(open_error)?
            .next()
            .ok_or_else(|| {
                open_error(io::Error::new(
                    io::ErrorKind::NotFound,
                    "address resolved to nothing",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5)).map_err(open_error)?;
        stream.set_read_timeout(Some(READ_TIMEOUT)).map_err(open_error)?;
        stream.set_nodelay(true).map_err(open_error)?;
        info!("Connected to {}", address);
        Ok(Self {
            stream,
            address: address.to_owned(),
        })
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(data)?;
        Ok(())
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("Shutting down {} failed: {}", self.address, e);
        }
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.address)
    }
}

/// Opens the transport described by `config`.
pub fn open_transport(config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
    let transport: Box<dyn Transport> = match config {
        TransportConfig::Serial { path, baud_rate } => {
            Box::new(SerialTransport::open(path, *baud_rate)?)
        }
        TransportConfig::Tcp { address } => Box::new(TcpTransport::connect(address)?),
        TransportConfig::Dummy {
            rate_hz,
            yaw_rate,
            noise,
        } => Box::new(
            DummyBuds::builder()
                .rate_hz(*rate_hz)
                .yaw_rate(*yaw_rate)
                .noise(*noise)
                .build(),
        ),
    };
    Ok(transport)
}

/// Lets a boxed transport be used wherever a `Transport` is expected.
impl Transport for Box<dyn Transport> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(data)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
