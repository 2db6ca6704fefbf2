//! Stream-backed channel (UNIX domain socket or TCP).
//!
//! The emulated board exposes its UARTs as sockets; a physical serial port
//! bridged to TCP works the same way.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument};

use super::traits::{ChannelError, DuplexChannel};

/// Smallest timeout handed to the OS; zero means "block forever" there.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Blocking stream with a configurable read timeout.
pub trait TimeoutStream: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
    fn shutdown(&self) -> io::Result<()>;
}

impl TimeoutStream for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl TimeoutStream for UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UnixStream::set_read_timeout(self, timeout)
    }

    fn shutdown(&self) -> io::Result<()> {
        UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Duplex channel over a blocking stream.
pub struct StreamChannel<S: TimeoutStream> {
    stream: Option<S>,
    label: String,
    read_timeout: Option<Duration>,
}

impl<S: TimeoutStream> StreamChannel<S> {
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            label: label.into(),
            read_timeout: None,
        }
    }

    fn stream(&mut self) -> Result<&mut S, ChannelError> {
        self.stream.as_mut().ok_or(ChannelError::Closed)
    }
}

impl StreamChannel<TcpStream> {
    #[instrument(level = "info")]
    pub fn connect_tcp(addr: &str) -> Result<Self, ChannelError> {
        let stream =
            TcpStream::connect(addr).map_err(|e| ChannelError::OpenFailed(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ChannelError::OpenFailed(e.to_string()))?;
        info!(addr, "Connected");
        Ok(Self::new(stream, format!("tcp:{}", addr)))
    }
}

#[cfg(unix)]
impl StreamChannel<UnixStream> {
    #[instrument(level = "info", skip(path), fields(socket = %path.as_ref().display()))]
    pub fn connect_unix<P: AsRef<Path>>(path: P) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let stream =
            UnixStream::connect(path).map_err(|e| ChannelError::OpenFailed(e.to_string()))?;
        info!("Connected");
        Ok(Self::new(stream, format!("unix:{}", path.display())))
    }
}

impl<S: TimeoutStream> DuplexChannel for StreamChannel<S> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        let stream = self.stream()?;
        stream
            .write_all(data)
            .and_then(|_| stream.flush())
            .map_err(|e| match e.kind() {
                io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
                    ChannelError::Disconnected
                }
                _ => ChannelError::WriteFailed(e.to_string()),
            })
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8, ChannelError> {
        let timeout = timeout.max(MIN_READ_TIMEOUT);
        if self.read_timeout != Some(timeout) {
            self.stream()?
                .set_read_timeout(Some(timeout))
                .map_err(|e| ChannelError::ReadFailed(e.to_string()))?;
            self.read_timeout = Some(timeout);
        }

        let stream = self.stream()?;
        let mut byte = [0u8; 1];
        loop {
            match stream.read(&mut byte) {
                Ok(0) => return Err(ChannelError::Disconnected),
                Ok(_) => return Ok(byte[0]),
                Err(e) => match e.kind() {
                    io::ErrorKind::Interrupted => continue,
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        return Err(ChannelError::timeout(timeout));
                    }
                    _ => return Err(ChannelError::ReadFailed(e.to_string())),
                },
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!(channel = %self.label, "Closing channel");
            let _ = stream.shutdown();
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl<S: TimeoutStream> Drop for StreamChannel<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open a channel from a `unix:/path` or `tcp:host:port` specification.
pub fn open_port(port: &str) -> Result<Box<dyn DuplexChannel>, ChannelError> {
    if let Some(addr) = port.strip_prefix("tcp:") {
        return Ok(Box::new(StreamChannel::connect_tcp(addr)?));
    }
    if let Some(path) = port.strip_prefix("unix:") {
        return open_unix(path);
    }
    Err(ChannelError::OpenFailed(format!(
        "unsupported port '{}', expected unix:/path or tcp:host:port",
        port
    )))
}

#[cfg(unix)]
fn open_unix(path: &str) -> Result<Box<dyn DuplexChannel>, ChannelError> {
    Ok(Box::new(StreamChannel::connect_unix(path)?))
}

#[cfg(not(unix))]
fn open_unix(_path: &str) -> Result<Box<dyn DuplexChannel>, ChannelError> {
    Err(ChannelError::OpenFailed(
        "UNIX sockets are not supported on this platform".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_tcp_roundtrip_and_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let device = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1];
            socket.read_exact(&mut buf).unwrap();
            socket.write_all(&buf).unwrap();
            // Hold the socket open until the host has timed out once.
            socket.read_exact(&mut buf).unwrap();
        });

        let mut channel = StreamChannel::connect_tcp(&addr).unwrap();
        channel.write_all(b"U").unwrap();
        assert_eq!(channel.read_byte(Duration::from_secs(2)).unwrap(), b'U');
        assert!(
            channel
                .read_byte(Duration::from_millis(20))
                .unwrap_err()
                .is_timeout()
        );
        channel.write_all(b"x").unwrap();
        device.join().unwrap();

        channel.close();
        assert!(!channel.is_open());
        assert_eq!(channel.write_all(b"y").unwrap_err(), ChannelError::Closed);
    }

    #[test]
    fn test_open_port_rejects_unknown_scheme() {
        assert!(matches!(
            open_port("com3"),
            Err(ChannelError::OpenFailed(_))
        ));
    }
}
