//! TCP listener and stream.

use crate::net::{closed_error, io_op};
use crate::runtime::reactor::Direction;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read as _, Write as _};
use std::net::{Shutdown, SocketAddr, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A TCP listener whose `accept` suspends the calling task.
#[derive(Debug)]
pub struct TcpListener {
    inner: std::net::TcpListener,
    fd: RawFd,
    closed: AtomicBool,
}

impl TcpListener {
    /// Binds to the first address that works and registers the socket
    /// with the reactor.
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let inner = std::net::TcpListener::bind(addr)?;
        inner.set_nonblocking(true)?;
        let fd = inner.as_raw_fd();
        crate::runtime::reactor().register(fd)?;
        Ok(Self {
            inner,
            fd,
            closed: AtomicBool::new(false),
        })
    }

    /// Accepts the next connection; waits forever.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept_timeout(None).await
    }

    /// Accepts the next connection, failing with `ETIMEDOUT` after
    /// `timeout` if none arrives.
    pub async fn accept_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> io::Result<(TcpStream, SocketAddr)> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let (stream, addr) = io_op(self.fd, Direction::Read, timeout, || self.inner.accept()).await?;
        Ok((TcpStream::from_std(stream)?, addr))
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Cancels any pending accept with an `EBADF` error and deregisters
    /// the socket. The underlying fd closes when the listener drops.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            crate::runtime::reactor().close_fd(self.fd);
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// A connected TCP stream whose operations suspend the calling task.
#[derive(Debug)]
pub struct TcpStream {
    inner: std::net::TcpStream,
    fd: RawFd,
    closed: AtomicBool,
}

impl TcpStream {
    /// Wraps an accepted or connected std stream and registers it with
    /// the reactor.
    pub(crate) fn from_std(inner: std::net::TcpStream) -> io::Result<Self> {
        inner.set_nonblocking(true)?;
        let fd = inner.as_raw_fd();
        crate::runtime::reactor().register(fd)?;
        Ok(Self {
            inner,
            fd,
            closed: AtomicBool::new(false),
        })
    }

    /// Connects to `addr`, suspending on write-readiness until the
    /// handshake finishes or the timeout fires.
    pub async fn connect(addr: SocketAddr, timeout: Option<Duration>) -> io::Result<Self> {
        let socket = Socket::new(
            Domain::for_address(addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_nonblocking(true)?;

        match socket.connect(&SockAddr::from(addr)) {
            Ok(()) => {}
            Err(e) if connect_in_progress(&e) => {
                let stream = Self::from_std(socket.into())?;
                io_op(stream.fd, Direction::Write, timeout, || {
                    stream.connect_outcome()
                })
                .await?;
                return Ok(stream);
            }
            Err(e) => return Err(e),
        }
        Self::from_std(socket.into())
    }

    /// Checks whether a pending non-blocking connect finished.
    fn connect_outcome(&self) -> io::Result<()> {
        if let Some(err) = self.inner.take_error()? {
            return Err(err);
        }
        match self.inner.peer_addr() {
            Ok(_) => Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => {
                Err(io::ErrorKind::WouldBlock.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Reads into `buf`. `Ok(0)` means the peer closed its half.
    pub async fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        io_op(self.fd, Direction::Read, timeout, || (&self.inner).read(buf)).await
    }

    /// Writes from `buf`, returning how many bytes were accepted.
    pub async fn write(&self, buf: &[u8], timeout: Option<Duration>) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        io_op(self.fd, Direction::Write, timeout, || {
            (&self.inner).write(buf)
        })
        .await
    }

    /// Reads until `buf` is full; `UnexpectedEof` if the peer closes
    /// first. The timeout covers each read attempt.
    pub async fn read_exact(&self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..], timeout).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed before the buffer filled",
                ));
            }
            filled += n;
        }
        Ok(())
    }

    /// Writes the whole buffer. The timeout covers each write attempt.
    pub async fn write_all(&self, buf: &[u8], timeout: Option<Duration>) -> io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let n = self.write(&buf[written..], timeout).await?;
            written += n;
        }
        Ok(())
    }

    /// Returns the peer address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.inner.peer_addr()
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Cancels both direction waiters with an `EBADF` error, deregisters
    /// the socket, and shuts down both halves. There is no per-direction
    /// cancel; closing is the cancellation.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            crate::runtime::reactor().close_fd(self.fd);
            let _ = self.inner.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for TcpStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_in_progress(error: &io::Error) -> bool {
    error.raw_os_error() == Some(libc::EINPROGRESS)
        || error.kind() == io::ErrorKind::WouldBlock
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn bind_local() -> TcpListener {
        TcpListener::bind("127.0.0.1:0").expect("bind")
    }

    #[test]
    fn connect_read_write_round_trip() {
        init_test_logging();
        crate::block_on(async {
            let listener = bind_local();
            let addr = listener.local_addr().expect("local addr");

            let server = crate::spawn(async move {
                let (stream, _peer) = listener.accept().await.expect("accept");
                let mut buf = [0_u8; 5];
                stream.read_exact(&mut buf, None).await.expect("read");
                stream.write_all(&buf, None).await.expect("echo");
                buf
            });

            let client = TcpStream::connect(addr, Some(Duration::from_secs(5)))
                .await
                .expect("connect");
            client.write_all(b"hello", None).await.expect("write");
            let mut echoed = [0_u8; 5];
            client.read_exact(&mut echoed, None).await.expect("read");
            assert_eq!(&echoed, b"hello");

            let seen = server.await;
            assert_eq!(&seen, b"hello");
        });
    }

    #[test]
    fn read_returns_zero_on_peer_close() {
        init_test_logging();
        crate::block_on(async {
            let listener = bind_local();
            let addr = listener.local_addr().expect("local addr");

            let server = crate::spawn(async move {
                let (stream, _peer) = listener.accept().await.expect("accept");
                drop(stream);
            });

            let client = TcpStream::connect(addr, Some(Duration::from_secs(5)))
                .await
                .expect("connect");
            server.await;

            let mut buf = [0_u8; 8];
            let n = client
                .read(&mut buf, Some(Duration::from_secs(5)))
                .await
                .expect("read");
            assert_eq!(n, 0);
        });
    }

    #[test]
    fn read_timeout_sets_timed_out_errno() {
        init_test_logging();
        crate::block_on(async {
            let listener = bind_local();
            let addr = listener.local_addr().expect("local addr");

            let server = crate::spawn(async move {
                let (stream, _peer) = listener.accept().await.expect("accept");
                // Hold the connection open without writing.
                crate::sleep(Duration::from_millis(500)).await;
                drop(stream);
            });

            let client = TcpStream::connect(addr, Some(Duration::from_secs(5)))
                .await
                .expect("connect");
            let mut buf = [0_u8; 8];
            let err = client
                .read(&mut buf, Some(Duration::from_millis(50)))
                .await
                .expect_err("must time out");
            assert_eq!(err.kind(), io::ErrorKind::TimedOut);
            assert_eq!(err.raw_os_error(), Some(libc::ETIMEDOUT));
            server.await;
        });
    }

    #[test]
    fn close_cancels_pending_read() {
        init_test_logging();
        crate::block_on(async {
            let listener = bind_local();
            let addr = listener.local_addr().expect("local addr");

            let server = crate::spawn(async move {
                let (stream, _peer) = listener.accept().await.expect("accept");
                crate::sleep(Duration::from_millis(300)).await;
                drop(stream);
            });

            let client = std::sync::Arc::new(
                TcpStream::connect(addr, Some(Duration::from_secs(5)))
                    .await
                    .expect("connect"),
            );

            let reader = {
                let client = std::sync::Arc::clone(&client);
                crate::spawn(async move {
                    let mut buf = [0_u8; 8];
                    client.read(&mut buf, None).await
                })
            };

            crate::sleep(Duration::from_millis(50)).await;
            client.close();

            let err = reader.await.expect_err("read must be cancelled");
            assert_eq!(err.raw_os_error(), Some(libc::EBADF));
            server.await;
        });
    }
}
