use crate::buffer::Buffer;
use crate::support::{ErrorType, NetworkError, NetworkResult};
use mio::net::{TcpListener, TcpStream};
use std::io::Write;
use std::net::{Shutdown, SocketAddr};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SocketKind {
    Listener,
    Stream,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SocketState {
    Connected,
    Disconnected,
}

enum Inner {
    Listener(TcpListener),
    Stream(TcpStream),
}

/// One owned, non-blocking TCP endpoint. A listener accepts; a stream
/// receives framed lines and sends raw bytes. The descriptor is owned
/// exclusively and closed on drop.
pub struct Socket {
    inner: Inner,
    state: SocketState,
    peer: Option<SocketAddr>,
    read_buffer: Buffer,
}

impl Socket {
    /// Binds a listening socket on the supplied address.
    pub fn listen(addr: &SocketAddr) -> NetworkResult<Socket> {
        let listener = TcpListener::bind(addr)?;

        Ok(Socket {
            inner: Inner::Listener(listener),
            state: SocketState::Connected,
            peer: None,
            read_buffer: Buffer::new(),
        })
    }

    /// Starts a non-blocking outbound connection. The stream becomes
    /// writable once the connect completes.
    pub fn connect(addr: &SocketAddr) -> NetworkResult<Socket> {
        let stream = TcpStream::connect(addr)?;

        Ok(Socket {
            inner: Inner::Stream(stream),
            state: SocketState::Connected,
            peer: Some(*addr),
            read_buffer: Buffer::new(),
        })
    }

    /// Accepts one pending connection off this listener.
    pub fn accept(&mut self) -> NetworkResult<Socket> {
        let listener = match self.inner {
            Inner::Listener(ref listener) => listener,
            Inner::Stream(_) => return Err(NetworkError::Fatal(ErrorType::InvalidSocket)),
        };

        let (stream, peer) = listener.accept()?;

        Ok(Socket {
            inner: Inner::Stream(stream),
            state: SocketState::Connected,
            peer: Some(peer),
            read_buffer: Buffer::new(),
        })
    }

    /// Reads one available chunk into the receive buffer. `Wait` when no
    /// data is pending, `Closed` when the peer has gone.
    pub fn recv(&mut self) -> NetworkResult<usize> {
        let result = match self.inner {
            Inner::Stream(ref mut stream) => self.read_buffer.ingress(stream),
            Inner::Listener(_) => return Err(NetworkError::Fatal(ErrorType::InvalidSocket)),
        };

        match result {
            Ok(count) => Ok(count),
            Err(err) => {
                let err = NetworkError::from(err);
                if err != NetworkError::Wait {
                    self.state = SocketState::Disconnected;
                }
                Err(err)
            }
        }
    }

    /// Pops the next complete line received on this socket.
    pub fn next_line(&mut self) -> Option<String> {
        self.read_buffer.next_line()
    }

    /// Writes as much of `data` as the kernel accepts, returning the byte
    /// count. A zero-length write is treated as a closed peer.
    pub fn send(&mut self, data: &[u8]) -> NetworkResult<usize> {
        let stream = match self.inner {
            Inner::Stream(ref mut stream) => stream,
            Inner::Listener(_) => return Err(NetworkError::Fatal(ErrorType::InvalidSocket)),
        };

        match stream.write(data) {
            Ok(0) => {
                self.state = SocketState::Disconnected;
                Err(NetworkError::Closed)
            }
            Ok(count) => Ok(count),
            Err(err) => {
                let err = NetworkError::from(err);
                if err != NetworkError::Wait {
                    self.state = SocketState::Disconnected;
                }
                Err(err)
            }
        }
    }

    /// Shuts the socket down. Errors are ignored, the peer may already be
    /// gone.
    pub fn close(&mut self) {
        if let Inner::Stream(ref stream) = self.inner {
            drop(stream.shutdown(Shutdown::Both));
        }
        self.state = SocketState::Disconnected;
    }

    /// Registers this socket on the supplied poll. Streams register for
    /// both directions, the listener for accept readiness only.
    pub fn register(&self, poll: &mio::Poll, token: mio::Token) -> NetworkResult<()> {
        match self.inner {
            Inner::Listener(ref listener) => poll
                .register(listener, token, mio::Ready::readable(), mio::PollOpt::level())
                .map_err(Into::into),
            Inner::Stream(ref stream) => poll
                .register(
                    stream,
                    token,
                    mio::Ready::readable() | mio::Ready::writable(),
                    mio::PollOpt::level(),
                )
                .map_err(Into::into),
        }
    }

    pub fn deregister(&self, poll: &mio::Poll) -> NetworkResult<()> {
        match self.inner {
            Inner::Listener(ref listener) => poll.deregister(listener).map_err(Into::into),
            Inner::Stream(ref stream) => poll.deregister(stream).map_err(Into::into),
        }
    }

    pub fn kind(&self) -> SocketKind {
        match self.inner {
            Inner::Listener(_) => SocketKind::Listener,
            Inner::Stream(_) => SocketKind::Stream,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.inner {
            Inner::Listener(ref listener) => listener.local_addr().ok(),
            Inner::Stream(ref stream) => stream.local_addr().ok(),
        }
    }
}
