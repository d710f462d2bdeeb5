use crate::socket::Socket;
use crate::support::{NetworkError, NetworkResult};
use hashbrown::HashMap;
use indexmap::IndexSet;
use slog::{debug, trace, warn, Logger};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

const LISTENER_TOKEN: mio::Token = mio::Token(0);
// Content bytes of one line, \r\n excluded.
const MAX_LINE_CONTENT: usize = 510;

/// Identifies one live connection. Ids are monotonically increasing and
/// never reused, so a stale id simply fails the socket-map lookup.
pub type ConnectionId = usize;

/// Connectivity and traffic changes observed by the reactor, drained by
/// the layer above in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened(ConnectionId),
    Line(ConnectionId, String),
    Closed(ConnectionId),
}

struct Outbound {
    conn: ConnectionId,
    data: Vec<u8>,
    retries: u32,
}

enum SendFault {
    Retry(&'static str),
    Dead,
}

/// Owns every socket and multiplexes them on one thread. Each
/// [`Reactor::run_once`] tick polls readiness with a zero timeout, drains
/// the outbound queue toward writable sockets and fans newly-read lines
/// into the inbound queue.
pub struct Reactor {
    poll: mio::Poll,
    events: mio::Events,
    listener: Option<Socket>,
    sockets: HashMap<ConnectionId, Socket>,
    next_conn: ConnectionId,
    inbound: VecDeque<SocketEvent>,
    outbound: VecDeque<Outbound>,
    max_retries: u32,
    log: Logger,
}

impl Reactor {
    /// Builds a reactor in server mode, bound and listening.
    pub fn bind(addr: &SocketAddr, max_retries: u32, log: Logger) -> NetworkResult<Reactor> {
        let poll = mio::Poll::new()?;
        let listener = Socket::listen(addr)?;
        listener.register(&poll, LISTENER_TOKEN)?;

        debug!(log, "listener bound"; "context" => "bind", "addr" => %addr);

        Ok(Reactor {
            poll,
            events: mio::Events::with_capacity(1024),
            listener: Some(listener),
            sockets: HashMap::new(),
            next_conn: 1,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            max_retries,
            log,
        })
    }

    /// Builds a reactor in client mode: no listener, connections are made
    /// with [`Reactor::connect`] only.
    pub fn client(max_retries: u32, log: Logger) -> NetworkResult<Reactor> {
        let poll = mio::Poll::new()?;

        Ok(Reactor {
            poll,
            events: mio::Events::with_capacity(1024),
            listener: None,
            sockets: HashMap::new(),
            next_conn: 1,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            max_retries,
            log,
        })
    }

    /// Starts an outbound connection and registers it.
    pub fn connect(&mut self, addr: &SocketAddr) -> NetworkResult<ConnectionId> {
        let socket = Socket::connect(addr)?;
        let conn = self.next_conn;
        self.next_conn += 1;

        socket.register(&self.poll, mio::Token(conn))?;
        self.sockets.insert(conn, socket);

        debug!(self.log, "outbound connection started";
               "context" => "connect", "conn" => conn, "addr" => %addr);

        Ok(conn)
    }

    /// Queues one line for delivery. The `\r\n` terminator is appended
    /// here so every emitted line carries it.
    pub fn push_outbound(&mut self, conn: ConnectionId, line: &str) {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");

        self.outbound.push_back(Outbound {
            conn,
            data,
            retries: 0,
        });
    }

    /// Pops the next inbound event, if any.
    pub fn pop_inbound(&mut self) -> Option<SocketEvent> {
        self.inbound.pop_front()
    }

    /// The peer address of a live connection.
    pub fn peer_addr(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.sockets.get(&conn).and_then(Socket::peer_addr)
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(Socket::local_addr)
    }

    pub fn is_open(&self, conn: ConnectionId) -> bool {
        self.sockets.contains_key(&conn)
    }

    /// Closes a connection without signaling an inbound event. Used when
    /// the layer above initiated the disconnect itself.
    pub fn close(&mut self, conn: ConnectionId) {
        if let Some(mut socket) = self.sockets.remove(&conn) {
            drop(socket.deregister(&self.poll));
            socket.close();
            debug!(self.log, "connection closed"; "context" => "close", "conn" => conn);
        }
    }

    /// One non-blocking tick: poll readiness with a zero timeout, drain
    /// the outbound queue, then accept and read everything ready. Only a
    /// poll failure or a listener fault is returned as an error.
    pub fn run_once(&mut self) -> NetworkResult<()> {
        self.poll
            .poll(&mut self.events, Some(Duration::from_millis(0)))?;

        let mut accept_ready = false;
        let mut readable: IndexSet<ConnectionId> = IndexSet::new();
        let mut writable: IndexSet<ConnectionId> = IndexSet::new();

        for event in &self.events {
            let token = event.token();
            let readiness = event.readiness();
            if token == LISTENER_TOKEN {
                accept_ready |= readiness.is_readable();
                continue;
            }
            let mio::Token(conn) = token;
            if readiness.is_readable() {
                readable.insert(conn);
            }
            if readiness.is_writable() {
                writable.insert(conn);
            }
        }

        self.drain_outbound(&writable);

        if accept_ready {
            self.accept_pending()?;
        }
        for conn in readable {
            self.read_socket(conn);
        }

        Ok(())
    }

    /// Sends every queued message whose socket is ready. Transient
    /// failures re-queue the message at the tail until the retry budget is
    /// spent; closed or broken sockets are deleted.
    fn drain_outbound(&mut self, writable: &IndexSet<ConnectionId>) {
        for _ in 0..self.outbound.len() {
            let mut message = match self.outbound.pop_front() {
                Some(message) => message,
                None => break,
            };

            match self.send_message(&mut message, writable) {
                Ok(()) => {
                    trace!(self.log, "line sent";
                           "context" => "send", "conn" => message.conn);
                }
                Err(SendFault::Retry(reason)) => {
                    if message.retries < self.max_retries {
                        message.retries += 1;
                        self.outbound.push_back(message);
                    } else {
                        warn!(self.log, "dropping outbound line";
                              "context" => "send",
                              "conn" => message.conn,
                              "retries" => message.retries,
                              "reason" => reason);
                    }
                }
                Err(SendFault::Dead) => {
                    self.delete_socket(message.conn);
                }
            }
        }
    }

    fn send_message(
        &mut self,
        message: &mut Outbound,
        writable: &IndexSet<ConnectionId>,
    ) -> Result<(), SendFault> {
        // A handle that no longer matches a live socket is invalid.
        let socket = match self.sockets.get_mut(&message.conn) {
            Some(socket) => socket,
            None => return Err(SendFault::Retry("unknown socket")),
        };

        if !writable.contains(&message.conn) {
            return Err(SendFault::Retry("socket not ready for writing"));
        }

        match socket.send(&message.data) {
            Ok(count) if count == message.data.len() => Ok(()),
            Ok(count) => {
                // Keep the unsent tail for the next round.
                message.data.drain(..count);
                Err(SendFault::Retry("partial write"))
            }
            Err(NetworkError::Wait) => Err(SendFault::Retry("would block")),
            Err(_) => Err(SendFault::Dead),
        }
    }

    /// Accepts every pending connection off the listener. Aborted
    /// handshakes are skipped; anything else on the listener is fatal.
    fn accept_pending(&mut self) -> NetworkResult<()> {
        loop {
            let listener = match self.listener.as_mut() {
                Some(listener) => listener,
                None => return Ok(()),
            };

            match listener.accept() {
                Ok(socket) => {
                    let conn = self.next_conn;
                    self.next_conn += 1;

                    if let Err(err) = socket.register(&self.poll, mio::Token(conn)) {
                        warn!(self.log, "could not register accepted connection";
                              "context" => "accept", "conn" => conn, "error" => ?err);
                        continue;
                    }

                    debug!(self.log, "connection accepted";
                           "context" => "accept",
                           "conn" => conn,
                           "peer" => ?socket.peer_addr());

                    self.sockets.insert(conn, socket);
                    self.inbound.push_back(SocketEvent::Opened(conn));
                }
                Err(NetworkError::Wait) => return Ok(()),
                Err(NetworkError::Closed) => {
                    warn!(self.log, "pending connection aborted"; "context" => "accept");
                }
                Err(err) => {
                    // Listener faults kill the process loop.
                    return Err(err);
                }
            }
        }
    }

    /// Reads a ready socket until it would block, framing complete lines
    /// into the inbound queue.
    fn read_socket(&mut self, conn: ConnectionId) {
        let mut dead = false;

        {
            let socket = match self.sockets.get_mut(&conn) {
                Some(socket) => socket,
                None => return,
            };

            loop {
                match socket.recv() {
                    Ok(_) => {
                        while let Some(line) = socket.next_line() {
                            let line = clamp_line(line, &self.log, conn);
                            self.inbound.push_back(SocketEvent::Line(conn, line));
                        }
                    }
                    Err(NetworkError::Wait) => break,
                    Err(err) => {
                        debug!(self.log, "read failed";
                               "context" => "recv", "conn" => conn, "error" => ?err);
                        dead = true;
                        break;
                    }
                }
            }
        }

        if dead {
            self.delete_socket(conn);
        }
    }

    /// Removes a socket and signals the disconnect upward.
    fn delete_socket(&mut self, conn: ConnectionId) {
        if let Some(mut socket) = self.sockets.remove(&conn) {
            drop(socket.deregister(&self.poll));
            socket.close();
            self.inbound.push_back(SocketEvent::Closed(conn));
            debug!(self.log, "socket deleted"; "context" => "delete", "conn" => conn);
        }
    }
}

/// Truncates an overlong inbound line to the wire limit.
fn clamp_line(line: String, log: &Logger, conn: ConnectionId) -> String {
    if line.len() <= MAX_LINE_CONTENT {
        return line;
    }

    let mut end = MAX_LINE_CONTENT;
    while !line.is_char_boundary(end) {
        end -= 1;
    }

    warn!(log, "truncating overlong line";
          "context" => "recv", "conn" => conn, "length" => line.len());

    let mut line = line;
    line.truncate(end);
    line
}
