//! The outer loop: one reactor tick, then parse and dispatch every
//! inbound line, then flush per-client queues back into the reactor.

use crate::client::{Client, Uuid};
use crate::config::IrcConfig;
use crate::handlers::State;
use crate::message::Message;
use hashbrown::HashMap;
use ircwire::parse;
use ircwire::Numeric;
use ironnet::{ConnectionId, NetworkResult, Reactor, SocketEvent};
use slog::{debug, info, o, warn, Logger};
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

pub struct Server {
    config: IrcConfig,
    reactor: Reactor,
    state: State,
    conns: HashMap<ConnectionId, Uuid>,
    log: Logger,
}

impl Server {
    /// Binds the listener and dials every configured peer link.
    pub fn new(config: IrcConfig, log: Logger) -> NetworkResult<Server> {
        let addr: SocketAddr = format!(
            "{}:{}",
            config.server.listen_address, config.server.listen_port
        )
        .parse()?;

        info!(log, "starting";
              "server_name" => &config.server.server_name,
              "addr" => %addr,
              "backlog" => config.server.backlog);

        let reactor = Reactor::bind(
            &addr,
            config.server.max_retries,
            log.new(o!("layer" => "reactor")),
        )?;

        let state = State::new(config.server.server_name.clone(), log.new(o!("layer" => "state")));

        let mut server = Server {
            config,
            reactor,
            state,
            conns: HashMap::new(),
            log,
        };
        server.connect_peers();
        Ok(server)
    }

    /// Dials the configured peer servers and queues the link handshake on
    /// each. A link that cannot be dialed is logged and skipped.
    fn connect_peers(&mut self) {
        let links = self.config.peer_links.clone();
        let server_name = self.config.server.server_name.clone();

        for link in links {
            let addr: SocketAddr = match format!("{}:{}", link.host, link.port).parse() {
                Ok(addr) => addr,
                Err(_) => {
                    warn!(self.log, "bad peer link address"; "host" => &link.host);
                    continue;
                }
            };

            let conn = match self.reactor.connect(&addr) {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(self.log, "could not dial peer";
                          "host" => &link.host, "error" => ?err);
                    continue;
                }
            };

            let uuid = self.state.uuids.generate();
            let mut client = Client::new(uuid, Some(conn), link.host.clone());
            client.push(format!("PASS {}", link.password));
            client.push(format!("SERVER {} 1 :{}", server_name, server_name));

            if let Err(err) = self.state.clients.add_client(client) {
                warn!(self.log, "could not track peer link"; "error" => %err);
                self.reactor.close(conn);
                continue;
            }
            self.conns.insert(conn, uuid);

            info!(self.log, "peer link started"; "host" => &link.host, "uuid" => %uuid);
        }
    }

    /// One tick: poll the reactor, apply every inbound event, flush.
    pub fn run_once(&mut self) -> NetworkResult<()> {
        self.reactor.run_once()?;

        while let Some(event) = self.reactor.pop_inbound() {
            match event {
                SocketEvent::Opened(conn) => self.accept_connection(conn),
                SocketEvent::Closed(conn) => self.connection_closed(conn),
                SocketEvent::Line(conn, line) => self.handle_line(conn, line),
            }
        }

        self.flush();
        Ok(())
    }

    /// Drives [`Server::run_once`] until a fatal error surfaces.
    pub fn run(&mut self) -> NetworkResult<()> {
        let tick = Duration::from_millis(self.config.tick.tick_ms);
        loop {
            self.run_once()?;
            thread::sleep(tick);
        }
    }

    fn accept_connection(&mut self, conn: ConnectionId) {
        let uuid = self.state.uuids.generate();
        let hostname = self
            .reactor
            .peer_addr(conn)
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if let Err(err) = self
            .state
            .clients
            .add_client(Client::new(uuid, Some(conn), hostname))
        {
            warn!(self.log, "could not track connection"; "conn" => conn, "error" => %err);
            self.reactor.close(conn);
            return;
        }
        self.conns.insert(conn, uuid);

        debug!(self.log, "client connected"; "conn" => conn, "uuid" => %uuid);
    }

    fn connection_closed(&mut self, conn: ConnectionId) {
        if let Some(uuid) = self.conns.remove(&conn) {
            self.state.drop_client(uuid, "connection closed");
        }
    }

    fn handle_line(&mut self, conn: ConnectionId, line: String) {
        if line.is_empty() {
            return;
        }
        let uuid = match self.conns.get(&conn) {
            Some(&uuid) => uuid,
            None => return,
        };

        match parse::parse_message(&line) {
            Ok(raw) => self.state.dispatch(Message::new(uuid, raw)),
            Err(err) => {
                debug!(self.log, "unparseable line";
                       "conn" => conn, "error" => %err, "line" => &line);
                let token: String = line
                    .split(' ')
                    .next()
                    .unwrap_or("")
                    .chars()
                    .take(32)
                    .collect();
                let reply = format!(
                    ":{} {} * {} :Unknown command",
                    self.config.server.server_name,
                    Numeric::ErrUnknownCommand,
                    token
                );
                self.state.clients.push_to(uuid, reply);
            }
        }
    }

    /// Disconnects slow consumers, merges every per-client queue into the
    /// reactor's outbound queue, then closes connections the handlers
    /// asked to drop.
    fn flush(&mut self) {
        let overflowed: Vec<Uuid> = self
            .state
            .clients
            .iter()
            .filter(|client| client.overflowed())
            .map(Client::uuid)
            .collect();
        for uuid in overflowed {
            warn!(self.log, "disconnecting slow consumer"; "uuid" => %uuid);
            self.state.drop_client(uuid, "slow consumer");
        }

        for client in self.state.clients.iter_mut() {
            if let Some(conn) = client.conn() {
                for line in client.drain_outbound() {
                    self.reactor.push_outbound(conn, &line);
                }
            }
        }

        for conn in self.state.take_closed_conns() {
            self.conns.remove(&conn);
            self.reactor.close(conn);
        }
    }
}
