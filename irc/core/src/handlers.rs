//! Command dispatch and one handler per IRC command. Handlers mutate the
//! databases and enqueue outbound lines; they never touch a socket.

use crate::client::{Client, ClientKind, ClientState, ServerInfo, Uuid, UserInfo, UuidSource};
use crate::database::{ChannelDatabase, ClientDatabase};
use crate::channel::{ChannelKind, ChannelModes};
use crate::message::Message;
use ircwire::casefold::FoldedName;
use ircwire::parse;
use ircwire::Numeric;
use ircwire::MAX_CHANNEL_NAME_LEN;
use ironnet::ConnectionId;
use slog::{debug, info, trace, warn, Logger};

/// The whole chat state of this server: every connected peer, every
/// channel, and the dispatcher that applies commands to them.
pub struct State {
    pub server_name: String,
    pub clients: ClientDatabase,
    pub channels: ChannelDatabase,
    pub uuids: UuidSource,
    closed_conns: Vec<ConnectionId>,
    log: Logger,
}

/// Commands an unregistered connection may issue. PING is included so a
/// peer probing the link before registering gets its PONG.
fn pre_registration_command(command: &str) -> bool {
    matches!(
        command,
        "PASS" | "NICK" | "USER" | "SERVER" | "PING" | "PONG"
    )
}

/// Formats and enqueues one numeric reply.
fn reply(
    clients: &mut ClientDatabase,
    server_name: &str,
    target: Uuid,
    numeric: Numeric,
    params: &[&str],
    trailing: &str,
) {
    let nickname = clients
        .get_client(target)
        .and_then(|client| client.nickname().map(str::to_string))
        .unwrap_or_else(|| "*".to_string());

    let mut line = format!(":{} {} {}", server_name, numeric, nickname);
    for param in params {
        line.push(' ');
        line.push_str(param);
    }
    line.push_str(" :");
    line.push_str(trailing);

    clients.push_to(target, line);
}

impl State {
    pub fn new(server_name: String, log: Logger) -> State {
        State {
            server_name,
            clients: ClientDatabase::new(),
            channels: ChannelDatabase::new(),
            uuids: UuidSource::new(),
            closed_conns: Vec::new(),
            log,
        }
    }

    /// Connections whose sockets should be closed by the owner of the
    /// reactor, accumulated since the last call.
    pub fn take_closed_conns(&mut self) -> Vec<ConnectionId> {
        std::mem::take(&mut self.closed_conns)
    }

    /// Applies one parsed message. Unknown senders are dropped silently,
    /// they disconnected between parse and dispatch.
    pub fn dispatch(&mut self, message: Message) {
        let command = message.command().to_uppercase();

        let sender_state = match self.clients.get_client(message.uuid) {
            Some(client) => client.state(),
            None => return,
        };

        if sender_state == ClientState::UnRegistered && !pre_registration_command(&command) {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrNotRegistered,
                &[],
                "You have not registered",
            );
            return;
        }

        trace!(self.log, "dispatching command";
               "command" => &command, "uuid" => %message.uuid);

        match command.as_str() {
            "PASS" => self.cmd_pass(&message),
            "NICK" => self.cmd_nick(&message),
            "USER" => self.cmd_user(&message),
            "SERVER" => self.cmd_server(&message),
            "JOIN" => self.cmd_join(&message),
            "PART" => self.cmd_part(&message),
            "TOPIC" => self.cmd_topic(&message),
            "PRIVMSG" => self.cmd_privmsg(&message, true),
            "NOTICE" => self.cmd_privmsg(&message, false),
            "PING" => self.cmd_ping(&message),
            "PONG" => self.cmd_pong(&message),
            "QUIT" => self.cmd_quit(&message),
            "KILL" => self.cmd_kill(&message),
            _ => reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrUnknownCommand,
                &[&command],
                "Unknown command",
            ),
        }
    }

    /// Removes a client everywhere: databases, channel memberships, and
    /// the connection it owned. Members of its channels see a QUIT.
    pub fn drop_client(&mut self, uuid: Uuid, reason: &str) {
        let client = match self.clients.disconnect_client(uuid) {
            Some(client) => client,
            None => return,
        };
        if let Some(conn) = client.conn() {
            self.closed_conns.push(conn);
        }

        if let Some(user) = client.user() {
            let line = format!(":{} QUIT :{}", user.nickname, reason);
            let State {
                clients, channels, ..
            } = self;

            for name in &user.channels {
                let name = name.as_str();
                let now_empty = match channels.get_channel_mut(name) {
                    Some(channel) => {
                        channel.remove_user(uuid);
                        channel.push_to_local(clients, &line, None);
                        channel.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    channels.destroy_channel(name);
                }
            }

            clients.broadcast_to_local_servers(&line, None);
        }

        debug!(self.log, "client dropped"; "uuid" => %uuid, "reason" => reason);
    }

    /// For a command relayed by a server link, the acting user comes from
    /// the message prefix.
    fn resolve_actor(&mut self, message: &Message) -> Option<Uuid> {
        let sender_is_server = self
            .clients
            .get_client(message.uuid)
            .map_or(false, Client::is_server);
        if !sender_is_server {
            return Some(message.uuid);
        }

        let nickname = match message.prefix_name() {
            Some(nickname) => nickname.to_string(),
            None => {
                reply(
                    &mut self.clients,
                    &self.server_name,
                    message.uuid,
                    Numeric::ErrNoNicknameGiven,
                    &[],
                    "No nickname given",
                );
                return None;
            }
        };

        match self.clients.get_user(&nickname) {
            Some(user) => Some(user.uuid()),
            None => {
                reply(
                    &mut self.clients,
                    &self.server_name,
                    message.uuid,
                    Numeric::ErrNoSuchNick,
                    &[&nickname],
                    "No such nick",
                );
                None
            }
        }
    }

    fn sender_is_server(&self, message: &Message) -> bool {
        self.clients
            .get_client(message.uuid)
            .map_or(false, Client::is_server)
    }

    fn nickname_of(&self, uuid: Uuid) -> Option<String> {
        self.clients
            .get_client(uuid)
            .and_then(|client| client.nickname().map(str::to_string))
    }

    fn need_more_params(&mut self, uuid: Uuid, command: &str) {
        reply(
            &mut self.clients,
            &self.server_name,
            uuid,
            Numeric::ErrNeedMoreParams,
            &[command],
            "Not enough parameters",
        );
    }

    fn cmd_pass(&mut self, message: &Message) {
        if message.params().is_empty() {
            self.need_more_params(message.uuid, "PASS");
            return;
        }

        let registered = self
            .clients
            .get_client(message.uuid)
            .map(Client::state)
            == Some(ClientState::Registered);
        if registered {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrAlreadyRegistred,
                &[],
                "You may not reregister",
            );
            return;
        }

        if let Some(registration) = self
            .clients
            .get_client_mut(message.uuid)
            .and_then(Client::registration_mut)
        {
            registration.password = Some(message.params()[0].clone());
        }
    }

    fn cmd_nick(&mut self, message: &Message) {
        if message.params().is_empty() {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrNoNicknameGiven,
                &[],
                "No nickname given",
            );
            return;
        }
        let nickname = message.params()[0].clone();

        // A linked server announcing a nickname introduces a remote user.
        if self.sender_is_server(message) {
            self.introduce_remote_user(message, &nickname);
            return;
        }

        if !parse::is_valid_nickname(&nickname) {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrErroneusNickname,
                &[&nickname],
                "Erroneous nickname",
            );
            return;
        }

        if let Some(existing) = self.clients.get_client_by_nick(&nickname) {
            if existing.uuid() != message.uuid {
                reply(
                    &mut self.clients,
                    &self.server_name,
                    message.uuid,
                    Numeric::ErrNicknameInUse,
                    &[&nickname],
                    "Nickname is already in use",
                );
                return;
            }
        }

        let registered = self
            .clients
            .get_client(message.uuid)
            .map(Client::state)
            == Some(ClientState::Registered);

        if registered {
            let old = match self.nickname_of(message.uuid) {
                Some(old) => old,
                None => return,
            };
            if self.clients.rename_user(message.uuid, &nickname).is_ok() {
                let line = format!(":{} NICK {}", old, nickname);
                self.clients.push_to(message.uuid, line.clone());
                self.clients.broadcast_to_local_servers(&line, None);
            }
        } else {
            if let Some(registration) = self
                .clients
                .get_client_mut(message.uuid)
                .and_then(Client::registration_mut)
            {
                registration.nickname = Some(nickname);
            }
            self.try_complete_registration(message.uuid);
        }
    }

    fn introduce_remote_user(&mut self, message: &Message, nickname: &str) {
        if self.clients.get_client_by_nick(nickname).is_some() {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrNicknameInUse,
                &[nickname],
                "Nickname is already in use",
            );
            return;
        }

        let hostname = self
            .clients
            .get_client(message.uuid)
            .and_then(Client::server_name)
            .unwrap_or("remote")
            .to_string();
        let uuid = self.uuids.generate();
        let info = UserInfo::new(
            nickname.to_string(),
            nickname.to_string(),
            String::new(),
            hostname,
        );

        match self
            .clients
            .add_remote_user(Client::remote_user(uuid, info, message.uuid))
        {
            Ok(()) => {
                debug!(self.log, "remote user introduced";
                       "nickname" => nickname, "uuid" => %uuid);
            }
            Err(err) => {
                warn!(self.log, "could not add remote user";
                      "nickname" => nickname, "error" => %err);
            }
        }
    }

    fn cmd_user(&mut self, message: &Message) {
        let params = message.params();
        let realname = message
            .trailing()
            .map(str::to_string)
            .or_else(|| params.get(3).cloned());

        if params.len() < 3 || realname.is_none() {
            self.need_more_params(message.uuid, "USER");
            return;
        }

        let registered = self
            .clients
            .get_client(message.uuid)
            .map(Client::state)
            == Some(ClientState::Registered);
        if registered {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrAlreadyRegistred,
                &[],
                "You may not reregister",
            );
            return;
        }

        if let Some(registration) = self
            .clients
            .get_client_mut(message.uuid)
            .and_then(Client::registration_mut)
        {
            registration.username = Some(params[0].clone());
            registration.realname = realname;
        }
        self.try_complete_registration(message.uuid);
    }

    /// Completes user registration once both NICK and USER have arrived.
    fn try_complete_registration(&mut self, uuid: Uuid) {
        let complete = match self.clients.get_client(uuid).map(Client::kind) {
            Some(ClientKind::Unknown(registration)) => {
                registration.nickname.is_some()
                    && registration.username.is_some()
                    && registration.realname.is_some()
            }
            _ => false,
        };
        if !complete {
            return;
        }

        match self.clients.register_local_user(uuid) {
            Ok(()) => {
                let canonical = match self.clients.get_client(uuid).and_then(Client::user) {
                    Some(user) => {
                        format!("{}!{}@{}", user.nickname, user.username, user.hostname)
                    }
                    None => return,
                };
                let welcome =
                    format!("Welcome to the Internet Relay Network {}", canonical);
                reply(
                    &mut self.clients,
                    &self.server_name,
                    uuid,
                    Numeric::RplWelcome,
                    &[],
                    &welcome,
                );
                info!(self.log, "user registered"; "uuid" => %uuid);
            }
            Err(err) => {
                debug!(self.log, "registration failed"; "uuid" => %uuid, "error" => %err);
                reply(
                    &mut self.clients,
                    &self.server_name,
                    uuid,
                    Numeric::ErrNicknameInUse,
                    &[],
                    "Nickname is already in use",
                );
            }
        }
    }

    fn cmd_server(&mut self, message: &Message) {
        let params = message.params();
        if params.len() < 2 {
            self.need_more_params(message.uuid, "SERVER");
            return;
        }

        let (sender_registered, sender_is_user) = match self.clients.get_client(message.uuid) {
            Some(client) => (
                client.state() == ClientState::Registered,
                client.user().is_some(),
            ),
            None => return,
        };

        if sender_registered && sender_is_user {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrAlreadyRegistred,
                &[],
                "You may not reregister",
            );
            return;
        }

        let name = params[0].clone();
        let hop_count: u32 = params[1].parse().unwrap_or(1);

        // Split-server conflict policy: a duplicate name drops the link.
        if self.clients.get_server_by_name(&name).is_some() {
            debug!(self.log, "duplicate server name"; "name" => &name);
            self.drop_client(message.uuid, "duplicate server name");
            return;
        }

        if !sender_registered {
            match self
                .clients
                .register_local_server(&name, hop_count, message.uuid)
            {
                Ok(()) => {
                    info!(self.log, "server linked"; "name" => &name, "uuid" => %message.uuid);
                }
                Err(err) => {
                    warn!(self.log, "server registration failed";
                          "name" => &name, "error" => %err);
                    self.drop_client(message.uuid, "server registration failed");
                }
            }
            return;
        }

        // A linked server introduces a server further away. The prefix
        // names the introducer.
        let introducer_name = match message.prefix_name() {
            Some(introducer) => introducer.to_string(),
            None => {
                warn!(self.log, "remote server without introducer"; "name" => &name);
                self.clients.push_to(
                    message.uuid,
                    format!("ERROR :No introducer given for {}", name),
                );
                return;
            }
        };
        let introducer_uuid = match self.clients.get_server_by_name(&introducer_name) {
            Some(introducer) => introducer.uuid(),
            None => {
                warn!(self.log, "unknown introducing server";
                      "name" => &name, "introducer" => &introducer_name);
                self.clients.push_to(
                    message.uuid,
                    format!("ERROR :Unknown introducing server {}", introducer_name),
                );
                return;
            }
        };

        let uuid = self.uuids.generate();
        let info = ServerInfo {
            name: name.clone(),
            hop_count,
            introducer: Some(introducer_uuid),
        };
        match self
            .clients
            .add_server(Client::remote_server(uuid, info, message.uuid))
        {
            Ok(()) => {
                info!(self.log, "remote server added";
                      "name" => &name, "introducer" => &introducer_name);
            }
            Err(err) => {
                warn!(self.log, "could not add remote server";
                      "name" => &name, "error" => %err);
            }
        }
    }

    fn cmd_join(&mut self, message: &Message) {
        if message.params().is_empty() {
            self.need_more_params(message.uuid, "JOIN");
            return;
        }

        let actor = match self.resolve_actor(message) {
            Some(actor) => actor,
            None => return,
        };
        let nickname = match self.nickname_of(actor) {
            Some(nickname) => nickname,
            None => return,
        };

        let names: Vec<String> = message.params()[0].split(',').map(str::to_string).collect();
        let keys: Vec<String> = message
            .params()
            .get(1)
            .map(|keys| keys.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        for (index, name) in names.iter().enumerate() {
            let key = keys.get(index).cloned().unwrap_or_default();
            self.join_one(actor, &nickname, name, &key);
        }
        // TODO: forward JOIN to peer servers so remote membership converges.
    }

    fn join_one(&mut self, actor: Uuid, nickname: &str, name: &str, key: &str) {
        let State {
            clients,
            channels,
            server_name,
            ..
        } = self;

        if !name.starts_with('#') || name.len() >= MAX_CHANNEL_NAME_LEN {
            reply(
                clients,
                server_name,
                actor,
                Numeric::ErrNoSuchChannel,
                &[name],
                "No such channel",
            );
            return;
        }

        let channel = channels.create_channel(name, key, ChannelKind::Local, ChannelModes::NONE);

        if channel.key() != key {
            reply(
                clients,
                server_name,
                actor,
                Numeric::ErrBadChannelKey,
                &[name],
                "Cannot join channel (+k)",
            );
            return;
        }

        let join_line = format!(":{} JOIN {}", nickname, channel.name());
        channel.push_to_local(clients, &join_line, None);
        clients.push_to(actor, join_line);
        channel.add_user(actor);
        if let Some(user) = clients.get_client_mut(actor).and_then(Client::user_mut) {
            user.channels.insert(FoldedName::new(name));
        }

        reply(
            clients,
            server_name,
            actor,
            Numeric::RplTopic,
            &[channel.name()],
            channel.topic(),
        );
        let list = channel.user_list_as_string(clients);
        reply(
            clients,
            server_name,
            actor,
            Numeric::RplNamReply,
            &["=", channel.name()],
            &list,
        );
    }

    fn cmd_part(&mut self, message: &Message) {
        if message.params().is_empty() {
            self.need_more_params(message.uuid, "PART");
            return;
        }

        let sender_is_server = self.sender_is_server(message);
        let actor = match self.resolve_actor(message) {
            Some(actor) => actor,
            None => return,
        };
        let nickname = match self.nickname_of(actor) {
            Some(nickname) => nickname,
            None => return,
        };

        let part_message = message
            .trailing()
            .map(str::to_string)
            .or_else(|| message.params().get(1).cloned())
            .unwrap_or_else(|| format!("{} left", nickname));

        let names: Vec<String> = message.params()[0].split(',').map(str::to_string).collect();
        for name in &names {
            self.part_one(actor, &nickname, name, &part_message);
        }

        let line = format!(
            ":{} PART {} :{}",
            nickname,
            message.params()[0],
            part_message
        );
        let except = if sender_is_server {
            Some(message.uuid)
        } else {
            None
        };
        self.clients.broadcast_to_local_servers(&line, except);
    }

    fn part_one(&mut self, actor: Uuid, nickname: &str, name: &str, part_message: &str) {
        let State {
            clients,
            channels,
            server_name,
            ..
        } = self;

        let channel = match channels.get_channel_mut(name) {
            Some(channel) => channel,
            None => {
                reply(
                    clients,
                    server_name,
                    actor,
                    Numeric::ErrNoSuchChannel,
                    &[name],
                    "No such channel",
                );
                return;
            }
        };

        if !channel.remove_user(actor) {
            reply(
                clients,
                server_name,
                actor,
                Numeric::ErrNotOnChannel,
                &[name],
                "You're not on that channel",
            );
            return;
        }

        if let Some(user) = clients.get_client_mut(actor).and_then(Client::user_mut) {
            user.channels.remove(&FoldedName::new(name));
        }

        let line = format!(":{} PART {} :{}", nickname, channel.name(), part_message);
        channel.push_to_local(clients, &line, None);

        let now_empty = channel.is_empty();
        if now_empty {
            channels.destroy_channel(name);
        }
    }

    fn cmd_topic(&mut self, message: &Message) {
        if message.params().is_empty() {
            self.need_more_params(message.uuid, "TOPIC");
            return;
        }

        let actor = message.uuid;
        let nickname = match self.nickname_of(actor) {
            Some(nickname) => nickname,
            None => return,
        };
        let name = message.params()[0].clone();
        let new_topic = message
            .trailing()
            .map(str::to_string)
            .or_else(|| message.params().get(1).cloned());

        let State {
            clients,
            channels,
            server_name,
            ..
        } = self;

        let channel = match channels.get_channel_mut(&name) {
            Some(channel) => channel,
            None => {
                reply(
                    clients,
                    server_name,
                    actor,
                    Numeric::ErrNoSuchChannel,
                    &[&name],
                    "No such channel",
                );
                return;
            }
        };

        match new_topic {
            None => {
                if channel.topic().is_empty() {
                    reply(
                        clients,
                        server_name,
                        actor,
                        Numeric::RplNoTopic,
                        &[&name],
                        "No topic is set",
                    );
                } else {
                    reply(
                        clients,
                        server_name,
                        actor,
                        Numeric::RplTopic,
                        &[&name],
                        channel.topic(),
                    );
                }
            }
            Some(topic) => {
                if !channel.is_member(actor) {
                    reply(
                        clients,
                        server_name,
                        actor,
                        Numeric::ErrNotOnChannel,
                        &[&name],
                        "You're not on that channel",
                    );
                    return;
                }
                channel.set_topic(&topic);
                let line = format!(":{} TOPIC {} :{}", nickname, channel.name(), topic);
                channel.push_to_local(clients, &line, None);
            }
        }
    }

    fn cmd_privmsg(&mut self, message: &Message, errors: bool) {
        let command = if errors { "PRIVMSG" } else { "NOTICE" };

        if message.params().is_empty() {
            if errors {
                self.need_more_params(message.uuid, command);
            }
            return;
        }
        let text = match message
            .trailing()
            .map(str::to_string)
            .or_else(|| message.params().get(1).cloned())
        {
            Some(text) => text,
            None => {
                if errors {
                    self.need_more_params(message.uuid, command);
                }
                return;
            }
        };

        let sender_is_server = self.sender_is_server(message);
        let actor = match self.resolve_actor(message) {
            Some(actor) => actor,
            None => return,
        };
        let nickname = match self.nickname_of(actor) {
            Some(nickname) => nickname,
            None => return,
        };
        let except = if sender_is_server {
            Some(message.uuid)
        } else {
            None
        };

        let targets: Vec<String> = message.params()[0].split(',').map(str::to_string).collect();
        for target in &targets {
            if target.starts_with('#') {
                self.message_channel(actor, &nickname, command, target, &text, errors, except);
            } else {
                self.message_user(&nickname, command, target, &text, errors, message.uuid);
            }
        }
    }

    fn message_channel(
        &mut self,
        actor: Uuid,
        nickname: &str,
        command: &str,
        target: &str,
        text: &str,
        errors: bool,
        except: Option<Uuid>,
    ) {
        let State {
            clients,
            channels,
            server_name,
            ..
        } = self;

        let channel = match channels.get_channel_mut(target) {
            Some(channel) => channel,
            None => {
                if errors {
                    reply(
                        clients,
                        server_name,
                        actor,
                        Numeric::ErrNoSuchChannel,
                        &[target],
                        "No such channel",
                    );
                }
                return;
            }
        };

        let line = format!(":{} {} {} :{}", nickname, command, channel.name(), text);
        channel.push_to_local(clients, &line, Some(actor));
        clients.broadcast_to_local_servers(&line, except);
    }

    fn message_user(
        &mut self,
        nickname: &str,
        command: &str,
        target: &str,
        text: &str,
        errors: bool,
        sender: Uuid,
    ) {
        let target_uuid = match self.clients.get_user(target) {
            Some(user) => user.uuid(),
            None => {
                if errors {
                    reply(
                        &mut self.clients,
                        &self.server_name,
                        sender,
                        Numeric::ErrNoSuchNick,
                        &[target],
                        "No such nick",
                    );
                }
                return;
            }
        };

        let line = format!(":{} {} {} :{}", nickname, command, target, text);
        self.clients.push_to(target_uuid, line);
    }

    fn cmd_ping(&mut self, message: &Message) {
        let token = message
            .trailing()
            .map(str::to_string)
            .or_else(|| message.params().get(0).cloned());

        let line = match token {
            Some(token) => format!("PONG :{}", token),
            None => format!("PONG {}", self.server_name),
        };
        self.clients.push_to(message.uuid, line);
    }

    fn cmd_pong(&mut self, message: &Message) {
        // Idle-timer bookkeeping would go here; nothing tracks it yet.
        trace!(self.log, "pong received"; "uuid" => %message.uuid);
    }

    fn cmd_quit(&mut self, message: &Message) {
        let reason = message
            .trailing()
            .map(str::to_string)
            .or_else(|| self.nickname_of(message.uuid))
            .unwrap_or_else(|| "client quit".to_string());

        info!(self.log, "client quit"; "uuid" => %message.uuid, "reason" => &reason);
        self.drop_client(message.uuid, &reason);
    }

    fn cmd_kill(&mut self, message: &Message) {
        let params = message.params();
        let reason = message
            .trailing()
            .map(str::to_string)
            .or_else(|| params.get(1).cloned());

        if params.is_empty() || reason.is_none() {
            self.need_more_params(message.uuid, "KILL");
            return;
        }
        let reason = reason.unwrap_or_default();

        // TODO: require operator privilege here (ERR_NOPRIVILEGES) once an
        // oper policy surface exists.

        let nickname = params[0].clone();
        if self.clients.get_server_by_name(&nickname).is_some() {
            reply(
                &mut self.clients,
                &self.server_name,
                message.uuid,
                Numeric::ErrCantKillServer,
                &[],
                "You can't kill a server",
            );
            return;
        }

        let target = match self.clients.get_user(&nickname) {
            Some(user) => user.uuid(),
            None => {
                reply(
                    &mut self.clients,
                    &self.server_name,
                    message.uuid,
                    Numeric::ErrNoSuchNick,
                    &[&nickname],
                    "No such nick",
                );
                return;
            }
        };

        info!(self.log, "killing user"; "nickname" => &nickname, "reason" => &reason);
        self.drop_client(target, &reason);
        // TODO: propagation to peer servers is undecided; settle the KILL
        // acknowledgement rule before linking more than one hop.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;
    use crate::message::Message;

    fn test_state() -> State {
        State::new("testserver".to_string(), logging::discard())
    }

    fn connect(state: &mut State, conn: ConnectionId) -> Uuid {
        let uuid = state.uuids.generate();
        state
            .clients
            .add_client(Client::new(uuid, Some(conn), "127.0.0.1".to_string()))
            .unwrap();
        uuid
    }

    fn send(state: &mut State, uuid: Uuid, line: &str) {
        let raw = ircwire::parse::parse_message(line).unwrap();
        state.dispatch(Message::new(uuid, raw));
    }

    fn queued(state: &State, uuid: Uuid) -> Vec<String> {
        state
            .clients
            .get_client(uuid)
            .map(|client| client.outbound().iter().cloned().collect())
            .unwrap_or_default()
    }

    fn clear(state: &mut State, uuid: Uuid) {
        if let Some(client) = state.clients.get_client_mut(uuid) {
            client.drain_outbound().for_each(drop);
        }
    }

    fn register_user(state: &mut State, conn: ConnectionId, nick: &str) -> Uuid {
        let uuid = connect(state, conn);
        send(state, uuid, &format!("NICK {}", nick));
        send(state, uuid, &format!("USER {} 0 * :{}", nick, nick));
        clear(state, uuid);
        uuid
    }

    fn register_server(state: &mut State, conn: ConnectionId, name: &str) -> Uuid {
        let uuid = connect(state, conn);
        send(state, uuid, &format!("SERVER {} 1 :peer", name));
        clear(state, uuid);
        uuid
    }

    #[test]
    fn test_unregistered_join_rejected() {
        let mut state = test_state();
        let alice = connect(&mut state, 1);

        send(&mut state, alice, "JOIN #room");

        let lines = queued(&state, alice);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" 451 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_registration_sends_welcome() {
        let mut state = test_state();
        let alice = connect(&mut state, 1);

        send(&mut state, alice, "NICK alice");
        assert!(queued(&state, alice).is_empty());

        send(&mut state, alice, "USER amw 0 * :Alice");

        let lines = queued(&state, alice);
        assert_eq!(
            lines,
            vec![
                ":testserver 001 alice :Welcome to the Internet Relay Network alice!amw@127.0.0.1"
                    .to_string()
            ]
        );
        assert!(state.clients.get_user("alice").is_some());
    }

    #[test]
    fn test_join_creates_channel_and_replies_in_order() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "JOIN #room secret");

        assert_eq!(
            state.channels.get_channel("#room").unwrap().key(),
            "secret"
        );
        assert_eq!(
            queued(&state, alice),
            vec![
                ":alice JOIN #room".to_string(),
                ":testserver 332 alice #room :".to_string(),
                ":testserver 353 alice = #room :@alice".to_string(),
            ]
        );
    }

    #[test]
    fn test_join_with_wrong_key_rejected() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "JOIN #room secret");
        clear(&mut state, alice);

        send(&mut state, bob, "JOIN #room wrong");

        let lines = queued(&state, bob);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains(" 475 "), "got {:?}", lines[0]);
        assert!(!state
            .channels
            .get_channel("#room")
            .unwrap()
            .is_member(bob));
        assert!(queued(&state, alice).is_empty());
    }

    #[test]
    fn test_join_bad_channel_name_rejected() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "JOIN room");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 403 "), "got {:?}", lines[0]);
        assert!(state.channels.get_channel("room").is_none());
    }

    #[test]
    fn test_join_multiple_channels_pairs_keys_positionally() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "JOIN #a,#b k1");

        assert_eq!(state.channels.get_channel("#a").unwrap().key(), "k1");
        assert_eq!(state.channels.get_channel("#b").unwrap().key(), "");
    }

    #[test]
    fn test_part_notifies_members_and_servers() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");
        let hub = register_server(&mut state, 3, "hubnet");

        send(&mut state, alice, "JOIN #room");
        send(&mut state, bob, "JOIN #room");
        clear(&mut state, alice);
        clear(&mut state, bob);
        clear(&mut state, hub);

        send(&mut state, bob, "PART #room :bye");

        assert_eq!(
            queued(&state, alice),
            vec![":bob PART #room :bye".to_string()]
        );
        let channel = state.channels.get_channel("#room").unwrap();
        assert!(!channel.is_member(bob));
        assert!(channel.is_member(alice));
        assert_eq!(
            queued(&state, hub),
            vec![":bob PART #room :bye".to_string()]
        );
        assert!(queued(&state, bob).is_empty());
    }

    #[test]
    fn test_part_when_not_a_member() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "JOIN #room");
        clear(&mut state, alice);

        send(&mut state, bob, "PART #room");

        let lines = queued(&state, bob);
        assert!(lines[0].contains(" 442 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_part_unknown_channel() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "PART #nowhere");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 403 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_last_part_destroys_channel() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "JOIN #room");
        send(&mut state, alice, "PART #room");

        assert!(state.channels.get_channel("#room").is_none());
    }

    #[test]
    fn test_privmsg_channel_skips_sender() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "JOIN #room");
        send(&mut state, bob, "JOIN #room");
        clear(&mut state, alice);
        clear(&mut state, bob);

        send(&mut state, alice, "PRIVMSG #room :hi there");

        assert_eq!(
            queued(&state, bob),
            vec![":alice PRIVMSG #room :hi there".to_string()]
        );
        assert!(queued(&state, alice).is_empty());
    }

    #[test]
    fn test_privmsg_direct_to_nickname() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "PRIVMSG bob :psst");

        assert_eq!(queued(&state, bob), vec![":alice PRIVMSG bob :psst".to_string()]);
        assert!(queued(&state, alice).is_empty());
    }

    #[test]
    fn test_privmsg_unknown_nick() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "PRIVMSG carol :anyone");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 401 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_notice_never_replies_with_errors() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "NOTICE carol :anyone");
        send(&mut state, alice, "NOTICE #nowhere :anyone");

        assert!(queued(&state, alice).is_empty());
    }

    #[test]
    fn test_privmsg_remote_user_routes_via_link() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let hub = register_server(&mut state, 2, "hubnet");

        // The link announces a user living behind it.
        send(&mut state, hub, "NICK carol");
        clear(&mut state, hub);

        send(&mut state, alice, "PRIVMSG carol :hello remote");

        assert_eq!(
            queued(&state, hub),
            vec![":alice PRIVMSG carol :hello remote".to_string()]
        );
    }

    #[test]
    fn test_server_registration_of_unregistered_peer() {
        let mut state = test_state();
        let peer = connect(&mut state, 1);

        send(&mut state, peer, "SERVER othernet 1 :hi");

        let client = state.clients.get_client(peer).unwrap();
        assert_eq!(client.state(), ClientState::Registered);
        assert!(client.is_local_server());
        assert_eq!(
            state.clients.get_server_by_name("othernet").unwrap().uuid(),
            peer
        );
    }

    #[test]
    fn test_registered_user_cannot_become_server() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "SERVER othernet 1 :hi");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 462 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_duplicate_server_name_disconnects_sender() {
        let mut state = test_state();
        let peer = register_server(&mut state, 1, "othernet");

        send(&mut state, peer, "SERVER othernet 2 :dup");

        assert!(state.clients.get_client(peer).is_none());
        assert!(state.clients.get_server_by_name("othernet").is_none());
    }

    #[test]
    fn test_linked_server_introduces_remote_server() {
        let mut state = test_state();
        let hub = register_server(&mut state, 1, "hubnet");

        send(&mut state, hub, ":hubnet SERVER leafnet 2 :far away");

        let leaf = state.clients.get_server_by_name("leafnet").unwrap();
        assert!(matches!(
            leaf.kind(),
            ClientKind::RemoteServer { .. }
        ));
        assert_eq!(leaf.via(), Some(hub));
    }

    #[test]
    fn test_remote_server_with_unknown_introducer_dropped() {
        let mut state = test_state();
        let hub = register_server(&mut state, 1, "hubnet");

        send(&mut state, hub, ":nowhere SERVER leafnet 2 :lost");

        assert!(state.clients.get_server_by_name("leafnet").is_none());
        let lines = queued(&state, hub);
        assert!(lines[0].starts_with("ERROR :"), "got {:?}", lines[0]);
    }

    #[test]
    fn test_server_relayed_join_resolves_prefix() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let hub = register_server(&mut state, 2, "hubnet");
        send(&mut state, hub, "NICK carol");
        send(&mut state, alice, "JOIN #room");
        clear(&mut state, alice);
        clear(&mut state, hub);

        send(&mut state, hub, ":carol JOIN #room");

        assert_eq!(queued(&state, alice), vec![":carol JOIN #room".to_string()]);
        assert!(state
            .channels
            .get_channel("#room")
            .unwrap()
            .is_member(state.clients.get_user("carol").unwrap().uuid()));
    }

    #[test]
    fn test_server_relayed_join_without_prefix() {
        let mut state = test_state();
        let hub = register_server(&mut state, 1, "hubnet");

        send(&mut state, hub, "JOIN #room");

        let lines = queued(&state, hub);
        assert!(lines[0].contains(" 431 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_server_relayed_join_with_unknown_nick() {
        let mut state = test_state();
        let hub = register_server(&mut state, 1, "hubnet");

        send(&mut state, hub, ":ghost JOIN #room");

        let lines = queued(&state, hub);
        assert!(lines[0].contains(" 401 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_ping_echoes_token() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "PING :x");

        assert_eq!(queued(&state, alice), vec!["PONG :x".to_string()]);
    }

    #[test]
    fn test_ping_allowed_before_registration() {
        let mut state = test_state();
        let peer = connect(&mut state, 1);

        send(&mut state, peer, "PING :probe");

        assert_eq!(queued(&state, peer), vec!["PONG :probe".to_string()]);
    }

    #[test]
    fn test_ping_without_token_names_server() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "PING");

        assert_eq!(queued(&state, alice), vec!["PONG testserver".to_string()]);
    }

    #[test]
    fn test_nick_collision_rejected() {
        let mut state = test_state();
        let _alice = register_user(&mut state, 1, "alice");
        let bob = connect(&mut state, 2);

        send(&mut state, bob, "NICK ALICE");

        let lines = queued(&state, bob);
        assert!(lines[0].contains(" 433 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_nick_rename_updates_index_and_echoes() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "NICK alicia");

        assert!(state.clients.get_user("alice").is_none());
        assert_eq!(state.clients.get_user("alicia").unwrap().uuid(), alice);
        assert_eq!(queued(&state, alice), vec![":alice NICK alicia".to_string()]);
    }

    #[test]
    fn test_erroneous_nickname_rejected() {
        let mut state = test_state();
        let alice = connect(&mut state, 1);

        send(&mut state, alice, "NICK 9lives");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 432 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_quit_broadcasts_and_destroys_empty_channel() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "JOIN #room");
        send(&mut state, bob, "JOIN #room");
        send(&mut state, bob, "JOIN #lonely");
        clear(&mut state, alice);

        send(&mut state, bob, "QUIT :gone fishing");

        assert_eq!(
            queued(&state, alice),
            vec![":bob QUIT :gone fishing".to_string()]
        );
        assert!(state.clients.get_client(bob).is_none());
        assert!(!state.channels.get_channel("#room").unwrap().is_member(bob));
        assert!(state.channels.get_channel("#lonely").is_none());
    }

    #[test]
    fn test_disconnect_removes_user_from_channels() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "JOIN #room");
        send(&mut state, bob, "JOIN #room");

        state.drop_client(bob, "connection closed");

        let channel = state.channels.get_channel("#room").unwrap();
        assert!(!channel.is_member(bob));
        assert!(channel.is_member(alice));
        assert_eq!(state.take_closed_conns(), vec![2]);
    }

    #[test]
    fn test_kill_disconnects_target() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "KILL bob :misbehaving");

        assert!(state.clients.get_client(bob).is_none());
        assert!(state.clients.get_user("bob").is_none());
    }

    #[test]
    fn test_kill_cannot_target_server() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let _hub = register_server(&mut state, 2, "hubnet");

        send(&mut state, alice, "KILL hubnet :nope");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 483 "), "got {:?}", lines[0]);
        assert!(state.clients.get_server_by_name("hubnet").is_some());
    }

    #[test]
    fn test_kill_unknown_nick() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "KILL ghost :reason");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 401 "), "got {:?}", lines[0]);
    }

    #[test]
    fn test_topic_set_and_query() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "JOIN #room");
        send(&mut state, bob, "JOIN #room");
        clear(&mut state, alice);
        clear(&mut state, bob);

        send(&mut state, alice, "TOPIC #room :all things rust");

        assert_eq!(
            state.channels.get_channel("#room").unwrap().topic(),
            "all things rust"
        );
        assert_eq!(
            queued(&state, bob),
            vec![":alice TOPIC #room :all things rust".to_string()]
        );

        clear(&mut state, bob);
        send(&mut state, bob, "TOPIC #room");
        let lines = queued(&state, bob);
        assert!(lines[0].contains(" 332 "), "got {:?}", lines[0]);
        assert!(lines[0].ends_with(":all things rust"), "got {:?}", lines[0]);
    }

    #[test]
    fn test_topic_set_requires_membership() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");
        let bob = register_user(&mut state, 2, "bob");

        send(&mut state, alice, "JOIN #room");
        send(&mut state, bob, "TOPIC #room :takeover");

        let lines = queued(&state, bob);
        assert!(lines[0].contains(" 442 "), "got {:?}", lines[0]);
        assert_eq!(state.channels.get_channel("#room").unwrap().topic(), "");
    }

    #[test]
    fn test_unknown_command_replies_421() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "WOBBLE sideways");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 421 "), "got {:?}", lines[0]);
        assert!(lines[0].contains("WOBBLE"), "got {:?}", lines[0]);
    }

    #[test]
    fn test_need_more_params() {
        let mut state = test_state();
        let alice = register_user(&mut state, 1, "alice");

        send(&mut state, alice, "JOIN");

        let lines = queued(&state, alice);
        assert!(lines[0].contains(" 461 "), "got {:?}", lines[0]);
        assert!(lines[0].contains("JOIN"), "got {:?}", lines[0]);
    }

    #[test]
    fn test_vanished_sender_is_ignored() {
        let mut state = test_state();
        let _alice = register_user(&mut state, 1, "alice");
        let ghost = state.uuids.generate();

        let raw = ircwire::parse::parse_message("JOIN #room").unwrap();
        state.dispatch(Message::new(ghost, raw));

        assert!(state.channels.get_channel("#room").is_none());
    }
}
