use crate::channel::{Channel, ChannelKind, ChannelModes};
use crate::client::{Client, ClientKind, ClientState, ServerInfo, Uuid, UserInfo};
use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use ircwire::casefold::FoldedName;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    DuplicateClient,
    UnableToRegister(&'static str),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DatabaseError::DuplicateClient => write!(f, "client already in database"),
            DatabaseError::UnableToRegister(reason) => {
                write!(f, "unable to register: {}", reason)
            }
        }
    }
}

/// Owns every connected peer. The UUID index is authoritative; nickname
/// and servername indexes are secondary and kept in lockstep.
pub struct ClientDatabase {
    clients: HashMap<Uuid, Client>,
    nicknames: HashMap<FoldedName, Uuid>,
    servers: HashMap<FoldedName, Uuid>,
}

impl ClientDatabase {
    pub fn new() -> ClientDatabase {
        ClientDatabase {
            clients: HashMap::new(),
            nicknames: HashMap::new(),
            servers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Inserts a new client keyed by its UUID.
    pub fn add_client(&mut self, client: Client) -> Result<&Client, DatabaseError> {
        match self.clients.entry(client.uuid()) {
            Entry::Occupied(_) => Err(DatabaseError::DuplicateClient),
            Entry::Vacant(slot) => Ok(slot.insert(client)),
        }
    }

    /// Inserts an already-registered remote user and indexes its nickname.
    pub fn add_remote_user(&mut self, client: Client) -> Result<(), DatabaseError> {
        let nickname = match client.user() {
            Some(user) => FoldedName::new(&user.nickname),
            None => return Err(DatabaseError::UnableToRegister("not a user")),
        };
        if self.nicknames.contains_key(&nickname) {
            return Err(DatabaseError::UnableToRegister("nickname in use"));
        }

        let uuid = client.uuid();
        self.add_client(client)?;
        self.nicknames.insert(nickname, uuid);
        Ok(())
    }

    /// Inserts an already-registered server and indexes its name.
    pub fn add_server(&mut self, client: Client) -> Result<(), DatabaseError> {
        let name = match client.server() {
            Some(server) => FoldedName::new(&server.name),
            None => return Err(DatabaseError::UnableToRegister("not a server")),
        };
        if self.servers.contains_key(&name) {
            return Err(DatabaseError::UnableToRegister("server name in use"));
        }

        let uuid = client.uuid();
        self.add_client(client)?;
        self.servers.insert(name, uuid);
        Ok(())
    }

    pub fn get_client(&self, uuid: Uuid) -> Option<&Client> {
        self.clients.get(&uuid)
    }

    pub fn get_client_mut(&mut self, uuid: Uuid) -> Option<&mut Client> {
        self.clients.get_mut(&uuid)
    }

    pub fn get_client_by_nick(&self, nickname: &str) -> Option<&Client> {
        let uuid = *self.nicknames.get(&FoldedName::new(nickname))?;
        self.clients.get(&uuid)
    }

    /// A registered user going by this nickname, if any.
    pub fn get_user(&self, nickname: &str) -> Option<&Client> {
        self.get_client_by_nick(nickname)
            .filter(|client| client.user().is_some())
    }

    pub fn get_server_by_name(&self, name: &str) -> Option<&Client> {
        let uuid = *self.servers.get(&FoldedName::new(name))?;
        self.clients.get(&uuid)
    }

    pub fn get_server(&self, uuid: Uuid) -> Option<&Client> {
        self.clients
            .get(&uuid)
            .filter(|client| client.server().is_some())
    }

    /// Promotes an unregistered client to a local user. Requires that
    /// NICK and USER have both been supplied.
    pub fn register_local_user(&mut self, uuid: Uuid) -> Result<(), DatabaseError> {
        let (key, info) = {
            let client = self
                .clients
                .get(&uuid)
                .ok_or(DatabaseError::UnableToRegister("unknown client"))?;
            let registration = match client.kind() {
                ClientKind::Unknown(registration) => registration,
                _ => return Err(DatabaseError::UnableToRegister("already registered")),
            };

            let nickname = registration
                .nickname
                .clone()
                .ok_or(DatabaseError::UnableToRegister("nickname missing"))?;
            let username = registration
                .username
                .clone()
                .ok_or(DatabaseError::UnableToRegister("username missing"))?;
            let realname = registration
                .realname
                .clone()
                .ok_or(DatabaseError::UnableToRegister("realname missing"))?;

            (
                FoldedName::new(&nickname),
                UserInfo::new(nickname, username, realname, registration.hostname.clone()),
            )
        };

        match self.nicknames.entry(key) {
            Entry::Occupied(ref slot) if *slot.get() != uuid => {
                return Err(DatabaseError::UnableToRegister("nickname in use"));
            }
            Entry::Occupied(_) => (),
            Entry::Vacant(slot) => {
                slot.insert(uuid);
            }
        }

        if let Some(client) = self.clients.get_mut(&uuid) {
            client.set_kind(ClientKind::LocalUser(info));
            client.set_state(ClientState::Registered);
        }
        Ok(())
    }

    /// Promotes an unregistered client to a directly-linked server.
    pub fn register_local_server(
        &mut self,
        name: &str,
        hop_count: u32,
        uuid: Uuid,
    ) -> Result<(), DatabaseError> {
        let key = FoldedName::new(name);
        if self.servers.contains_key(&key) {
            return Err(DatabaseError::UnableToRegister("server name in use"));
        }

        let client = self
            .clients
            .get_mut(&uuid)
            .ok_or(DatabaseError::UnableToRegister("unknown client"))?;
        match client.kind() {
            ClientKind::Unknown(_) => (),
            _ => return Err(DatabaseError::UnableToRegister("already registered")),
        }

        client.set_kind(ClientKind::LocalServer(ServerInfo {
            name: name.to_string(),
            hop_count,
            introducer: None,
        }));
        client.set_state(ClientState::Registered);
        self.servers.insert(key, uuid);
        Ok(())
    }

    /// Changes a user's nickname and rebuilds the nickname index in one
    /// step; lookups never observe a half-rename.
    pub fn rename_user(&mut self, uuid: Uuid, new_nickname: &str) -> Result<(), DatabaseError> {
        let new_key = FoldedName::new(new_nickname);
        if let Some(&owner) = self.nicknames.get(&new_key) {
            if owner != uuid {
                return Err(DatabaseError::UnableToRegister("nickname in use"));
            }
        }

        let old_key = {
            let client = self
                .clients
                .get_mut(&uuid)
                .ok_or(DatabaseError::UnableToRegister("unknown client"))?;
            let user = client
                .user_mut()
                .ok_or(DatabaseError::UnableToRegister("not a user"))?;
            let old_key = FoldedName::new(&user.nickname);
            user.nickname = new_nickname.to_string();
            old_key
        };

        self.nicknames.remove(&old_key);
        self.nicknames.insert(new_key, uuid);
        Ok(())
    }

    /// Removes a client from every index and releases it. Silent when the
    /// UUID is unknown.
    pub fn disconnect_client(&mut self, uuid: Uuid) -> Option<Client> {
        let client = self.clients.remove(&uuid)?;
        if let Some(user) = client.user() {
            self.nicknames.remove(&FoldedName::new(&user.nickname));
        }
        if let Some(server) = client.server() {
            self.servers.remove(&FoldedName::new(&server.name));
        }
        Some(client)
    }

    pub fn disconnect_user(&mut self, uuid: Uuid) -> Option<Client> {
        if self.clients.get(&uuid)?.user().is_none() {
            return None;
        }
        self.disconnect_client(uuid)
    }

    pub fn disconnect_server(&mut self, uuid: Uuid) -> Option<Client> {
        if self.clients.get(&uuid)?.server().is_none() {
            return None;
        }
        self.disconnect_client(uuid)
    }

    /// Enqueues a line on every directly-linked server, optionally
    /// skipping one.
    pub fn broadcast_to_local_servers(&mut self, line: &str, except: Option<Uuid>) {
        for client in self.clients.values_mut() {
            if Some(client.uuid()) == except {
                continue;
            }
            if client.is_local_server() {
                client.push(line.to_string());
            }
        }
    }

    /// Enqueues a line on a client, routing remote entities through the
    /// server link they are reached by.
    pub fn push_to(&mut self, uuid: Uuid, line: String) {
        let destination = match self.clients.get(&uuid) {
            Some(client) => client.via().unwrap_or(uuid),
            None => return,
        };
        if let Some(client) = self.clients.get_mut(&destination) {
            client.push(line);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Client> {
        self.clients.values_mut()
    }
}

/// Owns every channel, keyed by folded name.
pub struct ChannelDatabase {
    channels: HashMap<FoldedName, Channel>,
}

impl ChannelDatabase {
    pub fn new() -> ChannelDatabase {
        ChannelDatabase {
            channels: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn get_channel(&self, name: &str) -> Option<&Channel> {
        self.channels.get(&FoldedName::new(name))
    }

    pub fn get_channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(&FoldedName::new(name))
    }

    /// Creates a channel, or returns the existing one with that name.
    pub fn create_channel(
        &mut self,
        name: &str,
        key: &str,
        kind: ChannelKind,
        modes: ChannelModes,
    ) -> &mut Channel {
        self.channels
            .entry(FoldedName::new(name))
            .or_insert_with(|| Channel::new(name, key, kind, modes))
    }

    pub fn destroy_channel(&mut self, name: &str) {
        self.channels.remove(&FoldedName::new(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.channels.values_mut()
    }
}
