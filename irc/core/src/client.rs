use hashbrown::HashSet;
use ircwire::casefold::FoldedName;
use ironnet::ConnectionId;
use std::collections::vec_deque::Drain;
use std::collections::VecDeque;
use std::fmt;

/// A local client whose outbound queue grows past this is a slow consumer
/// and gets disconnected.
pub const OUTBOUND_SOFT_LIMIT: usize = 256;

/// Process-local identifier of one connected peer, stable for the
/// lifetime of that connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Uuid(u64);

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Counter-based UUID source owned by the server instance. Tests construct
/// their own for deterministic ids.
pub struct UuidSource {
    next: u64,
}

impl UuidSource {
    pub fn new() -> UuidSource {
        UuidSource { next: 1 }
    }

    pub fn generate(&mut self) -> Uuid {
        let uuid = Uuid(self.next);
        self.next += 1;
        uuid
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClientState {
    UnRegistered,
    Registered,
}

/// Identity handed over during the registration handshake, before the
/// client is promoted to a user or server.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub nickname: Option<String>,
    pub username: Option<String>,
    pub realname: Option<String>,
    pub password: Option<String>,
    pub hostname: String,
}

#[derive(Debug, Clone)]
pub struct UserInfo {
    pub nickname: String,
    pub username: String,
    pub realname: String,
    pub hostname: String,
    /// Folded names of the channels this user has joined.
    pub channels: HashSet<FoldedName>,
}

impl UserInfo {
    pub fn new(nickname: String, username: String, realname: String, hostname: String) -> UserInfo {
        UserInfo {
            nickname,
            username,
            realname,
            hostname,
            channels: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub hop_count: u32,
    /// The server that introduced this one; None for direct links.
    pub introducer: Option<Uuid>,
}

/// What a connected peer currently is. Handlers match on the tag; there is
/// no runtime downcasting anywhere.
#[derive(Debug, Clone)]
pub enum ClientKind {
    Unknown(Registration),
    LocalUser(UserInfo),
    RemoteUser { info: UserInfo, via: Uuid },
    LocalServer(ServerInfo),
    RemoteServer { info: ServerInfo, via: Uuid },
}

/// Any connected peer: the shared header plus the kind tag. The entity is
/// owned exclusively by the client database.
#[derive(Debug)]
pub struct Client {
    uuid: Uuid,
    conn: Option<ConnectionId>,
    state: ClientState,
    kind: ClientKind,
    outbound: VecDeque<String>,
    overflowed: bool,
}

impl Client {
    /// A freshly accepted, unregistered connection.
    pub fn new(uuid: Uuid, conn: Option<ConnectionId>, hostname: String) -> Client {
        Client {
            uuid,
            conn,
            state: ClientState::UnRegistered,
            kind: ClientKind::Unknown(Registration {
                hostname,
                ..Registration::default()
            }),
            outbound: VecDeque::new(),
            overflowed: false,
        }
    }

    /// A user reached through a peer server link.
    pub fn remote_user(uuid: Uuid, info: UserInfo, via: Uuid) -> Client {
        Client {
            uuid,
            conn: None,
            state: ClientState::Registered,
            kind: ClientKind::RemoteUser { info, via },
            outbound: VecDeque::new(),
            overflowed: false,
        }
    }

    /// A server introduced by an already-linked peer.
    pub fn remote_server(uuid: Uuid, info: ServerInfo, via: Uuid) -> Client {
        Client {
            uuid,
            conn: None,
            state: ClientState::Registered,
            kind: ClientKind::RemoteServer { info, via },
            outbound: VecDeque::new(),
            overflowed: false,
        }
    }

    /// Appends one line to the outbound queue. Past the soft bound the
    /// line is discarded and the client marked for disconnection.
    pub fn push<S: Into<String>>(&mut self, line: S) {
        if self.outbound.len() >= OUTBOUND_SOFT_LIMIT {
            self.overflowed = true;
            return;
        }
        self.outbound.push_back(line.into());
    }

    pub fn drain_outbound(&mut self) -> Drain<String> {
        self.outbound.drain(..)
    }

    pub(crate) fn outbound(&self) -> &VecDeque<String> {
        &self.outbound
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn conn(&self) -> Option<ConnectionId> {
        self.conn
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn set_state(&mut self, state: ClientState) {
        self.state = state;
    }

    pub fn kind(&self) -> &ClientKind {
        &self.kind
    }

    pub fn set_kind(&mut self, kind: ClientKind) {
        self.kind = kind;
    }

    /// The nickname this peer goes by, including one supplied before
    /// registration completed.
    pub fn nickname(&self) -> Option<&str> {
        match self.kind {
            ClientKind::LocalUser(ref info) | ClientKind::RemoteUser { ref info, .. } => {
                Some(&info.nickname)
            }
            ClientKind::Unknown(ref registration) => registration.nickname.as_deref(),
            _ => None,
        }
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server().map(|info| info.name.as_str())
    }

    pub fn user(&self) -> Option<&UserInfo> {
        match self.kind {
            ClientKind::LocalUser(ref info) | ClientKind::RemoteUser { ref info, .. } => Some(info),
            _ => None,
        }
    }

    pub fn user_mut(&mut self) -> Option<&mut UserInfo> {
        match self.kind {
            ClientKind::LocalUser(ref mut info) | ClientKind::RemoteUser { ref mut info, .. } => {
                Some(info)
            }
            _ => None,
        }
    }

    pub fn server(&self) -> Option<&ServerInfo> {
        match self.kind {
            ClientKind::LocalServer(ref info) | ClientKind::RemoteServer { ref info, .. } => {
                Some(info)
            }
            _ => None,
        }
    }

    pub fn registration_mut(&mut self) -> Option<&mut Registration> {
        match self.kind {
            ClientKind::Unknown(ref mut registration) => Some(registration),
            _ => None,
        }
    }

    /// The local server link a remote entity is reached through.
    pub fn via(&self) -> Option<Uuid> {
        match self.kind {
            ClientKind::RemoteUser { via, .. } | ClientKind::RemoteServer { via, .. } => Some(via),
            _ => None,
        }
    }

    pub fn is_local_user(&self) -> bool {
        matches!(self.kind, ClientKind::LocalUser(_))
    }

    pub fn is_server(&self) -> bool {
        matches!(
            self.kind,
            ClientKind::LocalServer(_) | ClientKind::RemoteServer { .. }
        )
    }

    pub fn is_local_server(&self) -> bool {
        matches!(self.kind, ClientKind::LocalServer(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_source_is_sequential() {
        let mut source = UuidSource::new();

        let first = source.generate();
        let second = source.generate();

        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn test_push_and_drain_preserve_order() {
        let mut source = UuidSource::new();
        let mut client = Client::new(source.generate(), Some(1), "127.0.0.1".to_string());

        client.push("first");
        client.push("second".to_string());

        let lines: Vec<String> = client.drain_outbound().collect();
        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
        assert!(client.outbound().is_empty());
    }

    #[test]
    fn test_soft_bound_marks_slow_consumer() {
        let mut source = UuidSource::new();
        let mut client = Client::new(source.generate(), Some(1), "127.0.0.1".to_string());

        for i in 0..OUTBOUND_SOFT_LIMIT {
            client.push(format!("line {}", i));
        }
        assert!(!client.overflowed());

        client.push("one too many");

        assert!(client.overflowed());
        assert_eq!(client.outbound().len(), OUTBOUND_SOFT_LIMIT);
    }

    #[test]
    fn test_unknown_client_exposes_pending_nickname() {
        let mut source = UuidSource::new();
        let mut client = Client::new(source.generate(), Some(1), "127.0.0.1".to_string());

        assert_eq!(client.nickname(), None);

        client.registration_mut().unwrap().nickname = Some("alice".to_string());
        assert_eq!(client.nickname(), Some("alice"));
    }
}
