use crate::client::Uuid;
use crate::database::ClientDatabase;
use indexmap::IndexMap;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelKind {
    Local,
    Network,
}

/// Channel mode bit set.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChannelModes(u32);

impl ChannelModes {
    pub const NONE: ChannelModes = ChannelModes(0);
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemberPrivilege {
    None,
    Voice,
    Operator,
}

impl MemberPrivilege {
    pub fn sigil(self) -> Option<char> {
        match self {
            MemberPrivilege::Operator => Some('@'),
            MemberPrivilege::Voice => Some('+'),
            MemberPrivilege::None => None,
        }
    }
}

/// A named chat room. Members are held as UUIDs and resolved through the
/// client database at traversal time; the channel never owns a client.
pub struct Channel {
    name: String,
    topic: String,
    key: String,
    modes: ChannelModes,
    kind: ChannelKind,
    members: IndexMap<Uuid, MemberPrivilege>,
}

impl Channel {
    pub fn new(name: &str, key: &str, kind: ChannelKind, modes: ChannelModes) -> Channel {
        Channel {
            name: name.to_string(),
            topic: String::new(),
            key: key.to_string(),
            modes,
            kind,
            members: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn set_topic(&mut self, topic: &str) {
        self.topic = topic.to_string();
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn modes(&self) -> ChannelModes {
        self.modes
    }

    /// Adds a member. The first one becomes channel operator.
    pub fn add_user(&mut self, uuid: Uuid) {
        let privilege = if self.members.is_empty() {
            MemberPrivilege::Operator
        } else {
            MemberPrivilege::None
        };
        self.members.entry(uuid).or_insert(privilege);
    }

    /// Removes a member, returning true when the user was one.
    pub fn remove_user(&mut self, uuid: Uuid) -> bool {
        self.members.shift_remove(&uuid).is_some()
    }

    pub fn is_member(&self, uuid: Uuid) -> bool {
        self.members.contains_key(&uuid)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Space-separated nicknames in join order, each prefixed by its
    /// privilege sigil. Stale members are skipped.
    pub fn user_list_as_string(&self, clients: &ClientDatabase) -> String {
        let mut list = String::new();
        for (&uuid, privilege) in &self.members {
            let nickname = match clients.get_client(uuid).and_then(|c| c.nickname()) {
                Some(nickname) => nickname,
                None => continue,
            };
            if !list.is_empty() {
                list.push(' ');
            }
            if let Some(sigil) = privilege.sigil() {
                list.push(sigil);
            }
            list.push_str(nickname);
        }
        list
    }

    /// Delivers a line to every local member, optionally skipping one.
    /// Members no longer present in the database are dropped.
    pub fn push_to_local(
        &mut self,
        clients: &mut ClientDatabase,
        line: &str,
        except: Option<Uuid>,
    ) {
        self.members
            .retain(|uuid, _| clients.get_client(*uuid).is_some());

        for (&uuid, _) in &self.members {
            if Some(uuid) == except {
                continue;
            }
            if let Some(client) = clients.get_client_mut(uuid) {
                if client.is_local_user() {
                    client.push(line.to_string());
                }
            }
        }
    }
}
