use crate::client::Uuid;
use ircwire::RawMessage;

/// One parsed inbound line paired with the UUID of the connection it
/// arrived on.
#[derive(Debug, Clone)]
pub struct Message {
    pub uuid: Uuid,
    pub raw: RawMessage,
}

impl Message {
    pub fn new(uuid: Uuid, raw: RawMessage) -> Message {
        Message { uuid, raw }
    }

    pub fn command(&self) -> &str {
        &self.raw.command.name
    }

    pub fn params(&self) -> &[String] {
        &self.raw.command.parameters
    }

    pub fn trailing(&self) -> Option<&str> {
        self.raw.command.trailing.as_deref()
    }

    /// The prefix name, read as a nickname or a servername depending on
    /// the command at hand.
    pub fn prefix_name(&self) -> Option<&str> {
        self.raw.prefix.as_ref().map(|prefix| prefix.name.as_str())
    }
}
