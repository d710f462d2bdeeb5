//! The structured form of one wire line. Serialization is the `Display`
//! impls; parsing lives in [`crate::parse`].

use std::fmt;

/// Optional `:source` token at the start of a line, identifying the
/// originator of the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPrefix {
    pub name: String,
    pub hostname: Option<String>,
    pub username: Option<String>,
}

/// Command word (or three-digit numeric), its middle parameters and the
/// optional trailing parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub name: String,
    pub parameters: Vec<String>,
    pub trailing: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub prefix: Option<RawPrefix>,
    pub command: RawCommand,
}

impl fmt::Display for RawPrefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(ref hostname) = self.hostname {
            write!(f, "@{}", hostname)?;
        }
        if let Some(ref username) = self.username {
            write!(f, "!{}", username)?;
        }
        Ok(())
    }
}

impl fmt::Display for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)?;
        for parameter in &self.parameters {
            write!(f, " {}", parameter)?;
        }
        if let Some(ref trailing) = self.trailing {
            write!(f, " :{}", trailing)?;
        }
        Ok(())
    }
}

impl fmt::Display for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)
    }
}
