//! Wire-level building blocks shared by every part of the IRC server: the
//! raw message model, the line grammar, numeric replies and identifier
//! case-folding. This crate performs no I/O.

pub mod casefold;
pub mod message;
pub mod numerics;
pub mod parse;

pub use crate::message::{RawCommand, RawMessage, RawPrefix};
pub use crate::numerics::Numeric;

/// Maximum length of a wire line, `\r\n` terminator included.
pub const MAX_LINE_LEN: usize = 512;

/// Maximum length of a channel name.
pub const MAX_CHANNEL_NAME_LEN: usize = 50;
