use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

/// Position at which a subscription starts reading a stream.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum OffsetSpec {
    /// The oldest message still retained by the broker.
    #[default]
    First,

    /// Only messages appended after the subscription is established.
    Next,

    /// An absolute broker offset.
    Offset(u64),

    /// The last `n` messages, then everything that follows.
    LastN(u64),
}

impl Display for OffsetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "first"),
            Self::Next => write!(f, "next"),
            Self::Offset(offset) => write!(f, "offset:{offset}"),
            Self::LastN(n) => write!(f, "last:{n}"),
        }
    }
}

/// Error returned when an offset spec cannot be parsed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid offset spec '{0}' - expected first, next, offset:<n> or last:<n>")]
pub struct ParseOffsetError(String);

impl FromStr for OffsetSpec {
    type Err = ParseOffsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();

        match trimmed.as_str() {
            "first" => return Ok(Self::First),
            "next" | "live" => return Ok(Self::Next),
            _ => {}
        }

        let (prefix, value) = trimmed
            .split_once(':')
            .ok_or_else(|| ParseOffsetError(s.to_string()))?;
        let value: u64 = value.parse().map_err(|_| ParseOffsetError(s.to_string()))?;

        match prefix {
            "offset" => Ok(Self::Offset(value)),
            "last" => Ok(Self::LastN(value)),
            _ => Err(ParseOffsetError(s.to_string())),
        }
    }
}
