use std::fmt;
use std::str::FromStr;

/// Stable numeric identifier of a shard.
///
/// The external representation used by the topology service is a string of the form
/// `"shardId-<12-digit zero-padded decimal>"`. Internally we keep the parsed decimal value,
/// since the lookup index and shard cache key on it directly and a fixed-width integer keeps
/// both allocation-free.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u64);

const PREFIX: &str = "shardId-";
const DIGITS: usize = 12;

impl ShardId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShardIdParseError {
    #[error("shard id '{0}' is missing the '{PREFIX}' prefix")]
    MissingPrefix(String),
    #[error("shard id '{0}' does not have exactly {DIGITS} digits after '{PREFIX}'")]
    WrongWidth(String),
    #[error("shard id '{0}' has a non-decimal suffix")]
    NotDecimal(String),
}

impl FromStr for ShardId {
    type Err = ShardIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let suffix = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ShardIdParseError::MissingPrefix(s.to_string()))?;

        if suffix.len() != DIGITS {
            return Err(ShardIdParseError::WrongWidth(s.to_string()));
        }
        let value: u64 = suffix
            .parse()
            .map_err(|_| ShardIdParseError::NotDecimal(s.to_string()))?;

        Ok(ShardId(value))
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{:0width$}", self.0, width = DIGITS)
    }
}
