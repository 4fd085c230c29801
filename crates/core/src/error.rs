//! Error taxonomy shared by the registry, linking and save layers.

use thiserror::Error;

use crate::models::ContainerId;

/// Convenience alias used by the typed layers of the crate.
pub type WormholeResult<T> = std::result::Result<T, WormholeError>;

/// Failures surfaced by channel and membership operations.
#[derive(Debug, Error)]
pub enum WormholeError {
    /// No channel with the given name is registered.
    #[error("channel '{0}' not found")]
    ChannelNotFound(String),
    /// The container is not bound to any channel.
    #[error("container {0} is not linked to a channel")]
    NotLinked(ContainerId),
    /// A channel with the given name already owns an inventory.
    #[error("channel '{0}' already exists")]
    DuplicateChannel(String),
    /// Channel names must be non-empty and free of record delimiters.
    #[error("invalid channel name {0:?}: {1}")]
    InvalidChannelName(String, &'static str),
    /// Container id `0` is reserved.
    #[error("container id 0 is reserved")]
    InvalidContainer,
    /// World names are used as directory names and must be plain components.
    #[error("invalid world name {0:?}")]
    InvalidWorld(String),
    /// The balance collaborator refused to pay for a create/link.
    #[error("payment of {cost} declined")]
    PaymentDeclined {
        /// Price that was requested.
        cost: u32,
    },
    /// A save-file line could not be parsed.
    #[error("malformed record {line:?}: {reason}")]
    MalformedRecord {
        /// Offending line, verbatim.
        line: String,
        /// Human readable cause.
        reason: String,
    },
    /// Every slot of the inventory is already occupied.
    #[error("inventory has no free slot")]
    InventoryFull,
    /// Filesystem failure while reading or writing save data.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WormholeError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a lookup miss that callers may treat as "no result".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ChannelNotFound(_) | Self::NotLinked(_))
    }
}
