use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    error::{WormholeError, WormholeResult},
    models::{InventoryHandle, InventorySlotSet},
};

/// Characters that would break the save-file grammar.
const RESERVED_CHARS: [char; 4] = ['|', ',', '\n', '\r'];

/// Reject names that are empty or contain record delimiters.
pub fn validate_channel_name(name: &str) -> WormholeResult<()> {
    if name.is_empty() {
        return Err(WormholeError::InvalidChannelName(
            name.to_string(),
            "name is empty",
        ));
    }
    if name.contains(RESERVED_CHARS) {
        return Err(WormholeError::InvalidChannelName(
            name.to_string(),
            "name contains '|', ',' or a line break",
        ));
    }
    Ok(())
}

/// Channel name to shared inventory mapping. Owns the inventory data.
#[derive(Debug, Default)]
pub struct ChannelStore {
    channels: BTreeMap<String, InventoryHandle>,
}

impl ChannelStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new channel seeded with `initial`.
    ///
    /// Never overwrites: an existing channel yields [`WormholeError::DuplicateChannel`].
    pub fn create_channel(
        &mut self,
        name: &str,
        initial: InventorySlotSet,
    ) -> WormholeResult<InventoryHandle> {
        validate_channel_name(name)?;
        if self.channels.contains_key(name) {
            return Err(WormholeError::DuplicateChannel(name.to_string()));
        }
        let handle = InventoryHandle::new(initial);
        self.channels.insert(name.to_string(), handle.clone());
        debug!(channel = %name, "channel created");
        Ok(handle)
    }

    /// Shared inventory of `name`.
    pub fn get(&self, name: &str) -> WormholeResult<&InventoryHandle> {
        self.channels
            .get(name)
            .ok_or_else(|| WormholeError::ChannelNotFound(name.to_string()))
    }

    /// Delete `name`, returning its inventory if it existed.
    pub fn remove(&mut self, name: &str) -> Option<InventoryHandle> {
        let removed = self.channels.remove(name);
        if removed.is_some() {
            debug!(channel = %name, "channel removed");
        }
        removed
    }

    /// Whether `name` is registered.
    pub fn exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the store holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.channels.keys().map(String::as_str)
    }

    /// Channels with their inventories, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InventoryHandle)> + '_ {
        self.channels
            .iter()
            .map(|(name, handle)| (name.as_str(), handle))
    }

    /// Drop every channel.
    pub fn clear(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_refuses_to_overwrite() {
        let mut store = ChannelStore::new();
        let seeded = InventorySlotSet::from_resources([(1, 10)]).unwrap();
        store.create_channel("alpha", seeded).unwrap();

        let err = store
            .create_channel("alpha", InventorySlotSet::new())
            .unwrap_err();
        assert!(matches!(err, WormholeError::DuplicateChannel(name) if name == "alpha"));
        assert_eq!(store.get("alpha").unwrap().read().total_of(1), 10);
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut store = ChannelStore::new();
        store.create_channel("Alpha", InventorySlotSet::new()).unwrap();
        assert!(store.exists("Alpha"));
        assert!(!store.exists("alpha"));
        assert!(store.get("alpha").unwrap_err().is_not_found());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = ChannelStore::new();
        store.create_channel("alpha", InventorySlotSet::new()).unwrap();
        assert!(store.remove("alpha").is_some());
        assert!(store.remove("alpha").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn delimiters_are_rejected() {
        for name in ["", "a|b", "a,b", "line\nbreak", "cr\r"] {
            assert!(
                matches!(
                    validate_channel_name(name),
                    Err(WormholeError::InvalidChannelName(..))
                ),
                "{name:?} should be rejected"
            );
        }
        assert!(validate_channel_name("iron ore #2").is_ok());
    }
}
