use std::collections::BTreeMap;

use crate::{
    error::{WormholeError, WormholeResult},
    models::ContainerId,
};

/// Container to channel bindings. A container belongs to at most one channel.
#[derive(Debug, Default)]
pub struct MembershipMap {
    bindings: BTreeMap<ContainerId, String>,
}

impl MembershipMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `container` to `name`, returning the channel it was bound to before.
    ///
    /// The caller decides whether abandoning the previous channel is valid.
    pub fn bind(&mut self, container: ContainerId, name: &str) -> Option<String> {
        self.bindings.insert(container, name.to_string())
    }

    /// Remove the binding for `container`, returning its channel if it had one.
    pub fn unbind(&mut self, container: ContainerId) -> Option<String> {
        self.bindings.remove(&container)
    }

    /// Channel `container` is bound to.
    pub fn channel_of(&self, container: ContainerId) -> WormholeResult<&str> {
        self.bindings
            .get(&container)
            .map(String::as_str)
            .ok_or(WormholeError::NotLinked(container))
    }

    /// Whether `container` has a binding.
    pub fn is_linked(&self, container: ContainerId) -> bool {
        self.bindings.contains_key(&container)
    }

    /// Number of containers bound to `name`.
    pub fn count_members(&self, name: &str) -> usize {
        self.bindings.values().filter(|value| *value == name).count()
    }

    /// Containers bound to `name`, in id order.
    pub fn members_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = ContainerId> + 'a {
        self.bindings
            .iter()
            .filter(move |(_, value)| value.as_str() == name)
            .map(|(container, _)| *container)
    }

    /// Total number of linked containers across every channel.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no container is linked.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings in container id order.
    pub fn iter(&self) -> impl Iterator<Item = (ContainerId, &str)> + '_ {
        self.bindings
            .iter()
            .map(|(container, name)| (*container, name.as_str()))
    }

    /// Drop every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}
