//! Shared domain models.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::{WormholeError, WormholeResult};

/// Number of slots in every chest inventory.
pub const SLOT_COUNT: usize = 56;

/// Identifier of a resource kind as assigned by the host.
pub type ResourceKind = u32;

/// Stable, non-zero identity of a container in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ContainerId(u32);

impl ContainerId {
    /// Wrap a raw id, rejecting the reserved value `0`.
    pub fn new(raw: u32) -> WormholeResult<Self> {
        if raw == 0 {
            return Err(WormholeError::InvalidContainer);
        }
        Ok(Self(raw))
    }

    /// Raw numeric id.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ContainerId {
    type Error = WormholeError;

    fn try_from(value: u32) -> WormholeResult<Self> {
        Self::new(value)
    }
}

impl From<ContainerId> for u32 {
    fn from(value: ContainerId) -> Self {
        value.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = WormholeError;

    fn from_str(s: &str) -> WormholeResult<Self> {
        let raw = s
            .trim()
            .parse::<u32>()
            .map_err(|err| WormholeError::malformed(s, format!("container id: {err}")))?;
        Self::new(raw)
    }
}

/// An occupied slot: a resource kind with a positive count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceStack {
    kind: ResourceKind,
    count: u32,
}

impl ResourceStack {
    /// Build a stack, returning `None` for an empty count.
    pub fn new(kind: ResourceKind, count: u32) -> Option<Self> {
        (count > 0).then_some(Self { kind, count })
    }

    /// Resource kind held by the slot.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Number of resources in the slot, always positive.
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Fixed-capacity inventory of [`SLOT_COUNT`] slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventorySlotSet {
    slots: Vec<Option<ResourceStack>>,
}

impl Default for InventorySlotSet {
    fn default() -> Self {
        Self::new()
    }
}

impl InventorySlotSet {
    /// Empty inventory with every slot vacant.
    pub fn new() -> Self {
        Self {
            slots: vec![None; SLOT_COUNT],
        }
    }

    /// Build an inventory by adding each `(kind, count)` pair in order.
    ///
    /// Pairs with a zero count are ignored. Fails if the contents do not fit.
    pub fn from_resources(
        resources: impl IntoIterator<Item = (ResourceKind, u32)>,
    ) -> WormholeResult<Self> {
        let mut inventory = Self::new();
        for (kind, count) in resources {
            if inventory.add_resources(kind, count) > 0 {
                return Err(WormholeError::InventoryFull);
            }
        }
        Ok(inventory)
    }

    /// Slot at `index`, `None` when vacant or out of range.
    pub fn slot(&self, index: usize) -> Option<&ResourceStack> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Iterate over occupied slots in slot order.
    pub fn occupied(&self) -> impl Iterator<Item = &ResourceStack> + '_ {
        self.slots.iter().flatten()
    }

    /// Number of occupied slots.
    pub fn occupied_len(&self) -> usize {
        self.occupied().count()
    }

    /// Whether no slot holds anything.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Total count per resource kind, ignoring slot layout.
    pub fn contents(&self) -> BTreeMap<ResourceKind, u64> {
        let mut totals = BTreeMap::new();
        for stack in self.occupied() {
            *totals.entry(stack.kind).or_insert(0) += u64::from(stack.count);
        }
        totals
    }

    /// Total count of a single resource kind.
    pub fn total_of(&self, kind: ResourceKind) -> u64 {
        self.occupied()
            .filter(|stack| stack.kind == kind)
            .map(|stack| u64::from(stack.count))
            .sum()
    }

    /// Add resources, topping up slots of the same kind before filling vacant ones.
    ///
    /// Returns the amount that did not fit.
    pub fn add_resources(&mut self, kind: ResourceKind, count: u32) -> u32 {
        let mut remaining = count;
        for stack in self.slots.iter_mut().flatten() {
            if remaining == 0 {
                break;
            }
            if stack.kind == kind {
                let room = u32::MAX - stack.count;
                let moved = room.min(remaining);
                stack.count += moved;
                remaining -= moved;
            }
        }
        for slot in self.slots.iter_mut() {
            if remaining == 0 {
                break;
            }
            if slot.is_none() {
                *slot = Some(ResourceStack {
                    kind,
                    count: remaining,
                });
                remaining = 0;
            }
        }
        remaining
    }

    /// Remove up to `count` resources of `kind`, returning how many were taken.
    pub fn remove_resources(&mut self, kind: ResourceKind, count: u32) -> u32 {
        let mut removed = 0;
        for slot in self.slots.iter_mut().rev() {
            if removed == count {
                break;
            }
            let Some(stack) = slot else { continue };
            if stack.kind != kind {
                continue;
            }
            let taken = stack.count.min(count - removed);
            stack.count -= taken;
            removed += taken;
            if stack.count == 0 {
                *slot = None;
            }
        }
        removed
    }

    /// Additively merge every occupied slot of `other`, returning the total overflow.
    pub fn merge_from(&mut self, other: &InventorySlotSet) -> u64 {
        other
            .occupied()
            .map(|stack| u64::from(self.add_resources(stack.kind, stack.count)))
            .sum()
    }

    /// Place a stack in the first vacant slot without merging.
    pub fn push_stack(&mut self, stack: ResourceStack) -> WormholeResult<usize> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(WormholeError::InventoryFull)?;
        self.slots[index] = Some(stack);
        Ok(index)
    }

    /// Vacate every slot.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    /// Copy with occupied slots moved to the front, preserving their order.
    pub fn compacted(&self) -> Self {
        let mut slots: Vec<_> = self.slots.iter().flatten().copied().map(Some).collect();
        slots.resize(SLOT_COUNT, None);
        Self { slots }
    }
}

/// Live, shared handle to an inventory.
///
/// Every clone points at the same slots, so a write through one container's
/// handle is visible to all containers resolving the same channel.
#[derive(Debug, Clone, Default)]
pub struct InventoryHandle(Arc<RwLock<InventorySlotSet>>);

impl InventoryHandle {
    /// Wrap an owned inventory.
    pub fn new(inventory: InventorySlotSet) -> Self {
        Self(Arc::new(RwLock::new(inventory)))
    }

    /// Shared read access.
    pub fn read(&self) -> RwLockReadGuard<'_, InventorySlotSet> {
        self.0.read()
    }

    /// Exclusive write access.
    pub fn write(&self) -> RwLockWriteGuard<'_, InventorySlotSet> {
        self.0.write()
    }

    /// Owned copy of the current contents.
    pub fn snapshot(&self) -> InventorySlotSet {
        self.0.read().clone()
    }

    /// Whether both handles refer to the same inventory.
    pub fn ptr_eq(&self, other: &InventoryHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<InventorySlotSet> for InventoryHandle {
    fn from(value: InventorySlotSet) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_zero_is_rejected() {
        assert!(matches!(
            ContainerId::new(0),
            Err(WormholeError::InvalidContainer)
        ));
        assert!(matches!(
            "0".parse::<ContainerId>(),
            Err(WormholeError::InvalidContainer)
        ));
        assert_eq!("42".parse::<ContainerId>().unwrap().get(), 42);
        assert!("-3".parse::<ContainerId>().is_err());
    }

    #[test]
    fn stacks_never_hold_zero() {
        assert!(ResourceStack::new(1, 0).is_none());
        assert_eq!(ResourceStack::new(1, 4).map(|s| s.count()), Some(4));
    }

    #[test]
    fn add_tops_up_matching_slot_first() {
        let mut inventory = InventorySlotSet::new();
        assert_eq!(inventory.add_resources(7, 5), 0);
        assert_eq!(inventory.add_resources(9, 1), 0);
        assert_eq!(inventory.add_resources(7, 3), 0);

        assert_eq!(inventory.occupied_len(), 2);
        assert_eq!(inventory.slot(0), ResourceStack::new(7, 8).as_ref());
        assert_eq!(inventory.slot(1), ResourceStack::new(9, 1).as_ref());
    }

    #[test]
    fn add_reports_overflow_when_full() {
        let mut inventory = InventorySlotSet::from_resources((1..=56).map(|kind| (kind, 1))).unwrap();
        assert_eq!(inventory.add_resources(99, 10), 10);
        assert_eq!(inventory.add_resources(3, 10), 0);
        assert_eq!(inventory.total_of(3), 11);
    }

    #[test]
    fn remove_clears_emptied_slots() {
        let mut inventory = InventorySlotSet::new();
        inventory.push_stack(ResourceStack::new(4, 2).unwrap()).unwrap();
        inventory.push_stack(ResourceStack::new(4, 3).unwrap()).unwrap();

        assert_eq!(inventory.remove_resources(4, 4), 4);
        assert_eq!(inventory.total_of(4), 1);
        assert_eq!(inventory.occupied_len(), 1);
        assert_eq!(inventory.remove_resources(4, 10), 1);
        assert!(inventory.is_empty());
    }

    #[test]
    fn merge_is_additive() {
        let mut shared = InventorySlotSet::from_resources([(1, 10)]).unwrap();
        let carried = InventorySlotSet::from_resources([(2, 3), (1, 1)]).unwrap();

        assert_eq!(shared.merge_from(&carried), 0);
        assert_eq!(shared.contents(), BTreeMap::from([(1, 11), (2, 3)]));
    }

    #[test]
    fn compacted_moves_stacks_forward() {
        let mut inventory = InventorySlotSet::new();
        inventory.add_resources(1, 1);
        inventory.add_resources(2, 1);
        inventory.remove_resources(1, 1);

        let compacted = inventory.compacted();
        assert_eq!(compacted.slot(0), ResourceStack::new(2, 1).as_ref());
        assert!(compacted.slot(1).is_none());
    }

    #[test]
    fn handles_share_state() {
        let handle = InventoryHandle::new(InventorySlotSet::new());
        let view = handle.clone();
        handle.write().add_resources(5, 2);

        assert!(handle.ptr_eq(&view));
        assert_eq!(view.read().total_of(5), 2);
        assert!(!handle.ptr_eq(&InventoryHandle::default()));
    }
}
