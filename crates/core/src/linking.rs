//! Create, link and unlink transitions over the channel and membership maps.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::{WormholeError, WormholeResult},
    models::{ContainerId, InventoryHandle, InventorySlotSet, ResourceKind},
    registry::{validate_channel_name, ChannelStore, MembershipMap},
};

/// Base price of the first link in a world.
pub const BASE_LINK_COST: f64 = 100.0;
/// Growth factor applied per linked container.
pub const LINK_COST_GROWTH: f64 = 1.05;

/// Price of the next create/link when `linked` containers are already linked.
///
/// `ceil(100 * 1.05^linked)`, saturating at `u32::MAX`.
pub fn link_cost(linked: usize) -> u32 {
    let exponent = i32::try_from(linked).unwrap_or(i32::MAX);
    let cost = (BASE_LINK_COST * LINK_COST_GROWTH.powi(exponent)).ceil();
    if cost >= f64::from(u32::MAX) {
        u32::MAX
    } else {
        cost as u32
    }
}

/// External resource balance charged for links and debited on unlink.
pub trait ResourceBalance {
    /// Deduct `cost`; return `false` when it cannot be afforded.
    fn try_charge(&mut self, cost: u32) -> bool;

    /// Remove resources from the player's holdings.
    fn withdraw(&mut self, kind: ResourceKind, count: u32);
}

/// In-memory balance used by the CLI and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreLedger {
    /// Currency still available.
    pub available: u64,
    /// Currency spent on links so far.
    pub spent: u64,
    /// Resources debited on unlink, per kind.
    pub withdrawn: BTreeMap<ResourceKind, u64>,
}

impl CoreLedger {
    /// Ledger holding `available` currency.
    pub fn with_available(available: u64) -> Self {
        Self {
            available,
            ..Self::default()
        }
    }
}

impl ResourceBalance for CoreLedger {
    fn try_charge(&mut self, cost: u32) -> bool {
        let cost = u64::from(cost);
        if self.available < cost {
            return false;
        }
        self.available -= cost;
        self.spent += cost;
        true
    }

    fn withdraw(&mut self, kind: ResourceKind, count: u32) {
        *self.withdrawn.entry(kind).or_insert(0) += u64::from(count);
    }
}

/// Result of a successful [`LinkingEngine::create_or_link`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LinkOutcome {
    /// A new channel was created from the container's inventory.
    Created {
        /// Amount charged.
        cost: u32,
        /// Previous channel retired because this container was its last member.
        retired: Option<String>,
    },
    /// The container joined an existing channel and its contents were merged in.
    Linked {
        /// Amount charged.
        cost: u32,
        /// Resources that did not fit into the shared inventory.
        overflow: u64,
        /// Previous channel retired because this container was its last member.
        retired: Option<String>,
    },
    /// The container was already a member of the channel; nothing changed.
    AlreadyLinked,
}

/// Result of [`LinkingEngine::unlink`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnlinkOutcome {
    /// The container had no binding.
    NotLinked,
    /// The container left a channel that still has members.
    Detached {
        /// Channel left.
        channel: String,
        /// Remaining members.
        remaining: usize,
    },
    /// The container was the last member and the channel was deleted.
    Retired {
        /// Channel deleted.
        channel: String,
    },
}

/// Sole writer of the channel store and membership map.
#[derive(Debug, Default)]
pub struct LinkingEngine {
    channels: ChannelStore,
    members: MembershipMap,
    free_mode: bool,
}

impl LinkingEngine {
    /// Empty engine; `free_mode` waives link costs.
    pub fn new(free_mode: bool) -> Self {
        Self {
            free_mode,
            ..Self::default()
        }
    }

    /// Engine over already-populated maps.
    ///
    /// Memberships pointing at unknown channels are dropped.
    pub fn from_parts(channels: ChannelStore, mut members: MembershipMap, free_mode: bool) -> Self {
        let dangling: Vec<_> = members
            .iter()
            .filter(|(_, name)| !channels.exists(name))
            .map(|(container, _)| container)
            .collect();
        for container in dangling {
            if let Some(name) = members.unbind(container) {
                warn!(%container, channel = %name, "dropping membership for unknown channel");
            }
        }
        Self {
            channels,
            members,
            free_mode,
        }
    }

    /// Channel store, read-only.
    pub fn channels(&self) -> &ChannelStore {
        &self.channels
    }

    /// Membership map, read-only.
    pub fn members(&self) -> &MembershipMap {
        &self.members
    }

    /// Whether link costs are waived.
    pub fn free_mode(&self) -> bool {
        self.free_mode
    }

    /// Toggle cost waiving.
    pub fn set_free_mode(&mut self, free_mode: bool) {
        self.free_mode = free_mode;
    }

    /// Price of the next create/link in this world.
    pub fn next_cost(&self) -> u32 {
        link_cost(self.members.len())
    }

    /// Join `container` to `channel`, creating the channel when it does not exist.
    ///
    /// `current` is whatever the container holds right now. On create it seeds
    /// the channel; on link it is merged into the shared inventory.
    pub fn create_or_link(
        &mut self,
        container: ContainerId,
        current: &InventorySlotSet,
        channel: &str,
        balance: &mut dyn ResourceBalance,
    ) -> WormholeResult<LinkOutcome> {
        validate_channel_name(channel)?;
        if self.members.channel_of(container).ok() == Some(channel) {
            debug!(%container, %channel, "container already linked");
            return Ok(LinkOutcome::AlreadyLinked);
        }

        let cost = if self.free_mode {
            0
        } else {
            let cost = self.next_cost();
            if !balance.try_charge(cost) {
                return Err(WormholeError::PaymentDeclined { cost });
            }
            cost
        };

        let outcome = match self.channels.get(channel) {
            Ok(shared) => {
                let overflow = shared.write().merge_from(current);
                if overflow > 0 {
                    warn!(%container, %channel, overflow, "shared inventory full, contents lost");
                }
                LinkOutcome::Linked {
                    cost,
                    overflow,
                    retired: None,
                }
            }
            Err(_) => {
                self.channels.create_channel(channel, current.clone())?;
                LinkOutcome::Created {
                    cost,
                    retired: None,
                }
            }
        };

        let retired = self
            .members
            .bind(container, channel)
            .and_then(|previous| self.retire_if_empty(&previous));

        info!(%container, %channel, cost, "container linked");
        Ok(match outcome {
            LinkOutcome::Created { cost, .. } => LinkOutcome::Created { cost, retired },
            LinkOutcome::Linked { cost, overflow, .. } => LinkOutcome::Linked {
                cost,
                overflow,
                retired,
            },
            LinkOutcome::AlreadyLinked => LinkOutcome::AlreadyLinked,
        })
    }

    /// Remove `container` from its channel, retiring the channel if it was the last member.
    ///
    /// While other members remain, the shared contents are withdrawn from `balance`.
    pub fn unlink(
        &mut self,
        container: ContainerId,
        balance: &mut dyn ResourceBalance,
    ) -> UnlinkOutcome {
        let Ok(channel) = self.members.channel_of(container).map(str::to_string) else {
            return UnlinkOutcome::NotLinked;
        };

        if self.members.count_members(&channel) > 1 {
            if let Ok(shared) = self.channels.get(&channel) {
                for stack in shared.read().occupied() {
                    balance.withdraw(stack.kind(), stack.count());
                }
            }
        }

        self.members.unbind(container);
        match self.retire_if_empty(&channel) {
            Some(channel) => {
                info!(%container, %channel, "last member unlinked, channel retired");
                UnlinkOutcome::Retired { channel }
            }
            None => {
                let remaining = self.members.count_members(&channel);
                info!(%container, %channel, remaining, "container unlinked");
                UnlinkOutcome::Detached { channel, remaining }
            }
        }
    }

    /// Inventory the host should use for `container`.
    ///
    /// The channel's shared inventory when linked to an existing channel,
    /// otherwise `local` unchanged.
    pub fn resolve_inventory(
        &self,
        container: ContainerId,
        local: &InventoryHandle,
    ) -> InventoryHandle {
        self.shared_inventory(container)
            .unwrap_or_else(|_| local.clone())
    }

    /// Shared inventory of the channel `container` is bound to.
    pub fn shared_inventory(&self, container: ContainerId) -> WormholeResult<InventoryHandle> {
        let channel = self.members.channel_of(container)?;
        self.channels.get(channel).cloned()
    }

    /// Remove every channel without members, returning their names.
    pub fn prune_empty_channels(&mut self) -> Vec<String> {
        let empty: Vec<String> = self
            .channels
            .names()
            .filter(|name| self.members.count_members(name) == 0)
            .map(str::to_string)
            .collect();
        for name in &empty {
            self.channels.remove(name);
        }
        if !empty.is_empty() {
            info!(count = empty.len(), "pruned channels without members");
        }
        empty
    }

    /// Drop all channels and memberships.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.members.clear();
    }

    fn retire_if_empty(&mut self, channel: &str) -> Option<String> {
        if self.members.count_members(channel) > 0 {
            return None;
        }
        self.channels.remove(channel).map(|_| channel.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceStack;

    const IRON_ORE: ResourceKind = 11;
    const COPPER: ResourceKind = 12;

    fn id(raw: u32) -> ContainerId {
        ContainerId::new(raw).unwrap()
    }

    fn holding(resources: &[(ResourceKind, u32)]) -> InventorySlotSet {
        InventorySlotSet::from_resources(resources.iter().copied()).unwrap()
    }

    fn assert_consistent(engine: &LinkingEngine) {
        for (container, channel) in engine.members().iter() {
            assert!(
                engine.channels().exists(channel),
                "container {container} bound to missing channel {channel}"
            );
        }
    }

    #[test]
    fn pricing_grows_from_one_hundred() {
        assert_eq!(link_cost(0), 100);
        assert_eq!(link_cost(1), 105);
        assert_eq!(link_cost(2), 111);
        assert_eq!(link_cost(3), 116);
        assert_eq!(link_cost(usize::MAX), u32::MAX);

        let mut previous = 0;
        for n in 0..500 {
            let cost = link_cost(n);
            assert!(cost >= previous, "cost({n}) decreased");
            previous = cost;
        }
    }

    #[test]
    fn linking_scenarios_follow_channel_lifecycle() {
        let mut engine = LinkingEngine::new(true);
        let mut ledger = CoreLedger::default();

        // Create "alpha" from container 5.
        let outcome = engine
            .create_or_link(id(5), &holding(&[(IRON_ORE, 10)]), "alpha", &mut ledger)
            .unwrap();
        assert_eq!(
            outcome,
            LinkOutcome::Created {
                cost: 0,
                retired: None
            }
        );
        let alpha = engine.channels().get("alpha").unwrap().clone();
        assert_eq!(alpha.read().contents(), BTreeMap::from([(IRON_ORE, 10)]));
        assert_eq!(engine.members().channel_of(id(5)).unwrap(), "alpha");

        // Container 7 links in with copper.
        let outcome = engine
            .create_or_link(id(7), &holding(&[(COPPER, 3)]), "alpha", &mut ledger)
            .unwrap();
        assert!(matches!(outcome, LinkOutcome::Linked { overflow: 0, .. }));
        assert_eq!(
            alpha.read().contents(),
            BTreeMap::from([(IRON_ORE, 10), (COPPER, 3)])
        );
        assert_eq!(engine.members().channel_of(id(7)).unwrap(), "alpha");
        assert_eq!(engine.members().count_members("alpha"), 2);

        // Unlink 5 while 7 remains.
        assert_eq!(
            engine.unlink(id(5), &mut ledger),
            UnlinkOutcome::Detached {
                channel: "alpha".to_string(),
                remaining: 1
            }
        );
        assert!(!engine.members().is_linked(id(5)));
        assert!(engine.channels().exists("alpha"));
        assert_eq!(engine.members().count_members("alpha"), 1);

        // Unlink the last member.
        assert_eq!(
            engine.unlink(id(7), &mut ledger),
            UnlinkOutcome::Retired {
                channel: "alpha".to_string()
            }
        );
        assert!(engine.members().is_empty());
        assert!(!engine.channels().exists("alpha"));
    }

    #[test]
    fn create_copies_rather_than_aliases_local_inventory() {
        let mut engine = LinkingEngine::new(true);
        let mut local = holding(&[(IRON_ORE, 4)]);
        engine
            .create_or_link(id(1), &local, "alpha", &mut CoreLedger::default())
            .unwrap();

        local.clear();
        let shared = engine.shared_inventory(id(1)).unwrap();
        assert_eq!(shared.read().total_of(IRON_ORE), 4);
    }

    #[test]
    fn declined_payment_changes_nothing() {
        let mut engine = LinkingEngine::new(false);
        let mut broke = CoreLedger::with_available(99);

        let err = engine
            .create_or_link(id(5), &holding(&[(IRON_ORE, 1)]), "alpha", &mut broke)
            .unwrap_err();
        assert!(matches!(err, WormholeError::PaymentDeclined { cost: 100 }));
        assert!(engine.channels().is_empty());
        assert!(engine.members().is_empty());
        assert_eq!(broke.available, 99);
    }

    #[test]
    fn cost_scales_with_total_membership() {
        let mut engine = LinkingEngine::new(false);
        let mut ledger = CoreLedger::with_available(1_000);

        engine
            .create_or_link(id(1), &InventorySlotSet::new(), "alpha", &mut ledger)
            .unwrap();
        let outcome = engine
            .create_or_link(id(2), &InventorySlotSet::new(), "beta", &mut ledger)
            .unwrap();

        assert_eq!(
            outcome,
            LinkOutcome::Created {
                cost: 105,
                retired: None
            }
        );
        assert_eq!(ledger.spent, 205);
        assert_eq!(engine.next_cost(), 111);
    }

    #[test]
    fn relinking_same_channel_is_free_noop() {
        let mut engine = LinkingEngine::new(false);
        let mut ledger = CoreLedger::with_available(500);
        let carried = holding(&[(COPPER, 2)]);

        engine
            .create_or_link(id(3), &carried, "alpha", &mut ledger)
            .unwrap();
        let again = engine
            .create_or_link(id(3), &carried, "alpha", &mut ledger)
            .unwrap();

        assert_eq!(again, LinkOutcome::AlreadyLinked);
        assert_eq!(ledger.spent, 100);
        assert_eq!(
            engine.channels().get("alpha").unwrap().read().total_of(COPPER),
            2
        );
    }

    #[test]
    fn moving_last_member_retires_old_channel() {
        let mut engine = LinkingEngine::new(true);
        let mut ledger = CoreLedger::default();
        engine
            .create_or_link(id(1), &holding(&[(COPPER, 1)]), "alpha", &mut ledger)
            .unwrap();

        let view = engine.shared_inventory(id(1)).unwrap().snapshot();
        let outcome = engine
            .create_or_link(id(1), &view, "beta", &mut ledger)
            .unwrap();

        assert_eq!(
            outcome,
            LinkOutcome::Created {
                cost: 0,
                retired: Some("alpha".to_string())
            }
        );
        assert!(!engine.channels().exists("alpha"));
        assert_eq!(engine.members().channel_of(id(1)).unwrap(), "beta");
        assert_consistent(&engine);
    }

    #[test]
    fn unlink_withdraws_shared_contents_while_members_remain() {
        let mut engine = LinkingEngine::new(true);
        let mut ledger = CoreLedger::default();
        engine
            .create_or_link(id(1), &holding(&[(IRON_ORE, 6)]), "alpha", &mut ledger)
            .unwrap();
        engine
            .create_or_link(id(2), &holding(&[(COPPER, 2)]), "alpha", &mut ledger)
            .unwrap();

        engine.unlink(id(1), &mut ledger);
        assert_eq!(
            ledger.withdrawn,
            BTreeMap::from([(IRON_ORE, 6), (COPPER, 2)])
        );

        ledger.withdrawn.clear();
        engine.unlink(id(2), &mut ledger);
        assert!(ledger.withdrawn.is_empty());
    }

    #[test]
    fn unlink_unknown_container_is_noop() {
        let mut engine = LinkingEngine::new(true);
        assert_eq!(
            engine.unlink(id(42), &mut CoreLedger::default()),
            UnlinkOutcome::NotLinked
        );
    }

    #[test]
    fn resolve_substitutes_live_shared_inventory() {
        let mut engine = LinkingEngine::new(true);
        let mut ledger = CoreLedger::default();
        engine
            .create_or_link(id(1), &InventorySlotSet::new(), "alpha", &mut ledger)
            .unwrap();
        engine
            .create_or_link(id(2), &InventorySlotSet::new(), "alpha", &mut ledger)
            .unwrap();

        let local = InventoryHandle::default();
        let first = engine.resolve_inventory(id(1), &local);
        let second = engine.resolve_inventory(id(2), &local);
        first.write().add_resources(COPPER, 9);

        assert!(first.ptr_eq(&second));
        assert_eq!(second.read().total_of(COPPER), 9);

        let unlinked = engine.resolve_inventory(id(3), &local);
        assert!(unlinked.ptr_eq(&local));
    }

    #[test]
    fn invariants_hold_across_mixed_sequences() {
        let mut engine = LinkingEngine::new(true);
        let mut ledger = CoreLedger::default();
        let channels = ["alpha", "beta", "gamma"];

        for step in 0u32..60 {
            let container = id(step % 7 + 1);
            if step % 3 == 2 {
                engine.unlink(container, &mut ledger);
            } else {
                let channel = channels[(step as usize * 5) % channels.len()];
                let carried = holding(&[(step % 4, step + 1)]);
                engine
                    .create_or_link(container, &carried, channel, &mut ledger)
                    .unwrap();
            }
            assert_consistent(&engine);
            for name in engine.channels().names() {
                assert!(engine.members().count_members(name) > 0, "{name} has no members");
            }
        }
    }

    #[test]
    fn from_parts_drops_dangling_memberships() {
        let mut channels = ChannelStore::new();
        channels
            .create_channel("alpha", InventorySlotSet::new())
            .unwrap();
        let mut members = MembershipMap::new();
        members.bind(id(1), "alpha");
        members.bind(id(2), "ghost");

        let engine = LinkingEngine::from_parts(channels, members, false);
        assert_eq!(engine.members().len(), 1);
        assert_consistent(&engine);
    }

    #[test]
    fn prune_removes_only_memberless_channels() {
        let mut channels = ChannelStore::new();
        let mut seeded = InventorySlotSet::new();
        seeded.push_stack(ResourceStack::new(1, 1).unwrap()).unwrap();
        channels.create_channel("kept", seeded).unwrap();
        channels
            .create_channel("orphan", InventorySlotSet::new())
            .unwrap();
        let mut members = MembershipMap::new();
        members.bind(id(1), "kept");

        let mut engine = LinkingEngine::from_parts(channels, members, false);
        assert_eq!(engine.prune_empty_channels(), vec!["orphan".to_string()]);
        assert!(engine.channels().exists("kept"));
        assert!(engine.prune_empty_channels().is_empty());
    }

    #[test]
    fn invalid_channel_name_is_rejected_before_charging() {
        let mut engine = LinkingEngine::new(false);
        let mut ledger = CoreLedger::with_available(1_000);
        let err = engine
            .create_or_link(id(1), &InventorySlotSet::new(), "a|b", &mut ledger)
            .unwrap_err();
        assert!(matches!(err, WormholeError::InvalidChannelName(..)));
        assert_eq!(ledger.spent, 0);
    }
}
