use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;
use wormhole_core::{
    config, AppConfig, ContainerId, CoreLedger, InventorySlotSet, LinkOutcome, LinkingEngine,
    ResourceStack, SaveManager, UnlinkOutcome,
};

/// Parse a `KIND=COUNT` resource argument.
pub fn parse_item(value: &str) -> Result<(u32, u32), String> {
    let (kind, count) = value
        .split_once('=')
        .ok_or_else(|| format!("expected KIND=COUNT, got {value:?}"))?;
    let kind = kind
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("invalid resource kind {kind:?}: {err}"))?;
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("invalid count {count:?}: {err}"))?;
    Ok((kind, count))
}

#[derive(Debug, Serialize)]
struct ChannelView {
    name: String,
    members: Vec<ContainerId>,
    stacks: Vec<ResourceStack>,
}

#[derive(Debug, Serialize)]
struct MemberView<'a> {
    container: ContainerId,
    channel: &'a str,
}

#[derive(Debug, Serialize)]
struct LinkReport<'a> {
    container: ContainerId,
    channel: &'a str,
    #[serde(flatten)]
    outcome: LinkOutcome,
    next_cost: u32,
}

#[derive(Debug, Serialize)]
struct UnlinkReport {
    container: ContainerId,
    #[serde(flatten)]
    outcome: UnlinkOutcome,
    withdrawn: BTreeMap<u32, u64>,
}

/// Commands operating on the save root described by the config.
pub struct Workspace {
    config: AppConfig,
    saves: SaveManager,
    json: bool,
}

impl Workspace {
    pub fn new(config: AppConfig, json: bool) -> Self {
        let saves = SaveManager::new(config.save_root());
        Self {
            config,
            saves,
            json,
        }
    }

    pub fn worlds(&self) -> Result<()> {
        let worlds = self.saves.worlds()?;
        if self.json {
            return print_json(&worlds);
        }
        if worlds.is_empty() {
            println!("No worlds under {}", self.saves.root().display());
        }
        for world in worlds {
            println!(
                "{:<32} {}",
                world.name,
                world.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        Ok(())
    }

    pub fn channels(&self, world: &str) -> Result<()> {
        let engine = self.load(world)?;
        let views: Vec<ChannelView> = engine
            .channels()
            .iter()
            .map(|(name, inventory)| ChannelView {
                name: name.to_string(),
                members: engine.members().members_of(name).collect(),
                stacks: inventory.read().occupied().copied().collect(),
            })
            .collect();
        if self.json {
            return print_json(&views);
        }
        if views.is_empty() {
            println!("No channels in {world}");
        }
        for view in views {
            let members: Vec<String> = view.members.iter().map(ToString::to_string).collect();
            println!("{} [{}]", view.name, members.join(", "));
            for stack in view.stacks {
                println!("  {:>6} x{}", stack.kind(), stack.count());
            }
        }
        Ok(())
    }

    pub fn members(&self, world: &str) -> Result<()> {
        let engine = self.load(world)?;
        let views: Vec<MemberView> = engine
            .members()
            .iter()
            .map(|(container, channel)| MemberView { container, channel })
            .collect();
        if self.json {
            return print_json(&views);
        }
        for view in views {
            println!("{:>10} -> {}", view.container, view.channel);
        }
        Ok(())
    }

    pub fn cost(&self, world: &str) -> Result<()> {
        let engine = self.load(world)?;
        let cost = if engine.free_mode() {
            0
        } else {
            engine.next_cost()
        };
        if self.json {
            return print_json(&serde_json::json!({
                "linked": engine.members().len(),
                "cost": cost,
                "free_mode": engine.free_mode(),
            }));
        }
        println!("{cost}");
        Ok(())
    }

    pub fn link(
        &self,
        world: &str,
        container: u32,
        channel: &str,
        items: &[(u32, u32)],
        budget: Option<u64>,
    ) -> Result<()> {
        let container = ContainerId::new(container)?;
        let carried = InventorySlotSet::from_resources(items.iter().copied())
            .context("items do not fit in one chest")?;
        let mut ledger = CoreLedger::with_available(budget.unwrap_or(u64::MAX));

        let mut engine = self.load(world)?;
        let (current, ignored) = current_contents(&engine, container, carried);
        if ignored {
            warn!(
                %container,
                "Container is already linked; ignoring --item and using its shared contents"
            );
        }
        let outcome = engine.create_or_link(container, &current, channel, &mut ledger)?;
        self.saves.save(world, &engine)?;

        let report = LinkReport {
            container,
            channel,
            outcome,
            next_cost: engine.next_cost(),
        };
        if self.json {
            return print_json(&report);
        }
        match report.outcome {
            LinkOutcome::Created { cost, .. } => {
                println!("Created {channel} from container {container} (cost {cost})")
            }
            LinkOutcome::Linked { cost, overflow, .. } => {
                println!("Linked container {container} to {channel} (cost {cost})");
                if overflow > 0 {
                    println!("{overflow} resources did not fit and were lost");
                }
            }
            LinkOutcome::AlreadyLinked => {
                println!("Container {container} already linked to {channel}")
            }
        }
        Ok(())
    }

    pub fn unlink(&self, world: &str, container: u32) -> Result<()> {
        let container = ContainerId::new(container)?;
        let mut ledger = CoreLedger::default();
        let mut engine = self.load(world)?;
        let outcome = engine.unlink(container, &mut ledger);
        if outcome != UnlinkOutcome::NotLinked {
            self.saves.save(world, &engine)?;
        }

        let report = UnlinkReport {
            container,
            outcome,
            withdrawn: ledger.withdrawn,
        };
        if self.json {
            return print_json(&report);
        }
        match &report.outcome {
            UnlinkOutcome::NotLinked => println!("Container {container} is not linked"),
            UnlinkOutcome::Detached { channel, remaining } => {
                println!("Unlinked {container} from {channel}, {remaining} member(s) remain")
            }
            UnlinkOutcome::Retired { channel } => {
                println!("Unlinked {container}; {channel} had no members left and was removed")
            }
        }
        for (kind, count) in &report.withdrawn {
            println!("  withdrew {kind} x{count}");
        }
        Ok(())
    }

    pub fn prune(&self, world: &str) -> Result<()> {
        let mut engine = self.load(world)?;
        let pruned = engine.prune_empty_channels();
        if !pruned.is_empty() {
            self.saves.save(world, &engine)?;
        }
        if self.json {
            return print_json(&pruned);
        }
        for name in pruned {
            println!("Removed {name}");
        }
        Ok(())
    }

    pub fn show_config(&self) -> Result<()> {
        if self.json {
            return print_json(&self.config);
        }
        println!("config file: {}", config::config_path().display());
        println!("save root:   {}", self.config.save_root().display());
        println!("free mode:   {}", self.config.free_mode);
        println!("enabled:     {}", self.config.enabled);
        Ok(())
    }

    fn load(&self, world: &str) -> Result<LinkingEngine> {
        let loaded = self
            .saves
            .load(world)
            .with_context(|| format!("failed to load world {world}"))?;
        Ok(loaded.into_engine(self.config.free_mode))
    }
}

/// What `container` holds right now, and whether `carried` was discarded.
///
/// A linked container shows its channel's shared inventory, so carried items
/// only count for unlinked containers.
fn current_contents(
    engine: &LinkingEngine,
    container: ContainerId,
    carried: InventorySlotSet,
) -> (InventorySlotSet, bool) {
    match engine.shared_inventory(container) {
        Ok(shared) => (shared.snapshot(), !carried.is_empty()),
        Err(_) => (carried, false),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_item_arguments() {
        assert_eq!(parse_item("12=40"), Ok((12, 40)));
        assert_eq!(parse_item(" 3 = 1 "), Ok((3, 1)));
        assert!(parse_item("12").is_err());
        assert!(parse_item("x=1").is_err());
        assert!(parse_item("1=-1").is_err());
    }

    #[test]
    fn linked_containers_ignore_carried_items() -> Result<()> {
        let mut engine = LinkingEngine::new(true);
        let mut ledger = CoreLedger::default();
        let first = ContainerId::new(1)?;
        let stocked = InventorySlotSet::from_resources([(4, 2)])?;
        engine.create_or_link(first, &stocked, "alpha", &mut ledger)?;

        let carried = InventorySlotSet::from_resources([(9, 1)])?;
        let (current, ignored) = current_contents(&engine, first, carried.clone());
        assert!(ignored);
        assert_eq!(current, stocked);

        let (current, ignored) = current_contents(&engine, ContainerId::new(2)?, carried.clone());
        assert!(!ignored);
        assert_eq!(current, carried);

        let (_, ignored) = current_contents(&engine, first, InventorySlotSet::new());
        assert!(!ignored);
        Ok(())
    }
}
