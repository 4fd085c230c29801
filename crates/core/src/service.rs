//! Process-wide owner of the linking state and the host event boundary.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{anyhow, Result};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, error, info};

use crate::{
    config::AppConfig,
    linking::{LinkOutcome, LinkingEngine, ResourceBalance, UnlinkOutcome},
    models::{ContainerId, InventoryHandle, InventorySlotSet},
    save::SaveManager,
};

/// Inventory a host should use for a container that was just opened.
#[derive(Debug, Clone)]
pub enum InventoryRef {
    /// The container is linked; use the channel's shared inventory.
    Shared {
        /// Channel the container belongs to.
        channel: String,
        /// Live shared inventory.
        inventory: InventoryHandle,
    },
    /// Not linked; the container keeps using its own inventory.
    Local,
}

/// Callbacks the host engine fires into the wormhole subsystem.
///
/// Implementations never fail outward: a fault inside a callback is logged
/// and the container falls back to ordinary, unlinked behaviour.
pub trait HostEvents {
    /// A world finished loading.
    fn on_world_loaded(&self, world: &str);
    /// A world is being written to disk.
    fn on_world_saving(&self, world: &str);
    /// A container inventory is about to be shown or accessed.
    fn on_container_opened(&self, container: u32) -> InventoryRef;
    /// A container was removed from the world.
    fn on_container_destroyed(&self, container: u32);
}

/// Owns the channel store and membership map for the running process.
pub struct WormholeService {
    engine: RwLock<LinkingEngine>,
    balance: Mutex<Box<dyn ResourceBalance + Send>>,
    saves: SaveManager,
    enabled: AtomicBool,
}

impl WormholeService {
    /// Build a service from configuration, charging links against `balance`.
    pub fn new(config: &AppConfig, balance: Box<dyn ResourceBalance + Send>) -> Self {
        Self::with_saves(SaveManager::new(config.save_root()), config, balance)
    }

    /// Build a service over an explicit save manager.
    pub fn with_saves(
        saves: SaveManager,
        config: &AppConfig,
        balance: Box<dyn ResourceBalance + Send>,
    ) -> Self {
        Self {
            engine: RwLock::new(LinkingEngine::new(config.free_mode)),
            balance: Mutex::new(balance),
            saves,
            enabled: AtomicBool::new(config.enabled),
        }
    }

    /// Whether the unlock is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Toggle the unlock gate, typically once the host's research state loads.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(enabled, "Wormhole unlock state updated");
    }

    /// Save manager used for persistence.
    pub fn saves(&self) -> &SaveManager {
        &self.saves
    }

    /// Read access to the current linking state.
    pub fn engine(&self) -> RwLockReadGuard<'_, LinkingEngine> {
        self.engine.read()
    }

    /// Replace the in-memory state with the saved state of `world`.
    ///
    /// The new state is decoded completely before it is published. When the
    /// load fails the state is left empty, never holding another world's data.
    pub fn init(&self, world: &str) -> Result<()> {
        let free_mode = self.engine.read().free_mode();
        match self.saves.load(world) {
            Ok(loaded) => {
                *self.engine.write() = loaded.into_engine(free_mode);
                Ok(())
            }
            Err(err) => {
                *self.engine.write() = LinkingEngine::new(free_mode);
                Err(err)
            }
        }
    }

    /// Drop all in-memory channels and memberships.
    pub fn shutdown(&self) {
        self.engine.write().clear();
        debug!("Wormhole state cleared");
    }

    /// Persist the current state for `world`.
    pub fn save(&self, world: &str) -> Result<()> {
        let engine = self.engine.read();
        self.saves.save(world, &engine)?;
        Ok(())
    }

    /// Join `container` to `channel`; `current` is what the container holds now.
    pub fn create_or_link(
        &self,
        container: ContainerId,
        current: &InventorySlotSet,
        channel: &str,
    ) -> Result<LinkOutcome> {
        let mut balance = self.balance.lock();
        let outcome = self
            .engine
            .write()
            .create_or_link(container, current, channel, &mut **balance)?;
        Ok(outcome)
    }

    /// Remove `container` from its channel.
    pub fn unlink(&self, container: ContainerId) -> UnlinkOutcome {
        let mut balance = self.balance.lock();
        self.engine.write().unlink(container, &mut **balance)
    }

    /// Shared inventory for linked containers, `local` otherwise.
    pub fn resolve_inventory(
        &self,
        container: ContainerId,
        local: &InventoryHandle,
    ) -> InventoryHandle {
        self.engine.read().resolve_inventory(container, local)
    }

    /// Price of the next create/link.
    pub fn next_cost(&self) -> u32 {
        self.engine.read().next_cost()
    }

    /// Remove channels without members.
    pub fn prune_empty_channels(&self) -> Vec<String> {
        self.engine.write().prune_empty_channels()
    }

    fn opened(&self, container: u32) -> Result<InventoryRef> {
        let Ok(container) = ContainerId::new(container) else {
            return Ok(InventoryRef::Local);
        };
        let engine = self.engine.read();
        let Ok(channel) = engine.members().channel_of(container) else {
            return Ok(InventoryRef::Local);
        };
        let inventory = engine.channels().get(channel)?.clone();
        debug!(%container, %channel, "substituting shared inventory");
        Ok(InventoryRef::Shared {
            channel: channel.to_string(),
            inventory,
        })
    }
}

impl HostEvents for WormholeService {
    fn on_world_loaded(&self, world: &str) {
        if !self.is_enabled() {
            info!("Wormhole unlock not active, skipping data load");
            return;
        }
        guarded("world loaded", (), || self.init(world));
    }

    fn on_world_saving(&self, world: &str) {
        if !self.is_enabled() {
            return;
        }
        guarded("world saving", (), || self.save(world));
    }

    fn on_container_opened(&self, container: u32) -> InventoryRef {
        if !self.is_enabled() {
            return InventoryRef::Local;
        }
        guarded("container opened", InventoryRef::Local, || {
            self.opened(container)
        })
    }

    fn on_container_destroyed(&self, container: u32) {
        if !self.is_enabled() {
            return;
        }
        guarded("container destroyed", (), || {
            let container = ContainerId::new(container)?;
            self.unlink(container);
            Ok(())
        });
    }
}

/// Run a host callback, turning errors and panics into a logged fallback.
fn guarded<T>(event: &str, fallback: T, callback: impl FnOnce() -> Result<T>) -> T {
    let result = catch_unwind(AssertUnwindSafe(callback)).unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|value| value.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(anyhow!("panicked: {message}"))
    });
    match result {
        Ok(value) => value,
        Err(err) => {
            error!(event, "Wormhole handler failed: {err:#}");
            fallback
        }
    }
}
