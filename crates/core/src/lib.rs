#![warn(clippy::all, missing_docs)]

//! Core domain logic for wormhole chests.
//!
//! Chests joined to the same named channel share a single inventory. This
//! crate hosts the inventory models, the channel and membership registries,
//! the linking transitions, the per-world save format, and the service that
//! host engines drive through lifecycle callbacks.

pub mod config;
pub mod error;
pub mod linking;
pub mod models;
pub mod registry;
pub mod save;
pub mod service;

pub use config::AppConfig;
pub use error::{WormholeError, WormholeResult};
pub use linking::{
    link_cost, CoreLedger, LinkOutcome, LinkingEngine, ResourceBalance, UnlinkOutcome,
};
pub use models::{
    ContainerId, InventoryHandle, InventorySlotSet, ResourceKind, ResourceStack, SLOT_COUNT,
};
pub use registry::{ChannelStore, MembershipMap};
pub use save::{SaveManager, WorldEntry};
pub use service::{HostEvents, InventoryRef, WormholeService};
