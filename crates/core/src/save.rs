//! Per-world persistence of channels and memberships.
//!
//! Each world gets a directory holding two line-oriented files:
//! `Wormholes.txt` (`<channel>(|<kind>,<count>)*`, an empty channel written as
//! `<channel>|null,null`) and `ChestChannelMap.txt` (`<container>|<channel>`).

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{
    error::{WormholeError, WormholeResult},
    linking::LinkingEngine,
    models::{ContainerId, InventorySlotSet, ResourceKind, ResourceStack},
    registry::{validate_channel_name, ChannelStore, MembershipMap},
};

/// Directory name under the user's data directory used for save files.
pub const DEFAULT_SAVE_DIR: &str = "WormholeChests";
/// File holding one line per channel.
pub const CHANNELS_FILE: &str = "Wormholes.txt";
/// File holding one line per container binding.
pub const MEMBERSHIP_FILE: &str = "ChestChannelMap.txt";

const FIELD_SEPARATOR: char = '|';
const PAIR_SEPARATOR: char = ',';
const EMPTY_SENTINEL: &str = "null";

/// One line of the channels file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Channel name.
    pub name: String,
    /// Occupied slots in slot order.
    pub stacks: Vec<ResourceStack>,
}

impl ChannelRecord {
    /// Capture a channel's current contents.
    pub fn capture(name: &str, inventory: &InventorySlotSet) -> Self {
        Self {
            name: name.to_string(),
            stacks: inventory.occupied().copied().collect(),
        }
    }

    /// Rebuild the inventory, placing stacks slot by slot.
    pub fn inventory(&self) -> WormholeResult<InventorySlotSet> {
        let mut inventory = InventorySlotSet::new();
        for stack in &self.stacks {
            inventory.push_stack(*stack)?;
        }
        Ok(inventory)
    }
}

impl fmt::Display for ChannelRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.stacks.is_empty() {
            return write!(
                f,
                "{FIELD_SEPARATOR}{EMPTY_SENTINEL}{PAIR_SEPARATOR}{EMPTY_SENTINEL}"
            );
        }
        for stack in &self.stacks {
            write!(
                f,
                "{FIELD_SEPARATOR}{}{PAIR_SEPARATOR}{}",
                stack.kind(),
                stack.count()
            )?;
        }
        Ok(())
    }
}

impl FromStr for ChannelRecord {
    type Err = WormholeError;

    fn from_str(line: &str) -> WormholeResult<Self> {
        let mut fields = line.split(FIELD_SEPARATOR);
        let name = fields.next().unwrap_or_default();
        validate_channel_name(name)
            .map_err(|err| WormholeError::malformed(line, err.to_string()))?;

        let mut stacks = Vec::new();
        for field in fields {
            let (kind, count) = field.split_once(PAIR_SEPARATOR).ok_or_else(|| {
                WormholeError::malformed(line, format!("field {field:?} is not a pair"))
            })?;
            if kind == EMPTY_SENTINEL && count == EMPTY_SENTINEL {
                continue;
            }
            let kind = kind.parse::<ResourceKind>().map_err(|err| {
                WormholeError::malformed(line, format!("resource kind {kind:?}: {err}"))
            })?;
            let count = count.parse::<u32>().map_err(|err| {
                WormholeError::malformed(line, format!("count {count:?}: {err}"))
            })?;
            let stack = ResourceStack::new(kind, count)
                .ok_or_else(|| WormholeError::malformed(line, "stack count must be positive"))?;
            stacks.push(stack);
        }

        Ok(Self {
            name: name.to_string(),
            stacks,
        })
    }
}

/// One line of the membership file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRecord {
    /// Bound container.
    pub container: ContainerId,
    /// Channel the container belongs to.
    pub channel: String,
}

impl fmt::Display for MembershipRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{FIELD_SEPARATOR}{}", self.container, self.channel)
    }
}

impl FromStr for MembershipRecord {
    type Err = WormholeError;

    fn from_str(line: &str) -> WormholeResult<Self> {
        let (container, channel) = line
            .split_once(FIELD_SEPARATOR)
            .ok_or_else(|| WormholeError::malformed(line, "missing '|' separator"))?;
        let container = container
            .parse::<ContainerId>()
            .map_err(|err| WormholeError::malformed(line, err.to_string()))?;
        validate_channel_name(channel)
            .map_err(|err| WormholeError::malformed(line, err.to_string()))?;
        Ok(Self {
            container,
            channel: channel.to_string(),
        })
    }
}

/// Maps decoded from a world's save files.
#[derive(Debug, Default)]
pub struct LoadedWorld {
    /// Channels, first occurrence of each name.
    pub channels: ChannelStore,
    /// Bindings, first occurrence of each container.
    pub members: MembershipMap,
    /// Number of lines that were skipped.
    pub skipped: usize,
}

impl LoadedWorld {
    /// Build an engine over the decoded maps.
    pub fn into_engine(self, free_mode: bool) -> LinkingEngine {
        LinkingEngine::from_parts(self.channels, self.members, free_mode)
    }
}

/// Split a file body into non-empty lines, decoding each one on its own.
///
/// Accepts `\n` and `\r\n` endings. A line that is not valid UTF-8 is
/// returned as a malformed record.
fn text_lines(content: &[u8]) -> impl Iterator<Item = WormholeResult<&str>> + '_ {
    content
        .split(|byte| *byte == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| {
            std::str::from_utf8(line).map_err(|err| {
                WormholeError::malformed(&String::from_utf8_lossy(line), err.to_string())
            })
        })
}

/// Decode a channels file body, skipping bad lines.
pub fn decode_channels(content: &[u8], store: &mut ChannelStore) -> usize {
    let mut skipped = 0;
    for line in text_lines(content) {
        let inserted = line.and_then(|line| {
            let record = line.parse::<ChannelRecord>()?;
            let inventory = record
                .inventory()
                .map_err(|err| WormholeError::malformed(line, err.to_string()))?;
            store.create_channel(&record.name, inventory).map(|_| ())
        });
        if let Err(err) = inserted {
            warn!("Skipping channel line: {err}");
            skipped += 1;
        }
    }
    skipped
}

/// Decode a membership file body, skipping bad lines and repeated containers.
pub fn decode_memberships(content: &[u8], members: &mut MembershipMap) -> usize {
    let mut skipped = 0;
    for line in text_lines(content) {
        match line.and_then(str::parse::<MembershipRecord>) {
            Ok(record) if members.is_linked(record.container) => {
                warn!(
                    container = %record.container,
                    channel = %record.channel,
                    "Ignoring duplicate binding"
                );
                skipped += 1;
            }
            Ok(record) => {
                members.bind(record.container, &record.channel);
            }
            Err(err) => {
                warn!("Skipping membership line: {err}");
                skipped += 1;
            }
        }
    }
    skipped
}

/// Encode every channel, one line each.
pub fn encode_channels(channels: &ChannelStore) -> String {
    channels
        .iter()
        .map(|(name, inventory)| format!("{}\n", ChannelRecord::capture(name, &inventory.read())))
        .collect()
}

/// Encode every binding, one line each.
pub fn encode_memberships(members: &MembershipMap) -> String {
    members
        .iter()
        .map(|(container, channel)| {
            let record = MembershipRecord {
                container,
                channel: channel.to_string(),
            };
            format!("{record}\n")
        })
        .collect()
}

/// Metadata describing a world with saved channel data.
#[derive(Debug, Clone, Serialize)]
pub struct WorldEntry {
    /// World name, also the directory name.
    pub name: String,
    /// Absolute path of the world directory.
    pub path: PathBuf,
    /// Last modification of the channels file.
    pub updated_at: DateTime<Utc>,
}

/// Manager responsible for loading and writing per-world save files.
#[derive(Debug, Clone)]
pub struct SaveManager {
    root: PathBuf,
}

impl SaveManager {
    /// Create a new manager rooted at the provided directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location under the user's data directory.
    pub fn default_root() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_SAVE_DIR)
    }

    /// Root directory holding one sub-directory per world.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `world`, rejecting names that are not a single path component.
    pub fn world_dir(&self, world: &str) -> WormholeResult<PathBuf> {
        let invalid = world.is_empty()
            || world == "."
            || world == ".."
            || world.contains(['/', '\\'])
            || world.contains('\0');
        if invalid {
            return Err(WormholeError::InvalidWorld(world.to_string()));
        }
        Ok(self.root.join(world))
    }

    /// Return all worlds with a channels file, most recently saved first.
    pub fn worlds(&self) -> Result<Vec<WorldEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.root).context("failed to read save directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let channels_path = entry.path().join(CHANNELS_FILE);
            match fs::metadata(&channels_path).and_then(|meta| meta.modified()) {
                Ok(modified) => entries.push(WorldEntry {
                    name: entry.file_name().to_string_lossy().to_string(),
                    path: entry.path(),
                    updated_at: modified.into(),
                }),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => warn!("Failed to inspect {:?}: {err}", channels_path),
            }
        }

        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }

    /// Decode the saved state of `world`.
    ///
    /// A missing channels file is a first run and yields empty maps.
    pub fn load(&self, world: &str) -> Result<LoadedWorld> {
        let dir = self.world_dir(world)?;
        let mut loaded = LoadedWorld::default();

        let channels_path = dir.join(CHANNELS_FILE);
        let Some(content) = read_optional(&channels_path)? else {
            info!("No wormhole data file found at {}", channels_path.display());
            return Ok(loaded);
        };
        loaded.skipped += decode_channels(&content, &mut loaded.channels);

        let membership_path = dir.join(MEMBERSHIP_FILE);
        match read_optional(&membership_path)? {
            Some(content) => loaded.skipped += decode_memberships(&content, &mut loaded.members),
            None => warn!(
                "Chest channel map not found at {}",
                membership_path.display()
            ),
        }

        info!(
            world = %world,
            channels = loaded.channels.len(),
            members = loaded.members.len(),
            skipped = loaded.skipped,
            "Loaded wormhole data"
        );
        Ok(loaded)
    }

    /// Write both files for `world`, replacing any previous save.
    pub fn save(&self, world: &str, engine: &LinkingEngine) -> Result<PathBuf> {
        let dir = self.world_dir(world)?;
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        write_atomic(&dir.join(CHANNELS_FILE), &encode_channels(engine.channels()))?;
        write_atomic(
            &dir.join(MEMBERSHIP_FILE),
            &encode_memberships(engine.members()),
        )?;

        info!(
            world = %world,
            channels = engine.channels().len(),
            members = engine.members().len(),
            "Saved wormhole data"
        );
        Ok(dir)
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let mut file = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
