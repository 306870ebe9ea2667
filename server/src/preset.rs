//! Preset registry: named play areas loaded from a JSON document
//!
//! The registry merges definitions from its source file, keeps the first
//! definition of any name, and never throws away what it has when a reload
//! fails to parse. File changes only raise a dirty flag; the reload itself
//! happens the next time a preset is selected, so a running round is never
//! pulled out from under the players.

use crate::error::ConfigError;
use crate::world::TransitionIndex;
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use shared::{GameInfo, LoadoutPair, Restriction, WarpTarget};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarpSpec {
    pub area: String,
    pub entry: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub warp: WarpSpec,
    #[serde(default)]
    pub min_players: Option<usize>,
    #[serde(default)]
    pub max_players: Option<usize>,
    /// Area name to the exits of that area players may not use.
    #[serde(default)]
    pub restrictions: BTreeMap<String, Vec<String>>,
    /// Falls back to the registry's default pair when absent.
    #[serde(default)]
    pub loadouts: Option<LoadoutPair>,
}

impl Preset {
    /// Whether `population` lies within the preset's inclusive bounds.
    pub fn fits(&self, population: usize) -> bool {
        self.min_players.map_or(true, |min| population >= min)
            && self.max_players.map_or(true, |max| population <= max)
    }

    pub fn describe(&self) -> String {
        let bound = |b: Option<usize>| b.map_or_else(|| "*".to_string(), |n| n.to_string());
        format!(
            "{} ({}-{} players)",
            self.name,
            bound(self.min_players),
            bound(self.max_players)
        )
    }
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    #[serde(default)]
    default_loadouts: Option<LoadoutPair>,
    presets: Vec<Preset>,
}

/// Outcome of merging a preset document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub added: usize,
    /// Names rejected because a preset with that name was already loaded.
    pub skipped: Vec<String>,
}

pub struct PresetRegistry {
    source: Option<PathBuf>,
    presets: BTreeMap<String, Preset>,
    default_loadouts: LoadoutPair,
    dirty: Arc<AtomicBool>,
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetRegistry {
    /// Empty registry with no backing file
    pub fn new() -> Self {
        Self {
            source: None,
            presets: BTreeMap::new(),
            default_loadouts: LoadoutPair::default(),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registry backed by `path`. A file that cannot be read leaves the
    /// registry empty; it will be picked up on the next reload.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let mut registry = Self::new();
        let path = path.as_ref().to_path_buf();
        if let Err(e) = registry.load(&path, false) {
            warn!("Presets {} not loaded: {}", path.display(), e);
        }
        registry.source = Some(path);
        registry
    }

    /// Merges presets from `path`. With `reset`, the loaded set is replaced
    /// instead of merged. On any error the current set is left untouched.
    pub fn load(&mut self, path: impl AsRef<Path>, reset: bool) -> Result<LoadSummary, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let summary = self.load_str(&raw, reset)?;
        info!(
            "Loaded {} presets from {} ({} skipped)",
            summary.added,
            path.as_ref().display(),
            summary.skipped.len()
        );
        Ok(summary)
    }

    pub fn load_str(&mut self, raw: &str, reset: bool) -> Result<LoadSummary, ConfigError> {
        let file: PresetFile = serde_json::from_str(raw)?;

        if reset {
            self.presets.clear();
            self.default_loadouts = LoadoutPair::default();
        }
        if let Some(defaults) = file.default_loadouts {
            self.default_loadouts = defaults;
        }

        let mut summary = LoadSummary::default();
        for preset in file.presets {
            let name = preset.name.clone();
            if self.insert(preset) {
                summary.added += 1;
            } else {
                summary.skipped.push(name);
            }
        }
        Ok(summary)
    }

    /// Adds a preset unless the name is taken. Returns false on collision.
    pub fn insert(&mut self, preset: Preset) -> bool {
        if self.presets.contains_key(&preset.name) {
            warn!("Duplicate preset {}, keeping the earlier definition", preset.name);
            return false;
        }
        self.presets.insert(preset.name.clone(), preset);
        true
    }

    /// Fully reloads from the backing file.
    pub fn reload(&mut self) -> Result<LoadSummary, ConfigError> {
        self.dirty.store(false, Ordering::Release);
        match self.source.clone() {
            Some(path) => self.load(path, true),
            None => Ok(LoadSummary::default()),
        }
    }

    /// Reloads if the backing file changed since the last load. Returns
    /// true when a reload was attempted.
    pub fn reload_if_dirty(&mut self) -> bool {
        if !self.dirty.load(Ordering::Acquire) {
            return false;
        }
        if let Err(e) = self.reload() {
            warn!("Preset reload failed, keeping previous presets: {}", e);
        }
        true
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Spawns a task that polls the backing file and raises the dirty flag
    /// when its modification time or size changes. Returns `None` for a
    /// registry without a backing file.
    pub fn watch(&self, every: Duration) -> Option<JoinHandle<()>> {
        let path = self.source.clone()?;
        let dirty = Arc::clone(&self.dirty);

        Some(tokio::spawn(async move {
            let mut last = file_stamp(&path);
            let mut ticker = tokio::time::interval(every);

            loop {
                ticker.tick().await;
                let stamp = file_stamp(&path);
                if stamp != last {
                    last = stamp;
                    dirty.store(true, Ordering::Release);
                    info!("Preset file {} changed, reload pending", path.display());
                }
            }
        }))
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn default_loadouts(&self) -> &LoadoutPair {
        &self.default_loadouts
    }

    /// Picks a preset uniformly among those that fit `population`, never
    /// returning `current`. Applies a pending reload first.
    pub fn select_random<R: Rng + ?Sized>(
        &mut self,
        current: Option<&str>,
        population: usize,
        rng: &mut R,
    ) -> Option<Preset> {
        self.reload_if_dirty();

        let candidates: Vec<&Preset> = self
            .presets
            .values()
            .filter(|p| p.fits(population) && Some(p.name.as_str()) != current)
            .collect();

        candidates.choose(rng).map(|p| (*p).clone())
    }

    /// Translates a preset's named warp target and restrictions into the
    /// indexed form sent to clients. Names the index does not know are
    /// dropped with a warning.
    pub fn resolve(&self, preset: &Preset, world: &dyn TransitionIndex) -> GameInfo {
        let warp = match (
            world.area_index(&preset.warp.area),
            world.transition_index(&preset.warp.area, &preset.warp.entry),
        ) {
            (Some(area), Some(entry)) => Some(WarpTarget { area, entry }),
            _ => {
                warn!(
                    "Preset {}: warp target {}/{} not in world index",
                    preset.name, preset.warp.area, preset.warp.entry
                );
                None
            }
        };

        let mut restrictions = Vec::new();
        for (area, exits) in &preset.restrictions {
            let Some(area_index) = world.area_index(area) else {
                warn!("Preset {}: unknown area {} in restrictions", preset.name, area);
                continue;
            };

            let exits: Vec<u16> = exits
                .iter()
                .filter_map(|exit| {
                    let index = world.transition_index(area, exit);
                    if index.is_none() {
                        warn!("Preset {}: unknown exit {} in area {}", preset.name, exit, area);
                    }
                    index
                })
                .collect();

            if !exits.is_empty() {
                restrictions.push(Restriction {
                    area: area_index,
                    exits,
                });
            }
        }

        GameInfo {
            warp,
            restrictions,
            loadouts: preset
                .loadouts
                .clone()
                .unwrap_or_else(|| self.default_loadouts.clone()),
        }
    }
}

fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}
