//! Name to index resolution for areas and their transitions
//!
//! Presets name areas and exits; the wire carries dense indices. Anything
//! that needs that translation depends on [`TransitionIndex`] rather than on
//! where the table came from.

use crate::error::ConfigError;
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub trait TransitionIndex {
    fn area_index(&self, area: &str) -> Option<u16>;
    fn transition_index(&self, area: &str, transition: &str) -> Option<u16>;
}

#[derive(Debug, Deserialize)]
struct WorldFile {
    areas: Vec<AreaEntry>,
}

#[derive(Debug, Deserialize)]
struct AreaEntry {
    name: String,
    #[serde(default)]
    transitions: Vec<String>,
}

#[derive(Debug, Default)]
struct Area {
    index: u16,
    transitions: HashMap<String, u16>,
}

/// Index table built from an ordered list of areas; an area's index is its
/// position in the list and a transition's index is its position within
/// its area.
#[derive(Debug, Default)]
pub struct WorldIndex {
    areas: HashMap<String, Area>,
}

impl WorldIndex {
    pub fn from_areas<A, T>(areas: A) -> Self
    where
        A: IntoIterator<Item = (String, T)>,
        T: IntoIterator<Item = String>,
    {
        let mut index = HashMap::new();

        for (i, (name, transitions)) in areas.into_iter().enumerate() {
            let Ok(area_index) = u16::try_from(i) else {
                warn!("World index truncated at {} areas", i);
                break;
            };

            let transitions = transitions
                .into_iter()
                .enumerate()
                .filter_map(|(j, t)| u16::try_from(j).ok().map(|j| (t, j)))
                .collect();

            if index
                .insert(
                    name.clone(),
                    Area {
                        index: area_index,
                        transitions,
                    },
                )
                .is_some()
            {
                warn!("Area {} listed twice in world index, keeping the later entry", name);
            }
        }

        Self { areas: index }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let file: WorldFile = serde_json::from_str(&raw)?;
        Ok(Self::from_areas(
            file.areas.into_iter().map(|a| (a.name, a.transitions)),
        ))
    }

    /// Like [`WorldIndex::load`], but an unreadable file yields an empty
    /// index, which makes every restriction resolve to nothing.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(index) => {
                info!("Loaded {} areas from {}", index.len(), path.display());
                index
            }
            Err(e) => {
                warn!("World index {} unavailable: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}

impl TransitionIndex for WorldIndex {
    fn area_index(&self, area: &str) -> Option<u16> {
        self.areas.get(area).map(|a| a.index)
    }

    fn transition_index(&self, area: &str, transition: &str) -> Option<u16> {
        self.areas
            .get(area)
            .and_then(|a| a.transitions.get(transition).copied())
    }
}
