//! Manual-mode region log.
//!
//! Regions are append-only within a generation and addressed by position.
//! `clear` starts a new generation, so a handle taken before a stop or a mode
//! switch resolves to `Stale` instead of silently naming a different box.

use serde::Serialize;

use crate::geometry::BoundingBox;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RegionHandle {
    pub generation: u64,
    pub index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolve {
    Found(BoundingBox),
    OutOfRange,
    Stale,
}

#[derive(Clone, Debug, Default)]
pub struct SelectedRegions {
    generation: u64,
    regions: Vec<BoundingBox>,
}

impl SelectedRegions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bbox: BoundingBox) -> RegionHandle {
        self.regions.push(bbox);
        RegionHandle {
            generation: self.generation,
            index: self.regions.len() - 1,
        }
    }

    pub fn get(&self, index: usize) -> Option<BoundingBox> {
        self.regions.get(index).copied()
    }

    /// Handle for an index in the current generation, if it exists.
    pub fn handle(&self, index: usize) -> Option<RegionHandle> {
        (index < self.regions.len()).then_some(RegionHandle {
            generation: self.generation,
            index,
        })
    }

    pub fn resolve(&self, handle: RegionHandle) -> Resolve {
        if handle.generation != self.generation {
            return Resolve::Stale;
        }
        match self.get(handle.index) {
            Some(bbox) => Resolve::Found(bbox),
            None => Resolve::OutOfRange,
        }
    }

    pub fn clear(&mut self) {
        self.regions.clear();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundingBox> {
        self.regions.iter()
    }
}
