//! The cache module holds the [SpeculativeCache], the reconciliation loop's record of speculative
//! builds.

use ethers::types::H256;
use opinion_validator_solvers::rollup::PreparedAssertion;
use std::collections::{HashMap, HashSet};

/// The [SpeculativeCache] tracks which leaves have a build in flight and the finished builds,
/// keyed by the hash of the leaf they extend. At most one build is ever outstanding per leaf.
#[derive(Debug)]
pub struct SpeculativeCache<M> {
    building: HashSet<H256>,
    failed: HashSet<H256>,
    prepared: HashMap<H256, PreparedAssertion<M>>,
}

impl<M> Default for SpeculativeCache<M> {
    fn default() -> Self {
        Self {
            building: HashSet::new(),
            failed: HashSet::new(),
            prepared: HashMap::new(),
        }
    }
}

impl<M> SpeculativeCache<M> {
    /// Returns `true` if a build for `leaf` was started and not superseded.
    pub fn is_building(&self, leaf: &H256) -> bool {
        self.building.contains(leaf)
    }

    /// Marks a build for `leaf` as started. Returns `false` if one already was.
    pub fn start_building(&mut self, leaf: H256) -> bool {
        self.building.insert(leaf)
    }

    /// Records that the build for `leaf` produced nothing. The leaf stays marked as building
    /// until [SpeculativeCache::release_failed] is called.
    pub fn fail(&mut self, leaf: H256) {
        if self.building.contains(&leaf) {
            self.failed.insert(leaf);
        }
    }

    /// Unmarks every leaf whose build failed, so that it can be retried.
    pub fn release_failed(&mut self) {
        for leaf in self.failed.drain() {
            self.building.remove(&leaf);
        }
    }

    /// Stores a finished build. Builds for leaves that are no longer marked as building were
    /// superseded and are dropped; returns whether the build was kept.
    pub fn complete(&mut self, prepared: PreparedAssertion<M>) -> bool {
        if !self.building.contains(&prepared.leaf_hash) {
            return false;
        }
        self.prepared.insert(prepared.leaf_hash, prepared);
        true
    }

    /// Returns the finished build on top of `leaf`.
    pub fn prepared(&self, leaf: &H256) -> Option<&PreparedAssertion<M>> {
        self.prepared.get(leaf)
    }

    /// Drops every in-flight and finished build. Called on every known valid transition, since
    /// all speculation was built against a superseded leaf.
    pub fn clear(&mut self) {
        self.building.clear();
        self.failed.clear();
        self.prepared.clear();
    }
}
