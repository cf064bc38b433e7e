//! Graph-assigned per-track state.
//!
//! Cluster membership and usage counts are the only mutable facts the
//! engine keeps about a track. They live here, keyed by [`TrackId`], so the
//! track records themselves stay immutable and can be shared freely.
//!
//! Writes are crate-private: clustering goes through
//! [`crate::cluster::ClusterEngine::assign`] and usage through
//! [`crate::suggest::SuggestionEngine::record_used`].

use crate::cluster::ClusterId;
use crate::track::TrackId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// Mutable state attached to one track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackState {
    pub cluster_id: Option<ClusterId>,
    pub times_used: u32,
}

/// Index-addressed table of [`TrackState`].
#[derive(Debug, Default)]
pub struct TrackStateTable {
    inner: RwLock<HashMap<TrackId, TrackState>>,
}

/// Read-only view held for the duration of a query.
pub struct StateView<'a> {
    guard: RwLockReadGuard<'a, HashMap<TrackId, TrackState>>,
}

impl StateView<'_> {
    #[must_use]
    pub fn get(&self, id: TrackId) -> TrackState {
        self.guard.get(&id).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn cluster_of(&self, id: TrackId) -> Option<ClusterId> {
        self.get(id).cluster_id
    }

    #[must_use]
    pub fn times_used(&self, id: TrackId) -> u32 {
        self.get(id).times_used
    }
}

impl TrackStateTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot-consistent read access. A poisoned lock still yields the last written data.
    #[must_use]
    pub fn view(&self) -> StateView<'_> {
        StateView {
            guard: self.inner.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    #[must_use]
    pub fn get(&self, id: TrackId) -> TrackState {
        self.view().get(id)
    }

    #[must_use]
    pub fn cluster_of(&self, id: TrackId) -> Option<ClusterId> {
        self.view().cluster_of(id)
    }

    #[must_use]
    pub fn times_used(&self, id: TrackId) -> u32 {
        self.view().times_used(id)
    }

    /// Replace every cluster assignment with `assignments`. Tracks missing
    /// from the new run lose their previous cluster; nothing is merged.
    pub(crate) fn replace_clusters<I>(&self, assignments: I)
    where
        I: IntoIterator<Item = (TrackId, Option<ClusterId>)>,
    {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for state in table.values_mut() {
            state.cluster_id = None;
        }
        for (id, cluster_id) in assignments {
            table.entry(id).or_default().cluster_id = cluster_id;
        }
    }

    pub(crate) fn increment_usage(&self, id: TrackId) -> u32 {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let state = table.entry(id).or_default();
        state.times_used = state.times_used.saturating_add(1);
        state.times_used
    }

    /// Seed usage counts loaded by the track store.
    pub fn load_usage<I>(&self, counts: I)
    where
        I: IntoIterator<Item = (TrackId, u32)>,
    {
        let mut table = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for (id, times_used) in counts {
            table.entry(id).or_default().times_used = times_used;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_track_has_default_state() {
        let table = TrackStateTable::new();
        assert_eq!(table.get(TrackId(9)), TrackState::default());
        assert_eq!(table.cluster_of(TrackId(9)), None);
    }

    #[test]
    fn test_replace_clusters_overwrites_wholesale() {
        let table = TrackStateTable::new();
        table.replace_clusters([(TrackId(1), Some(ClusterId(0))), (TrackId(2), Some(ClusterId(1)))]);
        table.replace_clusters([(TrackId(1), Some(ClusterId(3)))]);

        assert_eq!(table.cluster_of(TrackId(1)), Some(ClusterId(3)));
        assert_eq!(table.cluster_of(TrackId(2)), None, "stale assignment must be cleared");
    }

    #[test]
    fn test_usage_survives_reclustering() {
        let table = TrackStateTable::new();
        table.load_usage([(TrackId(1), 4)]);
        assert_eq!(table.increment_usage(TrackId(1)), 5);
        table.replace_clusters([(TrackId(1), None)]);
        assert_eq!(table.times_used(TrackId(1)), 5);
    }
}
