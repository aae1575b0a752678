// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The immutable state snapshot the store publishes to subscribers.

use crate::cluster::ClusterView;
use crate::notice::Notice;
use pylon_proto::Credential;
use serde::Serialize;

/// Complete store state at one committed mutation. Rebuilt wholesale on each
/// commit, so a subscriber holding a stale `Arc` never observes a partial
/// update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Tracked clusters, most recently added first.
    pub clusters: Vec<ClusterView>,
    /// Known credentials, most recently added first.
    pub credentials: Vec<Credential>,
    /// Selected cluster id, or `None` when nothing is selected.
    pub current_cluster_id: Option<String>,
    /// View of the selected cluster, or the placeholder (id `"new"`) when the
    /// selection is empty or unmatched. Never an absence.
    pub current_cluster: ClusterView,
    /// Pending user-facing notices, oldest first.
    pub notices: Vec<Notice>,
}

impl StateSnapshot {
    /// The state published before any event has been handled.
    pub fn initial() -> Self {
        Self {
            clusters: Vec::new(),
            credentials: Vec::new(),
            current_cluster_id: None,
            current_cluster: ClusterView::placeholder(),
            notices: Vec::new(),
        }
    }
}
