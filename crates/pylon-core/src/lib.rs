// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client-side state coordinator for the Pylon installer.
//!
//! The [`store::Store`] owns the cluster and credential collections, turns
//! dispatched events into state mutations and optimistic remote commands, and
//! fans committed snapshots out to subscribers. The [`runtime::StoreRuntime`]
//! feeds it from a single-consumer queue so events and command completions
//! never interleave.

pub mod cluster;
pub mod notice;
pub mod remote;
pub mod runtime;
pub mod state;
pub mod store;

pub use cluster::{cluster_from_descriptor, ChangeListener, ClusterEntity, ClusterView, ListenerId};
pub use notice::{Notice, NoticeKind};
pub use remote::RemoteService;
pub use runtime::{StoreHandle, StoreRuntime};
pub use state::StateSnapshot;
pub use store::{StateWatcher, Store};
