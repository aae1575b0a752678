// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The store: single-writer state container translating application events
//! into state mutations, optimistic remote commands, and snapshot fan-out.
//!
//! `handle_event` and `handle_completion` are synchronous, total functions
//! from (state, input) to (state, commands). All asynchrony lives in the
//! runtime loop that feeds them; see [`crate::runtime`].

use crate::cluster::{
    cluster_from_descriptor, AwsCluster, ChangeListener, ClusterEntity, ClusterView,
    DigitalOceanCluster, ListenerId,
};
use crate::notice::{NoticeKind, NoticeLog};
use crate::state::StateSnapshot;
use pylon_proto::{ClusterState, Command, Completion, Credential, Event};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Upper bound on queued user-facing notices.
const NOTICE_CAP: usize = 32;

/// A cluster the store tracks, paired with the one change-listener handle the
/// store registered on it. An entity is never tracked without a registration
/// and never leaves without deregistering.
struct TrackedCluster {
    entity: Box<dyn ClusterEntity>,
    listener: ListenerId,
}

/// Receiver half of a state subscription. Each committed mutation delivers
/// one `Arc<StateSnapshot>`, one-for-one with no coalescing. Dropping the
/// watcher unsubscribes.
pub struct StateWatcher {
    rx: mpsc::UnboundedReceiver<Arc<StateSnapshot>>,
}

impl StateWatcher {
    /// Wait for the next committed snapshot. `None` when the store is gone.
    pub async fn next(&mut self) -> Option<Arc<StateSnapshot>> {
        self.rx.recv().await
    }

    /// Take an already-delivered snapshot without waiting.
    pub fn try_next(&mut self) -> Option<Arc<StateSnapshot>> {
        self.rx.try_recv().ok()
    }
}

/// The central state container. Owned by exactly one consumer (the runtime
/// loop or a test); nothing here is internally synchronized.
pub struct Store {
    clusters: Vec<TrackedCluster>,
    credentials: Vec<Credential>,
    current_cluster_id: Option<String>,
    notices: NoticeLog,
    subscribers: Vec<mpsc::UnboundedSender<Arc<StateSnapshot>>>,
    change_tx: mpsc::UnboundedSender<()>,
    change_rx: mpsc::UnboundedReceiver<()>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create an empty store: no clusters, no credentials, nothing selected.
    pub fn new() -> Self {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        Self {
            clusters: Vec::new(),
            credentials: Vec::new(),
            current_cluster_id: None,
            notices: NoticeLog::new(NOTICE_CAP),
            subscribers: Vec::new(),
            change_tx,
            change_rx,
        }
    }

    /// Register a state subscriber. The current snapshot is delivered
    /// immediately as a baseline; every committed mutation delivers another.
    pub fn subscribe(&mut self) -> StateWatcher {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.build_snapshot());
        self.subscribers.push(tx);
        StateWatcher { rx }
    }

    /// The current state as an immutable snapshot.
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.build_snapshot()
    }

    /// Handle one dispatched event. Returns the remote commands to issue;
    /// their completions must be fed back through [`Self::handle_completion`].
    pub fn handle_event(&mut self, event: Event) -> Vec<Command> {
        match event {
            Event::LaunchAws(inputs) => {
                // The draft is never tracked; it exists to serialize the
                // launch payload. The tracked entity arrives via NEW_CLUSTER.
                let draft = AwsCluster::draft(&inputs);
                vec![Command::LaunchCluster {
                    payload: draft.launch_payload(),
                }]
            }

            Event::LaunchDigitalOcean(inputs) => {
                let draft = DigitalOceanCluster::draft(&inputs);
                vec![Command::LaunchCluster {
                    payload: draft.launch_payload(),
                }]
            }

            Event::NewCluster { cluster } => {
                self.add_cluster(cluster);
                Vec::new()
            }

            Event::NewCredential { credential } => {
                if self.insert_credential(credential) {
                    self.commit();
                }
                Vec::new()
            }

            Event::CredentialDeleted { id } => {
                if self.remove_credential(&id) {
                    self.commit();
                }
                Vec::new()
            }

            Event::CurrentCluster { cluster_id } => {
                self.current_cluster_id = cluster_id;
                self.commit();
                Vec::new()
            }

            Event::CreateCredential { data } => {
                if self.find_credential(&data.id).is_some() {
                    // Already known; the event is ignored entirely.
                    return Vec::new();
                }
                self.insert_credential(data.clone());
                self.commit();
                vec![Command::CreateCredential { credential: data }]
            }

            Event::DeleteCredential { creds } => {
                if self.remove_credential(&creds.id) {
                    self.commit();
                }
                vec![Command::DeleteCredential { credential: creds }]
            }

            Event::ConfirmClusterDelete { cluster_id } => {
                // No local change; the removal arrives as CLUSTER_STATE.
                vec![Command::DeleteCluster { cluster_id }]
            }

            Event::LaunchClusterFailure { message } => {
                error!(%message, "cluster launch failed");
                Vec::new()
            }

            Event::InstallPromptResponse {
                cluster_id,
                prompt_id,
                data,
            } => vec![Command::SendPromptResponse {
                cluster_id,
                prompt_id,
                response: data,
            }],

            Event::CheckCert {
                cluster_id,
                domain_name,
            } => {
                if self.find_cluster(&cluster_id).is_none() {
                    debug!(%cluster_id, "cert check for unknown cluster");
                    return Vec::new();
                }
                vec![Command::CheckCert {
                    cluster_id,
                    domain_name,
                }]
            }

            Event::DismissNotice { id } => {
                if self.notices.dismiss(id) {
                    self.commit();
                }
                Vec::new()
            }

            routed @ (Event::ClusterState { .. }
            | Event::InstallLog { .. }
            | Event::InstallPromptRequested { .. }
            | Event::InstallPromptResolved { .. }
            | Event::InstallDone { .. }
            | Event::ClusterDomain { .. }
            | Event::CertVerified { .. }) => {
                if let Event::ClusterState {
                    cluster_id,
                    state: ClusterState::Deleted,
                } = &routed
                {
                    let _ = self.remove_cluster(cluster_id);
                }
                self.route_to_cluster(&routed);
                Vec::new()
            }
        }
    }

    /// Handle the outcome of a previously issued command. Runs on the same
    /// single-consumer queue as events, so rollbacks never race a mutation.
    pub fn handle_completion(&mut self, completion: Completion) {
        let Completion { command, outcome } = completion;
        match (command, outcome) {
            (
                Command::CheckCert { cluster_id, .. },
                Ok(()),
            ) => {
                // Routed to the one requesting cluster, never broadcast.
                let event = Event::CertVerified { cluster_id };
                self.route_to_cluster(&event);
            }

            (_, Ok(())) => {}

            (Command::CreateCredential { credential }, Err(err)) => {
                if err.is_conflict() {
                    // Already exists server-side; the optimistic insert
                    // matches reality.
                    return;
                }
                warn!(credential = %credential.id, %err, "credential create failed, rolling back");
                self.remove_credential(&credential.id);
                self.notices.push(
                    NoticeKind::Error,
                    format!("Failed to create credential \"{}\"", credential.name),
                    Some(err.message),
                );
                self.commit();
            }

            (Command::DeleteCredential { credential }, Err(err)) => {
                if err.is_conflict() {
                    // Still in use; restore the optimistic removal.
                    warn!(credential = %credential.id, "credential still in use, restoring");
                    self.insert_credential(credential.clone());
                    self.notices.push(
                        NoticeKind::Warn,
                        format!("Credential \"{}\" is still in use", credential.name),
                        Some(err.message),
                    );
                } else {
                    self.notices.push(
                        NoticeKind::Error,
                        format!("Failed to delete credential \"{}\"", credential.name),
                        Some(err.message),
                    );
                }
                self.commit();
            }

            (Command::CheckCert { domain_name, .. }, Err(err)) => {
                self.notices.push(
                    NoticeKind::Error,
                    format!("Certificate check failed for {domain_name}"),
                    Some(err.message),
                );
                self.commit();
            }

            (Command::LaunchCluster { .. }, Err(err)) => {
                error!(%err, "cluster launch request failed");
            }

            (Command::DeleteCluster { cluster_id }, Err(err)) => {
                self.notices.push(
                    NoticeKind::Error,
                    format!("Failed to delete cluster {cluster_id}"),
                    Some(err.message),
                );
                self.commit();
            }

            (Command::SendPromptResponse { cluster_id, .. }, Err(err)) => {
                self.notices.push(
                    NoticeKind::Error,
                    format!("Failed to answer prompt for cluster {cluster_id}"),
                    Some(err.message),
                );
                self.commit();
            }
        }
    }

    // ── cluster collection ─────────────────────────────────────────

    fn add_cluster(&mut self, descriptor: pylon_proto::ClusterDescriptor) {
        if self.find_cluster(&descriptor.id).is_some() {
            warn!(cluster_id = %descriptor.id, "cluster already added");
            return;
        }
        let mut entity = cluster_from_descriptor(&descriptor);
        let listener = entity.add_change_listener(ChangeListener::new(self.change_tx.clone()));
        self.clusters.insert(0, TrackedCluster { entity, listener });
        self.commit();
    }

    fn remove_cluster(&mut self, cluster_id: &str) -> Option<Box<dyn ClusterEntity>> {
        let index = self
            .clusters
            .iter()
            .position(|t| t.entity.id() == Some(cluster_id))?;
        let mut tracked = self.clusters.remove(index);
        tracked.entity.remove_change_listener(tracked.listener);
        self.commit();
        Some(tracked.entity)
    }

    fn find_cluster(&self, cluster_id: &str) -> Option<&dyn ClusterEntity> {
        self.clusters
            .iter()
            .find(|t| t.entity.id() == Some(cluster_id))
            .map(|t| t.entity.as_ref())
    }

    fn route_to_cluster(&mut self, event: &Event) {
        let Some(cluster_id) = event.cluster_id() else {
            return;
        };
        match self
            .clusters
            .iter_mut()
            .find(|t| t.entity.id() == Some(cluster_id))
        {
            Some(tracked) => {
                tracked.entity.handle_event(event);
                self.drain_change_signals();
            }
            None => {
                debug!(event = event.name(), %cluster_id, "dropping event for unknown cluster");
            }
        }
    }

    /// Republish once per pending change signal. Deliberately uncoalesced so
    /// subscribers see one notification per entity mutation.
    fn drain_change_signals(&mut self) {
        while self.change_rx.try_recv().is_ok() {
            self.commit();
        }
    }

    // ── credential collection ──────────────────────────────────────

    /// Idempotent insert: no-op when the id is already present, otherwise
    /// prepend (most recently added first). Returns whether it inserted.
    fn insert_credential(&mut self, credential: Credential) -> bool {
        if self.find_credential(&credential.id).is_some() {
            return false;
        }
        self.credentials.insert(0, credential);
        true
    }

    /// Idempotent delete by identity, preserving the order of the remainder.
    /// Returns whether anything was removed.
    fn remove_credential(&mut self, id: &str) -> bool {
        let before = self.credentials.len();
        self.credentials.retain(|c| c.id != id);
        self.credentials.len() != before
    }

    fn find_credential(&self, id: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.id == id)
    }

    // ── snapshot fan-out ───────────────────────────────────────────

    fn build_snapshot(&self) -> Arc<StateSnapshot> {
        let current_cluster = self
            .current_cluster_id
            .as_deref()
            .and_then(|id| self.find_cluster(id))
            .map(|entity| entity.view())
            .unwrap_or_else(ClusterView::placeholder);
        Arc::new(StateSnapshot {
            clusters: self.clusters.iter().map(|t| t.entity.view()).collect(),
            credentials: self.credentials.clone(),
            current_cluster_id: self.current_cluster_id.clone(),
            current_cluster,
            notices: self.notices.entries(),
        })
    }

    /// Commit the current state: rebuild the snapshot and deliver it to every
    /// live subscriber, pruning the ones that went away.
    fn commit(&mut self) {
        let snapshot = self.build_snapshot();
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
    }
}
