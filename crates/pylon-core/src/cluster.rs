// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Cluster entities: per-cluster sub-state-machines the store owns and routes
//! events into. One concrete variant per provider, selected from the
//! descriptor's `type` tag at construction time.

use pylon_proto::{
    ClusterDescriptor, ClusterState, Event, LaunchAws, LaunchDigitalOcean, Prompt, Provider,
    AWS_ENV_CREDENTIAL_ID, PLACEHOLDER_CLUSTER_ID,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// Handle identifying one change-listener registration on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Zero-payload change signal an entity fires whenever a routed event mutates
/// its internal state. The store holds the receiving end.
#[derive(Debug, Clone)]
pub struct ChangeListener {
    tx: mpsc::UnboundedSender<()>,
}

impl ChangeListener {
    /// Wrap a sender as a listener.
    pub fn new(tx: mpsc::UnboundedSender<()>) -> Self {
        Self { tx }
    }

    fn fire(&self) {
        // Receiver gone means the store is shutting down; nothing to signal.
        let _ = self.tx.send(());
    }
}

/// Rendering-friendly projection of a cluster entity, published in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    /// Backend identity, or `"new"` for the placeholder.
    pub id: String,
    /// Provider tag; `None` only for the placeholder.
    pub provider: Option<Provider>,
    /// Display name.
    pub name: String,
    /// Lifecycle tag; `None` only for the placeholder.
    pub state: Option<ClusterState>,
    /// Domain assigned once installation completes.
    pub domain_name: Option<String>,
    /// CA certificate for the dashboard, once issued.
    pub ca_cert: Option<String>,
    /// Whether the dashboard certificate has been verified.
    pub cert_verified: bool,
    /// Prompt the installer is currently waiting on, if any.
    pub pending_prompt: Option<Prompt>,
    /// Installer log lines, oldest first.
    pub install_log: Vec<String>,
}

impl ClusterView {
    /// The sentinel view published while no cluster is selected. Keeps
    /// `current_cluster` a valid value for consuming views, never an absence.
    pub fn placeholder() -> Self {
        Self {
            id: PLACEHOLDER_CLUSTER_ID.to_string(),
            provider: None,
            name: String::new(),
            state: None,
            domain_name: None,
            ca_cert: None,
            cert_verified: false,
            pending_prompt: None,
            install_log: Vec::new(),
        }
    }
}

/// Capability set the store consumes. Concrete variants are per-provider.
pub trait ClusterEntity: Send {
    /// Backend-assigned identity; `None` while the entity is a launch draft.
    fn id(&self) -> Option<&str>;

    /// Provider tag of the concrete variant.
    fn provider(&self) -> Provider;

    /// Accept a routed event. Mutating events fire the registered change
    /// listeners exactly once.
    fn handle_event(&mut self, event: &Event);

    /// Register a change listener, returning the handle for removal.
    fn add_change_listener(&mut self, listener: ChangeListener) -> ListenerId;

    /// Deregister a previously added listener. Unknown ids are a no-op.
    fn remove_change_listener(&mut self, id: ListenerId);

    /// Number of currently registered listeners.
    fn change_listener_count(&self) -> usize;

    /// Provider-agnostic launch-parameters payload for the launch command.
    fn launch_payload(&self) -> Value;

    /// Snapshot projection of the entity.
    fn view(&self) -> ClusterView;
}

/// State shared by every provider variant: identity, lifecycle, installer
/// progress, and the listener set.
#[derive(Debug)]
struct ClusterCore {
    id: Option<String>,
    name: String,
    state: ClusterState,
    install_log: Vec<String>,
    pending_prompt: Option<Prompt>,
    domain_name: Option<String>,
    ca_cert: Option<String>,
    cert_verified: bool,
    listeners: Vec<(ListenerId, ChangeListener)>,
    next_listener: u64,
}

impl ClusterCore {
    fn draft(name: String) -> Self {
        Self {
            id: None,
            name,
            state: ClusterState::Starting,
            install_log: Vec::new(),
            pending_prompt: None,
            domain_name: None,
            ca_cert: None,
            cert_verified: false,
            listeners: Vec::new(),
            next_listener: 1,
        }
    }

    fn from_descriptor(descriptor: &ClusterDescriptor) -> Self {
        Self {
            id: Some(descriptor.id.clone()),
            name: descriptor.name.clone(),
            state: descriptor.state,
            install_log: Vec::new(),
            pending_prompt: None,
            domain_name: descriptor.domain_name.clone(),
            ca_cert: descriptor.ca_cert.clone(),
            cert_verified: false,
            listeners: Vec::new(),
            next_listener: 1,
        }
    }

    fn add_listener(&mut self, listener: ChangeListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }

    fn notify(&self) {
        for (_, listener) in &self.listeners {
            listener.fire();
        }
    }

    /// Apply a routed event to the shared state. Returns whether anything
    /// changed; the caller fires listeners on `true`.
    fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::ClusterState { state, .. } => {
                if self.state == *state {
                    return false;
                }
                self.state = *state;
                true
            }
            Event::InstallLog { description, .. } => {
                self.install_log.push(description.clone());
                true
            }
            Event::InstallPromptRequested { prompt, .. } => {
                self.pending_prompt = Some(prompt.clone());
                true
            }
            Event::InstallPromptResolved { prompt_id, .. } => {
                if self
                    .pending_prompt
                    .as_ref()
                    .is_some_and(|p| p.id == *prompt_id)
                {
                    self.pending_prompt = None;
                    true
                } else {
                    false
                }
            }
            Event::InstallDone { .. } => {
                self.pending_prompt = None;
                self.state = ClusterState::Running;
                true
            }
            Event::ClusterDomain {
                domain_name,
                ca_cert,
                ..
            } => {
                self.domain_name = Some(domain_name.clone());
                if ca_cert.is_some() {
                    self.ca_cert = ca_cert.clone();
                }
                true
            }
            Event::CertVerified { .. } => {
                if self.cert_verified {
                    return false;
                }
                self.cert_verified = true;
                true
            }
            other => {
                debug!(event = other.name(), "cluster entity ignoring event");
                false
            }
        }
    }

    fn view(&self, provider: Provider) -> ClusterView {
        ClusterView {
            id: self.id.clone().unwrap_or_default(),
            provider: Some(provider),
            name: self.name.clone(),
            state: Some(self.state),
            domain_name: self.domain_name.clone(),
            ca_cert: self.ca_cert.clone(),
            cert_verified: self.cert_verified,
            pending_prompt: self.pending_prompt.clone(),
            install_log: self.install_log.clone(),
        }
    }
}

/// Credential pair serialized into an AWS launch payload.
#[derive(Debug, Clone)]
struct AwsLaunchCreds {
    id: String,
    secret: Option<String>,
}

/// AWS cluster variant.
pub struct AwsCluster {
    core: ClusterCore,
    creds: AwsLaunchCreds,
    region: String,
    instance_type: String,
    num_instances: u64,
    vpc_cidr: Option<String>,
    subnet_cidr: Option<String>,
}

impl AwsCluster {
    /// Build a transient launch draft from the launch form inputs. The draft
    /// is never tracked; it only exists to serialize the launch payload.
    pub fn draft(inputs: &LaunchAws) -> Self {
        let creds = AwsLaunchCreds {
            id: inputs
                .creds
                .access_key_id
                .clone()
                .unwrap_or_else(|| AWS_ENV_CREDENTIAL_ID.to_string()),
            secret: inputs.creds.secret_access_key.clone(),
        };
        Self {
            core: ClusterCore::draft(String::new()),
            creds,
            region: inputs.region.clone(),
            instance_type: inputs.instance_type.clone(),
            num_instances: inputs.num_instances,
            vpc_cidr: inputs.vpc_cidr.clone(),
            subnet_cidr: inputs.subnet_cidr.clone(),
        }
    }

    fn from_descriptor(descriptor: &ClusterDescriptor) -> Self {
        Self {
            core: ClusterCore::from_descriptor(descriptor),
            creds: AwsLaunchCreds {
                id: descriptor
                    .credential_id
                    .clone()
                    .unwrap_or_else(|| AWS_ENV_CREDENTIAL_ID.to_string()),
                secret: None,
            },
            region: descriptor.region.clone().unwrap_or_default(),
            instance_type: descriptor.instance_type.clone().unwrap_or_default(),
            num_instances: descriptor.num_instances.unwrap_or(1),
            vpc_cidr: descriptor.vpc_cidr.clone(),
            subnet_cidr: descriptor.subnet_cidr.clone(),
        }
    }
}

impl ClusterEntity for AwsCluster {
    fn id(&self) -> Option<&str> {
        self.core.id.as_deref()
    }

    fn provider(&self) -> Provider {
        Provider::Aws
    }

    fn handle_event(&mut self, event: &Event) {
        if self.core.apply(event) {
            self.core.notify();
        }
    }

    fn add_change_listener(&mut self, listener: ChangeListener) -> ListenerId {
        self.core.add_listener(listener)
    }

    fn remove_change_listener(&mut self, id: ListenerId) {
        self.core.remove_listener(id);
    }

    fn change_listener_count(&self) -> usize {
        self.core.listeners.len()
    }

    fn launch_payload(&self) -> Value {
        let mut payload = json!({
            "type": Provider::Aws.as_str(),
            "creds": {
                "id": self.creds.id,
            },
            "region": self.region,
            "instance_type": self.instance_type,
            "num_instances": self.num_instances,
        });
        if let Some(secret) = &self.creds.secret {
            payload["creds"]["secret"] = json!(secret);
        }
        if let Some(vpc) = &self.vpc_cidr {
            payload["vpc_cidr"] = json!(vpc);
        }
        if let Some(subnet) = &self.subnet_cidr {
            payload["subnet_cidr"] = json!(subnet);
        }
        payload
    }

    fn view(&self) -> ClusterView {
        self.core.view(Provider::Aws)
    }
}

/// DigitalOcean cluster variant.
pub struct DigitalOceanCluster {
    core: ClusterCore,
    credential_id: String,
    region: String,
    num_instances: u64,
}

impl DigitalOceanCluster {
    /// Build a transient launch draft from the launch form inputs.
    pub fn draft(inputs: &LaunchDigitalOcean) -> Self {
        Self {
            core: ClusterCore::draft(String::new()),
            credential_id: inputs.credential_id.clone(),
            region: inputs.region.clone(),
            num_instances: inputs.num_instances,
        }
    }

    fn from_descriptor(descriptor: &ClusterDescriptor) -> Self {
        Self {
            core: ClusterCore::from_descriptor(descriptor),
            credential_id: descriptor.credential_id.clone().unwrap_or_default(),
            region: descriptor.region.clone().unwrap_or_default(),
            num_instances: descriptor.num_instances.unwrap_or(1),
        }
    }
}

impl ClusterEntity for DigitalOceanCluster {
    fn id(&self) -> Option<&str> {
        self.core.id.as_deref()
    }

    fn provider(&self) -> Provider {
        Provider::DigitalOcean
    }

    fn handle_event(&mut self, event: &Event) {
        if self.core.apply(event) {
            self.core.notify();
        }
    }

    fn add_change_listener(&mut self, listener: ChangeListener) -> ListenerId {
        self.core.add_listener(listener)
    }

    fn remove_change_listener(&mut self, id: ListenerId) {
        self.core.remove_listener(id);
    }

    fn change_listener_count(&self) -> usize {
        self.core.listeners.len()
    }

    fn launch_payload(&self) -> Value {
        json!({
            "type": Provider::DigitalOcean.as_str(),
            "credential_id": self.credential_id,
            "region": self.region,
            "num_instances": self.num_instances,
        })
    }

    fn view(&self) -> ClusterView {
        self.core.view(Provider::DigitalOcean)
    }
}

/// Construct the entity variant matching the descriptor's provider tag.
pub fn cluster_from_descriptor(descriptor: &ClusterDescriptor) -> Box<dyn ClusterEntity> {
    match descriptor.provider {
        Provider::Aws => Box::new(AwsCluster::from_descriptor(descriptor)),
        Provider::DigitalOcean => Box::new(DigitalOceanCluster::from_descriptor(descriptor)),
    }
}
