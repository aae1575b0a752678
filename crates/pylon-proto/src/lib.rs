// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared schema for the Pylon installer coordinator: the events the store
//! consumes, the commands it issues, the completions those commands produce,
//! and the framed wire envelopes used to talk to the installer daemon.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub mod wire;

/// Default Unix socket path for the installer daemon.
///
/// Prefers a per-user runtime dir (XDG_RUNTIME_DIR) and falls back to `/tmp`
/// when unavailable.
pub fn default_socket_path() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    base.join("pylon-installer.sock")
}

/// Credential id the AWS launch path falls back to when no access key is
/// supplied (the daemon then reads credentials from its environment).
pub const AWS_ENV_CREDENTIAL_ID: &str = "aws_env";

/// Identity of the placeholder cluster published while nothing is selected.
pub const PLACEHOLDER_CLUSTER_ID: &str = "new";

/// Cloud provider tag carried by credentials and clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Amazon Web Services.
    Aws,
    /// DigitalOcean.
    DigitalOcean,
}

impl Provider {
    /// Canonical string tag for this provider (matches the wire form).
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::DigitalOcean => "digital_ocean",
        }
    }
}

/// Lifecycle tag the daemon reports for a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterState {
    /// Provisioning in progress.
    Starting,
    /// Installed and reachable.
    Running,
    /// Provisioning or installation failed.
    Error,
    /// Teardown in progress.
    Deleting,
    /// Gone; the coordinator drops the cluster on this tag.
    Deleted,
}

/// A stored credential. `secret` is write-only from the UI's perspective;
/// the daemon never echoes it back in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Unique identifier (access key id for AWS, token name for DO).
    pub id: String,
    /// Which provider the credential belongs to.
    #[serde(rename = "type")]
    pub kind: Provider,
    /// Display name.
    pub name: String,
    /// Secret material (secret access key / API token).
    pub secret: String,
}

/// Server-pushed description of a cluster the daemon now tracks. The store
/// constructs the matching entity variant from the `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    /// Backend-assigned identifier.
    pub id: String,
    /// Provider tag selecting the entity variant.
    #[serde(rename = "type")]
    pub provider: Provider,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Lifecycle tag at the time of the push.
    pub state: ClusterState,
    /// Provider region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Instance type (AWS only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_type: Option<String>,
    /// Number of instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_instances: Option<u64>,
    /// VPC CIDR block (AWS only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_cidr: Option<String>,
    /// Subnet CIDR block (AWS only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_cidr: Option<String>,
    /// Credential the cluster was launched with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    /// Domain assigned once installation completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    /// CA certificate for the dashboard, once issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
}

/// A prompt the installer raised for a specific cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt identifier, echoed back in the response.
    pub id: String,
    /// Prompt kind as reported by the daemon (e.g. "yes_no", "input").
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable question.
    pub message: String,
}

/// The user's answer to a [`Prompt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResponse {
    /// Affirmative flag for yes/no prompts.
    #[serde(default)]
    pub yes: bool,
    /// Free-form input for input prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

/// Credential fields entered on the AWS launch form. Both fields may be
/// absent, in which case the daemon uses its own environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCredentialsInput {
    /// Access key id; falls back to [`AWS_ENV_CREDENTIAL_ID`] when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    /// Secret access key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

/// Parameters of an AWS launch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchAws {
    /// Credential fields from the launch form.
    pub creds: AwsCredentialsInput,
    /// Target region.
    pub region: String,
    /// EC2 instance type.
    pub instance_type: String,
    /// Number of instances to launch.
    pub num_instances: u64,
    /// Optional VPC CIDR override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_cidr: Option<String>,
    /// Optional subnet CIDR override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_cidr: Option<String>,
}

/// Parameters of a DigitalOcean launch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDigitalOcean {
    /// Stored credential to launch with.
    pub credential_id: String,
    /// Target region.
    pub region: String,
    /// Number of droplets to launch.
    pub num_instances: u64,
}

/// Every event the store consumes: UI actions, server pushes, and the
/// synthetic events the store itself routes to cluster entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// Launch form submitted for AWS.
    LaunchAws(LaunchAws),
    /// Launch form submitted for DigitalOcean.
    LaunchDigitalOcean(LaunchDigitalOcean),
    /// Daemon push: start tracking a cluster.
    NewCluster {
        /// Descriptor the entity is constructed from.
        cluster: ClusterDescriptor,
    },
    /// Daemon push: a credential now exists server-side.
    NewCredential {
        /// The credential to insert.
        credential: Credential,
    },
    /// Daemon push: a credential was deleted server-side.
    CredentialDeleted {
        /// Identity of the removed credential.
        id: String,
    },
    /// UI selection changed. `None` selects the placeholder.
    CurrentCluster {
        /// Newly selected cluster, if any.
        cluster_id: Option<String>,
    },
    /// UI request to create a credential (optimistic).
    CreateCredential {
        /// The credential to create.
        data: Credential,
    },
    /// UI request to delete a credential (optimistic).
    DeleteCredential {
        /// The credential to delete; kept whole so a conflict can restore it.
        creds: Credential,
    },
    /// UI confirmed a cluster deletion.
    ConfirmClusterDelete {
        /// Target cluster.
        cluster_id: String,
    },
    /// Daemon push: a launch request failed before a cluster existed.
    LaunchClusterFailure {
        /// Daemon-provided description of the failure.
        message: String,
    },
    /// UI answered an installer prompt.
    InstallPromptResponse {
        /// Cluster the prompt belongs to.
        cluster_id: String,
        /// Prompt being answered.
        prompt_id: String,
        /// The answer.
        data: PromptResponse,
    },
    /// UI asked to verify a cluster's certificate.
    CheckCert {
        /// Cluster the verification is for.
        cluster_id: String,
        /// Domain to verify.
        domain_name: String,
    },
    /// Daemon push: lifecycle tag changed. `Deleted` removes the cluster.
    ClusterState {
        /// Target cluster.
        cluster_id: String,
        /// New lifecycle tag.
        state: ClusterState,
    },
    /// Daemon push: installer log line.
    InstallLog {
        /// Target cluster.
        cluster_id: String,
        /// Log line text.
        description: String,
    },
    /// Daemon push: the installer is waiting on a prompt.
    InstallPromptRequested {
        /// Target cluster.
        cluster_id: String,
        /// The pending prompt.
        prompt: Prompt,
    },
    /// Daemon push: a prompt was resolved (possibly by another client).
    InstallPromptResolved {
        /// Target cluster.
        cluster_id: String,
        /// Prompt that was resolved.
        prompt_id: String,
    },
    /// Daemon push: installation finished.
    InstallDone {
        /// Target cluster.
        cluster_id: String,
    },
    /// Daemon push: domain and CA cert assigned.
    ClusterDomain {
        /// Target cluster.
        cluster_id: String,
        /// Assigned domain.
        domain_name: String,
        /// CA certificate, when already issued.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ca_cert: Option<String>,
    },
    /// Synthetic: a cert check succeeded for this cluster. Routed to the one
    /// matching entity, never broadcast.
    CertVerified {
        /// Target cluster.
        cluster_id: String,
    },
    /// UI dismissed a notice from the snapshot queue.
    DismissNotice {
        /// Notice identifier.
        id: u64,
    },
}

impl Event {
    /// Canonical event name (the serialized `name` tag).
    pub fn name(&self) -> &'static str {
        match self {
            Event::LaunchAws(_) => "LAUNCH_AWS",
            Event::LaunchDigitalOcean(_) => "LAUNCH_DIGITAL_OCEAN",
            Event::NewCluster { .. } => "NEW_CLUSTER",
            Event::NewCredential { .. } => "NEW_CREDENTIAL",
            Event::CredentialDeleted { .. } => "CREDENTIAL_DELETED",
            Event::CurrentCluster { .. } => "CURRENT_CLUSTER",
            Event::CreateCredential { .. } => "CREATE_CREDENTIAL",
            Event::DeleteCredential { .. } => "DELETE_CREDENTIAL",
            Event::ConfirmClusterDelete { .. } => "CONFIRM_CLUSTER_DELETE",
            Event::LaunchClusterFailure { .. } => "LAUNCH_CLUSTER_FAILURE",
            Event::InstallPromptResponse { .. } => "INSTALL_PROMPT_RESPONSE",
            Event::CheckCert { .. } => "CHECK_CERT",
            Event::ClusterState { .. } => "CLUSTER_STATE",
            Event::InstallLog { .. } => "INSTALL_LOG",
            Event::InstallPromptRequested { .. } => "INSTALL_PROMPT_REQUESTED",
            Event::InstallPromptResolved { .. } => "INSTALL_PROMPT_RESOLVED",
            Event::InstallDone { .. } => "INSTALL_DONE",
            Event::ClusterDomain { .. } => "CLUSTER_DOMAIN",
            Event::CertVerified { .. } => "CERT_VERIFIED",
            Event::DismissNotice { .. } => "DISMISS_NOTICE",
        }
    }

    /// Cluster the event targets, when it carries one. Drives the store's
    /// generic per-cluster routing.
    pub fn cluster_id(&self) -> Option<&str> {
        match self {
            Event::ConfirmClusterDelete { cluster_id }
            | Event::InstallPromptResponse { cluster_id, .. }
            | Event::CheckCert { cluster_id, .. }
            | Event::ClusterState { cluster_id, .. }
            | Event::InstallLog { cluster_id, .. }
            | Event::InstallPromptRequested { cluster_id, .. }
            | Event::InstallPromptResolved { cluster_id, .. }
            | Event::InstallDone { cluster_id }
            | Event::ClusterDomain { cluster_id, .. }
            | Event::CertVerified { cluster_id } => Some(cluster_id),
            _ => None,
        }
    }
}

/// An asynchronous command the store asks the runtime to execute against the
/// remote service. Each command eventually produces one [`Completion`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Persist a credential server-side.
    CreateCredential {
        /// The credential being created; also the rollback target.
        credential: Credential,
    },
    /// Delete a credential server-side.
    DeleteCredential {
        /// The credential being deleted, kept whole for conflict rollback.
        credential: Credential,
    },
    /// Launch a cluster from a serialized draft.
    LaunchCluster {
        /// Provider-agnostic launch parameters (the draft's serialized form).
        payload: serde_json::Value,
    },
    /// Tear down a cluster.
    DeleteCluster {
        /// Target cluster.
        cluster_id: String,
    },
    /// Forward a prompt answer to the installer.
    SendPromptResponse {
        /// Cluster the prompt belongs to.
        cluster_id: String,
        /// Prompt being answered.
        prompt_id: String,
        /// The answer.
        response: PromptResponse,
    },
    /// Verify a certificate for a domain.
    CheckCert {
        /// Cluster that asked; the success event is routed back to it.
        cluster_id: String,
        /// Domain to verify.
        domain_name: String,
    },
}

impl Command {
    /// Short label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Command::CreateCredential { .. } => "create_credential",
            Command::DeleteCredential { .. } => "delete_credential",
            Command::LaunchCluster { .. } => "launch_cluster",
            Command::DeleteCluster { .. } => "delete_cluster",
            Command::SendPromptResponse { .. } => "send_prompt_response",
            Command::CheckCert { .. } => "check_cert",
        }
    }
}

/// Outcome of a [`Command`], fed back through the store's input queue so the
/// completion handler runs with the same single-writer guarantee as events.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The command that finished.
    pub command: Command,
    /// `Ok` on a 2xx response, the transport error otherwise.
    pub outcome: Result<(), RemoteError>,
}

/// Error returned by a remote operation. `status` is the HTTP-style code the
/// daemon answered with; `0` means the transport itself failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("remote call failed with status {status}: {message}")]
pub struct RemoteError {
    /// Transport status code (409 = conflict/in-use, 0 = transport failure).
    pub status: u16,
    /// Human-readable description.
    pub message: String,
}

impl RemoteError {
    /// Build a transport-level failure (status 0).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: message.into(),
        }
    }

    /// True when the daemon answered 409: the resource already exists or is
    /// still in use, and the store applies its conflict policy instead of a
    /// generic rollback.
    pub fn is_conflict(&self) -> bool {
        self.status == 409
    }
}
