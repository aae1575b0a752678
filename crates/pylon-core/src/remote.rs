// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port for the remote installer service the runtime issues commands to.

use pylon_proto::{Credential, PromptResponse, Provider, RemoteError};
use std::future::Future;

/// Asynchronous operations the store's commands map onto. Implementations
/// answer with `Ok` for a 2xx response and a [`RemoteError`] carrying the
/// transport status otherwise (409 = conflict/in-use, 0 = transport failure).
///
/// Futures are `Send` so the runtime can run every command as its own task;
/// the completion re-enters the store through its input queue.
pub trait RemoteService: Send + Sync + 'static {
    /// Persist a credential.
    fn create_credential(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Delete a credential by provider and id.
    fn delete_credential(
        &self,
        kind: Provider,
        id: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Launch a cluster from a serialized draft payload.
    fn launch_cluster(
        &self,
        payload: &serde_json::Value,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Tear down a cluster.
    fn delete_cluster(
        &self,
        cluster_id: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Answer an installer prompt.
    fn send_prompt_response(
        &self,
        cluster_id: &str,
        prompt_id: &str,
        response: &PromptResponse,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Verify a certificate for a domain.
    fn check_cert(
        &self,
        domain_name: &str,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
