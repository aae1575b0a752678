// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Single-consumer loop that owns the store.
//!
//! Dispatched events, remote-command completions, and shutdown all travel the
//! same queue, consumed strictly in order by one task. Remote commands run as
//! spawned tasks holding only the remote port and a queue sender, so their
//! completions re-enter the store with the same single-writer guarantee as
//! events. No locks are involved.

use crate::remote::RemoteService;
use crate::store::Store;
use pylon_proto::{Command, Completion, Event, RemoteError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

enum Input {
    Event(Event),
    Completion(Completion),
    Shutdown,
}

/// Cloneable publishing side of the store queue: the dispatcher boundary.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl StoreHandle {
    /// Enqueue an event for the store. Returns `false` once the runtime has
    /// shut down.
    pub fn publish(&self, event: Event) -> bool {
        self.tx.send(Input::Event(event)).is_ok()
    }

    /// Ask the runtime to stop after draining everything queued before this.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown);
    }
}

/// Owns the store, its input queue, and the remote port.
pub struct StoreRuntime<R> {
    store: Store,
    remote: Arc<R>,
    rx: mpsc::UnboundedReceiver<Input>,
    tx: mpsc::UnboundedSender<Input>,
}

impl<R: RemoteService> StoreRuntime<R> {
    /// Pair a store with a remote port. The returned handle is the only way
    /// to feed the loop.
    pub fn new(store: Store, remote: R) -> (Self, StoreHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = StoreHandle { tx: tx.clone() };
        (
            Self {
                store,
                remote: Arc::new(remote),
                rx,
                tx,
            },
            handle,
        )
    }

    /// Access the store before the loop starts (e.g. to subscribe).
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Consume inputs until shutdown. All state mutation happens inside this
    /// task.
    pub async fn run(mut self) {
        info!("store runtime started");
        while let Some(input) = self.rx.recv().await {
            match input {
                Input::Event(event) => {
                    for command in self.store.handle_event(event) {
                        self.execute(command);
                    }
                }
                Input::Completion(completion) => self.store.handle_completion(completion),
                Input::Shutdown => break,
            }
        }
        info!("store runtime stopped");
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn execute(&self, command: Command) {
        let remote = Arc::clone(&self.remote);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = dispatch(remote.as_ref(), &command).await;
            // Send failure means the loop is gone; the completion is moot.
            let _ = tx.send(Input::Completion(Completion { command, outcome }));
        });
    }
}

async fn dispatch<R: RemoteService>(remote: &R, command: &Command) -> Result<(), RemoteError> {
    match command {
        Command::CreateCredential { credential } => remote.create_credential(credential).await,
        Command::DeleteCredential { credential } => {
            remote.delete_credential(credential.kind, &credential.id).await
        }
        Command::LaunchCluster { payload } => remote.launch_cluster(payload).await,
        Command::DeleteCluster { cluster_id } => remote.delete_cluster(cluster_id).await,
        Command::SendPromptResponse {
            cluster_id,
            prompt_id,
            response,
        } => {
            remote
                .send_prompt_response(cluster_id, prompt_id, response)
                .await
        }
        Command::CheckCert { domain_name, .. } => remote.check_cert(domain_name).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_proto::{Credential, PromptResponse, Provider};

    struct NullRemote;

    impl RemoteService for NullRemote {
        async fn create_credential(&self, _credential: &Credential) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn delete_credential(&self, _kind: Provider, _id: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn launch_cluster(&self, _payload: &serde_json::Value) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn delete_cluster(&self, _cluster_id: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn send_prompt_response(
            &self,
            _cluster_id: &str,
            _prompt_id: &str,
            _response: &PromptResponse,
        ) -> Result<(), RemoteError> {
            Ok(())
        }
        async fn check_cert(&self, _domain_name: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_ends_the_loop_and_closes_the_queue() {
        let (runtime, handle) = StoreRuntime::new(Store::new(), NullRemote);
        let join = runtime.spawn();

        handle.shutdown();
        join.await.expect("runtime task");
        assert!(!handle.publish(Event::CurrentCluster { cluster_id: None }));
    }
}
