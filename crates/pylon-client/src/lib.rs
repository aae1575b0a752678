// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client for the Pylon installer daemon over Unix sockets (framed CBOR).
//!
//! One connection carries both directions of traffic: operation requests
//! correlated to responses by sequence number, and unsolicited daemon pushes
//! surfaced as an ordered [`Event`] stream for the store queue.

use anyhow::Result;
use pylon_core::RemoteService;
use pylon_proto::wire::{decode_payload, encode_frame, payload_len, Frame, WireRequest, HEADER_LEN};
use pylon_proto::{Credential, Event, PromptResponse, Provider, RemoteError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type PendingReply = oneshot::Sender<Result<(), RemoteError>>;

/// Requests waiting for their response frame. Once `closed` flips, every new
/// request fails immediately with a transport error.
#[derive(Default)]
struct Pending {
    closed: bool,
    replies: HashMap<u64, PendingReply>,
}

struct ClientInner {
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<Pending>,
    next_seq: AtomicU64,
}

/// Ordered stream of daemon pushes. Ends when the connection closes.
pub struct PushEvents {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl PushEvents {
    /// Next pushed event; `None` once the connection is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Remote-service port backed by a daemon socket connection. Cheap to clone;
/// all clones share one connection.
#[derive(Clone)]
pub struct SocketRemote {
    inner: Arc<ClientInner>,
}

impl SocketRemote {
    /// Connect to the daemon at the given socket path.
    pub async fn connect(path: &str) -> Result<(Self, PushEvents)> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream))
    }

    /// Build a client from an established stream (used by tests with
    /// in-process socket pairs).
    pub fn from_stream(stream: UnixStream) -> (Self, PushEvents) {
        let (mut reader, mut writer) = stream.into_split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (push_tx, push_rx) = mpsc::unbounded_channel::<Event>();

        let inner = Arc::new(ClientInner {
            writer_tx,
            pending: Mutex::new(Pending::default()),
            next_seq: AtomicU64::new(1),
        });

        tokio::spawn(async move {
            while let Some(buf) = writer_rx.recv().await {
                if writer.write_all(&buf).await.is_err() {
                    break;
                }
            }
        });

        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                let mut header = [0u8; HEADER_LEN];
                if reader.read_exact(&mut header).await.is_err() {
                    break;
                }
                let len = match payload_len(&header) {
                    Ok(len) => len,
                    Err(err) => {
                        warn!(%err, "bad frame header, closing connection");
                        break;
                    }
                };
                let mut payload = vec![0u8; len];
                if reader.read_exact(&mut payload).await.is_err() {
                    break;
                }
                match decode_payload(&payload) {
                    Ok(Frame::Response { seq, status, error }) => {
                        resolve(&reader_inner, seq, status, error);
                    }
                    Ok(Frame::Push { event }) => {
                        debug!(event = event.name(), "daemon push");
                        // Nobody consuming pushes is fine; the connection
                        // stays up for request/response traffic.
                        let _ = push_tx.send(event);
                    }
                    Ok(Frame::Request { seq, .. }) => {
                        warn!(seq, "daemon sent a request frame, ignoring");
                    }
                    Err(err) => {
                        warn!(%err, "failed to decode frame, closing connection");
                        break;
                    }
                }
            }
            close_pending(&reader_inner);
        });

        (Self { inner }, PushEvents { rx: push_rx })
    }

    async fn request(&self, request: WireRequest) -> Result<(), RemoteError> {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let packet = encode_frame(&Frame::Request { seq, request })
            .map_err(|err| RemoteError::transport(err.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().expect("pending lock");
            if pending.closed {
                return Err(RemoteError::transport("connection closed"));
            }
            pending.replies.insert(seq, reply_tx);
        }

        if self.inner.writer_tx.send(packet).is_err() {
            let mut pending = self.inner.pending.lock().expect("pending lock");
            pending.replies.remove(&seq);
            return Err(RemoteError::transport("connection closed"));
        }

        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(RemoteError::transport("connection closed")),
        }
    }
}

fn resolve(inner: &ClientInner, seq: u64, status: u16, error: Option<String>) {
    let reply = {
        let mut pending = inner.pending.lock().expect("pending lock");
        pending.replies.remove(&seq)
    };
    let Some(reply) = reply else {
        warn!(seq, "response for unknown request");
        return;
    };
    let outcome = if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(RemoteError {
            status,
            message: error.unwrap_or_default(),
        })
    };
    let _ = reply.send(outcome);
}

/// Fail every in-flight request and refuse new ones.
fn close_pending(inner: &ClientInner) {
    let replies = {
        let mut pending = inner.pending.lock().expect("pending lock");
        pending.closed = true;
        std::mem::take(&mut pending.replies)
    };
    for (_, reply) in replies {
        let _ = reply.send(Err(RemoteError::transport("connection closed")));
    }
}

impl RemoteService for SocketRemote {
    async fn create_credential(&self, credential: &Credential) -> Result<(), RemoteError> {
        self.request(WireRequest::CreateCredential {
            credential: credential.clone(),
        })
        .await
    }

    async fn delete_credential(&self, kind: Provider, id: &str) -> Result<(), RemoteError> {
        self.request(WireRequest::DeleteCredential {
            kind,
            id: id.to_string(),
        })
        .await
    }

    async fn launch_cluster(&self, payload: &serde_json::Value) -> Result<(), RemoteError> {
        self.request(WireRequest::LaunchCluster {
            payload: payload.clone(),
        })
        .await
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<(), RemoteError> {
        self.request(WireRequest::DeleteCluster {
            cluster_id: cluster_id.to_string(),
        })
        .await
    }

    async fn send_prompt_response(
        &self,
        cluster_id: &str,
        prompt_id: &str,
        response: &PromptResponse,
    ) -> Result<(), RemoteError> {
        self.request(WireRequest::SendPromptResponse {
            cluster_id: cluster_id.to_string(),
            prompt_id: prompt_id.to_string(),
            response: response.clone(),
        })
        .await
    }

    async fn check_cert(&self, domain_name: &str) -> Result<(), RemoteError> {
        self.request(WireRequest::CheckCert {
            domain_name: domain_name.to_string(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_proto::ClusterState;
    use tokio::time::{timeout, Duration};

    /// Minimal scripted daemon: answers every request with a fixed status.
    async fn fake_daemon(stream: UnixStream, status: u16) {
        let (mut reader, mut writer) = stream.into_split();
        loop {
            let mut header = [0u8; HEADER_LEN];
            if reader.read_exact(&mut header).await.is_err() {
                break;
            }
            let len = payload_len(&header).expect("valid header");
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload).await.expect("payload");
            let Ok(Frame::Request { seq, .. }) = decode_payload(&payload) else {
                panic!("expected request frame");
            };
            let response = encode_frame(&Frame::Response {
                seq,
                status,
                error: (status >= 300).then(|| "scripted".to_string()),
            })
            .expect("encode");
            writer.write_all(&response).await.expect("write");
        }
    }

    #[tokio::test]
    async fn successful_request_resolves_ok() {
        let (client_stream, daemon_stream) = UnixStream::pair().unwrap();
        tokio::spawn(fake_daemon(daemon_stream, 200));
        let (client, _pushes) = SocketRemote::from_stream(client_stream);

        client.check_cert("demo.example.com").await.expect("2xx maps to Ok");
    }

    #[tokio::test]
    async fn conflict_status_maps_to_conflict_error() {
        let (client_stream, daemon_stream) = UnixStream::pair().unwrap();
        tokio::spawn(fake_daemon(daemon_stream, 409));
        let (client, _pushes) = SocketRemote::from_stream(client_stream);

        let err = client
            .delete_cluster("c1")
            .await
            .expect_err("409 maps to Err");
        assert!(err.is_conflict());
        assert_eq!(err.message, "scripted");
    }

    #[tokio::test]
    async fn interleaved_responses_resolve_by_sequence() {
        let (client_stream, daemon_stream) = UnixStream::pair().unwrap();
        let (client, _pushes) = SocketRemote::from_stream(client_stream);

        // Daemon that reads two requests, then answers them in reverse order
        // with different statuses.
        tokio::spawn(async move {
            let (mut reader, mut writer) = daemon_stream.into_split();
            let mut seqs = Vec::new();
            for _ in 0..2 {
                let mut header = [0u8; HEADER_LEN];
                reader.read_exact(&mut header).await.unwrap();
                let len = payload_len(&header).unwrap();
                let mut payload = vec![0u8; len];
                reader.read_exact(&mut payload).await.unwrap();
                let Ok(Frame::Request { seq, .. }) = decode_payload(&payload) else {
                    panic!("expected request");
                };
                seqs.push(seq);
            }
            // Second request fails, first succeeds.
            for (seq, status) in [(seqs[1], 500u16), (seqs[0], 200u16)] {
                let frame = encode_frame(&Frame::Response {
                    seq,
                    status,
                    error: (status >= 300).then(|| "boom".to_string()),
                })
                .unwrap();
                writer.write_all(&frame).await.unwrap();
            }
        });

        let first = client.check_cert("one.example.com");
        let second = client.check_cert("two.example.com");
        let (first, second) = tokio::join!(first, second);
        assert!(first.is_ok());
        assert_eq!(second.expect_err("scripted failure").status, 500);
    }

    #[tokio::test]
    async fn pushes_surface_as_events_in_order() {
        let (client_stream, daemon_stream) = UnixStream::pair().unwrap();
        let (_client, mut pushes) = SocketRemote::from_stream(client_stream);

        let (_reader, mut writer) = daemon_stream.into_split();
        for state in [ClusterState::Starting, ClusterState::Running] {
            let frame = encode_frame(&Frame::Push {
                event: Event::ClusterState {
                    cluster_id: "c1".into(),
                    state,
                },
            })
            .unwrap();
            writer.write_all(&frame).await.unwrap();
        }

        let first = timeout(Duration::from_secs(1), pushes.next())
            .await
            .unwrap()
            .expect("push");
        assert_eq!(
            first,
            Event::ClusterState {
                cluster_id: "c1".into(),
                state: ClusterState::Starting,
            }
        );
        let second = timeout(Duration::from_secs(1), pushes.next())
            .await
            .unwrap()
            .expect("push");
        assert_eq!(
            second,
            Event::ClusterState {
                cluster_id: "c1".into(),
                state: ClusterState::Running,
            }
        );
    }

    #[tokio::test]
    async fn closed_connection_fails_pending_and_new_requests() {
        let (client_stream, daemon_stream) = UnixStream::pair().unwrap();
        let (client, mut pushes) = SocketRemote::from_stream(client_stream);

        let in_flight = tokio::spawn({
            let client = client.clone();
            async move { client.check_cert("demo.example.com").await }
        });
        tokio::task::yield_now().await;

        drop(daemon_stream);

        let err = timeout(Duration::from_secs(1), in_flight)
            .await
            .unwrap()
            .unwrap()
            .expect_err("transport failure");
        assert_eq!(err.status, 0);

        assert!(timeout(Duration::from_secs(1), pushes.next())
            .await
            .unwrap()
            .is_none());

        let err = client
            .delete_cluster("c1")
            .await
            .expect_err("closed connection refuses new requests");
        assert_eq!(err.status, 0);
    }
}
