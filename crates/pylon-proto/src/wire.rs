// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Framing for the installer daemon socket.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || RESERVED(2) || LENGTH(4) || PAYLOAD``
//!
//! PAYLOAD is a CBOR-encoded [`Frame`]. Requests and responses are correlated
//! by `seq`; unsolicited pushes carry the application [`Event`] directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Credential, Event, PromptResponse, Provider};

/// Protocol magic constant "PYLN".
pub const MAGIC: [u8; 4] = *b"PYLN";
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Length of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 12;
/// Upper bound on a single frame payload.
pub const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// One operation request to the daemon, mirroring the remote-service port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireRequest {
    /// Persist a credential.
    CreateCredential {
        /// The credential to store.
        credential: Credential,
    },
    /// Delete a credential by provider and id.
    DeleteCredential {
        /// Provider namespace of the credential.
        kind: Provider,
        /// Credential identity.
        id: String,
    },
    /// Launch a cluster from serialized draft parameters.
    LaunchCluster {
        /// Provider-agnostic launch payload.
        payload: serde_json::Value,
    },
    /// Tear down a cluster.
    DeleteCluster {
        /// Target cluster.
        cluster_id: String,
    },
    /// Answer an installer prompt.
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
        /// Domain to verify.
        domain_name: String,
    },
}

/// Everything that can travel over the daemon socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// Client → daemon operation request.
    Request {
        /// Correlation id, unique per connection.
        seq: u64,
        /// The requested operation.
        request: WireRequest,
    },
    /// Daemon → client operation outcome.
    Response {
        /// Correlation id of the request this answers.
        seq: u64,
        /// HTTP-style status code (2xx = success, 409 = conflict).
        status: u16,
        /// Error description for non-2xx statuses.
        error: Option<String>,
    },
    /// Daemon → client unsolicited state push.
    Push {
        /// The application event to feed into the store queue.
        event: Event,
    },
}

/// Errors raised by the frame codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// Header did not start with [`MAGIC`].
    #[error("bad frame magic")]
    BadMagic,
    /// Header carried an unsupported version.
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u16),
    /// Declared payload length exceeds [`MAX_PAYLOAD`].
    #[error("frame payload of {0} bytes exceeds limit")]
    Oversize(usize),
    /// CBOR encode failure.
    #[error("encode: {0}")]
    Encode(String),
    /// CBOR decode failure.
    #[error("decode: {0}")]
    Decode(String),
}

/// Encode a frame into a full packet (header + CBOR payload).
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, WireError> {
    let mut payload = Vec::with_capacity(128);
    ciborium::ser::into_writer(frame, &mut payload)
        .map_err(|err| WireError::Encode(err.to_string()))?;
    if payload.len() > MAX_PAYLOAD {
        return Err(WireError::Oversize(payload.len()));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&[0u8, 0u8]);
    out.extend_from_slice(&u32::try_from(payload.len()).map_err(|_| WireError::Oversize(payload.len()))?.to_be_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Validate a frame header and return the payload length that follows it.
pub fn payload_len(header: &[u8; HEADER_LEN]) -> Result<usize, WireError> {
    if header[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(WireError::Oversize(len));
    }
    Ok(len)
}

/// Decode a frame from its payload bytes (everything after the header).
pub fn decode_payload(payload: &[u8]) -> Result<Frame, WireError> {
    ciborium::de::from_reader(payload).map_err(|err| WireError::Decode(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClusterState;

    fn round_trip(frame: &Frame) -> Frame {
        let packet = encode_frame(frame).unwrap();
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&packet[..HEADER_LEN]);
        let len = payload_len(&header).unwrap();
        assert_eq!(len, packet.len() - HEADER_LEN);
        decode_payload(&packet[HEADER_LEN..]).unwrap()
    }

    #[test]
    fn request_round_trips() {
        let frame = Frame::Request {
            seq: 7,
            request: WireRequest::CheckCert {
                domain_name: "demo.example.com".into(),
            },
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn push_round_trips_with_event_payload() {
        let frame = Frame::Push {
            event: Event::ClusterState {
                cluster_id: "c1".into(),
                state: ClusterState::Running,
            },
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn launch_payload_survives_cbor() {
        let payload = serde_json::json!({
            "type": "aws",
            "region": "us-east-1",
            "num_instances": 3,
        });
        let frame = Frame::Request {
            seq: 1,
            request: WireRequest::LaunchCluster {
                payload: payload.clone(),
            },
        };
        match round_trip(&frame) {
            Frame::Request {
                request: WireRequest::LaunchCluster { payload: decoded },
                ..
            } => assert_eq!(decoded, payload),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn header_validation_rejects_garbage() {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(b"NOPE");
        assert!(matches!(payload_len(&header), Err(WireError::BadMagic)));

        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_be_bytes());
        header[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(payload_len(&header), Err(WireError::Oversize(_))));
    }
}
