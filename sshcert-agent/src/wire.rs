//! Identity list wire format.
//!
//! `ssh_agent_lib` decodes every listed identity into a `KeyData`, which has
//! no room for a certificate.  The identities answer is therefore handled here
//! with each key blob kept as raw bytes, so keys and certificates pass through
//! byte for byte in both directions.  All other replies reuse
//! `ssh_agent_lib`'s [`Response`].

use ssh_agent_lib::proto::{Extension, ProtoError, Response};
use ssh_encoding::{CheckedSum, Decode, Encode, Reader, Writer};
use ssh_key::Signature;
use ssh_key::public::KeyData;

use crate::keyfile::CERT_SUFFIX;

const SSH_AGENT_FAILURE: u8 = 5;
const SSH_AGENT_SUCCESS: u8 = 6;
const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
const SSH_AGENT_EXTENSION_FAILURE: u8 = 28;
const SSH_AGENT_EXTENSION_RESPONSE: u8 = 29;

/// One entry of an identities answer: the key blob as encoded on the wire,
/// plus its comment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedIdentity {
    pub blob: Vec<u8>,
    pub comment: String,
}

impl ListedIdentity {
    pub fn new(blob: Vec<u8>, comment: impl Into<String>) -> Self {
        Self {
            blob,
            comment: comment.into(),
        }
    }

    /// Algorithm name the blob starts with.
    pub fn algorithm(&self) -> Option<String> {
        String::decode(&mut self.blob.as_slice()).ok()
    }

    pub fn is_certificate(&self) -> bool {
        self.algorithm().is_some_and(|alg| alg.ends_with(CERT_SUFFIX))
    }

    /// The blob as a plain public key.
    ///
    /// `None` for certificates and for blobs that do not decode cleanly.
    pub fn key_data(&self) -> Option<KeyData> {
        if self.is_certificate() {
            return None;
        }
        let mut reader = self.blob.as_slice();
        let key = KeyData::decode(&mut reader).ok()?;
        reader.finish(key).ok()
    }
}

impl Decode for ListedIdentity {
    type Error = ssh_encoding::Error;

    fn decode(reader: &mut impl Reader) -> ssh_encoding::Result<Self> {
        Ok(Self {
            blob: Vec::decode(reader)?,
            comment: String::decode(reader)?,
        })
    }
}

impl Encode for ListedIdentity {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        [self.blob.encoded_len()?, self.comment.encoded_len()?].checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.blob.encode(writer)?;
        self.comment.encode(writer)
    }
}

/// A reply message exchanged with an agent.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// `SSH_AGENT_IDENTITIES_ANSWER` with raw key blobs.
    Identities(Vec<ListedIdentity>),
    /// Any other reply.
    Response(Response),
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl Encode for Reply {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        match self {
            Self::Identities(identities) => {
                // message id + identity count
                identities
                    .iter()
                    .try_fold(1 + 4, |len, identity| [len, identity.encoded_len()?].checked_sum())
            }
            Self::Response(response) => response.encoded_len(),
        }
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        match self {
            Self::Identities(identities) => {
                SSH_AGENT_IDENTITIES_ANSWER.encode(writer)?;
                identities.len().encode(writer)?;
                for identity in identities {
                    identity.encode(writer)?;
                }
                Ok(())
            }
            Self::Response(response) => response.encode(writer),
        }
    }
}

impl Decode for Reply {
    type Error = ProtoError;

    fn decode(reader: &mut impl Reader) -> Result<Self, ProtoError> {
        let response = match u8::decode(reader)? {
            SSH_AGENT_IDENTITIES_ANSWER => {
                let count = usize::decode(reader)?;
                let mut identities = Vec::new();
                for _ in 0..count {
                    identities.push(ListedIdentity::decode(reader)?);
                }
                return Ok(Self::Identities(identities));
            }
            SSH_AGENT_FAILURE => Response::Failure,
            SSH_AGENT_SUCCESS => Response::Success,
            SSH_AGENT_SIGN_RESPONSE => Response::SignResponse(reader.read_prefixed(Signature::decode)?),
            SSH_AGENT_EXTENSION_FAILURE => Response::ExtensionFailure,
            SSH_AGENT_EXTENSION_RESPONSE => Response::ExtensionResponse(Extension::decode(reader)?),
            command => return Err(ProtoError::UnsupportedCommand { command }),
        };
        Ok(Self::Response(response))
    }
}
