//! Connection to the agent being augmented.

use std::fmt;
use std::io;

use futures_util::{SinkExt, TryStreamExt};
use ssh_agent_lib::agent::Session;
use ssh_agent_lib::codec::Codec;
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{
    AddIdentity, AddIdentityConstrained, AddSmartcardKeyConstrained, Extension, Identity,
    ProtoError, RemoveIdentity, Request, Response, SignRequest, SmartcardKey,
};
use ssh_key::Signature;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::session::RawSession;
use crate::wire::{ListedIdentity, Reply};

/// Agent client that reads identities answers as raw blobs.
///
/// Works like `ssh_agent_lib::client::Client`, except that listing keeps
/// certificates and unknown key types intact instead of failing to decode
/// them.  An upstream failure reply comes back as `AgentError::Failure` (or
/// `ExtensionFailure`), so serving the error again reproduces the reply.
#[derive(Debug)]
pub struct AgentClient<S>
where
    S: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    adapter: Framed<S, Codec<Reply, Request>>,
}

impl<S> AgentClient<S>
where
    S: fmt::Debug + AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(stream: S) -> Self {
        Self {
            adapter: Framed::new(stream, Codec::default()),
        }
    }

    async fn call(&mut self, request: Request) -> Result<Reply, AgentError> {
        self.adapter.send(request).await?;
        match self.adapter.try_next().await? {
            Some(reply) => Ok(reply),
            None => Err(ProtoError::IO(io::Error::other("upstream agent disconnected")).into()),
        }
    }

    async fn response(&mut self, request: Request) -> Result<Response, AgentError> {
        match self.call(request).await? {
            Reply::Response(response) => Ok(response),
            Reply::Identities(_) => Err(ProtoError::UnexpectedResponse.into()),
        }
    }

    async fn success(&mut self, request: Request) -> Result<(), AgentError> {
        match self.response(request).await? {
            Response::Success => Ok(()),
            other => Err(failure(other)),
        }
    }
}

/// Error for a reply that is not the expected success.
fn failure(response: Response) -> AgentError {
    match response {
        Response::Failure => AgentError::Failure,
        Response::ExtensionFailure => AgentError::ExtensionFailure,
        _ => ProtoError::UnexpectedResponse.into(),
    }
}

#[ssh_agent_lib::async_trait]
impl<S> RawSession for AgentClient<S>
where
    S: fmt::Debug + AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    async fn list_identities(&mut self) -> Result<Vec<ListedIdentity>, AgentError> {
        match self.call(Request::RequestIdentities).await? {
            Reply::Identities(identities) => Ok(identities),
            Reply::Response(other) => Err(failure(other)),
        }
    }
}

#[ssh_agent_lib::async_trait]
impl<S> Session for AgentClient<S>
where
    S: fmt::Debug + AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
{
    /// Identities that decode as plain keys; certificates are left out.
    async fn request_identities(&mut self) -> Result<Vec<Identity>, AgentError> {
        let identities = self.list_identities().await?;
        Ok(identities
            .into_iter()
            .filter_map(|identity| {
                let pubkey = identity.key_data()?;
                Some(Identity {
                    pubkey,
                    comment: identity.comment,
                })
            })
            .collect())
    }

    async fn sign(&mut self, request: SignRequest) -> Result<Signature, AgentError> {
        match self.response(Request::SignRequest(request)).await? {
            Response::SignResponse(signature) => Ok(signature),
            other => Err(failure(other)),
        }
    }

    async fn add_identity(&mut self, identity: AddIdentity) -> Result<(), AgentError> {
        self.success(Request::AddIdentity(identity)).await
    }

    async fn add_identity_constrained(
        &mut self,
        identity: AddIdentityConstrained,
    ) -> Result<(), AgentError> {
        self.success(Request::AddIdConstrained(identity)).await
    }

    async fn remove_identity(&mut self, identity: RemoveIdentity) -> Result<(), AgentError> {
        self.success(Request::RemoveIdentity(identity)).await
    }

    async fn remove_all_identities(&mut self) -> Result<(), AgentError> {
        self.success(Request::RemoveAllIdentities).await
    }

    async fn add_smartcard_key(&mut self, key: SmartcardKey) -> Result<(), AgentError> {
        self.success(Request::AddSmartcardKey(key)).await
    }

    async fn add_smartcard_key_constrained(
        &mut self,
        key: AddSmartcardKeyConstrained,
    ) -> Result<(), AgentError> {
        self.success(Request::AddSmartcardKeyConstrained(key)).await
    }

    async fn remove_smartcard_key(&mut self, key: SmartcardKey) -> Result<(), AgentError> {
        self.success(Request::RemoveSmartcardKey(key)).await
    }

    async fn lock(&mut self, key: String) -> Result<(), AgentError> {
        self.success(Request::Lock(key)).await
    }

    async fn unlock(&mut self, key: String) -> Result<(), AgentError> {
        self.success(Request::Unlock(key)).await
    }

    async fn extension(&mut self, extension: Extension) -> Result<Option<Extension>, AgentError> {
        match self.response(Request::Extension(extension)).await? {
            Response::Success => Ok(None),
            Response::ExtensionResponse(response) => Ok(Some(response)),
            other => Err(failure(other)),
        }
    }
}
