//! Certificate-augmenting agent session.

use std::fmt;
use std::sync::Arc;

use ssh_agent_lib::agent::Session;
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{
    AddIdentity, AddIdentityConstrained, AddSmartcardKeyConstrained, Extension, Identity,
    RemoveIdentity, SignRequest, SmartcardKey,
};
use ssh_key::Signature;
use tokio::sync::Mutex;
use tracing::debug;

use crate::index::{CertIndex, fingerprint};
use crate::wire::ListedIdentity;

/// A [`Session`] that can also list its identities as raw key blobs.
///
/// `Session::request_identities` yields `KeyData`, which cannot hold a
/// certificate, so identities answers are built from `list_identities`.
#[ssh_agent_lib::async_trait]
pub trait RawSession: Session {
    async fn list_identities(&mut self) -> Result<Vec<ListedIdentity>, AgentError>;
}

/// Agent facade over an upstream agent.
///
/// Listing identities returns the upstream's entries followed by every
/// indexed certificate issued over one of them.  Every other request goes to
/// the upstream untouched.
///
/// Cloned per incoming connection by the dispatcher; all clones share the
/// same upstream connection and index.  The upstream speaks one
/// request/response exchange at a time, so calls to it are serialized.
pub struct CertAgent<U> {
    upstream: Arc<Mutex<U>>,
    index: Arc<CertIndex>,
}

impl<U> Clone for CertAgent<U> {
    fn clone(&self) -> Self {
        Self {
            upstream: Arc::clone(&self.upstream),
            index: Arc::clone(&self.index),
        }
    }
}

impl<U> fmt::Debug for CertAgent<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertAgent")
            .field("certificates", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl<U: RawSession> CertAgent<U> {
    pub fn new(upstream: U, index: Arc<CertIndex>) -> Self {
        Self {
            upstream: Arc::new(Mutex::new(upstream)),
            index,
        }
    }

    /// Append indexed certificates to a copy of the upstream's identities.
    ///
    /// Only plain keys are looked up; upstream certificates and blobs that do
    /// not decode are passed through as they are.
    fn augment(&self, upstream: &[ListedIdentity]) -> Vec<ListedIdentity> {
        let mut identities = upstream.to_vec();

        for identity in upstream {
            let Some(key) = identity.key_data() else {
                continue;
            };
            identities.extend(self.index.get(&fingerprint(&key)).iter().map(|e| e.listed()));
        }

        identities
    }
}

#[ssh_agent_lib::async_trait]
impl<U: RawSession> RawSession for CertAgent<U> {
    async fn list_identities(&mut self) -> Result<Vec<ListedIdentity>, AgentError> {
        let upstream = self.upstream.lock().await.list_identities().await?;
        let identities = self.augment(&upstream);

        debug!(
            upstream = upstream.len(),
            certificates = identities.len() - upstream.len(),
            "list_identities"
        );
        Ok(identities)
    }
}

#[ssh_agent_lib::async_trait]
impl<U: RawSession> Session for CertAgent<U> {
    /// Forwarded unchanged: certificates are only added to the raw listing.
    async fn request_identities(&mut self) -> Result<Vec<Identity>, AgentError> {
        debug!("request_identities");
        self.upstream.lock().await.request_identities().await
    }

    async fn sign(&mut self, request: SignRequest) -> Result<Signature, AgentError> {
        debug!(data_len = request.data.len(), "sign");
        self.upstream.lock().await.sign(request).await
    }

    async fn add_identity(&mut self, identity: AddIdentity) -> Result<(), AgentError> {
        debug!("add_identity");
        self.upstream.lock().await.add_identity(identity).await
    }

    async fn add_identity_constrained(
        &mut self,
        identity: AddIdentityConstrained,
    ) -> Result<(), AgentError> {
        debug!("add_identity_constrained");
        self.upstream.lock().await.add_identity_constrained(identity).await
    }

    async fn remove_identity(&mut self, identity: RemoveIdentity) -> Result<(), AgentError> {
        debug!("remove_identity");
        self.upstream.lock().await.remove_identity(identity).await
    }

    async fn remove_all_identities(&mut self) -> Result<(), AgentError> {
        debug!("remove_all_identities");
        self.upstream.lock().await.remove_all_identities().await
    }

    async fn add_smartcard_key(&mut self, key: SmartcardKey) -> Result<(), AgentError> {
        debug!("add_smartcard_key");
        self.upstream.lock().await.add_smartcard_key(key).await
    }

    async fn add_smartcard_key_constrained(
        &mut self,
        key: AddSmartcardKeyConstrained,
    ) -> Result<(), AgentError> {
        debug!("add_smartcard_key_constrained");
        self.upstream.lock().await.add_smartcard_key_constrained(key).await
    }

    async fn remove_smartcard_key(&mut self, key: SmartcardKey) -> Result<(), AgentError> {
        debug!("remove_smartcard_key");
        self.upstream.lock().await.remove_smartcard_key(key).await
    }

    async fn lock(&mut self, key: String) -> Result<(), AgentError> {
        debug!("lock");
        self.upstream.lock().await.lock(key).await
    }

    async fn unlock(&mut self, key: String) -> Result<(), AgentError> {
        debug!("unlock");
        self.upstream.lock().await.unlock(key).await
    }

    async fn extension(&mut self, extension: Extension) -> Result<Option<Extension>, AgentError> {
        debug!(name = %extension.name, "extension");
        self.upstream.lock().await.extension(extension).await
    }
}
