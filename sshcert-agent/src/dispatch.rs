//! Connection dispatch.
//!
//! Each listener gets its own accept loop running as a separate task, and
//! every accepted connection is served on its own task against a clone of the
//! shared agent.  Nothing waits for sessions to finish.
//!
//! A failed accept is logged and retried after a short pause, so one bad
//! accept never takes a listener down.
//!
//! Requests are framed and decoded by `ssh_agent_lib`'s codec.  Replies go
//! out as [`Reply`] so the identities answer can carry certificate blobs.

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, TryStreamExt};
use ssh_agent_lib::agent::{ListeningSocket, Session};
use ssh_agent_lib::codec::Codec;
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{Request, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::session::RawSession;
use crate::wire::Reply;

/// Pause after a failed accept before trying again.
///
/// Keeps a persistent failure (e.g. descriptor exhaustion) from spinning.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Serves one shared agent on any number of listeners.
#[derive(Debug)]
pub struct Dispatcher<A> {
    agent: A,
}

impl<A> Dispatcher<A>
where
    A: RawSession + Clone + fmt::Debug,
{
    pub fn new(agent: A) -> Self {
        Self { agent }
    }

    /// Spawn an accept loop for `listener`.
    ///
    /// The loop runs until the task is aborted or the runtime shuts down.
    pub fn serve<L>(&self, mut listener: L, label: impl Into<String>) -> JoinHandle<()>
    where
        L: ListeningSocket + fmt::Debug + Send + 'static,
    {
        let agent = self.agent.clone();
        let label = label.into();

        tokio::spawn(async move {
            info!(listener = %label, "serving agent");
            let mut failures: u64 = 0;

            loop {
                match listener.accept().await {
                    Ok(stream) => {
                        debug!(listener = %label, "accepted connection");
                        let session = agent.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(session, stream).await {
                                warn!("agent session ended: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(listener = %label, failures, "accept failed: {e}");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        })
    }

    /// Spawn one accept loop per listener, labelled by position.
    pub fn serve_all<L, I>(&self, listeners: I) -> Vec<JoinHandle<()>>
    where
        L: ListeningSocket + fmt::Debug + Send + 'static,
        I: IntoIterator<Item = L>,
    {
        let handles: Vec<JoinHandle<()>> = listeners
            .into_iter()
            .enumerate()
            .map(|(idx, listener)| self.serve(listener, format!("fd#{idx}")))
            .collect();

        if handles.is_empty() {
            warn!("no listening sockets were passed in; no clients will be served");
        }
        handles
    }
}

/// Answer requests on one client connection until the client hangs up.
pub async fn serve_connection<A, S>(mut agent: A, stream: S) -> Result<(), AgentError>
where
    A: RawSession,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut adapter = Framed::new(stream, Codec::<Request, Reply>::default());

    while let Some(request) = adapter.try_next().await? {
        let reply = respond(&mut agent, request).await;
        adapter.send(reply).await?;
    }
    Ok(())
}

/// Run one request against `agent`.
///
/// Errors turn into failure replies, extension errors into
/// `SSH_AGENT_EXTENSION_FAILURE`.
async fn respond<A: RawSession>(agent: &mut A, request: Request) -> Reply {
    let reply = match request {
        Request::RequestIdentities => agent.list_identities().await.map(Reply::Identities),
        request => agent.handle(request).await.map(Reply::Response),
    };

    reply.unwrap_or_else(|e| match e {
        AgentError::ExtensionFailure => Reply::from(Response::ExtensionFailure),
        e => {
            debug!("request failed: {e}");
            Reply::from(Response::Failure)
        }
    })
}
