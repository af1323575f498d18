//! Socket activation.
//!
//! Listening sockets are bound by the service manager and passed in through
//! `LISTEN_FDS`/`LISTEN_PID`.  Only Unix stream sockets are accepted; agent
//! clients always connect through a socket path.

use anyhow::{Context as _, Result};
use listenfd::ListenFd;
use tokio::net::UnixListener;
use tracing::debug;

/// Take ownership of every passed-in listening socket.
///
/// Returns an empty list when the process was not socket-activated.  Must be
/// called from within the tokio runtime.
pub fn listeners() -> Result<Vec<UnixListener>> {
    let mut fds = ListenFd::from_env();
    let mut listeners = Vec::with_capacity(fds.len());

    for idx in 0..fds.len() {
        let listener = fds
            .take_unix_listener(idx)
            .with_context(|| format!("passed socket #{idx} is not a Unix stream listener"))?
            .with_context(|| format!("passed socket #{idx} is missing"))?;

        listener
            .set_nonblocking(true)
            .with_context(|| format!("set passed socket #{idx} non-blocking"))?;
        let listener = UnixListener::from_std(listener)
            .with_context(|| format!("register passed socket #{idx} with the runtime"))?;

        debug!(idx, addr = ?listener.local_addr().ok(), "adopted activated socket");
        listeners.push(listener);
    }

    Ok(listeners)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_activation_means_no_listeners() {
        // The test harness is never socket-activated.
        if std::env::var_os("LISTEN_FDS").is_some() {
            return;
        }
        assert!(listeners().unwrap().is_empty());
    }
}
