//! Certificate-augmenting SSH agent.
//!
//! Sits in front of an existing agent (usually a forwarded one) and adds
//! OpenSSH certificates to its identity list: whenever the upstream agent
//! lists a key that one of the configured certificates was issued over, the
//! certificate is listed as well, so clients can use certificate
//! authentication with a key whose agent knows nothing about certificates.
//!
//! # Architecture
//!
//! ```text
//!  key files ── keyfile::load_files() ── CertIndex (Arc, immutable)
//!                                            │
//!  SSH_AUTH_SOCK ── AgentClient ── Mutex ── CertAgent ◄── Dispatcher
//!                                                           │
//!                                              one accept loop per listener
//!                                                           │
//!                                          per-connection session (clone)
//! ```
//!
//! The index is built once before any connection is accepted and is only
//! read afterwards.  Identity lists travel as raw key blobs ([`wire`]) so
//! certificates are passed on byte for byte.

pub mod dispatch;
pub mod error;
pub mod index;
pub mod keyfile;
pub mod session;
pub mod upstream;
pub mod wire;

pub use dispatch::Dispatcher;
pub use error::KeyFileError;
pub use index::CertIndex;
pub use keyfile::{CertEntry, KeyRecord};
pub use session::{CertAgent, RawSession};
pub use upstream::AgentClient;
pub use wire::{ListedIdentity, Reply};
