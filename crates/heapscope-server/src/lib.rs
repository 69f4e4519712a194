//! Network front end for heapscope: serves the object graph of the host
//! process to remote viewers over a line-oriented TCP protocol.

pub mod client;
pub mod command;
pub mod hardening;
pub mod probe;
pub mod protocol;
pub mod server;

pub use client::{ProbeClient, ProbeClientConfig};
pub use command::{Command, CommandError};
pub use probe::{probe_from_config, snapshot_probe};
pub use protocol::{ProtocolError, MAGIC};
pub use server::{dispatch, ProbeServer, ServerOptions, ServerError};
