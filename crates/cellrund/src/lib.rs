//! cellrund — worker daemon library: the runtime host and built-in
//! services. The binary in `main.rs` wires them to the CLI.

pub mod host;
pub mod services;

pub use host::{Host, HostSummary};
pub use services::{HeartbeatService, TableReport};
