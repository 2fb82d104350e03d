//! File-based command/response exchange.
//!
//! The shared directory is the wire protocol between the protocol endpoint
//! and the relay running inside the host application:
//!
//! ```text
//!  endpoint                      mcp_comm/                         relay
//!  ────────                      ─────────                         ─────
//!  write (tmp + rename) ──▶  command_<id>.json   ──▶  read, dispatch to host
//!                             response_<id>.json ◀──  write (tmp + rename)
//!  read, delete both    ◀──                           delete command_<id>.json
//!                             server_status.json ◀──  heartbeat
//! ```
//!
//! Every file is a self-contained JSON record keyed by its correlation
//! identifier. Writes go through a temporary file in the same directory and
//! are renamed into place, so a reader never observes a partial record.

mod channel;
mod message;
mod status;

pub use channel::{CommDir, MESSAGE_BOX_FILE, STATUS_FILE};
pub use message::{
    unix_now, Command, CommandName, CorrelationId, Failure, FailureKind, Response, ResponseStatus,
    UnknownCommandName,
};
pub use status::{RelayState, StatusRecord, StatusReport};
