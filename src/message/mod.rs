//! This module exports a minimal message-passing API. A `Communicator`
//! moves opaque byte buffers between ranks; implementors only write `send`
//! and `recv` for a given transport (in-process channels and a pure-Rust TCP
//! transport are included). A `Mailbox` layers tagged matching and binomial
//! tree broadcast, reduce, and all-reduce on top.
//!

mod backoff;
pub mod comm;
pub mod local;
pub mod mailbox;
pub mod tcp;
pub mod util;

pub use comm::Communicator;
pub use local::LocalCommunicator;
pub use mailbox::{Mailbox, Tag};
pub use tcp::TcpCommunicator;
