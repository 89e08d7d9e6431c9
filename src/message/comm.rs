use crate::error::Result;

/// Interface for a group of processes that can exchange messages. The
/// underlying transport can be in-process channels, TCP, or a higher level
/// abstraction like MPI. Message matching, tags, and collectives are layered
/// on top by `Mailbox`, so implementors only move opaque byte buffers.
///
pub trait Communicator: Send + Sync {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peer processes in this
    /// communicator, including this one.
    fn size(&self) -> usize;

    /// Must be implemented to send a message to a peer. This method must
    /// return without waiting for a matching receive to be posted. Messages
    /// from one process to another arrive in the order they were sent.
    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message from any of the peers. This
    /// method is allowed to block until a message is ready to be received.
    fn recv(&self) -> Result<Vec<u8>>;
}
