use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use crate::error::{Error, Result};
use super::comm::Communicator;




const POLL_INTERVAL: Duration = Duration::from_millis(50);




/**
 * A communicator between threads of one process. Each rank owns the
 * receiving end of its own unbounded channel and a sender to every rank,
 * so sends never block and messages between a pair of ranks stay in order.
 *
 * Since every rank holds a sender to every inbox, an inbox never
 * disconnects. A rank dropped while its thread is panicking marks the group
 * as failed instead, and a `recv` with nothing to deliver then returns
 * `Error::Transport` rather than waiting forever.
 */
pub struct LocalCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
    failed: Arc<AtomicBool>,
}




// ============================================================================
impl LocalCommunicator {

    /**
     * Create `size` connected communicators, one per rank, to be moved onto
     * separate threads.
     */
    pub fn group(size: usize) -> Vec<Self> {
        assert!(size > 0, "a communicator group needs at least one rank");

        let (peers, inboxes): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| crossbeam_channel::unbounded())
            .unzip();
        let failed = Arc::new(AtomicBool::new(false));

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self { rank, peers: peers.clone(), inbox, failed: failed.clone() })
            .collect()
    }

    /**
     * A group of one.
     */
    pub fn serial() -> Self {
        let (sink, inbox) = crossbeam_channel::unbounded();
        Self { rank: 0, peers: vec![sink], inbox, failed: Arc::new(AtomicBool::new(false)) }
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        Ok(self.peers[rank].send(message)?)
    }

    fn recv(&self) -> Result<Vec<u8>> {
        loop {
            match self.inbox.recv_timeout(POLL_INTERVAL) {
                Ok(bytes) => return Ok(bytes),
                Err(RecvTimeoutError::Timeout) if self.failed.load(Ordering::Acquire) => {
                    return Err(Error::Transport("a peer rank panicked".to_string()))
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Transport("all peers hung up".to_string()))
                }
            }
        }
    }
}

impl Drop for LocalCommunicator {
    fn drop(&mut self) {
        if thread::panicking() {
            self.failed.store(true, Ordering::Release);
        }
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use std::thread;
    use super::LocalCommunicator;
    use crate::error::Error;
    use crate::message::comm::Communicator;

    #[test]
    fn group_members_reach_each_other() {
        let mut group = LocalCommunicator::group(3);
        let c2 = group.pop().unwrap();
        let c1 = group.pop().unwrap();
        let c0 = group.pop().unwrap();

        assert_eq!((c0.rank(), c1.rank(), c2.rank()), (0, 1, 2));
        assert!(group.is_empty());

        c0.send(2, vec![1]).unwrap();
        c1.send(2, vec![2]).unwrap();
        c2.send(2, vec![3]).unwrap();

        let mut got: Vec<_> = (0..3).map(|_| c2.recv().unwrap()[0]).collect();
        got.sort_unstable();
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[test]
    fn panicking_rank_fails_a_waiting_peer() {
        let mut group = LocalCommunicator::group(2);
        let c1 = group.pop().unwrap();
        let c0 = group.pop().unwrap();

        let peer = thread::spawn(move || {
            c1.send(0, vec![7]).unwrap();
            panic!("rank 1 gives up");
        });
        assert!(peer.join().is_err());

        assert_eq!(c0.recv().unwrap(), vec![7]);
        assert!(matches!(c0.recv(), Err(Error::Transport(_))));
    }

    #[test]
    fn serial_communicator_talks_to_itself() {
        let comm = LocalCommunicator::serial();
        assert_eq!(comm.size(), 1);
        comm.send(0, b"self".to_vec()).unwrap();
        assert_eq!(comm.recv().unwrap(), b"self");
    }
}
