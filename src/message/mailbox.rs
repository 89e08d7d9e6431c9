use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use log::trace;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use crate::error::{Error, Result};
use super::comm::Communicator;
use super::util;




const HEADER_SIZE: usize = 16;




/// Identifies one collective exchange. Every rank draws tags from
/// `Mailbox::next_tag` in the same order, so a tag names the same exchange
/// everywhere.
pub type Tag = u64;




/**
 * Tagged point-to-point messaging and collectives over a `Communicator`.
 *
 * Each message carries an envelope with the sender's rank and a tag. A
 * receive for a particular `(source, tag)` pair takes messages off the
 * transport until the match arrives, stashing the others for later
 * receives. Collectives are binomial trees rooted at rank 0.
 */
pub struct Mailbox {
    comm: Box<dyn Communicator>,
    stash: Mutex<HashMap<(usize, Tag), VecDeque<Vec<u8>>>>,
    seq: AtomicU64,
}




// ============================================================================
impl Mailbox {

    pub fn new<C: Communicator + 'static>(comm: C) -> Self {
        Self {
            comm: Box::new(comm),
            stash: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /**
     * Return a fresh tag. This is a collective call in the sense that ranks
     * must draw tags in the same sequence.
     */
    pub fn next_tag(&self) -> Tag {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn send_tagged(&self, dest: usize, tag: Tag, payload: &[u8]) -> Result<()> {
        let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
        message.extend_from_slice(&(self.rank() as u64).to_le_bytes());
        message.extend_from_slice(&tag.to_le_bytes());
        message.extend_from_slice(payload);
        self.comm.send(dest, message)
    }

    /**
     * Block until the message with the given source and tag arrives, and
     * return its payload.
     */
    pub fn recv_tagged(&self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        if let Some(payload) = self.take_stashed(source, tag) {
            return Ok(payload);
        }

        loop {
            let mut message = self.comm.recv()?;

            if message.len() < HEADER_SIZE {
                return Err(Error::Transport(format!("received a {} byte message with no envelope", message.len())));
            }
            let mut header = &message[..HEADER_SIZE];
            let from = util::read_u64(&mut header)? as usize;
            let with = util::read_u64(&mut header)?;
            let payload = message.split_off(HEADER_SIZE);

            if from == source && with == tag {
                return Ok(payload);
            }
            trace!("stashing message from {} with tag {}", from, with);
            self.stash.lock().entry((from, with)).or_default().push_back(payload);
        }
    }

    pub fn send_value<T: Serialize>(&self, dest: usize, tag: Tag, value: &T) -> Result<()> {
        self.send_tagged(dest, tag, &rmp_serde::to_vec(value)?)
    }

    pub fn recv_value<T: DeserializeOwned>(&self, source: usize, tag: Tag) -> Result<T> {
        Ok(rmp_serde::from_slice(&self.recv_tagged(source, tag)?)?)
    }

    /**
     * Binomial tree broadcast from rank 0. The value must be `Some` on rank
     * 0; it is ignored elsewhere.
     */
    pub fn broadcast<T>(&self, value: Option<T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let tag = self.next_tag();
        let r = self.rank();
        let p = self.size();

        let value = if r == 0 {
            value.ok_or_else(|| Error::InvalidInput("broadcast root has no value".into()))?
        } else {
            self.recv_value(r - (1 << r.trailing_zeros()), tag)?
        };

        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send_value(r + one, tag, &value)?
            }
        }
        Ok(value)
    }

    /**
     * Binomial tree reduce to rank 0 with a commutative operator. Returns
     * `Some` on rank 0 and `None` elsewhere.
     */
    pub fn reduce<T, F>(&self, mut value: T, f: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        let tag = self.next_tag();
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv_value(r + one, tag)?)
                }
            } else {
                self.send_value(r - one, tag, &value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /**
     * Reduce then broadcast, so every rank gets the same result.
     */
    pub fn all_reduce<T, F>(&self, value: T, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
    {
        let reduced = self.reduce(value, f)?;
        self.broadcast(reduced)
    }

    /**
     * Element-wise maximum over ranks, delivered to rank 0 only.
     */
    pub fn reduce_max_u64(&self, values: Vec<u64>) -> Result<Option<Vec<u64>>> {
        self.reduce(values, |a, b| a.into_iter().zip(b).map(|(a, b)| a.max(b)).collect())
    }

    pub fn all_reduce_sum_f64(&self, value: f64) -> Result<f64> {
        self.all_reduce(value, |a, b| a + b)
    }

    pub fn all_reduce_max_f64(&self, value: f64) -> Result<f64> {
        self.all_reduce(value, f64::max)
    }

    pub fn barrier(&self) -> Result<()> {
        self.all_reduce((), |_, _| ())
    }

    fn take_stashed(&self, source: usize, tag: Tag) -> Option<Vec<u8>> {
        let mut stash = self.stash.lock();
        let queue = stash.get_mut(&(source, tag))?;
        let payload = queue.pop_front();

        if queue.is_empty() {
            stash.remove(&(source, tag));
        }
        payload
    }
}
