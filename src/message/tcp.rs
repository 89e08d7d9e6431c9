use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use crossbeam_channel::{Receiver, Sender};
use log::{error, info, warn};
use parking_lot::Mutex;
use crate::error::{Error, Result};
use super::{backoff::ExponentialBackoff, comm::Communicator, util};




const RETRY_WAIT: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(5000);
const CONNECT_ATTEMPTS: usize = 40;




/**
 * A communicator whose peers are processes listening on TCP sockets.
 * Messages travel as length-prefixed frames. A background thread owns the
 * outgoing connections, one per peer, so `send` only enqueues. Incoming
 * connections each get a reader thread feeding a single inbox.
 *
 * A frame that cannot be delivered, after reconnecting and writing it once
 * more, stops the send thread. From then on every `send` and `recv` on this
 * rank returns `Error::Transport` naming the failure.
 */
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    outbox: Option<Sender<(usize, Vec<u8>)>>,
    loopback: Sender<Vec<u8>>,
    inbox: Receiver<Vec<u8>>,
    failure: Arc<Mutex<Option<String>>>,
    send_thread_alive: Receiver<()>,
    send_thread: Option<thread::JoinHandle<()>>,
}




// ============================================================================
impl TcpCommunicator {

    /**
     * Bind the listener for this rank and start the transport threads. The
     * peers are addressed by their position in `peers`.
     */
    pub fn new(rank: usize, peers: Vec<SocketAddr>) -> Result<Self> {
        Self::with_connect_attempts(rank, peers, CONNECT_ATTEMPTS)
    }


    fn with_connect_attempts(rank: usize, peers: Vec<SocketAddr>, attempts: usize) -> Result<Self> {
        if rank >= peers.len() {
            return Err(Error::InvalidInput(format!("rank {} is not among {} peers", rank, peers.len())));
        }

        let listener = TcpListener::bind(peers[rank])?;
        info!("listening on {}", peers[rank]);

        let (recv_sink, inbox) = crossbeam_channel::unbounded();
        let (outbox, send_src) = crossbeam_channel::unbounded();
        let (alive, send_thread_alive) = crossbeam_channel::bounded(0);
        let failure = Arc::new(Mutex::new(None));

        Self::start_listener(listener, recv_sink.clone());
        let send_thread = Self::start_sender(peers.clone(), attempts, send_src, alive, failure.clone());

        Ok(Self {
            rank,
            num_peers: peers.len(),
            outbox: Some(outbox),
            loopback: recv_sink,
            inbox,
            failure,
            send_thread_alive,
            send_thread: Some(send_thread),
        })
    }


    /**
     * Run the send loop until the outbox closes or a frame cannot be
     * delivered. The `alive` sender is dropped when the thread ends, which
     * wakes any `recv` waiting on this rank.
     */
    fn start_sender(
        peers: Vec<SocketAddr>,
        attempts: usize,
        send_src: Receiver<(usize, Vec<u8>)>,
        alive: Sender<()>,
        failure: Arc<Mutex<Option<String>>>) -> thread::JoinHandle<()>
    {
        thread::spawn(move || {
            let _alive = alive;
            let mut table: HashMap<usize, BufWriter<TcpStream>> = HashMap::new();

            for (rank, message) in send_src {
                if let Err(e) = Self::deliver(&mut table, peers[rank], rank, attempts, &message) {
                    error!("failed to send message to {}: {}", peers[rank], e);
                    *failure.lock() = Some(format!("rank {} at {} is unreachable: {}", rank, peers[rank], e));
                    break;
                }
            }
        })
    }


    /**
     * Write a frame to a peer, connecting first if needed. A write that
     * fails on an existing connection is tried once more on a new one.
     */
    fn deliver(
        table: &mut HashMap<usize, BufWriter<TcpStream>>,
        addr: SocketAddr,
        rank: usize,
        attempts: usize,
        message: &[u8]) -> io::Result<()>
    {
        let write = |client: &mut BufWriter<TcpStream>| {
            util::write_frame(client, message)?;
            client.flush()
        };

        if let Some(client) = table.get_mut(&rank) {
            match write(client) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("write to {} failed ({}), reconnecting", addr, e);
                    table.remove(&rank);
                }
            }
        }
        let mut client = BufWriter::new(Self::connect_with_retry(addr, attempts)?);
        write(&mut client)?;
        table.insert(rank, client);
        Ok(())
    }


    fn start_listener(listener: TcpListener, recv_sink: Sender<Vec<u8>>) {
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => Self::handle_connection(stream, recv_sink.clone()),
                    Err(e) => warn!("failed to accept connection: {}", e),
                }
            }
        });
    }


    fn handle_connection(stream: TcpStream, recv_sink: Sender<Vec<u8>>) {
        let remote = stream.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        info!("receiving connection from {}", remote);

        thread::spawn(move || {
            let mut reader = BufReader::new(stream);

            loop {
                match util::read_frame(&mut reader) {
                    Ok(bytes) => {
                        if recv_sink.send(bytes).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        info!("connection from {} closed", remote);
                        break;
                    }
                    Err(e) => {
                        error!("connection from {} failed: {}", remote, e);
                        break;
                    }
                }
            }
        });
    }


    fn connect_with_retry(addr: SocketAddr, attempts: usize) -> io::Result<TcpStream> {
        let stream = ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2).retry(
            attempts,
            || TcpStream::connect(addr),
            |e, wait| warn!("connect to {} failed ({}), retrying in {:?}", addr, e, wait))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }


    fn failure(&self) -> Error {
        let reason = self.failure.lock().clone();
        Error::Transport(reason.unwrap_or_else(|| "send thread has stopped".to_string()))
    }


    fn check(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(reason) => Err(Error::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        self.check()?;

        if rank == self.rank {
            return Ok(self.loopback.send(message)?);
        }
        match &self.outbox {
            Some(outbox) => outbox.send((rank, message)).map_err(|_| self.failure()),
            None => Err(Error::Transport("communicator is shut down".into())),
        }
    }

    fn recv(&self) -> Result<Vec<u8>> {
        if let Ok(bytes) = self.inbox.try_recv() {
            return Ok(bytes);
        }
        self.check()?;

        crossbeam_channel::select! {
            recv(self.inbox) -> bytes => Ok(bytes?),
            recv(self.send_thread_alive) -> _ => Err(self.failure()),
        }
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        self.outbox.take();

        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("send thread panicked");
            }
        }
    }
}
