//! Writer side of the joystick event bus

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use zerocopy::IntoBytes;

use crate::error::StickError;
use crate::event::{Action, Direction, EventRecord, InputEvent};
#[cfg(unix)]
use crate::socket::remove_socket_file;
use crate::socket::{is_peer_gone, is_timeout, Socket, StickAddress, HELLO};

/// Longest the serve loop waits for an outgoing event before checking for
/// new readers again
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Largest datagram accepted from a reader
const MAX_HELLO_LEN: usize = 64;

/// Broadcasts joystick events to every reader that has said hello
///
/// Events are queued and sent from a background thread, so
/// [`send`](Self::send) never blocks on slow or vanished readers.
pub struct StickServer {
    address: StickAddress,
    queue: Option<mpsc::Sender<EventRecord>>,
    readers: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl StickServer {
    /// Bind the platform default address
    pub fn new() -> Result<Self, StickError> {
        Self::bind(StickAddress::platform_default())
    }

    /// Bind `address`, replacing any socket left behind by a previous writer
    pub fn bind(address: StickAddress) -> Result<Self, StickError> {
        let (socket, address) = Socket::bind_server(&address).map_err(|source| StickError::Bind {
            addr: address.to_string(),
            source,
        })?;
        socket.set_nonblocking(true)?;

        let (tx, rx) = mpsc::channel();
        let readers = Arc::new(AtomicUsize::new(0));
        let reader_count = Arc::clone(&readers);
        let loop_address = address.clone();
        let handle = std::thread::Builder::new()
            .name("stick-server".into())
            .spawn(move || run_serve_loop(socket, loop_address, rx, reader_count))?;

        info!("Stick server listening on {}", address);
        Ok(Self {
            address,
            queue: Some(tx),
            readers,
            handle: Some(handle),
        })
    }

    /// Address readers should say hello to
    pub fn address(&self) -> &StickAddress {
        &self.address
    }

    /// Number of readers currently in the broadcast set
    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Relaxed)
    }

    /// Queue an event for broadcast
    pub fn send(&self, event: &InputEvent) -> Result<(), StickError> {
        self.send_record(EventRecord::from(event))
    }

    /// Queue an event stamped with the current time
    pub fn send_key(&self, direction: Direction, action: Action) -> Result<(), StickError> {
        self.send(&InputEvent::now(direction, action))
    }

    /// Queue a raw wire record for broadcast
    pub fn send_record(&self, record: EventRecord) -> Result<(), StickError> {
        let queue = self.queue.as_ref().ok_or(StickError::Closed)?;
        queue.send(record).map_err(|_| StickError::Closed)
    }

    /// Flush queued events, stop the serve loop and remove the socket
    pub fn close(&mut self) {
        // Dropping the sender wakes the loop once the queue drains
        self.queue.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Stick server thread panicked");
            }
        }
    }
}

impl Drop for StickServer {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_serve_loop(
    socket: Socket,
    address: StickAddress,
    queue: mpsc::Receiver<EventRecord>,
    reader_count: Arc<AtomicUsize>,
) {
    debug!("Stick server thread started");
    let mut readers: HashSet<StickAddress> = HashSet::new();

    loop {
        accept_hellos(&socket, &mut readers);
        reader_count.store(readers.len(), Ordering::Relaxed);

        match queue.recv_timeout(POLL_INTERVAL) {
            Ok(record) => {
                broadcast(&socket, &mut readers, &record);
                reader_count.store(readers.len(), Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    #[cfg(unix)]
    {
        if let StickAddress::Unix(path) = &address {
            if let Err(e) = remove_socket_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
    reader_count.store(0, Ordering::Relaxed);
    debug!("Stick server on {} exiting", address);
}

/// Drain every pending datagram, registering its sender as a reader
fn accept_hellos(socket: &Socket, readers: &mut HashSet<StickAddress>) {
    let mut buf = [0u8; MAX_HELLO_LEN];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((n, Some(peer))) if &buf[..n] == HELLO => {
                if readers.insert(peer.clone()) {
                    info!("Stick reader registered: {}", peer);
                }
            }
            Ok((n, Some(peer))) => trace!("Ignoring {} byte datagram from {}", n, peer),
            Ok((_, None)) => trace!("Ignoring datagram from unnamed socket"),
            Err(e) if is_timeout(&e) => break,
            // ICMP errors from earlier sends to dead UDP readers surface here
            Err(e) if is_peer_gone(&e) => continue,
            Err(e) => {
                warn!("Stick server receive error: {}", e);
                break;
            }
        }
    }
}

fn broadcast(socket: &Socket, readers: &mut HashSet<StickAddress>, record: &EventRecord) {
    let bytes = record.as_bytes();
    readers.retain(|peer| match socket.send_to(bytes, peer) {
        Ok(_) => true,
        Err(e) if is_peer_gone(&e) => {
            info!("Stick reader gone: {}", peer);
            false
        }
        Err(e) => {
            debug!("Send to {} failed: {}", peer, e);
            true
        }
    });
    trace!("Broadcast {:?} to {} readers", record, readers.len());
}
