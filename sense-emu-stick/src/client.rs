//! Reader side of the joystick event bus
//!
//! A reader binds its own socket, then says `hello` to the writer once a
//! second for as long as it lives. The writer ignores repeats, so this both
//! registers the reader and reconnects it after the writer restarts.
//!
//! Events can be pulled ([`read_event`](StickClient::read_event),
//! [`wait_for_event`](StickClient::wait_for_event),
//! [`get_events`](StickClient::get_events)) or pushed to callbacks, which
//! run on a background thread that exists only while a callback is set.
//! Pulled reads and callbacks compete for the same events.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::StickError;
use crate::event::{Direction, EventRecord, InputEvent};
use crate::socket::{is_peer_gone, is_timeout, Socket, StickAddress, HELLO};

/// How often a reader re-announces itself
const HELLO_INTERVAL: Duration = Duration::from_secs(1);

/// How long the callback thread blocks before checking whether to stop
const CALLBACK_POLL: Duration = Duration::from_millis(100);

/// Handler invoked with each event
pub type Callback = Arc<dyn Fn(InputEvent) + Send + Sync>;

/// Which events a callback is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Direction(Direction),
    /// Every event, after the direction's own callback
    Any,
}

type CallbackMap = HashMap<Binding, Callback>;

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Joystick event reader
pub struct StickClient {
    socket: Arc<Mutex<Socket>>,
    own_path: Option<PathBuf>,
    hello_stop: Option<mpsc::Sender<()>>,
    hello_handle: Option<JoinHandle<()>>,
    callbacks: Arc<Mutex<CallbackMap>>,
    callback_worker: Option<Worker>,
}

impl StickClient {
    /// Connect to the writer at the platform default address
    pub fn new() -> Result<Self, StickError> {
        Self::connect(StickAddress::platform_default())
    }

    /// Connect to the writer at `server`
    ///
    /// Succeeds even when no writer is running yet; the reader registers
    /// as soon as one appears.
    pub fn connect(server: StickAddress) -> Result<Self, StickError> {
        let (socket, own_path) =
            Socket::bind_client(&server).map_err(|source| StickError::Bind {
                addr: server.to_string(),
                source,
            })?;
        let hello_socket = socket.try_clone()?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let hello_handle = std::thread::Builder::new()
            .name("stick-hello".into())
            .spawn(move || run_hello_loop(hello_socket, server, stop_rx))?;

        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
            own_path,
            hello_stop: Some(stop_tx),
            hello_handle: Some(hello_handle),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            callback_worker: None,
        })
    }

    /// Read the next event
    ///
    /// `None` waits forever, `Some(Duration::ZERO)` only checks for an event
    /// already queued. Returns `Ok(None)` when the timeout expires.
    pub fn read_event(&self, timeout: Option<Duration>) -> Result<Option<InputEvent>, StickError> {
        Ok(read_event(&self.socket, timeout)?)
    }

    /// Block until an event arrives
    ///
    /// With `empty_buffer`, events that were already queued are discarded
    /// first, so only a fresh event is returned.
    pub fn wait_for_event(&self, empty_buffer: bool) -> Result<InputEvent, StickError> {
        if empty_buffer {
            let dropped = self.get_events()?;
            if !dropped.is_empty() {
                trace!("Discarded {} queued stick events", dropped.len());
            }
        }
        loop {
            if let Some(event) = self.read_event(None)? {
                return Ok(event);
            }
        }
    }

    /// Every event queued since the last read, without blocking
    pub fn get_events(&self) -> Result<Vec<InputEvent>, StickError> {
        let mut events = Vec::new();
        while let Some(event) = self.read_event(Some(Duration::ZERO))? {
            events.push(event);
        }
        Ok(events)
    }

    /// Set or clear the callback for `binding`
    ///
    /// The callback thread starts with the first callback and stops when
    /// the last one is cleared.
    pub fn set_callback(
        &mut self,
        binding: Binding,
        callback: Option<Callback>,
    ) -> Result<(), StickError> {
        let empty = {
            let mut callbacks = self.callbacks.lock();
            match callback {
                Some(callback) => {
                    callbacks.insert(binding, callback);
                }
                None => {
                    callbacks.remove(&binding);
                }
            }
            callbacks.is_empty()
        };

        if empty {
            self.stop_callbacks();
        } else if self.callback_worker.is_none() {
            self.start_callbacks()?;
        }
        Ok(())
    }

    /// Call `f` for every event in `direction`
    pub fn on<F>(&mut self, direction: Direction, f: F) -> Result<(), StickError>
    where
        F: Fn(InputEvent) + Send + Sync + 'static,
    {
        self.set_callback(Binding::Direction(direction), Some(Arc::new(f)))
    }

    /// Call `f` for every event
    pub fn on_any<F>(&mut self, f: F) -> Result<(), StickError>
    where
        F: Fn(InputEvent) + Send + Sync + 'static,
    {
        self.set_callback(Binding::Any, Some(Arc::new(f)))
    }

    pub fn clear_callback(&mut self, binding: Binding) -> Result<(), StickError> {
        self.set_callback(binding, None)
    }

    /// Whether a callback is registered for `binding`
    pub fn has_callback(&self, binding: Binding) -> bool {
        self.callbacks.lock().contains_key(&binding)
    }

    /// Whether the callback thread is running
    pub fn callbacks_running(&self) -> bool {
        self.callback_worker.is_some()
    }

    fn start_callbacks(&mut self) -> Result<(), StickError> {
        let running = Arc::new(AtomicBool::new(true));
        let socket = Arc::clone(&self.socket);
        let callbacks = Arc::clone(&self.callbacks);
        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("stick-callbacks".into())
            .spawn(move || run_callback_loop(socket, callbacks, flag))?;
        debug!("Stick callback thread started");
        self.callback_worker = Some(Worker { running, handle });
        Ok(())
    }

    fn stop_callbacks(&mut self) {
        if let Some(worker) = self.callback_worker.take() {
            worker.running.store(false, Ordering::Relaxed);
            if worker.handle.join().is_err() {
                warn!("Stick callback thread panicked");
            }
            debug!("Stick callback thread stopped");
        }
    }

    /// Stop background threads and remove the reader's socket file
    pub fn close(&mut self) {
        self.stop_callbacks();
        self.hello_stop.take();
        if let Some(handle) = self.hello_handle.take() {
            if handle.join().is_err() {
                warn!("Stick hello thread panicked");
            }
        }
        if let Some(path) = self.own_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl Drop for StickClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_hello_loop(socket: Socket, server: StickAddress, stop: mpsc::Receiver<()>) {
    debug!("Stick reader announcing to {}", server);
    loop {
        match socket.send_to(HELLO, &server) {
            Ok(_) => trace!("Sent hello to {}", server),
            // No writer yet; try again next interval
            Err(e) if is_peer_gone(&e) || e.kind() == io::ErrorKind::NotConnected => {
                trace!("Stick server not available: {}", e)
            }
            Err(e) if is_timeout(&e) => {}
            Err(e) => warn!("Hello to {} failed: {}", server, e),
        }
        match stop.recv_timeout(HELLO_INTERVAL) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }
    debug!("Stick hello thread exiting");
}

fn run_callback_loop(
    socket: Arc<Mutex<Socket>>,
    callbacks: Arc<Mutex<CallbackMap>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match read_event(&socket, Some(CALLBACK_POLL)) {
            Ok(Some(event)) => dispatch(&callbacks, event),
            Ok(None) => {}
            Err(e) => {
                warn!("Stick callback read error: {}", e);
                std::thread::sleep(CALLBACK_POLL);
            }
        }
    }
}

fn dispatch(callbacks: &Mutex<CallbackMap>, event: InputEvent) {
    // Clone out so user code never runs under the lock
    let (direction, any) = {
        let callbacks = callbacks.lock();
        (
            callbacks.get(&Binding::Direction(event.direction)).cloned(),
            callbacks.get(&Binding::Any).cloned(),
        )
    };
    if let Some(callback) = direction {
        callback(event);
    }
    if let Some(callback) = any {
        callback(event);
    }
}

fn read_event(socket: &Mutex<Socket>, timeout: Option<Duration>) -> io::Result<Option<InputEvent>> {
    let socket = socket.lock();
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut buf = [0u8; 64];

    loop {
        let result = match deadline {
            None => {
                socket.set_read_timeout(None)?;
                socket.recv(&mut buf)
            }
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    socket.set_nonblocking(true)?;
                    let result = socket.recv(&mut buf);
                    socket.set_nonblocking(false)?;
                    result
                } else {
                    socket.set_read_timeout(Some(remaining))?;
                    socket.recv(&mut buf)
                }
            }
        };

        match result {
            Ok(n) => match EventRecord::parse(&buf[..n]).and_then(|r| r.to_event()) {
                Some(event) => return Ok(Some(event)),
                None => trace!("Dropped {} byte non-joystick datagram", n),
            },
            Err(e) if is_timeout(&e) => return Ok(None),
            // Stale ICMP error from a hello sent while no writer was up
            Err(e) if is_peer_gone(&e) => continue,
            Err(e) => return Err(e),
        }
    }
}
