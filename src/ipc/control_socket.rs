use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use mio::net::{UnixListener, UnixStream};
use mio::{Interest, Token};
use socket2::{Domain, SockAddr, Socket, Type};
use tracing::{debug, error, info, trace, warn};

use crate::dispatcher::{Dispatcher, EventKind};
use crate::error::{Result, StatsError};

/// Identifier assigned to each accepted control client.
pub type ClientId = u64;

/// A connected inspection client.
#[derive(Debug)]
pub struct ControlClient {
    id: ClientId,
    stream: UnixStream,
    token: Token,
}

impl ControlClient {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// The client's socket, for request/response handling built on top of
    /// the tracked client list.
    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }
}

/// Unix-domain listener through which external clients attach to the worker.
///
/// Clients are tracked only for their connection lifecycle; anything they
/// write is read and discarded.
#[derive(Debug)]
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    token: Option<Token>,
    clients: HashMap<ClientId, ControlClient>,
    next_client_id: ClientId,
    // Set when an accept failed before the backlog was drained. Readiness is
    // edge-triggered, so no new event arrives for what is still queued.
    accept_retry: bool,
}

impl ControlServer {
    /// Bind and listen on `path`, replacing a stale socket file if present.
    pub fn bind(path: impl AsRef<Path>, backlog: i32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let wrap = |source: io::Error| StatsError::ControlSocket {
            path: path.clone(),
            source,
        };

        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(wrap(e));
            }
        }

        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(wrap)?;
        let address = SockAddr::unix(&path).map_err(wrap)?;
        socket.bind(&address).map_err(wrap)?;
        socket.listen(backlog).map_err(wrap)?;
        socket.set_nonblocking(true).map_err(wrap)?;

        let listener = UnixListener::from_std(socket.into());
        debug!("Control socket listening on {} (backlog {})", path.display(), backlog);

        Ok(Self {
            listener,
            path,
            token: None,
            clients: HashMap::new(),
            next_client_id: 1,
            accept_retry: false,
        })
    }

    /// Add the listening socket to the event loop.
    pub fn register(&mut self, dispatcher: &mut Dispatcher) -> Result<()> {
        let token = dispatcher
            .add(&mut self.listener, EventKind::ControlListener, Interest::READABLE)
            .map_err(|source| StatsError::ControlSocket {
                path: self.path.clone(),
                source,
            })?;
        self.token = Some(token);
        info!("Control socket ready at {}", self.path.display());
        Ok(())
    }

    /// Accept every connection waiting in the backlog.
    ///
    /// Returns how many clients were added. An accept failure (for example
    /// running out of file descriptors) is logged and leaves the rest of the
    /// backlog queued; [`accept_retry_pending`](Self::accept_retry_pending)
    /// then reports `true` until a later call drains it.
    pub fn accept_pending(&mut self, dispatcher: &mut Dispatcher) -> usize {
        let mut accepted = 0;
        loop {
            let stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.accept_retry = false;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if !self.accept_retry {
                        warn!("Failed to accept control connection: {}", e);
                    }
                    self.accept_retry = true;
                    break;
                }
            };
            if self.add_client(stream, dispatcher).is_some() {
                accepted += 1;
            }
        }
        accepted
    }

    fn add_client(&mut self, mut stream: UnixStream, dispatcher: &mut Dispatcher) -> Option<ClientId> {
        let id = self.next_client_id;
        self.next_client_id += 1;

        // Only disconnects matter, but a hang-up is reported through
        // readable interest.
        match dispatcher.add(&mut stream, EventKind::ControlClient(id), Interest::READABLE) {
            Ok(token) => {
                self.clients.insert(id, ControlClient { id, stream, token });
                debug!("Control client {} connected ({} total)", id, self.clients.len());
                Some(id)
            }
            Err(e) => {
                error!("Could not register control client {}: {}", id, e);
                None
            }
        }
    }

    /// Handle a readiness event on a client socket.
    ///
    /// The client is torn down on end-of-file, a read error, or when the
    /// event already carries a hang-up. Returns `true` if it was removed.
    pub fn service_client(
        &mut self,
        id: ClientId,
        hung_up: bool,
        dispatcher: &mut Dispatcher,
    ) -> bool {
        let Some(client) = self.clients.get_mut(&id) else {
            trace!("Event for unknown control client {}", id);
            return false;
        };

        let mut disconnected = hung_up;
        let mut scratch = [0u8; 512];
        while !disconnected {
            match client.stream.read(&mut scratch) {
                Ok(0) => disconnected = true,
                Ok(n) => trace!("Discarded {} bytes from control client {}", n, id),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Control client {} read error: {}", id, e);
                    disconnected = true;
                }
            }
        }

        if disconnected {
            self.remove_client(id, dispatcher);
        }
        disconnected
    }

    /// Deregister, close and forget a client. Returns `false` if unknown.
    pub fn remove_client(&mut self, id: ClientId, dispatcher: &mut Dispatcher) -> bool {
        let Some(mut client) = self.clients.remove(&id) else {
            return false;
        };
        if let Err(e) = dispatcher.remove(&mut client.stream, client.token) {
            warn!("Failed to deregister control client {}: {}", id, e);
        }
        debug!("Control client {} disconnected ({} remaining)", id, self.clients.len());
        // Dropping the client closes its socket.
        true
    }

    /// Whether connections may still be queued after a failed accept.
    pub fn accept_retry_pending(&self) -> bool {
        self.accept_retry
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clients(&self) -> impl Iterator<Item = &ControlClient> {
        self.clients.values()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove socket file {}: {}", self.path.display(), e);
            }
        }
    }
}
