//! Query server: answers match requests from renderer processes over TCP.
//!
//! One task per connection, requests on a connection handled strictly in
//! order. [`QueryServer::cancel`] stops the accept loop and wakes every
//! connection blocked on a read or on a write to a peer that stopped reading;
//! [`QueryServer::serve`] returns once all of them are gone. The active index can be replaced at any time with
//! [`QueryServer::swap_index`]; a request that already loaded the old one
//! finishes against it.

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::index::FontFaceIndex;
use crate::matcher::{FontMatcher, MatchQuery};
use crate::protocol::{
    decode, encode, read_frame, write_frame, QueryRequest, QueryResponse, DEFAULT_MAX_FRAME_LEN,
};

/// Where the server listens unless told otherwise.
pub const DEFAULT_BIND: &str = "127.0.0.1:47215";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle of one client connection.
#[derive(Debug)]
enum ConnectionState {
    Connected,
    AwaitingRequest,
    Processing(MatchQuery),
    Responding(QueryResponse),
    Closed(CloseReason),
}

#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    Cancelled,
    Protocol(ProtocolError),
}

pub struct QueryServer {
    matcher: ArcSwap<FontMatcher>,
    generation: AtomicU64,
    shutdown: watch::Sender<bool>,
    max_frame_len: usize,
}

impl QueryServer {
    pub fn new(index: FontFaceIndex) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            matcher: ArcSwap::from_pointee(FontMatcher::new(index)),
            generation: AtomicU64::new(0),
            shutdown,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Current matcher snapshot.
    pub fn matcher(&self) -> Arc<FontMatcher> {
        self.matcher.load_full()
    }

    /// Install a new index. Returns the new generation number.
    pub fn swap_index(&self, index: FontFaceIndex) -> u64 {
        let faces = index.len();
        self.matcher.store(Arc::new(FontMatcher::new(index)));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, faces, "index swapped");
        generation
    }

    /// How many times the index has been swapped since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Ask the server to stop. Safe to call any number of times, from any
    /// thread, before or during [`serve`](Self::serve).
    pub fn cancel(&self) {
        let was_cancelled = self.shutdown.send_replace(true);
        if !was_cancelled {
            info!("query server cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Bind `addr` and serve until cancelled.
    pub async fn run(self: Arc<Self>, addr: &str) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(addr = %local, "query server listening");

        let mut shutdown = self.shutdown.subscribe();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancelled(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        connections.spawn(async move { server.handle_connection(stream, peer).await });
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        // Connections watch the same flag; this only waits for them to notice.
        while connections.join_next().await.is_some() {}
        info!(addr = %local, "query server stopped");
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let mut shutdown = self.shutdown.subscribe();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut served = 0usize;
        let mut state = ConnectionState::Connected;

        loop {
            state = match state {
                ConnectionState::Connected => {
                    debug!(%peer, generation = self.generation(), "client connected");
                    ConnectionState::AwaitingRequest
                }
                ConnectionState::AwaitingRequest => tokio::select! {
                    _ = cancelled(&mut shutdown) => {
                        ConnectionState::Closed(CloseReason::Cancelled)
                    }
                    frame = read_frame(&mut reader, self.max_frame_len) => match frame {
                        Ok(Some(payload)) => match decode::<QueryRequest>(&payload).and_then(QueryRequest::into_query) {
                            Ok(query) => ConnectionState::Processing(query),
                            Err(err) => ConnectionState::Closed(CloseReason::Protocol(err)),
                        },
                        Ok(None) => ConnectionState::Closed(CloseReason::PeerClosed),
                        Err(err) => ConnectionState::Closed(CloseReason::Protocol(err)),
                    },
                },
                ConnectionState::Processing(query) => {
                    let matcher = self.matcher.load();
                    let result = matcher.find(&query);
                    ConnectionState::Responding(QueryResponse::from(&result))
                }
                ConnectionState::Responding(response) => match encode(&response) {
                    Ok(payload) => tokio::select! {
                        _ = cancelled(&mut shutdown) => {
                            ConnectionState::Closed(CloseReason::Cancelled)
                        }
                        written = write_frame(&mut writer, &payload) => match written {
                            Ok(()) => {
                                served += 1;
                                ConnectionState::AwaitingRequest
                            }
                            Err(err) => ConnectionState::Closed(CloseReason::Protocol(err)),
                        },
                    },
                    Err(err) => ConnectionState::Closed(CloseReason::Protocol(err)),
                },
                ConnectionState::Closed(reason) => {
                    match reason {
                        CloseReason::Protocol(err) => {
                            warn!(%peer, served, error = %err, "closing connection")
                        }
                        other => debug!(%peer, served, reason = ?other, "connection closed"),
                    }
                    break;
                }
            };
        }
    }

    /// Run the server on a dedicated thread with its own runtime, for callers
    /// that are not async themselves. The listener is bound before this
    /// returns, so the reported address is immediately connectable.
    pub fn start(self: Arc<Self>, addr: &str) -> io::Result<RunningServer> {
        let listener = StdTcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("subfont-query")
            .enable_all()
            .build()?;

        let server = Arc::clone(&self);
        let thread = thread::Builder::new()
            .name("subfont-server".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener)?;
                    server.serve(listener).await
                })
            })?;

        Ok(RunningServer {
            server: self,
            local_addr,
            thread,
        })
    }
}

/// Resolves once cancellation is requested (or the server is gone).
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|cancelled| *cancelled).await;
}

/// Handle to a server started with [`QueryServer::start`].
pub struct RunningServer {
    server: Arc<QueryServer>,
    local_addr: SocketAddr,
    thread: JoinHandle<io::Result<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn server(&self) -> &Arc<QueryServer> {
        &self.server
    }

    pub fn cancel(&self) {
        self.server.cancel();
    }

    /// Cancel and wait for the serving thread to finish.
    pub fn shutdown(self) -> io::Result<()> {
        self.server.cancel();
        self.thread
            .join()
            .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "server thread panicked")))
    }
}
