//! Helpers for testing the computation pipeline and its caches.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. Documents read from a dropped directory fail to realize.
//!
//!  - When using [`DocumentServer`], make sure that the server is held until all downloads have
//!    finished. If the server is dropped, all connections to it will fail.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::extract::{self, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::routing::get;
use axum::Router;
use parking_lot::{Condvar, Mutex};
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

use presently_service::pipeline::{Future, Present, RobustHash, SharedFuture};

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `presently_service` crate and
///    mutes all other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("presently_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Polls `condition` until it holds, panicking after a few seconds.
///
/// Evictions and completion callbacks happen on the notification thread of a scheduler, so
/// their effects are only observable eventually.
pub fn eventually(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Counts the values produced by [`CountingFuture`]s that are still alive.
#[derive(Debug, Clone, Default)]
pub struct DropCounter {
    live: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of values that were created and not dropped yet.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    fn track(&self) -> Tracked {
        self.live.fetch_add(1, Ordering::SeqCst);
        Tracked(self.clone())
    }
}

struct Tracked(DropCounter);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
        self.0.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// The value realized by a [`CountingFuture`].
pub struct Counted {
    pub value: i64,
    _tracked: Option<Tracked>,
}

/// A future that realizes to a fixed number and counts its realizations.
///
/// Futures with the same name and value share the same key.
#[derive(Clone)]
pub struct CountingFuture {
    name: &'static str,
    value: i64,
    realized: Arc<AtomicUsize>,
    drops: Option<DropCounter>,
}

impl CountingFuture {
    pub fn new(name: &'static str, value: i64) -> Self {
        Self {
            name,
            value,
            realized: Default::default(),
            drops: None,
        }
    }

    /// Tracks the lifetime of the realized values in `drops`.
    pub fn with_drops(mut self, drops: &DropCounter) -> Self {
        self.drops = Some(drops.clone());
        self
    }

    pub fn realized(&self) -> usize {
        self.realized.load(Ordering::SeqCst)
    }

    pub fn shared(&self) -> SharedFuture {
        Arc::new(self.clone())
    }
}

impl Future for CountingFuture {
    fn realize(&self, _tag: &str) -> Present {
        self.realized.fetch_add(1, Ordering::SeqCst);
        Present::success(Counted {
            value: self.value,
            _tracked: self.drops.as_ref().map(DropCounter::track),
        })
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("CountingFuture");
        hash.accumulate_str("name", self.name);
        hash.accumulate_int("value", self.value);
    }
}

#[derive(Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// A future that blocks until it is opened, and then realizes to its name.
#[derive(Clone)]
pub struct GatedFuture {
    name: &'static str,
    state: Arc<(Mutex<GateState>, Condvar)>,
}

impl GatedFuture {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Default::default(),
        }
    }

    pub fn shared(&self) -> SharedFuture {
        Arc::new(self.clone())
    }

    /// Waits until a realization is blocked on this future.
    pub fn wait_entered(&self) {
        let (state, condvar) = &*self.state;
        let mut state = state.lock();
        while state.entered == 0 {
            condvar.wait(&mut state);
        }
    }

    /// The number of realizations that started.
    pub fn entered(&self) -> usize {
        self.state.0.lock().entered
    }

    pub fn open(&self) {
        let (state, condvar) = &*self.state;
        state.lock().open = true;
        condvar.notify_all();
    }
}

impl Future for GatedFuture {
    fn realize(&self, _tag: &str) -> Present {
        let (state, condvar) = &*self.state;
        let mut state = state.lock();
        state.entered += 1;
        condvar.notify_all();
        while !state.open {
            condvar.wait(&mut state);
        }
        Present::success(self.name)
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("GatedFuture");
        hash.accumulate_str("name", self.name);
    }
}

/// A future that always fails with the given message.
pub struct FailingFuture {
    message: &'static str,
}

impl FailingFuture {
    pub fn shared(message: &'static str) -> SharedFuture {
        Arc::new(Self { message })
    }
}

impl Future for FailingFuture {
    fn realize(&self, _tag: &str) -> Present {
        Present::failure(std::io::Error::other(self.message))
    }

    fn accumulate_robust_hash(&self, hash: &mut RobustHash) {
        hash.accumulate_tag("FailingFuture");
        hash.accumulate_str("message", self.message);
    }
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serves documents from memory and counts the requests per path.
///
/// Documents are served under `/documents/`, and `/respond_statuscode/<num>/` answers every
/// request with the given status.
pub struct DocumentServer {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl DocumentServer {
    pub fn new(documents: impl IntoIterator<Item = (&'static str, &'static [u8])>) -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));
        let documents: Arc<BTreeMap<String, &'static [u8]>> = Arc::new(
            documents
                .into_iter()
                .map(|(path, bytes)| (path.to_owned(), bytes))
                .collect(),
        );

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri), req: Request, next: Next| {
                let hits = hits.clone();
                async move {
                    *hits.lock().entry(uri.path().to_owned()).or_default() += 1;
                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/documents/*path",
                get(move |extract::Path(path): extract::Path<String>| {
                    let documents = documents.clone();
                    async move {
                        match documents.get(&path) {
                            Some(bytes) => Ok(bytes.to_vec()),
                            None => Err(StatusCode::NOT_FOUND),
                        }
                    }
                }),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Takes the number of requests made so far, per path.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}
