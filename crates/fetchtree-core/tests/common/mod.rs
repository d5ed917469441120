#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fetchtree_core::engine::{EngineDownload, EngineState, Submission, TorrentEngine};
use fetchtree_core::transport::{Fetched, Probe, Request, Transport};
use fetchtree_core::{
    Factory, FetchError, InfoHash, Listener, Node, PR_CONTENT_TYPE, PR_URL, Properties, Resource,
    Result, parse_torrent,
};
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Route {
    body:         Option<Bytes>,
    content_type: Option<String>,
    delay:        Duration,
    fail_probe:   bool,
    fail_fetches: usize,
}

/// In-memory transport scripted per target URL.
#[derive(Default)]
pub struct MockTransport {
    routes:  Mutex<HashMap<String, Route>>,
    fetches: Mutex<HashMap<String, usize>>,
    served:  Mutex<HashMap<String, usize>>,
    probes:  Mutex<HashMap<String, usize>>,
    order:   Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn serve(&self, url: &str, body: impl Into<Bytes>) {
        self.route(url, |r| r.body = Some(body.into()));
    }

    pub fn serve_html(&self, url: &str, html: &str) {
        self.route(url, |r| {
            r.body = Some(Bytes::from(html.to_string()));
            r.content_type = Some("text/html; charset=utf-8".into());
        });
    }

    /// Every fetch and size lookup of `url` fails.
    pub fn fail(&self, url: &str) { self.route(url, |r| r.body = None) }

    /// The first `n` fetches of `url` fail, later ones serve the body.
    pub fn fail_first(&self, url: &str, n: usize) { self.route(url, |r| r.fail_fetches = n) }

    pub fn fail_probe(&self, url: &str) { self.route(url, |r| r.fail_probe = true) }

    pub fn delay(&self, url: &str, delay: Duration) { self.route(url, |r| r.delay = delay) }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }

    /// Fetches of `url` that got past their delay without being cancelled.
    pub fn served_count(&self, url: &str) -> usize {
        self.served.lock().get(url).copied().unwrap_or(0)
    }

    /// Every fetched URL, in the order the fetches began.
    pub fn fetch_order(&self) -> Vec<String> { self.order.lock().clone() }

    pub fn probe_count(&self, url: &str) -> usize {
        self.probes.lock().get(url).copied().unwrap_or(0)
    }

    fn route(&self, url: &str, edit: impl FnOnce(&mut Route)) {
        edit(self.routes.lock().entry(url.to_string()).or_default());
    }

    fn lookup(&self, url: &str) -> Route { self.routes.lock().get(url).cloned().unwrap_or_default() }

    async fn wait(delay: Duration, cancel: &CancellationToken) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn properties(url: &str, route: &Route) -> Properties {
        let mut properties = Properties::new();
        properties.insert(PR_URL, json!(url));
        if let Some(ct) = &route.content_type {
            properties.insert(PR_CONTENT_TYPE, json!(ct));
        }
        properties
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn probe(&self, request: &Request, cancel: &CancellationToken) -> Result<Probe> {
        let url = request.target.to_string();
        *self.probes.lock().entry(url.clone()).or_default() += 1;
        let route = self.lookup(&url);
        Self::wait(route.delay, cancel).await?;

        match &route.body {
            Some(body) if !route.fail_probe => Ok(Probe {
                size:       Some(body.len() as u64),
                properties: Self::properties(&url, &route),
            }),
            _ => Err(FetchError::transport(&url, "probe refused")),
        }
    }

    async fn fetch(&self, request: &Request, cancel: &CancellationToken) -> Result<Fetched> {
        let url = request.target.to_string();
        let attempt = {
            let mut fetches = self.fetches.lock();
            let count = fetches.entry(url.clone()).or_default();
            *count += 1;
            *count
        };
        self.order.lock().push(url.clone());
        let route = self.lookup(&url);
        Self::wait(route.delay, cancel).await?;
        *self.served.lock().entry(url.clone()).or_default() += 1;

        let body = match &route.body {
            Some(body) if attempt > route.fail_fetches => body.clone(),
            _ => return Err(FetchError::transport(&url, "503 Service Unavailable")),
        };
        let mid = body.len() / 2;
        let chunks: Vec<Result<Bytes>> = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        Ok(Fetched {
            size:       Some(body.len() as u64),
            body:       Box::pin(stream::iter(chunks)),
            properties: Self::properties(&url, &route),
        })
    }
}

/// Counts terminal calls and can veto a number of results.
#[derive(Default)]
pub struct Recorder {
    pub completed: AtomicUsize,
    pub failed:    AtomicUsize,
    pub percents:  Mutex<Vec<u8>>,
    pub activity:  Mutex<Vec<String>>,
    pub errors:    Mutex<Vec<FetchError>>,
    vetoes:        AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Rejects the first `n` results offered to it.
    pub fn vetoing(n: usize) -> Arc<Self> {
        let recorder = Self::default();
        recorder.vetoes.store(n, Ordering::SeqCst);
        Arc::new(recorder)
    }

    pub fn terminal_calls(&self) -> usize {
        self.completed.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst)
    }
}

impl Listener for Recorder {
    fn report_activity(&self, _node: &Node, activity: &str) {
        self.activity.lock().push(activity.to_string());
    }

    fn report_percent_complete(&self, _node: &Node, percent: u8) { self.percents.lock().push(percent) }

    fn completed(&self, _node: &Node, _resource: &Resource) -> bool {
        let vetoed = self
            .vetoes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if !vetoed {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        !vetoed
    }

    fn failed(&self, _node: &Node, error: &FetchError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.errors.lock().push(error.clone());
    }
}

pub fn factory(transport: &Arc<MockTransport>) -> Factory {
    Factory::new(transport.clone()).unwrap()
}

/// A download inside [`MockEngine`], driven by its script or by the test.
pub struct MockDownload {
    hash:    InfoHash,
    state:   watch::Sender<EngineState>,
    percent: AtomicU8,
    path:    PathBuf,
}

impl MockDownload {
    pub fn set_state(&self, state: EngineState) {
        if state == EngineState::Seeding {
            self.percent.store(100, Ordering::SeqCst);
        }
        self.state.send_replace(state);
    }

    pub fn set_percent(&self, percent: u8) { self.percent.store(percent, Ordering::SeqCst) }

    pub fn state(&self) -> EngineState { *self.state.borrow() }
}

impl EngineDownload for MockDownload {
    fn info_hash(&self) -> InfoHash { self.hash }

    fn subscribe(&self) -> watch::Receiver<EngineState> { self.state.subscribe() }

    fn percent_complete(&self) -> u8 { self.percent.load(Ordering::SeqCst) }

    fn data_path(&self) -> PathBuf { self.path.clone() }
}

/// Engine that writes `payload` on submit and then plays `script`.
pub struct MockEngine {
    payload:   Bytes,
    script:    Vec<EngineState>,
    step:      Duration,
    downloads: Mutex<HashMap<InfoHash, Arc<MockDownload>>>,
    pub submits: AtomicUsize,
    pub removes: AtomicUsize,
}

impl MockEngine {
    pub fn new(payload: impl Into<Bytes>, script: Vec<EngineState>) -> Arc<Self> {
        Arc::new(Self {
            payload: payload.into(),
            script,
            step: Duration::from_millis(10),
            downloads: Mutex::new(HashMap::new()),
            submits: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        })
    }

    /// Completes every submission: downloading, then seeding (reported twice).
    pub fn seeding(payload: impl Into<Bytes>) -> Arc<Self> {
        Self::new(payload, vec![
            EngineState::Downloading,
            EngineState::Seeding,
            EngineState::Seeding,
        ])
    }

    pub fn download(&self, hash: &InfoHash) -> Option<Arc<MockDownload>> {
        self.downloads.lock().get(hash).cloned()
    }

    /// Registers a download the engine already knows about.
    pub fn preload(&self, hash: InfoHash, state: EngineState, path: PathBuf) -> Arc<MockDownload> {
        let (tx, _) = watch::channel(state);
        let download = Arc::new(MockDownload {
            hash,
            state: tx,
            percent: AtomicU8::new(0),
            path,
        });
        self.downloads.lock().insert(hash, download.clone());
        download
    }
}

#[async_trait]
impl TorrentEngine for MockEngine {
    fn find(&self, hash: &InfoHash) -> Option<Arc<dyn EngineDownload>> {
        self.download(hash).map(|d| d as Arc<dyn EngineDownload>)
    }

    async fn submit(&self, submission: Submission<'_>) -> Result<Arc<dyn EngineDownload>> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        let meta = parse_torrent(submission.torrent.clone())?;
        let path = submission.directory.join(&meta.name);
        tokio::fs::write(&path, &self.payload).await?;

        let download = self.preload(submission.info_hash, EngineState::Queued, path);
        let script = self.script.clone();
        let step = self.step;
        let driven = download.clone();
        tokio::spawn(async move {
            for state in script {
                tokio::time::sleep(step).await;
                driven.set_state(state);
            }
        });
        Ok(download)
    }

    async fn remove(&self, hash: &InfoHash) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        if let Some(download) = self.downloads.lock().remove(hash) {
            download.set_state(EngineState::Removed);
        }
        Ok(())
    }
}

/// Bencoded single-file torrent for `name` of `length` bytes.
pub fn torrent_bytes(name: &str, length: u64) -> Bytes {
    let info = format!(
        "d6:lengthi{length}e4:name{}:{name}12:piece lengthi16384e6:pieces20:{}e",
        name.len(),
        "p".repeat(20)
    );
    Bytes::from(format!("d4:info{info}e"))
}
