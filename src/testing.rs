//! In-crate fakes for the media and connection collaborators.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::config::CallConfig;
use crate::error::{CallError, Result, StoreError};
use crate::peer::connection::{ConnectionAdapter, ConnectionEvent, PeerConnection, PeerHandle};
use crate::peer::media::{MediaSource, MediaStream, TrackKind};
use crate::peer::types::{IceCandidate, SessionDescription};
use crate::store::{CollectionChange, DocumentStore, MemoryStore};
use crate::subscription::Subscription;

#[derive(Default)]
pub struct FakeMedia {
    pub fail: AtomicBool,
    acquired: AtomicUsize,
    released: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let media = Self::default();
        media.fail.store(true, Ordering::SeqCst);
        media
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire(&self) -> Result<MediaStream> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::MediaUnavailable("camera permission denied".into()));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MediaStream::new(format!("local-{n}"))
            .with_track(TrackKind::Audio, format!("mic-{n}"))
            .with_track(TrackKind::Video, format!("cam-{n}")))
    }

    async fn release(&self, stream: &MediaStream) -> Result<()> {
        self.released.lock().unwrap().push(stream.id.clone());
        Ok(())
    }
}

/// Connection object that "connects" as soon as both descriptions are set,
/// and rejects candidates before a remote description like strict stacks do.
pub struct FakePeer {
    pub id: usize,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
    auto_connect: bool,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    announced: AtomicBool,
    pub remote_sets: AtomicUsize,
    pub added: Mutex<Vec<IceCandidate>>,
    pub attached: Mutex<Vec<String>>,
    pub closed: AtomicUsize,
}

impl FakePeer {
    pub fn candidate(&self, n: u8) -> IceCandidate {
        IceCandidate {
            candidate: format!(
                "candidate:{n} 1 udp 2122260223 10.0.{}.{n} 5000 typ host",
                self.id
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().unwrap().clone()
    }

    pub fn added(&self) -> Vec<IceCandidate> {
        self.added.lock().unwrap().clone()
    }

    fn maybe_connect(&self) {
        let ready = self.local.lock().unwrap().is_some() && self.remote.lock().unwrap().is_some();
        if ready && self.auto_connect && !self.announced.swap(true, Ordering::SeqCst) {
            let stream = MediaStream::new(format!("remote-of-{}", self.id))
                .with_track(TrackKind::Audio, "remote-mic")
                .with_track(TrackKind::Video, "remote-cam");
            let _ = self.tx.send(ConnectionEvent::RemoteStream(stream));
        }
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn attach_local_stream(&self, stream: &MediaStream) -> Result<()> {
        self.attached.lock().unwrap().push(stream.id.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(format!("v=0 fake-offer {}", self.id)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.remote.lock().unwrap().is_none() {
            return Err(CallError::Negotiation("answer without remote offer".into()));
        }
        Ok(SessionDescription::answer(format!("v=0 fake-answer {}", self.id)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(desc);
        let _ = self.tx.send(ConnectionEvent::LocalCandidate(self.candidate(1)));
        let _ = self.tx.send(ConnectionEvent::LocalCandidate(self.candidate(2)));
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if !desc.sdp.starts_with("v=0") {
            return Err(CallError::Negotiation(format!("unparsable sdp {:?}", desc.sdp)));
        }
        *self.remote.lock().unwrap() = Some(desc);
        self.remote_sets.fetch_add(1, Ordering::SeqCst);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if self.remote.lock().unwrap().is_none() {
            return Err(CallError::Negotiation("remote description not set".into()));
        }
        self.added.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

static NEXT_PEER: AtomicUsize = AtomicUsize::new(1);

pub struct FakeConnector {
    auto_connect: bool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            auto_connect: true,
            peers: Mutex::default(),
        }
    }

    /// Connections never report remote media.
    pub fn silent() -> Self {
        Self {
            auto_connect: false,
            peers: Mutex::default(),
        }
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock().unwrap()[index].clone()
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectionAdapter for FakeConnector {
    async fn create(&self, _config: &CallConfig) -> Result<PeerHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peers = self.peers.lock().unwrap();
        let peer = Arc::new(FakePeer {
            id: NEXT_PEER.fetch_add(1, Ordering::SeqCst),
            tx,
            auto_connect: self.auto_connect,
            local: Mutex::default(),
            remote: Mutex::default(),
            announced: AtomicBool::new(false),
            remote_sets: AtomicUsize::new(0),
            added: Mutex::default(),
            attached: Mutex::default(),
            closed: AtomicUsize::new(0),
        });
        peers.push(peer.clone());
        Ok(PeerHandle {
            connection: peer,
            events: rx,
        })
    }
}

/// Shares a [`MemoryStore`] but can misbehave: refuse every `update` the
/// way store rules reject a write, or hand out collection watches that end
/// right away like a dropped listener.
pub struct FaultyStore {
    inner: MemoryStore,
    reject_updates: bool,
    end_collection_watches: bool,
}

impl FaultyStore {
    pub fn new(inner: &MemoryStore) -> Self {
        Self {
            inner: inner.clone(),
            reject_updates: false,
            end_collection_watches: false,
        }
    }

    pub fn rejecting_updates(mut self) -> Self {
        self.reject_updates = true;
        self
    }

    pub fn ending_collection_watches(mut self) -> Self {
        self.end_collection_watches = true;
        self
    }
}

type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> StoreResult<()> {
        if self.reject_updates {
            return Err(StoreError::Unavailable(format!("update of {path} rejected")));
        }
        self.inner.update(path, fields).await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.inner.delete(path).await
    }

    async fn add(&self, collection: &str, value: Value) -> StoreResult<String> {
        self.inner.add(collection, value).await
    }

    async fn list(&self, collection: &str) -> StoreResult<Vec<(String, Value)>> {
        self.inner.list(collection).await
    }

    fn watch_document(&self, path: &str) -> Subscription<StoreResult<Option<Value>>> {
        self.inner.watch_document(path)
    }

    fn watch_collection(&self, collection: &str) -> Subscription<StoreResult<CollectionChange>> {
        if self.end_collection_watches {
            return Subscription::new(futures::stream::empty(), || {});
        }
        self.inner.watch_collection(collection)
    }
}
