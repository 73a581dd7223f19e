//! In-memory stand-ins for the chat sides and external services.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::imgur::{ImageHost, UploadedImage};
use crate::platform::{ChatEndpoint, InboundEvent};
use crate::queue::PendingQueue;
use crate::tvmaze::{Show, ShowLookup};

/// Records everything posted to it and replays pushed events through `recv`
pub struct FakeEndpoint {
    name: &'static str,
    posts: Mutex<Vec<String>>,
    roster_requests: AtomicUsize,
    inbound: PendingQueue<InboundEvent>,
    stalled: bool,
}

impl FakeEndpoint {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            posts: Mutex::new(Vec::new()),
            roster_requests: AtomicUsize::new(0),
            inbound: PendingQueue::new(),
            stalled: false,
        }
    }

    /// An endpoint whose `post` never completes
    pub fn stalled(name: &'static str) -> Self {
        Self {
            stalled: true,
            ..Self::new(name)
        }
    }

    pub fn push(&self, event: InboundEvent) {
        self.inbound.push(event);
    }

    pub async fn posts(&self) -> Vec<String> {
        self.posts.lock().await.clone()
    }

    pub fn roster_requests(&self) -> usize {
        self.roster_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatEndpoint for FakeEndpoint {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn recv(&self) -> Option<InboundEvent> {
        self.inbound.pop().await
    }

    async fn post(&self, text: &str) {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.posts.lock().await.push(text.to_string());
    }

    async fn request_roster(&self) {
        self.roster_requests.fetch_add(1, Ordering::SeqCst);
    }
}

enum LookupOutcome {
    Found(Show),
    Failing(String),
    Panicking,
}

pub struct FakeShows {
    outcome: LookupOutcome,
    queries: Mutex<Vec<String>>,
}

impl FakeShows {
    fn with(outcome: LookupOutcome) -> Self {
        Self {
            outcome,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn found(show: Show) -> Self {
        Self::with(LookupOutcome::Found(show))
    }

    pub fn failing(message: &str) -> Self {
        Self::with(LookupOutcome::Failing(message.to_string()))
    }

    pub fn panicking() -> Self {
        Self::with(LookupOutcome::Panicking)
    }

    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl ShowLookup for FakeShows {
    async fn search(&self, query: &str) -> Result<Show> {
        self.queries.lock().await.push(query.to_string());
        match &self.outcome {
            LookupOutcome::Found(show) => Ok(show.clone()),
            LookupOutcome::Failing(message) => Err(anyhow!("{}", message)),
            LookupOutcome::Panicking => panic!("lookup blew up"),
        }
    }
}

pub struct FakeImages {
    result: std::result::Result<String, String>,
    uploads: AtomicUsize,
}

impl FakeImages {
    pub fn hosting(url: &str) -> Self {
        Self {
            result: Ok(url.to_string()),
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageHost for FakeImages {
    async fn upload(&self, _bytes: &[u8]) -> Result<UploadedImage> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Ok(url) => Ok(UploadedImage {
                id: "fake".to_string(),
                url: url.clone(),
            }),
            Err(message) => Err(anyhow!("{}", message)),
        }
    }
}
