use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::bidding::{
    error::{BiddingError, capability_unavailable, internal_error},
    ports::{BiddingCapability, CapabilitySource},
};

type LoadResult = Result<Arc<dyn BiddingCapability>, BiddingError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderPhase {
    Unloaded,
    Loading,
    Ready,
}

enum LoadState {
    Unloaded,
    Loading { generation: u64, load: SharedLoad },
    Ready(Arc<dyn BiddingCapability>),
}

struct LoaderState {
    generation: u64,
    current: LoadState,
}

/// Single-flight loader for the external bidding capability.
///
/// Callers arriving while a load is in flight await the same attempt. The
/// attempt runs on its own task, so a caller giving up on its deadline does
/// not abort the load for the others. A failed attempt returns the loader to
/// `Unloaded`; the next auction makes a fresh single attempt.
#[derive(Clone)]
pub struct CapabilityLoader {
    source: Arc<dyn CapabilitySource>,
    url: Option<String>,
    state: Arc<Mutex<LoaderState>>,
}

impl CapabilityLoader {
    pub fn new(source: Arc<dyn CapabilitySource>, url: Option<String>) -> Self {
        Self {
            source,
            url,
            state: Arc::new(Mutex::new(LoaderState {
                generation: 0,
                current: LoadState::Unloaded,
            })),
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub async fn phase(&self) -> LoaderPhase {
        match self.state.lock().await.current {
            LoadState::Unloaded => LoaderPhase::Unloaded,
            LoadState::Loading { .. } => LoaderPhase::Loading,
            LoadState::Ready(_) => LoaderPhase::Ready,
        }
    }

    pub async fn ensure_loaded(&self) -> LoadResult {
        let (generation, load) = {
            let mut guard = self.state.lock().await;
            match &guard.current {
                LoadState::Ready(capability) => return Ok(Arc::clone(capability)),
                LoadState::Loading { generation, load } => (*generation, load.clone()),
                LoadState::Unloaded => {
                    if let Some(capability) = self.source.already_present() {
                        tracing::debug!(target: "bidding", "capability_already_present");
                        guard.current = LoadState::Ready(Arc::clone(&capability));
                        return Ok(capability);
                    }

                    let url = self.url.clone().ok_or_else(|| {
                        capability_unavailable("capability is not present and no load url is configured")
                    })?;

                    guard.generation = guard.generation.saturating_add(1);
                    let generation = guard.generation;
                    let load = spawn_load(Arc::clone(&self.source), url);
                    guard.current = LoadState::Loading {
                        generation,
                        load: load.clone(),
                    };
                    (generation, load)
                }
            }
        };

        let outcome = load.await;

        let mut guard = self.state.lock().await;
        let settles_current = matches!(
            &guard.current,
            LoadState::Loading { generation: current, .. } if *current == generation
        );
        if settles_current {
            guard.current = match &outcome {
                Ok(capability) => LoadState::Ready(Arc::clone(capability)),
                Err(err) => {
                    tracing::warn!(
                        target: "bidding",
                        url = self.url.as_deref().unwrap_or("-"),
                        error = %err,
                        "capability_load_failed"
                    );
                    LoadState::Unloaded
                }
            };
        }

        outcome
    }
}

fn spawn_load(source: Arc<dyn CapabilitySource>, url: String) -> SharedLoad {
    tracing::info!(target: "bidding", url = %url, "capability_load_started");
    let handle = tokio::spawn(async move { source.load(&url).await });
    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(err) => Err(internal_error(format!("capability load task failed: {err}"))),
        }
    }
    .boxed()
    .shared()
}
