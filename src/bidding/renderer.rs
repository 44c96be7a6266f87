use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OnceCell;

use crate::bidding::{error::BiddingError, ports::RenderHost, types::NormalizedBid};

pub const DEFAULT_VIDEO_PLAYER_URL: &str =
    "https://img.ak.impact-ad.jp/ic/pone/ivt/firstview/js/dac-video-prebid.min.js";
pub const CMER_PLAYER_URL: &str =
    "https://an.cmertv.com/hb/renderer/cmertv-video-yone-prebid.min.js";

const CMER_MARKER: &str = "cmer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererVariant {
    Default,
    Cmer,
}

impl RendererVariant {
    pub fn from_marker(marker: Option<&str>) -> Self {
        match marker {
            Some(CMER_MARKER) => RendererVariant::Cmer,
            _ => RendererVariant::Default,
        }
    }

    /// Global playback entrypoint the loaded script installs.
    pub fn playback_global(self) -> &'static str {
        match self {
            RendererVariant::Default => "DACIVTPREBID",
            RendererVariant::Cmer => "CMERYONEPREBID",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererUrls {
    pub default_url: String,
    pub cmer_url: String,
}

impl Default for RendererUrls {
    fn default() -> Self {
        Self {
            default_url: DEFAULT_VIDEO_PLAYER_URL.to_string(),
            cmer_url: CMER_PLAYER_URL.to_string(),
        }
    }
}

/// Loads each distinct renderer script at most once.
#[derive(Clone, Default)]
struct ScriptCache {
    cells: Arc<Mutex<HashMap<String, Arc<OnceCell<()>>>>>,
}

impl ScriptCache {
    fn cell(&self, url: &str) -> Arc<OnceCell<()>> {
        let mut guard = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(guard.entry(url.to_string()).or_default())
    }

    fn is_loaded(&self, url: &str) -> bool {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .is_some_and(|cell| cell.initialized())
    }

    async fn ensure(&self, url: &str, host: &dyn RenderHost) -> Result<(), BiddingError> {
        let cell = self.cell(url);
        cell.get_or_try_init(|| async {
            tracing::debug!(target: "bidding", url = %url, "renderer_script_load");
            host.load_script(url).await
        })
        .await
        .map(|_| ())
    }
}

/// Lazily loaded playback integration attached to a video bid.
pub struct RendererHandle {
    id: String,
    url: String,
    variant: RendererVariant,
    scripts: ScriptCache,
}

impl fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererHandle")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("variant", &self.variant)
            .finish()
    }
}

impl RendererHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn variant(&self) -> RendererVariant {
        self.variant
    }

    pub fn is_loaded(&self) -> bool {
        self.scripts.is_loaded(&self.url)
    }

    /// Called by the framework at render time; the script fetch happens here, not at interpretation.
    pub async fn render(&self, host: &dyn RenderHost, bid: &NormalizedBid) -> Result<(), BiddingError> {
        self.scripts.ensure(&self.url, host).await?;
        host.invoke_playback(self.variant.playback_global(), bid)
    }
}

#[derive(Clone)]
pub struct RendererSelector {
    urls: RendererUrls,
    scripts: ScriptCache,
}

impl RendererSelector {
    pub fn new(urls: RendererUrls) -> Self {
        Self {
            urls,
            scripts: ScriptCache::default(),
        }
    }

    pub fn install(&self, id: &str, variant: RendererVariant) -> Arc<RendererHandle> {
        let url = match variant {
            RendererVariant::Default => self.urls.default_url.clone(),
            RendererVariant::Cmer => self.urls.cmer_url.clone(),
        };

        Arc::new(RendererHandle {
            id: id.to_string(),
            url,
            variant,
            scripts: self.scripts.clone(),
        })
    }
}
