use std::sync::Arc;

use async_trait::async_trait;

use crate::bidding::{
    error::BiddingError,
    mapper::DispatchedRequest,
    types::{AuctionId, BidOutcome, ConsentDecision, NormalizedBid, VersionInfo},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub auction_id: AuctionId,
    pub adapter_code: String,
    pub referrer: Option<String>,
    pub timeout_ms: u64,
}

/// The externally supplied bidding capability requests are dispatched to.
#[async_trait]
pub trait BiddingCapability: Send + Sync {
    /// Hands every mapped request over. Each request's responder must be answered exactly once.
    async fn dispatch(
        &self,
        ctx: DispatchContext,
        requests: Vec<DispatchedRequest>,
    ) -> Result<(), BiddingError>;

    fn report_version(&self, _info: &VersionInfo) {}

    fn report_consent(&self, _decision: &ConsentDecision) {}

    fn report_usp_consent(&self, _usp_consent: &str) {}
}

/// Where the bidding capability comes from.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    /// Returns the capability when a previous load (or the host) already installed it.
    fn already_present(&self) -> Option<Arc<dyn BiddingCapability>>;

    async fn load(&self, url: &str) -> Result<Arc<dyn BiddingCapability>, BiddingError>;
}

#[async_trait]
pub trait TrackingPixel: Send + Sync {
    async fn fire(&self, url: &str) -> Result<(), BiddingError>;
}

/// Framework callbacks for one auction.
pub trait AuctionSink: Send + Sync {
    fn record_bid(&self, ad_unit_code: &str, outcome: BidOutcome);
    fn auction_done(&self);
}

/// Host-side hooks used when a video renderer is invoked at render time.
#[async_trait]
pub trait RenderHost: Send + Sync {
    async fn load_script(&self, url: &str) -> Result<(), BiddingError>;
    fn invoke_playback(&self, global: &str, bid: &NormalizedBid) -> Result<(), BiddingError>;
}

/// Capability that is always present, e.g. one backed by a plain HTTP endpoint.
pub struct StaticCapabilitySource {
    capability: Arc<dyn BiddingCapability>,
}

impl StaticCapabilitySource {
    pub fn new(capability: Arc<dyn BiddingCapability>) -> Self {
        Self { capability }
    }
}

#[async_trait]
impl CapabilitySource for StaticCapabilitySource {
    fn already_present(&self) -> Option<Arc<dyn BiddingCapability>> {
        Some(Arc::clone(&self.capability))
    }

    async fn load(&self, _url: &str) -> Result<Arc<dyn BiddingCapability>, BiddingError> {
        Ok(Arc::clone(&self.capability))
    }
}

#[derive(Default)]
pub struct NoopTrackingPixel;

#[async_trait]
impl TrackingPixel for NoopTrackingPixel {
    async fn fire(&self, _url: &str) -> Result<(), BiddingError> {
        Ok(())
    }
}
