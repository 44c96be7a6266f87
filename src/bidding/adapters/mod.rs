use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    bidding::{
        renderer::RendererUrls,
        types::{BidRequest, NormalizedBid, VersionInfo},
        user_sync::{SyncOptions, UserSync},
        viewability::ViewabilitySettings,
    },
    config::Config,
};

pub mod underdog;
pub mod yieldone;

/// How a response with several candidate creatives is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Invalid creatives are skipped; valid siblings in the same response still count.
    PerCreative,
    /// Any invalid creative rejects the whole response.
    WholeResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrencyPolicy {
    Fixed(String),
    ResponseOr(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetRevenuePolicy {
    Fixed(bool),
    ResponseOr(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPolicy {
    /// Response ttl when present and non-zero, otherwise the given seconds.
    ResponseOr(u64),
    /// Always the given seconds, typically derived from bidder config.
    Fixed(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub cpm_multiplier: f64,
    pub currency: CurrencyPolicy,
    pub net_revenue: NetRevenuePolicy,
    pub ttl: TtlPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentGate {
    pub vendor_id: String,
    pub tracking_pixel_base: String,
}

/// Everything the orchestrator and interpreter need to know about one bidder.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterProfile {
    pub code: String,
    pub consent_gate: Option<ConsentGate>,
    pub capability_url: Option<String>,
    pub pricing: PricingPolicy,
    pub validation: ValidationPolicy,
    pub version: Option<VersionInfo>,
    pub version_placeholder: Option<String>,
    pub viewability: Option<ViewabilitySettings>,
    /// Video documents are only classified as creatives when set.
    pub video_creatives: bool,
    pub renderer_urls: RendererUrls,
    /// Whether version, consent and US-privacy info are reported to the capability before dispatch.
    pub reports_to_capability: bool,
}

pub trait BidAdapter: Send + Sync {
    fn code(&self) -> &str;

    fn aliases(&self) -> &[&'static str] {
        &[]
    }

    fn profile(&self) -> &AdapterProfile;

    fn is_bid_request_valid(&self, _request: &BidRequest) -> bool {
        true
    }

    fn user_syncs(&self, _options: &SyncOptions) -> Vec<UserSync> {
        Vec::new()
    }

    fn on_bid_won(&self, _bid: &NormalizedBid) {}

    fn on_set_targeting(&self, _bid: &NormalizedBid) {}
}

/// Adapters keyed by bidder code and by every alias.
pub fn build_default_adapters(config: &Config) -> HashMap<String, Arc<dyn BidAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn BidAdapter>> = HashMap::new();
    let defaults: [Arc<dyn BidAdapter>; 2] = [
        Arc::new(underdog::UnderdogAdapter::new(&config.underdog)),
        Arc::new(yieldone::YieldoneAdapter::new(&config.yieldone)),
    ];

    for adapter in defaults {
        for alias in adapter.aliases() {
            adapters.insert((*alias).to_string(), Arc::clone(&adapter));
        }
        adapters.insert(adapter.code().to_string(), adapter);
    }
    adapters
}
