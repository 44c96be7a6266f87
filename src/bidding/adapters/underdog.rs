use crate::{
    bidding::{
        adapters::{
            AdapterProfile, BidAdapter, ConsentGate, CurrencyPolicy, NetRevenuePolicy,
            PricingPolicy, TtlPolicy,
        },
        renderer::RendererUrls,
        types::{NormalizedBid, VersionInfo},
    },
    config::UnderdogConfig,
};

pub const BIDDER_CODE: &str = "underdogmedia";
pub const VERSION_PLACEHOLDER: &str = "UDM_ADAPTER_VERSION";
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Library-dispatch adapter: consent gated, loads the header library and
/// receives multi-creative responses through per-request callbacks.
pub struct UnderdogAdapter {
    profile: AdapterProfile,
}

impl UnderdogAdapter {
    pub fn new(config: &UnderdogConfig) -> Self {
        tracing::info!(
            target: "bidding",
            adapter = BIDDER_CODE,
            adapter_version = %config.adapter_version,
            platform_name = %config.platform_name,
            platform_version = %config.platform_version,
            "adapter_initialized"
        );

        Self {
            profile: AdapterProfile {
                code: BIDDER_CODE.to_string(),
                consent_gate: Some(ConsentGate {
                    vendor_id: config.vendor_id.clone(),
                    tracking_pixel_base: config.tracking_pixel_base.clone(),
                }),
                capability_url: Some(config.library_url.clone()),
                pricing: PricingPolicy {
                    cpm_multiplier: 1.0,
                    currency: CurrencyPolicy::Fixed("USD".to_string()),
                    net_revenue: NetRevenuePolicy::Fixed(false),
                    ttl: TtlPolicy::ResponseOr(DEFAULT_TTL_SECS),
                },
                validation: config.validation,
                version: Some(VersionInfo {
                    adapter_version: config.adapter_version.clone(),
                    platform_name: config.platform_name.clone(),
                    platform_version: config.platform_version.clone(),
                }),
                version_placeholder: Some(VERSION_PLACEHOLDER.to_string()),
                viewability: None,
                video_creatives: false,
                renderer_urls: RendererUrls::default(),
                reports_to_capability: true,
            },
        }
    }
}

impl BidAdapter for UnderdogAdapter {
    fn code(&self) -> &str {
        BIDDER_CODE
    }

    fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    fn on_bid_won(&self, bid: &NormalizedBid) {
        tracing::info!(
            target: "bidding",
            adapter = BIDDER_CODE,
            bid_id = %bid.request_id,
            ad_unit_code = %bid.ad_unit_code,
            cpm = bid.cpm,
            "bid_won"
        );
    }

    fn on_set_targeting(&self, bid: &NormalizedBid) {
        tracing::info!(
            target: "bidding",
            adapter = BIDDER_CODE,
            bid_id = %bid.request_id,
            ad_unit_code = %bid.ad_unit_code,
            "set_targeting"
        );
    }
}
