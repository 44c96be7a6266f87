use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    bidding::{
        adapters::{
            AdapterProfile, BidAdapter, CurrencyPolicy, NetRevenuePolicy, PricingPolicy, TtlPolicy,
        },
        error::{BiddingError, dispatch_failed, transport_error},
        mapper::DispatchedRequest,
        ports::{BiddingCapability, DispatchContext},
        renderer::RendererUrls,
        types::{BidRequest, RawCreative, RawResponse},
        user_sync::{SyncOptions, SyncType, UserSync},
        viewability::{VIEWABLE_RENDERING_MARKER, ViewabilitySettings},
    },
    config::YieldoneConfig,
};

pub const BIDDER_CODE: &str = "yieldone";
const ALIASES: &[&str] = &["y1"];
const CACHE_BUSTER_RANGE: u128 = 99_999_999_999;

pub struct YieldoneAdapter {
    profile: AdapterProfile,
    user_sync_url: String,
}

impl YieldoneAdapter {
    pub fn new(config: &YieldoneConfig) -> Self {
        Self {
            profile: AdapterProfile {
                code: BIDDER_CODE.to_string(),
                consent_gate: None,
                capability_url: None,
                pricing: PricingPolicy {
                    cpm_multiplier: 1_000.0,
                    currency: CurrencyPolicy::ResponseOr("JPY".to_string()),
                    net_revenue: NetRevenuePolicy::ResponseOr(true),
                    ttl: TtlPolicy::Fixed(config.effective_ttl_secs()),
                },
                validation: config.validation,
                version: None,
                version_placeholder: None,
                viewability: Some(ViewabilitySettings {
                    marker: VIEWABLE_RENDERING_MARKER.to_string(),
                    config_url: config.viewable_config_url.clone(),
                }),
                video_creatives: true,
                renderer_urls: RendererUrls {
                    default_url: config.video_player_url.clone(),
                    cmer_url: config.cmer_player_url.clone(),
                },
                reports_to_capability: false,
            },
            user_sync_url: config.user_sync_url.clone(),
        }
    }
}

impl BidAdapter for YieldoneAdapter {
    fn code(&self) -> &str {
        BIDDER_CODE
    }

    fn aliases(&self) -> &[&'static str] {
        ALIASES
    }

    fn profile(&self) -> &AdapterProfile {
        &self.profile
    }

    fn is_bid_request_valid(&self, request: &BidRequest) -> bool {
        request
            .params
            .placement_id
            .as_deref()
            .is_some_and(|placement_id| !placement_id.is_empty())
    }

    fn user_syncs(&self, options: &SyncOptions) -> Vec<UserSync> {
        if !options.iframe_enabled {
            return Vec::new();
        }

        vec![UserSync {
            sync_type: SyncType::Iframe,
            url: self.user_sync_url.clone(),
        }]
    }
}

/// Query string of a single `h_bid` GET.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BidQuery {
    pub v: String,
    pub p: String,
    pub cb: u64,
    pub r: String,
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    pub uc: String,
    pub tmax: u64,
    pub t: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lr_env: Option<String>,
}

pub fn cache_buster() -> u64 {
    (Uuid::new_v4().as_u128() % CACHE_BUSTER_RANGE) as u64
}

pub fn build_query(
    request: &BidRequest,
    referrer: Option<&str>,
    bidder_timeout_ms: u64,
    cb: u64,
) -> BidQuery {
    let mut query = BidQuery {
        v: "hb1".to_string(),
        p: request.params.placement_id.clone().unwrap_or_default(),
        cb,
        r: referrer.unwrap_or_default().to_string(),
        uid: request.bid_id.clone(),
        tid: request.transaction_id.clone(),
        uc: request.ad_unit_code.clone(),
        tmax: bidder_timeout_ms,
        t: "i".to_string(),
        sz: None,
        w: None,
        h: None,
        lr_env: None,
    };

    let media_types = &request.media_types;
    if media_types.is_empty() || media_types.banner.is_some() {
        let sizes = request
            .banner_sizes()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        query.sz = Some(sizes.join(","));
    } else if media_types.video.is_some() {
        if let Some(size) = request.video_size() {
            query.w = Some(size.width);
            query.h = Some(size.height);
        }
    }

    query.lr_env = request
        .user_id
        .idl_env
        .clone()
        .filter(|envelope| !envelope.is_empty());

    query
}

/// Capability backed by the `h_bid` HTTP endpoint; always present, one GET per request.
#[derive(Clone)]
pub struct YieldoneHttpCapability {
    client: Client,
    endpoint_url: String,
    bidder_timeout_ms: u64,
}

impl YieldoneHttpCapability {
    pub fn new(client: Client, config: &YieldoneConfig) -> Self {
        Self {
            client,
            endpoint_url: config.endpoint_url.clone(),
            bidder_timeout_ms: config.bidder_timeout_ms,
        }
    }

    async fn fetch(&self, query: &BidQuery) -> Result<RawCreative, BiddingError> {
        let response = self
            .client
            .get(&self.endpoint_url)
            .timeout(Duration::from_millis(self.bidder_timeout_ms.max(1)))
            .query(query)
            .send()
            .await
            .map_err(|err| transport_error(format!("yieldone request failed: {err}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(RawCreative::default());
        }
        if !status.is_success() {
            return Err(transport_error(format!(
                "yieldone endpoint returned status {}",
                status.as_u16()
            ))
            .with_retryable(status.is_server_error()));
        }

        response
            .json::<RawCreative>()
            .await
            .map_err(|err| {
                transport_error(format!("failed to decode yieldone response: {err}"))
                    .with_retryable(false)
            })
    }
}

#[async_trait]
impl BiddingCapability for YieldoneHttpCapability {
    async fn dispatch(
        &self,
        ctx: DispatchContext,
        requests: Vec<DispatchedRequest>,
    ) -> Result<(), BiddingError> {
        if self.endpoint_url.is_empty() {
            return Err(dispatch_failed("yieldone endpoint url is not configured")
                .with_adapter(BIDDER_CODE));
        }

        for dispatched in requests {
            let query = build_query(
                &dispatched.request,
                ctx.referrer.as_deref(),
                self.bidder_timeout_ms,
                cache_buster(),
            );
            let capability = self.clone();
            let auction_id = ctx.auction_id.clone();

            tokio::spawn(async move {
                let response = match capability.fetch(&query).await {
                    Ok(creative) => RawResponse::single(creative),
                    Err(err) => {
                        tracing::warn!(
                            target: "bidding",
                            adapter = BIDDER_CODE,
                            auction_id = %auction_id,
                            bid_id = %query.uid,
                            error = %err,
                            retryable = err.retryable,
                            "bid_request_failed"
                        );
                        RawResponse::empty()
                    }
                };

                if !dispatched.responder.respond(response) {
                    tracing::debug!(
                        target: "bidding",
                        adapter = BIDDER_CODE,
                        auction_id = %auction_id,
                        bid_id = %query.uid,
                        "late_response_dropped"
                    );
                }
            });
        }

        Ok(())
    }
}
