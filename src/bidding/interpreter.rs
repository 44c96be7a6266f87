use std::sync::Arc;

use crate::bidding::{
    adapters::{AdapterProfile, CurrencyPolicy, NetRevenuePolicy, TtlPolicy, ValidationPolicy},
    renderer::{RendererSelector, RendererVariant},
    types::{
        AdPayload, BidMeta, BidOutcome, BidRequest, MediaType, NoBid, NormalizedBid, RawCreative,
        RawResponse,
    },
    viewability::{ViewableCreative, wrap_viewable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NonPositiveCpm,
    ZeroWidth,
    ZeroHeight,
    MissingCreativeId,
    NoCreativePayload,
    SiblingRejected,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::NonPositiveCpm => "non_positive_cpm",
            RejectReason::ZeroWidth => "zero_width",
            RejectReason::ZeroHeight => "zero_height",
            RejectReason::MissingCreativeId => "missing_creative_id",
            RejectReason::NoCreativePayload => "no_creative_payload",
            RejectReason::SiblingRejected => "sibling_rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreativeKind {
    BannerUrl(String),
    BannerMarkup(String),
    ViewableBanner(String),
    Video {
        document: String,
        variant: RendererVariant,
    },
}

/// Result of interpreting one answered request. Never empty: a request with
/// no accepted creative yields exactly one no-bid.
#[derive(Debug, Clone)]
pub struct Interpretation {
    pub outcomes: Vec<BidOutcome>,
    pub rejected: Vec<RejectReason>,
}

impl Interpretation {
    pub fn accepted(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_bid()).count()
    }
}

struct ValidCreative<'a> {
    raw: &'a RawCreative,
    cpm: f64,
    width: u32,
    height: u32,
    creative_id: &'a str,
}

#[derive(Clone)]
pub struct ResponseInterpreter {
    profile: Arc<AdapterProfile>,
    renderers: RendererSelector,
}

impl ResponseInterpreter {
    pub fn new(profile: Arc<AdapterProfile>) -> Self {
        let renderers = RendererSelector::new(profile.renderer_urls.clone());
        Self { profile, renderers }
    }

    pub fn interpret(
        &self,
        request: &BidRequest,
        response: &RawResponse,
        referrer: Option<&str>,
    ) -> Interpretation {
        let mut outcomes = Vec::new();
        let mut rejected = Vec::new();

        let validated: Vec<Result<ValidCreative<'_>, RejectReason>> = response
            .bids
            .iter()
            .map(|creative| self.validate(creative))
            .collect();

        let whole_response_rejected = matches!(self.profile.validation, ValidationPolicy::WholeResponse)
            && validated.iter().any(Result::is_err);

        for candidate in validated {
            let creative = match candidate {
                Ok(_) if whole_response_rejected => {
                    rejected.push(RejectReason::SiblingRejected);
                    continue;
                }
                Ok(creative) => creative,
                Err(reason) => {
                    rejected.push(reason);
                    continue;
                }
            };

            let Some(kind) = self.classify(creative.raw) else {
                tracing::debug!(
                    target: "bidding",
                    bid_id = %request.bid_id,
                    adapter = %self.profile.code,
                    "creative_lacks_payload"
                );
                rejected.push(RejectReason::NoCreativePayload);
                continue;
            };

            outcomes.push(BidOutcome::Bid(self.build_bid(request, &creative, kind, referrer)));
        }

        if outcomes.is_empty() {
            outcomes.push(BidOutcome::NoBid(NoBid::for_request(request)));
        }

        for reason in &rejected {
            tracing::debug!(
                target: "bidding",
                bid_id = %request.bid_id,
                adapter = %self.profile.code,
                reason = reason.as_str(),
                "creative_rejected"
            );
        }

        Interpretation { outcomes, rejected }
    }

    /// Priority: creative URL, then inline markup (viewability-gated when marked), then video
    /// document for profiles that accept video.
    pub fn classify(&self, creative: &RawCreative) -> Option<CreativeKind> {
        if let Some(url) = non_empty(creative.ad_url.as_deref()) {
            return Some(CreativeKind::BannerUrl(url.to_string()));
        }

        if let Some(markup) = non_empty(creative.ad_html.as_deref()) {
            let viewable = self.profile.viewability.as_ref().is_some_and(|settings| {
                creative.renderer_variant.as_deref() == Some(settings.marker.as_str())
            });
            return Some(if viewable {
                CreativeKind::ViewableBanner(markup.to_string())
            } else {
                CreativeKind::BannerMarkup(markup.to_string())
            });
        }

        if !self.profile.video_creatives {
            return None;
        }

        if let Some(document) = non_empty(creative.ad_document.as_deref()) {
            return Some(CreativeKind::Video {
                document: document.to_string(),
                variant: RendererVariant::from_marker(creative.renderer_variant.as_deref()),
            });
        }

        None
    }

    fn validate<'a>(&self, creative: &'a RawCreative) -> Result<ValidCreative<'a>, RejectReason> {
        let cpm = creative.cpm.unwrap_or(0.0) * self.profile.pricing.cpm_multiplier;
        if !cpm.is_finite() || cpm <= 0.0 {
            return Err(RejectReason::NonPositiveCpm);
        }

        let width = creative.width.unwrap_or(0);
        if width == 0 {
            return Err(RejectReason::ZeroWidth);
        }

        let height = creative.height.unwrap_or(0);
        if height == 0 {
            return Err(RejectReason::ZeroHeight);
        }

        let creative_id =
            non_empty(creative.creative_id.as_deref()).ok_or(RejectReason::MissingCreativeId)?;

        Ok(ValidCreative {
            raw: creative,
            cpm,
            width,
            height,
            creative_id,
        })
    }

    fn build_bid(
        &self,
        request: &BidRequest,
        creative: &ValidCreative<'_>,
        kind: CreativeKind,
        referrer: Option<&str>,
    ) -> NormalizedBid {
        let raw = creative.raw;
        if let Some(uid) = raw.uid.as_deref().filter(|uid| *uid != request.bid_id) {
            tracing::debug!(
                target: "bidding",
                bid_id = %request.bid_id,
                response_uid = uid,
                "response_uid_mismatch"
            );
        }

        let pricing = &self.profile.pricing;
        let currency = match &pricing.currency {
            CurrencyPolicy::Fixed(currency) => currency.clone(),
            CurrencyPolicy::ResponseOr(fallback) => non_empty(raw.currency.as_deref())
                .map(str::to_string)
                .unwrap_or_else(|| fallback.clone()),
        };
        let net_revenue = match pricing.net_revenue {
            NetRevenuePolicy::Fixed(value) => value,
            NetRevenuePolicy::ResponseOr(fallback) => raw.net_revenue.unwrap_or(fallback),
        };
        let ttl_secs = match pricing.ttl {
            TtlPolicy::ResponseOr(fallback) => raw.ttl.filter(|ttl| *ttl > 0).unwrap_or(fallback),
            TtlPolicy::Fixed(ttl) => ttl,
        };

        let (media_type, payload, renderer) = match kind {
            CreativeKind::BannerUrl(url) => (MediaType::Banner, AdPayload::Url(url), None),
            CreativeKind::BannerMarkup(markup) => (
                MediaType::Banner,
                AdPayload::Markup(self.stamp_version(markup)),
                None,
            ),
            CreativeKind::ViewableBanner(markup) => {
                let settings = self.profile.viewability.clone().unwrap_or_default();
                let document = wrap_viewable(
                    &settings,
                    &ViewableCreative {
                        markup: &markup,
                        width: creative.width,
                        height: creative.height,
                        target_id: &request.ad_unit_code,
                        creative_key: &request.bid_id,
                    },
                );
                (MediaType::Banner, AdPayload::Markup(document), None)
            }
            CreativeKind::Video { document, variant } => (
                MediaType::Video,
                AdPayload::Video { vast_xml: document },
                Some(self.renderers.install(&request.bid_id, variant)),
            ),
        };

        NormalizedBid {
            request_id: request.bid_id.clone(),
            auction_id: request.auction_id.clone(),
            ad_unit_code: request.ad_unit_code.clone(),
            bidder_code: request.bidder.clone(),
            cpm: creative.cpm,
            width: creative.width,
            height: creative.height,
            creative_id: creative.creative_id.to_string(),
            deal_id: raw.deal_id.clone(),
            currency,
            net_revenue,
            ttl_secs,
            media_type,
            payload,
            renderer,
            meta: BidMeta {
                advertiser_domains: raw.adomain.clone(),
            },
            true_bidder: raw.bidder_code.clone(),
            referrer: referrer.map(str::to_string),
            debug: raw.udm_debug.clone(),
        }
    }

    fn stamp_version(&self, markup: String) -> String {
        match (&self.profile.version_placeholder, &self.profile.version) {
            (Some(placeholder), Some(version)) if !placeholder.is_empty() => {
                markup.replacen(placeholder.as_str(), &version.markup_tag(), 1)
            }
            _ => markup,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.is_empty())
}
