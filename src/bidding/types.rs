use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::bidding::renderer::RendererHandle;

pub type AuctionId = String;
pub type BidId = String;
pub type AdapterCode = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<[u32; 2]> for Size {
    fn from(value: [u32; 2]) -> Self {
        Self::new(value[0], value[1])
    }
}

impl From<Size> for [u32; 2] {
    fn from(value: Size) -> Self {
        [value.width, value.height]
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BannerMediaType {
    #[serde(default)]
    pub sizes: Vec<Size>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMediaType {
    #[serde(default, rename = "playerSize")]
    pub player_size: Vec<Size>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaTypes {
    #[serde(default)]
    pub banner: Option<BannerMediaType>,
    #[serde(default)]
    pub video: Option<VideoMediaType>,
}

impl MediaTypes {
    pub fn is_empty(&self) -> bool {
        self.banner.is_none() && self.video.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementParams {
    #[serde(default)]
    pub site_id: Option<String>,
    #[serde(default)]
    pub placement_id: Option<String>,
    #[serde(default)]
    pub div_id: Option<String>,
    #[serde(default)]
    pub sub_id: Option<String>,
    #[serde(default)]
    pub bidfloor: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserIds {
    #[serde(default)]
    pub idl_env: Option<String>,
}

/// One ad slot's solicitation inside an auction. Immutable once dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidRequest {
    pub bid_id: BidId,
    pub auction_id: AuctionId,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub bidder: AdapterCode,
    pub ad_unit_code: String,
    #[serde(default)]
    pub sizes: Vec<Size>,
    #[serde(default)]
    pub media_types: MediaTypes,
    #[serde(default)]
    pub params: PlacementParams,
    #[serde(default)]
    pub user_id: UserIds,
}

impl BidRequest {
    /// Banner sizes from the media-type block, falling back to the legacy list.
    pub fn banner_sizes(&self) -> &[Size] {
        match &self.media_types.banner {
            Some(banner) if !banner.sizes.is_empty() => &banner.sizes,
            _ => &self.sizes,
        }
    }

    pub fn video_size(&self) -> Option<Size> {
        self.media_types
            .video
            .as_ref()
            .and_then(|video| video.player_size.first().copied())
            .or_else(|| self.sizes.first().copied())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorData {
    #[serde(default, rename = "vendorConsents")]
    pub vendor_consents: BTreeMap<String, bool>,
}

/// Raw consent signal as handed over by the framework's consent module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GdprConsent {
    #[serde(default)]
    pub gdpr_applies: Option<bool>,
    #[serde(default)]
    pub consent_string: Option<String>,
    #[serde(default)]
    pub vendor_data: Option<VendorData>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentDecision {
    pub applies: bool,
    pub granted: bool,
    pub consent_string: String,
    pub raw: Option<GdprConsent>,
}

impl Default for ConsentDecision {
    fn default() -> Self {
        Self {
            applies: false,
            granted: true,
            consent_string: String::new(),
            raw: None,
        }
    }
}

impl ConsentDecision {
    pub fn permits_dispatch(&self) -> bool {
        !self.applies || self.granted
    }
}

/// Inbound "run auction" call from the framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRequest {
    pub auction_id: AuctionId,
    pub bids: Vec<BidRequest>,
    pub auction_start_ms: u64,
    pub timeout_ms: u64,
    #[serde(default)]
    pub gdpr_consent: Option<GdprConsent>,
    #[serde(default)]
    pub usp_consent: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub adapter_version: String,
    pub platform_name: String,
    pub platform_version: String,
}

impl VersionInfo {
    /// Value substituted for the version placeholder inside returned markup.
    pub fn markup_tag(&self) -> String {
        format!("P_{}_A_{}", self.platform_version, self.adapter_version)
    }
}

/// One candidate creative inside a raw capability response. Every field is untrusted.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCreative {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub cpm: Option<f64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default, alias = "crid", deserialize_with = "deserialize_creative_id")]
    pub creative_id: Option<String>,
    #[serde(default, rename = "adUrl", alias = "ad_url")]
    pub ad_url: Option<String>,
    #[serde(default, rename = "adHtml", alias = "ad_html", alias = "adTag")]
    pub ad_html: Option<String>,
    #[serde(default, rename = "adDocument", alias = "adm")]
    pub ad_document: Option<String>,
    #[serde(default)]
    pub deal_id: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub net_revenue: Option<bool>,
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default, rename = "rendererVariant", alias = "renderid")]
    pub renderer_variant: Option<String>,
    #[serde(default)]
    pub adomain: Vec<String>,
    #[serde(default)]
    pub bidder_code: Option<String>,
    #[serde(default)]
    pub udm_debug: Option<Value>,
}

/// Per-request response delivered by the external capability.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub bids: Vec<RawCreative>,
}

impl RawResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(creative: RawCreative) -> Self {
        Self {
            bids: vec![creative],
        }
    }
}

fn deserialize_creative_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text),
        Some(Value::Number(number)) if number.as_f64().is_some_and(|n| n != 0.0) => {
            Some(number.to_string())
        }
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Banner,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdPayload {
    Markup(String),
    Url(String),
    Video { vast_xml: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidMeta {
    pub advertiser_domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NormalizedBid {
    pub request_id: BidId,
    pub auction_id: AuctionId,
    pub ad_unit_code: String,
    pub bidder_code: AdapterCode,
    pub cpm: f64,
    pub width: u32,
    pub height: u32,
    pub creative_id: String,
    pub deal_id: Option<String>,
    pub currency: String,
    pub net_revenue: bool,
    pub ttl_secs: u64,
    pub media_type: MediaType,
    pub payload: AdPayload,
    pub renderer: Option<Arc<RendererHandle>>,
    pub meta: BidMeta,
    pub true_bidder: Option<String>,
    pub referrer: Option<String>,
    pub debug: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoBid {
    pub request_id: BidId,
    pub auction_id: AuctionId,
    pub ad_unit_code: String,
    pub bidder_code: AdapterCode,
}

impl NoBid {
    pub fn for_request(request: &BidRequest) -> Self {
        Self {
            request_id: request.bid_id.clone(),
            auction_id: request.auction_id.clone(),
            ad_unit_code: request.ad_unit_code.clone(),
            bidder_code: request.bidder.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BidOutcome {
    Bid(NormalizedBid),
    NoBid(NoBid),
}

impl BidOutcome {
    pub fn request_id(&self) -> &str {
        match self {
            BidOutcome::Bid(bid) => &bid.request_id,
            BidOutcome::NoBid(no_bid) => &no_bid.request_id,
        }
    }

    pub fn ad_unit_code(&self) -> &str {
        match self {
            BidOutcome::Bid(bid) => &bid.ad_unit_code,
            BidOutcome::NoBid(no_bid) => &no_bid.ad_unit_code,
        }
    }

    pub fn as_bid(&self) -> Option<&NormalizedBid> {
        match self {
            BidOutcome::Bid(bid) => Some(bid),
            BidOutcome::NoBid(_) => None,
        }
    }

    pub fn is_bid(&self) -> bool {
        matches!(self, BidOutcome::Bid(_))
    }
}
