use serde::Serialize;
use tokio::sync::oneshot;

use crate::bidding::types::{AuctionRequest, BidId, BidRequest, RawResponse, Size};

/// Flat per-request record consumed by the external capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedBid {
    pub bid_id: BidId,
    pub auction_id: String,
    pub auction_start: u64,
    pub auction_timeout: u64,
    pub bidder: String,
    pub sizes: Vec<Size>,
    pub site_id: Option<String>,
    pub placement_id: Option<String>,
    pub bidfloor: Option<f64>,
    #[serde(rename = "adunitcode")]
    pub ad_unit_code: String,
    pub placement_code: String,
    pub div_id: Option<String>,
    pub sub_id: Option<String>,
    pub usp_consent: Option<String>,
}

/// Answers a single dispatched request. Consumed on use, so a request is answered at most once.
#[derive(Debug)]
pub struct ResponseResponder {
    bid_id: BidId,
    tx: oneshot::Sender<RawResponse>,
}

impl ResponseResponder {
    pub fn bid_id(&self) -> &str {
        &self.bid_id
    }

    /// Returns false when the auction stopped listening (completed or expired).
    pub fn respond(self, response: RawResponse) -> bool {
        self.tx.send(response).is_ok()
    }
}

#[derive(Debug)]
pub struct DispatchedRequest {
    pub payload: MappedBid,
    pub request: BidRequest,
    pub responder: ResponseResponder,
}

/// Receiving half kept by the orchestrator, tagged with the request's position.
#[derive(Debug)]
pub struct PendingResponse {
    pub index: usize,
    pub rx: oneshot::Receiver<RawResponse>,
}

pub fn map_bid(auction: &AuctionRequest, request: &BidRequest) -> MappedBid {
    MappedBid {
        bid_id: request.bid_id.clone(),
        auction_id: request.auction_id.clone(),
        auction_start: auction.auction_start_ms,
        auction_timeout: auction.timeout_ms,
        bidder: request.bidder.clone(),
        sizes: request.banner_sizes().to_vec(),
        site_id: request.params.site_id.clone(),
        placement_id: request.params.placement_id.clone(),
        bidfloor: request.params.bidfloor,
        ad_unit_code: request.ad_unit_code.clone(),
        placement_code: request.ad_unit_code.clone(),
        div_id: request.params.div_id.clone(),
        sub_id: request.params.sub_id.clone(),
        usp_consent: auction.usp_consent.clone(),
    }
}

/// Maps every request in order and pairs it with a fresh response channel.
pub fn map_requests(
    auction: &AuctionRequest,
    requests: &[BidRequest],
) -> (Vec<DispatchedRequest>, Vec<PendingResponse>) {
    let mut dispatched = Vec::with_capacity(requests.len());
    let mut pending = Vec::with_capacity(requests.len());

    for (index, request) in requests.iter().enumerate() {
        let (tx, rx) = oneshot::channel();
        dispatched.push(DispatchedRequest {
            payload: map_bid(auction, request),
            request: request.clone(),
            responder: ResponseResponder {
                bid_id: request.bid_id.clone(),
                tx,
            },
        });
        pending.push(PendingResponse { index, rx });
    }

    (dispatched, pending)
}
