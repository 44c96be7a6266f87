use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::bidding::{
    error::{BiddingError, transport_error},
    ports::TrackingPixel,
    types::ConsentDecision,
};

pub const TRACKING_PIXEL_BASE: &str = "https://udmserve.net/udm/img.fetch";

/// Consent-rejection pixel URL; parameters are `;`-separated as the endpoint expects.
pub fn consent_rejection_url(base: &str, site_id: &str, decision: &ConsentDecision) -> String {
    format!(
        "{base}?tid=1;dt=9;sid={site_id};gdprApplies={};consentGiven={};",
        decision.applies, decision.granted
    )
}

/// Issues the pixel as a plain GET and ignores the body.
#[derive(Clone)]
pub struct HttpTrackingPixel {
    client: Client,
    timeout: Duration,
}

impl HttpTrackingPixel {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl TrackingPixel for HttpTrackingPixel {
    async fn fire(&self, url: &str) -> Result<(), BiddingError> {
        self.client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| transport_error(format!("tracking pixel request failed: {err}")))
    }
}
