use crate::bidding::types::{AuctionId, BidId};

#[derive(Debug, Clone, PartialEq)]
pub enum AuctionTelemetryEvent {
    AuctionStarted {
        auction_id: AuctionId,
        adapter: String,
        requests: usize,
    },
    ConsentRejected {
        auction_id: AuctionId,
        applies: bool,
        granted: bool,
    },
    CapabilityReady {
        auction_id: AuctionId,
    },
    CapabilityUnavailable {
        auction_id: AuctionId,
        reason: String,
    },
    RequestAnswered {
        auction_id: AuctionId,
        bid_id: BidId,
        accepted: usize,
        rejected: usize,
    },
    BidAccepted {
        auction_id: AuctionId,
        bid_id: BidId,
        cpm: f64,
    },
    BidRejected {
        auction_id: AuctionId,
        bid_id: BidId,
        reason: &'static str,
    },
    AuctionTimedOut {
        auction_id: AuctionId,
        outstanding: usize,
    },
    AuctionCompleted {
        auction_id: AuctionId,
        answered: usize,
        bids: usize,
        no_bids: usize,
        termination: &'static str,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn on_event(&self, event: AuctionTelemetryEvent);
}

#[derive(Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn on_event(&self, _event: AuctionTelemetryEvent) {}
}

#[derive(Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn on_event(&self, event: AuctionTelemetryEvent) {
        match event {
            AuctionTelemetryEvent::AuctionStarted {
                auction_id,
                adapter,
                requests,
            } => {
                tracing::info!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    adapter = %adapter,
                    requests = requests,
                    "auction_started"
                );
            }
            AuctionTelemetryEvent::ConsentRejected {
                auction_id,
                applies,
                granted,
            } => {
                tracing::info!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    applies = applies,
                    granted = granted,
                    "consent_rejected"
                );
            }
            AuctionTelemetryEvent::CapabilityReady { auction_id } => {
                tracing::debug!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    "capability_ready"
                );
            }
            AuctionTelemetryEvent::CapabilityUnavailable { auction_id, reason } => {
                tracing::warn!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    reason = %reason,
                    "capability_unavailable"
                );
            }
            AuctionTelemetryEvent::RequestAnswered {
                auction_id,
                bid_id,
                accepted,
                rejected,
            } => {
                tracing::debug!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    bid_id = %bid_id,
                    accepted = accepted,
                    rejected = rejected,
                    "request_answered"
                );
            }
            AuctionTelemetryEvent::BidAccepted {
                auction_id,
                bid_id,
                cpm,
            } => {
                tracing::debug!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    bid_id = %bid_id,
                    cpm = cpm,
                    "bid_accepted"
                );
            }
            AuctionTelemetryEvent::BidRejected {
                auction_id,
                bid_id,
                reason,
            } => {
                tracing::debug!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    bid_id = %bid_id,
                    reason = reason,
                    "bid_rejected"
                );
            }
            AuctionTelemetryEvent::AuctionTimedOut {
                auction_id,
                outstanding,
            } => {
                tracing::warn!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    outstanding = outstanding,
                    "auction_timed_out"
                );
            }
            AuctionTelemetryEvent::AuctionCompleted {
                auction_id,
                answered,
                bids,
                no_bids,
                termination,
            } => {
                tracing::info!(
                    target: "bidding.telemetry",
                    auction_id = %auction_id,
                    answered = answered,
                    bids = bids,
                    no_bids = no_bids,
                    termination = termination,
                    "auction_completed"
                );
            }
        }
    }
}
