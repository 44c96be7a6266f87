use std::{
    future::pending,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures_util::{FutureExt, StreamExt, stream::FuturesUnordered};
use reqwest::Client;
use serde::Serialize;
use tokio::time::{Sleep, sleep};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    bidding::{
        adapters::{AdapterProfile, BidAdapter},
        consent::evaluate_consent,
        correlator::{AuctionTicket, Progress, ResponseCorrelator},
        interpreter::ResponseInterpreter,
        loader::CapabilityLoader,
        mapper::map_requests,
        pixel::{HttpTrackingPixel, consent_rejection_url},
        ports::{
            AuctionSink, BiddingCapability, CapabilitySource, DispatchContext, NoopTrackingPixel,
            TrackingPixel,
        },
        telemetry::{
            AuctionTelemetryEvent, NoopTelemetrySink, TelemetrySink, TracingTelemetrySink,
        },
        types::{AuctionId, AuctionRequest, BidOutcome, BidRequest, ConsentDecision, RawResponse},
    },
    config::AuctionRuntimeConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionTermination {
    AllAnswered,
    ConsentRejected,
    Empty,
    DeadlineExpired,
    CapabilityUnavailable,
    DuplicateAuction,
    DispatchFailed,
    Shutdown,
}

impl AuctionTermination {
    pub fn as_str(self) -> &'static str {
        match self {
            AuctionTermination::AllAnswered => "all_answered",
            AuctionTermination::ConsentRejected => "consent_rejected",
            AuctionTermination::Empty => "empty",
            AuctionTermination::DeadlineExpired => "deadline_expired",
            AuctionTermination::CapabilityUnavailable => "capability_unavailable",
            AuctionTermination::DuplicateAuction => "duplicate_auction",
            AuctionTermination::DispatchFailed => "dispatch_failed",
            AuctionTermination::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuctionSummary {
    pub auction_id: AuctionId,
    pub dispatched: usize,
    pub answered: usize,
    pub bids: usize,
    pub no_bids: usize,
    pub termination: AuctionTermination,
}

/// Fires the sink's completion callback at most once.
struct CompletionLatch {
    sink: Arc<dyn AuctionSink>,
    fired: AtomicBool,
}

impl CompletionLatch {
    fn new(sink: Arc<dyn AuctionSink>) -> Self {
        Self {
            sink,
            fired: AtomicBool::new(false),
        }
    }

    fn record(&self, ad_unit_code: &str, outcome: BidOutcome) {
        if self.fired.load(Ordering::Acquire) {
            return;
        }
        self.sink.record_bid(ad_unit_code, outcome);
    }

    fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if first {
            self.sink.auction_done();
        }
        first
    }
}

#[derive(Debug, Default)]
struct Tally {
    dispatched: usize,
    answered: usize,
    bids: usize,
    no_bids: usize,
}

type Deadline = Option<Pin<Box<Sleep>>>;

async fn expire(deadline: &mut Deadline) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => pending::<()>().await,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Time left before the auction's own timeout, plus grace.
///
/// An auction without a start timestamp is measured from `now_ms`.
pub fn remaining_budget(auction: &AuctionRequest, now_ms: u64, grace_ms: u64) -> Duration {
    let started_at = if auction.auction_start_ms == 0 {
        now_ms
    } else {
        auction.auction_start_ms
    };
    let deadline_ms = started_at
        .saturating_add(auction.timeout_ms)
        .saturating_add(grace_ms);
    Duration::from_millis(deadline_ms.saturating_sub(now_ms))
}

/// Runs auctions for one bidder: consent gate, capability load, dispatch,
/// response correlation and completion.
pub struct AuctionOrchestrator {
    adapter: Arc<dyn BidAdapter>,
    profile: Arc<AdapterProfile>,
    loader: CapabilityLoader,
    interpreter: ResponseInterpreter,
    correlator: ResponseCorrelator,
    tracking_pixel: Arc<dyn TrackingPixel>,
    telemetry: Arc<dyn TelemetrySink>,
    runtime: AuctionRuntimeConfig,
    shutdown: CancellationToken,
}

impl AuctionOrchestrator {
    pub fn new(adapter: Arc<dyn BidAdapter>, source: Arc<dyn CapabilitySource>) -> Self {
        let profile = Arc::new(adapter.profile().clone());
        let loader = CapabilityLoader::new(source, profile.capability_url.clone());
        let interpreter = ResponseInterpreter::new(Arc::clone(&profile));

        Self {
            adapter,
            profile,
            loader,
            interpreter,
            correlator: ResponseCorrelator::new(),
            tracking_pixel: Arc::new(NoopTrackingPixel),
            telemetry: Arc::new(NoopTelemetrySink),
            runtime: AuctionRuntimeConfig::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_tracking_pixel(mut self, tracking_pixel: Arc<dyn TrackingPixel>) -> Self {
        self.tracking_pixel = tracking_pixel;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_auction_config(mut self, runtime: AuctionRuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    /// Shares one correlator between orchestrators; countdowns stay separate per adapter.
    pub fn with_correlator(mut self, correlator: ResponseCorrelator) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn with_shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// HTTP tracking pixel and tracing telemetry, using the current auction config.
    pub fn with_http_defaults(self, client: Client) -> Self {
        let timeout = Duration::from_millis(self.runtime.tracking_pixel_timeout_ms);
        self.with_tracking_pixel(Arc::new(HttpTrackingPixel::new(client, timeout)))
            .with_telemetry(Arc::new(TracingTelemetrySink))
    }

    pub fn adapter(&self) -> &Arc<dyn BidAdapter> {
        &self.adapter
    }

    pub fn loader(&self) -> &CapabilityLoader {
        &self.loader
    }

    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    /// Stops every in-flight auction; each still reports completion once.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn run_auction(
        &self,
        auction: AuctionRequest,
        sink: Arc<dyn AuctionSink>,
    ) -> AuctionSummary {
        let span = tracing::info_span!(
            target: "bidding",
            "auction",
            auction_id = %auction.auction_id,
            adapter = %self.profile.code,
            requests = auction.bids.len()
        );
        self.run_auction_inner(auction, sink).instrument(span).await
    }

    async fn run_auction_inner(
        &self,
        auction: AuctionRequest,
        sink: Arc<dyn AuctionSink>,
    ) -> AuctionSummary {
        let latch = CompletionLatch::new(sink);
        let mut tally = Tally::default();

        let requests: Vec<BidRequest> = auction
            .bids
            .iter()
            .filter(|request| {
                let valid = self.adapter.is_bid_request_valid(request);
                if !valid {
                    tracing::debug!(
                        target: "bidding",
                        bid_id = %request.bid_id,
                        ad_unit_code = %request.ad_unit_code,
                        "bid_request_invalid"
                    );
                }
                valid
            })
            .cloned()
            .collect();

        self.telemetry.on_event(AuctionTelemetryEvent::AuctionStarted {
            auction_id: auction.auction_id.clone(),
            adapter: self.profile.code.clone(),
            requests: requests.len(),
        });

        let decision = match &self.profile.consent_gate {
            Some(gate) => evaluate_consent(auction.gdpr_consent.as_ref(), &gate.vendor_id),
            None => ConsentDecision::default(),
        };

        if !decision.permits_dispatch() {
            self.reject_for_consent(&auction, &decision).await;
            return self.finish(&auction, &latch, tally, AuctionTermination::ConsentRejected);
        }

        if requests.is_empty() {
            return self.finish(&auction, &latch, tally, AuctionTermination::Empty);
        }

        let mut deadline: Deadline = self.runtime.enforce_deadline.then(|| {
            let budget = remaining_budget(&auction, now_ms(), self.runtime.deadline_grace_ms);
            Box::pin(sleep(budget))
        });

        let capability = tokio::select! {
            biased;
            loaded = self.loader.ensure_loaded() => match loaded {
                Ok(capability) => capability,
                Err(err) => {
                    self.telemetry.on_event(AuctionTelemetryEvent::CapabilityUnavailable {
                        auction_id: auction.auction_id.clone(),
                        reason: err.message.clone(),
                    });
                    return self.finish(&auction, &latch, tally, AuctionTermination::CapabilityUnavailable);
                }
            },
            _ = self.shutdown.cancelled() => {
                return self.finish(&auction, &latch, tally, AuctionTermination::Shutdown);
            }
            _ = expire(&mut deadline) => {
                tracing::warn!(target: "bidding", "deadline_expired_before_capability_ready");
                return self.finish(&auction, &latch, tally, AuctionTermination::DeadlineExpired);
            }
        };

        self.telemetry.on_event(AuctionTelemetryEvent::CapabilityReady {
            auction_id: auction.auction_id.clone(),
        });
        self.report_to_capability(capability.as_ref(), &auction, &decision);

        let opened = self
            .correlator
            .open(&self.profile.code, &auction.auction_id, requests.len())
            .await;
        let ticket = match opened {
            Ok(ticket) => ticket,
            Err(err) => {
                tracing::warn!(target: "bidding", error = %err, "auction_rejected");
                return self.finish(&auction, &latch, tally, AuctionTermination::DuplicateAuction);
            }
        };

        let (dispatched, pending_responses) = map_requests(&auction, &requests);
        tally.dispatched = dispatched.len();
        let ctx = DispatchContext {
            auction_id: auction.auction_id.clone(),
            adapter_code: self.profile.code.clone(),
            referrer: auction.referrer.clone(),
            timeout_ms: auction.timeout_ms,
        };

        let dispatch_result = tokio::select! {
            biased;
            result = capability.dispatch(ctx, dispatched) => result,
            _ = self.shutdown.cancelled() => {
                self.abandon(&ticket, AuctionTermination::Shutdown).await;
                return self.finish(&auction, &latch, tally, AuctionTermination::Shutdown);
            }
            _ = expire(&mut deadline) => {
                tracing::warn!(target: "bidding", "deadline_expired_during_dispatch");
                self.abandon(&ticket, AuctionTermination::DeadlineExpired).await;
                return self.finish(&auction, &latch, tally, AuctionTermination::DeadlineExpired);
            }
        };

        if let Err(err) = dispatch_result {
            let err = err.with_adapter(self.profile.code.clone());
            tracing::warn!(
                target: "bidding",
                error = %err,
                kind = ?err.kind,
                adapter = ?err.adapter_code,
                "dispatch_failed"
            );
            self.correlator.abandon(&ticket).await;
            return self.finish(&auction, &latch, tally, AuctionTermination::DispatchFailed);
        }

        let mut answers: FuturesUnordered<_> = pending_responses
            .into_iter()
            .map(|pending| {
                let index = pending.index;
                pending.rx.map(move |received| (index, received.ok()))
            })
            .collect();

        let termination = loop {
            tokio::select! {
                biased;
                next = answers.next() => {
                    let Some((index, received)) = next else {
                        break AuctionTermination::AllAnswered;
                    };
                    let Some(request) = requests.get(index) else {
                        continue;
                    };
                    let response = received.unwrap_or_else(|| {
                        tracing::warn!(
                            target: "bidding",
                            bid_id = %request.bid_id,
                            "responder_dropped_without_answer"
                        );
                        RawResponse::empty()
                    });

                    self.record_response(&auction, request, &response, &latch, &mut tally);
                    match self.correlator.record_answer(&ticket).await {
                        Progress::Complete { .. } => break AuctionTermination::AllAnswered,
                        Progress::Pending { .. } => {}
                        Progress::Closed => {
                            tracing::warn!(target: "bidding", "auction_closed_while_collecting");
                            break AuctionTermination::Shutdown;
                        }
                    }
                }
                _ = self.shutdown.cancelled() => break AuctionTermination::Shutdown,
                _ = expire(&mut deadline) => break AuctionTermination::DeadlineExpired,
            }
        };

        if termination != AuctionTermination::AllAnswered {
            self.abandon(&ticket, termination).await;
        }

        self.finish(&auction, &latch, tally, termination)
    }

    async fn reject_for_consent(&self, auction: &AuctionRequest, decision: &ConsentDecision) {
        self.telemetry.on_event(AuctionTelemetryEvent::ConsentRejected {
            auction_id: auction.auction_id.clone(),
            applies: decision.applies,
            granted: decision.granted,
        });

        let Some(gate) = &self.profile.consent_gate else {
            return;
        };
        let site_id = auction
            .bids
            .first()
            .and_then(|request| request.params.site_id.as_deref())
            .unwrap_or_default();
        let url = consent_rejection_url(&gate.tracking_pixel_base, site_id, decision);

        if let Err(err) = self.tracking_pixel.fire(&url).await {
            tracing::debug!(target: "bidding", error = %err, "tracking_pixel_failed");
        }
    }

    fn report_to_capability(
        &self,
        capability: &dyn BiddingCapability,
        auction: &AuctionRequest,
        decision: &ConsentDecision,
    ) {
        if !self.profile.reports_to_capability {
            return;
        }
        if let Some(version) = &self.profile.version {
            capability.report_version(version);
        }
        if decision.applies {
            capability.report_consent(decision);
        }
        if let Some(usp_consent) = auction.usp_consent.as_deref().filter(|usp| !usp.is_empty()) {
            capability.report_usp_consent(usp_consent);
        }
    }

    fn record_response(
        &self,
        auction: &AuctionRequest,
        request: &BidRequest,
        response: &RawResponse,
        latch: &CompletionLatch,
        tally: &mut Tally,
    ) {
        let interpretation = self
            .interpreter
            .interpret(request, response, auction.referrer.as_deref());

        tally.answered += 1;
        self.telemetry.on_event(AuctionTelemetryEvent::RequestAnswered {
            auction_id: auction.auction_id.clone(),
            bid_id: request.bid_id.clone(),
            accepted: interpretation.accepted(),
            rejected: interpretation.rejected.len(),
        });

        for reason in &interpretation.rejected {
            self.telemetry.on_event(AuctionTelemetryEvent::BidRejected {
                auction_id: auction.auction_id.clone(),
                bid_id: request.bid_id.clone(),
                reason: reason.as_str(),
            });
        }

        for outcome in interpretation.outcomes {
            match outcome.as_bid() {
                Some(bid) => {
                    tally.bids += 1;
                    self.telemetry.on_event(AuctionTelemetryEvent::BidAccepted {
                        auction_id: auction.auction_id.clone(),
                        bid_id: bid.request_id.clone(),
                        cpm: bid.cpm,
                    });
                }
                None => tally.no_bids += 1,
            }
            latch.record(&request.ad_unit_code, outcome);
        }
    }

    async fn abandon(&self, ticket: &AuctionTicket, termination: AuctionTermination) {
        let outstanding = self.correlator.abandon(ticket).await.unwrap_or(0);
        if termination == AuctionTermination::DeadlineExpired {
            self.telemetry.on_event(AuctionTelemetryEvent::AuctionTimedOut {
                auction_id: ticket.auction_id().to_string(),
                outstanding,
            });
        } else {
            tracing::info!(
                target: "bidding",
                outstanding = outstanding,
                termination = termination.as_str(),
                "auction_abandoned"
            );
        }
    }

    fn finish(
        &self,
        auction: &AuctionRequest,
        latch: &CompletionLatch,
        tally: Tally,
        termination: AuctionTermination,
    ) -> AuctionSummary {
        if !latch.fire() {
            tracing::error!(target: "bidding", "auction_done_already_fired");
        }

        self.telemetry.on_event(AuctionTelemetryEvent::AuctionCompleted {
            auction_id: auction.auction_id.clone(),
            answered: tally.answered,
            bids: tally.bids,
            no_bids: tally.no_bids,
            termination: termination.as_str(),
        });

        AuctionSummary {
            auction_id: auction.auction_id.clone(),
            dispatched: tally.dispatched,
            answered: tally.answered,
            bids: tally.bids,
            no_bids: tally.no_bids,
            termination,
        }
    }
}
