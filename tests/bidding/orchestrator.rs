use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use bidrelay::{
    bidding::{
        AuctionOrchestrator, AuctionTermination, BidOutcome, ResponseCorrelator,
        adapters::{BidAdapter, underdog::UnderdogAdapter, yieldone::YieldoneAdapter},
        mapper::DispatchedRequest,
        ports::{AuctionSink, StaticCapabilitySource},
        types::{GdprConsent, RawResponse, VendorData},
    },
    config::{AuctionRuntimeConfig, UnderdogConfig, YieldoneConfig},
};

use crate::support::{
    CountingSource, FailingPixel, RecordingPixel, RecordingSink, ReversingCapability,
    ScriptedCapability, StalledCapability, auction, banner_creative, underdog_request,
    yieldone_request,
};

fn underdog() -> Arc<dyn BidAdapter> {
    Arc::new(UnderdogAdapter::new(&UnderdogConfig::default()))
}

fn denied_consent() -> GdprConsent {
    GdprConsent {
        gdpr_applies: Some(true),
        consent_string: Some("BOJ/P2HOJ/P2HABABMAAAAAZ+A==".to_string()),
        vendor_data: Some(VendorData {
            vendor_consents: BTreeMap::from([("159".to_string(), false)]),
        }),
    }
}

#[tokio::test]
async fn given_answers_out_of_order_when_auction_runs_then_done_fires_once_after_every_record() {
    let (capability, mut batches) = ScriptedCapability::new();
    let source = Arc::new(CountingSource::new(capability.clone()));
    let orchestrator = Arc::new(AuctionOrchestrator::new(underdog(), source.clone()));
    let sink = Arc::new(RecordingSink::default());

    let request = auction(
        "auction-ooo",
        vec![
            underdog_request("b1", "slot-1"),
            underdog_request("b2", "slot-2"),
            underdog_request("b3", "slot-3"),
        ],
    );
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = sink.clone();
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };

    let mut dispatched = batches.recv().await.expect("requests should be dispatched");
    assert_eq!(dispatched.len(), 3);
    let third = dispatched.pop().expect("third");
    let second = dispatched.pop().expect("second");
    let first = dispatched.pop().expect("first");

    assert!(third.responder.respond(RawResponse::single(banner_creative(1.5, "c3"))));
    assert!(first.responder.respond(RawResponse::empty()));
    assert_eq!(sink.done_calls(), 0, "completion must wait for the last answer");
    assert!(second.responder.respond(RawResponse::single(banner_creative(2.5, "c2"))));

    let summary = running.await.expect("auction task");
    assert_eq!(summary.termination, AuctionTermination::AllAnswered);
    assert_eq!((summary.dispatched, summary.answered), (3, 3));
    assert_eq!((summary.bids, summary.no_bids), (2, 1));
    assert_eq!(sink.done_calls(), 1);
    assert_eq!(sink.records_at_done(), Some(3));
    assert_eq!(source.loads(), 1);
    assert_eq!(orchestrator.correlator().open_auctions().await, 0);

    let by_request: HashMap<String, String> = sink
        .records()
        .into_iter()
        .map(|(unit, outcome)| (outcome.request_id().to_string(), unit))
        .collect();
    assert_eq!(by_request.get("b1").map(String::as_str), Some("slot-1"));
    assert_eq!(by_request.get("b2").map(String::as_str), Some("slot-2"));
    assert_eq!(by_request.get("b3").map(String::as_str), Some("slot-3"));
}

#[tokio::test]
async fn given_consent_denied_when_auction_runs_then_one_pixel_fires_and_nothing_is_dispatched() {
    let (capability, _batches) = ScriptedCapability::new();
    let source = Arc::new(CountingSource::new(capability.clone()));
    let pixel = Arc::new(RecordingPixel::default());
    let orchestrator =
        AuctionOrchestrator::new(underdog(), source.clone()).with_tracking_pixel(pixel.clone());
    let sink = Arc::new(RecordingSink::default());

    let mut request = auction("auction-consent", vec![underdog_request("b1", "slot-1")]);
    request.gdpr_consent = Some(denied_consent());

    let summary = orchestrator.run_auction(request, sink.clone()).await;

    assert_eq!(summary.termination, AuctionTermination::ConsentRejected);
    assert_eq!(sink.done_calls(), 1);
    assert!(sink.records().is_empty());
    assert_eq!(
        pixel.urls(),
        vec![
            "https://udmserve.net/udm/img.fetch?tid=1;dt=9;sid=12143;gdprApplies=true;consentGiven=false;"
                .to_string()
        ]
    );
    assert_eq!(source.loads(), 0);
    assert_eq!(capability.dispatches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn given_consent_applies_and_granted_when_dispatching_then_capability_receives_reports() {
    let (capability, mut batches) = ScriptedCapability::new();
    let source = Arc::new(CountingSource::new(capability.clone()));
    let orchestrator = Arc::new(AuctionOrchestrator::new(underdog(), source));
    let sink = Arc::new(RecordingSink::default());

    let mut request = auction("auction-reports", vec![underdog_request("b1", "slot-1")]);
    let mut consent = denied_consent();
    consent.vendor_data = Some(VendorData {
        vendor_consents: BTreeMap::from([("159".to_string(), true)]),
    });
    request.gdpr_consent = Some(consent);
    request.usp_consent = Some("1YNN".to_string());

    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = sink.clone();
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };
    for dispatched in batches.recv().await.expect("dispatch") {
        dispatched.responder.respond(RawResponse::empty());
    }
    running.await.expect("auction task");

    let versions = capability.versions.lock().expect("versions").clone();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].platform_name, "pbjs");
    let consents = capability.consents.lock().expect("consents").clone();
    assert_eq!(consents.len(), 1);
    assert!(consents[0].applies && consents[0].granted);
    assert_eq!(
        capability.usp_consents.lock().expect("usp").clone(),
        vec!["1YNN".to_string()]
    );
}

#[tokio::test]
async fn given_gdpr_not_applicable_when_dispatching_then_consent_is_not_reported() {
    let (capability, mut batches) = ScriptedCapability::new();
    let orchestrator = Arc::new(AuctionOrchestrator::new(
        underdog(),
        Arc::new(CountingSource::new(capability.clone())),
    ));
    let sink = Arc::new(RecordingSink::default());

    let request = auction("auction-no-gdpr", vec![underdog_request("b1", "slot-1")]);
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = sink.clone();
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };
    for dispatched in batches.recv().await.expect("dispatch") {
        dispatched.responder.respond(RawResponse::empty());
    }
    running.await.expect("auction task");

    assert!(capability.consents.lock().expect("consents").is_empty());
    assert!(capability.usp_consents.lock().expect("usp").is_empty());
    assert_eq!(capability.versions.lock().expect("versions").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_silent_capability_when_deadline_passes_then_partial_results_complete_once() {
    let (capability, mut batches) = ScriptedCapability::new();
    let orchestrator = Arc::new(
        AuctionOrchestrator::new(underdog(), Arc::new(CountingSource::new(capability)))
            .with_auction_config(AuctionRuntimeConfig {
                enforce_deadline: true,
                deadline_grace_ms: 100,
                tracking_pixel_timeout_ms: 1_000,
            }),
    );
    let sink = Arc::new(RecordingSink::default());

    let request = auction(
        "auction-deadline",
        vec![underdog_request("b1", "slot-1"), underdog_request("b2", "slot-2")],
    );
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = sink.clone();
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };

    let mut dispatched = batches.recv().await.expect("dispatch");
    let silent = dispatched.pop().expect("second request stays unanswered");
    let answered = dispatched.pop().expect("first");
    answered
        .responder
        .respond(RawResponse::single(banner_creative(2.5, "c1")));

    let summary = running.await.expect("auction task");
    assert_eq!(summary.termination, AuctionTermination::DeadlineExpired);
    assert_eq!((summary.dispatched, summary.answered, summary.bids), (2, 1, 1));
    assert_eq!(sink.done_calls(), 1);
    assert_eq!(sink.records().len(), 1);
    assert_eq!(orchestrator.correlator().open_auctions().await, 0);

    assert!(
        !silent.responder.respond(RawResponse::empty()),
        "late answers are discarded once the auction completed"
    );
    assert_eq!(sink.done_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_slow_capability_load_when_deadline_passes_then_auction_completes_without_dispatch() {
    let (capability, _batches) = ScriptedCapability::new();
    let source = Arc::new(
        CountingSource::new(capability.clone()).with_delay(Duration::from_secs(30)),
    );
    let orchestrator = AuctionOrchestrator::new(underdog(), source.clone());
    let sink = Arc::new(RecordingSink::default());

    let summary = orchestrator
        .run_auction(
            auction("auction-slow-load", vec![underdog_request("b1", "slot-1")]),
            sink.clone(),
        )
        .await;

    assert_eq!(summary.termination, AuctionTermination::DeadlineExpired);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(sink.done_calls(), 1);
    assert_eq!(capability.dispatches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn given_shutdown_while_collecting_when_cancelled_then_done_fires_once() {
    let (capability, mut batches) = ScriptedCapability::new();
    let orchestrator = Arc::new(AuctionOrchestrator::new(
        underdog(),
        Arc::new(CountingSource::new(capability)),
    ));
    let sink = Arc::new(RecordingSink::default());

    let request = auction("auction-shutdown", vec![underdog_request("b1", "slot-1")]);
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = sink.clone();
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };

    let _held = batches.recv().await.expect("dispatch");
    orchestrator.shutdown();

    let summary = running.await.expect("auction task");
    assert_eq!(summary.termination, AuctionTermination::Shutdown);
    assert_eq!(sink.done_calls(), 1);
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn given_dropped_responders_when_auction_runs_then_each_request_counts_as_no_bid() {
    let (capability, mut batches) = ScriptedCapability::new();
    let orchestrator = Arc::new(AuctionOrchestrator::new(
        underdog(),
        Arc::new(CountingSource::new(capability)),
    ));
    let sink = Arc::new(RecordingSink::default());

    let request = auction(
        "auction-dropped",
        vec![underdog_request("b1", "slot-1"), underdog_request("b2", "slot-2")],
    );
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = sink.clone();
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };
    drop(batches.recv().await.expect("dispatch"));

    let summary = running.await.expect("auction task");
    assert_eq!(summary.termination, AuctionTermination::AllAnswered);
    assert_eq!((summary.answered, summary.no_bids), (2, 2));
    assert!(
        sink.records()
            .iter()
            .all(|(_, outcome)| matches!(outcome, BidOutcome::NoBid(_)))
    );
    assert_eq!(sink.done_calls(), 1);
}

#[tokio::test]
async fn given_failed_capability_load_when_next_auction_runs_then_load_is_retried_once() {
    let capability = Arc::new(ReversingCapability::new(|_: &DispatchedRequest| {
        RawResponse::empty()
    }));
    let source = Arc::new(CountingSource::new(capability).failing_first(1));
    let orchestrator = AuctionOrchestrator::new(underdog(), source.clone());

    let first_sink = Arc::new(RecordingSink::default());
    let first = orchestrator
        .run_auction(
            auction("auction-load-1", vec![underdog_request("b1", "slot-1")]),
            first_sink.clone(),
        )
        .await;
    assert_eq!(first.termination, AuctionTermination::CapabilityUnavailable);
    assert_eq!(first_sink.done_calls(), 1);

    let second_sink = Arc::new(RecordingSink::default());
    let second = orchestrator
        .run_auction(
            auction("auction-load-2", vec![underdog_request("b1", "slot-1")]),
            second_sink.clone(),
        )
        .await;
    assert_eq!(second.termination, AuctionTermination::AllAnswered);
    assert_eq!(second_sink.done_calls(), 1);
    assert_eq!(source.loads(), 2);
}

#[tokio::test]
async fn given_live_auction_id_when_reused_then_second_run_completes_without_dispatch() {
    let correlator = ResponseCorrelator::new();
    let (capability, mut batches) = ScriptedCapability::new();
    let orchestrator = Arc::new(
        AuctionOrchestrator::new(underdog(), Arc::new(CountingSource::new(capability.clone())))
            .with_correlator(correlator.clone()),
    );

    let first_sink = Arc::new(RecordingSink::default());
    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = first_sink.clone();
        let request = auction("auction-dup", vec![underdog_request("b1", "slot-1")]);
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };
    let first_batch = batches.recv().await.expect("first dispatch");

    let second_sink = Arc::new(RecordingSink::default());
    let second = orchestrator
        .run_auction(
            auction("auction-dup", vec![underdog_request("b9", "slot-9")]),
            second_sink.clone(),
        )
        .await;
    assert_eq!(second.termination, AuctionTermination::DuplicateAuction);
    assert_eq!(second_sink.done_calls(), 1);
    assert_eq!(capability.dispatches.load(Ordering::SeqCst), 1);

    for dispatched in first_batch {
        dispatched.responder.respond(RawResponse::empty());
    }
    let first = running.await.expect("first auction");
    assert_eq!(first.termination, AuctionTermination::AllAnswered);
    assert_eq!(first_sink.done_calls(), 1);
    assert_eq!(correlator.open_auctions().await, 0);
}

#[tokio::test]
async fn given_only_invalid_requests_when_auction_runs_then_done_fires_with_nothing_dispatched() {
    let capability = Arc::new(ReversingCapability::new(|_: &DispatchedRequest| {
        RawResponse::empty()
    }));
    let adapter: Arc<dyn BidAdapter> = Arc::new(YieldoneAdapter::new(&YieldoneConfig::default()));
    let orchestrator =
        AuctionOrchestrator::new(adapter, Arc::new(StaticCapabilitySource::new(capability)));
    let sink = Arc::new(RecordingSink::default());

    let summary = orchestrator
        .run_auction(
            auction("auction-empty", vec![yieldone_request("b1", "slot-1", "")]),
            sink.clone(),
        )
        .await;

    assert_eq!(summary.termination, AuctionTermination::Empty);
    assert_eq!(summary.dispatched, 0);
    assert_eq!(sink.done_calls(), 1);
}

#[tokio::test]
async fn given_yieldone_bids_when_answered_then_cpm_is_scaled_and_units_round_trip() {
    let capability = Arc::new(ReversingCapability::new(|dispatched: &DispatchedRequest| {
        RawResponse::single(banner_creative(0.5, &format!("crid-{}", dispatched.request.bid_id)))
    }));
    let adapter: Arc<dyn BidAdapter> = Arc::new(YieldoneAdapter::new(&YieldoneConfig::default()));
    let orchestrator =
        AuctionOrchestrator::new(adapter, Arc::new(StaticCapabilitySource::new(capability)));
    let sink = Arc::new(RecordingSink::default());

    let summary = orchestrator
        .run_auction(
            auction(
                "auction-y1",
                vec![
                    yieldone_request("b1", "slot-1", "36891"),
                    yieldone_request("b2", "slot-2", "36892"),
                ],
            ),
            sink.clone(),
        )
        .await;

    assert_eq!(summary.termination, AuctionTermination::AllAnswered);
    assert_eq!(summary.bids, 2);
    for (unit, outcome) in sink.records() {
        let bid = outcome.as_bid().expect("bid");
        assert_eq!(bid.cpm, 500.0);
        assert_eq!(bid.currency, "JPY");
        assert_eq!(bid.creative_id, format!("crid-{}", bid.request_id));
        let expected_unit = if bid.request_id == "b1" { "slot-1" } else { "slot-2" };
        assert_eq!(unit, expected_unit);
    }
}

#[tokio::test(start_paused = true)]
async fn given_dispatch_never_returns_when_deadline_passes_then_done_fires_once() {
    let capability = Arc::new(StalledCapability::default());
    let orchestrator =
        AuctionOrchestrator::new(underdog(), Arc::new(CountingSource::new(capability.clone())));
    let sink = Arc::new(RecordingSink::default());

    let summary = tokio::time::timeout(
        Duration::from_secs(60),
        orchestrator.run_auction(
            auction("auction-stalled", vec![underdog_request("b1", "slot-1")]),
            sink.clone(),
        ),
    )
    .await
    .expect("auction must not outlive its deadline");

    assert_eq!(summary.termination, AuctionTermination::DeadlineExpired);
    assert_eq!((summary.dispatched, summary.answered), (1, 0));
    assert_eq!(capability.dispatches.load(Ordering::SeqCst), 1);
    assert_eq!(sink.done_calls(), 1);
    assert!(sink.records().is_empty());
    assert_eq!(orchestrator.correlator().open_auctions().await, 0);
}

#[tokio::test(start_paused = true)]
async fn given_dispatch_never_returns_when_shutdown_then_done_fires_once() {
    let capability = Arc::new(StalledCapability::default());
    let orchestrator = Arc::new(AuctionOrchestrator::new(
        underdog(),
        Arc::new(CountingSource::new(capability.clone())),
    ));
    let sink = Arc::new(RecordingSink::default());

    let running = {
        let orchestrator = Arc::clone(&orchestrator);
        let sink: Arc<dyn AuctionSink> = sink.clone();
        let request = auction("auction-stalled-shutdown", vec![underdog_request("b1", "slot-1")]);
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(capability.dispatches.load(Ordering::SeqCst), 1);
    orchestrator.shutdown();

    let summary = running.await.expect("auction task");
    assert_eq!(summary.termination, AuctionTermination::Shutdown);
    assert_eq!(sink.done_calls(), 1);
    assert_eq!(orchestrator.correlator().open_auctions().await, 0);
}

#[tokio::test]
async fn given_bidders_sharing_a_correlator_when_same_auction_runs_then_both_collect_bids() {
    let correlator = ResponseCorrelator::new();
    let (scripted, mut batches) = ScriptedCapability::new();
    let underdog_orchestrator = Arc::new(
        AuctionOrchestrator::new(underdog(), Arc::new(CountingSource::new(scripted)))
            .with_correlator(correlator.clone()),
    );
    let answering = Arc::new(ReversingCapability::new(|dispatched: &DispatchedRequest| {
        RawResponse::single(banner_creative(0.5, &format!("crid-{}", dispatched.request.bid_id)))
    }));
    let yieldone_adapter: Arc<dyn BidAdapter> =
        Arc::new(YieldoneAdapter::new(&YieldoneConfig::default()));
    let yieldone_orchestrator =
        AuctionOrchestrator::new(yieldone_adapter, Arc::new(StaticCapabilitySource::new(answering)))
            .with_correlator(correlator.clone());

    let underdog_sink = Arc::new(RecordingSink::default());
    let running = {
        let orchestrator = Arc::clone(&underdog_orchestrator);
        let sink: Arc<dyn AuctionSink> = underdog_sink.clone();
        let request = auction("shared-auction", vec![underdog_request("b1", "slot-1")]);
        tokio::spawn(async move { orchestrator.run_auction(request, sink).await })
    };
    let held = batches.recv().await.expect("underdog dispatch");

    let yieldone_sink = Arc::new(RecordingSink::default());
    let yieldone = yieldone_orchestrator
        .run_auction(
            auction("shared-auction", vec![yieldone_request("b2", "slot-2", "36891")]),
            yieldone_sink.clone(),
        )
        .await;
    assert_eq!(yieldone.termination, AuctionTermination::AllAnswered);
    assert_eq!(yieldone.bids, 1);
    assert_eq!(yieldone_sink.records().len(), 1);
    assert_eq!(yieldone_sink.done_calls(), 1);

    for dispatched in held {
        dispatched
            .responder
            .respond(RawResponse::single(banner_creative(1.5, "udm-1")));
    }
    let underdog_summary = running.await.expect("underdog auction");
    assert_eq!(underdog_summary.termination, AuctionTermination::AllAnswered);
    assert_eq!(underdog_sink.records().len(), 1);
    assert_eq!(correlator.open_auctions().await, 0);
}

#[tokio::test]
async fn given_tracking_pixel_fails_when_consent_denied_then_done_still_fires_once() {
    let (capability, _batches) = ScriptedCapability::new();
    let source = Arc::new(CountingSource::new(capability.clone()));
    let pixel = Arc::new(FailingPixel::default());
    let orchestrator =
        AuctionOrchestrator::new(underdog(), source.clone()).with_tracking_pixel(pixel.clone());
    let sink = Arc::new(RecordingSink::default());

    let mut request = auction("auction-pixel-error", vec![underdog_request("b1", "slot-1")]);
    request.gdpr_consent = Some(denied_consent());

    let summary = orchestrator.run_auction(request, sink.clone()).await;

    assert_eq!(summary.termination, AuctionTermination::ConsentRejected);
    assert_eq!(pixel.fires.load(Ordering::SeqCst), 1);
    assert_eq!(sink.done_calls(), 1);
    assert!(sink.records().is_empty());
    assert_eq!(source.loads(), 0);
    assert_eq!(capability.dispatches.load(Ordering::SeqCst), 0);
}
