use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures_util::future::join_all;

use bidrelay::{
    bidding::{
        NormalizedBid, RawCreative, RawResponse,
        adapters::{BidAdapter, yieldone::YieldoneAdapter},
        error::{BiddingError, BiddingErrorKind, renderer_failed},
        interpreter::ResponseInterpreter,
        ports::RenderHost,
    },
    config::YieldoneConfig,
};

use crate::support::yieldone_request;

#[derive(Default)]
struct RecordingHost {
    loads: AtomicUsize,
    fail_loads: bool,
    playbacks: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl RenderHost for RecordingHost {
    async fn load_script(&self, _url: &str) -> Result<(), BiddingError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.fail_loads {
            return Err(renderer_failed("script blocked"));
        }
        Ok(())
    }

    fn invoke_playback(&self, global: &str, bid: &NormalizedBid) -> Result<(), BiddingError> {
        self.playbacks
            .lock()
            .expect("playbacks lock")
            .push((global.to_string(), bid.request_id.clone()));
        Ok(())
    }
}

fn video_bids(interpreter: &ResponseInterpreter, variant: Option<&str>, ids: &[&str]) -> Vec<NormalizedBid> {
    ids.iter()
        .map(|bid_id| {
            let creative = RawCreative {
                cpm: Some(0.3),
                width: Some(640),
                height: Some(360),
                creative_id: Some(format!("crid-{bid_id}")),
                ad_document: Some("<VAST/>".to_string()),
                renderer_variant: variant.map(str::to_string),
                ..RawCreative::default()
            };
            let interpretation = interpreter.interpret(
                &yieldone_request(bid_id, "video-slot", "41993"),
                &RawResponse::single(creative),
                None,
            );
            interpretation.outcomes[0]
                .as_bid()
                .cloned()
                .expect("video bid")
        })
        .collect()
}

fn interpreter() -> ResponseInterpreter {
    let adapter = YieldoneAdapter::new(&YieldoneConfig::default());
    ResponseInterpreter::new(Arc::new(adapter.profile().clone()))
}

#[tokio::test]
async fn given_many_video_bids_when_rendered_concurrently_then_script_loads_once() {
    let interpreter = interpreter();
    let bids = video_bids(&interpreter, Some("cmer"), &["b1", "b2", "b3"]);
    let host = RecordingHost::default();

    let results = join_all(bids.iter().map(|bid| {
        let renderer = bid.renderer.clone().expect("renderer");
        let host = &host;
        async move { renderer.render(host, bid).await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(host.loads.load(Ordering::SeqCst), 1);
    let playbacks = host.playbacks.lock().expect("playbacks").clone();
    assert_eq!(playbacks.len(), 3);
    assert!(playbacks.iter().all(|(global, _)| global == "CMERYONEPREBID"));
    assert!(bids[0].renderer.as_ref().is_some_and(|renderer| renderer.is_loaded()));
}

#[tokio::test]
async fn given_default_variant_when_rendered_then_default_playback_global_is_invoked() {
    let interpreter = interpreter();
    let bids = video_bids(&interpreter, None, &["b1"]);
    let host = RecordingHost::default();

    let renderer = bids[0].renderer.clone().expect("renderer");
    renderer.render(&host, &bids[0]).await.expect("render");

    assert_eq!(
        host.playbacks.lock().expect("playbacks").clone(),
        vec![("DACIVTPREBID".to_string(), "b1".to_string())]
    );
}

#[tokio::test]
async fn given_failed_script_load_when_rendered_again_then_load_is_retried() {
    let interpreter = interpreter();
    let bids = video_bids(&interpreter, None, &["b1"]);
    let renderer = bids[0].renderer.clone().expect("renderer");

    let failing = RecordingHost {
        fail_loads: true,
        ..RecordingHost::default()
    };
    let err = renderer
        .render(&failing, &bids[0])
        .await
        .expect_err("blocked script should fail");
    assert_eq!(err.kind, BiddingErrorKind::RendererFailed);
    assert!(!renderer.is_loaded());
    assert!(failing.playbacks.lock().expect("playbacks").is_empty());

    let healthy = RecordingHost::default();
    renderer.render(&healthy, &bids[0]).await.expect("retry renders");
    assert_eq!(healthy.loads.load(Ordering::SeqCst), 1);
}
