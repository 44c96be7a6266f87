pub mod adapters;
pub mod consent;
pub mod correlator;
pub mod error;
pub mod interpreter;
pub mod loader;
pub mod mapper;
pub mod orchestrator;
pub mod pixel;
pub mod ports;
pub mod renderer;
pub mod telemetry;
pub mod types;
pub mod user_sync;
pub mod viewability;

pub use adapters::{AdapterProfile, BidAdapter, ValidationPolicy, build_default_adapters};
pub use consent::evaluate_consent;
pub use correlator::{AuctionTicket, Progress, ResponseCorrelator};
pub use error::{BiddingError, BiddingErrorKind};
pub use loader::{CapabilityLoader, LoaderPhase};
pub use orchestrator::{AuctionOrchestrator, AuctionSummary, AuctionTermination};
pub use types::{
    AdPayload, AuctionRequest, BidOutcome, BidRequest, ConsentDecision, GdprConsent, MediaType,
    NoBid, NormalizedBid, RawCreative, RawResponse, Size,
};
