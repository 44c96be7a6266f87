// Library crate linked by the host auction framework; config and logging are host-facing entrypoints.
pub mod bidding;
pub mod config;
pub mod logging;
