use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bidding::types::AdapterCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiddingErrorKind {
    InvalidRequest,
    DuplicateAuction,
    CapabilityUnavailable,
    DispatchFailed,
    Transport,
    RendererFailed,
    Internal,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct BiddingError {
    pub kind: BiddingErrorKind,
    pub message: String,
    pub retryable: bool,
    pub adapter_code: Option<AdapterCode>,
}

impl BiddingError {
    pub fn new(kind: BiddingErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(kind, BiddingErrorKind::Transport),
            adapter_code: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_adapter(mut self, adapter_code: impl Into<String>) -> Self {
        self.adapter_code = Some(adapter_code.into());
        self
    }
}

pub fn invalid_request(message: impl Into<String>) -> BiddingError {
    BiddingError::new(BiddingErrorKind::InvalidRequest, message)
}

pub fn duplicate_auction(message: impl Into<String>) -> BiddingError {
    BiddingError::new(BiddingErrorKind::DuplicateAuction, message)
}

pub fn capability_unavailable(message: impl Into<String>) -> BiddingError {
    BiddingError::new(BiddingErrorKind::CapabilityUnavailable, message)
}

pub fn dispatch_failed(message: impl Into<String>) -> BiddingError {
    BiddingError::new(BiddingErrorKind::DispatchFailed, message)
}

pub fn transport_error(message: impl Into<String>) -> BiddingError {
    BiddingError::new(BiddingErrorKind::Transport, message)
}

pub fn renderer_failed(message: impl Into<String>) -> BiddingError {
    BiddingError::new(BiddingErrorKind::RendererFailed, message)
}

pub fn internal_error(message: impl Into<String>) -> BiddingError {
    BiddingError::new(BiddingErrorKind::Internal, message)
}
