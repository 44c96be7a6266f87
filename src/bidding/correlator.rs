use std::{collections::HashMap, sync::Arc};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bidding::{
    error::{BiddingError, duplicate_auction, invalid_request},
    types::{AdapterCode, AuctionId},
};

/// Bidders in one auction share its id, so countdowns are keyed per adapter.
type CorrelationKey = (AdapterCode, AuctionId);

fn correlation_key(adapter_code: &str, auction_id: &str) -> CorrelationKey {
    (adapter_code.to_string(), auction_id.to_string())
}

/// Handle returned when an auction's countdown is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionTicket {
    key: CorrelationKey,
    expected: usize,
    token: Uuid,
}

impl AuctionTicket {
    pub fn adapter_code(&self) -> &str {
        &self.key.0
    }

    pub fn auction_id(&self) -> &str {
        &self.key.1
    }

    pub fn expected(&self) -> usize {
        self.expected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending { answered: usize, expected: usize },
    /// Returned exactly once per ticket, on the answer that reaches `expected`.
    Complete { answered: usize },
    /// The countdown already completed or was abandoned.
    Closed,
}

#[derive(Debug)]
struct PendingAuction {
    token: Uuid,
    expected: usize,
    answered: usize,
}

/// Per-auction countdown of responses still owed.
///
/// Entries exist from dispatch until the last answer (or abandonment) and are
/// only mutated through tickets.
#[derive(Clone, Default)]
pub struct ResponseCorrelator {
    pending: Arc<Mutex<HashMap<CorrelationKey, PendingAuction>>>,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(
        &self,
        adapter_code: &str,
        auction_id: &str,
        expected: usize,
    ) -> Result<AuctionTicket, BiddingError> {
        if expected == 0 {
            return Err(invalid_request(format!(
                "auction '{auction_id}' has no requests to correlate for '{adapter_code}'"
            )));
        }

        let key = correlation_key(adapter_code, auction_id);
        let mut guard = self.pending.lock().await;
        if guard.contains_key(&key) {
            return Err(duplicate_auction(format!(
                "auction '{auction_id}' already has '{adapter_code}' responses pending"
            ))
            .with_adapter(adapter_code));
        }

        let token = Uuid::new_v4();
        guard.insert(
            key.clone(),
            PendingAuction {
                token,
                expected,
                answered: 0,
            },
        );

        Ok(AuctionTicket {
            key,
            expected,
            token,
        })
    }

    pub async fn record_answer(&self, ticket: &AuctionTicket) -> Progress {
        let mut guard = self.pending.lock().await;
        let Some(state) = guard
            .get_mut(&ticket.key)
            .filter(|state| state.token == ticket.token)
        else {
            return Progress::Closed;
        };

        state.answered = state.answered.saturating_add(1);
        if state.answered >= state.expected {
            let answered = state.answered;
            guard.remove(&ticket.key);
            return Progress::Complete { answered };
        }

        Progress::Pending {
            answered: state.answered,
            expected: state.expected,
        }
    }

    /// Drops the entry without completing it. Returns how many answers were still owed.
    pub async fn abandon(&self, ticket: &AuctionTicket) -> Option<usize> {
        let mut guard = self.pending.lock().await;
        let owns_entry = guard
            .get(&ticket.key)
            .is_some_and(|state| state.token == ticket.token);
        if !owns_entry {
            return None;
        }

        guard
            .remove(&ticket.key)
            .map(|state| state.expected.saturating_sub(state.answered))
    }

    pub async fn outstanding(&self, adapter_code: &str, auction_id: &str) -> Option<usize> {
        self.pending
            .lock()
            .await
            .get(&correlation_key(adapter_code, auction_id))
            .map(|state| state.expected.saturating_sub(state.answered))
    }

    pub async fn open_auctions(&self) -> usize {
        self.pending.lock().await.len()
    }
}
