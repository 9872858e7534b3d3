use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{
    // ---
    log_debug,
    log_error,
    BridgeError,
    CorrelationId,
    InboundMessage,
    Result,
};

pub(crate) type ReplyResult = Result<InboundMessage>;

struct Registration {
    tx: oneshot::Sender<ReplyResult>,
    deadline: Option<Instant>,
}

/// Correlation table of pending replies.
///
/// Insertion happens from any task that sends a request; removal happens on
/// the session's reply delivery path and its deadline sweep. Each entry is
/// completed at most once: whichever of reply, expiry or session end removes
/// it first wins.
#[derive(Default)]
pub(crate) struct ReplyRegistry {
    // ---
    entries: DashMap<CorrelationId, Registration>,
}

impl ReplyRegistry {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending reply. The receiver resolves when the entry is
    /// completed, expired or failed.
    pub fn register(
        &self,
        id: CorrelationId,
        deadline: Option<Instant>,
    ) -> oneshot::Receiver<ReplyResult> {
        // ---
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, Registration { tx, deadline });
        rx
    }

    /// Hand a reply to the registration keyed by its correlation id.
    ///
    /// Returns `false` for orphaned replies, which are logged and dropped.
    pub fn dispatch(&self, reply: InboundMessage) -> bool {
        // ---
        let Some(id) = reply.correlation_id().map(CorrelationId::from) else {
            log_error!(
                "reply on {} carries no correlation id, dropping",
                reply.address()
            );
            return false;
        };

        match self.entries.remove(id.as_str()) {
            Some((_, registration)) => {
                // receiver may already be gone; the entry is consumed either way
                let _ = registration.tx.send(Ok(reply));
                log_debug!("reply matched for {id}");
                true
            }
            None => {
                log_error!("reply for {id} matches no pending registration, dropping");
                false
            }
        }
    }

    /// Remove a registration without completing it.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        self.entries.remove(id.as_str()).is_some()
    }

    /// Fail every registration whose deadline is at or before `now`.
    pub fn evict_expired(&self, now: Instant) -> usize {
        // ---
        let expired: Vec<CorrelationId> = self
            .entries
            .iter()
            .filter(|entry| entry.deadline.is_some_and(|d| d <= now))
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for id in expired {
            let removed = self
                .entries
                .remove_if(id.as_str(), |_, r| r.deadline.is_some_and(|d| d <= now));

            if let Some((id, registration)) = removed {
                let _ = registration
                    .tx
                    .send(Err(BridgeError::ReplyTimeout(id.to_string())));
                evicted += 1;
            }
        }
        evicted
    }

    /// Fail every registration, e.g. when the session ends.
    pub fn fail_all(&self, error: impl Fn() -> BridgeError) -> usize {
        // ---
        let ids: Vec<CorrelationId> = self.entries.iter().map(|e| e.key().clone()).collect();

        ids.into_iter()
            .filter_map(|id| self.entries.remove(id.as_str()))
            .map(|(_, registration)| {
                let _ = registration.tx.send(Err(error()));
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
