//! Async driver for one feed session.
//!
//! Reads items in order, feeds the resulting events through
//! [`crate::session::transition`], and performs the returned actions. Every
//! await is raced against the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use feed_client::{next_max_id, FeedError, MAX_ID_PARAM};

use crate::classifier::{classify, FeedItem};
use crate::pipeline::{ItemOutcome, Pipeline};
use crate::session::{
    transition, Backoff, SessionAction, SessionEvent, SessionState, TerminationReason,
};
use crate::traits::{FeedSource, FeedStream};

/// How the endpoint delivers items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedMode {
    /// One long-lived connection, reopened on failure.
    #[default]
    Stream,
    /// Request/response pages walked from newest to oldest.
    Pager,
}

/// Counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionTally {
    /// Content items that reached the store.
    pub processed: u64,
    /// Items the provider reported as withheld.
    pub skipped: u64,
    /// Content dropped by the coordinate-only filter.
    pub filtered: u64,
    /// Content that failed to decode or that the store failed to persist.
    pub failed: u64,
    pub reconnects: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub reason: TerminationReason,
    pub tally: SessionTally,
}

pub struct Collector {
    source: Arc<dyn FeedSource>,
    pipeline: Pipeline,
    endpoint: String,
    params: Vec<(String, String)>,
    mode: FeedMode,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
    tally: SessionTally,
    /// Withheld count reported on the current connection. The provider's
    /// count is cumulative per connection, so only the largest is kept.
    connection_skipped: u64,
}

impl Collector {
    pub fn new(
        source: Arc<dyn FeedSource>,
        pipeline: Pipeline,
        endpoint: impl Into<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            pipeline,
            endpoint: endpoint.into(),
            params: Vec::new(),
            mode: FeedMode::default(),
            backoff: Backoff::new(Duration::from_secs(5)),
            shutdown,
            tally: SessionTally::default(),
            connection_skipped: 0,
        }
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_mode(mut self, mode: FeedMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run until the session terminates, then log and return the tally.
    pub async fn run(&mut self) -> SessionReport {
        info!(endpoint = %self.endpoint, mode = ?self.mode, "Starting feed session");
        let reason = match self.mode {
            FeedMode::Stream => self.run_stream().await,
            FeedMode::Pager => self.run_pager().await,
        };

        let report = SessionReport {
            reason,
            tally: self.tally,
        };
        info!(
            reason = %report.reason,
            processed = report.tally.processed,
            skipped = report.tally.skipped,
            filtered = report.tally.filtered,
            failed = report.tally.failed,
            reconnects = report.tally.reconnects,
            "Feed session ended"
        );
        if let Some(annotator) = self.pipeline.annotator() {
            annotator.quota().log_stats();
        }
        report
    }

    // --- Streaming ---

    async fn run_stream(&mut self) -> TerminationReason {
        let mut state = SessionState::Connecting;
        loop {
            let opened = tokio::select! {
                _ = wait_for_shutdown(self.shutdown.clone()) => None,
                result = self.source.open_stream(&self.endpoint, &self.params) => Some(result),
            };
            let (event, stream) = match opened {
                None => (SessionEvent::Interrupt, None),
                Some(Ok(stream)) => (SessionEvent::Opened, Some(stream)),
                Some(Err(e)) => (self.transport_failure(&e), None),
            };

            let (next, action) = transition(state, event);
            state = next;
            match action {
                SessionAction::Stop => return terminated(state),
                SessionAction::Reconnect => {
                    if !self.back_off().await {
                        return TerminationReason::User;
                    }
                    continue;
                }
                _ => {}
            }
            let Some(stream) = stream else {
                continue;
            };

            state = self.read_stream(state, stream).await;
            if let SessionState::Terminated(reason) = state {
                return reason;
            }
            if !self.back_off().await {
                return TerminationReason::User;
            }
        }
    }

    /// Consume one connection. Returns `Connecting` when the session should
    /// reconnect, otherwise the terminal state.
    async fn read_stream(
        &mut self,
        mut state: SessionState,
        mut stream: Box<dyn FeedStream>,
    ) -> SessionState {
        self.connection_skipped = 0;
        loop {
            let next = tokio::select! {
                _ = wait_for_shutdown(self.shutdown.clone()) => None,
                result = stream.next_item() => Some(result),
            };
            let (event, item) = match next {
                None => (SessionEvent::Interrupt, None),
                Some(Ok(Some(value))) => {
                    let item = classify(value);
                    (SessionEvent::for_item(&item), Some(item))
                }
                Some(Ok(None)) => {
                    info!(endpoint = %self.endpoint, "Stream closed by server");
                    (SessionEvent::StreamEnded, None)
                }
                Some(Err(e)) => (self.transport_failure(&e), None),
            };

            let (next, action) = transition(state, event);
            state = next;
            match action {
                SessionAction::Reconnect | SessionAction::Stop => {
                    if let Some(item) = &item {
                        report(item);
                    }
                    self.close_connection();
                    return state;
                }
                _ => {
                    if !self.perform(action, item).await {
                        self.close_connection();
                        return SessionState::Terminated(TerminationReason::User);
                    }
                }
            }
        }
    }

    // --- Paging ---

    async fn run_pager(&mut self) -> TerminationReason {
        let mut state = SessionState::Connecting;
        let mut cursor: Option<u64> = None;
        loop {
            let mut params = self.params.clone();
            if let Some(max_id) = cursor {
                params.retain(|(name, _)| name != MAX_ID_PARAM);
                params.push((MAX_ID_PARAM.to_string(), max_id.to_string()));
            }

            let fetched = tokio::select! {
                _ = wait_for_shutdown(self.shutdown.clone()) => None,
                result = self.source.fetch_page(&self.endpoint, &params) => Some(result),
            };
            let (event, items) = match fetched {
                None => (SessionEvent::Interrupt, Vec::new()),
                Some(Ok(items)) => (SessionEvent::Opened, items),
                Some(Err(e)) => (self.transport_failure(&e), Vec::new()),
            };

            let (next, action) = transition(state, event);
            state = next;
            match action {
                SessionAction::Stop => return terminated(state),
                SessionAction::Reconnect => {
                    if !self.back_off().await {
                        return TerminationReason::User;
                    }
                    continue;
                }
                _ => {}
            }

            let next_cursor = next_max_id(&items);
            self.connection_skipped = 0;
            for value in items {
                let item = classify(value);
                let (next, action) = transition(state, SessionEvent::for_item(&item));
                state = next;
                match action {
                    SessionAction::Stop => {
                        report(&item);
                        self.close_connection();
                        return terminated(state);
                    }
                    SessionAction::Reconnect => {
                        report(&item);
                        break;
                    }
                    _ => {
                        if !self.perform(action, Some(item)).await {
                            return TerminationReason::User;
                        }
                    }
                }
            }
            self.close_connection();

            if state == SessionState::Connecting {
                // A disconnect notice inside the page: retry the same cursor.
                if !self.back_off().await {
                    return TerminationReason::User;
                }
                continue;
            }

            state = transition(state, SessionEvent::PageConsumed).0;
            let more = if next_cursor.is_some() {
                SessionEvent::MorePages
            } else {
                SessionEvent::NoMorePages
            };
            let (next, action) = transition(state, more);
            state = next;
            if action == SessionAction::Stop {
                return terminated(state);
            }

            cursor = next_cursor;
            let delay = self.backoff.floor();
            if !self.sleep(delay).await {
                return TerminationReason::User;
            }
        }
    }

    // --- Actions ---

    /// Perform a non-terminal action. Returns `false` if interrupted.
    async fn perform(&mut self, action: SessionAction, item: Option<FeedItem>) -> bool {
        match (action, item) {
            (SessionAction::Process, Some(FeedItem::Content { record, raw })) => {
                let outcome = tokio::select! {
                    _ = wait_for_shutdown(self.shutdown.clone()) => return false,
                    outcome = self.pipeline.process(*record, &raw) => outcome,
                };
                match outcome {
                    ItemOutcome::Saved(_) => {
                        self.tally.processed += 1;
                        self.backoff.reset();
                    }
                    ItemOutcome::Filtered => self.tally.filtered += 1,
                    ItemOutcome::Failed => self.tally.failed += 1,
                }
            }
            (SessionAction::Process, Some(FeedItem::MalformedContent { error, raw })) => {
                warn!(%error, item = %raw, "Dropping undecodable content");
                self.tally.failed += 1;
            }
            (SessionAction::CountSkipped(skipped), _) => {
                self.connection_skipped = self.connection_skipped.max(skipped);
            }
            (SessionAction::Report, Some(item)) => report(&item),
            _ => {}
        }
        true
    }

    fn transport_failure(&self, error: &FeedError) -> SessionEvent {
        let retryable = error.is_retryable();
        warn!(endpoint = %self.endpoint, error = %error, retryable, "Feed transport failure");
        SessionEvent::TransportFailure { retryable }
    }

    /// Fold the connection's withheld count into the tally.
    fn close_connection(&mut self) {
        self.tally.skipped += self.connection_skipped;
        self.connection_skipped = 0;
    }

    /// Wait out the next backoff delay. Returns `false` if interrupted.
    async fn back_off(&mut self) -> bool {
        self.tally.reconnects += 1;
        let delay = self.backoff.next_delay();
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.backoff.consecutive_failures(),
            "Reconnecting after delay"
        );
        self.sleep(delay).await
    }

    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = wait_for_shutdown(self.shutdown.clone()) => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

fn terminated(state: SessionState) -> TerminationReason {
    match state {
        SessionState::Terminated(reason) => reason,
        _ => TerminationReason::Error,
    }
}

fn report(item: &FeedItem) {
    match item {
        FeedItem::Warning { message } => warn!(%message, "Feed warning"),
        FeedItem::DisconnectNotice { code, detail } => {
            warn!(code, %detail, "Feed disconnect notice")
        }
        FeedItem::TerminalError { code, detail } => warn!(code, %detail, "Feed error"),
        FeedItem::Informational { message } => info!(%message, "Feed message"),
        FeedItem::MalformedContent { error, raw } => {
            warn!(%error, item = %raw, "Dropping undecodable content")
        }
        FeedItem::Content { .. } | FeedItem::RateLimitNotice { .. } => {}
    }
}

/// Resolves once shutdown has been requested. Never resolves if the sender
/// is gone without requesting it.
pub async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        futures::future::pending::<()>().await;
    }
}
