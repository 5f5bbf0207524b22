//! Feed session state machine.
//!
//! [`transition`] is pure: it maps the current state and one observed event
//! to the next state and the action the driver must perform. The driver in
//! [`crate::collector`] does all I/O.

use std::time::Duration;

use feed_client::AuthVersion;

use crate::classifier::FeedItem;

/// Disconnect codes after which reconnecting is pointless: shutdown by
/// the server, duplicate stream, stall and admin logout.
pub const TERMINAL_DISCONNECT_CODES: [i64; 4] = [2, 5, 6, 7];

/// Longest wait between reconnect attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(320);

/// The floor is raised by this many percent so retries land just after the
/// provider's rate window.
const FLOOR_MARGIN_PERCENT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The provider refused the session.
    Rejected,
    /// Unrecoverable protocol or transport error.
    Error,
    /// Interrupted by the operator.
    User,
    /// A paged endpoint has no more items.
    Exhausted,
}

impl TerminationReason {
    /// Whether the process should exit with a failure status.
    pub fn is_failure(self) -> bool {
        matches!(self, TerminationReason::Rejected | TerminationReason::Error)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Rejected => write!(f, "rejected"),
            TerminationReason::Error => write!(f, "error"),
            TerminationReason::User => write!(f, "user"),
            TerminationReason::Exhausted => write!(f, "exhausted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    /// Paged mode: one page consumed, deciding whether to fetch another.
    Draining,
    Terminated(TerminationReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    Content,
    RateLimit { skipped: u64 },
    Warning,
    Informational,
    Disconnect { code: i64 },
    TerminalError,
    TransportFailure { retryable: bool },
    /// Streaming mode: the server closed the connection.
    StreamEnded,
    /// Paged mode: every item of the current page was handled.
    PageConsumed,
    /// Paged mode: another page may hold items.
    MorePages,
    /// Paged mode: the last page was empty.
    NoMorePages,
    Interrupt,
}

impl SessionEvent {
    /// Event for a classified item.
    pub fn for_item(item: &FeedItem) -> Self {
        match item {
            FeedItem::Content { .. } | FeedItem::MalformedContent { .. } => SessionEvent::Content,
            FeedItem::RateLimitNotice { skipped } => SessionEvent::RateLimit { skipped: *skipped },
            FeedItem::Warning { .. } => SessionEvent::Warning,
            FeedItem::DisconnectNotice { code, .. } => SessionEvent::Disconnect { code: *code },
            FeedItem::TerminalError { .. } => SessionEvent::TerminalError,
            FeedItem::Informational { .. } => SessionEvent::Informational,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Nothing to do beyond reading the next input.
    Continue,
    /// Run the content pipeline on the current item.
    Process,
    /// Record the rate-limit count carried by the notice.
    CountSkipped(u64),
    /// Log the current item.
    Report,
    /// Back off, then open a new session.
    Reconnect,
    /// Wait the inter-page delay, then fetch the next page.
    FetchNextPage,
    /// The session is over.
    Stop,
}

pub fn transition(state: SessionState, event: SessionEvent) -> (SessionState, SessionAction) {
    use SessionAction as A;
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Terminated(reason), _) => (S::Terminated(reason), A::Stop),
        (_, E::Interrupt) => (S::Terminated(TerminationReason::User), A::Stop),

        (S::Connecting, E::Opened) => (S::Streaming, A::Continue),

        (S::Connecting | S::Streaming, E::TransportFailure { retryable: true }) => {
            (S::Connecting, A::Reconnect)
        }
        (_, E::TransportFailure { retryable: false }) => {
            (S::Terminated(TerminationReason::Error), A::Stop)
        }

        (S::Streaming, E::Content) => (S::Streaming, A::Process),
        (S::Streaming, E::RateLimit { skipped }) => (S::Streaming, A::CountSkipped(skipped)),
        (S::Streaming, E::Warning | E::Informational) => (S::Streaming, A::Report),
        (S::Streaming, E::Disconnect { code }) if TERMINAL_DISCONNECT_CODES.contains(&code) => {
            (S::Terminated(TerminationReason::Rejected), A::Stop)
        }
        (S::Streaming, E::Disconnect { .. }) => (S::Connecting, A::Reconnect),
        (S::Streaming, E::TerminalError) => (S::Terminated(TerminationReason::Error), A::Stop),
        (S::Streaming, E::StreamEnded) => (S::Connecting, A::Reconnect),

        (S::Streaming, E::PageConsumed) => (S::Draining, A::Continue),
        (S::Draining, E::MorePages) => (S::Connecting, A::FetchNextPage),
        (S::Draining, E::NoMorePages) => (S::Terminated(TerminationReason::Exhausted), A::Stop),

        // Anything else cannot happen in that state and changes nothing.
        (state, _) => (state, A::Continue),
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Reconnect delay: starts at the floor, doubles per consecutive failure,
/// capped at [`MAX_BACKOFF`]. Reset once an item has been processed.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    floor: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(floor: Duration) -> Self {
        Self {
            floor: floor.saturating_mul(100 + FLOOR_MARGIN_PERCENT) / 100,
            failures: 0,
        }
    }

    /// Floor matching the provider's request window for the auth scheme.
    pub fn for_auth(version: AuthVersion) -> Self {
        match version {
            AuthVersion::User => Self::new(Duration::from_secs(5)),
            AuthVersion::App => Self::new(Duration::from_secs(2)),
        }
    }

    /// Smallest wait, also used between pages.
    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures.min(16));
        self.failures = self.failures.saturating_add(1);
        self.floor.saturating_mul(factor).min(MAX_BACKOFF)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent as E;
    use SessionState as S;

    fn run(events: &[SessionEvent]) -> (SessionState, Vec<SessionAction>) {
        let mut state = S::Connecting;
        let mut actions = Vec::new();
        for event in events {
            let (next, action) = transition(state, *event);
            state = next;
            actions.push(action);
        }
        (state, actions)
    }

    #[test]
    fn terminal_disconnect_rejects() {
        for code in TERMINAL_DISCONNECT_CODES {
            let (state, actions) = run(&[E::Opened, E::Disconnect { code }]);
            assert_eq!(state, S::Terminated(TerminationReason::Rejected));
            assert_eq!(actions.last(), Some(&SessionAction::Stop));
        }
    }

    #[test]
    fn other_disconnect_reconnects_and_continues() {
        let (state, actions) = run(&[
            E::Opened,
            E::Disconnect { code: 999 },
            E::Opened,
            E::Content,
        ]);
        assert_eq!(state, S::Streaming);
        assert_eq!(
            actions,
            vec![
                SessionAction::Continue,
                SessionAction::Reconnect,
                SessionAction::Continue,
                SessionAction::Process,
            ]
        );
    }

    #[test]
    fn transport_failures() {
        let (state, _) = run(&[E::TransportFailure { retryable: true }]);
        assert_eq!(state, S::Connecting);

        let (state, _) = run(&[E::Opened, E::TransportFailure { retryable: true }]);
        assert_eq!(state, S::Connecting);

        let (state, _) = run(&[E::Opened, E::TransportFailure { retryable: false }]);
        assert_eq!(state, S::Terminated(TerminationReason::Error));
    }

    #[test]
    fn terminal_error_and_stream_end() {
        let (state, _) = run(&[E::Opened, E::TerminalError]);
        assert_eq!(state, S::Terminated(TerminationReason::Error));

        let (state, actions) = run(&[E::Opened, E::StreamEnded]);
        assert_eq!(state, S::Connecting);
        assert_eq!(actions[1], SessionAction::Reconnect);
    }

    #[test]
    fn signals_stay_streaming() {
        let (state, actions) = run(&[
            E::Opened,
            E::RateLimit { skipped: 4 },
            E::Warning,
            E::Informational,
        ]);
        assert_eq!(state, S::Streaming);
        assert_eq!(actions[1], SessionAction::CountSkipped(4));
        assert_eq!(actions[2], SessionAction::Report);
    }

    #[test]
    fn interrupt_wins_everywhere() {
        for state in [S::Connecting, S::Streaming, S::Draining] {
            assert_eq!(
                transition(state, E::Interrupt),
                (S::Terminated(TerminationReason::User), SessionAction::Stop)
            );
        }
    }

    #[test]
    fn terminated_is_absorbing() {
        let done = S::Terminated(TerminationReason::Exhausted);
        for event in [E::Opened, E::Content, E::Interrupt, E::MorePages] {
            assert_eq!(transition(done, event), (done, SessionAction::Stop));
        }
    }

    #[test]
    fn paging() {
        let (state, actions) = run(&[E::Opened, E::Content, E::PageConsumed, E::MorePages]);
        assert_eq!(state, S::Connecting);
        assert_eq!(actions.last(), Some(&SessionAction::FetchNextPage));

        let (state, _) = run(&[E::Opened, E::PageConsumed, E::NoMorePages]);
        assert_eq!(state, S::Terminated(TerminationReason::Exhausted));
    }

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(5));
        assert_eq!(backoff.floor(), Duration::from_millis(5050));
        assert_eq!(backoff.next_delay(), Duration::from_millis(5050));
        assert_eq!(backoff.next_delay(), Duration::from_millis(10100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20200));
        for _ in 0..20 {
            assert!(backoff.next_delay() <= MAX_BACKOFF);
        }
        assert_eq!(backoff.next_delay(), MAX_BACKOFF);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5050));
    }

    #[test]
    fn floors_by_auth_version() {
        assert_eq!(Backoff::for_auth(AuthVersion::User).floor(), Duration::from_millis(5050));
        assert_eq!(Backoff::for_auth(AuthVersion::App).floor(), Duration::from_millis(2020));
    }

    #[test]
    fn exit_status() {
        assert!(TerminationReason::Rejected.is_failure());
        assert!(TerminationReason::Error.is_failure());
        assert!(!TerminationReason::User.is_failure());
        assert!(!TerminationReason::Exhausted.is_failure());
    }
}
