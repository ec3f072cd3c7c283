//! Span builder helpers for tcp-tee instrumentation.

/// Create a tracing span for one duplicated client session.
///
/// Usage: `let span = session_span!(session_id, listen, peer);`
///
/// Fields recorded later by the session once it completes:
/// - `to_destinations`: bytes read from the client and fanned out
/// - `to_client`: bytes relayed back from the authoritative destination
#[macro_export]
macro_rules! session_span {
    ($session_id:expr, $listen:expr, $peer:expr) => {
        tracing::info_span!(
            "session",
            session_id = %$session_id,
            listen = %$listen,
            peer = %$peer,
            to_destinations = tracing::field::Empty,
            to_client = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for a listener's accept loop.
#[macro_export]
macro_rules! listener_span {
    ($listen:expr) => {
        tracing::info_span!("listener", listen = %$listen)
    };
}
