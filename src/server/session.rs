// Streamed response sessions
//
// One `StreamSession` per `/chunked` request. The session is a lazy
// producer: each fragment is generated only when the transport asks for
// the next frame, so every fragment is on the wire before the delay that
// follows it starts.

use axum::body::Bytes;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::StreamConfig;

pub const OPENING_FRAGMENT: &str = "<html><body>";
pub const CLOSING_FRAGMENT: &str = "</body></html>";

/// Markup for the `index`-th numbered fragment
pub fn numbered_fragment(index: usize) -> String {
    format!("<h3>{}<h3>", index)
}

/// The complete body a session produces when it runs to completion
pub fn expected_body(fragments: usize) -> String {
    let mut body = String::from(OPENING_FRAGMENT);
    for index in 0..fragments {
        body.push_str(&numbered_fragment(index));
    }
    body.push_str(CLOSING_FRAGMENT);
    body
}

/// Counts sessions that are currently streaming
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    active: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions started but not yet finished or dropped
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn register(&self) -> (u64, ActiveTicket) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        (
            id,
            ActiveTicket {
                active: Arc::clone(&self.active),
            },
        )
    }
}

#[derive(Debug)]
struct ActiveTicket {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveTicket {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opening,
    Numbered(usize),
    Closing,
    Done,
}

/// State of one streamed response
#[derive(Debug)]
pub struct StreamSession {
    id: u64,
    phase: Phase,
    fragments: usize,
    interval: Duration,
    emitted: usize,
    delay_pending: bool,
    _ticket: ActiveTicket,
}

impl StreamSession {
    pub fn new(config: &StreamConfig, tracker: &SessionTracker) -> Self {
        let (id, ticket) = tracker.register();
        Self {
            id,
            phase: Phase::Opening,
            fragments: config.fragments,
            interval: config.interval(),
            emitted: 0,
            delay_pending: false,
            _ticket: ticket,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Fragments produced so far, markup included
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Produce the next fragment, waiting out the delay owed by the previous one
    pub async fn next_fragment(&mut self) -> Option<Bytes> {
        if self.phase == Phase::Done {
            return None;
        }
        if self.delay_pending {
            tokio::time::sleep(self.interval).await;
            self.delay_pending = false;
        }

        let fragment = match self.phase {
            Phase::Opening => {
                self.phase = self.numbered_or_closing(0);
                Bytes::from_static(OPENING_FRAGMENT.as_bytes())
            }
            Phase::Numbered(index) => {
                self.phase = self.numbered_or_closing(index + 1);
                self.delay_pending = true;
                Bytes::from(numbered_fragment(index))
            }
            Phase::Closing => {
                self.phase = Phase::Done;
                debug!(session = self.id, "Streaming session complete");
                Bytes::from_static(CLOSING_FRAGMENT.as_bytes())
            }
            Phase::Done => return None,
        };

        self.emitted += 1;
        Some(fragment)
    }

    /// Turn the session into a body stream
    ///
    /// Dropping the stream early (peer disconnect, forced shutdown) abandons
    /// the remaining fragments.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            let fragment = session.next_fragment().await?;
            Some((Ok(fragment), session))
        })
    }

    fn numbered_or_closing(&self, index: usize) -> Phase {
        if index < self.fragments {
            Phase::Numbered(index)
        } else {
            Phase::Closing
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.is_complete() {
            debug!(
                session = self.id,
                emitted = self.emitted,
                "Streaming session abandoned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::time::Instant;

    fn config(fragments: usize, interval_ms: u64) -> StreamConfig {
        StreamConfig {
            fragments,
            interval_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragment_sequence_and_cadence() {
        let tracker = SessionTracker::new();
        let session = StreamSession::new(&StreamConfig::default(), &tracker);
        let mut stream = Box::pin(session.into_stream());

        let start = Instant::now();
        let mut seen = Vec::new();
        while let Some(fragment) = stream.next().await {
            seen.push((fragment.unwrap(), start.elapsed()));
        }

        let mut expected = vec![OPENING_FRAGMENT.to_string()];
        expected.extend((0..10).map(numbered_fragment));
        expected.push(CLOSING_FRAGMENT.to_string());

        let fragments: Vec<String> = seen
            .iter()
            .map(|(bytes, _)| String::from_utf8(bytes.to_vec()).unwrap())
            .collect();
        assert_eq!(fragments, expected);
        assert_eq!(fragments.len(), 12);

        // Opening and first numbered fragment go out immediately
        assert_eq!(seen[0].1, Duration::ZERO);
        assert_eq!(seen[1].1, Duration::ZERO);

        // Each later fragment follows the previous numbered one by the interval
        for pair in seen[1..].windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_fragments_is_just_markup() {
        let tracker = SessionTracker::new();
        let mut session = StreamSession::new(&config(0, 1000), &tracker);

        let start = Instant::now();
        assert_eq!(session.next_fragment().await.unwrap(), OPENING_FRAGMENT.as_bytes());
        assert_eq!(session.next_fragment().await.unwrap(), CLOSING_FRAGMENT.as_bytes());
        assert!(session.next_fragment().await.is_none());
        assert!(session.is_complete());
        assert_eq!(session.emitted(), 2);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_repeated_sessions_are_identical() {
        let tracker = SessionTracker::new();
        let mut bodies = Vec::new();
        for _ in 0..2 {
            let session = StreamSession::new(&config(3, 0), &tracker);
            let chunks: Vec<Bytes> = session
                .into_stream()
                .map(|fragment| fragment.unwrap())
                .collect()
                .await;
            bodies.push(chunks.concat());
        }
        assert_eq!(bodies[0], bodies[1]);
        assert_eq!(bodies[0], expected_body(3).as_bytes());
    }

    #[tokio::test]
    async fn test_tracker_counts_live_sessions() {
        let tracker = SessionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let mut first = StreamSession::new(&config(2, 0), &tracker);
        let second = StreamSession::new(&config(2, 0), &tracker);
        assert_ne!(first.id(), second.id());
        assert_eq!(tracker.active_count(), 2);

        // Abandoned mid-stream
        first.next_fragment().await;
        drop(first);
        assert_eq!(tracker.active_count(), 1);

        drop(second);
        assert_eq!(tracker.active_count(), 0);
    }
}
