//! Per-connection session running Heartbeat and Echo side by side.
//!
//! Both activities share one `Connection`. Whichever exits first decides
//! the outcome; the sibling is cancelled and awaited before `run` returns,
//! so no activity outlives its session.

use std::{fmt, sync::Arc};

use thiserror::Error;
use tokio::{
    task::JoinSet,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::{ConfigError, SessionConfig},
    connection::{Connection, ConnectionError},
    message::greeting,
};

/// Session identifier.
pub type SessionId = Uuid;

/// The two activities of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Periodic keepalive sender.
    Heartbeat,
    /// Receive-transform-reply loop.
    Echo,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heartbeat => f.write_str("heartbeat"),
            Self::Echo => f.write_str("echo"),
        }
    }
}

/// Normal end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The peer closed the connection.
    PeerClosed,
    /// The shutdown token fired.
    Shutdown,
}

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{activity} send failed: {source}")]
    SendFailure {
        activity: Activity,
        source: ConnectionError,
    },
    #[error("echo receive failed: {0}")]
    ReceiveFailure(#[source] ConnectionError),
    #[error("{0} task panicked")]
    ActivityPanicked(Activity),
}

/// Terminal state of one activity loop.
#[derive(Debug)]
enum ActivityExit {
    Cancelled,
    PeerClosed,
    Failed(SessionError),
}

impl ActivityExit {
    fn from_send(activity: Activity, err: ConnectionError) -> Self {
        if err.is_closed() {
            Self::PeerClosed
        } else {
            Self::Failed(SessionError::SendFailure {
                activity,
                source: err,
            })
        }
    }

    fn from_recv(err: ConnectionError) -> Self {
        if err.is_closed() {
            Self::PeerClosed
        } else {
            Self::Failed(SessionError::ReceiveFailure(err))
        }
    }
}

/// Coordinator for one client connection.
pub struct Session {
    id: SessionId,
    config: Arc<SessionConfig>,
    shutdown: CancellationToken,
}

impl Session {
    /// Create a new session.
    ///
    /// # Errors
    /// Returns error if `config` is rejected by `SessionConfig::validate`.
    pub fn new(config: impl Into<Arc<SessionConfig>>) -> Result<Self, ConfigError> {
        let config = config.into();
        config.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            config,
            shutdown: CancellationToken::new(),
        })
    }

    /// Stop the session when `shutdown` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Session identifier, as recorded in log spans.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Run Heartbeat and Echo over `connection` until either one ends.
    ///
    /// Returns once both activities have stopped. The connection is
    /// dropped before this returns.
    ///
    /// # Errors
    /// Returns the first send, receive or task failure seen by either
    /// activity.
    pub async fn run<C>(self, connection: C) -> Result<Termination, SessionError>
    where
        C: Connection + 'static,
    {
        let span = tracing::info_span!("session", session_id = %self.id);
        self.supervise(Arc::new(connection)).instrument(span).await
    }

    async fn supervise<C>(self, conn: Arc<C>) -> Result<Termination, SessionError>
    where
        C: Connection + 'static,
    {
        let cancel = self.shutdown.child_token();
        let mut tasks = JoinSet::new();

        let heartbeat_id = tasks
            .spawn(heartbeat(Arc::clone(&conn), self.config, cancel.clone()).in_current_span())
            .id();
        tasks.spawn(echo(conn, cancel.clone()).in_current_span());

        tracing::info!("Session started");

        let mut first = None;
        while let Some(joined) = tasks.join_next_with_id().await {
            let exit = match joined {
                Ok((_, exit)) => exit,
                Err(e) if e.is_panic() => {
                    let activity = if e.id() == heartbeat_id {
                        Activity::Heartbeat
                    } else {
                        Activity::Echo
                    };
                    tracing::error!(%activity, "Activity panicked");
                    ActivityExit::Failed(SessionError::ActivityPanicked(activity))
                }
                Err(_) => ActivityExit::Cancelled,
            };

            if first.is_none() {
                cancel.cancel();
                first = Some(exit);
            }
        }

        let outcome = match first {
            Some(ActivityExit::PeerClosed) => Ok(Termination::PeerClosed),
            Some(ActivityExit::Failed(e)) => Err(e),
            Some(ActivityExit::Cancelled) | None => Ok(Termination::Shutdown),
        };

        match &outcome {
            Ok(termination) => tracing::info!(?termination, "Session ended"),
            Err(e) => tracing::warn!("Session failed: {e}"),
        }

        outcome
    }
}

async fn heartbeat<C>(
    conn: Arc<C>,
    config: Arc<SessionConfig>,
    cancel: CancellationToken,
) -> ActivityExit
where
    C: Connection,
{
    let period = config.heartbeat_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ActivityExit::Cancelled,
            _ = ticker.tick() => {}
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ActivityExit::Cancelled,
            res = conn.send(&config.heartbeat_message) => res,
        };

        if let Err(e) = sent {
            return ActivityExit::from_send(Activity::Heartbeat, e);
        }
        tracing::trace!("Heartbeat sent");
    }
}

async fn echo<C>(conn: Arc<C>, cancel: CancellationToken) -> ActivityExit
where
    C: Connection,
{
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ActivityExit::Cancelled,
            res = conn.recv() => res,
        };

        let text = match received {
            Ok(Some(text)) => text,
            Ok(None) => return ActivityExit::PeerClosed,
            Err(e) => return ActivityExit::from_recv(e),
        };
        tracing::debug!("< {text}");

        let reply = greeting(&text);
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ActivityExit::Cancelled,
            res = conn.send(&reply) => res,
        };

        if let Err(e) = sent {
            return ActivityExit::from_send(Activity::Echo, e);
        }
        tracing::debug!("> {reply}");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio_test::assert_ok;

    use super::*;
    use crate::memory::MemoryConnection;

    const TICK: Duration = Duration::from_secs(10);

    fn session() -> Session {
        Session::new(SessionConfig::with_interval(TICK)).unwrap()
    }

    /// Sets a flag when dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Heartbeat sends fail; receive waits forever.
    struct BrokenWriter {
        recv_dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connection for BrokenWriter {
        async fn send(&self, _text: &str) -> Result<(), ConnectionError> {
            Err(ConnectionError::Transport("write failed".into()))
        }

        async fn recv(&self) -> Result<Option<String>, ConnectionError> {
            let _flag = DropFlag(Arc::clone(&self.recv_dropped));
            std::future::pending().await
        }
    }

    /// Receive fails after `ok_reads` successful reads.
    struct BrokenReader {
        ok_reads: usize,
        reads: AtomicUsize,
        sends: AtomicUsize,
    }

    #[async_trait]
    impl Connection for BrokenReader {
        async fn send(&self, _text: &str) -> Result<(), ConnectionError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn recv(&self) -> Result<Option<String>, ConnectionError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) < self.ok_reads {
                Ok(Some("x".into()))
            } else {
                Err(ConnectionError::Transport("connection reset".into()))
            }
        }
    }

    struct PanickingReader;

    #[async_trait]
    impl Connection for PanickingReader {
        async fn send(&self, _text: &str) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn recv(&self) -> Result<Option<String>, ConnectionError> {
            panic!("reader exploded");
        }
    }

    /// Every send reports a closed connection.
    struct ClosedWriter;

    #[async_trait]
    impl Connection for ClosedWriter {
        async fn send(&self, _text: &str) -> Result<(), ConnectionError> {
            Err(ConnectionError::Closed)
        }

        async fn recv(&self) -> Result<Option<String>, ConnectionError> {
            Ok(Some("anyone there?".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_greeting_then_heartbeat_scenario() {
        let (conn, mut peer) = MemoryConnection::pair();
        let start = Instant::now();
        let handle = tokio::spawn(session().run(conn));

        peer.send("World").unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("Hello World!"));

        assert_eq!(peer.recv().await.as_deref(), Some("P"));
        assert_eq!(start.elapsed(), TICK);

        peer.send("").unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("Hello !"));

        peer.close_write();
        let termination = assert_ok!(handle.await.unwrap());
        assert_eq!(termination, Termination::PeerClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_without_client_traffic() {
        let (conn, mut peer) = MemoryConnection::pair();
        let start = Instant::now();
        let _handle = tokio::spawn(session().run(conn));

        for n in 1..=3 {
            assert_eq!(peer.recv().await.as_deref(), Some("P"));
            assert_eq!(start.elapsed(), TICK * n);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_keep_request_order() {
        let (conn, mut peer) = MemoryConnection::pair();
        let _handle = tokio::spawn(session().run(conn));

        let requests = ["one", "two", " three ", "", "five"];
        for request in requests {
            peer.send(request).unwrap();
        }

        let mut replies = Vec::new();
        while replies.len() < requests.len() {
            let msg = peer.recv().await.unwrap();
            if msg != "P" {
                replies.push(msg);
            }
        }

        let expected: Vec<String> = requests.iter().map(|r| greeting(r)).collect();
        assert_eq!(replies, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_stops_heartbeat() {
        let (conn, mut peer) = MemoryConnection::pair();
        let handle = tokio::spawn(session().run(conn));

        time::sleep(Duration::from_secs(3)).await;
        peer.close_write();

        let result = time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("session did not stop")
            .unwrap();
        assert_eq!(result.unwrap(), Termination::PeerClosed);

        // Connection dropped: nothing can be sent any more.
        time::sleep(TICK * 3).await;
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_failure_cancels_echo() {
        let recv_dropped = Arc::new(AtomicBool::new(false));
        let conn = BrokenWriter {
            recv_dropped: Arc::clone(&recv_dropped),
        };

        let err = session().run(conn).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::SendFailure {
                activity: Activity::Heartbeat,
                source: ConnectionError::Transport(_),
            }
        ));
        assert!(recv_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_ends_session() {
        let conn = Arc::new(BrokenReader {
            ok_reads: 2,
            reads: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
        });

        let err = session().run(Arc::clone(&conn)).await.unwrap_err();

        assert!(matches!(err, SessionError::ReceiveFailure(_)));
        assert_eq!(conn.sends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_send_is_normal_termination() {
        let result = session().run(ClosedWriter).await;
        assert_eq!(result.unwrap(), Termination::PeerClosed);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let err = session().run(PanickingReader).await.unwrap_err();
        assert!(matches!(err, SessionError::ActivityPanicked(Activity::Echo)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_token_stops_session() {
        let (conn, mut peer) = MemoryConnection::pair();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(session().with_shutdown(shutdown.clone()).run(conn));

        assert_eq!(peer.recv().await.as_deref(), Some("P"));
        shutdown.cancel();

        let result = handle.await.unwrap();
        assert_eq!(result.unwrap(), Termination::Shutdown);
        assert_eq!(peer.recv().await, None);
    }

    #[test]
    fn test_zero_interval_rejected_before_run() {
        let result = Session::new(SessionConfig::with_interval(Duration::ZERO));
        assert!(matches!(result, Err(ConfigError::ZeroInterval)));
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        assert_ne!(session().id(), session().id());
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::SendFailure {
            activity: Activity::Heartbeat,
            source: ConnectionError::Transport("broken pipe".into()),
        };
        assert_eq!(
            err.to_string(),
            "heartbeat send failed: Transport error: broken pipe"
        );
    }
}
