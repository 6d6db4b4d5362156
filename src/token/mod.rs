// src/token/mod.rs
//
// Token acquisition and peer readiness for the sending side.
// A token is requested from the relay, then the relay's status endpoint is
// polled until a receiver attaches, followed by one confirmatory check.

mod poll;

pub use self::poll::{PeerPoll, PollState, PollStep};

use crate::error::TransferError;
use crate::session::{EventSink, FileMeta, SessionEvent};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TOKEN_MARKER: &str = "TOKEN: ";

/// Opaque relay-issued session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    /// Wrap user- or relay-supplied text; only emptiness is rejected
    pub fn new(value: impl AsRef<str>) -> Result<Self, TransferError> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(TransferError::InvalidToken(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the token from a token-service response body.
///
/// The body is free text; the first `TOKEN: <alphanumeric>` occurrence wins.
pub fn parse_token(body: &str) -> Result<Token, TransferError> {
    body.match_indices(TOKEN_MARKER)
        .find_map(|(idx, _)| {
            let rest = &body[idx + TOKEN_MARKER.len()..];
            let end = rest
                .find(|c: char| !c.is_ascii_alphanumeric())
                .unwrap_or(rest.len());
            (end > 0).then(|| Token(rest[..end].to_string()))
        })
        .ok_or_else(|| {
            let excerpt: String = body.trim().chars().take(80).collect();
            TransferError::TokenUnparseable(excerpt)
        })
}

/// Issues tokens; returns the raw response text
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn request_token(&self) -> Result<String, TransferError>;
}

/// Answers whether a receiver has attached for a token.
///
/// Implementations never fail: any error means "not ready".
#[async_trait]
pub trait PeerStatusSource: Send + Sync {
    async fn peer_ready(&self, token: &Token) -> bool;
}

/// Timing of the readiness poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub stabilization_delay: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_attempts: 120, // two minutes at the default interval
            stabilization_delay: Duration::from_millis(1000),
        }
    }
}

impl PollSettings {
    /// Seconds left in the poll window for the given number of attempts
    pub fn remaining_secs(&self, remaining_attempts: u32) -> u64 {
        let millis = remaining_attempts as u128 * self.poll_interval.as_millis();
        ((millis + 999) / 1000) as u64
    }
}

/// Sender-side token lifecycle: request, then wait for the peer
pub struct TokenSession<'a> {
    tokens: &'a dyn TokenSource,
    status: &'a dyn PeerStatusSource,
    settings: PollSettings,
}

impl<'a> TokenSession<'a> {
    pub fn new(
        tokens: &'a dyn TokenSource,
        status: &'a dyn PeerStatusSource,
        settings: PollSettings,
    ) -> Self {
        Self {
            tokens,
            status,
            settings,
        }
    }

    /// Request a fresh token for the given upload
    pub async fn begin(
        &self,
        meta: &FileMeta,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Token, TransferError> {
        info!(
            "Requesting token for {} ({})",
            meta.name,
            meta.size
                .map(|s| format!("{} bytes", s))
                .unwrap_or_else(|| "unknown size".to_string())
        );
        events(SessionEvent::TokenRequested);

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            body = self.tokens.request_token() => body?,
        };

        let token = parse_token(&body).map_err(|e| {
            warn!("Token service answered without a token: {}", e);
            e
        })?;

        info!("Token issued: {}", token);
        events(SessionEvent::TokenIssued(token.clone()));
        Ok(token)
    }

    /// Poll until a receiver attaches and survives the confirmatory check
    pub async fn await_peer(
        &self,
        token: &Token,
        events: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let mut poll = PeerPoll::new(self.settings.max_attempts);
        debug!(
            "Waiting for peer on {} (every {:?}, up to {} attempts)",
            token,
            self.settings.poll_interval,
            poll.max_attempts()
        );

        loop {
            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransferError::Cancelled),
                ready = self.status.peer_ready(token) => ready,
            };

            match poll.observe(ready) {
                PollStep::Wait { remaining_attempts } => {
                    events(SessionEvent::Waiting {
                        remaining_secs: self.settings.remaining_secs(remaining_attempts),
                    });
                    pause(self.settings.poll_interval, cancel).await?;
                }
                PollStep::TimedOut => {
                    events(SessionEvent::Waiting { remaining_secs: 0 });
                    warn!("No peer attached to {} after {} checks", token, poll.max_attempts());
                    return Err(TransferError::PeerTimeout {
                        attempts: poll.max_attempts(),
                    });
                }
                PollStep::Stabilize => {
                    debug!("Peer reported ready on {}, confirming", token);
                    events(SessionEvent::PeerAttached);
                    pause(self.settings.stabilization_delay, cancel).await?;
                }
                PollStep::Confirmed => {
                    info!("Peer confirmed on {}", token);
                    events(SessionEvent::PeerConfirmed);
                    return Ok(());
                }
                PollStep::Disconnected => {
                    warn!("Peer on {} went away before the transfer started", token);
                    return Err(TransferError::PeerDisconnected);
                }
            }
        }
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), TransferError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    struct FixedToken(&'static str);

    #[async_trait]
    impl TokenSource for FixedToken {
        async fn request_token(&self) -> Result<String, TransferError> {
            Ok(self.0.to_string())
        }
    }

    /// Replays scripted answers, then keeps answering with the fallback
    struct ScriptedStatus {
        answers: Mutex<VecDeque<bool>>,
        fallback: bool,
        queries: Mutex<u32>,
    }

    impl ScriptedStatus {
        fn new(answers: &[bool], fallback: bool) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                fallback,
                queries: Mutex::new(0),
            }
        }

        fn queries(&self) -> u32 {
            *self.queries.lock().unwrap()
        }
    }

    #[async_trait]
    impl PeerStatusSource for ScriptedStatus {
        async fn peer_ready(&self, _token: &Token) -> bool {
            *self.queries.lock().unwrap() += 1;
            self.answers.lock().unwrap().pop_front().unwrap_or(self.fallback)
        }
    }

    fn recorder() -> (EventSink, Arc<Mutex<Vec<SessionEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (Arc::new(move |e| sink.lock().unwrap().push(e)), events)
    }

    fn meta() -> FileMeta {
        FileMeta {
            name: "report.pdf".to_string(),
            size: Some(10),
            content_type: None,
        }
    }

    #[test]
    fn test_parse_token() {
        let token = parse_token("TOKEN: ab12\n").unwrap();
        assert_eq!(token.as_str(), "ab12");

        let body = "\n\nSe ha generado el TOKEN: x9k2\nEl token expira en 60 minutos\n";
        assert_eq!(parse_token(body).unwrap().as_str(), "x9k2");

        // Stops at the first non-alphanumeric character
        assert_eq!(parse_token("TOKEN: q7z_rest").unwrap().as_str(), "q7z");
    }

    #[test]
    fn test_parse_token_rejects_missing_marker() {
        assert!(matches!(
            parse_token("Service unavailable"),
            Err(TransferError::TokenUnparseable(_))
        ));
        assert!(matches!(
            parse_token("TOKEN: \nTOKEN: !!"),
            Err(TransferError::TokenUnparseable(_))
        ));
        // A later well-formed marker still counts
        assert_eq!(parse_token("TOKEN: \nTOKEN: k1").unwrap().as_str(), "k1");
    }

    #[test]
    fn test_token_new_trims_and_rejects_empty() {
        assert_eq!(Token::new("  ab12 ").unwrap().as_str(), "ab12");
        assert!(matches!(Token::new("   "), Err(TransferError::InvalidToken(_))));
    }

    #[test]
    fn test_remaining_secs() {
        let settings = PollSettings::default();
        assert_eq!(settings.remaining_secs(119), 119);
        let fast = PollSettings {
            poll_interval: Duration::from_millis(250),
            ..PollSettings::default()
        };
        assert_eq!(fast.remaining_secs(3), 1);
        assert_eq!(fast.remaining_secs(5), 2);
    }

    #[tokio::test]
    async fn test_begin_emits_events() {
        let status = ScriptedStatus::new(&[], false);
        let tokens = FixedToken("Se ha generado el TOKEN: ab12\n");
        let session = TokenSession::new(&tokens, &status, PollSettings::default());
        let (sink, events) = recorder();

        let token = session
            .begin(&meta(), &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(token.as_str(), "ab12");
        assert_eq!(
            *events.lock().unwrap(),
            vec![SessionEvent::TokenRequested, SessionEvent::TokenIssued(token)]
        );
    }

    #[tokio::test]
    async fn test_begin_fails_on_unparseable_body() {
        let status = ScriptedStatus::new(&[], false);
        let tokens = FixedToken("<html>502 Bad Gateway</html>");
        let session = TokenSession::new(&tokens, &status, PollSettings::default());
        let (sink, _) = recorder();

        let result = session.begin(&meta(), &sink, &CancellationToken::new()).await;
        assert!(matches!(result, Err(TransferError::TokenUnparseable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_kth_query() {
        // Ready on the 4th query, then the confirmatory query agrees
        let status = ScriptedStatus::new(&[false, false, false, true, true], false);
        let tokens = FixedToken("TOKEN: ab12");
        let settings = PollSettings::default();
        let session = TokenSession::new(&tokens, &status, settings);
        let (sink, events) = recorder();
        let token = Token::new("ab12").unwrap();

        let start = Instant::now();
        session
            .await_peer(&token, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(status.queries(), 5);
        // Three poll delays plus the stabilization delay, nothing more
        let expected = settings.poll_interval * 3 + settings.stabilization_delay;
        let elapsed = start.elapsed();
        assert!(elapsed >= expected && elapsed < expected + Duration::from_millis(10));
        let events = events.lock().unwrap();
        assert_eq!(events[0], SessionEvent::Waiting { remaining_secs: 119 });
        assert_eq!(events[2], SessionEvent::Waiting { remaining_secs: 117 });
        assert_eq!(events[3], SessionEvent::PeerAttached);
        assert_eq!(events[4], SessionEvent::PeerConfirmed);
        assert_eq!(events.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_after_max_attempts() {
        let status = ScriptedStatus::new(&[], false);
        let tokens = FixedToken("TOKEN: ab12");
        let settings = PollSettings {
            max_attempts: 7,
            ..PollSettings::default()
        };
        let session = TokenSession::new(&tokens, &status, settings);
        let (sink, events) = recorder();
        let token = Token::new("ab12").unwrap();

        let result = session
            .await_peer(&token, &sink, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(TransferError::PeerTimeout { attempts: 7 })));
        assert_eq!(status.queries(), 7);
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&SessionEvent::Waiting { remaining_secs: 0 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_on_confirmatory_check() {
        let status = ScriptedStatus::new(&[false, true, false], true);
        let tokens = FixedToken("TOKEN: ab12");
        let session = TokenSession::new(&tokens, &status, PollSettings::default());
        let (sink, _) = recorder();
        let token = Token::new("ab12").unwrap();

        let result = session
            .await_peer(&token, &sink, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(TransferError::PeerDisconnected)));
        // No re-entry into the poll loop after the failed confirmation
        assert_eq!(status.queries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        let status = Arc::new(ScriptedStatus::new(&[], false));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let tokens = FixedToken("TOKEN: ab12");
        let session = TokenSession::new(&tokens, status.as_ref(), PollSettings::default());
        let (sink, _) = recorder();
        let token = Token::new("ab12").unwrap();

        let result = session.await_peer(&token, &sink, &cancel).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert_eq!(status.queries(), 3);
    }
}
