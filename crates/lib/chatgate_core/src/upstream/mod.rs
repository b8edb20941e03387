//! Retrying upstream proxy.
//!
//! Sends a sanitized chat request to the upstream API. Transient failures
//! (429, 5xx gateway errors, transport errors) are retried with exponential
//! backoff; anything else is handed back on the first attempt.

pub mod retry;
pub mod transport;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::sanitize::SanitizedChatRequest;
use crate::time::Sleeper;

pub use retry::{RetryState, per_attempt_timeout};
pub use transport::{ReqwestTransport, TransportError, UpstreamResponse, UpstreamTransport};

/// Failures raised before upstream is contacted.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("serialize upstream payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Proxies sanitized chat requests to the configured upstream.
pub struct UpstreamProxy<'a> {
    config: &'a UpstreamConfig,
    api_key: &'a str,
    transport: &'a dyn UpstreamTransport,
    sleeper: &'a dyn Sleeper,
}

impl<'a> UpstreamProxy<'a> {
    pub fn new(
        config: &'a UpstreamConfig,
        api_key: &'a str,
        transport: &'a dyn UpstreamTransport,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            config,
            api_key,
            transport,
            sleeper,
        }
    }

    /// Send `request`, retrying at most `max_retries` times.
    ///
    /// Each attempt is bounded by [`per_attempt_timeout`] of
    /// `remaining_millis`. When retries run out the last failure is returned
    /// as observed.
    pub async fn send(
        &self,
        request: &SanitizedChatRequest,
        remaining_millis: i64,
        max_retries: u32,
    ) -> Result<UpstreamResponse, ProxyError> {
        let body = serde_json::to_vec(request)?;
        if body.len() > self.config.max_payload_bytes {
            return Err(ProxyError::PayloadTooLarge {
                size: body.len(),
                limit: self.config.max_payload_bytes,
            });
        }

        let timeout = per_attempt_timeout(remaining_millis);
        let mut retry = RetryState::new(max_retries);
        debug!(
            size = body.len(),
            timeout_secs = timeout.as_secs(),
            model = %request.model,
            "sending upstream request"
        );

        loop {
            let result = self
                .transport
                .post_json(&self.config.url, self.api_key, body.clone(), timeout)
                .await;

            let failure = match result {
                Ok(resp) if retry::is_retryable(resp.status) => resp,
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(error = %e, "upstream transport failure");
                    UpstreamResponse::transport_failure(&e)
                }
            };

            let Some(delay) = retry.next_delay() else {
                warn!(
                    status = failure.status,
                    attempts = retry.attempt + 1,
                    "upstream retries exhausted"
                );
                return Ok(failure);
            };
            warn!(
                status = failure.status,
                attempt = retry.attempt,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying upstream request"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::sanitize::{ChatMessage, Role};

    /// Replays a fixed script of outcomes and records what it was asked.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<UpstreamResponse, TransportError>>>,
        timeouts: Mutex<Vec<Duration>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<UpstreamResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                timeouts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.timeouts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl UpstreamTransport for ScriptedTransport {
        async fn post_json(
            &self,
            _url: &str,
            _api_key: &str,
            _body: Vec<u8>,
            timeout: Duration,
        ) -> Result<UpstreamResponse, TransportError> {
            self.timeouts.lock().unwrap().push(timeout);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called more times than scripted")
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    fn status(status: u16, body: &str) -> Result<UpstreamResponse, TransportError> {
        Ok(UpstreamResponse {
            status,
            body: body.into(),
        })
    }

    fn request() -> SanitizedChatRequest {
        SanitizedChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "hello".into(),
            }],
            temperature: 0.2,
            max_tokens: 400,
        }
    }

    fn config() -> UpstreamConfig {
        UpstreamConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let config = config();
        let transport = ScriptedTransport::new(vec![
            status(503, "busy"),
            status(503, "busy"),
            status(200, r#"{"id":"ok"}"#),
        ]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        let resp = proxy.send(&request(), 30_000, 3).await.unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"id":"ok"}"#);
        assert_eq!(transport.calls(), 3);
        let delays = sleeper.delays.lock().unwrap().clone();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] >= Duration::from_millis(400) && delays[0] <= Duration::from_millis(600));
        assert!(delays[1] >= Duration::from_millis(800) && delays[1] <= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let config = config();
        let transport = ScriptedTransport::new(vec![status(404, r#"{"error":"nope"}"#)]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        let resp = proxy.send(&request(), 30_000, 3).await.unwrap();

        assert_eq!(resp.status, 404);
        assert_eq!(resp.body, r#"{"error":"nope"}"#);
        assert_eq!(transport.calls(), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_retried() {
        let config = config();
        let transport = ScriptedTransport::new(vec![status(429, "slow down"), status(200, "{}")]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        assert_eq!(proxy.send(&request(), 30_000, 3).await.unwrap().status, 200);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_failure_verbatim() {
        let config = config();
        let transport = ScriptedTransport::new(vec![
            status(500, "a"),
            status(502, "b"),
            status(504, "c"),
            status(503, "last"),
        ]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        let resp = proxy.send(&request(), 30_000, 3).await.unwrap();

        assert_eq!(
            resp,
            UpstreamResponse {
                status: 503,
                body: "last".into()
            }
        );
        assert_eq!(transport.calls(), 4);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn transport_failures_end_in_synthesized_bad_gateway() {
        let config = config();
        let transport = ScriptedTransport::new(vec![
            Err(TransportError("connect refused".into())),
            Err(TransportError("timed out".into())),
        ]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        let resp = proxy.send(&request(), 30_000, 1).await.unwrap();

        assert_eq!(resp.status, 502);
        let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body["error"], "upstream_error");
        assert_eq!(body["message"], "timed out");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let config = config();
        let transport = ScriptedTransport::new(vec![status(503, "busy")]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        assert_eq!(proxy.send(&request(), 30_000, 0).await.unwrap().status, 503);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn oversized_payload_never_reaches_upstream() {
        let config = UpstreamConfig {
            max_payload_bytes: 64,
            ..config()
        };
        let transport = ScriptedTransport::new(vec![]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        let mut req = request();
        req.messages[0].content = "x".repeat(100);
        let err = proxy.send(&req, 30_000, 3).await.unwrap_err();

        assert!(matches!(err, ProxyError::PayloadTooLarge { limit: 64, .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn attempt_timeout_follows_remaining_budget() {
        let config = config();
        let transport = ScriptedTransport::new(vec![status(503, ""), status(200, "{}")]);
        let sleeper = RecordingSleeper::default();
        let proxy = UpstreamProxy::new(&config, "sk-test", &transport, &sleeper);

        proxy.send(&request(), 9_600, 3).await.unwrap();

        let timeouts = transport.timeouts.lock().unwrap().clone();
        assert_eq!(timeouts, vec![Duration::from_secs(8); 2]);
    }
}
