//! Provider interaction: send the prompt, retry transient failures, decode.
//!
//! All prompt engineering lives in [`crate::prompts`] and all wire shapes in
//! [`crate::pipeline::provider`]; this module only owns the control flow.
//!
//! ## Retry Strategy
//!
//! Connection errors, timeouts, HTTP 429 and 5xx are transient. Backoff is
//! `retry_backoff_ms * 2^(attempt-1)` capped at `max_backoff_ms`; with 500 ms
//! base and 3 attempts the waits are 500 ms → 1 s. Any other 4xx, malformed
//! credentials, and undecodable payloads end the request at once.
//!
//! ## Cancellation
//!
//! The token is checked before every attempt and raced against both the HTTP
//! call and the backoff sleep. Once it fires the request goes to CANCELLED,
//! nothing further is sent, and the decoder is never invoked.

use crate::config::ProviderConfig;
use crate::error::{AnalysisError, Stage};
use crate::pipeline::provider::{handler_for, validate_credentials, RawPayload};
use crate::pipeline::retry::{AttemptTracker, NextStep};
use crate::pipeline::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::progress::AnalysisProgressCallback;
use crate::prompts::ChatPrompt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest slice of an error body quoted in a provider error.
const ERROR_BODY_SNIPPET: usize = 300;

/// Per-request collaborators.
pub struct CallContext<'a> {
    pub transport: &'a dyn HttpTransport,
    pub progress: &'a dyn AnalysisProgressCallback,
    pub cancel: &'a CancellationToken,
    pub request_id: u64,
}

/// Send `prompt` to the configured provider and decode the reply with `decode`.
///
/// `max_attempts` overrides the config's ceiling (the connection test uses 1).
/// The decoder runs inside the attempt, so a payload it rejects fails the
/// request without a retry.
pub async fn execute<T>(
    ctx: &CallContext<'_>,
    config: &ProviderConfig,
    prompt: &ChatPrompt,
    max_attempts: u32,
    decode: impl Fn(RawPayload) -> Result<T, AnalysisError>,
) -> Result<T, AnalysisError> {
    let start = Instant::now();
    let mut tracker = AttemptTracker::new(max_attempts, config.retry_backoff_ms, config.max_backoff_ms);
    let handler = handler_for(config.provider);
    notify(ctx, &tracker);

    let request = match validate_credentials(config).and_then(|_| handler.build_request(config, prompt)) {
        Ok(r) => r,
        Err(e) => {
            warn!("Request {}: not sent: {}", ctx.request_id, e);
            tracker.fail(e);
            notify(ctx, &tracker);
            return Err(tracker.into_error());
        }
    };
    debug!(
        "Request {}: {} model '{}', {} chars of user prompt",
        ctx.request_id,
        config.provider,
        config.model_name(),
        prompt.user.len()
    );

    loop {
        if ctx.cancel.is_cancelled() {
            return Err(cancelled(ctx, &mut tracker));
        }

        let attempt = tracker.begin_attempt();
        notify(ctx, &tracker);

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(cancelled(ctx, &mut tracker)),
            r = send(ctx.transport, &request, config) => r,
        };

        let error = match outcome.and_then(|resp| handler.parse_response(&resp.body)) {
            Ok(payload) => match decode(payload) {
                Ok(value) => {
                    tracker.succeed();
                    notify(ctx, &tracker);
                    info!(
                        "Request {}: succeeded after {} attempt(s) in {:?}",
                        ctx.request_id,
                        attempt,
                        start.elapsed()
                    );
                    return Ok(value);
                }
                Err(e) => e,
            },
            Err(e) => e,
        };

        ctx.progress.on_attempt_failed(ctx.request_id, attempt, &error);
        warn!("Request {}: attempt {} failed: {}", ctx.request_id, attempt, error);

        match tracker.fail(error) {
            NextStep::Retry(delay) => {
                notify(ctx, &tracker);
                warn!(
                    "Request {}: retry {}/{} after {}ms",
                    ctx.request_id,
                    attempt + 1,
                    max_attempts,
                    delay.as_millis()
                );
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(cancelled(ctx, &mut tracker)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            NextStep::GiveUp => {
                notify(ctx, &tracker);
                return Err(tracker.into_error());
            }
        }
    }
}

/// One HTTP attempt, with status classification.
async fn send(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    config: &ProviderConfig,
) -> Result<HttpResponse, AnalysisError> {
    let timeout_err = || AnalysisError::Timeout {
        stage: Stage::Provider,
        secs: config.timeout_secs,
    };

    let response = match tokio::time::timeout(request.timeout, transport.post_json(request)).await {
        Err(_) | Ok(Err(TransportError::Timeout)) => return Err(timeout_err()),
        Ok(Err(TransportError::InvalidRequest(detail))) => {
            return Err(AnalysisError::InvalidConfig(detail))
        }
        // The same prompt would produce the same oversized answer.
        Ok(Err(e @ TransportError::TooLarge { .. })) => {
            return Err(AnalysisError::Validation {
                detail: format!("provider {e}"),
            })
        }
        Ok(Err(e)) => {
            return Err(AnalysisError::Network {
                target: display_target(&request.url),
                reason: e.to_string(),
            })
        }
        Ok(Ok(r)) => r,
    };

    if response.is_success() {
        Ok(response)
    } else {
        let body = response.text();
        let snippet: String = body.chars().take(ERROR_BODY_SNIPPET).collect();
        Err(AnalysisError::from_status(
            config.provider.name(),
            response.status,
            snippet.trim(),
        ))
    }
}

/// The URL without its query string, for error messages.
fn display_target(url: &str) -> String {
    url.split('?').next().unwrap_or(url).to_string()
}

fn notify(ctx: &CallContext<'_>, tracker: &AttemptTracker) {
    ctx.progress.on_state_change(ctx.request_id, tracker.state());
}

fn cancelled(ctx: &CallContext<'_>, tracker: &mut AttemptTracker) -> AnalysisError {
    tracker.cancel();
    notify(ctx, tracker);
    info!(
        "Request {}: cancelled after {} attempt(s)",
        ctx.request_id,
        tracker.attempts()
    );
    AnalysisError::Cancelled {
        request_id: ctx.request_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use crate::error::ErrorKind;
    use crate::pipeline::retry::RequestState;
    use crate::progress::NoopProgressCallback;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted responses; the last one repeats.
    struct Scripted {
        responses: Mutex<Vec<Result<HttpResponse, TransportError>>>,
        posts: Mutex<Vec<HttpRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                posts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.posts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for Scripted {
        async fn get(&self, _: &str, _: Duration, _: usize) -> Result<HttpResponse, TransportError> {
            unreachable!()
        }

        async fn post_json(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.posts.lock().unwrap().push(request.clone());
            let mut r = self.responses.lock().unwrap();
            if r.len() > 1 {
                r.remove(0)
            } else {
                r[0].clone()
            }
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<RequestState>>);

    impl AnalysisProgressCallback for Recorder {
        fn on_state_change(&self, _: u64, state: &RequestState) {
            self.0.lock().unwrap().push(state.clone());
        }
    }

    fn config() -> ProviderConfig {
        ProviderConfig::builder(Provider::Openai)
            .api_key("sk-test")
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    fn prompt() -> ChatPrompt {
        ChatPrompt {
            system: "s".into(),
            user: "u".into(),
            prompt: "p".into(),
            document: "d".into(),
        }
    }

    fn ok_body(content: &str) -> Result<HttpResponse, TransportError> {
        let body = serde_json::json!({"choices":[{"message":{"content": content}}]});
        Ok(HttpResponse::new(200, body.to_string()))
    }

    fn text(p: RawPayload) -> Result<String, AnalysisError> {
        match p {
            RawPayload::Text(t) => Ok(t),
            RawPayload::Json(v) => Ok(v.to_string()),
        }
    }

    async fn run(t: &Scripted, progress: &dyn AnalysisProgressCallback, config: &ProviderConfig) -> Result<String, AnalysisError> {
        let cancel = CancellationToken::new();
        let ctx = CallContext {
            transport: t,
            progress,
            cancel: &cancel,
            request_id: 7,
        };
        execute(&ctx, config, &prompt(), config.max_attempts, text).await
    }

    #[tokio::test]
    async fn transient_then_success() {
        let t = Scripted::new(vec![
            Ok(HttpResponse::new(429, "slow down")),
            Err(TransportError::Connect("reset".into())),
            ok_body("done"),
        ]);
        let rec = Recorder::default();
        assert_eq!(run(&t, &rec, &config()).await.unwrap(), "done");
        assert_eq!(t.calls(), 3);

        let states = rec.0.lock().unwrap();
        assert_eq!(states.first(), Some(&RequestState::Pending));
        assert_eq!(states.last(), Some(&RequestState::Succeeded { attempts: 3 }));
        assert_eq!(
            states.iter().filter(|s| matches!(s, RequestState::Retrying { .. })).count(),
            2
        );
    }

    #[tokio::test]
    async fn always_503_stops_at_ceiling() {
        let t = Scripted::new(vec![Ok(HttpResponse::new(503, "unavailable"))]);
        let err = run(&t, &NoopProgressCallback, &config()).await.unwrap_err();
        assert_eq!(t.calls(), 3);
        assert!(matches!(err, AnalysisError::Provider { status: 503, retryable: true, .. }));
    }

    #[tokio::test]
    async fn oversized_response_is_terminal() {
        let t = Scripted::new(vec![Err(TransportError::TooLarge { limit: 16 })]);
        let err = run(&t, &NoopProgressCallback, &config()).await.unwrap_err();
        assert_eq!(t.calls(), 1);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("exceeds 16 bytes"));
    }

    #[tokio::test]
    async fn client_errors_are_terminal() {
        for status in [400u16, 401, 403, 404] {
            let t = Scripted::new(vec![Ok(HttpResponse::new(status, "nope"))]);
            let err = run(&t, &NoopProgressCallback, &config()).await.unwrap_err();
            assert_eq!(t.calls(), 1, "status {status}");
            assert_eq!(err.kind(), ErrorKind::Provider);
        }
    }

    #[tokio::test]
    async fn bad_credentials_never_send() {
        let t = Scripted::new(vec![ok_body("unused")]);
        let mut c = config();
        c.api_key = "has space".into();
        let rec = Recorder::default();
        let err = run(&t, &rec, &c).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Credentials { .. }));
        assert_eq!(t.calls(), 0);
        assert!(matches!(rec.0.lock().unwrap().last(), Some(RequestState::Failed { attempts: 0, .. })));
    }

    #[tokio::test]
    async fn decoder_rejection_is_not_retried() {
        let t = Scripted::new(vec![ok_body("whatever")]);
        let cancel = CancellationToken::new();
        let ctx = CallContext {
            transport: &t,
            progress: &NoopProgressCallback,
            cancel: &cancel,
            request_id: 1,
        };
        let err = execute(&ctx, &config(), &prompt(), 3, |_| -> Result<(), _> {
            Err(AnalysisError::Validation { detail: "bad".into() })
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(t.calls(), 1);
    }

    #[tokio::test]
    async fn pre_cancelled_request_sends_nothing() {
        let t = Scripted::new(vec![ok_body("x")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ctx = CallContext {
            transport: &t,
            progress: &NoopProgressCallback,
            cancel: &cancel,
            request_id: 9,
        };
        let err = execute(&ctx, &config(), &prompt(), 3, text).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled { request_id: 9 }));
        assert_eq!(t.calls(), 0);
    }

    #[test]
    fn target_drops_query() {
        assert_eq!(
            display_target("https://x/openai/deployments/m/chat/completions?api-version=1"),
            "https://x/openai/deployments/m/chat/completions"
        );
    }
}
