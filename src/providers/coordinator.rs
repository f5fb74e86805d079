//! Provider chain coordinator
//!
//! Tries the providers configured for an operation kind in order. Each
//! provider gets up to `max_retries` attempts with exponential backoff in
//! between; the first normalized success wins. Cancellation is observed
//! before every attempt and every backoff sleep, and races both.

use super::normalize::{normalize_detection, normalize_removal};
use super::transport::{ProviderRequest, ProviderTransport};
use crate::{
    config::{ProviderConfig, ProviderDescriptor, RetryPolicy},
    error::{ErrorKind, Result, RetouchError},
    types::{OperationKind, OperationOutput, PixelBuffer, Selection},
};
use instant::Instant;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

/// One failed attempt against one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub provider: String,
    /// Zero-based attempt number for this provider
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
    pub elapsed_ms: u64,
}

/// Result of running a provider chain
#[derive(Debug)]
pub enum ChainOutcome {
    /// A provider answered with a usable payload
    Success {
        output: OperationOutput,
        provider: String,
    },
    /// Every provider failed; the log lists each failed attempt in order
    Exhausted(Vec<AttemptRecord>),
    /// Cancellation was observed; no further provider was contacted
    Cancelled,
}

/// Progress notifications emitted while the chain runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// About to contact provider `index` of `total`
    ProviderStarted {
        index: usize,
        total: usize,
        provider: String,
    },
    /// Attempt failed; a backoff of `retry_in_ms` follows if `retry_in_ms` is set
    AttemptFailed {
        provider: String,
        attempt: u32,
        message: String,
        retry_in_ms: Option<u64>,
    },
    /// Provider answered; its payload is being normalized
    ResponseReceived { provider: String },
}

enum AttemptOutcome {
    Success(OperationOutput),
    Failed(RetouchError),
    Cancelled,
}

enum ProviderOutcome {
    Success(OperationOutput),
    Failed,
    Cancelled,
}

/// Runs ordered provider chains over an injected transport
pub struct ProviderCoordinator {
    providers: ProviderConfig,
    transport: Arc<dyn ProviderTransport>,
    retry: RetryPolicy,
}

impl ProviderCoordinator {
    #[must_use]
    pub fn new(
        providers: ProviderConfig,
        transport: Arc<dyn ProviderTransport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            providers,
            transport,
            retry,
        }
    }

    /// Providers tried for `kind`, in order
    #[must_use]
    pub fn chain(&self, kind: OperationKind) -> &[ProviderDescriptor] {
        self.providers.chain(kind)
    }

    /// Try every provider for `kind` until one succeeds.
    ///
    /// Provider failures never escape as errors; they are collected in the
    /// attempt log of [`ChainOutcome::Exhausted`].
    pub async fn try_providers(
        &self,
        kind: OperationKind,
        pixels: &PixelBuffer,
        selection: &Selection,
        token: &CancellationToken,
        observer: &mut (dyn FnMut(ChainEvent) + Send),
    ) -> ChainOutcome {
        let chain = self.providers.chain(kind);
        let mut attempts = Vec::new();

        for (index, provider) in chain.iter().enumerate() {
            if token.is_cancelled() {
                return ChainOutcome::Cancelled;
            }
            observer(ChainEvent::ProviderStarted {
                index,
                total: chain.len(),
                provider: provider.name.clone(),
            });

            let request = match ProviderRequest::prepare(provider, pixels, selection).await {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("Skipping provider '{}': {}", provider.name, e);
                    attempts.push(AttemptRecord {
                        provider: provider.name.clone(),
                        attempt: 0,
                        kind: e.kind(),
                        message: e.to_string(),
                        elapsed_ms: 0,
                    });
                    continue;
                },
            };

            match self
                .run_provider(provider, &request, pixels, token, observer, &mut attempts)
                .await
            {
                ProviderOutcome::Success(output) => {
                    log::info!("Provider '{}' succeeded", provider.name);
                    return ChainOutcome::Success {
                        output,
                        provider: provider.name.clone(),
                    };
                },
                ProviderOutcome::Cancelled => return ChainOutcome::Cancelled,
                ProviderOutcome::Failed => {
                    log::warn!("Provider '{}' failed; moving on", provider.name);
                },
            }
        }

        log::info!(
            "All {} {} provider(s) failed after {} attempt(s)",
            chain.len(),
            kind,
            attempts.len()
        );
        ChainOutcome::Exhausted(attempts)
    }

    async fn run_provider(
        &self,
        provider: &ProviderDescriptor,
        request: &ProviderRequest,
        pixels: &PixelBuffer,
        token: &CancellationToken,
        observer: &mut (dyn FnMut(ChainEvent) + Send),
        attempts: &mut Vec<AttemptRecord>,
    ) -> ProviderOutcome {
        for attempt in 0..provider.max_retries {
            if token.is_cancelled() {
                return ProviderOutcome::Cancelled;
            }

            let started = Instant::now();
            let span = info_span!("provider_attempt", provider = %provider.name, attempt);
            let outcome = self
                .attempt(provider, request, pixels, token, observer)
                .instrument(span)
                .await;

            let error = match outcome {
                AttemptOutcome::Success(output) => return ProviderOutcome::Success(output),
                AttemptOutcome::Cancelled => return ProviderOutcome::Cancelled,
                AttemptOutcome::Failed(error) => error,
            };

            let kind = error.kind();
            attempts.push(AttemptRecord {
                provider: provider.name.clone(),
                attempt,
                kind,
                message: error.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });

            let last = attempt + 1 >= provider.max_retries;
            let delay = (!last && kind.is_retryable()).then(|| self.retry.backoff(attempt));
            observer(ChainEvent::AttemptFailed {
                provider: provider.name.clone(),
                attempt,
                message: error.to_string(),
                retry_in_ms: delay.map(|d| d.as_millis() as u64),
            });

            let Some(delay) = delay else {
                return ProviderOutcome::Failed;
            };

            log::debug!(
                "Attempt {} against '{}' failed ({}); retrying in {:?}",
                attempt + 1,
                provider.name,
                error,
                delay
            );
            if token.is_cancelled() {
                return ProviderOutcome::Cancelled;
            }
            tokio::select! {
                biased;
                () = token.cancelled() => return ProviderOutcome::Cancelled,
                () = tokio::time::sleep(delay) => {},
            }
        }
        ProviderOutcome::Failed
    }

    async fn attempt(
        &self,
        provider: &ProviderDescriptor,
        request: &ProviderRequest,
        pixels: &PixelBuffer,
        token: &CancellationToken,
        observer: &mut (dyn FnMut(ChainEvent) + Send),
    ) -> AttemptOutcome {
        let call = tokio::time::timeout(provider.timeout, self.transport.send(provider, request));
        let response = tokio::select! {
            biased;
            () = token.cancelled() => return AttemptOutcome::Cancelled,
            result = call => result,
        };

        let response = match response {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return AttemptOutcome::Failed(e),
            Err(_) => {
                return AttemptOutcome::Failed(RetouchError::transport(
                    &provider.name,
                    format!("timed out after {}ms", provider.timeout.as_millis()),
                ))
            },
        };

        observer(ChainEvent::ResponseReceived {
            provider: provider.name.clone(),
        });
        match Self::normalize(provider, request, &response, pixels) {
            Ok(output) => AttemptOutcome::Success(output),
            Err(e) => AttemptOutcome::Failed(e),
        }
    }

    fn normalize(
        provider: &ProviderDescriptor,
        request: &ProviderRequest,
        response: &super::transport::ProviderResponse,
        pixels: &PixelBuffer,
    ) -> Result<OperationOutput> {
        match provider.kind {
            OperationKind::Removal => {
                normalize_removal(&provider.name, response, pixels.dimensions())
                    .map(OperationOutput::Removal)
            },
            OperationKind::Detection => {
                normalize_detection(&provider.name, response, request, pixels.dimensions())
                    .map(OperationOutput::Detection)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageEncoding;
    use crate::providers::transport::ProviderResponse;
    use crate::services::ImageIOService;
    use crate::types::{MaskPolygon, Point};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Fail,
        Hang,
        Image,
        Json,
    }

    #[derive(Default)]
    struct ScriptedTransport {
        behaviors: HashMap<String, Behavior>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedTransport {
        fn with(mut self, name: &str, behavior: Behavior) -> Self {
            self.behaviors.insert(name.to_string(), behavior);
            self
        }

        fn calls(&self, name: &str) -> u32 {
            self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ProviderTransport for ScriptedTransport {
        async fn send(
            &self,
            provider: &ProviderDescriptor,
            request: &ProviderRequest,
        ) -> Result<ProviderResponse> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(provider.name.clone())
                .or_default() += 1;
            match self.behaviors.get(&provider.name).copied().unwrap_or(Behavior::Fail) {
                Behavior::Fail => Err(RetouchError::transport(&provider.name, "HTTP error 503")),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(RetouchError::transport(&provider.name, "unreachable"))
                },
                Behavior::Image => {
                    let pixels = PixelBuffer::filled(request.width, request.height, [1, 2, 3, 255]);
                    let bytes = ImageIOService::encode(&pixels, ImageEncoding::Png)?;
                    Ok(ProviderResponse::new(Some("image/png"), bytes))
                },
                Behavior::Json => Ok(ProviderResponse::json(&serde_json::json!({"error": "x"}))),
            }
        }
    }

    fn removal(name: &str) -> ProviderDescriptor {
        ProviderDescriptor::new(name, format!("http://localhost/{name}"), OperationKind::Removal)
            .with_timeout(Duration::from_millis(100))
    }

    fn coordinator(
        providers: Vec<ProviderDescriptor>,
        transport: Arc<ScriptedTransport>,
    ) -> ProviderCoordinator {
        ProviderCoordinator::new(
            ProviderConfig {
                detection: Vec::new(),
                removal: providers,
            },
            transport,
            RetryPolicy {
                backoff_unit: Duration::from_millis(10),
            },
        )
    }

    fn selection() -> Selection {
        Selection::Mask(
            MaskPolygon::new(vec![Point::new(1, 1), Point::new(6, 1), Point::new(6, 6)]).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_then_fallback_to_second_provider() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("slow", Behavior::Hang)
                .with("fast", Behavior::Image),
        );
        let coordinator = coordinator(vec![removal("slow"), removal("fast")], transport.clone());
        let pixels = PixelBuffer::filled(8, 8, [0, 0, 0, 255]);
        let mut events = Vec::new();

        let outcome = coordinator
            .try_providers(
                OperationKind::Removal,
                &pixels,
                &selection(),
                &CancellationToken::new(),
                &mut |e: ChainEvent| events.push(e),
            )
            .await;

        match outcome {
            ChainOutcome::Success { provider, output } => {
                assert_eq!(provider, "fast");
                assert!(matches!(output, OperationOutput::Removal(ref p) if p.dimensions() == (8, 8)));
            },
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(transport.calls("slow"), 3);
        assert_eq!(transport.calls("fast"), 1);
        let retries: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ChainEvent::AttemptFailed { retry_in_ms, .. } => Some(*retry_in_ms),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![Some(10), Some(20), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_chain_logs_every_attempt() {
        let transport = Arc::new(ScriptedTransport::default());
        let coordinator = coordinator(
            vec![removal("a").with_max_retries(2), removal("b").with_max_retries(1)],
            transport.clone(),
        );
        let pixels = PixelBuffer::filled(8, 8, [0, 0, 0, 255]);

        let outcome = coordinator
            .try_providers(
                OperationKind::Removal,
                &pixels,
                &selection(),
                &CancellationToken::new(),
                &mut |_: ChainEvent| {},
            )
            .await;

        let ChainOutcome::Exhausted(log) = outcome else {
            panic!("expected exhaustion");
        };
        let summary: Vec<_> = log.iter().map(|r| (r.provider.as_str(), r.attempt)).collect();
        assert_eq!(summary, vec![("a", 0), ("a", 1), ("b", 0)]);
        assert!(log.iter().all(|r| r.kind == ErrorKind::ProviderTransportError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_is_retried_then_moves_on() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .with("broken", Behavior::Json)
                .with("good", Behavior::Image),
        );
        let coordinator = coordinator(vec![removal("broken"), removal("good")], transport.clone());
        let pixels = PixelBuffer::filled(8, 8, [0, 0, 0, 255]);
        let mut events = Vec::new();

        let outcome = coordinator
            .try_providers(
                OperationKind::Removal,
                &pixels,
                &selection(),
                &CancellationToken::new(),
                &mut |e: ChainEvent| events.push(e),
            )
            .await;

        assert!(matches!(outcome, ChainOutcome::Success { ref provider, .. } if provider == "good"));
        assert_eq!(transport.calls("broken"), 3);
        assert_eq!(transport.calls("good"), 1);
        let retries: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ChainEvent::AttemptFailed { retry_in_ms, .. } => Some(*retry_in_ms),
                _ => None,
            })
            .collect();
        assert_eq!(retries, vec![Some(10), Some(20), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_only_chain_logs_every_attempt() {
        let transport = Arc::new(ScriptedTransport::default().with("broken", Behavior::Json));
        let coordinator = coordinator(vec![removal("broken")], transport.clone());
        let pixels = PixelBuffer::filled(8, 8, [0, 0, 0, 255]);

        let outcome = coordinator
            .try_providers(
                OperationKind::Removal,
                &pixels,
                &selection(),
                &CancellationToken::new(),
                &mut |_: ChainEvent| {},
            )
            .await;

        let ChainOutcome::Exhausted(log) = outcome else {
            panic!("expected exhaustion");
        };
        assert_eq!(transport.calls("broken"), 3);
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|r| r.kind == ErrorKind::ProviderResponseMalformed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_skips_remaining_providers() {
        let transport = Arc::new(ScriptedTransport::default().with("next", Behavior::Image));
        let coordinator = coordinator(vec![removal("first"), removal("next")], transport.clone());
        let pixels = PixelBuffer::filled(8, 8, [0, 0, 0, 255]);
        let token = CancellationToken::new();
        let cancel = token.clone();

        let outcome = coordinator
            .try_providers(
                OperationKind::Removal,
                &pixels,
                &selection(),
                &token,
                &mut |e: ChainEvent| {
                    if matches!(e, ChainEvent::AttemptFailed { attempt: 1, .. }) {
                        cancel.cancel();
                    }
                },
            )
            .await;

        assert!(matches!(outcome, ChainOutcome::Cancelled));
        assert_eq!(transport.calls("first"), 2);
        assert_eq!(transport.calls("next"), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let transport = Arc::new(ScriptedTransport::default());
        let coordinator = coordinator(Vec::new(), transport);
        let pixels = PixelBuffer::filled(2, 2, [0, 0, 0, 255]);
        let outcome = coordinator
            .try_providers(
                OperationKind::Detection,
                &pixels,
                &Selection::Point(Point::new(0, 0)),
                &CancellationToken::new(),
                &mut |_: ChainEvent| {},
            )
            .await;
        assert!(matches!(outcome, ChainOutcome::Exhausted(ref log) if log.is_empty()));
    }
}
