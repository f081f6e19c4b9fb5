use super::parse::{parse_batch, parse_single};
use super::wire::{build_request, ChatResponse};
use super::{AiError, Classifier, Result};
use crate::config::types::{AiConfig, AiEndpointConfig};
use crate::format::LogFormat;
use crate::record::Record;
use crate::verdict::Verdict;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct RotationState {
    current_index: usize,
    last_call: HashMap<String, Instant>,
}

/// Rotates classification calls across configured endpoints.
///
/// Endpoints are ordered by ascending priority and taken round-robin starting
/// at `current_index`, skipping disabled ones and ones called more recently
/// than their per-minute rate limit allows.
pub struct AiServiceManager {
    endpoints: Vec<AiEndpointConfig>,
    state: RwLock<RotationState>,
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl AiServiceManager {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        let mut endpoints = config.endpoints.clone();
        endpoints.sort_by_key(|e| e.priority);

        if endpoints.iter().all(|e| !e.enabled) {
            warn!("No enabled AI endpoints; records not decided by rules will be filtered");
        } else {
            info!(
                endpoints = endpoints.len(),
                enabled = endpoints.iter().filter(|e| e.enabled).count(),
                "AI service manager initialized"
            );
        }

        Ok(Self {
            endpoints,
            state: RwLock::new(RotationState::default()),
            client,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        })
    }

    pub fn endpoints(&self) -> &[AiEndpointConfig] {
        &self.endpoints
    }

    /// Pick the next usable endpoint.
    ///
    /// The selected endpoint is stamped as called, so a second selection
    /// inside its rate-limit window skips it even before `record_call`.
    pub fn get_next_service(&self) -> Result<AiEndpointConfig> {
        let now = Instant::now();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let n = self.endpoints.len();

        for _ in 0..n {
            let index = state.current_index % n;
            state.current_index = (index + 1) % n;

            let endpoint = &self.endpoints[index];
            if !endpoint.enabled {
                continue;
            }
            if let Some(last) = state.last_call.get(&endpoint.name) {
                if now.duration_since(*last) < min_interval(endpoint.rate_limit) {
                    debug!(endpoint = %endpoint.name, "Endpoint rate limited, skipping");
                    continue;
                }
            }

            state.last_call.insert(endpoint.name.clone(), now);
            return Ok(endpoint.clone());
        }

        Err(AiError::Exhausted)
    }

    /// Stamp the endpoint as called. Must run right before the request is sent.
    pub fn record_call(&self, name: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.last_call.insert(name.to_string(), Instant::now());
    }

    /// Send one request with bounded linear-backoff retries; returns the model's text
    async fn call_with_retry(
        &self,
        endpoint: &AiEndpointConfig,
        format: LogFormat,
        records: &[Record],
    ) -> Result<String> {
        let request = build_request(&endpoint.model, format, records);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.record_call(&endpoint.name);

            match self.send(endpoint, &request).await {
                Ok(content) => return Ok(content),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempt > self.max_retries {
                        error!(
                            endpoint = %endpoint.name,
                            attempts = attempt,
                            error = %e,
                            "Max retries exceeded"
                        );
                        return Err(AiError::RetriesExhausted {
                            endpoint: endpoint.name.clone(),
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }

                    let backoff = self.retry_backoff * attempt;
                    warn!(
                        endpoint = %endpoint.name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Classifier request failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn send(
        &self,
        endpoint: &AiEndpointConfig,
        request: &super::wire::ChatRequest,
    ) -> Result<String> {
        let mut builder = self.client.post(&endpoint.endpoint).json(request);
        if !endpoint.token.is_empty() {
            builder = builder.bearer_auth(&endpoint.token);
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            return Err(AiError::Status {
                endpoint: endpoint.name.clone(),
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::Parse(e.to_string()))?;
        body.first_content()
            .map(str::to_string)
            .ok_or_else(|| AiError::Parse("response has no choices".to_string()))
    }
}

#[async_trait]
impl Classifier for AiServiceManager {
    /// Classify `records` in one call, failing over to other endpoints when
    /// one exhausts its retries. Parse failures yield filter verdicts rather
    /// than errors.
    async fn classify(&self, format: LogFormat, records: &[Record]) -> Result<Vec<Verdict>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut tried = HashSet::new();
        let mut last_error = None;

        loop {
            let endpoint = match self.get_next_service() {
                Ok(endpoint) if tried.insert(endpoint.name.clone()) => endpoint,
                Ok(_) | Err(_) => return Err(last_error.unwrap_or(AiError::Exhausted)),
            };

            debug!(endpoint = %endpoint.name, records = records.len(), "Sending classification request");

            match self.call_with_retry(&endpoint, format, records).await {
                Ok(content) => {
                    return Ok(if records.len() == 1 {
                        vec![parse_single(&content)]
                    } else {
                        parse_batch(&content, records.len())
                    });
                }
                Err(AiError::Parse(msg)) => {
                    warn!(endpoint = %endpoint.name, error = %msg, "Malformed classifier response");
                    let reason = format!("unparseable classifier response: {}", msg);
                    return Ok(records.iter().map(|_| Verdict::fallback(reason.clone())).collect());
                }
                Err(e) => {
                    warn!(endpoint = %endpoint.name, error = %e, "Endpoint failed, trying next");
                    last_error = Some(e);
                }
            }
        }
    }
}

fn min_interval(rate_limit_per_minute: u32) -> Duration {
    Duration::from_secs(60) / rate_limit_per_minute.max(1)
}
