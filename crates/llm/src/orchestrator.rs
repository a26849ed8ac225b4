//! LLM orchestrator
//!
//! The single entry point for generation: validates parameters, consults the
//! cache, selects a model for the task, and drives the provider fallback
//! chain. Per-provider usage counters are kept for diagnostics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use companion_config::{BreakerSettings, LlmSettings};
use companion_core::{
    BreakerConfig, CacheStore, Error, GenerationBackend, GenerationParams, ProviderCapability,
    ProviderChain, Result,
};

use crate::backends::{OfflineResponder, OllamaBackend, OpenAiBackend};
use crate::cache::ResponseCache;
use crate::selector::ModelSelector;
use crate::types::{GenerationRequest, LlmResponse};
use crate::validation::ParameterValidationService;

/// Per-provider usage counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub degraded: u64,
    pub cache_hits: u64,
    pub total_tokens: u64,
    pub total_latency_ms: u64,
}

/// Orchestrates generation across cache, selector and provider chain.
pub struct LlmOrchestrator {
    chain: ProviderChain<dyn GenerationBackend>,
    selector: ModelSelector,
    validator: ParameterValidationService,
    cache: ResponseCache,
    usage: Mutex<HashMap<String, UsageSnapshot>>,
}

impl LlmOrchestrator {
    /// Assemble the orchestrator from settings. Providers whose API keys are
    /// missing from the environment are skipped with a warning rather than
    /// failing startup; the offline responder always terminates the chain.
    pub fn from_settings(settings: &LlmSettings, breaker: &BreakerSettings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.call_timeout_secs);
        let mut builder = ProviderChain::<dyn GenerationBackend>::builder()
            .breaker(BreakerConfig {
                failure_threshold: breaker.failure_threshold,
                cooldown: Duration::from_secs(breaker.cooldown_secs),
            })
            .call_timeout(timeout);

        let mut known = Vec::new();
        for provider in settings.providers.iter().filter(|p| p.enabled) {
            let backend: Arc<dyn GenerationBackend> = match provider.name.as_str() {
                "ollama" => Arc::new(OllamaBackend::new(provider, timeout)?),
                _ => match OpenAiBackend::new(provider, timeout) {
                    Ok(backend) => Arc::new(backend),
                    Err(err) => {
                        tracing::warn!(provider = %provider.name, error = %err,
                            "skipping provider");
                        continue;
                    }
                },
            };
            known.push(provider.name.clone());
            builder = builder.provider(
                provider.name.clone(),
                provider.priority,
                vec![ProviderCapability::Generation],
                backend,
            );
        }
        builder = builder.offline("offline", Arc::new(OfflineResponder));

        Ok(Self {
            chain: builder.build(),
            selector: ModelSelector::from_settings(settings),
            validator: ParameterValidationService::new(known),
            cache: ResponseCache::new(
                Duration::from_secs(settings.cache_ttl_secs),
                settings.cache_max_entries,
            ),
            usage: Mutex::new(HashMap::new()),
        })
    }

    /// Test and embedding constructor with explicit parts.
    pub fn new(
        chain: ProviderChain<dyn GenerationBackend>,
        selector: ModelSelector,
        validator: ParameterValidationService,
        cache: ResponseCache,
    ) -> Self {
        Self {
            chain,
            selector,
            validator,
            cache,
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a remote cache tier.
    pub fn with_remote_cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = self.cache.with_remote(store);
        self
    }

    /// Generate a response for the request.
    pub async fn generate(&self, request: GenerationRequest) -> Result<LlmResponse> {
        self.validator.validate(&request)?;

        let selection = self
            .selector
            .select(request.task_type.as_deref(), request.constraints.as_ref());
        let provider_hint = request
            .provider
            .clone()
            .unwrap_or_else(|| selection.provider.clone());
        let model = request.model.clone().unwrap_or(selection.model);
        let params = GenerationParams {
            model: Some(model.clone()),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        if !request.use_cache {
            let response = self.call_chain(&request, &provider_hint, &params).await?;
            self.record(&response, false);
            return Ok(response);
        }

        let key = ResponseCache::key_for(
            &request.conversation,
            &provider_hint,
            &model,
            request.max_tokens,
            request.temperature,
        );
        let (mut response, cached) = self
            .cache
            .get_or_compute(&key, || async {
                self.call_chain(&request, &provider_hint, &params).await
            })
            .await?;
        response.cached = cached;
        self.record(&response, cached);
        Ok(response)
    }

    /// Usage counters per provider, for diagnostics endpoints and tests.
    pub fn usage(&self) -> HashMap<String, UsageSnapshot> {
        self.usage.lock().clone()
    }

    /// Drop every local cache entry (shutdown or admin flush).
    pub fn flush_cache(&self) {
        self.cache.clear_local();
    }

    /// Circuit state passthrough for diagnostics.
    pub fn circuit_state(&self, provider: &str) -> Option<companion_core::CircuitState> {
        self.chain.circuit_state(provider)
    }

    async fn call_chain(
        &self,
        request: &GenerationRequest,
        provider_hint: &str,
        params: &GenerationParams,
    ) -> Result<LlmResponse> {
        let conversation = request.conversation.clone();
        let params = params.clone();
        let result = self
            .chain
            .invoke(ProviderCapability::Generation, Some(provider_hint), {
                let conversation = &conversation;
                let params = &params;
                move |backend| async move { backend.generate(conversation, params).await }
            })
            .await;

        let degraded = result.degraded;
        let provider = result.provider.clone();
        let elapsed = result.elapsed;
        match result.payload {
            Some(output) => Ok(LlmResponse {
                content: output.content,
                provider,
                model: output.model,
                tokens_used: output.tokens_used,
                latency_ms: elapsed.as_millis() as u64,
                cached: false,
                degraded,
            }),
            None => {
                self.record_failure(&provider);
                Err(Error::provider(
                    provider,
                    result
                        .error
                        .unwrap_or_else(|| "generation failed".to_string()),
                ))
            }
        }
    }

    fn record(&self, response: &LlmResponse, cache_hit: bool) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(response.provider.clone()).or_default();
        entry.requests += 1;
        entry.total_tokens += u64::from(response.tokens_used);
        entry.total_latency_ms += response.latency_ms;
        if cache_hit {
            entry.cache_hits += 1;
        }
        if response.degraded {
            entry.degraded += 1;
        }
    }

    fn record_failure(&self, provider: &str) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(provider.to_string()).or_default();
        entry.requests += 1;
        entry.failures += 1;
    }
}
