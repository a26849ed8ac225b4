//! Voice provider chain assembly

use std::sync::Arc;
use std::time::Duration;

use companion_config::{BreakerSettings, VoiceSettings};
use companion_core::{BreakerConfig, Error, ProviderCapability, ProviderChain, Result, VoiceBackend};

use crate::azure::AzureSpeechBackend;
use crate::elevenlabs::ElevenLabsBackend;
use crate::offline::OfflineVoice;

fn capability_from_str(name: &str) -> Result<ProviderCapability> {
    match name {
        "transcription" => Ok(ProviderCapability::Transcription),
        "synthesis" => Ok(ProviderCapability::Synthesis),
        other => Err(Error::Config(format!("unknown voice capability `{other}`"))),
    }
}

/// Build the voice chain from settings. Providers missing their API key are
/// skipped with a warning; the offline fallback always terminates the chain.
pub fn build_voice_chain(
    settings: &VoiceSettings,
    breaker: &BreakerSettings,
) -> Result<ProviderChain<dyn VoiceBackend>> {
    let timeout = Duration::from_secs(settings.call_timeout_secs);
    let mut builder = ProviderChain::<dyn VoiceBackend>::builder()
        .breaker(BreakerConfig {
            failure_threshold: breaker.failure_threshold,
            cooldown: Duration::from_secs(breaker.cooldown_secs),
        })
        .call_timeout(timeout);

    for provider in &settings.providers {
        let capabilities = provider
            .capabilities
            .iter()
            .map(|c| capability_from_str(c))
            .collect::<Result<Vec<_>>>()?;

        let backend: Arc<dyn VoiceBackend> = match provider.name.as_str() {
            "elevenlabs" => match ElevenLabsBackend::new(provider, timeout) {
                Ok(backend) => Arc::new(backend),
                Err(err) => {
                    tracing::warn!(provider = %provider.name, error = %err, "skipping provider");
                    continue;
                }
            },
            _ => match AzureSpeechBackend::new(provider, timeout) {
                Ok(backend) => Arc::new(backend),
                Err(err) => {
                    tracing::warn!(provider = %provider.name, error = %err, "skipping provider");
                    continue;
                }
            },
        };
        builder = builder.provider(provider.name.clone(), provider.priority, capabilities, backend);
    }

    Ok(builder.offline("offline", Arc::new(OfflineVoice)).build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_names_parse() {
        assert_eq!(
            capability_from_str("synthesis").unwrap(),
            ProviderCapability::Synthesis
        );
        assert_eq!(
            capability_from_str("transcription").unwrap(),
            ProviderCapability::Transcription
        );
        assert!(capability_from_str("divination").is_err());
    }

    #[tokio::test]
    async fn chain_with_no_configured_providers_still_synthesizes() {
        // No API keys in the environment, so every configured provider is
        // skipped and the offline fallback serves the request.
        let settings = VoiceSettings::default();
        let chain = build_voice_chain(&settings, &BreakerSettings::default()).unwrap();

        let result = chain
            .invoke(ProviderCapability::Synthesis, None, |p| async move {
                p.synthesize(
                    "hello",
                    companion_core::Emotion::Neutral,
                    companion_core::Language::English,
                )
                .await
            })
            .await;
        assert!(result.is_success());
        assert!(result.degraded);
        assert_eq!(result.provider, "offline");
    }
}
