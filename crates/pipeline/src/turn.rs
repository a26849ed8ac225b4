//! Turn processing stages

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use companion_core::{
    AudioClip, Emotion, Language, Message, ProviderCapability, ProviderChain, Result, Role,
    VoiceBackend,
};
use companion_llm::{GenerationRequest, LlmOrchestrator};
use companion_moderation::ModerationService;

use crate::cancel::CancelToken;

const YOUNG_CHILD_AGE: u8 = 8;

/// One conversation turn to process.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub child_id: String,
    pub age: u8,
    pub language: Language,
    /// Latest child utterance
    pub text: String,
    /// Prior conversation, oldest first
    pub history: Vec<Message>,
    pub emotion: Emotion,
    pub task_type: Option<String>,
    pub use_cache: bool,
    /// Skip synthesis for text-only clients
    pub synthesize: bool,
}

impl TurnRequest {
    pub fn new(child_id: impl Into<String>, age: u8, text: impl Into<String>) -> Self {
        Self {
            child_id: child_id.into(),
            age,
            language: Language::default(),
            text: text.into(),
            history: Vec::new(),
            emotion: Emotion::default(),
            task_type: None,
            use_cache: true,
            synthesize: true,
        }
    }
}

/// Wall-clock spent in each stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub input_moderation_ms: u64,
    pub generation_ms: u64,
    pub output_moderation_ms: u64,
    pub synthesis_ms: u64,
    pub total_ms: u64,
}

/// Outcome of one processed turn. Always a usable reply; faults degrade to
/// a safe fallback rather than erroring out to the device.
#[derive(Debug, Clone)]
pub struct ConversationTurnResult {
    pub correlation_id: Uuid,
    pub response_text: String,
    pub audio: Option<AudioClip>,
    pub provider: String,
    pub model: String,
    pub cached: bool,
    pub degraded: bool,
    /// Input was blocked by moderation; no generation or synthesis ran
    pub blocked_input: bool,
    /// Generated output was replaced by a safe alternative
    pub substituted_output: bool,
    pub alert_parent: bool,
    pub timings: StageTimings,
}

/// The safety-gated conversation pipeline.
pub struct ConversationTurnPipeline {
    moderation: Arc<ModerationService>,
    llm: Arc<LlmOrchestrator>,
    voice: Arc<ProviderChain<dyn VoiceBackend>>,
}

impl ConversationTurnPipeline {
    pub fn new(
        moderation: Arc<ModerationService>,
        llm: Arc<LlmOrchestrator>,
        voice: Arc<ProviderChain<dyn VoiceBackend>>,
    ) -> Self {
        Self {
            moderation,
            llm,
            voice,
        }
    }

    /// Process a text turn. Never fails: internal faults produce a safe
    /// fallback reply tagged with the turn's correlation id.
    pub async fn process(&self, request: TurnRequest) -> ConversationTurnResult {
        let correlation_id = Uuid::new_v4();
        match self.run(&request, correlation_id).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(%correlation_id, error = %err, "turn failed, serving safe fallback");
                self.fallback(&request, correlation_id)
            }
        }
    }

    /// Process a turn, abandoning it when the token is cancelled (barge-in
    /// or session close). Returns `None` on cancellation.
    pub async fn process_with_cancel(
        &self,
        request: TurnRequest,
        cancel: &CancelToken,
    ) -> Option<ConversationTurnResult> {
        let child_id = request.child_id.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(child_id = %child_id, "turn cancelled");
                None
            }
            result = self.process(request) => Some(result),
        }
    }

    /// Voice entry point: transcribe the clip, then run the text pipeline.
    /// An empty or failed transcription yields a gentle re-prompt instead of
    /// a generated reply.
    pub async fn process_audio(
        &self,
        audio: &AudioClip,
        mut request: TurnRequest,
    ) -> ConversationTurnResult {
        let language = request.language;
        let transcription = self
            .voice
            .invoke(ProviderCapability::Transcription, None, |p| {
                let audio = audio.clone();
                async move { p.transcribe(&audio, language).await }
            })
            .await;

        match transcription.payload {
            Some(text) if !text.trim().is_empty() => {
                request.text = text;
                self.process(request).await
            }
            _ => {
                let correlation_id = Uuid::new_v4();
                tracing::info!(%correlation_id, "empty transcription, re-prompting");
                let text = reprompt_text(language).to_string();
                let audio = self.synthesize(&text, Emotion::Calm, language).await;
                ConversationTurnResult {
                    correlation_id,
                    response_text: text,
                    audio: audio.0,
                    provider: transcription.provider,
                    model: String::new(),
                    cached: false,
                    degraded: true,
                    blocked_input: false,
                    substituted_output: false,
                    alert_parent: false,
                    timings: StageTimings::default(),
                }
            }
        }
    }

    async fn run(
        &self,
        request: &TurnRequest,
        correlation_id: Uuid,
    ) -> Result<ConversationTurnResult> {
        let turn_start = Instant::now();
        let mut timings = StageTimings::default();

        // Input moderation gates everything downstream.
        let stage = Instant::now();
        let input = self
            .moderation
            .moderate_for_child(&request.text, request.age, request.language, &request.child_id)
            .await;
        timings.input_moderation_ms = stage.elapsed().as_millis() as u64;

        if input.is_blocked() {
            tracing::warn!(%correlation_id, severity = ?input.severity, "input blocked");
            let text = input
                .alternative_response
                .clone()
                .unwrap_or_else(|| fallback_text(request.language).to_string());
            timings.total_ms = turn_start.elapsed().as_millis() as u64;
            return Ok(ConversationTurnResult {
                correlation_id,
                response_text: text,
                audio: None,
                provider: String::new(),
                model: String::new(),
                cached: false,
                degraded: false,
                blocked_input: true,
                substituted_output: false,
                alert_parent: input.should_alert_parent,
                timings,
            });
        }

        // Generation over the assembled conversation.
        let stage = Instant::now();
        let mut conversation = Vec::with_capacity(request.history.len() + 2);
        if !request.history.iter().any(|m| m.role == Role::System) {
            conversation.push(Message::system(system_prompt(request.age, request.language)));
        }
        conversation.extend(request.history.iter().cloned());
        conversation.push(Message::user(request.text.as_str()));

        let mut generation = GenerationRequest::new(conversation);
        generation.task_type = request.task_type.clone();
        generation.use_cache = request.use_cache;
        let response = self.llm.generate(generation).await?;
        timings.generation_ms = stage.elapsed().as_millis() as u64;

        // Output moderation on the generated reply.
        let stage = Instant::now();
        let output = self
            .moderation
            .moderate(&response.content, request.age, request.language)
            .await;
        timings.output_moderation_ms = stage.elapsed().as_millis() as u64;

        let (response_text, substituted_output) = if output.is_blocked() {
            tracing::warn!(%correlation_id, severity = ?output.severity,
                "generated output blocked, substituting");
            let text = output
                .alternative_response
                .clone()
                .unwrap_or_else(|| fallback_text(request.language).to_string());
            (text, true)
        } else {
            (response.content.clone(), false)
        };

        // Synthesis; a silent reply is preferable to a failed turn.
        let stage = Instant::now();
        let (audio, synth_degraded) = if request.synthesize {
            self.synthesize(&response_text, request.emotion, request.language)
                .await
        } else {
            (None, false)
        };
        timings.synthesis_ms = stage.elapsed().as_millis() as u64;

        timings.total_ms = turn_start.elapsed().as_millis() as u64;
        Ok(ConversationTurnResult {
            correlation_id,
            response_text,
            audio,
            provider: response.provider,
            model: response.model,
            cached: response.cached,
            degraded: response.degraded || synth_degraded,
            blocked_input: false,
            substituted_output,
            alert_parent: input.should_alert_parent,
            timings,
        })
    }

    async fn synthesize(
        &self,
        text: &str,
        emotion: Emotion,
        language: Language,
    ) -> (Option<AudioClip>, bool) {
        let text = text.to_string();
        let result = self
            .voice
            .invoke(ProviderCapability::Synthesis, None, move |p| {
                let text = text.clone();
                async move { p.synthesize(&text, emotion, language).await }
            })
            .await;
        let degraded = result.degraded;
        (result.payload, degraded)
    }

    /// Session-end housekeeping: clear the child's violation history and
    /// flush the local response cache tier.
    pub fn shutdown(&self, child_id: &str) {
        self.moderation.end_session(child_id);
        self.llm.flush_cache();
        tracing::info!(child_id, "pipeline session closed");
    }

    fn fallback(&self, request: &TurnRequest, correlation_id: Uuid) -> ConversationTurnResult {
        ConversationTurnResult {
            correlation_id,
            response_text: fallback_text(request.language).to_string(),
            audio: None,
            provider: String::new(),
            model: String::new(),
            cached: false,
            degraded: true,
            blocked_input: false,
            substituted_output: false,
            alert_parent: false,
            timings: StageTimings::default(),
        }
    }
}

fn system_prompt(age: u8, language: Language) -> String {
    let style = if age <= YOUNG_CHILD_AGE {
        "Use very simple words, short sentences and a warm, playful tone."
    } else {
        "Use clear, friendly language appropriate for an older child."
    };
    format!(
        "You are a kind companion for a {age}-year-old child. {style} \
         Reply in {}. Never discuss violence, personal information or \
         frightening topics; gently redirect instead.",
        match language {
            Language::English => "English",
            Language::Arabic => "Arabic",
            Language::Spanish => "Spanish",
            Language::French => "French",
        }
    )
}

fn fallback_text(language: Language) -> &'static str {
    match language {
        Language::English => {
            "I got a little mixed up just now. Let's try that again together!"
        }
        Language::Arabic => "\u{062d}\u{062f}\u{062b} \u{062e}\u{0637}\u{0623} \u{0628}\u{0633}\u{064a}\u{0637}. \u{0644}\u{0646}\u{062d}\u{0627}\u{0648}\u{0644} \u{0645}\u{0631}\u{0629} \u{0623}\u{062e}\u{0631}\u{0649}!",
        Language::Spanish => "Me he liado un poquito. \u{00a1}Intent\u{00e9}moslo otra vez juntos!",
        Language::French => "Je me suis un peu embrouill\u{00e9}. R\u{00e9}essayons ensemble !",
    }
}

fn reprompt_text(language: Language) -> &'static str {
    match language {
        Language::English => "I didn't quite catch that. Could you say it again?",
        Language::Arabic => "\u{0644}\u{0645} \u{0623}\u{0633}\u{0645}\u{0639} \u{062c}\u{064a}\u{062f}\u{0627}\u{064b}. \u{0647}\u{0644} \u{064a}\u{0645}\u{0643}\u{0646}\u{0643} \u{0625}\u{0639}\u{0627}\u{062f}\u{0629} \u{0630}\u{0644}\u{0643}\u{061f}",
        Language::Spanish => "No te he o\u{00ed}do bien. \u{00bf}Puedes repetirlo?",
        Language::French => "Je n'ai pas bien entendu. Peux-tu r\u{00e9}p\u{00e9}ter ?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_adapts_to_age() {
        let young = system_prompt(5, Language::English);
        let older = system_prompt(12, Language::English);
        assert!(young.contains("simple words"));
        assert!(older.contains("older child"));
        assert!(system_prompt(7, Language::Arabic).contains("Arabic"));
    }

    #[test]
    fn fallback_text_is_localized() {
        assert_ne!(
            fallback_text(Language::English),
            fallback_text(Language::Spanish)
        );
        assert!(!reprompt_text(Language::Arabic).is_empty());
    }
}
