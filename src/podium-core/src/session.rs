//! OpenAI-compatible language backend.
//!
//! Sessions keep their message history client-side. A reply is only recorded
//! into the history when its stream is consumed to natural completion, so a
//! stream abandoned mid-flight leaves the context untouched.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use futures::StreamExt;

use crate::backend::{ChatSession, FragmentStream, LanguageBackend};
use crate::error::DebateError;

/// Language backend speaking the OpenAI chat-completion protocol.
pub struct OpenAiBackend {
    client: Client<OpenAIConfig>,
}

impl OpenAiBackend {
    /// Build a backend against an OpenAI-compatible endpoint.
    pub fn new(api_base: &str, api_key: &str) -> Result<Self, DebateError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DebateError::Config(format!("Failed to create HTTP client: {e}")))?;

        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Ok(Self {
            client: Client::with_config(config).with_http_client(http_client),
        })
    }
}

#[async_trait]
impl LanguageBackend for OpenAiBackend {
    async fn create_session(
        &self,
        model: &str,
        system_instruction: &str,
    ) -> Result<Box<dyn ChatSession>, DebateError> {
        let messages = vec![ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessage {
                content: system_instruction.to_string().into(),
                name: None,
            },
        )];

        Ok(Box::new(OpenAiChatSession {
            client: self.client.clone(),
            model: model.to_string(),
            messages: Arc::new(Mutex::new(messages)),
        }))
    }

    async fn generate_once(&self, model: &str, prompt: &str) -> Result<String, DebateError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: prompt.to_string().into(),
                    name: None,
                },
            )])
            .build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| DebateError::Backend("empty completion response".to_string()))
    }
}

/// One debater's conversation context.
struct OpenAiChatSession {
    client: Client<OpenAIConfig>,
    model: String,
    messages: Arc<Mutex<Vec<ChatCompletionRequestMessage>>>,
}

#[async_trait]
impl ChatSession for OpenAiChatSession {
    async fn send_streaming(&mut self, message: &str) -> Result<FragmentStream, DebateError> {
        let history = {
            let mut messages = self.messages.lock().unwrap();
            messages.push(ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: message.to_string().into(),
                    name: None,
                },
            ));
            messages.clone()
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(history)
            .stream(true)
            .build()?;

        let mut upstream = self.client.chat().create_stream(request).await?;
        let messages = Arc::clone(&self.messages);

        let fragments = async_stream::try_stream! {
            let mut full = String::new();
            while let Some(chunk) = upstream.next().await {
                let chunk = chunk.map_err(DebateError::from)?;
                let Some(delta) = chunk
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                else {
                    continue;
                };
                if delta.is_empty() {
                    continue;
                }
                full.push_str(&delta);
                yield delta;
            }
            // Natural end of turn: fold the reply back into the context.
            messages
                .lock()
                .unwrap()
                .push(ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage {
                        content: Some(full.into()),
                        name: None,
                        tool_calls: None,
                        refusal: None,
                        audio: None,
                        function_call: None,
                    },
                ));
        };

        Ok(Box::pin(fragments))
    }
}
