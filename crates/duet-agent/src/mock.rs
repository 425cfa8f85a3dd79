//! Scripted model backend for tests and offline runs

use crate::client::ModelBackend;
use crate::types::{ChatMessage, ModelReply};
use async_trait::async_trait;
use duet_core::{DuetError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

/// Mock backend that replays queued replies per model id
///
/// Replies for a model are consumed in order. A model with no replies left
/// fails the call.
#[derive(Clone, Default)]
pub struct MockModelBackend {
    replies: Arc<Mutex<HashMap<String, VecDeque<std::result::Result<String, String>>>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    delay: Option<Duration>,
}

impl MockModelBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful reply for `model`
    pub fn with_reply(self, model: &str, text: impl Into<String>) -> Self {
        self.push(model, Ok(text.into()));
        self
    }

    /// Queue a failed invocation for `model`
    pub fn with_failure(self, model: &str, diagnostic: impl Into<String>) -> Self {
        self.push(model, Err(diagnostic.into()));
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn push(&self, model: &str, reply: std::result::Result<String, String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(model.to_string()).or_default().push_back(reply);
        }
    }

    fn next_reply(&self, model: &str) -> Option<std::result::Result<String, String>> {
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.get_mut(model).and_then(VecDeque::pop_front))
    }
}

#[async_trait]
impl ModelBackend for MockModelBackend {
    async fn invoke(
        &self,
        model: &str,
        messages: &[ChatMessage],
        _max_tokens: usize,
    ) -> Result<ModelReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                model: model.to_string(),
                messages: messages.to_vec(),
            });
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_reply(model) {
            Some(Ok(text)) => Ok(ModelReply::new(model, text)),
            Some(Err(diagnostic)) => Err(DuetError::ModelInvocationFailed(diagnostic)),
            None => Err(DuetError::ModelInvocationFailed(format!(
                "no scripted reply for model {}",
                model
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_are_consumed_per_model() {
        let backend = MockModelBackend::new()
            .with_reply("a", "first")
            .with_reply("b", "other")
            .with_reply("a", "second");

        let msgs = [ChatMessage::user("hi")];
        assert_eq!(backend.invoke("a", &msgs, 1).await.unwrap().text, "first");
        assert_eq!(backend.invoke("a", &msgs, 1).await.unwrap().text, "second");
        assert_eq!(backend.invoke("b", &msgs, 1).await.unwrap().text, "other");
        assert!(backend.invoke("a", &msgs, 1).await.is_err());
        assert_eq!(backend.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let backend = MockModelBackend::new().with_failure("a", "boom");
        let err = backend.invoke("a", &[], 1).await.unwrap_err();
        assert!(matches!(err, DuetError::ModelInvocationFailed(msg) if msg == "boom"));
    }
}
