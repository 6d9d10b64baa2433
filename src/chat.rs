//! Host chat panel: questions against the brain and text submission.
//!
//! An answer names the graph nodes it drew on; those become the controller's
//! referenced highlight set and are pushed to a detached graph window. A text
//! submission grows the graph on the backend, so it ends with a refresh
//! request to every window.

use crate::api::BackendClient;
use crate::camera::CameraPlan;
use crate::controller::GraphRenderController;
use crate::error::Result;
use crate::models::{AnswerResponse, ProcessTextResponse, SyncAction};
use crate::sync::SyncBridge;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Instant;

/// Shown in place of an answer when the backend call fails.
pub const ANSWER_FAILED_MESSAGE: &str = "죄송합니다. 답변을 생성하는 중 오류가 발생했습니다.";

/// The two backend calls the chat panel makes.
pub trait ChatBackend {
    fn answer(
        &self,
        question: &str,
        brain_id: &str,
    ) -> impl Future<Output = Result<AnswerResponse>> + Send;

    fn process_text(
        &self,
        text: &str,
        source_id: &str,
        brain_id: &str,
    ) -> impl Future<Output = Result<ProcessTextResponse>> + Send;
}

impl ChatBackend for BackendClient {
    async fn answer(&self, question: &str, brain_id: &str) -> Result<AnswerResponse> {
        BackendClient::answer(self, question, brain_id).await
    }

    async fn process_text(
        &self,
        text: &str,
        source_id: &str,
        brain_id: &str,
    ) -> Result<ProcessTextResponse> {
        BackendClient::process_text(self, text, source_id, brain_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub referenced_nodes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Value>,
}

impl ChatMessage {
    fn user(text: &str) -> Self {
        Self {
            role: Role::User,
            text: text.to_string(),
            referenced_nodes: Vec::new(),
            chat_id: None,
        }
    }

    fn assistant(text: &str) -> Self {
        Self {
            role: Role::Assistant,
            text: text.to_string(),
            referenced_nodes: Vec::new(),
            chat_id: None,
        }
    }
}

pub struct ChatSession {
    brain_id: String,
    messages: Vec<ChatMessage>,
    loading: bool,
    refresh_counter: u64,
    bridge: Option<SyncBridge>,
}

impl ChatSession {
    pub fn new(brain_id: &str) -> Self {
        Self {
            brain_id: brain_id.to_string(),
            messages: Vec::new(),
            loading: false,
            refresh_counter: 0,
            bridge: None,
        }
    }

    pub fn with_bridge(mut self, bridge: SyncBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn bridge_mut(&mut self) -> Option<&mut SyncBridge> {
        self.bridge.as_mut()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn refresh_counter(&self) -> u64 {
        self.refresh_counter
    }

    /// Ask a question. Blank questions are ignored. On success the answer's
    /// referenced nodes are highlighted and the camera plan for them is
    /// returned; on failure an apology is appended instead.
    pub async fn ask<B: ChatBackend>(
        &mut self,
        backend: &B,
        question: &str,
        controller: &mut GraphRenderController,
        now: Instant,
    ) -> Option<CameraPlan> {
        let question = question.trim();
        if question.is_empty() || self.loading {
            return None;
        }

        self.messages.push(ChatMessage::user(question));
        self.loading = true;
        let result = backend.answer(question, &self.brain_id).await;
        self.loading = false;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, brain_id = %self.brain_id, "answer generation failed");
                self.messages.push(ChatMessage::assistant(ANSWER_FAILED_MESSAGE));
                return None;
            }
        };

        let referenced = response.referenced_nodes.clone();
        self.messages.push(ChatMessage {
            referenced_nodes: response.referenced_nodes,
            chat_id: response.chat_id,
            ..ChatMessage::assistant(&response.answer)
        });

        if let Some(bridge) = &mut self.bridge {
            if let Err(e) = bridge.post_referenced(referenced.clone()) {
                tracing::warn!(error = %e, "could not forward referenced nodes");
            }
        }
        controller.set_referenced(referenced, now)
    }

    /// Submit source text for extraction, then ask every window to refresh.
    pub async fn submit_text<B: ChatBackend>(
        &mut self,
        backend: &B,
        text: &str,
        source_id: &str,
    ) -> Result<ProcessTextResponse> {
        self.loading = true;
        let result = backend.process_text(text, source_id, &self.brain_id).await;
        self.loading = false;
        let response = result?;

        self.refresh_counter += 1;
        if let Some(bridge) = &mut self.bridge {
            bridge.publish(bridge.message(SyncAction::Refresh))?;
        }
        tracing::info!(
            brain_id = %self.brain_id,
            nodes = response.nodes.len(),
            edges = response.edges.len(),
            "text processed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use crate::error::GraphError;
    use crate::highlight::HighlightKind;
    use crate::models::ChannelKey;
    use crate::sync::{open_window, InboundEvent, StorageChannel};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubBackend {
        answers: Mutex<Vec<Result<AnswerResponse>>>,
        processed: Mutex<Vec<String>>,
        fail_processing: bool,
    }

    impl ChatBackend for StubBackend {
        async fn answer(&self, _question: &str, _brain_id: &str) -> Result<AnswerResponse> {
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                Err(GraphError::Status {
                    status: 500,
                    url: "stub://answer".into(),
                })
            } else {
                answers.remove(0)
            }
        }

        async fn process_text(
            &self,
            text: &str,
            _source_id: &str,
            _brain_id: &str,
        ) -> Result<ProcessTextResponse> {
            if self.fail_processing {
                return Err(GraphError::Status {
                    status: 502,
                    url: "stub://process_text".into(),
                });
            }
            self.processed.lock().unwrap().push(text.to_string());
            Ok(ProcessTextResponse::default())
        }
    }

    fn controller() -> GraphRenderController {
        let mut c = GraphRenderController::new(ControllerConfig::default());
        c.load_inline(&json!({"nodes": [{"id": "a"}, {"id": "b"}], "links": []}));
        c
    }

    #[tokio::test]
    async fn test_answer_highlights_referenced_nodes() {
        let backend = StubBackend::default();
        backend.answers.lock().unwrap().push(Ok(AnswerResponse {
            answer: "b is related".into(),
            referenced_nodes: vec!["b".into()],
            chat_id: Some(json!(9)),
        }));
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mut bridge = SyncBridge::new("42", "main", StorageChannel::open(&db).unwrap());
        let (handle, mut inbox) = open_window();
        bridge.attach_window(handle);

        let mut chat = ChatSession::new("42").with_bridge(bridge);
        let mut c = controller();
        chat.ask(&backend, "  what is b?  ", &mut c, Instant::now()).await;

        assert!(!chat.is_loading());
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[0].text, "what is b?");
        assert_eq!(chat.messages()[1].referenced_nodes, vec!["b".to_string()]);
        assert!(c.highlights().get(HighlightKind::Referenced).contains("b"));

        let raw = inbox.try_recv().unwrap();
        let mut standalone = SyncBridge::new("42", "standalone", StorageChannel::open(&db).unwrap());
        assert_eq!(
            standalone.accept_window(&raw),
            Some(InboundEvent::ReferencedNodes(vec!["b".to_string()]))
        );
    }

    #[tokio::test]
    async fn test_answer_failure_appends_apology() {
        let backend = StubBackend::default();
        let mut chat = ChatSession::new("42");
        let mut c = controller();
        let plan = chat.ask(&backend, "anything", &mut c, Instant::now()).await;

        assert!(plan.is_none());
        assert!(!chat.is_loading());
        assert_eq!(chat.messages().last().unwrap().text, ANSWER_FAILED_MESSAGE);
        assert_eq!(chat.messages().last().unwrap().role, Role::Assistant);
        assert!(c.highlights().get(HighlightKind::Referenced).is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_is_ignored() {
        let backend = StubBackend::default();
        let mut chat = ChatSession::new("42");
        let mut c = controller();
        chat.ask(&backend, "   ", &mut c, Instant::now()).await;
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn test_submit_text_requests_refresh() {
        let backend = StubBackend::default();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let storage = StorageChannel::open(&db).unwrap();
        let mut chat = ChatSession::new("42").with_bridge(SyncBridge::new("42", "main", storage.clone()));

        chat.submit_text(&backend, "some notes", "src-1").await.unwrap();
        assert_eq!(chat.refresh_counter(), 1);
        assert_eq!(backend.processed.lock().unwrap().as_slice(), ["some notes".to_string()]);
        let stored = storage.read(ChannelKey::GraphRefresh).unwrap();
        assert_eq!(stored.action, SyncAction::Refresh);
    }

    #[tokio::test]
    async fn test_submit_text_failure_leaves_counter() {
        let backend = StubBackend {
            fail_processing: true,
            ..StubBackend::default()
        };
        let mut chat = ChatSession::new("42");
        assert!(chat.submit_text(&backend, "x", "s").await.is_err());
        assert_eq!(chat.refresh_counter(), 0);
        assert!(!chat.is_loading());
    }
}
