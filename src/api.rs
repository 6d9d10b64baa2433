//! Backend REST client.
//!
//! The backend owns extraction, persistence and answer generation; this
//! module only issues the three graph calls the view needs. Graph payloads
//! are returned raw and normalized by the caller.

use crate::error::{GraphError, Result};
use crate::models::{
    AnswerRequest, AnswerResponse, GraphData, GraphLink, GraphNode, ProcessTextRequest,
    ProcessTextResponse,
};
use crate::normalize::{compute_link_counts, normalize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Anything that can produce a raw graph payload for a brain.
pub trait GraphSource {
    fn fetch_graph(&self, brain_id: &str) -> impl Future<Output = Result<Value>> + Send;
}

#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/brainGraph/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(GraphError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            })
        }
    }

    /// POST /brainGraph/process_text - extract entities from text into the brain.
    pub async fn process_text(
        &self,
        text: &str,
        source_id: &str,
        brain_id: &str,
    ) -> Result<ProcessTextResponse> {
        let body = ProcessTextRequest {
            text: text.to_string(),
            source_id: source_id.to_string(),
            brain_id: brain_id.to_string(),
        };
        let response = self.http.post(self.url("process_text")).json(&body).send().await;
        let response = match response {
            Ok(r) => Self::check(r).await?,
            Err(e) => {
                tracing::error!(error = %e, brain_id, "text processing request failed");
                return Err(e.into());
            }
        };
        Ok(response.json().await?)
    }

    /// POST /brainGraph/answer - ask a question against the brain's graph.
    pub async fn answer(&self, question: &str, brain_id: &str) -> Result<AnswerResponse> {
        let body = AnswerRequest {
            question: question.to_string(),
            brain_id: brain_id.to_string(),
        };
        let response = self.http.post(self.url("answer")).json(&body).send().await;
        let response = match response {
            Ok(r) => Self::check(r).await?,
            Err(e) => {
                tracing::error!(error = %e, brain_id, "answer request failed");
                return Err(e.into());
            }
        };
        Ok(response.json().await?)
    }
}

impl GraphSource for BackendClient {
    /// GET /brainGraph/getNodeEdge/{brain_id}
    async fn fetch_graph(&self, brain_id: &str) -> Result<Value> {
        let url = self.url(&format!("getNodeEdge/{}", urlencoding::encode(brain_id)));
        let response = Self::check(self.http.get(&url).send().await?).await?;
        let payload: Value = response.json().await?;
        tracing::debug!(brain_id, "graph payload received");
        Ok(payload)
    }
}

/// Fetches and normalizes a brain's graph, substituting a small sample graph
/// when the request itself fails. The render controller does not use this; it
/// surfaces fetch errors instead.
pub async fn fetch_graph_or_sample<S: GraphSource>(source: &S, brain_id: &str) -> GraphData {
    match source.fetch_graph(brain_id).await {
        Ok(raw) => normalize(&raw),
        Err(e) => {
            tracing::error!(error = %e, brain_id, "graph fetch failed; showing sample graph");
            sample_graph()
        }
    }
}

fn sample_graph() -> GraphData {
    let mut data = GraphData {
        nodes: vec![
            GraphNode::new("sample1", "샘플 노드 1", 1),
            GraphNode::new("sample2", "샘플 노드 2", 2),
            GraphNode::new("sample3", "샘플 노드 3", 3),
        ],
        links: vec![
            GraphLink::new("sample1", "sample2", "관계 1"),
            GraphLink::new("sample2", "sample3", "관계 2"),
        ],
    };
    compute_link_counts(&mut data);
    data
}
