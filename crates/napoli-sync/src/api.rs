use crate::error::ApiError;
use napoli_core::{
    DashboardStats, DrillItem, Feedback, KnowledgeItem, Lead, McpServer, MenuItem,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// AI helper endpoints under `/ai/{task}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistTask {
    Transcribe,
    EstimateMetrics,
    SuggestMenu,
    AnalyzeSentiment,
    GenerateTrigger,
    SummarizeInsights,
    BanRisk,
    PredictIntent,
}

impl AssistTask {
    pub fn path(&self) -> &'static str {
        match self {
            AssistTask::Transcribe => "transcribe",
            AssistTask::EstimateMetrics => "estimate-metrics",
            AssistTask::SuggestMenu => "suggest-menu",
            AssistTask::AnalyzeSentiment => "analyze-sentiment",
            AssistTask::GenerateTrigger => "generate-trigger",
            AssistTask::SummarizeInsights => "summarize-insights",
            AssistTask::BanRisk => "ban-risk",
            AssistTask::PredictIntent => "predict-intent",
        }
    }
}

/// Thin typed facade over the backend REST API rooted at `{backend}/api`.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    pub fn with_client(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Url(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let url = self.endpoint(segments)?;
        debug!(event = "api_request", method = %method, url = %url);
        Ok(self.client.request(method, url))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(event = "api_status_error", url = %url, status = status.as_u16());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn send_as<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let value = self.send(request).await?;
        serde_json::from_value(value).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn get(&self, segments: &[&str]) -> Result<Value, ApiError> {
        self.send(self.request(Method::GET, segments)?).await
    }

    async fn post<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> Result<Value, ApiError> {
        self.send(self.request(Method::POST, segments)?.json(body)).await
    }

    async fn post_empty(&self, segments: &[&str]) -> Result<Value, ApiError> {
        self.send(self.request(Method::POST, segments)?).await
    }

    async fn delete(&self, segments: &[&str]) -> Result<Value, ApiError> {
        self.send(self.request(Method::DELETE, segments)?).await
    }

    // specialists

    pub async fn list_specialists(&self) -> Result<Value, ApiError> {
        self.get(&["specialists"]).await
    }

    pub async fn create_specialist(&self, specialist: &Value) -> Result<Value, ApiError> {
        self.post(&["specialists"], specialist).await
    }

    pub async fn update_specialist(&self, id: &str, specialist: &Value) -> Result<Value, ApiError> {
        self.send(self.request(Method::PUT, &["specialists", id])?.json(specialist))
            .await
    }

    pub async fn delete_specialist(&self, id: &str) -> Result<Value, ApiError> {
        self.delete(&["specialists", id]).await
    }

    pub async fn list_skills(&self) -> Result<Value, ApiError> {
        self.get(&["skills"]).await
    }

    pub async fn optimization_lessons(&self) -> Result<Value, ApiError> {
        self.get(&["optimization", "lessons"]).await
    }

    // menu and knowledge

    pub async fn list_menu(&self) -> Result<Vec<MenuItem>, ApiError> {
        self.send_as(self.request(Method::GET, &["menu"])?).await
    }

    pub async fn create_menu_item(&self, item: &MenuItem) -> Result<Value, ApiError> {
        self.post(&["menu"], item).await
    }

    pub async fn delete_menu_item(&self, id: &str) -> Result<Value, ApiError> {
        self.delete(&["menu", id]).await
    }

    pub async fn list_knowledge(&self) -> Result<Vec<KnowledgeItem>, ApiError> {
        self.send_as(self.request(Method::GET, &["knowledge"])?).await
    }

    pub async fn upload_knowledge(&self, file_name: &str, bytes: Vec<u8>) -> Result<Value, ApiError> {
        let part = Part::bytes(bytes).file_name(file_name.to_string());
        let form = Form::new().part("file", part);
        self.send(self.request(Method::POST, &["knowledge", "upload"])?.multipart(form))
            .await
    }

    pub async fn delete_knowledge(&self, id: &str) -> Result<Value, ApiError> {
        self.delete(&["knowledge", id]).await
    }

    // mcp

    pub async fn list_mcp_servers(&self) -> Result<Vec<McpServer>, ApiError> {
        self.send_as(self.request(Method::GET, &["mcp", "servers"])?).await
    }

    pub async fn delete_mcp_server(&self, id: &str) -> Result<Value, ApiError> {
        self.delete(&["mcp", "servers", id]).await
    }

    pub async fn connect_mcp(&self, name: &str, url: &str) -> Result<Value, ApiError> {
        self.post(&["mcp", "connect"], &json!({ "name": name, "url": url }))
            .await
    }

    /// Asks the backend to ping one server. The route is the contract this
    /// client expects; the backend may answer inline (`online`/`offline`) or
    /// with `processing` followed by `MCP_SERVER_STATUS`.
    pub async fn test_mcp_server(&self, id: &str) -> Result<Value, ApiError> {
        self.post_empty(&["mcp", "servers", id, "test"]).await
    }

    pub async fn sync_connector(&self, id: &str) -> Result<Value, ApiError> {
        self.post_empty(&["mcp", "connectors", id, "sync"]).await
    }

    pub async fn connector_logs(&self, id: &str) -> Result<Value, ApiError> {
        self.get(&["mcp", "connectors", id, "logs"]).await
    }

    // analytics

    pub async fn stats(&self) -> Result<DashboardStats, ApiError> {
        self.send_as(self.request(Method::GET, &["stats"])?).await
    }

    pub async fn analytics(&self) -> Result<Value, ApiError> {
        self.get(&["analytics"]).await
    }

    pub async fn drilldown(&self, scope: &str, id: &str) -> Result<Vec<DrillItem>, ApiError> {
        let request = self
            .request(Method::GET, &["analytics", "drilldown"])?
            .query(&[("scope", scope), ("id", id)]);
        self.send_as(request).await
    }

    pub async fn list_leads(&self) -> Result<Vec<Lead>, ApiError> {
        self.send_as(self.request(Method::GET, &["crm", "leads"])?).await
    }

    // conversations

    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
        attachments: &[Value],
    ) -> Result<Value, ApiError> {
        self.post(
            &["conversations", "message"],
            &json!({
                "conversation_id": conversation_id,
                "text": text,
                "attachments": attachments,
            }),
        )
        .await
    }

    pub async fn intervene(&self, conversation_id: &str, active: bool) -> Result<Value, ApiError> {
        self.post(
            &["conversations", "intervene"],
            &json!({ "conversation_id": conversation_id, "active": active }),
        )
        .await
    }

    pub async fn send_feedback(&self, feedback: &Feedback) -> Result<Value, ApiError> {
        self.post(&["conversations", "feedback"], feedback).await
    }

    // whatsapp

    pub async fn create_instance(&self, name: &str) -> Result<Value, ApiError> {
        self.post_empty(&["whatsapp", "instances", name, "create"]).await
    }

    pub async fn connect_instance(&self, name: &str) -> Result<Value, ApiError> {
        self.post_empty(&["whatsapp", "instances", name, "connect"]).await
    }

    pub async fn logout_instance(&self, name: &str) -> Result<Value, ApiError> {
        self.post_empty(&["whatsapp", "instances", name, "logout"]).await
    }

    pub async fn instance_qr(&self, name: &str) -> Result<Value, ApiError> {
        self.get(&["whatsapp", "instances", name, "qr"]).await
    }

    pub async fn instance_status(&self, name: &str) -> Result<Value, ApiError> {
        self.get(&["whatsapp", "instances", name, "status"]).await
    }

    pub async fn send_whatsapp(&self, instance: &str, to: &str, text: &str) -> Result<Value, ApiError> {
        self.post(
            &["whatsapp", "instances", instance, "send"],
            &json!({ "to": to, "text": text }),
        )
        .await
    }

    pub async fn generate_token(&self, session_id: &str, secret: &str) -> Result<Value, ApiError> {
        self.post(
            &["whatsapp", "token"],
            &json!({ "session_id": session_id, "secret": secret }),
        )
        .await
    }

    pub async fn regenerate_token(&self, session_id: &str) -> Result<Value, ApiError> {
        self.post_empty(&["whatsapp", "sessions", session_id, "regenerate-token"])
            .await
    }

    // alerts, reports, prompts, database

    pub async fn compile_trigger(&self, description: &str) -> Result<Value, ApiError> {
        self.post(&["alerts", "compile"], &json!({ "description": description }))
            .await
    }

    pub async fn trigger_alert(&self, alert: &Value) -> Result<Value, ApiError> {
        self.post(&["alerts", "trigger"], alert).await
    }

    pub async fn delete_report(&self, id: &str) -> Result<Value, ApiError> {
        self.delete(&["reports", id]).await
    }

    pub async fn apply_ai_suggestion(&self, id: &str) -> Result<Value, ApiError> {
        self.post_empty(&["reports", "ai-suggestion", id]).await
    }

    /// Returns the `refined_prompt` field of the response.
    pub async fn refine_prompt(&self, prompt: &str) -> Result<String, ApiError> {
        let body = self
            .post(&["prompts", "refine"], &json!({ "prompt": prompt }))
            .await?;
        body.get("refined_prompt")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode("missing refined_prompt".to_string()))
    }

    pub async fn generate_table(&self, description: &str) -> Result<Value, ApiError> {
        self.post(
            &["database", "generate-table"],
            &json!({ "description": description }),
        )
        .await
    }

    // ai helpers

    pub async fn assist(&self, task: AssistTask, body: &Value) -> Result<Value, ApiError> {
        self.post(&["ai", task.path()], body).await
    }

    pub async fn save_llm_config(&self, config: &Value) -> Result<Value, ApiError> {
        self.post(&["llm", "config"], config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(Url::parse(base).expect("base"), Duration::from_secs(5)).expect("client")
    }

    #[test]
    fn endpoint_joins_and_encodes_segments() {
        let api = client("http://localhost:8000/api");
        let url = api
            .endpoint(&["whatsapp", "instances", "Bella Napoli/Main", "connect"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/whatsapp/instances/Bella%20Napoli%2FMain/connect"
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash_on_base() {
        let api = client("http://localhost:8000/api/");
        let url = api.endpoint(&["mcp", "servers", "7", "test"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8000/api/mcp/servers/7/test");
    }

    #[test]
    fn assist_paths_are_kebab_case() {
        assert_eq!(AssistTask::EstimateMetrics.path(), "estimate-metrics");
        assert_eq!(AssistTask::BanRisk.path(), "ban-risk");
        assert_eq!(AssistTask::PredictIntent.path(), "predict-intent");
    }
}
