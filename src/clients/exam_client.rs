/// 考试服务 API 客户端
///
/// 封装所有与考试服务 REST API 相关的调用逻辑
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::clients::exam_api::{AuthoringApi, ContentApi, SessionApi};
use crate::config::Config;
use crate::error::{AppError, AppResult, ConfigError};
use crate::models::{EntityId, Part, PartContentEnvelope, PartContentResponse, QuestionRecord, SessionIds};

/// 考试服务客户端
#[derive(Clone)]
pub struct ExamClient {
    http: Client,
    base_url: String,
    token: String,
}

impl ExamClient {
    /// 创建新的客户端
    pub fn new(config: &Config) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClientBuildFailed { source: Box::new(e) })?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
        })
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, endpoint);
        let builder = self
            .http
            .request(method, url)
            .header("Accept", "application/json, text/plain, */*");

        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    /// 发送请求并检查状态码
    async fn send(&self, endpoint: &str, builder: RequestBuilder) -> AppResult<Response> {
        debug!("请求 {}", endpoint);

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.ok().filter(|s| !s.is_empty());
        Err(AppError::api_bad_response(endpoint, status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(&self, endpoint: &str, builder: RequestBuilder) -> AppResult<T> {
        let response = self.send(endpoint, builder).await?;
        let body = response
            .text()
            .await
            .map_err(|e| AppError::api_request_failed(endpoint, e))?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ContentApi for ExamClient {
    async fn get_part_content(&self, part_id: EntityId) -> AppResult<PartContentResponse> {
        let endpoint = format!("parts/{}/content", part_id);
        self.send_json(&endpoint, self.request(Method::GET, &endpoint)).await
    }

    async fn get_all_parts(&self, section_id: EntityId) -> AppResult<Vec<Part>> {
        let endpoint = format!("sections/{}/parts", section_id);
        let mut parts: Vec<Part> = self
            .send_json(&endpoint, self.request(Method::GET, &endpoint))
            .await?;
        parts.sort_by_key(|p| p.ord);
        Ok(parts)
    }
}

#[async_trait]
impl AuthoringApi for ExamClient {
    async fn save_part_content(&self, part_id: EntityId, envelope: &PartContentEnvelope) -> AppResult<()> {
        let endpoint = format!("parts/{}/content", part_id);
        self.send(&endpoint, self.request(Method::PUT, &endpoint).json(envelope))
            .await?;
        Ok(())
    }

    async fn get_all_questions(&self, section_id: EntityId) -> AppResult<Vec<QuestionRecord>> {
        let endpoint = format!("sections/{}/questions", section_id);
        self.send_json(&endpoint, self.request(Method::GET, &endpoint)).await
    }

    async fn create_or_update_question(
        &self,
        section_id: EntityId,
        part_id: EntityId,
        ord: u32,
        answers: &[String],
    ) -> AppResult<()> {
        let endpoint = format!("sections/{}/questions", section_id);
        let body = json!({
            "partId": part_id,
            "ord": ord,
            "answers": answers,
        });
        self.send(&endpoint, self.request(Method::POST, &endpoint).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_question(&self, question_id: EntityId) -> AppResult<()> {
        let endpoint = format!("questions/{}", question_id);
        self.send(&endpoint, self.request(Method::DELETE, &endpoint))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionApi for ExamClient {
    async fn send_answer(&self, ids: SessionIds, question_ord: u32, answer: &str) -> AppResult<()> {
        let endpoint = format!("mocks/{}/sections/{}/answers", ids.mock_id, ids.section_id);
        let body = json!({
            "questionOrd": question_ord,
            "answer": answer,
        });
        self.send(&endpoint, self.request(Method::POST, &endpoint).json(&body))
            .await?;
        Ok(())
    }

    async fn finish_section(&self, ids: SessionIds) -> AppResult<()> {
        let endpoint = format!("mocks/{}/sections/{}/finish", ids.mock_id, ids.section_id);
        self.send(&endpoint, self.request(Method::POST, &endpoint))
            .await?;
        Ok(())
    }
}
