use std::future::Future;
use std::pin::Pin;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use snafu::{ResultExt, ensure};

use super::cancel::CancelSignal;
use super::error::{
    ApiError, ApiResult, BuildClientSnafu, CancelledSnafu, DEFAULT_ERROR_EXCERPT_LIMIT,
    LogicalSnafu, MalformedBodySnafu, MissingBaseUrlSnafu, TransportSnafu, extract_error_message,
    truncate_chars,
};
use super::types::{
    ChatAnswer, ChatRequest, DocumentListing, HealthStatus, UploadAck, UploadFile,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

const UPLOAD_FIELD: &str = "files";
const UPLOAD_PATH: &str = "/upload";
const CHAT_PATH: &str = "/chat";
const LIST_DOCUMENTS_PATH: &str = "/list-documents";
const HEALTH_PATH: &str = "/health";

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub error_excerpt_limit: usize,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            error_excerpt_limit: DEFAULT_ERROR_EXCERPT_LIMIT,
        }
    }

    pub fn with_error_excerpt_limit(mut self, limit: usize) -> Self {
        self.error_excerpt_limit = limit;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Remote document Q&A service.
///
/// Futures borrow the API object; callers that need `'static` work hold the
/// implementation in an `Arc` and move a clone into the task.
pub trait DocumentApi: Send + Sync {
    /// Sends every file in one multipart batch.
    fn upload<'a>(&'a self, files: Vec<UploadFile>) -> BoxFuture<'a, ApiResult<UploadAck>>;
    /// Asks one question. Resolves to `ApiError::Cancelled` if `cancel` fires first.
    fn chat<'a>(
        &'a self,
        question: String,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, ApiResult<ChatAnswer>>;
    fn list_documents<'a>(&'a self) -> BoxFuture<'a, ApiResult<DocumentListing>>;
    fn health<'a>(&'a self) -> BoxFuture<'a, ApiResult<HealthStatus>>;
}

pub struct HttpDocumentApi {
    config: ClientConfig,
    http: reqwest::Client,
}

impl HttpDocumentApi {
    pub fn new(config: ClientConfig) -> ApiResult<Self> {
        ensure!(
            !config.base_url.is_empty(),
            MissingBaseUrlSnafu {
                stage: "http-api-new",
            }
        );

        let http = reqwest::Client::builder()
            .build()
            .context(BuildClientSnafu {
                stage: "build-client",
            })?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn build_upload_form(files: Vec<UploadFile>) -> ApiResult<Form> {
        let mut form = Form::new();
        for file in files {
            let mime = file.mime_type();
            let part = Part::bytes(file.bytes)
                .file_name(file.name)
                .mime_str(mime)
                .context(TransportSnafu {
                    stage: "build-upload-part",
                })?;
            form = form.part(UPLOAD_FIELD, part);
        }
        Ok(form)
    }

    /// Reads the body and turns non-2xx statuses into `ApiError::Server`.
    async fn read_success_body(
        &self,
        response: reqwest::Response,
        stage: &'static str,
    ) -> ApiResult<String> {
        let status = response.status();
        let body = response.text().await.context(TransportSnafu { stage })?;

        if !status.is_success() {
            let message =
                extract_error_message(&body, status.as_u16(), self.config.error_excerpt_limit);
            tracing::warn!(
                stage,
                status = status.as_u16(),
                error = %message,
                "document service returned an error status"
            );
            return Err(ApiError::Server {
                stage,
                status: status.as_u16(),
                message,
            });
        }

        Ok(body)
    }

    fn decode<T: DeserializeOwned>(body: &str, stage: &'static str) -> ApiResult<T> {
        serde_json::from_str(body).context(MalformedBodySnafu { stage })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &'static str,
        stage: &'static str,
    ) -> ApiResult<T> {
        let response = self
            .http
            .get(self.endpoint(path))
            .send()
            .await
            .context(TransportSnafu { stage })?;
        let body = self.read_success_body(response, stage).await?;
        Self::decode(&body, stage)
    }

    async fn send_upload(&self, files: Vec<UploadFile>) -> ApiResult<UploadAck> {
        let file_count = files.len();
        let form = Self::build_upload_form(files)?;

        tracing::debug!(file_count, "sending upload batch");
        let response = self
            .http
            .post(self.endpoint(UPLOAD_PATH))
            .multipart(form)
            .send()
            .await
            .context(TransportSnafu {
                stage: "send-upload",
            })?;
        let body = self.read_success_body(response, "upload-status").await?;
        let ack: UploadAck = Self::decode(&body, "decode-upload")?;

        if ack.is_error() {
            let message = ack
                .message
                .as_deref()
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .unwrap_or("upload failed");
            tracing::warn!(file_count, error = %message, "upload rejected by server");
            return LogicalSnafu {
                stage: "upload-logical-status",
                message: truncate_chars(message, self.config.error_excerpt_limit),
            }
            .fail();
        }

        tracing::info!(file_count, "upload batch accepted");
        Ok(ack)
    }

    async fn send_chat(&self, question: String) -> ApiResult<ChatAnswer> {
        let response = self
            .http
            .post(self.endpoint(CHAT_PATH))
            .json(&ChatRequest { question })
            .send()
            .await
            .context(TransportSnafu { stage: "send-chat" })?;
        let body = self.read_success_body(response, "chat-status").await?;
        Self::decode(&body, "decode-chat")
    }
}

impl DocumentApi for HttpDocumentApi {
    fn upload<'a>(&'a self, files: Vec<UploadFile>) -> BoxFuture<'a, ApiResult<UploadAck>> {
        Box::pin(self.send_upload(files))
    }

    fn chat<'a>(
        &'a self,
        question: String,
        mut cancel: CancelSignal,
    ) -> BoxFuture<'a, ApiResult<ChatAnswer>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return CancelledSnafu {
                    stage: "chat-before-send",
                }
                .fail();
            }

            tokio::select! {
                // Cancellation wins ties; dropping the exchange future aborts the connection.
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("chat request cancelled");
                    CancelledSnafu { stage: "chat" }.fail()
                }
                result = self.send_chat(question) => result,
            }
        })
    }

    fn list_documents<'a>(&'a self) -> BoxFuture<'a, ApiResult<DocumentListing>> {
        Box::pin(self.get_json(LIST_DOCUMENTS_PATH, "list-documents"))
    }

    fn health<'a>(&'a self) -> BoxFuture<'a, ApiResult<HealthStatus>> {
        Box::pin(self.get_json(HEALTH_PATH, "health"))
    }
}
