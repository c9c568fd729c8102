use serde_json::Value;
use snafu::Snafu;

/// Default bound for error text surfaced to users.
pub const DEFAULT_ERROR_EXCERPT_LIMIT: usize = 200;

const ERROR_MESSAGE_KEYS: [&str; 3] = ["detail", "message", "error"];

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("base URL must not be empty"))]
    MissingBaseUrl { stage: &'static str },
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("transport failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("server returned status {status}: {message}"))]
    Server {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("server reported a failure: {message}"))]
    Logical {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("unexpected response body on `{stage}`: {source}"))]
    MalformedBody {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("request was cancelled"))]
    Cancelled { stage: &'static str },
}

/// Coarse failure taxonomy shared by every API operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// Network or connection failure; no response was read.
    Transport,
    /// Non-2xx response.
    Server,
    /// 2xx response whose body signals failure or cannot be decoded.
    Logical,
    /// The caller withdrew the request. Not a failure.
    Cancelled,
}

impl ApiError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::MissingBaseUrl { .. } | Self::BuildClient { .. } | Self::Transport { .. } => {
                ApiErrorKind::Transport
            }
            Self::Server { .. } => ApiErrorKind::Server,
            Self::Logical { .. } | Self::MalformedBody { .. } => ApiErrorKind::Logical,
            Self::Cancelled { .. } => ApiErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ApiErrorKind::Cancelled
    }

    /// HTTP status for server errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingBaseUrl { stage }
            | Self::BuildClient { stage, .. }
            | Self::Transport { stage, .. }
            | Self::Server { stage, .. }
            | Self::Logical { stage, .. }
            | Self::MalformedBody { stage, .. }
            | Self::Cancelled { stage } => *stage,
        }
    }

    /// Message suitable for showing to a user, bounded to `limit` characters.
    ///
    /// Server and logical errors expose only the text extracted from the
    /// response body. Other variants get a fixed sentence; stage tags stay in
    /// the logs.
    pub fn user_message(&self, limit: usize) -> String {
        let message = match self {
            Self::Server { message, .. } | Self::Logical { message, .. } => message.clone(),
            Self::MissingBaseUrl { .. } => {
                "The document service address is not configured.".to_string()
            }
            Self::BuildClient { source, .. } | Self::Transport { source, .. } => {
                format!("Could not reach the document service: {source}")
            }
            Self::MalformedBody { .. } => {
                "The document service sent a response that could not be read.".to_string()
            }
            Self::Cancelled { .. } => "The request was cancelled.".to_string(),
        };
        truncate_chars(&message, limit)
    }
}

/// Pulls a human-readable message out of an error response body.
///
/// Structured bodies are searched for `detail`, then `message`, then `error`.
/// Anything else is treated as raw text. The result never exceeds `limit`
/// characters, ellipsis included.
pub fn extract_error_message(body: &str, status: u16, limit: usize) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && let Some(message) = structured_message(&value)
    {
        return truncate_chars(&message, limit);
    }

    let raw = body.trim();
    if raw.is_empty() {
        return format!("HTTP {status}");
    }

    truncate_chars(raw, limit)
}

fn structured_message(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    ERROR_MESSAGE_KEYS.iter().find_map(|key| match object.get(*key)? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.trim().to_string()),
        // FastAPI validation errors put a list under `detail`.
        other => Some(other.to_string()),
    })
}

/// Truncates on a character boundary to at most `limit` characters, ending
/// the cut text with `…`.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().nth(limit).is_none() {
        return text.to_string();
    }
    if limit == 0 {
        return String::new();
    }

    let cut = text
        .char_indices()
        .nth(limit - 1)
        .map_or(text.len(), |(index, _)| index);
    format!("{}…", &text[..cut])
}
