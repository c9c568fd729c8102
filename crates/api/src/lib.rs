//! Client for the remote document Q&A service.
//!
//! Every operation resolves to [`ApiResult`]; failures are classified by
//! [`ApiErrorKind`] so callers can tell a user-initiated cancel apart from
//! transport, server, and logical failures.

mod cancel;
mod client;
mod error;
mod types;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use client::{BoxFuture, ClientConfig, DEFAULT_BASE_URL, DocumentApi, HttpDocumentApi};
pub use error::{
    ApiError, ApiErrorKind, ApiResult, DEFAULT_ERROR_EXCERPT_LIMIT, extract_error_message,
    truncate_chars,
};
pub use types::{
    ChatAnswer, ChatRequest, Citation, DocumentEntry, DocumentListing, HealthStatus,
    OCTET_STREAM_MIME, PDF_MIME, UploadAck, UploadFile,
};
