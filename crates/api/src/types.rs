use std::num::NonZeroU32;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const PDF_MIME: &str = "application/pdf";
pub const OCTET_STREAM_MIME: &str = "application/octet-stream";

const UPLOAD_STATUS_ERROR: &str = "error";

/// One named file blob destined for `POST /upload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk, naming it after the last path component.
    pub async fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self { name, bytes })
    }

    pub fn mime_type(&self) -> &'static str {
        if self.name.to_ascii_lowercase().ends_with(".pdf") {
            PDF_MIME
        } else {
            OCTET_STREAM_MIME
        }
    }
}

/// Body of a 2xx `POST /upload` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UploadAck {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadAck {
    /// True when the server signalled a logical failure despite a 2xx status.
    pub fn is_error(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|status| status.trim().eq_ignore_ascii_case(UPLOAD_STATUS_ERROR))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

/// A pointer into a source document backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    /// 1-based page number; a zero page fails to decode.
    pub page: NonZeroU32,
    pub score: f64,
    #[serde(rename = "text")]
    pub excerpt: String,
}

impl Citation {
    pub fn new(
        source: impl Into<String>,
        page: NonZeroU32,
        score: f64,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            page,
            score,
            excerpt: excerpt.into(),
        }
    }

    /// Compact chip label, e.g. `bhagavad-gita.pdf` page 3 becomes `BG: P.3`.
    pub fn short_label(&self) -> String {
        let stem = self.source.trim().trim_end_matches(".pdf");
        let abbreviation = stem
            .split('-')
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .collect::<String>();

        if abbreviation.is_empty() {
            format!("P.{}", self.page)
        } else {
            format!("{abbreviation}: P.{}", self.page)
        }
    }
}

/// Body of a 2xx `POST /chat` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub filename: String,
    #[serde(default)]
    pub size_mb: f64,
}

/// Body of `GET /list-documents`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentListing {
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
    #[serde(default)]
    pub total: usize,
}

impl DocumentListing {
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.documents.iter().map(|entry| entry.filename.as_str())
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}
