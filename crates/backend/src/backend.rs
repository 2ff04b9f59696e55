use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use url::Url;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Route used to wipe server-side history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearRoute {
    /// `DELETE /messages`
    #[default]
    Messages,
    /// `DELETE /clear`
    Clear,
}

impl ClearRoute {
    pub fn path(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub clear_route: ClearRoute,
    pub request_timeout: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_URL)
    }
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim().to_string(),
            clear_route: ClearRoute::default(),
            request_timeout: None,
        }
    }

    pub fn with_clear_route(mut self, clear_route: ClearRoute) -> Self {
        self.clear_route = clear_route;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Backend-side message role, kept apart from the session's own role enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteRole {
    User,
    Assistant,
}

/// One history entry as reported by `GET /messages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub role: RemoteRole,
    pub content: String,
    pub image: Option<String>,
}

/// How the backend should treat an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Auto,
    Manual,
}

impl ProcessingMode {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// Image bytes handed to the backend. Ownership moves with the upload.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ImageUpload {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size_bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub question: String,
    pub enable_search: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessImageRequest {
    pub image: ImageUpload,
    pub mode: ProcessingMode,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessedImage {
    pub image_url: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VqaRequest {
    pub question: String,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VqaAnswer {
    pub answer: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("backend URL '{base_url}' is invalid on `{stage}`: {source}"))]
    InvalidBaseUrl {
        stage: &'static str,
        base_url: String,
        source: url::ParseError,
    },
    #[snafu(display("backend URL '{base_url}' cannot carry a path"))]
    OpaqueBaseUrl {
        stage: &'static str,
        base_url: String,
    },
    #[snafu(display("failed to build endpoint '{path}' on `{stage}`: {source}"))]
    InvalidEndpoint {
        stage: &'static str,
        path: &'static str,
        source: url::ParseError,
    },
    #[snafu(display("failed to build HTTP client on `{stage}`: {source}"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to attach multipart field '{field}' on `{stage}`: {source}"))]
    BuildMultipart {
        stage: &'static str,
        field: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {endpoint} failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} for {endpoint}: {body}"))]
    Status {
        stage: &'static str,
        endpoint: String,
        status: u16,
        detail: Option<String>,
        body: String,
    },
    #[snafu(display("failed to decode response from {endpoint} on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        endpoint: String,
        source: serde_json::Error,
    },
}

impl BackendError {
    /// Human-readable failure detail suitable for showing in the conversation.
    ///
    /// Only backend-reported failures carry one; everything else gets the generic text.
    pub fn user_detail(&self) -> Option<String> {
        match self {
            Self::Status { detail, body, .. } => {
                detail.clone().or_else(|| plain_text_detail(body))
            }
            _ => None,
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidBaseUrl { stage, .. }
            | Self::OpaqueBaseUrl { stage, .. }
            | Self::InvalidEndpoint { stage, .. }
            | Self::BuildHttpClient { stage, .. }
            | Self::BuildMultipart { stage, .. }
            | Self::Transport { stage, .. }
            | Self::Status { stage, .. }
            | Self::DecodeResponse { stage, .. } => *stage,
        }
    }
}

/// Longest raw error body shown to the user when the backend sends no structured detail.
const MAX_PLAIN_DETAIL_CHARS: usize = 200;

/// A raw body is only worth showing when it is a short single line of text, not markup.
fn plain_text_detail(body: &str) -> Option<String> {
    let body = body.trim();
    let plain = !body.is_empty()
        && !body.starts_with('<')
        && !body.contains('\n')
        && body.chars().count() <= MAX_PLAIN_DETAIL_CHARS;
    plain.then(|| body.to_string())
}

/// Remote operations the chat session depends on.
pub trait ChatBackend: Send + Sync {
    /// Base origin used to resolve relative image references.
    fn base_url(&self) -> &Url;
    fn fetch_history<'a>(&'a self) -> BoxFuture<'a, BackendResult<Vec<RemoteMessage>>>;
    fn ask<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, BackendResult<ChatAnswer>>;
    fn process_image<'a>(
        &'a self,
        request: ProcessImageRequest,
    ) -> BoxFuture<'a, BackendResult<ProcessedImage>>;
    fn ask_about_image<'a>(&'a self, request: VqaRequest) -> BoxFuture<'a, BackendResult<VqaAnswer>>;
    fn clear_history<'a>(&'a self) -> BoxFuture<'a, BackendResult<()>>;
}

/// Resolves an image reference returned by the backend.
///
/// Absolute `http(s)` URLs pass through. Anything else stays on the origin of `base_url`:
/// rooted references resolve from the origin root, the rest from the base path.
pub fn resolve_image_url(base_url: &Url, reference: &str) -> String {
    let reference = reference.trim();
    let lowered = reference.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return reference.to_string();
    }

    // `//host/x` and `\\host/x` would otherwise replace the authority; `x:y` the scheme.
    let path = reference.trim_start_matches(['/', '\\']);
    let anchored = if path.len() < reference.len() {
        format!("/{path}")
    } else {
        format!("./{path}")
    };

    match base_url.join(&anchored) {
        Ok(resolved) => resolved.to_string(),
        Err(error) => {
            tracing::warn!(
                base_url = %base_url,
                reference,
                error = %error,
                "failed to resolve image reference; using the backend origin"
            );
            base_url.to_string()
        }
    }
}

/// Parses a configured base URL, forcing a trailing slash so endpoint joins keep its path.
pub fn parse_base_url(raw: &str) -> BackendResult<Url> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed).context(InvalidBaseUrlSnafu {
        stage: "parse-base-url",
        base_url: trimmed.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return OpaqueBaseUrlSnafu {
            stage: "parse-base-url",
            base_url: trimmed.to_string(),
        }
        .fail();
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
