use std::sync::Arc;

mod backend;
mod http;
mod wire;

pub use backend::{
    BackendConfig, BackendError, BackendResult, BoxFuture, ChatAnswer, ChatBackend, ChatRequest,
    ClearRoute, DEFAULT_BACKEND_URL, ImageUpload, ProcessImageRequest, ProcessedImage,
    ProcessingMode, RemoteMessage, RemoteRole, VqaAnswer, VqaRequest, parse_base_url,
    resolve_image_url,
};
pub use http::HttpBackend;

pub fn create_backend(config: BackendConfig) -> BackendResult<Arc<dyn ChatBackend>> {
    tracing::debug!(
        base_url = %config.base_url,
        clear_route = config.clear_route.path(),
        "creating HTTP backend"
    );
    Ok(Arc::new(HttpBackend::new(config)?))
}
