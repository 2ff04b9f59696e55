use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use url::Url;

use super::backend::{
    BackendConfig, BackendError, BackendResult, BoxFuture, BuildHttpClientSnafu,
    BuildMultipartSnafu, ChatAnswer, ChatBackend, ChatRequest, DecodeResponseSnafu, ImageUpload,
    InvalidEndpointSnafu, ProcessImageRequest, ProcessedImage, RemoteMessage, TransportSnafu,
    VqaAnswer, VqaRequest, parse_base_url,
};
use super::wire::{decode_history, error_detail};

const MESSAGES_PATH: &str = "messages";
const CHAT_PATH: &str = "chat";
const PROCESS_IMAGE_PATH: &str = "process-image";
const VQA_PATH: &str = "vqa";

/// `reqwest`-backed client for the VQA backend.
///
/// Every call is a single attempt; failures are returned to the caller untouched.
pub struct HttpBackend {
    config: BackendConfig,
    base_url: Url,
    client: Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> BackendResult<Self> {
        let base_url = parse_base_url(&config.base_url)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context(BuildHttpClientSnafu {
            stage: "http-backend-new",
        })?;

        Ok(Self {
            config,
            base_url,
            client,
        })
    }

    fn endpoint(&self, path: &'static str, stage: &'static str) -> BackendResult<Url> {
        self.base_url
            .join(path)
            .context(InvalidEndpointSnafu { stage, path })
    }

    async fn send(
        &self,
        stage: &'static str,
        endpoint: &Url,
        request: RequestBuilder,
    ) -> BackendResult<String> {
        tracing::info!(stage, endpoint = %endpoint, "issuing backend request");

        let response = request.send().await.context(TransportSnafu {
            stage,
            endpoint: endpoint.to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.context(TransportSnafu {
            stage,
            endpoint: endpoint.to_string(),
        })?;

        if !status.is_success() {
            let detail = error_detail(&body);
            tracing::warn!(
                stage,
                endpoint = %endpoint,
                status = status.as_u16(),
                detail = detail.as_deref().unwrap_or(""),
                "backend rejected request"
            );
            return Err(BackendError::Status {
                stage,
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                detail,
                body,
            });
        }

        tracing::debug!(
            stage,
            endpoint = %endpoint,
            status = status.as_u16(),
            body_len = body.len(),
            "backend request settled"
        );
        Ok(body)
    }

    async fn send_json<T>(
        &self,
        stage: &'static str,
        endpoint: &Url,
        request: RequestBuilder,
    ) -> BackendResult<T>
    where
        T: DeserializeOwned,
    {
        let body = self.send(stage, endpoint, request).await?;
        serde_json::from_str(&body).context(DecodeResponseSnafu {
            stage,
            endpoint: endpoint.to_string(),
        })
    }

    fn image_part(image: ImageUpload, stage: &'static str) -> BackendResult<Part> {
        Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&image.mime_type)
            .context(BuildMultipartSnafu {
                stage,
                field: "image",
            })
    }

    async fn fetch_history_inner(&self) -> BackendResult<Vec<RemoteMessage>> {
        let stage = "fetch-history";
        let endpoint = self.endpoint(MESSAGES_PATH, stage)?;
        let request = self.client.get(endpoint.clone());
        let body = self.send(stage, &endpoint, request).await?;

        decode_history(&body).context(DecodeResponseSnafu {
            stage,
            endpoint: endpoint.to_string(),
        })
    }

    async fn ask_inner(&self, request: ChatRequest) -> BackendResult<ChatAnswer> {
        let stage = "ask";
        let endpoint = self.endpoint(CHAT_PATH, stage)?;
        let builder = self.client.post(endpoint.clone()).json(&request);
        self.send_json(stage, &endpoint, builder).await
    }

    async fn process_image_inner(
        &self,
        request: ProcessImageRequest,
    ) -> BackendResult<ProcessedImage> {
        let stage = "process-image";
        let endpoint = self.endpoint(PROCESS_IMAGE_PATH, stage)?;
        let form = Form::new()
            .part("image", Self::image_part(request.image, stage)?)
            .text("mode", request.mode.as_wire())
            .text("instruction", request.instruction);

        let builder = self.client.post(endpoint.clone()).multipart(form);
        self.send_json(stage, &endpoint, builder).await
    }

    async fn ask_about_image_inner(&self, request: VqaRequest) -> BackendResult<VqaAnswer> {
        let stage = "ask-about-image";
        let endpoint = self.endpoint(VQA_PATH, stage)?;
        let mut form = Form::new().text("question", request.question);
        if let Some(image) = request.image {
            form = form.part("image", Self::image_part(image, stage)?);
        }

        let builder = self.client.post(endpoint.clone()).multipart(form);
        self.send_json(stage, &endpoint, builder).await
    }

    async fn clear_history_inner(&self) -> BackendResult<()> {
        let stage = "clear-history";
        let endpoint = self.endpoint(self.config.clear_route.path(), stage)?;
        let request = self.client.delete(endpoint.clone());
        // The acknowledgement body varies across backends; only the status matters.
        self.send(stage, &endpoint, request).await.map(|_| ())
    }
}

impl ChatBackend for HttpBackend {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn fetch_history<'a>(&'a self) -> BoxFuture<'a, BackendResult<Vec<RemoteMessage>>> {
        Box::pin(self.fetch_history_inner())
    }

    fn ask<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, BackendResult<ChatAnswer>> {
        Box::pin(self.ask_inner(request))
    }

    fn process_image<'a>(
        &'a self,
        request: ProcessImageRequest,
    ) -> BoxFuture<'a, BackendResult<ProcessedImage>> {
        Box::pin(self.process_image_inner(request))
    }

    fn ask_about_image<'a>(&'a self, request: VqaRequest) -> BoxFuture<'a, BackendResult<VqaAnswer>> {
        Box::pin(self.ask_about_image_inner(request))
    }

    fn clear_history<'a>(&'a self) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(self.clear_history_inner())
    }
}
