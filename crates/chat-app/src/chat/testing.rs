use std::collections::VecDeque;
use std::sync::Mutex;

use url::Url;
use vqa_backend::{
    BackendError, BackendResult, BoxFuture, ChatAnswer, ChatBackend, ChatRequest,
    ProcessImageRequest, ProcessedImage, ProcessingMode, RemoteMessage, VqaAnswer, VqaRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    FetchHistory,
    Ask(ChatRequest),
    ProcessImage {
        file_name: String,
        mode: ProcessingMode,
        instruction: String,
    },
    AskAboutImage {
        question: String,
        file_name: Option<String>,
    },
    Clear,
}

/// Scripted backend. Unscripted calls fail with a bare 500.
pub(crate) struct FakeBackend {
    base_url: Url,
    calls: Mutex<Vec<Call>>,
    history: Mutex<VecDeque<BackendResult<Vec<RemoteMessage>>>>,
    answers: Mutex<VecDeque<BackendResult<ChatAnswer>>>,
    processed: Mutex<VecDeque<BackendResult<ProcessedImage>>>,
    vqa: Mutex<VecDeque<BackendResult<VqaAnswer>>>,
    clears: Mutex<VecDeque<BackendResult<()>>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            base_url: Url::parse("http://localhost:8000/").unwrap(),
            calls: Mutex::default(),
            history: Mutex::default(),
            answers: Mutex::default(),
            processed: Mutex::default(),
            vqa: Mutex::default(),
            clears: Mutex::default(),
        }
    }

    pub(crate) fn with_history(self, result: BackendResult<Vec<RemoteMessage>>) -> Self {
        self.history.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn with_answer(self, result: BackendResult<ChatAnswer>) -> Self {
        self.answers.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn with_processed(self, result: BackendResult<ProcessedImage>) -> Self {
        self.processed.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn with_vqa(self, result: BackendResult<VqaAnswer>) -> Self {
        self.vqa.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn with_clear(self, result: BackendResult<()>) -> Self {
        self.clears.lock().unwrap().push_back(result);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn next<T>(script: &Mutex<VecDeque<BackendResult<T>>>, stage: &'static str) -> BackendResult<T> {
    script
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err(unscripted(stage)))
}

fn unscripted(stage: &'static str) -> BackendError {
    BackendError::Status {
        stage,
        endpoint: "fake://unscripted".to_string(),
        status: 500,
        detail: None,
        body: String::new(),
    }
}

pub(crate) fn status_error(status: u16, detail: Option<&str>) -> BackendError {
    BackendError::Status {
        stage: "fake-status",
        endpoint: "fake://endpoint".to_string(),
        status,
        detail: detail.map(str::to_string),
        body: String::new(),
    }
}

/// A failure that carries no user-facing detail.
pub(crate) fn decode_error() -> BackendError {
    BackendError::DecodeResponse {
        stage: "fake-decode",
        endpoint: "fake://endpoint".to_string(),
        source: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
    }
}

impl ChatBackend for FakeBackend {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn fetch_history<'a>(&'a self) -> BoxFuture<'a, BackendResult<Vec<RemoteMessage>>> {
        self.record(Call::FetchHistory);
        let result = next(&self.history, "fake-fetch-history");
        Box::pin(async move { result })
    }

    fn ask<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, BackendResult<ChatAnswer>> {
        self.record(Call::Ask(request));
        let result = next(&self.answers, "fake-ask");
        Box::pin(async move { result })
    }

    fn process_image<'a>(
        &'a self,
        request: ProcessImageRequest,
    ) -> BoxFuture<'a, BackendResult<ProcessedImage>> {
        self.record(Call::ProcessImage {
            file_name: request.image.file_name,
            mode: request.mode,
            instruction: request.instruction,
        });
        let result = next(&self.processed, "fake-process-image");
        Box::pin(async move { result })
    }

    fn ask_about_image<'a>(&'a self, request: VqaRequest) -> BoxFuture<'a, BackendResult<VqaAnswer>> {
        self.record(Call::AskAboutImage {
            question: request.question,
            file_name: request.image.map(|image| image.file_name),
        });
        let result = next(&self.vqa, "fake-ask-about-image");
        Box::pin(async move { result })
    }

    fn clear_history<'a>(&'a self) -> BoxFuture<'a, BackendResult<()>> {
        self.record(Call::Clear);
        let result = next(&self.clears, "fake-clear");
        Box::pin(async move { result })
    }
}
