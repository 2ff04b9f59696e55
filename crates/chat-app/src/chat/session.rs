use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vqa_backend::{
    BackendError, BackendResult, ChatAnswer, ChatBackend, ChatRequest, ProcessImageRequest,
    ProcessedImage, ProcessingMode, VqaAnswer, VqaRequest, resolve_image_url,
};
use vqa_storage::{HISTORY_CACHE_KEY, KeyValueStore};

use crate::chat::draft::{Draft, SelectedImage};
use crate::chat::events::{
    ActionOutcome, ClearOutcome, HistorySource, HydrationOutcome, IgnoredReason, Indicators,
};
use crate::chat::message::{
    Conversation, DisplayMode, Message, PendingRequest, RequestId, RequestKind, RequestState,
    RequestTransition, RequestTransitionRejection,
};

pub const GENERIC_ERROR_MESSAGE: &str = "Error: the request could not be completed.";

/// What to do with local history when the backend clear fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearPolicy {
    /// Local history is authoritative for display and is always emptied.
    #[default]
    Always,
    /// Local history is only emptied once the backend confirms.
    Confirm,
}

/// Ticket for an outstanding `POST /chat`.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PendingQuestion {
    request: PendingRequest,
}

/// Ticket for an outstanding `POST /process-image`.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PendingImage {
    request: PendingRequest,
    file_name: String,
    mode: ProcessingMode,
}

/// Ticket for an outstanding `POST /vqa`.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PendingImageQuestion {
    request: PendingRequest,
    question: String,
}

/// Ticket for an outstanding history clear.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct PendingClear {
    request: PendingRequest,
}

macro_rules! impl_ticket_request {
    ($($ticket:ident),+ $(,)?) => {
        $(
            impl $ticket {
                pub fn request(&self) -> PendingRequest {
                    self.request
                }
            }
        )+
    };
}

impl_ticket_request!(PendingQuestion, PendingImage, PendingImageQuestion, PendingClear);

/// Owns one conversation, its draft input, and the display preference.
///
/// Request-bearing actions come in two phases: `begin_*` validates, applies the optimistic
/// update and returns a ticket plus the request payload; `resolve_*` consumes the ticket and
/// the backend result. The `async` convenience methods run both phases around one backend call.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    cache: Option<Arc<dyn KeyValueStore>>,
    conversation: Conversation,
    draft: Draft,
    display_mode: DisplayMode,
    clear_policy: ClearPolicy,
    next_request_id: u64,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            cache: None,
            conversation: Conversation::new(),
            draft: Draft::default(),
            display_mode: DisplayMode::default(),
            clear_policy: ClearPolicy::default(),
            next_request_id: 1,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn KeyValueStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_display_mode(mut self, display_mode: DisplayMode) -> Self {
        self.display_mode = display_mode;
        self
    }

    pub fn with_clear_policy(mut self, clear_policy: ClearPolicy) -> Self {
        self.clear_policy = clear_policy;
        self
    }

    pub fn with_draft(mut self, draft: Draft) -> Self {
        self.draft = draft;
        self
    }

    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    pub fn request_state(&self) -> RequestState {
        self.conversation.request_state()
    }

    /// Shared handle for driving a `begin_*` payload outside the session borrow.
    pub fn backend(&self) -> Arc<dyn ChatBackend> {
        Arc::clone(&self.backend)
    }

    pub fn indicators(&self) -> Indicators {
        match self.request_state().pending() {
            Some(pending) => Indicators {
                loading: true,
                typing: pending.kind.produces_reply(),
            },
            None => Indicators::default(),
        }
    }

    /// Resolves a message image reference against the backend origin.
    pub fn resolve_image_url(&self, reference: &str) -> String {
        resolve_image_url(self.backend.base_url(), reference)
    }

    pub fn set_question(&mut self, text: impl Into<String>) {
        self.draft.question = text.into();
    }

    /// Replaces the selected image, returning the previous one.
    pub fn select_image(&mut self, image: SelectedImage) -> Option<SelectedImage> {
        self.draft.image.replace(image)
    }

    pub fn discard_image(&mut self) -> Option<SelectedImage> {
        self.draft.image.take()
    }

    pub fn set_mode(&mut self, mode: ProcessingMode) {
        self.draft.mode = mode;
    }

    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.draft.instruction = instruction.into();
    }

    pub fn set_search_enabled(&mut self, enabled: bool) {
        self.draft.search_enabled = enabled;
    }

    pub fn toggle_display_mode(&mut self) -> DisplayMode {
        self.display_mode = self.display_mode.toggled();
        tracing::debug!(display_mode = self.display_mode.name(), "display mode toggled");
        self.display_mode
    }

    /// Loads the starting history: cache first, then the backend when it answers.
    pub async fn hydrate(&mut self) -> Result<HydrationOutcome, IgnoredReason> {
        if let Some(active) = self.request_state().pending() {
            return Err(IgnoredReason::RequestInFlight(active.kind));
        }

        let mut source = HistorySource::Empty;
        if let Some(cached) = self.load_cached_history().await
            && !cached.is_empty()
        {
            self.conversation.replace_all(cached);
            source = HistorySource::Cache;
        }

        let backend = Arc::clone(&self.backend);
        let warning = match backend.fetch_history().await {
            Ok(remote) => {
                let messages = remote.into_iter().map(Message::from).collect::<Vec<_>>();
                self.conversation.replace_all(messages);
                source = HistorySource::Backend;
                self.persist_history().await;
                None
            }
            Err(error) => {
                tracing::warn!(
                    stage = error.stage(),
                    error = %error,
                    fallback = ?source,
                    "failed to hydrate history from backend"
                );
                Some(error.to_string())
            }
        };

        let outcome = HydrationOutcome {
            source,
            message_count: self.messages().len(),
            warning,
        };
        tracing::info!(
            source = ?outcome.source,
            message_count = outcome.message_count,
            "session hydrated"
        );
        Ok(outcome)
    }

    pub fn begin_question(
        &mut self,
        text: &str,
    ) -> Result<(PendingQuestion, ChatRequest), IgnoredReason> {
        let question = text.trim();
        if question.is_empty() {
            return Err(IgnoredReason::EmptyQuestion);
        }

        let request = self.begin_request(RequestKind::Question)?;
        self.conversation.append(Message::user(question));
        self.draft.question.clear();

        Ok((
            PendingQuestion { request },
            ChatRequest {
                question: question.to_string(),
                enable_search: self.draft.search_enabled,
            },
        ))
    }

    pub fn resolve_question(
        &mut self,
        pending: PendingQuestion,
        result: BackendResult<ChatAnswer>,
    ) -> ActionOutcome {
        if let Err(rejection) = self.settle(pending.request) {
            return ActionOutcome::Stale(rejection);
        }

        match result {
            Ok(answer) => {
                self.conversation.append(Message::assistant(answer.answer));
                ActionOutcome::Completed
            }
            Err(error) => self.append_failure(RequestKind::Question, &error),
        }
    }

    pub async fn submit_question(&mut self, text: &str) -> ActionOutcome {
        let (pending, request) = match self.begin_question(text) {
            Ok(started) => started,
            Err(reason) => return ActionOutcome::Ignored(reason),
        };
        self.persist_history().await;

        let backend = Arc::clone(&self.backend);
        let result = backend.ask(request).await;
        let outcome = self.resolve_question(pending, result);
        self.persist_history().await;
        outcome
    }

    pub fn begin_image_processing(
        &mut self,
    ) -> Result<(PendingImage, ProcessImageRequest), IgnoredReason> {
        let Some(image) = self.draft.image.take() else {
            return Err(IgnoredReason::NoImageSelected);
        };

        let request = match self.begin_request(RequestKind::ImageProcessing) {
            Ok(request) => request,
            Err(reason) => {
                self.draft.image = Some(image);
                return Err(reason);
            }
        };

        let file_name = image.file_name().to_string();
        let mode = self.draft.mode;
        Ok((
            PendingImage {
                request,
                file_name,
                mode,
            },
            ProcessImageRequest {
                image: image.into_upload(),
                mode,
                instruction: self.draft.instruction.trim().to_string(),
            },
        ))
    }

    pub fn resolve_image_processing(
        &mut self,
        pending: PendingImage,
        result: BackendResult<ProcessedImage>,
    ) -> ActionOutcome {
        if let Err(rejection) = self.settle(pending.request) {
            return ActionOutcome::Stale(rejection);
        }

        match result {
            Ok(processed) => {
                let summary = format!(
                    "Processed image: {} (mode: {})",
                    pending.file_name,
                    pending.mode.as_wire()
                );
                self.conversation
                    .append(Message::user(summary).with_image(Some(processed.image_url)));
                self.conversation
                    .append(Message::assistant(processed.message));
                ActionOutcome::Completed
            }
            Err(error) => self.append_failure(RequestKind::ImageProcessing, &error),
        }
    }

    pub async fn process_image(&mut self) -> ActionOutcome {
        let (pending, request) = match self.begin_image_processing() {
            Ok(started) => started,
            Err(reason) => return ActionOutcome::Ignored(reason),
        };

        let backend = Arc::clone(&self.backend);
        let result = backend.process_image(request).await;
        let outcome = self.resolve_image_processing(pending, result);
        self.persist_history().await;
        outcome
    }

    /// Starts a question through the legacy `/vqa` route, attaching the selected image if any.
    ///
    /// Unlike `begin_question`, nothing is appended until the backend reports the stored image.
    pub fn begin_image_question(
        &mut self,
        text: &str,
    ) -> Result<(PendingImageQuestion, VqaRequest), IgnoredReason> {
        let question = text.trim();
        if question.is_empty() {
            return Err(IgnoredReason::EmptyQuestion);
        }

        let request = self.begin_request(RequestKind::ImageQuestion)?;
        let image = self.draft.image.take().map(SelectedImage::into_upload);
        self.draft.question.clear();

        Ok((
            PendingImageQuestion {
                request,
                question: question.to_string(),
            },
            VqaRequest {
                question: question.to_string(),
                image,
            },
        ))
    }

    pub fn resolve_image_question(
        &mut self,
        pending: PendingImageQuestion,
        result: BackendResult<VqaAnswer>,
    ) -> ActionOutcome {
        if let Err(rejection) = self.settle(pending.request) {
            return ActionOutcome::Stale(rejection);
        }

        match result {
            Ok(answer) => {
                self.conversation
                    .append(Message::user(pending.question).with_image(answer.image_url));
                self.conversation.append(Message::assistant(answer.answer));
                ActionOutcome::Completed
            }
            Err(error) => self.append_failure(RequestKind::ImageQuestion, &error),
        }
    }

    pub async fn ask_about_image(&mut self, text: &str) -> ActionOutcome {
        let (pending, request) = match self.begin_image_question(text) {
            Ok(started) => started,
            Err(reason) => return ActionOutcome::Ignored(reason),
        };

        let backend = Arc::clone(&self.backend);
        let result = backend.ask_about_image(request).await;
        let outcome = self.resolve_image_question(pending, result);
        self.persist_history().await;
        outcome
    }

    pub fn begin_clear(&mut self) -> Result<PendingClear, IgnoredReason> {
        let request = self.begin_request(RequestKind::Clear)?;
        Ok(PendingClear { request })
    }

    pub fn resolve_clear(&mut self, pending: PendingClear, result: BackendResult<()>) -> ClearOutcome {
        if let Err(rejection) = self.settle(pending.request) {
            return ClearOutcome::Stale(rejection);
        }

        match (result, self.clear_policy) {
            (Ok(()), _) => {
                self.clear_local();
                tracing::info!("history cleared");
                ClearOutcome::Cleared
            }
            (Err(error), ClearPolicy::Always) => {
                tracing::warn!(
                    stage = error.stage(),
                    error = %error,
                    "backend clear failed; clearing local history anyway"
                );
                self.clear_local();
                ClearOutcome::ClearedLocally {
                    warning: error.to_string(),
                }
            }
            (Err(error), ClearPolicy::Confirm) => {
                tracing::warn!(
                    stage = error.stage(),
                    error = %error,
                    "backend clear failed; keeping local history"
                );
                ClearOutcome::Kept {
                    error: error.to_string(),
                }
            }
        }
    }

    pub async fn clear_history(&mut self) -> ClearOutcome {
        let pending = match self.begin_clear() {
            Ok(pending) => pending,
            Err(reason) => return ClearOutcome::Ignored(reason),
        };

        let backend = Arc::clone(&self.backend);
        let result = backend.clear_history().await;
        let outcome = self.resolve_clear(pending, result);
        self.persist_history().await;
        outcome
    }

    /// Writes the current history to the local cache. Failures are logged and swallowed.
    pub async fn persist_history(&self) {
        let Some(cache) = &self.cache else {
            return;
        };

        let payload = match serde_json::to_string(self.messages()) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(error = %error, "failed to serialize history for cache");
                return;
            }
        };

        if let Err(error) = cache.put(HISTORY_CACHE_KEY, payload).await {
            tracing::warn!(error = %error, "failed to write history cache");
        }
    }

    async fn load_cached_history(&self) -> Option<Vec<Message>> {
        let cache = self.cache.as_ref()?;

        let entry = match cache.get(HISTORY_CACHE_KEY).await {
            Ok(entry) => entry?,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read history cache");
                return None;
            }
        };

        match serde_json::from_str::<Vec<Message>>(&entry.value) {
            Ok(messages) => Some(messages),
            Err(error) => {
                tracing::warn!(error = %error, "ignoring unreadable history cache");
                None
            }
        }
    }

    fn begin_request(&mut self, kind: RequestKind) -> Result<PendingRequest, IgnoredReason> {
        let request = PendingRequest::new(RequestId::new(self.next_request_id), kind);

        match self
            .conversation
            .apply_request_transition(RequestTransition::Begin(request))
        {
            Ok(_) => {
                self.next_request_id += 1;
                Ok(request)
            }
            Err(RequestTransitionRejection::AlreadyAwaiting { active, .. }) => {
                tracing::debug!(active = ?active, attempted = ?kind, "request already in flight");
                Err(IgnoredReason::RequestInFlight(active.kind))
            }
            Err(rejection) => {
                tracing::warn!(rejection = ?rejection, "unexpected rejection on begin");
                Err(IgnoredReason::RequestInFlight(kind))
            }
        }
    }

    fn settle(&mut self, request: PendingRequest) -> Result<(), RequestTransitionRejection> {
        self.conversation
            .apply_request_transition(RequestTransition::Settle(request))
            .map(|_| ())
            .inspect_err(|rejection| {
                tracing::warn!(rejection = ?rejection, "dropping stale resolution");
            })
    }

    fn append_failure(&mut self, kind: RequestKind, error: &BackendError) -> ActionOutcome {
        let detail = error.user_detail();
        tracing::warn!(
            kind = ?kind,
            stage = error.stage(),
            error = %error,
            "request failed"
        );
        self.conversation.append(Message::assistant(error_message(detail.as_deref())));
        ActionOutcome::Failed { detail }
    }

    fn clear_local(&mut self) {
        self.conversation.clear();
        self.draft.image = None;
    }
}

/// Assistant-facing error text; the backend detail is kept verbatim.
pub fn error_message(detail: Option<&str>) -> String {
    match detail {
        Some(detail) => format!("Error: {detail}"),
        None => GENERIC_ERROR_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use vqa_backend::{RemoteMessage, RemoteRole};
    use vqa_storage::MemoryCache;

    use super::*;
    use crate::chat::message::Role;
    use crate::chat::testing::{Call, FakeBackend, decode_error, status_error};

    fn session_with(backend: FakeBackend) -> (ChatSession, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        (ChatSession::new(backend.clone()), backend)
    }

    fn cat_image() -> SelectedImage {
        SelectedImage::new("cat.png", "image/png", b"png-bytes".to_vec()).unwrap()
    }

    #[tokio::test]
    async fn question_appends_user_then_one_assistant_reply() {
        let (mut session, backend) = session_with(FakeBackend::new().with_answer(Ok(ChatAnswer {
            answer: "Paris".to_string(),
        })));
        session.set_search_enabled(true);

        let outcome = session.submit_question("  Capital of France?  ").await;

        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(
            session.messages(),
            &[Message::user("Capital of France?"), Message::assistant("Paris")]
        );
        assert_eq!(
            backend.calls(),
            vec![Call::Ask(ChatRequest {
                question: "Capital of France?".to_string(),
                enable_search: true,
            })]
        );
        assert!(session.request_state().is_idle());
    }

    #[tokio::test]
    async fn blank_question_is_ignored_without_request() {
        let (mut session, backend) = session_with(FakeBackend::new());

        for text in ["", "   ", "\n\t"] {
            assert_eq!(
                session.submit_question(text).await,
                ActionOutcome::Ignored(IgnoredReason::EmptyQuestion)
            );
        }

        assert!(session.messages().is_empty());
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn user_message_is_visible_while_awaiting() {
        let (mut session, _backend) = session_with(FakeBackend::new());

        let (_pending, _request) = session.begin_question("Hello?").unwrap();

        assert_eq!(session.messages(), &[Message::user("Hello?")]);
        assert_eq!(
            session.indicators(),
            Indicators {
                loading: true,
                typing: true,
            }
        );
    }

    #[test]
    fn second_question_is_rejected_while_one_is_outstanding() {
        let (mut session, _backend) = session_with(FakeBackend::new());

        let (_pending, _request) = session.begin_question("first").unwrap();
        let rejected = session.begin_question("second").unwrap_err();

        assert_eq!(
            rejected,
            IgnoredReason::RequestInFlight(RequestKind::Question)
        );
        assert_eq!(session.messages().len(), 1);
    }

    #[tokio::test]
    async fn backend_detail_is_carried_verbatim() {
        let (mut session, _backend) = session_with(
            FakeBackend::new().with_answer(Err(status_error(400, Some("Invalid image format")))),
        );

        let outcome = session.submit_question("what is this?").await;

        assert_eq!(
            outcome,
            ActionOutcome::Failed {
                detail: Some("Invalid image format".to_string()),
            }
        );
        let reply = &session.messages()[1];
        assert_eq!(reply.role, Role::Assistant);
        assert!(reply.content.contains("Invalid image format"));
        assert!(session.request_state().is_idle());
    }

    #[tokio::test]
    async fn failure_without_detail_uses_generic_message() {
        let (mut session, _backend) =
            session_with(FakeBackend::new().with_answer(Err(decode_error())));

        session.submit_question("hello").await;

        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[1].content, GENERIC_ERROR_MESSAGE);
    }

    #[test]
    fn stale_ticket_does_not_touch_history() {
        let (mut session, _backend) = session_with(FakeBackend::new());

        let (first, _) = session.begin_question("first").unwrap();
        let first_request = first.request();
        let outcome = session.resolve_question(
            first,
            Ok(ChatAnswer {
                answer: "one".to_string(),
            }),
        );
        assert_eq!(outcome, ActionOutcome::Completed);

        let (_second, _) = session.begin_question("second").unwrap();
        let forged = PendingQuestion {
            request: first_request,
        };
        let outcome = session.resolve_question(
            forged,
            Ok(ChatAnswer {
                answer: "late".to_string(),
            }),
        );

        assert!(matches!(
            outcome,
            ActionOutcome::Stale(RequestTransitionRejection::RequestMismatch { .. })
        ));
        assert_eq!(session.messages().len(), 3);
        assert!(!session.request_state().is_idle());
    }

    #[tokio::test]
    async fn process_without_image_is_a_no_op() {
        let (mut session, backend) = session_with(FakeBackend::new());
        session.set_instruction("read it");
        let draft_before = session.draft().clone();

        let outcome = session.process_image().await;

        assert_eq!(
            outcome,
            ActionOutcome::Ignored(IgnoredReason::NoImageSelected)
        );
        assert!(backend.calls().is_empty());
        assert!(session.messages().is_empty());
        assert_eq!(session.draft(), &draft_before);
        assert!(session.request_state().is_idle());
    }

    #[tokio::test]
    async fn processed_image_appends_summary_and_analysis() {
        let (mut session, backend) =
            session_with(FakeBackend::new().with_processed(Ok(ProcessedImage {
                image_url: "/img/1.png".to_string(),
                message: "A cat".to_string(),
            })));
        session.select_image(cat_image());
        session.set_mode(ProcessingMode::Manual);
        session.set_instruction(" count the whiskers ");

        let outcome = session.process_image().await;

        assert_eq!(outcome, ActionOutcome::Completed);
        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].content.contains("cat.png"));
        assert_eq!(messages[0].image.as_deref(), Some("/img/1.png"));
        assert_eq!(messages[1], Message::assistant("A cat"));
        assert!(!session.draft().has_image());
        assert_eq!(
            backend.calls(),
            vec![Call::ProcessImage {
                file_name: "cat.png".to_string(),
                mode: ProcessingMode::Manual,
                instruction: "count the whiskers".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn failed_processing_appends_one_error_and_drops_image() {
        let (mut session, _backend) = session_with(
            FakeBackend::new().with_processed(Err(status_error(422, Some("Invalid image format")))),
        );
        session.select_image(cat_image());

        let outcome = session.process_image().await;

        assert!(matches!(outcome, ActionOutcome::Failed { .. }));
        assert_eq!(
            session.messages(),
            &[Message::assistant("Error: Invalid image format")]
        );
        assert!(!session.draft().has_image());
    }

    #[test]
    fn processing_while_busy_keeps_selected_image() {
        let (mut session, backend) = session_with(FakeBackend::new());
        session.select_image(cat_image());

        let _pending = session.begin_question("first").unwrap();
        let rejected = session.begin_image_processing().unwrap_err();

        assert_eq!(
            rejected,
            IgnoredReason::RequestInFlight(RequestKind::Question)
        );
        assert_eq!(
            session.draft().image.as_ref().map(SelectedImage::file_name),
            Some("cat.png")
        );
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn split_exchange_reports_typing_until_resolved() {
        let (mut session, backend) = session_with(FakeBackend::new().with_processed(Ok(
            ProcessedImage {
                image_url: "/img/1.png".to_string(),
                message: "A cat".to_string(),
            },
        )));
        session.select_image(cat_image());

        let (pending, request) = session.begin_image_processing().unwrap();
        assert_eq!(
            session.indicators(),
            Indicators {
                loading: true,
                typing: true,
            }
        );

        let result = session.backend().process_image(request).await;
        let outcome = session.resolve_image_processing(pending, result);

        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(session.indicators(), Indicators::default());
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn image_question_failure_appends_one_error_and_drops_image() {
        let (mut session, backend) = session_with(
            FakeBackend::new().with_vqa(Err(status_error(422, Some("Invalid image format")))),
        );
        session.select_image(cat_image());
        session.set_question("What is this?");

        let outcome = session.ask_about_image("What is this?").await;

        assert_eq!(
            outcome,
            ActionOutcome::Failed {
                detail: Some("Invalid image format".to_string()),
            }
        );
        assert_eq!(
            session.messages(),
            &[Message::assistant("Error: Invalid image format")]
        );
        assert!(!session.draft().has_image());
        assert!(session.draft().question.is_empty());
        assert_eq!(session.request_state(), RequestState::Idle);
        assert_eq!(
            backend.calls(),
            vec![Call::AskAboutImage {
                question: "What is this?".to_string(),
                file_name: Some("cat.png".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn legacy_image_question_records_returned_reference() {
        let (mut session, backend) = session_with(FakeBackend::new().with_vqa(Ok(VqaAnswer {
            answer: "Two cats".to_string(),
            image_url: Some("/images/abc.png".to_string()),
        })));
        session.select_image(cat_image());

        let outcome = session.ask_about_image("How many cats?").await;

        assert_eq!(outcome, ActionOutcome::Completed);
        assert_eq!(
            session.messages(),
            &[
                Message::user("How many cats?").with_image(Some("/images/abc.png".to_string())),
                Message::assistant("Two cats"),
            ]
        );
        assert_eq!(
            backend.calls(),
            vec![Call::AskAboutImage {
                question: "How many cats?".to_string(),
                file_name: Some("cat.png".to_string()),
            }]
        );
        assert!(!session.draft().has_image());
    }

    #[tokio::test]
    async fn clear_always_empties_history_even_when_backend_fails() {
        let (mut session, _backend) =
            session_with(FakeBackend::new().with_clear(Err(status_error(500, None))));
        session.conversation.append(Message::user("hi"));
        session.select_image(cat_image());

        let outcome = session.clear_history().await;

        assert!(matches!(outcome, ClearOutcome::ClearedLocally { .. }));
        assert!(session.messages().is_empty());
        assert!(!session.draft().has_image());
    }

    #[tokio::test]
    async fn clear_success_reports_cleared() {
        let (mut session, backend) = session_with(FakeBackend::new().with_clear(Ok(())));
        session.conversation.append(Message::user("hi"));

        assert_eq!(session.clear_history().await, ClearOutcome::Cleared);
        assert!(session.messages().is_empty());
        assert_eq!(backend.calls(), vec![Call::Clear]);
    }

    #[tokio::test]
    async fn confirm_policy_keeps_history_on_failure() {
        let (session, _backend) =
            session_with(FakeBackend::new().with_clear(Err(status_error(503, None))));
        let mut session = session.with_clear_policy(ClearPolicy::Confirm);
        session.conversation.append(Message::user("keep me"));

        let outcome = session.clear_history().await;

        assert!(matches!(outcome, ClearOutcome::Kept { .. }));
        assert_eq!(session.messages(), &[Message::user("keep me")]);
    }

    #[test]
    fn clear_reports_loading_without_typing() {
        let (mut session, _backend) = session_with(FakeBackend::new());

        let _pending = session.begin_clear().unwrap();

        assert_eq!(
            session.indicators(),
            Indicators {
                loading: true,
                typing: false,
            }
        );
        assert_eq!(
            session.begin_image_processing().unwrap_err(),
            IgnoredReason::NoImageSelected
        );
    }

    #[test]
    fn toggling_display_mode_twice_is_identity_without_requests() {
        let (session, backend) = session_with(FakeBackend::new());
        let mut session = session.with_display_mode(DisplayMode::Light);

        session.toggle_display_mode();
        assert_eq!(session.display_mode(), DisplayMode::Dark);
        session.toggle_display_mode();

        assert_eq!(session.display_mode(), DisplayMode::Light);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn hydrate_prefers_backend_and_refreshes_cache() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .put(
                HISTORY_CACHE_KEY,
                r#"[{"role":"user","content":"stale"}]"#.to_string(),
            )
            .await
            .unwrap();
        let (session, _backend) = session_with(FakeBackend::new().with_history(Ok(vec![
            RemoteMessage {
                role: RemoteRole::User,
                content: "fresh".to_string(),
                image: Some("/images/a.png".to_string()),
            },
            RemoteMessage {
                role: RemoteRole::Assistant,
                content: "reply".to_string(),
                image: None,
            },
        ])));
        let mut session = session.with_cache(cache.clone());

        let outcome = session.hydrate().await.unwrap();

        assert_eq!(outcome.source, HistorySource::Backend);
        assert_eq!(outcome.message_count, 2);
        assert_eq!(session.messages()[0].content, "fresh");

        let cached = cache.get(HISTORY_CACHE_KEY).await.unwrap().unwrap();
        let cached: Vec<Message> = serde_json::from_str(&cached.value).unwrap();
        assert_eq!(cached, session.messages());
    }

    #[tokio::test]
    async fn hydrate_falls_back_to_cache_when_backend_fails() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .put(
                HISTORY_CACHE_KEY,
                r#"[{"role":"user","content":"cached"},{"role":"assistant","content":"yes"}]"#
                    .to_string(),
            )
            .await
            .unwrap();
        let (session, _backend) =
            session_with(FakeBackend::new().with_history(Err(status_error(502, None))));
        let mut session = session.with_cache(cache);

        let outcome = session.hydrate().await.unwrap();

        assert_eq!(outcome.source, HistorySource::Cache);
        assert!(outcome.warning.is_some());
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn hydrate_without_any_source_starts_empty() {
        let (mut session, _backend) =
            session_with(FakeBackend::new().with_history(Err(decode_error())));

        let outcome = session.hydrate().await.unwrap();

        assert_eq!(outcome.source, HistorySource::Empty);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn history_is_persisted_after_each_exchange() {
        let cache = Arc::new(MemoryCache::new());
        let (session, _backend) = session_with(FakeBackend::new().with_answer(Ok(ChatAnswer {
            answer: "pong".to_string(),
        })));
        let mut session = session.with_cache(cache.clone());

        session.submit_question("ping").await;

        let cached = cache.get(HISTORY_CACHE_KEY).await.unwrap().unwrap();
        let cached: Vec<Message> = serde_json::from_str(&cached.value).unwrap();
        assert_eq!(
            cached,
            vec![Message::user("ping"), Message::assistant("pong")]
        );
    }

    #[test]
    fn relative_images_resolve_against_backend_origin() {
        let (session, _backend) = session_with(FakeBackend::new());
        assert_eq!(
            session.resolve_image_url("/img/1.png"),
            "http://localhost:8000/img/1.png"
        );
        assert_eq!(
            session.resolve_image_url("https://example.com/x.png"),
            "https://example.com/x.png"
        );
        assert_eq!(
            session.resolve_image_url("//evil.example/x.png"),
            "http://localhost:8000/evil.example/x.png"
        );
    }
}
