use serde::{Deserialize, Serialize};
use vqa_backend::{RemoteMessage, RemoteRole};

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One committed conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Backend-owned image reference, possibly relative to the backend origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image.filter(|image| !image.trim().is_empty());
        self
    }
}

impl From<RemoteMessage> for Message {
    fn from(message: RemoteMessage) -> Self {
        let role = match message.role {
            RemoteRole::User => Role::User,
            RemoteRole::Assistant => Role::Assistant,
        };
        Self::new(role, message.content).with_image(message.image)
    }
}

/// Light/dark rendering preference owned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Dark,
    Light,
}

impl DisplayMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    pub fn is_dark(self) -> bool {
        matches!(self, Self::Dark)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

/// Identifier for one outstanding request.
///
/// A fresh id is minted on every begin so late or foreign resolutions can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Question,
    ImageProcessing,
    /// Question routed through the legacy `/vqa` endpoint.
    ImageQuestion,
    Clear,
}

impl RequestKind {
    /// True when settling the request appends an assistant reply.
    pub fn produces_reply(self) -> bool {
        !matches!(self, Self::Clear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PendingRequest {
    pub id: RequestId,
    pub kind: RequestKind,
}

impl PendingRequest {
    pub const fn new(id: RequestId, kind: RequestKind) -> Self {
        Self { id, kind }
    }
}

/// Request lifecycle. At most one request is outstanding at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    #[default]
    Idle,
    Awaiting(PendingRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTransition {
    Begin(PendingRequest),
    /// Success and failure both settle; the outcome lives in the appended messages.
    Settle(PendingRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTransitionRejection {
    AlreadyAwaiting {
        active: PendingRequest,
        attempted: PendingRequest,
    },
    NoPendingRequest,
    RequestMismatch {
        active: PendingRequest,
        attempted: PendingRequest,
    },
}

pub type RequestTransitionResult = Result<RequestState, RequestTransitionRejection>;

impl RequestState {
    pub fn pending(&self) -> Option<PendingRequest> {
        match self {
            Self::Awaiting(pending) => Some(*pending),
            Self::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn apply(&self, transition: RequestTransition) -> RequestTransitionResult {
        match transition {
            RequestTransition::Begin(attempted) => match self {
                Self::Idle => Ok(Self::Awaiting(attempted)),
                Self::Awaiting(active) => Err(RequestTransitionRejection::AlreadyAwaiting {
                    active: *active,
                    attempted,
                }),
            },
            RequestTransition::Settle(attempted) => match self {
                Self::Awaiting(active) if *active == attempted => Ok(Self::Idle),
                Self::Awaiting(active) => Err(RequestTransitionRejection::RequestMismatch {
                    active: *active,
                    attempted,
                }),
                Self::Idle => Err(RequestTransitionRejection::NoPendingRequest),
            },
        }
    }
}

/// Conversation aggregate: the ordered history plus its request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    request_state: RequestState,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn request_state(&self) -> RequestState {
        self.request_state
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn apply_request_transition(
        &mut self,
        transition: RequestTransition,
    ) -> RequestTransitionResult {
        let next_state = self.request_state.apply(transition)?;
        tracing::debug!(
            from = ?self.request_state,
            to = ?next_state,
            "request state transition"
        );
        self.request_state = next_state;
        Ok(next_state)
    }
}
