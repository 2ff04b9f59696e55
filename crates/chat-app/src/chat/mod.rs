pub mod draft;
pub mod events;
pub mod message;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use draft::{Draft, ImageSelectionError, SelectedImage};
pub use events::{
    ActionOutcome, ClearOutcome, HistorySource, HydrationOutcome, IgnoredReason, Indicators,
};
pub use message::{
    Conversation, DisplayMode, Message, PendingRequest, RequestId, RequestKind, RequestState,
    RequestTransition, RequestTransitionRejection, Role,
};
pub use session::{
    ChatSession, ClearPolicy, GENERIC_ERROR_MESSAGE, PendingClear, PendingImage,
    PendingImageQuestion, PendingQuestion, error_message,
};
