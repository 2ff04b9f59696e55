use colored::{ColoredString, Colorize};
use url::Url;
use vqa_backend::resolve_image_url;

use crate::chat::{
    ActionOutcome, ClearOutcome, DisplayMode, Draft, HistorySource, HydrationOutcome,
    IgnoredReason, Message, Role,
};
use crate::terminal::command::COMMANDS;

const TYPING_FRAMES: [&str; 4] = ["Typing", "Typing.", "Typing..", "Typing..."];

/// Formats session state as terminal lines. Colors follow the display mode.
#[derive(Debug, Clone)]
pub struct Renderer {
    display_mode: DisplayMode,
    base_url: Url,
}

impl Renderer {
    pub fn new(display_mode: DisplayMode, base_url: Url) -> Self {
        Self {
            display_mode,
            base_url,
        }
    }

    pub fn set_display_mode(&mut self, display_mode: DisplayMode) {
        self.display_mode = display_mode;
    }

    pub fn banner(&self) -> String {
        format!(
            "{}\n{}",
            self.accent("=== VQA chat ===").bold(),
            self.muted(&format!(
                "backend {} | type a question, /help for commands",
                self.base_url
            ))
        )
    }

    pub fn message(&self, message: &Message) -> String {
        let (label, body) = match message.role {
            Role::User => ("you", self.user(&message.content)),
            Role::Assistant => ("assistant", self.assistant(&message.content)),
        };

        let mut rendered = format!("{} {}", self.muted(&format!("[{label}]")), body);
        if let Some(image) = &message.image {
            let resolved = resolve_image_url(&self.base_url, image);
            rendered.push('\n');
            rendered.push_str(&self.muted(&format!("  image: {resolved}")).to_string());
        }
        rendered
    }

    pub fn history(&self, messages: &[Message]) -> String {
        if messages.is_empty() {
            return self.muted("(no messages yet)").to_string();
        }

        messages
            .iter()
            .map(|message| self.message(message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn typing_frame(&self, tick: usize) -> String {
        self.muted(TYPING_FRAMES[tick % TYPING_FRAMES.len()])
            .italic()
            .to_string()
    }

    /// Plain-text prompt; rustyline measures prompt width without ANSI awareness.
    pub fn prompt(&self, draft: &Draft) -> String {
        let mut tags = Vec::new();
        if let Some(image) = &draft.image {
            tags.push(image.file_name().to_string());
            tags.push(draft.mode.as_wire().to_string());
        }
        if draft.search_enabled {
            tags.push("search".to_string());
        }

        if tags.is_empty() {
            ">> ".to_string()
        } else {
            format!("[{}] >> ", tags.join(" "))
        }
    }

    pub fn help(&self) -> String {
        let width = COMMANDS
            .iter()
            .map(|spec| spec.usage.len())
            .max()
            .unwrap_or_default();

        COMMANDS
            .iter()
            .map(|spec| {
                format!(
                    "  {}  {}",
                    self.accent(&format!("{:width$}", spec.usage)),
                    spec.summary
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn notice(&self, text: &str) -> String {
        self.muted(text).to_string()
    }

    pub fn warning(&self, text: &str) -> String {
        text.yellow().to_string()
    }

    pub fn error(&self, text: &str) -> String {
        text.red().to_string()
    }

    pub fn ignored(&self, reason: IgnoredReason) -> String {
        let text = match reason {
            IgnoredReason::EmptyQuestion => "Type a question first.",
            IgnoredReason::NoImageSelected => "Select an image with /image <path> first.",
            IgnoredReason::RequestInFlight(_) => "Still waiting for the previous request.",
        };
        self.warning(text)
    }

    /// Extra line for an action outcome. Replies are shown from history instead.
    pub fn action_outcome(&self, outcome: &ActionOutcome) -> Option<String> {
        match outcome {
            ActionOutcome::Ignored(reason) => Some(self.ignored(*reason)),
            ActionOutcome::Completed | ActionOutcome::Failed { .. } => None,
            ActionOutcome::Stale(_) => Some(self.warning("Discarded a late response.")),
        }
    }

    pub fn clear_outcome(&self, outcome: &ClearOutcome) -> String {
        match outcome {
            ClearOutcome::Ignored(reason) => self.ignored(*reason),
            ClearOutcome::Cleared => self.notice("Conversation cleared."),
            ClearOutcome::ClearedLocally { warning } => self.warning(&format!(
                "Conversation cleared locally; the backend did not confirm: {warning}"
            )),
            ClearOutcome::Kept { error } => {
                self.error(&format!("Clear failed, conversation kept: {error}"))
            }
            ClearOutcome::Stale(_) => self.warning("Discarded a late response."),
        }
    }

    pub fn hydration(&self, outcome: &HydrationOutcome) -> String {
        let source = match outcome.source {
            HistorySource::Backend => "backend",
            HistorySource::Cache => "local cache",
            HistorySource::Empty => "nowhere",
        };
        let summary = format!(
            "Loaded {} message(s) from {source}.",
            outcome.message_count
        );

        match &outcome.warning {
            Some(warning) => format!(
                "{}\n{}",
                self.notice(&summary),
                self.warning(&format!("Backend history unavailable: {warning}"))
            ),
            None => self.notice(&summary),
        }
    }

    fn user(&self, text: &str) -> ColoredString {
        if self.display_mode.is_dark() {
            text.bright_green()
        } else {
            text.green()
        }
    }

    fn assistant(&self, text: &str) -> ColoredString {
        if self.display_mode.is_dark() {
            text.bright_blue()
        } else {
            text.blue()
        }
    }

    fn accent(&self, text: &str) -> ColoredString {
        if self.display_mode.is_dark() {
            text.bright_magenta()
        } else {
            text.magenta()
        }
    }

    fn muted(&self, text: &str) -> ColoredString {
        if self.display_mode.is_dark() {
            text.bright_black()
        } else {
            text.black()
        }
    }
}

#[cfg(test)]
mod tests {
    use vqa_backend::ProcessingMode;

    use super::*;
    use crate::chat::SelectedImage;

    fn renderer(display_mode: DisplayMode) -> Renderer {
        colored::control::set_override(false);
        Renderer::new(
            display_mode,
            Url::parse("http://localhost:8000/").unwrap(),
        )
    }

    #[test]
    fn message_image_is_resolved_against_backend() {
        let renderer = renderer(DisplayMode::Dark);
        let message = Message::user("Processed image: cat.png (mode: auto)")
            .with_image(Some("/img/1.png".to_string()));

        assert_eq!(
            renderer.message(&message),
            "[you] Processed image: cat.png (mode: auto)\n  image: http://localhost:8000/img/1.png"
        );
    }

    #[test]
    fn absolute_image_urls_pass_through() {
        let renderer = renderer(DisplayMode::Light);
        let message =
            Message::assistant("here").with_image(Some("https://cdn.example.com/a.png".to_string()));

        assert!(
            renderer
                .message(&message)
                .ends_with("image: https://cdn.example.com/a.png")
        );
    }

    #[test]
    fn prompt_reflects_draft() {
        let renderer = renderer(DisplayMode::Dark);
        let mut draft = Draft::new(ProcessingMode::Manual, true);
        assert_eq!(renderer.prompt(&draft), "[search] >> ");

        draft.image = Some(SelectedImage::new("cat.png", "image/png", vec![1]).unwrap());
        assert_eq!(renderer.prompt(&draft), "[cat.png manual search] >> ");
    }

    #[test]
    fn typing_frames_cycle() {
        let renderer = renderer(DisplayMode::Dark);
        assert_eq!(renderer.typing_frame(0), "Typing");
        assert_eq!(renderer.typing_frame(3), "Typing...");
        assert_eq!(renderer.typing_frame(4), "Typing");
    }

    #[test]
    fn clear_outcomes_are_described() {
        let renderer = renderer(DisplayMode::Dark);
        assert_eq!(
            renderer.clear_outcome(&ClearOutcome::Cleared),
            "Conversation cleared."
        );
        assert!(
            renderer
                .clear_outcome(&ClearOutcome::Kept {
                    error: "boom".to_string()
                })
                .contains("boom")
        );
    }

    #[test]
    fn help_lists_every_command() {
        let help = renderer(DisplayMode::Dark).help();
        for spec in COMMANDS {
            assert!(help.contains(spec.usage));
        }
    }
}
