use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use snafu::{ResultExt, Snafu};
use tokio::runtime::Runtime;
use vqa_backend::{BackendError, create_backend};
use vqa_storage::{KeyValueStore, MemoryCache, SqliteCache};

use crate::chat::{
    ActionOutcome, ChatSession, DisplayMode, Draft, Indicators, Message, SelectedImage,
};
use crate::settings::{ChatSettings, SettingsStore};
use crate::terminal::{CliHelper, Command, Renderer, parse};

const INDICATOR_TICK: Duration = Duration::from_millis(300);

/// Per-run overrides taken from the command line. Nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub backend_url: Option<String>,
    pub config_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub no_cache: bool,
    pub light: bool,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to start async runtime on `{stage}`: {source}"))]
    RuntimeInit {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to set up backend on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("terminal input failed on `{stage}`: {source}"))]
    Readline {
        stage: &'static str,
        source: ReadlineError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Terminal chat front end: owns the runtime, the session and the line editor.
pub struct ChatApp {
    runtime: Runtime,
    store: SettingsStore,
    session: ChatSession,
    renderer: Renderer,
    editor: Editor<CliHelper, DefaultHistory>,
    sqlite: Option<SqliteCache>,
}

/// The REPL blocks on one action at a time, so a current-thread runtime is enough.
pub fn build_runtime() -> Result<Runtime, AppError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(RuntimeInitSnafu {
            stage: "build-current-thread-runtime",
        })
}

impl ChatApp {
    pub fn bootstrap(options: LaunchOptions, runtime: Runtime) -> Result<Self, AppError> {
        let store = match &options.config_path {
            Some(path) => SettingsStore::new(path.clone()),
            None => SettingsStore::load(),
        };
        let settings = effective_settings(&store.settings(), &options);
        tracing::debug!(settings = ?settings, config_path = ?store.config_path(), "resolved settings");

        let backend = create_backend(settings.to_backend_config()).context(BackendSnafu {
            stage: "bootstrap-backend",
        })?;

        let (cache, sqlite) = if options.no_cache {
            (Arc::new(MemoryCache::new()) as Arc<dyn KeyValueStore>, None)
        } else {
            let location = settings.resolved_cache_path().display().to_string();
            match runtime.block_on(SqliteCache::open(&location)) {
                Ok(sqlite) => (
                    Arc::new(sqlite.clone()) as Arc<dyn KeyValueStore>,
                    Some(sqlite),
                ),
                Err(error) => {
                    tracing::warn!(
                        location = %location,
                        error = %error,
                        "failed to open history cache, keeping history in memory"
                    );
                    (Arc::new(MemoryCache::new()) as Arc<dyn KeyValueStore>, None)
                }
            }
        };

        let renderer = Renderer::new(settings.display_mode, backend.base_url().clone());
        let session = ChatSession::new(backend)
            .with_cache(cache)
            .with_display_mode(settings.display_mode)
            .with_clear_policy(settings.clear_policy)
            .with_draft(Draft::new(settings.processing_mode, settings.search_enabled));

        let mut editor = Editor::new().context(ReadlineSnafu {
            stage: "bootstrap-editor",
        })?;
        editor.set_helper(Some(CliHelper::new()));

        Ok(Self {
            runtime,
            store,
            session,
            renderer,
            editor,
            sqlite,
        })
    }

    pub fn run(mut self) -> Result<(), AppError> {
        println!("{}", self.renderer.banner());

        match self.runtime.block_on(self.session.hydrate()) {
            Ok(outcome) => {
                println!("{}", self.renderer.hydration(&outcome));
                if !self.session.messages().is_empty() {
                    println!("{}", self.renderer.history(self.session.messages()));
                }
            }
            Err(reason) => println!("{}", self.renderer.ignored(reason)),
        }

        let result = self.repl();

        if let Some(sqlite) = &self.sqlite {
            self.runtime.block_on(sqlite.close());
        }
        result
    }

    fn repl(&mut self) -> Result<(), AppError> {
        loop {
            let prompt = self.renderer.prompt(self.session.draft());
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = self.editor.add_history_entry(line.as_str());
                    }

                    let command = match parse(&line) {
                        Ok(command) => command,
                        Err(error) => {
                            println!("{}", self.renderer.error(&error.to_string()));
                            continue;
                        }
                    };

                    if self.dispatch(command) == Flow::Quit {
                        println!("{}", self.renderer.notice("Goodbye!"));
                        return Ok(());
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", self.renderer.notice("Ctrl-C: type /quit to leave."));
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", self.renderer.notice("Goodbye!"));
                    return Ok(());
                }
                Err(error) => {
                    return Err(error).context(ReadlineSnafu {
                        stage: "repl-readline",
                    });
                }
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Flow {
        match command {
            Command::Empty => {}
            Command::Question(text) => {
                let before = self.session.messages().len();
                let outcome = match self.session.begin_question(&text) {
                    Ok((pending, request)) => {
                        self.runtime.block_on(self.session.persist_history());
                        let backend = self.session.backend();
                        let result = self.await_backend(backend.ask(request));
                        let outcome = self.session.resolve_question(pending, result);
                        self.runtime.block_on(self.session.persist_history());
                        outcome
                    }
                    Err(reason) => ActionOutcome::Ignored(reason),
                };
                self.print_new_messages(before);
                self.print_optional(self.renderer.action_outcome(&outcome));
            }
            Command::SelectImage(path) => {
                let path = expand_home(&path);
                match self.runtime.block_on(SelectedImage::load(&path)) {
                    Ok(image) => {
                        let preview = image.preview();
                        self.session.select_image(image);
                        println!("{}", self.renderer.notice(&format!("Selected {preview}")));
                    }
                    Err(error) => println!("{}", self.renderer.error(&error.to_string())),
                }
            }
            Command::DropImage => {
                let text = match self.session.discard_image() {
                    Some(image) => format!("Dropped {}", image.file_name()),
                    None => "No image selected.".to_string(),
                };
                println!("{}", self.renderer.notice(&text));
            }
            Command::SetMode(mode) => {
                self.session.set_mode(mode);
                println!(
                    "{}",
                    self.renderer
                        .notice(&format!("Processing mode: {}", mode.as_wire()))
                );
            }
            Command::SetInstruction(instruction) => {
                let text = if instruction.is_empty() {
                    "Instruction cleared.".to_string()
                } else {
                    format!("Instruction: {instruction}")
                };
                self.session.set_instruction(instruction);
                println!("{}", self.renderer.notice(&text));
            }
            Command::SetSearch(enabled) => {
                self.session.set_search_enabled(enabled);
                let state = if enabled { "on" } else { "off" };
                println!("{}", self.renderer.notice(&format!("Web search {state}.")));
            }
            Command::Process => {
                let before = self.session.messages().len();
                let outcome = match self.session.begin_image_processing() {
                    Ok((pending, request)) => {
                        let backend = self.session.backend();
                        let result = self.await_backend(backend.process_image(request));
                        let outcome = self.session.resolve_image_processing(pending, result);
                        self.runtime.block_on(self.session.persist_history());
                        outcome
                    }
                    Err(reason) => ActionOutcome::Ignored(reason),
                };
                self.print_new_messages(before);
                self.print_optional(self.renderer.action_outcome(&outcome));
            }
            Command::AskAboutImage(text) => {
                let before = self.session.messages().len();
                let outcome = match self.session.begin_image_question(&text) {
                    Ok((pending, request)) => {
                        let backend = self.session.backend();
                        let result = self.await_backend(backend.ask_about_image(request));
                        let outcome = self.session.resolve_image_question(pending, result);
                        self.runtime.block_on(self.session.persist_history());
                        outcome
                    }
                    Err(reason) => ActionOutcome::Ignored(reason),
                };
                self.print_new_messages(before);
                self.print_optional(self.renderer.action_outcome(&outcome));
            }
            Command::Clear => {
                let outcome = self.runtime.block_on(self.session.clear_history());
                println!("{}", self.renderer.clear_outcome(&outcome));
            }
            Command::ToggleTheme => {
                let display_mode = self.session.toggle_display_mode();
                self.renderer.set_display_mode(display_mode);
                self.persist_display_mode(display_mode);
                println!(
                    "{}",
                    self.renderer
                        .notice(&format!("Switched to {} mode.", display_mode.name()))
                );
            }
            Command::History => {
                println!("{}", self.renderer.history(self.session.messages()));
            }
            Command::Help => println!("{}", self.renderer.help()),
            Command::Quit => return Flow::Quit,
        }

        Flow::Continue
    }

    /// Waits on a call started by a `begin_*` phase, animating whatever the session reports.
    fn await_backend<F: Future>(&self, future: F) -> F::Output {
        wait_with_indicator(
            &self.runtime,
            &self.renderer,
            self.session.indicators(),
            future,
        )
    }

    fn persist_display_mode(&self, display_mode: DisplayMode) {
        if let Err(error) = self.store.store_display_mode(display_mode) {
            tracing::warn!(error = %error, "failed to persist display mode");
            println!(
                "{}",
                self.renderer
                    .warning(&format!("Display mode not saved: {error}"))
            );
        }
    }

    fn print_new_messages(&self, before: usize) {
        let messages: &[Message] = self.session.messages();
        for message in messages.iter().skip(before) {
            println!("{}", self.renderer.message(message));
        }
    }

    fn print_optional(&self, line: Option<String>) {
        if let Some(line) = line {
            println!("{line}");
        }
    }
}

/// Applies command-line overrides on top of the stored settings.
pub fn effective_settings(stored: &ChatSettings, options: &LaunchOptions) -> ChatSettings {
    let mut settings = stored.clone();
    if let Some(backend_url) = &options.backend_url {
        settings.backend_url = backend_url.clone();
    }
    if let Some(cache_path) = &options.cache_path {
        settings.cache_path = Some(cache_path.clone());
    }
    if options.light {
        settings.display_mode = DisplayMode::Light;
    }
    settings.normalized()
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Drives `future` to completion, animating the typing indicator while `indicators.typing` is set.
fn wait_with_indicator<F: Future>(
    runtime: &Runtime,
    renderer: &Renderer,
    indicators: Indicators,
    future: F,
) -> F::Output {
    runtime.block_on(async {
        if !indicators.typing {
            return future.await;
        }

        tokio::pin!(future);
        // First frame waits one tick so fast replies do not flash the indicator.
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + INDICATOR_TICK, INDICATOR_TICK);
        let mut tick = 0usize;
        let output = loop {
            tokio::select! {
                biased;
                output = &mut future => break output,
                _ = ticker.tick() => {
                    print!("\r{}", renderer.typing_frame(tick));
                    let _ = std::io::stdout().flush();
                    tick += 1;
                }
            }
        };

        if tick > 0 {
            print!("\r\x1b[2K");
            let _ = std::io::stdout().flush();
        }
        output
    })
}
