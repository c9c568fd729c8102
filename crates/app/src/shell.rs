use std::path::{Path, PathBuf};
use std::sync::Arc;

use lectern_api::{
    ApiError, ApiResult, DocumentApi, DocumentListing, HealthStatus, HttpDocumentApi, UploadFile,
    truncate_chars,
};
use lectern_session::{
    ChatCompletion, ChatOutcome, Message, MessageStatus, Role, SessionController, SessionEvent,
    SessionOptions, SubmitOutcome, UploadCompletion, UploadRejection, UploadStart,
};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use crate::settings::{ClientSettings, SettingsError};

const EXCERPT_PREVIEW_CHARS: usize = 120;

const HELP: &str = "\
Type a question and press enter to ask it.
While an answer is pending, pressing enter stops it.

  /upload <file.pdf>...  upload PDF documents
  /docs                  list documents on the server
  /stop                  stop the pending answer
  /status                show session state
  /health                check the server
  /help                  show this help
  /quit                  exit";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ShellError {
    #[snafu(display("invalid settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to build api client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text. Goes through the send/stop control, blank included.
    Ask(String),
    Upload(Vec<PathBuf>),
    Documents,
    Stop,
    Status,
    Health,
    Help,
    Quit,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Ask(line.to_string());
        };

        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        match name {
            "upload" | "u" => Command::Upload(words.map(PathBuf::from).collect()),
            "docs" | "documents" => Command::Documents,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "health" => Command::Health,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Unknown(trimmed.to_string()),
        }
    }
}

/// Finished network work routed back to the event loop.
enum Completion {
    Chat(ChatCompletion),
    Upload(UploadCompletion),
    Documents {
        result: ApiResult<DocumentListing>,
        announce: bool,
    },
    Health(ApiResult<HealthStatus>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Terminal rendering of a [`SessionController`].
///
/// Owns the controller and is its only caller. Spawned tasks report back over
/// an mpsc channel; the select loop applies them between input lines.
pub struct Shell {
    api: Arc<dyn DocumentApi>,
    controller: SessionController,
    events: broadcast::Receiver<SessionEvent>,
    completions: mpsc::UnboundedSender<Completion>,
    error_excerpt_limit: usize,
    sync_on_start: bool,
}

impl Shell {
    pub fn connect(settings: &ClientSettings) -> Result<(Self, ShellInbox), ShellError> {
        let api = HttpDocumentApi::new(settings.to_client_config()).context(BuildClientSnafu {
            stage: "build-http-client",
        })?;
        let api: Arc<dyn DocumentApi> = Arc::new(api);

        let options = SessionOptions {
            error_excerpt_limit: settings.error_excerpt_limit,
            ..SessionOptions::default()
        };
        let controller = SessionController::with_options(Arc::clone(&api), options);
        let events = controller.subscribe();
        let (completions, inbox) = mpsc::unbounded_channel();

        let shell = Self {
            api,
            controller,
            events,
            completions,
            error_excerpt_limit: settings.error_excerpt_limit,
            sync_on_start: settings.sync_documents_on_start,
        };
        Ok((shell, ShellInbox { inbox }))
    }

    pub async fn run(mut self, mut inbox: ShellInbox) -> Result<(), ShellError> {
        println!("{HELP}\n");
        if self.sync_on_start {
            self.spawn_document_sync(false);
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let flow = tokio::select! {
                line = lines.next_line() => {
                    let line = line.context(ReadInputSnafu { stage: "read-stdin-line" })?;
                    match line {
                        Some(line) => self.handle_command(Command::parse(&line)).await,
                        None => Flow::Quit,
                    }
                }
                Some(completion) = inbox.inbox.recv() => {
                    self.handle_completion(completion);
                    Flow::Continue
                }
            };
            self.render_events();
            if flow == Flow::Quit {
                break;
            }
        }

        if self.controller.cancel() {
            tracing::info!("cancelled pending answer on exit");
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Ask(question) => self.submit(&question),
            Command::Upload(paths) => self.upload(paths).await,
            Command::Documents => self.spawn_document_sync(true),
            Command::Stop => {
                if !self.controller.cancel() {
                    println!("Nothing to stop.");
                }
            }
            Command::Status => self.print_status(),
            Command::Health => self.spawn_health_check(),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Flow::Quit,
            Command::Unknown(input) => println!("Unknown command `{input}`. Try /help."),
        }
        Flow::Continue
    }

    fn submit(&mut self, question: &str) {
        match self.controller.submit(question) {
            SubmitOutcome::Started { task, .. } => {
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let completion = task.await;
                    completions.send(Completion::Chat(completion)).ok();
                });
            }
            SubmitOutcome::Stopped { request_id } => {
                tracing::debug!(request_id = request_id.0, "submit acted as stop");
            }
            SubmitOutcome::Rejected(rejection) => {
                tracing::debug!(?rejection, "submit ignored");
            }
        }
    }

    async fn upload(&mut self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            println!("Usage: /upload <file.pdf>...");
            return;
        }

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            if !is_pdf(&path) {
                println!("Skipping {}: only PDF files can be uploaded.", path.display());
                continue;
            }
            match UploadFile::read(&path).await {
                Ok(file) => files.push(file),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "failed to read upload file");
                    println!("Could not read {}: {error}", path.display());
                }
            }
        }
        if files.is_empty() {
            return;
        }

        match self.controller.start_upload(files) {
            UploadStart::Started { task, .. } => {
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let completion = task.await;
                    completions.send(Completion::Upload(completion)).ok();
                });
            }
            // Reported through `DuplicatesSkipped`.
            UploadStart::AllDuplicates { .. } => {}
            UploadStart::Rejected(UploadRejection::Busy { .. }) => {
                println!(
                    "Still uploading {}. Try again when it finishes.",
                    self.controller.uploading_files().join(", ")
                );
            }
            UploadStart::Rejected(UploadRejection::NothingToUpload) => {
                println!("Nothing to upload.");
            }
        }
    }

    fn spawn_document_sync(&self, announce: bool) {
        let task = self.controller.sync_documents();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = task.await;
            completions
                .send(Completion::Documents { result, announce })
                .ok();
        });
    }

    fn spawn_health_check(&self) {
        let api = Arc::clone(&self.api);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = api.health().await;
            completions.send(Completion::Health(result)).ok();
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Chat(completion) => {
                let outcome = self.controller.complete_chat(completion);
                if outcome == ChatOutcome::Stale {
                    tracing::debug!("ignored answer for a stopped question");
                }
            }
            Completion::Upload(completion) => {
                self.controller.complete_upload(completion);
            }
            Completion::Documents { result, announce } => match result {
                Ok(listing) => {
                    self.controller.apply_document_listing(&listing);
                    if announce {
                        print_listing(&listing);
                    }
                }
                Err(error) => {
                    tracing::warn!(stage = error.stage(), %error, "document listing failed");
                    if announce {
                        println!(
                            "Could not list documents: {}",
                            error.user_message(self.error_excerpt_limit)
                        );
                    }
                }
            },
            Completion::Health(result) => match result {
                Ok(health) if health.is_ok() => println!("Server is healthy."),
                Ok(health) => println!("Server reports status `{}`.", health.status),
                Err(error) => println!(
                    "Server unreachable: {}",
                    error.user_message(self.error_excerpt_limit)
                ),
            },
        }
    }

    fn render_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => render_event(&event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "renderer fell behind session events");
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => break,
            }
        }
    }

    fn print_status(&self) {
        let state = if self.controller.is_awaiting_answer() {
            "waiting for an answer"
        } else {
            "idle"
        };
        println!("Chat: {state}");

        let uploading = self.controller.uploading_files();
        if !uploading.is_empty() {
            println!("Uploading: {}", uploading.join(", "));
        }

        let record = self.controller.upload_record();
        if record.is_empty() {
            println!("No documents uploaded yet.");
        } else {
            println!("Uploaded documents ({}):", record.len());
            for name in record.sorted_names() {
                println!("  • {name}");
            }
        }
    }
}

/// Receiving half of the completion channel, kept outside [`Shell`] so the
/// select loop can borrow it alongside `&mut Shell`.
pub struct ShellInbox {
    inbox: mpsc::UnboundedReceiver<Completion>,
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("pdf"))
}

fn render_event(event: &SessionEvent) {
    match event {
        SessionEvent::MessageAppended(message) if message.role == Role::User => {}
        SessionEvent::MessageAppended(message) | SessionEvent::MessageReplaced { message, .. } => {
            print_message(message);
        }
        SessionEvent::PendingRemoved { .. } => println!("(stopped)"),
        SessionEvent::StateChanged(state) => tracing::debug!(?state, "chat state changed"),
        SessionEvent::UploadStarted { files, .. } => {
            println!("Uploading {}...", files.join(", "));
        }
        SessionEvent::UploadFinished { .. } => {}
        SessionEvent::UploadFailed { message, .. } => println!("Upload failed: {message}"),
        SessionEvent::DuplicatesSkipped { files } => {
            println!("Already uploaded, skipped: {}", files.join(", "));
        }
        SessionEvent::DocumentsSynced { added, total } if *added > 0 => {
            println!("{total} document(s) ready on the server.");
        }
        SessionEvent::DocumentsSynced { .. } => {}
    }
}

fn print_message(message: &Message) {
    let marker = match message.status {
        MessageStatus::Error => "assistant (error)",
        _ => "assistant",
    };
    println!("{marker}> {}", message.content);

    if let Some(citations) = &message.citations {
        for citation in citations {
            println!(
                "    [{}] ({:.2}) {}",
                citation.short_label(),
                citation.score,
                truncate_chars(citation.excerpt.trim(), EXCERPT_PREVIEW_CHARS)
            );
        }
    }
}

fn print_listing(listing: &DocumentListing) {
    if listing.documents.is_empty() {
        println!("No documents on the server.");
        return;
    }
    println!("Documents on the server ({}):", listing.total);
    for document in &listing.documents {
        println!("  • {} ({:.2} MB)", document.filename, document.size_mb);
    }
}
