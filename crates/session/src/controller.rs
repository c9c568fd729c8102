use std::sync::Arc;

use futures::FutureExt;
use lectern_api::{
    ApiError, ApiResult, BoxFuture, CancelHandle, DEFAULT_ERROR_EXCERPT_LIMIT, DocumentApi,
    DocumentListing, UploadFile, cancel_pair,
};
use tokio::sync::broadcast;

use crate::events::{ChatCompletion, SessionEvent, UploadCompletion};
use crate::message::{
    ChatState, ChatTransition, ChatTransitionRejection, ChatTransitionResult, Conversation,
    Message, MessageId, RequestId,
};
use crate::upload::{UploadBatchId, UploadRecord, UploadRejection, UploadTracker};

pub const DEFAULT_EVENT_CAPACITY: usize = 64;
pub const UPLOAD_SUCCESS_HEADER: &str = "Documents processed and ready for analysis:";
pub const CHAT_ERROR_PREFIX: &str = "I encountered an error processing your question";

/// Network work for one chat request. Resolve it and feed the result back
/// through [`SessionController::complete_chat`].
pub type ChatTask = BoxFuture<'static, ChatCompletion>;
pub type UploadTask = BoxFuture<'static, UploadCompletion>;
pub type DocumentSyncTask = BoxFuture<'static, ApiResult<DocumentListing>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound on error text placed into the conversation.
    pub error_excerpt_limit: usize,
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            error_excerpt_limit: DEFAULT_ERROR_EXCERPT_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

pub enum SubmitOutcome {
    /// A request was issued; drive `task` to completion.
    Started { request_id: RequestId, task: ChatTask },
    /// Submit arrived while awaiting an answer and acted as stop.
    Stopped { request_id: RequestId },
    Rejected(SubmitRejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    BlankQuestion,
    /// The chat state machine refused to start; nothing was appended.
    StateMismatch(ChatTransitionRejection),
}

/// What a chat completion did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatOutcome {
    Answered,
    /// The placeholder now holds an error reply.
    Failed,
    /// The request observed its cancel signal; nothing was appended.
    Cancelled,
    /// Not the outstanding request; discarded without mutation.
    Stale,
}

pub enum UploadStart {
    Started {
        batch_id: UploadBatchId,
        accepted: Vec<String>,
        duplicates: Vec<String>,
        task: UploadTask,
    },
    /// Every candidate was already uploaded; no request was issued.
    AllDuplicates { duplicates: Vec<String> },
    Rejected(UploadRejection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { files: Vec<String> },
    Failed { files: Vec<String>, message: String },
    Stale,
}

/// Coordinator metadata for the outstanding chat request.
#[derive(Debug)]
struct ActiveRequest {
    request_id: RequestId,
    cancel: CancelHandle,
}

/// Owns conversation state and the single in-flight chat request.
///
/// All mutation goes through `&mut self`, so the owner's event loop is the
/// only thread of control. Network work is handed out as `'static` tasks and
/// their results come back through `complete_*`, where they are matched by
/// identity before touching state.
pub struct SessionController {
    api: Arc<dyn DocumentApi>,
    options: SessionOptions,
    conversation: Conversation,
    chat_state: ChatState,
    active_request: Option<ActiveRequest>,
    uploads: UploadTracker,
    next_message_id: u64,
    next_request_id: u64,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    pub fn new(api: Arc<dyn DocumentApi>) -> Self {
        Self::with_options(api, SessionOptions::default())
    }

    pub fn with_options(api: Arc<dyn DocumentApi>, options: SessionOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            api,
            options,
            conversation: Conversation::new(),
            chat_state: ChatState::Idle,
            active_request: None,
            uploads: UploadTracker::new(),
            next_message_id: 1,
            next_request_id: 1,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> ChatState {
        self.chat_state
    }

    pub fn is_awaiting_answer(&self) -> bool {
        !self.chat_state.is_idle()
    }

    pub fn upload_record(&self) -> &UploadRecord {
        self.uploads.record()
    }

    /// Names in the batch currently uploading; empty when idle.
    pub fn uploading_files(&self) -> &[String] {
        self.uploads.in_progress()
    }

    /// The single send/stop control.
    ///
    /// While an answer is outstanding this cancels it instead of starting a
    /// new request. Otherwise a non-blank question appends the user message and
    /// a placeholder, then returns the chat task to drive.
    pub fn submit(&mut self, question: &str) -> SubmitOutcome {
        if let Some(request_id) = self.active_request.as_ref().map(|active| active.request_id) {
            self.cancel();
            return SubmitOutcome::Stopped { request_id };
        }

        if question.trim().is_empty() {
            return SubmitOutcome::Rejected(SubmitRejection::BlankQuestion);
        }

        let request_id = self.alloc_request_id();
        if let Err(rejection) = self.apply_transition(ChatTransition::Start(request_id)) {
            tracing::error!(?rejection, "chat state refused a new request");
            return SubmitOutcome::Rejected(SubmitRejection::StateMismatch(rejection));
        }

        let user_message = Message::user(self.alloc_message_id(), question);
        let placeholder = Message::assistant_pending(self.alloc_message_id(), request_id);
        self.append(user_message);
        self.append(placeholder);

        let (cancel, signal) = cancel_pair();
        self.active_request = Some(ActiveRequest { request_id, cancel });

        tracing::info!(request_id = request_id.0, "chat request started");

        let api = Arc::clone(&self.api);
        let question = question.to_string();
        let task = async move {
            let result = api.chat(question, signal).await;
            ChatCompletion::new(request_id, result)
        }
        .boxed();

        SubmitOutcome::Started { request_id, task }
    }

    /// Cancels the outstanding request, if any. Returns whether one was active.
    ///
    /// The placeholder is removed and nothing is appended. A completion for the
    /// cancelled request that arrives later is treated as stale.
    pub fn cancel(&mut self) -> bool {
        let Some(mut active) = self.active_request.take() else {
            return false;
        };
        let request_id = active.request_id;

        active.cancel.cancel();
        if self.conversation.remove_pending(request_id) {
            self.emit(SessionEvent::PendingRemoved { request_id });
        }
        if let Err(rejection) = self.apply_transition(ChatTransition::Cancel(request_id)) {
            tracing::warn!(?rejection, request_id = request_id.0, "cancel transition rejected");
        }

        tracing::info!(request_id = request_id.0, "chat request cancelled");
        true
    }

    /// Applies a chat result. Only the outstanding request may mutate state.
    pub fn complete_chat(&mut self, completion: ChatCompletion) -> ChatOutcome {
        let ChatCompletion { request_id, result } = completion;

        if !self.is_current(request_id) {
            // Identity check, not recency: a cancelled request's late answer lands here.
            tracing::debug!(request_id = request_id.0, "discarding stale chat completion");
            return ChatOutcome::Stale;
        }
        self.active_request = None;

        match result {
            Ok(answer) => {
                tracing::info!(
                    request_id = request_id.0,
                    citation_count = answer.citations.len(),
                    "chat answer received"
                );
                let message = Message::assistant_answer(
                    self.alloc_message_id(),
                    answer.answer,
                    answer.citations,
                );
                self.finalize(request_id, Some(message), ChatTransition::Complete(request_id));
                ChatOutcome::Answered
            }
            Err(error) if error.is_cancelled() => {
                tracing::debug!(request_id = request_id.0, "chat request observed cancellation");
                self.finalize(request_id, None, ChatTransition::Cancel(request_id));
                ChatOutcome::Cancelled
            }
            Err(error) => {
                tracing::warn!(
                    request_id = request_id.0,
                    stage = error.stage(),
                    error = %error,
                    "chat request failed"
                );
                let content = self.format_chat_error(&error);
                let message = Message::assistant_error(self.alloc_message_id(), content);
                self.finalize(request_id, Some(message), ChatTransition::Fail(request_id));
                ChatOutcome::Failed
            }
        }
    }

    /// Stages `files` against the upload record and starts a batch for the rest.
    pub fn start_upload(&mut self, files: Vec<UploadFile>) -> UploadStart {
        if let Some(in_flight) = self.uploads.in_flight_batch() {
            return UploadStart::Rejected(UploadRejection::Busy { in_flight });
        }

        let staged = self.uploads.stage_files(files);
        let duplicates = staged.duplicate_names();

        if staged.is_all_duplicates() {
            tracing::info!(
                duplicate_count = duplicates.len(),
                "all selected files were already uploaded"
            );
            self.emit(SessionEvent::DuplicatesSkipped {
                files: duplicates.clone(),
            });
            return UploadStart::AllDuplicates { duplicates };
        }

        let batch_id = match self.uploads.begin(&staged.accepted) {
            Ok(batch_id) => batch_id,
            Err(rejection) => return UploadStart::Rejected(rejection),
        };
        let accepted = staged.accepted_names();

        if !duplicates.is_empty() {
            self.emit(SessionEvent::DuplicatesSkipped {
                files: duplicates.clone(),
            });
        }
        self.emit(SessionEvent::UploadStarted {
            batch_id,
            files: accepted.clone(),
        });
        tracing::info!(
            batch_id = batch_id.0,
            file_count = accepted.len(),
            skipped = duplicates.len(),
            "upload batch started"
        );

        let api = Arc::clone(&self.api);
        let files = staged.accepted;
        let task = async move {
            let result = api.upload(files).await;
            UploadCompletion::new(batch_id, result)
        }
        .boxed();

        UploadStart::Started {
            batch_id,
            accepted,
            duplicates,
            task,
        }
    }

    /// Applies an upload result. The record only changes on success.
    pub fn complete_upload(&mut self, completion: UploadCompletion) -> UploadOutcome {
        let UploadCompletion { batch_id, result } = completion;

        let Some(files) = self.uploads.finish(batch_id, result.is_ok()) else {
            tracing::debug!(batch_id = batch_id.0, "discarding stale upload completion");
            return UploadOutcome::Stale;
        };

        match result {
            Ok(_) => {
                let notice = Message::assistant_notice(
                    self.alloc_message_id(),
                    upload_success_notice(&files),
                );
                self.append(notice);
                self.emit(SessionEvent::UploadFinished {
                    batch_id,
                    files: files.clone(),
                });
                tracing::info!(batch_id = batch_id.0, file_count = files.len(), "upload finished");
                UploadOutcome::Uploaded { files }
            }
            Err(error) => {
                let message = error.user_message(self.options.error_excerpt_limit);
                tracing::warn!(
                    batch_id = batch_id.0,
                    stage = error.stage(),
                    error = %error,
                    "upload failed"
                );
                self.emit(SessionEvent::UploadFailed {
                    batch_id,
                    files: files.clone(),
                    message: message.clone(),
                });
                UploadOutcome::Failed { files, message }
            }
        }
    }

    /// Fetches the server's document list for [`Self::apply_document_listing`].
    pub fn sync_documents(&self) -> DocumentSyncTask {
        let api = Arc::clone(&self.api);
        async move { api.list_documents().await }.boxed()
    }

    /// Adds server-held filenames to the upload record. Returns how many were new.
    pub fn apply_document_listing(&mut self, listing: &DocumentListing) -> usize {
        let added = self.uploads.record_existing(listing.filenames());
        let total = self.uploads.record().len();
        tracing::info!(added, total, "upload record synced from server listing");
        self.emit(SessionEvent::DocumentsSynced { added, total });
        added
    }

    fn is_current(&self, request_id: RequestId) -> bool {
        self.active_request
            .as_ref()
            .is_some_and(|active| active.request_id == request_id)
            && self.chat_state.accepts_completion(request_id)
    }

    fn finalize(
        &mut self,
        request_id: RequestId,
        replacement: Option<Message>,
        transition: ChatTransition,
    ) {
        match replacement {
            Some(message) => {
                match self.conversation.replace_pending(request_id, message.clone()) {
                    Ok(()) => self.emit(SessionEvent::MessageReplaced {
                        request_id,
                        message,
                    }),
                    Err(rejection) => {
                        tracing::warn!(
                            ?rejection,
                            request_id = request_id.0,
                            "placeholder missing at completion; appending result"
                        );
                        self.append(message);
                    }
                }
            }
            None => {
                if self.conversation.remove_pending(request_id) {
                    self.emit(SessionEvent::PendingRemoved { request_id });
                }
            }
        }

        if let Err(rejection) = self.apply_transition(transition) {
            tracing::warn!(?rejection, request_id = request_id.0, "chat transition rejected");
        }
    }

    fn append(&mut self, message: Message) {
        match self.conversation.push(message.clone()) {
            Ok(()) => self.emit(SessionEvent::MessageAppended(message)),
            Err(rejection) => {
                tracing::warn!(?rejection, message_id = message.id.0, "message append rejected");
            }
        }
    }

    fn apply_transition(&mut self, transition: ChatTransition) -> ChatTransitionResult {
        let next_state = self.chat_state.apply(transition)?;
        self.chat_state = next_state;
        self.emit(SessionEvent::StateChanged(next_state));
        Ok(next_state)
    }

    fn format_chat_error(&self, error: &ApiError) -> String {
        let detail = error.user_message(self.options.error_excerpt_limit);
        format!("{CHAT_ERROR_PREFIX}: {detail}")
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn alloc_request_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id = self.next_request_id.saturating_add(1);
        id
    }
}

/// Assistant notice listing freshly processed documents.
pub fn upload_success_notice(files: &[String]) -> String {
    let lines = files
        .iter()
        .map(|name| format!("• {name}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{UPLOAD_SUCCESS_HEADER}\n\n{lines}")
}
