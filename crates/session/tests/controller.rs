use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lectern_api::{
    ApiError, ApiResult, BoxFuture, CancelSignal, ChatAnswer, Citation, DocumentApi,
    DocumentEntry, DocumentListing, HealthStatus, UploadAck, UploadFile,
};
use lectern_session::{
    CHAT_ERROR_PREFIX, ChatCompletion, ChatOutcome, ChatState, ChatTask, MessageStatus,
    PENDING_PLACEHOLDER, RequestId, Role, SessionController, SessionEvent, SubmitOutcome,
    SubmitRejection, UPLOAD_SUCCESS_HEADER, UploadOutcome, UploadRejection, UploadStart,
    UploadTask,
};
use tokio::sync::oneshot;

type ChatReply = oneshot::Sender<ApiResult<ChatAnswer>>;

struct ScriptedChat {
    reply: oneshot::Receiver<ApiResult<ChatAnswer>>,
    /// When false the reply is delivered even after the cancel signal fires.
    honors_cancel: bool,
}

/// Fake service whose chat replies are released by the test.
///
/// Chat replies are keyed by question; tasks are lazy, so call order is not
/// submit order.
#[derive(Default)]
struct ScriptedApi {
    chat_replies: Mutex<HashMap<String, ScriptedChat>>,
    upload_replies: Mutex<VecDeque<ApiResult<UploadAck>>>,
    listing: Mutex<Option<DocumentListing>>,
    questions: Mutex<Vec<String>>,
    uploads: Mutex<Vec<Vec<String>>>,
}

impl ScriptedApi {
    fn queue_chat(&self, question: &str) -> ChatReply {
        self.script_chat(question, true)
    }

    /// Reply that still arrives after cancellation, like a server that
    /// finished before noticing the dropped request.
    fn queue_late_chat(&self, question: &str) -> ChatReply {
        self.script_chat(question, false)
    }

    fn script_chat(&self, question: &str, honors_cancel: bool) -> ChatReply {
        let (reply_tx, reply) = oneshot::channel();
        self.chat_replies
            .lock()
            .expect("script mutex should lock")
            .insert(
                question.to_string(),
                ScriptedChat {
                    reply,
                    honors_cancel,
                },
            );
        reply_tx
    }

    fn queue_upload(&self, result: ApiResult<UploadAck>) {
        self.upload_replies
            .lock()
            .expect("script mutex should lock")
            .push_back(result);
    }

    fn set_listing(&self, names: &[&str]) {
        let documents = names
            .iter()
            .map(|name| DocumentEntry {
                filename: name.to_string(),
                size_mb: 0.5,
            })
            .collect::<Vec<_>>();
        let total = documents.len();
        *self.listing.lock().expect("script mutex should lock") =
            Some(DocumentListing { documents, total });
    }

    fn questions(&self) -> Vec<String> {
        self.questions.lock().expect("script mutex should lock").clone()
    }

    fn uploads(&self) -> Vec<Vec<String>> {
        self.uploads.lock().expect("script mutex should lock").clone()
    }
}

impl DocumentApi for ScriptedApi {
    fn upload<'a>(&'a self, files: Vec<UploadFile>) -> BoxFuture<'a, ApiResult<UploadAck>> {
        self.uploads
            .lock()
            .expect("script mutex should lock")
            .push(files.into_iter().map(|file| file.name).collect());
        let reply = self
            .upload_replies
            .lock()
            .expect("script mutex should lock")
            .pop_front();
        Box::pin(async move {
            reply.unwrap_or_else(|| {
                Err(ApiError::Logical {
                    stage: "upload",
                    message: "no scripted reply".to_string(),
                })
            })
        })
    }

    fn chat<'a>(
        &'a self,
        question: String,
        mut cancel: CancelSignal,
    ) -> BoxFuture<'a, ApiResult<ChatAnswer>> {
        let scripted = self
            .chat_replies
            .lock()
            .expect("script mutex should lock")
            .remove(&question);
        self.questions
            .lock()
            .expect("script mutex should lock")
            .push(question);
        Box::pin(async move {
            let Some(ScriptedChat {
                reply,
                honors_cancel,
            }) = scripted
            else {
                return Err(ApiError::Logical {
                    stage: "chat",
                    message: "no scripted reply".to_string(),
                });
            };
            let dropped = Err(ApiError::Cancelled { stage: "chat" });
            if !honors_cancel {
                return reply.await.unwrap_or(dropped);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => dropped,
                result = reply => result.unwrap_or(dropped),
            }
        })
    }

    fn list_documents<'a>(&'a self) -> BoxFuture<'a, ApiResult<DocumentListing>> {
        let listing = self.listing.lock().expect("script mutex should lock").clone();
        Box::pin(async move {
            listing.ok_or(ApiError::Server {
                stage: "list_documents",
                status: 503,
                message: "unavailable".to_string(),
            })
        })
    }

    fn health<'a>(&'a self) -> BoxFuture<'a, ApiResult<HealthStatus>> {
        Box::pin(async {
            Ok(HealthStatus {
                status: "ok".to_string(),
            })
        })
    }
}

fn session() -> (Arc<ScriptedApi>, SessionController) {
    let api = Arc::new(ScriptedApi::default());
    let controller = SessionController::new(api.clone());
    (api, controller)
}

fn started(outcome: SubmitOutcome) -> (RequestId, ChatTask) {
    match outcome {
        SubmitOutcome::Started { request_id, task } => (request_id, task),
        SubmitOutcome::Stopped { request_id } => panic!("expected start, got stop of {request_id:?}"),
        SubmitOutcome::Rejected(rejection) => panic!("expected start, got {rejection:?}"),
    }
}

fn upload_started(start: UploadStart) -> (Vec<String>, Vec<String>, UploadTask) {
    match start {
        UploadStart::Started {
            accepted,
            duplicates,
            task,
            ..
        } => (accepted, duplicates, task),
        UploadStart::AllDuplicates { duplicates } => {
            panic!("expected an upload, every file was a duplicate: {duplicates:?}")
        }
        UploadStart::Rejected(rejection) => panic!("expected an upload, got {rejection:?}"),
    }
}

fn answer(text: &str) -> ChatAnswer {
    ChatAnswer {
        answer: text.to_string(),
        citations: vec![Citation::new("doc.pdf", page(3), 0.9, "...")],
    }
}

fn page(number: u32) -> NonZeroU32 {
    NonZeroU32::new(number).expect("page numbers start at 1")
}

fn pdf(name: &str) -> UploadFile {
    UploadFile::new(name, b"%PDF-1.7".to_vec())
}

fn accepted_ack() -> ApiResult<UploadAck> {
    Ok(UploadAck {
        status: Some("success".to_string()),
        message: None,
    })
}

fn contents(controller: &SessionController) -> Vec<String> {
    controller
        .conversation()
        .messages()
        .iter()
        .map(|message| message.content.clone())
        .collect()
}

#[tokio::test]
async fn answered_question_replaces_placeholder() {
    let (api, mut controller) = session();
    let reply = api.queue_chat("What is X?");

    let (request_id, task) = started(controller.submit("What is X?"));
    assert_eq!(controller.state(), ChatState::AwaitingAnswer(request_id));
    assert_eq!(contents(&controller), ["What is X?", PENDING_PLACEHOLDER]);
    assert!(controller.conversation().pending().is_some());

    reply.send(Ok(answer("X is Y"))).ok();
    assert_eq!(controller.complete_chat(task.await), ChatOutcome::Answered);

    let messages = controller.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "X is Y");
    assert_eq!(messages[1].status, MessageStatus::Done);
    assert_eq!(
        messages[1].citations,
        Some(vec![Citation::new("doc.pdf", page(3), 0.9, "...")])
    );
    assert_eq!(controller.state(), ChatState::Idle);
    assert_eq!(api.questions(), ["What is X?"]);
}

#[tokio::test]
async fn blank_question_is_rejected_without_request() {
    let (api, mut controller) = session();

    assert!(matches!(
        controller.submit("   \n\t"),
        SubmitOutcome::Rejected(SubmitRejection::BlankQuestion)
    ));
    assert!(controller.conversation().is_empty());
    assert!(controller.state().is_idle());
    assert!(api.questions().is_empty());
}

#[tokio::test]
async fn submit_while_awaiting_stops_the_request() {
    let (api, mut controller) = session();
    let _reply = api.queue_chat("first");

    let (request_id, task) = started(controller.submit("first"));
    assert!(matches!(
        controller.submit("second"),
        SubmitOutcome::Stopped { request_id: stopped } if stopped == request_id
    ));

    assert_eq!(contents(&controller), ["first"]);
    assert!(controller.state().is_idle());

    // The fake observes the cancel signal; its result is no longer wanted.
    let completion = task.await;
    assert!(matches!(&completion.result, Err(error) if error.is_cancelled()));
    assert_eq!(controller.complete_chat(completion), ChatOutcome::Stale);
    assert_eq!(contents(&controller), ["first"]);
    assert_eq!(api.questions(), ["first"]);
}

#[tokio::test]
async fn late_answer_after_cancel_never_appears() {
    let (api, mut controller) = session();
    let first_reply = api.queue_late_chat("first");
    let second_reply = api.queue_chat("second");

    let (first_id, first_task) = started(controller.submit("first"));
    assert!(controller.cancel());
    assert!(!controller.cancel());

    let (second_id, second_task) = started(controller.submit("second"));
    assert_ne!(first_id, second_id);

    // The cancelled request still gets an answer back from the server.
    first_reply.send(Ok(answer("late answer"))).ok();
    let late = first_task.await;
    assert_eq!(late.request_id, first_id);
    assert!(late.result.is_ok());
    assert_eq!(controller.complete_chat(late), ChatOutcome::Stale);
    assert_eq!(contents(&controller), ["first", "second", PENDING_PLACEHOLDER]);
    assert_eq!(controller.state(), ChatState::AwaitingAnswer(second_id));

    second_reply.send(Ok(answer("fresh answer"))).ok();
    assert_eq!(controller.complete_chat(second_task.await), ChatOutcome::Answered);
    assert_eq!(contents(&controller), ["first", "second", "fresh answer"]);
    assert_eq!(api.questions(), ["first", "second"]);
}

#[tokio::test]
async fn tasks_resolve_independently_of_poll_order() {
    let (api, mut controller) = session();
    let _first_reply = api.queue_chat("first");
    let second_reply = api.queue_chat("second");

    let (_, first_task) = started(controller.submit("first"));
    controller.cancel();
    let (_, second_task) = started(controller.submit("second"));

    // Nothing reaches the api until a task is polled.
    assert!(api.questions().is_empty());

    second_reply.send(Ok(answer("fresh answer"))).ok();
    let completion = tokio::time::timeout(Duration::from_secs(2), second_task)
        .await
        .expect("second task should resolve without the first being polled");
    assert_eq!(controller.complete_chat(completion), ChatOutcome::Answered);

    let stale = first_task.await;
    assert!(matches!(&stale.result, Err(error) if error.is_cancelled()));
    assert_eq!(controller.complete_chat(stale), ChatOutcome::Stale);
    assert_eq!(contents(&controller), ["first", "second", "fresh answer"]);
}

#[tokio::test]
async fn server_error_becomes_assistant_error_message() {
    let (api, mut controller) = session();
    let reply = api.queue_chat("anything");

    let (_, task) = started(controller.submit("anything"));
    reply
        .send(Err(ApiError::Server {
            stage: "chat",
            status: 500,
            message: "server overloaded".to_string(),
        }))
        .ok();

    assert_eq!(controller.complete_chat(task.await), ChatOutcome::Failed);

    let last = controller.conversation().last().expect("reply should exist");
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.status, MessageStatus::Error);
    assert!(last.content.starts_with(CHAT_ERROR_PREFIX));
    assert!(last.content.contains("server overloaded"));
    assert!(controller.conversation().pending().is_none());
    assert!(controller.state().is_idle());
}

#[tokio::test]
async fn long_error_text_is_bounded() {
    let (api, mut controller) = session();
    let reply = api.queue_chat("anything");

    let (_, task) = started(controller.submit("anything"));
    reply
        .send(Err(ApiError::Server {
            stage: "chat",
            status: 502,
            message: "x".repeat(5_000),
        }))
        .ok();
    controller.complete_chat(task.await);

    let last = controller.conversation().last().expect("reply should exist");
    let bound = CHAT_ERROR_PREFIX.chars().count() + 2 + 200;
    assert!(last.content.chars().count() <= bound);
    assert!(last.content.ends_with('…'));
}

#[tokio::test]
async fn cancelled_result_for_current_request_removes_placeholder() {
    let (_api, mut controller) = session();

    let (request_id, _task) = started(controller.submit("anything"));
    let completion = ChatCompletion::new(request_id, Err(ApiError::Cancelled { stage: "chat" }));

    assert_eq!(controller.complete_chat(completion), ChatOutcome::Cancelled);
    assert_eq!(contents(&controller), ["anything"]);
    assert!(controller.state().is_idle());
}

#[tokio::test]
async fn submit_emits_state_then_messages() {
    let (api, mut controller) = session();
    let _reply = api.queue_chat("hello");
    let mut events = controller.subscribe();

    let (request_id, _task) = started(controller.submit("hello"));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], SessionEvent::StateChanged(ChatState::AwaitingAnswer(request_id)));
    assert!(matches!(&seen[1], SessionEvent::MessageAppended(message) if message.content == "hello"));
    assert!(matches!(&seen[2], SessionEvent::MessageAppended(message) if message.is_pending()));
}

#[tokio::test]
async fn successful_upload_records_names_and_posts_notice() {
    let (api, mut controller) = session();
    api.queue_upload(accepted_ack());

    let (accepted, duplicates, task) =
        upload_started(controller.start_upload(vec![pdf("a.pdf"), pdf("b.pdf")]));
    assert_eq!(accepted, ["a.pdf", "b.pdf"]);
    assert!(duplicates.is_empty());
    assert_eq!(controller.uploading_files(), ["a.pdf", "b.pdf"]);

    let outcome = controller.complete_upload(task.await);
    assert_eq!(
        outcome,
        UploadOutcome::Uploaded {
            files: vec!["a.pdf".to_string(), "b.pdf".to_string()]
        }
    );
    assert!(controller.uploading_files().is_empty());
    assert!(controller.upload_record().contains("a.pdf"));
    assert!(controller.upload_record().contains("b.pdf"));

    let notice = controller.conversation().last().expect("notice should exist");
    assert_eq!(notice.role, Role::Assistant);
    assert!(notice.content.starts_with(UPLOAD_SUCCESS_HEADER));
    assert!(notice.content.contains("• a.pdf"));
    assert!(notice.content.contains("• b.pdf"));
}

#[tokio::test]
async fn duplicate_names_are_skipped() {
    let (api, mut controller) = session();
    api.queue_upload(accepted_ack());
    api.queue_upload(accepted_ack());

    let (_, _, task) = upload_started(controller.start_upload(vec![pdf("a.pdf")]));
    controller.complete_upload(task.await);

    let (accepted, duplicates, task) =
        upload_started(controller.start_upload(vec![pdf("a.pdf"), pdf("b.pdf")]));
    assert_eq!(accepted, ["b.pdf"]);
    assert_eq!(duplicates, ["a.pdf"]);
    controller.complete_upload(task.await);

    assert_eq!(
        api.uploads(),
        [vec!["a.pdf".to_string()], vec!["b.pdf".to_string()]]
    );
}

#[tokio::test]
async fn all_duplicates_issue_no_request() {
    let (api, mut controller) = session();
    api.queue_upload(accepted_ack());

    let (_, _, task) = upload_started(controller.start_upload(vec![pdf("a.pdf")]));
    controller.complete_upload(task.await);
    let messages_before = controller.conversation().len();

    let mut events = controller.subscribe();
    assert!(matches!(
        controller.start_upload(vec![pdf("a.pdf")]),
        UploadStart::AllDuplicates { duplicates } if duplicates == ["a.pdf"]
    ));
    assert_eq!(
        events.try_recv().ok(),
        Some(SessionEvent::DuplicatesSkipped {
            files: vec!["a.pdf".to_string()]
        })
    );
    assert_eq!(api.uploads().len(), 1);
    assert_eq!(controller.conversation().len(), messages_before);
}

#[tokio::test]
async fn failed_upload_keeps_record_and_conversation() {
    let (api, mut controller) = session();
    api.queue_upload(Err(ApiError::Logical {
        stage: "upload",
        message: "Could not extract text from uploaded files.".to_string(),
    }));

    let mut events = controller.subscribe();
    let (_, _, task) = upload_started(controller.start_upload(vec![pdf("scan.pdf")]));
    let outcome = controller.complete_upload(task.await);

    assert_eq!(
        outcome,
        UploadOutcome::Failed {
            files: vec!["scan.pdf".to_string()],
            message: "Could not extract text from uploaded files.".to_string(),
        }
    );
    assert!(controller.upload_record().is_empty());
    assert!(controller.conversation().is_empty());

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::UploadFailed { message, .. } = event {
            saw_failure = message.contains("Could not extract text");
        }
    }
    assert!(saw_failure);

    api.queue_upload(accepted_ack());
    let (accepted, _, _) = upload_started(controller.start_upload(vec![pdf("scan.pdf")]));
    assert_eq!(accepted, ["scan.pdf"]);
}

#[tokio::test]
async fn second_upload_is_rejected_while_busy() {
    let (api, mut controller) = session();
    api.queue_upload(accepted_ack());

    let (_, _, task) = upload_started(controller.start_upload(vec![pdf("a.pdf")]));
    assert!(matches!(
        controller.start_upload(vec![pdf("b.pdf")]),
        UploadStart::Rejected(UploadRejection::Busy { .. })
    ));
    assert!(matches!(
        controller.complete_upload(task.await),
        UploadOutcome::Uploaded { .. }
    ));
    assert!(!controller.upload_record().contains("b.pdf"));
}

#[tokio::test]
async fn empty_selection_is_rejected() {
    let (api, mut controller) = session();

    assert!(matches!(
        controller.start_upload(Vec::new()),
        UploadStart::Rejected(UploadRejection::NothingToUpload)
    ));
    assert!(api.uploads().is_empty());
}

#[tokio::test]
async fn upload_notice_lands_ahead_of_pending_answer() {
    let (api, mut controller) = session();
    let reply = api.queue_chat("question");
    api.queue_upload(accepted_ack());

    let (_, chat_task) = started(controller.submit("question"));
    let (_, _, upload_task) = upload_started(controller.start_upload(vec![pdf("a.pdf")]));
    controller.complete_upload(upload_task.await);

    let messages = controller.conversation().messages();
    assert_eq!(messages.len(), 3);
    assert!(messages[1].content.starts_with(UPLOAD_SUCCESS_HEADER));
    assert!(messages[2].is_pending());

    reply.send(Ok(answer("done"))).ok();
    assert_eq!(controller.complete_chat(chat_task.await), ChatOutcome::Answered);
    assert_eq!(
        controller.conversation().last().map(|message| message.content.as_str()),
        Some("done")
    );
}

#[tokio::test]
async fn document_listing_seeds_upload_record() {
    let (api, mut controller) = session();
    api.set_listing(&["existing.pdf"]);

    let listing = controller
        .sync_documents()
        .await
        .expect("listing should succeed");
    assert_eq!(controller.apply_document_listing(&listing), 1);
    assert_eq!(controller.apply_document_listing(&listing), 0);

    assert!(matches!(
        controller.start_upload(vec![pdf("existing.pdf")]),
        UploadStart::AllDuplicates { .. }
    ));
    assert!(api.uploads().is_empty());
}
