//! Conversation and upload state for a document Q&A session.
//!
//! [`SessionController`] is the only writer. It hands out network work as
//! boxed tasks and accepts their results back through `complete_*` methods,
//! discarding anything that no longer matches the outstanding request.

mod controller;
mod events;
mod message;
mod upload;

pub use controller::{
    CHAT_ERROR_PREFIX, ChatOutcome, ChatTask, DEFAULT_EVENT_CAPACITY, DocumentSyncTask,
    SessionController, SessionOptions, SubmitOutcome, SubmitRejection, UPLOAD_SUCCESS_HEADER,
    UploadOutcome, UploadStart, UploadTask, upload_success_notice,
};
pub use events::{ChatCompletion, SessionEvent, UploadCompletion};
pub use message::{
    ChatState, ChatTransition, ChatTransitionRejection, ChatTransitionResult, Conversation,
    ConversationRejection, Message, MessageId, MessageStatus, PENDING_PLACEHOLDER, RequestId,
    Role,
};
pub use upload::{StagedFiles, UploadBatchId, UploadRecord, UploadRejection, UploadTracker};
