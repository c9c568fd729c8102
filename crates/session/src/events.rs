use lectern_api::{ApiResult, ChatAnswer, UploadAck};

use crate::message::{ChatState, Message, RequestId};
use crate::upload::UploadBatchId;

/// Notification emitted after the controller changes observable state.
///
/// Renderers subscribe to these instead of polling the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MessageAppended(Message),
    /// The placeholder for `request_id` was swapped for its final message.
    MessageReplaced {
        request_id: RequestId,
        message: Message,
    },
    PendingRemoved {
        request_id: RequestId,
    },
    StateChanged(ChatState),
    UploadStarted {
        batch_id: UploadBatchId,
        files: Vec<String>,
    },
    UploadFinished {
        batch_id: UploadBatchId,
        files: Vec<String>,
    },
    UploadFailed {
        batch_id: UploadBatchId,
        files: Vec<String>,
        message: String,
    },
    /// Informational: these names were already uploaded and were not sent.
    DuplicatesSkipped {
        files: Vec<String>,
    },
    DocumentsSynced {
        added: usize,
        total: usize,
    },
}

/// Result of one chat request, tagged with the request it answers.
#[derive(Debug)]
pub struct ChatCompletion {
    pub request_id: RequestId,
    pub result: ApiResult<ChatAnswer>,
}

impl ChatCompletion {
    pub fn new(request_id: RequestId, result: ApiResult<ChatAnswer>) -> Self {
        Self { request_id, result }
    }
}

/// Result of one upload batch.
#[derive(Debug)]
pub struct UploadCompletion {
    pub batch_id: UploadBatchId,
    pub result: ApiResult<UploadAck>,
}

impl UploadCompletion {
    pub fn new(batch_id: UploadBatchId, result: ApiResult<UploadAck>) -> Self {
        Self { batch_id, result }
    }
}
