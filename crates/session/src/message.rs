use lectern_api::Citation;

/// Text shown while an answer is outstanding.
pub const PENDING_PLACEHOLDER: &str = "Thinking...";

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one chat request.
///
/// This must change on every submit so stale completions can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Creates a typed request identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    /// Placeholder standing in for the answer to `RequestId`.
    Pending(RequestId),
    Done,
    /// Assistant reply that reports a failure instead of an answer.
    Error,
}

/// Core message model. Finalized messages are never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub citations: Option<Vec<Citation>>,
    pub status: MessageStatus,
}

impl Message {
    /// Creates a message with explicit status and no citations.
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            citations: None,
            status,
        }
    }

    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content, MessageStatus::Done)
    }

    /// Creates the placeholder for an outstanding request.
    pub fn assistant_pending(id: MessageId, request_id: RequestId) -> Self {
        Self::new(
            id,
            Role::Assistant,
            PENDING_PLACEHOLDER,
            MessageStatus::Pending(request_id),
        )
    }

    pub fn assistant_answer(
        id: MessageId,
        content: impl Into<String>,
        citations: Vec<Citation>,
    ) -> Self {
        Self {
            citations: Some(citations),
            ..Self::new(id, Role::Assistant, content, MessageStatus::Done)
        }
    }

    pub fn assistant_error(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, content, MessageStatus::Error)
    }

    pub fn assistant_notice(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::Assistant, content, MessageStatus::Done)
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        match self.status {
            MessageStatus::Pending(request_id) => Some(request_id),
            MessageStatus::Done | MessageStatus::Error => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_request().is_some()
    }
}

/// Rejection reason for placeholder operations that would break ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationRejection {
    /// A placeholder already occupies the tail.
    PendingExists { request_id: RequestId },
    /// No placeholder for the given request is at the tail.
    NoPendingFor { request_id: RequestId },
    /// Replacements must be finalized messages.
    ReplacementIsPending,
}

/// Ordered message history.
///
/// Append-only, except that the trailing placeholder may be replaced or
/// removed. At most one placeholder exists and it is always last.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn pending(&self) -> Option<&Message> {
        self.messages.last().filter(|message| message.is_pending())
    }

    /// Appends a message.
    ///
    /// A finalized message pushed while a placeholder is outstanding lands
    /// directly ahead of it, so the placeholder stays last.
    pub fn push(&mut self, message: Message) -> Result<(), ConversationRejection> {
        if message.is_pending() {
            return self.push_pending(message);
        }
        if self.pending().is_some() {
            let tail = self.messages.len() - 1;
            self.messages.insert(tail, message);
        } else {
            self.messages.push(message);
        }
        Ok(())
    }

    fn push_pending(&mut self, message: Message) -> Result<(), ConversationRejection> {
        if let Some(request_id) = self.pending().and_then(Message::pending_request) {
            return Err(ConversationRejection::PendingExists { request_id });
        }
        self.messages.push(message);
        Ok(())
    }

    /// Swaps the placeholder for `request_id` with its finalized result.
    pub fn replace_pending(
        &mut self,
        request_id: RequestId,
        replacement: Message,
    ) -> Result<(), ConversationRejection> {
        if replacement.is_pending() {
            return Err(ConversationRejection::ReplacementIsPending);
        }
        if !self.tail_is_pending_for(request_id) {
            return Err(ConversationRejection::NoPendingFor { request_id });
        }
        if let Some(tail) = self.messages.last_mut() {
            *tail = replacement;
        }
        Ok(())
    }

    /// Removes the placeholder for `request_id`. Returns whether one was present.
    pub fn remove_pending(&mut self, request_id: RequestId) -> bool {
        if !self.tail_is_pending_for(request_id) {
            return false;
        }
        self.messages.pop();
        true
    }

    fn tail_is_pending_for(&self, request_id: RequestId) -> bool {
        self.pending()
            .and_then(Message::pending_request)
            .is_some_and(|pending| pending == request_id)
    }
}

/// Chat request state for one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatState {
    #[default]
    Idle,
    AwaitingAnswer(RequestId),
}

/// State transition input for the chat request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTransition {
    Start(RequestId),
    Complete(RequestId),
    Fail(RequestId),
    Cancel(RequestId),
}

/// Rejection reason for illegal chat transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTransitionRejection {
    AlreadyAwaiting {
        active: RequestId,
        attempted: RequestId,
    },
    NoActiveRequest,
    RequestMismatch {
        active: RequestId,
        attempted: RequestId,
    },
}

/// Result type for chat transition application.
pub type ChatTransitionResult = Result<ChatState, ChatTransitionRejection>;

impl ChatState {
    /// Returns the outstanding request if and only if state is `AwaitingAnswer`.
    pub fn active_request(&self) -> Option<RequestId> {
        match self {
            Self::AwaitingAnswer(request_id) => Some(*request_id),
            Self::Idle => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true when a completion for `request_id` may mutate state.
    pub fn accepts_completion(&self, request_id: RequestId) -> bool {
        matches!(self, Self::AwaitingAnswer(active) if *active == request_id)
    }

    /// Applies one transition deterministically.
    ///
    /// `Idle` may start a new request. Every terminal transition must name the
    /// outstanding request exactly and returns to `Idle`.
    pub fn apply(&self, transition: ChatTransition) -> ChatTransitionResult {
        match transition {
            ChatTransition::Start(request_id) => self.apply_start(request_id),
            ChatTransition::Complete(request_id)
            | ChatTransition::Fail(request_id)
            | ChatTransition::Cancel(request_id) => self.apply_finish(request_id),
        }
    }

    fn apply_start(&self, request_id: RequestId) -> ChatTransitionResult {
        match self {
            Self::AwaitingAnswer(active) => Err(ChatTransitionRejection::AlreadyAwaiting {
                active: *active,
                attempted: request_id,
            }),
            Self::Idle => Ok(Self::AwaitingAnswer(request_id)),
        }
    }

    fn apply_finish(&self, request_id: RequestId) -> ChatTransitionResult {
        match self {
            Self::AwaitingAnswer(active) if *active == request_id => Ok(Self::Idle),
            Self::AwaitingAnswer(active) => Err(ChatTransitionRejection::RequestMismatch {
                active: *active,
                attempted: request_id,
            }),
            Self::Idle => Err(ChatTransitionRejection::NoActiveRequest),
        }
    }
}
