use deskchat_render::escape_html;

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one request/reply turn.
///
/// Changes on every submit so a completion for an older turn can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    /// Creates a typed turn identifier.
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

/// One immutable chat entry.
///
/// User content is the trimmed raw text. Assistant content is already safe HTML:
/// either render pipeline output or a fixed, escaped status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
        }
    }

    /// HTML suitable for direct insertion into the message list.
    pub fn display_html(&self) -> String {
        match self.role {
            Role::User => escape_html(&self.content),
            Role::Assistant => self.content.clone(),
        }
    }
}

/// Conversation aggregate root for chat state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub messages: Vec<Message>,
    pub draft_input: String,
    pub turn_state: TurnState,
    next_message_id: u64,
}

impl Conversation {
    /// Creates an idle conversation seeded with one assistant greeting.
    pub fn seeded(greeting_html: impl Into<String>) -> Self {
        let mut conversation = Self {
            messages: Vec::new(),
            draft_input: String::new(),
            turn_state: TurnState::Idle,
            next_message_id: 1,
        };
        conversation.push(Role::Assistant, greeting_html);
        conversation
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.turn_state.active_turn().is_some()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Appends a message and returns its identifier. Messages are never removed.
    pub(crate) fn push(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id += 1;
        self.messages.push(Message::new(id, role, content));
        id
    }

    /// Applies a deterministic turn transition.
    pub fn apply_turn_transition(&mut self, transition: TurnTransition) -> TurnTransitionResult {
        let next_state = self.turn_state.apply(transition)?;
        self.turn_state = next_state;
        Ok(next_state)
    }
}

/// Request lifecycle for the conversation. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    AwaitingReply(TurnId),
}

/// State transition input for the turn lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransition {
    Start(TurnId),
    Resolve(TurnId),
}

/// Rejection reason for illegal turn transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransitionRejection {
    AlreadyAwaiting { active: TurnId, attempted: TurnId },
    NoActiveTurn { attempted: TurnId },
    TurnMismatch { active: TurnId, attempted: TurnId },
}

pub type TurnTransitionResult = Result<TurnState, TurnTransitionRejection>;

impl TurnState {
    /// Returns the in-flight turn if and only if state is `AwaitingReply`.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::AwaitingReply(turn) => Some(*turn),
            Self::Idle => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// Only an idle conversation may start a turn, and a resolution must name the
    /// in-flight turn exactly.
    pub fn apply(&self, transition: TurnTransition) -> TurnTransitionResult {
        match (self, transition) {
            (Self::Idle, TurnTransition::Start(turn)) => Ok(Self::AwaitingReply(turn)),
            (Self::AwaitingReply(active), TurnTransition::Start(attempted)) => {
                Err(TurnTransitionRejection::AlreadyAwaiting {
                    active: *active,
                    attempted,
                })
            }
            (Self::AwaitingReply(active), TurnTransition::Resolve(attempted))
                if *active == attempted =>
            {
                Ok(Self::Idle)
            }
            (Self::AwaitingReply(active), TurnTransition::Resolve(attempted)) => {
                Err(TurnTransitionRejection::TurnMismatch {
                    active: *active,
                    attempted,
                })
            }
            (Self::Idle, TurnTransition::Resolve(attempted)) => {
                Err(TurnTransitionRejection::NoActiveTurn { attempted })
            }
        }
    }
}
