/// Turn orchestration and surface side effects.
pub mod controller;
/// Event contracts for chat module wiring.
pub mod events;
/// Domain entities and deterministic turn state boundaries.
pub mod message;

pub use controller::{ChatController, ChatSurface, PendingTurn};
pub use events::{
    BACKEND_ERROR_PREFIX, CONNECTION_ERROR_MESSAGE, EMPTY_RESPONSE_MESSAGE, Submit, TurnOutcome,
};
pub use message::{
    Conversation, Message, MessageId, Role, TurnId, TurnState, TurnTransition,
    TurnTransitionRejection, TurnTransitionResult,
};
