use std::sync::Arc;

use deskchat_render::RenderPipeline;
use deskchat_transport::{BackendReply, BoxFuture, ChatTransport, TransportResult};

use crate::chat::events::{Submit, TurnOutcome};
use crate::chat::message::{
    Conversation, Message, MessageId, Role, TurnId, TurnTransition, TurnTransitionRejection,
};

/// Side effects the controller requests from whatever displays the conversation.
///
/// Each method is called once per state transition that affects it.
pub trait ChatSurface {
    fn set_messages(&mut self, messages: &[Message]);
    fn set_awaiting_reply(&mut self, awaiting: bool);
    fn request_scroll_to_bottom(&mut self);
}

/// A submitted turn whose reply has not been applied yet.
///
/// The reply future owns its request, so the controller stays free to be
/// borrowed while it is awaited.
pub struct PendingTurn {
    submit: Submit,
    reply: BoxFuture<'static, TransportResult<BackendReply>>,
}

impl PendingTurn {
    pub fn turn(&self) -> TurnId {
        self.submit.turn
    }

    pub fn content(&self) -> &str {
        &self.submit.content
    }

    /// Waits for the transport and returns the result tagged with its turn.
    pub async fn wait(self) -> (TurnId, TransportResult<BackendReply>) {
        let result = self.reply.await;
        (self.submit.turn, result)
    }
}

impl std::fmt::Debug for PendingTurn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTurn")
            .field("submit", &self.submit)
            .finish_non_exhaustive()
    }
}

/// Owns one conversation and drives it through submit/reply turns.
pub struct ChatController<S: ChatSurface> {
    conversation: Conversation,
    transport: Arc<dyn ChatTransport>,
    pipeline: Arc<RenderPipeline>,
    greeting: String,
    surface: S,
    next_turn_id: u64,
}

impl<S: ChatSurface> ChatController<S> {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        pipeline: Arc<RenderPipeline>,
        greeting: impl Into<String>,
        mut surface: S,
    ) -> Self {
        let greeting = greeting.into();
        let conversation = Conversation::seeded(pipeline.render(&greeting));
        surface.set_messages(&conversation.messages);
        surface.set_awaiting_reply(false);

        Self {
            conversation,
            transport,
            pipeline,
            greeting,
            surface,
            next_turn_id: 1,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    pub fn is_awaiting_reply(&self) -> bool {
        self.conversation.is_awaiting_reply()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.conversation.draft_input = text.into();
    }

    /// Submits the current draft input.
    pub fn submit_draft(&mut self) -> Option<PendingTurn> {
        let draft = std::mem::take(&mut self.conversation.draft_input);
        let pending = self.submit(&draft);
        if pending.is_none() {
            // Nothing was sent, so the user keeps what they typed.
            self.conversation.draft_input = draft;
        }
        pending
    }

    /// Starts a turn for `text`.
    ///
    /// Returns `None` without touching state when the text is blank or a reply is
    /// still outstanding.
    pub fn submit(&mut self, text: &str) -> Option<PendingTurn> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }

        if let Some(active) = self.conversation.turn_state.active_turn() {
            tracing::debug!(turn = ?active, "ignoring submit while awaiting reply");
            return None;
        }

        let turn = TurnId::new(self.next_turn_id);
        if let Err(rejection) = self
            .conversation
            .apply_turn_transition(TurnTransition::Start(turn))
        {
            tracing::warn!(turn = ?turn, rejection = ?rejection, "turn start rejected");
            return None;
        }
        self.next_turn_id += 1;

        self.conversation.push(Role::User, content);
        self.conversation.draft_input.clear();
        self.surface.set_messages(&self.conversation.messages);
        self.surface.set_awaiting_reply(true);
        self.surface.request_scroll_to_bottom();

        tracing::debug!(turn = ?turn, transport = self.transport.name(), "turn submitted");
        Some(PendingTurn {
            reply: self.transport.send(content),
            submit: Submit::new(turn, content),
        })
    }

    /// Applies the transport result for `turn` and returns the appended message.
    ///
    /// Results for any turn other than the one in flight are rejected and leave the
    /// conversation untouched.
    pub fn complete(
        &mut self,
        turn: TurnId,
        result: TransportResult<BackendReply>,
    ) -> Result<MessageId, TurnTransitionRejection> {
        if let Err(error) = &result {
            tracing::warn!(turn = ?turn, stage = error.stage(), error = %error, "transport failed");
        }

        self.conversation
            .apply_turn_transition(TurnTransition::Resolve(turn))
            .inspect_err(|rejection| {
                tracing::warn!(turn = ?turn, rejection = ?rejection, "dropping stale turn result");
            })?;

        let outcome = TurnOutcome::from_transport(result);
        if outcome.is_failure() {
            tracing::info!(turn = ?turn, outcome = ?outcome, "turn resolved without a reply");
        }

        let id = self
            .conversation
            .push(Role::Assistant, outcome.to_message_html(&self.pipeline));
        self.surface.set_messages(&self.conversation.messages);
        self.surface.set_awaiting_reply(false);
        self.surface.request_scroll_to_bottom();
        Ok(id)
    }

    /// Runs one full turn: submit, await the transport, apply the result.
    pub async fn send(&mut self, text: &str) -> Option<MessageId> {
        let pending = self.submit(text)?;
        let (turn, result) = pending.wait().await;
        self.complete(turn, result).ok()
    }

    /// Resets to a fresh conversation with only the greeting.
    ///
    /// Ignored while a reply is outstanding because in-flight turns cannot be
    /// cancelled.
    pub fn new_chat(&mut self) -> bool {
        if let Some(active) = self.conversation.turn_state.active_turn() {
            tracing::debug!(turn = ?active, "ignoring new chat while awaiting reply");
            return false;
        }

        self.conversation = Conversation::seeded(self.pipeline.render(&self.greeting));
        self.surface.set_messages(&self.conversation.messages);
        self.surface.request_scroll_to_bottom();
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use deskchat_transport::TransportError;
    use futures::FutureExt;

    use super::*;
    use crate::chat::events::CONNECTION_ERROR_MESSAGE;
    use crate::chat::message::TurnState;

    const GREETING: &str =
        "Hello! I can help you find information in your ERP. What would you like to know?";

    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<TransportResult<BackendReply>>>,
        sent: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn with_replies(replies: impl IntoIterator<Item = TransportResult<BackendReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                sent: Mutex::default(),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.sent.lock().expect("sent lock").clone()
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        fn send(&self, message: &str) -> BoxFuture<'static, TransportResult<BackendReply>> {
            self.sent.lock().expect("sent lock").push(message.to_string());
            let reply = self
                .replies
                .lock()
                .expect("replies lock")
                .pop_front()
                .unwrap_or(Ok(BackendReply::Empty));
            futures::future::ready(reply).boxed()
        }
    }

    #[derive(Debug, Default)]
    struct RecordingSurface {
        message_syncs: usize,
        awaiting_flags: Vec<bool>,
        scrolls: usize,
        last_len: usize,
    }

    impl ChatSurface for RecordingSurface {
        fn set_messages(&mut self, messages: &[Message]) {
            self.message_syncs += 1;
            self.last_len = messages.len();
        }

        fn set_awaiting_reply(&mut self, awaiting: bool) {
            self.awaiting_flags.push(awaiting);
        }

        fn request_scroll_to_bottom(&mut self) {
            self.scrolls += 1;
        }
    }

    fn controller(transport: Arc<ScriptedTransport>) -> ChatController<RecordingSurface> {
        ChatController::new(
            transport,
            Arc::new(RenderPipeline::default()),
            GREETING,
            RecordingSurface::default(),
        )
    }

    fn network_fault() -> TransportResult<BackendReply> {
        Err(TransportError::Status {
            stage: "rpc-http-status",
            status: 502,
            body: "Bad Gateway".to_string(),
        })
    }

    #[test]
    fn starts_idle_with_rendered_greeting() {
        let chat = controller(ScriptedTransport::with_replies([]));
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].role, Role::Assistant);
        assert!(chat.messages()[0].content.contains(GREETING));
        assert!(!chat.is_awaiting_reply());
        assert_eq!(chat.surface().last_len, 1);
    }

    #[test]
    fn submit_appends_once_and_ignores_second_submit() {
        let transport = ScriptedTransport::with_replies([]);
        let mut chat = controller(transport.clone());

        let pending = chat.submit("  How many invoices are open?  ").expect("turn started");
        assert_eq!(pending.content(), "How many invoices are open?");
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[1].role, Role::User);
        assert_eq!(chat.messages()[1].content, "How many invoices are open?");
        assert_eq!(
            chat.conversation().turn_state,
            TurnState::AwaitingReply(pending.turn())
        );

        assert!(chat.submit("another question").is_none());
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(transport.sent(), vec!["How many invoices are open?".to_string()]);
    }

    #[test]
    fn blank_submit_is_ignored() {
        let transport = ScriptedTransport::with_replies([]);
        let mut chat = controller(transport.clone());
        assert!(chat.submit("   \n\t").is_none());
        assert_eq!(chat.messages().len(), 1);
        assert!(!chat.is_awaiting_reply());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn successful_turn_renders_markdown() {
        let mut chat = controller(ScriptedTransport::with_replies([Ok(BackendReply::Response(
            "You have **12** open invoices.".to_string(),
        ))]));

        let pending = chat.submit("How many invoices are open?").expect("turn started");
        assert!(chat.is_awaiting_reply());
        assert_eq!(chat.messages().len(), 2);

        let (turn, result) = pending.wait().await;
        chat.complete(turn, result).expect("active turn");

        assert!(!chat.is_awaiting_reply());
        assert_eq!(chat.messages().len(), 3);
        let last = chat.conversation().last_message().expect("reply");
        assert_eq!(last.role, Role::Assistant);
        assert!(last.content.contains("<strong>12</strong>"));
        assert!(!last.content.contains("**"));
    }

    #[tokio::test]
    async fn network_fault_becomes_connection_error() {
        let mut chat = controller(ScriptedTransport::with_replies([network_fault()]));

        let id = chat.send("hello").await.expect("turn resolved");
        let last = chat.conversation().last_message().expect("reply");
        assert_eq!(last.id, id);
        assert_eq!(last.content, CONNECTION_ERROR_MESSAGE);
        assert!(!chat.is_awaiting_reply());
    }

    #[tokio::test]
    async fn backend_error_and_empty_reply_use_fixed_messages() {
        let mut chat = controller(ScriptedTransport::with_replies([
            Ok(BackendReply::Error("No API key <configured>".to_string())),
            Ok(BackendReply::Empty),
        ]));

        chat.send("first").await.expect("turn resolved");
        assert_eq!(
            chat.conversation().last_message().map(|m| m.content.as_str()),
            Some("Error: No API key &lt;configured&gt;")
        );

        chat.send("second").await.expect("turn resolved");
        assert_eq!(
            chat.conversation().last_message().map(|m| m.content.as_str()),
            Some("Something went wrong.")
        );
    }

    #[tokio::test]
    async fn stale_turn_result_is_rejected() {
        let mut chat = controller(ScriptedTransport::with_replies([
            Ok(BackendReply::Response("first".to_string())),
            Ok(BackendReply::Response("second".to_string())),
        ]));

        let first = chat.submit("one").expect("first turn");
        let (first_turn, first_result) = first.wait().await;
        chat.complete(first_turn, first_result).expect("first turn resolves");

        let second = chat.submit("two").expect("second turn");
        let second_turn = second.turn();
        assert_ne!(first_turn, second_turn);

        let rejection = chat
            .complete(first_turn, Ok(BackendReply::Response("late".to_string())))
            .unwrap_err();
        assert_eq!(
            rejection,
            TurnTransitionRejection::TurnMismatch {
                active: second_turn,
                attempted: first_turn,
            }
        );
        assert_eq!(chat.messages().len(), 4);
        assert!(chat.is_awaiting_reply());

        let (turn, result) = second.wait().await;
        chat.complete(turn, result).expect("second turn resolves");
        assert_eq!(chat.messages().len(), 5);
    }

    #[tokio::test]
    async fn surface_effects_fire_once_per_transition() {
        let cycles = 12;
        let mut chat = controller(ScriptedTransport::with_replies(
            (0..cycles).map(|index| Ok(BackendReply::Response(format!("answer {index}")))),
        ));
        let baseline_syncs = chat.surface().message_syncs;
        let baseline_flags = chat.surface().awaiting_flags.len();

        for index in 0..cycles {
            let pending = chat.submit(&format!("question {index}")).expect("turn started");
            assert!(chat.submit("ignored").is_none());
            let (turn, result) = pending.wait().await;
            chat.complete(turn, result).expect("turn resolves");
        }

        let surface = chat.surface();
        assert_eq!(surface.message_syncs - baseline_syncs, cycles * 2);
        assert_eq!(surface.scrolls, cycles * 2);
        let flags = &surface.awaiting_flags[baseline_flags..];
        assert_eq!(flags.len(), cycles * 2);
        assert!(flags.chunks(2).all(|pair| pair == [true, false]));
        assert_eq!(surface.last_len, 1 + cycles * 2);
    }

    #[tokio::test]
    async fn new_chat_resets_only_when_idle() {
        let mut chat = controller(ScriptedTransport::with_replies([Ok(
            BackendReply::Response("ok".to_string()),
        )]));

        let pending = chat.submit("question").expect("turn started");
        assert!(!chat.new_chat());
        assert_eq!(chat.messages().len(), 2);

        let (turn, result) = pending.wait().await;
        chat.complete(turn, result).expect("turn resolves");
        assert!(chat.new_chat());
        assert_eq!(chat.messages().len(), 1);
        assert!(chat.messages()[0].content.contains(GREETING));
        assert!(!chat.is_awaiting_reply());
    }

    #[test]
    fn failed_submit_keeps_draft() {
        let mut chat = controller(ScriptedTransport::with_replies([]));
        chat.set_draft("   ");
        assert!(chat.submit_draft().is_none());
        assert_eq!(chat.conversation().draft_input, "   ");

        chat.set_draft("Sales Invoice SINV-1 status?");
        let pending = chat.submit_draft().expect("turn started");
        assert_eq!(pending.content(), "Sales Invoice SINV-1 status?");
        assert!(chat.conversation().draft_input.is_empty());
    }
}
