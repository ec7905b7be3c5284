use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::error::ChatError;
use crate::interpreter::{
    DeltaObserver, LineBuffer, NoDeltas, StreamInterpreter, StreamStatus, interpret_document,
};
use crate::model::{Conversation, Message, MessageRole};
use crate::request::CompletionRequest;
use crate::transport::{ChatTransport, ReplyBody};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Applying,
    RollingBack,
}

/// One conversation bound to one transport.
///
/// After every `send` the conversation holds either both the new user and
/// assistant messages or neither of them.
pub struct ChatSession<T> {
    transport: T,
    generation: GenerationConfig,
    conversation: Conversation,
    state: SessionState,
}

impl<T> ChatSession<T>
where
    T: ChatTransport,
{
    pub fn new(transport: T, generation: GenerationConfig, system_prompt: impl Into<String>) -> Self {
        Self {
            transport,
            generation,
            conversation: Conversation::new(system_prompt),
            state: SessionState::Idle,
        }
    }

    pub fn history(&self) -> &[Message] {
        self.conversation.snapshot()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn generation(&self) -> &GenerationConfig {
        &self.generation
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn reset(&mut self) {
        self.conversation.reset();
        self.state = SessionState::Idle;
    }

    pub async fn send(&mut self, user_text: &str) -> Result<String, ChatError> {
        self.send_with_observer(user_text, &mut NoDeltas).await
    }

    /// Like [`send`](Self::send), additionally handing each streamed delta to
    /// `observer` as it arrives.
    pub async fn send_with_observer<O>(
        &mut self,
        user_text: &str,
        observer: &mut O,
    ) -> Result<String, ChatError>
    where
        O: DeltaObserver,
    {
        if self.state != SessionState::Idle {
            warn!(state = ?self.state, "previous exchange was interrupted; discarding its user turn");
            self.roll_back();
        }

        self.conversation.append(Message::user(user_text));
        self.state = SessionState::Sending;
        let request = CompletionRequest::build(self.conversation.snapshot(), &self.generation);

        // Rolls the user turn back if this future is dropped before the reply lands.
        let mut pending = PendingTurn {
            conversation: &mut self.conversation,
            state: &mut self.state,
        };

        match exchange(&self.transport, &request, observer).await {
            Ok(text) => {
                pending.apply(text.clone());
                info!(
                    model = %self.generation.model,
                    response_len = text.len(),
                    history_len = pending.conversation.len(),
                    "chat exchange completed"
                );
                Ok(text)
            }
            Err(err) => {
                pending.roll_back();
                warn!(
                    model = %self.generation.model,
                    kind = %err.kind(),
                    error = %err,
                    history_len = pending.conversation.len(),
                    "chat exchange failed; user turn rolled back"
                );
                Err(err)
            }
        }
    }

    fn roll_back(&mut self) {
        roll_back_turn(&mut self.conversation, &mut self.state);
    }
}

/// Borrow of the session's mutable parts for the duration of one exchange.
struct PendingTurn<'a> {
    conversation: &'a mut Conversation,
    state: &'a mut SessionState,
}

impl PendingTurn<'_> {
    fn apply(&mut self, text: String) {
        *self.state = SessionState::Applying;
        self.conversation.append(Message::assistant(text));
        *self.state = SessionState::Idle;
    }

    fn roll_back(&mut self) {
        roll_back_turn(self.conversation, self.state);
    }
}

impl Drop for PendingTurn<'_> {
    fn drop(&mut self) {
        if *self.state == SessionState::Sending {
            warn!("chat exchange dropped before completion; user turn rolled back");
            self.roll_back();
        }
    }
}

fn roll_back_turn(conversation: &mut Conversation, state: &mut SessionState) {
    *state = SessionState::RollingBack;
    let pending_user_turn = conversation
        .snapshot()
        .last()
        .is_some_and(|msg| msg.role == MessageRole::User);
    if pending_user_turn {
        conversation.remove_last();
    }
    *state = SessionState::Idle;
}

async fn exchange<T, O>(
    transport: &T,
    request: &CompletionRequest,
    observer: &mut O,
) -> Result<String, ChatError>
where
    T: ChatTransport,
    O: DeltaObserver,
{
    let mut body = transport.post(request).await?;
    if request.stream {
        read_stream(body.as_mut(), observer).await
    } else {
        read_document(body.as_mut()).await
    }
}

async fn read_document(body: &mut (dyn ReplyBody + '_)) -> Result<String, ChatError> {
    let mut raw = Vec::new();
    while let Some(chunk) = body.next_chunk().await? {
        raw.extend_from_slice(&chunk);
    }
    let raw = String::from_utf8_lossy(&raw);
    debug!(response_len = raw.len(), "received chat completion document");
    interpret_document(&raw)
}

async fn read_stream<O>(body: &mut (dyn ReplyBody + '_), observer: &mut O) -> Result<String, ChatError>
where
    O: DeltaObserver,
{
    let mut lines = LineBuffer::new();
    let mut interpreter = StreamInterpreter::new();

    while let Some(chunk) = body.next_chunk().await? {
        for line in lines.push(&chunk) {
            if interpreter.feed_line(&line, &mut *observer) == StreamStatus::Finished {
                return Ok(finish_stream(interpreter));
            }
        }
    }
    if let Some(tail) = lines.finish() {
        interpreter.feed_line(&tail, &mut *observer);
    }

    Ok(finish_stream(interpreter))
}

fn finish_stream(interpreter: StreamInterpreter) -> String {
    debug!(
        terminated = interpreter.is_finished(),
        skipped_fragments = interpreter.skipped_fragments(),
        "chat completion stream ended"
    );
    interpreter.finish()
}
