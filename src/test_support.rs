//! In-memory messenger for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::messenger::{ChatTarget, Keyboard, MediaRef, MessageRef, Messenger, SendError};

/// One recorded platform call
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Text {
        target: ChatTarget,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Media {
        target: ChatTarget,
        media: MediaRef,
        caption: Option<String>,
        keyboard: Option<Keyboard>,
    },
    EditText {
        message: MessageRef,
        text: String,
        keyboard: Option<Keyboard>,
    },
    EditKeyboard {
        message: MessageRef,
        keyboard: Keyboard,
    },
    Delete {
        message: MessageRef,
    },
    CreateTopic {
        chat_id: i64,
        title: String,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
        alert: bool,
    },
}

impl Call {
    /// Chat a send went to, if this call is a send
    pub fn sent_to(&self) -> Option<ChatTarget> {
        match self {
            Call::Text { target, .. } | Call::Media { target, .. } => Some(*target),
            _ => None,
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    failures: VecDeque<SendError>,
    next_message_id: i32,
    next_topic_id: i32,
}

/// Records every call; failures queued with [`fail_next`](Self::fail_next)
/// are returned by the next non-answer calls in order
pub struct RecordingMessenger {
    state: Mutex<State>,
}

impl RecordingMessenger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_message_id: 100,
                next_topic_id: 5,
                ..Default::default()
            }),
        })
    }

    pub fn fail_next(&self, error: SendError) {
        self.state.lock().failures.push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Sends (text or media) addressed to `chat_id`
    pub fn sends_to(&self, chat_id: i64) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.sent_to().is_some_and(|t| t.chat_id == chat_id))
            .collect()
    }

    /// Texts of all answered callbacks
    pub fn answers(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Answer { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: Call) -> Result<(), SendError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn next_message(&self, chat_id: i64) -> MessageRef {
        let mut state = self.state.lock();
        state.next_message_id += 1;
        MessageRef {
            chat_id,
            message_id: state.next_message_id,
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        target: ChatTarget,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        self.record(Call::Text {
            target,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        })?;
        Ok(self.next_message(target.chat_id))
    }

    async fn send_media(
        &self,
        target: ChatTarget,
        media: &MediaRef,
        caption: Option<&str>,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        self.record(Call::Media {
            target,
            media: media.clone(),
            caption: caption.map(str::to_string),
            keyboard: keyboard.cloned(),
        })?;
        Ok(self.next_message(target.chat_id))
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), SendError> {
        self.record(Call::EditText {
            message,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        })
    }

    async fn edit_keyboard(&self, message: MessageRef, keyboard: &Keyboard) -> Result<(), SendError> {
        self.record(Call::EditKeyboard {
            message,
            keyboard: keyboard.clone(),
        })
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError> {
        self.record(Call::Delete { message })
    }

    async fn create_topic(&self, chat_id: i64, title: &str) -> Result<i32, SendError> {
        self.record(Call::CreateTopic {
            chat_id,
            title: title.to_string(),
        })?;
        let mut state = self.state.lock();
        let id = state.next_topic_id;
        state.next_topic_id += 1;
        Ok(id)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), SendError> {
        self.state.lock().calls.push(Call::Answer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            alert,
        });
        Ok(())
    }
}
