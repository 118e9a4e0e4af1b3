use crate::format::{Message, MessageRequest};

/// A message handler callback.
///
/// Returning `Some(processed)` asks the engine to automatically answer the
/// message, echoing its current (possibly mutated) return value and
/// parameters. Returning `None` means the callback took responsibility for
/// the answer, e.g. it will call [`Engine::answer_message`] later.
///
/// [`Engine::answer_message`]: super::Engine::answer_message
pub type HandlerCallback = Box<dyn FnMut(&mut Message) -> Option<bool> + Send>;

/// A watch callback, observing replies without claiming them.
pub type WatchCallback = Box<dyn FnMut(&Message) + Send>;

/// A one-shot completion callback for install/uninstall/watch/unwatch
/// handshakes, invoked with the acknowledged success flag.
pub type DoneCallback = Box<dyn FnOnce(bool) + Send>;

/// A one-shot completion callback for `setlocal` requests, invoked with
/// the acknowledged `(parameter, value, success)`.
pub type SetLocalCallback = Box<dyn FnOnce(&str, &str, bool) + Send>;

/// A one-shot reply callback for message requests, invoked with the
/// original request and the engine's reply.
pub type ReplyCallback = Box<dyn FnOnce(&MessageRequest, Message) + Send>;

pub(super) struct MessageHandler {
    pub priority: u32,
    pub filter: Option<(String, Option<String>)>,
    pub callback: HandlerCallback,
    pub installed: bool,
    pub uninstalled: bool,
    pub done: Option<DoneCallback>,
}

pub(super) struct WatchHandler {
    pub callback: WatchCallback,
    pub installed: bool,
    pub uninstalled: bool,
    pub done: Option<DoneCallback>,
}

pub(super) struct PendingRequest {
    pub request: MessageRequest,
    pub callback: Option<ReplyCallback>,
}
