//! The protocol core, a registry-driven dispatcher for engine records.

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    time::SystemTime,
};

use tokio::sync::mpsc::UnboundedSender;

use crate::format::{
    Connect, Install, InstallAck, Message, MessageRequest, Record, SetLocal, SetLocalAck,
    Uninstall, UninstallAck, Unwatch, UnwatchAck, Watch, WatchAck,
};

mod handler;
pub use handler::{DoneCallback, HandlerCallback, ReplyCallback, SetLocalCallback, WatchCallback};
use handler::{MessageHandler, PendingRequest, WatchHandler};

/// Default handler priority in the engine dispatch chain.
pub const DEFAULT_PRIORITY: u32 = 100;

/// The protocol core.
///
/// Tracks message handlers, watches, pending message requests and the
/// local-parameter cache, routes every inbound record to its consumer and
/// automatically acknowledges unclaimed messages so the engine's dispatch
/// chain never blocks on us.
///
/// The core performs no I/O of its own: outbound lines (without their `\n`
/// terminator) are pushed into the channel sender supplied at construction,
/// and inbound lines are fed to [`Engine::handle_line`]. [`Driver`] binds
/// both ends to a transport.
///
/// [`Driver`]: crate::Driver
pub struct Engine {
    tx: UnboundedSender<String>,

    session_id: String,
    msg_id: u64,

    message_handlers: HashMap<String, MessageHandler>,
    watch_handlers: HashMap<String, WatchHandler>,
    pending: HashMap<String, PendingRequest>,

    local_params: HashMap<String, String>,
    local_param_callbacks: HashMap<String, SetLocalCallback>,

    automatic_bufsize: bool,
}

impl Engine {
    /// Initialize the core over a "write one line" channel sender.
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self {
            tx,

            session_id: (0..6).map(|_| fastrand::alphanumeric()).collect(),
            msg_id: 1,

            message_handlers: HashMap::new(),
            watch_handlers: HashMap::new(),
            pending: HashMap::new(),

            local_params: HashMap::new(),
            local_param_callbacks: HashMap::new(),

            automatic_bufsize: false,
        }
    }

    /// Send the `%%>connect:global` handshake, required as the very first
    /// record on socket transports and never sent on standard I/O.
    pub fn send_connect(&mut self) {
        self.send_raw(Connect::global().encode());
    }

    /// Record a handler for `message` and, if `install`, request its
    /// installation from the engine.
    ///
    /// A handler already registered for the same name is replaced. The
    /// `done` callback fires once with the installation ack's success flag.
    pub fn register_message_handler(
        &mut self,
        message: impl Into<String>,
        priority: impl Into<Option<u32>>,
        filter: impl Into<Option<(String, Option<String>)>>,
        callback: HandlerCallback,
        install: bool,
        done: impl Into<Option<DoneCallback>>,
    ) {
        let message = message.into();
        let priority = priority.into().unwrap_or(DEFAULT_PRIORITY);
        let filter = filter.into();

        if self
            .message_handlers
            .insert(
                message.clone(),
                MessageHandler {
                    priority,
                    filter: filter.clone(),
                    callback,
                    installed: false,
                    uninstalled: false,
                    done: done.into(),
                },
            )
            .is_some()
        {
            tracing::warn!("replacing the existing handler for `{message}`");
        }

        if install {
            self.send_raw(
                Install {
                    priority,
                    name: message,
                    filter,
                }
                .encode(),
            );
        }
    }

    /// Remove the handler for `message`, requesting an uninstall from the
    /// engine if it was installed. No-op if absent.
    pub fn unregister_message_handler(&mut self, message: &str) {
        let Some(handler) = self.message_handlers.get_mut(message) else {
            return;
        };

        if handler.installed {
            handler.uninstalled = true;
            self.send_raw(
                Uninstall {
                    name: message.to_owned(),
                }
                .encode(),
            );
        } else {
            // never installed, just drop it from the registry
            self.message_handlers.remove(message);
        }
    }

    /// Record a watch for `message` (the empty string watches everything)
    /// and request its installation from the engine.
    pub fn register_watch_handler(
        &mut self,
        message: impl Into<String>,
        callback: WatchCallback,
        done: impl Into<Option<DoneCallback>>,
    ) {
        let message = message.into();

        if self
            .watch_handlers
            .insert(
                message.clone(),
                WatchHandler {
                    callback,
                    installed: false,
                    uninstalled: false,
                    done: done.into(),
                },
            )
            .is_some()
        {
            tracing::warn!("replacing the existing watch for `{message}`");
        }

        self.send_raw(Watch { name: message }.encode());
    }

    /// Remove the watch for `message`, requesting an unwatch from the
    /// engine if it was installed. No-op if absent.
    pub fn unregister_watch_handler(&mut self, message: &str) {
        let Some(handler) = self.watch_handlers.get_mut(message) else {
            return;
        };

        if handler.installed {
            handler.uninstalled = true;
            self.send_raw(
                Unwatch {
                    name: message.to_owned(),
                }
                .encode(),
            );
        } else {
            self.watch_handlers.remove(message);
        }
    }

    /// Request the change of a local parameter, an empty `value` only
    /// queries it. The `done` callback fires once when the engine answers.
    pub fn set_local(
        &mut self,
        param: impl Into<String>,
        value: impl Into<String>,
        done: impl Into<Option<SetLocalCallback>>,
    ) {
        let param = param.into();

        if let Some(done) = done.into() {
            self.local_param_callbacks.insert(param.clone(), done);
        }

        self.send_raw(
            SetLocal {
                name: param,
                value: value.into(),
            }
            .encode(),
        );
    }

    /// The last engine-acknowledged value of a local parameter, if any.
    pub fn get_local(&self, param: &str) -> Option<&str> {
        self.local_params.get(param).map(String::as_str)
    }

    /// Submit a message to the engine and return its allocated correlation
    /// id.
    ///
    /// Unless `fire_and_forget`, the request is kept until the engine's
    /// reply arrives, which is then handed to `callback` exactly once.
    pub fn send_message(
        &mut self,
        request: MessageRequest,
        callback: impl Into<Option<ReplyCallback>>,
        fire_and_forget: bool,
    ) -> String {
        let id = format!("{}.{}", self.session_id, self.msg_id);
        self.msg_id += 1;

        self.send_raw(request.encode(&id, timestamp()));

        if !fire_and_forget {
            self.pending.insert(
                id.clone(),
                PendingRequest {
                    request,
                    callback: callback.into(),
                },
            );
        }

        id
    }

    /// Answer an engine message with the chosen `processed` flag, echoing
    /// its current return value and parameters.
    pub fn answer_message(&mut self, message: &Message, processed: bool) {
        self.send_raw(message.encode_answer(processed));
    }

    /// Turn on the automatic `bufsize` raise on oversized outbound lines.
    ///
    /// The caller must have made sure `bufsize` is cached, e.g. by querying
    /// it through [`set_local`](Self::set_local) first; the driver's
    /// [`activate_automatic_bufsize`] does both.
    ///
    /// [`activate_automatic_bufsize`]: crate::Yate::activate_automatic_bufsize
    pub fn enable_automatic_bufsize(&mut self) {
        self.automatic_bufsize = true;
    }

    /// Feed one inbound line (without its `\n` terminator) to the dispatch
    /// path. Records that do not parse are logged and dropped.
    pub fn handle_line(&mut self, line: &str) {
        tracing::debug!("< {line}");

        let record = match Record::parse(line) {
            Ok(record) => record,
            Err(err) => {
                tracing::error!("dropping an inbound record that did not parse: {err}");
                return;
            }
        };

        match record {
            Record::Message(message) => self.handle_message(message),
            Record::InstallAck(ack) => self.handle_install_ack(ack),
            Record::UninstallAck(ack) => self.handle_uninstall_ack(ack),
            Record::WatchAck(ack) => self.handle_watch_ack(ack),
            Record::UnwatchAck(ack) => self.handle_unwatch_ack(ack),
            Record::SetLocalAck(ack) => self.handle_setlocal_ack(ack),
            record => tracing::warn!("ignoring an unexpected inbound record: {record:?}"),
        }
    }

    fn handle_message(&mut self, mut message: Message) {
        if !message.reply {
            let Some(handler) = self.message_handlers.get_mut(&message.name) else {
                tracing::warn!("received a message we did not subscribe for: {}", message.name);
                // keep the engine's dispatch chain unblocked
                self.answer_message(&message, false);
                return;
            };

            let result =
                panic::catch_unwind(AssertUnwindSafe(|| (handler.callback)(&mut message)));

            match result {
                Ok(Some(processed)) => self.answer_message(&message, processed),
                // the callback took responsibility for the answer
                Ok(None) => (),
                Err(_) => {
                    tracing::error!(
                        "handler for `{}` panicked, answering unprocessed",
                        message.name
                    );
                    self.answer_message(&message, false);
                }
            }
        } else if let Some(request) = self.pending.remove(&message.id) {
            if let Some(callback) = request.callback {
                callback(&request.request, message);
            }
        } else {
            // maybe a watched message type, or the wildcard watch
            let key = if self.watch_handlers.contains_key(&message.name) {
                message.name.clone()
            } else {
                String::new()
            };

            match self.watch_handlers.get_mut(&key) {
                Some(handler) => {
                    if panic::catch_unwind(AssertUnwindSafe(|| (handler.callback)(&message)))
                        .is_err()
                    {
                        tracing::error!("watch for `{key}` panicked");
                    }
                }
                // probably caused by a fire-and-forget request, or a stale reply
                None => tracing::debug!("got an unclaimed reply of type `{}`", message.name),
            }
        }
    }

    fn handle_install_ack(&mut self, ack: InstallAck) {
        let Some(handler) = self.message_handlers.get_mut(&ack.name) else {
            tracing::warn!(
                "engine acknowledged a handler for `{}` we never requested",
                ack.name
            );
            return;
        };

        if ack.success {
            handler.installed = true;
        }
        if let Some(done) = handler.done.take() {
            done(ack.success);
        }
    }

    fn handle_uninstall_ack(&mut self, ack: UninstallAck) {
        if self.message_handlers.remove(&ack.name).is_none() {
            tracing::warn!(
                "engine acknowledged uninstalling `{}` which we never requested",
                ack.name
            );
        }
    }

    fn handle_watch_ack(&mut self, ack: WatchAck) {
        let Some(handler) = self.watch_handlers.get_mut(&ack.name) else {
            tracing::warn!(
                "engine acknowledged a watch for `{}` we never requested",
                ack.name
            );
            return;
        };

        if ack.success {
            handler.installed = true;
        }
        if let Some(done) = handler.done.take() {
            done(ack.success);
        }
    }

    fn handle_unwatch_ack(&mut self, ack: UnwatchAck) {
        if self.watch_handlers.remove(&ack.name).is_none() {
            tracing::warn!(
                "engine acknowledged unwatching `{}` which we never requested",
                ack.name
            );
        }
    }

    fn handle_setlocal_ack(&mut self, ack: SetLocalAck) {
        self.local_params.insert(ack.name.clone(), ack.value.clone());

        if let Some(done) = self.local_param_callbacks.remove(&ack.name) {
            done(&ack.name, &ack.value, ack.success);
        }
    }

    fn send_raw(&mut self, line: String) {
        if self.automatic_bufsize {
            // `\n` plus the `\0` terminator in the engine's line buffer
            let required = line.len() + 2;

            match self
                .get_local("bufsize")
                .and_then(|value| value.parse::<usize>().ok())
            {
                Some(bufsize) if required > bufsize => {
                    let requested = ((required / 1024) + 1) * 1024;
                    tracing::info!("automatic buffer size increase to {requested} bytes");

                    // defer the oversized line until the engine raised its buffer
                    let tx = self.tx.clone();
                    let deferred: SetLocalCallback = Box::new(move |_, _, _| {
                        tracing::debug!("> {line}");
                        let _ = tx.send(line);
                    });
                    self.set_local("bufsize", requested.to_string(), deferred);

                    return;
                }
                None => tracing::warn!("automatic bufsize is active but `bufsize` is not cached"),
                _ => (),
            }
        }

        tracing::debug!("> {line}");
        if self.tx.send(line).is_err() {
            tracing::debug!("outbound channel is closed, dropping the line");
        }
    }
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
