//! A minimal in-process engine simulator: acknowledges every request the
//! module sends, records what got installed and delivers scripted traffic.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};

use yexm::format::{
    InstallAck, Message, MessageRequest, Record, SetLocal, SetLocalAck, UninstallAck, UnwatchAck,
    WatchAck,
};

/// A handler the module asked the simulated engine to install.
#[derive(Debug, Clone)]
pub struct InstalledHandler {
    pub priority: u32,
    pub filter: Option<(String, Option<String>)>,
}

/// Everything observed from the module so far.
#[derive(Default)]
pub struct State {
    /// Handlers installed by the module, by message name.
    pub installed: HashMap<String, InstalledHandler>,
    /// Watches installed by the module.
    pub watched: Vec<String>,
    /// `%%>message` requests received from the module.
    pub requests: Vec<Message>,
    /// `%%<message` answers received from the module.
    pub replies: Vec<Message>,
    /// `%%>setlocal` requests received from the module.
    pub setlocals: Vec<SetLocal>,

    msg_id: u64,
}

#[derive(Clone)]
pub struct Sim {
    state: Arc<Mutex<State>>,
    tx: UnboundedSender<String>,
    tasks: Arc<(JoinHandle<()>, JoinHandle<()>)>,
}

/// Wire a driver and a simulated engine over an in-memory duplex stream.
pub fn bind() -> (yexm::Driver, Sim) {
    let (module_io, engine_io) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(module_io);

    (yexm::Driver::from_io(reader, writer), Sim::spawn(engine_io))
}

impl Sim {
    pub fn spawn(io: DuplexStream) -> Self {
        let (reader, mut writer) = tokio::io::split(io);
        let (tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let state = Arc::new(Mutex::new(State::default()));

        let write = tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let read = tokio::spawn({
            let state = state.clone();
            let tx = tx.clone();

            async move {
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    process(&state, &tx, &line);
                }
            }
        });

        Self {
            state,
            tx,
            tasks: Arc::new((read, write)),
        }
    }

    /// Drop both stream halves, the module sees EOF.
    pub fn close(&self) {
        self.tasks.0.abort();
        self.tasks.1.abort();
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Poll until `predicate` holds on the observed state.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&State) -> bool) {
        while !predicate(&self.state()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Deliver a message request to the module, with deterministic ids.
    pub fn deliver(&self, request: MessageRequest) {
        let (id, time) = {
            let mut state = self.state.lock().unwrap();
            state.msg_id += 1;

            (format!("test.{}", state.msg_id), state.msg_id * 10)
        };

        let _ = self.tx.send(request.encode(&id, time));
    }

    /// Push a raw line to the module, bypassing the encoder.
    pub fn send_raw(&self, line: &str) {
        let _ = self.tx.send(line.to_owned());
    }

    pub fn execute_call(&self, channel: &str) {
        self.deliver(MessageRequest::new("call.execute", [("id", channel)]));
    }

    pub fn send_dtmf(&self, channel: &str, symbols: &str) {
        for symbol in symbols.chars() {
            self.deliver(MessageRequest::new(
                "chan.dtmf",
                [
                    ("id".to_owned(), channel.to_owned()),
                    ("text".to_owned(), symbol.to_string()),
                ],
            ));
        }
    }

    pub fn notify_eof(&self, channel: &str) {
        self.deliver(MessageRequest::new(
            "chan.notify",
            [("targetid", channel), ("reason", "eof")],
        ));
    }

    pub fn hangup(&self, channel: &str) {
        self.deliver(MessageRequest::new("chan.hangup", [("id", channel)]));
    }
}

fn process(state: &Arc<Mutex<State>>, tx: &UnboundedSender<String>, line: &str) {
    let record = match Record::parse(line) {
        Ok(record) => record,
        Err(err) => panic!("module sent an unparseable line `{line}`: {err}"),
    };

    let mut state = state.lock().unwrap();
    match record {
        Record::Install(install) => {
            state.installed.insert(
                install.name.clone(),
                InstalledHandler {
                    priority: install.priority,
                    filter: install.filter,
                },
            );

            let _ = tx.send(
                InstallAck {
                    priority: install.priority,
                    name: install.name,
                    success: true,
                }
                .encode(),
            );
        }
        Record::Uninstall(uninstall) => {
            let removed = state.installed.remove(&uninstall.name);

            let _ = tx.send(
                UninstallAck {
                    priority: removed.as_ref().map_or(0, |handler| handler.priority),
                    name: uninstall.name,
                    success: removed.is_some(),
                }
                .encode(),
            );
        }
        Record::Watch(watch) => {
            state.watched.push(watch.name.clone());

            let _ = tx.send(
                WatchAck {
                    name: watch.name,
                    success: true,
                }
                .encode(),
            );
        }
        Record::Unwatch(unwatch) => {
            state.watched.retain(|name| name != &unwatch.name);

            let _ = tx.send(
                UnwatchAck {
                    name: unwatch.name,
                    success: true,
                }
                .encode(),
            );
        }
        Record::SetLocal(setlocal) => {
            // queries get a plausible engine default, writes are accepted
            let value = if setlocal.value.is_empty() {
                match setlocal.name.as_str() {
                    "bufsize" => "8192".to_owned(),
                    "engine.version" => "6.4.0".to_owned(),
                    _ => String::new(),
                }
            } else {
                setlocal.value.clone()
            };

            let ack = SetLocalAck {
                name: setlocal.name.clone(),
                value,
                success: true,
            };
            state.setlocals.push(setlocal);

            let _ = tx.send(ack.encode());
        }
        Record::Message(message) if !message.reply => {
            // answer every module request as processed, echoing it
            let _ = tx.send(message.encode_answer(true));
            state.requests.push(message);
        }
        Record::Message(message) => state.replies.push(message),
        Record::Connect(_) => (),
        record => panic!("module sent an unexpected record: {record:?}"),
    }
}
