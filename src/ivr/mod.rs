//! A session layer driving a single call leg through audio playback,
//! DTMF collection, tone generation and recording.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::channel::oneshot;
use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};

use crate::{
    driver::{Driver, Yate},
    engine::HandlerCallback,
    format::{Message, MessageRequest, Params},
};

mod error;
pub use error::{Error, Result};

mod event;
use event::Event;

/// The kind of channel activity [`wait_channel_event`] resolved on.
///
/// [`wait_channel_event`]: Ivr::wait_channel_event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The remote party keyed a DTMF symbol.
    Dtmf,
    /// The current playback reached the end of its file.
    PlaybackEnd,
}

struct Session {
    call_id: String,
    call_params: Params,

    dtmf_buffer: Mutex<String>,
    dtmf: Event,
    playback_end: Event,

    hangup_handlers: Mutex<Vec<Box<dyn FnMut() + Send>>>,
}

/// A handle to the single established call of an IVR session.
///
/// Obtained by [`Ivr::run`], which owns the session lifecycle: it waits for
/// the engine to hand us our `call.execute`, accepts the call, installs the
/// per-call handlers and only then starts the application routine.
#[derive(Clone)]
pub struct Ivr {
    yate: Yate,
    session: Arc<Session>,
}

impl Ivr {
    /// Drive a single-call IVR session over `driver`.
    ///
    /// The engine is expected to deliver exactly one `call.execute` for
    /// this module; it is answered as processed to accept the call, then
    /// filtered handlers for `chan.notify`, `chan.dtmf` and `chan.hangup`
    /// are installed before `routine` runs.
    ///
    /// When the remote side hangs up, the registered hangup handlers run
    /// in registration order and the routine is cancelled; both that and
    /// the peer closing the stream end the session with `Ok(())`.
    pub async fn run<F, Fut>(driver: Driver, routine: F) -> Result<()>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (call_tx, call_rx) = oneshot::channel();

        {
            // a local one-shot listener grabbing the call.execute that
            // carries our call, answered as processed to accept it
            let mut call_tx = Some(call_tx);
            let callback: HandlerCallback = Box::new(move |message| {
                let Some(call_tx) = call_tx.take() else {
                    tracing::warn!("refusing another call on this session");
                    return Some(false);
                };

                let call_id = message.params.get("id").unwrap_or_default().to_owned();
                let _ = call_tx.send((call_id, message.params.clone()));

                Some(true)
            });

            driver
                .handle()
                .engine()
                .register_message_handler("call.execute", None, None, callback, false, None);
        }

        let output = driver
            .run(|yate| async move {
                let Ok((call_id, call_params)) = call_rx.await else {
                    return Ok(());
                };
                yate.engine().unregister_message_handler("call.execute");

                tracing::debug!("driving call `{call_id}`");

                let ivr = Self {
                    yate,
                    session: Arc::new(Session {
                        call_id,
                        call_params,

                        dtmf_buffer: Mutex::new(String::new()),
                        dtmf: Event::new(),
                        playback_end: Event::new(),

                        hangup_handlers: Mutex::new(Vec::new()),
                    }),
                };
                ivr.install_call_handlers().await?;

                routine(ivr).await
            })
            .await;

        // a torn-down session, by hangup or stream close, is a normal end
        output.unwrap_or(Ok(()))
    }

    async fn install_call_handlers(&self) -> Result<()> {
        let callback: HandlerCallback = {
            let session = self.session.clone();

            Box::new(move |message| {
                if message.params.get("reason") == Some("eof") {
                    session.playback_end.set();
                }

                Some(true)
            })
        };
        self.yate
            .register_message_handler_async(
                "chan.notify",
                None,
                ("targetid".to_owned(), Some(self.session.call_id.clone())),
                callback,
            )
            .await?;

        let callback: HandlerCallback = {
            let session = self.session.clone();

            Box::new(move |message| {
                if let Some(text) = message.params.get("text") {
                    session.dtmf_buffer.lock().unwrap().push_str(text);
                    session.dtmf.set();
                }

                Some(true)
            })
        };
        self.yate
            .register_message_handler_async(
                "chan.dtmf",
                None,
                ("id".to_owned(), Some(self.session.call_id.clone())),
                callback,
            )
            .await?;

        let callback: HandlerCallback = {
            let session = self.session.clone();
            let closed = self.yate.closed();

            Box::new(move |_| {
                tracing::debug!("call `{}` hung up", session.call_id);

                for handler in session.hangup_handlers.lock().unwrap().iter_mut() {
                    handler();
                }
                closed.cancel();

                Some(true)
            })
        };
        self.yate
            .register_message_handler_async(
                "chan.hangup",
                None,
                ("id".to_owned(), Some(self.session.call_id.clone())),
                callback,
            )
            .await?;

        Ok(())
    }

    /// The channel id of the call leg we drive.
    pub fn call_id(&self) -> &str {
        &self.session.call_id
    }

    /// The parameters of the `call.execute` that started this session.
    pub fn call_params(&self) -> &Params {
        &self.session.call_params
    }

    /// The session handle, for raw engine operations on this call.
    pub fn yate(&self) -> &Yate {
        &self.yate
    }

    /// A snapshot of the symbols collected since the last DTMF read.
    pub fn dtmf_buffer(&self) -> String {
        self.session.dtmf_buffer.lock().unwrap().clone()
    }

    /// Resolve when the remote party hung up the call.
    ///
    /// [`run`](Self::run) cancels the application routine on hangup by
    /// default; a routine that wants to outlive it can race this signal
    /// itself instead of relying on the cancellation.
    pub async fn hangup(&self) {
        let closed = self.yate.closed();

        closed.cancelled().await;
    }

    /// Register a function called when the remote end hangs up, before the
    /// routine is cancelled. Handlers run in registration order.
    pub fn register_hangup_handler(&self, handler: impl FnMut() + Send + 'static) {
        self.session
            .hangup_handlers
            .lock()
            .unwrap()
            .push(Box::new(handler));
    }

    /// Play an audio file on this call.
    ///
    /// With `repeat`, the file restarts automatically after finishing.
    /// With `complete`, the call suspends until the playback reached the
    /// end of the file, which can never happen with `repeat`: combining
    /// both is a usage error.
    pub async fn play_soundfile(&self, path: &str, repeat: bool, complete: bool) -> Result<bool> {
        if repeat && complete {
            return Err(Error::Usage("`repeat` cannot be combined with `complete`"));
        }

        let mut params = Params::from([
            ("source", format!("wave/play/{path}")),
            ("notify", self.session.call_id.clone()),
        ]);
        if repeat {
            params.set("autorepeat", "true");
        }

        self.session.playback_end.clear();
        self.yate
            .send_message_async(MessageRequest::new("chan.attach", params))
            .await?;

        if complete {
            self.session.playback_end.wait().await;
        }

        Ok(true)
    }

    /// Start recording the remote end of this call into `path`, using one
    /// of the engine's supported extensions to pick the format.
    ///
    /// With a time limit, returns the handle of the background task that
    /// stops the recording once the limit expires; aborting the handle
    /// cancels the automatic stop.
    pub async fn record_audio(
        &self,
        path: &str,
        time_limit: impl Into<Option<f64>>,
    ) -> Result<Option<JoinHandle<Result<bool>>>> {
        self.attach_recorder(path).await?;

        Ok(time_limit.into().map(|seconds| {
            let ivr = self.clone();

            tokio::spawn(async move {
                time::sleep(secs(seconds)).await;
                ivr.stop_recording().await
            })
        }))
    }

    /// Record the remote end of this call into `path` and suspend until
    /// the time limit is over.
    pub async fn record_audio_wait(&self, path: &str, time_limit: f64) -> Result<bool> {
        self.attach_recorder(path).await?;
        time::sleep(secs(time_limit)).await;

        self.stop_recording().await
    }

    /// Stop any running recording of the remote end.
    pub async fn stop_recording(&self) -> Result<bool> {
        self.attach_recorder("-").await?;

        Ok(true)
    }

    async fn attach_recorder(&self, path: &str) -> Result<()> {
        let request = MessageRequest::new(
            "chan.attach",
            [
                ("consumer", format!("wave/record/{path}")),
                ("notify", self.session.call_id.clone()),
            ],
        );
        self.yate.send_message_async(request).await?;

        Ok(())
    }

    /// Collect DTMF input until one of `stop_symbols` occurs, returning
    /// everything collected including the stop symbol itself. Symbols the
    /// remote party keyed past the stop symbol stay buffered.
    ///
    /// With a timeout, returns whatever was collected when it expires;
    /// without one and with empty `stop_symbols`, this never returns.
    pub async fn read_dtmf_until(
        &self,
        stop_symbols: &str,
        timeout: impl Into<Option<f64>>,
    ) -> String {
        let deadline = deadline(timeout.into());
        let mut collected = String::new();

        self.session.dtmf_buffer.lock().unwrap().clear();
        loop {
            if !wait_until(&self.session.dtmf, deadline).await {
                return collected;
            }
            self.session.dtmf.clear();

            let mut buffer = self.session.dtmf_buffer.lock().unwrap();
            let mut stop = None;
            for (idx, symbol) in buffer.char_indices() {
                collected.push(symbol);
                if stop_symbols.contains(symbol) {
                    stop = Some(idx + symbol.len_utf8());
                    break;
                }
            }

            match stop {
                Some(end) => {
                    buffer.drain(..end);
                    return collected;
                }
                None => buffer.clear(),
            }
        }
    }

    /// Collect DTMF input until `count` symbols occurred, returning the
    /// first `count` of them and keeping the rest buffered.
    ///
    /// With a timeout, returns whatever was collected when it expires.
    pub async fn read_dtmf_symbols(&self, count: usize, timeout: impl Into<Option<f64>>) -> String {
        let deadline = deadline(timeout.into());

        self.session.dtmf_buffer.lock().unwrap().clear();
        loop {
            {
                let mut buffer = self.session.dtmf_buffer.lock().unwrap();

                if buffer.chars().count() >= count {
                    let end = buffer
                        .char_indices()
                        .nth(count)
                        .map_or(buffer.len(), |(idx, _)| idx);
                    let collected = buffer[..end].to_owned();
                    buffer.drain(..end);

                    return collected;
                }
            }

            if !wait_until(&self.session.dtmf, deadline).await {
                // hand back what arrived in time
                let mut buffer = self.session.dtmf_buffer.lock().unwrap();
                let collected = buffer.clone();
                buffer.clear();

                return collected;
            }
            self.session.dtmf.clear();
        }
    }

    /// Stop audio playback and just send silence on the channel.
    pub async fn silence(&self) -> Result<Message> {
        self.tone("silence").await
    }

    /// Attach a named tone as the source of our channel.
    pub async fn tone(&self, name: &str) -> Result<Message> {
        let request = MessageRequest::new("chan.attach", [("source", format!("tone/{name}"))]);

        Ok(self.yate.send_message_async(request).await?)
    }

    /// Suspend until the next channel activity and return its kind,
    /// or `None` if the timeout expired first.
    pub async fn wait_channel_event(&self, timeout: impl Into<Option<f64>>) -> Option<ChannelEvent> {
        let event = async {
            tokio::select! {
                biased;
                () = self.session.dtmf.wait() => ChannelEvent::Dtmf,
                () = self.session.playback_end.wait() => ChannelEvent::PlaybackEnd,
            }
        };

        match deadline(timeout.into()) {
            Some(deadline) => time::timeout_at(deadline, event).await.ok(),
            None => Some(event.await),
        }
    }
}

fn secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or_default()
}

fn deadline(timeout: Option<f64>) -> Option<Instant> {
    timeout.map(|seconds| Instant::now() + secs(seconds))
}

/// Wait for `event`, bounded by the deadline: `false` on expiry.
async fn wait_until(event: &Event, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => time::timeout_at(deadline, event.wait()).await.is_ok(),
        None => {
            event.wait().await;
            true
        }
    }
}
