//! Binds the protocol core to a transport and exposes awaitable operations.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use futures::channel::oneshot;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc::{self, UnboundedReceiver},
};
use tokio_util::sync::CancellationToken;

use crate::{
    engine::{DoneCallback, Engine, HandlerCallback, ReplyCallback, SetLocalCallback, WatchCallback},
    format::{Message, MessageRequest},
};

mod error;
pub use error::{Error, Result};

mod transport;
pub use transport::Transport;
use transport::{Reader, Writer};

/// A connector binding the protocol core to a byte channel.
///
/// The driver exclusively owns both transport halves: inbound lines are fed
/// to the core's dispatch path by the read loop, outbound lines all pass
/// through the single write loop, in the order they were submitted.
pub struct Driver {
    engine: Arc<Mutex<Engine>>,
    closed: CancellationToken,

    reader: Reader,
    writer: Writer,
    out_rx: UnboundedReceiver<String>,
}

impl Driver {
    /// Open the given [`Transport`] and bind the core to it, sending the
    /// connect handshake on socket transports.
    pub async fn connect(transport: Transport) -> io::Result<Self> {
        let (reader, writer, socket) = transport.open().await?;

        let driver = Self::from_io(reader, writer);
        if socket {
            driver.engine.lock().unwrap().send_connect();
        }

        Ok(driver)
    }

    /// Bind the core to arbitrary reader and writer halves.
    ///
    /// No connect handshake is sent, call [`Yate::engine`] and
    /// [`Engine::send_connect`] if the peer expects one.
    pub fn from_io(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Self {
            engine: Arc::new(Mutex::new(Engine::new(out_tx))),
            closed: CancellationToken::new(),

            reader: Box::new(reader),
            writer: Box::new(writer),
            out_rx,
        }
    }

    /// A handle to the session, usable before [`run`](Self::run) to
    /// register handlers that must exist from the very first record.
    pub fn handle(&self) -> Yate {
        Yate {
            engine: self.engine.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Drive the session: spawn the read and write loops, hand `routine` a
    /// session handle and run it to completion.
    ///
    /// Returns `Some` with the routine's output, or `None` if the session
    /// was torn down first, either by the peer closing the stream or by a
    /// [`Yate::closed`] cancellation (the IVR layer's hangup path).
    /// Either way the write side is flushed and closed before returning.
    pub async fn run<F, Fut, T>(self, routine: F) -> Option<T>
    where
        F: FnOnce(Yate) -> Fut,
        Fut: Future<Output = T>,
    {
        let Self {
            engine,
            closed,
            reader,
            mut writer,
            mut out_rx,
        } = self;

        let handle = Yate {
            engine: engine.clone(),
            closed: closed.clone(),
        };

        let read_loop = tokio::spawn({
            let engine = engine.clone();
            let closed = closed.clone();

            async move {
                let mut lines = BufReader::new(reader).lines();

                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => engine.lock().unwrap().handle_line(&line),
                        Ok(None) => {
                            tracing::debug!("engine closed the stream");
                            break;
                        }
                        Err(err) => {
                            tracing::error!("transport failure: {err}");
                            break;
                        }
                    }
                }

                closed.cancel();
            }
        });

        let flushed = CancellationToken::new();
        let write_loop = tokio::spawn({
            let flushed = flushed.clone();

            async move {
                loop {
                    tokio::select! {
                        line = out_rx.recv() => match line {
                            Some(line) => write_line(&mut writer, &line).await?,
                            None => break,
                        },
                        () = flushed.cancelled() => {
                            // drain what the routine already queued
                            while let Ok(line) = out_rx.try_recv() {
                                write_line(&mut writer, &line).await?;
                            }
                            break;
                        }
                    }
                }

                writer.shutdown().await
            }
        });

        let output = tokio::select! {
            output = routine(handle) => Some(output),
            () = closed.cancelled() => None,
        };

        // close the write side whether the routine completed or was torn down
        flushed.cancel();
        read_loop.abort();
        match write_loop.await {
            Ok(Err(err)) => tracing::error!("closing the transport failed: {err}"),
            Err(err) if !err.is_cancelled() => {
                tracing::error!("write loop crashed: {err}");
            }
            _ => (),
        }

        output
    }
}

/// A cloneable handle to a running session.
///
/// The synchronous core is reached through [`Yate::engine`]; the methods
/// here adapt its one-shot completion callbacks into awaitable futures.
#[derive(Clone)]
pub struct Yate {
    engine: Arc<Mutex<Engine>>,
    closed: CancellationToken,
}

impl Yate {
    /// Lock the protocol core for direct, synchronous use.
    ///
    /// Engine-invoked callbacks run under this same lock, so a callback
    /// must never call back into the handle it was registered through.
    pub fn engine(&self) -> MutexGuard<'_, Engine> {
        self.engine.lock().unwrap()
    }

    /// The token cancelled when the session tears down, on stream close or
    /// on the IVR layer's hangup path.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Register a message handler and resolve with the installation ack's
    /// success flag.
    pub async fn register_message_handler_async(
        &self,
        message: impl Into<String>,
        priority: impl Into<Option<u32>>,
        filter: impl Into<Option<(String, Option<String>)>>,
        callback: HandlerCallback,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let done: DoneCallback = Box::new(move |success| {
            let _ = tx.send(success);
        });

        self.engine().register_message_handler(
            message, priority, filter, callback, true, done,
        );

        rx.await.map_err(|_| Error::Closed)
    }

    /// Register a watch handler and resolve with the ack's success flag.
    pub async fn register_watch_handler_async(
        &self,
        message: impl Into<String>,
        callback: WatchCallback,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let done: DoneCallback = Box::new(move |success| {
            let _ = tx.send(success);
        });

        self.engine().register_watch_handler(message, callback, done);

        rx.await.map_err(|_| Error::Closed)
    }

    /// Submit a message to the engine and resolve with its reply.
    pub async fn send_message_async(&self, request: MessageRequest) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        let callback: ReplyCallback = Box::new(move |_, reply| {
            let _ = tx.send(reply);
        });

        self.engine().send_message(request, callback, false);

        rx.await.map_err(|_| Error::Closed)
    }

    /// Set a local parameter and resolve with the ack's success flag.
    pub async fn set_local_async(
        &self,
        param: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let done: SetLocalCallback = Box::new(move |_, _, success| {
            let _ = tx.send(success);
        });

        self.engine().set_local(param, value, done);

        rx.await.map_err(|_| Error::Closed)
    }

    /// The value of a local parameter, from the cache when possible,
    /// queried from the engine otherwise.
    pub async fn get_local_async(&self, param: impl Into<String>) -> Result<String> {
        let param = param.into();

        let rx = {
            let mut engine = self.engine();

            if let Some(value) = engine.get_local(&param) {
                return Ok(value.to_owned());
            }

            let (tx, rx) = oneshot::channel();
            let done: SetLocalCallback = Box::new(move |_, value, _| {
                let _ = tx.send(value.to_owned());
            });
            engine.set_local(param, "", done);

            rx
        };

        rx.await.map_err(|_| Error::Closed)
    }

    /// Query the engine's `bufsize` and turn on the automatic raise for
    /// oversized outbound lines.
    pub async fn activate_automatic_bufsize(&self) -> Result<()> {
        self.get_local_async("bufsize").await?;
        self.engine().enable_automatic_bufsize();

        Ok(())
    }
}

async fn write_line<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
