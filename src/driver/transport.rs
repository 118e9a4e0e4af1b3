use std::{io, path::PathBuf};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, UnixStream},
};

pub(super) type Reader = Box<dyn AsyncRead + Send + Unpin>;
pub(super) type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// The byte channel the external module talks to the engine over.
#[derive(Debug, Clone)]
pub enum Transport {
    /// The process' standard I/O pipes, for modules spawned by the engine
    /// itself. No connect handshake is sent.
    Stdio,

    /// A TCP listener of the engine's `extmodule`,
    /// `%%>connect:global` is sent right after connecting.
    Tcp {
        /// Host the engine listens on.
        host: String,
        /// Port the engine listens on.
        port: u16,
    },

    /// A Unix-domain stream listener of the engine's `extmodule`,
    /// `%%>connect:global` is sent right after connecting.
    Unix {
        /// Path of the listening socket.
        path: PathBuf,
    },
}

impl Transport {
    /// Open the byte channel, returning its halves and whether the
    /// connect handshake is due.
    pub(super) async fn open(self) -> io::Result<(Reader, Writer, bool)> {
        Ok(match self {
            Self::Stdio => (
                Box::new(tokio::io::stdin()) as Reader,
                Box::new(tokio::io::stdout()) as Writer,
                false,
            ),
            Self::Tcp { host, port } => {
                let (rx, tx) = TcpStream::connect((host.as_str(), port))
                    .await?
                    .into_split();

                (Box::new(rx) as Reader, Box::new(tx) as Writer, true)
            }
            Self::Unix { path } => {
                let (rx, tx) = UnixStream::connect(path).await?.into_split();

                (Box::new(rx) as Reader, Box::new(tx) as Writer, true)
            }
        })
    }
}
