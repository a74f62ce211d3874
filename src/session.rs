//! Per-connection session.
//!
//! A session owns one client's stream and runs two tasks:
//! - Reader: `AwaitingHeader -> AwaitingBody -> Dispatched -> AwaitingHeader`,
//!   falling into `Closed` on any transport or framing error
//! - Writer: drains the outbound queue one frame at a time, in submission order
//!
//! Both tasks hold an `Arc<Session>`, as does the room while the session is a
//! member. Closing flips a shared flag that stops both tasks, so the stream is
//! dropped once the last reference goes away.

use crate::protocol::{decode_header, Frame, HEADER_LEN};
use crate::room::{display_name, Participant, Room};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

/// Timestamp format stamped onto every chat line.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d.%H:%M:%S";

/// Read side state.
#[derive(Debug)]
enum ReadState {
    /// Waiting for exactly `HEADER_LEN` bytes.
    AwaitingHeader,
    /// Waiting for exactly `len` body bytes.
    AwaitingBody { len: usize },
    /// A full body arrived and is handed to the room.
    Dispatched { body: Vec<u8> },
    Closed,
}

/// One connected client.
pub struct Session {
    name: String,
    room: Arc<Room>,
    outbound: mpsc::UnboundedSender<Frame>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Session {
    /// Start a session for an accepted stream.
    ///
    /// Joins the room and spawns the reader and writer tasks. Must be called
    /// from within a tokio runtime.
    pub fn start<S>(stream: S, peer: SocketAddr, room: Arc<Room>) -> Arc<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let session = Arc::new(Session {
            name: display_name(peer),
            room,
            outbound,
            shutdown,
            closed: AtomicBool::new(false),
        });

        // Writer first, so the welcome and replayed history start draining at once.
        tokio::spawn(write_loop(Arc::clone(&session), writer, queue));
        session
            .room
            .join(Arc::clone(&session) as Arc<dyn Participant>);
        tokio::spawn(read_loop(Arc::clone(&session), reader));

        session
    }

    /// Leave the room and stop both tasks.
    ///
    /// Safe to call any number of times; only the first call has an effect.
    pub fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let participant: Arc<dyn Participant> = Arc::clone(self) as Arc<dyn Participant>;
        self.room.leave(&participant);
        self.shutdown.send_replace(true);

        debug!(name = %self.name, "Session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stamp a received body and broadcast it.
    fn dispatch(&self, body: &[u8]) {
        let stamped = format!(
            "{} {} {} ",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            self.name,
            String::from_utf8_lossy(body)
        );
        info!("{stamped}");

        self.room.deliver(Frame::clamped(&stamped));
    }
}

impl Participant for Session {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, frame: &Frame) {
        if self.is_closed() {
            return;
        }
        trace!(name = %self.name, len = frame.body_len(), "Queued frame");
        // Fails only once the writer has exited, i.e. the session is closing.
        let _ = self.outbound.send(frame.clone());
    }
}

/// Resolve once the session has been closed.
async fn closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn read_loop<R>(session: Arc<Session>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut shutdown = session.shutdown.subscribe();
    let mut header = [0u8; HEADER_LEN];
    let mut state = ReadState::AwaitingHeader;

    loop {
        state = match state {
            ReadState::AwaitingHeader => {
                tokio::select! {
                    result = reader.read_exact(&mut header) => match result {
                        Ok(_) => match decode_header(&header) {
                            Ok(len) => ReadState::AwaitingBody { len },
                            Err(e) => {
                                debug!(name = %session.name, error = %e, "Framing error");
                                ReadState::Closed
                            }
                        },
                        Err(e) => {
                            debug!(name = %session.name, error = %e, "Read failed");
                            ReadState::Closed
                        }
                    },
                    _ = closed(&mut shutdown) => ReadState::Closed,
                }
            }

            ReadState::AwaitingBody { len } => {
                let mut body = vec![0u8; len];
                tokio::select! {
                    result = reader.read_exact(&mut body) => match result {
                        Ok(_) => ReadState::Dispatched { body },
                        Err(e) => {
                            debug!(name = %session.name, error = %e, "Read failed");
                            ReadState::Closed
                        }
                    },
                    _ = closed(&mut shutdown) => ReadState::Closed,
                }
            }

            ReadState::Dispatched { body } => {
                session.dispatch(&body);
                ReadState::AwaitingHeader
            }

            ReadState::Closed => break,
        };
    }

    session.close();
}

async fn write_loop<W>(
    session: Arc<Session>,
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Frame>,
) where
    W: AsyncWrite + Unpin,
{
    let mut shutdown = session.shutdown.subscribe();

    loop {
        let frame = tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = closed(&mut shutdown) => break,
        };

        let result = tokio::select! {
            result = writer.write_all(frame.as_bytes()) => result,
            _ = closed(&mut shutdown) => break,
        };

        if let Err(e) = result {
            debug!(name = %session.name, error = %e, "Write failed");
            break;
        }
    }

    let _ = writer.shutdown().await;
    session.close();
}
