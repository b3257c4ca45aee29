//! Connection handler
//!
//! Handles individual client connections: the name handshake, relaying
//! chat lines into the room, and a writer task that drains the client's
//! outbound queue onto the socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::Member;
use crate::config::Config;
use crate::error::AppError;
use crate::message::ServerMessage;
use crate::server::RoomHandle;
use crate::types::ClientId;
use crate::validate::validate_name;

/// How long a closing session waits for queued output to reach the client
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    /// Prompt sent, waiting for the first line
    AwaitingName,
    /// In the room under `name`
    Joined { name: String },
    /// Done; the task is about to end
    Terminated,
}

/// Accept connections forever, one session task each
pub async fn serve(listener: TcpListener, room: RoomHandle, config: Config) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let room = room.clone();
                let config = config.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, room, &config).await {
                        log_session_error(&e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Handle a new TCP connection until it closes
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    room: RoomHandle,
    config: &Config,
) -> Result<(), AppError> {
    let client_id = ClientId::new();
    let span = info_span!("session", client = %client_id, %peer);

    let (reader, writer) = stream.into_split();
    run_session(client_id, reader, writer, room, config)
        .instrument(span)
        .await
}

/// Drive one client through the handshake and chat relay
///
/// Generic over the byte stream so tests can use in-memory pipes. Returns
/// `Ok` when the client closes the connection, or the error that ended the
/// session. A joined session always leaves the room before this returns.
pub async fn run_session<R, W>(
    client_id: ClientId,
    reader: R,
    writer: W,
    room: RoomHandle,
    config: &Config,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, rx) = mpsc::channel(config.queue_capacity());
    let disconnect = Arc::new(Notify::new());

    let mut write_task =
        tokio::spawn(write_loop(writer, rx, disconnect.clone()).in_current_span());

    let mut session = Session {
        id: client_id,
        state: SessionState::AwaitingName,
        room,
        outbox,
        disconnect,
        reader: BufReader::new(reader),
        max_line_len: config.max_line_len(),
    };

    let result = session.run().await;
    session.terminate().await;
    // Last local sender goes with the session; the room drops its copy on leave
    drop(session);

    if matches!(result, Err(AppError::Disconnected)) {
        write_task.abort();
    } else if timeout(DRAIN_TIMEOUT, &mut write_task).await.is_err() {
        debug!("Output not drained in time, closing anyway");
        write_task.abort();
    }

    info!("Session closed");
    result
}

struct Session<R> {
    id: ClientId,
    state: SessionState,
    room: RoomHandle,
    /// Session's own sender for the prompt and diagnostics
    outbox: mpsc::Sender<ServerMessage>,
    disconnect: Arc<Notify>,
    reader: BufReader<R>,
    max_line_len: usize,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(&mut self) -> Result<(), AppError> {
        self.send(ServerMessage::Prompt).await?;

        let Some(line) = self.next_line().await? else {
            debug!("Closed before choosing a name");
            return Ok(());
        };

        let name = line.trim_end().to_string();
        if let Err(e) = validate_name(&name) {
            self.reject(e.to_string()).await;
            return Err(e.into());
        }

        let member = Member::new(
            self.id,
            name.clone(),
            self.outbox.clone(),
            self.disconnect.clone(),
        );
        match self.room.try_join(member).await? {
            Ok(present) => debug!("Welcomed with {} already present", present.len()),
            Err(e) => {
                self.reject(e.to_string()).await;
                return Err(e.into());
            }
        }

        info!("Joined as '{}'", name);
        self.state = SessionState::Joined { name: name.clone() };

        while let Some(line) = self.next_line().await? {
            let text = strip_terminator(&line);
            self.room
                .broadcast(self.id, name.clone(), text.to_string())
                .await?;
        }

        debug!("'{}' closed the connection", name);
        Ok(())
    }

    /// Leave the room if joined; safe to call more than once
    async fn terminate(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Terminated);
        debug!("Terminating from {:?}", state);
        if let SessionState::Joined { name } = state {
            if let Err(e) = self.room.leave(self.id, name).await {
                debug!("Leave not delivered: {}", e);
            }
        }
    }

    /// Read one line, including its terminator
    ///
    /// The limit applies to the text without `\r\n`. `None` on end of
    /// stream; a trailing partial line is discarded.
    async fn next_line(&mut self) -> Result<Option<String>, AppError> {
        let mut line = String::new();
        let limit = self.max_line_len;
        let mut limited = (&mut self.reader).take(limit as u64 + 2);

        let read = tokio::select! {
            read = limited.read_line(&mut line) => read?,
            _ = self.disconnect.notified() => return Err(AppError::Disconnected),
        };

        if read == 0 {
            return Ok(None);
        }
        if !line.ends_with('\n') {
            if line.len() > limit {
                return Err(AppError::LineTooLong { limit });
            }
            return Ok(None);
        }
        if strip_terminator(&line).len() > limit {
            return Err(AppError::LineTooLong { limit });
        }
        Ok(Some(line))
    }

    async fn send(&self, msg: ServerMessage) -> Result<(), AppError> {
        self.outbox
            .send(msg)
            .await
            .map_err(|_| AppError::Disconnected)
    }

    /// Best-effort diagnostic before hanging up
    async fn reject(&self, reason: String) {
        let _ = self.send(ServerMessage::Rejected { reason }).await;
    }
}

fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Drain queued messages onto the socket, one line each
async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<ServerMessage>,
    disconnect: Arc<Notify>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let line = format!("{}\n", msg);
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("Write failed: {}", e);
            disconnect.notify_one();
            return;
        }
    }

    let _ = writer.shutdown().await;
    debug!("Write task ended");
}

fn log_session_error(err: &AppError) {
    match err {
        AppError::Name(_) | AppError::Join(_) => info!("Rejected: {}", err),
        AppError::Io(_) | AppError::Disconnected => debug!("Connection lost: {}", err),
        AppError::LineTooLong { .. } => warn!("Dropped: {}", err),
        AppError::ServerClosed => error!("Session ended: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{duplex, split, BufReader, DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::error::{JoinError, NameError};
    use crate::server::RoomServer;

    const WAIT: Duration = Duration::from_secs(2);

    struct TestClient {
        reader: BufReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
        session: JoinHandle<Result<(), AppError>>,
    }

    impl TestClient {
        fn connect(room: &RoomHandle, config: Config, pipe_size: usize) -> Self {
            let (client, server) = duplex(pipe_size);
            let (server_read, server_write) = split(server);
            let room = room.clone();
            let session = tokio::spawn(async move {
                run_session(ClientId::new(), server_read, server_write, room, &config).await
            });
            let (reader, writer) = split(client);
            Self {
                reader: BufReader::new(reader),
                writer,
                session,
            }
        }

        async fn join(room: &RoomHandle, name: &str) -> Self {
            let mut client = Self::connect(room, Config::default(), 64 * 1024);
            client.expect_prompt().await;
            client.send(name).await;
            let welcome = client.recv().await;
            assert!(welcome.starts_with("* The room contains:"), "{welcome}");
            client
        }

        async fn send(&mut self, line: &str) {
            self.writer
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> String {
            let mut line = String::new();
            timeout(WAIT, self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for a line")
                .unwrap();
            line.trim_end_matches('\n').to_string()
        }

        async fn expect_prompt(&mut self) {
            assert_eq!(self.recv().await, ServerMessage::Prompt.to_string());
        }

        async fn expect_closed(&mut self) {
            let mut line = String::new();
            let n = timeout(WAIT, self.reader.read_line(&mut line))
                .await
                .expect("timed out waiting for close")
                .unwrap();
            assert_eq!(n, 0, "unexpected line {line:?}");
        }

        async fn finish(self) -> Result<(), AppError> {
            timeout(WAIT, self.session).await.unwrap().unwrap()
        }
    }

    #[tokio::test]
    async fn test_first_member_gets_empty_welcome() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::connect(&room, Config::default(), 4096);

        alice.expect_prompt().await;
        alice.send("alice").await;
        assert_eq!(alice.recv().await, "* The room contains: ");
        assert_eq!(room.members().await.unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_without_registry() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        let mut bad = TestClient::connect(&room, Config::default(), 4096);
        bad.expect_prompt().await;
        bad.send("").await;
        assert!(bad.recv().await.starts_with('*'));
        bad.expect_closed().await;
        assert!(matches!(
            bad.finish().await,
            Err(AppError::Name(NameError::Empty))
        ));

        // Nothing reached alice before this probe
        let mut bob = TestClient::join(&room, "bob").await;
        assert_eq!(alice.recv().await, "* bob has entered the room");
        bob.send("hi").await;
        assert_eq!(alice.recv().await, "[bob] hi");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_silently() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        let mut dup = TestClient::connect(&room, Config::default(), 4096);
        dup.expect_prompt().await;
        dup.send("alice").await;
        assert!(dup.recv().await.starts_with('*'));
        dup.expect_closed().await;
        assert!(matches!(
            dup.finish().await,
            Err(AppError::Join(JoinError::DuplicateName(_)))
        ));

        assert_eq!(room.members().await.unwrap(), vec!["alice".to_string()]);

        let mut bob = TestClient::join(&room, "bob").await;
        assert_eq!(alice.recv().await, "* bob has entered the room");
        bob.send("still here?").await;
        assert_eq!(alice.recv().await, "[bob] still here?");
    }

    #[tokio::test]
    async fn test_crlf_is_stripped() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        let mut bob = TestClient::connect(&room, Config::default(), 4096);
        bob.expect_prompt().await;
        bob.send("bob\r").await;
        assert_eq!(bob.recv().await, "* The room contains: alice");
        assert_eq!(alice.recv().await, "* bob has entered the room");

        bob.send("hello there\r").await;
        assert_eq!(alice.recv().await, "[bob] hello there");
    }

    #[tokio::test]
    async fn test_long_chat_line_relayed() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;
        let mut bob = TestClient::join(&room, "bob").await;
        alice.recv().await;

        let text = "x".repeat(1000);
        bob.send(&text).await;
        assert_eq!(alice.recv().await, format!("[bob] {text}"));
    }

    #[tokio::test]
    async fn test_oversized_line_drops_client_and_leaves() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        let config = Config {
            max_line_len: 1000,
            ..Config::default()
        };
        let mut bob = TestClient::connect(&room, config, 64 * 1024);
        bob.expect_prompt().await;
        bob.send("bob").await;
        bob.recv().await;
        assert_eq!(alice.recv().await, "* bob has entered the room");

        bob.send(&"y".repeat(1001)).await;
        assert_eq!(alice.recv().await, "* bob has left the room");
        assert!(matches!(
            bob.finish().await,
            Err(AppError::LineTooLong { limit: 1000 })
        ));
    }

    #[tokio::test]
    async fn test_crlf_line_at_limit_relayed() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        let config = Config {
            max_line_len: 1000,
            ..Config::default()
        };
        let mut bob = TestClient::connect(&room, config, 64 * 1024);
        bob.expect_prompt().await;
        bob.send("bob").await;
        bob.recv().await;
        assert_eq!(alice.recv().await, "* bob has entered the room");

        let text = "x".repeat(1000);
        bob.send(&format!("{text}\r")).await;
        assert_eq!(alice.recv().await, format!("[bob] {text}"));

        bob.send(&format!("{}\r", "z".repeat(1001))).await;
        assert_eq!(alice.recv().await, "* bob has left the room");
        assert!(matches!(
            bob.finish().await,
            Err(AppError::LineTooLong { limit: 1000 })
        ));
    }

    #[tokio::test]
    async fn test_invalid_utf8_drops_client_and_leaves() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;
        let mut bob = TestClient::join(&room, "bob").await;
        assert_eq!(alice.recv().await, "* bob has entered the room");

        bob.writer.write_all(b"\xff\xfe\n").await.unwrap();

        assert_eq!(alice.recv().await, "* bob has left the room");
        assert!(matches!(
            bob.finish().await,
            Err(AppError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData
        ));
    }

    /// Accepts `ok_writes` writes, then fails every write after
    struct FailingWriter {
        ok_writes: usize,
    }

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.ok_writes == 0 {
                return Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
            }
            self.ok_writes -= 1;
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_write_failure_leaves_once() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        // Prompt and welcome get through, the first chat line does not
        let (mut client, server) = duplex(4096);
        let (server_read, _unused) = split(server);
        let handle = room.clone();
        let session = tokio::spawn(async move {
            let writer = FailingWriter { ok_writes: 2 };
            run_session(ClientId::new(), server_read, writer, handle, &Config::default()).await
        });

        client.write_all(b"bob\n").await.unwrap();
        assert_eq!(alice.recv().await, "* bob has entered the room");

        alice.send("are you there?").await;
        assert_eq!(alice.recv().await, "* bob has left the room");
        let result = timeout(WAIT, session).await.unwrap().unwrap();
        assert!(matches!(result, Err(AppError::Disconnected)));

        // Nothing else about bob reaches alice
        let mut carol = TestClient::join(&room, "carol").await;
        assert_eq!(alice.recv().await, "* carol has entered the room");
        carol.send("hi").await;
        assert_eq!(alice.recv().await, "[carol] hi");
        assert_eq!(
            room.members().await.unwrap(),
            vec!["alice".to_string(), "carol".to_string()]
        );
    }

    #[tokio::test]
    async fn test_disconnect_before_name_is_silent() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        let mut ghost = TestClient::connect(&room, Config::default(), 4096);
        ghost.expect_prompt().await;
        ghost.writer.shutdown().await.unwrap();
        ghost.expect_closed().await;
        assert!(ghost.finish().await.is_ok());

        let mut bob = TestClient::join(&room, "bob").await;
        assert_eq!(alice.recv().await, "* bob has entered the room");
        bob.send("ping").await;
        assert_eq!(alice.recv().await, "[bob] ping");
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped() {
        let room = RoomServer::spawn();
        let mut alice = TestClient::join(&room, "alice").await;

        // Tiny pipe and queue, and the client never reads after its prompt
        let config = Config {
            queue_capacity: 2,
            ..Config::default()
        };
        let mut slow = TestClient::connect(&room, config, 64);
        slow.expect_prompt().await;
        slow.send("slow").await;
        assert_eq!(alice.recv().await, "* slow has entered the room");

        for i in 0..64 {
            alice.send(&format!("message number {i} padded out a bit")).await;
        }

        assert_eq!(alice.recv().await, "* slow has left the room");
        assert!(matches!(slow.finish().await, Err(AppError::Disconnected)));
        assert_eq!(room.members().await.unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("hi\n"), "hi");
        assert_eq!(strip_terminator("hi\r\n"), "hi");
        assert_eq!(strip_terminator("  spaced  \n"), "  spaced  ");
        assert_eq!(strip_terminator("\n"), "");
    }
}
