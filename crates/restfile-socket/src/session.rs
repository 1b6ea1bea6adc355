//! WebSocket session state machine
//!
//! Connecting → Connected → {Playbook | SingleEntry | REPL} → Draining →
//! Closed. Exactly two logical tasks touch the socket: the send driver and
//! the receive listener, coordinated by one shared `CancellationToken`.

use crate::repl::Repl;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use restfile_config::{Config, Socket};
use restfile_core::{Error, Result};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request as HandshakeRequest;
use tokio_tungstenite::tungstenite::protocol::frame::{coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// What the session should do once connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Send the payloads named in `run.order`, in order
    Playbook,
    /// Send exactly one named payload
    Entry(String),
    /// Interactive line editor
    Repl,
}

impl Mode {
    /// Map the CLI's socket argument: nothing → REPL, `run` → playbook,
    /// anything else → that one entry
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            None => Mode::Repl,
            Some("run") => Mode::Playbook,
            Some(entry) => Mode::Entry(entry.to_string()),
        }
    }
}

/// One WebSocket session over a resolved socket block
#[derive(Debug)]
pub struct Session {
    socket: Socket,
    config: Config,
}

impl Session {
    /// Session over `socket` under the run policy in `config`
    pub fn new(socket: Socket, config: Config) -> Self {
        Self { socket, config }
    }

    /// Dial, run the mode, drain, close. Dial failure is fatal with no
    /// retry; a mid-session failure ends the session through the shared
    /// completion signal.
    pub async fn run(&self, mode: Mode) -> Result<()> {
        // Connecting
        let request = self.handshake_request()?;
        info!(url = %self.socket.url, "dialing socket");
        let connect = connect_async_tls_with_config(request, None, false, self.connector()?);
        let (stream, _response) = tokio::time::timeout(self.config.socket_dial_timeout, connect)
            .await
            .map_err(|_| {
                Error::session(format!(
                    "dial timed out after {:?}",
                    self.config.socket_dial_timeout
                ))
            })?
            .map_err(|e| Error::session(format!("dial failed: {}", e)))?;
        debug!("socket connected");

        // Connected: the listener runs until the signal fires or a read fails
        let (mut sink, stream) = stream.split();
        let done = CancellationToken::new();
        let receiver = spawn_receiver(stream, done.clone());

        let outcome = match mode {
            Mode::Playbook => self.run_playbook(&mut sink, &done).await,
            Mode::Entry(name) => match self.socket.playbook.get(&name) {
                None => {
                    // explicit error; the completion signal stays unfired
                    receiver.abort();
                    return Err(Error::session(format!("no such playbook entry: {}", name)));
                }
                Some(payload) => {
                    let sent = sink
                        .send(Message::Text(payload.clone()))
                        .await
                        .map_err(|e| Error::session(format!("write {}: {}", name, e)));
                    done.cancel();
                    sent
                }
            },
            Mode::Repl => self.run_repl(&mut sink, &done).await,
        };

        done.cancelled().await;

        // Draining: a failed close frame is reported, never blocks shutdown
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        if let Err(e) = sink.send(close).await {
            warn!("close frame send failed: {}", e);
        }

        // Closed
        let _ = receiver.await;
        outcome
    }

    async fn run_playbook(&self, sink: &mut WsSink, done: &CancellationToken) -> Result<()> {
        let run = &self.socket.run;
        if run.order.is_empty() {
            done.cancel();
            return Err(Error::session("socket has no run order to play"));
        }
        info!(order = ?run.order, "running playbook");

        let mut outcome = Ok(());
        for (step, name) in run.order.iter().enumerate() {
            if step > 0 && !run.delay.is_zero() {
                tokio::time::sleep(run.delay).await;
            }
            if name == "noop" {
                continue; // pure pacing step
            }
            // order names are validated against the playbook at decode
            let Some(payload) = self.socket.playbook.get(name) else {
                outcome = Err(Error::session(format!("no such playbook entry: {}", name)));
                break;
            };
            if let Err(e) = sink.send(Message::Text(payload.clone())).await {
                outcome = Err(Error::session(format!("write {}: {}", name, e)));
                break;
            }
            debug!(entry = %name, "sent playbook entry");
        }

        done.cancel();
        outcome
    }

    async fn run_repl(&self, sink: &mut WsSink, done: &CancellationToken) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let repl = Repl::new(
            self.socket.playbook.clone(),
            self.socket.no_special_cmds,
            self.config.repl_history_limit,
            done.clone(),
            tx,
        );
        let editor = tokio::task::spawn_blocking(move || repl.run());

        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                payload = rx.recv() => match payload {
                    Some(payload) => {
                        if let Err(e) = sink.send(Message::Text(payload)).await {
                            error!("write: {}", e);
                            done.cancel();
                            break;
                        }
                    }
                    None => {
                        done.cancel();
                        break;
                    }
                },
            }
        }

        match editor.await {
            Ok(result) => result,
            Err(e) => Err(Error::session(format!("repl task failed: {}", e))),
        }
    }

    fn handshake_request(&self) -> Result<HandshakeRequest> {
        let mut request = self
            .socket
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::session(format!("invalid socket url {}: {}", self.socket.url, e)))?;

        let headers = request.headers_mut();
        headers.insert(http::header::USER_AGENT, header_value(&self.config.user_agent)?);
        if let Some(origin) = &self.socket.origin {
            headers.insert(http::header::ORIGIN, header_value(origin)?);
        }
        for (name, value) in &self.socket.headers {
            let name = http::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::session(format!("invalid header name {}: {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }
        if !self.socket.cookies.is_empty() {
            let cookie = self
                .socket
                .cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert(http::header::COOKIE, header_value(&cookie)?);
        }

        Ok(request)
    }

    fn connector(&self) -> Result<Option<Connector>> {
        if !self.config.insecure_no_verify_tls {
            return Ok(None);
        }
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::session(format!("tls connector: {}", e)))?;
        Ok(Some(Connector::NativeTls(tls)))
    }
}

/// Convert a string into an `http::HeaderValue`, surfacing invalid bytes as a
/// session error.
fn header_value(value: &str) -> Result<http::HeaderValue> {
    http::HeaderValue::from_str(value)
        .map_err(|e| Error::session(format!("invalid header value {}: {}", value, e)))
}

/// Print every inbound frame until the signal fires or a read fails; a read
/// failure itself fires the signal.
fn spawn_receiver(mut stream: WsStream, done: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => println!("\r< {}", text),
                    Some(Ok(Message::Binary(data))) => println!("\r< [{} bytes]", data.len()),
                    Some(Ok(Message::Close(_))) | None => {
                        done.cancel();
                        break;
                    }
                    Some(Ok(_)) => {} // ping/pong handled by the protocol layer
                    Some(Err(e)) => {
                        error!("read error: {}", e);
                        done.cancel();
                        break;
                    }
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use restfile_config::Run;
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    #[test]
    fn test_mode_from_arg() {
        assert_eq!(Mode::from_arg(None), Mode::Repl);
        assert_eq!(Mode::from_arg(Some("run")), Mode::Playbook);
        assert_eq!(Mode::from_arg(Some("hello")), Mode::Entry("hello".to_string()));
    }

    /// Accept one connection and collect text frames until close
    async fn collect_server() -> (std::net::SocketAddr, JoinHandle<Vec<String>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut frames = Vec::new();
            while let Some(frame) = ws.next().await {
                match frame {
                    Ok(Message::Text(text)) => frames.push(text),
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            frames
        });
        (addr, handle)
    }

    fn socket_for(addr: std::net::SocketAddr) -> Socket {
        Socket {
            url: format!("ws://{}", addr),
            playbook: BTreeMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_playbook_sends_frames_in_order_with_pacing() {
        let (addr, server) = collect_server().await;
        let mut socket = socket_for(addr);
        socket.run = Run {
            order: vec!["a".to_string(), "noop".to_string(), "b".to_string()],
            delay: Duration::from_millis(20),
        };

        let session = Session::new(socket, Config::default());
        let started = Instant::now();
        session.run(Mode::Playbook).await.unwrap();

        let frames = server.await.unwrap();
        assert_eq!(frames, vec!["1", "2"]);
        // the delay is observed between every step, the noop included
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_single_entry_sends_one_frame() {
        let (addr, server) = collect_server().await;
        let session = Session::new(socket_for(addr), Config::default());
        session.run(Mode::Entry("b".to_string())).await.unwrap();

        let frames = server.await.unwrap();
        assert_eq!(frames, vec!["2"]);
    }

    #[tokio::test]
    async fn test_unknown_entry_is_explicit_error() {
        let (addr, server) = collect_server().await;
        let session = Session::new(socket_for(addr), Config::default());

        let err = session.run(Mode::Entry("ghost".to_string())).await.unwrap_err();
        assert!(err.to_string().contains("no such playbook entry: ghost"));
        server.abort();
    }

    #[tokio::test]
    async fn test_dial_failure_is_fatal() {
        let socket = Socket {
            url: "ws://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let session = Session::new(socket, Config::default());
        let err = session.run(Mode::Playbook).await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[tokio::test]
    async fn test_empty_run_order_is_error() {
        let (addr, server) = collect_server().await;
        let session = Session::new(socket_for(addr), Config::default());
        let err = session.run(Mode::Playbook).await.unwrap_err();
        assert!(err.to_string().contains("no run order"));
        server.abort();
    }
}
