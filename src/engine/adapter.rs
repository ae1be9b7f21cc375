//! The single owner of the audio engine's control connection.
//!
//! Every interaction with the engine goes through one worker task holding
//! one TCP connection, with one request in flight at a time. Callers submit
//! commands over a channel and await the reply. On transport errors the
//! connection is torn down and reconnected with exponential backoff.

use super::http_ingest::HttpIngestClient;
use super::protocol;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(100);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine rejected request: {0}")]
    Rejected(String),

    #[error("engine request timed out")]
    Timeout,
}

/// A queued upcoming track as reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRef {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub source_uri: Option<String>,
}

/// Current-track fields as read straight off the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineNow {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub source_uri: Option<String>,
    pub duration_ms: Option<i64>,
    pub remaining_ms: Option<i64>,
}

/// Metadata attached to an injected clip so it shows up properly in the
/// engine's own queue listings.
#[derive(Debug, Clone)]
pub struct ClipMetadata {
    pub artist: String,
    pub title: String,
    pub album: String,
}

/// The only mutation path to the audio engine.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn now(&self) -> Result<EngineNow, EngineError>;

    /// Up to `n` queued items in play order, excluding the current one.
    async fn upcoming(&self, n: usize) -> Result<Vec<TrackRef>, EngineError>;

    /// Submit a synthesized clip for priority playback.
    async fn enqueue_tts(&self, path: &Path, meta: &ClipMetadata) -> Result<(), EngineError>;

    /// Ask the engine to advance past the current item.
    async fn skip(&self) -> Result<(), EngineError>;
}

#[derive(Debug, Clone)]
pub struct ControlPortSettings {
    pub host: String,
    pub port: u16,
    /// Queue to push clips into (`<queue>.push`).
    pub queue_name: String,
    /// Output whose metadata/remaining/skip commands we use.
    pub output_name: String,
    pub command_timeout: Duration,
    pub enqueue_timeout: Duration,
}

impl Default for ControlPortSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1234,
            queue_name: "tts".to_string(),
            output_name: "icecast".to_string(),
            command_timeout: Duration::from_secs(1),
            enqueue_timeout: Duration::from_secs(3),
        }
    }
}

struct ControlRequest {
    command: String,
    timeout: Duration,
    reply: oneshot::Sender<Result<String, EngineError>>,
}

/// Engine adapter backed by the control port, optionally routing enqueues
/// through the engine's HTTP ingestion slot when one is configured.
pub struct ControlPortAdapter {
    settings: ControlPortSettings,
    cmd_tx: mpsc::Sender<ControlRequest>,
    http_ingest: Option<HttpIngestClient>,
}

impl ControlPortAdapter {
    pub fn new(
        settings: ControlPortSettings,
        http_ingest: Option<HttpIngestClient>,
        shutdown: CancellationToken,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let worker = ConnectionWorker {
            host: settings.host.clone(),
            port: settings.port,
            stream: None,
            backoff: RECONNECT_BACKOFF_MIN,
            next_attempt_at: Instant::now(),
        };
        tokio::spawn(worker.run(cmd_rx, shutdown));
        Self {
            settings,
            cmd_tx,
            http_ingest,
        }
    }

    async fn exec(&self, command: String, timeout: Duration) -> Result<String, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ControlRequest {
                command,
                timeout,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Unavailable("control worker stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Unavailable("control worker dropped request".to_string()))?
    }

    async fn request_metadata(&self, rid: &str) -> Result<TrackRef, EngineError> {
        let raw = self
            .exec(
                format!("request.metadata {}", rid),
                self.settings.command_timeout,
            )
            .await?;
        let kv = protocol::parse_kv_lines(raw.lines());
        let source_uri = kv
            .get("filename")
            .or_else(|| kv.get("initial_uri"))
            .map(|uri| protocol::strip_file_uri(uri).to_string());
        Ok(TrackRef {
            title: kv.get("title").cloned().unwrap_or_default(),
            artist: kv.get("artist").cloned().unwrap_or_default(),
            album: kv.get("album").cloned().unwrap_or_default(),
            source_uri,
        })
    }
}

#[async_trait]
impl EngineAdapter for ControlPortAdapter {
    async fn now(&self) -> Result<EngineNow, EngineError> {
        let raw = self
            .exec(
                format!("output.{}.metadata", self.settings.output_name),
                self.settings.command_timeout,
            )
            .await?;
        let blocks = protocol::split_metadata_blocks(&raw);
        let current = blocks.into_iter().next().unwrap_or_default();

        let mut now = EngineNow {
            title: current.get("title").cloned().unwrap_or_default(),
            artist: current.get("artist").cloned().unwrap_or_default(),
            album: current.get("album").cloned().unwrap_or_default(),
            source_uri: current
                .get("filename")
                .or_else(|| current.get("initial_uri"))
                .map(|uri| protocol::strip_file_uri(uri).to_string()),
            duration_ms: current
                .get("duration")
                .and_then(|d| d.parse::<f64>().ok())
                .map(|s| (s * 1000.0) as i64),
            remaining_ms: None,
        };

        // Remaining time is best-effort; a parse failure just leaves it unset.
        if let Ok(raw) = self
            .exec(
                format!("output.{}.remaining", self.settings.output_name),
                self.settings.command_timeout,
            )
            .await
        {
            now.remaining_ms = raw
                .lines()
                .next()
                .and_then(|line| line.trim().parse::<f64>().ok())
                .map(|s| (s * 1000.0) as i64);
        }

        Ok(now)
    }

    async fn upcoming(&self, n: usize) -> Result<Vec<TrackRef>, EngineError> {
        let raw = self
            .exec("request.all".to_string(), self.settings.command_timeout)
            .await?;
        let rids = protocol::parse_request_ids(&raw);

        // The first id is the currently playing request.
        let mut upcoming = Vec::new();
        for rid in rids.iter().skip(1).take(n) {
            match self.request_metadata(rid).await {
                Ok(track) if !track.title.is_empty() || track.source_uri.is_some() => {
                    upcoming.push(track)
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(rid = %rid, error = %e, "Skipping unreadable queue entry");
                }
            }
        }
        Ok(upcoming)
    }

    async fn enqueue_tts(&self, path: &Path, meta: &ClipMetadata) -> Result<(), EngineError> {
        if let Some(http) = &self.http_ingest {
            return http.put_audio(path).await;
        }

        let uri = protocol::annotate_uri(
            &path.to_string_lossy(),
            &meta.artist,
            &meta.title,
            &meta.album,
        );
        let response = self
            .exec(
                format!("{}.push {}", self.settings.queue_name, uri),
                self.settings.enqueue_timeout,
            )
            .await?;
        // A successful push echoes the new request id.
        if protocol::parse_request_ids(&response).is_empty() {
            return Err(EngineError::Rejected(response));
        }
        Ok(())
    }

    async fn skip(&self) -> Result<(), EngineError> {
        self.exec(
            format!("output.{}.skip", self.settings.output_name),
            self.settings.command_timeout,
        )
        .await?;
        Ok(())
    }
}

/// Owns the TCP connection. One request in flight at a time; the idle
/// connection is reused across requests.
struct ConnectionWorker {
    host: String,
    port: u16,
    stream: Option<BufReader<TcpStream>>,
    backoff: Duration,
    next_attempt_at: Instant,
}

impl ConnectionWorker {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<ControlRequest>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                request = cmd_rx.recv() => {
                    let Some(request) = request else { break };
                    let result = self.handle(&request.command, request.timeout).await;
                    let _ = request.reply.send(result);
                }
                _ = shutdown.cancelled() => break,
            }
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.get_mut().write_all(b"quit\n").await;
        }
        info!("Engine control worker stopped");
    }

    async fn handle(&mut self, command: &str, timeout: Duration) -> Result<String, EngineError> {
        if self.stream.is_none() {
            self.connect().await?;
        }
        match self.roundtrip(command, timeout).await {
            Ok(response) => Ok(response),
            Err(e) => {
                // Torn-down connection; next request triggers a reconnect.
                self.stream = None;
                self.next_attempt_at = Instant::now() + self.backoff;
                self.backoff = (self.backoff * 2).min(RECONNECT_BACKOFF_MAX);
                Err(e)
            }
        }
    }

    async fn connect(&mut self) -> Result<(), EngineError> {
        let now = Instant::now();
        if now < self.next_attempt_at {
            return Err(EngineError::Unavailable(
                "engine connection backing off".to_string(),
            ));
        }
        match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => {
                debug!(host = %self.host, port = self.port, "Connected to engine control port");
                self.stream = Some(BufReader::new(stream));
                self.backoff = RECONNECT_BACKOFF_MIN;
                Ok(())
            }
            Err(e) => {
                self.next_attempt_at = now + self.backoff;
                self.backoff = (self.backoff * 2).min(RECONNECT_BACKOFF_MAX);
                warn!(error = %e, "Engine control port unreachable");
                Err(EngineError::Unavailable(e.to_string()))
            }
        }
    }

    async fn roundtrip(&mut self, command: &str, timeout: Duration) -> Result<String, EngineError> {
        let stream = self.stream.as_mut().expect("connected");
        let io = async {
            stream
                .get_mut()
                .write_all(format!("{}\n", command).as_bytes())
                .await?;

            let mut response = String::new();
            let mut line = String::new();
            loop {
                line.clear();
                let read = stream.read_line(&mut line).await?;
                if read == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "engine closed connection",
                    ));
                }
                let trimmed = line.trim_end_matches(['\r', '\n']);
                if trimmed == protocol::END_MARKER {
                    return Ok(response);
                }
                response.push_str(trimmed);
                response.push('\n');
            }
        };
        match tokio::time::timeout(timeout, io).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(EngineError::Unavailable(e.to_string())),
            Err(_) => Err(EngineError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Minimal control-port fake speaking the END-terminated line protocol.
    async fn spawn_fake_engine() -> (std::net::SocketAddr, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server_token = token.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = server_token.cancelled() => break,
                };
                let Ok((mut socket, _)) = accepted else { break };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut pending = String::new();
                    loop {
                        let Ok(n) = socket.read(&mut buf).await else { return };
                        if n == 0 {
                            return;
                        }
                        pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                        while let Some(idx) = pending.find('\n') {
                            let command = pending[..idx].trim().to_string();
                            pending.drain(..=idx);
                            let reply = match command.as_str() {
                                "output.icecast.metadata" => {
                                    "--- 1 ---\ntitle=\"Now Song\"\nartist=\"Now Artist\"\nalbum=\"Now Album\"\nfilename=\"file:///music/now.mp3\"\nEND\n".to_string()
                                }
                                "output.icecast.remaining" => "123.4\nEND\n".to_string(),
                                "request.all" => "10 11 12\nEND\n".to_string(),
                                "request.metadata 11" => {
                                    "title=\"Next One\"\nartist=\"Artist B\"\nEND\n".to_string()
                                }
                                "request.metadata 12" => {
                                    "title=\"After That\"\nartist=\"Artist C\"\nEND\n".to_string()
                                }
                                cmd if cmd.starts_with("tts.push") => "13\nEND\n".to_string(),
                                "output.icecast.skip" => "Done\nEND\n".to_string(),
                                "quit" => return,
                                _ => "END\n".to_string(),
                            };
                            if socket.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        (addr, token)
    }

    fn adapter_for(addr: std::net::SocketAddr, shutdown: &CancellationToken) -> ControlPortAdapter {
        let settings = ControlPortSettings {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        };
        ControlPortAdapter::new(settings, None, shutdown.clone())
    }

    #[tokio::test]
    async fn now_reads_current_block_and_remaining() {
        let (addr, token) = spawn_fake_engine().await;
        let adapter = adapter_for(addr, &token);

        let now = adapter.now().await.unwrap();
        assert_eq!(now.title, "Now Song");
        assert_eq!(now.artist, "Now Artist");
        assert_eq!(now.source_uri.as_deref(), Some("/music/now.mp3"));
        assert_eq!(now.remaining_ms, Some(123_400));

        token.cancel();
    }

    #[tokio::test]
    async fn upcoming_skips_current_request() {
        let (addr, token) = spawn_fake_engine().await;
        let adapter = adapter_for(addr, &token);

        let upcoming = adapter.upcoming(8).await.unwrap();
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].title, "Next One");
        assert_eq!(upcoming[1].title, "After That");

        let limited = adapter.upcoming(1).await.unwrap();
        assert_eq!(limited.len(), 1);

        token.cancel();
    }

    #[tokio::test]
    async fn enqueue_pushes_annotated_uri() {
        let (addr, token) = spawn_fake_engine().await;
        let adapter = adapter_for(addr, &token);

        adapter
            .enqueue_tts(
                Path::new("/tts/intro_1.mp3"),
                &ClipMetadata {
                    artist: "AI DJ".to_string(),
                    title: "DJ Intro".to_string(),
                    album: "AI Radio".to_string(),
                },
            )
            .await
            .unwrap();

        token.cancel();
    }

    #[tokio::test]
    async fn unreachable_engine_reports_unavailable() {
        let token = CancellationToken::new();
        let settings = ControlPortSettings {
            host: "127.0.0.1".to_string(),
            port: 1, // nothing listens here
            ..Default::default()
        };
        let adapter = ControlPortAdapter::new(settings, None, token.clone());

        assert!(matches!(
            adapter.skip().await,
            Err(EngineError::Unavailable(_))
        ));
        // Second attempt fails fast while backing off.
        assert!(matches!(
            adapter.skip().await,
            Err(EngineError::Unavailable(_))
        ));
        token.cancel();
    }
}
