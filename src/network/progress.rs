//! Server-sent progress streams for long-running jobs.
//!
//! [`ProgressStreamManager::subscribe`] opens `GET {target}/progress/{job_id}`
//! as an event stream and dispatches each decoded [`ProgressEvent`] to the
//! caller's callbacks from a background task. The returned [`StreamHandle`]
//! closes the stream on [`StreamHandle::close`], on drop, on a connection
//! error, when the server ends the stream, or when the stream outlives its
//! maximum lifetime. Whichever comes first, `on_close` runs exactly once.
//!
//! The server ending the stream before the job reached a final event counts
//! as a lost connection and is reported through `on_error`.

use std::fmt;
use std::pin::pin;
use std::string::FromUtf8Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::classify::{AttemptOutcome, classify};
use super::error::NetworkError;
use super::target::Target;

/// Default maximum stream lifetime (10 minutes).
pub const DEFAULT_STREAM_LIFETIME: Duration = Duration::from_secs(600);

/// SSE event name treated as progress. Events without a name default to it.
const MESSAGE_EVENT: &str = "message";

/// Stages after which a job emits nothing more.
pub const FINAL_STAGES: [&str; 2] = ["complete", "done"];

/// One progress update for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Current processing stage, e.g. `"processing"` or `"complete"`.
    pub stage: String,
    /// Units of work done so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    /// Total units of work.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Final result payload, usually present on the last event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Job-level error reported by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// Whether the job is finished, successfully or with a job error.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.error.is_some() || FINAL_STAGES.contains(&self.stage.as_str())
    }
}

/// Errors surfaced through `on_error`.
#[derive(Debug, Error)]
pub enum StreamError {
    /// A message payload was not a valid progress event. The stream stays open.
    #[error("malformed progress event: {source}")]
    MalformedEvent {
        /// The raw payload.
        payload: String,
        /// Why decoding failed.
        #[source]
        source: serde_json::Error,
    },

    /// A message was not valid UTF-8. The stream stays open.
    #[error("progress event is not valid UTF-8: {0}")]
    InvalidEncoding(#[source] FromUtf8Error),

    /// The stream could not be opened or broke. The stream is closed.
    #[error("progress stream failed: {0}")]
    Connection(#[from] NetworkError),
}

type MessageCallback = Box<dyn FnMut(ProgressEvent) + Send>;
type ErrorCallback = Box<dyn FnMut(StreamError) + Send>;
type CloseCallback = Box<dyn FnOnce() + Send>;

/// Callbacks for one subscription.
///
/// `on_message` and `on_error` run on the stream's background task, never
/// concurrently with each other.
pub struct ProgressCallbacks {
    on_message: MessageCallback,
    on_error: Option<ErrorCallback>,
    on_close: Option<CloseCallback>,
}

impl ProgressCallbacks {
    pub fn new(on_message: impl FnMut(ProgressEvent) + Send + 'static) -> Self {
        Self {
            on_message: Box::new(on_message),
            on_error: None,
            on_close: None,
        }
    }

    #[must_use]
    pub fn on_error(mut self, on_error: impl FnMut(StreamError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    #[must_use]
    pub fn on_close(mut self, on_close: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }
}

impl fmt::Debug for ProgressCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCallbacks")
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish_non_exhaustive()
    }
}

/// Close state shared by the handle and the background task.
struct CloseState {
    closed: AtomicBool,
    token: CancellationToken,
    on_close: Mutex<Option<CloseCallback>>,
}

impl CloseState {
    /// Closes once. Returns `false` if already closed.
    ///
    /// `on_close` has returned by the time waiters on the token wake.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let on_close = self
            .on_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(on_close) = on_close {
            on_close();
        }
        self.token.cancel();
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Handle to one open progress subscription. Dropping it closes the stream.
pub struct StreamHandle {
    job_id: String,
    state: Arc<CloseState>,
}

impl StreamHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Closes the stream. Idempotent.
    pub fn close(&self) {
        if self.state.close() {
            debug!(job_id = %self.job_id, "progress stream closed by caller");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Waits until the stream is closed for any reason.
    pub async fn closed(&self) {
        self.state.token.cancelled().await;
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("job_id", &self.job_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.state.close();
    }
}

/// Opens progress streams against one target.
#[derive(Debug, Clone)]
pub struct ProgressStreamManager {
    client: Client,
    target: Target,
    max_lifetime: Duration,
}

impl ProgressStreamManager {
    #[must_use]
    pub fn new(client: Client, target: Target) -> Self {
        Self {
            client,
            target,
            max_lifetime: DEFAULT_STREAM_LIFETIME,
        }
    }

    #[must_use]
    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    #[must_use]
    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    /// URL of the progress stream for `job_id`.
    #[must_use]
    pub fn stream_url(&self, job_id: &str) -> String {
        self.target
            .url_for(&format!("progress/{}", urlencoding::encode(job_id)))
    }

    /// Subscribes to progress for `job_id`.
    ///
    /// Returns immediately; the connection is opened in the background and
    /// failures are reported through `on_error`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn subscribe(&self, job_id: &str, callbacks: ProgressCallbacks) -> StreamHandle {
        let ProgressCallbacks {
            on_message,
            on_error,
            on_close,
        } = callbacks;

        let state = Arc::new(CloseState {
            closed: AtomicBool::new(false),
            token: CancellationToken::new(),
            on_close: Mutex::new(on_close),
        });

        let stream = ProgressStream {
            client: self.client.clone(),
            url: self.stream_url(job_id),
            on_message,
            on_error,
            state: Arc::clone(&state),
        };
        let span = info_span!("progress_stream", job_id);
        tokio::spawn(stream.supervise(self.max_lifetime).instrument(span));

        StreamHandle {
            job_id: job_id.to_string(),
            state,
        }
    }
}

/// Why the event loop stopped.
enum StreamExit {
    /// The server ended the stream after a final event.
    Finished,
    /// The caller closed the stream.
    Closed,
    Failed,
}

/// Incremental UTF-8 decoder that replaces invalid sequences with U+FFFD.
///
/// A sequence split across chunks is held until the next chunk completes it.
/// Bytes still held when the body ends belong to an undispatched event and
/// are dropped with it.
#[derive(Debug, Default)]
struct LossyUtf8 {
    pending: Vec<u8>,
}

impl LossyUtf8 {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut decoded = String::with_capacity(self.pending.len());
        let mut pos = 0;
        while pos < self.pending.len() {
            match std::str::from_utf8(&self.pending[pos..]) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    pos = self.pending.len();
                }
                Err(e) => {
                    let valid_end = pos + e.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[pos..valid_end]));
                    match e.error_len() {
                        Some(len) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            pos = valid_end + len;
                        }
                        None => {
                            pos = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..pos);
        decoded
    }
}

/// Background side of one subscription.
struct ProgressStream {
    client: Client,
    url: String,
    on_message: MessageCallback,
    on_error: Option<ErrorCallback>,
    state: Arc<CloseState>,
}

impl ProgressStream {
    async fn supervise(mut self, max_lifetime: Duration) {
        let token = self.state.token.clone();
        let state = Arc::clone(&self.state);

        tokio::select! {
            () = token.cancelled() => {
                debug!("progress stream cancelled");
            }
            () = tokio::time::sleep(max_lifetime) => {
                info!(lifetime_secs = max_lifetime.as_secs(), "progress stream expired");
                state.close();
            }
            exit = self.pump() => {
                match exit {
                    StreamExit::Finished => debug!("progress stream ended by server"),
                    StreamExit::Closed => debug!("progress stream closed during read"),
                    StreamExit::Failed => debug!("progress stream failed"),
                }
                state.close();
            }
        }
    }

    async fn pump(&mut self) -> StreamExit {
        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send();

        let response = match request.await {
            Ok(response) => response,
            Err(e) => {
                self.report(classify(&AttemptOutcome::from_transport(&e)).into());
                return StreamExit::Failed;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error = classify(&AttemptOutcome::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().map(str::to_string),
                detail: None,
                retry_after: None,
            });
            self.report(error.into());
            return StreamExit::Failed;
        }
        debug!(url = %self.url, "progress stream open");

        let mut decoder = LossyUtf8::default();
        let text = response
            .bytes_stream()
            .map(move |chunk| chunk.map(|bytes| decoder.decode(&bytes)));
        let mut events = pin!(text.eventsource());
        let mut finished = false;
        while let Some(item) = events.next().await {
            if self.state.is_closed() {
                return StreamExit::Closed;
            }
            match item {
                Ok(event) => {
                    if event.event != MESSAGE_EVENT || event.data.is_empty() {
                        continue;
                    }
                    finished |= self.dispatch(event.data);
                }
                Err(EventStreamError::Utf8(e)) => {
                    warn!(error = %e, "progress event is not valid UTF-8");
                    self.report(StreamError::InvalidEncoding(e));
                }
                Err(EventStreamError::Transport(e)) => {
                    self.report(classify(&AttemptOutcome::from_transport(&e)).into());
                    return StreamExit::Failed;
                }
                Err(e @ EventStreamError::Parser(_)) => {
                    self.report(NetworkError::unknown(format!("invalid event stream: {e}")).into());
                    return StreamExit::Failed;
                }
            }
        }

        if finished {
            StreamExit::Finished
        } else {
            self.report(NetworkError::unreachable("connection to server lost").into());
            StreamExit::Failed
        }
    }

    /// Delivers one payload. Returns whether it was a final event.
    fn dispatch(&mut self, payload: String) -> bool {
        match serde_json::from_str::<ProgressEvent>(&payload) {
            Ok(event) => {
                let is_final = event.is_final();
                (self.on_message)(event);
                is_final
            }
            Err(source) => {
                warn!(error = %source, "failed to parse progress event");
                self.report(StreamError::MalformedEvent { payload, source });
                false
            }
        }
    }

    fn report(&mut self, error: StreamError) {
        if self.state.is_closed() {
            return;
        }
        if matches!(error, StreamError::Connection(_)) {
            warn!(error = %error, "progress stream error");
        }
        if let Some(on_error) = self.on_error.as_mut() {
            on_error(error);
        }
    }
}
