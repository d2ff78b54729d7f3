//! Transcoder process plumbing
//!
//! A [`Conversion`] owns one running transcoder and the two tasks that feed
//! it: the input pump, which copies the request body into stdin, and the
//! stderr drain. Stdout is read by the caller, chunk by chunk, so nothing is
//! buffered beyond a single read.
//!
//! Dropping a `Conversion` aborts both tasks and kills the process. This is
//! how a client disconnect tears everything down: the response body stream
//! owns the conversion.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::{build_command, AudioFormat};
use crate::config::TranscoderConfig;
use crate::error::{GatewayError, Result};

/// Number of stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for the pump and stderr drain once the process has exited
const EXIT_GRACE: Duration = Duration::from_millis(250);

/// Final state of a conversion as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Running,
    Succeeded,
    Failed,
    /// The client went away before the conversion finished
    Aborted,
}

/// Byte counters and outcome shared between a conversion and its observers
#[derive(Debug, Default)]
pub struct Progress {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    outcome: AtomicU8,
    /// Cancelled by the input pump when the request body fails
    client_gone: CancellationToken,
}

impl Progress {
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    pub fn outcome(&self) -> Outcome {
        match self.outcome.load(Ordering::Acquire) {
            1 => Outcome::Succeeded,
            2 => Outcome::Failed,
            3 => Outcome::Aborted,
            _ => Outcome::Running,
        }
    }

    /// Settle the outcome. The first settled outcome sticks.
    fn set_outcome(&self, outcome: Outcome) {
        let v = match outcome {
            Outcome::Running => return,
            Outcome::Succeeded => 1,
            Outcome::Failed => 2,
            Outcome::Aborted => 3,
        };
        let _ = self
            .outcome
            .compare_exchange(0, v, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// How the input pump ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputOutcome {
    /// The whole body was written and stdin closed
    Complete(u64),
    /// The transcoder closed stdin before the body ended
    Truncated(u64),
}

/// Output of a started conversion, after waiting for its first chunk
pub enum ConversionOutput {
    /// The transcoder produced data; the conversion keeps running
    Streaming { first: Bytes, conversion: Conversion },
    /// The transcoder exited successfully without writing anything
    Empty,
}

/// One running transcoder process
pub struct Conversion {
    id: Uuid,
    format: AudioFormat,
    child: Child,
    stdout: ReaderStream<ChildStdout>,
    input: Option<JoinHandle<Result<InputOutcome>>>,
    stderr: Option<JoinHandle<Vec<String>>>,
    progress: Arc<Progress>,
    started: Instant,
    span: tracing::Span,
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversion")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("pid", &self.child.id())
            .finish()
    }
}

impl Conversion {
    /// Spawn the transcoder and start pumping `input` into it.
    ///
    /// At most `max_input` bytes are accepted from `input`; more than that
    /// fails the conversion with [`GatewayError::PayloadTooLarge`].
    pub fn start<S, E>(
        config: &TranscoderConfig,
        format: AudioFormat,
        input: S,
        max_input: u64,
    ) -> Result<Self>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("conversion", id = %id, format = %format);

        let mut child = build_command(config, format)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GatewayError::Spawn {
                program: config.program.clone(),
                source,
            })?;

        let (stdin, stdout, stderr) = match (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                return Err(GatewayError::Io(io::Error::other(
                    "transcoder pipes were not captured",
                )))
            }
        };

        span.in_scope(|| debug!(pid = ?child.id(), "Transcoder started"));

        let progress = Arc::new(Progress::default());

        let input = tokio::spawn(
            pump_input(input, stdin, max_input, progress.clone()).instrument(span.clone()),
        );
        let stderr = tokio::spawn(drain_stderr(stderr).instrument(span.clone()));

        Ok(Self {
            id,
            format,
            child,
            stdout: ReaderStream::with_capacity(stdout, config.read_chunk_size.max(1)),
            input: Some(input),
            stderr: Some(stderr),
            progress,
            started: Instant::now(),
            span,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    /// Read the next chunk of transcoder output. `None` means stdout hit EOF.
    ///
    /// Once the request body has failed, the transcoder is killed and this
    /// yields a `ConnectionAborted` error instead of further output.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        let client_gone = self.progress.client_gone.clone();
        let chunk = tokio::select! {
            biased;
            _ = client_gone.cancelled() => None,
            chunk = self.stdout.next() => Some(chunk),
        };
        let Some(chunk) = chunk else {
            return Some(Err(self.abort_for_disconnect()));
        };
        if let Some(Ok(bytes)) = &chunk {
            self.progress
                .bytes_out
                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        }
        chunk
    }

    fn abort_for_disconnect(&mut self) -> io::Error {
        self.progress.set_outcome(Outcome::Aborted);
        let _enter = self.span.enter();
        info!(
            bytes_in = self.progress.bytes_in(),
            bytes_out = self.progress.bytes_out(),
            "Client disconnected, killing transcoder"
        );
        if let Err(e) = self.child.start_kill() {
            debug!("Transcoder already gone: {}", e);
        }
        io::Error::new(io::ErrorKind::ConnectionAborted, "client disconnected")
    }

    /// Wait for the process to exit and collect the result of the input pump.
    ///
    /// Call this after stdout is exhausted. An input failure takes precedence
    /// over the exit status, since the output was produced from a partial body.
    pub async fn finish(&mut self) -> Result<()> {
        let result = self.wait().await;
        self.progress.set_outcome(match result {
            Ok(()) => Outcome::Succeeded,
            Err(GatewayError::BodyRead(_)) => Outcome::Aborted,
            Err(_) => Outcome::Failed,
        });

        let _enter = self.span.enter();
        match &result {
            Ok(()) => info!(
                bytes_in = self.progress.bytes_in(),
                bytes_out = self.progress.bytes_out(),
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Conversion finished"
            ),
            Err(e) if matches!(e, GatewayError::BodyRead(_)) => info!(
                bytes_in = self.progress.bytes_in(),
                bytes_out = self.progress.bytes_out(),
                "Conversion aborted: {}",
                e
            ),
            Err(e) => warn!(
                bytes_in = self.progress.bytes_in(),
                bytes_out = self.progress.bytes_out(),
                "Conversion failed: {}",
                e
            ),
        }
        result
    }

    async fn wait(&mut self) -> Result<()> {
        let status = self.child.wait().await?;

        // Once the process is gone nothing reads stdin any more. A pump still
        // waiting on the client would only delay the response.
        let input = match self.input.take() {
            Some(mut handle) => match tokio::time::timeout(EXIT_GRACE, &mut handle).await {
                Ok(joined) => flatten_join(joined),
                Err(_) => {
                    handle.abort();
                    Ok(InputOutcome::Truncated(self.progress.bytes_in()))
                }
            },
            None => Ok(InputOutcome::Complete(self.progress.bytes_in())),
        };

        // A grandchild of a launcher may keep stderr open after the exit.
        let stderr_tail = match self.stderr.take() {
            Some(mut handle) => match tokio::time::timeout(EXIT_GRACE, &mut handle).await {
                Ok(joined) => joined.unwrap_or_default(),
                Err(_) => {
                    handle.abort();
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        match input? {
            InputOutcome::Complete(n) => {
                self.span.in_scope(|| debug!(bytes = n, "Input fully written"))
            }
            InputOutcome::Truncated(n) => self
                .span
                .in_scope(|| debug!(bytes = n, "Transcoder stopped reading input early")),
        }

        check_status(status, stderr_tail)
    }

    /// Wait for the first output chunk.
    ///
    /// Failures that happen before any output can still be reported with a
    /// proper status code, since no response headers have been sent yet.
    pub async fn first_output(mut self) -> Result<ConversionOutput> {
        match self.next_chunk().await {
            Some(Ok(first)) => Ok(ConversionOutput::Streaming {
                first,
                conversion: self,
            }),
            Some(Err(e)) if e.kind() == io::ErrorKind::ConnectionAborted => {
                Err(GatewayError::BodyRead(e.to_string()))
            }
            Some(Err(e)) => {
                self.progress.set_outcome(Outcome::Failed);
                Err(e.into())
            }
            None => {
                self.finish().await?;
                Ok(ConversionOutput::Empty)
            }
        }
    }

    /// Turn the remaining output into a body stream, starting with `first`.
    ///
    /// The stream ends cleanly only if the conversion succeeded; otherwise its
    /// last item is an error so the HTTP layer aborts the response.
    pub fn into_stream(self, first: Option<Bytes>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        let head = futures_util::stream::iter(first.map(Ok));
        let rest = futures_util::stream::unfold(Some(self), |state| async move {
            let mut conversion = state?;
            match conversion.next_chunk().await {
                Some(Ok(chunk)) => Some((Ok(chunk), Some(conversion))),
                Some(Err(e)) => {
                    conversion.progress.set_outcome(Outcome::Failed);
                    Some((Err(e), None))
                }
                None => match conversion.finish().await {
                    Ok(()) => None,
                    Err(e) => Some((Err(io::Error::other(e.to_string())), None)),
                },
            }
        });
        head.chain(rest)
    }
}

impl Drop for Conversion {
    fn drop(&mut self) {
        if let Some(handle) = self.input.take() {
            handle.abort();
        }
        if let Some(handle) = self.stderr.take() {
            handle.abort();
        }
        if self.progress.outcome() == Outcome::Running {
            self.span
                .in_scope(|| info!("Conversion dropped before completion, killing transcoder"));
        }
    }
}

fn flatten_join(
    joined: std::result::Result<Result<InputOutcome>, tokio::task::JoinError>,
) -> Result<InputOutcome> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(GatewayError::Io(io::Error::other(e.to_string()))),
    }
}

fn check_status(status: ExitStatus, stderr_tail: Vec<String>) -> Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(GatewayError::TranscodeFailed {
            status: status.to_string(),
            stderr: stderr_tail.join("\n"),
        })
    }
}

/// Copy the request body into the transcoder's stdin, then close it.
async fn pump_input<S, E>(
    input: S,
    mut stdin: ChildStdin,
    max_bytes: u64,
    progress: Arc<Progress>,
) -> Result<InputOutcome>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: fmt::Display,
{
    futures_util::pin_mut!(input);

    let mut received: u64 = 0;
    while let Some(chunk) = input.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!("Request body failed after {} bytes: {}", received, e);
                progress.client_gone.cancel();
                return Err(GatewayError::BodyRead(e.to_string()));
            }
        };

        received += chunk.len() as u64;
        if received > max_bytes {
            return Err(GatewayError::PayloadTooLarge { limit: max_bytes });
        }

        match stdin.write_all(&chunk).await {
            Ok(()) => {
                progress
                    .bytes_in
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                return Ok(InputOutcome::Truncated(progress.bytes_in()));
            }
            Err(e) => return Err(e.into()),
        }
    }

    // EOF for the transcoder
    drop(stdin);
    Ok(InputOutcome::Complete(progress.bytes_in()))
}

/// Log transcoder stderr and keep the last few lines.
async fn drain_stderr(stderr: ChildStderr) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                warn!("transcoder: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading transcoder stderr: {}", e);
                break;
            }
        }
    }

    tail.into()
}
