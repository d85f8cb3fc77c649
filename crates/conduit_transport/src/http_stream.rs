use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conduit_protocol::{ChatCompletionRequest, CompletionDelta, CompletionUsage, SseFrame, SseStreamParser};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::backoff::{http_retry_delay, is_retryable_http_error};
use crate::config::HttpStreamConfig;
use crate::error::{parse_error_message, TransportError};
use crate::headers::stream_headers;
use crate::url::completions_url;

/// Cancellation flag shared between a stream task and its owner.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Transport-agnostic stream vocabulary shared with the persistent socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Chunk(String),
    /// Terminal success, carrying the full accumulated response text.
    Complete {
        text: String,
        usage: Option<CompletionUsage>,
    },
    /// Terminal failure.
    Error(String),
}

impl SourceEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error(_))
    }
}

/// A [`SourceEvent`] tagged with the generation its request was started in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedSourceEvent {
    pub generation: u64,
    pub event: SourceEvent,
}

/// Handle to one in-flight streamed request.
#[derive(Debug)]
pub struct ActiveStream {
    generation: u64,
    cancel: CancellationSignal,
    task: JoinHandle<()>,
}

impl ActiveStream {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Aborts the request. No further events are delivered for it.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Streaming chat source backed by an OpenAI-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpStreamSource {
    http: Client,
    config: HttpStreamConfig,
    url: Url,
    headers: HeaderMap,
}

impl HttpStreamSource {
    pub fn new(config: HttpStreamConfig) -> Result<Self, TransportError> {
        let url = completions_url(&config.endpoint)?;
        let headers = build_header_map(config.bearer_token.as_deref())?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            config,
            url,
            headers,
        })
    }

    pub fn config(&self) -> &HttpStreamConfig {
        &self.config
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn build_request(&self, content: &str) -> ChatCompletionRequest {
        ChatCompletionRequest::new(
            self.config.model.clone(),
            self.config.system_prompt.as_deref(),
            content,
        )
    }

    /// Spawns a streamed request whose events are tagged with `generation`.
    ///
    /// Exactly one terminal event follows the chunks unless the stream is
    /// cancelled, in which case nothing further is sent.
    pub fn start(
        &self,
        content: String,
        generation: u64,
        events: mpsc::UnboundedSender<TaggedSourceEvent>,
    ) -> ActiveStream {
        let source = self.clone();
        let cancel: CancellationSignal = Arc::new(AtomicBool::new(false));
        let task_cancel = Arc::clone(&cancel);

        let task = tokio::spawn(async move {
            let request = source.build_request(&content);
            let sink = events.clone();
            let signal = Arc::clone(&task_cancel);
            let result = source
                .stream(&request, Some(&task_cancel), |event| {
                    if !signal.load(Ordering::Acquire) {
                        let _ = sink.send(TaggedSourceEvent { generation, event });
                    }
                })
                .await;

            match result {
                Ok(_) => {}
                Err(TransportError::Cancelled) => debug!(generation, "stream cancelled"),
                Err(error) => {
                    warn!(generation, %error, "stream failed");
                    if !task_cancel.load(Ordering::Acquire) {
                        let _ = events.send(TaggedSourceEvent {
                            generation,
                            event: SourceEvent::Error(error.to_string()),
                        });
                    }
                }
            }
        });

        ActiveStream {
            generation,
            cancel,
            task,
        }
    }

    /// Streams one request, delivering chunks and the terminal `Complete`
    /// through `on_event`. Returns the full response text.
    pub async fn stream<F>(
        &self,
        request: &ChatCompletionRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_event: F,
    ) -> Result<String, TransportError>
    where
        F: FnMut(SourceEvent),
    {
        let response = self.send_with_retry(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut text = String::new();
        let mut usage = None;
        let mut finished = false;

        while !finished {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            let chunk = chunk?;

            for frame in parser.feed(&chunk) {
                match frame {
                    SseFrame::Done => finished = true,
                    SseFrame::Data(payload) => {
                        let Some(delta) = CompletionDelta::parse(&payload) else {
                            debug!("skipping non-object stream payload");
                            continue;
                        };
                        if let Some(error) = delta.error {
                            return Err(TransportError::StreamFailed(error));
                        }
                        if let Some(content) = delta.content {
                            text.push_str(&content);
                            on_event(SourceEvent::Chunk(content));
                        }
                        if delta.usage.is_some() {
                            usage = delta.usage;
                        }
                    }
                }
            }
        }

        if is_cancelled(cancellation) {
            return Err(TransportError::Cancelled);
        }

        on_event(SourceEvent::Complete {
            text: text.clone(),
            usage,
        });
        Ok(text)
    }

    async fn send_with_retry(
        &self,
        request: &ChatCompletionRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, TransportError> {
        let mut last_status: Option<StatusCode> = None;
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if is_cancelled(cancellation) {
                return Err(TransportError::Cancelled);
            }

            let send = self
                .http
                .post(self.url.clone())
                .headers(self.headers.clone())
                .json(request)
                .send();

            match await_or_cancel(send, cancellation).await? {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    last_status = Some(status);
                    let body = await_or_cancel(response.text(), cancellation)
                        .await?
                        .unwrap_or_default();
                    let message = parse_error_message(status, &body);
                    last_error = Some(message.clone());

                    if attempt < self.config.max_retries
                        && is_retryable_http_error(status.as_u16(), &body)
                    {
                        self.pause_before_retry(attempt, cancellation).await?;
                        continue;
                    }
                    return Err(TransportError::Status { status, message });
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < self.config.max_retries {
                        self.pause_before_retry(attempt, cancellation).await?;
                        continue;
                    }
                }
            }
        }

        Err(TransportError::RetryExhausted {
            status: last_status,
            last_error,
        })
    }

    async fn pause_before_retry(
        &self,
        attempt: u32,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<(), TransportError> {
        let delay = http_retry_delay(self.config.retry_base_delay, attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying stream request");
        await_or_cancel(tokio::time::sleep(delay), cancellation).await
    }
}

fn build_header_map(bearer_token: Option<&str>) -> Result<HeaderMap, TransportError> {
    let mut out = HeaderMap::new();
    for (key, value) in stream_headers(bearer_token)? {
        out.insert(
            HeaderName::from_bytes(key.as_bytes()).map_err(|error| {
                TransportError::InvalidHeader {
                    name: key.clone(),
                    message: error.to_string(),
                }
            })?,
            HeaderValue::from_str(&value).map_err(|error| TransportError::InvalidHeader {
                name: key.clone(),
                message: error.to_string(),
            })?,
        );
    }
    Ok(out)
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, TransportError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(TransportError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(TransportError::Cancelled);
            }
            return Ok(output);
        }
    }
}
