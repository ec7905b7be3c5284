use anyhow::{Context, Result};
use reqwest::{Client, Response};
use std::error::Error as StdError;
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::time::Duration;
use tokio::time;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ChatError;
use crate::request::{CompletionRequest, chat_completions_url};

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChatError>> + Send + 'a>>;

/// Body of a successful (2xx) reply, read chunk by chunk.
pub trait ReplyBody: Send {
    /// Next raw chunk, or `None` once the body is exhausted.
    fn next_chunk(&mut self) -> TransportFuture<'_, Option<Vec<u8>>>;
}

/// Issues one chat-completion POST. Non-2xx replies surface as
/// [`ChatError::Transport`] before any body is handed out.
pub trait ChatTransport {
    fn post<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> TransportFuture<'a, Box<dyn ReplyBody + 'a>>;
}

/// HTTP transport with an idle timeout: connecting, waiting for the response
/// head, and waiting for each body chunk are each bounded by `timeout`. A
/// stream that keeps producing chunks may run longer than `timeout` overall.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout_secs: u64) -> reqwest::Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(&cfg.base_url, cfg.timeout_secs).context("Failed to initialize HTTP client")
    }

    pub fn with_client(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            api_url: chat_completions_url(base_url),
            timeout,
        }
    }

    fn timeout_error(&self) -> ChatError {
        ChatError::Timeout {
            url: self.api_url.clone(),
            after_secs: self.timeout.as_secs(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

impl ChatTransport for HttpTransport {
    fn post<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> TransportFuture<'a, Box<dyn ReplyBody + 'a>> {
        Box::pin(async move {
            debug!(
                api_url = %self.api_url,
                model = %request.model,
                message_count = request.messages.len(),
                stream = request.stream,
                "sending chat completion request"
            );

            let sent = time::timeout(
                self.timeout,
                self.client.post(&self.api_url).json(request).send(),
            )
            .await
            .map_err(|_| {
                warn!(
                    api_url = %self.api_url,
                    model = %request.model,
                    "chat completion request timed out"
                );
                self.timeout_error()
            })?;
            let response = sent.map_err(|err| {
                warn!(
                    api_url = %self.api_url,
                    model = %request.model,
                    error = %err,
                    "chat completion request failed"
                );
                classify_request_error(err, &self.api_url, self.timeout.as_secs())
            })?;

            let status = response.status();
            if !status.is_success() {
                let body = match time::timeout(self.timeout, response.text()).await {
                    Ok(Ok(text)) => text,
                    _ => "<failed to read response body>".to_string(),
                };
                warn!(
                    api_url = %self.api_url,
                    model = %request.model,
                    status = %status,
                    response_body_len = body.len(),
                    "model API returned non-success status"
                );
                return Err(ChatError::Transport {
                    status: status.as_u16(),
                    body,
                });
            }

            let body: Box<dyn ReplyBody + 'a> = Box::new(HttpReplyBody {
                response,
                transport: self,
            });
            Ok(body)
        })
    }
}

struct HttpReplyBody<'a> {
    response: Response,
    transport: &'a HttpTransport,
}

impl ReplyBody for HttpReplyBody<'_> {
    fn next_chunk(&mut self) -> TransportFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move {
            let transport = self.transport;
            match time::timeout(transport.timeout, self.response.chunk()).await {
                Ok(Ok(chunk)) => Ok(chunk.map(|bytes| bytes.to_vec())),
                Ok(Err(err)) => {
                    warn!(api_url = %transport.api_url, error = %err, "failed reading reply body");
                    Err(classify_request_error(
                        err,
                        &transport.api_url,
                        transport.timeout.as_secs(),
                    ))
                }
                Err(_) => {
                    warn!(api_url = %transport.api_url, "reply body stalled past timeout");
                    Err(transport.timeout_error())
                }
            }
        })
    }
}

fn error_chain_has(err: &(dyn StdError + 'static), kind: ErrorKind, needle: &str) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(source) = current {
        if let Some(io_err) = source.downcast_ref::<std::io::Error>()
            && io_err.kind() == kind
        {
            return true;
        }

        if source.to_string().to_ascii_lowercase().contains(needle) {
            return true;
        }

        current = source.source();
    }

    false
}

fn error_chain_has_timeout(err: &(dyn StdError + 'static)) -> bool {
    error_chain_has(err, ErrorKind::TimedOut, "timed out")
}

fn error_chain_has_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    error_chain_has(err, ErrorKind::ConnectionRefused, "connection refused")
}

pub(crate) fn classify_request_error(
    err: reqwest::Error,
    api_url: &str,
    timeout_secs: u64,
) -> ChatError {
    if err.is_timeout() || error_chain_has_timeout(&err) {
        return ChatError::Timeout {
            url: api_url.to_string(),
            after_secs: timeout_secs,
        };
    }

    if err.is_connect() {
        let detail = if error_chain_has_connection_refused(&err) {
            "connection refused".to_string()
        } else {
            err.to_string()
        };
        return ChatError::Connection {
            url: api_url.to_string(),
            detail,
        };
    }

    ChatError::unknown(err.to_string())
}
