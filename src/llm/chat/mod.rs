pub mod ollama;
pub mod relay;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{ Stream, StreamExt };
use log::debug;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use self::ollama::OllamaTransport;
use self::relay::RelayTransport;
use super::{ TransportConfig, TransportKind };
use crate::error::{ ChatError, TransportError };
use crate::models::chat::{ ChatRequest, ModelDescriptor };

/// Raw body fragments in the order the host flushed them. Not yet JSON.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends `request` and returns the response body as a lazy chunk stream.
    ///
    /// A non-success status fails here, before any chunk exists. Once `cancel` fires the
    /// stream stops yielding and the connection is dropped; it ends without an error so
    /// the caller can tell a stop from a failure by looking at the token.
    async fn open_chat_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken
    ) -> Result<ChunkStream, TransportError>;

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError>;

    fn describe(&self) -> String;
}

pub fn new_transport(config: &TransportConfig) -> Result<Arc<dyn ChatTransport>, ChatError> {
    let transport: Arc<dyn ChatTransport> = match config.kind {
        TransportKind::Direct => {
            validate_url(&config.base_url)?;
            Arc::new(OllamaTransport::from_config(config))
        }
        TransportKind::Relay => {
            let relay_url = config.relay_url
                .clone()
                .ok_or_else(|| ChatError::Config("relay transport requires a relay URL".into()))?;
            validate_url(&relay_url)?;
            Arc::new(RelayTransport::from_config(config, relay_url))
        }
    };
    Ok(transport)
}

fn validate_url(raw: &str) -> Result<(), ChatError> {
    url::Url
        ::parse(raw)
        .map(|_| ())
        .map_err(|e| ChatError::Config(format!("invalid URL '{}': {}", raw, e)))
}

/// Forwards `body` chunk by chunk until it ends, fails, the consumer goes away, or
/// `cancel` fires. Dropping `body` on exit releases the connection.
pub fn pump_body<S>(body: S, cancel: CancellationToken) -> ChunkStream
    where S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static
{
    // One slot: the host is only read as fast as the consumer takes chunks.
    let (tx, rx) = mpsc::channel(1);
    // The slot may already hold a chunk read before the token fired; it must not
    // reach the consumer either.
    let guard = cancel.clone();

    tokio::spawn(async move {
        let mut body = Box::pin(body);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Stream cancelled, releasing connection");
                    break;
                }
                _ = tx.closed() => {
                    debug!("Stream consumer gone, releasing connection");
                    break;
                }
                next = body.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(TransportError::Network(e))).await;
                    break;
                }
                None => {
                    break;
                }
            }
        }
    });

    Box::pin(ReceiverStream::new(rx).take_while(move |_| futures::future::ready(!guard.is_cancelled())))
}

/// Sends `request`, racing the response headers against `cancel`.
/// `Ok(None)` means the request was cancelled before the host answered.
pub async fn send_cancellable(
    request: reqwest::RequestBuilder,
    cancel: &CancellationToken
) -> Result<Option<reqwest::Response>, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(None),
        resp = request.send() => {
            let resp = resp?;
            let status = resp.status();
            if !status.is_success() {
                return Err(TransportError::Status { status: status.as_u16() });
            }
            Ok(Some(resp))
        }
    }
}

pub fn empty_stream() -> ChunkStream {
    Box::pin(futures::stream::empty::<Result<Bytes, TransportError>>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{ AtomicBool, Ordering };

    #[test]
    fn relay_without_url_is_a_config_error() {
        let config = TransportConfig {
            kind: TransportKind::Relay,
            ..TransportConfig::default()
        };
        assert!(matches!(new_transport(&config), Err(ChatError::Config(_))));
    }

    #[test]
    fn rejects_malformed_base_url() {
        let config = TransportConfig {
            base_url: "not a url".into(),
            ..TransportConfig::default()
        };
        assert!(matches!(new_transport(&config), Err(ChatError::Config(_))));
    }

    #[test]
    fn builds_both_variants() {
        let direct = new_transport(&TransportConfig::default()).unwrap();
        assert!(direct.describe().contains("localhost:11434"));

        let relay = new_transport(
            &(TransportConfig {
                kind: TransportKind::Relay,
                relay_url: Some("https://site.example/wp-admin/admin-ajax.php".into()),
                ..TransportConfig::default()
            })
        ).unwrap();
        assert!(relay.describe().contains("admin-ajax.php"));
    }

    #[tokio::test]
    async fn pump_stops_after_cancel() {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<Result<Bytes, reqwest::Error>>(4);
        let mut chunks = pump_body(ReceiverStream::new(rx), cancel.clone());

        tx.send(Ok(Bytes::from_static(b"one\n"))).await.unwrap();
        assert_eq!(chunks.next().await.unwrap().unwrap(), Bytes::from_static(b"one\n"));

        cancel.cancel();
        let _ = tx.send(Ok(Bytes::from_static(b"two\n"))).await;
        assert!(chunks.next().await.is_none());
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn dropping_the_consumer_releases_the_body() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(released.clone());
        let body = futures::stream
            ::iter(vec![Ok::<_, reqwest::Error>(Bytes::from_static(b"{\"done\":true}\n"))])
            .chain(futures::stream::pending())
            .map(move |item| {
                let _keep = &flag;
                item
            });

        let mut chunks = pump_body(body, CancellationToken::new());
        assert!(chunks.next().await.unwrap().is_ok());
        drop(chunks);

        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !released.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }).await.expect("body was not released");
    }
}
