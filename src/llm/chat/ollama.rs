use async_trait::async_trait;
use log::{ debug, info };
use reqwest::Client as HttpClient;
use tokio_util::sync::CancellationToken;

use super::{ empty_stream, pump_body, send_cancellable, ChatTransport, ChunkStream };
use crate::error::TransportError;
use crate::llm::{ endpoint, TransportConfig };
use crate::models::chat::{ ChatRequest, ModelDescriptor, ModelList };

/// Talks to the model host, or to an edge relay that forwards body and response verbatim.
#[derive(Debug)]
pub struct OllamaTransport {
    http: HttpClient,
    chat_url: String,
    tags_url: String,
    auth_token: Option<String>,
}

impl OllamaTransport {
    pub fn new(base_url: &str, chat_route: &str, tags_route: &str) -> Self {
        Self {
            http: HttpClient::new(),
            chat_url: endpoint(base_url, chat_route),
            tags_url: endpoint(base_url, tags_route),
            auth_token: None,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        let mut transport = Self::new(&config.base_url, &config.chat_route, &config.tags_route);
        transport.auth_token = config.auth_token.clone().filter(|t| !t.is_empty());
        transport
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ChatTransport for OllamaTransport {
    async fn open_chat_stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken
    ) -> Result<ChunkStream, TransportError> {
        debug!(
            "POST {} model={} messages={}",
            self.chat_url,
            request.model,
            request.messages.len()
        );
        let req = self.authorize(self.http.post(&self.chat_url).json(request));
        match send_cancellable(req, &cancel).await? {
            Some(response) => Ok(pump_body(response.bytes_stream(), cancel)),
            None => {
                info!("Chat request cancelled before the host responded");
                Ok(empty_stream())
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, TransportError> {
        let resp = self.authorize(self.http.get(&self.tags_url)).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16() });
        }
        let list = resp.json::<ModelList>().await?;
        Ok(list.models)
    }

    fn describe(&self) -> String {
        format!("direct stream via {}", self.chat_url)
    }
}
