use async_trait::async_trait;
use chrono::Duration;
use log::{debug, info};
use marquee_core::{Grants, IngressInfo, MediaTransport, TransportError};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{sign, ParticipantClaims, ServerClaims};

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL of the transport's REST API.
    pub url: Url,
    pub api_key: String,
    pub api_secret: String,
    /// How long participant tokens stay valid.
    pub token_lifetime_in_seconds: i64,
}

/// A [MediaTransport] speaking to the transport's REST API.
pub struct HttpTransport {
    config: HttpTransportConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CreateIngressRequest<'a> {
    room_name: &'a str,
    input_url: &'a str,
    name: &'a str,
    video: bool,
    audio: bool,
}

#[derive(Debug, Deserialize)]
struct CreateIngressResponse {
    ingress_id: String,
    #[serde(default)]
    url: Option<String>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Builds the URL of an API endpoint, below the configured base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.config.url.clone();

        url.path_segments_mut()
            .map_err(|_| TransportError::Request(format!("{} cannot be a base", self.config.url)))?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    fn authorize(
        &self,
        request: RequestBuilder,
        room: Option<&str>,
    ) -> Result<RequestBuilder, TransportError> {
        let claims = ServerClaims::new(&self.config.api_key, room);
        let token = sign(&claims, &self.config.api_secret)?;

        Ok(request.bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(TransportError::Unauthorized);
        }

        let body = response.text().await.unwrap_or_default();

        Err(TransportError::Response {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MediaTransport for HttpTransport {
    async fn create_ingress(
        &self,
        room_name: &str,
        source_url: &str,
    ) -> Result<IngressInfo, TransportError> {
        let url = self.endpoint(&["ingress"])?;
        debug!("Creating ingress in {} from {}", room_name, source_url);

        let request = self.client.post(url).json(&CreateIngressRequest {
            room_name,
            input_url: source_url,
            name: "Movie Stream",
            video: true,
            audio: true,
        });

        let response = self.send(self.authorize(request, Some(room_name))?).await?;
        let created: CreateIngressResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Request(format!("Invalid ingress response: {}", e)))?;

        info!("Created ingress {} in {}", created.ingress_id, room_name);

        Ok(IngressInfo {
            ingress_id: created.ingress_id,
            url: created.url,
        })
    }

    async fn stop_ingress(&self, ingress_id: &str) -> Result<(), TransportError> {
        let url = self.endpoint(&["ingress", ingress_id])?;
        let request = self.authorize(self.client.delete(url), None)?;

        match self.send(request).await {
            Ok(_) => {
                info!("Stopped ingress {}", ingress_id);
                Ok(())
            }
            Err(TransportError::Response { status: 404, .. }) => {
                Err(TransportError::NotFound(ingress_id.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    fn issue_access_token(
        &self,
        identity: &str,
        room_name: &str,
        grants: Grants,
    ) -> Result<String, TransportError> {
        let claims = ParticipantClaims::new(
            &self.config.api_key,
            identity,
            room_name,
            grants,
            Duration::seconds(self.config.token_lifetime_in_seconds),
        );

        sign(&claims, &self.config.api_secret)
    }
}
