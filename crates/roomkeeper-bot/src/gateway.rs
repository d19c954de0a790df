use std::future::Future;
use std::pin::Pin;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use roomkeeper_core::provider::VoiceProvider;
use roomkeeper_core::surface::{ControlSurface, ControlView, Notice};
use roomkeeper_core::{
    MessageId, MessageRef, ProviderError, ResourceId, RoomSpec, RoomState, SurfaceError, SurfaceId,
    UserId,
};
use serde::Deserialize;

/// Client for a REST chat-gateway sidecar that owns the actual chat
/// connection. Serves as both the voice provider and the control surface.
///
/// Routes:
/// - `POST /rooms`, `GET /rooms/{id}`, `DELETE /rooms/{id}`
/// - `POST /surfaces/{id}/messages`, `PATCH /surfaces/{id}/messages/{message}`
/// - `POST /users/{id}/ephemeral`
/// - `GET /health`
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CreatedRoom {
    id: ResourceId,
}

#[derive(Deserialize)]
struct DescribedRoom {
    kind: String,
    #[serde(default)]
    occupants: u32,
}

#[derive(Deserialize)]
struct PostedMessage {
    message_id: MessageId,
}

impl HttpGateway {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}{path}", self.base_url));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Whether the gateway reports its chat connection as up.
    pub async fn is_ready(&self) -> bool {
        match self.request(Method::GET, "/health").send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Gateway health check failed: {e}");
                false
            }
        }
    }
}

async fn provider_error(resp: Response) -> ProviderError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    provider_error_for(status, body)
}

fn provider_error_for(status: StatusCode, body: String) -> ProviderError {
    match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound,
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => ProviderError::Forbidden(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ProviderError::Invalid(body),
        other => ProviderError::Unknown(format!("gateway returned {other}: {body}")),
    }
}

fn surface_error_for(status: StatusCode, body: String) -> SurfaceError {
    match status {
        StatusCode::NOT_FOUND => SurfaceError::MessageNotFound,
        other => SurfaceError::Unavailable(format!("gateway returned {other}: {body}")),
    }
}

fn transport(e: reqwest::Error) -> ProviderError {
    ProviderError::Unknown(format!("HTTP request failed: {e}"))
}

fn surface_transport(e: reqwest::Error) -> SurfaceError {
    SurfaceError::Unavailable(format!("HTTP request failed: {e}"))
}

fn room_state(room: DescribedRoom) -> RoomState {
    if room.kind == "voice" {
        RoomState::Voice {
            occupants: room.occupants,
        }
    } else {
        RoomState::WrongKind
    }
}

impl VoiceProvider for HttpGateway {
    fn create<'a>(
        &'a self,
        spec: &'a RoomSpec,
    ) -> Pin<Box<dyn Future<Output = Result<ResourceId, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .request(Method::POST, "/rooms")
                .json(spec)
                .send()
                .await
                .map_err(transport)?;
            if !resp.status().is_success() {
                return Err(provider_error(resp).await);
            }
            let created: CreatedRoom = resp
                .json()
                .await
                .map_err(|e| ProviderError::Unknown(format!("Failed to parse response: {e}")))?;
            Ok(created.id)
        })
    }

    fn delete<'a>(
        &'a self,
        id: ResourceId,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .request(Method::DELETE, &format!("/rooms/{id}"))
                .header("X-Audit-Log-Reason", reason)
                .send()
                .await
                .map_err(transport)?;
            if !resp.status().is_success() {
                return Err(provider_error(resp).await);
            }
            Ok(())
        })
    }

    fn describe<'a>(
        &'a self,
        id: ResourceId,
    ) -> Pin<Box<dyn Future<Output = Result<RoomState, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .request(Method::GET, &format!("/rooms/{id}"))
                .send()
                .await
                .map_err(transport)?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Ok(RoomState::Missing);
            }
            if !resp.status().is_success() {
                return Err(provider_error(resp).await);
            }
            let room: DescribedRoom = resp
                .json()
                .await
                .map_err(|e| ProviderError::Unknown(format!("Failed to parse response: {e}")))?;
            Ok(room_state(room))
        })
    }

    fn provider_name(&self) -> &str {
        "http-gateway"
    }
}

impl ControlSurface for HttpGateway {
    fn post<'a>(
        &'a self,
        surface_id: SurfaceId,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<MessageRef, SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::json!({ "notice": notice, "view": view });
            let resp = self
                .request(Method::POST, &format!("/surfaces/{surface_id}/messages"))
                .json(&body)
                .send()
                .await
                .map_err(surface_transport)?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(surface_error_for(status, body));
            }
            let posted: PostedMessage = resp
                .json()
                .await
                .map_err(|e| SurfaceError::Unavailable(format!("Failed to parse response: {e}")))?;
            Ok(MessageRef {
                surface_id,
                message_id: posted.message_id,
            })
        })
    }

    fn edit<'a>(
        &'a self,
        message: MessageRef,
        notice: &'a Notice,
        view: ControlView,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::json!({ "notice": notice, "view": view });
            let path = format!(
                "/surfaces/{}/messages/{}",
                message.surface_id, message.message_id
            );
            let resp = self
                .request(Method::PATCH, &path)
                .json(&body)
                .send()
                .await
                .map_err(surface_transport)?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(surface_error_for(status, body));
            }
            Ok(())
        })
    }

    fn notify_ephemeral<'a>(
        &'a self,
        user: UserId,
        notice: &'a Notice,
    ) -> Pin<Box<dyn Future<Output = Result<(), SurfaceError>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::json!({ "notice": notice });
            let resp = self
                .request(Method::POST, &format!("/users/{user}/ephemeral"))
                .json(&body)
                .send()
                .await
                .map_err(surface_transport)?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(surface_error_for(status, body));
            }
            Ok(())
        })
    }
}
