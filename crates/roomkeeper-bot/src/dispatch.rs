//! JSON-lines event dispatch over stdio.
//!
//! The chat gateway (or an operator) writes one event per line to stdin and
//! reads one reply per line from stdout. Logs go to stderr.
//!
//! ```text
//! {"type":"create_room","invoker":1,"surface_id":2,"spec":{"name":"Squad","occupant_limit":4}}
//! {"type":"control","resource_id":1000,"action":"request_delete","invoker":1}
//! {"type":"set_channel","invoker":1,"surface_id":2}
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use roomkeeper_core::{RoomSpec, SurfaceId, UserId};
use roomkeeper_lifecycle::LifecycleError;
use roomkeeper_lifecycle::commands::Commands;
use roomkeeper_lifecycle::controls::{ControlEvent, DeletionControls};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

/// How often expired deletion confirmations are swept.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    CreateRoom {
        invoker: UserId,
        surface_id: SurfaceId,
        spec: RoomSpec,
    },
    Control(ControlEvent),
    SetChannel {
        invoker: UserId,
        surface_id: SurfaceId,
    },
    UnsetChannel {
        invoker: UserId,
        surface_id: SurfaceId,
    },
    ListChannels {
        invoker: UserId,
    },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    fn ok(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::error(format!("could not encode result: {e}")),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

impl From<Result<serde_json::Value, LifecycleError>> for Reply {
    fn from(result: Result<serde_json::Value, LifecycleError>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::error(e.to_string()),
        }
    }
}

pub struct Dispatcher {
    commands: Arc<Commands>,
    controls: Arc<DeletionControls>,
}

impl Dispatcher {
    pub fn new(commands: Arc<Commands>, controls: Arc<DeletionControls>) -> Self {
        Self { commands, controls }
    }

    pub async fn dispatch(&self, event: Event, now: DateTime<Utc>) -> Reply {
        let result = match event {
            Event::CreateRoom {
                invoker,
                surface_id,
                spec,
            } => self
                .commands
                .create_room(invoker, surface_id, spec)
                .await
                .map(|id| serde_json::json!({ "resource_id": id })),
            Event::Control(control) => self
                .controls
                .handle(control, now)
                .await
                .map(|outcome| serde_json::json!({ "outcome": outcome })),
            Event::SetChannel {
                invoker,
                surface_id,
            } => self
                .commands
                .set_channel(invoker, surface_id)
                .await
                .map(|added| serde_json::json!({ "changed": added })),
            Event::UnsetChannel {
                invoker,
                surface_id,
            } => self
                .commands
                .unset_channel(invoker, surface_id)
                .await
                .map(|removed| serde_json::json!({ "changed": removed })),
            Event::ListChannels { invoker } => self
                .commands
                .list_channels(invoker)
                .await
                .map(|surfaces| serde_json::json!({ "surfaces": surfaces })),
        };
        result.into()
    }

    pub async fn handle_line(&self, line: &str) -> Reply {
        match serde_json::from_str::<Event>(line) {
            Ok(event) => {
                tracing::debug!(?event, "Event received");
                self.dispatch(event, Utc::now()).await
            }
            Err(e) => {
                tracing::warn!("Malformed event: {e}");
                Reply::error(format!("malformed event: {e}"))
            }
        }
    }

    /// Serve events from `input` until it closes or `shutdown` fires.
    pub async fn serve<R, W>(
        &self,
        input: R,
        mut output: W,
        shutdown: CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(input).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = shutdown.cancelled() => break,
            };
            let Some(line) = line else {
                tracing::info!("Event stream closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = self.handle_line(&line).await;
            let mut encoded = serde_json::to_vec(&reply)?;
            encoded.push(b'\n');
            output.write_all(&encoded).await?;
            output.flush().await?;
        }
        Ok(())
    }
}

/// Periodically revert deletion confirmations nobody answered.
pub async fn sweep_expired_confirmations(
    controls: Arc<DeletionControls>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                controls.expire_due(Utc::now()).await;
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
