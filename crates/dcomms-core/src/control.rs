//! Line-delimited JSON control channel
//!
//! A presentation layer drives a running node by writing one request object
//! per line and reading one response object per line back. Notifications
//! share the same output stream; they carry an `event` field, responses
//! carry `ok`.
//!
//! ```text
//! → {"id": 1, "op": "create", "name": "lunch"}
//! ← {"id": 1, "ok": true, "result": {"name": "lunch", "handle": 3, ...}}
//! → {"id": 2, "op": "send", "handle": 3, "text": "noon?"}
//! ← {"id": 2, "ok": false, "error": {"code": "not_your_turn", "message": "Not your turn"}}
//! ```
//!
//! `id` is optional and echoed back verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ChatError, ChatResult};
use crate::orchestrator::Orchestrator;
use crate::types::EngineHandle;

/// One request, tagged by `op`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Request {
    List,
    Open {
        name: String,
    },
    Create {
        name: String,
    },
    Join {
        name: String,
        user_key: String,
        secret_id: String,
    },
    /// Join from a pasted 64-character invite code
    JoinInvite {
        name: String,
        invite: String,
    },
    Delete {
        name: String,
    },
    Credentials {
        name: String,
    },
    Messages {
        handle: EngineHandle,
    },
    Info {
        handle: EngineHandle,
    },
    Send {
        handle: EngineHandle,
        text: String,
    },
    SyncNow,
    AddPeer {
        host: String,
        port: u16,
    },
    Peers,
    Status,
    /// Re-emit the `ready` notification
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
}

impl From<&ChatError> for ErrorPayload {
    fn from(err: &ChatError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl Response {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Option<Value>, err: &ChatError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(err.into()),
        }
    }
}

/// Split a request line into its optional `id` and the request itself.
pub fn decode_request(line: &str) -> Result<(Option<Value>, Request), (Option<Value>, ChatError)> {
    let mut value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return Err((None, ChatError::from(e))),
    };
    let id = match value.as_object_mut() {
        Some(obj) => obj.remove("id"),
        None => {
            return Err((
                None,
                ChatError::Validation("request must be a JSON object".into()),
            ))
        }
    };
    match serde_json::from_value(value) {
        Ok(request) => Ok((id, request)),
        Err(e) => Err((id, ChatError::Validation(format!("bad request: {}", e)))),
    }
}

/// Run one request against the orchestrator.
pub async fn dispatch(orch: &Orchestrator, request: Request) -> ChatResult<Value> {
    let result = match request {
        Request::List => serde_json::to_value(orch.list_known())?,
        Request::Open { name } => serde_json::to_value(orch.open(&name).await?)?,
        Request::Create { name } => serde_json::to_value(orch.create(&name).await?)?,
        Request::Join {
            name,
            user_key,
            secret_id,
        } => serde_json::to_value(orch.join(&name, &user_key, &secret_id).await?)?,
        Request::JoinInvite { name, invite } => {
            serde_json::to_value(orch.join_with_invite(&name, &invite).await?)?
        }
        Request::Delete { name } => {
            orch.delete(&name).await?;
            json!({ "name": name })
        }
        Request::Credentials { name } => json!({ "invite": orch.credentials(&name)?.to_string() }),
        Request::Messages { handle } => serde_json::to_value(orch.messages(handle).await)?,
        Request::Info { handle } => serde_json::to_value(orch.info(handle).await)?,
        Request::Send { handle, text } => {
            let state = orch.send(handle, &text).await?;
            json!({ "turnState": state })
        }
        Request::SyncNow => json!({ "added": orch.sync_now().await? }),
        Request::AddPeer { host, port } => {
            orch.add_peer(&host, port).await?;
            json!({ "host": host.trim(), "port": port })
        }
        Request::Peers => serde_json::to_value(orch.refresh_peers().await)?,
        Request::Status => Value::Object(orch.status().await),
        Request::Ready => {
            orch.announce_ready();
            Value::Null
        }
    };
    Ok(result)
}

/// Decode, dispatch and answer one input line. Blank lines get no answer.
pub async fn handle_line(orch: &Orchestrator, line: &str) -> Option<Response> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let response = match decode_request(line) {
        Ok((id, request)) => {
            debug!(?request, "Control request");
            match dispatch(orch, request).await {
                Ok(result) => Response::ok(id, result),
                Err(e) => Response::err(id, &e),
            }
        }
        Err((id, e)) => Response::err(id, &e),
    };
    Some(response)
}
