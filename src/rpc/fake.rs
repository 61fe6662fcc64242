//! In-process Transmission stand-in for tests.

use super::SESSION_ID_HEADER;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub enum FakeReply {
    Json(serde_json::Value),
    Conflict(String),
    Status(u16),
    /// Holds the request open for the given time before answering.
    Delayed(Duration, Box<FakeReply>),
}

impl FakeReply {
    pub fn success(arguments: serde_json::Value) -> Self {
        Self::Json(serde_json::json!({"result": "success", "arguments": arguments}))
    }

    pub fn conflict(token: &str) -> Self {
        Self::Conflict(token.to_string())
    }

    pub fn status(code: u16) -> Self {
        Self::Status(code)
    }

    /// Answers 504 once `delay` has passed; long enough delays look like a hang.
    pub fn stall(delay: Duration) -> Self {
        Self::delayed(delay, Self::Status(504))
    }

    pub fn delayed(delay: Duration, reply: FakeReply) -> Self {
        Self::Delayed(delay, Box::new(reply))
    }
}

impl IntoResponse for FakeReply {
    fn into_response(self) -> Response {
        match self {
            Self::Json(value) => Json(value).into_response(),
            Self::Conflict(token) => {
                (StatusCode::CONFLICT, [(SESSION_ID_HEADER, token)], "").into_response()
            }
            Self::Status(code) => StatusCode::from_u16(code)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response(),
            Self::Delayed(_, reply) => reply.into_response(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub token: Option<String>,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

type Script = dyn Fn(usize, Option<String>) -> FakeReply + Send + Sync;

#[derive(Clone)]
struct FakeState {
    script: Arc<Script>,
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

pub struct FakeDaemon {
    addr: SocketAddr,
    state: FakeState,
}

impl FakeDaemon {
    /// `script` receives the zero-based request index and the session id sent.
    pub async fn spawn<F>(script: F) -> Self
    where
        F: Fn(usize, Option<String>) -> FakeReply + Send + Sync + 'static,
    {
        let state = FakeState {
            script: Arc::new(script),
            hits: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/transmission/rpc", post(rpc_handler))
            .route("/transmission/web/", get(|| async { "<html></html>" }))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake daemon");
        let addr = listener.local_addr().expect("fake daemon addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}/transmission/rpc", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn tokenless_hits(&self) -> usize {
        self.requests().iter().filter(|r| r.token.is_none()).count()
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.seen.lock().expect("seen lock").clone()
    }

    pub fn last_request(&self) -> Option<SeenRequest> {
        self.requests().pop()
    }
}

async fn rpc_handler(
    State(state): State<FakeState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let token = headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    state.seen.lock().expect("seen lock").push(SeenRequest {
        token: token.clone(),
        authorization,
        body,
    });
    let hit = state.hits.fetch_add(1, Ordering::SeqCst);
    let mut reply = (state.script)(hit, token);
    while let FakeReply::Delayed(delay, inner) = reply {
        tokio::time::sleep(delay).await;
        reply = *inner;
    }
    reply.into_response()
}
