//! Local HTTP receiver standing in for a webhook endpoint

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Clone)]
struct ReceiverState {
    status: StatusCode,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

pub struct TestReceiver {
    pub url: String,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl TestReceiver {
    /// Start a receiver on 127.0.0.1:0 answering every POST with `status`
    pub async fn start(status: StatusCode) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let state = ReceiverState {
            status,
            received: received.clone(),
        };

        let app = Router::new()
            .route("/hook", post(receive))
            .route("/v1/*rest", post(receive))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            received,
        }
    }

    pub fn hook_url(&self) -> String {
        format!("{}/hook", self.url)
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }
}

async fn receive(
    State(state): State<ReceiverState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state
        .received
        .lock()
        .unwrap()
        .push(ReceivedRequest { headers, body });
    (state.status, Json(serde_json::json!({"messageIds": ["m-1"]})))
}
