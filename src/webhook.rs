// src/webhook.rs
//
// Recording receiver for outbound webhook calls.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use crate::error::{Error, Result};
use crate::network::{HostMatch, HttpInterceptor, HttpRequest, HttpResponse, NetworkError, NetworkGate};
use crate::services::SnapshotManager;

const OWNER: &str = "webhookMockReceiver";

pub struct WebhookMockReceiver {
    gate: Arc<NetworkGate>,
    snapshots: Arc<dyn SnapshotManager>,
    received: Arc<RwLock<Vec<HttpRequest>>>,
}

impl WebhookMockReceiver {
    pub fn new(gate: Arc<NetworkGate>, snapshots: Arc<dyn SnapshotManager>) -> Self {
        Self {
            gate,
            snapshots,
            received: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Answers `POST url` with `200` and records each request.
    pub fn mock(&self, url: &str) -> Result<()> {
        let target = Url::parse(url).map_err(|e| NetworkError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let host = target.host_str().unwrap_or_default().to_string();

        let received = Arc::clone(&self.received);
        let interceptor = HttpInterceptor::new(HostMatch::Exact(host))
            .post(target.path())
            .persist()
            .owned_by(OWNER)
            .reply_with(move |request| {
                received.write().push(request.clone());
                HttpResponse::new(200, Vec::new())
            });

        log::debug!("Mocking webhook endpoint {}", url);
        self.gate.intercept(interceptor);
        Ok(())
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.received.read().clone()
    }

    /// The most recent webhook request.
    pub fn received_request(&self) -> Result<HttpRequest> {
        self.received
            .read()
            .last()
            .cloned()
            .ok_or_else(|| Error::usage("No webhook request received; call mock() and trigger the webhook first"))
    }

    pub fn match_body_snapshot(&self) -> Result<()> {
        let request = self.received_request()?;
        let body = request
            .body_json()
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&request.body).into_owned()));
        self.snapshots.assert_snapshot("webhook-body", &body)
    }

    pub fn match_header_snapshot(&self) -> Result<()> {
        let request = self.received_request()?;
        let headers: serde_json::Map<String, Value> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        self.snapshots
            .assert_snapshot("webhook-headers", &Value::Object(headers))
    }

    /// Forgets recorded requests and withdraws this receiver's endpoints.
    pub fn reset(&self) {
        self.received.write().clear();
        self.gate.remove_interceptors(OWNER);
    }
}
