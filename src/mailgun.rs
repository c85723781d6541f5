// src/mailgun.rs
//
// Fake Mailgun client whose message creation is answered by a swappable stub.

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::services::{MailgunClient, MailgunMessages};

pub type CreateMessageFn = Arc<dyn Fn(&str, &Value) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CreateMessageCall {
    pub domain: String,
    pub message: Value,
}

/// Records every create-message call and answers it.
pub struct CreateMessageStub {
    behaviour: CreateMessageFn,
    calls: RwLock<Vec<CreateMessageCall>>,
}

impl CreateMessageStub {
    pub fn new(behaviour: CreateMessageFn) -> Self {
        Self {
            behaviour,
            calls: RwLock::new(Vec::new()),
        }
    }

    /// Always succeeds with a plausible Mailgun message id.
    pub fn resolving() -> Self {
        Self::new(Arc::new(|_domain: &str, _message: &Value| {
            Ok(json!({
                "id": format!("<{}.{}.5817@samples.mailgun.org>", Utc::now().timestamp_millis(), 0)
            }))
        }))
    }

    pub fn call(&self, domain: &str, message: &Value) -> Result<Value> {
        self.calls.write().push(CreateMessageCall {
            domain: domain.to_string(),
            message: message.clone(),
        });
        (self.behaviour)(domain, message)
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    pub fn calls(&self) -> Vec<CreateMessageCall> {
        self.calls.read().clone()
    }

    pub fn last_call(&self) -> Option<CreateMessageCall> {
        self.calls.read().last().cloned()
    }
}

/// Stands in for the provider client. `messages.create` always goes to
/// whichever stub is current when the call is made.
pub struct FakeMailgunClient {
    stub: Arc<RwLock<Arc<CreateMessageStub>>>,
}

impl FakeMailgunClient {
    pub fn new(stub: Arc<CreateMessageStub>) -> Self {
        Self {
            stub: Arc::new(RwLock::new(stub)),
        }
    }

    pub fn set_stub(&self, stub: Arc<CreateMessageStub>) {
        *self.stub.write() = stub;
    }

    pub fn stub(&self) -> Arc<CreateMessageStub> {
        Arc::clone(&self.stub.read())
    }
}

struct FakeMessages {
    stub: Arc<RwLock<Arc<CreateMessageStub>>>,
}

impl MailgunMessages for FakeMessages {
    fn create(&self, domain: &str, message: &Value) -> Result<Value> {
        let stub = Arc::clone(&self.stub.read());
        stub.call(domain, message)
    }
}

impl MailgunClient for FakeMailgunClient {
    fn get_instance(&self) -> Option<Arc<dyn MailgunMessages>> {
        Some(Arc::new(FakeMessages {
            stub: Arc::clone(&self.stub),
        }))
    }
}
