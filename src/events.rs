// src/events.rs
//
// Spy over the internal event bus. Emissions are recorded, then delivered to
// the real bus as usual.

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::services::EventBus;

#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub name: String,
    pub payload: Value,
}

pub struct EventSpy {
    real: Arc<dyn EventBus>,
    emitted: RwLock<Vec<EmittedEvent>>,
}

impl EventSpy {
    pub fn new(real: Arc<dyn EventBus>) -> Self {
        Self {
            real,
            emitted: RwLock::new(Vec::new()),
        }
    }

    pub fn emitted(&self) -> Vec<EmittedEvent> {
        self.emitted.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.emitted.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn was_emitted(&self, name: &str) -> bool {
        self.emitted.read().iter().any(|e| e.name == name)
    }

    /// Passes if `name` was emitted at any point.
    pub fn assert_emitted(&self, name: &str) -> Result<()> {
        if self.was_emitted(name) {
            return Ok(());
        }
        Err(Error::assertion(format!(
            "expected emit to be called with arguments \"{}\"; emitted: {:?}",
            name,
            self.names()
        )))
    }
}

impl EventBus for EventSpy {
    fn emit(&self, event: &str, payload: &Value) {
        self.emitted.write().push(EmittedEvent {
            name: event.to_string(),
            payload: payload.clone(),
        });
        self.real.emit(event, payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Listener {
        heard: Mutex<Vec<String>>,
    }

    impl EventBus for Listener {
        fn emit(&self, event: &str, _payload: &Value) {
            self.heard.lock().push(event.to_string());
        }
    }

    #[test]
    fn test_spy_records_and_still_delivers() {
        let listener = Arc::new(Listener::default());
        let spy = EventSpy::new(listener.clone());

        spy.emit("member.added", &json!({"id": 1}));
        spy.emit("post.published", &json!({}));

        assert_eq!(spy.names(), vec!["member.added", "post.published"]);
        assert_eq!(*listener.heard.lock(), vec!["member.added", "post.published"]);
        assert_eq!(spy.emitted()[0].payload, json!({"id": 1}));
    }

    #[test]
    fn test_assert_emitted_is_order_independent() {
        let spy = EventSpy::new(Arc::new(Listener::default()));
        spy.emit("a", &Value::Null);
        spy.emit("b", &Value::Null);

        assert!(spy.assert_emitted("b").is_ok());
        assert!(spy.assert_emitted("a").is_ok());

        let err = spy.assert_emitted("c").unwrap_err();
        assert!(err.is_assertion());
        assert!(err.to_string().contains("\"c\""));
    }
}
