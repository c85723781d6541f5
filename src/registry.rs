// src/registry.rs
//
// Which subsystem mocks are active between two restores.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::events::EventSpy;
use crate::limits::LimitStub;
use crate::mail::{EmailMockReceiver, MailSpy};
use crate::mailgun::FakeMailgunClient;
use crate::webhook::WebhookMockReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subsystem {
    Mail,
    Labs,
    Settings,
    LimitService,
    Events,
    WebhookMockReceiver,
    Mailgun,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Mail => "mail",
            Subsystem::Labs => "labs",
            Subsystem::Settings => "settings",
            Subsystem::LimitService => "limitService",
            Subsystem::Events => "events",
            Subsystem::WebhookMockReceiver => "webhookMockReceiver",
            Subsystem::Mailgun => "mailgun",
        };
        f.write_str(name)
    }
}

/// Handle kept for an active mock.
#[derive(Clone)]
pub enum ActiveMock {
    Mail {
        spy: Arc<MailSpy>,
        receiver: Arc<EmailMockReceiver>,
    },
    Labs,
    Settings,
    LimitService(Arc<LimitStub>),
    Events(Arc<EventSpy>),
    WebhookMockReceiver(Arc<WebhookMockReceiver>),
    Mailgun(Arc<FakeMailgunClient>),
}

impl ActiveMock {
    pub fn subsystem(&self) -> Subsystem {
        match self {
            ActiveMock::Mail { .. } => Subsystem::Mail,
            ActiveMock::Labs => Subsystem::Labs,
            ActiveMock::Settings => Subsystem::Settings,
            ActiveMock::LimitService(_) => Subsystem::LimitService,
            ActiveMock::Events(_) => Subsystem::Events,
            ActiveMock::WebhookMockReceiver(_) => Subsystem::WebhookMockReceiver,
            ActiveMock::Mailgun(_) => Subsystem::Mailgun,
        }
    }
}

impl fmt::Debug for ActiveMock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActiveMock({})", self.subsystem())
    }
}

#[derive(Debug, Default)]
pub struct MockRegistry {
    active: BTreeMap<Subsystem, ActiveMock>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, subsystem: Subsystem) -> bool {
        self.active.contains_key(&subsystem)
    }

    pub fn get(&self, subsystem: Subsystem) -> Option<&ActiveMock> {
        self.active.get(&subsystem)
    }

    /// Registers `mock` unless its subsystem is already active.
    /// Returns whether it was registered.
    pub fn insert(&mut self, mock: ActiveMock) -> bool {
        let subsystem = mock.subsystem();
        if self.active.contains_key(&subsystem) {
            return false;
        }
        self.active.insert(subsystem, mock);
        true
    }

    pub fn remove(&mut self, subsystem: Subsystem) -> Option<ActiveMock> {
        self.active.remove(&subsystem)
    }

    /// Active subsystems in a stable order.
    pub fn active(&self) -> Vec<Subsystem> {
        self.active.keys().copied().collect()
    }

    pub fn drain(&mut self) -> Vec<ActiveMock> {
        std::mem::take(&mut self.active).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsystem_names() {
        assert_eq!(Subsystem::LimitService.to_string(), "limitService");
        assert_eq!(Subsystem::WebhookMockReceiver.to_string(), "webhookMockReceiver");
    }

    #[test]
    fn test_insert_refuses_second_activation() {
        let mut registry = MockRegistry::new();
        assert!(registry.insert(ActiveMock::Settings));
        assert!(!registry.insert(ActiveMock::Settings));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = MockRegistry::new();
        registry.insert(ActiveMock::Labs);
        registry.insert(ActiveMock::Settings);
        assert_eq!(registry.active(), vec![Subsystem::Labs, Subsystem::Settings]);

        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
        assert!(registry.drain().is_empty());
    }
}
