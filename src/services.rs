// src/services.rs
//
// Trait abstraction for the side-effect surfaces the server depends on.
// Application code holds `Arc<dyn ...>` handles; tests swap what sits behind them.

use parking_lot::RwLock;
use serde_json::Value;
use std::io;
use std::sync::Arc;

use crate::error::Result;
use crate::limits::LimitsTable;
use crate::mail::MailMessage;
use crate::network::{DnsResolver, HttpClient, HttpTransport, LookupAddress, MxRecord};

/// Persisted settings lookup (the settings cache).
pub trait SettingsSource: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
}

/// Feature-flag ("labs") evaluation.
pub trait LabsSource: Send + Sync {
    fn is_set(&self, flag: &str) -> bool;
}

/// Process configuration with its own snapshot/restore.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    /// Puts every value changed through `set` back to its original.
    fn restore(&self) -> eyre::Result<()>;
}

/// Plan-limit enforcement.
pub trait LimitService: Send + Sync {
    fn is_limited(&self, limit: &str) -> bool;
    fn is_disabled(&self, limit: &str) -> bool;
    fn check_would_go_over_limit(&self, limit: &str) -> Result<bool>;
    fn error_if_would_go_over_limit(&self, limit: &str) -> Result<()>;
}

/// Outbound mail entry point. Returns the transport's response.
pub trait MailSender: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<Value>;
}

/// Internal event bus.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: &str, payload: &Value);
}

/// Mailgun provider client. `None` means the provider is not configured.
pub trait MailgunClient: Send + Sync {
    fn get_instance(&self) -> Option<Arc<dyn MailgunMessages>>;
}

pub trait MailgunMessages: Send + Sync {
    fn create(&self, domain: &str, message: &Value) -> Result<Value>;
}

/// The real Stripe integration.
pub trait StripeService: Send + Sync {
    fn disconnect(&self) -> eyre::Result<()>;
}

/// Stateful Stripe API simulator; owns its own state machine.
pub trait PaymentProviderMocker: Send + Sync {
    fn reset(&self);
    fn stub(&self);
}

/// Snapshot facility shared by the mail and webhook receivers.
pub trait SnapshotManager: Send + Sync {
    fn assert_snapshot(&self, name: &str, value: &Value) -> Result<()>;
}

/// Interception point for one capability.
///
/// Holds the real implementation and, while a test has mocked the surface,
/// the installed fake. Handles given to the application point at the seam
/// itself, so they stay valid across install and restore.
pub struct Seam<T: ?Sized> {
    name: &'static str,
    real: Arc<T>,
    fake: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Seam<T> {
    pub fn new(name: &'static str, real: Arc<T>) -> Self {
        Self {
            name,
            real,
            fake: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The fake when one is installed, the real implementation otherwise.
    pub fn current(&self) -> Arc<T> {
        match self.fake.read().as_ref() {
            Some(fake) => Arc::clone(fake),
            None => Arc::clone(&self.real),
        }
    }

    pub fn real(&self) -> Arc<T> {
        Arc::clone(&self.real)
    }

    pub fn is_intercepted(&self) -> bool {
        self.fake.read().is_some()
    }

    /// Installs `fake` unless the seam is already intercepted.
    /// Returns whether this call installed it.
    pub fn intercept(&self, fake: Arc<T>) -> bool {
        let mut slot = self.fake.write();
        if slot.is_some() {
            log::debug!("{} already intercepted, keeping existing fake", self.name);
            return false;
        }
        log::debug!("Intercepting {}", self.name);
        *slot = Some(fake);
        true
    }

    /// Drops the installed fake. Returns whether anything was installed.
    pub fn restore(&self) -> bool {
        let restored = self.fake.write().take().is_some();
        if restored {
            log::debug!("Restored {}", self.name);
        }
        restored
    }
}

impl SettingsSource for Seam<dyn SettingsSource> {
    fn get(&self, key: &str) -> Option<Value> {
        self.current().get(key)
    }
}

impl LabsSource for Seam<dyn LabsSource> {
    fn is_set(&self, flag: &str) -> bool {
        self.current().is_set(flag)
    }
}

impl LimitService for Seam<dyn LimitService> {
    fn is_limited(&self, limit: &str) -> bool {
        self.current().is_limited(limit)
    }

    fn is_disabled(&self, limit: &str) -> bool {
        self.current().is_disabled(limit)
    }

    fn check_would_go_over_limit(&self, limit: &str) -> Result<bool> {
        self.current().check_would_go_over_limit(limit)
    }

    fn error_if_would_go_over_limit(&self, limit: &str) -> Result<()> {
        self.current().error_if_would_go_over_limit(limit)
    }
}

impl MailSender for Seam<dyn MailSender> {
    fn send(&self, message: &MailMessage) -> Result<Value> {
        self.current().send(message)
    }
}

impl EventBus for Seam<dyn EventBus> {
    fn emit(&self, event: &str, payload: &Value) {
        self.current().emit(event, payload)
    }
}

impl MailgunClient for Seam<dyn MailgunClient> {
    fn get_instance(&self) -> Option<Arc<dyn MailgunMessages>> {
        self.current().get_instance()
    }
}

impl DnsResolver for Seam<dyn DnsResolver> {
    fn lookup(&self, host: &str) -> io::Result<LookupAddress> {
        self.current().lookup(host)
    }

    fn resolve_mx(&self, domain: &str) -> io::Result<Vec<MxRecord>> {
        self.current().resolve_mx(domain)
    }
}

/// The real collaborators a `MockManager` intercepts.
#[derive(Clone)]
pub struct Services {
    pub settings: Arc<dyn SettingsSource>,
    pub labs: Arc<dyn LabsSource>,
    pub config: Arc<dyn ConfigStore>,
    pub limits: Arc<dyn LimitService>,
    pub limits_table: LimitsTable,
    pub mail: Arc<dyn MailSender>,
    pub events: Arc<dyn EventBus>,
    pub mailgun: Arc<dyn MailgunClient>,
    pub transport: Arc<dyn HttpTransport>,
    pub dns: Arc<dyn DnsResolver>,
    pub stripe: Arc<dyn StripeService>,
    pub stripe_mocker: Arc<dyn PaymentProviderMocker>,
    pub snapshots: Arc<dyn SnapshotManager>,
}

/// What the application under test is wired with. Every handle routes through
/// the manager's seams and network gate.
#[derive(Clone)]
pub struct ServiceHandles {
    pub settings: Arc<dyn SettingsSource>,
    pub labs: Arc<dyn LabsSource>,
    pub config: Arc<dyn ConfigStore>,
    pub limits: Arc<dyn LimitService>,
    pub limits_table: LimitsTable,
    pub mail: Arc<dyn MailSender>,
    pub events: Arc<dyn EventBus>,
    pub mailgun: Arc<dyn MailgunClient>,
    pub http: Arc<dyn HttpClient>,
    pub dns: Arc<dyn DnsResolver>,
    pub stripe: Arc<dyn StripeService>,
}
