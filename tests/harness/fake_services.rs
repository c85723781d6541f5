// tests/harness/fake_services.rs
//
// In-memory stand-ins for the server's real collaborators.
// Each one counts how often it was reached so tests can prove a mock
// intercepted (or deliberately passed through) a call.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use e2e_mock_manager::mail::MailMessage;
use e2e_mock_manager::network::{DnsResolver, HttpRequest, HttpResponse, HttpTransport, LookupAddress, MxRecord, NetworkError};
use e2e_mock_manager::services::{
    ConfigStore, EventBus, LabsSource, LimitService, MailSender, MailgunClient, MailgunMessages,
    PaymentProviderMocker, SettingsSource, SnapshotManager, StripeService,
};
use e2e_mock_manager::{Error, Result};
use serde_json::{json, Value};

/// Settings cache with a few real values.
pub struct RealSettings {
    values: HashMap<String, Value>,
    pub reads: AtomicUsize,
}

impl RealSettings {
    pub fn new() -> Self {
        let mut values = HashMap::new();
        values.insert("title".to_string(), json!("Ghost Test Site"));
        values.insert("members_signup_access".to_string(), json!("all"));
        values.insert("mailgun_domain".to_string(), Value::Null);
        Self {
            values,
            reads: AtomicUsize::new(0),
        }
    }
}

impl SettingsSource for RealSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.values.get(key).cloned()
    }
}

/// Labs store where only `stableFlag` is on.
pub struct RealLabs {
    pub reads: AtomicUsize,
}

impl RealLabs {
    pub fn new() -> Self {
        Self {
            reads: AtomicUsize::new(0),
        }
    }
}

impl LabsSource for RealLabs {
    fn is_set(&self, flag: &str) -> bool {
        self.reads.fetch_add(1, Ordering::SeqCst);
        flag == "stableFlag"
    }
}

/// Config with snapshot/restore, optionally failing the restore.
pub struct MemoryConfig {
    values: RwLock<HashMap<String, Value>>,
    original: HashMap<String, Value>,
    fail_restore: AtomicBool,
    pub restores: AtomicUsize,
}

impl MemoryConfig {
    pub fn new() -> Self {
        let mut original = HashMap::new();
        original.insert("enableDeveloperExperiments".to_string(), json!(false));
        Self {
            values: RwLock::new(original.clone()),
            original,
            fail_restore: AtomicBool::new(false),
            restores: AtomicUsize::new(0),
        }
    }

    pub fn fail_restores(&self) {
        self.fail_restore.store(true, Ordering::SeqCst);
    }
}

impl ConfigStore for MemoryConfig {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.values.write().unwrap().insert(key.to_string(), value);
    }

    fn restore(&self) -> eyre::Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(eyre::eyre!("config restore rejected"));
        }
        *self.values.write().unwrap() = self.original.clone();
        Ok(())
    }
}

/// Limit service where nothing is limited except `customIntegrations`.
pub struct RealLimits;

impl LimitService for RealLimits {
    fn is_limited(&self, limit: &str) -> bool {
        limit == "customIntegrations"
    }

    fn is_disabled(&self, _limit: &str) -> bool {
        false
    }

    fn check_would_go_over_limit(&self, _limit: &str) -> Result<bool> {
        Ok(false)
    }

    fn error_if_would_go_over_limit(&self, _limit: &str) -> Result<()> {
        Ok(())
    }
}

/// The real mail transport; counts deliveries.
pub struct RealMailer {
    pub delivered: AtomicUsize,
}

impl RealMailer {
    pub fn new() -> Self {
        Self {
            delivered: AtomicUsize::new(0),
        }
    }
}

impl MailSender for RealMailer {
    fn send(&self, _message: &MailMessage) -> Result<Value> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(json!("250 OK"))
    }
}

/// The real bus; remembers what listeners heard.
pub struct RealEventBus {
    pub heard: RwLock<Vec<String>>,
}

impl RealEventBus {
    pub fn new() -> Self {
        Self {
            heard: RwLock::new(Vec::new()),
        }
    }
}

impl EventBus for RealEventBus {
    fn emit(&self, event: &str, _payload: &Value) {
        self.heard.write().unwrap().push(event.to_string());
    }
}

/// The real Mailgun client without credentials.
pub struct UnconfiguredMailgun;

impl MailgunClient for UnconfiguredMailgun {
    fn get_instance(&self) -> Option<Arc<dyn MailgunMessages>> {
        None
    }
}

/// The real connector. Never connects; records what would have gone out.
pub struct RecordingTransport {
    pub sent: RwLock<Vec<(String, LookupAddress)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
        }
    }
}

impl HttpTransport for RecordingTransport {
    fn send(&self, request: &HttpRequest, resolver: Arc<dyn DnsResolver>) -> std::result::Result<HttpResponse, NetworkError> {
        let host = request.host().trim_start_matches('[').trim_end_matches(']');
        let resolved = match host.parse::<IpAddr>() {
            Ok(address) => LookupAddress::new(address),
            Err(_) => resolver
                .lookup(host)
                .map_err(|e| NetworkError::Connection(e.to_string()))?,
        };
        self.sent.write().unwrap().push((request.host().to_string(), resolved));
        Ok(HttpResponse::new(200, "real"))
    }
}

/// The real resolver over a small hosts table; counts lookups that reached it.
pub struct RealDns {
    hosts: HashMap<&'static str, IpAddr>,
    pub lookups: AtomicUsize,
}

pub const STRIPE_API_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(54, 187, 174, 169));

impl RealDns {
    pub fn new() -> Self {
        let mut hosts = HashMap::new();
        hosts.insert("localhost", IpAddr::V4(Ipv4Addr::LOCALHOST));
        hosts.insert("api.stripe.com", STRIPE_API_ADDRESS);
        Self {
            hosts,
            lookups: AtomicUsize::new(0),
        }
    }
}

impl DnsResolver for RealDns {
    fn lookup(&self, host: &str) -> io::Result<LookupAddress> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.hosts
            .get(host)
            .map(|address| LookupAddress::new(*address))
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, format!("real lookup of {}", host)))
    }

    fn resolve_mx(&self, domain: &str) -> io::Result<Vec<MxRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::TimedOut, format!("real MX lookup of {}", domain)))
    }
}

pub struct RealStripe {
    pub disconnects: AtomicUsize,
}

impl RealStripe {
    pub fn new() -> Self {
        Self {
            disconnects: AtomicUsize::new(0),
        }
    }
}

impl StripeService for RealStripe {
    fn disconnect(&self) -> eyre::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct StripeSimulator {
    pub resets: AtomicUsize,
    pub stubs: AtomicUsize,
}

impl StripeSimulator {
    pub fn new() -> Self {
        Self {
            resets: AtomicUsize::new(0),
            stubs: AtomicUsize::new(0),
        }
    }
}

impl PaymentProviderMocker for StripeSimulator {
    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn stub(&self) {
        self.stubs.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stores the first value per snapshot name and compares later ones to it.
pub struct SnapshotStore {
    pub taken: RwLock<HashMap<String, Value>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            taken: RwLock::new(HashMap::new()),
        }
    }
}

impl SnapshotManager for SnapshotStore {
    fn assert_snapshot(&self, name: &str, value: &Value) -> Result<()> {
        let mut taken = self.taken.write().unwrap();
        match taken.get(name) {
            Some(existing) if existing != value => Err(Error::Snapshot(format!(
                "{}: expected {}, got {}",
                name, existing, value
            ))),
            Some(_) => Ok(()),
            None => {
                taken.insert(name.to_string(), value.clone());
                Ok(())
            }
        }
    }
}
