// tests/harness/test_harness.rs
//
// Wires the in-memory collaborators into a MockManager and exposes both
// sides: the application's handles and the real stand-ins behind them.

use std::net::IpAddr;
use std::sync::Arc;

use e2e_mock_manager::limits::LimitsTable;
use e2e_mock_manager::network::{HttpRequest, HttpResponse, NetworkError};
use e2e_mock_manager::{MailMessage, MockConfig, MockManager, Result, ServiceHandles, Services};
use serde_json::Value;

use crate::harness::fake_services::*;

pub struct TestHarness {
    pub manager: MockManager,
    pub app: ServiceHandles,
    pub settings: Arc<RealSettings>,
    pub labs: Arc<RealLabs>,
    pub config: Arc<MemoryConfig>,
    pub limits_table: LimitsTable,
    pub mailer: Arc<RealMailer>,
    pub bus: Arc<RealEventBus>,
    pub transport: Arc<RecordingTransport>,
    pub dns: Arc<RealDns>,
    pub stripe: Arc<RealStripe>,
    pub stripe_mocker: Arc<StripeSimulator>,
    pub snapshots: Arc<SnapshotStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_limits(LimitsTable::new())
    }

    /// Harness whose limit service starts with `limits_table`.
    pub fn with_limits(limits_table: LimitsTable) -> Self {
        Self::build(limits_table, MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self::build(LimitsTable::new(), config)
    }

    fn build(limits_table: LimitsTable, mock_config: MockConfig) -> Self {
        e2e_mock_manager::init_logging();

        let settings = Arc::new(RealSettings::new());
        let labs = Arc::new(RealLabs::new());
        let config = Arc::new(MemoryConfig::new());
        let mailer = Arc::new(RealMailer::new());
        let bus = Arc::new(RealEventBus::new());
        let transport = Arc::new(RecordingTransport::new());
        let dns = Arc::new(RealDns::new());
        let stripe = Arc::new(RealStripe::new());
        let stripe_mocker = Arc::new(StripeSimulator::new());
        let snapshots = Arc::new(SnapshotStore::new());

        let services = Services {
            settings: settings.clone(),
            labs: labs.clone(),
            config: config.clone(),
            limits: Arc::new(RealLimits),
            limits_table: limits_table.clone(),
            mail: mailer.clone(),
            events: bus.clone(),
            mailgun: Arc::new(UnconfiguredMailgun),
            transport: transport.clone(),
            dns: dns.clone(),
            stripe: stripe.clone(),
            stripe_mocker: stripe_mocker.clone(),
            snapshots: snapshots.clone(),
        };
        let manager = MockManager::with_config(services, mock_config);
        let app = manager.services();

        Self {
            manager,
            app,
            settings,
            labs,
            config,
            limits_table,
            mailer,
            bus,
            transport,
            dns,
            stripe,
            stripe_mocker,
            snapshots,
        }
    }

    // ===== Application-side calls =====

    pub fn send_mail(&self, to: &str, subject: &str) -> Result<Value> {
        self.app.mail.send(&MailMessage::new(to, subject))
    }

    pub fn emit(&self, event: &str) {
        self.app.events.emit(event, &Value::Null);
    }

    pub fn setting(&self, key: &str) -> Option<Value> {
        self.app.settings.get(key)
    }

    pub fn labs_is_set(&self, flag: &str) -> bool {
        self.app.labs.is_set(flag)
    }

    pub fn get(&self, url: &str) -> std::result::Result<HttpResponse, NetworkError> {
        self.app.http.request(&HttpRequest::get(url)?)
    }

    pub fn post(&self, url: &str) -> std::result::Result<HttpResponse, NetworkError> {
        self.app.http.request(&HttpRequest::post(url)?)
    }

    pub fn developer_experiments(&self) -> Option<Value> {
        self.app.config.get("enableDeveloperExperiments")
    }

    // ===== Assertion helpers =====

    /// Connections the real transport actually received.
    pub fn real_connections(&self) -> Vec<String> {
        self.transport
            .sent
            .read()
            .unwrap()
            .iter()
            .map(|(host, _)| host.clone())
            .collect()
    }

    /// Address the real transport connected to for `host`.
    pub fn resolved_address(&self, host: &str) -> Option<IpAddr> {
        self.transport
            .sent
            .read()
            .unwrap()
            .iter()
            .find(|(sent, _)| sent == host)
            .map(|(_, resolved)| resolved.address)
    }

    pub fn assert_denied(&self, url: &str) {
        match self.get(url) {
            Err(NetworkError::NetConnectNotAllowed { .. }) => {}
            other => panic!("Expected {} to be refused, got {:?}", url, other),
        }
    }

    pub fn assert_permitted(&self, url: &str) {
        let before = self.real_connections().len();
        let response = self.get(url).unwrap_or_else(|e| panic!("Expected {} to be permitted: {}", url, e));
        assert_eq!(response.body_string(), "real");
        assert_eq!(self.real_connections().len(), before + 1);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
