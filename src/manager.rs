// src/manager.rs
//
// The per-test mock context: every mock activation, the assertion helpers,
// and the single teardown that puts all of it back.

use log::{debug, error, info};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cfg::config::MockConfig;
use crate::error::{Error, Result};
use crate::events::EventSpy;
use crate::limits::{LimitOptions, LimitOverride, LimitStub};
use crate::mail::{match_email, EmailMatchers, EmailMockReceiver, MailMessage, MailReply, MailSpy};
use crate::mailgun::{CreateMessageStub, FakeMailgunClient};
use crate::network::{geojs_interceptor, slack_interceptor, NetworkGate};
use crate::overlay::{LabsOverride, OverlayStore, SettingsOverride};
use crate::registry::{ActiveMock, MockRegistry, Subsystem};
use crate::services::{
    EventBus, LabsSource, LimitService, MailSender, MailgunClient, PaymentProviderMocker, Seam, ServiceHandles,
    Services, SettingsSource,
};
use crate::webhook::WebhookMockReceiver;

const DEVELOPER_EXPERIMENTS: &str = "enableDeveloperExperiments";

pub struct MockManager {
    config: MockConfig,
    real: Services,
    registry: Mutex<MockRegistry>,
    network: Arc<NetworkGate>,
    settings: Arc<Seam<dyn SettingsSource>>,
    fake_settings: Arc<OverlayStore<String, Value>>,
    labs: Arc<Seam<dyn LabsSource>>,
    fake_labs: Arc<OverlayStore<String, bool>>,
    limit_service: Arc<Seam<dyn LimitService>>,
    limits: LimitOverride,
    mail: Arc<Seam<dyn MailSender>>,
    events: Arc<Seam<dyn EventBus>>,
    mailgun: Arc<Seam<dyn MailgunClient>>,
    email_count: AtomicUsize,
}

impl MockManager {
    /// Builds the context over the real collaborators and arms the
    /// deny-by-default network policy.
    pub fn create(services: Services) -> Self {
        Self::with_config(services, MockConfig::default())
    }

    pub fn with_config(services: Services, config: MockConfig) -> Self {
        let network = Arc::new(NetworkGate::new(
            Arc::clone(&services.transport),
            Arc::clone(&services.dns),
            &config,
        ));
        let limit_service: Arc<Seam<dyn LimitService>> =
            Arc::new(Seam::new("limitService", Arc::clone(&services.limits)));
        let limits = LimitOverride::new(Arc::clone(&limit_service), services.limits_table.clone());

        let manager = Self {
            registry: Mutex::new(MockRegistry::new()),
            network,
            settings: Arc::new(Seam::new("settings", Arc::clone(&services.settings))),
            fake_settings: Arc::new(OverlayStore::new()),
            labs: Arc::new(Seam::new("labs", Arc::clone(&services.labs))),
            fake_labs: Arc::new(OverlayStore::new()),
            limit_service,
            limits,
            mail: Arc::new(Seam::new("mail", Arc::clone(&services.mail))),
            events: Arc::new(Seam::new("events", Arc::clone(&services.events))),
            mailgun: Arc::new(Seam::new("mailgun", Arc::clone(&services.mailgun))),
            email_count: AtomicUsize::new(0),
            real: services,
            config,
        };
        manager.disable_network();
        manager
    }

    /// Final teardown.
    pub fn dispose(self) {
        drop(self);
    }

    /// Handles to wire into the application. They stay valid across restores.
    pub fn services(&self) -> ServiceHandles {
        ServiceHandles {
            settings: self.settings.clone(),
            labs: self.labs.clone(),
            config: Arc::clone(&self.real.config),
            limits: self.limit_service.clone(),
            limits_table: self.real.limits_table.clone(),
            mail: self.mail.clone(),
            events: self.events.clone(),
            mailgun: self.mailgun.clone(),
            http: self.network.clone(),
            dns: self.network.resolver(),
            stripe: Arc::clone(&self.real.stripe),
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub fn network(&self) -> &Arc<NetworkGate> {
        &self.network
    }

    pub fn stripe_mocker(&self) -> Arc<dyn PaymentProviderMocker> {
        Arc::clone(&self.real.stripe_mocker)
    }

    pub fn active_mocks(&self) -> Vec<Subsystem> {
        self.registry.lock().active()
    }

    pub fn faked_settings(&self) -> Vec<String> {
        self.fake_settings.keys()
    }

    pub fn faked_labs_flags(&self) -> Vec<String> {
        self.fake_labs.keys()
    }

    /// Index of the next email `sent_email` will inspect.
    pub fn email_cursor(&self) -> usize {
        self.email_count.load(Ordering::SeqCst)
    }

    // ===== Network =====

    pub fn disable_network(&self) {
        self.network.disable_network();
    }

    pub fn allow_stripe(&self) {
        self.disable_network();
        self.network.allow(self.config.stripe_host.clone());
    }

    pub fn mock_slack(&self) {
        self.disable_network();
        self.network.intercept(slack_interceptor());
    }

    pub fn mock_geojs(&self) {
        self.disable_network();
        self.network.intercept(geojs_interceptor());
    }

    // ===== Stripe =====

    /// Disconnects the real integration. Only valid once the application's
    /// models are loaded.
    pub fn disable_stripe(&self) -> eyre::Result<()> {
        debug!("Disconnecting Stripe");
        self.real.stripe.disconnect()
    }

    pub fn mock_stripe(&self) {
        self.disable_network();
        self.real.stripe_mocker.reset();
        self.real.stripe_mocker.stub();
    }

    // ===== Mail =====

    pub fn mock_mail(&self) -> Arc<EmailMockReceiver> {
        self.mock_mail_with(MailReply::Respond(self.config.default_mail_response.clone()))
    }

    /// Routes mail to a recording receiver. A second call keeps the existing
    /// receiver and spy and only changes the reply.
    pub fn mock_mail_with(&self, reply: MailReply) -> Arc<EmailMockReceiver> {
        let mut registry = self.registry.lock();
        if let Some(ActiveMock::Mail { receiver, .. }) = registry.get(Subsystem::Mail) {
            receiver.set_reply(reply);
            return Arc::clone(receiver);
        }

        let receiver = Arc::new(EmailMockReceiver::new(Arc::clone(&self.real.snapshots), reply));
        let spy = Arc::new(MailSpy::new(receiver.clone()));
        self.mail.intercept(spy.clone());
        registry.insert(ActiveMock::Mail {
            spy,
            receiver: Arc::clone(&receiver),
        });
        receiver
    }

    /// Seeds the provider settings and fakes message creation with a stub
    /// that always succeeds.
    pub fn mock_mailgun(&self) -> Arc<CreateMessageStub> {
        self.install_mailgun(Arc::new(CreateMessageStub::resolving()))
    }

    pub fn mock_mailgun_with<F>(&self, send: F) -> Arc<CreateMessageStub>
    where
        F: Fn(&str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.install_mailgun(Arc::new(CreateMessageStub::new(Arc::new(send))))
    }

    pub fn get_mailgun_create_message_stub(&self) -> Option<Arc<CreateMessageStub>> {
        match self.registry.lock().get(Subsystem::Mailgun) {
            Some(ActiveMock::Mailgun(client)) => Some(client.stub()),
            _ => None,
        }
    }

    fn install_mailgun(&self, stub: Arc<CreateMessageStub>) -> Arc<CreateMessageStub> {
        let seed = self.config.mailgun.clone();
        self.mock_setting("mailgun_api_key", seed.api_key);
        self.mock_setting("mailgun_domain", seed.domain);
        self.mock_setting("mailgun_base_url", seed.base_url);

        let mut registry = self.registry.lock();
        if let Some(ActiveMock::Mailgun(client)) = registry.get(Subsystem::Mailgun) {
            client.set_stub(Arc::clone(&stub));
            return stub;
        }

        let client = Arc::new(FakeMailgunClient::new(Arc::clone(&stub)));
        self.mailgun.intercept(client.clone());
        registry.insert(ActiveMock::Mailgun(client));
        stub
    }

    // ===== Events =====

    pub fn mock_events(&self) -> Arc<EventSpy> {
        let mut registry = self.registry.lock();
        if let Some(ActiveMock::Events(spy)) = registry.get(Subsystem::Events) {
            return Arc::clone(spy);
        }

        let spy = Arc::new(EventSpy::new(self.events.real()));
        self.events.intercept(spy.clone());
        registry.insert(ActiveMock::Events(Arc::clone(&spy)));
        spy
    }

    // ===== Settings & labs =====

    pub fn mock_setting(&self, key: &str, value: impl Into<Value>) {
        {
            let mut registry = self.registry.lock();
            if !registry.is_active(Subsystem::Settings) {
                self.settings.intercept(Arc::new(SettingsOverride::new(
                    Arc::clone(&self.fake_settings),
                    self.settings.real(),
                )));
                registry.insert(ActiveMock::Settings);
            }
        }
        let value = value.into();
        debug!("Faking setting {} = {}", key, value);
        self.fake_settings.set(key.to_string(), value);
    }

    /// `alpha = false` also switches on developer experiments, which
    /// non-alpha flags need in order to be observable.
    pub fn mock_labs_enabled(&self, flag: &str, alpha: bool) {
        self.mock_labs(flag, true, alpha);
    }

    pub fn mock_labs_disabled(&self, flag: &str, alpha: bool) {
        self.mock_labs(flag, false, alpha);
    }

    fn mock_labs(&self, flag: &str, enabled: bool, alpha: bool) {
        if !alpha {
            self.real.config.set(DEVELOPER_EXPERIMENTS, Value::Bool(true));
        }
        {
            let mut registry = self.registry.lock();
            if !registry.is_active(Subsystem::Labs) {
                self.labs.intercept(Arc::new(LabsOverride::new(
                    Arc::clone(&self.fake_labs),
                    self.labs.real(),
                )));
                registry.insert(ActiveMock::Labs);
            }
        }
        debug!("Faking labs flag {} = {}", flag, enabled);
        self.fake_labs.set(flag.to_string(), enabled);
    }

    // ===== Limits =====

    pub fn mock_limit_service(&self, limit: &str, options: LimitOptions) -> Arc<LimitStub> {
        let stub = self.limits.mock(limit, options);
        self.registry.lock().insert(ActiveMock::LimitService(Arc::clone(&stub)));
        stub
    }

    /// Undoes limit mocks only. No-op when nothing is mocked.
    pub fn restore_limit_service(&self) {
        self.limits.restore();
        self.registry.lock().remove(Subsystem::LimitService);
    }

    // ===== Webhooks =====

    pub fn mock_webhook_requests(&self) -> Arc<WebhookMockReceiver> {
        let mut registry = self.registry.lock();
        if let Some(ActiveMock::WebhookMockReceiver(receiver)) = registry.get(Subsystem::WebhookMockReceiver) {
            return Arc::clone(receiver);
        }

        let receiver = Arc::new(WebhookMockReceiver::new(
            Arc::clone(&self.network),
            Arc::clone(&self.real.snapshots),
        ));
        registry.insert(ActiveMock::WebhookMockReceiver(Arc::clone(&receiver)));
        receiver
    }

    // ===== Assertions =====

    pub fn assert(&self) -> Assertions<'_> {
        Assertions { manager: self }
    }

    // ===== Teardown =====

    /// Undoes every mock, whichever subset this test activated. Safe to call
    /// any number of times. Failures are logged and never stop later steps.
    pub fn restore(&self) {
        info!("Restoring mocks: {:?}", self.active_mocks());

        if let Err(source) = self.real.config.restore() {
            let err = Error::Teardown {
                subsystem: "config".to_string(),
                source,
            };
            error!("{}", err);
        }

        let drained = self.registry.lock().drain();

        self.real.stripe_mocker.reset();
        for mock in &drained {
            if let ActiveMock::WebhookMockReceiver(receiver) = mock {
                receiver.reset();
            }
        }

        self.limits.restore();

        self.settings.restore();
        self.labs.restore();
        self.mail.restore();
        self.events.restore();
        self.mailgun.restore();
        self.fake_settings.clear();
        self.fake_labs.clear();
        self.email_count.store(0, Ordering::SeqCst);

        self.network.reset();
        self.network.disable_network();
        info!("Mocks restored");
    }
}

impl Drop for MockManager {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Assertions over what the installed mocks recorded.
pub struct Assertions<'a> {
    manager: &'a MockManager,
}

impl Assertions<'_> {
    /// Checks the next email in send order. The Nth call inspects the Nth
    /// email, so tests assert in the order mail went out.
    pub fn sent_email(&self, matchers: impl Into<EmailMatchers>) -> Result<MailMessage> {
        let spy = match self.manager.registry.lock().get(Subsystem::Mail) {
            Some(ActiveMock::Mail { spy, .. }) => Arc::clone(spy),
            _ => return Err(Error::usage("Cannot assert on mail when mail has not been mocked")),
        };

        // claim the cursor slot only if an email exists there
        let index = self
            .manager
            .email_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| {
                (i < spy.call_count()).then_some(i + 1)
            })
            .map_err(|i| Error::assertion(format!("Expected at least {} emails sent.", i + 1)))?;
        let call = spy
            .get_call(index)
            .ok_or_else(|| Error::assertion(format!("Expected at least {} emails sent.", index + 1)))?;

        match_email(index + 1, &call, &matchers.into())?;
        Ok(call)
    }

    pub fn emitted_event(&self, name: &str) -> Result<()> {
        self.event_spy()?.assert_emitted(name)
    }

    /// Names of every recorded emission, in order.
    pub fn emitted_events(&self) -> Result<Vec<String>> {
        Ok(self.event_spy()?.names())
    }

    fn event_spy(&self) -> Result<Arc<EventSpy>> {
        match self.manager.registry.lock().get(Subsystem::Events) {
            Some(ActiveMock::Events(spy)) => Ok(Arc::clone(spy)),
            _ => Err(Error::usage("Cannot assert on events when events have not been mocked")),
        }
    }
}
