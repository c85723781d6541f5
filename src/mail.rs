// src/mail.rs
//
// Recording receiver for outbound mail, the spy that keeps call order, and
// the matchers used by sequential sent-mail assertions.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::services::{MailSender, SnapshotManager};

/// Payload handed to the mail entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    /// Anything else the caller attaches (e.g. `forceTextContent`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MailMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: Some(to.into()),
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    pub fn sender(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The property as the wire payload carries it; `None` only when absent.
    /// An explicit `null` is a defined value.
    pub fn property(&self, key: &str) -> Option<Value> {
        let Ok(Value::Object(mut fields)) = serde_json::to_value(self) else {
            return None;
        };
        fields.remove(key)
    }

    /// Everything except the bodies.
    pub fn metadata(&self) -> Value {
        let mut fields = match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        fields.remove("html");
        fields.remove("text");
        Value::Object(fields)
    }
}

/// How the mail mock answers a send.
#[derive(Debug, Clone, PartialEq)]
pub enum MailReply {
    Respond(Value),
    Fail(String),
}

impl Default for MailReply {
    fn default() -> Self {
        MailReply::Respond(Value::String("Mail is disabled".to_string()))
    }
}

/// Captures every message instead of delivering it.
pub struct EmailMockReceiver {
    snapshots: Arc<dyn SnapshotManager>,
    reply: RwLock<MailReply>,
    sent: RwLock<Vec<MailMessage>>,
}

impl EmailMockReceiver {
    pub fn new(snapshots: Arc<dyn SnapshotManager>, reply: MailReply) -> Self {
        Self {
            snapshots,
            reply: RwLock::new(reply),
            sent: RwLock::new(Vec::new()),
        }
    }

    pub fn set_reply(&self, reply: MailReply) {
        *self.reply.write() = reply;
    }

    pub fn sent_email_count(&self) -> usize {
        self.sent.read().len()
    }

    pub fn get_sent_email(&self, index: usize) -> Option<MailMessage> {
        self.sent.read().get(index).cloned()
    }

    pub fn assert_sent_email_count(&self, expected: usize) -> Result<()> {
        let actual = self.sent_email_count();
        if actual != expected {
            return Err(Error::assertion(format!(
                "Expected {} emails sent, found {}",
                expected, actual
            )));
        }
        Ok(())
    }

    pub fn match_metadata_snapshot(&self, index: usize) -> Result<()> {
        let email = self.require(index)?;
        self.snapshots
            .assert_snapshot(&format!("email-{}-metadata", index), &email.metadata())
    }

    pub fn match_html_snapshot(&self, index: usize) -> Result<()> {
        let email = self.require(index)?;
        let html = email.html.map(Value::String).unwrap_or(Value::Null);
        self.snapshots.assert_snapshot(&format!("email-{}-html", index), &html)
    }

    pub fn match_plaintext_snapshot(&self, index: usize) -> Result<()> {
        let email = self.require(index)?;
        let text = email.text.map(Value::String).unwrap_or(Value::Null);
        self.snapshots.assert_snapshot(&format!("email-{}-text", index), &text)
    }

    pub fn reset(&self) {
        self.sent.write().clear();
    }

    fn require(&self, index: usize) -> Result<MailMessage> {
        self.get_sent_email(index)
            .ok_or_else(|| Error::assertion(format!("Expected at least {} emails sent.", index + 1)))
    }
}

impl MailSender for EmailMockReceiver {
    fn send(&self, message: &MailMessage) -> Result<Value> {
        self.sent.write().push(message.clone());
        match &*self.reply.read() {
            MailReply::Respond(value) => Ok(value.clone()),
            MailReply::Fail(reason) => Err(Error::Mail(reason.clone())),
        }
    }
}

/// Records call order in front of the receiver.
pub struct MailSpy {
    target: Arc<dyn MailSender>,
    calls: RwLock<Vec<MailMessage>>,
}

impl MailSpy {
    pub fn new(target: Arc<dyn MailSender>) -> Self {
        Self {
            target,
            calls: RwLock::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    pub fn called(&self) -> bool {
        self.call_count() > 0
    }

    pub fn get_call(&self, index: usize) -> Option<MailMessage> {
        self.calls.read().get(index).cloned()
    }

    pub fn calls(&self) -> Vec<MailMessage> {
        self.calls.read().clone()
    }
}

impl MailSender for MailSpy {
    fn send(&self, message: &MailMessage) -> Result<Value> {
        self.calls.write().push(message.clone());
        self.target.send(message)
    }
}

/// Expected value for one property of a sent email.
#[derive(Debug, Clone)]
pub enum Matcher {
    Exact(Value),
    Pattern(Regex),
}

impl Matcher {
    pub fn pattern(re: &str) -> std::result::Result<Self, regex::Error> {
        Ok(Matcher::Pattern(Regex::new(re)?))
    }
}

impl From<&str> for Matcher {
    fn from(value: &str) -> Self {
        Matcher::Exact(Value::String(value.to_string()))
    }
}

impl From<String> for Matcher {
    fn from(value: String) -> Self {
        Matcher::Exact(Value::String(value))
    }
}

impl From<Value> for Matcher {
    fn from(value: Value) -> Self {
        Matcher::Exact(value)
    }
}

impl From<bool> for Matcher {
    fn from(value: bool) -> Self {
        Matcher::Exact(Value::Bool(value))
    }
}

impl From<Regex> for Matcher {
    fn from(re: Regex) -> Self {
        Matcher::Pattern(re)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Exact(value) => write!(f, "{}", display_value(value)),
            Matcher::Pattern(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Ordered property expectations for `sent_email`.
#[derive(Debug, Clone, Default)]
pub struct EmailMatchers(Vec<(String, Matcher)>);

impl EmailMatchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, matcher: impl Into<Matcher>) -> Self {
        self.0.push((key.into(), matcher.into()));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Matcher)> {
        self.0.iter()
    }
}

impl<K, M, const N: usize> From<[(K, M); N]> for EmailMatchers
where
    K: Into<String>,
    M: Into<Matcher>,
{
    fn from(pairs: [(K, M); N]) -> Self {
        Self(pairs.into_iter().map(|(k, m)| (k.into(), m.into())).collect())
    }
}

/// Checks `message`, the `number`th email (1-based), against `matchers`.
pub fn match_email(number: usize, message: &MailMessage, matchers: &EmailMatchers) -> Result<()> {
    for (key, matcher) in matchers.iter() {
        let actual = message
            .property(key)
            .ok_or_else(|| Error::assertion(format!("Expected email to have property {}", key)))?;

        let matched = match (matcher, &actual) {
            (Matcher::Pattern(re), Value::String(s)) => re.is_match(s),
            (Matcher::Pattern(_), _) => false,
            (Matcher::Exact(expected), actual) => expected == actual,
        };
        if matched {
            continue;
        }

        let message = match matcher {
            Matcher::Pattern(_) => format!(
                "Expected Email {} to have {} that matches {}, got {}",
                number,
                key,
                matcher,
                display_value(&actual)
            ),
            Matcher::Exact(_) => format!(
                "Expected Email {} to have {} of {}, got {}",
                number,
                key,
                matcher,
                display_value(&actual)
            ),
        };
        return Err(Error::Assertion(message));
    }
    Ok(())
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
