// src/cfg/config.rs

use serde::Deserialize;
use serde_json::Value;
use std::net::{IpAddr, Ipv4Addr};

/// Fixed values the mocks answer with. Every field has a default, so an empty
/// document (or `MockConfig::default()`) gives the stock behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Address application DNS lookups resolve to once the network is disabled.
    #[serde(alias = "fake-dns-address")]
    pub fake_dns_address: IpAddr,

    /// Hosts reachable even when the network is disabled.
    #[serde(alias = "loopback-hosts")]
    pub loopback_hosts: Vec<String>,

    /// Allow-list pattern added by `allow_stripe`.
    #[serde(alias = "stripe-host")]
    pub stripe_host: String,

    /// What the mail mock answers with unless told otherwise.
    #[serde(alias = "default-mail-response")]
    pub default_mail_response: Value,

    pub mailgun: MailgunSeed,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            fake_dns_address: IpAddr::V4(Ipv4Addr::new(123, 123, 123, 123)),
            loopback_hosts: vec!["127.0.0.1".to_string(), "localhost".to_string(), "::1".to_string()],
            stripe_host: "stripe.com".to_string(),
            default_mail_response: Value::String("Mail is disabled".to_string()),
            mailgun: MailgunSeed::default(),
        }
    }
}

/// Settings seeded so the application selects the Mailgun provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailgunSeed {
    #[serde(alias = "api-key")]
    pub api_key: String,

    pub domain: String,

    #[serde(alias = "base-url")]
    pub base_url: String,
}

impl Default for MailgunSeed {
    fn default() -> Self {
        Self {
            api_key: "test".to_string(),
            domain: "example.com".to_string(),
            base_url: "test".to_string(),
        }
    }
}
