// src/lib.rs
//
// Test doubles for the side-effect surfaces of the server: network, mail,
// Mailgun, Stripe, labs flags, settings, events and limits. One
// `MockManager` per test owns every fake and restores all of them.

pub mod cfg;
pub mod error;
pub mod events;
pub mod limits;
pub mod mail;
pub mod mailgun;
pub mod manager;
pub mod network;
pub mod overlay;
pub mod registry;
pub mod services;
pub mod webhook;

pub use cfg::config::MockConfig;
pub use error::{Error, Result};
pub use limits::{LimitConfig, LimitOptions, LimitsTable};
pub use mail::{EmailMatchers, MailMessage, MailReply, Matcher};
pub use manager::{Assertions, MockManager};
pub use network::{HttpClient, HttpRequest, HttpResponse, NetworkError, UreqTransport};
pub use registry::Subsystem;
pub use services::{ServiceHandles, Services};

/// Logging for test binaries; honours `RUST_LOG`. Safe to call from every test.
pub fn init_logging() {
    env_logger::Builder::new()
        .parse_default_env()
        .is_test(true)
        .try_init()
        .ok();
}
