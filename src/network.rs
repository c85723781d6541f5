// src/network.rs
//
// Outbound network policy for tests: deny by default, allow-list by host
// substring, nock-style interceptors, and a DNS stub so the application's own
// lookups of fake hostnames never reach a real resolver. Permitted connections
// always resolve for real.

use log::{debug, warn};
use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cfg::config::MockConfig;
use crate::services::Seam;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NetworkError {
    /// Refused by the gate before any connection was attempted.
    #[error("Disallowed net connect for \"{host}\"")]
    NetConnectNotAllowed { host: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Connection failed: {0}")]
    Connection(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, url: &str) -> Result<Self, NetworkError> {
        let url = Url::parse(url).map_err(|e| NetworkError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            method: method.to_uppercase(),
            url,
            headers: BTreeMap::new(),
            body: Vec::new(),
        })
    }

    pub fn get(url: &str) -> Result<Self, NetworkError> {
        Self::new("GET", url)
    }

    pub fn post(url: &str) -> Result<Self, NetworkError> {
        Self::new("POST", url)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn body_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// What application code calls to make an outbound request.
pub trait HttpClient: Send + Sync {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

/// The real connector. Hostnames must be resolved through `resolver`, which is
/// the real resolver even while the DNS stub is installed.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: &HttpRequest, resolver: Arc<dyn DnsResolver>) -> Result<HttpResponse, NetworkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupAddress {
    pub address: IpAddr,
    pub family: u8,
}

impl LookupAddress {
    pub fn new(address: IpAddr) -> Self {
        let family = if address.is_ipv4() { 4 } else { 6 };
        Self { address, family }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub exchange: String,
    pub priority: u16,
}

pub trait DnsResolver: Send + Sync {
    fn lookup(&self, host: &str) -> io::Result<LookupAddress>;
    fn resolve_mx(&self, domain: &str) -> io::Result<Vec<MxRecord>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

impl DnsResolver for SystemResolver {
    fn lookup(&self, host: &str) -> io::Result<LookupAddress> {
        (host, 0)
            .to_socket_addrs()?
            .next()
            .map(|addr| LookupAddress::new(addr.ip()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host)))
    }

    fn resolve_mx(&self, domain: &str) -> io::Result<Vec<MxRecord>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("MX lookup for {} needs a DNS client", domain),
        ))
    }
}

/// Every hostname resolves to one fixed address; MX lookups find nothing.
#[derive(Debug, Clone)]
pub struct DnsStub {
    address: IpAddr,
}

impl DnsStub {
    pub fn new(address: IpAddr) -> Self {
        Self { address }
    }
}

impl DnsResolver for DnsStub {
    fn lookup(&self, _host: &str) -> io::Result<LookupAddress> {
        Ok(LookupAddress::new(self.address))
    }

    fn resolve_mx(&self, _domain: &str) -> io::Result<Vec<MxRecord>> {
        Ok(Vec::new())
    }
}

struct SeamResolver(Arc<dyn DnsResolver>);

impl ureq::Resolver for SeamResolver {
    fn resolve(&self, netloc: &str) -> io::Result<Vec<SocketAddr>> {
        let (host, port) = netloc
            .rsplit_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("missing port in {}", netloc)))?;
        let port: u16 = port
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("bad port in {}: {}", netloc, e)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(address, port)]);
        }
        let found = self.0.lookup(host)?;
        Ok(vec![SocketAddr::new(found.address, port)])
    }
}

/// Real HTTP over `ureq`, resolving hosts through the caller's resolver.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    timeout: Duration,
}

impl UreqTransport {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for UreqTransport {
    fn send(&self, request: &HttpRequest, resolver: Arc<dyn DnsResolver>) -> Result<HttpResponse, NetworkError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(self.timeout)
            .resolver(SeamResolver(resolver))
            .build();

        let mut outgoing = agent.request(&request.method, request.url.as_str());
        for (key, value) in &request.headers {
            outgoing = outgoing.set(key, value);
        }

        let response = match outgoing.send_bytes(&request.body) {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(ureq::Error::Transport(e)) => return Err(NetworkError::Connection(e.to_string())),
        };

        let mut headers = BTreeMap::new();
        for name in response.headers_names() {
            if let Some(value) = response.header(&name) {
                headers.insert(name.clone(), value.to_string());
            }
        }
        let status = response.status();
        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| NetworkError::Connection(e.to_string()))?;

        Ok(HttpResponse { status, headers, body })
    }
}

#[derive(Debug, Clone)]
pub enum HostMatch {
    Exact(String),
    Contains(String),
    Pattern(Regex),
}

impl HostMatch {
    pub fn matches(&self, host: &str) -> bool {
        match self {
            HostMatch::Exact(expected) => host == expected,
            HostMatch::Contains(fragment) => host.contains(fragment.as_str()),
            HostMatch::Pattern(re) => re.is_match(host),
        }
    }
}

pub type ReplyFn = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

#[derive(Clone)]
pub enum InterceptReply {
    Fixed(HttpResponse),
    With(ReplyFn),
}

/// A fake endpoint answering matching requests instead of the network.
#[derive(Clone)]
pub struct HttpInterceptor {
    pub host: HostMatch,
    pub method: Option<String>,
    pub path: Option<String>,
    pub reply: InterceptReply,
    /// Remaining uses; `None` once persisted.
    pub times: Option<usize>,
    /// Lets an owner remove just its own interceptors.
    pub owner: Option<String>,
}

impl HttpInterceptor {
    /// Answers one matching request with `200` and an empty body until changed.
    pub fn new(host: HostMatch) -> Self {
        Self {
            host,
            method: None,
            path: None,
            reply: InterceptReply::Fixed(HttpResponse::new(200, Vec::new())),
            times: Some(1),
            owner: None,
        }
    }

    pub fn get(mut self, path: &str) -> Self {
        self.method = Some("GET".to_string());
        self.path = Some(path.to_string());
        self
    }

    pub fn post(mut self, path: &str) -> Self {
        self.method = Some("POST".to_string());
        self.path = Some(path.to_string());
        self
    }

    pub fn persist(mut self) -> Self {
        self.times = None;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    pub fn owned_by(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn reply(mut self, response: HttpResponse) -> Self {
        self.reply = InterceptReply::Fixed(response);
        self
    }

    pub fn reply_with<F>(mut self, reply: F) -> Self
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.reply = InterceptReply::With(Arc::new(reply));
        self
    }

    fn matches(&self, request: &HttpRequest) -> bool {
        if self.times == Some(0) {
            return false;
        }
        if let Some(ref method) = self.method {
            if method != &request.method {
                return false;
            }
        }
        if let Some(ref path) = self.path {
            if path != request.path() {
                return false;
            }
        }
        self.host.matches(request.host())
    }
}

impl std::fmt::Debug for HttpInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpInterceptor")
            .field("host", &self.host)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("times", &self.times)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Persistent `POST /` on the Slack webhook host answering `200 ok`.
pub fn slack_interceptor() -> HttpInterceptor {
    HttpInterceptor::new(HostMatch::Contains("hooks.slack.com".to_string()))
        .post("/")
        .persist()
        .reply(HttpResponse::new(200, "ok"))
}

/// Persistent geolocation answer for the loopback address.
pub fn geojs_interceptor() -> HttpInterceptor {
    let body = json!({
        "latitude": "nil",
        "longitude": "nil",
        "organization_name": "Unknown",
        "ip": "127.0.0.1",
        "asn": 64512,
        "organization": "AS64512 Unknown",
        "area_code": "0"
    });
    HttpInterceptor::new(HostMatch::Contains("get.geojs.io".to_string()))
        .get("/v1/ip/geo/127.0.0.1.json")
        .persist()
        .reply(HttpResponse::new(200, body.to_string()).with_header("Response-Type", "application/json"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetConnect {
    /// Every host may be reached.
    Allowed,
    /// Only loopback and allow-listed hosts may be reached.
    Restricted,
}

struct GateState {
    net_connect: NetConnect,
    allowed: Vec<String>,
    interceptors: Vec<HttpInterceptor>,
    requests: Vec<HttpRequest>,
}

/// Policy over outbound connectivity, sitting in front of the real transport.
pub struct NetworkGate {
    dns: Arc<Seam<dyn DnsResolver>>,
    transport: Arc<dyn HttpTransport>,
    fake_address: IpAddr,
    loopback_hosts: Vec<String>,
    state: RwLock<GateState>,
}

impl NetworkGate {
    pub fn new(transport: Arc<dyn HttpTransport>, dns: Arc<dyn DnsResolver>, config: &MockConfig) -> Self {
        Self {
            dns: Arc::new(Seam::new("dns", dns)),
            transport,
            fake_address: config.fake_dns_address,
            loopback_hosts: config.loopback_hosts.clone(),
            state: RwLock::new(GateState {
                net_connect: NetConnect::Allowed,
                allowed: Vec::new(),
                interceptors: Vec::new(),
                requests: Vec::new(),
            }),
        }
    }

    /// Deny by default and stub DNS. Safe to call repeatedly.
    pub fn disable_network(&self) {
        self.dns.intercept(Arc::new(DnsStub::new(self.fake_address)));
        self.state.write().net_connect = NetConnect::Restricted;
        debug!("Network disabled except loopback and allow-list");
    }

    pub fn enable_net_connect(&self) {
        self.state.write().net_connect = NetConnect::Allowed;
    }

    pub fn net_connect(&self) -> NetConnect {
        self.state.read().net_connect
    }

    /// Permit hosts containing `pattern`.
    pub fn allow(&self, pattern: impl Into<String>) {
        let pattern = pattern.into();
        debug!("Allowing network to hosts matching '{}'", pattern);
        self.state.write().allowed.push(pattern);
    }

    pub fn allowed_domains(&self) -> Vec<String> {
        self.state.read().allowed.clone()
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        let state = self.state.read();
        if state.net_connect == NetConnect::Allowed {
            return true;
        }
        if self.loopback_hosts.iter().any(|h| host.contains(h.as_str())) {
            return true;
        }
        state.allowed.iter().any(|pattern| host.contains(pattern.as_str()))
    }

    pub fn intercept(&self, interceptor: HttpInterceptor) {
        debug!("Registering {:?}", interceptor);
        self.state.write().interceptors.push(interceptor);
    }

    /// Drops every interceptor.
    pub fn clean_all(&self) {
        self.state.write().interceptors.clear();
    }

    pub fn remove_interceptors(&self, owner: &str) {
        self.state
            .write()
            .interceptors
            .retain(|i| i.owner.as_deref() != Some(owner));
    }

    /// Interceptors that can still answer a request.
    pub fn pending_interceptors(&self) -> usize {
        self.state
            .read()
            .interceptors
            .iter()
            .filter(|i| i.times != Some(0))
            .count()
    }

    /// Every request that reached the gate, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.read().requests.clone()
    }

    pub fn dns_stubbed(&self) -> bool {
        self.dns.is_intercepted()
    }

    /// Resolver handle for application lookups; honours the DNS stub.
    pub fn resolver(&self) -> Arc<dyn DnsResolver> {
        self.dns.clone()
    }

    /// Clears interceptors, allow-list and recorded requests, removes the DNS
    /// stub and re-enables all connections. Callers re-arm afterwards.
    pub fn reset(&self) {
        {
            let mut state = self.state.write();
            state.interceptors.clear();
            state.allowed.clear();
            state.requests.clear();
            state.net_connect = NetConnect::Allowed;
        }
        self.dns.restore();
    }

    fn take_intercept(&self, request: &HttpRequest) -> Option<InterceptReply> {
        let mut state = self.state.write();
        state.requests.push(request.clone());
        let interceptor = state.interceptors.iter_mut().find(|i| i.matches(request))?;
        if let Some(ref mut remaining) = interceptor.times {
            *remaining -= 1;
        }
        Some(interceptor.reply.clone())
    }
}

impl HttpClient for NetworkGate {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        // the lock is released before a dynamic reply runs
        if let Some(reply) = self.take_intercept(request) {
            debug!("Intercepted {} {}", request.method, request.url);
            return Ok(match reply {
                InterceptReply::Fixed(response) => response,
                InterceptReply::With(reply) => reply(request),
            });
        }

        let host = request.host().to_string();
        if !self.is_allowed(&host) {
            warn!("Refusing {} {}: net connect not allowed", request.method, request.url);
            return Err(NetworkError::NetConnectNotAllowed { host });
        }
        self.transport.send(request, self.dns.real())
    }
}
