//! Jenkins REST client.
//!
//! Endpoints used:
//! - `GET  /computer/<node>/api/json`               node state
//! - `POST /computer/<node>/toggleOffline`          flip online/offline
//! - `GET  /crumbIssuer/api/json`                   CSRF crumb (optional)
//!
//! `toggleOffline` is a toggle, so both directions read the node state first
//! and only post when a flip is needed.

use std::time::Duration;

use base64::Engine as _;
use dw_config::SchedulerSettings;
use serde::Deserialize;
use tracing::debug;

use super::{NodeInfo, SchedulerClient, SchedulerConnect, SchedulerError};

/// Connection parameters; cheap to clone, holds no sockets.
#[derive(Clone)]
pub struct JenkinsEndpoint {
    url: String,
    user: String,
    password: String,
    connect_timeout: Duration,
    timeout: Duration,
}

impl std::fmt::Debug for JenkinsEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JenkinsEndpoint")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl JenkinsEndpoint {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &SchedulerSettings) -> Self {
        Self::new(&settings.url, &settings.user, &settings.password)
            .with_timeouts(settings.connect_timeout(), settings.timeout())
    }

    pub fn with_timeouts(mut self, connect: Duration, overall: Duration) -> Self {
        self.connect_timeout = connect;
        self.timeout = overall;
        self
    }
}

impl SchedulerConnect for JenkinsEndpoint {
    fn connect(&self) -> Result<Box<dyn SchedulerClient>, SchedulerError> {
        Ok(Box::new(JenkinsClient::connect(self)))
    }
}

/// A single-use Jenkins session.
pub struct JenkinsClient {
    agent: ureq::Agent,
    base: String,
    authorization: String,
}

#[derive(Debug, Deserialize)]
struct ComputerJson {
    idle: bool,
    offline: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrumbJson {
    crumb: String,
    crumb_request_field: String,
}

impl JenkinsClient {
    /// Build a client with its own connection pool and timeouts.
    ///
    /// No request is made until the first call.
    pub fn connect(endpoint: &JenkinsEndpoint) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(endpoint.connect_timeout)
            .timeout(endpoint.timeout)
            .redirects(0)
            .build();
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", endpoint.user, endpoint.password));
        Self {
            agent,
            base: endpoint.url.clone(),
            authorization: format!("Basic {token}"),
        }
    }

    fn computer_url(&self, name: &str, suffix: &str) -> String {
        format!("{}/computer/{}/{}", self.base, encode_segment(node_segment(name)), suffix)
    }

    fn map_error(&self, url: &str, node: Option<&str>, err: ureq::Error) -> SchedulerError {
        match err {
            ureq::Error::Status(status @ (401 | 403), _) => SchedulerError::Unauthorized { status },
            ureq::Error::Status(404, _) if node.is_some() => {
                SchedulerError::NodeNotFound(node.unwrap_or_default().to_string())
            }
            ureq::Error::Status(status, _) => SchedulerError::Status {
                status,
                url: url.to_string(),
            },
            ureq::Error::Transport(transport) => SchedulerError::Connection {
                url: self.base.clone(),
                message: transport.to_string(),
            },
        }
    }

    /// Fetch a CSRF crumb header, or None when the crumb issuer is disabled.
    ///
    /// The crumb is bound to the web session; the agent's cookie store sends
    /// the session cookie back with the following POST.
    fn crumb(&self) -> Result<Option<(String, String)>, SchedulerError> {
        let url = format!("{}/crumbIssuer/api/json", self.base);
        match self
            .agent
            .get(&url)
            .set("Authorization", &self.authorization)
            .call()
        {
            Ok(response) => {
                let crumb: CrumbJson = response
                    .into_json()
                    .map_err(|e| SchedulerError::Protocol(format!("crumb: {e}")))?;
                Ok(Some((crumb.crumb_request_field, crumb.crumb)))
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(self.map_error(&url, None, err)),
        }
    }

    fn toggle_offline(&self, name: &str, reason: Option<&str>) -> Result<(), SchedulerError> {
        let url = self.computer_url(name, "toggleOffline");
        let crumb = self.crumb()?;

        let mut request = self
            .agent
            .post(&url)
            .set("Authorization", &self.authorization);
        if let Some((field, value)) = &crumb {
            request = request.set(field, value);
        }
        if let Some(reason) = reason {
            request = request.query("offlineMessage", reason);
        }

        debug!(node = %name, url = %url, "posting toggleOffline");
        let response = request
            .send_string("")
            .map_err(|err| self.map_error(&url, Some(name), err))?;

        // Jenkins answers a successful toggle with a redirect to the node page.
        match response.status() {
            200..=399 => Ok(()),
            status => Err(SchedulerError::Status { status, url }),
        }
    }
}

impl SchedulerClient for JenkinsClient {
    fn node_info(&self, name: &str) -> Result<NodeInfo, SchedulerError> {
        let url = self.computer_url(name, "api/json");
        let response = self
            .agent
            .get(&url)
            .query("tree", "idle,offline")
            .set("Authorization", &self.authorization)
            .call()
            .map_err(|err| self.map_error(&url, Some(name), err))?;

        let computer: ComputerJson = response
            .into_json()
            .map_err(|e| SchedulerError::Protocol(format!("node info for {name}: {e}")))?;
        debug!(node = %name, idle = computer.idle, offline = computer.offline, "node info");
        Ok(NodeInfo {
            idle: computer.idle,
            offline: computer.offline,
        })
    }

    fn disable_node(&self, name: &str, reason: &str) -> Result<(), SchedulerError> {
        if self.node_info(name)?.offline {
            debug!(node = %name, "node already offline, nothing to disable");
            return Ok(());
        }
        self.toggle_offline(name, Some(reason))
    }

    fn enable_node(&self, name: &str) -> Result<(), SchedulerError> {
        if !self.node_info(name)?.offline {
            debug!(node = %name, "node already online, nothing to enable");
            return Ok(());
        }
        self.toggle_offline(name, None)
    }
}

/// The built-in controller node is addressed as `(master)`.
fn node_segment(name: &str) -> &str {
    match name {
        "master" | "built-in" => "(master)",
        other => other,
    }
}

/// Percent-encode a URL path segment (RFC 3986 unreserved set kept as-is).
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'(' | b')' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
