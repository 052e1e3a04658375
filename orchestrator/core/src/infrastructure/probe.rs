// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Readiness probes
//!
//! A single probe attempt against a bound port: HTTP GET for the web
//! application, raw TCP connect for the receiver. Retrying is the caller's
//! job (see [`crate::infrastructure::retry`]).

use crate::domain::service::ProbeKind;
use async_trait::async_trait;
use reqwest::Url;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::TcpStream;

#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// One attempt. `Err` carries a human-readable reason.
    async fn probe(&self, host: &str, port: u16, kind: &ProbeKind) -> Result<(), String>;
}

/// Probe backed by `reqwest` for HTTP and `tokio::net` for TCP.
pub struct NetworkProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, timeout }
    }
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ReadinessProbe for NetworkProbe {
    async fn probe(&self, host: &str, port: u16, kind: &ProbeKind) -> Result<(), String> {
        match kind {
            ProbeKind::Http { path } => http_probe(&self.client, host, port, path).await,
            ProbeKind::Tcp => tcp_probe(host, port, self.timeout).await,
        }
    }
}

pub async fn http_probe(
    client: &reqwest::Client,
    host: &str,
    port: u16,
    path: &str,
) -> Result<(), String> {
    let url = probe_url(host, port, path)?;
    match client.get(url.clone()).send().await {
        Ok(resp) if resp.status().is_server_error() => {
            Err(format!("{} answered {}", url, resp.status()))
        }
        Ok(_) => Ok(()),
        Err(e) => Err(format!("{} unreachable: {}", url, e)),
    }
}

/// `http://host:port/path`, with IPv6 literals bracketed.
pub fn probe_url(host: &str, port: u16, path: &str) -> Result<Url, String> {
    let invalid = |reason: String| format!("cannot probe {}:{}{}: {}", host, port, path, reason);
    let mut url = Url::parse("http://localhost/").map_err(|e| invalid(e.to_string()))?;
    match unbracket(host).parse::<IpAddr>() {
        Ok(ip) => url
            .set_ip_host(ip)
            .map_err(|()| invalid("not an IP host".to_string()))?,
        Err(_) => url.set_host(Some(host)).map_err(|e| invalid(e.to_string()))?,
    }
    url.set_port(Some(port))
        .map_err(|()| invalid("port not allowed".to_string()))?;
    url.join(path).map_err(|e| invalid(e.to_string()))
}

pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> Result<(), String> {
    match tokio::time::timeout(timeout, TcpStream::connect((unbracket(host), port))).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("connect {}:{} failed: {}", host, port, e)),
        Err(_) => Err(format!("connect {}:{} timed out after {:?}", host, port, timeout)),
    }
}

fn unbracket(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Probe host for local services: wildcard binds are reached via loopback.
pub fn probe_host(bind_host: &str) -> &str {
    match bind_host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}
