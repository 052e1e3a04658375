// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0
//! Health Validator
//!
//! Post-deployment check: every launched service is probed again on its bound
//! port (HTTP for the web app, raw connect for the receiver). Each probe gets
//! a bounded number of attempts with a fixed backoff, so validation always
//! terminates.

use crate::domain::service::ServiceHandle;
use crate::infrastructure::probe::ReadinessProbe;
use crate::infrastructure::retry::{retry, RetryError, RetryPolicy};
use futures::future::join_all;
use metrics::counter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct HealthValidator {
    probe: Arc<dyn ReadinessProbe>,
    host: String,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl HealthValidator {
    pub fn new(
        probe: Arc<dyn ReadinessProbe>,
        host: impl Into<String>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            host: host.into(),
            policy,
            cancel,
        }
    }

    /// Probe every handle. `Err` lists one line per failing service.
    pub async fn validate_deployment(&self, handles: &[ServiceHandle]) -> Result<(), Vec<String>> {
        let checks = handles.iter().map(|handle| self.check(handle));
        let failures: Vec<String> = join_all(checks).await.into_iter().flatten().collect();

        if failures.is_empty() {
            info!(services = handles.len(), "Deployment is healthy");
            Ok(())
        } else {
            Err(failures)
        }
    }

    async fn check(&self, handle: &ServiceHandle) -> Option<String> {
        let result = retry(self.policy, &self.cancel, |_| {
            self.probe.probe(&self.host, handle.bound_port, &handle.probe)
        })
        .await;

        let outcome = if result.is_ok() { "pass" } else { "fail" };
        counter!("bringup_health_checks_total", "service" => handle.name.clone(), "outcome" => outcome)
            .increment(1);

        match result {
            Ok(()) => None,
            Err(RetryError::Cancelled) => Some(format!("{}: health check interrupted", handle.name)),
            Err(e @ RetryError::Exhausted { .. }) => {
                warn!(service = %handle.name, port = handle.bound_port, "Health check failed: {}", e);
                Some(format!("{} on port {}: {}", handle.name, handle.bound_port, e))
            }
        }
    }
}
