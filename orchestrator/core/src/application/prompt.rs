// Copyright (c) 2026 bringup contributors
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;

/// Asks the operator a yes/no question. Used for the red-test override and
/// the rollback offer after a failed health check.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn confirm(&self, question: &str) -> bool;
}

/// Fixed answer, for non-interactive runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl OperatorPrompt for FixedAnswer {
    async fn confirm(&self, question: &str) -> bool {
        tracing::info!(answer = self.0, "Non-interactive answer to: {}", question);
        self.0
    }
}
