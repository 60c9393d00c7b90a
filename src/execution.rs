// =============================================================================
// Execution Adapter — invokes the external order-submission capability
// =============================================================================
//
// Defined as a trait so alternative adapters (a native HTTP signer, an
// in-process exchange client) can replace the subprocess bridge without
// touching the trade-processing pipeline.
//
// The only implementation shipped here delegates to an external
// "python-bridge" subprocess with a fixed argument shape and FOK order type.
// Exit code 0 is success; stdout and stderr are concatenated into the result
// message. The adapter is invoked serially per trade but concurrently across
// trades up to `maxParallel` — callers gate concurrency with a semaphore,
// not this adapter.
// =============================================================================

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::types::Side;

/// Outcome of an execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub message: String,
}

/// A pluggable order-placement capability.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn place_order(&self, token_id: &str, side: Side, price: f64, shares: f64) -> ExecutionOutcome;
}

/// Delegates order placement to an external subprocess ("python-bridge"),
/// passing a fixed argument shape and an order type of `FOK`.
pub struct SubprocessAdapter {
    bridge_path: String,
}

impl SubprocessAdapter {
    pub fn new(bridge_path: impl Into<String>) -> Self {
        Self {
            bridge_path: bridge_path.into(),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for SubprocessAdapter {
    async fn place_order(&self, token_id: &str, side: Side, price: f64, shares: f64) -> ExecutionOutcome {
        let output = Command::new(&self.bridge_path)
            .arg("--token-id")
            .arg(token_id)
            .arg("--side")
            .arg(side.to_string())
            .arg("--price")
            .arg(format!("{price:.2}"))
            .arg("--shares")
            .arg(format!("{shares:.6}"))
            .arg("--order-type")
            .arg("FOK")
            .output()
            .await;

        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                let stderr = String::from_utf8_lossy(&out.stderr);
                let message = format!("{stdout}{stderr}").trim().to_string();

                if out.status.success() {
                    info!(token_id, %side, price, shares, "order placed via execution bridge");
                    ExecutionOutcome {
                        success: true,
                        message,
                    }
                } else {
                    warn!(token_id, %side, code = ?out.status.code(), "[LIVE FAIL] execution bridge exited non-zero");
                    ExecutionOutcome {
                        success: false,
                        message,
                    }
                }
            }
            Err(e) => {
                warn!(token_id, %side, error = %e, "[LIVE FAIL] failed to spawn execution bridge");
                ExecutionOutcome {
                    success: false,
                    message: format!("failed to spawn execution bridge: {e}"),
                }
            }
        }
    }
}

/// Any execution configuration other than the subprocess bridge returns a
/// failure result with an explanatory message, rather than panicking.
pub struct UnsupportedAdapter {
    pub configured_value: String,
}

#[async_trait]
impl ExecutionAdapter for UnsupportedAdapter {
    async fn place_order(&self, _token_id: &str, _side: Side, _price: f64, _shares: f64) -> ExecutionOutcome {
        ExecutionOutcome {
            success: false,
            message: format!(
                "unsupported liveExec adapter '{}': no implementation available",
                self.configured_value
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_adapter_always_fails_with_explanation() {
        let adapter = UnsupportedAdapter {
            configured_value: "native-signer".to_string(),
        };
        let outcome = adapter.place_order("tok", Side::Buy, 0.5, 1.0).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("native-signer"));
    }

    #[tokio::test]
    async fn subprocess_adapter_reports_failure_for_missing_binary() {
        let adapter = SubprocessAdapter::new("/nonexistent/path/to/bridge");
        let outcome = adapter.place_order("tok", Side::Sell, 0.5, 1.0).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn subprocess_adapter_reports_success_for_exit_zero() {
        let adapter = SubprocessAdapter::new("/bin/true");
        let outcome = adapter.place_order("tok", Side::Buy, 0.5, 1.0).await;
        assert!(outcome.success);
    }
}
