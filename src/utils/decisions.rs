//! Decision policy for situations the original workflow resolved with an
//! operator prompt. The pipeline runs unattended, so each prompt becomes a
//! configured choice: accept the suggestion automatically, or fail closed.

use log::{info, warn};

use crate::errors::ResolveError;
use crate::utils::env::var_or;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    /// Apply suggested corrections and continue past confirmed service
    /// statuses with an empty result.
    AutoAccept,
    /// Skip corrections and abort the run on a service status.
    FailClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct DecisionPolicy {
    pub mode: DecisionMode,
}

impl DecisionPolicy {
    pub fn from_env() -> Self {
        let mode = match var_or("RESOLVER_DECISION_MODE", "fail_closed").as_str() {
            "auto_accept" => DecisionMode::AutoAccept,
            "fail_closed" => DecisionMode::FailClosed,
            other => {
                warn!(
                    "Unknown RESOLVER_DECISION_MODE '{}', defaulting to fail_closed",
                    other
                );
                DecisionMode::FailClosed
            }
        };
        DecisionPolicy { mode }
    }

    pub fn auto_accept() -> Self {
        DecisionPolicy {
            mode: DecisionMode::AutoAccept,
        }
    }

    pub fn fail_closed() -> Self {
        DecisionPolicy {
            mode: DecisionMode::FailClosed,
        }
    }

    pub fn log_config(&self) {
        info!("Decision policy: {:?}", self.mode);
    }

    /// Whether to query with a corrected city spelling in place of `old`.
    pub fn confirm_city_correction(&self, old: &str, corrected: &str) -> bool {
        match self.mode {
            DecisionMode::AutoAccept => {
                info!("Replacing '{}' with '{}' in geocode query", old, corrected);
                true
            }
            DecisionMode::FailClosed => {
                warn!(
                    "Skipping city correction '{}' -> '{}' (fail-closed policy)",
                    old, corrected
                );
                false
            }
        }
    }

    /// A service-level status message is terminal unless confirmed: under
    /// auto-accept the current lookup yields no candidates and the run
    /// continues, otherwise the run aborts.
    pub fn on_service_status(&self, message: &str) -> Result<(), ResolveError> {
        match self.mode {
            DecisionMode::AutoAccept => {
                warn!("Continuing past geocoding service status: {}", message);
                Ok(())
            }
            DecisionMode::FailClosed => Err(ResolveError::ServiceStatus(message.to_string())),
        }
    }

    /// A report line repeated identical quantity values across distinct
    /// fields, which usually means a parsing slip upstream.
    pub fn confirm_duplicate_quantities(&self, reference: &str) -> Result<(), ResolveError> {
        match self.mode {
            DecisionMode::AutoAccept => {
                warn!(
                    "Report {}: identical quantity values on one line, importing anyway",
                    reference
                );
                Ok(())
            }
            DecisionMode::FailClosed => Err(ResolveError::MalformedReport {
                reference: reference.to_string(),
                detail: "identical quantity values across distinct fields".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_accept_confirms_corrections() {
        let policy = DecisionPolicy::auto_accept();
        assert!(policy.confirm_city_correction("St. Louis", "Saint Louis"));
        assert!(policy.on_service_status("hourly limit exceeded").is_ok());
        assert!(policy.confirm_duplicate_quantities("report.csv").is_ok());
    }

    #[test]
    fn fail_closed_rejects() {
        let policy = DecisionPolicy::fail_closed();
        assert!(!policy.confirm_city_correction("St. Louis", "Saint Louis"));

        let err = policy.on_service_status("hourly limit exceeded").unwrap_err();
        assert!(matches!(err, ResolveError::ServiceStatus(_)));
        assert!(err.is_fatal());

        let err = policy.confirm_duplicate_quantities("report.csv").unwrap_err();
        assert!(matches!(err, ResolveError::MalformedReport { .. }));
    }
}
