/// Recovery: restart the managed unit when the chain head goes stale.
///
/// The service manager is not ours, so a failed restart is reported and
/// never retried from here.
use crate::config::RecoveryConfig;
use crate::staleness::{AlertEvent, AlertReason};
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info};

/// Errors from a restart request.
#[derive(Debug)]
pub enum ControllerError {
    /// Could not talk to the service manager at all.
    Unreachable { command: String, source: std::io::Error },
    /// The manager refused or failed the restart.
    Rejected { code: Option<i32>, stderr: String },
    /// No answer within the restart timeout.
    Timeout(Duration),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Unreachable { command, source } => {
                write!(f, "failed to run service manager '{}': {}", command, source)
            }
            ControllerError::Rejected { code, stderr } => match code {
                Some(code) => write!(f, "restart rejected (exit {}): {}", code, stderr.trim()),
                None => write!(f, "restart rejected (killed by signal): {}", stderr.trim()),
            },
            ControllerError::Timeout(after) => {
                write!(f, "restart did not complete within {}s", after.as_secs())
            }
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Unreachable { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Something that can restart a named unit.
pub trait ServiceController {
    fn restart(
        &self,
        unit: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), ControllerError>>;
}

/// Restarts units through `systemctl` (or any command with the same shape).
#[derive(Debug, Clone)]
pub struct SystemdController {
    command: String,
    args: Vec<String>,
}

impl SystemdController {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &RecoveryConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    /// Replace `{unit}` placeholders with the unit name.
    fn build_args(&self, unit: &str) -> Vec<String> {
        self.args.iter().map(|arg| arg.replace("{unit}", unit)).collect()
    }
}

impl ServiceController for SystemdController {
    async fn restart(&self, unit: &str, timeout: Duration) -> Result<(), ControllerError> {
        let args = self.build_args(unit);
        info!(command = %self.command, args = ?args, "requesting unit restart");

        let child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControllerError::Unreachable {
                command: self.command.clone(),
                source: e,
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ControllerError::Unreachable {
                command: self.command.clone(),
                source: e,
            })?,
            Err(_) => return Err(ControllerError::Timeout(timeout)),
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(ControllerError::Rejected {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Result of handling one alert.
#[derive(Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Restarted,
    Failed(String),
}

pub struct RecoveryDispatcher<C> {
    controller: C,
    unit: String,
    timeout: Duration,
}

impl<C: ServiceController> RecoveryDispatcher<C> {
    pub fn new(controller: C, unit: impl Into<String>, timeout: Duration) -> Self {
        Self {
            controller,
            unit: unit.into(),
            timeout,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Restart the managed unit once. Never retries.
    pub async fn handle(&self, alert: &AlertEvent) -> RecoveryOutcome {
        let AlertReason::StaleHead {
            key,
            height,
            unchanged,
        } = &alert.reason;
        info!(
            unit = %self.unit,
            key = %key,
            height,
            unchanged,
            since = %alert.observed_at,
            "restarting stalled node"
        );

        let start = Instant::now();
        // The controller is expected to honour the timeout; this is the hard stop.
        let result =
            match tokio::time::timeout(self.timeout, self.controller.restart(&self.unit, self.timeout))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ControllerError::Timeout(self.timeout)),
            };

        match result {
            Ok(()) => {
                info!(unit = %self.unit, duration = ?start.elapsed(), "unit restarted");
                RecoveryOutcome::Restarted
            }
            Err(e) => {
                error!(unit = %self.unit, error = %e, "unit restart failed");
                RecoveryOutcome::Failed(e.to_string())
            }
        }
    }
}
