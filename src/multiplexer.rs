/// Single-shot supervisory loop.
///
/// Waits on exactly two sources, the pipeline's alert channel and the
/// termination request, and acts on whichever delivers first. After one
/// handled event the process exits; an outer supervisor relaunches it.
use crate::recovery::{RecoveryDispatcher, RecoveryOutcome, ServiceController};
use crate::staleness::AlertEvent;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How a watchdog cycle ended. Maps one-to-one to the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Alert handled and the unit restarted.
    Restarted,
    /// Termination requested before any alert.
    Interrupted,
    /// Startup configuration was unusable.
    ConfigError,
    /// Alert handled but the restart failed.
    RecoveryFailed,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Restarted => 0,
            ExitStatus::Interrupted => 1,
            ExitStatus::ConfigError => 2,
            ExitStatus::RecoveryFailed => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxState {
    Waiting,
    Handling,
    Terminated(ExitStatus),
}

pub struct Multiplexer<C> {
    state: MuxState,
    dispatcher: RecoveryDispatcher<C>,
}

impl<C: ServiceController> Multiplexer<C> {
    pub fn new(dispatcher: RecoveryDispatcher<C>) -> Self {
        Self {
            state: MuxState::Waiting,
            dispatcher,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> MuxState {
        self.state
    }

    fn transition(&mut self, next: MuxState) {
        info!(from = ?self.state, to = ?next, "multiplexer transition");
        self.state = next;
    }

    /// Drive the machine from `Waiting` to `Terminated`.
    ///
    /// Termination wins a tie. Once an alert has been taken the termination
    /// source is no longer observed, so a restart in flight runs to completion.
    /// Calling `run` again after termination returns the recorded status.
    pub async fn run<T>(&mut self, mut alerts: mpsc::Receiver<AlertEvent>, termination: T) -> ExitStatus
    where
        T: Future<Output = ()>,
    {
        if let MuxState::Terminated(status) = self.state {
            return status;
        }

        let alert = tokio::select! {
            biased;
            _ = termination => None,
            Some(alert) = alerts.recv() => Some(alert),
        };
        // The pipeline is no longer observed for this cycle.
        alerts.close();

        let status = match alert {
            None => {
                warn!("termination requested, exiting without recovery");
                ExitStatus::Interrupted
            }
            Some(alert) => {
                self.transition(MuxState::Handling);
                match self.dispatcher.handle(&alert).await {
                    RecoveryOutcome::Restarted => ExitStatus::Restarted,
                    RecoveryOutcome::Failed(reason) => {
                        error!(unit = %self.dispatcher.unit(), reason = %reason, "recovery failed");
                        ExitStatus::RecoveryFailed
                    }
                }
            }
        };

        self.transition(MuxState::Terminated(status));
        status
    }
}
