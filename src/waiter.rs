use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{Result, ToolkitError};
use crate::output::Output;

pub const DEFAULT_POLL_SECS: u64 = 5;
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/* ============================= TERMINAL STATES ============================= */

/// States that end a wait, split into success and failure.
#[derive(Debug, Clone, Copy)]
pub struct TerminalStates {
    pub success: &'static [&'static str],
    pub failure: &'static [&'static str],
}

impl TerminalStates {
    pub const BACKUP: Self = Self {
        success: &["completed"],
        failure: &["failed"],
    };
    pub const SNAPSHOT: Self = Self {
        success: &["completed"],
        failure: &["failed"],
    };
    /// Target app of a clone or restore.
    pub const APP: Self = Self {
        success: &["ready"],
        failure: &["failed"],
    };
    /// `status.state` of astra.netapp.io custom resources.
    pub const CUSTOM_RESOURCE: Self = Self {
        success: &["Completed"],
        failure: &["Failed", "Error"],
    };
}

/* ============================= WAITER ============================= */

/// Polls an object until it reaches a terminal state.
///
/// The poll closure returns `Ok(None)` while the object is not visible yet.
/// Consecutive poll errors count against a budget; a success resets it.
#[derive(Clone)]
pub struct Waiter {
    interval: Duration,
    max_errors: u32,
    max_polls: Option<u32>,
    interrupt: Option<Arc<Notify>>,
    out: Output,
}

impl Waiter {
    pub fn new(out: Output) -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_SECS),
            max_errors: MAX_CONSECUTIVE_ERRORS,
            max_polls: None,
            interrupt: None,
            out,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    /// Extra cancellation source besides ctrl-c.
    pub fn with_interrupt(mut self, interrupt: Arc<Notify>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub async fn wait<F, Fut>(
        &self,
        what: &str,
        states: TerminalStates,
        mut poll: F,
    ) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<String>>>,
    {
        let mut errors = 0u32;
        let mut polls = 0u32;
        loop {
            polls += 1;
            match poll().await {
                Ok(Some(state)) => {
                    errors = 0;
                    debug!(what, state = %state, polls, "wait_poll");
                    if states.success.contains(&state.as_str()) {
                        self.out.line("complete!");
                        info!(what, state = %state, "wait_succeeded");
                        return Ok(state);
                    }
                    if states.failure.contains(&state.as_str()) {
                        self.out.line("");
                        return Err(ToolkitError::AsyncFailed {
                            what: what.to_string(),
                            state,
                        });
                    }
                }
                Ok(None) => errors = 0,
                Err(e) => {
                    errors += 1;
                    warn!(what, error = %e, errors, "wait_poll_failed");
                    if errors >= self.max_errors {
                        self.out.line("");
                        return Err(ToolkitError::AsyncTimeout {
                            what: what.to_string(),
                            reason: format!("{errors} consecutive poll errors, last: {e}"),
                        });
                    }
                }
            }

            if self.max_polls.is_some_and(|max| polls >= max) {
                self.out.line("");
                return Err(ToolkitError::AsyncTimeout {
                    what: what.to_string(),
                    reason: format!("no terminal state after {polls} polls"),
                });
            }

            self.pause().await?;
            self.out.dot();
        }
    }

    async fn pause(&self) -> Result<()> {
        let interrupted = async {
            match &self.interrupt {
                Some(n) => n.notified().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => Err(ToolkitError::Interrupted),
            _ = interrupted => Err(ToolkitError::Interrupted),
            _ = tokio::time::sleep(self.interval) => Ok(()),
        }
    }
}

/* ============================= TESTS ============================= */
