use crate::model::{ActionReceipt, AppStatus, Application, LifecycleAction};
use anyhow::Result;
use std::future::Future;
use tokio::time::{Duration, sleep};
use tracing::debug;

pub const DEFAULT_MIN_FEEDBACK: Duration = Duration::from_millis(600);

/// Transport for lifecycle commands.
pub trait ActionPerformer: Send + Sync {
    fn perform_action(
        &self,
        action: LifecycleAction,
        application: &Application,
    ) -> impl Future<Output = Result<ActionReceipt>> + Send;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum ActionState {
    #[default]
    Idle,
    Pending(LifecycleAction),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Rejection {
    Busy(LifecycleAction),
    Ineligible {
        action: LifecycleAction,
        status: AppStatus,
    },
}

impl Rejection {
    pub fn describe(self) -> String {
        match self {
            Self::Busy(pending) => format!("{} already in progress", pending.title()),
            Self::Ineligible { action, status } => {
                format!("{} is not available while {}", action.title(), status.label())
            }
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ActionOutcome {
    Succeeded(ActionReceipt),
    Failed(String),
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// What the owner has to do after a settle.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SettleEffect {
    pub close_menu: bool,
}

/// Per-application lock: one lifecycle action at a time, gated by status.
#[derive(Debug, Default)]
pub struct ActionDispatcher {
    state: ActionState,
}

impl ActionDispatcher {
    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn pending(&self) -> Option<LifecycleAction> {
        match self.state {
            ActionState::Idle => None,
            ActionState::Pending(action) => Some(action),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state != ActionState::Idle
    }

    pub fn can_invoke(&self, action: LifecycleAction, status: AppStatus) -> bool {
        self.check(action, status).is_ok()
    }

    pub fn check(&self, action: LifecycleAction, status: AppStatus) -> Result<(), Rejection> {
        if let ActionState::Pending(pending) = self.state {
            return Err(Rejection::Busy(pending));
        }
        if !action.allowed_for(status) {
            return Err(Rejection::Ineligible { action, status });
        }
        Ok(())
    }

    /// Moves to `Pending(action)`. The caller then runs [`perform_with_feedback`]
    /// and reports back through [`ActionDispatcher::settle`].
    pub fn invoke(&mut self, action: LifecycleAction, status: AppStatus) -> Result<(), Rejection> {
        self.check(action, status)?;
        self.state = ActionState::Pending(action);
        Ok(())
    }

    /// Returns to idle. Settles for an action that is not the pending one are
    /// ignored.
    pub fn settle(&mut self, action: LifecycleAction, outcome: &ActionOutcome) -> Option<SettleEffect> {
        if self.state != ActionState::Pending(action) {
            debug!("ignoring settle for {action}, state is {:?}", self.state);
            return None;
        }
        self.state = ActionState::Idle;
        Some(SettleEffect {
            close_menu: outcome.is_success(),
        })
    }
}

/// Runs the command and holds the result until at least `min_feedback` has
/// passed since the call started.
pub async fn perform_with_feedback<P: ActionPerformer>(
    performer: &P,
    action: LifecycleAction,
    application: &Application,
    min_feedback: Duration,
) -> ActionOutcome {
    let (result, ()) = tokio::join!(
        performer.perform_action(action, application),
        sleep(min_feedback)
    );
    match result {
        Ok(receipt) => ActionOutcome::Succeeded(receipt),
        Err(error) => ActionOutcome::Failed(format!("{error:#}")),
    }
}
