use crate::{al_state::AlState, al_status_code::AlStatusCode};

/// A requested change from one AL state to another.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transition {
    /// Current state.
    pub from: AlState,
    /// Requested state.
    pub to: AlState,
}

/// How a [`Transition`] is carried out.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Plan {
    /// Same state requested again, e.g. to acknowledge an error.
    Refresh,
    /// One step up, started by the given handler.
    Up(StartStep),
    /// One or more steps down.
    Down,
    /// Not allowed.
    Reject(AlStatusCode),
}

/// An upward step and the start handler that performs it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartStep {
    /// `INIT -> PRE-OP`.
    Mailbox,
    /// `INIT -> BOOT`.
    Bootstrap,
    /// `PRE-OP -> SAFE-OP`.
    Inputs,
    /// `SAFE-OP -> OP`.
    Outputs,
}

/// A downward step and the stop handler that performs it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopStep {
    /// `OP -> SAFE-OP`.
    Outputs,
    /// `SAFE-OP -> PRE-OP`.
    Inputs,
    /// `PRE-OP -> INIT`.
    Mailbox,
    /// `BOOT -> INIT`.
    Bootstrap,
}

impl Transition {
    /// Create a transition.
    pub fn new(from: AlState, to: AlState) -> Self {
        Self { from, to }
    }

    /// Look up how to perform this transition.
    pub fn classify(&self) -> Plan {
        if !self.to.is_known() {
            return Plan::Reject(AlStatusCode::UnknownRequestedState);
        }

        match (self.from, self.to) {
            (from, to) if from == to => Plan::Refresh,
            (AlState::Init, AlState::PreOp) => Plan::Up(StartStep::Mailbox),
            (AlState::Init, AlState::Bootstrap) => Plan::Up(StartStep::Bootstrap),
            (AlState::PreOp, AlState::SafeOp) => Plan::Up(StartStep::Inputs),
            (AlState::SafeOp, AlState::Op) => Plan::Up(StartStep::Outputs),
            (AlState::Bootstrap, AlState::Init) => Plan::Down,
            // BOOT is only reachable from INIT and may only be left towards INIT.
            (AlState::Bootstrap, _) | (_, AlState::Bootstrap) => {
                Plan::Reject(AlStatusCode::InvalidRequestedStateChange)
            }
            (from, to) if to.rank() < from.rank() => Plan::Down,
            _ => Plan::Reject(AlStatusCode::InvalidRequestedStateChange),
        }
    }
}

impl StartStep {
    /// State the step starts from.
    pub fn from(self) -> AlState {
        match self {
            StartStep::Mailbox | StartStep::Bootstrap => AlState::Init,
            StartStep::Inputs => AlState::PreOp,
            StartStep::Outputs => AlState::SafeOp,
        }
    }

    /// State reached when the step commits.
    pub fn target(self) -> AlState {
        match self {
            StartStep::Mailbox => AlState::PreOp,
            StartStep::Bootstrap => AlState::Bootstrap,
            StartStep::Inputs => AlState::SafeOp,
            StartStep::Outputs => AlState::Op,
        }
    }

    /// Stop step undoing this step.
    pub fn undo(self) -> StopStep {
        match self {
            StartStep::Mailbox => StopStep::Mailbox,
            StartStep::Bootstrap => StopStep::Bootstrap,
            StartStep::Inputs => StopStep::Inputs,
            StartStep::Outputs => StopStep::Outputs,
        }
    }
}

impl StopStep {
    /// The stop step that leaves `state`, or `None` for `INIT`.
    pub fn leaving(state: AlState) -> Option<Self> {
        match state {
            AlState::Op => Some(StopStep::Outputs),
            AlState::SafeOp => Some(StopStep::Inputs),
            AlState::PreOp => Some(StopStep::Mailbox),
            AlState::Bootstrap => Some(StopStep::Bootstrap),
            AlState::Init | AlState::Other(_) => None,
        }
    }

    /// State reached after this step.
    pub fn target(self) -> AlState {
        match self {
            StopStep::Outputs => AlState::SafeOp,
            StopStep::Inputs => AlState::PreOp,
            StopStep::Mailbox | StopStep::Bootstrap => AlState::Init,
        }
    }
}
