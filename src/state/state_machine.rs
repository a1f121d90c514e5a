use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::state::room::RoomStatus;

/// Phases a battle room moves through, driven by the round controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundPhase {
    /// Lobby: players join and toggle readiness.
    Waiting,
    /// Fixed countdown before the first question.
    Countdown,
    /// Answer window for the question at this index is open.
    Question(usize),
    /// Answer for the question at this index is shown with the scoring breakdown.
    Reveal(usize),
    /// Standings are final.
    Complete,
    /// Battle aborted; terminal.
    Abandoned,
}

impl RoundPhase {
    /// Coarse status persisted with the room.
    pub fn status(&self) -> RoomStatus {
        match self {
            RoundPhase::Waiting => RoomStatus::Waiting,
            RoundPhase::Countdown => RoomStatus::Countdown,
            RoundPhase::Question(_) | RoundPhase::Reveal(_) => RoomStatus::InProgress,
            RoundPhase::Complete => RoomStatus::Complete,
            RoundPhase::Abandoned => RoomStatus::Abandoned,
        }
    }

    /// Question index carried by the phase, if any.
    pub fn question_index(&self) -> Option<usize> {
        match self {
            RoundPhase::Question(index) | RoundPhase::Reveal(index) => Some(*index),
            _ => None,
        }
    }

    /// Complete and abandoned rooms accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundPhase::Complete | RoundPhase::Abandoned)
    }
}

/// What closed a question window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    /// The server-side deadline expired.
    Timer,
    /// Every connected participant had answered.
    AllAnswered,
}

/// What ended a reveal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceTrigger {
    /// Reveal display delay (or the wait cap) elapsed.
    Timer,
    /// The host asked to move on.
    Host,
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    /// Every participant is ready; lock the roster.
    AllReady,
    /// The countdown finished; open the first question.
    CountdownElapsed,
    /// Close the answer window of the given question.
    CloseQuestion {
        /// Question being closed.
        index: usize,
        /// Which side of the timer/all-answered race fired.
        trigger: CloseTrigger,
    },
    /// Leave the reveal of `index` for the following question.
    NextQuestion {
        /// Question whose reveal is ending.
        index: usize,
        /// Why the reveal ended.
        trigger: AdvanceTrigger,
    },
    /// Leave the final reveal and publish standings.
    Finish,
    /// Abort the battle from any non-terminal phase.
    Abort,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: RoundPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoundEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The caller expected a phase the machine already left.
    Stale {
        /// Phase the caller observed.
        expected: RoundPhase,
        /// Phase the machine is actually in.
        actual: RoundPhase,
    },
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: RoundPhase,
        /// Current phase.
        actual: RoundPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: RoundPhase,
    /// Phase the state machine will transition to.
    pub to: RoundPhase,
    /// Event that triggered this transition.
    pub event: RoundEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: RoundPhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<RoundPhase>,
}

/// Per-room state machine. Transitions are compare-and-swap: the caller names the
/// phase it observed and the plan fails if the machine has moved on.
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    phase: RoundPhase,
    version: usize,
    question_count: usize,
    pending: Option<Plan>,
}

impl RoundStateMachine {
    /// Create a state machine in the waiting phase for `question_count` questions.
    pub fn new(question_count: usize) -> Self {
        Self::restore(RoundPhase::Waiting, 0, question_count)
    }

    /// Rebuild a state machine from a durably committed phase.
    pub fn restore(phase: RoundPhase, version: usize, question_count: usize) -> Self {
        Self {
            phase,
            version,
            question_count,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> RoundPhase {
        self.phase.clone()
    }

    /// Number of committed transitions.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase.clone(),
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to.clone()),
        }
    }

    /// Plan a transition out of `expected`. Fails with [`PlanError::Stale`] when the
    /// machine is no longer in that phase, so the loser of a race becomes a no-op.
    pub fn plan(&mut self, expected: &RoundPhase, event: RoundEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        if &self.phase != expected {
            return Err(PlanError::Stale {
                expected: expected.clone(),
                actual: self.phase.clone(),
            });
        }

        let next = self
            .compute_transition(event.clone())
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase.clone(),
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    /// Returns the new phase after the transition.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<RoundPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase.clone(),
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase.clone())
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: RoundEvent) -> Result<RoundPhase, InvalidTransition> {
        let last = self.question_count.saturating_sub(1);
        let next = match (self.phase.clone(), event) {
            (RoundPhase::Waiting, RoundEvent::AllReady) => RoundPhase::Countdown,
            (RoundPhase::Countdown, RoundEvent::CountdownElapsed) if self.question_count > 0 => {
                RoundPhase::Question(0)
            }
            (RoundPhase::Question(current), RoundEvent::CloseQuestion { index, .. })
                if current == index =>
            {
                RoundPhase::Reveal(current)
            }
            (RoundPhase::Reveal(current), RoundEvent::NextQuestion { index, .. })
                if current == index && current < last =>
            {
                RoundPhase::Question(current + 1)
            }
            (RoundPhase::Reveal(current), RoundEvent::Finish) if current == last => {
                RoundPhase::Complete
            }
            (phase, RoundEvent::Abort) if !phase.is_terminal() => RoundPhase::Abandoned,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}
