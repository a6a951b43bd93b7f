//! The twelve-phase lifecycle: static data describing phase metadata,
//! priority assignment, and the phase-transition state machine.
//!
//! Grounded on the static-data seeding style of `models::workflow`'s
//! `WorkflowDefinition::new()` (places/transitions built once as plain
//! data, read concurrently thereafter without synchronization).

use crate::ids::AgentId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub const TIERS: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Normal, Priority::Low];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Execution,
    ValidationGate,
    Escalation,
    Notification,
}

#[derive(Debug, Clone)]
pub struct Phase {
    pub number: u8,
    pub name: &'static str,
    pub agents: &'static [&'static str],
    pub user_approval_required: bool,
    pub estimated_duration_minutes: u32,
    pub priority: Priority,
}

impl Phase {
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.iter().map(|a| AgentId::new(*a)).collect()
    }
}

/// `processPhaseTransition`'s keying: the reason a transition is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Success,
    Failure,
    Escalation,
    SyntaxErrors,
    ValidationPasses,
    Approved,
    Rejected,
    Revise,
}

#[derive(Debug, Clone)]
pub struct PhaseTransition {
    pub reason: TransitionReason,
    pub next_phase: u8,
    /// Phases that must already be in `completedPhases` for this transition
    /// to be taken, beyond the source phase itself.
    pub prerequisites: &'static [u8],
}

pub const PHASES: [Phase; 12] = [
    Phase { number: 0, name: "Project Discovery & Planning", agents: &["planner", "coordinator", "qa"], user_approval_required: true, estimated_duration_minutes: 30, priority: Priority::High },
    Phase { number: 1, name: "Infrastructure Requirements", agents: &["planner"], user_approval_required: true, estimated_duration_minutes: 20, priority: Priority::High },
    Phase { number: 2, name: "Architecture Assessment & Cost", agents: &["cloud_architect", "diagram_generator"], user_approval_required: true, estimated_duration_minutes: 45, priority: Priority::High },
    Phase { number: 3, name: "Implementation Planning", agents: &["plan_agent"], user_approval_required: true, estimated_duration_minutes: 30, priority: Priority::High },
    Phase { number: 4, name: "Infrastructure Code Generation", agents: &["implementation_agent"], user_approval_required: true, estimated_duration_minutes: 60, priority: Priority::Normal },
    Phase { number: 5, name: "Deployment & Validation", agents: &["deploy_coordinator"], user_approval_required: true, estimated_duration_minutes: 40, priority: Priority::Critical },
    Phase { number: 6, name: "Post-Deployment Validation", agents: &["documentation_generator"], user_approval_required: false, estimated_duration_minutes: 15, priority: Priority::Normal },
    Phase { number: 7, name: "Handoff", agents: &["coordinator"], user_approval_required: false, estimated_duration_minutes: 10, priority: Priority::Normal },
    Phase { number: 8, name: "Application Code Generation", agents: &["coordinator", "cicd", "frontend"], user_approval_required: false, estimated_duration_minutes: 90, priority: Priority::Normal },
    Phase { number: 9, name: "Tracking", agents: &["reporter"], user_approval_required: false, estimated_duration_minutes: 15, priority: Priority::Low },
    Phase { number: 10, name: "Testing Framework", agents: &["qa"], user_approval_required: false, estimated_duration_minutes: 30, priority: Priority::Low },
    Phase { number: 11, name: "Documentation & Knowledge Transfer", agents: &["documentation_generator"], user_approval_required: true, estimated_duration_minutes: 20, priority: Priority::Low },
];

pub fn phase_by_number(number: u8) -> Option<&'static Phase> {
    PHASES.iter().find(|p| p.number == number)
}

/// `priority` is the nominal tier a phase's routine traffic uses; escalation
/// messages and messages on a critical phase always enter `Critical`
/// regardless of the phase's nominal tier — decided in DESIGN.md, since the
/// spec flags this as a point implementers could get wrong.
pub fn priority_for(phase: u8, message_type: MessageType) -> Priority {
    if matches!(message_type, MessageType::Escalation) {
        return Priority::Critical;
    }
    phase_by_number(phase).map(|p| p.priority).unwrap_or(Priority::Normal)
}

fn transitions_for(phase: u8) -> &'static [PhaseTransition] {
    match phase {
        0 => &[PhaseTransition { reason: TransitionReason::Approved, next_phase: 1, prerequisites: &[] }],
        1 => &[PhaseTransition { reason: TransitionReason::Approved, next_phase: 2, prerequisites: &[0] }],
        2 => &[PhaseTransition { reason: TransitionReason::Approved, next_phase: 3, prerequisites: &[0, 1] }],
        3 => &[PhaseTransition { reason: TransitionReason::Approved, next_phase: 4, prerequisites: &[0, 1, 2] }],
        4 => &[
            PhaseTransition { reason: TransitionReason::ValidationPasses, next_phase: 5, prerequisites: &[0, 1, 2, 3] },
            PhaseTransition { reason: TransitionReason::SyntaxErrors, next_phase: 4, prerequisites: &[] },
        ],
        5 => &[PhaseTransition { reason: TransitionReason::Success, next_phase: 6, prerequisites: &[4] }],
        6 => &[PhaseTransition { reason: TransitionReason::Success, next_phase: 7, prerequisites: &[5] }],
        7 => &[PhaseTransition { reason: TransitionReason::Success, next_phase: 8, prerequisites: &[6] }],
        8 => &[
            PhaseTransition { reason: TransitionReason::Success, next_phase: 9, prerequisites: &[7] },
            PhaseTransition { reason: TransitionReason::Success, next_phase: 10, prerequisites: &[7] },
        ],
        9 => &[PhaseTransition { reason: TransitionReason::Success, next_phase: 11, prerequisites: &[8] }],
        10 => &[PhaseTransition { reason: TransitionReason::Success, next_phase: 11, prerequisites: &[8] }],
        _ => &[],
    }
}

/// Looks up the transition for `(currentPhase, reason)` in the static state
/// machine; `None` means the transition is not in the table and the caller
/// must treat it as escalated (§4.4 `processPhaseTransition` step 2).
pub fn lookup_transition(current_phase: u8, reason: TransitionReason) -> Option<&'static PhaseTransition> {
    transitions_for(current_phase).iter().find(|t| t.reason == reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_twelve_phases_are_present_in_order() {
        for (i, phase) in PHASES.iter().enumerate() {
            assert_eq!(phase.number as usize, i);
        }
    }

    #[test]
    fn escalation_always_routes_critical_regardless_of_phase() {
        assert_eq!(priority_for(9, MessageType::Escalation), Priority::Critical);
        assert_eq!(priority_for(0, MessageType::Execution), Priority::High);
    }

    #[test]
    fn phase_four_canonical_transitions() {
        let passes = lookup_transition(4, TransitionReason::ValidationPasses).unwrap();
        assert_eq!(passes.next_phase, 5);
        let errors = lookup_transition(4, TransitionReason::SyntaxErrors).unwrap();
        assert_eq!(errors.next_phase, 4);
    }

    #[test]
    fn phases_nine_and_ten_both_feed_into_eleven() {
        assert_eq!(lookup_transition(9, TransitionReason::Success).unwrap().next_phase, 11);
        assert_eq!(lookup_transition(10, TransitionReason::Success).unwrap().next_phase, 11);
    }

    #[test]
    fn unknown_transition_reason_is_absent() {
        assert!(lookup_transition(0, TransitionReason::SyntaxErrors).is_none());
    }
}
