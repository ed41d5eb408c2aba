//! Finite state machine for Neo4jCluster lifecycle phases.
//!
//! Explicit transition table with guards: the reconciler proposes an event,
//! the machine decides whether the phase may move. Every phase change is
//! therefore explainable by the evidence in the transition context, which is
//! what the status conditions record.
//!
//! ## Phase graph
//!
//! Empty → Initializing → Forming → Ready ⇄ {Upgrading, Scaling} → Ready
//! any → Failed on unrecoverable error; Failed → Initializing on spec
//! correction.

use std::fmt;

use crate::crd::ClusterPhase;

/// Events that trigger phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// Kubernetes resources have been applied for the first time
    ResourcesApplied,
    /// All desired pods are running
    PodsRunning,
    /// Every server reports the complete membership view
    ClusterFormed,
    /// Desired image version differs from the observed one
    UpgradeDetected,
    /// Desired server count differs from the observed one
    ScaleDetected,
    /// The rolling upgrade finished
    UpgradeCompleted,
    /// The scale operation finished
    ScaleCompleted,
    /// An unrecoverable error occurred during reconciliation
    ReconcileError,
    /// The spec was edited after a failure
    SpecCorrected,
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::ResourcesApplied => write!(f, "ResourcesApplied"),
            ClusterEvent::PodsRunning => write!(f, "PodsRunning"),
            ClusterEvent::ClusterFormed => write!(f, "ClusterFormed"),
            ClusterEvent::UpgradeDetected => write!(f, "UpgradeDetected"),
            ClusterEvent::ScaleDetected => write!(f, "ScaleDetected"),
            ClusterEvent::UpgradeCompleted => write!(f, "UpgradeCompleted"),
            ClusterEvent::ScaleCompleted => write!(f, "ScaleCompleted"),
            ClusterEvent::ReconcileError => write!(f, "ReconcileError"),
            ClusterEvent::SpecCorrected => write!(f, "SpecCorrected"),
        }
    }
}

/// Evidence available when evaluating transition guards.
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Number of ready server pods.
    pub ready_servers: i32,
    /// Desired server count.
    pub desired_servers: i32,
    /// Number of servers reporting the complete membership view.
    pub members_with_full_view: i32,
    /// Whether the spec generation changed since the last observation.
    pub spec_changed: bool,
    /// Error message if an error event is proposed.
    pub error_message: Option<String>,
}

impl TransitionContext {
    /// Create a context from pod readiness counts.
    pub fn new(ready_servers: i32, desired_servers: i32) -> Self {
        Self {
            ready_servers,
            desired_servers,
            members_with_full_view: 0,
            spec_changed: false,
            error_message: None,
        }
    }

    /// All pods ready.
    pub fn all_pods_ready(&self) -> bool {
        self.desired_servers > 0 && self.ready_servers >= self.desired_servers
    }

    /// Every server agrees on the full membership.
    pub fn formation_complete(&self) -> bool {
        self.desired_servers > 0 && self.members_with_full_view >= self.desired_servers
    }

    /// Set the spec_changed flag.
    pub fn with_spec_changed(mut self, changed: bool) -> Self {
        self.spec_changed = changed;
        self
    }

    /// Set the membership evidence.
    pub fn with_full_views(mut self, members: i32) -> Self {
        self.members_with_full_view = members;
        self
    }
}

/// A transition definition.
#[derive(Debug)]
pub struct Transition {
    /// Source phase
    pub from: ClusterPhase,
    /// Target phase
    pub to: ClusterPhase,
    /// Event that triggers this transition
    pub event: ClusterEvent,
    /// Human-readable description
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a transition.
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        description: &'static str,
    },
    /// No transition defined for this (phase, event) pair
    InvalidTransition {
        current: ClusterPhase,
        event: ClusterEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: ClusterPhase,
        to: ClusterPhase,
        event: ClusterEvent,
        reason: String,
    },
}

/// State machine for Neo4jCluster lifecycle phases.
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    /// Create a new state machine with the defined transition table.
    pub fn new() -> Self {
        Self {
            transitions: vec![
                // Empty
                Transition::new(
                    ClusterPhase::Empty,
                    ClusterPhase::Initializing,
                    ClusterEvent::ResourcesApplied,
                    "Resources created, pods starting",
                ),
                Transition::new(
                    ClusterPhase::Empty,
                    ClusterPhase::Failed,
                    ClusterEvent::ReconcileError,
                    "Validation or creation failed",
                ),
                // Initializing
                Transition::new(
                    ClusterPhase::Initializing,
                    ClusterPhase::Forming,
                    ClusterEvent::PodsRunning,
                    "All pods running, discovery in progress",
                ),
                Transition::new(
                    ClusterPhase::Initializing,
                    ClusterPhase::Failed,
                    ClusterEvent::ReconcileError,
                    "Error while creating resources",
                ),
                // Forming
                Transition::new(
                    ClusterPhase::Forming,
                    ClusterPhase::Ready,
                    ClusterEvent::ClusterFormed,
                    "All servers report complete membership",
                ),
                Transition::new(
                    ClusterPhase::Forming,
                    ClusterPhase::Failed,
                    ClusterEvent::ReconcileError,
                    "Error during cluster formation",
                ),
                // Ready
                Transition::new(
                    ClusterPhase::Ready,
                    ClusterPhase::Upgrading,
                    ClusterEvent::UpgradeDetected,
                    "Image version change detected",
                ),
                Transition::new(
                    ClusterPhase::Ready,
                    ClusterPhase::Scaling,
                    ClusterEvent::ScaleDetected,
                    "Server count change detected",
                ),
                Transition::new(
                    ClusterPhase::Ready,
                    ClusterPhase::Failed,
                    ClusterEvent::ReconcileError,
                    "Error while running",
                ),
                // Upgrading
                Transition::new(
                    ClusterPhase::Upgrading,
                    ClusterPhase::Ready,
                    ClusterEvent::UpgradeCompleted,
                    "Rolling upgrade completed",
                ),
                Transition::new(
                    ClusterPhase::Upgrading,
                    ClusterPhase::Failed,
                    ClusterEvent::ReconcileError,
                    "Upgrade failed beyond retry budget",
                ),
                // Scaling
                Transition::new(
                    ClusterPhase::Scaling,
                    ClusterPhase::Ready,
                    ClusterEvent::ScaleCompleted,
                    "Scale operation completed",
                ),
                Transition::new(
                    ClusterPhase::Scaling,
                    ClusterPhase::Failed,
                    ClusterEvent::ReconcileError,
                    "Error during scale operation",
                ),
                // Failed
                Transition::new(
                    ClusterPhase::Failed,
                    ClusterPhase::Initializing,
                    ClusterEvent::SpecCorrected,
                    "Spec corrected, retrying from initialization",
                ),
            ],
        }
    }

    /// Attempt to transition based on an event.
    pub fn transition(
        &self,
        current: &ClusterPhase,
        event: ClusterEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is defined (ignoring guards).
    pub fn can_transition(&self, from: &ClusterPhase, event: &ClusterEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given phase.
    pub fn valid_events(&self, phase: &ClusterPhase) -> Vec<&ClusterEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *phase)
            .map(|t| &t.event)
            .collect()
    }

    /// Check guard conditions for a transition.
    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match (&transition.from, &transition.to, &transition.event) {
            (ClusterPhase::Initializing, ClusterPhase::Forming, ClusterEvent::PodsRunning) => {
                if !ctx.all_pods_ready() {
                    Some(format!(
                        "Pods not ready: {}/{}",
                        ctx.ready_servers, ctx.desired_servers
                    ))
                } else {
                    None
                }
            }
            (ClusterPhase::Forming, ClusterPhase::Ready, ClusterEvent::ClusterFormed) => {
                if !ctx.formation_complete() {
                    Some(format!(
                        "Only {}/{} servers report full membership",
                        ctx.members_with_full_view, ctx.desired_servers
                    ))
                } else {
                    None
                }
            }
            // Scale detection needs a fresh spec edit; upgrade detection is
            // evidenced by the nested upgrade state itself, which outlives
            // the generation observation.
            (ClusterPhase::Ready, _, ClusterEvent::ScaleDetected) => {
                if !ctx.spec_changed {
                    Some("No spec change observed".to_string())
                } else {
                    None
                }
            }
            (ClusterPhase::Failed, ClusterPhase::Initializing, ClusterEvent::SpecCorrected) => {
                if !ctx.spec_changed {
                    Some("Spec generation unchanged since failure".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_to_initializing() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(0, 3);

        let result = sm.transition(&ClusterPhase::Empty, ClusterEvent::ResourcesApplied, &ctx);
        match result {
            TransitionResult::Success { from, to, .. } => {
                assert_eq!(from, ClusterPhase::Empty);
                assert_eq!(to, ClusterPhase::Initializing);
            }
            _ => panic!("Expected successful transition"),
        }
    }

    #[test]
    fn test_initializing_to_forming_requires_ready_pods() {
        let sm = ClusterStateMachine::new();

        let ctx = TransitionContext::new(1, 3);
        let result = sm.transition(&ClusterPhase::Initializing, ClusterEvent::PodsRunning, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));

        let ctx = TransitionContext::new(3, 3);
        let result = sm.transition(&ClusterPhase::Initializing, ClusterEvent::PodsRunning, &ctx);
        assert!(matches!(result, TransitionResult::Success { .. }));
    }

    #[test]
    fn test_forming_to_ready_requires_full_membership() {
        let sm = ClusterStateMachine::new();

        // Pods ready but membership incomplete: stay in Forming.
        let ctx = TransitionContext::new(3, 3).with_full_views(2);
        let result = sm.transition(&ClusterPhase::Forming, ClusterEvent::ClusterFormed, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));

        let ctx = TransitionContext::new(3, 3).with_full_views(3);
        let result = sm.transition(&ClusterPhase::Forming, ClusterEvent::ClusterFormed, &ctx);
        match result {
            TransitionResult::Success { to, .. } => assert_eq!(to, ClusterPhase::Ready),
            _ => panic!("Expected successful transition to Ready"),
        }
    }

    #[test]
    fn test_ready_to_scaling_requires_spec_change() {
        let sm = ClusterStateMachine::new();

        let ctx = TransitionContext::new(3, 3);
        let result = sm.transition(&ClusterPhase::Ready, ClusterEvent::ScaleDetected, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));

        let ctx = TransitionContext::new(3, 3).with_spec_changed(true);
        let result = sm.transition(&ClusterPhase::Ready, ClusterEvent::ScaleDetected, &ctx);
        match result {
            TransitionResult::Success { to, .. } => assert_eq!(to, ClusterPhase::Scaling),
            _ => panic!("Expected successful transition to Scaling"),
        }
    }

    #[test]
    fn test_ready_to_upgrading_needs_no_spec_flag() {
        // The nested upgrade state is the evidence; it outlives the
        // generation observation.
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(3, 3);
        let result = sm.transition(&ClusterPhase::Ready, ClusterEvent::UpgradeDetected, &ctx);
        match result {
            TransitionResult::Success { to, .. } => assert_eq!(to, ClusterPhase::Upgrading),
            _ => panic!("Expected successful transition to Upgrading"),
        }
    }

    #[test]
    fn test_upgrade_and_scale_return_to_ready() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(3, 3);

        let result = sm.transition(&ClusterPhase::Upgrading, ClusterEvent::UpgradeCompleted, &ctx);
        assert!(matches!(
            result,
            TransitionResult::Success { to: ClusterPhase::Ready, .. }
        ));

        let result = sm.transition(&ClusterPhase::Scaling, ClusterEvent::ScaleCompleted, &ctx);
        assert!(matches!(
            result,
            TransitionResult::Success { to: ClusterPhase::Ready, .. }
        ));
    }

    #[test]
    fn test_any_phase_to_failed() {
        let sm = ClusterStateMachine::new();
        for phase in [
            ClusterPhase::Empty,
            ClusterPhase::Initializing,
            ClusterPhase::Forming,
            ClusterPhase::Ready,
            ClusterPhase::Upgrading,
            ClusterPhase::Scaling,
        ] {
            assert!(
                sm.can_transition(&phase, &ClusterEvent::ReconcileError),
                "phase {:?} should allow error transition",
                phase
            );
        }
    }

    #[test]
    fn test_failed_recovers_on_spec_correction() {
        let sm = ClusterStateMachine::new();

        let ctx = TransitionContext::new(0, 3).with_spec_changed(true);
        let result = sm.transition(&ClusterPhase::Failed, ClusterEvent::SpecCorrected, &ctx);
        assert!(matches!(
            result,
            TransitionResult::Success { to: ClusterPhase::Initializing, .. }
        ));

        // Unchanged spec stays Failed.
        let ctx = TransitionContext::new(0, 3);
        let result = sm.transition(&ClusterPhase::Failed, ClusterEvent::SpecCorrected, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_invalid_transition() {
        let sm = ClusterStateMachine::new();
        let ctx = TransitionContext::new(3, 3);

        // Cannot jump from Empty straight to Ready.
        let result = sm.transition(&ClusterPhase::Empty, ClusterEvent::ClusterFormed, &ctx);
        assert!(matches!(result, TransitionResult::InvalidTransition { .. }));
    }

    #[test]
    fn test_ready_has_no_backward_transition() {
        let sm = ClusterStateMachine::new();
        assert!(!sm.can_transition(&ClusterPhase::Ready, &ClusterEvent::ResourcesApplied));
        assert!(!sm.can_transition(&ClusterPhase::Ready, &ClusterEvent::PodsRunning));
    }
}
