//! Fabricated observed state for driving the convergence engine without a
//! cluster.
//!
//! `MockClusterState` holds the evidence a reconciliation would observe
//! (ready pods, membership views, live replicas, upgrade sub-state) and
//! steps the same `determine_cluster_event` + `ClusterStateMachine` pair
//! the driver uses.

use neo4j_operator::controller::reconciler::determine_cluster_event;
use neo4j_operator::controller::state_machine::{
    ClusterStateMachine, TransitionContext, TransitionResult,
};
use neo4j_operator::crd::{ClusterPhase, UpgradePhase};

/// Observed cluster state a reconciliation pass would see.
pub struct MockClusterState {
    pub name: String,
    pub phase: ClusterPhase,
    pub desired_servers: i32,
    pub ready_servers: i32,
    pub live_replicas: i32,
    pub members_with_full_view: i32,
    pub spec_changed: bool,
    pub upgrade_phase: Option<UpgradePhase>,
    machine: ClusterStateMachine,
}

impl MockClusterState {
    /// A cluster that has never been reconciled.
    pub fn fresh(name: &str, servers: i32) -> Self {
        Self {
            name: name.to_string(),
            phase: ClusterPhase::Empty,
            desired_servers: servers,
            ready_servers: 0,
            live_replicas: 0,
            members_with_full_view: 0,
            spec_changed: false,
            upgrade_phase: None,
            machine: ClusterStateMachine::new(),
        }
    }

    /// A healthy Ready cluster.
    pub fn ready(name: &str, servers: i32) -> Self {
        Self {
            name: name.to_string(),
            phase: ClusterPhase::Ready,
            desired_servers: servers,
            ready_servers: servers,
            live_replicas: servers,
            members_with_full_view: servers,
            spec_changed: false,
            upgrade_phase: None,
            machine: ClusterStateMachine::new(),
        }
    }

    /// Edit the spec to a new server count.
    pub fn set_scale(&mut self, servers: i32) {
        self.desired_servers = servers;
        self.spec_changed = true;
    }

    /// Observe the infrastructure catching up to the desired state.
    pub fn infrastructure_converges(&mut self) {
        self.live_replicas = self.desired_servers;
        self.ready_servers = self.desired_servers;
        self.members_with_full_view = self.desired_servers;
    }

    fn transition_ctx(&self) -> TransitionContext {
        TransitionContext {
            ready_servers: self.ready_servers,
            desired_servers: self.desired_servers,
            members_with_full_view: self.members_with_full_view,
            spec_changed: self.spec_changed,
            error_message: None,
        }
    }

    /// Run one reconciliation step; returns the phase afterwards.
    pub fn step(&mut self) -> ClusterPhase {
        let ctx = self.transition_ctx();
        let event = determine_cluster_event(
            self.phase,
            &ctx,
            self.upgrade_phase,
            self.live_replicas,
        );

        if let Some(event) = event {
            if let TransitionResult::Success { to, .. } =
                self.machine.transition(&self.phase, event, &ctx)
            {
                self.phase = to;
                // A transition consumes the generation observation.
                if matches!(
                    to,
                    ClusterPhase::Scaling | ClusterPhase::Upgrading | ClusterPhase::Initializing
                ) {
                    self.spec_changed = false;
                }
            }
        }
        self.phase
    }

}

/// Expected phase sequences for common operations.
pub mod expected_sequences {
    use neo4j_operator::crd::ClusterPhase;

    /// Fresh creation: Empty → Initializing → Forming → Ready.
    pub fn fresh_creation() -> Vec<ClusterPhase> {
        vec![
            ClusterPhase::Empty,
            ClusterPhase::Initializing,
            ClusterPhase::Forming,
            ClusterPhase::Ready,
        ]
    }

    /// Scale: Ready → Scaling → Ready.
    pub fn scale() -> Vec<ClusterPhase> {
        vec![ClusterPhase::Ready, ClusterPhase::Scaling, ClusterPhase::Ready]
    }

    /// Upgrade: Ready → Upgrading → Ready.
    pub fn upgrade() -> Vec<ClusterPhase> {
        vec![ClusterPhase::Ready, ClusterPhase::Upgrading, ClusterPhase::Ready]
    }
}
