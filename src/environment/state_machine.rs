//! Finite state machine for the environment lifecycle.
//!
//! Every setup phase is one transition. A failed setup phase jumps straight to
//! `Reporting`, and a skipped suite leaves `NotStarted` for the terminal
//! `Skipped` state without touching the cluster.

use std::fmt;

/// Lifecycle states of one test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    NotStarted,
    Provisioning,
    LoggingReady,
    PoolScaled,
    BootstrapReady,
    ClientsReady,
    GenesisSynced,
    Running,
    Reporting,
    Done,
    Skipped,
}

impl LifecycleState {
    /// Setup states from which a failure is reported instead of propagated.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            LifecycleState::Provisioning
                | LifecycleState::LoggingReady
                | LifecycleState::PoolScaled
                | LifecycleState::BootstrapReady
                | LifecycleState::ClientsReady
                | LifecycleState::GenesisSynced
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Done | LifecycleState::Skipped)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events that trigger lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Suite or all of its scenarios are marked to skip
    SkipRequested,
    /// Setup begins with namespace provisioning
    SetupStarted,
    /// Logging stack accepts traffic
    LoggingStackReady,
    /// Compute pool schedulable and log collector running on it
    PoolReady,
    /// Bootstrap pods ready and timing service initialized
    BootstrapDeployed,
    /// Client pods ready
    ClientsDeployed,
    /// Genesis instant reached
    GenesisReached,
    /// Scenario code starts
    ScenariosStarted,
    /// Scenario code finished, whatever the result
    ScenariosFinished,
    /// A setup phase failed
    SetupFailed,
    /// Teardown task submitted
    Reported,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub event: LifecycleEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
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

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: LifecycleState,
        event: LifecycleEvent,
    },
}

/// Transition table for one test run
pub struct LifecycleStateMachine {
    transitions: Vec<Transition>,
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleStateMachine {
    pub fn new() -> Self {
        use LifecycleEvent as E;
        use LifecycleState as S;

        let mut transitions = vec![
            Transition::new(S::NotStarted, S::Skipped, E::SkipRequested, "Run skipped"),
            Transition::new(
                S::NotStarted,
                S::Provisioning,
                E::SetupStarted,
                "Provisioning namespace",
            ),
            Transition::new(
                S::Provisioning,
                S::LoggingReady,
                E::LoggingStackReady,
                "Logging stack is serving",
            ),
            Transition::new(
                S::LoggingReady,
                S::PoolScaled,
                E::PoolReady,
                "Node pool is schedulable",
            ),
            Transition::new(
                S::PoolScaled,
                S::BootstrapReady,
                E::BootstrapDeployed,
                "Bootstrap node ready and timing service started",
            ),
            Transition::new(
                S::BootstrapReady,
                S::ClientsReady,
                E::ClientsDeployed,
                "Client nodes ready",
            ),
            Transition::new(
                S::ClientsReady,
                S::GenesisSynced,
                E::GenesisReached,
                "Genesis instant reached",
            ),
            Transition::new(
                S::GenesisSynced,
                S::Running,
                E::ScenariosStarted,
                "Scenarios running",
            ),
            Transition::new(
                S::Running,
                S::Reporting,
                E::ScenariosFinished,
                "Scenarios finished, reporting result",
            ),
            Transition::new(S::Reporting, S::Done, E::Reported, "Teardown task submitted"),
        ];

        // Any setup state may fail straight into reporting
        for from in [
            S::Provisioning,
            S::LoggingReady,
            S::PoolScaled,
            S::BootstrapReady,
            S::ClientsReady,
            S::GenesisSynced,
        ] {
            transitions.push(Transition::new(
                from,
                S::Reporting,
                E::SetupFailed,
                "Setup failed, reporting failure",
            ));
        }

        Self { transitions }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(&self, current: &LifecycleState, event: LifecycleEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid
    pub fn can_transition(&self, from: &LifecycleState, event: &LifecycleEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_sequence() {
        let sm = LifecycleStateMachine::new();
        let events = [
            LifecycleEvent::SetupStarted,
            LifecycleEvent::LoggingStackReady,
            LifecycleEvent::PoolReady,
            LifecycleEvent::BootstrapDeployed,
            LifecycleEvent::ClientsDeployed,
            LifecycleEvent::GenesisReached,
            LifecycleEvent::ScenariosStarted,
            LifecycleEvent::ScenariosFinished,
            LifecycleEvent::Reported,
        ];

        let mut state = LifecycleState::NotStarted;
        for event in events {
            match sm.transition(&state, event) {
                TransitionResult::Success { to, .. } => state = to,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(state, LifecycleState::Done);
    }

    #[test]
    fn test_skip_only_from_not_started() {
        let sm = LifecycleStateMachine::new();
        assert!(sm.can_transition(&LifecycleState::NotStarted, &LifecycleEvent::SkipRequested));
        assert!(!sm.can_transition(
            &LifecycleState::Provisioning,
            &LifecycleEvent::SkipRequested
        ));
        assert!(!sm.can_transition(&LifecycleState::Running, &LifecycleEvent::SkipRequested));
    }

    #[test]
    fn test_setup_failure_from_every_setup_state() {
        let sm = LifecycleStateMachine::new();
        for state in [
            LifecycleState::Provisioning,
            LifecycleState::LoggingReady,
            LifecycleState::PoolScaled,
            LifecycleState::BootstrapReady,
            LifecycleState::ClientsReady,
            LifecycleState::GenesisSynced,
        ] {
            assert!(state.is_setup());
            let result = sm.transition(&state, LifecycleEvent::SetupFailed);
            assert!(
                matches!(
                    result,
                    TransitionResult::Success {
                        to: LifecycleState::Reporting,
                        ..
                    }
                ),
                "{state} should fail into Reporting"
            );
        }
    }

    #[test]
    fn test_running_cannot_fail_setup() {
        let sm = LifecycleStateMachine::new();
        let result = sm.transition(&LifecycleState::Running, LifecycleEvent::SetupFailed);
        assert!(matches!(result, TransitionResult::InvalidTransition { .. }));
    }

    #[test]
    fn test_terminal_states_have_no_events() {
        let sm = LifecycleStateMachine::new();
        let events = [
            LifecycleEvent::SkipRequested,
            LifecycleEvent::SetupStarted,
            LifecycleEvent::LoggingStackReady,
            LifecycleEvent::PoolReady,
            LifecycleEvent::BootstrapDeployed,
            LifecycleEvent::ClientsDeployed,
            LifecycleEvent::GenesisReached,
            LifecycleEvent::ScenariosStarted,
            LifecycleEvent::ScenariosFinished,
            LifecycleEvent::SetupFailed,
            LifecycleEvent::Reported,
        ];
        for event in &events {
            assert!(!sm.can_transition(&LifecycleState::Done, event));
            assert!(!sm.can_transition(&LifecycleState::Skipped, event));
        }
        assert!(LifecycleState::Done.is_terminal());
        assert!(LifecycleState::Skipped.is_terminal());
    }

    #[test]
    fn test_reporting_only_reachable_once() {
        let sm = LifecycleStateMachine::new();
        // Reported moves to Done, and Done accepts nothing
        assert!(!sm.can_transition(&LifecycleState::Done, &LifecycleEvent::Reported));
    }
}
