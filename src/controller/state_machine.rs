//! Finite state machine for the LBRegistrar lifecycle.
//!
//! Every phase change goes through this transition table. An event that has
//! no transition from the current phase leaves the phase unchanged.
//!
//! ```text
//!  New ──Accepted──> Pending ──ProviderVerified──> Registering ──BackendsSynced──> Ready
//!                     ^   ^                          │    ^                          │
//!                     │   └────ProviderFailed────────┘    └──SyncFailed──┘           │
//!                     └──────NodeTopologyChanged / EndpointsChanged / SpecChanged───┘
//! ```

use std::fmt;

use crate::crd::Phase;

/// Events that trigger state transitions in the registrar lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrarEvent {
    /// A new registrar was picked up
    Accepted,
    /// Credentials resolved and the backend set is reachable
    ProviderVerified,
    /// The provider could not be built
    ProviderFailed,
    /// Every backend set was updated
    BackendsSynced,
    /// A backend set update failed
    SyncFailed,
    /// A node joined or left the cluster
    NodeTopologyChanged,
    /// Endpoints of a filtered service changed
    EndpointsChanged,
    /// The registrar spec was edited
    SpecChanged,
}

impl fmt::Display for RegistrarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrarEvent::Accepted => write!(f, "Accepted"),
            RegistrarEvent::ProviderVerified => write!(f, "ProviderVerified"),
            RegistrarEvent::ProviderFailed => write!(f, "ProviderFailed"),
            RegistrarEvent::BackendsSynced => write!(f, "BackendsSynced"),
            RegistrarEvent::SyncFailed => write!(f, "SyncFailed"),
            RegistrarEvent::NodeTopologyChanged => write!(f, "NodeTopologyChanged"),
            RegistrarEvent::EndpointsChanged => write!(f, "EndpointsChanged"),
            RegistrarEvent::SpecChanged => write!(f, "SpecChanged"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
    pub event: RegistrarEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: Phase,
        to: Phase,
        event: RegistrarEvent,
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
#[derive(Debug)]
pub enum TransitionResult {
    Success {
        from: Phase,
        to: Phase,
        event: RegistrarEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: Phase,
        event: RegistrarEvent,
    },
}

impl TransitionResult {
    /// Phase after the attempt; the current phase when it was rejected.
    pub fn phase(&self) -> Phase {
        match self {
            TransitionResult::Success { to, .. } => *to,
            TransitionResult::InvalidTransition { current, .. } => *current,
        }
    }
}

/// State machine for the LBRegistrar lifecycle
pub struct RegistrarStateMachine {
    transitions: Vec<Transition>,
}

impl Default for RegistrarStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrarStateMachine {
    pub fn new() -> Self {
        Self {
            transitions: vec![
                // === New ===
                Transition::new(
                    Phase::New,
                    Phase::Pending,
                    RegistrarEvent::Accepted,
                    "Registrar accepted",
                ),
                // === Pending ===
                Transition::new(
                    Phase::Pending,
                    Phase::Registering,
                    RegistrarEvent::ProviderVerified,
                    "Provider verified, registering backends",
                ),
                Transition::new(
                    Phase::Pending,
                    Phase::Pending,
                    RegistrarEvent::ProviderFailed,
                    "Provider unavailable, will retry",
                ),
                // === Registering ===
                Transition::new(
                    Phase::Registering,
                    Phase::Ready,
                    RegistrarEvent::BackendsSynced,
                    "Backends registered",
                ),
                Transition::new(
                    Phase::Registering,
                    Phase::Pending,
                    RegistrarEvent::ProviderFailed,
                    "Provider configuration broke during registration",
                ),
                Transition::new(
                    Phase::Registering,
                    Phase::Registering,
                    RegistrarEvent::SyncFailed,
                    "Registration failed, will retry",
                ),
                Transition::new(
                    Phase::Registering,
                    Phase::Pending,
                    RegistrarEvent::NodeTopologyChanged,
                    "Node topology changed during registration",
                ),
                Transition::new(
                    Phase::Registering,
                    Phase::Pending,
                    RegistrarEvent::EndpointsChanged,
                    "Service endpoints changed during registration",
                ),
                // === Ready ===
                Transition::new(
                    Phase::Ready,
                    Phase::Pending,
                    RegistrarEvent::NodeTopologyChanged,
                    "Node topology changed",
                ),
                Transition::new(
                    Phase::Ready,
                    Phase::Pending,
                    RegistrarEvent::EndpointsChanged,
                    "Service endpoints changed",
                ),
                Transition::new(
                    Phase::Ready,
                    Phase::Pending,
                    RegistrarEvent::SpecChanged,
                    "Registrar spec changed",
                ),
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(&self, current: &Phase, event: RegistrarEvent) -> TransitionResult {
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

    /// Phase reached by `event` from `current`.
    pub fn next_phase(&self, current: &Phase, event: RegistrarEvent) -> Phase {
        self.transition(current, event).phase()
    }

    pub fn can_transition(&self, from: &Phase, event: &RegistrarEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }
}
