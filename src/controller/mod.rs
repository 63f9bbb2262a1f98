//! Controller module for lb-registrar-operator.
//!
//! Contains the reconciliation loop, phase handlers, state machine, error
//! handling, status writes, validation and the change triggers.

pub mod context;
pub mod error;
pub mod phases;
pub mod reconciler;
pub mod registration;
pub mod state_machine;
pub mod status;
pub mod triggers;
pub mod validation;
