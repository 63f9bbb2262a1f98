//! Custom Resource Definitions (CRDs) for lb-registrar-operator.
//!
//! - `LBRegistrar`: Register cluster nodes as backends of an OCI load balancer

mod lb_registrar;

pub use lb_registrar::*;
