//! Validation of the LBRegistrar spec.
//!
//! Runs before the provider is built. Every failure here is a
//! configuration error.

use crate::controller::error::{Error, Result};
use crate::crd::{LBRegistrarSpec, ServiceReference};

/// Validate the registrar spec
pub fn validate_spec(spec: &LBRegistrarSpec) -> Result<()> {
    require("loadBalancerId", &spec.load_balancer_id)?;
    require("backendSetName", &spec.backend_set_name)?;
    validate_api_key(spec)?;
    validate_port_source(spec)?;
    for (index, reference) in spec.services.iter().enumerate() {
        validate_reference(&format!("services[{index}]"), reference)?;
    }
    if let Some(ref service) = spec.service {
        validate_reference("service", service)?;
    }
    Ok(())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn validate_api_key(spec: &LBRegistrarSpec) -> Result<()> {
    let api_key = &spec.api_key;
    require("apiKey.user", &api_key.user)?;
    require("apiKey.fingerprint", &api_key.fingerprint)?;
    require("apiKey.tenancy", &api_key.tenancy)?;
    require("apiKey.region", &api_key.region)?;
    require(
        "apiKey.privateKey.secretKeyRef.name",
        &api_key.private_key.secret_key_ref.name,
    )?;
    require(
        "apiKey.privateKey.secretKeyRef.key",
        &api_key.private_key.secret_key_ref.key,
    )
}

/// At least one of nodePort, port, service or services must yield a port.
fn validate_port_source(spec: &LBRegistrarSpec) -> Result<()> {
    if spec.node_port < 0 || spec.port < 0 {
        return Err(Error::Validation(
            "nodePort and port must not be negative".to_string(),
        ));
    }
    if spec.node_port == 0 && spec.port == 0 && spec.service.is_none() && spec.services.is_empty()
    {
        return Err(Error::Validation(
            "one of nodePort, port, service or services must be set".to_string(),
        ));
    }
    Ok(())
}

fn validate_reference(field: &str, reference: &ServiceReference) -> Result<()> {
    require(&format!("{field}.name"), &reference.name)?;
    require(&format!("{field}.namespace"), &reference.namespace)?;
    Ok(())
}
