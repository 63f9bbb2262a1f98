//! LBRegistrar Custom Resource Definition.
//!
//! An LBRegistrar ties one OCI load balancer backend set to the nodes of the
//! cluster, optionally narrowed to the nodes serving a set of services.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker that identifies a network load balancer OCID.
pub const NETWORK_LOAD_BALANCER_MARKER: &str = ".networkloadbalancer.";

/// LBRegistrar registers cluster nodes as backends of a load balancer.
///
/// Example:
/// ```yaml
/// apiVersion: nodes.peppy-ratio.dev/v1alpha1
/// kind: LBRegistrar
/// metadata:
///   name: ingress-http
/// spec:
///   loadBalancerId: ocid1.loadbalancer.oc1.ap-tokyo-1.xxxx
///   backendSetName: http
///   weight: 1
///   services:
///     - name: ingress-nginx
///       namespace: ingress
///       port: http
///       filterByEndpoints: true
///   apiKey:
///     user: ocid1.user.oc1..xxxx
///     fingerprint: "12:34:..."
///     tenancy: ocid1.tenancy.oc1..xxxx
///     region: ap-tokyo-1
///     privateKey:
///       namespace: oci-lb
///       secretKeyRef:
///         name: oci-api-key
///         key: private-key
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "nodes.peppy-ratio.dev",
    version = "v1alpha1",
    kind = "LBRegistrar",
    plural = "lbregistrars",
    shortname = "lbr",
    status = "LBRegistrarStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Backend Set", "type":"string", "jsonPath":".spec.backendSetName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LBRegistrarSpec {
    /// OCID of the classic or network load balancer.
    pub load_balancer_id: String,

    /// Explicit node port used when no service is referenced.
    #[serde(default)]
    pub node_port: i32,

    /// Deprecated explicit port. Takes precedence over `nodePort` and the
    /// port resolved from the legacy `service`.
    #[serde(default)]
    pub port: i32,

    /// Legacy single service whose node port is registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceReference>,

    /// Services registered independently of each other.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceReference>,

    /// Default backend weight (default 1).
    #[serde(default = "default_weight")]
    pub weight: i32,

    /// Default backend set name.
    pub backend_set_name: String,

    /// OCI API signing key reference.
    pub api_key: ApiKeySpec,
}

fn default_weight() -> i32 {
    1
}

/// Reference to a NodePort service.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReference {
    pub name: String,
    pub namespace: String,

    /// Service port, by number or by name.
    #[schemars(schema_with = "int_or_string_schema")]
    pub port: IntOrString,

    /// Register only the nodes hosting ready endpoints of this service.
    #[serde(default)]
    pub filter_by_endpoints: bool,

    /// Overrides the declaration weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,

    /// Overrides the declaration backend set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_set_name: Option<String>,
}

impl ServiceReference {
    /// `namespace/name` form used in logs and events.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Whether this reference points at the given service.
    pub fn targets(&self, namespace: &str, name: &str) -> bool {
        self.namespace == namespace && self.name == name
    }
}

/// OCI API signing key identity.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySpec {
    pub user: String,
    pub fingerprint: String,
    pub tenancy: String,
    pub region: String,
    pub private_key: PrivateKeyRef,
}

/// Location of the PEM-encoded private key.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeyRef {
    /// Secret namespace. Defaults to the operator namespace.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub secret_key_ref: SecretKeyRef,
}

/// Key within a Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Observed state of an LBRegistrar.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LBRegistrarStatus {
    #[serde(default)]
    #[schemars(schema_with = "phase_schema")]
    pub phase: Phase,

    /// Generation the phase was last derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Registration progress of an LBRegistrar.
///
/// Persisted as `""`, `PENDING`, `REGISTERING` or `READY`. Anything else
/// read back from the API is treated as `New`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Not yet picked up.
    #[default]
    New,
    /// Credentials and load balancer reachability must be (re)checked.
    Pending,
    /// Backends are being computed and pushed.
    Registering,
    /// Backend set matches the cluster.
    Ready,
}

impl Phase {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::New => "",
            Phase::Pending => "PENDING",
            Phase::Registering => "REGISTERING",
            Phase::Ready => "READY",
        }
    }

    /// Parse a persisted value, normalizing unknown values to `New`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "PENDING" => Phase::Pending,
            "REGISTERING" => Phase::Registering,
            "READY" => Phase::Ready,
            _ => Phase::New,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::New => write!(f, "New"),
            Phase::Pending => write!(f, "Pending"),
            Phase::Registering => write!(f, "Registering"),
            Phase::Ready => write!(f, "Ready"),
        }
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map(Phase::from_wire).unwrap_or_default())
    }
}

fn phase_schema(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(
            [Phase::New, Phase::Pending, Phase::Registering, Phase::Ready]
                .iter()
                .map(|p| serde_json::Value::String(p.as_str().to_string()))
                .collect(),
        ),
        ..Default::default()
    })
}

fn int_or_string_schema(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema.extensions.insert(
        "x-kubernetes-int-or-string".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

impl LBRegistrarSpec {
    /// Whether the multi-service list drives registration.
    pub fn uses_service_list(&self) -> bool {
        !self.services.is_empty()
    }

    /// All service references, legacy one first.
    pub fn service_references(&self) -> impl Iterator<Item = &ServiceReference> {
        self.service.iter().chain(self.services.iter())
    }

    /// Whether a change to the endpoints `namespace/name` affects this
    /// declaration's backend membership.
    pub fn filters_on_endpoints_of(&self, namespace: &str, name: &str) -> bool {
        self.service_references()
            .any(|s| s.filter_by_endpoints && s.targets(namespace, name))
    }
}

impl LBRegistrar {
    /// Current phase, `New` when no status has been written.
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Generation the current phase was derived from.
    pub fn observed_generation(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.observed_generation)
    }

    /// Whether the spec changed since the phase was last derived.
    pub fn spec_changed(&self) -> bool {
        match (self.observed_generation(), self.metadata.generation) {
            (Some(observed), Some(current)) => observed != current,
            _ => false,
        }
    }
}
