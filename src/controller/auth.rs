//! Database credential lookup.
//!
//! The neo4j user password lives in a user-provided Secret; every component
//! that talks Bolt (formation checks, upgrade health gate, split-brain
//! detector) resolves it fresh per cycle.

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tracing::warn;

use crate::controller::error::{Error, Result};
use crate::crd::SecretKeyRef;

/// Fetch the database password from the referenced Secret.
///
/// Returns `None` when the secret or key does not exist yet: callers treat
/// that as "cannot query the database this cycle", not a failure.
pub async fn get_auth_password(
    client: &Client,
    namespace: &str,
    secret_ref: &SecretKeyRef,
) -> Result<Option<String>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

    match api.get_opt(&secret_ref.name).await? {
        Some(secret) => {
            if let Some(data) = secret.data {
                if let Some(bytes) = data.get(&secret_ref.key) {
                    let password = String::from_utf8(bytes.0.clone())
                        .map_err(|e| Error::Validation(format!("Invalid password encoding: {}", e)))?;
                    return Ok(Some(password));
                }
            }
            warn!(
                secret = %secret_ref.name,
                key = %secret_ref.key,
                "Password key not found in secret"
            );
            Ok(None)
        }
        None => {
            warn!(secret = %secret_ref.name, "Auth secret not found");
            Ok(None)
        }
    }
}
