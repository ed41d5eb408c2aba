//! Certificate resource generation for cert-manager integration.
//!
//! Issuance is delegated entirely to cert-manager; the operator only
//! declares a Certificate with the DNS SANs every server and the client
//! service answer on.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::crd::Neo4jCluster;
use crate::resources::common::{
    discovery_service_name, owner_reference, standard_annotations, standard_labels,
};

/// cert-manager Certificate resource.
///
/// Simplified representation of the cert-manager Certificate CRD, applied as
/// a dynamic object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// API version for cert-manager Certificate.
    pub api_version: String,

    /// Kind is always "Certificate".
    pub kind: String,

    /// Standard object metadata.
    pub metadata: ObjectMeta,

    /// Certificate specification.
    pub spec: CertificateSpec,
}

/// Specification for a cert-manager Certificate.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Name of the Secret that will contain the certificate.
    pub secret_name: String,

    /// Reference to the issuer responsible for issuing the certificate.
    pub issuer_ref: CertIssuerRef,

    /// DNS names to include in the certificate.
    pub dns_names: Vec<String>,

    /// Requested certificate validity duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// How long before expiry to renew the certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,

    /// Private key configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKeySpec>,

    /// Key usages for the certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usages: Option<Vec<String>>,
}

/// Reference to a cert-manager Issuer or ClusterIssuer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertIssuerRef {
    /// Name of the issuer.
    pub name: String,

    /// Kind of the issuer (Issuer or ClusterIssuer).
    pub kind: String,

    /// Group of the issuer (typically "cert-manager.io").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Private key configuration for certificates.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKeySpec {
    /// Algorithm for the private key (RSA, ECDSA, Ed25519).
    pub algorithm: String,

    /// Size of the private key in bits.
    pub size: i32,
}

/// Generate the certificate secret name for a Neo4jCluster.
pub fn certificate_secret_name(cluster: &Neo4jCluster) -> String {
    format!("{}-tls", cluster.name_any())
}

/// Generate a cert-manager Certificate resource for the cluster.
///
/// The certificate covers:
/// - every server pod via a wildcard on the discovery service
/// - the client service endpoint
///
/// Returns `None` when the spec has no TLS section.
pub fn generate_certificate(cluster: &Neo4jCluster) -> Option<Certificate> {
    let tls = cluster.spec.tls.as_ref()?;
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let secret_name = certificate_secret_name(cluster);
    let discovery = discovery_service_name(cluster);

    let dns_names = vec![
        // Wildcard for all pod DNS names via the discovery service
        format!("*.{}.{}.svc.cluster.local", discovery, namespace),
        // Client service endpoint
        format!("{}.{}.svc.cluster.local", name, namespace),
        // Short names for in-cluster access
        format!("{}.{}.svc", discovery, namespace),
        format!("{}.{}.svc", name, namespace),
        discovery,
        name,
    ];

    let mut labels = standard_labels(cluster);
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "certificate".to_string(),
    );
    let annotations = standard_annotations(cluster);

    Some(Certificate {
        api_version: "cert-manager.io/v1".to_string(),
        kind: "Certificate".to_string(),
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(namespace),
            labels: Some(labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            owner_references: Some(vec![owner_reference(cluster)]),
            ..Default::default()
        },
        spec: CertificateSpec {
            secret_name,
            issuer_ref: CertIssuerRef {
                name: tls.issuer_ref.name.clone(),
                kind: tls.issuer_ref.kind.clone(),
                group: Some(tls.issuer_ref.group.clone()),
            },
            dns_names,
            duration: Some(tls.duration.clone()),
            renew_before: Some(tls.renew_before.clone()),
            private_key: Some(PrivateKeySpec {
                algorithm: "ECDSA".to_string(),
                size: 256,
            }),
            usages: Some(vec!["server auth".to_string(), "client auth".to_string()]),
        },
    })
}
