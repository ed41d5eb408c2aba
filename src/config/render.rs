//! neo4j.conf rendering.
//!
//! Produces the configuration text stored in the generated ConfigMap. The
//! output is a pure function of the cluster spec: keys are emitted in sorted
//! order so two renders of the same spec are byte-identical. Per-pod values
//! use `$(POD_NAME)` downward-API substitution rather than baking a hostname
//! into the file.

use std::collections::BTreeMap;

use crate::config::memory::{MemorySettings, VersionFamily, version_family};
use crate::crd::Neo4jClusterSpec;

/// Discovery port for cluster membership.
pub const DISCOVERY_PORT: i32 = 5000;
/// Raft transaction shipping port.
pub const RAFT_PORT: i32 = 7000;
/// Bolt client port.
pub const BOLT_PORT: i32 = 7687;
/// HTTP port (browser, health probes).
pub const HTTP_PORT: i32 = 7474;

/// Render the full neo4j.conf text for a cluster.
///
/// `headless_service` and `namespace` shape the stable DNS names of the
/// discovery endpoints; `sts_name` is the StatefulSet name whose ordinals
/// form the endpoint list.
pub fn render_cluster_config(
    spec: &Neo4jClusterSpec,
    sts_name: &str,
    headless_service: &str,
    namespace: &str,
) -> Result<String, crate::config::memory::MemoryError> {
    let memory = MemorySettings::from_limit(&spec.resources.limits.memory)?;
    let family = version_family(&spec.image.tag)?;

    let mut settings = BTreeMap::new();

    // Memory
    settings.insert("server.memory.heap.initial_size".to_string(), memory.heap.clone());
    settings.insert("server.memory.heap.max_size".to_string(), memory.heap);
    settings.insert("server.memory.pagecache.size".to_string(), memory.page_cache);

    // Network. Advertised addresses use the pod identity, substituted by the
    // container entrypoint from the downward API.
    let domain = format!("{}.{}.svc.cluster.local", headless_service, namespace);
    settings.insert(
        "server.default_advertised_address".to_string(),
        format!("$(POD_NAME).{}", domain),
    );
    settings.insert("server.bolt.listen_address".to_string(), format!("0.0.0.0:{}", BOLT_PORT));
    settings.insert("server.http.listen_address".to_string(), format!("0.0.0.0:{}", HTTP_PORT));

    // Clustering
    let servers = spec.topology.servers;
    if servers > 1 {
        let endpoints: Vec<String> = (0..servers)
            .map(|i| format!("{}-{}.{}:{}", sts_name, i, domain, DISCOVERY_PORT))
            .collect();
        settings.insert(
            family.discovery_endpoints_key().to_string(),
            endpoints.join(","),
        );
        if family == VersionFamily::CalVer {
            settings.insert("dbms.cluster.discovery.version".to_string(), "V2_ONLY".to_string());
        }
        settings.insert(
            "dbms.cluster.minimum_initial_system_primaries_count".to_string(),
            servers.to_string(),
        );
        settings.insert(
            "server.cluster.listen_address".to_string(),
            format!("0.0.0.0:{}", DISCOVERY_PORT),
        );
        settings.insert(
            "server.cluster.raft.listen_address".to_string(),
            format!("0.0.0.0:{}", RAFT_PORT),
        );
        settings.insert("initial.server.mode_constraint".to_string(), "NONE".to_string());
    }

    // TLS
    if spec.tls.is_some() {
        settings.insert("dbms.ssl.policy.bolt.enabled".to_string(), "true".to_string());
        settings.insert(
            "dbms.ssl.policy.bolt.base_directory".to_string(),
            "/ssl/bolt".to_string(),
        );
        settings.insert("dbms.ssl.policy.cluster.enabled".to_string(), "true".to_string());
        settings.insert(
            "dbms.ssl.policy.cluster.base_directory".to_string(),
            "/ssl/cluster".to_string(),
        );
    }

    settings.insert(
        "server.directories.data".to_string(),
        "/data".to_string(),
    );
    settings.insert(
        "dbms.security.auth_enabled".to_string(),
        "true".to_string(),
    );

    // User-supplied extras; generated keys win on conflict.
    for (key, value) in &spec.config {
        settings.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let mut out = String::new();
    out.push_str(&format!(
        "# neo4j.conf generated at {}\n",
        jiff::Timestamp::now()
    ));
    for (key, value) in &settings {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }

    Ok(out)
}

/// Render the configuration for a standalone server: same memory and network
/// sections, no clustering block.
pub fn render_standalone_config(
    memory_limit: &str,
    tag: &str,
    service: &str,
    namespace: &str,
    extra: &BTreeMap<String, String>,
) -> Result<String, crate::config::memory::MemoryError> {
    let memory = MemorySettings::from_limit(memory_limit)?;
    version_family(tag)?;

    let mut settings = BTreeMap::new();
    settings.insert("server.memory.heap.initial_size".to_string(), memory.heap.clone());
    settings.insert("server.memory.heap.max_size".to_string(), memory.heap);
    settings.insert("server.memory.pagecache.size".to_string(), memory.page_cache);
    settings.insert(
        "server.default_advertised_address".to_string(),
        format!("{}.{}.svc.cluster.local", service, namespace),
    );
    settings.insert("server.bolt.listen_address".to_string(), format!("0.0.0.0:{}", BOLT_PORT));
    settings.insert("server.http.listen_address".to_string(), format!("0.0.0.0:{}", HTTP_PORT));
    settings.insert("server.directories.data".to_string(), "/data".to_string());
    settings.insert("dbms.security.auth_enabled".to_string(), "true".to_string());

    for (key, value) in extra {
        settings.entry(key.clone()).or_insert_with(|| value.clone());
    }

    let mut out = String::new();
    out.push_str(&format!(
        "# neo4j.conf generated at {}\n",
        jiff::Timestamp::now()
    ));
    for (key, value) in &settings {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AuthSpec, SecretKeyRef};

    fn test_spec(servers: i32, tag: &str) -> Neo4jClusterSpec {
        let mut spec = Neo4jClusterSpec {
            auth: AuthSpec {
                secret_ref: SecretKeyRef {
                    name: "neo4j-auth".to_string(),
                    key: "password".to_string(),
                },
            },
            ..Default::default()
        };
        spec.topology.servers = servers;
        spec.image.tag = tag.to_string();
        spec
    }

    #[test]
    fn test_render_contains_memory_settings() {
        let spec = test_spec(3, "5.26.0-enterprise");
        let conf =
            render_cluster_config(&spec, "graph-server", "graph-discovery", "default").unwrap();

        assert!(conf.contains("server.memory.heap.max_size="));
        assert!(conf.contains("server.memory.pagecache.size="));
    }

    #[test]
    fn test_render_semver_discovery_key() {
        let spec = test_spec(3, "5.26.0-enterprise");
        let conf =
            render_cluster_config(&spec, "graph-server", "graph-discovery", "default").unwrap();

        assert!(conf.contains("dbms.cluster.discovery.endpoints="));
        assert!(!conf.contains("dbms.cluster.discovery.v2.endpoints="));
        assert!(conf.contains(
            "graph-server-0.graph-discovery.default.svc.cluster.local:5000"
        ));
        assert!(conf.contains(
            "graph-server-2.graph-discovery.default.svc.cluster.local:5000"
        ));
    }

    #[test]
    fn test_render_calver_discovery_key() {
        let spec = test_spec(3, "2025.01.0-enterprise");
        let conf =
            render_cluster_config(&spec, "graph-server", "graph-discovery", "default").unwrap();

        assert!(conf.contains("dbms.cluster.discovery.v2.endpoints="));
        assert!(conf.contains("dbms.cluster.discovery.version=V2_ONLY"));
    }

    #[test]
    fn test_render_single_server_has_no_cluster_block() {
        let spec = test_spec(1, "5.26.0-enterprise");
        let conf =
            render_cluster_config(&spec, "graph-server", "graph-discovery", "default").unwrap();

        assert!(!conf.contains("dbms.cluster.discovery"));
        assert!(!conf.contains("minimum_initial_system_primaries_count"));
    }

    #[test]
    fn test_generated_keys_win_over_user_config() {
        let mut spec = test_spec(3, "5.26.0-enterprise");
        spec.config.insert(
            "server.memory.pagecache.size".to_string(),
            "999g".to_string(),
        );
        spec.config
            .insert("db.tx_log.rotation.size".to_string(), "256M".to_string());

        let conf =
            render_cluster_config(&spec, "graph-server", "graph-discovery", "default").unwrap();

        assert!(!conf.contains("999g"));
        assert!(conf.contains("db.tx_log.rotation.size=256M"));
    }

    #[test]
    fn test_render_stable_apart_from_timestamp() {
        let spec = test_spec(3, "5.26.0-enterprise");
        let a = render_cluster_config(&spec, "graph-server", "graph-discovery", "default").unwrap();
        let b = render_cluster_config(&spec, "graph-server", "graph-discovery", "default").unwrap();

        let strip = |s: &str| {
            s.lines()
                .filter(|l| !l.starts_with('#'))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(&a), strip(&b));
    }
}
