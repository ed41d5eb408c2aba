//! Memory sizing and version-family detection.
//!
//! Derives Neo4j heap and page-cache settings from the container memory
//! limit, and detects which configuration dialect the target image speaks.
//! SemVer releases (5.x) and CalVer releases (2025.x and later) name their
//! cluster discovery parameters differently.

use semver::Version;
use thiserror::Error;

/// Errors from quantity or version parsing.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Invalid memory quantity: {0}")]
    InvalidQuantity(String),

    #[error("Unrecognized image tag: {0}")]
    InvalidVersion(String),
}

/// Minimum heap the operator will configure.
const MIN_HEAP_BYTES: u64 = 256 * MIB;
/// JVM compressed-oops ceiling; heap above this wastes memory.
const MAX_HEAP_BYTES: u64 = 31 * GIB;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Parse a Kubernetes quantity string ("4Gi", "512Mi", "2G", "1073741824")
/// into bytes.
pub fn parse_quantity(quantity: &str) -> Result<u64, MemoryError> {
    let q = quantity.trim();
    if q.is_empty() {
        return Err(MemoryError::InvalidQuantity(quantity.to_string()));
    }

    let (number, suffix) = match q.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => q.split_at(idx),
        None => (q, ""),
    };

    let value: f64 = number
        .parse()
        .map_err(|_| MemoryError::InvalidQuantity(quantity.to_string()))?;

    let multiplier: u64 = match suffix {
        "" => 1,
        "k" | "K" => 1000,
        "M" => 1000 * 1000,
        "G" => 1000 * 1000 * 1000,
        "T" => 1000 * 1000 * 1000 * 1000,
        "Ki" => KIB,
        "Mi" => MIB,
        "Gi" => GIB,
        "Ti" => 1024 * GIB,
        _ => return Err(MemoryError::InvalidQuantity(quantity.to_string())),
    };

    Ok((value * multiplier as f64) as u64)
}

/// Format bytes as a JVM-style size value ("512m", "2g").
///
/// Rounds down to whole mebibytes; whole gibibytes render as "Ng".
fn format_jvm_size(bytes: u64) -> String {
    let mib = bytes / MIB;
    if mib >= 1024 && mib % 1024 == 0 {
        format!("{}g", mib / 1024)
    } else {
        format!("{}m", mib)
    }
}

/// Derived memory settings for a server pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySettings {
    /// JVM heap size (initial == max, avoids resize pauses).
    pub heap: String,
    /// Page cache size for the store files.
    pub page_cache: String,
}

impl MemorySettings {
    /// Derive heap and page cache from the container memory limit.
    ///
    /// An eighth of the limit (at least 512Mi) is reserved for JVM native
    /// overhead and the OS; of the remainder, 40% goes to heap (clamped to
    /// the compressed-oops ceiling) and the rest to the page cache.
    pub fn from_limit(memory_limit: &str) -> Result<Self, MemoryError> {
        let limit = parse_quantity(memory_limit)?;

        let overhead = (limit / 8).max(512 * MIB).min(limit / 2);
        let available = limit - overhead;

        let heap = ((available * 2) / 5).clamp(MIN_HEAP_BYTES, MAX_HEAP_BYTES);
        let page_cache = available.saturating_sub(heap).max(64 * MIB);

        Ok(Self {
            heap: format_jvm_size(heap),
            page_cache: format_jvm_size(page_cache),
        })
    }
}

/// Configuration dialect spoken by the target Neo4j version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionFamily {
    /// SemVer 5.x releases.
    SemVer5,
    /// CalVer releases (2025.x and later), discovery v2 only.
    CalVer,
}

impl VersionFamily {
    /// Parameter holding the list of discovery endpoints.
    pub fn discovery_endpoints_key(&self) -> &'static str {
        match self {
            VersionFamily::SemVer5 => "dbms.cluster.discovery.endpoints",
            VersionFamily::CalVer => "dbms.cluster.discovery.v2.endpoints",
        }
    }
}

/// Detect the version family from an image tag like "5.26.0-enterprise" or
/// "2025.01.0-enterprise".
pub fn version_family(tag: &str) -> Result<VersionFamily, MemoryError> {
    let base = tag.split('-').next().unwrap_or(tag);

    // CalVer majors are years; anything >= 2025 is the new dialect.
    let major: u64 = base
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .ok_or_else(|| MemoryError::InvalidVersion(tag.to_string()))?;

    if major >= 2025 {
        return Ok(VersionFamily::CalVer);
    }

    // Validate the remainder parses as a SemVer release.
    let padded = match base.matches('.').count() {
        0 => format!("{}.0.0", base),
        1 => format!("{}.0", base),
        _ => base.to_string(),
    };
    Version::parse(&padded).map_err(|_| MemoryError::InvalidVersion(tag.to_string()))?;

    if major == 5 {
        Ok(VersionFamily::SemVer5)
    } else {
        Err(MemoryError::InvalidVersion(tag.to_string()))
    }
}

/// Compare two image tags for upgrade ordering. Returns true when `target`
/// is a different version than `current` (direction is irrelevant: a
/// reverted spec is treated as a new upgrade in the opposite direction).
pub fn versions_differ(current: &str, target: &str) -> bool {
    current.split('-').next() != target.split('-').next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("1Gi").unwrap(), GIB);
        assert_eq!(parse_quantity("512Mi").unwrap(), 512 * MIB);
        assert_eq!(parse_quantity("2G").unwrap(), 2_000_000_000);
        assert_eq!(parse_quantity("1024").unwrap(), 1024);
        assert!(parse_quantity("abc").is_err());
        assert!(parse_quantity("").is_err());
    }

    #[test]
    fn test_memory_settings_4gi() {
        let settings = MemorySettings::from_limit("4Gi").unwrap();
        // 4Gi limit, 512Mi overhead -> 3.5Gi available.
        // Heap 40% = 1433Mi, page cache the rest.
        assert_eq!(settings.heap, "1433m");
        assert_eq!(settings.page_cache, "2150m");
    }

    #[test]
    fn test_memory_settings_small_limit() {
        let settings = MemorySettings::from_limit("1Gi").unwrap();
        // Heap never drops below 256Mi.
        assert_eq!(settings.heap, "256m");
    }

    #[test]
    fn test_memory_settings_heap_ceiling() {
        let settings = MemorySettings::from_limit("256Gi").unwrap();
        // Compressed-oops ceiling.
        assert_eq!(settings.heap, "31g");
    }

    #[test]
    fn test_memory_settings_deterministic() {
        let a = MemorySettings::from_limit("8Gi").unwrap();
        let b = MemorySettings::from_limit("8Gi").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_version_family_semver() {
        assert_eq!(
            version_family("5.26.0-enterprise").unwrap(),
            VersionFamily::SemVer5
        );
        assert_eq!(version_family("5.26-enterprise").unwrap(), VersionFamily::SemVer5);
    }

    #[test]
    fn test_version_family_calver() {
        assert_eq!(
            version_family("2025.01.0-enterprise").unwrap(),
            VersionFamily::CalVer
        );
    }

    #[test]
    fn test_version_family_invalid() {
        assert!(version_family("latest").is_err());
        assert!(version_family("4.4.0").is_err());
    }

    #[test]
    fn test_discovery_keys_differ_by_family() {
        assert_eq!(
            VersionFamily::SemVer5.discovery_endpoints_key(),
            "dbms.cluster.discovery.endpoints"
        );
        assert_eq!(
            VersionFamily::CalVer.discovery_endpoints_key(),
            "dbms.cluster.discovery.v2.endpoints"
        );
    }

    #[test]
    fn test_versions_differ() {
        assert!(versions_differ("5.25.0-enterprise", "5.26.0-enterprise"));
        assert!(!versions_differ("5.26.0-enterprise", "5.26.0-enterprise"));
        // Downgrade is still a difference (rollback is a new upgrade).
        assert!(versions_differ("5.26.0-enterprise", "5.25.0-enterprise"));
    }
}
