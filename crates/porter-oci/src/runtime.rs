//! OCI Runtime Specification types.
//!
//! The subset of the runtime spec this engine consumes: root, process,
//! mounts, and the Linux block it has to rewrite on export. Fields the
//! engine never touches are not modeled.
//!
//! <https://github.com/opencontainers/runtime-spec/blob/main/config.md>

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// OCI Runtime Specification (config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// OCI version.
    #[serde(default = "default_oci_version")]
    pub oci_version: String,

    /// Container's root filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,

    /// Container process configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<Process>,

    /// Container hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Additional mounts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,

    /// Annotations (key-value pairs).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,

    /// Linux-specific configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
}

fn default_oci_version() -> String {
    "1.2.0".to_string()
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            oci_version: default_oci_version(),
            root: None,
            process: None,
            hostname: None,
            mounts: Vec::new(),
            annotations: HashMap::new(),
            linux: None,
        }
    }
}

impl Spec {
    /// Prepare the spec for export into a container's `config.json`.
    ///
    /// Seccomp is applied before this engine runs and is not re-exported;
    /// the returned copy has it cleared.
    #[must_use]
    pub fn for_export(&self) -> Self {
        let mut spec = self.clone();
        if let Some(linux) = spec.linux.as_mut() {
            linux.seccomp = None;
        }
        spec
    }
}

/// Root filesystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    /// Path to the root filesystem.
    pub path: PathBuf,

    /// Whether the root filesystem is read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Whether to run with a terminal.
    #[serde(default)]
    pub terminal: bool,

    /// User to run as.
    #[serde(default)]
    pub user: User,

    /// Command arguments.
    pub args: Vec<String>,

    /// Environment variables, as KEY=value strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// Working directory.
    pub cwd: PathBuf,

    /// No new privileges flag.
    #[serde(default)]
    pub no_new_privileges: bool,
}

/// User and group IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID.
    pub uid: u32,
    /// Group ID.
    pub gid: u32,
    /// Additional group IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

impl Default for User {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            additional_gids: Vec::new(),
        }
    }
}

/// Mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    /// Mount destination path (inside container).
    pub destination: PathBuf,
    /// Mount type (e.g., "bind", "tmpfs", "proc").
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    /// Mount source path (outside container).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Mount options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Linux-specific configuration.
///
/// Namespaces and seccomp are applied by the caller before
/// `CreateContainer` runs; they are carried only so `config.json` exports
/// round-trip, with seccomp cleared (see [`Spec::for_export`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// Namespaces to create/join.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<Namespace>,
    /// Seccomp configuration, kept opaque.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seccomp: Option<serde_json::Value>,
    /// Rootfs propagation mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rootfs_propagation: Option<String>,
}

/// Namespace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace type.
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
    /// Path to existing namespace (to join instead of create).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Namespace types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// PID namespace.
    Pid,
    /// Network namespace.
    Network,
    /// Mount namespace.
    Mount,
    /// IPC namespace.
    Ipc,
    /// UTS namespace.
    Uts,
    /// User namespace.
    User,
    /// Cgroup namespace.
    Cgroup,
    /// Time namespace.
    Time,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_spec() {
        let json = r#"{
            "ociVersion": "1.0.0",
            "process": {
                "args": ["/bin/sh"],
                "cwd": "/"
            },
            "root": {"path": "rootfs"},
            "mounts": [
                {
                    "destination": "/proc",
                    "type": "proc",
                    "source": "proc"
                },
                {
                    "destination": "/mnt/data",
                    "type": "bind",
                    "source": "/data",
                    "options": ["rbind", "rw"]
                }
            ]
        }"#;

        let spec: Spec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.oci_version, "1.0.0");
        assert_eq!(spec.mounts.len(), 2);
        assert_eq!(spec.mounts[0].mount_type.as_deref(), Some("proc"));
        assert_eq!(spec.mounts[1].options, vec!["rbind", "rw"]);
        let process = spec.process.unwrap();
        assert_eq!(process.args, vec!["/bin/sh"]);
        assert_eq!(process.user.uid, 0);
    }

    #[test]
    fn export_clears_seccomp() {
        let mut spec = Spec::default();
        spec.linux = Some(Linux {
            namespaces: Vec::new(),
            seccomp: Some(serde_json::json!({"defaultAction": "SCMP_ACT_ALLOW"})),
            rootfs_propagation: None,
        });

        let exported = spec.for_export();
        assert!(exported.linux.unwrap().seccomp.is_none());
        // The original is untouched.
        assert!(spec.linux.unwrap().seccomp.is_some());
    }

    #[test]
    fn mount_type_field_renames() {
        let mount = Mount {
            destination: "/proc".into(),
            mount_type: Some("proc".to_string()),
            source: Some("proc".into()),
            options: Vec::new(),
        };
        let json = serde_json::to_string(&mount).unwrap();
        assert!(json.contains("\"type\":\"proc\""));
    }
}
