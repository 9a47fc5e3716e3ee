// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: JSON configuration for filesystem servers.
// Author: Lukas Bower

//! Server configuration loaded from JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use fs_wire::ProcessId;
use serde::Deserialize;

use crate::cache::EvictionMode;
use crate::error::FsError;
use crate::path::{FsPath, PathError};

/// Server settings. Every field has a default, so `{}` is a valid document.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FsConfig {
    /// Path registered with the namespace.
    pub mount_path: String,
    /// Process id of the server endpoint.
    pub server_pid: u32,
    /// Namespace process; the mount handshake is skipped when absent.
    pub namespace_pid: Option<u32>,
    /// Treatment of unreferenced entries that still have children.
    pub eviction: EvictionMode,
    /// Evict after any request that leaves more entries cached than this.
    pub max_cached_entries: Option<usize>,
    /// Seed the cache from the store before serving.
    pub preload: bool,
    /// Static files served by the in-memory store, keyed by path.
    pub files: BTreeMap<String, String>,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            mount_path: "/".into(),
            server_pid: 2,
            namespace_pid: None,
            eviction: EvictionMode::default(),
            max_cached_entries: None,
            preload: false,
            files: BTreeMap::new(),
        }
    }
}

impl FsConfig {
    /// Parse and validate a JSON document.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> Result<Self, FsError> {
        let config: Self = serde_json::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, FsError> {
        let data = fs::read_to_string(path)?;
        Self::from_str(&data)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), FsError> {
        self.mount_path()?;
        if self.server_pid == 0 {
            return Err(FsError::InvalidConfig("server_pid must be non-zero".into()));
        }
        if self.namespace_pid == Some(self.server_pid) {
            return Err(FsError::InvalidConfig(format!(
                "server_pid {} collides with namespace_pid",
                self.server_pid
            )));
        }
        for path in self.files.keys() {
            FsPath::parse(path)?;
        }
        Ok(())
    }

    /// Canonical mount path.
    pub fn mount_path(&self) -> Result<FsPath, PathError> {
        FsPath::parse(&self.mount_path)
    }

    /// Process id of the server endpoint.
    #[must_use]
    pub fn server_pid(&self) -> ProcessId {
        ProcessId::from_raw(self.server_pid)
    }

    /// Process id of the namespace service, if mounting.
    #[must_use]
    pub fn namespace_pid(&self) -> Option<ProcessId> {
        self.namespace_pid.map(ProcessId::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = FsConfig::from_str("{}").unwrap();
        assert_eq!(config, FsConfig::default());
        assert_eq!(config.mount_path().unwrap(), FsPath::root());
        assert_eq!(config.namespace_pid(), None);
        assert_eq!(config.eviction, EvictionMode::RetainPopulated);
    }

    #[test]
    fn parses_every_field() {
        let config = FsConfig::from_str(
            r#"{
                "mount_path": "/srv/docs",
                "server_pid": 7,
                "namespace_pid": 1,
                "eviction": "unconditional",
                "max_cached_entries": 16,
                "preload": true,
                "files": { "/readme": "hello" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.mount_path().unwrap().full(), "/srv/docs");
        assert_eq!(config.server_pid(), ProcessId::from_raw(7));
        assert_eq!(config.namespace_pid(), Some(ProcessId::NAMESPACE));
        assert_eq!(config.eviction, EvictionMode::Unconditional);
        assert_eq!(config.max_cached_entries, Some(16));
        assert!(config.preload);
        assert_eq!(config.files["/readme"], "hello");
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            FsConfig::from_str(r#"{ "mountpath": "/" }"#),
            Err(FsError::Config(_))
        ));
    }

    #[test]
    fn rejects_pid_collision() {
        assert!(matches!(
            FsConfig::from_str(r#"{ "server_pid": 1, "namespace_pid": 1 }"#),
            Err(FsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_overlong_file_path() {
        let doc = format!(r#"{{ "files": {{ "/{}": "" }} }}"#, "x".repeat(80));
        assert!(matches!(
            FsConfig::from_str(&doc),
            Err(FsError::Path(PathError::TooLong))
        ));
    }
}
