// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Sync Configuration - field-service side of the AgroMesh config manifest.
//
// Loaded from the same YAML document as the swarm section; see the swarm
// crate for broker/registry/context options.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum items per pull page.
    #[serde(default = "default_sync_page_limit")]
    pub sync_page_limit: usize,

    /// Boundary polygon vertex cap enforced by validation.
    #[serde(default = "default_max_boundary_vertices")]
    pub max_boundary_vertices: usize,
}

fn default_sync_page_limit() -> usize {
    500
}

fn default_max_boundary_vertices() -> usize {
    crate::domain::geometry::DEFAULT_MAX_VERTICES
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_page_limit: default_sync_page_limit(),
            max_boundary_vertices: default_max_boundary_vertices(),
        }
    }
}

impl SyncConfig {
    pub fn from_yaml(doc: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(doc)
    }
}
