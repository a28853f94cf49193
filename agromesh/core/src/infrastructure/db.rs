// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! A thin `Database` handle over `sqlx::PgPool` that vends the repository
//! set the field service and sync engine run on. One pool serves all five
//! tables; repositories clone the pool handle, not connections.

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::infrastructure::repositories::{
    PostgresBoundaryHistoryRepository, PostgresFieldRepository, PostgresNdviRepository,
    PostgresSyncStatusRepository, PostgresTaskRepository,
};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(connection_string: &str) -> Result<Self> {
        Self::connect_with(connection_string, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect_with(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an externally managed pool, e.g. one shared with migrations.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn fields(&self) -> PostgresFieldRepository {
        PostgresFieldRepository::new(self.pool.clone())
    }

    pub fn tasks(&self) -> PostgresTaskRepository {
        PostgresTaskRepository::new(self.pool.clone())
    }

    pub fn sync_status(&self) -> PostgresSyncStatusRepository {
        PostgresSyncStatusRepository::new(self.pool.clone())
    }

    pub fn boundary_history(&self) -> PostgresBoundaryHistoryRepository {
        PostgresBoundaryHistoryRepository::new(self.pool.clone())
    }

    pub fn ndvi(&self) -> PostgresNdviRepository {
        PostgresNdviRepository::new(self.pool.clone())
    }
}
