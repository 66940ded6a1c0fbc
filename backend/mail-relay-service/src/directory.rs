//! Identity directory: resolves an address to an internal user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DirectoryUser {
    pub id: Uuid,
    pub email: String,
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `Ok(None)` when the address belongs to no active user.
    async fn resolve_by_address(&self, address: &str) -> AppResult<Option<DirectoryUser>>;
}

#[derive(Clone)]
pub struct PgIdentityDirectory {
    pool: PgPool,
}

impl PgIdentityDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for PgIdentityDirectory {
    async fn resolve_by_address(&self, address: &str) -> AppResult<Option<DirectoryUser>> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(None);
        }

        let user = sqlx::query_as::<_, DirectoryUser>(
            "SELECT id, email FROM users WHERE LOWER(email) = LOWER($1) AND is_active",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}
