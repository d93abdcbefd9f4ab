use crate::errors::SsoError;
use crate::models::ClientApplication;
use crate::observability::metrics::record_db_query;
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Instant;
use tracing::instrument;

/// Lookup of machine clients registered in a realm.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn find(&self, realm: &str, client_id: &str)
        -> Result<Option<ClientApplication>, SsoError>;
}

pub struct PgClientStore {
    pool: PgPool,
}

impl PgClientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientStore for PgClientStore {
    #[instrument(skip_all, name = "sso.repo.clients.find")]
    async fn find(
        &self,
        realm: &str,
        client_id: &str,
    ) -> Result<Option<ClientApplication>, SsoError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, ClientApplication>(
            r#"
            SELECT client_id, realm, client_secret_hash, scopes, is_active
            FROM client_applications
            WHERE realm = $1 AND client_id = $2
            "#,
        )
        .bind(realm)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await;

        let status = if result.is_ok() { "success" } else { "error" };
        record_db_query("select", "client_applications", status, start.elapsed());

        result.map_err(|e| SsoError::Database(format!("Failed to fetch client application: {}", e)))
    }
}
