//! User repository.
//!
//! Users are unique per realm by email. Federated identities are keyed by
//! `(realm, provider, external_id)` and point at exactly one user.

use crate::errors::SsoError;
use crate::models::{ExternalIdentity, ProviderKind, User};
use crate::observability::metrics::record_db_query;
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, realm: &str, email: &str) -> Result<Option<User>, SsoError>;

    async fn find_by_identity(
        &self,
        realm: &str,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<User>, SsoError>;

    /// Create a user and link the identity to it. If the identity is
    /// already linked, by a concurrent callback for instance, the linked
    /// user is returned instead.
    ///
    /// # Errors
    ///
    /// `SsoError::IdentityConflict` if the email is taken in the realm by a
    /// user the identity is not linked to.
    async fn create_with_identity(
        &self,
        realm: &str,
        identity: &ExternalIdentity,
    ) -> Result<User, SsoError>;

    /// Create a user with a local password.
    ///
    /// # Errors
    ///
    /// `SsoError::IdentityConflict` if the email is taken in the realm.
    async fn create_with_password(
        &self,
        realm: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, SsoError>;
}

pub(crate) const EMAIL_TAKEN_MESSAGE: &str = "An account with this email already exists";

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve a unique violation hit while registering `identity`. Two
    /// callbacks for the same identity race on both unique keys; the loser
    /// signs in the winner's user.
    async fn linked_after_conflict(
        &self,
        realm: &str,
        identity: &ExternalIdentity,
        conflict: &str,
    ) -> Result<User, SsoError> {
        match self
            .find_by_identity(realm, identity.provider, &identity.external_id)
            .await?
        {
            Some(user) => {
                debug!(target: "sso.repo", "Identity linked by a concurrent registration");
                Ok(user)
            }
            None => Err(SsoError::IdentityConflict(conflict.to_string())),
        }
    }
}

fn record<T>(operation: &str, table: &str, result: &Result<T, sqlx::Error>, start: Instant) {
    let status = if result.is_ok() { "success" } else { "error" };
    record_db_query(operation, table, status, start.elapsed());
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip_all, name = "sso.repo.users.find_by_email")]
    async fn find_by_email(&self, realm: &str, email: &str) -> Result<Option<User>, SsoError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, realm, email, password_hash, is_active
            FROM users
            WHERE realm = $1 AND email = $2
            "#,
        )
        .bind(realm)
        .bind(email)
        .fetch_optional(&self.pool)
        .await;

        record("select", "users", &result, start);

        result.map_err(|e| SsoError::Database(format!("Failed to fetch user by email: {}", e)))
    }

    #[instrument(skip_all, name = "sso.repo.users.find_by_identity", fields(provider = provider.as_str()))]
    async fn find_by_identity(
        &self,
        realm: &str,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<User>, SsoError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, User>(
            r#"
            SELECT u.user_id, u.realm, u.email, u.password_hash, u.is_active
            FROM user_identities i
            JOIN users u ON u.user_id = i.user_id
            WHERE i.realm = $1 AND i.provider = $2 AND i.external_id = $3
            "#,
        )
        .bind(realm)
        .bind(provider.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await;

        record("select", "user_identities", &result, start);

        result.map_err(|e| SsoError::Database(format!("Failed to fetch user by identity: {}", e)))
    }

    #[instrument(skip_all, name = "sso.repo.users.create_with_identity", fields(provider = identity.provider.as_str()))]
    async fn create_with_identity(
        &self,
        realm: &str,
        identity: &ExternalIdentity,
    ) -> Result<User, SsoError> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, realm, email, password_hash, is_active)
            VALUES ($1, $2, $3, NULL, TRUE)
            RETURNING user_id, realm, email, password_hash, is_active
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(realm)
        .bind(identity.email.as_deref())
        .fetch_one(&mut *tx)
        .await;

        record("insert", "users", &inserted, start);

        let user = match inserted {
            Ok(user) => user,
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return self
                    .linked_after_conflict(realm, identity, EMAIL_TAKEN_MESSAGE)
                    .await;
            }
            Err(e) => return Err(SsoError::Database(format!("Failed to create user: {}", e))),
        };

        let start = Instant::now();
        let linked = sqlx::query(
            r#"
            INSERT INTO user_identities (realm, provider, external_id, user_id, email)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(realm)
        .bind(identity.provider.as_str())
        .bind(&identity.external_id)
        .bind(user.user_id)
        .bind(identity.email.as_deref())
        .execute(&mut *tx)
        .await;

        record("insert", "user_identities", &linked, start);

        match linked {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return self
                    .linked_after_conflict(realm, identity, "This identity is already linked")
                    .await;
            }
            Err(e) => return Err(SsoError::Database(format!("Failed to link identity: {}", e))),
        }

        tx.commit().await?;

        Ok(user)
    }

    #[instrument(skip_all, name = "sso.repo.users.create_with_password")]
    async fn create_with_password(
        &self,
        realm: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, SsoError> {
        let start = Instant::now();
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, realm, email, password_hash, is_active)
            VALUES ($1, $2, $3, $4, TRUE)
            RETURNING user_id, realm, email, password_hash, is_active
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(realm)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await;

        record("insert", "users", &result, start);

        result.map_err(|e| {
            if is_unique_violation(&e) {
                SsoError::IdentityConflict(EMAIL_TAKEN_MESSAGE.to_string())
            } else {
                SsoError::Database(format!("Failed to create user: {}", e))
            }
        })
    }
}
