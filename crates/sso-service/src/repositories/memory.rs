//! In-process user and client stores for tests and local runs.

use crate::errors::SsoError;
use crate::models::{ClientApplication, ExternalIdentity, ProviderKind, User};
use crate::repositories::clients::ClientStore;
use crate::repositories::users::{UserStore, EMAIL_TAKEN_MESSAGE};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

type IdentityKey = (String, ProviderKind, String);

#[derive(Default)]
struct UserTables {
    users: HashMap<Uuid, User>,
    identities: HashMap<IdentityKey, Uuid>,
}

impl UserTables {
    fn email_taken(&self, realm: &str, email: &str) -> bool {
        self.users
            .values()
            .any(|u| u.realm == realm && u.email.as_deref() == Some(email))
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    tables: RwLock<UserTables>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user with an optional local password hash.
    pub async fn insert_user(
        &self,
        realm: &str,
        email: &str,
        password_hash: Option<String>,
    ) -> User {
        let user = User {
            user_id: Uuid::new_v4(),
            realm: realm.to_string(),
            email: Some(email.to_string()),
            password_hash,
            is_active: true,
        };
        self.tables
            .write()
            .await
            .users
            .insert(user.user_id, user.clone());
        user
    }

    pub async fn set_active(&self, user_id: Uuid, is_active: bool) {
        if let Some(user) = self.tables.write().await.users.get_mut(&user_id) {
            user.is_active = is_active;
        }
    }

    /// Link an external identity to an existing user.
    pub async fn link_identity(&self, user_id: Uuid, identity: &ExternalIdentity) {
        let mut tables = self.tables.write().await;
        let Some(realm) = tables.users.get(&user_id).map(|u| u.realm.clone()) else {
            return;
        };
        tables.identities.insert(
            (realm, identity.provider, identity.external_id.clone()),
            user_id,
        );
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, realm: &str, email: &str) -> Result<Option<User>, SsoError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.realm == realm && u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_identity(
        &self,
        realm: &str,
        provider: ProviderKind,
        external_id: &str,
    ) -> Result<Option<User>, SsoError> {
        let tables = self.tables.read().await;
        let key = (realm.to_string(), provider, external_id.to_string());
        Ok(tables
            .identities
            .get(&key)
            .and_then(|user_id| tables.users.get(user_id))
            .cloned())
    }

    async fn create_with_identity(
        &self,
        realm: &str,
        identity: &ExternalIdentity,
    ) -> Result<User, SsoError> {
        let mut tables = self.tables.write().await;

        let key = (
            realm.to_string(),
            identity.provider,
            identity.external_id.clone(),
        );
        if let Some(linked) = tables
            .identities
            .get(&key)
            .and_then(|user_id| tables.users.get(user_id))
        {
            return Ok(linked.clone());
        }

        if let Some(email) = identity.email.as_deref() {
            if tables.email_taken(realm, email) {
                return Err(SsoError::IdentityConflict(EMAIL_TAKEN_MESSAGE.to_string()));
            }
        }

        let user = User {
            user_id: Uuid::new_v4(),
            realm: realm.to_string(),
            email: identity.email.clone(),
            password_hash: None,
            is_active: true,
        };
        tables.users.insert(user.user_id, user.clone());
        tables.identities.insert(key, user.user_id);

        Ok(user)
    }

    async fn create_with_password(
        &self,
        realm: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, SsoError> {
        let mut tables = self.tables.write().await;
        if tables.email_taken(realm, email) {
            return Err(SsoError::IdentityConflict(EMAIL_TAKEN_MESSAGE.to_string()));
        }

        let user = User {
            user_id: Uuid::new_v4(),
            realm: realm.to_string(),
            email: Some(email.to_string()),
            password_hash: Some(password_hash.to_string()),
            is_active: true,
        };
        tables.users.insert(user.user_id, user.clone());
        Ok(user)
    }
}

#[derive(Default)]
pub struct InMemoryClientStore {
    clients: RwLock<HashMap<(String, String), ClientApplication>>,
}

impl InMemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, client: ClientApplication) {
        self.clients
            .write()
            .await
            .insert((client.realm.clone(), client.client_id.clone()), client);
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn find(
        &self,
        realm: &str,
        client_id: &str,
    ) -> Result<Option<ClientApplication>, SsoError> {
        Ok(self
            .clients
            .read()
            .await
            .get(&(realm.to_string(), client_id.to_string()))
            .cloned())
    }
}
