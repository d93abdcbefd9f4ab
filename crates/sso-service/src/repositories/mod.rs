pub mod clients;
pub mod federation_states;
pub mod memory;
pub mod revocations;
pub mod sessions;
pub mod users;

pub use clients::{ClientStore, PgClientStore};
pub use federation_states::FederationStateStore;
pub use memory::{InMemoryClientStore, InMemoryUserStore};
pub use revocations::RevocationList;
pub use sessions::{SessionStore, StoredSession};
pub use users::{PgUserStore, UserStore};
