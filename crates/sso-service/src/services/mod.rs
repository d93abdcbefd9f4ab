pub mod client_credentials;
pub mod federation;
pub mod token_issuer;
pub mod token_validator;
pub mod user_auth;

pub use client_credentials::ClientCredentialsGrant;
pub use federation::{CompletionMode, FederationFlow, FederationOutcome};
pub use token_issuer::{TokenIssuer, TokenLifetimes};
pub use token_validator::TokenValidator;
pub use user_auth::UserAuthFlow;
