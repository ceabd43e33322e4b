pub mod audit;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod diff;
pub mod environment;
pub mod errors;
pub mod interchange;
pub mod vault;

pub use crypto::{Argon2Params, Auth};
pub use environment::EnvironmentManager;
pub use errors::{EnvVaultError, Result};
pub use vault::{VaultState, VaultStore};
