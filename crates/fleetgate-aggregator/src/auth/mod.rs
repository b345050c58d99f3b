//! Authentication module for the Fleetgate aggregator.
//!
//! Provides credential hashing, caller sessions with idle expiry, the
//! privilege model and account management.

pub mod account;
pub mod password;
pub mod privilege;
pub mod session;


use async_trait::async_trait;

pub use account::{AccountService, AccountUpdate};
pub use password::{Argon2Hasher, CredentialHasher, Sha512Hasher};
pub use privilege::{Privilege, Role};
pub use session::{Session, SessionManager, SweepOutcome, spawn_sweeper};

use crate::error::Result;

/// Validates a caller token and checks it carries the listed privileges.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        token: &str,
        privileges: &[Privilege],
        oem_privileges: &[String],
    ) -> Result<Session>;
}
