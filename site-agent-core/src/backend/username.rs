//! Mapping from marketplace users to backend-local usernames (`spec.md` §4.2).
//!
//! Grounded on `examples/original_source/waldur_site_agent/backend/structures.py`
//! and the username-generation call sites in `processors.py`, which raise
//! typed exceptions (`UsernameManagementLinkingError`,
//! `UsernameManagementValidationError`) to signal the two deferred states.
//! `spec.md` §9 replaces that exception-for-control-flow pattern with the
//! [`UsernameResult`] sum type below, which the processor pattern-matches
//! instead of catching.

use async_trait::async_trait;
use site_agent_types::OfferingUser;

use crate::error::Result;

/// Outcome of [`UsernameManager::generate_username`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsernameResult {
    Ok(String),
    NeedsLinking { message: String, url: Option<String> },
    NeedsValidation { message: String, url: Option<String> },
    Error(String),
}

/// Maps `OfferingUser → local_username` (`spec.md` §4.2).
#[async_trait]
pub trait UsernameManager: Send + Sync {
    /// Probes the local identity store for an existing username; `Ok(None)`
    /// is a miss, not an error.
    async fn get_username(&self, offering_user: &OfferingUser) -> Result<Option<String>>;

    /// Requests generation of a new local username for `offering_user`.
    async fn generate_username(&self, offering_user: &OfferingUser) -> Result<UsernameResult>;

    /// First probes `get_username`, falling back to `generate_username` on
    /// miss (`spec.md` §4.2).
    async fn get_or_create_username(&self, offering_user: &OfferingUser) -> Result<UsernameResult> {
        if let Some(existing) = self.get_username(offering_user).await? {
            return Ok(UsernameResult::Ok(existing));
        }
        self.generate_username(offering_user).await
    }
}

/// Identity-function manager: the marketplace user's own slug/uuid string is
/// used as the backend username verbatim. Useful for backends with no
/// notion of local accounts distinct from the marketplace identity, and for
/// tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughUsernameManager;

#[async_trait]
impl UsernameManager for PassthroughUsernameManager {
    async fn get_username(&self, offering_user: &OfferingUser) -> Result<Option<String>> {
        if offering_user.has_username() {
            Ok(Some(offering_user.username.clone()))
        } else {
            Ok(None)
        }
    }

    async fn generate_username(&self, offering_user: &OfferingUser) -> Result<UsernameResult> {
        Ok(UsernameResult::Ok(offering_user.user_uuid.to_string()))
    }
}
