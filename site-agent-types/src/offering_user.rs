use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State machine for [`OfferingUser`], driven by the core in response to
/// `UsernameManager` results (`spec.md` §4.2):
///
/// ```text
/// requested ──generate ok──▶ creating ──confirm──▶ ok
///     │                           │
///     │                           └──error──▶ erred
///     ├─linking-required──▶ pending_account_linking
///     └─validation-required──▶ pending_additional_validation
/// ok/any ──team removal──▶ deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferingUserState {
    Requested,
    PendingAccountLinking,
    PendingAdditionalValidation,
    Creating,
    Ok,
    Erred,
    Deleted,
}

impl OfferingUserState {
    /// `spec.md` §4.2: "The processors only invoke the manager for users
    /// whose `username` field is empty AND whose state is one of
    /// {requested, pending_account_linking, creating}."
    pub fn needs_username_generation(self) -> bool {
        matches!(
            self,
            OfferingUserState::Requested
                | OfferingUserState::PendingAccountLinking
                | OfferingUserState::Creating
        )
    }

    /// `spec.md` §4.6 step 2: only `ok`/`requested` offering users are
    /// eligible to be added to a backend resource.
    pub fn is_membership_eligible(self) -> bool {
        matches!(self, OfferingUserState::Ok | OfferingUserState::Requested)
    }
}

/// Binding `(marketplace_user, offering) → local_username`.
///
/// Invariant (`spec.md` §3): the username is empty iff
/// `state ∈ {requested, pending_*, creating}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferingUser {
    pub uuid: Uuid,
    pub user_uuid: Uuid,
    pub offering_uuid: Uuid,
    pub username: String,
    pub state: OfferingUserState,
    pub restrict_member_access: bool,
    pub comment: Option<String>,
    pub comment_url: Option<String>,
}

impl OfferingUser {
    pub fn has_username(&self) -> bool {
        !self.username.trim().is_empty()
    }
}
