//! `MembershipProcessor` scenarios: S3 (new team member synced), S4
//! (`restrict_member_access` empties the backend), S6 (blank-username team
//! member deferred to account linking), plus the idempotence property and
//! coverage for the resource-scoped team lookup and the service/course
//! account sync this processor also performs.

use std::collections::HashSet;
use std::sync::Arc;

use site_agent_types::{BackendResourceInfo, OfferingUserState};

use crate::backend::UsernameResult;
use crate::control_plane::{CourseAccount, ServiceAccount, TeamMember};
use crate::processors::MembershipProcessor;

use super::fakes::{
    fixture_offering, fixture_offering_user, fixture_resource, FakeBackendDriver, FakeControlPlane,
    FakeUsernameManager,
};

fn team_member_for(user_uuid: uuid::Uuid, username: &str) -> TeamMember {
    TeamMember {
        user_uuid,
        username: username.to_owned(),
        full_name: username.to_owned(),
    }
}

#[tokio::test]
async fn s3_new_team_member_is_added_and_last_sync_refreshed() {
    let offering = fixture_offering(vec![]);
    let mut resource = fixture_resource(uuid::Uuid::new_v4());
    resource.backend_id = "alloc_existing".to_owned();

    let alice = fixture_offering_user(offering.uuid, "alice", OfferingUserState::Ok);
    let bob = fixture_offering_user(offering.uuid, "bob", OfferingUserState::Ok);

    let control = Arc::new(FakeControlPlane::default());
    control.insert_resource(resource.clone());
    control.insert_offering_user(alice.clone());
    control.insert_offering_user(bob.clone());
    control.set_team(
        resource.uuid,
        vec![
            team_member_for(alice.user_uuid, "alice"),
            team_member_for(bob.user_uuid, "bob"),
        ],
    );

    let driver = Arc::new(FakeBackendDriver::default());
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource.backend_id.clone(),
        users: vec!["alice".to_owned()],
        ..Default::default()
    });

    let username_manager = Arc::new(FakeUsernameManager::default());
    let processor = MembershipProcessor::new(offering, control.clone(), driver.clone(), username_manager);
    processor.process_offering().await.unwrap();

    let backend_info = driver.resource(&resource.backend_id).unwrap();
    let users: HashSet<String> = backend_info.users.into_iter().collect();
    assert_eq!(users, HashSet::from(["alice".to_owned(), "bob".to_owned()]));

    assert_eq!(
        *control.refresh_calls.lock().unwrap().get(&resource.uuid).unwrap_or(&0),
        1
    );
}

#[tokio::test]
async fn s4_restricted_resource_ends_up_with_empty_backend_user_set() {
    let offering = fixture_offering(vec![]);
    let mut resource = fixture_resource(uuid::Uuid::new_v4());
    resource.backend_id = "alloc_restricted".to_owned();
    resource.restrict_member_access = true;

    let alice = fixture_offering_user(offering.uuid, "alice", OfferingUserState::Ok);
    let bob = fixture_offering_user(offering.uuid, "bob", OfferingUserState::Ok);

    let control = Arc::new(FakeControlPlane::default());
    control.insert_resource(resource.clone());
    control.insert_offering_user(alice.clone());
    control.insert_offering_user(bob.clone());
    control.set_team(
        resource.uuid,
        vec![
            team_member_for(alice.user_uuid, "alice"),
            team_member_for(bob.user_uuid, "bob"),
        ],
    );

    let driver = Arc::new(FakeBackendDriver::default());
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource.backend_id.clone(),
        users: vec!["alice".to_owned(), "bob".to_owned()],
        ..Default::default()
    });

    let username_manager = Arc::new(FakeUsernameManager::default());
    let processor = MembershipProcessor::new(offering, control.clone(), driver.clone(), username_manager);
    processor.process_offering().await.unwrap();

    let backend_info = driver.resource(&resource.backend_id).unwrap();
    assert!(backend_info.users.is_empty());
    // restrict_member_access short-circuits before any add_users_to_resource
    // call for team sync; the only remaining add_users_to_resource calls are
    // the (empty-set, no-op) service/course account sync, which is also
    // skipped for a restricted resource.
    assert_eq!(*driver.add_users_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn s6_blank_username_member_is_deferred_to_account_linking() {
    let offering = fixture_offering(vec![]);
    let mut resource = fixture_resource(uuid::Uuid::new_v4());
    resource.backend_id = "alloc_linking".to_owned();

    let mut pending = fixture_offering_user(offering.uuid, "", OfferingUserState::Requested);
    pending.username = String::new();

    let control = Arc::new(FakeControlPlane::default());
    control.insert_resource(resource.clone());
    control.insert_offering_user(pending.clone());
    control.set_team(resource.uuid, vec![team_member_for(pending.user_uuid, "")]);

    let driver = Arc::new(FakeBackendDriver::default());
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource.backend_id.clone(),
        ..Default::default()
    });

    let username_manager = Arc::new(FakeUsernameManager::default());
    username_manager.script(
        pending.uuid,
        UsernameResult::NeedsLinking {
            message: "Please link".to_owned(),
            url: Some("https://example.test/link".to_owned()),
        },
    );

    let processor = MembershipProcessor::new(offering, control.clone(), driver, username_manager);
    processor.process_offering().await.unwrap();

    let updated = control.offering_user(pending.uuid);
    assert_eq!(updated.state, OfferingUserState::PendingAccountLinking);
    assert_eq!(updated.comment.as_deref(), Some("Please link"));
    assert_eq!(updated.comment_url.as_deref(), Some("https://example.test/link"));
}

/// A blank-username team member whose generation succeeds must pass through
/// `creating` and land in `ok` with the resolved username attached, per the
/// `spec.md` §4.2 state machine — not be left in its prior `requested` state.
#[tokio::test]
async fn resolved_username_transitions_requested_user_to_ok() {
    let offering = fixture_offering(vec![]);
    let mut resource = fixture_resource(uuid::Uuid::new_v4());
    resource.backend_id = "alloc_resolved".to_owned();

    let mut pending = fixture_offering_user(offering.uuid, "", OfferingUserState::Requested);
    pending.username = String::new();

    let control = Arc::new(FakeControlPlane::default());
    control.insert_resource(resource.clone());
    control.insert_offering_user(pending.clone());
    control.set_team(resource.uuid, vec![team_member_for(pending.user_uuid, "")]);

    let driver = Arc::new(FakeBackendDriver::default());
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource.backend_id.clone(),
        ..Default::default()
    });

    // No scripted outcome: `FakeUsernameManager` falls back to
    // `UsernameResult::Ok(user_uuid)`.
    let username_manager = Arc::new(FakeUsernameManager::default());
    let processor = MembershipProcessor::new(offering, control.clone(), driver, username_manager);
    processor.process_offering().await.unwrap();

    let updated = control.offering_user(pending.uuid);
    assert_eq!(updated.state, OfferingUserState::Ok);
    assert_eq!(updated.username, pending.user_uuid.to_string());
}

/// Testable property: when the backend already matches the control plane,
/// one pass performs no effective membership mutation.
#[tokio::test]
async fn matching_state_pass_performs_no_effective_mutation() {
    let offering = fixture_offering(vec![]);
    let mut resource = fixture_resource(uuid::Uuid::new_v4());
    resource.backend_id = "alloc_steady".to_owned();

    let alice = fixture_offering_user(offering.uuid, "alice", OfferingUserState::Ok);

    let control = Arc::new(FakeControlPlane::default());
    control.insert_resource(resource.clone());
    control.insert_offering_user(alice.clone());
    control.set_team(resource.uuid, vec![team_member_for(alice.user_uuid, "alice")]);

    let driver = Arc::new(FakeBackendDriver::default());
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource.backend_id.clone(),
        users: vec!["alice".to_owned()],
        ..Default::default()
    });

    let username_manager = Arc::new(FakeUsernameManager::default());
    let processor = MembershipProcessor::new(offering, control.clone(), driver.clone(), username_manager);
    processor.process_offering().await.unwrap();

    let backend_info = driver.resource(&resource.backend_id).unwrap();
    assert_eq!(backend_info.users, vec!["alice".to_owned()]);
}

/// Exercises the resource-scoped (not project-scoped) team lookup this
/// processor relies on: two resources in the same project get independently
/// correct team rosters even though they share `project_uuid`.
#[tokio::test]
async fn team_lookup_is_scoped_per_resource_not_per_project() {
    let offering = fixture_offering(vec![]);
    let project_uuid = uuid::Uuid::new_v4();
    let mut resource_a = fixture_resource(project_uuid);
    resource_a.backend_id = "alloc_a".to_owned();
    let mut resource_b = fixture_resource(project_uuid);
    resource_b.backend_id = "alloc_b".to_owned();

    let alice = fixture_offering_user(offering.uuid, "alice", OfferingUserState::Ok);
    let bob = fixture_offering_user(offering.uuid, "bob", OfferingUserState::Ok);

    let control = Arc::new(FakeControlPlane::default());
    control.insert_resource(resource_a.clone());
    control.insert_resource(resource_b.clone());
    control.insert_offering_user(alice.clone());
    control.insert_offering_user(bob.clone());
    control.set_team(resource_a.uuid, vec![team_member_for(alice.user_uuid, "alice")]);
    control.set_team(resource_b.uuid, vec![team_member_for(bob.user_uuid, "bob")]);

    let driver = Arc::new(FakeBackendDriver::default());
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource_a.backend_id.clone(),
        ..Default::default()
    });
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource_b.backend_id.clone(),
        ..Default::default()
    });

    let username_manager = Arc::new(FakeUsernameManager::default());
    let processor = MembershipProcessor::new(offering, control.clone(), driver.clone(), username_manager);
    processor.process_offering().await.unwrap();

    let info_a = driver.resource(&resource_a.backend_id).unwrap();
    let info_b = driver.resource(&resource_b.backend_id).unwrap();
    assert_eq!(info_a.users, vec!["alice".to_owned()]);
    assert_eq!(info_b.users, vec!["bob".to_owned()]);
}

#[tokio::test]
async fn service_and_course_accounts_are_synced_alongside_team_members() {
    let offering = fixture_offering(vec![]);
    let mut resource = fixture_resource(uuid::Uuid::new_v4());
    resource.backend_id = "alloc_accounts".to_owned();

    let control = Arc::new(FakeControlPlane::default());
    control.insert_resource(resource.clone());
    control.service_accounts.lock().unwrap().insert(
        resource.project_uuid,
        vec![ServiceAccount {
            uuid: uuid::Uuid::new_v4(),
            project_uuid: resource.project_uuid,
            username: "svc-ci".to_owned(),
        }],
    );

    let today = chrono::Utc::now().date_naive();
    control.course_accounts.lock().unwrap().insert(
        resource.project_uuid,
        vec![
            CourseAccount {
                uuid: uuid::Uuid::new_v4(),
                project_uuid: resource.project_uuid,
                user_uuid: uuid::Uuid::new_v4(),
                username: "student-active".to_owned(),
                start_date: Some(today - chrono::Duration::days(1)),
                end_date: Some(today + chrono::Duration::days(1)),
            },
            CourseAccount {
                uuid: uuid::Uuid::new_v4(),
                project_uuid: resource.project_uuid,
                user_uuid: uuid::Uuid::new_v4(),
                username: "student-expired".to_owned(),
                start_date: Some(today - chrono::Duration::days(30)),
                end_date: Some(today - chrono::Duration::days(1)),
            },
        ],
    );

    let driver = Arc::new(FakeBackendDriver::default());
    driver.insert_resource(BackendResourceInfo {
        backend_id: resource.backend_id.clone(),
        users: vec!["student-expired".to_owned()],
        ..Default::default()
    });

    let username_manager = Arc::new(FakeUsernameManager::default());
    let processor = MembershipProcessor::new(offering, control.clone(), driver.clone(), username_manager);
    processor.process_offering().await.unwrap();

    let backend_info = driver.resource(&resource.backend_id).unwrap();
    let users: HashSet<String> = backend_info.users.into_iter().collect();
    assert!(users.contains("svc-ci"));
    assert!(users.contains("student-active"));
    assert!(!users.contains("student-expired"));
}
