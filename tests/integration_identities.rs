mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{TestContext, auth_payload, draft};
use schoolhouse::mail::ConfirmationQueue;
use schoolhouse::modules::auth::AuthService;
use schoolhouse::modules::identities::{IdentityService, SignIn};
use schoolhouse::modules::users::UserService;
use schoolhouse::store::MemoryUserStore;
use schoolhouse_models::{NewUser, RegisterUserDto, Role};

#[tokio::test]
async fn test_resolve_creates_user_and_identity() {
    let ctx = TestContext::new();
    let payload = auth_payload("github", "42", Some("janed"), Some("jane@example.com"));

    let user = IdentityService::resolve_or_create_user(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap();

    assert_eq!(user.username.as_deref(), Some("janed"));
    assert_eq!(user.email.as_deref(), Some("jane@example.com"));
    assert_eq!(user.role, None);
    assert!(!user.has_password());

    let identities = ctx.store().identities_for_user(user.id).await.unwrap();
    assert_eq!(identities.len(), 1);
    assert_eq!(identities[0].provider, "github");
    assert_eq!(identities[0].uid, "42");

    let mailer = ctx.drain().await;
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_resolve_is_idempotent() {
    let ctx = TestContext::new();
    let payload = auth_payload("github", "42", Some("janed"), Some("jane@example.com"));

    let first = IdentityService::resolve_or_create_user(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap();
    let second = IdentityService::resolve_or_create_user(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(ctx.store.user_count().await, 1);
    assert_eq!(ctx.store.identity_count().await, 1);

    // only the first call creates a user, so only one mail goes out
    let mailer = ctx.drain().await;
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn test_resolve_derives_username_from_email() {
    let ctx = TestContext::new();
    let payload = auth_payload("google", "g-1", None, Some("jane.doe@example.com"));

    let user = IdentityService::resolve_or_create_user(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap();
    assert_eq!(user.username.as_deref(), Some("jane.doe"));
}

#[tokio::test]
async fn test_resolve_without_email_or_nickname_fails() {
    let ctx = TestContext::new();
    let payload = auth_payload("twitter", "t-1", None, None);

    let err = IdentityService::resolve_or_create_user(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 422);
    assert_eq!(ctx.store.user_count().await, 0);
}

#[tokio::test]
async fn test_same_uid_different_provider_is_a_different_identity() {
    let ctx = TestContext::new();
    let a = IdentityService::resolve_or_create_user(
        ctx.store(),
        &ctx.confirmations,
        &auth_payload("github", "1", Some("gh-user"), None),
    )
    .await
    .unwrap();
    let b = IdentityService::resolve_or_create_user(
        ctx.store(),
        &ctx.confirmations,
        &auth_payload("gitlab", "1", Some("gl-user"), None),
    )
    .await
    .unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(ctx.store.identity_count().await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_create_exactly_one_user() {
    for round in 0..25 {
        let store = Arc::new(MemoryUserStore::new());
        let queue = ConfirmationQueue::disconnected();
        let uid = format!("race-{}", round);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let queue = queue.clone();
            let payload = auth_payload("github", &uid, Some("racer"), Some("racer@example.com"));
            tasks.push(tokio::spawn(async move {
                IdentityService::resolve_or_create_user(store.as_ref(), &queue, &payload).await
            }));
        }

        let mut ids = HashSet::new();
        for task in tasks {
            let user = task.await.unwrap().unwrap();
            ids.insert(user.id);
        }

        assert_eq!(ids.len(), 1, "round {} produced {:?}", round, ids);
        assert_eq!(store.user_count().await, 1, "round {}", round);
        assert_eq!(store.identity_count().await, 1, "round {}", round);
    }
}

#[tokio::test]
async fn test_update_from_auth_links_identity_and_refreshes_profile() {
    let ctx = TestContext::new();
    let user = UserService::create_user(
        ctx.store(),
        &ctx.confirmations,
        NewUser {
            username: Some("sam".to_string()),
            name: Some("Samuel".to_string()),
            ..draft(Some(Role::Teacher), "sam@example.com")
        },
    )
    .await
    .unwrap();

    let mut payload = auth_payload("github", "7", None, Some("sam@work.example.com"));
    payload.info.first_name = Some("Sam".to_string());

    let updated = IdentityService::update_from_auth(ctx.store(), user.clone(), &payload)
        .await
        .unwrap();

    assert_eq!(updated.id, user.id);
    assert_eq!(updated.username.as_deref(), Some("sam"));
    assert_eq!(updated.email.as_deref(), Some("sam@work.example.com"));
    assert_eq!(updated.name.as_deref(), Some("Sam"));

    let identities = ctx.store().identities_for_user(user.id).await.unwrap();
    assert_eq!(identities.len(), 1);

    // the linked identity now resolves to the same user
    let resolved = IdentityService::resolve_or_create_user(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap();
    assert_eq!(resolved.id, user.id);
}

#[tokio::test]
async fn test_update_from_auth_propagates_validation_errors() {
    let ctx = TestContext::new();
    UserService::create_user(
        ctx.store(),
        &ctx.confirmations,
        NewUser {
            username: Some("taken".to_string()),
            ..draft(Some(Role::Teacher), "first@example.com")
        },
    )
    .await
    .unwrap();
    let user = UserService::create_user(
        ctx.store(),
        &ctx.confirmations,
        draft(Some(Role::Teacher), "second@example.com"),
    )
    .await
    .unwrap();

    let payload = auth_payload("github", "9", Some("Taken"), None);
    let err = IdentityService::update_from_auth(ctx.store(), user, &payload)
        .await
        .unwrap_err();
    assert!(err.has_field_error("username"));
}

#[tokio::test]
async fn test_taken_nickname_hands_over_pending_signup() {
    let ctx = TestContext::new();
    UserService::create_user(
        ctx.store(),
        &ctx.confirmations,
        NewUser {
            username: Some("janed".to_string()),
            ..draft(Some(Role::Teacher), "jane@school.example.com")
        },
    )
    .await
    .unwrap();

    let payload = auth_payload("github", "42", Some("JaneD"), Some("jane@github.example.com"));
    let outcome = IdentityService::sign_in(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap();
    let SignIn::NeedsSignup { pending, error } = outcome else {
        panic!("expected a pending signup");
    };
    assert!(error.has_field_error("username"));
    assert_eq!(pending.attributes.username.as_deref(), Some("JaneD"));
    assert_eq!(pending.attributes.email.as_deref(), Some("jane@github.example.com"));

    let identity_id = pending.identity_id.unwrap();
    let identity = ctx.store().find_identity_by_id(identity_id).await.unwrap().unwrap();
    assert_eq!(identity.user_id, None);
    assert_eq!(ctx.store.user_count().await, 1);

    // finishing registration with a free username links the identity
    let user = AuthService::register(
        ctx.store(),
        &ctx.confirmations,
        RegisterUserDto {
            username: Some("jane_gh".to_string()),
            email: "jane@github.example.com".to_string(),
            name: None,
            password: "password123".to_string(),
            password_confirmation: "password123".to_string(),
        },
        Some(&pending),
    )
    .await
    .unwrap();
    assert_eq!(user.username.as_deref(), Some("jane_gh"));

    let resolved = IdentityService::resolve_or_create_user(ctx.store(), &ctx.confirmations, &payload)
        .await
        .unwrap();
    assert_eq!(resolved.id, user.id);
}
