mod common;

use common::{TestContext, create_course};
use schoolhouse::modules::users::UserService;
use schoolhouse_core::verify_password;
use schoolhouse_models::{CourseId, EnrollmentRecord, Role, UserAttributes};
use serde_json::json;

fn enrollment(value: serde_json::Value) -> EnrollmentRecord {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_build_from_enrollment() {
    let ctx = TestContext::new();
    let batch = ctx.store().insert_batch("Spring cohort").await.unwrap();

    let record = enrollment(json!({
        "course_id": 7,
        "batch_id": batch.id.get(),
        "email": "sam@x.com",
        "phone": "555-0100"
    }));
    let draft = UserService::build_from_enrollment(ctx.store(), &record)
        .await
        .unwrap();

    assert_eq!(draft.role, Some(Role::Student));
    assert_eq!(draft.course_id, Some(CourseId::new(7)));
    assert_eq!(draft.batch_ids, vec![batch.id]);
    assert_eq!(draft.username.as_deref(), Some("sam"));
    let password = draft.password.clone().unwrap();
    assert_eq!(password.len(), 10);
    assert!(password.chars().all(|c| c.is_ascii_lowercase()));
}

#[tokio::test]
async fn test_create_from_enrollment_persists_batch_membership() {
    let ctx = TestContext::new();
    let batch = ctx.store().insert_batch("Spring cohort").await.unwrap();
    let course = create_course(&ctx).await;
    let record = enrollment(json!({
        "course_id": course.id.get(),
        "batch_id": batch.id.get(),
        "email": "sam@x.com",
        "name": "Sam"
    }));

    let user = UserService::create_from_enrollment(ctx.store(), &ctx.confirmations, &record)
        .await
        .unwrap();

    assert!(user.is_student());
    assert_eq!(user.name.as_deref(), Some("Sam"));
    assert!(user.has_password());
    assert_eq!(
        ctx.store().batch_ids_for_user(user.id).await.unwrap(),
        vec![batch.id]
    );

    // the stored hash is not the placeholder itself
    let hash = user.encrypted_password.clone().unwrap();
    assert!(!verify_password("", &hash).unwrap());

    let mailer = ctx.drain().await;
    assert_eq!(mailer.sent().len(), 1);
    assert_eq!(mailer.sent()[0].to_email, "sam@x.com");
}

#[tokio::test]
async fn test_enrollment_with_unknown_batch_is_rejected() {
    let ctx = TestContext::new();
    let record = enrollment(json!({"course_id": 7, "batch_id": 404, "email": "sam@x.com"}));

    let err = UserService::build_from_enrollment(ctx.store(), &record)
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 404);
}

#[tokio::test]
async fn test_enrollment_without_email_is_rejected() {
    let ctx = TestContext::new();
    let batch = ctx.store().insert_batch("Spring cohort").await.unwrap();
    let record = enrollment(json!({"course_id": 7, "batch_id": batch.id.get()}));

    let err = UserService::build_from_enrollment(ctx.store(), &record)
        .await
        .unwrap_err();
    assert_eq!(err.status.as_u16(), 422);
}

#[tokio::test]
async fn test_enrollment_without_course_fails_validation() {
    let ctx = TestContext::new();
    let batch = ctx.store().insert_batch("Spring cohort").await.unwrap();
    let record = enrollment(json!({"batch_id": batch.id.get(), "email": "kim@x.com"}));

    let err = UserService::create_from_enrollment(ctx.store(), &ctx.confirmations, &record)
        .await
        .unwrap_err();
    assert!(err.has_field_error("course"));
    assert_eq!(ctx.store.user_count().await, 0);
}

#[tokio::test]
async fn test_enrollment_ignores_non_user_fields() {
    let ctx = TestContext::new();
    let batch = ctx.store().insert_batch("Spring cohort").await.unwrap();
    let record = enrollment(json!({
        "id": 99,
        "course_id": "7",
        "batch_id": batch.id.get(),
        "email": "lee@x.com",
        "status": "approved"
    }));

    let draft = UserService::build_from_enrollment(ctx.store(), &record)
        .await
        .unwrap();
    assert_eq!(draft.course_id, Some(CourseId::new(7)));
    assert_eq!(draft.batch_ids, vec![batch.id]);
    assert_eq!(draft.username.as_deref(), Some("lee"));
}
