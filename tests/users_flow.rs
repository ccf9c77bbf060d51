mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, json_id, TestApp};
use serde_json::json;

#[tokio::test]
async fn admin_manages_user_accounts() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let admin_id = app
        .insert_user("admin@example.org", "admin-pass", "ADMIN")
        .await?;
    let token = app.login_token("admin@example.org", "admin-pass").await?;

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "email": "Overseer@Example.org",
                "first_name": "Olga",
                "last_name": "Olsen",
                "role": "OVERSEER",
                "password": "overseer-pass",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    assert_eq!(body["data"]["email"], "overseer@example.org");
    assert_eq!(body["data"]["has_password"], true);
    assert!(body["data"].get("password_hash").is_none());
    let overseer_id = json_id(&body["data"])?;

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "email": "overseer@example.org",
                "first_name": "Other",
                "last_name": "Person",
                "role": "KEYMAN",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "email": "new@example.org",
                "first_name": "New",
                "last_name": "Person",
                "role": "SUPERUSER",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let overseer = app
        .login_token("overseer@example.org", "overseer-pass")
        .await?;
    let response = app.get("/api/admin/users", Some(&overseer)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .get("/api/admin/users?role=OVERSEER", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total"], 1);

    let response = app
        .put_json(
            &format!("/api/admin/users/{admin_id}"),
            &json!({ "role": "KEYMAN" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/attendants",
            &json!({
                "first_name": "Olga",
                "last_name": "Olsen",
                "email": "olga@example.org",
                "congregation": "West",
                "user_id": overseer_id,
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .delete(&format!("/api/admin/users/{overseer_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete(&format!("/api/admin/users/{admin_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn bulk_actions_report_each_user() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let admin_id = app
        .insert_user("admin@example.org", "admin-pass", "ADMIN")
        .await?;
    let first = app
        .insert_user("first@example.org", "first-pass", "ATTENDANT")
        .await?;
    let second = app
        .insert_user("second@example.org", "second-pass", "ATTENDANT")
        .await?;
    let token = app.login_token("admin@example.org", "admin-pass").await?;

    let response = app
        .post_json(
            "/api/admin/users/bulk",
            &json!({ "action": "change_role", "user_ids": [first], "data": { "role": "BOSS" } }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/admin/users/bulk",
            &json!({ "action": "change_role", "user_ids": [first] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/admin/users/bulk",
            &json!({ "action": "promote", "user_ids": [first] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/admin/users/bulk",
            &json!({ "action": "activate", "user_ids": [] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/admin/users/bulk",
            &json!({
                "action": "change_role",
                "user_ids": [first, second],
                "data": { "role": "KEYMAN" },
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(
        body["message"],
        "Bulk change_role completed. 2 successful, 0 failed."
    );
    assert_eq!(body["data"]["successful"][0]["role"], "KEYMAN");

    let response = app
        .post_json(
            "/api/admin/users/bulk",
            &json!({ "action": "deactivate", "user_ids": [first, admin_id] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["data"]["successful"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["failed"][0]["user_id"], admin_id.to_string());

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "first@example.org", "password": "first-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .get("/api/admin/users?is_active=false", Some(&token))
        .await?;
    let body = body_json(response).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    app.cleanup().await?;
    Ok(())
}
