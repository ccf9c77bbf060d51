mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, json_id, TestApp};
use serde_json::json;

#[tokio::test]
async fn event_dates_must_be_ordered() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("admin@example.org", "admin-pass", "ADMIN")
        .await?;
    let token = app.login_token("admin@example.org", "admin-pass").await?;

    for (start, end) in [("2025-07-13", "2025-07-11"), ("2025-07-11", "2025-07-11")] {
        let response = app
            .post_json(
                "/api/events",
                &json!({ "name": "Convention", "start_date": start, "end_date": end }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await?;
        assert_eq!(body["details"][0]["field"], "end_date");
    }

    let event_id = app.create_event(&token, "Convention").await?;

    let response = app
        .put_json(
            &format!("/api/events/{event_id}"),
            &json!({ "end_date": "2025-07-01" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/api/events", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let events = body["data"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(json_id(&events[0])?, event_id);
    assert_eq!(body["pagination"]["total"], 1);

    let response = app
        .get(&format!("/api/events?page={}", i64::MAX), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert!(body["data"].as_array().unwrap().is_empty());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn event_access_follows_permissions() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("overseer@example.org", "overseer-pass", "OVERSEER")
        .await?;
    let keyman_id = app
        .insert_user("keyman@example.org", "keyman-pass", "KEYMAN")
        .await?;
    let owner = app
        .login_token("overseer@example.org", "overseer-pass")
        .await?;
    let keyman = app.login_token("keyman@example.org", "keyman-pass").await?;

    let response = app
        .post_json(
            "/api/events",
            &json!({ "name": "Not mine", "start_date": "2025-01-01", "end_date": "2025-01-02" }),
            Some(&keyman),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let event_id = app.create_event(&owner, "Regional Convention").await?;

    let response = app
        .get(&format!("/api/events/{event_id}"), Some(&keyman))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/events/{event_id}/permissions"),
            &json!({
                "user_id": keyman_id,
                "role": "OVERSEER",
                "scope_type": "DEPARTMENT",
                "scope_ids": [" "],
            }),
            Some(&owner),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await?;
    assert_eq!(body["details"][0]["field"], "scope_ids");

    let response = app
        .post_json(
            &format!("/api/events/{event_id}/permissions"),
            &json!({ "user_id": keyman_id, "role": "VIEWER" }),
            Some(&owner),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(
            &format!("/api/events/{event_id}/permissions"),
            &json!({ "user_id": keyman_id, "role": "VIEWER" }),
            Some(&owner),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(&format!("/api/events/{event_id}"), Some(&keyman))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            &format!("/api/events/{event_id}/positions"),
            &json!({ "position_number": 1, "name": "Station 1" }),
            Some(&keyman),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/events/{event_id}"), Some(&keyman))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .delete(&format!("/api/events/{event_id}"), Some(&owner))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get(&format!("/api/events/{event_id}"), Some(&owner))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
