mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, json_id, TestApp};
use serde_json::json;

#[tokio::test]
async fn attendant_directory_and_import() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("admin@example.org", "admin-pass", "ADMIN")
        .await?;
    app.insert_user("keyman@example.org", "keyman-pass", "KEYMAN")
        .await?;
    let token = app.login_token("admin@example.org", "admin-pass").await?;
    let keyman = app.login_token("keyman@example.org", "keyman-pass").await?;
    let event_id = app.create_event(&token, "Convention").await?;

    let response = app.get("/api/attendants", Some(&keyman)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let payload = json!({
        "first_name": "Anna",
        "last_name": "Berg",
        "email": "Anna.Berg@Example.org",
        "phone": "(555) 010-4321",
        "congregation": "North",
        "forms_of_service": ["Elder"],
    });
    let response = app
        .post_json("/api/attendants", &payload, Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    assert_eq!(body["data"]["email"], "anna.berg@example.org");
    assert_eq!(body["data"]["has_pin"], false);
    let anna = json_id(&body["data"])?;

    let response = app
        .post_json("/api/attendants", &payload, Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/attendants",
            &json!({
                "first_name": "Ben",
                "last_name": "Cole",
                "email": "ben@example.org",
                "congregation": "South",
                "forms_of_service": ["Bishop"],
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .put_json(
            "/api/attendants",
            &json!({
                "event_id": event_id,
                "attendants": [
                    {
                        "first_name": "Anna",
                        "last_name": "Berg-Lund",
                        "email": "anna.berg@example.org",
                        "congregation": "North",
                        "forms_of_service": "Elder, Regular Pioneer",
                    },
                    {
                        "first_name": "Ben",
                        "last_name": "Cole",
                        "email": "ben@example.org",
                        "congregation": "South",
                        "forms_of_service": "Ministerial Servant, Astronaut",
                    },
                    { "first_name": "", "last_name": "Nobody", "email": "broken" },
                ],
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["data"]["created"], 1);
    assert_eq!(body["data"]["updated"], 1);
    assert_eq!(body["data"]["errors"][0]["row"], 3);

    let response = app
        .get(&format!("/api/attendants/{anna}"), Some(&token))
        .await?;
    let body = body_json(response).await?;
    assert_eq!(body["data"]["last_name"], "Berg-Lund");
    assert!(body["data"]["phone"].is_string());
    assert_eq!(body["data"]["is_active"], true);
    assert_eq!(
        body["data"]["forms_of_service"],
        json!(["Elder", "Regular Pioneer"])
    );

    let response = app
        .get(&format!("/api/events/{event_id}/attendants"), Some(&token))
        .await?;
    let body = body_json(response).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let response = app
        .get("/api/attendants?include_stats=true&congregation=South", Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["data"]["attendants"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["attendants"][0]["first_name"], "Ben");
    assert_eq!(body["data"]["stats"]["total"], 2);

    let response = app
        .post_json(
            &format!("/api/attendants/{anna}/pin"),
            &json!({ "auto_generate": true }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["data"]["pin"], "4321");

    let response = app
        .post_json(
            &format!("/api/attendants/{anna}/pin"),
            &json!({ "pin": "12a4" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete(&format!("/api/attendants/{anna}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .get(&format!("/api/attendants/{anna}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn attendant_portal_login_and_dashboard() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("admin@example.org", "admin-pass", "ADMIN")
        .await?;
    let token = app.login_token("admin@example.org", "admin-pass").await?;
    let event_id = app.create_event(&token, "Convention").await?;
    let position_id = app.create_position(&token, event_id, 7).await?;
    let anna = app
        .insert_attendant("Anna", "Berg", "North", Some("2468"))
        .await?;
    let ben = app
        .insert_attendant("Ben", "Cole", "South", Some("1357"))
        .await?;

    let login = json!({
        "first_name": "anna",
        "last_name": "BERG",
        "congregation": "north",
        "pin": "2468",
    });

    let response = app
        .post_json("/api/attendant/login", &login, None)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            &format!("/api/events/{event_id}/assignments"),
            &json!({ "attendant_id": anna, "position_id": position_id }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .put_json(
            &format!("/api/events/{event_id}/positions/{position_id}/oversight"),
            &json!({ "keyman_id": ben }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            "/api/attendant/login",
            &json!({
                "first_name": "Anna",
                "last_name": "Berg",
                "congregation": "North",
                "pin": "9999",
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_json("/api/attendant/login", &login, None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["message"], "Welcome, Anna!");
    assert_eq!(body["data"]["needs_event_selection"], false);
    assert_eq!(json_id(&body["data"]["default_event"])?, event_id);
    let attendant_token = body["data"]["token"].as_str().unwrap().to_string();

    let response = app
        .get("/api/attendant/dashboard", Some(&attendant_token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(json_id(&body["data"]["event"])?, event_id);
    let assignments = body["data"]["assignments"].as_array().unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0]["position_number"], 7);
    assert_eq!(assignments[0]["keyman"]["first_name"], "Ben");
    let contacts = body["data"]["oversight_contacts"].as_array().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["role"], "Position Keyman");

    let response = app.get("/api/events", Some(&attendant_token)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/attendant/dashboard", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
