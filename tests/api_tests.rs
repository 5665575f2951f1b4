//! Time logs, team views and admin management through the HTTP surface.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use serde_json::json;

use clockhub::config::ServerConfig;
use clockhub::storage::models::Role;
use clockhub::storage::SharedStore;
use common::TestApp;

fn hub(cookie: &str) -> [(&str, &str); 2] {
    [("cookie", cookie), ("x-app-type", "hub")]
}

#[tokio::test]
async fn clock_in_and_out_on_the_kiosk() {
    let app = TestApp::new();
    app.seed("Ada", "123456", Role::Member);
    let key = app.clock_login("123456").await;
    let cookie = format!("clock_sessionid={}", key);
    let h = [("cookie", cookie.as_str())];

    let status = app.get("/api/clock/current_status/", &h).await.json();
    assert_eq!(status["is_clocked_in"], false);

    let r = app.post("/api/clock/clock_in/", &h, json!({})).await;
    assert_eq!(r.status, StatusCode::CREATED);
    assert_eq!(r.json()["is_active"], true);

    let again = app.post("/api/clock/clock_in/", &h, json!({})).await;
    assert_eq!(again.status, StatusCode::CONFLICT);

    // Kiosk sessions last two minutes, so stay inside that window.
    app.time.advance(Duration::seconds(60));
    let out = app.post("/api/clock/clock_out/", &h, json!({})).await;
    assert_eq!(out.status, StatusCode::OK);
    assert_eq!(out.json()["is_active"], false);
    assert_eq!(out.json()["duration"], 0.02);

    let none_open = app.post("/api/clock/clock_out/", &h, json!({})).await;
    assert_eq!(none_open.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn concurrent_clock_in_opens_one_log() {
    let app = TestApp::new();
    let ada = app.seed("Ada", "123456", Role::Member);
    let key = app.hub_login("123456").await;
    let cookie = format!("hub_sessionid={}", key);
    let h = hub(&cookie);

    let (a, b) = tokio::join!(
        app.post("/api/time-logs/clock_in/", &h, json!({})),
        app.post("/api/time-logs/clock_in/", &h, json!({})),
    );
    let mut codes = vec![a.status, b.status];
    codes.sort();
    assert_eq!(codes, vec![StatusCode::CREATED, StatusCode::CONFLICT]);
    assert_eq!(app.store.read(|t| t.logs_for(ada.id).iter().filter(|l| l.is_active()).count()), 1);
}

#[tokio::test]
async fn own_logs_and_csv_export() {
    let app = TestApp::new();
    app.seed("Ada", "123456", Role::Member);
    let key = app.hub_login("123456").await;
    let cookie = format!("hub_sessionid={}", key);
    let h = hub(&cookie);

    app.post("/api/time-logs/clock_in/", &h, json!({})).await;
    app.time.advance(Duration::minutes(45));
    app.post("/api/time-logs/clock_out/", &h, json!({})).await;

    let logs = app.get("/api/time-logs/", &h).await.json();
    assert_eq!(logs.as_array().unwrap().len(), 1);
    assert_eq!(logs[0]["user_name"], "Ada");

    let csv = app.get("/api/time-logs/export_csv/?start_date=2025-03-01&end_date=2025-03-31", &h).await;
    assert_eq!(csv.status, StatusCode::OK);
    assert_eq!(csv.headers["content-type"], "text/csv");
    assert_eq!(csv.headers["content-disposition"], "attachment; filename=\"time_logs_123456.csv\"");
    let mut lines = csv.text.lines();
    assert_eq!(lines.next(), Some("Date,Clock In,Clock Out,Duration (hours)"));
    assert_eq!(lines.next(), Some("2025-03-05,09:00:00,09:45:00,0.75"));

    let outside = app.get("/api/time-logs/export_csv/?start_date=2025-04-01", &h).await;
    assert_eq!(outside.text.lines().count(), 1);

    let bad = app.get("/api/time-logs/export_csv/?start_date=yesterday", &h).await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn roles_gate_management_endpoints() {
    let app = TestApp::new();
    app.seed("Root", "111111", Role::Admin);
    app.seed("Mia", "222222", Role::Member);

    assert_eq!(app.get("/api/admin/", &[]).await.status, StatusCode::UNAUTHORIZED);

    let member = format!("hub_sessionid={}", app.hub_login("222222").await);
    assert_eq!(app.get("/api/admin/", &hub(&member)).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.get("/api/team/", &hub(&member)).await.status, StatusCode::FORBIDDEN);
    assert_eq!(app.get("/api/allowed-ips/", &hub(&member)).await.status, StatusCode::FORBIDDEN);

    let admin = format!("hub_sessionid={}", app.hub_login("111111").await);
    let stats = app.get("/api/admin/", &hub(&admin)).await;
    assert_eq!(stats.status, StatusCode::OK);
    assert_eq!(stats.json()["total_users"], 2);
    assert_eq!(stats.json()["active_sessions"], 0);
}

#[tokio::test]
async fn admin_user_management() {
    let app = TestApp::new();
    app.seed("Root", "111111", Role::Admin);
    let admin = format!("hub_sessionid={}", app.hub_login("111111").await);
    let h = hub(&admin);

    let created = app.post("/api/admin/create_user/", &h, json!({ "full_name": "Mia", "target_hours_per_week": 8 })).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let user = created.json();
    assert_eq!(user["role"], "member");
    let code = user["access_code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);
    let id = user["id"].as_i64().unwrap();

    let dup = app.post("/api/users/", &h, json!({ "full_name": "Other", "access_code": code })).await;
    assert_eq!(dup.status, StatusCode::CONFLICT);

    let bad_role = app
        .send(Method::PATCH, &format!("/api/admin/{}/update_user_role/", id), &h, Some(json!({ "role": "owner" })))
        .await;
    assert_eq!(bad_role.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad_role.json()["message"], "Invalid role");

    let promoted = app
        .send(Method::PATCH, &format!("/api/admin/{}/update_user_role/", id), &h, Some(json!({ "role": "chair" })))
        .await;
    assert_eq!(promoted.json()["role"], "chair");

    let regen = app.post(&format!("/api/admin/{}/regenerate_access_code/", id), &h, json!({})).await;
    assert_eq!(regen.status, StatusCode::OK);
    let body = regen.json();
    assert_eq!(body["old_access_code"], code.as_str());
    assert_ne!(body["new_access_code"], code.as_str());

    let deleted = app.send(Method::DELETE, &format!("/api/admin/{}/delete_user/", id), &h, None).await;
    assert_eq!(deleted.json()["message"], "User deleted successfully");
    assert_eq!(app.get(&format!("/api/users/{}/", id), &h).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn allowlist_crud() {
    let app = TestApp::new();
    let root = app.seed("Root", "111111", Role::Admin);
    let admin = format!("hub_sessionid={}", app.hub_login("111111").await);
    let h = hub(&admin);

    let created = app.post("/api/allowed-ips/", &h, json!({ "ip_address": "203.0.113.9", "label": "Lobby" })).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let entry = created.json();
    assert_eq!(entry["created_by"], root.id);
    let id = entry["id"].as_i64().unwrap();

    let dup = app.post("/api/allowed-ips/", &h, json!({ "ip_address": "203.0.113.9" })).await;
    assert_eq!(dup.status, StatusCode::CONFLICT);
    let invalid = app.post("/api/allowed-ips/", &h, json!({ "ip_address": "999.1.1.1" })).await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

    let cleared = app.send(Method::PATCH, &format!("/api/allowed-ips/{}/", id), &h, Some(json!({ "label": null }))).await;
    assert_eq!(cleared.json()["label"], serde_json::Value::Null);

    let removed = app.send(Method::DELETE, &format!("/api/allowed-ips/{}/", id), &h, None).await;
    assert_eq!(removed.status, StatusCode::NO_CONTENT);
    assert!(!app.store.read(|t| t.is_ip_allowlisted("203.0.113.9")));
}

#[tokio::test]
async fn committee_chair_lifecycle() {
    let app = TestApp::new();
    app.seed("Root", "111111", Role::Admin);
    let chair = app.seed("Cal", "333333", Role::Member);
    let mia = app.seed("Mia", "222222", Role::Member);
    let admin = format!("hub_sessionid={}", app.hub_login("111111").await);
    let h = hub(&admin);

    let created = app
        .post("/api/committees/", &h, json!({ "name": "Outreach", "chair": chair.id, "members": [mia.id] }))
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let committee = created.json();
    assert_eq!(committee["member_count"], 2);
    assert_eq!(committee["chair_name"], "Cal");
    let cid = committee["id"].as_i64().unwrap();
    assert_eq!(app.store.read(|t| t.identity(chair.id).unwrap().role), Role::Chair);

    // The chair now sees their team.
    let chair_cookie = format!("hub_sessionid={}", app.hub_login("333333").await);
    let team = app.get("/api/team/", &hub(&chair_cookie)).await.json();
    assert_eq!(team.as_array().unwrap().len(), 1);
    assert_eq!(team[0]["id"], mia.id.to_string());
    let summary = app.get("/api/chair/team_summary/", &hub(&chair_cookie)).await.json();
    assert_eq!(summary["online_members"], 0);
    let sheet = app.get(&format!("/api/team/{}/member_timesheet/", mia.id), &hub(&chair_cookie)).await;
    assert_eq!(sheet.status, StatusCode::OK);

    // The chair cannot be removed while seated.
    let kept = app.post(&format!("/api/committees/{}/remove_members/", cid), &h, json!({ "member_ids": [chair.id, mia.id] })).await;
    assert_eq!(kept.json()["committee"]["member_count"], 1);

    let dup = app.post("/api/committees/", &h, json!({ "name": "Outreach" })).await;
    assert_eq!(dup.status, StatusCode::CONFLICT);

    let deleted = app.send(Method::DELETE, &format!("/api/committees/{}/", cid), &h, None).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    assert_eq!(app.store.read(|t| t.identity(chair.id).unwrap().role), Role::Member);
}

#[tokio::test]
async fn changes_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let app = TestApp::with_store(SharedStore::open(dir.path()).unwrap(), ServerConfig::default());
        app.seed("Root", "111111", Role::Admin);
        let admin = format!("hub_sessionid={}", app.hub_login("111111").await);
        let r = app.post("/api/admin/create_user/", &hub(&admin), json!({ "full_name": "Mia" })).await;
        assert_eq!(r.status, StatusCode::CREATED);
    }
    let reopened = SharedStore::open(dir.path()).unwrap();
    let names: Vec<String> = reopened.read(|t| t.identities_by_name().into_iter().map(|u| u.full_name).collect());
    assert_eq!(names, vec!["Mia".to_string(), "Root".to_string()]);
}
