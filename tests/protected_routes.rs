use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt; // for `oneshot`

use farm_authz::authz::{Role, UserId};
use farm_authz::create_app;
use farm_authz::errors::FORBIDDEN_MESSAGE;
use farm_authz::jwt::JwtConfig;

async fn setup() -> Result<(TempDir, Router)> {
    let dir = tempdir()?;
    let db_path = dir.path().join("test.db");

    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let seed = [
        "INSERT INTO users (id, email) VALUES ('U1', 'u1@example.com'), ('U2', 'u2@example.com'), ('U9', 'u9@example.com')",
        "INSERT INTO fields (id, user_id, name) VALUES ('1', 'U1', 'North'), ('3', 'U9', 'South')",
        "INSERT INTO pens (id, field_id, name) VALUES (3, '1', 'Pen A'), (12, '3', 'Pen Z')",
        "INSERT INTO reports (id, field_id, name) VALUES (2, '3', 'Spring')",
        "INSERT INTO pen_variable_type_of_objects (id, pen_id) VALUES (7, 3)",
        "INSERT INTO measurements (id, pen_variable_type_of_object_id, report_id, value) VALUES (42, 7, 2, '12.5')",
        "INSERT INTO productivities (id, user_id, report_id, period) VALUES (6, 'U2', 2, '2024-Q2')",
    ];
    for statement in seed {
        sqlx::query(statement).execute(&pool).await?;
    }

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool).await?;

    Ok((dir, app))
}

fn token(user: &str, role: Role) -> Result<String> {
    Ok(JwtConfig::new("test-secret", 1).encode(&UserId::from(user), role)?)
}

// Signs arbitrary claims, for role values the app itself never issues.
fn raw_token(user: &str, role: &str) -> Result<String> {
    let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
    let claims = json!({"sub": user, "role": role, "exp": exp, "iat": 0});
    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(b"test-secret"),
    )?)
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes)?
    };
    Ok((status, value))
}

fn assert_uniform_forbidden(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::FORBIDDEN, "expected 403, got {} - {}", status, body);
    assert_eq!(body, &json!({"error": "forbidden", "message": FORBIDDEN_MESSAGE}));
}

#[tokio::test]
async fn owner_reads_and_stranger_is_forbidden() -> Result<()> {
    let (_dir, app) = setup().await?;
    let owner = token("U1", Role::User)?;
    let stranger = token("U2", Role::User)?;

    let (status, body) = send(&app, "GET", "/measurements/42", Some(&owner), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body.get("id"), Some(&json!(42)));
    assert_eq!(body.get("value"), Some(&json!("12.5")));

    let (status, body) = send(&app, "GET", "/measurements/42", Some(&stranger), None).await?;
    assert_uniform_forbidden(status, &body);

    Ok(())
}

#[tokio::test]
async fn missing_foreign_and_malformed_look_the_same() -> Result<()> {
    let (_dir, app) = setup().await?;
    let owner = token("U1", Role::User)?;

    for uri in ["/measurements/9999", "/measurements/abc", "/pens/12", "/fields/nope"] {
        let (status, body) = send(&app, "GET", uri, Some(&owner), None).await?;
        assert_uniform_forbidden(status, &body);
    }

    Ok(())
}

#[tokio::test]
async fn admin_bypasses_ownership() -> Result<()> {
    let (_dir, app) = setup().await?;
    let admin = token("A1", Role::Admin)?;

    let (status, body) = send(&app, "GET", "/pens/12", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);

    // The handler, not the guard, reports missing rows to an administrator.
    let (status, body) = send(&app, "GET", "/measurements/9999", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);

    Ok(())
}

#[tokio::test]
async fn authentication_failures_stay_unauthorized() -> Result<()> {
    let (_dir, app) = setup().await?;

    let (status, _) = send(&app, "GET", "/measurements/42", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "GET", "/measurements/42", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn selector_routes_check_the_parent() -> Result<()> {
    let (_dir, app) = setup().await?;
    let u1 = token("U1", Role::User)?;
    let u9 = token("U9", Role::User)?;

    let (status, body) = send(&app, "GET", "/fields/3/pens", Some(&u9), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let pens = body.as_array().cloned().unwrap_or_default();
    assert_eq!(pens.len(), 1);
    assert_eq!(pens[0].get("id"), Some(&json!(12)));

    let (status, body) = send(&app, "GET", "/fields/3/pens", Some(&u1), None).await?;
    assert_uniform_forbidden(status, &body);

    let (status, body) = send(&app, "GET", "/reports/2/measurements", Some(&u9), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (status, body) = send(&app, "GET", "/reports/2/measurements", Some(&u1), None).await?;
    assert_uniform_forbidden(status, &body);

    Ok(())
}

#[tokio::test]
async fn users_may_only_read_themselves() -> Result<()> {
    let (_dir, app) = setup().await?;
    let u1 = token("U1", Role::User)?;

    let (status, body) = send(&app, "GET", "/users/U1", Some(&u1), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body.get("email"), Some(&json!("u1@example.com")));

    let (status, body) = send(&app, "GET", "/users/U2", Some(&u1), None).await?;
    assert_uniform_forbidden(status, &body);

    Ok(())
}

#[tokio::test]
async fn create_measurement_checks_body_identifier() -> Result<()> {
    let (_dir, app) = setup().await?;
    let owner = token("U1", Role::User)?;
    let stranger = token("U2", Role::User)?;

    let (status, body) = send(
        &app,
        "POST",
        "/measurements",
        Some(&owner),
        Some(json!({"pen_variable_type_of_object_id": 7, "value": "3.1"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body.get("pen_variable_type_of_object_id"), Some(&json!(7)));
    assert_eq!(body.get("value"), Some(&json!("3.1")));

    // String identifiers are accepted too.
    let (status, body) = send(
        &app,
        "POST",
        "/measurements",
        Some(&owner),
        Some(json!({"pen_variable_type_of_object_id": "7"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, body) = send(
        &app,
        "POST",
        "/measurements",
        Some(&stranger),
        Some(json!({"pen_variable_type_of_object_id": 7, "value": "1"})),
    )
    .await?;
    assert_uniform_forbidden(status, &body);

    let (status, body) = send(&app, "POST", "/measurements", Some(&owner), Some(json!({"value": "1"}))).await?;
    assert_uniform_forbidden(status, &body);

    Ok(())
}

#[tokio::test]
async fn unknown_role_claim_is_a_plain_user() -> Result<()> {
    let (_dir, app) = setup().await?;

    let vet = raw_token("U1", "VETERINARIAN")?;
    let (status, body) = send(&app, "GET", "/fields/1", Some(&vet), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);

    let (status, body) = send(&app, "GET", "/fields/3", Some(&vet), None).await?;
    assert_uniform_forbidden(status, &body);

    // Lowercase admin still elevates.
    let admin = raw_token("A1", "admin")?;
    let (status, body) = send(&app, "GET", "/fields/1", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);

    Ok(())
}

#[tokio::test]
async fn productivity_is_readable_by_either_owner() -> Result<()> {
    let (_dir, app) = setup().await?;

    for user in ["U2", "U9"] {
        let (status, body) = send(&app, "GET", "/productivities/6", Some(&token(user, Role::User)?), None).await?;
        assert_eq!(status, StatusCode::OK, "{} - {}", user, body);
        assert_eq!(body.get("period"), Some(&json!("2024-Q2")));
    }

    let (status, body) = send(&app, "GET", "/productivities/6", Some(&token("U1", Role::User)?), None).await?;
    assert_uniform_forbidden(status, &body);

    Ok(())
}
