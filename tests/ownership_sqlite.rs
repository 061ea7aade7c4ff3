use std::sync::Arc;

use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};

use farm_authz::authz::{
    resolve_owner, resolve_owners, Catalog, Decision, DefaultOwnershipEvaluator, Entity, OwnershipEvaluator, Principal, RecordReader,
    ResolveError, ResourceType, Scalar, Selector, UserId,
};
use farm_authz::db::SqliteRecordReader;

// Keeps the tempdir alive for as long as the pool is used.
async fn seeded_pool() -> Result<(TempDir, SqlitePool)> {
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
        "INSERT INTO pens (id, field_id, name) VALUES (3, '1', 'Pen A')",
        "INSERT INTO reports (id, field_id, name) VALUES (2, '3', 'Spring')",
        "INSERT INTO subjects (id, field_id, name) VALUES (4, '1', 'Cow 4')",
        "INSERT INTO variables (id, user_id, name) VALUES (8, 'U2', 'Weight')",
        "INSERT INTO type_of_objects (id, user_id, name) VALUES (5, 'U2', 'Animal')",
        "INSERT INTO pen_variable_type_of_objects (id, pen_id, variable_id, type_of_object_id) VALUES (7, 3, 8, 5)",
        "INSERT INTO measurements (id, pen_variable_type_of_object_id, report_id, subject_id, value) VALUES (42, 7, 2, 4, '12.5')",
        "INSERT INTO productivities (id, user_id, report_id, period) VALUES (5, NULL, 2, '2024-Q1'), (6, 'U2', 2, '2024-Q2')",
    ];
    for statement in seed {
        sqlx::query(statement).execute(&pool).await?;
    }

    Ok((dir, pool))
}

#[tokio::test]
async fn measurement_resolves_through_the_full_chain() -> Result<()> {
    let (_dir, pool) = seeded_pool().await?;
    let reader = SqliteRecordReader::new(pool);
    let catalog = Catalog::standard()?;

    let owner = resolve_owner(&reader, &catalog, ResourceType::Measurement, "42", None).await?;
    assert_eq!(owner, UserId::from("U1"));

    // Selectors reinterpret the id as the id of a parent entity.
    let by_report = resolve_owner(&reader, &catalog, ResourceType::Measurement, "2", Some(Selector::Report)).await?;
    assert_eq!(by_report, UserId::from("U9"));
    let by_subject = resolve_owner(&reader, &catalog, ResourceType::Measurement, "4", Some(Selector::Subject)).await?;
    assert_eq!(by_subject, UserId::from("U1"));

    Ok(())
}

#[tokio::test]
async fn pen_selector_reads_the_id_as_a_field() -> Result<()> {
    let (_dir, pool) = seeded_pool().await?;
    let reader = SqliteRecordReader::new(pool);
    let catalog = Catalog::standard()?;

    let pen_owner = resolve_owner(&reader, &catalog, ResourceType::Pen, "3", None).await?;
    assert_eq!(pen_owner, UserId::from("U1"));

    let field_owner = resolve_owner(&reader, &catalog, ResourceType::Pen, "3", Some(Selector::Field)).await?;
    assert_eq!(field_owner, UserId::from("U9"));

    Ok(())
}

#[tokio::test]
async fn flat_and_derived_types_resolve() -> Result<()> {
    let (_dir, pool) = seeded_pool().await?;
    let reader = SqliteRecordReader::new(pool);
    let catalog = Catalog::standard()?;

    let cases = [
        (ResourceType::Field, "1", "U1"),
        (ResourceType::Report, "2", "U9"),
        (ResourceType::Subject, "4", "U1"),
        (ResourceType::Variable, "8", "U2"),
        (ResourceType::TypeOfObject, "5", "U2"),
        (ResourceType::PenVariableType, "7", "U1"),
        (ResourceType::User, "U9", "U9"),
    ];
    for (resource_type, id, expected) in cases {
        let owner = resolve_owner(&reader, &catalog, resource_type, id, None).await?;
        assert_eq!(owner, UserId::from(expected), "{resource_type} {id}");
    }

    Ok(())
}

#[tokio::test]
async fn productivity_is_owned_through_either_link() -> Result<()> {
    let (_dir, pool) = seeded_pool().await?;
    let reader = SqliteRecordReader::new(pool);
    let catalog = Catalog::standard()?;

    let direct = resolve_owner(&reader, &catalog, ResourceType::Productivity, "6", None).await?;
    assert_eq!(direct, UserId::from("U2"));

    let via_report = resolve_owner(&reader, &catalog, ResourceType::Productivity, "5", None).await?;
    assert_eq!(via_report, UserId::from("U9"));

    // With both links set, the direct owner and the report's field owner
    // both own the record.
    let owners = resolve_owners(&reader, &catalog, ResourceType::Productivity, "6", None).await?;
    assert_eq!(owners, vec![UserId::from("U2"), UserId::from("U9")]);

    let evaluator = DefaultOwnershipEvaluator::new(Arc::new(catalog), Arc::new(reader));
    for user in ["U2", "U9"] {
        let decision = evaluator
            .authorize(&Principal::new(user), ResourceType::Productivity, Some("6"), None)
            .await;
        assert_eq!(decision, Decision::Allow, "{user}");
    }
    let decision = evaluator
        .authorize(&Principal::new("U1"), ResourceType::Productivity, Some("6"), None)
        .await;
    assert_eq!(decision, Decision::Deny);

    Ok(())
}

#[tokio::test]
async fn deleting_a_parent_breaks_the_chain() -> Result<()> {
    let (_dir, pool) = seeded_pool().await?;
    let reader = SqliteRecordReader::new(pool.clone());
    let catalog = Catalog::standard()?;

    sqlx::query("DELETE FROM fields WHERE id = '1'").execute(&pool).await?;

    let pen = reader.fetch(Entity::Pen, &Scalar::Integer(3)).await?.expect("pen row remains");
    assert_eq!(pen.get("field_id"), Some(None));

    let err = resolve_owner(&reader, &catalog, ResourceType::Measurement, "42", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::NotFound { entity: Entity::Pen, .. }), "{err:?}");

    let evaluator = DefaultOwnershipEvaluator::new(Arc::new(catalog), Arc::new(reader));
    let owner = Principal::new("U1");
    assert_eq!(
        evaluator.authorize(&owner, ResourceType::Measurement, Some("42"), None).await,
        Decision::Deny
    );
    assert_eq!(
        evaluator
            .authorize(&Principal::admin("A1"), ResourceType::Measurement, Some("42"), None)
            .await,
        Decision::Allow
    );

    Ok(())
}

#[tokio::test]
async fn missing_and_malformed_ids_deny() -> Result<()> {
    let (_dir, pool) = seeded_pool().await?;
    let reader = SqliteRecordReader::new(pool);
    let catalog = Catalog::standard()?;

    let err = resolve_owner(&reader, &catalog, ResourceType::Measurement, "abc", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::InvalidId { .. }), "{err:?}");

    let err = resolve_owner(&reader, &catalog, ResourceType::Measurement, "9999", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolveError::NotFound { entity: Entity::Measurement, .. }), "{err:?}");

    let evaluator = DefaultOwnershipEvaluator::new(Arc::new(catalog), Arc::new(reader));
    let decision = evaluator
        .authorize_tagged(&Principal::new("U1"), "widget", Some("1"), None)
        .await;
    assert_eq!(decision, Decision::Deny);
    let decision = evaluator
        .authorize_tagged(&Principal::admin("A1"), "widget", Some("1"), None)
        .await;
    assert_eq!(decision, Decision::Allow);

    Ok(())
}

#[tokio::test]
async fn list_by_returns_children_in_key_order() -> Result<()> {
    let (_dir, pool) = seeded_pool().await?;
    sqlx::query("INSERT INTO pens (id, field_id, name) VALUES (10, '1', 'Pen B'), (11, '3', 'Pen C')")
        .execute(&pool)
        .await?;
    let reader = SqliteRecordReader::new(pool);

    let pens = reader
        .list_by(Entity::Pen, "field_id", &Scalar::Text("1".to_string()))
        .await?;
    let ids: Vec<Option<&Scalar>> = pens.iter().filter_map(|pen| pen.get("id")).collect();
    assert_eq!(ids, vec![Some(&Scalar::Integer(3)), Some(&Scalar::Integer(10))]);

    let err = reader
        .list_by(Entity::Pen, "password", &Scalar::Integer(1))
        .await
        .unwrap_err();
    assert!(matches!(err, farm_authz::authz::StorageError::UnknownColumn { .. }));

    Ok(())
}
