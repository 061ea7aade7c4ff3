use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post, MethodRouter};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{
    require_ownership, Catalog, DefaultOwnershipEvaluator, Entity, IdLocation, OwnedResource, OwnershipEvaluator, OwnershipGuard,
    ResourceType, Selector,
};
use crate::db::SqliteRecordReader;
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::routes::{health, records};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub catalog: Arc<Catalog>,
    pub records: SqliteRecordReader,
    pub authz: Arc<dyn OwnershipEvaluator>,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, catalog: Catalog) -> Self {
        let catalog = Arc::new(catalog);
        let records = SqliteRecordReader::new(pool.clone());
        let authz = DefaultOwnershipEvaluator::new(catalog.clone(), Arc::new(records.clone()));

        Self {
            pool,
            jwt: Arc::new(jwt),
            catalog,
            records,
            authz: Arc::new(authz),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let catalog = Catalog::standard()?;
    let state = AppState::new(pool, jwt_config, catalog);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    // Unknown tags fail here, at startup.
    let user_declaration = OwnedResource::parse("user", "user_id", IdLocation::Path, None)?;

    let field_routes = Router::new()
        .route(
            "/:field_id",
            guarded(&state, OwnedResource::new(ResourceType::Field, "field_id"), records::show(Entity::Field)),
        )
        .route(
            "/:field_id/pens",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Pen, "field_id").by(Selector::Field),
                records::children(Entity::Pen, "field_id"),
            ),
        )
        .route(
            "/:field_id/reports",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Report, "field_id").by(Selector::Field),
                records::children(Entity::Report, "field_id"),
            ),
        )
        .route(
            "/:field_id/subjects",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Subject, "field_id").by(Selector::Field),
                records::children(Entity::Subject, "field_id"),
            ),
        );

    let report_routes = Router::new()
        .route(
            "/:report_id",
            guarded(&state, OwnedResource::new(ResourceType::Report, "report_id"), records::show(Entity::Report)),
        )
        .route(
            "/:report_id/measurements",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Measurement, "report_id").by(Selector::Report),
                records::children(Entity::Measurement, "report_id"),
            ),
        );

    let subject_routes = Router::new()
        .route(
            "/:subject_id",
            guarded(&state, OwnedResource::new(ResourceType::Subject, "subject_id"), records::show(Entity::Subject)),
        )
        .route(
            "/:subject_id/measurements",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Measurement, "subject_id").by(Selector::Subject),
                records::children(Entity::Measurement, "subject_id"),
            ),
        );

    let measurement_routes = Router::new()
        .route(
            "/",
            guarded(
                &state,
                OwnedResource::new(ResourceType::PenVariableType, "pen_variable_type_of_object_id").from_body(),
                post(records::create_measurement),
            ),
        )
        .route(
            "/:measurement_id",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Measurement, "measurement_id"),
                records::show(Entity::Measurement),
            ),
        );

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/fields", field_routes)
        .nest("/reports", report_routes)
        .nest("/subjects", subject_routes)
        .nest("/measurements", measurement_routes)
        .route(
            "/pens/:pen_id",
            guarded(&state, OwnedResource::new(ResourceType::Pen, "pen_id"), records::show(Entity::Pen)),
        )
        .route(
            "/variables/:variable_id",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Variable, "variable_id"),
                records::show(Entity::Variable),
            ),
        )
        .route(
            "/type-of-objects/:type_of_object_id",
            guarded(
                &state,
                OwnedResource::new(ResourceType::TypeOfObject, "type_of_object_id"),
                records::show(Entity::TypeOfObject),
            ),
        )
        .route(
            "/pen-variable-types/:pen_variable_type_id",
            guarded(
                &state,
                OwnedResource::new(ResourceType::PenVariableType, "pen_variable_type_id"),
                records::show(Entity::PenVariableTypeOfObject),
            ),
        )
        .route(
            "/productivities/:productivity_id",
            guarded(
                &state,
                OwnedResource::new(ResourceType::Productivity, "productivity_id"),
                records::show(Entity::Productivity),
            ),
        )
        .route(
            "/users/:user_id",
            guarded(&state, user_declaration, records::show(Entity::User)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

/// Attaches an ownership declaration to a route. The guard runs after
/// routing, so path parameters are available to it.
fn guarded(state: &AppState, declaration: OwnedResource, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
    let guard = OwnershipGuard::new(state.clone(), declaration);
    route.route_layer(middleware::from_fn_with_state(guard, require_ownership))
}
