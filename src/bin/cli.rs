use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use farm_authz::authz::{Catalog, DefaultOwnershipEvaluator, OwnershipEvaluator, Principal, ResourceType, Role, Selector, UserId};
use farm_authz::db::SqliteRecordReader;
use farm_authz::jwt::JwtConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "farm ownership tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Print the owning users of a resource, one per line
    Resolve {
        #[arg(long = "type")]
        resource_type: String,
        #[arg(long)]
        id: String,
        /// Reinterpret the id as the id of this entity (field, report, subject)
        #[arg(long)]
        by: Option<String>,
    },
    /// Evaluate an ownership decision for a user
    Check {
        #[arg(long)]
        user: String,
        #[arg(long)]
        admin: bool,
        #[arg(long = "type")]
        resource_type: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        by: Option<String>,
    },
    /// Mint a bearer token signed with JWT_SECRET
    Token {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "USER")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; fall back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::Resolve { resource_type, id, by } => {
            let resource_type: ResourceType = resource_type.parse()?;
            let selector = by.as_deref().map(str::parse::<Selector>).transpose()?;
            let evaluator = get_evaluator().await?;
            let owners = evaluator
                .resolve_owners(resource_type, &id, selector)
                .await
                .with_context(|| format!("could not resolve owner of {resource_type} {id}"))?;
            for owner in owners {
                println!("{owner}");
            }
        }
        Commands::Check {
            user,
            admin,
            resource_type,
            id,
            by,
        } => {
            let role = if admin { Role::Admin } else { Role::User };
            let principal = Principal::new(UserId::new(user)).with_role(role);
            let evaluator = get_evaluator().await?;
            let decision = evaluator
                .authorize_tagged(&principal, &resource_type, Some(&id), by.as_deref())
                .await;
            println!("{decision:?}");
        }
        Commands::Token { user, role } => {
            let role: Role = role.parse().map_err(anyhow::Error::msg)?;
            let config = JwtConfig::from_env()?;
            println!("{}", config.encode(&UserId::new(user), role)?);
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn get_evaluator() -> anyhow::Result<DefaultOwnershipEvaluator> {
    let pool = get_pool().await?;
    let catalog = Catalog::standard()?;
    Ok(DefaultOwnershipEvaluator::new(
        Arc::new(catalog),
        Arc::new(SqliteRecordReader::new(pool)),
    ))
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) {
            "applied"
        } else {
            "pending"
        };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    // Prefer ./migrations when run from the repo root, else the crate-local folder.
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}
