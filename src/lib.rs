pub mod app;
pub mod authz;
pub mod db;
pub mod errors;
pub mod jwt;
pub mod routes;

// Re-export commonly used items for tests
pub use app::create_app;
