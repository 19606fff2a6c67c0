//! Upload templates
//!
//! Header-only files that show submitters the exact column layout each
//! upload type expects.

pub mod routes;

pub use routes::templates_routes;
