pub mod metrics;
mod routes;

pub use routes::{make_admin_router, run_admin_server};
