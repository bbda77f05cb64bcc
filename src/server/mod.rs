mod app;
mod middleware;
mod state;

pub use app::create_app;
pub use middleware::track_http_metrics;
pub use state::AppState;
