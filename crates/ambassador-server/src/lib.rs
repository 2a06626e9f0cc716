pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, PolicyConfig, ServerConfig};
pub use observability::init_tracing;
pub use server::{
    AmbassadorServer, AuthResponse, ServerBuilder, build_app, gatekeeper_from_config,
    start_policy_watch,
};
