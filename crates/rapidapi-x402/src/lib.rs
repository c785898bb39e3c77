pub mod config;
pub mod cors;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod middleware;
pub mod payment;
pub mod proxy;
pub mod routes;
pub mod services;
pub mod state;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use ledger::UsageLedger;
pub use services::{load_app_config, AppConfig};
pub use state::AppState;
