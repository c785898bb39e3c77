use crate::config::GatewayConfig;
use crate::ledger::UsageLedger;
use crate::payment::{PaymentFacilitator, PaymentRoutes};
use crate::routes::services::build_payment_requirements;
use crate::services::AppConfig;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    /// Validated service catalog
    pub catalog: Arc<AppConfig>,
    /// Payment table consulted by the payment gate
    pub payment_routes: Arc<PaymentRoutes>,
    pub ledger: Arc<UsageLedger>,
    pub facilitator: Arc<dyn PaymentFacilitator>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        catalog: Arc<AppConfig>,
        ledger: Arc<UsageLedger>,
        facilitator: Arc<dyn PaymentFacilitator>,
    ) -> Self {
        let payment_routes = build_payment_requirements(&catalog);
        Self {
            config: Arc::new(config),
            catalog,
            payment_routes: Arc::new(payment_routes),
            ledger,
            facilitator,
        }
    }
}
