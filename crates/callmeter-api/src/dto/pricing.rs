//! Pricing DTOs

use callmeter_core::models::RatingModel;
use callmeter_services::PricingUpdate;
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

/// Pricing upsert request. Money bounds are checked by the pricing
/// service; this only guards the shape.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PricingRequest {
    #[serde(default)]
    pub rating_model: RatingModel,
    pub base_price: Decimal,
    #[serde(default)]
    pub discount_percent: Decimal,
    #[validate(range(min = 1, max = 1440))]
    pub included_minutes: Option<u32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl From<PricingRequest> for PricingUpdate {
    fn from(req: PricingRequest) -> Self {
        PricingUpdate {
            rating_model: req.rating_model,
            base_price: req.base_price,
            discount_percent: req.discount_percent,
            included_minutes: req.included_minutes,
            is_active: req.is_active,
        }
    }
}
