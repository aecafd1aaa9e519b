use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a ride's counter-offer set stays live without being touched.
pub const OFFER_TTL_SECONDS: i64 = 600;

/// A driver's ephemeral counter-offer for a ride. Keyed by
/// (ride_id, driver_id); a newer offer from the same driver replaces the
/// older one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offer {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub fare: f64,
    pub expiry: DateTime<Utc>,
}

impl Offer {
    pub fn new(ride_id: Uuid, driver_id: Uuid, fare: f64) -> Self {
        Self {
            ride_id,
            driver_id,
            fare,
            expiry: Utc::now() + Duration::seconds(OFFER_TTL_SECONDS),
        }
    }
}
