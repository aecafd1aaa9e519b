use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Car,
    Motorcycle,
    Auto,
}

impl VehicleType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Car => "car",
            Self::Motorcycle => "motorcycle",
            Self::Auto => "auto",
        }
    }
}

/// Read-only projection of a nearby available driver, as returned by the
/// proximity query. Driver rows themselves are owned by registration and
/// location updates, never by dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub id: Uuid,
    pub location: Coordinates,
    pub vehicle_type: VehicleType,
}
