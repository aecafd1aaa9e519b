use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{Coordinates, Offer, Party, RideRequest, RideSpec, VehicleType};
use crate::error::Error;

/// Ride lifecycle: creation, dispatch, acceptance and the guarded state
/// transitions that follow.
#[async_trait]
pub trait RideAPI {
    async fn create_ride(&self, passenger_id: Uuid, spec: RideSpec) -> Result<RideRequest, Error>;

    async fn find_ride(&self, id: Uuid) -> Result<RideRequest, Error>;

    /// Commits the passenger's acceptance of a driver's counter-offer.
    /// Exactly one concurrent acceptance can win; losers get a
    /// ride-already-assigned error.
    async fn accept_offer(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        passenger_id: Uuid,
    ) -> Result<RideRequest, Error>;

    async fn start_ride(&self, id: Uuid) -> Result<RideRequest, Error>;

    async fn complete_ride(&self, id: Uuid) -> Result<RideRequest, Error>;

    async fn cancel_ride(
        &self,
        id: Uuid,
        cancelled_by: Party,
        reason: String,
    ) -> Result<RideRequest, Error>;
}

/// Counter-offer store plus the relay of incoming offers to the
/// passenger's session. Reads and writes are best-effort: an unavailable
/// store reads as "no offer found" and never fails ride handling.
#[async_trait]
pub trait OfferAPI {
    async fn submit_offer(&self, ride_id: Uuid, driver_id: Uuid, fare: f64) -> Result<(), Error>;

    async fn find_offer(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Option<f64>, Error>;

    async fn offers_for(&self, ride_id: Uuid) -> Result<Vec<Offer>, Error>;

    async fn clear_offers(&self, ride_id: Uuid) -> Result<(), Error>;
}

#[async_trait]
pub trait DriverAPI {
    async fn register_driver(
        &self,
        id: Uuid,
        location: Coordinates,
        vehicle_type: VehicleType,
    ) -> Result<(), Error>;

    async fn update_driver_location(&self, id: Uuid, location: Coordinates) -> Result<(), Error>;
}

pub trait API: RideAPI + OfferAPI + DriverAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
