use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Coordinates, VehicleType};
use crate::error::{invalid_invocation_error, Error};

/// Parameters supplied by a passenger when requesting a ride.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RideSpec {
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub ride_type: VehicleType,
    pub ride_mode: RideMode,
    pub fare: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideMode {
    Solo,
    Shared,
}

impl RideMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Shared => "shared",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Passenger,
    Driver,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Status {
    Pending,
    Matched,
    Accepted,
    Started,
    Completed,
    Cancelled { cancelled_by: Party, reason: String },
}

impl Status {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Matched => "matched",
            Self::Accepted => "accepted",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RideRequest {
    pub id: Uuid,
    pub status: Status,
    pub passenger_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub ride_type: VehicleType,
    pub ride_mode: RideMode,
    pub fare: f64,
    pub matched_with: Option<Uuid>,
}

impl RideRequest {
    pub fn new(passenger_id: Uuid, spec: &RideSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: Status::Pending,
            passenger_id,
            driver_id: None,
            pickup: spec.pickup,
            dropoff: spec.dropoff,
            ride_type: spec.ride_type,
            ride_mode: spec.ride_mode,
            fare: spec.fare,
            matched_with: None,
        }
    }

    pub fn is_assignable(&self) -> bool {
        self.driver_id.is_none() && matches!(self.status, Status::Pending | Status::Matched)
    }

    /// Pairs this ride with another pending shared request. The caller is
    /// responsible for applying the same transition to the partner so the
    /// matched_with references stay symmetric.
    #[tracing::instrument]
    pub fn match_with(&mut self, partner_id: Uuid) -> Result<(), Error> {
        if self.ride_mode != RideMode::Shared || self.matched_with.is_some() {
            return Err(invalid_invocation_error());
        }

        match self.status {
            Status::Pending => {
                self.status = Status::Matched;
                self.matched_with = Some(partner_id);
                Ok(())
            }
            _ => Err(invalid_invocation_error()),
        }
    }

    /// Commits an accepted counter-offer: assigns the driver and replaces
    /// the requested fare with the negotiated one.
    #[tracing::instrument]
    pub fn accept(&mut self, driver_id: Uuid, fare: f64) -> Result<(), Error> {
        if !self.is_assignable() {
            return Err(invalid_invocation_error());
        }

        self.status = Status::Accepted;
        self.driver_id = Some(driver_id);
        self.fare = fare;

        Ok(())
    }

    #[tracing::instrument]
    pub fn start(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Accepted => {
                self.status = Status::Started;
                Ok(())
            }
            _ => Err(invalid_invocation_error()),
        }
    }

    #[tracing::instrument]
    pub fn complete(&mut self) -> Result<(), Error> {
        match self.status {
            Status::Started => {
                self.status = Status::Completed;
                Ok(())
            }
            _ => Err(invalid_invocation_error()),
        }
    }

    #[tracing::instrument]
    pub fn cancel(&mut self, cancelled_by: Party, reason: String) -> Result<(), Error> {
        match self.status {
            Status::Pending | Status::Matched | Status::Accepted => {
                self.status = Status::Cancelled {
                    cancelled_by,
                    reason,
                };
                Ok(())
            }
            _ => Err(invalid_invocation_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: RideMode) -> RideSpec {
        RideSpec {
            pickup: Coordinates::new(90.4, 23.8),
            dropoff: Coordinates::new(90.39, 23.75),
            ride_type: VehicleType::Car,
            ride_mode: mode,
            fare: 500.0,
        }
    }

    #[test]
    fn accept_assigns_driver_and_overwrites_fare() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Solo));
        let driver_id = Uuid::new_v4();

        ride.accept(driver_id, 450.0).unwrap();

        assert_eq!(ride.status.name(), "accepted");
        assert_eq!(ride.driver_id, Some(driver_id));
        assert_eq!(ride.fare, 450.0);
    }

    #[test]
    fn accept_fails_once_assigned() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Solo));

        ride.accept(Uuid::new_v4(), 450.0).unwrap();
        assert!(ride.accept(Uuid::new_v4(), 400.0).is_err());
    }

    #[test]
    fn matched_shared_ride_remains_assignable() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Shared));

        ride.match_with(Uuid::new_v4()).unwrap();
        assert!(ride.is_assignable());
        assert!(ride.accept(Uuid::new_v4(), 300.0).is_ok());
    }

    #[test]
    fn match_with_is_set_exactly_once() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Shared));

        ride.match_with(Uuid::new_v4()).unwrap();
        assert!(ride.match_with(Uuid::new_v4()).is_err());
    }

    #[test]
    fn solo_ride_cannot_be_paired() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Solo));

        assert!(ride.match_with(Uuid::new_v4()).is_err());
    }

    #[test]
    fn progress_requires_preceding_state() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Solo));

        assert!(ride.start().is_err());
        assert!(ride.complete().is_err());

        ride.accept(Uuid::new_v4(), 500.0).unwrap();
        ride.start().unwrap();
        ride.complete().unwrap();

        assert_eq!(ride.status.name(), "completed");
    }

    #[test]
    fn cancel_allowed_until_started() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Solo));
        ride.accept(Uuid::new_v4(), 500.0).unwrap();

        ride.cancel(Party::Driver, "breakdown".into()).unwrap();

        match &ride.status {
            Status::Cancelled {
                cancelled_by,
                reason,
            } => {
                assert_eq!(*cancelled_by, Party::Driver);
                assert_eq!(reason, "breakdown");
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn cancel_rejected_after_completion() {
        let mut ride = RideRequest::new(Uuid::new_v4(), &spec(RideMode::Solo));
        ride.accept(Uuid::new_v4(), 500.0).unwrap();
        ride.start().unwrap();
        ride.complete().unwrap();

        assert!(ride.cancel(Party::Passenger, "too late".into()).is_err());
    }
}
