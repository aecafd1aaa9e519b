use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Coordinates, Party, RideMode, RideRequest, RideSpec, VehicleType};

// gateway-local reply frames; coordinator pushes are named in engine::push
pub const ACK: &str = "ack";
pub const ERROR: &str = "error";
pub const REGISTERED: &str = "registered";
pub const RIDE_REQUEST_CREATED: &str = "rideRequestCreated";

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum InboundEvent {
    RegisterDriver(RegisterDriver),
    RegisterPassenger(RegisterPassenger),
    CreateRideRequest(CreateRideRequest),
    CreateSharedRideRequest(CreateRideRequest),
    SendCounterOffer(SendCounterOffer),
    AcceptDriverOffer(AcceptDriverOffer),
    UpdateDriverLocation(UpdateDriverLocation),
    CancelRide(CancelRide),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDriver {
    pub driver_id: Uuid,
    pub location: Coordinates,
    pub ride_type: VehicleType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPassenger {
    pub passenger_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub passenger_id: Uuid,
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub ride_type: VehicleType,
    pub fare: f64,
}

impl CreateRideRequest {
    pub fn into_spec(self, ride_mode: RideMode) -> RideSpec {
        RideSpec {
            pickup: self.pickup,
            dropoff: self.dropoff,
            ride_type: self.ride_type,
            ride_mode,
            fare: self.fare,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCounterOffer {
    pub ride_id: Uuid,
    pub passenger_id: Uuid,
    pub driver_id: Uuid,
    pub fare: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptDriverOffer {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub passenger_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDriverLocation {
    pub driver_id: Uuid,
    pub location: Coordinates,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRide {
    pub ride_id: Uuid,
    pub cancelled_by: Party,
    pub passenger_id: Option<Uuid>,
    pub driver_id: Option<Uuid>,
    pub reason: String,
}

/// Synchronous reply to acceptDriverOffer.
#[derive(Debug, Serialize)]
pub struct Ack {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride: Option<RideRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn accepted(ride: RideRequest) -> Self {
        Self {
            ok: true,
            ride: Some(ride),
            message: None,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            ok: false,
            ride: None,
            message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_register_driver() {
        let raw = json!({
            "event": "registerDriver",
            "data": {
                "driverId": "7b1c9a4e-53c9-4bc2-9d2e-0ad44f2f1e8b",
                "location": { "longitude": 90.41, "latitude": 23.81 },
                "rideType": "motorcycle",
            }
        });

        match serde_json::from_value::<InboundEvent>(raw).unwrap() {
            InboundEvent::RegisterDriver(params) => {
                assert_eq!(params.ride_type, VehicleType::Motorcycle);
                assert_eq!(params.location.latitude, 23.81);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn parses_shared_ride_request() {
        let raw = json!({
            "event": "createSharedRideRequest",
            "data": {
                "passengerId": "3f2d8b34-9a57-4f86-bb6b-0a9c7f6f5f10",
                "pickup": { "longitude": 0.0, "latitude": 0.0 },
                "dropoff": { "longitude": 0.0, "latitude": 1.0 },
                "rideType": "car",
                "fare": 300.0,
            }
        });

        match serde_json::from_value::<InboundEvent>(raw).unwrap() {
            InboundEvent::CreateSharedRideRequest(params) => {
                let spec = params.into_spec(RideMode::Shared);
                assert_eq!(spec.ride_mode, RideMode::Shared);
                assert_eq!(spec.fare, 300.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn parses_cancel_ride_with_party() {
        let raw = json!({
            "event": "cancelRide",
            "data": {
                "rideId": "3f2d8b34-9a57-4f86-bb6b-0a9c7f6f5f10",
                "cancelledBy": "driver",
                "passengerId": null,
                "driverId": "7b1c9a4e-53c9-4bc2-9d2e-0ad44f2f1e8b",
                "reason": "vehicle breakdown",
            }
        });

        match serde_json::from_value::<InboundEvent>(raw).unwrap() {
            InboundEvent::CancelRide(params) => {
                assert_eq!(params.cancelled_by, Party::Driver);
                assert_eq!(params.reason, "vehicle breakdown");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_event() {
        let raw = json!({ "event": "selfDestruct", "data": {} });
        assert!(serde_json::from_value::<InboundEvent>(raw).is_err());
    }

    #[test]
    fn ack_omits_absent_fields() {
        let ack = serde_json::to_value(Ack::failed("offer not found".into())).unwrap();

        assert_eq!(ack["ok"], false);
        assert_eq!(ack["message"], "offer not found");
        assert!(ack.get("ride").is_none());
    }
}
