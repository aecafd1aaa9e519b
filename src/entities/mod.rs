mod driver;
mod location;
mod offer;
mod ride;

pub use driver::{DriverCandidate, VehicleType};
pub use location::Coordinates;
pub use offer::Offer;
pub use ride::{Party, RideMode, RideRequest, RideSpec, Status};
