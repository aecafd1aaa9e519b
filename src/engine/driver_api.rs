use super::Engine;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use geo_types::Geometry;
use geozero::wkb;
use sqlx::Executor;
use uuid::Uuid;

use crate::{
    api::DriverAPI,
    entities::{Coordinates, VehicleType},
    error::{invalid_input_error, Error},
};

/// Location rows go stale after this long without an update; stale drivers
/// are invisible to dispatch.
const LOCATION_TTL_SECONDS: i64 = 60;

#[async_trait]
impl DriverAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn register_driver(
        &self,
        id: Uuid,
        location: Coordinates,
        vehicle_type: VehicleType,
    ) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;

        // re-registration after reconnect replaces the previous record
        conn.execute(
            sqlx::query(
                "INSERT INTO drivers (id, status, vehicle_type) VALUES ($1, 'available', $2) ON CONFLICT (id) DO UPDATE SET status = 'available', vehicle_type = EXCLUDED.vehicle_type",
            )
            .bind(&id)
            .bind(vehicle_type.name()),
        )
        .await?;
        drop(conn);

        self.update_driver_location(id, location).await
    }

    #[tracing::instrument(skip(self))]
    async fn update_driver_location(&self, id: Uuid, location: Coordinates) -> Result<(), Error> {
        if !location.is_valid() {
            return Err(invalid_input_error());
        }

        let location: Geometry<f64> = location.into();

        let mut conn = self.pool.acquire().await?;
        conn.execute(
            sqlx::query(
                "INSERT INTO driver_locations (driver_id, location, expiry) VALUES ($1, ST_SetSRID($2, 4326), $3) ON CONFLICT (driver_id) DO UPDATE SET location = EXCLUDED.location, expiry = EXCLUDED.expiry",
            )
            .bind(&id)
            .bind(wkb::Encode(location))
            .bind(Utc::now() + Duration::seconds(LOCATION_TTL_SECONDS)),
        )
        .await?;

        Ok(())
    }
}
