use super::helpers::fetch_ride;
use super::{push, Engine};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{Executor, Row};
use uuid::Uuid;

use crate::{
    api::OfferAPI,
    entities::Offer,
    error::{invalid_input_error, Error},
    registry::Identity,
};

/// The offer store is best-effort by contract: it lives in an unlogged
/// table standing in for an external ephemeral cache, and an outage there
/// must degrade negotiation, never crash request handling. Reads treat
/// store errors as "no offer found"; writes log and move on.
#[async_trait]
impl OfferAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn submit_offer(&self, ride_id: Uuid, driver_id: Uuid, fare: f64) -> Result<(), Error> {
        // no fare-bound policy here; the passenger judges the offer
        if !fare.is_finite() {
            return Err(invalid_input_error());
        }

        let mut conn = self.pool.acquire().await?;
        let ride = fetch_ride(&mut *conn, &ride_id).await?;

        let offer = Offer::new(ride_id, driver_id, fare);

        let stored = conn
            .execute(
                sqlx::query(
                    "INSERT INTO offers (ride_id, driver_id, fare, expiry) VALUES ($1, $2, $3, $4) ON CONFLICT (ride_id, driver_id) DO UPDATE SET fare = EXCLUDED.fare, expiry = EXCLUDED.expiry",
                )
                .bind(&offer.ride_id)
                .bind(&offer.driver_id)
                .bind(offer.fare)
                .bind(offer.expiry),
            )
            .await;

        match stored {
            Ok(_) => {
                // a fresh offer resets the TTL of the whole offer set
                if let Err(err) = conn
                    .execute(
                        sqlx::query("UPDATE offers SET expiry = $2 WHERE ride_id = $1")
                            .bind(&ride_id)
                            .bind(offer.expiry),
                    )
                    .await
                {
                    tracing::warn!(error = ?err, %ride_id, "failed to refresh offer set expiry");
                }
            }
            Err(err) => {
                tracing::warn!(error = ?err, %ride_id, %driver_id, "offer store unavailable, offer dropped");
            }
        }
        drop(conn);

        self.registry
            .push_to(
                Identity::Passenger(ride.passenger_id),
                push::RECEIVE_COUNTER_OFFER,
                json!({
                    "rideId": ride_id,
                    "driverId": driver_id,
                    "fare": fare,
                }),
            )
            .await;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_offer(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Option<f64>, Error> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(error = ?err, "offer store unavailable");
                return Ok(None);
            }
        };

        let fetched = conn
            .fetch_optional(
                sqlx::query(
                    "SELECT fare FROM offers WHERE ride_id = $1 AND driver_id = $2 AND expiry > now()",
                )
                .bind(&ride_id)
                .bind(&driver_id),
            )
            .await;

        match fetched {
            Ok(Some(row)) => Ok(Some(row.try_get("fare")?)),
            Ok(None) => Ok(None),
            Err(err) => {
                tracing::warn!(error = ?err, "offer store unavailable");
                Ok(None)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn offers_for(&self, ride_id: Uuid) -> Result<Vec<Offer>, Error> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(error = ?err, "offer store unavailable");
                return Ok(vec![]);
            }
        };

        let fetched = conn
            .fetch_all(
                sqlx::query(
                    "SELECT driver_id, fare, expiry FROM offers WHERE ride_id = $1 AND expiry > now()",
                )
                .bind(&ride_id),
            )
            .await;

        let rows = match fetched {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = ?err, "offer store unavailable");
                return Ok(vec![]);
            }
        };

        let mut offers = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let driver_id: Uuid = row.try_get("driver_id")?;
            let fare: f64 = row.try_get("fare")?;
            let expiry: DateTime<Utc> = row.try_get("expiry")?;

            offers.push(Offer {
                ride_id,
                driver_id,
                fare,
                expiry,
            });
        }

        Ok(offers)
    }

    #[tracing::instrument(skip(self))]
    async fn clear_offers(&self, ride_id: Uuid) -> Result<(), Error> {
        let mut conn = match self.pool.acquire().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(error = ?err, "offer store unavailable, offers left to expire");
                return Ok(());
            }
        };

        if let Err(err) = conn
            .execute(sqlx::query("DELETE FROM offers WHERE ride_id = $1").bind(&ride_id))
            .await
        {
            tracing::warn!(error = ?err, "offer store unavailable, offers left to expire");
        }

        Ok(())
    }
}
