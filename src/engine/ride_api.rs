use super::helpers::fetch_ride;
use super::{push, Engine};

use async_trait::async_trait;
use geo_types::Geometry;
use geozero::wkb;
use serde_json::json;
use sqlx::{types::Json, Acquire, Executor, Row};
use uuid::Uuid;

use crate::{
    api::{OfferAPI, RideAPI},
    entities::{Coordinates, DriverCandidate, Party, RideMode, RideRequest, RideSpec},
    error::{
        invalid_input_error, invalid_invocation_error, offer_not_found_error,
        pairing_conflict_error, ride_already_assigned_error, Error, CODE_PAIRING_CONFLICT,
    },
    matching,
    registry::Identity,
};

/// Radius of the nearby-driver search around a solo pickup.
const DISPATCH_RADIUS_M: f64 = 2000.0;
/// Widened radius around the centroid of a shared pair's pickups.
const SHARED_DISPATCH_RADIUS_M: f64 = 2500.0;

#[async_trait]
impl RideAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn create_ride(&self, passenger_id: Uuid, spec: RideSpec) -> Result<RideRequest, Error> {
        if !spec.pickup.is_valid()
            || !spec.dropoff.is_valid()
            || !spec.fare.is_finite()
            || spec.fare < 0.0
        {
            return Err(invalid_input_error());
        }

        let ride = RideRequest::new(passenger_id, &spec);
        let pickup: Geometry<f64> = ride.pickup.into();

        let mut conn = self.pool.acquire().await?;
        conn.execute(
            sqlx::query(
                "INSERT INTO rides (id, status, ride_mode, ride_type, passenger_id, pickup, data) VALUES ($1, $2, $3, $4, $5, ST_SetSRID($6, 4326), $7)",
            )
            .bind(&ride.id)
            .bind(ride.status.name())
            .bind(ride.ride_mode.name())
            .bind(ride.ride_type.name())
            .bind(&ride.passenger_id)
            .bind(wkb::Encode(pickup))
            .bind(Json(&ride)),
        )
        .await?;
        drop(conn);

        // the request is persisted at this point; dispatch and pairing are
        // fan-out, and losing fan-out must not fail the create
        match ride.ride_mode {
            RideMode::Solo => {
                if let Err(err) = self.dispatch_to_nearby(&ride, None).await {
                    tracing::warn!(error = ?err, ride_id = %ride.id, "solo dispatch failed");
                }
            }
            RideMode::Shared => {
                if let Err(err) = self.search_shared_partner(&ride).await {
                    tracing::warn!(error = ?err, ride_id = %ride.id, "shared pairing failed");
                }
            }
        }

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn find_ride(&self, id: Uuid) -> Result<RideRequest, Error> {
        let mut conn = self.pool.acquire().await?;

        fetch_ride(&mut *conn, &id).await
    }

    #[tracing::instrument(skip(self))]
    async fn accept_offer(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        passenger_id: Uuid,
    ) -> Result<RideRequest, Error> {
        let fare = self
            .find_offer(ride_id, driver_id)
            .await?
            .ok_or_else(offer_not_found_error)?;

        let mut conn = self.pool.acquire().await?;
        let mut ride = fetch_ride(&mut *conn, &ride_id).await?;

        if ride.passenger_id != passenger_id {
            return Err(invalid_input_error());
        }
        if !ride.is_assignable() {
            return Err(ride_already_assigned_error());
        }

        ride.accept(driver_id, fare)?;

        // conditional assignment: whoever observes the ride unassigned
        // first wins, everyone else loses cleanly. Only the fields this
        // transition owns are patched into the document, so a pairing
        // committed after our snapshot survives the write
        let patch = json!({
            "status": &ride.status,
            "driver_id": driver_id,
            "fare": ride.fare,
        });

        let updated = conn
            .execute(
                sqlx::query(
                    "UPDATE rides SET status = $2, driver_id = $3, data = data || $4 WHERE id = $1 AND driver_id IS NULL AND status IN ('pending', 'matched')",
                )
                .bind(&ride.id)
                .bind(ride.status.name())
                .bind(&driver_id)
                .bind(Json(patch)),
            )
            .await?;

        if updated.rows_affected() == 0 {
            return Err(ride_already_assigned_error());
        }

        let ride = fetch_ride(&mut *conn, &ride_id).await?;
        drop(conn);

        self.registry
            .push_to(
                Identity::Driver(driver_id),
                push::OFFER_ACCEPTED,
                json!({ "ride": &ride }),
            )
            .await;

        // losers are told exactly once, then the offer set goes away
        for offer in self.offers_for(ride_id).await? {
            if offer.driver_id != driver_id {
                self.registry
                    .push_to(
                        Identity::Driver(offer.driver_id),
                        push::OFFER_REJECTED,
                        json!({ "rideId": ride_id }),
                    )
                    .await;
            }
        }
        self.clear_offers(ride_id).await?;

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn start_ride(&self, id: Uuid) -> Result<RideRequest, Error> {
        let mut conn = self.pool.acquire().await?;
        let mut ride = fetch_ride(&mut *conn, &id).await?;

        ride.start()?;

        let updated = conn
            .execute(
                sqlx::query(
                    "UPDATE rides SET status = $2, data = data || $3 WHERE id = $1 AND status = 'accepted'",
                )
                .bind(&ride.id)
                .bind(ride.status.name())
                .bind(Json(json!({ "status": &ride.status }))),
            )
            .await?;

        if updated.rows_affected() == 0 {
            return Err(invalid_invocation_error());
        }

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn complete_ride(&self, id: Uuid) -> Result<RideRequest, Error> {
        let mut conn = self.pool.acquire().await?;
        let mut ride = fetch_ride(&mut *conn, &id).await?;

        ride.complete()?;

        let updated = conn
            .execute(
                sqlx::query(
                    "UPDATE rides SET status = $2, data = data || $3 WHERE id = $1 AND status = 'started'",
                )
                .bind(&ride.id)
                .bind(ride.status.name())
                .bind(Json(json!({ "status": &ride.status }))),
            )
            .await?;

        if updated.rows_affected() == 0 {
            return Err(invalid_invocation_error());
        }

        Ok(ride)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_ride(
        &self,
        id: Uuid,
        cancelled_by: Party,
        reason: String,
    ) -> Result<RideRequest, Error> {
        let mut conn = self.pool.acquire().await?;
        let mut ride = fetch_ride(&mut *conn, &id).await?;

        ride.cancel(cancelled_by, reason.clone())?;

        let updated = conn
            .execute(
                sqlx::query(
                    "UPDATE rides SET status = $2, data = data || $3 WHERE id = $1 AND status IN ('pending', 'matched', 'accepted')",
                )
                .bind(&ride.id)
                .bind(ride.status.name())
                .bind(Json(json!({ "status": &ride.status }))),
            )
            .await?;

        if updated.rows_affected() == 0 {
            return Err(invalid_invocation_error());
        }

        // re-read so the notification targets come from what actually
        // committed, not from our pre-update snapshot; an acceptance that
        // slipped in ahead of us still gets its driver told
        let ride = fetch_ride(&mut *conn, &id).await?;
        drop(conn);

        let payload = json!({
            "rideId": ride.id,
            "cancelledBy": cancelled_by,
            "reason": reason,
        });

        match cancelled_by {
            Party::Passenger => {
                if let Some(driver_id) = ride.driver_id {
                    self.registry
                        .push_to(
                            Identity::Driver(driver_id),
                            push::RIDE_CANCELLED,
                            payload.clone(),
                        )
                        .await;
                }
            }
            Party::Driver => {
                self.registry
                    .push_to(
                        Identity::Passenger(ride.passenger_id),
                        push::RIDE_CANCELLED,
                        payload.clone(),
                    )
                    .await;
            }
        }

        // a matched co-passenger also learns their pool broke up
        if let Some(partner_id) = ride.matched_with {
            if let Ok(partner) = self.find_ride(partner_id).await {
                self.registry
                    .push_to(
                        Identity::Passenger(partner.passenger_id),
                        push::RIDE_CANCELLED,
                        payload,
                    )
                    .await;
            }
        }

        Ok(ride)
    }
}

impl Engine {
    /// Fans a new request out to every fresh, available driver of the
    /// right vehicle class near the pickup (or, for a matched pair, near
    /// the centroid of both pickups).
    #[tracing::instrument(skip(self, ride, partner), fields(ride_id = %ride.id))]
    async fn dispatch_to_nearby(
        &self,
        ride: &RideRequest,
        partner: Option<&RideRequest>,
    ) -> Result<(), Error> {
        let (center, radius, event, payload) = match partner {
            None => (
                ride.pickup,
                DISPATCH_RADIUS_M,
                push::NEW_RIDE_REQUEST,
                json!({ "ride": ride }),
            ),
            Some(partner) => (
                Coordinates::new(
                    (ride.pickup.longitude + partner.pickup.longitude) / 2.0,
                    (ride.pickup.latitude + partner.pickup.latitude) / 2.0,
                ),
                SHARED_DISPATCH_RADIUS_M.max(DISPATCH_RADIUS_M),
                push::NEW_SHARED_RIDE_REQUEST,
                json!({ "rides": [ride, partner] }),
            ),
        };

        let origin: Geometry<f64> = center.into();

        let query = "
            SELECT
                d.id AS driver_id,
                ST_X(l.location) AS longitude,
                ST_Y(l.location) AS latitude
            FROM
                drivers d
                JOIN driver_locations l ON d.id = l.driver_id
            WHERE
                d.status = 'available'
                AND d.vehicle_type = $2
                AND l.expiry > now()
                AND ST_DWithin(l.location::geography, ST_SetSRID($1, 4326)::geography, $3)
            ORDER BY
                ST_Distance(l.location::geography, ST_SetSRID($1, 4326)::geography) ASC
        ";

        let mut conn = self.pool.acquire().await?;
        let results = conn
            .fetch_all(
                sqlx::query(query)
                    .bind(wkb::Encode(origin))
                    .bind(ride.ride_type.name())
                    .bind(radius),
            )
            .await?;
        drop(conn);

        let mut candidates = Vec::with_capacity(results.len());
        for result in results.iter() {
            candidates.push(DriverCandidate {
                id: result.try_get("driver_id")?,
                location: Coordinates::new(
                    result.try_get("longitude")?,
                    result.try_get("latitude")?,
                ),
                vehicle_type: ride.ride_type,
            });
        }

        if candidates.is_empty() {
            tracing::info!("no drivers within dispatch radius");
            return Ok(());
        }

        tracing::info!(count = candidates.len(), "dispatching to nearby drivers");

        for candidate in candidates {
            self.registry
                .push_to(Identity::Driver(candidate.id), event, payload.clone())
                .await;
        }

        Ok(())
    }

    /// Looks for a compatible pending shared request and, if one is found,
    /// pairs with it. Losing the pairing race leaves this ride pending; it
    /// will be reconsidered when the next shared request searches.
    #[tracing::instrument(skip(self, ride), fields(ride_id = %ride.id))]
    async fn search_shared_partner(&self, ride: &RideRequest) -> Result<(), Error> {
        let candidates = self.pending_shared_candidates(ride).await?;

        let partner_id = match matching::select_partner(ride, &candidates) {
            Some(partner) => partner.id,
            None => {
                tracing::info!("no compatible shared request found");
                self.notify_searching(ride).await;
                return Ok(());
            }
        };

        match self.pair_shared(ride.id, partner_id).await {
            Ok(_) => Ok(()),
            Err(err) if err.code == CODE_PAIRING_CONFLICT => {
                tracing::info!(%partner_id, "lost pairing race, staying pending");
                self.notify_searching(ride).await;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn notify_searching(&self, ride: &RideRequest) {
        self.registry
            .push_to(
                Identity::Passenger(ride.passenger_id),
                push::SHARED_RIDE_SEARCHING,
                json!({ "rideId": ride.id }),
            )
            .await;
    }

    /// Pending, unmatched shared requests of the same vehicle class whose
    /// pickup is close to the new request's pickup. Ordered and capped so
    /// scoring stays bounded and deterministic.
    async fn pending_shared_candidates(
        &self,
        ride: &RideRequest,
    ) -> Result<Vec<RideRequest>, Error> {
        let origin: Geometry<f64> = ride.pickup.into();

        let query = "
            SELECT
                data
            FROM
                rides
            WHERE
                ride_mode = 'shared'
                AND status = 'pending'
                AND matched_with IS NULL
                AND ride_type = $2
                AND id != $3
                AND ST_DWithin(pickup::geography, ST_SetSRID($1, 4326)::geography, $4)
            ORDER BY
                ST_Distance(pickup::geography, ST_SetSRID($1, 4326)::geography) ASC,
                id ASC
            LIMIT $5
        ";

        let mut conn = self.pool.acquire().await?;
        let results = conn
            .fetch_all(
                sqlx::query(query)
                    .bind(wkb::Encode(origin))
                    .bind(ride.ride_type.name())
                    .bind(&ride.id)
                    .bind(matching::CANDIDATE_RADIUS_M)
                    .bind(matching::CANDIDATE_LIMIT),
            )
            .await?;

        let mut candidates = Vec::with_capacity(results.len());
        for result in results.iter() {
            let Json(candidate): Json<RideRequest> = result.try_get("data")?;
            candidates.push(candidate);
        }

        Ok(candidates)
    }

    /// Atomically pairs two pending shared rides. Both rows are updated
    /// under guards that re-check they are still pending and unmatched;
    /// if either guard fails the whole pairing rolls back and the caller
    /// gets a conflict.
    #[tracing::instrument(skip(self))]
    async fn pair_shared(
        &self,
        ride_id: Uuid,
        partner_id: Uuid,
    ) -> Result<(RideRequest, RideRequest), Error> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let mut ride = fetch_ride(&mut tx, &ride_id).await?;
        let mut partner = fetch_ride(&mut tx, &partner_id).await?;

        ride.match_with(partner.id)
            .map_err(|_| pairing_conflict_error())?;
        partner
            .match_with(ride.id)
            .map_err(|_| pairing_conflict_error())?;

        // update in id order so two racing pairings cannot deadlock
        let mut ordered = [&ride, &partner];
        ordered.sort_by_key(|r| r.id);

        for side in ordered {
            let patch = json!({
                "status": &side.status,
                "matched_with": &side.matched_with,
            });

            let updated = tx
                .execute(
                    sqlx::query(
                        "UPDATE rides SET status = $2, matched_with = $3, data = data || $4 WHERE id = $1 AND status = 'pending' AND matched_with IS NULL",
                    )
                    .bind(&side.id)
                    .bind(side.status.name())
                    .bind(&side.matched_with)
                    .bind(Json(patch)),
                )
                .await?;

            if updated.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(pairing_conflict_error());
            }
        }

        tx.commit().await?;
        drop(conn);

        self.registry
            .push_to(
                Identity::Passenger(ride.passenger_id),
                push::SHARED_RIDE_MATCHED,
                json!({ "ride": &ride, "partner": &partner }),
            )
            .await;
        self.registry
            .push_to(
                Identity::Passenger(partner.passenger_id),
                push::SHARED_RIDE_MATCHED,
                json!({ "ride": &partner, "partner": &ride }),
            )
            .await;

        if let Err(err) = self.dispatch_to_nearby(&ride, Some(&partner)).await {
            tracing::warn!(error = ?err, "shared dispatch failed");
        }

        Ok((ride, partner))
    }
}
