use super::Database;

use sqlx::{types::Json, Executor, Row};
use uuid::Uuid;

use crate::{
    entities::RideRequest,
    error::{not_found_error, Error},
};

#[tracing::instrument(skip(executor))]
pub async fn fetch_ride<'c, E>(executor: E, id: &Uuid) -> Result<RideRequest, Error>
where
    E: Executor<'c, Database = Database>,
{
    let Json(ride): Json<RideRequest> = executor
        .fetch_optional(sqlx::query("SELECT data FROM rides WHERE id = $1").bind(id))
        .await?
        .ok_or_else(not_found_error)?
        .try_get("data")?;

    Ok(ride)
}
