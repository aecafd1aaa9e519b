use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::DynAPI;
use crate::entities::RideMode;
use crate::error::Error;
use crate::gateway::events::{self, Ack, InboundEvent};
use crate::registry::{ConnectionRegistry, Identity, OutboundFrame};

/// One connected socket: reads inbound events, hands them to the engine,
/// and forwards pushes addressed to whatever identity the peer registered
/// as. Disconnect unbinds the session; ride and offer state are untouched.
pub async fn run(socket: WebSocket, api: DynAPI, registry: Arc<ConnectionRegistry>) {
    let session = Uuid::new_v4();
    tracing::info!(%session, "session connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let encoded = match serde_json::to_string(&frame) {
                Ok(encoded) => encoded,
                Err(err) => {
                    tracing::warn!(error = ?err, "failed to encode outbound frame");
                    continue;
                }
            };

            if sink.send(Message::Text(encoded)).await.is_err() {
                break;
            }
        }
    });

    let mut handler = SessionHandler {
        session,
        api,
        registry,
        tx,
        bound: None,
    };

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => handler.handle_text(&text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(error = ?err, %session, "socket error");
                break;
            }
        }
    }

    handler.teardown();
    writer.abort();

    tracing::info!(%session, "session closed");
}

struct SessionHandler {
    session: Uuid,
    api: DynAPI,
    registry: Arc<ConnectionRegistry>,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    bound: Option<Identity>,
}

impl SessionHandler {
    async fn handle_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<InboundEvent>(text) {
            Ok(event) => event,
            Err(err) => {
                self.send(
                    events::ERROR,
                    json!({ "message": format!("malformed event: {}", err) }),
                );
                return;
            }
        };

        if let Err(err) = self.dispatch(event).await {
            self.send(
                events::ERROR,
                json!({ "code": err.code, "message": err.message }),
            );
        }
    }

    async fn dispatch(&mut self, event: InboundEvent) -> Result<(), Error> {
        match event {
            InboundEvent::RegisterDriver(params) => {
                self.api
                    .register_driver(params.driver_id, params.location, params.ride_type)
                    .await?;
                self.bind(Identity::Driver(params.driver_id));
                self.send(events::REGISTERED, json!({ "driverId": params.driver_id }));
            }
            InboundEvent::RegisterPassenger(params) => {
                self.bind(Identity::Passenger(params.passenger_id));
                self.send(
                    events::REGISTERED,
                    json!({ "passengerId": params.passenger_id }),
                );
            }
            InboundEvent::CreateRideRequest(params) => {
                let passenger_id = params.passenger_id;
                let ride = self
                    .api
                    .create_ride(passenger_id, params.into_spec(RideMode::Solo))
                    .await?;
                self.send(events::RIDE_REQUEST_CREATED, json!({ "ride": ride }));
            }
            InboundEvent::CreateSharedRideRequest(params) => {
                let passenger_id = params.passenger_id;
                let ride = self
                    .api
                    .create_ride(passenger_id, params.into_spec(RideMode::Shared))
                    .await?;
                self.send(events::RIDE_REQUEST_CREATED, json!({ "ride": ride }));
            }
            InboundEvent::SendCounterOffer(params) => {
                self.api
                    .submit_offer(params.ride_id, params.driver_id, params.fare)
                    .await?;
            }
            InboundEvent::AcceptDriverOffer(params) => {
                // a stale or losing accept is a failed ack, not a gateway error
                let ack = match self
                    .api
                    .accept_offer(params.ride_id, params.driver_id, params.passenger_id)
                    .await
                {
                    Ok(ride) => Ack::accepted(ride),
                    Err(err) => Ack::failed(err.message),
                };
                self.send(events::ACK, serde_json::to_value(ack).unwrap_or_default());
            }
            InboundEvent::UpdateDriverLocation(params) => {
                self.api
                    .update_driver_location(params.driver_id, params.location)
                    .await?;
            }
            InboundEvent::CancelRide(params) => {
                self.api
                    .cancel_ride(params.ride_id, params.cancelled_by, params.reason)
                    .await?;
            }
        }

        Ok(())
    }

    /// A session speaks for one identity; re-registration rebinds it.
    fn bind(&mut self, identity: Identity) {
        if let Some(previous) = self.bound.take() {
            if previous != identity {
                self.registry.unbind(previous, self.session);
            }
        }

        self.registry.bind(identity, self.session, self.tx.clone());
        self.bound = Some(identity);
    }

    fn send(&self, event: &str, data: serde_json::Value) {
        // receiver only goes away when the socket does
        let _ = self.tx.send(OutboundFrame {
            event: event.into(),
            data,
        });
    }

    fn teardown(&mut self) {
        if let Some(identity) = self.bound.take() {
            self.registry.unbind(identity, self.session);
        }
    }
}
