//! Real-time change notification: ticket brokering and the websocket
//! channel.
//!
//! The channel is authenticated by a one-shot ticket minted over the
//! regular token-authenticated API, so the websocket handshake itself
//! never carries the auth token. Once upgraded, the handler forwards
//! broker events for the ticket's collection as binary frames, pings every
//! 30 seconds, and drops connections silent for 60.

use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::broker::{collection_channel, Subscription};
use crate::codec::MsgPack;
use crate::ctx::Ctx;
use crate::db;
use crate::error::{Error, Result};
use crate::state::AppState;
use crate::tickets::Ticket;
use crate::wire::TicketOut;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// POST /api/v1/collection/{collection_uid}/subscription-ticket/
pub async fn create_ticket(
    State(state): State<AppState>,
    ctx: Ctx,
    Path(collection_uid): Path<String>,
) -> Result<impl IntoResponse> {
    let mut conn = state.pool.acquire().await?;
    let collection = db::collection_by_uid(&mut conn, &collection_uid)
        .await?
        .ok_or(Error::NotMember)?;
    db::require_member(&mut conn, ctx.user_id(), collection.id).await?;
    drop(conn);

    let ticket = state
        .tickets
        .create(ctx.user_id(), collection.id)
        .await
        .map_err(Error::Internal)?;
    Ok(MsgPack(TicketOut { ticket }))
}

/// GET /api/v1/ws/{ticket}/
pub async fn subscribe(
    State(state): State<AppState>,
    Path(ticket_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = state.tickets.consume(&ticket_id).await else {
        return Error::InvalidToken.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, ticket, state))
}

async fn handle_socket(socket: WebSocket, ticket: Ticket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // collection id 0 means a keep-alive-only channel
    let mut subscription = if ticket.collection_id > 0 {
        match state
            .broker
            .subscribe(&collection_channel(ticket.collection_id))
            .await
        {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!("broker subscribe failed, channel is keep-alive only: {e}");
                None
            }
        }
    } else {
        None
    };

    debug!(
        user = ticket.user_id,
        collection = ticket.collection_id,
        "websocket channel open"
    );

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_seen.elapsed() > READ_DEADLINE {
                    debug!("websocket read deadline exceeded, dropping client");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(e)) => {
                    debug!("websocket read error: {e}");
                    break;
                }
            },
            event = next_event(&mut subscription) => match event {
                Some(payload) => {
                    if sender.send(Message::Binary(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    debug!(user = ticket.user_id, "websocket channel closed");
}

/// The broker branch of the select; a channel without a subscription just
/// never yields.
async fn next_event(subscription: &mut Option<Subscription>) -> Option<Vec<u8>> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}
