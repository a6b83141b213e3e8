use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use tracing::{info, warn};

use crate::app::AppState;
use crate::session::{self, SessionQuery};
use pushgate_broker::{Broker, ConnId};

/// GET /events, the streaming push endpoint.
///
/// Resolves the caller's identity from session state (absent means
/// anonymous), attaches to the broker, and relays delivered frames as
/// SSE events until the delivery handle closes. Each frame becomes
/// `event: broadcast` or `event: individual` plus a `data:` line.
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    headers: HeaderMap,
) -> Response {
    let identity = session::resolve_identity(&headers, &query);

    let mut sub = match state.broker.connect(identity.clone()).await {
        Ok(sub) => sub,
        Err(e) => {
            // Broker unavailable: fail fast, nothing was registered.
            warn!(error = %e, "rejecting /events request");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    info!(
        conn = %sub.id(),
        identity = identity.as_deref().unwrap_or("anonymous"),
        "SSE stream opened"
    );

    let guard = DisconnectGuard {
        broker: state.broker.clone(),
        id: sub.id(),
    };

    let stream = async_stream::stream! {
        // Owned by the stream so its Drop fires however the body ends,
        // whether the shard closed the handle or the client went away
        // mid-stream.
        let _guard = guard;
        while let Some(frame) = sub.recv().await {
            yield Ok::<Event, Infallible>(
                Event::default().event(frame.kind.as_str()).data(frame.payload),
            );
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

/// Tells every shard to reclaim the connection as soon as the response
/// body is dropped, instead of waiting for a future failed delivery.
struct DisconnectGuard {
    broker: Broker,
    id: ConnId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let broker = self.broker.clone();
        let id = self.id;
        tokio::spawn(async move {
            broker.disconnect(id).await;
            info!(conn = %id, "SSE stream closed");
        });
    }
}
