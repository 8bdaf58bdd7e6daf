//! WebSocket streaming of build events.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use prole_core::{BuildEvent, BuildId, EventHub};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Offset of the first event to send.
    #[serde(default)]
    from: usize,
}

/// Upgrade to a WebSocket that replays a build's events from `?from=N`.
pub async fn events_handler(
    State(state): State<AppState>,
    Path(guid): Path<BuildId>,
    Query(query): Query<EventsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let hub = state
        .scheduler
        .hub(guid)
        .ok_or_else(|| ApiError::NotFound(format!("build {} not found", guid)))?;

    Ok(ws.on_upgrade(move |socket| stream_events(socket, hub, guid, query.from)))
}

async fn stream_events(
    socket: WebSocket,
    hub: Arc<EventHub<BuildEvent>>,
    guid: BuildId,
    from: usize,
) {
    info!(build = %guid, from, "Event stream opened");

    // stops the hub subscription however this function returns
    let cancel = CancellationToken::new();
    let _stop = cancel.clone().drop_guard();

    let mut events = hub.follow(from, cancel);
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    let frame = match event_frame(&event) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(build = %guid, error = %e, "Failed to encode event");
                            break;
                        }
                    };
                    if sender.send(frame).await.is_err() {
                        debug!(build = %guid, "Client went away mid-send");
                        break;
                    }
                }
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(build = %guid, error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    info!(build = %guid, "Event stream closed");
}

fn event_frame(event: &BuildEvent) -> serde_json::Result<Message> {
    Ok(Message::Text(serde_json::to_string(event)?.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::testing::test_app;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use prole_core::{Build, BuildStatus};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite};
    use tower::ServiceExt;

    #[test]
    fn test_event_frame_is_json_text() {
        let frame = event_frame(&BuildEvent::Finished {
            status: BuildStatus::Failed,
        })
        .unwrap();

        let Message::Text(text) = frame else {
            panic!("expected a text frame");
        };
        let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "finished", "status": "failed" }));
    }

    #[test]
    fn test_from_defaults_to_start() {
        let query: EventsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.from, 0);
    }

    fn make_build() -> Build {
        serde_json::from_value(serde_json::json!({
            "config": { "image": "some-image", "run": { "path": "./run" } }
        }))
        .unwrap()
    }

    /// Serve the app on an ephemeral local port.
    async fn serve(state: AppState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await });
        addr
    }

    #[tokio::test]
    async fn test_events_require_websocket_upgrade() {
        let app = test_app(0);
        let id = app.state.scheduler.start(make_build()).unwrap();
        let request = Request::get(format!("/builds/{}/events", id))
            .body(Body::empty())
            .unwrap();

        let response = router(app.state).oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_socket_replays_from_offset_then_closes() {
        let app = test_app(0);
        let id = app.state.scheduler.start(make_build()).unwrap();
        app.state.scheduler.wait(id).await;
        let expected: Vec<serde_json::Value> = app.state.scheduler.hub(id).unwrap().snapshot()[2..]
            .iter()
            .map(|event| serde_json::to_value(event).unwrap())
            .collect();
        assert!(!expected.is_empty());

        let addr = serve(app.state.clone()).await;
        let (mut socket, _) = connect_async(format!("ws://{}/builds/{}/events?from=2", addr, id))
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut closed = false;
        while let Some(message) = socket.next().await {
            match message.unwrap() {
                tungstenite::Message::Text(text) => {
                    received.push(serde_json::from_str::<serde_json::Value>(text.as_str()).unwrap());
                }
                tungstenite::Message::Close(_) => {
                    closed = true;
                    break;
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        }

        assert_eq!(received, expected);
        assert_eq!(
            received.last(),
            Some(&serde_json::json!({ "type": "finished", "status": "succeeded" }))
        );
        assert!(closed, "server must close the socket once the hub is closed");
    }

    #[tokio::test]
    async fn test_socket_for_unknown_build_is_not_found() {
        let app = test_app(0);
        let addr = serve(app.state.clone()).await;

        let err = connect_async(format!("ws://{}/builds/{}/events", addr, BuildId::new()))
            .await
            .unwrap_err();
        match err {
            tungstenite::Error::Http(response) => {
                assert_eq!(response.status(), StatusCode::NOT_FOUND);
            }
            other => panic!("expected an HTTP error, got {:?}", other),
        }
    }
}
