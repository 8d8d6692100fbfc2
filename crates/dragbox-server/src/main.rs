//! Dragbox WebSocket Relay Server
//!
//! Relays CRDT updates and presence between clients in the same room, and
//! keeps a merged copy of each room's document for late joiners.
//!
//! ## Protocol
//!
//! Messages are JSON text frames:
//! ```json
//! { "type": "join", "room": "dragbox", "client_id": 42 }
//! { "type": "sync", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "awareness", "client_id": 42, "color": "#aabbcc", "cursor": null, "is_selecting": false }
//! ```

mod config;
mod room;
mod socket;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use config::ServerConfig;
use room::AppState;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dragbox_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let state = Arc::new(AppState::new(config.channel_capacity));

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!(addr = %config.addr, "dragbox relay listening");
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Dragbox Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket::handle_socket(socket, state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dragbox_core::storage::MemoryCache;
    use dragbox_core::{
        ClientId, Color, Identity, InputEvent, MouseButton, NativeWebSocket, Point, Session,
        SessionConfig,
    };
    use std::time::Duration;

    type Client = (Session, NativeWebSocket);

    async fn spawn_relay() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(Arc::new(AppState::new(64)));
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("ws://{addr}/ws")
    }

    async fn client(id: u64, color: Color, url: &str) -> Client {
        let mut session = Session::open(
            SessionConfig::new("live"),
            Identity::new(ClientId(id), color),
            Arc::new(MemoryCache::new()),
        )
        .unwrap();
        session.restore().await.unwrap();

        let mut ws = NativeWebSocket::new();
        ws.connect(url).unwrap();
        (session, ws)
    }

    /// Pump both clients until `done` holds. Returns false on timeout.
    async fn pump_until(a: &mut Client, b: &mut Client, done: impl Fn(&Session, &Session) -> bool) -> bool {
        for _ in 0..250 {
            a.0.pump(&mut a.1);
            b.0.pump(&mut b.1);
            if done(&a.0, &b.0) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drag_replicates_through_relay() {
        let url = spawn_relay().await;
        let red = Color::rgb(255, 0, 0);
        let mut a = client(1, red, &url).await;
        let mut b = client(2, Color::rgb(0, 0, 255), &url).await;

        assert!(
            pump_until(&mut a, &mut b, |a, b| {
                a.presence().get_all().contains_key(&ClientId(2))
                    && b.presence().get_all().contains_key(&ClientId(1))
            })
            .await,
            "clients never saw each other"
        );

        a.0.handle_input(&InputEvent::PointerDown {
            position: Point::new(10.0, 10.0),
            button: MouseButton::Left,
            on_object: true,
        });
        a.0.handle_input(&InputEvent::PointerMove {
            position: Point::new(30.0, 40.0),
            primary_down: true,
        });

        assert!(
            pump_until(&mut a, &mut b, |_, b| {
                let state = b.render_state();
                state.origin == Some(Point::new(20.0, 30.0)) && state.highlight_color == red
            })
            .await,
            "drag never reached the second client"
        );

        a.0.handle_input(&InputEvent::PointerUp {
            position: Point::new(30.0, 40.0),
            button: MouseButton::Left,
        });
        assert!(
            pump_until(&mut a, &mut b, |_, b| b.render_state().highlight_color.is_transparent()).await,
            "release never reached the second client"
        );
    }
}
