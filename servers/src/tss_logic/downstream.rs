use crate::tss_logic::config::Config;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::StreamExt;
use lib_common::core::category::TelemetryCategory;
use lib_common::core::dispatcher::Dispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
}

pub async fn run(
    config: Config,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let app = Router::new()
        .route("/ws/{category}", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { dispatcher });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    log::info!("Downstream server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind downstream listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await
        .expect("Downstream server failed");
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(category): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // Unknown category keys are rejected here, before the dispatcher is touched.
    match TelemetryCategory::from_key(&category) {
        Some(category) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, category))
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("Category: {} does not exist.", category),
        )
            .into_response(),
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState, category: TelemetryCategory) {
    let (client_id, mut rx) = state.dispatcher.subscribe(category);

    loop {
        tokio::select! {
            // Subscribers only listen; we watch their side of the socket for
            // disconnects and drain anything else they send.
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            // Broadcasted records for this category
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if socket.send(Message::Text(message.to_string().into())).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    None => break,
                }
            }
        }
    }

    state.dispatcher.unsubscribe(category, client_id);
}
