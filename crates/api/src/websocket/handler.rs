//! WebSocket handler for Axum
//!
//! Authenticates the upgrade, registers the connection with the realtime
//! channel, and dispatches client events. Connections only observe; every
//! state change goes through the HTTP routes and the session service.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::StreamExt, SinkExt};
use harbor_shared::{ClientEvent, ServerEvent, SupportError};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::auth::AuthUser;
use crate::state::AppState;

use super::connection::Connection;
use super::room::Group;

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    token: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
/// Authenticates via query parameter token instead of middleware Extension.
/// The token is checked before the upgrade so a bad token is always a 401.
pub async fn ws_handler(
    State(app_state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = params.token.as_deref() else {
        tracing::warn!("WebSocket auth failed: missing token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let auth_user = match app_state.auth_state().authenticate(token) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket auth failed: invalid token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    tracing::info!(user_id = %auth_user.user_id, role = %auth_user.role, "WebSocket connection upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, auth_user, app_state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, auth_user: AuthUser, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let realtime = app_state.realtime().clone();
    let conn = realtime
        .add_connection(Connection::new(auth_user.user_id, auth_user.role, tx))
        .await;
    let connection_id = conn.connection_id;

    let _ = conn.send(ServerEvent::Connected { connection_id });

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else {
            break;
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(event, &conn, &auth_user, &app_state).await;
                }
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        connection_id = %connection_id,
                        "Failed to parse client event"
                    );
                    let _ = conn.send(ServerEvent::Error {
                        message: "Invalid event format".to_string(),
                    });
                }
            },
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {}
        }
    }

    // Cleanup on disconnect; offline presence is broadcast by the channel
    tracing::info!(connection_id = %connection_id, user_id = %auth_user.user_id, "WebSocket connection closing");
    realtime.remove_connection(&connection_id).await;

    send_task.abort();
}

/// Handle client event
async fn handle_client_event(
    event: ClientEvent,
    conn: &Arc<Connection>,
    auth_user: &AuthUser,
    app_state: &AppState,
) {
    let realtime = app_state.realtime();

    match event {
        ClientEvent::JoinSession { session_id } => {
            match app_state
                .sessions
                .authorize_group_join(&auth_user.actor(), session_id)
                .await
            {
                Ok(session) => realtime.join_session(conn, &session).await,
                Err(e) => {
                    if let SupportError::Storage(_) = e {
                        tracing::error!(error = %e, session_id = %session_id, "Failed to verify session access");
                    } else {
                        tracing::warn!(
                            connection_id = %conn.connection_id,
                            session_id = %session_id,
                            error = %e,
                            "Session join refused"
                        );
                    }
                    let _ = conn.send(ServerEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }

        ClientEvent::LeaveSession { session_id } => {
            realtime.leave_session(conn, session_id).await;
        }

        ClientEvent::TypingStart { session_id } => {
            relay_typing(conn, app_state, session_id, true).await;
        }

        ClientEvent::TypingStop { session_id } => {
            relay_typing(conn, app_state, session_id, false).await;
        }

        ClientEvent::Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}

/// Relay a typing indicator to the rest of the session group.
/// Only connections that joined the group may signal in it.
async fn relay_typing(conn: &Arc<Connection>, app_state: &AppState, session_id: uuid::Uuid, started: bool) {
    if !conn.is_subscribed(&session_id).await {
        let _ = conn.send(ServerEvent::Error {
            message: "Join the session before sending typing events".to_string(),
        });
        return;
    }

    let event = if started {
        ServerEvent::UserTypingStart {
            session_id,
            user_id: conn.user_id,
        }
    } else {
        ServerEvent::UserTypingStop {
            session_id,
            user_id: conn.user_id,
        }
    };

    app_state
        .realtime()
        .groups
        .broadcast(&Group::Session(session_id), event, Some(conn.user_id))
        .await;
}
