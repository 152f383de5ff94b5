use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{info, trace, warn};

use threadline_db::{Database, StoreGateway};
use threadline_sync::{AuthState, Services, ThreadlineClient};
use threadline_types::api::Claims;
use threadline_types::events::{GatewayCommand, GatewayEvent};
use threadline_types::models::PrincipalId;

use crate::session::GatewaySession;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Sender = SplitSink<WebSocket, Message>;
type Receiver = SplitStream<WebSocket>;

/// Handle a single WebSocket connection: Identify, Ready, then commands in
/// and view changes out until either side goes away.
pub async fn handle_connection(socket: WebSocket, db: Arc<Database>, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let principal = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(principal) => principal,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to gateway", principal);

    let ready = GatewayEvent::Ready {
        principal_id: principal.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let store: Arc<dyn StoreGateway> = Arc::new(db.scoped(principal.as_str()));
    let client = ThreadlineClient::new(
        Services::new(store),
        Arc::new(AuthState::signed_in(principal.clone())),
    );
    let mut session = GatewaySession::new(client, principal.clone());

    run_connection_loop(&mut sender, &mut receiver, &mut session).await;

    session.close().await;
    info!("{} disconnected from gateway", principal);
}

async fn run_connection_loop(
    sender: &mut Sender,
    receiver: &mut Receiver,
    session: &mut GatewaySession,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Pong(_))) => {
                        pong_received = true;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };

                let cmd = match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => cmd,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            session.principal(),
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        continue;
                    }
                };

                trace!("{} -> {:?}", session.principal(), cmd);
                for event in session.handle(cmd).await {
                    if send_event(sender, &event).await.is_err() {
                        return;
                    }
                }
            }
            event = session.next_update() => {
                if send_event(sender, &event).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                pong_received = false;
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_event(sender: &mut Sender, event: &GatewayEvent) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(receiver: &mut Receiver, jwt_secret: &str) -> Option<PrincipalId> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return principal_from_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

/// The principal a token was issued to, if the token is valid.
pub fn principal_from_token(token: &str, jwt_secret: &str) -> Option<PrincipalId> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    if data.claims.sub.is_empty() {
        return None;
    }
    Some(data.claims.sub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(sub: &str, exp: usize) -> String {
        let claims = Claims {
            sub: PrincipalId::new(sub),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap()
    }

    fn far_future() -> usize {
        4_000_000_000
    }

    #[test]
    fn valid_token_yields_principal() {
        let principal = principal_from_token(&token("alice", far_future()), "secret");
        assert_eq!(principal, Some(PrincipalId::new("alice")));
    }

    #[test]
    fn bad_tokens_are_refused() {
        assert_eq!(principal_from_token(&token("alice", far_future()), "other"), None);
        assert_eq!(principal_from_token(&token("alice", 1), "secret"), None);
        assert_eq!(principal_from_token(&token(" ", far_future()), "secret"), None);
        assert_eq!(principal_from_token("garbage", "secret"), None);
    }
}
