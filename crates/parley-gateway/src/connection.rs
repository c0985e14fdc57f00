use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::Identity;

use crate::auth::decode_identity;
use crate::error::ChatError;
use crate::registry::{Delivery, Outbound, Registration};
use crate::service::ChatService;

/// How long a connection that did not authenticate at upgrade time has to
/// send its `identify` command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Handle a WebSocket whose token was already verified at the HTTP upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, service: ChatService, identity: Identity) {
    let (sender, receiver) = socket.split();
    run_connection_loop(sender, receiver, service, identity).await;
}

/// Handle a WebSocket that must authenticate with an `identify` command first.
pub async fn handle_connection(socket: WebSocket, service: ChatService, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match wait_for_identify(&mut receiver, &jwt_secret, IDENTIFY_TIMEOUT).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!("WebSocket client failed to identify, closing");
            reject(&mut sender, &err).await;
            return;
        }
    };

    run_connection_loop(sender, receiver, service, identity).await;
}

async fn run_connection_loop(mut sender: WsSender, mut receiver: WsReceiver, service: ChatService, identity: Identity) {
    let Registration {
        conn_id,
        mut outbound,
        closed,
        ..
    } = match service.connect(&identity).await {
        Ok(registration) => registration,
        Err(err) => {
            warn!("{} ({}) could not be registered: {}", identity.username, identity.user_id, err);
            reject(&mut sender, &err).await;
            return;
        }
    };

    // Registry -> socket. Ends when the registry drops this connection or the
    // client stops accepting frames.
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                item = outbound.recv() => {
                    let frame = match item {
                        Some(Outbound::Event(event)) => match serde_json::to_string(&event) {
                            Ok(text) => Message::Text(text.into()),
                            Err(e) => {
                                warn!("Failed to encode {} event: {}", event.kind(), e);
                                continue;
                            }
                        },
                        Some(Outbound::Ping) => Message::Ping(Vec::new().into()),
                        None => break,
                    };
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = closed.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Socket -> service
    let recv_service = service.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_service, &recv_identity, conn_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_identity.username,
                            recv_identity.user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                        let err = ChatError::InvalidRequest("unrecognised command".into());
                        reply(&recv_service, &recv_identity, conn_id, err.to_event()).await;
                    }
                },
                Message::Pong(_) => {
                    recv_service
                        .registry()
                        .mark_alive(recv_identity.user_id, conn_id)
                        .await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    service.disconnect(identity.user_id, conn_id).await;
    info!("{} ({}) left the gateway (conn {})", identity.username, identity.user_id, conn_id);
}

/// Read frames until the first `identify` command. Anything else is
/// ignored; running out of frames or time fails authentication.
async fn wait_for_identify<S, E>(receiver: &mut S, jwt_secret: &str, timeout: Duration) -> Result<Identity, ChatError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return decode_identity(&token, jwt_secret);
                }
            }
        }
        Err(ChatError::AuthFailure)
    };

    tokio::time::timeout(timeout, identify)
        .await
        .unwrap_or(Err(ChatError::AuthFailure))
}

/// Tell the client why it is being turned away, then close.
async fn reject<S>(sender: &mut S, err: &ChatError)
where
    S: Sink<Message> + Unpin,
{
    if let Ok(text) = serde_json::to_string(&err.to_event()) {
        let _ = sender.send(Message::Text(text.into())).await;
    }
    let _ = sender.send(Message::Close(None)).await;
}

async fn handle_command(service: &ChatService, identity: &Identity, conn_id: Uuid, cmd: GatewayCommand) {
    let result = match cmd {
        // Already authenticated
        GatewayCommand::Identify { .. } => Ok(None),

        GatewayCommand::SendMessage {
            conversation_id,
            content,
            attachments,
            delivery,
        } => service
            .send_message(identity, conversation_id, content, attachments, delivery)
            .await
            .map(|message| {
                Some(GatewayEvent::MessageSent {
                    scheduled_delivery: message.scheduled_delivery,
                    message,
                })
            }),

        GatewayCommand::MarkRead { message_id } => {
            service.mark_read(identity, message_id).await.map(|_| None)
        }

        GatewayCommand::TypingStart { conversation_id } => service
            .typing_start(identity, conn_id, conversation_id)
            .await
            .map(|()| None),

        GatewayCommand::TypingStop { conversation_id } => service
            .typing_stop(identity, conn_id, conversation_id)
            .await
            .map(|()| None),
    };

    match result {
        Ok(Some(event)) => reply(service, identity, conn_id, event).await,
        Ok(None) => {}
        Err(err) => {
            if err.retryable() {
                warn!("{} ({}) command failed: {}", identity.username, identity.user_id, err);
            } else {
                debug!("{} ({}) command rejected: {}", identity.username, identity.user_id, err);
            }
            reply(service, identity, conn_id, err.to_event()).await;
        }
    }
}

/// Answer the connection that issued a command, and nobody else.
async fn reply(service: &ChatService, identity: &Identity, conn_id: Uuid, event: GatewayEvent) {
    if let Delivery::Evicted(departed) = service
        .registry()
        .send_to_connection(identity.user_id, conn_id, event)
        .await
    {
        service.announce_departures(vec![departed]).await;
    }
}
