//! WebSocket upgrade handler and per-connection session

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{JoinOutcome, PlayerCommand, RoomError, RoomHandle, RoomInput};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Frames buffered per connection before the room starts dropping snapshots
const OUTBOUND_CAPACITY: usize = 32;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        session_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let writer_handle = tokio::spawn(write_loop(session_id, ws_sink, outbound_rx));

    let mut session = Session {
        session_id,
        room: None,
        outbound: outbound_tx,
        state,
    };
    session.read_loop(ws_stream).await;
    session.disconnect().await;

    writer_handle.abort();
    info!(session_id = %session.session_id, "WebSocket connection closed");
}

/// Writer task: outbound queue -> WebSocket
async fn write_loop(
    session_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(session_id = %session_id, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// One connection's lobby state; in-room messages go to the room queue
struct Session {
    session_id: Uuid,
    room: Option<RoomHandle>,
    outbound: mpsc::Sender<ServerMsg>,
    state: AppState,
}

impl Session {
    /// Reader loop: WebSocket -> lobby / room
    async fn read_loop(&mut self, mut ws_stream: SplitStream<WebSocket>) {
        let rate_limiter = SessionRateLimiter::new();

        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check_input() {
                        warn!(session_id = %self.session_id, "Rate limited input message");
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(msg) => self.handle(msg).await,
                        Err(e) => {
                            warn!(session_id = %self.session_id, error = %e, "Failed to parse client message");
                            self.reply(ServerMsg::error("bad_message", e.to_string()));
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!(session_id = %self.session_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(session_id = %self.session_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    error!(session_id = %self.session_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    async fn handle(&mut self, msg: ClientMsg) {
        match msg {
            ClientMsg::CreateRoom { name, config } => self.create_room(&name, config).await,
            ClientMsg::JoinRoom {
                room_id,
                name,
                resume_session,
            } => self.join_room(room_id, name, resume_session).await,
            ClientMsg::ListRooms => {
                let rooms = self.state.registry.list();
                self.reply(ServerMsg::RoomList { rooms });
            }
            ClientMsg::LeaveRoom => self.leave_room().await,
            ClientMsg::Ping { t } => self.reply(ServerMsg::Pong {
                t,
                server_time: unix_millis(),
            }),
            other => {
                if let Some(command) = PlayerCommand::from_client(other) {
                    self.forward(command);
                }
            }
        }
    }

    async fn create_room(&mut self, name: &str, overlay: Option<serde_json::Value>) {
        let handle = match self.state.create_room(name, overlay.as_ref()) {
            Ok(handle) => handle,
            Err(e) => return self.reply_room_error(&e),
        };
        self.join_room(handle.id, None, None).await;
    }

    async fn join_room(&mut self, room_id: Uuid, name: Option<String>, resume: Option<Uuid>) {
        let Some(handle) = self.state.registry.get(&room_id) else {
            return self.reply_room_error(&RoomError::NotFound);
        };
        if self.room.is_some() {
            self.leave_room().await;
        }

        let session_id = resume.unwrap_or(self.session_id);
        let (reply_tx, reply_rx) = oneshot::channel();
        let join = RoomInput::Join {
            session_id,
            name,
            outbound: self.outbound.clone(),
            reply: reply_tx,
        };
        if handle.input_tx.send(join).await.is_err() {
            return self.reply_room_error(&RoomError::NotFound);
        }

        match reply_rx.await {
            Ok(Ok(outcome)) => {
                self.session_id = session_id;
                info!(session_id = %session_id, room_id = %handle.id, ?outcome, "Joined room");
                self.reply(ServerMsg::RoomJoined {
                    room_id: handle.id,
                    room_name: handle.name.clone(),
                    session_id,
                    resumed: outcome == JoinOutcome::Resumed,
                });
                self.room = Some(handle);
            }
            Ok(Err(e)) => self.reply_room_error(&e),
            Err(_) => self.reply_room_error(&RoomError::NotFound),
        }
    }

    async fn leave_room(&mut self) {
        if let Some(room) = self.room.take() {
            let _ = room
                .input_tx
                .send(RoomInput::Leave {
                    session_id: self.session_id,
                })
                .await;
        }
    }

    /// Socket closed: the room keeps the player for the grace period
    async fn disconnect(&mut self) {
        if let Some(room) = self.room.take() {
            let _ = room
                .input_tx
                .send(RoomInput::Disconnect {
                    session_id: self.session_id,
                })
                .await;
        }
    }

    fn forward(&self, command: PlayerCommand) {
        let Some(room) = &self.room else {
            self.reply(ServerMsg::error("not_in_room", "Join a room first"));
            return;
        };
        let input = RoomInput::Command {
            session_id: self.session_id,
            command,
        };
        if let Err(e) = room.input_tx.try_send(input) {
            warn!(session_id = %self.session_id, room_id = %room.id, error = %e, "Room queue rejected input");
        }
    }

    fn reply(&self, msg: ServerMsg) {
        if self.outbound.try_send(msg).is_err() {
            debug!(session_id = %self.session_id, "Outbound full, reply dropped");
        }
    }

    fn reply_room_error(&self, e: &RoomError) {
        self.reply(ServerMsg::error(e.code(), e.to_string()));
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
