//! WebSocket entrypoint for bot clusters.
//!
//! Each upgraded socket is split in two. A writer task drains the
//! connection's outbound channel into the sink; the current task turns the
//! inbound half into [`Frame`]s, runs the identify handshake and then the
//! hub's receive loop.

use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use garven_cluster::{ClusterConnection, Frame, Outbound};

use crate::AppState;

/// How long a rejected socket gets to flush its close frame.
const CLOSE_FLUSH: Duration = Duration::from_secs(1);

// GET /ws
pub async fn entrypoint(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let (conn, outbound) = ClusterConnection::connecting();
    let session = conn.session();
    debug!(%session, "cluster socket opened");

    let mut writer = tokio::spawn(write_outbound(sink, outbound));
    let mut frames = inbound_frames(stream);

    match state.hub.identify(&conn, &mut frames).await {
        Ok(identifier) => {
            state.metrics.inc(&state.metrics.identify_ok_count);
            info!(cluster = %identifier, %session, "cluster connected");

            state.hub.serve(conn, frames).await;
            state.metrics.inc(&state.metrics.connections_closed_count);
            writer.abort();
        }
        Err(e) => {
            state.metrics.inc(&state.metrics.identify_failed_count);
            debug!(%session, error = %e, "rejected cluster socket");

            drop(conn);
            if tokio::time::timeout(CLOSE_FLUSH, &mut writer).await.is_err() {
                writer.abort();
            }
        }
    }
}

/// Map the socket's inbound half onto transport-neutral frames.
///
/// Ping/pong is handled by the WebSocket layer and skipped here. A read
/// error is reported as [`Frame::Close`].
fn inbound_frames(stream: SplitStream<WebSocket>) -> impl Stream<Item = Frame> + Unpin {
    stream.filter_map(|message| {
        let frame = match message {
            Ok(WsMessage::Text(text))   => Some(Frame::Text(text)),
            Ok(WsMessage::Binary(data)) => Some(Frame::Binary(data)),
            Ok(WsMessage::Close(_))     => Some(Frame::Close),
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => None,
            Err(e) => {
                debug!(error = %e, "cluster socket read failed");
                Some(Frame::Close)
            }
        };
        futures::future::ready(frame)
    })
}

/// Drain the outbound channel into the sink until a close is sent or the
/// connection handle is dropped.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(text) => {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    warn!(error = %e, "cluster socket write failed");
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                let frame = CloseFrame { code, reason: reason.into() };
                if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                    debug!(error = %e, "close frame not delivered");
                }
                break;
            }
        }
    }
}
