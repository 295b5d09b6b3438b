//! Per-call bidirectional media WebSocket.
//!
//! The telephony provider connects here once per call, identified by a
//! `call_control_id` query parameter. Inbound `media` frames are decoded and
//! forwarded to the call's supervisor; outbound µ-law chunks are framed into
//! 20 ms packets and written back on the same socket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::ServerState;
use crate::call::{CallEvent, CallHandle};
use crate::voice::audio::{MIN_MEDIA_PACKET_BYTES, OUTBOUND_PACKET_BYTES};

/// Cooperative yield cadence on the outbound path.
const YIELD_EVERY_PACKETS: usize = 10;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub call_control_id: String,
}

/// Media stream events from the provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum StreamEvent {
    Connected {},
    Start {
        #[serde(default)]
        stream_id: String,
    },
    Media {
        media: MediaPayload,
    },
    Stop {},
}

#[derive(Debug, Deserialize)]
struct MediaPayload {
    /// Base64-encoded µ-law audio.
    payload: String,
}

pub async fn handle(
    ws: WebSocketUpgrade,
    Query(query): Query<MediaQuery>,
    State(state): State<ServerState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, query.call_control_id, state))
}

async fn handle_stream(mut socket: WebSocket, call_control_id: String, state: ServerState) {
    let Some(_slot) = super::ConnectionGauge::acquire(&state.connections) else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let Some(handle) = state.deps.registry.get(&call_control_id).await else {
        warn!(call = %call_control_id, "media socket for unknown call");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    info!(call = %call_control_id, "media socket connected");

    // Outbound chunks from the supervisor's TTS pump land here.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(64);
    let mut bound = false;
    let mut stream_id = call_control_id.clone();
    // Partial outbound packet carried between chunks.
    let mut pending: Vec<u8> = Vec::new();
    let mut packets_since_yield = 0usize;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(t))) => t,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(call = %call_control_id, "media socket closed");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(call = %call_control_id, "media socket error: {}", e);
                        break;
                    }
                };

                let event: StreamEvent = match serde_json::from_str(&text) {
                    Ok(e) => e,
                    Err(e) => {
                        debug!(call = %call_control_id, "unparsed media event: {}", e);
                        continue;
                    }
                };

                match event {
                    StreamEvent::Connected {} => {
                        debug!(call = %call_control_id, "provider media handshake");
                    }
                    StreamEvent::Start { stream_id: sid } => {
                        if !sid.is_empty() {
                            stream_id = sid;
                        }
                        if !bound {
                            bound = true;
                            let _ = handle
                                .events
                                .send(CallEvent::MediaConnected { outbound: outbound_tx.clone() })
                                .await;
                        }
                    }
                    StreamEvent::Media { media } => {
                        // `start` can be late or missing; the first frame binds.
                        if !bound {
                            bound = true;
                            let _ = handle
                                .events
                                .send(CallEvent::MediaConnected { outbound: outbound_tx.clone() })
                                .await;
                        }
                        forward_frame(&handle, &media.payload).await;
                    }
                    StreamEvent::Stop {} => {
                        info!(call = %call_control_id, "media stream stop");
                        let _ = handle.events.send(CallEvent::MediaStopped).await;
                        break;
                    }
                }
            }

            chunk = outbound_rx.recv() => {
                let Some(chunk) = chunk else {
                    // Supervisor dropped the sender; keep reading inbound.
                    continue;
                };
                pending.extend_from_slice(&chunk);
                while pending.len() >= OUTBOUND_PACKET_BYTES {
                    let packet: Vec<u8> = pending.drain(..OUTBOUND_PACKET_BYTES).collect();
                    if send_packet(&mut socket, &stream_id, &packet).await.is_err() {
                        warn!(call = %call_control_id, "outbound media send failed");
                        return;
                    }
                    handle.stats.sent_out.fetch_add(1, Ordering::Relaxed);
                    packets_since_yield += 1;
                    // Keep long syntheses from starving the reader; the
                    // provider buffers, so no pacing beyond this.
                    if packets_since_yield >= YIELD_EVERY_PACKETS {
                        packets_since_yield = 0;
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    }
}

/// Decode one inbound frame and route it toward STT.
async fn forward_frame(handle: &CallHandle, payload_b64: &str) {
    let bytes = match BASE64.decode(payload_b64) {
        Ok(b) => b,
        Err(e) => {
            debug!("bad media payload base64: {}", e);
            return;
        }
    };
    handle.stats.media_in.fetch_add(1, Ordering::Relaxed);

    // Provider keepalives are shorter than 10 ms of audio.
    if bytes.len() < MIN_MEDIA_PACKET_BYTES {
        return;
    }
    // Bridged calls keep the socket but the AI path is disengaged.
    if handle.is_bridged() {
        handle.stats.dropped_bridged.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let _ = handle.events.send(CallEvent::MediaFrame(bytes)).await;
}

async fn send_packet(
    socket: &mut WebSocket,
    stream_id: &str,
    packet: &[u8],
) -> Result<(), axum::Error> {
    let frame = json!({
        "event": "media",
        "stream_id": stream_id,
        "media": { "payload": BASE64.encode(packet) },
    });
    socket.send(Message::Text(frame.to_string().into())).await
}
