//! WebSocket front door (spec §4.2, §6): one connection per leg, each
//! framing `Envelope`s as JSON text messages. Grounded on the teacher's
//! split-sink/split-stream handler shape — a writer task draining a channel
//! and a reader loop dispatching parsed messages — generalized from the
//! teacher's single in-process agent session to attaching a leg onto the
//! call registry and handing every inbound envelope to the session actor.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use callbroker_core::{BrokerError, CallId, Envelope, Role};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Consecutive unanswered server pings after which a leg is treated as gone
/// (spec §5 "missed-pong after 3 consecutive misses").
const MAX_MISSED_PONGS: u32 = 3;

use crate::egress::EgressQueue;
use crate::session::CallSession;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub call_id: String,
    pub role: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, axum::http::StatusCode> {
    let role = Role::parse(&query.role).ok_or(axum::http::StatusCode::BAD_REQUEST)?;
    let call_id = CallId::new(query.call_id);

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, call_id, role)))
}

async fn handle_socket(socket: WebSocket, state: AppState, call_id: CallId, role: Role) {
    let (session, leg) = match state.registry.attach(call_id.clone(), role).await {
        Ok(attached) => attached,
        Err(err) => {
            tracing::warn!(call_id = %call_id, role = %role, error = %err, "failed to attach leg");
            return;
        },
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let egress_for_writer = leg.egress.clone();
    let egress_for_errors = leg.egress.clone();
    let codec_allowlist = state.get_settings().broker.codec_allowlist.clone();
    let ping_interval_ms = state.get_settings().broker.ping_interval_ms;
    let missed_pongs = Arc::new(AtomicU32::new(0));

    let writer = tokio::spawn(async move {
        while let Some(envelope) = egress_for_writer.pop().await {
            let Ok(json) = serde_json::to_string(&envelope) else { continue };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let ping_egress = leg.egress.clone();
    let ping_session = session.clone();
    let ping_missed = missed_pongs.clone();
    let pinger = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(ping_interval_ms));
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            if ping_missed.fetch_add(1, Ordering::SeqCst) + 1 >= MAX_MISSED_PONGS {
                tracing::warn!(call_id = %call_id, role = %role, "missed pong threshold reached, detaching leg");
                ping_session.detach_leg(role);
                break;
            }
            ping_egress.push_audio(Envelope::Ping);
        }
    });

    loop {
        tokio::select! {
            _ = leg.cancel.cancelled() => break,
            frame = ws_rx.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(Message::Text(text)) => {
                        handle_inbound(&state, &session, &egress_for_errors, role, &text, &codec_allowlist.0, &missed_pongs).await;
                    },
                    Ok(Message::Binary(_)) => {
                        // The wire schema frames audio as base64 inside a JSON
                        // text message (spec §4.2); raw binary frames are not
                        // part of the protocol.
                        tracing::debug!(call_id = %call_id, role = %role, "ignoring raw binary frame");
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {},
                }
            },
        }
    }

    pinger.abort();
    session.detach_leg(role);
    writer.abort();
}

async fn handle_inbound(
    state: &AppState,
    session: &CallSession,
    egress: &Arc<EgressQueue>,
    role: Role,
    text: &str,
    allowlist: &[String],
    missed_pongs: &AtomicU32,
) {
    if state.rate_limiter.check_message().is_err() {
        send_error(egress, BrokerError::client_protocol("rate limit exceeded"));
        return;
    }

    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            send_error(egress, BrokerError::unknown_envelope(err.to_string()));
            return;
        },
    };

    match envelope {
        Envelope::Audio { codec, payload, seq, .. } => {
            if !allowlist.iter().any(|name| name == codec.as_str()) {
                send_error(egress, BrokerError::unsupported_codec(codec.as_str()));
                return;
            }
            if state.rate_limiter.check_audio(payload.len()).is_err() {
                send_error(egress, BrokerError::client_protocol("audio rate limit exceeded"));
                return;
            }
            session.submit_audio(role, codec, payload, seq);
        },
        Envelope::Ping => session.submit_ping(role),
        Envelope::Pong => missed_pongs.store(0, Ordering::SeqCst),
        Envelope::End => session.submit_end("requested"),
        other => {
            send_error(egress, BrokerError::client_protocol(format!("unexpected ingress kind: {other:?}")));
        },
    }
}

/// Malformed or unexpected input never closes the stream (spec §4.2) — the
/// offending leg gets an `error` envelope on its own egress queue and stays
/// connected.
fn send_error(egress: &Arc<EgressQueue>, err: BrokerError) {
    tracing::debug!(error = %err, "client protocol error");
    egress.push_audio(Envelope::Error { code: err.wire_code().to_string(), message: err.to_string() });
}
