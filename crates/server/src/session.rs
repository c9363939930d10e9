//! Call Session actor (spec §4.7, §9 redesign note "actor-style inbox per
//! session"). A single dedicated task owns every piece of mutable session
//! state — `legs`, `transcript`, the intelligence snapshot's last-emitted
//! marker, and the state machine — and processes `SessionCommand`s strictly
//! one at a time. Nothing outside this task ever touches that state
//! directly, so no lock is needed around it (spec §5 "single-writer lock or
//! actor-style inbox").
//!
//! Heavy async work (STT round trips, the analysis dispatcher's lanes)
//! happens in tasks the actor spawns and forgets about; only their final,
//! cheap results come back in as further commands, keeping the actor loop
//! itself non-blocking (spec §5 "no CPU-bound operation exceeds a few
//! milliseconds without yielding").
//!
//! Grounded on the teacher's `SessionManager`/`Session` lifecycle shape
//! (touch/is_expired/close), generalized from a single owning struct behind
//! an `RwLock` to the two-leg state machine in spec §4.7, with direct field
//! access replaced by command-passing per the redesign note above.

use crate::egress::EgressQueue;
use callbroker_config::constants::dispatcher as dispatcher_thresholds;
use callbroker_core::{
    AudioPayload, BrokerError, CallId, Codec, Envelope, IntelligenceSink, IntelligenceSnapshot, Role, SpeechToText,
    TranscriptEntry, TranscriptSink,
};
use callbroker_persistence::RecordingLog;
use callbroker_pipeline::dispatcher::DispatchEvent;
use callbroker_pipeline::{normalise, AnalysisDispatcher, EndpointingConfig, StreamingTranscriber};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// What an attached leg gets back: where to push outbound envelopes, and a
/// token that fires when that leg should stop reading from its stream.
pub struct LegHandle {
    pub egress: Arc<EgressQueue>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Forming,
    Active,
    Draining,
    Ended,
}

#[derive(Debug, Clone)]
pub struct CallStatus {
    pub state: SessionState,
    pub legs_present: Vec<Role>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

struct Leg {
    egress: Arc<EgressQueue>,
    transcriber: Arc<StreamingTranscriber>,
    ingress_cancel: CancellationToken,
}

enum SessionCommand {
    Attach {
        role: Role,
        reply: oneshot::Sender<Result<LegHandle, BrokerError>>,
    },
    Detach {
        role: Role,
    },
    Audio {
        role: Role,
        codec: Codec,
        payload: Vec<u8>,
        seq: Option<u64>,
    },
    TranscriptReady {
        role: Role,
        entry: TranscriptEntry,
    },
    Dispatch(DispatchEvent),
    Ping {
        role: Role,
    },
    End {
        reason: &'static str,
    },
    GraceExpired {
        generation: u64,
    },
    Status {
        reply: oneshot::Sender<CallStatus>,
    },
}

/// Handle held by the registry and by `websocket.rs`. Cloning is cheap —
/// it's just a channel sender and a cancellation token.
#[derive(Clone)]
pub struct CallSession {
    call_id: CallId,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
}

pub struct SessionDeps {
    pub stt: Arc<dyn SpeechToText>,
    pub dispatcher: Arc<AnalysisDispatcher>,
    pub transcript_sink: Arc<dyn TranscriptSink>,
    pub intelligence_sink: Arc<dyn IntelligenceSink>,
    pub egress_queue_capacity: usize,
    pub drain_grace_ms: u64,
    /// Directory for the per-call recording log (spec §6 "Persisted state
    /// layout"), or `None` when `broker.recording_enabled` is off.
    pub recording_dir: Option<String>,
    pub endpointing: EndpointingConfig,
}

impl CallSession {
    pub fn spawn(call_id: CallId, deps: SessionDeps) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let actor = Actor {
            call_id: call_id.clone(),
            cmd_tx: cmd_tx.clone(),
            cancel: cancel.clone(),
            deps,
            legs: HashMap::new(),
            transcript: Vec::new(),
            state: SessionState::Forming,
            started_at: Utc::now(),
            last_activity: Utc::now(),
            grace_generation: 0,
            last_emitted_intelligence_at: None,
            recording_log: None,
        };
        tokio::spawn(actor.run(cmd_rx));

        Self { call_id, cmd_tx, cancel }
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn attach_leg(&self, role: Role) -> Result<LegHandle, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Attach { role, reply: reply_tx })
            .map_err(|_| BrokerError::internal_invariant("session actor gone"))?;
        reply_rx.await.map_err(|_| BrokerError::internal_invariant("session actor dropped reply"))?
    }

    pub fn detach_leg(&self, role: Role) {
        let _ = self.cmd_tx.send(SessionCommand::Detach { role });
    }

    pub fn submit_audio(&self, role: Role, codec: Codec, payload: Vec<u8>, seq: Option<u64>) {
        let _ = self.cmd_tx.send(SessionCommand::Audio { role, codec, payload, seq });
    }

    pub fn submit_ping(&self, role: Role) {
        let _ = self.cmd_tx.send(SessionCommand::Ping { role });
    }

    pub fn submit_end(&self, reason: &'static str) {
        let _ = self.cmd_tx.send(SessionCommand::End { reason });
    }

    pub async fn status(&self) -> Result<CallStatus, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::Status { reply: reply_tx })
            .map_err(|_| BrokerError::internal_invariant("session actor gone"))?;
        reply_rx.await.map_err(|_| BrokerError::internal_invariant("session actor dropped reply"))
    }
}

struct Actor {
    call_id: CallId,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    deps: SessionDeps,
    legs: HashMap<Role, Leg>,
    transcript: Vec<TranscriptEntry>,
    state: SessionState,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    grace_generation: u64,
    /// Most recent intelligence snapshot timestamp already emitted to the
    /// operator, so a coaching envelope can be preceded by a catch-up
    /// `intelligence` envelope when the two would otherwise race (spec §7
    /// "the broker emits the intelligence envelope first").
    last_emitted_intelligence_at: Option<DateTime<Utc>>,
    /// Opened lazily on the first command once the actor is running, since
    /// opening the file is async and `spawn` itself is not.
    recording_log: Option<RecordingLog>,
}

impl Actor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>) {
        if let Some(dir) = self.deps.recording_dir.clone() {
            match RecordingLog::create(&dir, &self.call_id, self.started_at).await {
                Ok(log) => self.recording_log = Some(log),
                Err(err) => tracing::warn!(error = %err, "failed to open recording log, continuing unrecorded"),
            }
        }

        while let Some(command) = cmd_rx.recv().await {
            self.handle(command).await;
            if self.state == SessionState::Ended {
                break;
            }
        }
        self.teardown().await;
    }

    async fn handle(&mut self, command: SessionCommand) {
        self.last_activity = Utc::now();
        match command {
            SessionCommand::Attach { role, reply } => self.on_attach(role, reply).await,
            SessionCommand::Detach { role } => self.on_detach(role).await,
            SessionCommand::Audio { role, codec, payload, seq } => self.on_audio(role, codec, payload, seq).await,
            SessionCommand::TranscriptReady { role, entry } => self.on_transcript_ready(role, entry).await,
            SessionCommand::Dispatch(event) => self.on_dispatch(event).await,
            SessionCommand::Ping { role } => self.on_ping(role).await,
            SessionCommand::End { reason } => self.on_end(reason).await,
            SessionCommand::GraceExpired { generation } => self.on_grace_expired(generation).await,
            SessionCommand::Status { reply } => {
                let _ = reply.send(CallStatus {
                    state: self.state,
                    legs_present: self.legs.keys().copied().collect(),
                    started_at: self.started_at,
                    last_activity: self.last_activity,
                });
            },
        }
    }

    async fn on_attach(&mut self, role: Role, reply: oneshot::Sender<Result<LegHandle, BrokerError>>) {
        if self.state == SessionState::Ended {
            let _ = reply.send(Err(BrokerError::internal_invariant("attach on ended session")));
            return;
        }
        if self.legs.contains_key(&role) {
            let _ = reply.send(Err(BrokerError::RoleOccupied));
            return;
        }

        let egress = EgressQueue::new(self.deps.egress_queue_capacity);
        let ingress_cancel = self.cancel.child_token();
        self.legs.insert(
            role,
            Leg {
                egress: egress.clone(),
                transcriber: Arc::new(StreamingTranscriber::new(role, self.deps.endpointing)),
                ingress_cancel: ingress_cancel.clone(),
            },
        );

        match self.state {
            SessionState::Forming if self.legs.len() == 1 => {
                self.push_to(role, Envelope::Connected).await;
            },
            SessionState::Draining => {
                self.grace_generation += 1;
                self.state = SessionState::Active;
                self.broadcast(Envelope::PeerJoined { role }).await;
                let _ = reply.send(Ok(LegHandle { egress, cancel: ingress_cancel }));
                return;
            },
            _ => {},
        }

        if self.legs.len() == 2 {
            self.state = SessionState::Active;
            self.broadcast(Envelope::PeerJoined { role }).await;
        }

        let _ = reply.send(Ok(LegHandle { egress, cancel: ingress_cancel }));
    }

    async fn on_detach(&mut self, role: Role) {
        let Some(leg) = self.legs.remove(&role) else { return };
        leg.ingress_cancel.cancel();
        leg.egress.close();

        match self.state {
            SessionState::Forming => {
                self.state = SessionState::Ended;
            },
            SessionState::Active => {
                self.state = SessionState::Draining;
                self.broadcast(Envelope::PeerLeft { role }).await;
                self.start_grace_timer();
            },
            SessionState::Draining => {
                self.state = SessionState::Ended;
                self.broadcast(Envelope::CallEnded {
                    reason: "requested".to_string(),
                    duration_ms: self.duration_ms(),
                })
                .await;
            },
            SessionState::Ended => {},
        }
    }

    fn start_grace_timer(&mut self) {
        self.grace_generation += 1;
        let generation = self.grace_generation;
        let cmd_tx = self.cmd_tx.clone();
        let grace_ms = self.deps.drain_grace_ms;
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(grace_ms)).await;
            let _ = cmd_tx.send(SessionCommand::GraceExpired { generation });
        });
    }

    async fn on_grace_expired(&mut self, generation: u64) {
        if generation != self.grace_generation || self.state != SessionState::Draining {
            return;
        }
        self.state = SessionState::Ended;
        self.broadcast(Envelope::CallEnded {
            reason: "timeout".to_string(),
            duration_ms: self.duration_ms(),
        })
        .await;
    }

    async fn on_end(&mut self, reason: &'static str) {
        if self.state == SessionState::Ended {
            return;
        }
        self.state = SessionState::Ended;
        self.broadcast(Envelope::CallEnded {
            reason: reason.to_string(),
            duration_ms: self.duration_ms(),
        })
        .await;
    }

    async fn on_ping(&mut self, role: Role) {
        self.push_to(role, Envelope::Pong).await;
    }

    async fn on_audio(&mut self, role: Role, codec: Codec, payload: Vec<u8>, seq: Option<u64>) {
        if self.state != SessionState::Active && self.state != SessionState::Forming {
            return;
        }

        let peer = role.other();
        if let Some(leg) = self.legs.get(&peer) {
            leg.egress.push_audio(Envelope::Audio {
                codec,
                payload: payload.clone(),
                seq,
                from: Some(role),
            });
        }

        if let Some(log) = self.recording_log.as_mut() {
            if let Err(err) = log.append_chunk(role, codec, &payload, Utc::now()).await {
                tracing::warn!(error = %err, "failed to append recording chunk");
            }
        }

        let Some(leg) = self.legs.get(&role) else { return };
        let transcriber = leg.transcriber.clone();
        let cancel = leg.ingress_cancel.clone();
        let stt = self.deps.stt.clone();
        let cmd_tx = self.cmd_tx.clone();

        tokio::spawn(async move {
            let pcm16 = match normalise(codec, &payload) {
                Ok(pcm) => pcm,
                Err(err) => {
                    tracing::debug!(error = %err, "dropping unnormalisable audio chunk");
                    return;
                },
            };
            if let Some(entry) = transcriber.ingest(&pcm16, stt.as_ref(), None, cancel).await {
                let _ = cmd_tx.send(SessionCommand::TranscriptReady { role, entry });
            }
        });
    }

    async fn on_transcript_ready(&mut self, role: Role, entry: TranscriptEntry) {
        self.transcript.push(entry.clone());

        let sink = self.deps.transcript_sink.clone();
        let call_id = self.call_id.clone();
        let persisted_entry = entry.clone();
        tokio::spawn(async move {
            if let Err(err) = sink.append_transcript(&call_id, &persisted_entry).await {
                tracing::warn!(error = %err, "failed to persist transcript entry");
            }
        });

        self.broadcast_reliable(Envelope::Transcript {
            speaker: entry.speaker,
            text: entry.text.clone(),
            language: entry.language.clone(),
            confidence: entry.confidence,
            started_at: entry.started_at,
            ended_at: entry.ended_at,
        })
        .await;

        if role == Role::Scammer {
            let context_window: Vec<TranscriptEntry> = self
                .transcript
                .iter()
                .rev()
                .take(dispatcher_thresholds::COACHING_CONTEXT_WINDOW)
                .cloned()
                .collect();

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let cmd_tx = self.cmd_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    let _ = cmd_tx.send(SessionCommand::Dispatch(event));
                }
            });

            self.deps
                .dispatcher
                .dispatch(entry, context_window, self.cancel.child_token(), events_tx);
        }
    }

    async fn on_dispatch(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Intelligence(update) => {
                let sink = self.deps.intelligence_sink.clone();
                let call_id = self.call_id.clone();
                let snapshot = update.snapshot.clone();
                tokio::spawn(async move {
                    if let Err(err) = sink.update_intelligence(&call_id, &snapshot).await {
                        tracing::warn!(error = %err, "failed to persist intelligence snapshot");
                    }
                });

                self.last_emitted_intelligence_at = Some(update.snapshot.updated_at);
                self.push_to_reliable(
                    Role::Operator,
                    Envelope::Intelligence {
                        entities_delta: update.entities_delta,
                        tactics_delta: update.tactics_delta.iter().map(|t| t.as_str().to_string()).collect(),
                        threat_score: update.snapshot.threat_score,
                    },
                )
                .await;
            },
            DispatchEvent::Coaching(suggestion) => {
                // Ensure the operator never sees `coaching` without an
                // equally-fresh `intelligence` snapshot already delivered
                // (spec §7). The dispatcher itself makes no such guarantee
                // (spec §4.5) — this is the session's responsibility.
                let current = self.deps.dispatcher.snapshot();
                let already_caught_up = self
                    .last_emitted_intelligence_at
                    .map(|sent_at| sent_at >= current.updated_at)
                    .unwrap_or(false);
                if !already_caught_up {
                    self.emit_intelligence_snapshot(current).await;
                }

                let audio = match (suggestion.audio, suggestion.audio_codec) {
                    (Some(bytes), Some(codec)) => Some(AudioPayload { codec, bytes }),
                    _ => None,
                };
                self.push_to_reliable(
                    Role::Operator,
                    Envelope::Coaching {
                        text: suggestion.text,
                        strategy: suggestion.strategy,
                        intent: suggestion.intent_label,
                        audio,
                        updated_snapshot: self.deps.dispatcher.snapshot(),
                    },
                )
                .await;
            },
        }
    }

    /// Catch-up emission ahead of a coaching envelope: no fresh delta to
    /// report, just the current aggregate so the operator's view is at
    /// least as new as the coaching context window it's about to see.
    async fn emit_intelligence_snapshot(&mut self, snapshot: IntelligenceSnapshot) {
        self.last_emitted_intelligence_at = Some(snapshot.updated_at);
        self.push_to_reliable(
            Role::Operator,
            Envelope::Intelligence {
                entities_delta: Vec::new(),
                tactics_delta: Vec::new(),
                threat_score: snapshot.threat_score,
            },
        )
        .await;
    }

    async fn push_to(&self, role: Role, envelope: Envelope) {
        if let Some(leg) = self.legs.get(&role) {
            leg.egress.push_audio(envelope);
        }
    }

    async fn push_to_reliable(&self, role: Role, envelope: Envelope) {
        if let Some(leg) = self.legs.get(&role) {
            if let Err(err) = leg.egress.push_reliable(envelope).await {
                tracing::warn!(role = %role, error = %err, "egress queue blocked past deadline");
                let _ = self.cmd_tx.send(SessionCommand::Detach { role });
            }
        }
    }

    async fn broadcast(&self, envelope: Envelope) {
        for role in [Role::Operator, Role::Scammer] {
            if self.legs.contains_key(&role) {
                self.push_to(role, envelope.clone()).await;
            }
        }
    }

    async fn broadcast_reliable(&self, envelope: Envelope) {
        for role in [Role::Operator, Role::Scammer] {
            if self.legs.contains_key(&role) {
                self.push_to_reliable(role, envelope.clone()).await;
            }
        }
    }

    fn duration_ms(&self) -> u64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0) as u64
    }

    async fn teardown(mut self) {
        self.cancel.cancel();
        for (_, leg) in self.legs.drain() {
            leg.ingress_cancel.cancel();
            leg.egress.close();
        }
        if let Some(log) = self.recording_log.as_mut() {
            if let Err(err) = log.flush().await {
                tracing::warn!(error = %err, "failed to flush recording log on teardown");
            }
        }
    }
}
