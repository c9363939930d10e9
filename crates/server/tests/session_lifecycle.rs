//! End-to-end scenarios over the session actor + egress queue, bypassing
//! the WebSocket/HTTP layers and the registry. Uses `callbroker-llm`'s
//! in-memory fakes and a fresh `IntelligenceExtractor`/`CoachingAdapter`
//! pair per test, the same way `registry.rs` builds them per call.

use callbroker_core::{CallId, Codec, Envelope, Role, Strategy};
use callbroker_llm::fakes::{EchoSpeechToText, NoopTextGenerator, SafeUrlScanner, SilentTextToSpeech};
use callbroker_persistence::InMemorySink;
use callbroker_pipeline::coaching::CoachingAdapter;
use callbroker_pipeline::intelligence::IntelligenceExtractor;
use callbroker_pipeline::{AnalysisDispatcher, EndpointingConfig};
use callbroker_server::session::{CallSession, SessionDeps};
use std::sync::Arc;
use std::time::Duration;

fn three_second_tone_wav() -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(16_000 * 4) {
            let value = ((i as f32 * 0.1).sin() * 8000.0) as i16;
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn deps(stt_text: &str, sink: Arc<InMemorySink>) -> SessionDeps {
    let text_generator = Arc::new(NoopTextGenerator);
    let intelligence = Arc::new(IntelligenceExtractor::new(text_generator.clone(), Arc::new(SafeUrlScanner)));
    let coaching = Arc::new(CoachingAdapter::new(text_generator, Arc::new(SilentTextToSpeech), "operator-coach"));
    SessionDeps {
        stt: Arc::new(EchoSpeechToText { text: stt_text.to_string() }),
        dispatcher: Arc::new(AnalysisDispatcher::new(intelligence, coaching)),
        transcript_sink: sink.clone(),
        intelligence_sink: sink,
        egress_queue_capacity: 256,
        drain_grace_ms: 200,
        recording_dir: None,
        endpointing: EndpointingConfig::default(),
    }
}

async fn recv_timeout(egress: &callbroker_server::egress::EgressQueue) -> Envelope {
    tokio::time::timeout(Duration::from_secs(2), egress.pop())
        .await
        .expect("timed out waiting for envelope")
        .expect("egress closed before expected envelope")
}

#[tokio::test]
async fn s1_happy_path_connected_peer_joined_audio_transcript_coaching() {
    let sink = InMemorySink::new();
    let session = CallSession::spawn(CallId::new("C1"), deps("Please share your OTP now", sink));

    let operator = session.attach_leg(Role::Operator).await.unwrap();
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Connected));

    let _scammer = session.attach_leg(Role::Scammer).await.unwrap();
    match recv_timeout(&operator.egress).await {
        Envelope::PeerJoined { role } => assert_eq!(role, Role::Scammer),
        other => panic!("expected peer_joined, got {other:?}"),
    }

    session.submit_audio(Role::Scammer, Codec::WavPcm, three_second_tone_wav(), Some(1));

    match recv_timeout(&operator.egress).await {
        Envelope::Audio { from, .. } => assert_eq!(from, Some(Role::Scammer)),
        other => panic!("expected relayed audio, got {other:?}"),
    }

    match recv_timeout(&operator.egress).await {
        Envelope::Transcript { speaker, text, .. } => {
            assert_eq!(speaker, Role::Scammer);
            assert_eq!(text, "Please share your OTP now");
        },
        other => panic!("expected transcript, got {other:?}"),
    }

    match recv_timeout(&operator.egress).await {
        Envelope::Intelligence { entities_delta, tactics_delta, threat_score } => {
            assert!(entities_delta.iter().any(|e| e.value == "otp"));
            assert!(tactics_delta.contains(&"credential_request".to_string()));
            assert!(threat_score >= 0.5, "threat_score was {threat_score}");
        },
        other => panic!("expected intelligence, got {other:?}"),
    }

    match recv_timeout(&operator.egress).await {
        Envelope::Coaching { strategy, .. } => assert_eq!(strategy, Strategy::Delay),
        other => panic!("expected coaching, got {other:?}"),
    }

    session.submit_end("requested");
    match recv_timeout(&operator.egress).await {
        Envelope::CallEnded { reason, .. } => assert_eq!(reason, "requested"),
        other => panic!("expected call_ended, got {other:?}"),
    }
}

#[tokio::test]
async fn s2_role_collision_rejects_second_attach_of_same_role() {
    let sink = InMemorySink::new();
    let session = CallSession::spawn(CallId::new("C2"), deps("hello", sink));

    let _first = session.attach_leg(Role::Operator).await.unwrap();
    let second = session.attach_leg(Role::Operator).await;

    assert!(matches!(second, Err(callbroker_core::BrokerError::RoleOccupied)));
}

#[tokio::test]
async fn s3_reconnect_within_grace_resumes_without_call_ended() {
    let sink = InMemorySink::new();
    let session = CallSession::spawn(CallId::new("C3"), deps("hello", sink));

    let operator = session.attach_leg(Role::Operator).await.unwrap();
    let scammer = session.attach_leg(Role::Scammer).await.unwrap();
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Connected));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::PeerJoined { .. }));

    session.detach_leg(Role::Scammer);
    match recv_timeout(&operator.egress).await {
        Envelope::PeerLeft { role } => assert_eq!(role, Role::Scammer),
        other => panic!("expected peer_left, got {other:?}"),
    }
    drop(scammer);

    let reattached = session.attach_leg(Role::Scammer).await.unwrap();
    match recv_timeout(&operator.egress).await {
        Envelope::PeerJoined { role } => assert_eq!(role, Role::Scammer),
        other => panic!("expected peer_joined on reattach, got {other:?}"),
    }
    drop(reattached);

    let status = session.status().await.unwrap();
    assert_eq!(status.state, callbroker_server::SessionState::Active);
}

#[tokio::test]
async fn s3_grace_expiry_ends_the_call_if_nobody_reattaches() {
    let sink = InMemorySink::new();
    let mut deps = deps("hello", sink);
    deps.drain_grace_ms = 30;
    let session = CallSession::spawn(CallId::new("C3-timeout"), deps);

    let operator = session.attach_leg(Role::Operator).await.unwrap();
    let _scammer = session.attach_leg(Role::Scammer).await.unwrap();
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Connected));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::PeerJoined { .. }));

    session.detach_leg(Role::Scammer);
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::PeerLeft { .. }));

    match recv_timeout(&operator.egress).await {
        Envelope::CallEnded { reason, .. } => assert_eq!(reason, "timeout"),
        other => panic!("expected call_ended(timeout), got {other:?}"),
    }
}

#[tokio::test]
async fn second_disconnect_ends_the_call_bypassing_grace() {
    let sink = InMemorySink::new();
    let session = CallSession::spawn(CallId::new("C-both-leave"), deps("hello", sink));

    let operator = session.attach_leg(Role::Operator).await.unwrap();
    let _scammer = session.attach_leg(Role::Scammer).await.unwrap();
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Connected));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::PeerJoined { .. }));

    session.detach_leg(Role::Scammer);
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::PeerLeft { .. }));

    session.detach_leg(Role::Operator);
    // The only remaining leg detaching transitions Draining -> Ended directly.
    let status = session.status().await;
    assert!(status.is_err(), "session actor should have torn itself down");
}

#[tokio::test]
async fn ended_session_rejects_further_attaches() {
    let sink = InMemorySink::new();
    let session = CallSession::spawn(CallId::new("C-ended"), deps("hello", sink));

    let operator = session.attach_leg(Role::Operator).await.unwrap();
    drop(operator);
    session.submit_end("requested");

    // Give the actor a moment to process `End` and tear itself down.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let result = session.attach_leg(Role::Operator).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn transcript_and_intelligence_are_persisted() {
    let sink = InMemorySink::new();
    let session = CallSession::spawn(CallId::new("C-persist"), deps("visit http://malware.testing.google.test now", sink.clone()));

    let operator = session.attach_leg(Role::Operator).await.unwrap();
    let _scammer = session.attach_leg(Role::Scammer).await.unwrap();
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Connected));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::PeerJoined { .. }));

    session.submit_audio(Role::Scammer, Codec::WavPcm, three_second_tone_wav(), Some(1));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Audio { .. }));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Transcript { .. }));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Intelligence { .. }));

    // Persistence happens on a spawned task; give it a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let call_id = CallId::new("C-persist");
    assert!(sink.transcript_for(&call_id).iter().any(|e| e.text.contains("malware")));
    assert!(sink.snapshot_for(&call_id).is_some());
}

#[tokio::test]
async fn recording_log_writes_a_file_per_call_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let sink = InMemorySink::new();
    let mut session_deps = deps("hello", sink);
    session_deps.recording_dir = Some(dir.path().to_string_lossy().to_string());
    let session = CallSession::spawn(CallId::new("C-recorded"), session_deps);

    let operator = session.attach_leg(Role::Operator).await.unwrap();
    let _scammer = session.attach_leg(Role::Scammer).await.unwrap();
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Connected));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::PeerJoined { .. }));

    session.submit_audio(Role::Scammer, Codec::WavPcm, three_second_tone_wav(), Some(1));
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::Audio { .. }));

    session.submit_end("requested");
    assert!(matches!(recv_timeout(&operator.egress).await, Envelope::CallEnded { .. }));

    // The actor flushes and drops the log on teardown, which runs after the
    // `Ended` transition is observed by `run`'s loop exit.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let path = dir.path().join("C-recorded.callrec");
    let bytes = tokio::fs::read(&path).await.unwrap();
    assert!(!bytes.is_empty(), "expected recording log to contain header + chunk records");
}
