//! Property-based coverage for the session actor's leg-occupancy invariant
//! (spec §8 property 1: at most one leg per role at any time). The actor is
//! async, so each case spins its own current-thread runtime rather than
//! using `#[tokio::test]`, which `proptest!` can't generate for us.

use callbroker_core::{BrokerError, CallId, Role};
use callbroker_llm::fakes::{EchoSpeechToText, NoopTextGenerator, SafeUrlScanner, SilentTextToSpeech};
use callbroker_persistence::InMemorySink;
use callbroker_pipeline::coaching::CoachingAdapter;
use callbroker_pipeline::intelligence::IntelligenceExtractor;
use callbroker_pipeline::{AnalysisDispatcher, EndpointingConfig};
use callbroker_server::session::{CallSession, SessionDeps};
use proptest::prelude::*;
use proptest::proptest;
use std::sync::Arc;

fn deps() -> SessionDeps {
    let sink = InMemorySink::new();
    let text_generator = Arc::new(NoopTextGenerator);
    let intelligence = Arc::new(IntelligenceExtractor::new(text_generator.clone(), Arc::new(SafeUrlScanner)));
    let coaching = Arc::new(CoachingAdapter::new(text_generator, Arc::new(SilentTextToSpeech), "operator-coach"));
    SessionDeps {
        stt: Arc::new(EchoSpeechToText { text: "hello".to_string() }),
        dispatcher: Arc::new(AnalysisDispatcher::new(intelligence, coaching)),
        transcript_sink: sink.clone(),
        intelligence_sink: sink,
        egress_queue_capacity: 256,
        drain_grace_ms: 5_000,
        recording_dir: None,
        endpointing: EndpointingConfig::default(),
    }
}

proptest! {
    /// Invariant 1: a role can hold at most one leg. Repeated attaches of
    /// the same role without an intervening detach must reject every
    /// attempt after the first with `RoleOccupied`, never silently replace
    /// the existing leg.
    #[test]
    fn role_can_only_be_attached_once_without_intervening_detach(
        role_is_operator in any::<bool>(),
        attempts in 1usize..6,
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = runtime.block_on(async {
            let role = if role_is_operator { Role::Operator } else { Role::Scammer };
            let session = CallSession::spawn(CallId::new("prop-role-occupied"), deps());

            let mut successes = 0usize;
            for _ in 0..attempts {
                match session.attach_leg(role).await {
                    Ok(_handle) => successes += 1,
                    Err(BrokerError::RoleOccupied) => {},
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }
            }
            prop_assert_eq!(successes, 1);
            Ok(())
        });
        result?;
    }

    /// A detach between attaches always frees the role back up for a fresh
    /// attach, regardless of how many roles/attempts came before it.
    #[test]
    fn detach_always_frees_the_role_for_reattach(role_is_operator in any::<bool>()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = runtime.block_on(async {
            let role = if role_is_operator { Role::Operator } else { Role::Scammer };
            let session = CallSession::spawn(CallId::new("prop-role-reattach"), deps());

            let first = session.attach_leg(role).await;
            prop_assert!(first.is_ok());
            drop(first);

            session.detach_leg(role);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;

            let second = session.attach_leg(role).await;
            prop_assert!(second.is_ok(), "expected reattach to succeed after detach, got {second:?}");
            Ok(())
        });
        result?;
    }
}
