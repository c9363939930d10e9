//! Intelligence Extractor (spec §4.6): stage A deterministic pattern
//! recognisers, stage B model-assisted extraction, tactic detection, and the
//! monotone threat-score update. Both stages always run; their entity sets
//! are unioned before the merge into the session's `IntelligenceSnapshot`.
//!
//! Recognisers are `once_cell::Lazy<Regex>` statics, grounded on the same
//! pattern the wider pack's text-processing crate uses for entity scanning
//! (examined during grounding, not carried over — that crate was dropped).

use callbroker_core::{
    BrokerError, Entity, EntityKind, IntelligenceSnapshot, Tactic, TextGenerator, UrlScanner,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result of one extraction pass: what's new since the last snapshot, plus
/// the snapshot as it stood right after the merge. `callbroker-server`
/// turns this into an `intelligence` envelope.
#[derive(Debug, Clone)]
pub struct IntelligenceUpdate {
    pub entities_delta: Vec<Entity>,
    pub tactics_delta: Vec<Tactic>,
    pub snapshot: IntelligenceSnapshot,
}

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:\+?\d[\d\-\s]{8,17}\d)").unwrap());
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:https?://|www\.)[^\s,]+[^\s,.]").unwrap());
static UPI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b[\w.\-]{2,}@([a-z]{2,})\b").unwrap());
static BANK_ACCOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{9,18}\b").unwrap());
static IFSC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b[A-Z]{4}0[A-Z0-9]{6}\b").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[\w.+-]+@[\w-]+\.[a-z]{2,}\b").unwrap());

/// Closed provider-suffix list for UPI handles (spec §4.6).
const UPI_PROVIDERS: &[&str] = &[
    "okaxis", "oksbi", "okhdfcbank", "okicici", "ybl", "apl", "ibl", "axl", "upi", "paytm",
];

/// Language-tagged lexicon of scam-trigger words. Only `en` is populated —
/// additional languages slot in as further entries keyed the same way.
const KEYWORD_LEXICON: &[(&str, &str)] = &[
    ("otp", "en"),
    ("one time password", "en"),
    ("cvv", "en"),
    ("pin", "en"),
    ("kyc", "en"),
    ("urgent", "en"),
    ("immediately", "en"),
    ("blocked", "en"),
    ("suspended", "en"),
    ("arrest", "en"),
    ("warrant", "en"),
    ("lottery", "en"),
    ("prize", "en"),
    ("refund", "en"),
    ("gift card", "en"),
    ("wire transfer", "en"),
    ("confidential", "en"),
];

/// Keyword/phrase -> tactic rule table (spec §4.6 "rule set over stage A
/// keyword hits × utterance features").
const TACTIC_RULES: &[(&str, Tactic)] = &[
    ("urgent", Tactic::Urgency),
    ("immediately", Tactic::Urgency),
    ("right now", Tactic::Urgency),
    ("expire", Tactic::Urgency),
    ("police", Tactic::Authority),
    ("income tax", Tactic::Authority),
    ("rbi", Tactic::Authority),
    ("government", Tactic::Authority),
    ("bank manager", Tactic::Authority),
    ("arrest", Tactic::Fear),
    ("warrant", Tactic::Fear),
    ("blocked", Tactic::Fear),
    ("suspended", Tactic::Fear),
    ("legal action", Tactic::Fear),
    ("lottery", Tactic::Greed),
    ("prize", Tactic::Greed),
    ("cashback", Tactic::Greed),
    ("reward", Tactic::Greed),
    ("otp", Tactic::CredentialRequest),
    ("cvv", Tactic::CredentialRequest),
    ("pin", Tactic::CredentialRequest),
    ("password", Tactic::CredentialRequest),
    ("i am calling from", Tactic::Impersonation),
    ("this is officer", Tactic::Impersonation),
    ("on behalf of", Tactic::Impersonation),
    ("don't tell anyone", Tactic::Isolation),
    ("do not tell anyone", Tactic::Isolation),
    ("keep this confidential", Tactic::Isolation),
    ("between us", Tactic::Isolation),
];

/// Per-tactic weight in the threat-score update (spec §4.6 "fixed table over
/// {severity-class of keyword, presence of credential_request tactic,
/// presence of a high-reputation malicious URL, repeat-offender coefficient}").
fn tactic_weight(tactic: Tactic) -> f32 {
    match tactic {
        Tactic::CredentialRequest => 0.5,
        Tactic::Fear => 0.3,
        Tactic::Impersonation => 0.3,
        Tactic::Isolation => 0.3,
        Tactic::Urgency => 0.2,
        Tactic::Authority => 0.2,
        Tactic::Greed => 0.2,
        Tactic::MaliciousUrl => 0.4,
    }
}

/// Small per-repeat bump: a keyword-bearing entity seen again in the same
/// session slightly raises confidence that this is a scripted, repeated
/// attempt rather than incidental mention.
const REPEAT_OFFENDER_COEFFICIENT: f32 = 0.05;

fn canonical_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if (10..=15).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

fn recognize_stage_a(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();
    let mut claimed_spans: Vec<(usize, usize)> = Vec::new();

    for m in PHONE_RE.find_iter(text) {
        if let Some(canonical) = canonical_phone(m.as_str()) {
            entities.push(Entity::new(EntityKind::Phone, canonical, 0.9));
            claimed_spans.push((m.start(), m.end()));
        }
    }

    for m in URL_RE.find_iter(text) {
        let lowered = lowercase_scheme_host(m.as_str());
        entities.push(Entity::new(EntityKind::Url, lowered, 0.95));
    }

    for caps in UPI_RE.captures_iter(text) {
        let full = caps.get(0).unwrap().as_str();
        let psp = caps.get(1).unwrap().as_str().to_lowercase();
        if UPI_PROVIDERS.contains(&psp.as_str()) {
            entities.push(Entity::new(EntityKind::UpiHandle, full.to_lowercase(), 0.85));
        }
    }

    for m in IFSC_RE.find_iter(text) {
        entities.push(Entity::new(EntityKind::IfscCode, m.as_str().to_uppercase(), 0.9));
    }

    for m in EMAIL_RE.find_iter(text) {
        entities.push(Entity::new(EntityKind::Email, m.as_str().to_lowercase(), 0.9));
    }

    for m in BANK_ACCOUNT_RE.find_iter(text) {
        let overlaps_phone = claimed_spans
            .iter()
            .any(|&(start, end)| m.start() < end && start < m.end());
        if !overlaps_phone {
            entities.push(Entity::new(EntityKind::BankAccount, m.as_str().to_string(), 0.7));
        }
    }

    let lower = text.to_lowercase();
    for (keyword, _lang) in KEYWORD_LEXICON {
        if lower.contains(keyword) {
            entities.push(Entity::new(EntityKind::Keyword, keyword.to_string(), 1.0));
        }
    }

    entities
}

fn lowercase_scheme_host(url: &str) -> String {
    if let Some(idx) = url.find("://") {
        let (scheme, rest) = url.split_at(idx);
        let rest = &rest[3..];
        let (host, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        format!("{}://{}{}", scheme.to_lowercase(), host.to_lowercase(), path)
    } else {
        url.to_lowercase()
    }
}

fn detect_tactics(text: &str) -> Vec<Tactic> {
    let lower = text.to_lowercase();
    let mut tactics = Vec::new();
    for (phrase, tactic) in TACTIC_RULES {
        if lower.contains(phrase) && !tactics.contains(tactic) {
            tactics.push(*tactic);
        }
    }
    tactics
}

pub struct IntelligenceExtractor {
    text_generator: Arc<dyn TextGenerator>,
    url_scanner: Arc<dyn UrlScanner>,
}

impl IntelligenceExtractor {
    pub fn new(text_generator: Arc<dyn TextGenerator>, url_scanner: Arc<dyn UrlScanner>) -> Self {
        Self {
            text_generator,
            url_scanner,
        }
    }

    /// Run both extraction stages on `text`, merge into `snapshot`, and
    /// kick off an out-of-band reputation probe for every newly discovered
    /// `Url` (its result, if any, arrives later on `updates`). Returns the
    /// primary update, or `None` if nothing new was found.
    pub async fn extract(
        &self,
        text: &str,
        snapshot: &Arc<Mutex<IntelligenceSnapshot>>,
        updates: mpsc::UnboundedSender<IntelligenceUpdate>,
        cancel: CancellationToken,
    ) -> Option<IntelligenceUpdate> {
        let mut entities = recognize_stage_a(text);
        let tactics = detect_tactics(text);

        // Retry once on a transient collaborator error, per the broker-wide
        // policy (spec §7); any further failure just leaves stage A's result
        // standing rather than blocking the whole extraction pass.
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.text_generator.extract_entities(text, cancel.clone()).await {
                Ok(result) => {
                    entities.extend(result.entities);
                    break;
                },
                Err(BrokerError::CollaboratorTransient(reason)) if attempt == 1 => {
                    tracing::warn!(reason, "stage B extraction call failed, retrying once");
                    continue;
                },
                Err(BrokerError::CollaboratorFatal(reason)) => {
                    tracing::error!(reason, "stage B extraction disabled for session: fatal collaborator error");
                    break;
                },
                Err(err) => {
                    tracing::warn!(error = %err, "stage B extraction failed, stage A result still applies");
                    break;
                },
            }
        }

        let repeat_bonus = {
            let existing = snapshot.lock();
            entities
                .iter()
                .filter(|e| existing.entities.contains(*e))
                .count() as f32
                * REPEAT_OFFENDER_COEFFICIENT
        };
        let score_contribution =
            (tactics.iter().map(|t| tactic_weight(*t)).sum::<f32>() + repeat_bonus).min(1.0);

        let new_urls: Vec<String> = entities
            .iter()
            .filter(|e| e.kind == EntityKind::Url)
            .map(|e| e.value.clone())
            .collect();

        let (entities_delta, tactics_delta) = {
            let mut guard = snapshot.lock();
            guard.merge(entities, tactics, score_contribution)
        };

        for url in new_urls {
            self.spawn_reputation_probe(url, snapshot.clone(), updates.clone(), cancel.clone());
        }

        if entities_delta.is_empty() && tactics_delta.is_empty() {
            return None;
        }

        Some(IntelligenceUpdate {
            entities_delta,
            tactics_delta,
            snapshot: snapshot.lock().clone(),
        })
    }

    fn spawn_reputation_probe(
        &self,
        url: String,
        snapshot: Arc<Mutex<IntelligenceSnapshot>>,
        updates: mpsc::UnboundedSender<IntelligenceUpdate>,
        cancel: CancellationToken,
    ) {
        let scanner = self.url_scanner.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = scanner.check(&url, cancel.clone()) => outcome,
            };

            let scan = match outcome {
                Ok(scan) => scan,
                Err(err) => {
                    tracing::debug!(url, error = %err, "url reputation probe failed");
                    return;
                },
            };
            if scan.is_safe {
                return;
            }

            let (entities_delta, tactics_delta) = {
                let mut guard = snapshot.lock();
                guard.merge([], [Tactic::MaliciousUrl], scan.risk_score.clamp(0.0, 1.0))
            };
            if tactics_delta.is_empty() {
                return;
            }
            let _ = updates.send(IntelligenceUpdate {
                entities_delta,
                tactics_delta,
                snapshot: snapshot.lock().clone(),
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use callbroker_core::{ExtractionResult, UrlScanResult};
    use proptest::prelude::*;
    use proptest::proptest;

    struct EmptyLlm;

    #[async_trait]
    impl TextGenerator for EmptyLlm {
        async fn extract_entities(
            &self,
            _text: &str,
            _cancel: CancellationToken,
        ) -> Result<ExtractionResult, BrokerError> {
            Ok(ExtractionResult::default())
        }

        async fn coach(
            &self,
            _context_window: &[callbroker_core::TranscriptEntry],
            _cancel: CancellationToken,
        ) -> Result<callbroker_core::CoachPlan, BrokerError> {
            unreachable!("not exercised in these tests")
        }
    }

    struct SafeScanner;

    #[async_trait]
    impl UrlScanner for SafeScanner {
        async fn check(&self, _url: &str, _cancel: CancellationToken) -> Result<UrlScanResult, BrokerError> {
            Ok(UrlScanResult {
                is_safe: true,
                risk_score: 0.0,
                labels: vec![],
            })
        }
    }

    fn extractor() -> IntelligenceExtractor {
        IntelligenceExtractor::new(Arc::new(EmptyLlm), Arc::new(SafeScanner))
    }

    #[test]
    fn phone_numbers_in_different_formats_canonicalise_the_same() {
        let a = canonical_phone("+91-98765-43210").unwrap();
        let b = canonical_phone("919876543210").unwrap();
        assert_eq!(a, b);
    }

    proptest! {
        /// Invariant 5: any punctuation/whitespace wrapped around a 10-15
        /// digit run canonicalises to exactly that digit run, regardless of
        /// where the separators land.
        #[test]
        fn canonical_phone_ignores_surrounding_punctuation(
            digits in "[0-9]{10,15}",
            lead in "[+ ]{0,2}",
            sep_positions in proptest::collection::vec(0usize..20, 0..4),
        ) {
            let mut formatted = String::new();
            formatted.push_str(&lead);
            for (i, c) in digits.chars().enumerate() {
                formatted.push(c);
                if sep_positions.contains(&i) {
                    formatted.push('-');
                }
            }
            prop_assert_eq!(canonical_phone(&formatted), Some(digits));
        }
    }

    #[test]
    fn keyword_hit_maps_to_credential_request_tactic() {
        let tactics = detect_tactics("Please share your OTP now");
        assert!(tactics.contains(&Tactic::CredentialRequest));
    }

    #[tokio::test]
    async fn extraction_merges_stage_a_entities_and_raises_score() {
        let extractor = extractor();
        let snapshot = Arc::new(Mutex::new(IntelligenceSnapshot::default()));
        let (tx, _rx) = mpsc::unbounded_channel();

        let update = extractor
            .extract("Please share your OTP now", &snapshot, tx, CancellationToken::new())
            .await
            .expect("expected a new entity/tactic");

        assert!(update.entities_delta.iter().any(|e| e.kind == EntityKind::Keyword && e.value == "otp"));
        assert!(update.tactics_delta.contains(&Tactic::CredentialRequest));
        assert!(update.snapshot.threat_score >= 0.5);
    }

    #[tokio::test]
    async fn repeated_extraction_does_not_duplicate_entities() {
        let extractor = extractor();
        let snapshot = Arc::new(Mutex::new(IntelligenceSnapshot::default()));
        let (tx, _rx) = mpsc::unbounded_channel();

        extractor
            .extract("call 919876543210 now", &snapshot, tx.clone(), CancellationToken::new())
            .await;
        let second = extractor
            .extract("call +91-98765-43210 again", &snapshot, tx, CancellationToken::new())
            .await;

        let phone_count = snapshot
            .lock()
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Phone)
            .count();
        assert_eq!(phone_count, 1);
        // second call still reports fresh tactic-free text, so its entity delta (if any) excludes the phone
        if let Some(update) = second {
            assert!(!update.entities_delta.iter().any(|e| e.kind == EntityKind::Phone));
        }
    }
}
