//! Entities, tactics and the per-session intelligence snapshot (spec §3,
//! §4.6). The snapshot is monotone: entities only accumulate, the tactic set
//! only grows, and `threat_score` never decreases within a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

/// Closed entity taxonomy recognised by the extractor (spec §3, §4.6 Stage A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Phone,
    Url,
    UpiHandle,
    BankAccount,
    IfscCode,
    Email,
    Keyword,
}

/// A recognised piece of intelligence. Uniqueness key is `(kind, value)` —
/// the snapshot holds a set, duplicates coalesce (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// Canonicalised representation (e.g. digits-only phone number).
    pub value: String,
    pub first_seen_at: DateTime<Utc>,
    pub confidence: f32,
}

impl Entity {
    pub fn new(kind: EntityKind, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind,
            value: value.into(),
            first_seen_at: Utc::now(),
            confidence,
        }
    }

    fn key(&self) -> (EntityKind, &str) {
        (self.kind, self.value.as_str())
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Closed social-engineering tactic labels (spec §3). `MaliciousUrl` is a
/// supplemental label contributed only by the asynchronous URL-reputation
/// probe (spec §4.6) — every other variant mirrors the base closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tactic {
    Urgency,
    Authority,
    Fear,
    Greed,
    CredentialRequest,
    Impersonation,
    Isolation,
    MaliciousUrl,
}

impl Tactic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tactic::Urgency => "urgency",
            Tactic::Authority => "authority",
            Tactic::Fear => "fear",
            Tactic::Greed => "greed",
            Tactic::CredentialRequest => "credential_request",
            Tactic::Impersonation => "impersonation",
            Tactic::Isolation => "isolation",
            Tactic::MaliciousUrl => "malicious_url",
        }
    }
}

/// Per-session aggregate. `entities` and `tactics` only grow; `threat_score`
/// only rises (spec §3, §8 property 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceSnapshot {
    pub entities: HashSet<Entity>,
    pub tactics: HashSet<Tactic>,
    pub threat_score: f32,
    pub updated_at: DateTime<Utc>,
}

impl Default for IntelligenceSnapshot {
    fn default() -> Self {
        Self {
            entities: HashSet::new(),
            tactics: HashSet::new(),
            threat_score: 0.0,
            updated_at: Utc::now(),
        }
    }
}

impl IntelligenceSnapshot {
    /// Merge a batch of newly-discovered entities/tactics and a candidate
    /// threat-score contribution. Returns the entities/tactics that were
    /// actually new, for use as an `intelligence` envelope's delta.
    pub fn merge(
        &mut self,
        new_entities: impl IntoIterator<Item = Entity>,
        new_tactics: impl IntoIterator<Item = Tactic>,
        score_contribution: f32,
    ) -> (Vec<Entity>, Vec<Tactic>) {
        let mut added_entities = Vec::new();
        for entity in new_entities {
            if self.entities.insert(entity.clone()) {
                added_entities.push(entity);
            }
        }

        let mut added_tactics = Vec::new();
        for tactic in new_tactics {
            if self.tactics.insert(tactic) {
                added_tactics.push(tactic);
            }
        }

        self.threat_score = self.threat_score.max(score_contribution).min(1.0);
        self.updated_at = Utc::now();

        (added_entities, added_tactics)
    }
}
