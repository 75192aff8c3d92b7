//! Per-operation cycle tracking.
//!
//! Every user-triggered operation runs as a cycle `Idle -> Fetching -> Synthesizing -> Ready`
//! (or `Failed`). Each operation kind keeps a generation counter; starting a cycle bumps it,
//! and only the latest generation may publish transitions or deliver results. Subscribers
//! watch the latest snapshot of a kind through a `tokio::sync::watch` channel.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    NewsDigest,
    SocialDigest,
    ArticleDetail,
    ChatQuery,
    Translate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::NewsDigest,
        OperationKind::SocialDigest,
        OperationKind::ArticleDetail,
        OperationKind::ChatQuery,
        OperationKind::Translate,
    ];

    fn index(self) -> usize {
        match self {
            OperationKind::NewsDigest => 0,
            OperationKind::SocialDigest => 1,
            OperationKind::ArticleDetail => 2,
            OperationKind::ChatQuery => 3,
            OperationKind::Translate => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::NewsDigest => "news_digest",
            OperationKind::SocialDigest => "social_digest",
            OperationKind::ArticleDetail => "article_detail",
            OperationKind::ChatQuery => "chat_query",
            OperationKind::Translate => "translate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Fetching,
    Synthesizing,
    Ready,
    Failed { error: String },
}

impl CyclePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CyclePhase::Ready | CyclePhase::Failed { .. })
    }

    /// Allowed moves. Idle may skip straight to Synthesizing (nothing to fetch) or Ready
    /// (cache hit); nothing leaves a terminal phase.
    pub fn can_advance_to(&self, next: &CyclePhase) -> bool {
        use CyclePhase::*;
        matches!(
            (self, next),
            (Idle, Fetching)
                | (Idle, Synthesizing)
                | (Idle, Ready)
                | (Idle, Failed { .. })
                | (Fetching, Synthesizing)
                | (Fetching, Failed { .. })
                | (Synthesizing, Ready)
                | (Synthesizing, Failed { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSnapshot {
    pub kind: OperationKind,
    /// 0 until the first cycle of this kind starts
    pub generation: u64,
    pub phase: CyclePhase,
}

/// Identity of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleToken {
    pub kind: OperationKind,
    pub generation: u64,
}

pub struct CycleTracker {
    slots: Vec<watch::Sender<CycleSnapshot>>,
}

impl Default for CycleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleTracker {
    pub fn new() -> Self {
        let slots = OperationKind::ALL
            .iter()
            .map(|&kind| {
                let (tx, _rx) = watch::channel(CycleSnapshot {
                    kind,
                    generation: 0,
                    phase: CyclePhase::Idle,
                });
                tx
            })
            .collect();
        Self { slots }
    }

    fn slot(&self, kind: OperationKind) -> &watch::Sender<CycleSnapshot> {
        &self.slots[kind.index()]
    }

    /// Starts a new cycle of `kind`, superseding any cycle of that kind still in flight.
    pub fn begin(&self, kind: OperationKind) -> CycleToken {
        let mut generation = 0;
        self.slot(kind).send_modify(|snapshot| {
            snapshot.generation += 1;
            snapshot.phase = CyclePhase::Idle;
            generation = snapshot.generation;
        });
        debug!(kind = kind.as_str(), generation, "cycle started");
        CycleToken { kind, generation }
    }

    pub fn is_current(&self, token: &CycleToken) -> bool {
        self.slot(token.kind).borrow().generation == token.generation
    }

    pub fn latest_generation(&self, kind: OperationKind) -> u64 {
        self.slot(kind).borrow().generation
    }

    /// Publishes `phase` for the cycle. Returns false, publishing nothing, when the cycle has
    /// been superseded or the move is not allowed from the current phase.
    pub fn advance(&self, token: &CycleToken, phase: CyclePhase) -> bool {
        let mut accepted = false;
        self.slot(token.kind).send_if_modified(|snapshot| {
            if snapshot.generation != token.generation {
                debug!(
                    kind = token.kind.as_str(),
                    generation = token.generation,
                    latest = snapshot.generation,
                    "ignoring transition of superseded cycle"
                );
                return false;
            }
            if !snapshot.phase.can_advance_to(&phase) {
                warn!(
                    kind = token.kind.as_str(),
                    from = ?snapshot.phase,
                    to = ?phase,
                    "rejected cycle transition"
                );
                return false;
            }
            snapshot.phase = phase.clone();
            accepted = true;
            true
        });
        accepted
    }

    pub fn fail(&self, token: &CycleToken, error: impl Into<String>) -> bool {
        self.advance(
            token,
            CyclePhase::Failed {
                error: error.into(),
            },
        )
    }

    pub fn snapshot(&self, kind: OperationKind) -> CycleSnapshot {
        self.slot(kind).borrow().clone()
    }

    pub fn snapshots(&self) -> Vec<CycleSnapshot> {
        OperationKind::ALL.iter().map(|&k| self.snapshot(k)).collect()
    }

    pub fn subscribe(&self, kind: OperationKind) -> watch::Receiver<CycleSnapshot> {
        self.slot(kind).subscribe()
    }
}
