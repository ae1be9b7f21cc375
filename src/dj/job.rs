//! DJ job identity, states and the status board.

use crate::store::TtsMode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;

/// How many finished jobs the status board remembers.
const RECENT_JOBS_KEPT: usize = 10;

/// Content-derived job identity: one intro per (track, slot).
pub fn dedup_key(track_title: &str, track_artist: &str, target_epoch_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(track_title.as_bytes());
    hasher.update([0]);
    hasher.update(track_artist.as_bytes());
    hasher.update([0]);
    hasher.update(target_epoch_ms.to_le_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// DJ job state machine.
///
/// ```text
/// armed -> generating -> synthesizing -> registered -> enqueued
/// any   -> failed | cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DjJobState {
    Armed,
    Generating,
    Synthesizing,
    Registered,
    Enqueued,
    Failed,
    Cancelled,
}

impl DjJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DjJobState::Enqueued | DjJobState::Failed | DjJobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DjJobState::Armed => "armed",
            DjJobState::Generating => "generating",
            DjJobState::Synthesizing => "synthesizing",
            DjJobState::Registered => "registered",
            DjJobState::Enqueued => "enqueued",
            DjJobState::Failed => "failed",
            DjJobState::Cancelled => "cancelled",
        }
    }
}

/// What to produce, for which track.
#[derive(Debug, Clone)]
pub struct DjJobSpec {
    pub dedup_key: String,
    pub track_title: String,
    pub track_artist: String,
    pub mode: TtsMode,
    pub target_epoch_ms: i64,
}

impl DjJobSpec {
    pub fn intro(track_title: &str, track_artist: &str, target_epoch_ms: i64) -> Self {
        Self {
            dedup_key: dedup_key(track_title, track_artist, target_epoch_ms),
            track_title: track_title.to_string(),
            track_artist: track_artist.to_string(),
            mode: TtsMode::Intro,
            target_epoch_ms,
        }
    }
}

/// Point-in-time view of one job, for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DjJobReport {
    pub dedup_key: String,
    pub track_title: String,
    pub track_artist: String,
    pub state: DjJobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Default, Serialize)]
struct BoardInner {
    current: Option<DjJobReport>,
    recent: VecDeque<DjJobReport>,
}

/// Last-known pipeline activity. Failed jobs are visible here and nowhere
/// else in the client surface.
#[derive(Default)]
pub struct DjStatusBoard {
    inner: Mutex<BoardInner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DjStatusView {
    pub current: Option<DjJobReport>,
    pub recent: Vec<DjJobReport>,
}

impl DjStatusBoard {
    pub fn update(&self, report: DjJobReport) {
        let mut inner = self.inner.lock().unwrap();
        if report.state.is_terminal() {
            if inner
                .current
                .as_ref()
                .map(|c| c.dedup_key == report.dedup_key)
                .unwrap_or(false)
            {
                inner.current = None;
            }
            inner.recent.push_front(report);
            inner.recent.truncate(RECENT_JOBS_KEPT);
        } else {
            inner.current = Some(report);
        }
    }

    pub fn view(&self) -> DjStatusView {
        let inner = self.inner.lock().unwrap();
        DjStatusView {
            current: inner.current.clone(),
            recent: inner.recent.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_is_stable_and_distinct() {
        let a = dedup_key("T", "A", 1000);
        assert_eq!(a, dedup_key("T", "A", 1000));
        assert_ne!(a, dedup_key("T", "A", 2000));
        assert_ne!(a, dedup_key("T2", "A", 1000));
        // Field boundaries matter: ("AB","C") != ("A","BC").
        assert_ne!(dedup_key("AB", "C", 0), dedup_key("A", "BC", 0));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn terminal_states() {
        assert!(!DjJobState::Armed.is_terminal());
        assert!(!DjJobState::Generating.is_terminal());
        assert!(DjJobState::Enqueued.is_terminal());
        assert!(DjJobState::Failed.is_terminal());
        assert!(DjJobState::Cancelled.is_terminal());
    }

    fn report(key: &str, state: DjJobState) -> DjJobReport {
        DjJobReport {
            dedup_key: key.to_string(),
            track_title: "T".to_string(),
            track_artist: "A".to_string(),
            state,
            detail: None,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn board_moves_terminal_jobs_to_recent() {
        let board = DjStatusBoard::default();
        board.update(report("k1", DjJobState::Generating));
        assert!(board.view().current.is_some());

        board.update(report("k1", DjJobState::Enqueued));
        let view = board.view();
        assert!(view.current.is_none());
        assert_eq!(view.recent.len(), 1);
        assert_eq!(view.recent[0].state, DjJobState::Enqueued);
    }

    #[test]
    fn board_keeps_bounded_history() {
        let board = DjStatusBoard::default();
        for i in 0..20 {
            board.update(report(&format!("k{}", i), DjJobState::Cancelled));
        }
        assert_eq!(board.view().recent.len(), RECENT_JOBS_KEPT);
        // Newest first.
        assert_eq!(board.view().recent[0].dedup_key, "k19");
    }
}
