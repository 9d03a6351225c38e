//! Per-theme bank state.
//!
//! The tracker owns every counter of the run and is mutated only by the
//! orchestrator, one outcome at a time. Bank entries are numbered in the
//! order they are accepted, starting after the highest number already on
//! disk.

use chrono::Utc;
use sbank_media::{move_file, write_atomic};
use sbank_models::{BankEntry, Candidate, EntryMetadata, Theme, ThemeId, ThemeStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

#[derive(Debug)]
struct ThemeBank {
    theme: Theme,
    dir: PathBuf,
    accepted: u32,
    attempted: u32,
    next_seq: u32,
    search_exhausted: bool,
}

impl ThemeBank {
    fn is_full(&self) -> bool {
        self.accepted >= self.theme.target
    }
}

/// Bank state restored from an existing session directory.
#[derive(Debug, Default)]
pub struct RestoredBanks {
    /// Entries already on disk, across all themes
    pub entries: usize,
    /// Source URLs recorded in the entries' sidecars
    pub urls: Vec<String>,
}

/// Counters and goal test for every theme of a run.
#[derive(Debug)]
pub struct BankTracker {
    banks: Vec<ThemeBank>,
    retry_budget: u32,
    session_id: String,
}

impl BankTracker {
    /// Open the banks under `themes_dir`, rebuilding counts from files already
    /// there.
    pub async fn open(
        themes: &[Theme],
        themes_dir: &Path,
        retry_budget: u32,
        session_id: &str,
    ) -> EngineResult<(Self, RestoredBanks)> {
        let mut banks = Vec::with_capacity(themes.len());
        let mut restored = RestoredBanks::default();

        for theme in themes {
            let dir = themes_dir.join(&theme.name);
            tokio::fs::create_dir_all(&dir).await?;

            let (count, max_seq, urls) = scan_bank(&theme.name, &dir).await?;
            if count > 0 {
                info!(
                    theme = %theme.name,
                    entries = count,
                    next = max_seq + 1,
                    "Resuming bank"
                );
            }
            restored.entries += count as usize;
            restored.urls.extend(urls);

            banks.push(ThemeBank {
                theme: theme.clone(),
                dir,
                accepted: count,
                attempted: 0,
                next_seq: max_seq + 1,
                search_exhausted: false,
            });
        }

        Ok((
            Self {
                banks,
                retry_budget,
                session_id: session_id.to_string(),
            },
            restored,
        ))
    }

    fn bank(&self, id: ThemeId) -> EngineResult<&ThemeBank> {
        self.banks
            .get(id.index())
            .ok_or_else(|| EngineError::config(format!("unknown theme {id}")))
    }

    fn bank_mut(&mut self, id: ThemeId) -> EngineResult<&mut ThemeBank> {
        self.banks
            .get_mut(id.index())
            .ok_or_else(|| EngineError::config(format!("unknown theme {id}")))
    }

    pub fn theme_ids(&self) -> impl Iterator<Item = ThemeId> + '_ {
        self.banks.iter().map(|b| b.theme.id)
    }

    pub fn theme(&self, id: ThemeId) -> Option<&Theme> {
        self.banks.get(id.index()).map(|b| &b.theme)
    }

    pub fn themes(&self) -> Vec<Theme> {
        self.banks.iter().map(|b| b.theme.clone()).collect()
    }

    pub fn accepted(&self, id: ThemeId) -> u32 {
        self.banks.get(id.index()).map_or(0, |b| b.accepted)
    }

    pub fn attempted(&self, id: ThemeId) -> u32 {
        self.banks.get(id.index()).map_or(0, |b| b.attempted)
    }

    pub fn is_full(&self, id: ThemeId) -> bool {
        self.banks.get(id.index()).map_or(true, ThemeBank::is_full)
    }

    /// Retry budget used up. A budget of 0 never exhausts.
    pub fn exhausted(&self, id: ThemeId) -> bool {
        self.retry_budget > 0 && self.attempted(id) >= self.retry_budget
    }

    /// Misses the theme may still take, `None` when unlimited.
    pub fn remaining_budget(&self, id: ThemeId) -> Option<u32> {
        (self.retry_budget > 0).then(|| self.retry_budget.saturating_sub(self.attempted(id)))
    }

    pub fn search_exhausted(&self, id: ThemeId) -> bool {
        self.banks.get(id.index()).map_or(true, |b| b.search_exhausted)
    }

    pub fn mark_search_exhausted(&mut self, id: ThemeId) {
        if let Some(bank) = self.banks.get_mut(id.index()) {
            if !bank.search_exhausted {
                debug!(theme = %bank.theme.name, "Search exhausted");
            }
            bank.search_exhausted = true;
        }
    }

    /// Nothing more will be done for this theme.
    pub fn is_done(&self, id: ThemeId) -> bool {
        self.is_full(id) || self.exhausted(id) || self.search_exhausted(id)
    }

    /// Every theme is full, exhausted, or out of search results.
    pub fn goal_reached(&self) -> bool {
        self.theme_ids().all(|id| self.is_done(id))
    }

    /// Count a dispatched cycle that produced no entry for `id`.
    pub fn record_miss(&mut self, id: ThemeId) {
        if let Some(bank) = self.banks.get_mut(id.index()) {
            bank.attempted += 1;
        }
    }

    /// Place `candidate` as the next entry of `theme`.
    ///
    /// Returns `None` without touching the candidate when the bank is
    /// already full; the caller discards it.
    pub async fn accept(
        &mut self,
        theme: ThemeId,
        candidate: &Candidate,
        score: Option<f64>,
    ) -> EngineResult<Option<BankEntry>> {
        let origin_name = self.bank(candidate.origin)?.theme.name.clone();
        let session_id = self.session_id.clone();
        let bank = self.bank_mut(theme)?;

        if bank.is_full() {
            return Ok(None);
        }

        let seq = bank.next_seq;
        let path = bank.dir.join(BankEntry::file_name(&bank.theme.name, seq));
        move_file(&candidate.path, &path).await?;

        bank.next_seq += 1;
        bank.accepted += 1;

        let entry = BankEntry { theme, seq, path };
        let metadata = EntryMetadata {
            url: candidate.media.url.clone(),
            media_id: candidate.media.id.clone(),
            title: candidate.media.title.clone(),
            origin_theme: origin_name,
            assigned_theme: bank.theme.name.clone(),
            score,
            slice_index: candidate.slice_index,
            slice_offset_secs: candidate.offset_secs,
            clip_secs: candidate.duration_secs,
            strategy: candidate.strategy,
            session_id,
            created_at: Utc::now(),
        };

        let json = serde_json::to_vec_pretty(&metadata)?;
        if let Err(e) = write_atomic(entry.sidecar_path(), &json).await {
            warn!(path = %entry.path.display(), "Failed to write sidecar: {}", e);
        }

        Ok(Some(entry))
    }

    pub fn status(&self) -> Vec<ThemeStatus> {
        self.banks
            .iter()
            .map(|b| ThemeStatus {
                id: b.theme.id,
                name: b.theme.name.clone(),
                accepted: b.accepted,
                target: b.theme.target,
                attempted: b.attempted,
                exhausted: self.exhausted(b.theme.id),
                search_exhausted: b.search_exhausted,
            })
            .collect()
    }
}

/// Count entries in a bank dir, find the highest sequence number and
/// collect source URLs from sidecars.
async fn scan_bank(theme_name: &str, dir: &Path) -> EngineResult<(u32, u32, Vec<String>)> {
    let mut count = 0u32;
    let mut max_seq = 0u32;
    let mut urls = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(seq) = BankEntry::parse_seq(theme_name, &path) else {
            continue;
        };
        count += 1;
        max_seq = max_seq.max(seq);

        let sidecar = path.with_extension("json");
        match tokio::fs::read(&sidecar).await {
            Ok(bytes) => match serde_json::from_slice::<EntryMetadata>(&bytes) {
                Ok(meta) => urls.push(meta.url),
                Err(e) => warn!(path = %sidecar.display(), "Unreadable sidecar: {}", e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %sidecar.display(), "Failed to read sidecar: {}", e),
        }
    }

    Ok((count, max_seq, urls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbank_models::{parse_themes, FetchStrategy, MediaRef, ThemeSpec};
    use tempfile::TempDir;

    fn themes(target: u32) -> Vec<Theme> {
        let spec = |name: &str| ThemeSpec {
            name: name.to_string(),
            search: name.to_lowercase(),
            prompt: None,
            target: Some(target),
        };
        parse_themes(vec![spec("Soft"), spec("Loud")], target).unwrap()
    }

    async fn staged(dir: &Path, name: &str, origin: ThemeId) -> Candidate {
        let path = dir.join(name);
        tokio::fs::write(&path, b"RIFF").await.unwrap();
        Candidate {
            path,
            media: MediaRef::new(name, format!("https://youtu.be/{name}")),
            origin,
            slice_index: 0,
            offset_secs: 0.0,
            duration_secs: 2.0,
            strategy: FetchStrategy::Full,
            scores: None,
        }
    }

    #[tokio::test]
    async fn test_accept_numbers_entries_and_stops_at_target() {
        let root = TempDir::new().unwrap();
        let staging = root.path().join("staging");
        tokio::fs::create_dir_all(&staging).await.unwrap();

        let (mut tracker, restored) =
            BankTracker::open(&themes(2), &root.path().join("themes"), 0, "s1")
                .await
                .unwrap();
        assert_eq!(restored.entries, 0);

        let soft = ThemeId(0);
        for name in ["a", "b"] {
            let c = staged(&staging, name, soft).await;
            assert!(tracker.accept(soft, &c, None).await.unwrap().is_some());
        }
        assert!(tracker.is_full(soft));

        let extra = staged(&staging, "c", soft).await;
        assert!(tracker.accept(soft, &extra, None).await.unwrap().is_none());
        assert!(extra.path.exists(), "rejected candidate is left to the caller");

        let bank = root.path().join("themes").join("Soft");
        assert!(bank.join("Soft_001.wav").exists());
        assert!(bank.join("Soft_002.wav").exists());
        assert!(!bank.join("Soft_003.wav").exists());

        let meta: EntryMetadata =
            serde_json::from_slice(&std::fs::read(bank.join("Soft_001.json")).unwrap()).unwrap();
        assert_eq!(meta.url, "https://youtu.be/a");
        assert_eq!(meta.assigned_theme, "Soft");
        assert_eq!(meta.session_id, "s1");
    }

    #[tokio::test]
    async fn test_cross_theme_sidecar_records_origin() {
        let root = TempDir::new().unwrap();
        let (mut tracker, _) =
            BankTracker::open(&themes(1), &root.path().join("themes"), 0, "s1")
                .await
                .unwrap();

        let c = staged(root.path(), "x", ThemeId(1)).await;
        let entry = tracker.accept(ThemeId(0), &c, Some(0.8)).await.unwrap().unwrap();
        let meta: EntryMetadata =
            serde_json::from_slice(&std::fs::read(entry.sidecar_path()).unwrap()).unwrap();
        assert_eq!(meta.origin_theme, "Loud");
        assert_eq!(meta.assigned_theme, "Soft");
        assert_eq!(meta.score, Some(0.8));
    }

    #[tokio::test]
    async fn test_retry_budget_exhausts_after_exact_misses() {
        let root = TempDir::new().unwrap();
        let (mut tracker, _) =
            BankTracker::open(&themes(1), &root.path().join("themes"), 5, "s1")
                .await
                .unwrap();

        let loud = ThemeId(1);
        for _ in 0..4 {
            tracker.record_miss(loud);
        }
        assert!(!tracker.exhausted(loud));
        assert_eq!(tracker.remaining_budget(loud), Some(1));

        tracker.record_miss(loud);
        assert!(tracker.exhausted(loud));
        assert_eq!(tracker.attempted(loud), 5);

        // The exhausted theme does not hold up completion
        assert!(!tracker.goal_reached());
        let c = staged(root.path(), "s", ThemeId(0)).await;
        tracker.accept(ThemeId(0), &c, None).await.unwrap();
        assert!(tracker.goal_reached());
    }

    #[tokio::test]
    async fn test_unlimited_budget_never_exhausts() {
        let root = TempDir::new().unwrap();
        let (mut tracker, _) =
            BankTracker::open(&themes(1), &root.path().join("themes"), 0, "s1")
                .await
                .unwrap();
        for _ in 0..100 {
            tracker.record_miss(ThemeId(0));
        }
        assert!(!tracker.exhausted(ThemeId(0)));
        assert_eq!(tracker.remaining_budget(ThemeId(0)), None);
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_counts() {
        let root = TempDir::new().unwrap();
        let themes_dir = root.path().join("themes");
        {
            let (mut tracker, _) = BankTracker::open(&themes(3), &themes_dir, 0, "s1")
                .await
                .unwrap();
            for name in ["a", "b"] {
                let c = staged(root.path(), name, ThemeId(0)).await;
                tracker.accept(ThemeId(0), &c, None).await.unwrap();
            }
        }
        std::fs::write(themes_dir.join("Soft").join("notes.txt"), b"x").unwrap();

        let (mut tracker, restored) = BankTracker::open(&themes(3), &themes_dir, 0, "s1")
            .await
            .unwrap();
        assert_eq!(restored.entries, 2);
        assert_eq!(restored.urls.len(), 2);
        assert_eq!(tracker.accepted(ThemeId(0)), 2);

        let c = staged(root.path(), "c", ThemeId(0)).await;
        let entry = tracker.accept(ThemeId(0), &c, None).await.unwrap().unwrap();
        assert_eq!(entry.seq, 3);
        assert!(tracker.is_full(ThemeId(0)));
    }
}
