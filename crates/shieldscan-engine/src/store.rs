//! Scan Store - durable records of scans, findings and score history
//!
//! The orchestrator is the only writer of scan and finding rows. History is
//! append-only.

use async_trait::async_trait;
use shieldscan_core::{Error, Finding, Result, Scan, ScoreHistoryEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn insert_scan(&self, scan: &Scan) -> Result<()>;

    /// Overwrite an existing scan record
    async fn update_scan(&self, scan: &Scan) -> Result<()>;

    async fn get_scan(&self, scan_id: &str) -> Result<Option<Scan>>;

    /// All scans, most recent first
    async fn list_scans(&self) -> Result<Vec<Scan>>;

    /// Scans left `queued` or `running`
    async fn unfinished_scans(&self) -> Result<Vec<Scan>>;

    /// Remove a scan and its findings. History entries are kept.
    async fn delete_scan(&self, scan_id: &str) -> Result<bool>;

    async fn insert_findings(&self, findings: &[Finding]) -> Result<()>;

    /// Findings of one scan in insertion order
    async fn findings(&self, scan_id: &str) -> Result<Vec<Finding>>;

    async fn append_history(&self, entry: &ScoreHistoryEntry) -> Result<()>;

    /// History of one target, oldest first
    async fn history(&self, target: &str) -> Result<Vec<ScoreHistoryEntry>>;

    /// Persist a terminal scan together with its findings and, for a
    /// completed scan, its history entry.
    async fn record_outcome(&self, scan: &Scan, findings: &[Finding]) -> Result<()> {
        self.insert_findings(findings).await?;
        self.update_scan(scan).await?;
        if let Some(entry) = ScoreHistoryEntry::from_scan(scan) {
            self.append_history(&entry).await?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    /// Insertion sequence breaks ties between equal creation times
    scans: HashMap<String, (u64, Scan)>,
    next_seq: u64,
    findings: HashMap<String, Vec<Finding>>,
    history: Vec<ScoreHistoryEntry>,
}

/// Process-local store used for one-shot runs and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn insert_scan(&self, scan: &Scan) -> Result<()> {
        let mut state = self.state.write().await;
        if state.scans.contains_key(&scan.id) {
            return Err(Error::Store(format!("scan {} already exists", scan.id)));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.scans.insert(scan.id.clone(), (seq, scan.clone()));
        Ok(())
    }

    async fn update_scan(&self, scan: &Scan) -> Result<()> {
        let mut state = self.state.write().await;
        match state.scans.get_mut(&scan.id) {
            Some((_, stored)) => {
                *stored = scan.clone();
                Ok(())
            }
            None => Err(Error::ScanNotFound {
                scan_id: scan.id.clone(),
            }),
        }
    }

    async fn get_scan(&self, scan_id: &str) -> Result<Option<Scan>> {
        let state = self.state.read().await;
        Ok(state.scans.get(scan_id).map(|(_, scan)| scan.clone()))
    }

    async fn list_scans(&self) -> Result<Vec<Scan>> {
        let state = self.state.read().await;
        let mut scans: Vec<&(u64, Scan)> = state.scans.values().collect();
        scans.sort_by(|(a_seq, a), (b_seq, b)| {
            b.created_at.cmp(&a.created_at).then_with(|| b_seq.cmp(a_seq))
        });
        Ok(scans.into_iter().map(|(_, scan)| scan.clone()).collect())
    }

    async fn unfinished_scans(&self) -> Result<Vec<Scan>> {
        let state = self.state.read().await;
        Ok(state
            .scans
            .values()
            .filter(|(_, scan)| !scan.is_terminal())
            .map(|(_, scan)| scan.clone())
            .collect())
    }

    async fn delete_scan(&self, scan_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        state.findings.remove(scan_id);
        Ok(state.scans.remove(scan_id).is_some())
    }

    async fn insert_findings(&self, findings: &[Finding]) -> Result<()> {
        let mut state = self.state.write().await;
        for finding in findings {
            if !state.scans.contains_key(&finding.scan_id) {
                return Err(Error::ScanNotFound {
                    scan_id: finding.scan_id.clone(),
                });
            }
            state
                .findings
                .entry(finding.scan_id.clone())
                .or_default()
                .push(finding.clone());
        }
        Ok(())
    }

    async fn findings(&self, scan_id: &str) -> Result<Vec<Finding>> {
        let state = self.state.read().await;
        Ok(state.findings.get(scan_id).cloned().unwrap_or_default())
    }

    async fn append_history(&self, entry: &ScoreHistoryEntry) -> Result<()> {
        self.state.write().await.history.push(entry.clone());
        Ok(())
    }

    async fn history(&self, target: &str) -> Result<Vec<ScoreHistoryEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<ScoreHistoryEntry> = state
            .history
            .iter()
            .filter(|e| e.target == target)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.scanned_at.cmp(&b.scanned_at));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shieldscan_core::{ScanDepth, ScanOutcome, Sensitivity, Severity, TargetType};

    fn scan(target: &str) -> Scan {
        Scan::new(
            target,
            TargetType::Ip,
            ScanDepth::Quick,
            Sensitivity::Safe,
            vec!["tls".into()],
        )
    }

    fn finding(scan_id: &str, title: &str) -> Finding {
        let mut finding = Finding::builder("tls", Severity::Low, title).build();
        finding.scan_id = scan_id.to_string();
        finding
    }

    #[tokio::test]
    async fn test_scan_round_trip() {
        let store = MemoryStore::new();
        let mut s = scan("10.0.0.1");
        store.insert_scan(&s).await.unwrap();
        assert!(store.insert_scan(&s).await.is_err());

        s.mark_running().unwrap();
        store.update_scan(&s).await.unwrap();
        let loaded = store.get_scan(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded, s);
        assert_eq!(store.unfinished_scans().await.unwrap().len(), 1);

        assert!(store.get_scan("missing").await.unwrap().is_none());
        assert!(matches!(
            store.update_scan(&scan("10.0.0.2")).await,
            Err(Error::ScanNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_most_recent_first() {
        let store = MemoryStore::new();
        let first = scan("10.0.0.1");
        let second = scan("10.0.0.2");
        store.insert_scan(&first).await.unwrap();
        store.insert_scan(&second).await.unwrap();

        let ids: Vec<String> = store.list_scans().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_record_outcome_and_cascade() {
        let store = MemoryStore::new();
        let mut s = scan("10.0.0.1");
        store.insert_scan(&s).await.unwrap();
        s.mark_running().unwrap();
        s.mark_completed(91.0, ScanOutcome::default()).unwrap();

        let findings = vec![finding(&s.id, "a"), finding(&s.id, "b")];
        store.record_outcome(&s, &findings).await.unwrap();

        let titles: Vec<String> = store.findings(&s.id).await.unwrap().into_iter().map(|f| f.title).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(store.history("10.0.0.1").await.unwrap().len(), 1);
        assert!(store.unfinished_scans().await.unwrap().is_empty());

        assert!(store.delete_scan(&s.id).await.unwrap());
        assert!(store.findings(&s.id).await.unwrap().is_empty());
        assert!(!store.delete_scan(&s.id).await.unwrap());
        // History outlives the scan
        assert_eq!(store.history("10.0.0.1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_scan_has_no_history() {
        let store = MemoryStore::new();
        let mut s = scan("10.0.0.1");
        store.insert_scan(&s).await.unwrap();
        s.mark_failed("all modules failed", None).unwrap();
        store.record_outcome(&s, &[]).await.unwrap();
        assert!(store.history("10.0.0.1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_findings_need_a_scan() {
        let store = MemoryStore::new();
        let err = store.insert_findings(&[finding("nope", "x")]).await.unwrap_err();
        assert!(matches!(err, Error::ScanNotFound { .. }));
    }
}
