//! Periodic anomaly scanner over the request audit log
//!
//! Flags addresses with more than `high_volume_threshold` requests in the
//! trailing window, and every distinct (address, path) pair that touched a
//! sensitive path. Flags are keyed on (address, reason), so repeated scans over
//! overlapping windows never create duplicates.

use crate::store::{AuditLog, FlagStore, StoreError};
use chrono::{DateTime, Utc};
use ipwarden_common::{constants, ScanReport};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Paths flagged on exact match
static DEFAULT_SENSITIVE_EXACT: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["/admin", "/admin/", "/login", "/accounts/login"].into_iter().collect());

/// Paths flagged when they start with one of these
static DEFAULT_SENSITIVE_PREFIXES: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["/admin"]);

/// Case-insensitive substrings
static DEFAULT_SENSITIVE_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["login"]);

/// Detection rules for one scan
#[derive(Debug, Clone)]
pub struct ScanRules {
    /// Strictly more requests than this in the window raises a flag
    pub high_volume_threshold: u64,
    pub exact_paths: HashSet<String>,
    pub prefixes: Vec<String>,
    /// Stored lower-cased
    pub keywords: Vec<String>,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self {
            high_volume_threshold: constants::HIGH_VOLUME_THRESHOLD,
            exact_paths: DEFAULT_SENSITIVE_EXACT.iter().map(|s| s.to_string()).collect(),
            prefixes: DEFAULT_SENSITIVE_PREFIXES.iter().map(|s| s.to_string()).collect(),
            keywords: DEFAULT_SENSITIVE_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ScanRules {
    pub fn new(
        high_volume_threshold: u64,
        exact_paths: Vec<String>,
        prefixes: Vec<String>,
        keywords: Vec<String>,
    ) -> Self {
        Self {
            high_volume_threshold,
            exact_paths: exact_paths.into_iter().collect(),
            prefixes,
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Exact match, prefix match, or case-insensitive substring match
    pub fn is_sensitive(&self, path: &str) -> bool {
        if self.exact_paths.contains(path) {
            return true;
        }
        if self.prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return true;
        }
        let lowered = path.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

/// Reason text for the high-volume rule
pub fn high_traffic_reason(count: i64, window: Duration) -> String {
    format!("High traffic: {} requests in {}", count, describe_window(window))
}

/// Reason text for the sensitive-path rule
pub fn sensitive_path_reason(path: &str) -> String {
    format!("Accessed sensitive path: {}", path)
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    let (n, unit) = if secs > 0 && secs % 3600 == 0 {
        (secs / 3600, "hour")
    } else if secs > 0 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };

    if n == 1 {
        format!("last {}", unit)
    } else {
        format!("last {} {}s", n, unit)
    }
}

/// Mines the audit log and persists suspicious IP flags
pub struct AnomalyScanner {
    audit: Arc<dyn AuditLog>,
    flags: Arc<dyn FlagStore>,
    rules: ScanRules,
}

impl AnomalyScanner {
    pub fn new(audit: Arc<dyn AuditLog>, flags: Arc<dyn FlagStore>, rules: ScanRules) -> Self {
        Self { audit, flags, rules }
    }

    pub fn rules(&self) -> &ScanRules {
        &self.rules
    }

    /// Scan the trailing `window` ending now
    pub async fn run_scan(&self, window: Duration) -> Result<ScanReport, StoreError> {
        self.run_scan_at(Utc::now(), window).await
    }

    /// Scan entries with `timestamp >= now - window`
    pub async fn run_scan_at(&self, now: DateTime<Utc>, window: Duration) -> Result<ScanReport, StoreError> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = ScanReport {
            window_secs: window.as_secs(),
            ..ScanReport::default()
        };

        // 1) High traffic
        for row in self.audit.counts_since(cutoff).await? {
            if row.count <= 0 || row.count as u64 <= self.rules.high_volume_threshold {
                continue;
            }
            report.high_volume += 1;
            let reason = high_traffic_reason(row.count, window);
            self.record(&row.address, &reason, &mut report).await?;
        }

        // 2) Sensitive paths
        for row in self.audit.paths_since(cutoff).await? {
            if !self.rules.is_sensitive(&row.path) {
                continue;
            }
            report.sensitive += 1;
            let reason = sensitive_path_reason(&row.path);
            self.record(&row.address, &reason, &mut report).await?;
        }

        Ok(report)
    }

    async fn record(&self, address: &str, reason: &str, report: &mut ScanReport) -> Result<(), StoreError> {
        if self.flags.flag(address, reason).await? {
            info!(ip = %address, reason = %reason, "Flagged suspicious IP");
            report.created += 1;
        } else {
            debug!(ip = %address, reason = %reason, "Flag already present");
            report.existing += 1;
        }
        Ok(())
    }
}

/// Start a task that runs the scanner every `interval` until shutdown
pub fn spawn_scanner(
    scanner: Arc<AnomalyScanner>,
    interval: Duration,
    window: Duration,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match scanner.run_scan(window).await {
                        Ok(report) => info!(
                            high_volume = report.high_volume,
                            sensitive = report.sensitive,
                            created = report.created,
                            existing = report.existing,
                            "Anomaly scan complete"
                        ),
                        Err(e) => error!(error = %e, "Anomaly scan failed"),
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Anomaly scanner shutting down");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;
    use ipwarden_common::{AuditEntry, GeoLocation};

    const HOUR: Duration = Duration::from_secs(3600);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn entry(ip: Option<&str>, path: &str, minutes_ago: i64) -> AuditEntry {
        AuditEntry::at(
            ip.map(String::from),
            path,
            GeoLocation::unknown(),
            now() - chrono::Duration::minutes(minutes_ago),
        )
    }

    fn scanner(store: &Arc<MemoryStore>) -> AnomalyScanner {
        AnomalyScanner::new(store.clone(), store.clone(), ScanRules::default())
    }

    #[test]
    fn test_sensitive_path_matching() {
        let rules = ScanRules::default();
        assert!(rules.is_sensitive("/admin"));
        assert!(rules.is_sensitive("/admin/settings"));
        assert!(rules.is_sensitive("/accounts/login"));
        assert!(rules.is_sensitive("/Login"));
        assert!(rules.is_sensitive("/api/v1/LOGIN/token"));
        assert!(!rules.is_sensitive("/home"));
        assert!(!rules.is_sensitive("/Admin/settings"));
    }

    #[test]
    fn test_custom_rules_lowercase_keywords() {
        let rules = ScanRules::new(10, vec!["/wp-admin".into()], vec![], vec!["PASSWD".into()]);
        assert!(rules.is_sensitive("/wp-admin"));
        assert!(rules.is_sensitive("/etc/passwd"));
        assert!(!rules.is_sensitive("/admin"));
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(high_traffic_reason(101, HOUR), "High traffic: 101 requests in last hour");
        assert_eq!(
            high_traffic_reason(150, Duration::from_secs(2 * 3600)),
            "High traffic: 150 requests in last 2 hours"
        );
        assert_eq!(
            high_traffic_reason(150, Duration::from_secs(15 * 60)),
            "High traffic: 150 requests in last 15 minutes"
        );
        assert_eq!(sensitive_path_reason("/admin"), "Accessed sensitive path: /admin");
    }

    #[tokio::test]
    async fn test_high_volume_flagged_once() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..101 {
            store.push_entry(entry(Some("203.0.113.5"), "/home", i % 50));
        }
        let scanner = scanner(&store);

        let report = scanner.run_scan_at(now(), HOUR).await.unwrap();
        assert_eq!(report.high_volume, 1);
        assert_eq!(report.created, 1);

        let flags = store.flags();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].address, "203.0.113.5");
        assert!(flags[0].reason.contains("101"));

        // Re-running without new entries creates nothing
        let report = scanner.run_scan_at(now(), HOUR).await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.existing, 1);
        assert_eq!(store.flags().len(), 1);
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..100 {
            store.push_entry(entry(Some("203.0.113.5"), "/home", 1));
        }

        let report = scanner(&store).run_scan_at(now(), HOUR).await.unwrap();
        assert_eq!(report.high_volume, 0);
        assert!(store.flags().is_empty());
    }

    #[tokio::test]
    async fn test_changed_count_creates_new_flag() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..101 {
            store.push_entry(entry(Some("203.0.113.5"), "/home", 1));
        }
        let scanner = scanner(&store);
        scanner.run_scan_at(now(), HOUR).await.unwrap();

        store.push_entry(entry(Some("203.0.113.5"), "/home", 0));
        let report = scanner.run_scan_at(now(), HOUR).await.unwrap();
        assert_eq!(report.created, 1);

        let reasons: Vec<String> = store.flags().into_iter().map(|f| f.reason).collect();
        assert_eq!(reasons.len(), 2);
        assert!(reasons.iter().any(|r| r.contains("101")));
        assert!(reasons.iter().any(|r| r.contains("102")));
    }

    #[tokio::test]
    async fn test_entries_outside_window_ignored() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..150 {
            store.push_entry(entry(Some("203.0.113.5"), "/admin", 61));
        }

        let report = scanner(&store).run_scan_at(now(), HOUR).await.unwrap();
        assert_eq!(report, ScanReport { window_secs: 3600, ..ScanReport::default() });
        assert!(store.flags().is_empty());
    }

    #[tokio::test]
    async fn test_sensitive_paths_flagged() {
        let store = Arc::new(MemoryStore::new());
        store.push_entry(entry(Some("203.0.113.9"), "/admin/settings", 5));
        store.push_entry(entry(Some("203.0.113.9"), "/admin/settings", 4));
        store.push_entry(entry(Some("198.51.100.1"), "/Login", 3));
        store.push_entry(entry(Some("198.51.100.1"), "/home", 2));
        store.push_entry(entry(None, "/admin", 1));

        let report = scanner(&store).run_scan_at(now(), HOUR).await.unwrap();
        assert_eq!(report.sensitive, 2);
        assert_eq!(report.created, 2);

        let mut flags: Vec<(String, String)> = store
            .flags()
            .into_iter()
            .map(|f| (f.address, f.reason))
            .collect();
        flags.sort();
        assert_eq!(
            flags,
            vec![
                ("198.51.100.1".to_string(), "Accessed sensitive path: /Login".to_string()),
                ("203.0.113.9".to_string(), "Accessed sensitive path: /admin/settings".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_window_is_ok() {
        let store = Arc::new(MemoryStore::new());
        let report = scanner(&store).run_scan(HOUR).await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.window_secs, 3600);
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        assert!(scanner(&store).run_scan(HOUR).await.is_err());
    }

    #[tokio::test]
    async fn test_spawned_scanner_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..101 {
            store.push_entry(AuditEntry::new(Some("203.0.113.5".to_string()), "/home", GeoLocation::unknown()));
        }
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = spawn_scanner(Arc::new(scanner(&store)), Duration::from_millis(10), HOUR, rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(store.flags().len(), 1);
    }
}
