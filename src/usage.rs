use crate::error::Result;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

pub const USAGE_FILE_NAME: &str = "usage.json";

/// Per-day count of successfully rendered images, kept in a small JSON file
/// keyed by UTC date (`YYYY-MM-DD`).
#[derive(Debug, Clone)]
pub struct UsageCounter {
    path: PathBuf,
}

impl UsageCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(USAGE_FILE_NAME))
    }

    pub async fn today(&self) -> Result<u32> {
        self.count_on(today()).await
    }

    pub async fn increment(&self) -> Result<u32> {
        self.increment_on(today()).await
    }

    pub async fn count_on(&self, date: NaiveDate) -> Result<u32> {
        let days = self.load().await?;
        Ok(days.get(&key(date)).copied().unwrap_or(0))
    }

    /// Bumps the count for `date`. Days before `date` are dropped from the
    /// file on the same write.
    pub async fn increment_on(&self, date: NaiveDate) -> Result<u32> {
        let mut days = self.load().await?;
        let current = key(date);
        days.retain(|day, _| *day >= current);
        let count = days.entry(current).or_insert(0);
        *count += 1;
        let count = *count;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(&days)?).await?;
        info!("Images generated today: {}", count);
        Ok(count)
    }

    async fn load(&self) -> Result<BTreeMap<String, u32>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn missing_file_counts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counter = UsageCounter::in_dir(dir.path());
        assert_eq!(counter.today().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counts_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let counter = UsageCounter::in_dir(&dir.path().join("state"));

        assert_eq!(counter.increment_on(day(1)).await.unwrap(), 1);
        assert_eq!(counter.increment_on(day(1)).await.unwrap(), 2);

        let reopened = UsageCounter::in_dir(&dir.path().join("state"));
        assert_eq!(reopened.count_on(day(1)).await.unwrap(), 2);
        assert_eq!(reopened.count_on(day(3)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn a_new_day_starts_at_one_and_drops_older_days() {
        let dir = tempfile::tempdir().unwrap();
        let counter = UsageCounter::in_dir(dir.path());

        counter.increment_on(day(1)).await.unwrap();
        counter.increment_on(day(1)).await.unwrap();
        assert_eq!(counter.increment_on(day(2)).await.unwrap(), 1);

        assert_eq!(counter.count_on(day(1)).await.unwrap(), 0);
        assert_eq!(counter.count_on(day(2)).await.unwrap(), 1);
        let stored: BTreeMap<String, u32> =
            serde_json::from_slice(&std::fs::read(dir.path().join(USAGE_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["2026-03-02"]);
    }
}
