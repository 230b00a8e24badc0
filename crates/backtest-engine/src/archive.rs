use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use analysis_core::ArchivedArticle;
use chrono::NaiveDate;

use crate::error::BacktestError;
use crate::price_data::days_between;

/// Read access to historical articles for replay.
pub trait ArticleSource: Send + Sync {
    /// Articles published within `[start, end]`, oldest first.
    fn load_articles(&self, start: NaiveDate, end: NaiveDate) -> Vec<ArchivedArticle>;
}

/// Day-partitioned JSON archive: one `articles_YYYY-MM-DD.json` array per day.
#[derive(Debug, Clone)]
pub struct ArticleArchive {
    archive_dir: PathBuf,
}

impl ArticleArchive {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    fn file_path(&self, date: NaiveDate) -> PathBuf {
        self.archive_dir
            .join(format!("articles_{}.json", date.format("%Y-%m-%d")))
    }

    fn read_day(path: &Path) -> Result<Vec<ArchivedArticle>, BacktestError> {
        let raw = std::fs::read_to_string(path).map_err(|e| BacktestError::io(path, e))?;
        serde_json::from_str(&raw).map_err(|e| BacktestError::json(path, e))
    }

    /// Append articles to their publish-date files, skipping URLs already
    /// archived. Returns how many were written.
    pub fn save_articles(&self, articles: &[ArchivedArticle]) -> Result<usize, BacktestError> {
        if articles.is_empty() {
            return Ok(0);
        }
        std::fs::create_dir_all(&self.archive_dir)
            .map_err(|e| BacktestError::io(&self.archive_dir, e))?;

        let mut by_date: BTreeMap<NaiveDate, Vec<&ArchivedArticle>> = BTreeMap::new();
        for article in articles {
            by_date.entry(article.published_date()).or_default().push(article);
        }

        let mut saved = 0;
        for (date, day_articles) in by_date {
            let path = self.file_path(date);
            let mut existing = if path.exists() {
                Self::read_day(&path).unwrap_or_else(|e| {
                    tracing::warn!("Rewriting unreadable archive file: {}", e);
                    Vec::new()
                })
            } else {
                Vec::new()
            };

            let mut urls: HashSet<String> = existing.iter().map(|a| a.url.clone()).collect();
            for article in day_articles {
                if urls.insert(article.url.clone()) {
                    existing.push(article.clone());
                    saved += 1;
                }
            }

            let json = serde_json::to_string_pretty(&existing)
                .map_err(|e| BacktestError::json(&path, e))?;
            std::fs::write(&path, json).map_err(|e| BacktestError::io(&path, e))?;
        }

        if saved > 0 {
            tracing::info!("Archived {} new articles", saved);
        }
        Ok(saved)
    }

    /// Dates that have an archive file, ascending.
    pub fn available_dates(&self) -> Result<Vec<NaiveDate>, BacktestError> {
        let entries = match std::fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BacktestError::io(&self.archive_dir, e)),
        };

        let mut dates: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let stem = name.strip_prefix("articles_")?.strip_suffix(".json")?;
                NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
            })
            .collect();
        dates.sort();
        Ok(dates)
    }
}

impl ArticleSource for ArticleArchive {
    fn load_articles(&self, start: NaiveDate, end: NaiveDate) -> Vec<ArchivedArticle> {
        let mut articles = Vec::new();
        for date in days_between(start, end) {
            let path = self.file_path(date);
            if !path.exists() {
                continue;
            }
            match Self::read_day(&path) {
                Ok(day) => articles.extend(day),
                Err(e) => tracing::warn!("Skipping archive file: {}", e),
            }
        }

        articles.sort_by_key(|a| a.published_at);
        tracing::info!(
            "Loaded {} archived articles ({} ~ {})",
            articles.len(),
            start,
            end
        );
        articles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(url: &str, published: &str) -> ArchivedArticle {
        ArchivedArticle {
            source: "wire".to_string(),
            title: url.to_string(),
            content: String::new(),
            url: url.to_string(),
            published_at: analysis_core::parse_published_at(published).unwrap(),
            summary: None,
            keywords: vec!["HBM".to_string()],
            sentiment_score: 0.4,
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_save_dedups_by_url() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArticleArchive::new(dir.path());

        let first = vec![
            article("https://a", "2024-03-04T09:00:00"),
            article("https://b", "2024-03-05T10:00:00"),
        ];
        assert_eq!(archive.save_articles(&first).unwrap(), 2);

        let again = vec![
            article("https://a", "2024-03-04T09:00:00"),
            article("https://c", "2024-03-04T11:00:00"),
        ];
        assert_eq!(archive.save_articles(&again).unwrap(), 1);

        let loaded = archive.load_articles(d(2024, 3, 4), d(2024, 3, 4));
        assert_eq!(loaded.len(), 2);
        assert_eq!(archive.available_dates().unwrap(), vec![d(2024, 3, 4), d(2024, 3, 5)]);
    }

    #[test]
    fn test_load_sorts_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArticleArchive::new(dir.path());
        archive
            .save_articles(&[
                article("https://late", "2024-03-05T15:00:00"),
                article("https://early", "2024-03-04T08:00:00"),
            ])
            .unwrap();
        std::fs::write(dir.path().join("articles_2024-03-06.json"), "not json").unwrap();

        let loaded = archive.load_articles(d(2024, 3, 1), d(2024, 3, 10));
        let urls: Vec<&str> = loaded.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://early", "https://late"]);
    }

    #[test]
    fn test_missing_archive_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let archive = ArticleArchive::new(dir.path().join("nope"));
        assert!(archive.available_dates().unwrap().is_empty());
        assert!(archive.load_articles(d(2024, 3, 1), d(2024, 3, 2)).is_empty());
    }
}
