//! CSV export of delivery attempts. Uses the `csv` crate for quoting.
//!
//! Format: `post_id;target;outcome;tries;error;sent_at`, one row per attempt,
//! semicolon-delimited like the rest of our exports.

use crate::domain::{DomainError, ScheduledPost};
use std::path::{Path, PathBuf};
use tracing::info;

pub fn attempts_to_csv(posts: &[ScheduledPost]) -> Result<String, csv::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .from_writer(Vec::new());

    wtr.write_record(["post_id", "target", "outcome", "tries", "error", "sent_at"])?;

    for post in posts {
        for attempt in &post.attempts {
            // Bot API error texts can contain newlines; keep one row per line.
            let error = attempt
                .error
                .as_deref()
                .unwrap_or("")
                .replace('\n', " ")
                .replace('\r', "");
            let target = attempt.target.to_string();
            let tries = attempt.tries.to_string();
            let sent_at = attempt.sent_at.to_rfc3339();
            wtr.write_record([
                post.id.as_str(),
                target.as_str(),
                attempt.outcome.as_str(),
                tries.as_str(),
                error.as_str(),
                sent_at.as_str(),
            ])?;
        }
    }

    wtr.flush()?;
    let bytes = wtr
        .into_inner()
        .map_err(|e| csv::Error::from(std::io::Error::other(e.to_string())))?;

    String::from_utf8(bytes).map_err(|e| {
        csv::Error::from(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })
}

/// Write `delivery_<timestamp>.csv` under `reports_dir`. Returns the file path.
pub async fn write_report(
    reports_dir: &Path,
    posts: &[ScheduledPost],
    stamp: chrono::DateTime<chrono::Utc>,
) -> Result<PathBuf, DomainError> {
    let csv = attempts_to_csv(posts).map_err(|e| DomainError::store("export report", e))?;
    tokio::fs::create_dir_all(reports_dir)
        .await
        .map_err(|e| DomainError::store("export report", e))?;
    let path = reports_dir.join(format!("delivery_{}.csv", stamp.format("%Y%m%d_%H%M%S")));
    tokio::fs::write(&path, csv)
        .await
        .map_err(|e| DomainError::store("export report", e))?;
    info!(path = %path.display(), posts = posts.len(), "delivery report written");
    Ok(path)
}
