//! Helper functions

use std::time::Instant;

pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

pub fn format_usd(amount: f64) -> String {
    if amount.abs() >= 1_000_000.0 {
        format!("${:.2}M", amount / 1_000_000.0)
    } else if amount.abs() >= 1_000.0 {
        format!("${:.2}K", amount / 1_000.0)
    } else {
        format!("${:.2}", amount)
    }
}

pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Write `content` to `path` via a sibling temp file and rename, so readers
/// never see a half-written file.
pub async fn write_atomic(path: &std::path::Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let tmp = path.with_extension(format!("tmp-{}", generate_id()));
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}
