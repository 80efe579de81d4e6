use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::job::Job;
use crate::core::job_config::JobConfig;
use crate::core::sync::SyncResult;

pub fn format_job_banner(config: &JobConfig) -> String {
    let first_line = "================ Job Configuration ================";
    let last_line = "=".repeat(first_line.len());
    let execution = format!("{} {}", config.interpreter(), config.args.join(" "));
    [
        first_line.to_string(),
        format!("Execution:    {}", execution.trim()),
        format!("Runtime:      {} ({})", config.runtime.name, config.runtime.kind()),
        format!("Dataset Dir.: {}", limit_path_depth(&config.data_path, 4)),
        format!("Output Dir.:  {}", limit_path_depth(&config.output_dir(), 4)),
        format!("Timeout:      {}s", config.timeout),
        last_line,
    ]
    .join("\n")
}

pub fn format_job_line(job: &Job) -> String {
    let name = job.name.as_deref().unwrap_or("-");
    let mut line = format!(
        "{}  {:<20} {:<22} dataset={} runtime={}",
        job.uid, name, job.status, job.dataset_name, job.runtime.name
    );
    if let Some(message) = job.error_message.as_deref() {
        let first = message.lines().next().unwrap_or_default();
        line.push_str(&format!(" error={} ({first})", job.error));
    }
    line
}

pub fn format_sync_result(result: &SyncResult) -> String {
    let mut out = format!(
        "sync: {} executed, {} succeeded, {} failed in {}",
        result.commands_executed,
        result.successful_syncs,
        result.failed_syncs,
        format_duration(result.elapsed)
    );
    for error in &result.errors {
        out.push_str("\n  - ");
        out.push_str(error);
    }
    out
}

pub fn limit_path_depth(path: &Path, max_depth: usize) -> String {
    let parts: Vec<_> = path.components().collect();
    if parts.len() <= max_depth {
        return path.display().to_string();
    }
    let tail: PathBuf = parts[parts.len() - max_depth..].iter().collect();
    Path::new("...").join(tail).display().to_string()
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let value = bytes as f64;
    if value >= GB {
        format!("{:.2} GB", value / GB)
    } else if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.2} KB", value / KB)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_paths_are_shortened() {
        let path = Path::new("/a/b/c/d/e/f");
        assert_eq!(limit_path_depth(path, 3), ".../d/e/f");
        assert_eq!(limit_path_depth(Path::new("x/y"), 3), "x/y");
    }

    #[test]
    fn sizes_and_durations() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }
}
