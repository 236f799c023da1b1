//! Common utility functions for the simulation binary.
//!
//! This module contains shared utilities for the CLI:
//! - Logger initialization
//! - Output path handling

use std::error::Error;
use std::path::{Path, PathBuf};

/// Initialize the logger with the specified configuration.
///
/// # Arguments
/// * `log_level` - Log level string (off, error, warn, info, debug, trace)
/// * `log_file` - Optional path to log file (logs to stderr if None)
///
/// # Errors
/// Returns an error if the log file cannot be opened or logger initialization fails.
pub fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Create the parent directory of an output prefix if it does not exist yet.
///
/// # Errors
/// Returns an error if directory creation fails or the prefix has no file name.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if output.file_name().is_none() {
        return Err(format!("Output path '{}' has no file name.", output.display()).into());
    }
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Output prefix for one run; runs of several seeds get the seed appended.
pub fn run_prefix(output: &Path, seed: u64, multiple: bool) -> PathBuf {
    if !multiple {
        return output.to_path_buf();
    }
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!("_seed{seed}"));
    output.with_file_name(name)
}

/// `<prefix>.csv` for the per-step summary and `<prefix>_cells.csv` for the final dynamic cells.
pub fn report_paths(prefix: &Path) -> (PathBuf, PathBuf) {
    let mut steps = prefix.as_os_str().to_os_string();
    steps.push(".csv");
    let mut cells = prefix.as_os_str().to_os_string();
    cells.push("_cells.csv");
    (PathBuf::from(steps), PathBuf::from(cells))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_paths() {
        let (steps, cells) = report_paths(Path::new("out/run"));
        assert_eq!(steps, PathBuf::from("out/run.csv"));
        assert_eq!(cells, PathBuf::from("out/run_cells.csv"));
    }

    #[test]
    fn test_run_prefix() {
        let prefix = Path::new("results/highway");
        assert_eq!(run_prefix(prefix, 7, false), PathBuf::from("results/highway"));
        assert_eq!(
            run_prefix(prefix, 7, true),
            PathBuf::from("results/highway_seed7")
        );
    }

    #[test]
    fn test_validate_output_path_creates_parent() {
        let dir = std::env::temp_dir().join("dogm_sim_common_test");
        let _ = std::fs::remove_dir_all(&dir);
        let prefix = dir.join("nested").join("run");
        validate_output_path(&prefix).unwrap();
        assert!(dir.join("nested").is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_validate_output_path_rejects_empty_name() {
        assert!(validate_output_path(Path::new("/")).is_err());
    }
}
