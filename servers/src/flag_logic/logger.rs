use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Transport crates that flood debug output with per-frame and per-request noise.
const NOISY_TARGETS: [&str; 4] = ["hyper_util", "reqwest", "tungstenite", "tokio_tungstenite"];

/// Sends logs to stdout and to `<log_dir>/<prefix>_<timestamp>.log`.
///
/// Earlier files with the same prefix are removed first, so only this run's
/// file and the previous one are kept. Files of other servers sharing the
/// directory are left alone.
pub fn setup_logging(log_dir: &Path, log_level: &str, prefix: &str) -> Result<PathBuf> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    }

    cleanup_old_logs(log_dir, prefix)?;

    let log_path = log_dir.join(format!(
        "{}_{}.log",
        prefix,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));

    let level = level_filter(log_level);
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level);

    // Dependencies stay at warn unless full tracing is asked for.
    if level < log::LevelFilter::Trace {
        for target in NOISY_TARGETS {
            dispatch = dispatch.level_for(target, level.min(log::LevelFilter::Warn));
        }
    }

    dispatch
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    Ok(log_path)
}

fn level_filter(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Keeps the newest `<prefix>_*.log` file and deletes the rest.
fn cleanup_old_logs(log_dir: &Path, prefix: &str) -> Result<()> {
    let own_prefix = format!("{}_", prefix);
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&own_prefix) && name.ends_with(".log")
        })
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    entries.sort_by_key(|(modified, _)| std::cmp::Reverse(*modified));

    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn keeps_one_log_file_per_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "server_flag_a.log",
            "server_flag_b.log",
            "server_flag_c.log",
            "server_yahoo_a.log",
            "server_flag.conf",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        cleanup_old_logs(dir.path(), "server_flag").unwrap();

        let remaining = names(dir.path());
        assert_eq!(
            remaining.iter().filter(|n| n.starts_with("server_flag_")).count(),
            1
        );
        assert!(remaining.contains(&"server_yahoo_a.log".to_string()));
        assert!(remaining.contains(&"server_flag.conf".to_string()));
    }

    #[test]
    fn unknown_levels_default_to_info() {
        assert_eq!(level_filter("TRACE"), log::LevelFilter::Trace);
        assert_eq!(level_filter("fatal"), log::LevelFilter::Info);
    }
}
