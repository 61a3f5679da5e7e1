use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

/// 获取当前时间
pub fn now_utc() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

/// 初始化日志
pub fn init_log(log: Option<PathBuf>) -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber_builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);
    let (non_blocking, guard) = match log {
        // output to file，daily rotate, non-blocking
        Some(log) if log.is_dir() => {
            let file_appender = tracing_appender::rolling::daily(log, "course_forge.log");
            tracing_appender::non_blocking(file_appender)
        }
        Some(log) => {
            eprintln!("log path {} is not a directory, logging to stdout", log.display());
            tracing_appender::non_blocking(std::io::stdout())
        }
        // output to stdout
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    // a second init (tests, embedded use) keeps the first subscriber
    let _ = tracing::subscriber::set_global_default(
        subscriber_builder.with_writer(non_blocking).finish(),
    );
    guard
}

/// Create the parent directory of a file backed sqlite url.
pub fn prepare_database_dir(url: &str) -> std::io::Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[test]
fn database_dir_is_created_for_file_urls() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("nested/course.db");
    prepare_database_dir(&format!("sqlite://{}?mode=rwc", db.display())).unwrap();
    assert!(dir.path().join("nested").is_dir());
    prepare_database_dir("sqlite::memory:").unwrap();
}

#[test]
fn truncate_respects_char_boundaries() {
    assert_eq!(truncate_text("héllo wörld", 5), "héllo...");
    assert_eq!(truncate_text("short", 10), "short");
}
