//! Call-site capture and cleaning.
//!
//! Frames are kept as plain strings of the form `src/handlers.rs:42 in app::handlers::index`
//! so integrations can supply their own, and only application frames survive
//! cleaning.

use std::backtrace::Backtrace;
use std::fmt;
use std::path::{Path, PathBuf};

/// Symbols belonging to the enforcer itself; never part of a cleaned trace.
const SELF_SYMBOL_PREFIXES: [&str; 2] = ["perf_promise::", "perf_promise_explain::"];

/// One source location of a call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub path: String,
    pub line: u32,
    pub symbol: Option<String>,
}

impl Frame {
    /// Parse `path:line`, `path:line:col`, optionally followed by ` in symbol`.
    pub fn parse(raw: &str) -> Option<Frame> {
        let raw = raw.trim();
        let (location, symbol) = match raw.split_once(" in ") {
            Some((location, symbol)) => (location, Some(symbol.trim().to_string())),
            None => (raw, None),
        };
        let mut parts = location.rsplitn(3, ':');
        let last = parts.next()?;
        let middle = parts.next()?;
        let (path, line) = match (middle.parse::<u32>(), parts.next()) {
            // path:line:col
            (Ok(line), Some(path)) if last.parse::<u32>().is_ok() => (path, line),
            // path:line
            _ => {
                let line = last.parse::<u32>().ok()?;
                let path = location.rsplit_once(':')?.0;
                (path, line)
            }
        };
        if path.is_empty() {
            return None;
        }
        Some(Frame {
            path: path.to_string(),
            line,
            symbol,
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)?;
        if let Some(symbol) = &self.symbol {
            write!(f, " in {symbol}")?;
        }
        Ok(())
    }
}

/// Keeps application frames and drops everything else.
#[derive(Debug, Clone)]
pub struct TraceCleaner {
    source_root: PathBuf,
    app_prefixes: Vec<String>,
}

impl TraceCleaner {
    pub fn new(source_root: impl Into<PathBuf>, app_prefixes: Vec<String>) -> Self {
        Self {
            source_root: source_root.into(),
            app_prefixes,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Capture the current call stack and clean it.
    pub fn capture(&self) -> Vec<String> {
        let rendered = Backtrace::force_capture().to_string();
        self.clean(parse_backtrace(&rendered))
    }

    /// Normalize frame paths and keep application frames, in order.
    pub fn clean(&self, frames: impl IntoIterator<Item = Frame>) -> Vec<String> {
        frames
            .into_iter()
            .filter(|frame| {
                !frame.symbol.as_deref().is_some_and(|symbol| {
                    SELF_SYMBOL_PREFIXES
                        .iter()
                        .any(|prefix| symbol.starts_with(prefix))
                })
            })
            .filter_map(|mut frame| {
                frame.path = self.relative_path(&frame.path)?;
                Some(frame.to_string())
            })
            .collect()
    }

    /// Clean frames given as strings; unparseable entries are dropped.
    pub fn clean_raw<I, S>(&self, frames: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.clean(frames.into_iter().filter_map(|f| Frame::parse(f.as_ref())))
    }

    /// Whether a frame string points into the application.
    pub fn is_app_frame(&self, frame: &str) -> bool {
        Frame::parse(frame).is_some_and(|f| self.has_app_prefix(&f.path))
    }

    /// Path of an application source file on disk.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.source_root.join(path)
    }

    fn relative_path(&self, path: &str) -> Option<String> {
        let path = path.strip_prefix("./").unwrap_or(path);
        let relative = if Path::new(path).is_absolute() {
            let stripped = Path::new(path).strip_prefix(&self.source_root).ok()?;
            stripped.to_string_lossy().replace('\\', "/")
        } else {
            path.to_string()
        };
        self.has_app_prefix(&relative).then_some(relative)
    }

    fn has_app_prefix(&self, path: &str) -> bool {
        self.app_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Parse the `Display` rendering of a [`Backtrace`].
///
/// ```text
///    3: app::handlers::index
///              at ./src/handlers.rs:42:9
/// ```
pub(crate) fn parse_backtrace(rendered: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut symbol: Option<String> = None;
    for line in rendered.lines() {
        let trimmed = line.trim();
        if let Some(location) = trimmed.strip_prefix("at ") {
            if let Some(mut frame) = Frame::parse(location) {
                frame.symbol = symbol.clone();
                frames.push(frame);
            }
        } else if let Some((index, name)) = trimmed.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) {
                symbol = Some(strip_hash(name).to_string());
            }
        }
    }
    frames
}

/// Drop the `::h0123456789abcdef` suffix of legacy-mangled symbols.
fn strip_hash(symbol: &str) -> &str {
    match symbol.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
            head
        }
        _ => symbol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleaner() -> TraceCleaner {
        TraceCleaner::new("/srv/app", vec!["src/".to_string()])
    }

    #[test]
    fn frame_parse_variants() {
        assert_eq!(
            Frame::parse("src/handlers.rs:42"),
            Some(Frame {
                path: "src/handlers.rs".into(),
                line: 42,
                symbol: None
            })
        );
        assert_eq!(
            Frame::parse("src/handlers.rs:42:9 in app::index"),
            Some(Frame {
                path: "src/handlers.rs".into(),
                line: 42,
                symbol: Some("app::index".into())
            })
        );
        assert_eq!(Frame::parse("no location"), None);
        assert_eq!(Frame::parse(":12"), None);
    }

    #[test]
    fn parses_std_backtrace_rendering() {
        let rendered = "\
   0: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:101:18
   1: perf_promise::recorder::QueryRecorder::record
             at /home/me/.cargo/registry/src/perf-promise/src/recorder.rs:80:5
   2: app::handlers::index::h0123456789abcdef
             at ./src/handlers.rs:42:9
   3: app::main
             at /srv/app/src/main.rs:7:5
   4: tokio::runtime::park
";
        let frames = parse_backtrace(rendered);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[2].symbol.as_deref(), Some("app::handlers::index"));

        let cleaned = cleaner().clean(frames);
        assert_eq!(
            cleaned,
            vec![
                "src/handlers.rs:42 in app::handlers::index".to_string(),
                "src/main.rs:7 in app::main".to_string(),
            ]
        );
    }

    #[test]
    fn clean_raw_keeps_app_frames_only() {
        let cleaned = cleaner().clean_raw([
            "src/models/article.rs:10",
            "vendor/lib.rs:3",
            "garbage",
            "/srv/app/src/lib.rs:5",
            "/elsewhere/src/lib.rs:5",
        ]);
        assert_eq!(cleaned, vec!["src/models/article.rs:10", "src/lib.rs:5"]);
    }

    #[test]
    fn app_frame_detection() {
        let cleaner = cleaner();
        assert!(cleaner.is_app_frame("src/main.rs:1"));
        assert!(!cleaner.is_app_frame("lib/other.rs:1"));
        assert!(!cleaner.is_app_frame("2 x SELECT 1"));
    }
}
