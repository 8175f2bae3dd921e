//! Capped log reads and the search-pattern DoS guard (spec.md §4.7). Ground
//! truth: `examples/original_source/gateway-sidecar/tests/test_log_endpoints.py::TestLogReader`.

use std::path::Path;

use regex::Regex;

use crate::errors::LogError;

/// Maximum search pattern length accepted before compilation.
const MAX_PATTERN_LEN: usize = 500;
/// Maximum number of capture groups (approximated by counting `(`) a
/// pattern may contain before compilation.
const MAX_CAPTURE_GROUPS: usize = 10;

/// The result of reading a log file, possibly truncated to the configured
/// line cap.
#[derive(Debug, Clone)]
pub struct LogReadResult {
    /// Lines read, in file order.
    pub lines: Vec<String>,
    /// Whether the file had more lines than `max_lines` allowed.
    pub truncated: bool,
}

/// Reads log files with a hard cap on lines returned.
#[derive(Debug, Clone, Copy)]
pub struct LogReader {
    max_lines: usize,
}

impl LogReader {
    /// Construct a reader capping reads at `max_lines`.
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        Self { max_lines }
    }

    /// Read `path`, capping at the configured line count. Returns `Ok(None)`
    /// if the file does not exist.
    pub fn read(&self, path: &Path) -> Result<Option<LogReadResult>, LogError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(LogError::Io)?;
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
        let truncated = lines.len() > self.max_lines;
        if truncated {
            lines.truncate(self.max_lines);
        }
        Ok(Some(LogReadResult { lines, truncated }))
    }
}

/// Reject a search pattern before attempting to compile it, guarding
/// against catastrophic-backtracking or memory-exhaustion patterns: too
/// long, or with too many capture groups.
pub fn validate_search_pattern(pattern: &str) -> Result<(), LogError> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(LogError::PatternRejected(format!(
            "pattern exceeds {MAX_PATTERN_LEN} characters"
        )));
    }
    let open_parens = pattern.chars().filter(|&c| c == '(').count();
    if open_parens > MAX_CAPTURE_GROUPS {
        return Err(LogError::PatternRejected(format!(
            "pattern has more than {MAX_CAPTURE_GROUPS} groups"
        )));
    }
    Ok(())
}

/// Compile a validated search pattern and return matching lines from
/// `lines`.
pub fn search_lines(pattern: &str, lines: &[String]) -> Result<Vec<String>, LogError> {
    validate_search_pattern(pattern)?;
    let regex = Regex::new(pattern).map_err(|e| LogError::PatternRejected(e.to_string()))?;
    Ok(lines.iter().filter(|line| regex.is_match(line)).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_nonexistent_file_returns_none() {
        let reader = LogReader::new(100);
        assert!(reader.read(Path::new("/nonexistent/file.log")).unwrap().is_none());
    }

    #[test]
    fn read_caps_lines_and_flags_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line1\nline2\nline3\nline4\n").unwrap();

        let reader = LogReader::new(2);
        let result = reader.read(&path).unwrap().unwrap();
        assert_eq!(result.lines, vec!["line1".to_string(), "line2".to_string()]);
        assert!(result.truncated);
    }

    #[test]
    fn read_under_cap_is_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line1\nline2\n").unwrap();

        let reader = LogReader::new(10);
        let result = reader.read(&path).unwrap().unwrap();
        assert!(!result.truncated);
    }

    #[test]
    fn validate_accepts_simple_patterns() {
        assert!(validate_search_pattern("error").is_ok());
        assert!(validate_search_pattern("error|warning").is_ok());
    }

    #[test]
    fn validate_rejects_overlong_pattern() {
        let pattern = "a".repeat(600);
        let err = validate_search_pattern(&pattern).unwrap_err();
        assert!(matches!(err, LogError::PatternRejected(_)));
    }

    #[test]
    fn validate_rejects_too_many_capture_groups() {
        let pattern = "(".repeat(14);
        let err = validate_search_pattern(&pattern).unwrap_err();
        assert!(matches!(err, LogError::PatternRejected(_)));
    }

    #[test]
    fn search_lines_filters_by_pattern() {
        let lines = vec!["all good".to_string(), "an error occurred".to_string()];
        let matches = search_lines("error", &lines).unwrap();
        assert_eq!(matches, vec!["an error occurred".to_string()]);
    }
}
