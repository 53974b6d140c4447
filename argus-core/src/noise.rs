//! Path/extension noise suppression.
//!
//! The agent drops matching events before they ever reach the spool; the
//! server applies the same filter at query time so batches from agents
//! that predate the filter do not pollute dashboard results.

use std::collections::HashSet;
use std::path::Path;

/// Path fragments (matched case-insensitively against the full path) that
/// mark churn nobody wants to see: temp and cache trees, browser profile
/// data, build output, VCS internals, recycle bin, system volume info.
const NOISY_PATH_FRAGMENTS: &[&str] = &[
    "\\appdata\\local\\temp",
    "\\windows\\temp",
    "/tmp/",
    "/var/tmp/",
    "\\temporary internet files",
    "\\inetcache",
    "\\cache\\",
    "/cache/",
    "/.cache/",
    "\\code cache",
    "\\gpucache",
    "\\mozilla\\firefox\\profiles",
    "\\google\\chrome\\user data",
    "\\microsoft\\edge\\user data",
    "\\node_modules\\",
    "/node_modules/",
    "\\obj\\debug",
    "\\obj\\release",
    "\\bin\\debug",
    "\\bin\\release",
    "/target/debug",
    "/target/release",
    "\\.git\\",
    "/.git/",
    "\\.svn\\",
    "/.svn/",
    "\\.hg\\",
    "$recycle.bin",
    "system volume information",
];

/// Extensions of transient files: editor temps, locks, journals.
const NOISY_EXTENSIONS: &[&str] = &[
    "tmp",
    "temp",
    "crdownload",
    "partial",
    "part",
    "download",
    "lock",
    "lck",
    "journal",
    "wal",
    "shm",
    "db-journal",
    "swp",
    "swx",
    "etl",
    "regtrans-ms",
    "blf",
];

/// Suppression filter over full paths. Built-ins plus whatever the
/// deployment configures on top.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    fragments: Vec<String>,
    extensions: HashSet<String>,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl NoiseFilter {
    pub fn new() -> Self {
        Self {
            fragments: NOISY_PATH_FRAGMENTS.iter().map(|f| f.to_string()).collect(),
            extensions: NOISY_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Built-ins plus configured extra paths and extensions.
    pub fn with_extras(extra_paths: &[String], extra_extensions: &[String]) -> Self {
        let mut filter = Self::new();
        for p in extra_paths {
            filter.add_fragment(p);
        }
        for e in extra_extensions {
            filter.add_extension(e);
        }
        filter
    }

    pub fn add_fragment(&mut self, fragment: &str) {
        let lower = fragment.to_lowercase();
        if !lower.is_empty() && !self.fragments.contains(&lower) {
            self.fragments.push(lower);
        }
    }

    pub fn add_extension(&mut self, ext: &str) {
        self.extensions
            .insert(ext.trim_start_matches('.').to_lowercase());
    }

    /// True if the event at `path` should be dropped.
    pub fn is_noisy(&self, path: &str) -> bool {
        let lower = path.to_lowercase();

        if self.fragments.iter().any(|f| lower.contains(f.as_str())) {
            return true;
        }

        let p = Path::new(&lower);
        if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
            if self.extensions.contains(ext) {
                return true;
            }
        }

        // Hidden and editor-backup names.
        if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('~') || name.starts_with('.') {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_paths_are_noisy() {
        let filter = NoiseFilter::new();
        assert!(filter.is_noisy(r"C:\Users\u\AppData\Local\Temp\x.tmp"));
        assert!(filter.is_noisy("/tmp/build-artifact.o"));
        assert!(filter.is_noisy(r"C:\repo\.git\objects\ab\cdef"));
        assert!(filter.is_noisy(r"C:\$Recycle.Bin\S-1-5-21\file.docx"));
    }

    #[test]
    fn test_transient_extensions_are_noisy() {
        let filter = NoiseFilter::new();
        assert!(filter.is_noisy(r"C:\Users\u\Downloads\movie.mkv.crdownload"));
        assert!(filter.is_noisy("/home/u/docs/report.docx.swp"));
        assert!(filter.is_noisy(r"C:\data\app.db-journal"));
    }

    #[test]
    fn test_hidden_and_tilde_names_are_noisy() {
        let filter = NoiseFilter::new();
        assert!(filter.is_noisy(r"C:\Users\u\Documents\~$report.docx"));
        assert!(filter.is_noisy("/home/u/.bash_history_snapshot"));
    }

    #[test]
    fn test_real_documents_pass() {
        let filter = NoiseFilter::new();
        assert!(!filter.is_noisy(r"C:\Users\u\Desktop\report.docx"));
        assert!(!filter.is_noisy("/home/u/Documents/q3-figures.xlsx"));
    }

    #[test]
    fn test_configured_extras() {
        let filter = NoiseFilter::with_extras(
            &[r"D:\scratch".to_string()],
            &["bak".to_string(), ".old".to_string()],
        );
        assert!(filter.is_noisy(r"D:\Scratch\anything.txt"));
        assert!(filter.is_noisy("/home/u/data.bak"));
        assert!(filter.is_noisy("/home/u/config.old"));
    }
}
