//! Eligibility rules for walked entries.
//!
//! Rules run in a fixed order and the first rejection wins:
//!
//! 1. depth beyond `max_depth`
//! 2. dot-prefixed name when `ignore_dot_dirs` is set
//! 3. symbolic link when `follow_symlinks` is off
//! 4. any exclude glob or exclude regex
//! 5. include globs / include regexes (files only)
//!
//! Patterns match the path relative to the crawl root. A glob without a `/`
//! also matches the bare file name, so `secret.txt` excludes
//! `deep/dir/secret.txt`. Include globs and include regexes are applied
//! independently: when both are configured an entry must satisfy each.
//! Include rules never prune directories, otherwise `*.txt` could not
//! reach `docs/a.txt`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use regex::{RegexSet, RegexSetBuilder};

use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::models::{EntryKind, FileEntry, SkipReason};

pub struct PathFilter {
    max_depth: Option<usize>,
    ignore_dot_dirs: bool,
    follow_symlinks: bool,
    include_globs: PatternGlobs,
    exclude_globs: PatternGlobs,
    include_regex: Option<(RegexSet, Vec<String>)>,
    exclude_regex: Option<(RegexSet, Vec<String>)>,
}

/// Globs compiled twice: against the relative path and, for patterns
/// without a separator, against the file name.
struct PatternGlobs {
    patterns: Vec<String>,
    full: GlobSet,
    name: GlobSet,
    name_index: Vec<usize>,
}

impl PatternGlobs {
    fn build(patterns: &[String], case_insensitive: bool) -> Result<Self, CrawlError> {
        let mut full = GlobSetBuilder::new();
        let mut name = GlobSetBuilder::new();
        let mut name_index = Vec::new();
        for (i, pattern) in patterns.iter().enumerate() {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(case_insensitive)
                .build()
                .map_err(|e| CrawlError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
            full.add(glob.clone());
            if !pattern.contains('/') {
                name.add(glob);
                name_index.push(i);
            }
        }
        let build = |b: GlobSetBuilder| {
            b.build().map_err(|e| CrawlError::InvalidPattern {
                pattern: patterns.join(", "),
                message: e.to_string(),
            })
        };
        Ok(Self {
            patterns: patterns.to_vec(),
            full: build(full)?,
            name: build(name)?,
            name_index,
        })
    }

    fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The first pattern matching `relative` or `file_name`, if any.
    fn first_match(&self, relative: &str, file_name: &str) -> Option<&str> {
        if let Some(&i) = self.full.matches(relative).first() {
            return Some(&self.patterns[i]);
        }
        self.name
            .matches(file_name)
            .first()
            .map(|&i| self.patterns[self.name_index[i]].as_str())
    }
}

fn build_regex_set(
    patterns: &[String],
    case_insensitive: bool,
) -> Result<Option<(RegexSet, Vec<String>)>, CrawlError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let set = RegexSetBuilder::new(patterns)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| CrawlError::InvalidPattern {
            pattern: patterns.join(", "),
            message: e.to_string(),
        })?;
    Ok(Some((set, patterns.to_vec())))
}

impl PathFilter {
    pub fn new(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        let ci = config.case_insensitive;
        Ok(Self {
            max_depth: config.max_depth,
            ignore_dot_dirs: config.ignore_dot_dirs,
            follow_symlinks: config.follow_symlinks,
            include_globs: PatternGlobs::build(&config.include_patterns, ci)?,
            exclude_globs: PatternGlobs::build(&config.exclude_patterns, ci)?,
            include_regex: build_regex_set(&config.include_regex, ci)?,
            exclude_regex: build_regex_set(&config.exclude_regex, ci)?,
        })
    }

    pub fn should_visit(&self, entry: &FileEntry, depth: usize) -> bool {
        self.verdict(entry, depth).is_none()
    }

    /// `None` when `entry` passes every rule, otherwise the first rule
    /// that rejected it.
    pub fn verdict(&self, entry: &FileEntry, depth: usize) -> Option<SkipReason> {
        if let Some(max_depth) = self.max_depth {
            if depth > max_depth {
                return Some(SkipReason::DepthExceeded { depth, max_depth });
            }
        }

        let file_name = entry.file_name();
        if self.ignore_dot_dirs && file_name.starts_with('.') {
            return Some(SkipReason::Hidden);
        }

        if entry.kind == EntryKind::Symlink && !self.follow_symlinks {
            return Some(SkipReason::Symlink);
        }

        let relative = entry.relative.as_str();
        if let Some(pattern) = self.exclude_globs.first_match(relative, &file_name) {
            return Some(SkipReason::Excluded {
                pattern: pattern.to_string(),
            });
        }
        if let Some((set, patterns)) = &self.exclude_regex {
            if let Some(i) = set.matches(relative).into_iter().next() {
                return Some(SkipReason::Excluded {
                    pattern: patterns[i].clone(),
                });
            }
        }

        if entry.is_dir() {
            return None;
        }

        if !self.include_globs.is_empty()
            && self.include_globs.first_match(relative, &file_name).is_none()
        {
            return Some(SkipReason::NotIncluded);
        }
        if let Some((set, _)) = &self.include_regex {
            if !set.is_match(relative) {
                return Some(SkipReason::NotIncluded);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::path::PathBuf;

    fn entry(relative: &str, kind: EntryKind) -> FileEntry {
        let ts = DateTime::from_timestamp(0, 0).unwrap();
        FileEntry {
            path: PathBuf::from("/r").join(relative),
            relative: relative.to_string(),
            kind,
            depth: relative.split('/').count(),
            size: 0,
            created: ts,
            modified: ts,
            accessed: ts,
            symlink_target: None,
        }
    }

    fn filter(f: impl FnOnce(&mut CrawlerConfig)) -> PathFilter {
        let mut config = CrawlerConfig::default();
        f(&mut config);
        PathFilter::new(&config).unwrap()
    }

    #[test]
    fn default_filter_passes_plain_files() {
        let filter = filter(|_| {});
        assert!(filter.should_visit(&entry("a/b.txt", EntryKind::File), 2));
    }

    #[test]
    fn depth_rule_runs_first() {
        let filter = filter(|c| c.max_depth = Some(1));
        assert!(filter.should_visit(&entry("a", EntryKind::Directory), 1));
        assert_eq!(
            filter.verdict(&entry("a/b", EntryKind::Directory), 2),
            Some(SkipReason::DepthExceeded {
                depth: 2,
                max_depth: 1
            })
        );
    }

    #[test]
    fn dot_entries_are_hidden_unless_disabled() {
        let hidden = filter(|_| {});
        assert_eq!(
            hidden.verdict(&entry(".git", EntryKind::Directory), 1),
            Some(SkipReason::Hidden)
        );
        let visible = filter(|c| c.ignore_dot_dirs = false);
        assert!(visible.should_visit(&entry(".git", EntryKind::Directory), 1));
    }

    #[test]
    fn symlinks_rejected_when_not_followed() {
        let filter = filter(|_| {});
        assert_eq!(
            filter.verdict(&entry("link", EntryKind::Symlink), 1),
            Some(SkipReason::Symlink)
        );
    }

    #[test]
    fn exclude_beats_include() {
        let filter = filter(|c| {
            c.include_patterns = vec!["*.txt".into()];
            c.exclude_patterns = vec!["secret.txt".into()];
        });
        assert!(filter.should_visit(&entry("notes.txt", EntryKind::File), 1));
        assert_eq!(
            filter.verdict(&entry("secret.txt", EntryKind::File), 1),
            Some(SkipReason::Excluded {
                pattern: "secret.txt".into()
            })
        );
        assert!(!filter.should_visit(&entry("deep/dir/secret.txt", EntryKind::File), 3));
        assert_eq!(
            filter.verdict(&entry("image.png", EntryKind::File), 1),
            Some(SkipReason::NotIncluded)
        );
    }

    #[test]
    fn include_rules_do_not_prune_directories() {
        let filter = filter(|c| c.include_patterns = vec!["*.csv".into()]);
        assert!(filter.should_visit(&entry("data", EntryKind::Directory), 1));
        assert!(filter.should_visit(&entry("data/table.csv", EntryKind::File), 2));
    }

    #[test]
    fn glob_and_regex_includes_must_both_match() {
        let filter = filter(|c| {
            c.include_patterns = vec!["*.csv".into()];
            c.include_regex = vec![r"^2024/".into()];
        });
        assert!(filter.should_visit(&entry("2024/a.csv", EntryKind::File), 2));
        assert!(!filter.should_visit(&entry("2023/a.csv", EntryKind::File), 2));
        assert!(!filter.should_visit(&entry("2024/a.txt", EntryKind::File), 2));
    }

    #[test]
    fn exclude_regex_prunes_directories() {
        let filter = filter(|c| c.exclude_regex = vec![r"(^|/)tmp($|/)".into()]);
        assert!(!filter.should_visit(&entry("build/tmp", EntryKind::Directory), 2));
    }

    #[test]
    fn matching_is_case_sensitive_by_default() {
        let sensitive = filter(|c| c.exclude_patterns = vec!["*.log".into()]);
        assert!(sensitive.should_visit(&entry("RUN.LOG", EntryKind::File), 1));
        let insensitive = filter(|c| {
            c.exclude_patterns = vec!["*.log".into()];
            c.case_insensitive = true;
        });
        assert!(!insensitive.should_visit(&entry("RUN.LOG", EntryKind::File), 1));
    }

    #[test]
    fn invalid_glob_is_reported() {
        let mut config = CrawlerConfig::default();
        config.exclude_patterns = vec!["a[".into()];
        assert!(matches!(
            PathFilter::new(&config),
            Err(CrawlError::InvalidPattern { .. })
        ));
    }
}
