//! Python source files, analysed line by line without a full parser.

use serde_json::{json, Value};

use super::text::{decode_lossy, preview};
use super::{Extractor, Sniff};
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

const STANDARD_LIBRARY: &[&str] = &[
    "abc", "argparse", "ast", "asyncio", "base64", "collections", "concurrent", "contextlib",
    "copy", "csv", "dataclasses", "datetime", "decimal", "difflib", "enum", "functools", "glob",
    "gzip", "hashlib", "http", "importlib", "inspect", "io", "itertools", "json", "logging",
    "math", "multiprocessing", "os", "pathlib", "pickle", "random", "re", "shutil", "signal",
    "socket", "sqlite3", "statistics", "string", "subprocess", "sys", "tempfile", "threading",
    "time", "traceback", "typing", "unittest", "urllib", "uuid", "warnings", "weakref", "xml",
    "zipfile",
];

const DOCSTRING_PREVIEW_CHARS: usize = 500;

pub struct SourceExtractor;

impl SourceExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SourceExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for SourceExtractor {
    fn name(&self) -> &str {
        "python"
    }

    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool {
        entry.has_extension(&["py", "pyi", "pyw", "pyx"])
            || matches!(sniff.mime(), "text/x-python" | "text/x-script.python")
            || (sniff.starts_with(b"#!") && first_line(sniff.head()).contains("python"))
    }

    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
        let bytes =
            std::fs::read(&entry.path).map_err(|e| ExtractionError::unreadable(&entry.path, &e))?;
        let source = decode_lossy(&bytes);
        let outline = Outline::scan(&source);

        let mut fields = Fields::new();
        fields.insert("line_count".into(), Value::from(source.lines().count()));
        fields.insert("char_count".into(), Value::from(source.chars().count()));
        fields.insert("comment_lines".into(), Value::from(outline.comment_lines));
        fields.insert(
            "has_module_docstring".into(),
            Value::Bool(outline.docstring.is_some()),
        );
        if let Some(doc) = outline.docstring {
            fields.insert(
                "module_docstring".into(),
                Value::String(preview(doc.trim(), DOCSTRING_PREVIEW_CHARS)),
            );
        }
        fields.insert("imports".into(), outline.imports.to_json());
        fields.insert("classes".into(), json!(outline.classes));
        fields.insert("functions".into(), json!(outline.functions));
        fields.insert("has_main_guard".into(), Value::Bool(outline.main_guard));
        Ok(fields)
    }
}

fn first_line(head: &[u8]) -> String {
    let end = head.iter().position(|&b| b == b'\n').unwrap_or(head.len());
    String::from_utf8_lossy(&head[..end]).into_owned()
}

#[derive(Debug, Default)]
struct Imports {
    standard_library: Vec<String>,
    third_party: Vec<String>,
    local: Vec<String>,
}

impl Imports {
    fn add(&mut self, module: &str) {
        let module = module.trim();
        if module.is_empty() {
            return;
        }
        let top = module.split('.').next().unwrap_or(module);
        let bucket = if module.starts_with('.') {
            &mut self.local
        } else if STANDARD_LIBRARY.contains(&top) {
            &mut self.standard_library
        } else {
            &mut self.third_party
        };
        if !bucket.iter().any(|m| m == module) {
            bucket.push(module.to_string());
        }
    }

    fn to_json(&self) -> Value {
        json!({
            "standard_library": self.standard_library,
            "third_party": self.third_party,
            "local": self.local,
        })
    }
}

#[derive(Debug, Default)]
struct Outline<'a> {
    docstring: Option<&'a str>,
    imports: Imports,
    classes: Vec<String>,
    functions: Vec<String>,
    main_guard: bool,
    comment_lines: usize,
}

fn identifier(s: &str) -> Option<String> {
    let name: String = s
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

fn string_delimiter(s: &str) -> Option<&'static str> {
    let s = s.trim_start_matches(['r', 'R', 'u', 'U', 'b', 'B']);
    if s.starts_with("\"\"\"") {
        Some("\"\"\"")
    } else if s.starts_with("'''") {
        Some("'''")
    } else {
        None
    }
}

impl<'a> Outline<'a> {
    fn scan(source: &'a str) -> Self {
        let mut outline = Outline {
            docstring: module_docstring(source),
            ..Outline::default()
        };
        let mut open_string: Option<&str> = None;

        for line in source.lines() {
            let trimmed = line.trim_start();
            if let Some(delim) = open_string {
                if trimmed.contains(delim) {
                    open_string = None;
                }
                continue;
            }
            if trimmed.starts_with('#') {
                outline.comment_lines += 1;
                continue;
            }
            if let Some(delim) = ["\"\"\"", "'''"].into_iter().find(|d| trimmed.contains(d)) {
                if trimmed.matches(delim).count() % 2 == 1 {
                    open_string = Some(delim);
                }
            }

            let top_level = !line.starts_with([' ', '\t']);
            if let Some(rest) = trimmed.strip_prefix("import ") {
                for item in rest.split(',') {
                    let module = item.split(" as ").next().unwrap_or(item);
                    outline.imports.add(module);
                }
            } else if let Some(rest) = trimmed.strip_prefix("from ") {
                if let Some(module) = rest.split_whitespace().next() {
                    outline.imports.add(module);
                }
            } else if top_level {
                if let Some(rest) = trimmed.strip_prefix("class ") {
                    outline.classes.extend(identifier(rest));
                } else if let Some(rest) = trimmed
                    .strip_prefix("def ")
                    .or_else(|| trimmed.strip_prefix("async def "))
                {
                    outline.functions.extend(identifier(rest));
                } else if trimmed.starts_with("if __name__") && trimmed.contains("__main__") {
                    outline.main_guard = true;
                }
            }
        }
        outline
    }
}

/// The body of a string literal that is the first statement of the module.
fn module_docstring(source: &str) -> Option<&str> {
    let start = source
        .lines()
        .map(str::trim_start)
        .find(|l| !l.is_empty() && !l.starts_with('#'))?;
    let delim = string_delimiter(start)?;
    let offset = start.as_ptr() as usize - source.as_ptr() as usize;
    let after_prefix = &source[offset..];
    let body_start = after_prefix.find(delim)? + delim.len();
    let body = &after_prefix[body_start..];
    let end = body.find(delim)?;
    Some(&body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::test_support::entry_for;

    const SAMPLE: &str = r#"#!/usr/bin/env python3
"""Crawl helper.

Walks things.
"""
import os, sys as system
import numpy as np
from .util import helper
from pathlib import Path

# module constant
LIMIT = 3


class Walker:
    def walk(self):
        import json
        return json


async def fetch():
    """Not a module docstring."""
    pass


def main():
    pass


if __name__ == "__main__":
    main()
"#;

    #[test]
    fn outline_of_a_module() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("walker.py");
        std::fs::write(&path, SAMPLE).unwrap();
        let fields = SourceExtractor::new().extract(&entry_for(&path)).unwrap();

        assert_eq!(fields["has_module_docstring"], true);
        assert_eq!(fields["module_docstring"], "Crawl helper.\n\nWalks things.");
        assert_eq!(
            fields["imports"]["standard_library"],
            json!(["os", "sys", "pathlib", "json"])
        );
        assert_eq!(fields["imports"]["third_party"], json!(["numpy"]));
        assert_eq!(fields["imports"]["local"], json!([".util"]));
        assert_eq!(fields["classes"], json!(["Walker"]));
        assert_eq!(fields["functions"], json!(["fetch", "main"]));
        assert_eq!(fields["has_main_guard"], true);
        assert_eq!(fields["comment_lines"], 2);
    }

    #[test]
    fn shebang_claims_extensionless_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool");
        std::fs::write(&path, "#!/usr/bin/python\nprint('hi')\n").unwrap();
        let entry = entry_for(&path);
        let sniff = Sniff::read(&entry).unwrap();
        assert!(SourceExtractor::new().can_handle(&entry, &sniff));
    }

    #[test]
    fn no_docstring_when_code_comes_first() {
        assert_eq!(module_docstring("x = 1\n\"\"\"late\"\"\"\n"), None);
    }
}
