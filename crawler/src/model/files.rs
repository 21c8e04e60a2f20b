//! File classification, content retraction and package-name extraction.
//!
//! Only two kinds of file matter to the crawl: Python sources and
//! `requirements.txt`. Contents are retracted down to their significant
//! lines on ingest so records stay small and re-parsing stays cheap.

use std::collections::{BTreeMap, BTreeSet};

use fancy_regex::Regex as FancyRegex;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const SOURCE_SUFFIX: &str = ".py";
pub const REQUIREMENTS_BASENAME: &str = "requirements.txt";

// Import-bearing statements, including backslash line continuations.
static SOURCE_LINES: Lazy<FancyRegex> = Lazy::new(|| {
    FancyRegex::new(r"(?s)(?:^|\n)\s*((?:import|from).+?(?<!\\)(?=\n|$))").unwrap()
});

// Non-comment requirement lines, stopping before trailing inline comments.
static REQUIREMENT_LINES: Lazy<FancyRegex> = Lazy::new(|| {
    FancyRegex::new(r"(?s)(?:^|\n)\s*(?!#)\s*([^\s].*?)(?<!\\)(?= #|\n|$)").unwrap()
});

// The module list of an import statement: everything between the keyword and
// a trailing `import`, an unescaped newline, or the end of input.
static SOURCE_MODULES: Lazy<FancyRegex> = Lazy::new(|| {
    FancyRegex::new(r"(?s)(?:^|\n)\s*(?:from|import) +(.+?)(?= +import|(?<!\\)\n|$)").unwrap()
});

// `name[extras]constraint` requirement lines; both extras and constraint are
// optional and anything else on the line is ignored.
static REQUIREMENT_PACKAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^\s*([A-Za-z_][A-Za-z0-9_-]*)(?:\s*\[[\w\s,-]+\])?(\s*[!~<=>]{1,2}\s*\d+(?:\.\d+)*(?:\s*,\s*[!~<=>]{1,2}\s*\d+(?:\.\d+)*)*)?",
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Source,
    Requirements,
}

pub fn is_source_file(path: &str) -> bool {
    path.to_lowercase().ends_with(SOURCE_SUFFIX)
}

pub fn is_requirements_file(path: &str) -> bool {
    basename(path).eq_ignore_ascii_case(REQUIREMENTS_BASENAME)
}

pub fn classify(path: &str) -> Option<FileKind> {
    if is_source_file(path) {
        Some(FileKind::Source)
    } else if is_requirements_file(path) {
        Some(FileKind::Requirements)
    } else {
        None
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The package name a repository-local path implies: the top-level directory,
/// or the file's stem (sources) / basename when the file sits at the root.
pub fn package_name_from_path(path: &str) -> String {
    match path.rsplit_once('/') {
        None | Some(("" | "/", _)) => {
            let base = basename(path);
            let name = if is_source_file(base) {
                &base[..base.len() - SOURCE_SUFFIX.len()]
            } else {
                base
            };
            name.to_lowercase()
        }
        Some((dirs, _)) => {
            let mut parts = dirs.split('/');
            let first = parts.next().unwrap_or("");
            let name = if first.is_empty() {
                parts.next().unwrap_or("")
            } else {
                first
            };
            name.to_lowercase()
        }
    }
}

/// Reduce content to its significant lines for the given kind.
pub fn retract_content(content: &str, kind: FileKind) -> String {
    let finder = match kind {
        FileKind::Source => &*SOURCE_LINES,
        FileKind::Requirements => &*REQUIREMENT_LINES,
    };
    finder
        .captures_iter(content)
        .filter_map(|captures| captures.ok())
        .filter_map(|captures| captures.get(1))
        .map(|matched| matched.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Top-level module names imported by a Python source. Relative imports are
/// dropped, aliases stripped, names lowercased.
pub fn parse_source_imports(content: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for captures in SOURCE_MODULES.captures_iter(content) {
        let Ok(captures) = captures else { continue };
        let Some(modules) = captures.get(1) else { continue };
        let modules = modules.as_str().replace('\\', " ");
        if modules.trim_start().starts_with('.') {
            continue;
        }
        for part in modules.split(',') {
            let part = match part.split_once(" as ") {
                Some((module, _alias)) => module,
                None => part,
            };
            let name = part.split('.').next().unwrap_or("").trim().to_lowercase();
            if !name.is_empty() {
                names.insert(name);
            }
        }
    }
    names
}

/// `name -> version constraint` pairs of a requirements file; later entries
/// for the same name overwrite earlier ones.
pub fn parse_requirements(content: &str) -> BTreeMap<String, String> {
    REQUIREMENT_PACKAGE
        .captures_iter(content)
        .map(|captures| {
            let name = captures[1].trim().to_lowercase();
            let version = captures
                .get(2)
                .map(|constraint| constraint.as_str().trim().to_owned())
                .unwrap_or_default();
            (name, version)
        })
        .collect()
}

/// The retracted files of one repository: source files by path, plus at most
/// one requirements file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoFiles {
    #[serde(rename = "pyfile", default)]
    sources: BTreeMap<String, String>,
    #[serde(rename = "reqfile", default)]
    requirements: BTreeMap<String, String>,
}

impl RepoFiles {
    /// Whether the crawl wants this path at all.
    pub fn expects(path: &str) -> bool {
        classify(path).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.requirements.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        match classify(path) {
            Some(FileKind::Source) => self.sources.contains_key(path),
            Some(FileKind::Requirements) => self.requirements.contains_key(path),
            None => false,
        }
    }

    /// Retract and store a file. Requirement files keep exactly one entry,
    /// last write wins. Returns false for paths of no interest.
    pub fn insert(&mut self, path: &str, content: &str) -> bool {
        let Some(kind) = classify(path) else {
            return false;
        };
        let retracted = retract_content(content, kind);
        match kind {
            FileKind::Source => {
                self.sources.insert(path.to_owned(), retracted);
            }
            FileKind::Requirements => {
                self.requirements.clear();
                self.requirements.insert(path.to_owned(), retracted);
            }
        }
        true
    }

    pub fn sources(&self) -> impl Iterator<Item = (&String, &String)> + '_ {
        self.sources.iter()
    }

    pub fn requirement(&self) -> Option<(&String, &String)> {
        self.requirements.iter().next()
    }

    /// Names owned by the repository's own source layout; excluded from
    /// external attribution.
    pub fn local_packages(&self) -> BTreeSet<String> {
        self.sources
            .keys()
            .map(|path| package_name_from_path(path))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_paths() {
        assert_eq!(classify("main.py"), Some(FileKind::Source));
        assert_eq!(classify("src/app/Views.PY"), Some(FileKind::Source));
        assert_eq!(classify("requirements.txt"), Some(FileKind::Requirements));
        assert_eq!(classify("deploy/Requirements.TXT"), Some(FileKind::Requirements));
        assert_eq!(classify("dev-requirements.txt"), None);
        assert_eq!(classify("README.md"), None);
        assert_eq!(classify("setup.cfg"), None);
    }

    #[test]
    fn local_name_comes_from_the_top_of_the_path() {
        assert_eq!(package_name_from_path("main.py"), "main");
        assert_eq!(package_name_from_path("Foo/bar.py"), "foo");
        assert_eq!(package_name_from_path("foo/sub/deep.py"), "foo");
        assert_eq!(package_name_from_path("/foo/bar.py"), "foo");
        assert_eq!(package_name_from_path("requirements.txt"), "requirements.txt");
    }

    #[test]
    fn retracts_import_lines_only() {
        let content = "import os\nx = 1\nfrom a.b import c\n\ndef f():\n    import json\n";
        assert_eq!(
            retract_content(content, FileKind::Source),
            "import os\nfrom a.b import c\nimport json"
        );
    }

    #[test]
    fn retraction_keeps_continuations() {
        let content = "from pkg import a, \\\n    b\nprint('hi')\n";
        assert_eq!(
            retract_content(content, FileKind::Source),
            "from pkg import a, \\\n    b"
        );
    }

    #[test]
    fn retracts_requirement_lines() {
        let content = "Django>=3.0\nnumpy\n# comment\n\nflask # pinned later\n";
        assert_eq!(
            retract_content(content, FileKind::Requirements),
            "Django>=3.0\nnumpy\nflask"
        );
    }

    #[test]
    fn parses_import_statements() {
        let names = parse_source_imports("import flask\nfrom requests import get");
        assert_eq!(names, BTreeSet::from(["flask".to_owned(), "requests".to_owned()]));
    }

    #[test]
    fn parses_aliases_lists_and_dotted_modules() {
        let names =
            parse_source_imports("import numpy as np, pandas.io\nfrom django.conf import settings");
        assert_eq!(
            names,
            BTreeSet::from(["numpy".to_owned(), "pandas".to_owned(), "django".to_owned()])
        );
    }

    #[test]
    fn drops_relative_imports() {
        let names = parse_source_imports("from . import models\nfrom .utils import helper");
        assert!(names.is_empty());
    }

    #[test]
    fn parses_requirement_constraints() {
        let parsed = parse_requirements("Django>=3.0\nnumpy\n");
        assert_eq!(parsed["django"], ">=3.0");
        assert_eq!(parsed["numpy"], "");
    }

    #[test]
    fn parses_extras_and_ranges() {
        let parsed = parse_requirements("celery[redis] >=4.0, <5.0\nrequests==2.31.0\n");
        assert_eq!(parsed["celery"], ">=4.0, <5.0");
        assert_eq!(parsed["requests"], "==2.31.0");
    }

    #[test]
    fn later_requirement_entries_win() {
        let files = {
            let mut files = RepoFiles::default();
            files.insert("requirements.txt", "flask==1.0\nflask==2.0\n");
            files
        };
        let (_, content) = files.requirement().unwrap();
        assert_eq!(parse_requirements(content)["flask"], "==2.0");
    }

    #[test]
    fn one_requirements_file_per_repo() {
        let mut files = RepoFiles::default();
        files.insert("requirements.txt", "flask\n");
        files.insert("deploy/requirements.txt", "numpy\n");
        let (path, _) = files.requirement().unwrap();
        assert_eq!(path, "deploy/requirements.txt");
        assert_eq!(files.requirements.len(), 1);
    }

    #[test]
    fn unexpected_paths_are_rejected() {
        let mut files = RepoFiles::default();
        assert!(!files.insert("Makefile", "all:\n"));
        assert!(files.is_empty());
    }

    #[test]
    fn local_packages_come_from_source_paths() {
        let mut files = RepoFiles::default();
        files.insert("foo/bar.py", "import foo\n");
        files.insert("main.py", "import flask\n");
        assert_eq!(
            files.local_packages(),
            BTreeSet::from(["foo".to_owned(), "main".to_owned()])
        );
    }
}
