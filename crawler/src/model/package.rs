//! The `pkg:<name>` record: which repositories reference a package, through
//! which files, with counters persisted for O(1) reads.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::store::codec::{CodecError, FieldKind, FieldValue};
use crate::store::entity::{Entity, FieldSpec, RecordState};

#[derive(Debug, Clone)]
pub struct Package {
    name: String,
    num_pyfiles: i64,
    num_reqfiles: i64,
    num_repos: i64,
    pyfiles: BTreeMap<String, BTreeSet<String>>,
    reqfiles: BTreeMap<String, String>,
    repos: BTreeSet<String>,
    updated: Option<DateTime<Utc>>,
    state: RecordState,
}

impl Package {
    pub fn num_repos(&self) -> i64 {
        self.num_repos
    }

    pub fn num_pyfiles(&self) -> i64 {
        self.num_pyfiles
    }

    pub fn num_reqfiles(&self) -> i64 {
        self.num_reqfiles
    }

    pub fn repos(&self) -> &BTreeSet<String> {
        &self.repos
    }

    pub fn pyfiles(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.pyfiles
    }

    pub fn reqfiles(&self) -> &BTreeMap<String, String> {
        &self.reqfiles
    }

    pub fn has_reqfile(&self, repo: &str) -> bool {
        self.reqfiles.contains_key(repo)
    }

    pub fn version_for(&self, repo: &str) -> Option<&str> {
        self.reqfiles.get(repo).map(String::as_str)
    }

    /// Attribute the package to a repository. Additive; counting happens
    /// only on first sight.
    pub fn add_repo(&mut self, repo: &str) {
        if self.repos.insert(repo.to_owned()) {
            self.num_repos += 1;
            self.state.set_change(&["repos", "num_repos"]);
        }
    }

    /// Record a source-file reference from `repo` at `path`.
    pub fn add_pyfile(&mut self, path: &str, repo: &str) {
        self.add_repo(repo);
        if self
            .pyfiles
            .entry(repo.to_owned())
            .or_default()
            .insert(path.to_owned())
        {
            self.num_pyfiles += 1;
            self.state.set_change(&["pyfiles", "num_pyfiles"]);
        }
    }

    /// Record the requirement-file constraint from `repo`; a later write for
    /// the same repo replaces the constraint without recounting.
    pub fn add_pkgver(&mut self, version: &str, repo: &str) {
        self.add_repo(repo);
        if !self.reqfiles.contains_key(repo) {
            self.num_reqfiles += 1;
            self.state.set_change(&["reqfiles", "num_reqfiles"]);
        } else {
            self.state.set_change(&["reqfiles"]);
        }
        self.reqfiles.insert(repo.to_owned(), version.to_owned());
    }
}

impl Entity for Package {
    const PREFIX: &'static str = "pkg";

    fn field_specs() -> &'static [FieldSpec] {
        &[
            FieldSpec { name: "num_pyfiles", kind: FieldKind::Num },
            FieldSpec { name: "num_reqfiles", kind: FieldKind::Num },
            FieldSpec { name: "num_repos", kind: FieldKind::Num },
            FieldSpec { name: "name", kind: FieldKind::Text },
            FieldSpec { name: "pyfiles", kind: FieldKind::Json },
            FieldSpec { name: "reqfiles", kind: FieldKind::Json },
            FieldSpec { name: "repos", kind: FieldKind::Json },
            FieldSpec { name: "updated", kind: FieldKind::Date },
        ]
    }

    fn with_name(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            num_pyfiles: 0,
            num_reqfiles: 0,
            num_repos: 0,
            pyfiles: BTreeMap::new(),
            reqfiles: BTreeMap::new(),
            repos: BTreeSet::new(),
            updated: None,
            state: RecordState::default(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &RecordState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut RecordState {
        &mut self.state
    }

    fn capture(&self, field: &str) -> Option<FieldValue> {
        match field {
            "name" => Some(FieldValue::Text(self.name.clone())),
            "num_pyfiles" => Some(FieldValue::Num(self.num_pyfiles)),
            "num_reqfiles" => Some(FieldValue::Num(self.num_reqfiles)),
            "num_repos" => Some(FieldValue::Num(self.num_repos)),
            "pyfiles" => serde_json::to_value(&self.pyfiles).ok().map(FieldValue::Json),
            "reqfiles" => serde_json::to_value(&self.reqfiles).ok().map(FieldValue::Json),
            "repos" => serde_json::to_value(&self.repos).ok().map(FieldValue::Json),
            "updated" => self.updated.map(FieldValue::Date),
            other => panic!("unknown field \"{other}\" for package record"),
        }
    }

    fn apply(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "name" => self.name = value.into_text()?.to_lowercase(),
            "num_pyfiles" => self.num_pyfiles = value.into_num()?,
            "num_reqfiles" => self.num_reqfiles = value.into_num()?,
            "num_repos" => self.num_repos = value.into_num()?,
            "pyfiles" => self.pyfiles = serde_json::from_value(value.into_json()?)?,
            "reqfiles" => self.reqfiles = serde_json::from_value(value.into_json()?)?,
            "repos" => self.repos = serde_json::from_value(value.into_json()?)?,
            "updated" => self.updated = Some(value.into_date()?),
            other => panic!("unknown field \"{other}\" for package record"),
        }
        Ok(())
    }

    fn updated(&self) -> Option<DateTime<Utc>> {
        self.updated
    }

    fn set_updated(&mut self, at: DateTime<Utc>) {
        self.updated = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_collections() {
        let mut pkg = Package::with_name("Flask");
        pkg.add_pyfile("main.py", "alice/app");
        pkg.add_pyfile("web/views.py", "alice/app");
        pkg.add_pyfile("main.py", "alice/app"); // duplicate
        pkg.add_pyfile("app.py", "bob/site");
        pkg.add_pkgver(">=2.0", "alice/app");
        pkg.add_pkgver(">=2.1", "alice/app"); // overwrite, not a recount

        assert_eq!(pkg.num_repos(), pkg.repos().len() as i64);
        assert_eq!(
            pkg.num_pyfiles(),
            pkg.pyfiles().values().map(|paths| paths.len() as i64).sum::<i64>()
        );
        assert_eq!(pkg.num_reqfiles(), pkg.reqfiles().len() as i64);
        assert_eq!(pkg.version_for("alice/app"), Some(">=2.1"));
    }

    #[test]
    fn names_are_case_folded() {
        let pkg = Package::with_name("Django");
        assert_eq!(pkg.name(), "django");
    }

    #[test]
    fn mutations_mark_dirty_fields() {
        let mut pkg = Package::with_name("requests");
        assert!(!pkg.state().has_changes());
        pkg.add_repo("alice/app");
        assert!(pkg.state().is_changed("repos"));
        assert!(pkg.state().is_changed("num_repos"));
        assert!(!pkg.state().is_changed("pyfiles"));
    }

    #[test]
    fn fields_round_trip_through_capture_and_apply() {
        let mut pkg = Package::with_name("numpy");
        pkg.add_pyfile("analysis/run.py", "carol/lab");
        pkg.add_pkgver("==1.24", "carol/lab");

        let mut copy = Package::with_name("numpy");
        for spec in Package::field_specs() {
            if let Some(value) = pkg.capture(spec.name) {
                copy.apply(spec.name, value).unwrap();
            }
        }
        assert_eq!(copy.repos(), pkg.repos());
        assert_eq!(copy.pyfiles(), pkg.pyfiles());
        assert_eq!(copy.reqfiles(), pkg.reqfiles());
        assert_eq!(copy.num_repos(), pkg.num_repos());
    }

    #[test]
    #[should_panic(expected = "unknown field")]
    fn unknown_fields_are_a_programming_error() {
        Package::with_name("flask").capture("nope");
    }
}
