//! The `repo:<full_name>` record: the discovery stub, the retracted files
//! collected by the walker, and the package aggregation pass.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::store::codec::{CodecError, FieldKind, FieldValue};
use crate::store::entity::{Entity, FieldSpec, RecordState};
use crate::store::{Store, StoreError};

use super::files::{parse_requirements, parse_source_imports, RepoFiles};
use super::package::Package;

#[derive(Debug, Clone)]
pub struct Repository {
    name: String,
    id: Option<String>,
    url: Option<String>,
    contents_url: Option<String>,
    retrieved: bool,
    files: RepoFiles,
    packages: Vec<String>,
    updated: Option<DateTime<Utc>>,
    state: RecordState,
}

/// External references collected from one repository's files, in the order
/// they will be attributed.
#[derive(Debug, Default, PartialEq)]
struct ExternalReferences {
    sources: Vec<(String, String)>, // (package, path)
    requirements: Vec<(String, String)>, // (package, version constraint)
}

impl Repository {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn contents_url(&self) -> Option<&str> {
        self.contents_url.as_deref()
    }

    pub fn retrieved(&self) -> bool {
        self.retrieved
    }

    pub fn files(&self) -> &RepoFiles {
        &self.files
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn set_id(&mut self, id: &str) {
        if self.id.as_deref() != Some(id) {
            self.id = Some(id.to_owned());
            self.state.set_change(&["id"]);
        }
    }

    pub fn set_url(&mut self, url: &str) {
        if self.url.as_deref() != Some(url) {
            self.url = Some(url.to_owned());
            self.state.set_change(&["url"]);
        }
    }

    pub fn set_contents_url(&mut self, contents_url: &str) {
        if self.contents_url.as_deref() != Some(contents_url) {
            self.contents_url = Some(contents_url.to_owned());
            self.state.set_change(&["contents_url"]);
        }
    }

    pub fn set_retrieved(&mut self, retrieved: bool) {
        if self.retrieved != retrieved {
            self.retrieved = retrieved;
            self.state.set_change(&["retrieved"]);
        }
    }

    /// Retract and attach a file the classifier accepts. Returns false for
    /// paths of no interest.
    pub fn add_file(&mut self, path: &str, content: &str) -> bool {
        if self.files.insert(path, content) {
            self.state.set_change(&["files"]);
            true
        } else {
            false
        }
    }

    fn external_references(&self) -> ExternalReferences {
        let local = self.files.local_packages();
        let mut refs = ExternalReferences::default();
        for (path, content) in self.files.sources() {
            for name in parse_source_imports(content) {
                if !name.is_empty() && !local.contains(&name) {
                    refs.sources.push((name, path.clone()));
                }
            }
        }
        if let Some((_, content)) = self.files.requirement() {
            for (name, version) in parse_requirements(content) {
                if !name.is_empty() && !local.contains(&name) {
                    refs.requirements.push((name, version));
                }
            }
        }
        refs
    }

    /// Attribute every external package referenced by the attached files,
    /// commit the touched package records, and remember the name set on the
    /// repository in first-observation order.
    pub async fn find_packages(&mut self, store: &Store) -> Result<(), StoreError> {
        let refs = self.external_references();
        let mut touched: Vec<Package> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();

        for (name, path) in &refs.sources {
            let index = match by_name.get(name) {
                Some(index) => *index,
                None => {
                    touched.push(store.load::<Package>(name).await?);
                    by_name.insert(name.clone(), touched.len() - 1);
                    touched.len() - 1
                }
            };
            touched[index].add_pyfile(path, &self.name);
        }

        for (name, version) in &refs.requirements {
            let index = match by_name.get(name) {
                Some(index) => *index,
                None => {
                    touched.push(store.load::<Package>(name).await?);
                    by_name.insert(name.clone(), touched.len() - 1);
                    touched.len() - 1
                }
            };
            touched[index].add_pkgver(version, &self.name);
        }

        for package in &mut touched {
            store.commit_changes(package).await?;
        }
        debug!(repo = %self.name, packages = touched.len(), "attributed external packages");

        self.packages = touched.iter().map(|pkg| pkg.name().to_owned()).collect();
        self.state.set_change(&["packages"]);
        Ok(())
    }
}

impl Entity for Repository {
    const PREFIX: &'static str = "repo";

    fn field_specs() -> &'static [FieldSpec] {
        &[
            FieldSpec { name: "retrieved", kind: FieldKind::Num },
            FieldSpec { name: "name", kind: FieldKind::Text },
            FieldSpec { name: "id", kind: FieldKind::Text },
            FieldSpec { name: "url", kind: FieldKind::Text },
            FieldSpec { name: "contents_url", kind: FieldKind::Text },
            FieldSpec { name: "files", kind: FieldKind::Json },
            FieldSpec { name: "packages", kind: FieldKind::Json },
            FieldSpec { name: "updated", kind: FieldKind::Date },
        ]
    }

    fn with_name(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            id: None,
            url: None,
            contents_url: None,
            retrieved: false,
            files: RepoFiles::default(),
            packages: Vec::new(),
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
            "id" => self.id.clone().map(FieldValue::Text),
            "url" => self.url.clone().map(FieldValue::Text),
            "contents_url" => self.contents_url.clone().map(FieldValue::Text),
            "retrieved" => Some(FieldValue::Num(i64::from(self.retrieved))),
            "files" => serde_json::to_value(&self.files).ok().map(FieldValue::Json),
            "packages" => serde_json::to_value(&self.packages).ok().map(FieldValue::Json),
            "updated" => self.updated.map(FieldValue::Date),
            other => panic!("unknown field \"{other}\" for repository record"),
        }
    }

    fn apply(&mut self, field: &str, value: FieldValue) -> Result<(), CodecError> {
        match field {
            "name" => self.name = value.into_text()?.to_lowercase(),
            "id" => self.id = Some(value.into_text()?),
            "url" => self.url = Some(value.into_text()?),
            "contents_url" => self.contents_url = Some(value.into_text()?),
            "retrieved" => self.retrieved = value.into_num()? != 0,
            "files" => self.files = serde_json::from_value(value.into_json()?)?,
            "packages" => self.packages = serde_json::from_value(value.into_json()?)?,
            "updated" => self.updated = Some(value.into_date()?),
            other => panic!("unknown field \"{other}\" for repository record"),
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
    fn fresh_records_match_field_for_field() {
        let first = Repository::with_name("Alice/App");
        let second = Repository::with_name("alice/app");
        assert_eq!(first.name(), second.name());
        for spec in Repository::field_specs() {
            assert_eq!(
                first.capture(spec.name),
                second.capture(spec.name),
                "field {} differs",
                spec.name
            );
        }
    }

    #[test]
    fn setters_track_changes_and_skip_no_ops() {
        let mut repo = Repository::with_name("alice/app");
        repo.set_id("42");
        repo.set_url("https://api.github.com/repos/alice/app");
        assert!(repo.state().is_changed("id"));
        assert!(repo.state().is_changed("url"));
        assert!(!repo.state().is_changed("retrieved"));

        let mut quiet = Repository::with_name("alice/app");
        quiet.set_retrieved(false); // already the default
        assert!(!quiet.state().has_changes());
    }

    #[test]
    fn local_packages_are_not_attributed() {
        let mut repo = Repository::with_name("alice/app");
        repo.add_file("foo/bar.py", "import foo\nimport flask\n");
        let refs = repo.external_references();
        assert_eq!(
            refs.sources,
            vec![("flask".to_owned(), "foo/bar.py".to_owned())]
        );
    }

    #[test]
    fn references_cover_sources_and_requirements() {
        let mut repo = Repository::with_name("alice/app");
        repo.add_file("main.py", "import flask\nfrom requests import get");
        repo.add_file("requirements.txt", "Django>=3.0\nnumpy\n# comment\n");
        let refs = repo.external_references();
        assert_eq!(
            refs.sources,
            vec![
                ("flask".to_owned(), "main.py".to_owned()),
                ("requests".to_owned(), "main.py".to_owned()),
            ]
        );
        assert_eq!(
            refs.requirements,
            vec![
                ("django".to_owned(), ">=3.0".to_owned()),
                ("numpy".to_owned(), String::new()),
            ]
        );
    }

    #[test]
    fn capture_skips_unset_fields() {
        let repo = Repository::with_name("alice/app");
        assert!(repo.capture("id").is_none());
        assert!(repo.capture("contents_url").is_none());
        assert!(repo.capture("retrieved").is_some());
        assert!(repo.capture("files").is_some());
    }
}
