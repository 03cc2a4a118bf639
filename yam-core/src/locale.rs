//! Locale documents and the global/page precedence merge.
//!
//! For a page rendered in locale `fr` the context is built from, lowest to
//! highest precedence:
//!
//! 1. `<source>/locales/default.yaml` (global default)
//! 2. `<source>/locales/fr.yaml` (global named, when present)
//! 3. `<page dir>/locales/fr.yaml` (page-local)
//!
//! Mappings merge key by key, any other value is replaced outright.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

use crate::config::BuildConfig;
use crate::discovery::{get_files, pattern_for};
use crate::error::BuildError;

/// A merged key/value tree for one locale.
#[derive(Debug, Clone, PartialEq)]
pub struct LocaleDocument(pub Value);

impl Default for LocaleDocument {
    fn default() -> Self {
        LocaleDocument(Value::Object(Map::new()))
    }
}

impl LocaleDocument {
    /// Read a YAML locale file. A missing or unparsable file yields an empty
    /// document, the render still goes ahead.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };

        match serde_yaml_ng::from_str::<Value>(&contents) {
            Ok(Value::Null) => Self::default(),
            Ok(value @ Value::Object(_)) => LocaleDocument(value),
            Ok(_) => {
                warn!(path = %path.display(), "locale file is not a mapping, ignoring it");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), "could not parse locale file: {e}");
                Self::default()
            }
        }
    }

    /// Overlay `other` on top of `self`.
    pub fn merged(mut self, other: &LocaleDocument) -> Self {
        merge_value(&mut self.0, &other.0);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// The three documents that feed one render.
#[derive(Debug, Clone, Default)]
pub struct LocaleContext {
    pub name: String,
    /// Global default overlaid with global named.
    pub globals: LocaleDocument,
    pub page: LocaleDocument,
}

impl LocaleContext {
    /// Everything merged with page-local winning.
    pub fn merged(&self) -> LocaleDocument {
        self.globals.clone().merged(&self.page)
    }
}

pub struct LocaleResolver<'a> {
    config: &'a BuildConfig,
}

impl<'a> LocaleResolver<'a> {
    pub fn new(config: &'a BuildConfig) -> Self {
        Self { config }
    }

    pub fn default_name(&self) -> &str {
        &self.config.options.locales.default
    }

    pub fn is_default(&self, name: &str) -> bool {
        name == self.default_name()
    }

    /// `<dir>/locales` for a template living in `dir`.
    pub fn page_locale_dir(&self, template_dir: &Path) -> PathBuf {
        template_dir.join(&self.config.options.locales.directory)
    }

    /// Page-local locale files next to a template, one per locale name and
    /// sorted by it. `fr.yaml` shadows `fr.yml`.
    pub fn page_locale_files(&self, template_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
        let dir = self.page_locale_dir(template_dir);
        let files = get_files(&[pattern_for(&dir, false, "yaml"), pattern_for(&dir, false, "yml")])?;

        let mut by_name: BTreeMap<String, PathBuf> = BTreeMap::new();
        for file in files {
            let preferred = file.extension().is_some_and(|ext| ext == "yaml");
            let name = Self::name_of(&file);
            if preferred || !by_name.contains_key(&name) {
                by_name.insert(name, file);
            }
        }
        Ok(by_name.into_values().collect())
    }

    pub fn page_locale_file(&self, template_dir: &Path, name: &str) -> Option<PathBuf> {
        let dir = self.page_locale_dir(template_dir);
        ["yaml", "yml"]
            .iter()
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
    }

    pub fn global_locale_file(&self, name: &str) -> Option<PathBuf> {
        ["yaml", "yml"]
            .iter()
            .map(|ext| self.config.paths.locales.join(format!("{name}.{ext}")))
            .find(|p| p.is_file())
    }

    /// Global default overlaid with the global document for `name`.
    pub fn globals(&self, name: &str) -> LocaleDocument {
        let default = self
            .global_locale_file(self.default_name())
            .map(|p| LocaleDocument::load(&p))
            .unwrap_or_default();

        if self.is_default(name) {
            return default;
        }

        match self.global_locale_file(name) {
            Some(path) => default.merged(&LocaleDocument::load(&path)),
            None => default,
        }
    }

    /// Build the context for `name`, reading the page-local document from
    /// `page_file` when given.
    pub fn resolve(&self, name: &str, page_file: Option<&Path>) -> LocaleContext {
        LocaleContext {
            name: name.to_string(),
            globals: self.globals(name),
            page: page_file.map(LocaleDocument::load).unwrap_or_default(),
        }
    }

    /// Locale name from a locale file path (`locales/fr.yaml` -> `fr`).
    pub fn name_of(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Is `path` inside the global locale directory?
    pub fn is_global(&self, path: &Path) -> bool {
        path.parent() == Some(self.config.paths.locales.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_precedence_page_over_named_over_default() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        write(dir.path(), "locales/default.yaml", "title: default\nonly_default: d\nnested: {a: 1, b: 1}\n");
        write(dir.path(), "locales/fr.yaml", "title: named\nonly_named: n\nnested: {b: 2}\n");
        let page = write(dir.path(), "pages/about/locales/fr.yaml", "title: page\n");

        let resolver = LocaleResolver::new(&config);
        let merged = resolver.resolve("fr", Some(&page)).merged();

        assert_eq!(merged.get("title"), Some(&json!("page")));
        assert_eq!(merged.get("only_default"), Some(&json!("d")));
        assert_eq!(merged.get("only_named"), Some(&json!("n")));
        assert_eq!(merged.get("nested"), Some(&json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_named_over_default_without_page() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        write(dir.path(), "locales/default.yaml", "title: default\n");
        write(dir.path(), "locales/fr.yaml", "title: named\n");

        let resolver = LocaleResolver::new(&config);
        assert_eq!(resolver.resolve("fr", None).merged().get("title"), Some(&json!("named")));
        assert_eq!(resolver.resolve("de", None).merged().get("title"), Some(&json!("default")));
    }

    #[test]
    fn test_missing_and_broken_files_are_empty() {
        let dir = TempDir::new().unwrap();
        let broken = write(dir.path(), "broken.yaml", "title: [unclosed\n");
        let list = write(dir.path(), "list.yaml", "- a\n- b\n");

        assert_eq!(LocaleDocument::load(&dir.path().join("missing.yaml")), LocaleDocument::default());
        assert_eq!(LocaleDocument::load(&broken), LocaleDocument::default());
        assert_eq!(LocaleDocument::load(&list), LocaleDocument::default());
    }

    #[test]
    fn test_page_locale_files_sorted() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        write(dir.path(), "pages/about/locales/fr.yaml", "");
        write(dir.path(), "pages/about/locales/default.yaml", "");

        let resolver = LocaleResolver::new(&config);
        let files = resolver.page_locale_files(&dir.path().join("pages/about")).unwrap();
        let names: Vec<String> = files.iter().map(|p| LocaleResolver::name_of(p)).collect();
        assert_eq!(names, vec!["default", "fr"]);
    }

    #[test]
    fn test_yaml_shadows_yml_for_the_same_locale() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        write(dir.path(), "pages/about/locales/fr.yml", "title: yml\n");
        let yaml = write(dir.path(), "pages/about/locales/fr.yaml", "title: yaml\n");
        let de = write(dir.path(), "pages/about/locales/de.yml", "");

        let resolver = LocaleResolver::new(&config);
        let files = resolver.page_locale_files(&dir.path().join("pages/about")).unwrap();
        assert_eq!(files, vec![de, yaml]);
    }
}
