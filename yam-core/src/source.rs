use std::path::{Path, PathBuf};

use crate::config::BuildConfig;

/// A path plus the metadata every compiler asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub extension: String,
    pub dir: PathBuf,
    pub stem: String,
    pub is_partial: bool,
}

impl SourceFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

        Self {
            is_partial: BuildConfig::is_partial_name(&stem),
            path,
            extension,
            dir,
            stem,
        }
    }

    /// Directory of this file relative to `root`, empty when outside it.
    pub fn relative_dir(&self, root: &Path) -> PathBuf {
        self.dir
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// What a file is, and therefore which compiler owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Template,
    Markdown,
    Locale,
    Style,
    Script,
    Asset,
    Favicon,
    Config,
}

impl SourceKind {
    pub const TEMPLATE_EXTENSION: &'static str = "tera";

    /// Classify a path inside a project. `None` for files no compiler cares
    /// about.
    pub fn classify(path: &Path, config: &BuildConfig) -> Option<Self> {
        let paths = &config.paths;

        if path == paths.config_file {
            return Some(SourceKind::Config);
        }
        if path == config.favicon_source() {
            return Some(SourceKind::Favicon);
        }
        if path.starts_with(&paths.public) {
            return Some(SourceKind::Asset);
        }

        let extension = path.extension()?.to_string_lossy().to_lowercase();
        match extension.as_str() {
            Self::TEMPLATE_EXTENSION => Some(SourceKind::Template),
            "md" if path.starts_with(&paths.pages) => Some(SourceKind::Markdown),
            "yaml" | "yml" => Some(SourceKind::Locale),
            "scss" => Some(SourceKind::Style),
            "js" => Some(SourceKind::Script),
            _ => None,
        }
    }

    /// Source kinds that can produce a requested output extension.
    pub fn for_request_extension(extension: &str) -> &'static [SourceKind] {
        match extension {
            "" | "html" => &[SourceKind::Template, SourceKind::Markdown],
            "css" => &[SourceKind::Style],
            "js" => &[SourceKind::Script],
            _ => &[],
        }
    }

    pub fn source_extension(&self) -> Option<&'static str> {
        match self {
            SourceKind::Template => Some(Self::TEMPLATE_EXTENSION),
            SourceKind::Markdown => Some("md"),
            SourceKind::Style => Some("scss"),
            SourceKind::Script => Some("js"),
            SourceKind::Locale => Some("yaml"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;

    fn config() -> BuildConfig {
        BuildConfig::with_defaults(Path::new("/site"), Mode::Development)
    }

    #[test]
    fn test_source_file_metadata() {
        let file = SourceFile::new("/site/pages/about/_nav.tera");
        assert_eq!(file.extension, "tera");
        assert_eq!(file.stem, "_nav");
        assert!(file.is_partial);
        assert_eq!(file.relative_dir(Path::new("/site/pages")), PathBuf::from("about"));

        let file = SourceFile::new("/site/pages/index.tera");
        assert!(!file.is_partial);
        assert_eq!(file.relative_dir(Path::new("/site/pages")), PathBuf::new());
    }

    #[test]
    fn test_classify() {
        let config = config();
        let kind = |p: &str| SourceKind::classify(Path::new(p), &config);

        assert_eq!(kind("/site/pages/index.tera"), Some(SourceKind::Template));
        assert_eq!(kind("/site/templates/_layout.tera"), Some(SourceKind::Template));
        assert_eq!(kind("/site/pages/blog/post.md"), Some(SourceKind::Markdown));
        assert_eq!(kind("/site/README.md"), None);
        assert_eq!(kind("/site/pages/about/locales/fr.yaml"), Some(SourceKind::Locale));
        assert_eq!(kind("/site/pages/main.scss"), Some(SourceKind::Style));
        assert_eq!(kind("/site/pages/main.js"), Some(SourceKind::Script));
        assert_eq!(kind("/site/public/img/logo.png"), Some(SourceKind::Asset));
        assert_eq!(kind("/site/public/vendor.js"), Some(SourceKind::Asset));
        assert_eq!(kind("/site/favicons/main.png"), Some(SourceKind::Favicon));
        assert_eq!(kind("/site/yam.toml"), Some(SourceKind::Config));
        assert_eq!(kind("/site/notes.txt"), None);
    }

    #[test]
    fn test_request_extension_mapping() {
        assert_eq!(
            SourceKind::for_request_extension("html"),
            &[SourceKind::Template, SourceKind::Markdown]
        );
        assert_eq!(SourceKind::for_request_extension("css"), &[SourceKind::Style]);
        assert!(SourceKind::for_request_extension("png").is_empty());
    }
}
