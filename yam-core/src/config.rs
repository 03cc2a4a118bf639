use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::env::ClientEnvironment;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "yam.toml";

/// Everything a user can set in `yam.toml`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Options {
    pub source_directory: String,
    pub build_directory: String,
    pub cache_directory: String,
    pub verbose: bool,
    pub sitemap: SitemapSetting,
    pub ignore_on_watch: Vec<String>,
    pub breakpoints: BTreeMap<String, String>,
    pub locales: LocaleOptions,
    pub styles: StyleOptions,
    pub scripts: ScriptOptions,
    pub compress: CompressOptions,
    pub favicon: FaviconOptions,
    pub plugins: Vec<PluginSpec>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            source_directory: ".".to_string(),
            build_directory: "build".to_string(),
            cache_directory: ".cache/yam".to_string(),
            verbose: false,
            sitemap: SitemapSetting::default(),
            ignore_on_watch: vec!["node_modules".to_string(), ".git".to_string()],
            breakpoints: BTreeMap::new(),
            locales: LocaleOptions::default(),
            styles: StyleOptions::default(),
            scripts: ScriptOptions::default(),
            compress: CompressOptions::default(),
            favicon: FaviconOptions::default(),
            plugins: Vec::new(),
        }
    }
}

impl Options {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let options: Options = toml::from_str(&data)?;
        options.validate()?;

        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.build_directory.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "build_directory".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.locales.directory.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "locales.directory".into(),
                reason: "must not be empty".into(),
            });
        }
        if self.compress.jpeg.quality == 0 || self.compress.jpeg.quality > 100 {
            return Err(ConfigError::Invalid {
                key: "compress.jpeg.quality".into(),
                reason: format!("{} is outside 1..=100", self.compress.jpeg.quality),
            });
        }
        if let SitemapSetting::Url(url) = &self.sitemap
            && url.trim().is_empty()
        {
            return Err(ConfigError::Invalid {
                key: "sitemap".into(),
                reason: "public url must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// `sitemap = false`, `sitemap = true` (public url from `PUBLIC_URL`) or
/// `sitemap = "https://example.com"`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SitemapSetting {
    Enabled(bool),
    Url(String),
}

impl Default for SitemapSetting {
    fn default() -> Self {
        SitemapSetting::Enabled(false)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LocaleOptions {
    pub directory: String,
    pub default: String,
    pub markdown_template_field: String,
}

impl Default for LocaleOptions {
    fn default() -> Self {
        Self {
            directory: "locales".to_string(),
            default: "default".to_string(),
            markdown_template_field: "template".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StyleOptions {
    pub load_paths: Vec<String>,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            load_paths: vec!["node_modules".to_string()],
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScriptOptions {
    /// Name or path of the bundler binary. Empty disables bundling.
    pub bundler: String,
    pub target: String,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            bundler: "esbuild".to_string(),
            target: "es2020".to_string(),
        }
    }
}

/// Compression knobs. The whole tree is hashed to decide whether cached
/// compression results are still valid.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct CompressOptions {
    pub jpeg: JpegOptions,
    pub png: PngOptions,
    pub gif: GifOptions,
    pub svg: SvgOptions,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct JpegOptions {
    pub quality: u8,
}

impl Default for JpegOptions {
    fn default() -> Self {
        Self { quality: 70 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    Default,
    #[default]
    Best,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PngOptions {
    pub compression: PngCompression,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GifOptions {
    /// 1 (slow, best) ..= 30 (fast).
    pub speed: i32,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self { speed: 10 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SvgOptions {
    pub enabled: bool,
}

impl Default for SvgOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FaviconOptions {
    /// Relative to the source directory.
    pub source: String,
    pub app_name: String,
    pub background: String,
    pub theme_color: String,
    pub sizes: Vec<u32>,
}

impl Default for FaviconOptions {
    fn default() -> Self {
        Self {
            source: "favicons/main.png".to_string(),
            app_name: "yam".to_string(),
            background: "#fff".to_string(),
            theme_color: "#fff".to_string(),
            sizes: vec![16, 32, 48, 180, 192, 512],
        }
    }
}

/// A dev-server request interception rule.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PluginSpec {
    pub route: String,
    pub content_type: String,
    pub body: Option<String>,
    /// Relative to the working directory.
    pub file: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Mode::Production)
    }
}

/// Absolute directories derived from [`Options`].
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub cwd: PathBuf,
    pub source: PathBuf,
    pub pages: PathBuf,
    pub public: PathBuf,
    pub locales: PathBuf,
    pub build: PathBuf,
    pub cache: PathBuf,
    pub config_file: PathBuf,
}

impl Paths {
    pub fn resolve(cwd: &Path, options: &Options) -> Self {
        let source = normalize(&cwd.join(&options.source_directory));
        Self {
            cwd: cwd.to_path_buf(),
            pages: source.join("pages"),
            public: source.join("public"),
            locales: source.join(&options.locales.directory),
            build: normalize(&cwd.join(&options.build_directory)),
            cache: normalize(&cwd.join(&options.cache_directory)),
            config_file: cwd.join(CONFIG_FILE_NAME),
            source,
        }
    }

    /// `path` relative to the working directory, for log lines.
    pub fn pretty<'a>(&self, path: &'a Path) -> std::borrow::Cow<'a, str> {
        match path.strip_prefix(&self.cwd) {
            Ok(relative) => relative.to_string_lossy(),
            Err(_) => path.to_string_lossy(),
        }
    }
}

/// Drops `.` components so `source_directory = "."` maps onto the cwd itself.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Immutable configuration for one process. Passed explicitly to every
/// component, so several builds can coexist in one process.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub paths: Paths,
    pub options: Options,
    pub mode: Mode,
    pub env: ClientEnvironment,
}

impl BuildConfig {
    pub fn new(cwd: &Path, options: Options, mode: Mode, env: ClientEnvironment) -> Self {
        Self {
            paths: Paths::resolve(cwd, &options),
            options,
            mode,
            env,
        }
    }

    /// Defaults rooted at `cwd`, with an environment holding only the mode.
    pub fn with_defaults(cwd: &Path, mode: Mode) -> Self {
        Self::new(
            cwd,
            Options::default(),
            mode,
            ClientEnvironment::for_mode(mode),
        )
    }

    /// Public url for the sitemap, if one is configured.
    pub fn public_url(&self) -> Option<String> {
        let url = match &self.options.sitemap {
            SitemapSetting::Enabled(false) => return None,
            SitemapSetting::Enabled(true) => self.env.get("PUBLIC_URL")?.to_string(),
            SitemapSetting::Url(url) => url.clone(),
        };
        let trimmed = url.trim().trim_end_matches('/');
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    pub fn sitemap_enabled(&self) -> bool {
        !matches!(self.options.sitemap, SitemapSetting::Enabled(false))
    }

    pub fn favicon_source(&self) -> PathBuf {
        self.paths.source.join(&self.options.favicon.source)
    }

    pub fn is_partial_name(name: &str) -> bool {
        name.starts_with('_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert_eq!(options.build_directory, "build");
        assert_eq!(options.locales.default, "default");
        assert_eq!(options.compress.jpeg.quality, 70);
        assert_eq!(options.sitemap, SitemapSetting::Enabled(false));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let options: Options = toml::from_str(
            r#"
            source_directory = "src"
            sitemap = "https://example.com/"

            [compress.jpeg]
            quality = 55

            [breakpoints]
            "medium-up" = "(min-width: 40em)"
            "#,
        )
        .unwrap();

        assert_eq!(options.source_directory, "src");
        assert_eq!(options.compress.jpeg.quality, 55);
        assert_eq!(options.compress.png.compression, PngCompression::Best);
        assert_eq!(options.breakpoints["medium-up"], "(min-width: 40em)");
        assert_eq!(options.sitemap, SitemapSetting::Url("https://example.com/".into()));
    }

    #[test]
    fn test_sitemap_bool_parses() {
        let options: Options = toml::from_str("sitemap = true").unwrap();
        assert_eq!(options.sitemap, SitemapSetting::Enabled(true));
    }

    #[test]
    fn test_invalid_quality_rejected() {
        let mut options = Options::default();
        options.compress.jpeg.quality = 0;
        assert!(matches!(options.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_paths_resolve() {
        let options = Options {
            source_directory: "src".into(),
            ..Options::default()
        };
        let paths = Paths::resolve(Path::new("/site"), &options);
        assert_eq!(paths.pages, PathBuf::from("/site/src/pages"));
        assert_eq!(paths.public, PathBuf::from("/site/src/public"));
        assert_eq!(paths.locales, PathBuf::from("/site/src/locales"));
        assert_eq!(paths.build, PathBuf::from("/site/build"));
        assert_eq!(paths.cache, PathBuf::from("/site/.cache/yam"));
    }

    #[test]
    fn test_public_url_trims_trailing_slash() {
        let mut config = BuildConfig::with_defaults(Path::new("/site"), Mode::Production);
        config.options.sitemap = SitemapSetting::Url("https://example.com/".into());
        assert_eq!(config.public_url().as_deref(), Some("https://example.com"));

        config.options.sitemap = SitemapSetting::Enabled(true);
        assert_eq!(config.public_url(), None);
    }
}
