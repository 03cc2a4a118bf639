//! Recompiles whatever a filesystem change touches.
//!
//! Every changed path is sorted into a [`WatchClass`]. Each class drains
//! its own queue in order, so two edits to the same stylesheet never race,
//! while a stylesheet and a page compile side by side.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use yam_core::assets::copy_asset;
use yam_core::error::error_chain;
use yam_core::favicons::{FaviconOutcome, generate_favicons};
use yam_core::scripts::compile_scripts;
use yam_core::styles::compile_styles;
use yam_core::{BuildConfig, BuildError, PageCompiler, PageTarget, SourceKind};

use crate::error::ServerError;

const DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchClass {
    Pages,
    Locales,
    Styles,
    Scripts,
    Assets,
    Favicon,
    Config,
}

impl WatchClass {
    pub const ALL: [WatchClass; 7] = [
        WatchClass::Pages,
        WatchClass::Locales,
        WatchClass::Styles,
        WatchClass::Scripts,
        WatchClass::Assets,
        WatchClass::Favicon,
        WatchClass::Config,
    ];

    pub fn of(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Template | SourceKind::Markdown => WatchClass::Pages,
            SourceKind::Locale => WatchClass::Locales,
            SourceKind::Style => WatchClass::Styles,
            SourceKind::Script => WatchClass::Scripts,
            SourceKind::Asset => WatchClass::Assets,
            SourceKind::Favicon => WatchClass::Favicon,
            SourceKind::Config => WatchClass::Config,
        }
    }
}

/// Decides which changed paths matter.
pub struct WatchFilter {
    ignore: GlobSet,
}

impl WatchFilter {
    /// Each `ignore_on_watch` entry ignores any path component or glob
    /// match of that name, at any depth.
    pub fn new(config: &BuildConfig) -> Result<Self, ServerError> {
        let mut builder = GlobSetBuilder::new();
        for entry in &config.options.ignore_on_watch {
            let entry = entry.trim_matches('/');
            if entry.is_empty() {
                continue;
            }
            builder.add(Glob::new(&format!("**/{entry}"))?);
            builder.add(Glob::new(&format!("**/{entry}/**"))?);
        }
        Ok(Self {
            ignore: builder.build()?,
        })
    }

    pub fn classify(&self, path: &Path, config: &BuildConfig) -> Option<WatchClass> {
        let paths = &config.paths;
        if path.starts_with(&paths.build) || path.starts_with(&paths.cache) {
            return None;
        }

        let relative = path.strip_prefix(&paths.cwd).unwrap_or(path);
        if self.ignore.is_match(relative) {
            return None;
        }
        // editor swap and lock files
        let name = path.file_name()?.to_string_lossy();
        if name.starts_with('.') || name.ends_with('~') {
            return None;
        }

        SourceKind::classify(path, config).map(WatchClass::of)
    }
}

/// Run the compiler that owns `class` for one changed path. `Ok(true)`
/// when the browser should reload.
pub fn dispatch(config: &BuildConfig, class: WatchClass, path: &Path) -> Result<bool, BuildError> {
    match class {
        WatchClass::Pages | WatchClass::Locales => {
            let Some(target) = PageTarget::for_change(path, config) else {
                return Ok(false);
            };
            debug!(?target, "recompiling pages");
            PageCompiler::new(config).compile(&target)?;
            Ok(true)
        }
        WatchClass::Styles => {
            compile_styles(config, Some(path))?;
            Ok(true)
        }
        WatchClass::Scripts => {
            compile_scripts(config, Some(path))?;
            Ok(true)
        }
        WatchClass::Assets => Ok(copy_asset(config, path)?.is_some()),
        WatchClass::Favicon => {
            let outcome = generate_favicons(config)?;
            Ok(matches!(outcome, FaviconOutcome::Generated(_)))
        }
        WatchClass::Config => {
            warn!(
                path = %config.paths.pretty(path),
                "configuration changed, restart required"
            );
            Ok(false)
        }
    }
}

/// Keeps the OS watcher alive. Dropping it stops watching.
pub struct SourceWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl SourceWatcher {
    /// Start watching the source directory and the config file. Must be
    /// called from inside a tokio runtime; `on_change` runs there after each
    /// successful recompile.
    pub fn start<F>(config: Arc<BuildConfig>, on_change: F) -> Result<Self, ServerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let filter = WatchFilter::new(&config)?;
        let on_change = Arc::new(on_change);

        let mut lanes = HashMap::new();
        for class in WatchClass::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(drain(config.clone(), class, rx, on_change.clone()));
            lanes.insert(class, tx);
        }

        let handler_config = config.clone();
        let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
            Ok(events) => {
                for event in events {
                    if let Some(class) = filter.classify(&event.path, &handler_config)
                        && let Some(lane) = lanes.get(&class)
                    {
                        let _ = lane.send(event.path);
                    }
                }
            }
            Err(e) => warn!("watch error: {e}"),
        })
        .map_err(|source| ServerError::Watch {
            path: config.paths.source.clone(),
            source,
        })?;

        watch(&mut debouncer, &config.paths.source, RecursiveMode::Recursive)?;
        let config_file = &config.paths.config_file;
        if config_file.is_file() && !config_file.starts_with(&config.paths.source) {
            watch(&mut debouncer, config_file, RecursiveMode::NonRecursive)?;
        }

        info!(path = %config.paths.source.display(), "watching for changes");
        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

fn watch(
    debouncer: &mut Debouncer<RecommendedWatcher>,
    path: &Path,
    mode: RecursiveMode,
) -> Result<(), ServerError> {
    debouncer
        .watcher()
        .watch(path, mode)
        .map_err(|source| ServerError::Watch {
            path: path.to_path_buf(),
            source,
        })
}

async fn drain<F>(
    config: Arc<BuildConfig>,
    class: WatchClass,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    on_change: Arc<F>,
) where
    F: Fn() + Send + Sync + 'static,
{
    while let Some(path) = rx.recv().await {
        // removed since the event fired
        if !path.exists() {
            debug!(path = %config.paths.pretty(&path), "gone, skipping");
            continue;
        }
        info!(path = %config.paths.pretty(&path), ?class, "changed");

        let task_config = config.clone();
        let task_path = path.clone();
        let result =
            tokio::task::spawn_blocking(move || dispatch(&task_config, class, &task_path)).await;

        match result {
            Ok(Ok(true)) => on_change(),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => error!(path = %config.paths.pretty(&path), "{}", error_chain(&e)),
            Err(e) => error!(path = %config.paths.pretty(&path), "compile task failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use yam_core::Mode;

    fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_classification() {
        let config = BuildConfig::with_defaults(Path::new("/site"), Mode::Development);
        let filter = WatchFilter::new(&config).unwrap();
        let class = |rel: &str| filter.classify(&Path::new("/site").join(rel), &config);

        assert_eq!(class("pages/about/index.tera"), Some(WatchClass::Pages));
        assert_eq!(class("pages/notes/post.md"), Some(WatchClass::Pages));
        assert_eq!(class("layouts/_base.tera"), Some(WatchClass::Pages));
        assert_eq!(class("locales/fr.yaml"), Some(WatchClass::Locales));
        assert_eq!(class("pages/about/locales/fr.yaml"), Some(WatchClass::Locales));
        assert_eq!(class("pages/css/main.scss"), Some(WatchClass::Styles));
        assert_eq!(class("pages/js/app.js"), Some(WatchClass::Scripts));
        assert_eq!(class("public/img/logo.png"), Some(WatchClass::Assets));
        assert_eq!(class("favicons/main.png"), Some(WatchClass::Favicon));
        assert_eq!(class("yam.toml"), Some(WatchClass::Config));
    }

    #[test]
    fn test_ignored_paths() {
        let mut config = BuildConfig::with_defaults(Path::new("/site"), Mode::Development);
        config.options.ignore_on_watch.push("drafts".into());
        let filter = WatchFilter::new(&config).unwrap();
        let class = |rel: &str| filter.classify(&Path::new("/site").join(rel), &config);

        assert_eq!(class("build/index.html"), None);
        assert_eq!(class(".cache/yam/compress.json"), None);
        assert_eq!(class("node_modules/pkg/index.js"), None);
        assert_eq!(class("pages/drafts/wip.tera"), None);
        assert_eq!(class("pages/.index.tera.swp"), None);
        assert_eq!(class("README.txt"), None);
    }

    #[test]
    fn test_dispatch_style_change_writes_output() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        let sheet = write(dir.path(), "pages/main.scss", "a { color: red; }");

        assert!(dispatch(&config, WatchClass::Styles, &sheet).unwrap());
        assert!(dir.path().join("build/main.css").is_file());
    }

    #[test]
    fn test_dispatch_page_and_global_locale() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        let page = write(dir.path(), "pages/index.tera", "{{ globals.site }}");
        write(dir.path(), "pages/about.tera", "{{ globals.site }}");
        let locale = write(dir.path(), "locales/default.yaml", "site: Yam");

        assert!(dispatch(&config, WatchClass::Pages, &page).unwrap());
        assert!(dir.path().join("build/index.html").is_file());
        assert!(!dir.path().join("build/about.html").exists());

        assert!(dispatch(&config, WatchClass::Locales, &locale).unwrap());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("build/about.html")).unwrap(),
            "Yam"
        );
    }

    #[test]
    fn test_dispatch_asset_copied() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        let asset = write(dir.path(), "public/fonts/a.woff2", "font");

        assert!(dispatch(&config, WatchClass::Assets, &asset).unwrap());
        assert!(dir.path().join("build/fonts/a.woff2").is_file());
    }

    #[test]
    fn test_config_change_never_recompiles() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        let file = write(dir.path(), "yam.toml", "verbose = true");

        assert!(!dispatch(&config, WatchClass::Config, &file).unwrap());
        assert!(!dir.path().join("build").exists());
    }
}
