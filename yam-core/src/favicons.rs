use std::path::{Path, PathBuf};

use image::ImageFormat;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::BuildConfig;
use crate::error::{CompileError, error_chain};
use crate::memo::{MemoEntry, MemoStore, hash_file, hash_params};
use crate::output::write_artifact;

pub const FAVICON_CACHE_FILE: &str = "favicons.json";
const CACHE_KEY: &str = "favicons";
const OUTPUT_DIR: &str = "favicons";
const MANIFEST: &str = "site.webmanifest";
/// Partial written next to the source image for templates to include.
const SNIPPET: &str = "_favicons.tera";
const APPLE_TOUCH_SIZE: u32 = 180;

#[derive(Debug, Clone, PartialEq)]
pub enum FaviconOutcome {
    Generated(Vec<PathBuf>),
    /// Source and options unchanged and the outputs are still in place.
    Cached,
    /// No source image configured on disk.
    Missing,
}

#[derive(Debug, Serialize, Deserialize)]
struct FaviconArtifact {
    /// Written files, relative to the build directory.
    files: Vec<PathBuf>,
}

/// Generate every icon size, the web manifest and the html snippet, unless
/// nothing changed since the last run.
pub fn generate_favicons(config: &BuildConfig) -> Result<FaviconOutcome, CompileError> {
    let source = config.favicon_source();
    if !source.is_file() {
        debug!(path = %config.paths.pretty(&source), "no favicon source");
        return Ok(FaviconOutcome::Missing);
    }

    let favicon_error = |message: String| CompileError::Favicon {
        path: source.clone(),
        message,
    };

    let mut store = MemoStore::load(config.paths.cache.join(FAVICON_CACHE_FILE));
    let input_hash = hash_file(&source).map_err(|e| CompileError::Read {
        path: source.clone(),
        source: e,
    })?;
    let params_hash =
        hash_params(&config.options.favicon).map_err(|e| favicon_error(e.to_string()))?;

    if let Some(entry) = store.get_valid(CACHE_KEY, &input_hash, &params_hash)
        && let Ok(artifact) = serde_json::from_value::<FaviconArtifact>(entry.artifact.clone())
        && artifact.files.iter().all(|f| config.paths.build.join(f).is_file())
    {
        info!("favicons unchanged");
        return Ok(FaviconOutcome::Cached);
    }

    let written = render_favicons(config, &source)?;

    let artifact = FaviconArtifact {
        files: written
            .iter()
            .filter_map(|p| p.strip_prefix(&config.paths.build).ok())
            .map(Path::to_path_buf)
            .collect(),
    };
    store.insert(
        CACHE_KEY,
        MemoEntry {
            input_hash,
            params_hash,
            artifact: serde_json::to_value(&artifact).unwrap_or_default(),
        },
    );
    if let Err(e) = store.save() {
        warn!("{}", error_chain(&e));
    }

    info!(files = written.len(), "generated favicons");
    Ok(FaviconOutcome::Generated(written))
}

fn render_favicons(config: &BuildConfig, source: &Path) -> Result<Vec<PathBuf>, CompileError> {
    let favicon_error = |message: String| CompileError::Favicon {
        path: source.to_path_buf(),
        message,
    };
    let options = &config.options.favicon;
    let out_dir = config.paths.build.join(OUTPUT_DIR);

    let img = image::open(source).map_err(|e| favicon_error(e.to_string()))?;

    let mut written = Vec::new();
    for &size in &options.sizes {
        let destination = out_dir.join(icon_name(size));
        let resized = img.resize_exact(size, size, FilterType::Lanczos3);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CompileError::Write {
                path: destination.clone(),
                source: e,
            })?;
        }
        resized
            .save_with_format(&destination, ImageFormat::Png)
            .map_err(|e| favicon_error(e.to_string()))?;
        written.push(destination);
    }

    let manifest_path = out_dir.join(MANIFEST);
    write_artifact(&manifest_path, manifest(config))?;
    written.push(manifest_path);

    // only touch the snippet when it changes, it is watched as a template
    let snippet_path = source
        .parent()
        .unwrap_or(&config.paths.source)
        .join(SNIPPET);
    let snippet = snippet(config);
    if std::fs::read_to_string(&snippet_path).ok().as_deref() != Some(snippet.as_str()) {
        write_artifact(&snippet_path, &snippet)?;
    }

    Ok(written)
}

fn icon_name(size: u32) -> String {
    format!("favicon-{size}x{size}.png")
}

fn manifest(config: &BuildConfig) -> String {
    let options = &config.options.favicon;
    let icons: Vec<_> = options
        .sizes
        .iter()
        .filter(|&&size| size >= 192)
        .map(|&size| {
            json!({
                "src": format!("{OUTPUT_DIR}/{}", icon_name(size)),
                "sizes": format!("{size}x{size}"),
                "type": "image/png",
            })
        })
        .collect();

    let manifest = json!({
        "name": options.app_name,
        "short_name": options.app_name,
        "icons": icons,
        "theme_color": options.theme_color,
        "background_color": options.background,
        "display": "standalone",
    });
    serde_json::to_string_pretty(&manifest).unwrap_or_default()
}

/// Tags for the document head. Paths go through `relative_root` so the
/// snippet works at any depth.
fn snippet(config: &BuildConfig) -> String {
    let options = &config.options.favicon;
    let mut lines = Vec::new();

    for &size in &options.sizes {
        let href = format!("{{{{ relative_root }}}}/{OUTPUT_DIR}/{}", icon_name(size));
        if size == APPLE_TOUCH_SIZE {
            lines.push(format!(
                "<link rel=\"apple-touch-icon\" sizes=\"{size}x{size}\" href=\"{href}\">"
            ));
        } else {
            lines.push(format!(
                "<link rel=\"icon\" type=\"image/png\" sizes=\"{size}x{size}\" href=\"{href}\">"
            ));
        }
    }
    lines.push(format!(
        "<link rel=\"manifest\" href=\"{{{{ relative_root }}}}/{OUTPUT_DIR}/{MANIFEST}\">"
    ));
    lines.push(format!(
        "<meta name=\"theme-color\" content=\"{}\">",
        html_escape::encode_double_quoted_attribute(&options.theme_color)
    ));

    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use tempfile::TempDir;

    fn source_png(dir: &Path) {
        let path = dir.join("favicons/main.png");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbaImage::from_pixel(64, 64, image::Rgba([200, 10, 10, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
    }

    fn config(dir: &Path) -> BuildConfig {
        let mut config = BuildConfig::with_defaults(dir, Mode::Production);
        config.options.favicon.sizes = vec![16, 180, 192];
        config
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        assert_eq!(generate_favicons(&config(dir.path())).unwrap(), FaviconOutcome::Missing);
    }

    #[test]
    fn test_generates_then_caches() {
        let dir = TempDir::new().unwrap();
        source_png(dir.path());
        let config = config(dir.path());

        let FaviconOutcome::Generated(files) = generate_favicons(&config).unwrap() else {
            panic!("expected generation");
        };
        assert_eq!(files.len(), 4);
        let icon = image::open(dir.path().join("build/favicons/favicon-16x16.png")).unwrap();
        assert_eq!((icon.width(), icon.height()), (16, 16));

        let snippet = std::fs::read_to_string(dir.path().join("favicons/_favicons.tera")).unwrap();
        assert!(snippet.contains("apple-touch-icon"));
        assert!(snippet.contains("{{ relative_root }}/favicons/site.webmanifest"));

        assert_eq!(generate_favicons(&config).unwrap(), FaviconOutcome::Cached);
    }

    #[test]
    fn test_regenerates_when_outputs_removed_or_options_change() {
        let dir = TempDir::new().unwrap();
        source_png(dir.path());
        let mut config = config(dir.path());

        generate_favicons(&config).unwrap();
        std::fs::remove_dir_all(dir.path().join("build")).unwrap();
        assert!(matches!(generate_favicons(&config).unwrap(), FaviconOutcome::Generated(_)));

        config.options.favicon.theme_color = "#000".into();
        assert!(matches!(generate_favicons(&config).unwrap(), FaviconOutcome::Generated(_)));
    }

    #[test]
    fn test_manifest_lists_large_icons() {
        let dir = TempDir::new().unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest(&config(dir.path()))).unwrap();
        assert_eq!(manifest["icons"].as_array().unwrap().len(), 1);
        assert_eq!(manifest["icons"][0]["sizes"], "192x192");
    }
}
