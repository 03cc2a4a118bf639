//! In-place image compression with a persistent skip cache.
//!
//! Every file is compressed by the [`FormatPlugin`] registered for its
//! extension. Results are memoized in `<cache>/compress.json`, keyed by
//! `<directory>/<file name>`. An entry is trusted when the file on disk still
//! hashes to what the last run wrote *and* the compression options hash to
//! the same value. Anything else means the file gets compressed again.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{AnimationDecoder, ImageFormat};
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::{BuildConfig, CompressOptions, PngCompression};
use crate::discovery::get_all_files;
use crate::error::{CacheError, CompressError, error_chain};
use crate::memo::{MemoEntry, MemoStore, hash_bytes, hash_params};

pub const COMPRESS_CACHE_FILE: &str = "compress.json";

/// A compressor for one family of file formats.
pub trait FormatPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowercase extensions this plugin handles.
    fn extensions(&self) -> &'static [&'static str];

    fn compress(&self, bytes: &[u8], options: &CompressOptions) -> Result<Vec<u8>, String>;
}

pub struct JpegPlugin;

impl FormatPlugin for JpegPlugin {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["jpg", "jpeg"]
    }

    fn compress(&self, bytes: &[u8], options: &CompressOptions) -> Result<Vec<u8>, String> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .map_err(|e| e.to_string())?;
        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, options.jpeg.quality);
        img.write_with_encoder(encoder).map_err(|e| e.to_string())?;
        Ok(out)
    }
}

pub struct PngPlugin;

impl FormatPlugin for PngPlugin {
    fn name(&self) -> &'static str {
        "png"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["png"]
    }

    fn compress(&self, bytes: &[u8], options: &CompressOptions) -> Result<Vec<u8>, String> {
        let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|e| e.to_string())?;
        let compression = match options.png.compression {
            PngCompression::Fast => CompressionType::Fast,
            PngCompression::Default => CompressionType::Default,
            PngCompression::Best => CompressionType::Best,
        };
        let mut out = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive);
        img.write_with_encoder(encoder).map_err(|e| e.to_string())?;
        Ok(out)
    }
}

pub struct GifPlugin;

impl FormatPlugin for GifPlugin {
    fn name(&self) -> &'static str {
        "gif"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["gif"]
    }

    fn compress(&self, bytes: &[u8], options: &CompressOptions) -> Result<Vec<u8>, String> {
        let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| e.to_string())?;

        let mut out = Vec::new();
        {
            let speed = options.gif.speed.clamp(1, 30);
            let mut encoder = GifEncoder::new_with_speed(&mut out, speed);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| e.to_string())?;
            encoder.encode_frames(frames).map_err(|e| e.to_string())?;
        }
        Ok(out)
    }
}

/// Lossless SVG minifier: comments and whitespace between elements go,
/// every element, attribute and text run stays byte for byte.
pub struct SvgPlugin;

/// Elements whose whitespace is content.
const SVG_TEXT_ELEMENTS: &[&[u8]] = &[
    b"text", b"tspan", b"textPath", b"style", b"script", b"title", b"desc",
];

impl FormatPlugin for SvgPlugin {
    fn name(&self) -> &'static str {
        "svg"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["svg"]
    }

    fn compress(&self, bytes: &[u8], _options: &CompressOptions) -> Result<Vec<u8>, String> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);
        let mut writer = Writer::new(Vec::with_capacity(bytes.len()));
        let mut text_depth = 0usize;

        loop {
            let event = reader
                .read_event()
                .map_err(|e| format!("xml error at byte {}: {e}", reader.error_position()))?;
            match event {
                Event::Eof => break,
                Event::Comment(_) => continue,
                Event::Text(ref text)
                    if text_depth == 0 && text.iter().all(u8::is_ascii_whitespace) =>
                {
                    continue;
                }
                Event::Start(ref elem) if SVG_TEXT_ELEMENTS.contains(&elem.local_name().as_ref()) => {
                    text_depth += 1;
                }
                Event::End(ref elem) if SVG_TEXT_ELEMENTS.contains(&elem.local_name().as_ref()) => {
                    text_depth = text_depth.saturating_sub(1);
                }
                _ => {}
            }
            writer.write_event(event).map_err(|e| e.to_string())?;
        }

        Ok(writer.into_inner())
    }
}

/// The built-in plugins for `options`.
pub fn default_plugins(options: &CompressOptions) -> Vec<Box<dyn FormatPlugin>> {
    let mut plugins: Vec<Box<dyn FormatPlugin>> =
        vec![Box::new(JpegPlugin), Box::new(PngPlugin), Box::new(GifPlugin)];
    if options.svg.enabled {
        plugins.push(Box::new(SvgPlugin));
    }
    plugins
}

/// Sizes recorded for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressSizes {
    pub before: u64,
    pub after: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressResult {
    pub path: PathBuf,
    pub before: u64,
    pub after: u64,
    /// Served from the cache, no plugin ran.
    pub skipped: bool,
}

impl CompressResult {
    pub fn savings_percent(&self) -> f64 {
        if self.before == 0 {
            return 0.0;
        }
        (self.before.saturating_sub(self.after)) as f64 / self.before as f64 * 100.0
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<CompressResult>,
    pub errors: Vec<CompressError>,
}

impl BatchReport {
    pub fn bytes_saved(&self) -> u64 {
        self.results
            .iter()
            .map(|r| r.before.saturating_sub(r.after))
            .sum()
    }
}

/// A result plus the cache entry to record, `None` on a cache hit.
type Outcome = (CompressResult, Option<(String, MemoEntry)>);

pub struct Compressor {
    root: PathBuf,
    options: CompressOptions,
    params_hash: String,
    plugins: Vec<Box<dyn FormatPlugin>>,
    store: MemoStore,
}

impl Compressor {
    /// Compressor backed by the project's cache file, with the built-in
    /// plugins.
    pub fn new(config: &BuildConfig) -> Result<Self, CacheError> {
        let store = MemoStore::load(config.paths.cache.join(COMPRESS_CACHE_FILE));
        let options = config.options.compress.clone();
        let plugins = default_plugins(&options);
        Self::with_plugins(&config.paths.cwd, store, options, plugins)
    }

    pub fn with_plugins(
        root: &Path,
        store: MemoStore,
        options: CompressOptions,
        plugins: Vec<Box<dyn FormatPlugin>>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            root: root.to_path_buf(),
            params_hash: hash_params(&options)?,
            options,
            plugins,
            store,
        })
    }

    pub fn store(&self) -> &MemoStore {
        &self.store
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.plugin_for(path).is_some()
    }

    /// Compress one file and record the result. The cache is not persisted;
    /// call [`Compressor::save`] when done.
    pub fn compress(&mut self, path: &Path) -> Result<CompressResult, CompressError> {
        let (result, entry) = self.compress_one(path)?;
        if let Some((key, entry)) = entry {
            self.store.insert(key, entry);
        }
        Ok(result)
    }

    /// Compress every file in parallel, then persist the cache once.
    pub fn compress_batch(&mut self, paths: &[PathBuf]) -> Result<BatchReport, CacheError> {
        let outcomes: Vec<_> = paths.par_iter().map(|p| self.compress_one(p)).collect();

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                Ok((result, entry)) => {
                    if let Some((key, entry)) = entry {
                        self.store.insert(key, entry);
                    }
                    report.results.push(result);
                }
                Err(e) => {
                    error!("{}", error_chain(&e));
                    report.errors.push(e);
                }
            }
        }

        self.save()?;
        info!(
            files = report.results.len(),
            failed = report.errors.len(),
            saved_bytes = report.bytes_saved(),
            "compression finished"
        );
        Ok(report)
    }

    /// Every supported file under `dir`.
    pub fn collect(&self, dir: &Path) -> Vec<PathBuf> {
        get_all_files(dir)
            .into_iter()
            .filter(|p| self.is_supported(p))
            .collect()
    }

    pub fn save(&self) -> Result<(), CacheError> {
        self.store.save()
    }

    fn plugin_for(&self, path: &Path) -> Option<&dyn FormatPlugin> {
        let extension = path.extension()?.to_string_lossy().to_lowercase();
        self.plugins
            .iter()
            .find(|p| p.extensions().contains(&extension.as_str()))
            .map(|p| p.as_ref())
    }

    /// `<directory>/<file name>`, relative to the project root.
    fn key_for(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let dir = relative
            .parent()
            .map(|d| d.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        if dir.is_empty() {
            name.to_string()
        } else {
            format!("{dir}/{name}")
        }
    }

    fn compress_one(&self, path: &Path) -> Result<Outcome, CompressError> {
        let plugin = self
            .plugin_for(path)
            .ok_or_else(|| CompressError::Unsupported(path.to_path_buf()))?;

        let bytes = std::fs::read(path).map_err(|source| CompressError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let key = self.key_for(path);
        let input_hash = hash_bytes(&bytes);

        if let Some(entry) = self.store.get_valid(&key, &input_hash, &self.params_hash)
            && let Ok(sizes) = serde_json::from_value::<CompressSizes>(entry.artifact.clone())
        {
            debug!(path = %key, "unchanged, skipping");
            return Ok((
                CompressResult {
                    path: path.to_path_buf(),
                    before: sizes.before,
                    after: sizes.after,
                    skipped: true,
                },
                None,
            ));
        }

        let compressed = plugin
            .compress(&bytes, &self.options)
            .map_err(|message| CompressError::Codec {
                format: plugin.name(),
                path: path.to_path_buf(),
                message,
            })?;

        let before = bytes.len() as u64;
        let output = if compressed.len() < bytes.len() {
            std::fs::write(path, &compressed).map_err(|source| CompressError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            compressed
        } else {
            bytes
        };
        let after = output.len() as u64;

        let result = CompressResult {
            path: path.to_path_buf(),
            before,
            after,
            skipped: false,
        };
        info!(
            path = %key,
            before,
            after,
            "compressed {:.0}%",
            result.savings_percent()
        );

        let entry = MemoEntry {
            input_hash: hash_bytes(&output),
            params_hash: self.params_hash.clone(),
            artifact: serde_json::to_value(CompressSizes { before, after }).unwrap_or_default(),
        };
        Ok((result, Some((key, entry))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Halves the input and counts calls.
    struct SpyPlugin {
        calls: Arc<AtomicUsize>,
    }

    impl FormatPlugin for SpyPlugin {
        fn name(&self) -> &'static str {
            "spy"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["png", "jpg"]
        }

        fn compress(&self, bytes: &[u8], _options: &CompressOptions) -> Result<Vec<u8>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(bytes[..bytes.len() / 2].to_vec())
        }
    }

    fn spy_compressor(dir: &Path, options: CompressOptions) -> (Compressor, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = MemoStore::load(dir.join(".cache/compress.json"));
        let plugins: Vec<Box<dyn FormatPlugin>> = vec![Box::new(SpyPlugin {
            calls: calls.clone(),
        })];
        (
            Compressor::with_plugins(dir, store, options, plugins).unwrap(),
            calls,
        )
    }

    fn image(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join("public").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![7u8; 64]).unwrap();
        path
    }

    #[test]
    fn test_second_run_skips_unchanged_files() {
        let dir = TempDir::new().unwrap();
        let files = vec![image(dir.path(), "a.png"), image(dir.path(), "img/b.jpg")];

        let (mut first, calls) = spy_compressor(dir.path(), CompressOptions::default());
        let report = first.compress_batch(&files).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(report.results.iter().all(|r| r.before == 64 && r.after == 32));

        let (mut second, calls) = spy_compressor(dir.path(), CompressOptions::default());
        let report = second.compress_batch(&files).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(report.results.iter().all(|r| r.skipped));
        assert!(report.results.iter().all(|r| r.before == 64 && r.after == 32));
    }

    #[test]
    fn test_option_change_forces_recompression() {
        let dir = TempDir::new().unwrap();
        let files = vec![image(dir.path(), "a.png"), image(dir.path(), "b.png")];

        let (mut first, _) = spy_compressor(dir.path(), CompressOptions::default());
        first.compress_batch(&files).unwrap();

        let mut options = CompressOptions::default();
        options.gif.speed += 1;
        let (mut second, calls) = spy_compressor(dir.path(), options);
        second.compress_batch(&files).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_changed_file_is_recompressed() {
        let dir = TempDir::new().unwrap();
        let file = image(dir.path(), "a.png");

        let (mut compressor, calls) = spy_compressor(dir.path(), CompressOptions::default());
        compressor.compress(&file).unwrap();
        std::fs::write(&file, vec![1u8; 80]).unwrap();
        let result = compressor.compress(&file).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!((result.before, result.after), (80, 40));
    }

    #[test]
    fn test_keys_are_directory_and_basename() {
        let dir = TempDir::new().unwrap();
        let file = image(dir.path(), "img/a.png");

        let (mut compressor, _) = spy_compressor(dir.path(), CompressOptions::default());
        compressor.compress(&file).unwrap();
        assert!(compressor.store().get("public/img/a.png").is_some());
    }

    #[test]
    fn test_larger_output_keeps_original() {
        struct Grow;
        impl FormatPlugin for Grow {
            fn name(&self) -> &'static str {
                "grow"
            }
            fn extensions(&self) -> &'static [&'static str] {
                &["png"]
            }
            fn compress(&self, bytes: &[u8], _: &CompressOptions) -> Result<Vec<u8>, String> {
                Ok([bytes, bytes].concat())
            }
        }

        let dir = TempDir::new().unwrap();
        let file = image(dir.path(), "a.png");
        let store = MemoStore::empty(dir.path().join("c.json"));
        let mut compressor =
            Compressor::with_plugins(dir.path(), store, CompressOptions::default(), vec![Box::new(Grow)])
                .unwrap();

        let result = compressor.compress(&file).unwrap();
        assert_eq!((result.before, result.after), (64, 64));
        assert_eq!(std::fs::read(&file).unwrap().len(), 64);
    }

    #[test]
    fn test_unsupported_and_broken_files_do_not_stop_batch() {
        let dir = TempDir::new().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "x").unwrap();
        let good = image(dir.path(), "a.png");

        let (mut compressor, _) = spy_compressor(dir.path(), CompressOptions::default());
        let report = compressor.compress_batch(&[text, good]).unwrap();
        assert_eq!(report.results.len(), 1);
        assert!(matches!(report.errors[0], CompressError::Unsupported(_)));
    }

    #[test]
    fn test_png_plugin_roundtrips_real_image() {
        let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 0]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let out = PngPlugin.compress(&bytes, &CompressOptions::default()).unwrap();
        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }

    #[test]
    fn test_svg_plugin_keeps_text_ids_and_classes() {
        let svg = br#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="20">
    <!-- brand mark -->
    <g id="logo" class="brand">
        <text x="0" y="15">Hello <tspan class="em">big</tspan> world</text>
    </g>
    <style>.brand { fill: red; }</style>
</svg>
"#;
        let out = String::from_utf8(SvgPlugin.compress(svg, &CompressOptions::default()).unwrap()).unwrap();

        assert!(out.len() < svg.len());
        assert!(!out.contains("brand mark"));
        assert!(out.contains(r#"<g id="logo" class="brand">"#));
        assert!(out.contains(r#"<text x="0" y="15">Hello <tspan class="em">big</tspan> world</text>"#));
        assert!(out.contains("<style>.brand { fill: red; }</style>"));
        assert!(out.starts_with("<svg"));
        assert!(out.ends_with("</svg>"));
    }

    #[test]
    fn test_svg_plugin_rejects_malformed_markup() {
        let svg = b"<svg><g></svg>";
        assert!(SvgPlugin.compress(svg, &CompressOptions::default()).is_err());
    }

    #[test]
    fn test_svg_with_nothing_to_strip_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("public/icon.svg");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg"><text>Hi</text></svg>"#;
        std::fs::write(&path, svg).unwrap();

        let store = MemoStore::empty(dir.path().join("c.json"));
        let mut compressor = Compressor::with_plugins(
            dir.path(),
            store,
            CompressOptions::default(),
            vec![Box::new(SvgPlugin)],
        )
        .unwrap();
        let result = compressor.compress(&path).unwrap();

        assert_eq!(result.before, result.after);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), svg);
    }
}
