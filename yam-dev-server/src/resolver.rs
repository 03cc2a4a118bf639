//! Maps a request path to a response, compiling sources on demand.
//!
//! Order: plugins, then files under `public/`, then a page, stylesheet or
//! script compiled fresh from its source, then whatever the last build left
//! in the build directory, then 404.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};
use yam_core::error::error_chain;
use yam_core::locale::LocaleResolver;
use yam_core::scripts::{locate_bundler, render_script};
use yam_core::styles::render_style;
use yam_core::{BuildConfig, CompileError, PageCompiler, SourceFile, SourceKind};

use crate::livereload::inject_livereload_script;
use crate::plugins::{RequestPlugin, plugins_from};

const HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Resolved {
    /// An html document with the reload client injected.
    pub fn html(status: StatusCode, html: &str) -> Self {
        Self {
            status,
            content_type: HTML.to_string(),
            body: inject_livereload_script(html).into_bytes(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8".to_string(),
            body: body.into().into_bytes(),
        }
    }

    fn ok(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: content_type.to_string(),
            body,
        }
    }
}

impl IntoResponse for Resolved {
    fn into_response(self) -> Response {
        (self.status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

pub struct RequestResolver {
    config: Arc<BuildConfig>,
    plugins: Vec<Box<dyn RequestPlugin>>,
    bundler: Option<PathBuf>,
}

impl RequestResolver {
    pub fn new(config: Arc<BuildConfig>) -> Self {
        let plugins = plugins_from(&config);
        for plugin in &plugins {
            debug!(route = plugin.name(), "registered request plugin");
        }
        Self {
            bundler: locate_bundler(&config),
            plugins,
            config,
        }
    }

    pub fn with_plugin(mut self, plugin: Box<dyn RequestPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Blocking: may render templates and run the script bundler.
    pub fn resolve(&self, path: &str) -> Resolved {
        for plugin in &self.plugins {
            if let Some(resolved) = plugin.intercept(path) {
                debug!(plugin = plugin.name(), path, "intercepted");
                return resolved;
            }
        }

        let Some(relative) = sanitize(path) else {
            return not_found(path);
        };

        if !relative.as_os_str().is_empty() {
            let public = self.config.paths.public.join(&relative);
            if public.is_file() {
                return serve_file(&public);
            }
        }

        if let Some(resolved) = self.compile(path, &relative) {
            return resolved;
        }

        let built = self.config.paths.build.join(&relative);
        if !relative.as_os_str().is_empty() && built.is_file() {
            return serve_file(&built);
        }

        not_found(path)
    }

    fn compile(&self, path: &str, relative: &Path) -> Option<Resolved> {
        let extension = relative
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let kinds = SourceKind::for_request_extension(&extension);

        if kinds.contains(&SourceKind::Template) {
            return self.page(path, relative, &extension);
        }

        let kind = *kinds.first()?;
        let source = self
            .config
            .paths
            .pages
            .join(relative)
            .with_extension(kind.source_extension()?);
        if !source.is_file() || SourceFile::new(&source).is_partial {
            return None;
        }

        let compiled = match kind {
            SourceKind::Style => render_style(&self.config, &source).map(|out| out.css),
            SourceKind::Script => {
                render_script(&self.config, &source, self.bundler.as_deref()).map(|out| out.js)
            }
            _ => return None,
        };
        Some(match compiled {
            Ok(body) => Resolved::ok(content_type(relative), body.into_bytes()),
            Err(e) => self.compile_failed(&e),
        })
    }

    /// `/fr/about/` is `pages/about/index.tera` in `fr` when that page has
    /// an `fr` locale, otherwise `pages/fr/about/index.tera` as is.
    fn page(&self, path: &str, relative: &Path, extension: &str) -> Option<Resolved> {
        let mut segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        let candidates = if extension == "html" {
            if let Some(last) = segments.last_mut() {
                *last = last.trim_end_matches(".html").to_string();
            }
            vec![segments]
        } else if path.ends_with('/') || segments.is_empty() {
            segments.push("index".to_string());
            vec![segments]
        } else {
            let mut index = segments.clone();
            index.push("index".to_string());
            vec![segments, index]
        };

        let locales = LocaleResolver::new(&self.config);
        for stem in &candidates {
            if let [locale, rest @ ..] = stem.as_slice()
                && !rest.is_empty()
                && !locales.is_default(locale)
                && let Some(source) = self.find_page(rest)
                && locales
                    .page_locale_file(source.parent().unwrap_or(&self.config.paths.pages), locale)
                    .is_some()
            {
                return Some(self.render_page(&source, locale));
            }

            if let Some(source) = self.find_page(stem) {
                return Some(self.render_page(&source, locales.default_name()));
            }
        }
        None
    }

    /// `pages/<stem>.tera`, then `pages/<stem>.md`. Partials are never pages.
    fn find_page(&self, stem: &[String]) -> Option<PathBuf> {
        let (name, dirs) = stem.split_last()?;
        if BuildConfig::is_partial_name(name) {
            return None;
        }

        let dir = dirs
            .iter()
            .fold(self.config.paths.pages.clone(), |dir, segment| dir.join(segment));
        [SourceKind::Template, SourceKind::Markdown]
            .iter()
            .filter_map(|kind| kind.source_extension())
            .map(|ext| dir.join(format!("{name}.{ext}")))
            .find(|candidate| candidate.is_file())
    }

    fn render_page(&self, source: &Path, locale: &str) -> Resolved {
        match PageCompiler::new(&self.config).render_source(source, locale) {
            Ok(output) => {
                debug!(path = %self.config.paths.pretty(source), locale, "rendered on request");
                Resolved::html(StatusCode::OK, &output.html)
            }
            Err(e) => self.compile_failed(&e),
        }
    }

    fn compile_failed(&self, e: &CompileError) -> Resolved {
        let detail = error_chain(e);
        error!(path = %self.config.paths.pretty(e.path()), "{detail}");

        let page = format!(
            "<!doctype html>\n<html><head><title>Compile error</title></head><body>\
             <h1>Compile error</h1><p><code>{}</code></p><pre>{}</pre></body></html>",
            html_escape::encode_text(&self.config.paths.pretty(e.path())),
            html_escape::encode_text(&detail),
        );
        Resolved::html(StatusCode::INTERNAL_SERVER_ERROR, &page)
    }
}

fn not_found(path: &str) -> Resolved {
    let page = format!(
        "<!doctype html>\n<html><head><title>Not found</title></head><body>\
         <h1>404</h1><p>Nothing compiles to <code>{}</code>.</p></body></html>",
        html_escape::encode_text(path)
    );
    Resolved::html(StatusCode::NOT_FOUND, &page)
}

/// Percent-decode a request path (`/caf%C3%A9/` to `/café/`). Paths that do
/// not decode to UTF-8 are kept as sent.
pub fn decode_request_path(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

/// Request path to a relative filesystem path. `None` when it tries to
/// climb out of the served directories.
fn sanitize(path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(relative)
}

fn serve_file(path: &Path) -> Resolved {
    match std::fs::read(path) {
        Ok(body) => Resolved::ok(content_type(path), body),
        Err(e) => {
            error!(path = %path.display(), "read failed: {e}");
            Resolved::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => HTML,
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "xml" => "application/xml",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
