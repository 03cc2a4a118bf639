use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::{Context, Tera, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::BuildConfig;
use crate::error::{CompileError, error_chain};
use crate::source::SourceKind;

/// Every shared template (layouts, partials) of a project, loaded once per
/// compile run. Page templates are added on top of a clone so a syntax error
/// in one page never poisons its siblings.
pub struct TemplateLibrary {
    tera: Tera,
    source_dir: PathBuf,
    load_error: Option<String>,
}

impl TemplateLibrary {
    pub fn load(config: &BuildConfig) -> Self {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![".tera", ".html"]);

        let source_dir = config.paths.source.clone();
        let mut templates = Vec::new();
        let mut load_error = None;

        for path in shared_template_files(config) {
            let name = template_name(&source_dir, &path);
            match std::fs::read_to_string(&path) {
                Ok(contents) => templates.push((name, contents)),
                // vanished between walk and read
                Err(e) => debug!(path = %path.display(), "skipping unreadable template: {e}"),
            }
        }

        if let Err(e) = tera.add_raw_templates(templates) {
            load_error = Some(error_chain(&e));
            tera = Tera::default();
        }
        register_functions(&mut tera, config);

        Self {
            tera,
            source_dir,
            load_error,
        }
    }

    pub fn name_of(&self, path: &Path) -> String {
        template_name(&self.source_dir, path)
    }

    /// Render the page template at `path`.
    pub fn render_file(&self, path: &Path, context: &Context) -> Result<String, CompileError> {
        let name = self.name_of(path);
        let contents = std::fs::read_to_string(path).map_err(|source| CompileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.render_raw(path, &name, &contents, context)
    }

    /// Render a template referenced by its source-relative name, as markdown
    /// front matter does.
    pub fn render_named(
        &self,
        origin: &Path,
        name: &str,
        context: &Context,
    ) -> Result<String, CompileError> {
        self.check_loaded(origin)?;

        if self.tera.get_template_names().any(|n| n == name) {
            return self.tera.render(name, context).map_err(|e| CompileError::Template {
                path: origin.to_path_buf(),
                message: error_chain(&e),
            });
        }

        let path = self.source_dir.join(name);
        let contents = std::fs::read_to_string(&path).map_err(|_| CompileError::Template {
            path: origin.to_path_buf(),
            message: format!("template `{name}` not found"),
        })?;
        self.render_raw(origin, name, &contents, context)
    }

    fn render_raw(
        &self,
        origin: &Path,
        name: &str,
        contents: &str,
        context: &Context,
    ) -> Result<String, CompileError> {
        self.check_loaded(origin)?;

        let to_error = |e: tera::Error| CompileError::Template {
            path: origin.to_path_buf(),
            message: error_chain(&e),
        };

        let mut tera = self.tera.clone();
        tera.add_raw_template(name, contents).map_err(to_error)?;
        tera.render(name, context).map_err(to_error)
    }

    fn check_loaded(&self, origin: &Path) -> Result<(), CompileError> {
        match &self.load_error {
            Some(message) => Err(CompileError::Template {
                path: origin.to_path_buf(),
                message: format!("shared templates failed to load: {message}"),
            }),
            None => Ok(()),
        }
    }
}

/// `image_size(path=...)`: `{width, height}` of an image, the path taken
/// relative to the source directory.
struct ImageSize {
    source_dir: PathBuf,
}

impl tera::Function for ImageSize {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| tera::Error::msg("image_size requires a `path` string argument"))?;
        let full = self.source_dir.join(path.trim_start_matches('/'));
        let (width, height) = image::image_dimensions(&full).map_err(|e| {
            tera::Error::msg(format!("image_size: cannot read {}: {e}", full.display()))
        })?;
        Ok(serde_json::json!({ "width": width, "height": height }))
    }
}

fn register_functions(tera: &mut Tera, config: &BuildConfig) {
    tera.register_function(
        "image_size",
        ImageSize {
            source_dir: config.paths.source.clone(),
        },
    );

    let cwd = config.paths.cwd.to_string_lossy().into_owned();
    tera.register_function("cwd", move |_: &HashMap<String, Value>| {
        Ok(Value::String(cwd.clone()))
    });
}

/// Build a context from any serializable value plus extra keys.
pub fn context_from<T: Serialize>(value: &T) -> Result<Context, tera::Error> {
    Context::from_serialize(value)
}

fn template_name(source_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(source_dir).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Layouts and partials: every `.tera` under the source directory except
/// standalone page templates.
fn shared_template_files(config: &BuildConfig) -> Vec<PathBuf> {
    let paths = &config.paths;
    let ignored = &config.options.ignore_on_watch;

    WalkDir::new(&paths.source)
        .into_iter()
        .filter_entry(|entry| {
            let path = entry.path();
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !(path.starts_with(&paths.build)
                || path.starts_with(&paths.cache)
                || path.starts_with(&paths.public)
                || name.starts_with('.')
                || ignored.iter().any(|i| *i == name))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension().is_some_and(|ext| ext == SourceKind::TEMPLATE_EXTENSION)
                && !is_page_template(p, &paths.pages)
        })
        .collect()
}

/// A non-partial template under `pages/` compiles to its own html file.
pub fn is_page_template(path: &Path, pages_dir: &Path) -> bool {
    path.starts_with(pages_dir)
        && path
            .file_stem()
            .is_some_and(|s| !BuildConfig::is_partial_name(&s.to_string_lossy()))
}
