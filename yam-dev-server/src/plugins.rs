use std::path::PathBuf;

use axum::http::StatusCode;
use tracing::error;
use yam_core::BuildConfig;
use yam_core::config::PluginSpec;

use crate::resolver::Resolved;

/// Gets the first look at every request and may answer it outright.
pub trait RequestPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// `Some` short-circuits resolution with this response.
    fn intercept(&self, path: &str) -> Option<Resolved>;
}

/// Answers one route with a fixed body or the current contents of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct MockRoutePlugin {
    route: String,
    content_type: String,
    body: MockBody,
}

#[derive(Debug, Clone, PartialEq)]
enum MockBody {
    Inline(String),
    File(PathBuf),
}

impl MockRoutePlugin {
    pub fn new(route: impl Into<String>, content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            content_type: content_type.into(),
            body: MockBody::Inline(body.into()),
        }
    }

    pub fn from_spec(config: &BuildConfig, spec: &PluginSpec) -> Self {
        let body = match &spec.file {
            Some(file) => MockBody::File(config.paths.cwd.join(file)),
            None => MockBody::Inline(spec.body.clone().unwrap_or_default()),
        };
        let content_type = if spec.content_type.is_empty() {
            "text/plain; charset=utf-8".to_string()
        } else {
            spec.content_type.clone()
        };
        Self {
            route: spec.route.clone(),
            content_type,
            body,
        }
    }
}

impl RequestPlugin for MockRoutePlugin {
    fn name(&self) -> &str {
        &self.route
    }

    fn intercept(&self, path: &str) -> Option<Resolved> {
        if path != self.route {
            return None;
        }

        let body = match &self.body {
            MockBody::Inline(body) => body.clone().into_bytes(),
            // read per request so edits show up without a restart
            MockBody::File(file) => match std::fs::read(file) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(route = %self.route, file = %file.display(), "plugin file unreadable: {e}");
                    return Some(Resolved::text(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("plugin for {} failed: {e}", self.route),
                    ));
                }
            },
        };

        Some(Resolved {
            status: StatusCode::OK,
            content_type: self.content_type.clone(),
            body,
        })
    }
}

/// One plugin per `[[plugins]]` entry with a route.
pub fn plugins_from(config: &BuildConfig) -> Vec<Box<dyn RequestPlugin>> {
    config
        .options
        .plugins
        .iter()
        .filter(|spec| !spec.route.is_empty())
        .map(|spec| Box::new(MockRoutePlugin::from_spec(config, spec)) as Box<dyn RequestPlugin>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;
    use yam_core::Mode;

    #[test]
    fn test_inline_route() {
        let plugin = MockRoutePlugin::new("/api/health", "application/json", r#"{"ok":true}"#);
        assert!(plugin.intercept("/api/other").is_none());

        let resolved = plugin.intercept("/api/health").unwrap();
        assert_eq!(resolved.status, StatusCode::OK);
        assert_eq!(resolved.content_type, "application/json");
        assert_eq!(resolved.body, br#"{"ok":true}"#);
    }

    #[test]
    fn test_file_route_reads_current_contents() {
        let dir = TempDir::new().unwrap();
        let mut config = BuildConfig::with_defaults(dir.path(), Mode::Development);
        config.options.plugins = vec![
            PluginSpec {
                route: "/api/users".into(),
                content_type: "application/json".into(),
                body: None,
                file: Some("mocks/users.json".into()),
            },
            PluginSpec::default(),
        ];
        let plugins = plugins_from(&config);
        assert_eq!(plugins.len(), 1);

        std::fs::create_dir_all(dir.path().join("mocks")).unwrap();
        std::fs::write(dir.path().join("mocks/users.json"), "[1]").unwrap();
        assert_eq!(plugins[0].intercept("/api/users").unwrap().body, b"[1]");

        std::fs::write(dir.path().join("mocks/users.json"), "[1,2]").unwrap();
        assert_eq!(plugins[0].intercept("/api/users").unwrap().body, b"[1,2]");
    }

    #[test]
    fn test_missing_file_is_a_server_error() {
        let config = BuildConfig::with_defaults(Path::new("/nonexistent"), Mode::Development);
        let spec = PluginSpec {
            route: "/x".into(),
            file: Some("missing.json".into()),
            ..PluginSpec::default()
        };
        let resolved = MockRoutePlugin::from_spec(&config, &spec).intercept("/x").unwrap();
        assert_eq!(resolved.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
