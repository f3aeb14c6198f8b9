//! Views: the raw HTML a page starts from before composition.

use std::path::{Component, Path, PathBuf};

use serde_json::{Map, Value};

/// Errors loading or rendering a view.
#[derive(thiserror::Error, Debug)]
pub enum ViewError {
    #[error("Invalid view name: {0}")]
    InvalidName(String),

    #[error("Layout not found: {0}")]
    LayoutNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces the initial markup for a named view.
pub trait ViewEngine: Send + Sync {
    /// Render `name` with `bindings`. `Ok(None)` means no such view.
    fn render(&self, name: &str, bindings: &Map<String, Value>) -> Result<Option<String>, ViewError>;
}

/// Marker in a layout file replaced by the rendered view.
pub const EMBED_MARKER: &str = "{{embed}}";

/// Views stored as files under a directory, `<root>/<name><extension>`.
///
/// `{{key}}` placeholders are substituted from the bindings, HTML-escaped;
/// unknown keys are left as they are. With a layout configured, the rendered view is
/// placed at the layout's `{{embed}}` marker.
#[derive(Debug, Clone)]
pub struct DirectoryViews {
    root: PathBuf,
    extension: String,
    layout: Option<String>,
}

impl DirectoryViews {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: ".html".to_string(),
            layout: None,
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    /// Wrap every view in the layout view `name`.
    pub fn with_layout(mut self, name: &str) -> Self {
        self.layout = Some(name.to_string());
        self
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ViewError> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ViewError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(format!("{name}{}", self.extension)))
    }

    fn read(&self, name: &str) -> Result<Option<String>, ViewError> {
        let path = self.path_for(name)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ViewEngine for DirectoryViews {
    fn render(&self, name: &str, bindings: &Map<String, Value>) -> Result<Option<String>, ViewError> {
        let Some(view) = self.read(name)? else {
            return Ok(None);
        };
        let view = substitute(&view, bindings);

        match &self.layout {
            Some(layout) => {
                let frame = self
                    .read(layout)?
                    .ok_or_else(|| ViewError::LayoutNotFound(layout.clone()))?;
                let frame = substitute(&frame, bindings);
                Ok(Some(frame.replacen(EMBED_MARKER, &view, 1)))
            }
            None => Ok(Some(view)),
        }
    }
}

/// Replace `{{key}}` / `{{ key }}` with binding values.
///
/// Values are escaped, so a binding can never introduce markup (and with it
/// a `<fragment>` the resolver would fetch).
fn substitute(template: &str, bindings: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = after[..end].trim();
        match bindings.get(key) {
            Some(Value::String(s)) => out.push_str(&html_escape::encode_safe(s)),
            Some(Value::Null) => {}
            Some(other) => out.push_str(&html_escape::encode_safe(&other.to_string())),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}
