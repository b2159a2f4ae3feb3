//! HTML email templates rendered with MiniJinja.
//!
//! Three completion variants exist: the default notice, a DOI citation
//! notice for minted exports, and a custom variant for requests that
//! asked for one. Built-in templates can be overridden per deployment
//! by dropping files into the template directory; an override that
//! fails to parse is ignored in favour of the built-in.

use std::path::Path;

use minijinja::Environment;
use serde::Serialize;

use crate::traits::NotifyError;

/// Which completion template to render for a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Default,
    Doi,
    Custom,
}

/// Variables available to the completion templates.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionContext {
    pub date: String,
    pub query_title: String,
    pub search_url: String,
    pub download_url: String,
    pub official_doi_url: Option<String>,
    pub doi_failure_message: Option<String>,
    pub hub_name: String,
}

/// Variables available to the failure template.
#[derive(Debug, Clone, Serialize)]
pub struct FailureContext {
    pub date: String,
    pub query_title: String,
    pub job_id: String,
    pub file_name: String,
    pub support: Option<String>,
    pub my_exports_url: String,
    pub hub_name: String,
}

const COMPLETION_DEFAULT: &str = r#"<html><body>
<p>The records you requested on {{ date }} are ready to download:</p>
<p><a href="{{ download_url }}">{{ download_url }}</a></p>
<p>Search: <b>{{ query_title }}</b></p>
<p>You can rerun this search at <a href="{{ search_url }}">{{ search_url }}</a>.</p>
<p>{{ hub_name }}</p>
</body></html>
"#;

const COMPLETION_DOI: &str = r#"<html><body>
<p>The records you requested on {{ date }} are ready to download:</p>
<p><a href="{{ download_url }}">{{ download_url }}</a></p>
<p>Search: <b>{{ query_title }}</b></p>
{% if official_doi_url %}<p>Please cite this download using its DOI:
<a href="{{ official_doi_url }}">{{ official_doi_url }}</a></p>
{% else %}<p>{{ doi_failure_message }}</p>
{% endif %}<p>{{ hub_name }}</p>
</body></html>
"#;

const COMPLETION_CUSTOM: &str = r#"<html><body>
<p>Your export of {{ date }} has finished and can be collected here:</p>
<p><a href="{{ download_url }}">{{ download_url }}</a></p>
<p>Search: <b>{{ query_title }}</b></p>
<p>{{ hub_name }}</p>
</body></html>
"#;

const FAILURE: &str = r#"<html><body>
<p>Your export <b>{{ file_name }}</b> requested on {{ date }} could not be produced.</p>
<p>Search: <b>{{ query_title }}</b></p>
<p>Reference: {{ job_id }}</p>
{% if support %}<p>If this keeps happening, contact
<a href="mailto:{{ support }}">{{ support }}</a> and quote the reference above.</p>
{% endif %}<p>Your past exports are listed at <a href="{{ my_exports_url }}">{{ my_exports_url }}</a>.</p>
<p>{{ hub_name }}</p>
</body></html>
"#;

/// Renders notification bodies from built-in or overridden templates.
pub struct TemplateRenderer {
    completion_default: String,
    completion_doi: String,
    completion_custom: String,
    failure: String,
}

impl TemplateRenderer {
    /// Load templates, applying overrides from `override_dir` when set.
    ///
    /// Override files are looked up by fixed names (`completion-default.html`,
    /// `completion-doi.html`, `completion-custom.html`, `failure.html`).
    /// Missing or invalid overrides fall back to the built-in template, so
    /// construction never fails.
    pub fn new(override_dir: Option<&Path>) -> Self {
        Self {
            completion_default: load_template(
                override_dir,
                "completion-default.html",
                COMPLETION_DEFAULT,
            ),
            completion_doi: load_template(override_dir, "completion-doi.html", COMPLETION_DOI),
            completion_custom: load_template(
                override_dir,
                "completion-custom.html",
                COMPLETION_CUSTOM,
            ),
            failure: load_template(override_dir, "failure.html", FAILURE),
        }
    }

    pub fn render_completion(
        &self,
        kind: TemplateKind,
        ctx: &CompletionContext,
    ) -> Result<String, NotifyError> {
        let source = match kind {
            TemplateKind::Default => &self.completion_default,
            TemplateKind::Doi => &self.completion_doi,
            TemplateKind::Custom => &self.completion_custom,
        };
        render(source, ctx)
    }

    pub fn render_failure(&self, ctx: &FailureContext) -> Result<String, NotifyError> {
        render(&self.failure, ctx)
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new(None)
    }
}

fn load_template(dir: Option<&Path>, name: &str, builtin: &str) -> String {
    let Some(dir) = dir else {
        return builtin.to_string();
    };
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(source) => {
            if let Err(e) = validate(&source) {
                tracing::warn!(template = %name, error = %e, "override does not parse, using built-in");
                builtin.to_string()
            } else {
                tracing::debug!(template = %name, path = %path.display(), "using override template");
                source
            }
        }
        Err(_) => builtin.to_string(),
    }
}

/// Check that a template source parses without rendering it.
pub fn validate(source: &str) -> Result<(), NotifyError> {
    let mut env = Environment::new();
    env.template_from_str(source)
        .map(|_| ())
        .map_err(|e| NotifyError::Template(e.to_string()))
}

fn render<S: Serialize>(source: &str, ctx: S) -> Result<String, NotifyError> {
    // A throwaway environment per render keeps the renderer free of
    // shared mutable state.
    let env = Environment::new();
    env.render_str(source, ctx)
        .map_err(|e| NotifyError::Template(e.to_string()))
}
