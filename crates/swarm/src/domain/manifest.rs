//! Pod manifest templates and placeholder substitution.
//!
//! The validator and fullnode manifests are embedded YAML assets carrying a
//! fixed set of `{token}` placeholders. Rendering is a single pass over the
//! template: a known token substitutes its bound value, and any other brace
//! sequence (YAML `{}` included) passes through as literal text. Substituted
//! values are never re-scanned.

use core::error::Error;
use std::collections::BTreeMap;

use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;

/// The closed set of placeholder tokens a generator must be able to supply.
pub const TEMPLATE_TOKENS: [&str; 10] = [
    "validator_index",
    "fullnode_index",
    "node_name",
    "image_tag",
    "num_validators",
    "num_fullnodes",
    "cfg_seed",
    "cfg_seed_peer_ip",
    "cfg_fullnode_seed",
    "cfg_overrides",
];

const VALIDATOR_TEMPLATE: &str = include_str!("../../templates/validator.yaml");
const FULLNODE_TEMPLATE: &str = include_str!("../../templates/fullnode.yaml");

/// Errors from rendering or verifying a pod manifest.
#[derive(Debug, derive_more::Display)]
pub enum TemplateError {
    #[display("No value bound for placeholder {{{token}}} in {template} template")]
    MissingValue { template: &'static str, token: String },
    #[display("Unresolved placeholders left in {template} manifest: {tokens:?}")]
    Unresolved {
        template: &'static str,
        tokens: Vec<String>,
    },
    #[display("Rendered {template} manifest is not a valid Pod: {message}")]
    InvalidManifest {
        template: &'static str,
        message: String,
    },
}

impl Error for TemplateError {}

/// Values bound to placeholder tokens for one rendering.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars(BTreeMap<&'static str, String>);

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token` to `value`. Tokens outside [`TEMPLATE_TOKENS`] are a
    /// programming error.
    pub fn set(mut self, token: &'static str, value: impl ToString) -> Self {
        debug_assert!(
            TEMPLATE_TOKENS.contains(&token),
            "unknown placeholder token {token}"
        );
        self.0.insert(token, value.to_string());
        self
    }

    pub(crate) fn get(&self, token: &str) -> Option<&str> {
        self.0.get(token).map(String::as_str)
    }
}

/// One of the embedded pod manifest templates.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    name: &'static str,
    body: &'static str,
}

impl Template {
    pub fn validator() -> Self {
        Self {
            name: "validator",
            body: VALIDATOR_TEMPLATE,
        }
    }

    pub fn fullnode() -> Self {
        Self {
            name: "fullnode",
            body: FULLNODE_TEMPLATE,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_static(name: &'static str, body: &'static str) -> Self {
        Self { name, body }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Substitute bound values into the template.
    ///
    /// # Errors
    ///
    /// - [`TemplateError::MissingValue`] if the template contains a known
    ///   token with no value bound in `vars`
    pub fn render(&self, vars: &TemplateVars) -> Result<String, Report<TemplateError>> {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) if TEMPLATE_TOKENS.contains(&&after[..end]) => {
                    let token = &after[..end];
                    let value = vars.get(token).ok_or_else(|| {
                        Report::new(TemplateError::MissingValue {
                            template: self.name,
                            token: token.to_string(),
                        })
                    })?;
                    out.push_str(value);
                    rest = &after[end + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Render and verify: the result is placeholder-complete and parses as a
    /// Kubernetes Pod.
    pub fn render_pod(&self, vars: &TemplateVars) -> Result<Pod, Report<TemplateError>> {
        let rendered = self.render(vars)?;
        verify_manifest(self.name, &rendered)
    }
}

/// Known tokens still present in a rendered manifest.
pub fn unresolved_tokens(rendered: &str) -> Vec<String> {
    TEMPLATE_TOKENS
        .iter()
        .filter(|token| rendered.contains(&format!("{{{token}}}")))
        .map(|token| token.to_string())
        .collect()
}

/// Check a rendered manifest against the two properties every generated
/// document must hold: no known token left unsubstituted, and the YAML
/// deserializes into the Pod schema.
pub fn verify_manifest(
    template: &'static str,
    rendered: &str,
) -> Result<Pod, Report<TemplateError>> {
    let leftover = unresolved_tokens(rendered);
    if !leftover.is_empty() {
        return Err(Report::new(TemplateError::Unresolved {
            template,
            tokens: leftover,
        }));
    }
    serde_yaml::from_str(rendered).map_err(|e| {
        Report::new(TemplateError::InvalidManifest {
            template,
            message: e.to_string(),
        })
    })
}
