use crate::error::{Error, Result};
use crate::services::helpers::docker_helper::{ContainerIdentity, ContainerState};
use crate::services::helpers::template::Template;
use bollard::models::{ContainerInspectResponse, ContainerSummary};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// The label every sample carries, holding the container's display name.
pub const NAME_LABEL: &str = "name";

lazy_static! {
    static ref LABEL_NAME: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

/// User-defined labels, each rendered from a template per container.
///
/// Built once at startup and never modified. Labels are kept ordered by name so
/// that every sample of the process lists them in the same order.
#[derive(Debug, Clone, Default)]
pub struct LabelSpec {
    labels: Vec<(String, Template)>,
}

impl LabelSpec {
    /// Validates the label names and parses every template.
    ///
    /// # Arguments
    ///
    /// * `declared` - Pairs of label name and template source.
    ///
    /// # Returns
    /// * `Ok(LabelSpec)` when every name is a valid, non-reserved label name and
    ///   every template parses.
    /// * `Err(Error::InvalidLabelName)` or `Err(Error::TemplateSyntax)` otherwise.
    pub fn new<I>(declared: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut labels = BTreeMap::new();
        for (name, source) in declared {
            if !LABEL_NAME.is_match(&name) || name.starts_with("__") || name == NAME_LABEL {
                return Err(Error::InvalidLabelName(name));
            }
            let template = Template::parse(&source).map_err(|source| Error::TemplateSyntax {
                label: name.clone(),
                source,
            })?;
            labels.insert(name, template);
        }

        Ok(Self {
            labels: labels.into_iter().collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `name` followed by every custom label, in emission order.
    pub fn label_names(&self) -> Vec<String> {
        std::iter::once(NAME_LABEL.to_owned())
            .chain(self.labels.iter().map(|(name, _)| name.clone()))
            .collect()
    }

    /// Resolves the label values for one container.
    ///
    /// The result always has the names of [`label_names`](Self::label_names), in
    /// that order. A template that fails to render is logged and yields an empty
    /// value.
    pub fn evaluate(&self, context: &TemplateContext<'_>) -> Vec<(String, String)> {
        let mut values = Vec::with_capacity(self.labels.len() + 1);
        values.push((
            NAME_LABEL.to_owned(),
            context.identity.display_name().to_owned(),
        ));
        if self.is_empty() {
            return values;
        }

        let data = context.to_value();
        for (name, template) in &self.labels {
            let value = template.render(&data).unwrap_or_else(|source| {
                let err = Error::LabelRender {
                    label: name.clone(),
                    source,
                };
                log::warn!("container {}: {}", context.identity, err);
                String::new()
            });
            values.push((name.clone(), value));
        }
        values
    }
}

/// Everything a label template can see about a container.
///
/// Exposed to templates as `.ID`, `.Name`, `.State`, `.Container` (list entry),
/// `.ContainerJSON` (inspect result) and `.Stats` (raw stats, empty when the
/// container is not running). Nested fields are spelled as in the Engine API.
pub struct TemplateContext<'a> {
    pub identity: &'a ContainerIdentity,
    pub state: &'a ContainerState,
    pub summary: &'a ContainerSummary,
    pub metadata: &'a ContainerInspectResponse,
    pub stats: Option<&'a Value>,
}

impl TemplateContext<'_> {
    fn to_value(&self) -> Value {
        json!({
            "ID": self.identity.id,
            "Name": self.identity.display_name(),
            "State": self.state.as_str(),
            "Container": serde_json::to_value(self.summary).unwrap_or_default(),
            "ContainerJSON": serde_json::to_value(self.metadata).unwrap_or_default(),
            "Stats": self.stats.cloned().unwrap_or_default(),
        })
    }
}
