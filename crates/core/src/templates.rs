//! Message template rendering engine.

use crate::types::{MessageTemplate, TemplateStatus, TemplateVariable};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// Simple template renderer using {{variable}} syntax.
///
/// Variables come from the execution's JSON variable bag; an undefined
/// variable renders as the empty string, never an error.
pub struct TemplateRenderer {
    templates: DashMap<Uuid, MessageTemplate>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    pub fn register_template(&self, template: MessageTemplate) -> Uuid {
        let id = template.id;
        self.templates.insert(id, template);
        id
    }

    pub fn get_template(&self, id: &Uuid) -> Option<MessageTemplate> {
        self.templates.get(id).map(|t| t.clone())
    }

    pub fn list_templates(&self) -> Vec<MessageTemplate> {
        self.templates.iter().map(|t| t.clone()).collect()
    }

    /// Render a template with the given variables. Returns `None` if the
    /// template does not exist or is not active.
    pub fn render(
        &self,
        template_id: &Uuid,
        variables: &serde_json::Map<String, Value>,
    ) -> Option<RenderedMessage> {
        let template = self.templates.get(template_id)?;
        if template.status != TemplateStatus::Active {
            return None;
        }

        let subject = substitute(&template.subject, variables, &template.variables);
        let body = substitute(&template.body_template, variables, &template.variables);
        let html_body = template
            .html_template
            .as_ref()
            .map(|t| substitute(t, variables, &template.variables));

        Some(RenderedMessage {
            template_id: *template_id,
            subject,
            body,
            html_body,
            rendered_at: Utc::now(),
        })
    }
}

/// Replace every `{{name}}` placeholder: explicit variable value first,
/// then the template's declared default, then the empty string.
fn substitute(
    template_str: &str,
    variables: &serde_json::Map<String, Value>,
    var_defs: &[TemplateVariable],
) -> String {
    let mut result = String::with_capacity(template_str.len());
    let mut rest = template_str;

    while let Some(start) = rest.find("{{") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                result.push_str(&resolve(name, variables, var_defs));
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder; emit verbatim.
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

fn resolve(
    name: &str,
    variables: &serde_json::Map<String, Value>,
    var_defs: &[TemplateVariable],
) -> String {
    if let Some(value) = variables.get(name) {
        return stringify(value);
    }
    var_defs
        .iter()
        .find(|d| d.name == name)
        .and_then(|d| d.default_value.clone())
        .unwrap_or_default()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub template_id: Uuid,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub rendered_at: chrono::DateTime<chrono::Utc>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}
