use std::collections::HashMap;

use anyhow::{Error, Result, anyhow};
use tracing::{debug, warn};

use crate::models::template::{Template, TemplateContent, builtin_templates};

#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<String, Template>,
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::new(builtin_templates())
    }
}

impl TemplateCatalog {
    pub fn new(templates: Vec<Template>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|template| (template.code.clone(), template))
                .collect(),
        }
    }

    pub fn get(&self, template_code: &str) -> Option<&Template> {
        self.templates.get(template_code)
    }

    pub fn render(
        &self,
        template_code: &str,
        variables: &HashMap<String, serde_json::Value>,
    ) -> Result<TemplateContent, Error> {
        let template = self
            .get(template_code)
            .ok_or_else(|| anyhow!("Unknown template: {}", template_code))?;

        debug!(
            template_code,
            variable_count = variables.len(),
            "Rendering template"
        );

        Ok(TemplateContent {
            subject: Self::replace_variables(&template.subject, variables, Escape::None)?,
            html: Self::replace_variables(&template.body_html, variables, Escape::Html)?,
            text: Self::replace_variables(&template.body_text, variables, Escape::None)?,
        })
    }

    /// Single pass over `template`. Inserted values are never scanned again.
    fn replace_variables(
        template: &str,
        variables: &HashMap<String, serde_json::Value>,
        escape: Escape,
    ) -> Result<String, Error> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };

            let placeholder = &rest[start..start + len + 4];
            let key = placeholder[2..placeholder.len() - 2].trim();

            let value = variables.get(key).ok_or_else(|| {
                warn!(
                    missing_variable = %placeholder,
                    "Template contains unreplaced variable"
                );
                anyhow!("Missing variable in template: {}", placeholder)
            })?;

            let replacement = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                _ => {
                    return Err(anyhow!("Unsupported variable type for key '{}'", key));
                }
            };

            result.push_str(&rest[..start]);
            match escape {
                Escape::Html => result.push_str(&html_escape::encode_safe(&replacement)),
                Escape::None => result.push_str(&replacement),
            }
            rest = &rest[start + placeholder.len()..];
        }

        result.push_str(rest);
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy)]
enum Escape {
    None,
    Html,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::template::{REGISTER, RESET_PASSWORD};

    fn vars(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn renders_every_part_of_a_template() {
        let catalog = TemplateCatalog::default();
        let rendered = catalog
            .render(
                REGISTER,
                &vars(&[("name", "Ada".into()), ("otp", 424242.into())]),
            )
            .unwrap();

        assert_eq!(rendered.subject, "Welcome to Our Service - Complete Registration");
        assert!(rendered.html.contains("<strong>424242</strong>"));
        assert!(rendered.text.starts_with("Hi Ada"));
    }

    #[test]
    fn missing_variable_fails() {
        let catalog = TemplateCatalog::default();
        let err = catalog.render(REGISTER, &vars(&[("name", "Ada".into())])).unwrap_err();
        assert!(err.to_string().contains("{{otp}}"));
    }

    #[test]
    fn nested_values_are_rejected() {
        let catalog = TemplateCatalog::default();
        let err = catalog
            .render(RESET_PASSWORD, &vars(&[("name", serde_json::json!({"first": "Ada"}))]))
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported variable type"));
    }

    #[test]
    fn html_part_escapes_values() {
        let catalog = TemplateCatalog::default();
        let rendered = catalog
            .render(
                REGISTER,
                &vars(&[
                    ("name", "<script>alert(1)</script>".into()),
                    ("otp", "123456".into()),
                ]),
            )
            .unwrap();

        assert!(!rendered.html.contains("<script>"));
        assert!(rendered.html.contains("&lt;script&gt;"));
        assert!(rendered.html.contains("<strong>123456</strong>"));
        assert!(rendered.text.starts_with("Hi <script>alert(1)</script>,"));
    }

    #[test]
    fn values_containing_braces_are_inserted_verbatim() {
        let catalog = TemplateCatalog::default();
        let rendered = catalog
            .render(
                REGISTER,
                &vars(&[("name", "{{otp}}".into()), ("otp", "{{weird}}".into())]),
            )
            .unwrap();

        assert_eq!(
            rendered.text,
            "Hi {{otp}}, use the code {{weird}} to complete your registration."
        );
    }

    #[test]
    fn unknown_template_fails() {
        assert!(TemplateCatalog::default().render("NOPE", &HashMap::new()).is_err());
    }
}
