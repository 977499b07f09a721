use std::path::Path;
use tera::{Context, Tera};

use crate::config::GenerationConfig;
use crate::error::{RouteScribeError, Result};
use super::super::context::ContextBundle;

const PYTEST_TEMPLATE: &str = r#"
{{ additional_prompt_pre }}

Write tests(pytest) for the following fastapi route.
Do not use mocks, use parameterize. If needed create a fixture to insert data.
Include import statements when needed.

Url to use: {{ url }}.

{{ additional_prompt_info }}
{% if mock_prompt %}
Available mocks:
python ```
{{ mock_prompt }}
```

===
{% endif %}{% if fixtures_prompt %}
Available fixtures:
python ```
{{ fixtures_prompt }}
```

===
{% endif %}{% if pydantic_prompt %}
Pydantic models:
python```
{{ pydantic_prompt }}
```

===
{% endif %}{% if function_prompt %}
Functions:
python```
{{ function_prompt }}
```

===
{% endif %}{% if db_prompt %}
Use these tables if necessary. Ids are usually autoincrement

{{ db_prompt }}

===
{% endif %}{% if code_prompt %}
Route to test:
python```
{{ code_prompt }}
```
===
{% endif %}
{{ additional_prompt_after }}
"#;

/// Named text sections of a prompt. Absent sections render as nothing.
#[derive(Debug, Clone, Default)]
pub struct PromptSections {
    pub additional_prompt_pre: Option<String>,
    pub additional_prompt_info: Option<String>,
    pub mock_prompt: Option<String>,
    pub fixtures_prompt: Option<String>,
    pub url: Option<String>,
    pub pydantic_prompt: Option<String>,
    pub function_prompt: Option<String>,
    pub db_prompt: Option<String>,
    pub code_prompt: Option<String>,
    pub additional_prompt_after: Option<String>,
}

impl PromptSections {
    /// Sections for one endpoint: bundle content plus the configured free text
    pub fn for_bundle(bundle: &ContextBundle, config: &GenerationConfig) -> Self {
        Self {
            additional_prompt_pre: config.additional_prompt_pre.clone(),
            additional_prompt_info: config.additional_prompt_info.clone(),
            mock_prompt: config.mock_prompt.clone(),
            fixtures_prompt: config.fixtures_prompt.clone(),
            url: Some(bundle.endpoint_path.clone()),
            pydantic_prompt: (!bundle.models.is_empty()).then(|| bundle.models_source()),
            function_prompt: (!bundle.function_calls.is_empty()).then(|| bundle.functions_source()),
            db_prompt: (!bundle.table_markdowns.is_empty()).then(|| bundle.tables_markdown()),
            code_prompt: Some(bundle.source_code.clone()),
            additional_prompt_after: config.additional_prompt_after.clone(),
        }
    }

    fn to_context(&self) -> Context {
        let mut context = Context::new();
        let sections = [
            ("additional_prompt_pre", &self.additional_prompt_pre),
            ("additional_prompt_info", &self.additional_prompt_info),
            ("mock_prompt", &self.mock_prompt),
            ("fixtures_prompt", &self.fixtures_prompt),
            ("url", &self.url),
            ("pydantic_prompt", &self.pydantic_prompt),
            ("function_prompt", &self.function_prompt),
            ("db_prompt", &self.db_prompt),
            ("code_prompt", &self.code_prompt),
            ("additional_prompt_after", &self.additional_prompt_after),
        ];
        for (name, value) in sections {
            context.insert(name, value.as_deref().unwrap_or(""));
        }
        context
    }
}

/// Renders prompts of one type with tera
pub struct PromptRenderer {
    tera: Tera,
    template_name: String,
}

impl PromptRenderer {
    /// Renderer for `prompt_type`, optionally with its template replaced by
    /// the file at `template_override`
    pub fn new(prompt_type: &str, template_override: Option<&Path>) -> Result<Self> {
        let builtin = match prompt_type {
            "pytest" => PYTEST_TEMPLATE,
            other => {
                return Err(RouteScribeError::Config(format!(
                    "prompt_type: {} not supported",
                    other
                )))
            }
        };

        let template = match template_override {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                RouteScribeError::Config(format!("Cannot read prompt template {}: {}", path.display(), e))
            })?,
            None => builtin.to_string(),
        };

        // A .txt name keeps tera from HTML-escaping source code
        let template_name = format!("{}.txt", prompt_type);
        let mut tera = Tera::default();
        tera.add_raw_template(&template_name, &template)?;

        Ok(Self { tera, template_name })
    }

    pub fn render(&self, sections: &PromptSections) -> Result<String> {
        Ok(self.tera.render(&self.template_name, &sections.to_context())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_absent_sections_render_empty() {
        let renderer = PromptRenderer::new("pytest", None).unwrap();
        let prompt = renderer
            .render(&PromptSections {
                url: Some("/users/{id}".to_string()),
                code_prompt: Some("def read_user(id: int):\n    return {\"id\": id}".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert!(prompt.contains("Url to use: /users/{id}."));
        assert!(prompt.contains("Route to test:\npython```\ndef read_user(id: int):\n    return {\"id\": id}\n```"));
        assert!(!prompt.contains("Available mocks"));
        assert!(!prompt.contains("Pydantic models"));
        assert!(!prompt.contains("Use these tables"));
        assert!(!prompt.contains("None"));
    }

    #[test]
    fn test_present_sections_are_wrapped() {
        let renderer = PromptRenderer::new("pytest", None).unwrap();
        let prompt = renderer
            .render(&PromptSections {
                additional_prompt_pre: Some("PRE".to_string()),
                mock_prompt: Some("mock_db = MagicMock()".to_string()),
                pydantic_prompt: Some("class User(BaseModel):\n    name: str\n".to_string()),
                db_prompt: Some("# Table: `users`\n".to_string()),
                additional_prompt_after: Some("AFTER".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert!(prompt.trim_start().starts_with("PRE"));
        assert!(prompt.contains("Available mocks:\npython ```\nmock_db = MagicMock()\n```"));
        assert!(prompt.contains("Pydantic models:\npython```\nclass User(BaseModel):"));
        assert!(prompt.contains("Ids are usually autoincrement\n\n# Table: `users`"));
        assert!(prompt.trim_end().ends_with("AFTER"));
    }

    #[test]
    fn test_unsupported_prompt_type() {
        assert!(matches!(PromptRenderer::new("unittest", None), Err(RouteScribeError::Config(_))));
    }

    #[test]
    fn test_template_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Test {{{{ url }}}} <quickly>").unwrap();
        let renderer = PromptRenderer::new("pytest", Some(file.path())).unwrap();
        let prompt = renderer
            .render(&PromptSections {
                url: Some("/a?b=1&c=2".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(prompt, "Test /a?b=1&c=2 <quickly>");
    }
}
