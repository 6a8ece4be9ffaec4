use crate::error::StoryError;
use log::info;

/// A reusable seed for new stories. At most one template is the default.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalPromptTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
    pub is_default: bool,
}

#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: Vec<GlobalPromptTemplate>,
    id_counter: u64,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn templates(&self) -> &[GlobalPromptTemplate] {
        &self.templates
    }

    pub fn add(&mut self, name: &str, content: &str) -> String {
        self.id_counter += 1;
        let id = format!("tpl_{}", self.id_counter);
        self.templates.push(GlobalPromptTemplate {
            id: id.clone(),
            name: name.to_string(),
            content: content.to_string(),
            is_default: false,
        });
        info!("added prompt template (template_id={id})");
        id
    }

    pub fn remove(&mut self, template_id: &str) -> Result<(), StoryError> {
        let index = self
            .templates
            .iter()
            .position(|t| t.id == template_id)
            .ok_or_else(|| StoryError::TemplateNotFound(template_id.to_string()))?;
        self.templates.remove(index);
        Ok(())
    }

    /// Mark one template as default, clearing the flag on all others.
    pub fn set_default(&mut self, template_id: &str) -> Result<(), StoryError> {
        if !self.templates.iter().any(|t| t.id == template_id) {
            return Err(StoryError::TemplateNotFound(template_id.to_string()));
        }
        for template in &mut self.templates {
            template.is_default = template.id == template_id;
        }
        info!("set default prompt template (template_id={template_id})");
        Ok(())
    }

    pub fn default_template(&self) -> Option<&GlobalPromptTemplate> {
        self.templates.iter().find(|t| t.is_default)
    }
}
