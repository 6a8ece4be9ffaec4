//! Versioned story documents and reusable prompt templates.

mod store;
mod templates;

pub use store::{PromptVersion, Story, StoryStore};
pub use templates::{GlobalPromptTemplate, TemplateRegistry};
