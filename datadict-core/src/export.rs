//! Rendering seam for finished dictionaries.
//!
//! Document generators implement [`DictionaryRenderer`]; the JSON renderer
//! here is what the command-line collector writes.

use serde::{Deserialize, Serialize};

use crate::error::{DataDictError, Result};
use crate::models::DataDictionary;

/// Document metadata and which per-table artifacts to include
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    pub title: String,
    pub description: String,
    pub include_examples: bool,
    pub include_definition_scripts: bool,
    pub include_procedures: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            title: "Data Dictionary".to_string(),
            description: String::new(),
            include_examples: true,
            include_definition_scripts: true,
            include_procedures: true,
        }
    }
}

impl ExportOptions {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_examples(mut self, include: bool) -> Self {
        self.include_examples = include;
        self
    }

    pub fn with_definition_scripts(mut self, include: bool) -> Self {
        self.include_definition_scripts = include;
        self
    }

    pub fn with_procedures(mut self, include: bool) -> Self {
        self.include_procedures = include;
        self
    }

    /// Copy of `dictionary` with excluded artifacts cleared
    pub fn apply(&self, dictionary: &DataDictionary) -> DataDictionary {
        let mut filtered = dictionary.clone();
        for table in &mut filtered.tables {
            if !self.include_examples {
                table.artifacts.example_statements = None;
            }
            if !self.include_definition_scripts {
                table.artifacts.definition_script = None;
            }
            if !self.include_procedures {
                table.artifacts.related_procedures = None;
            }
        }
        filtered
    }
}

/// Turns a dictionary into a document
pub trait DictionaryRenderer: Send + Sync {
    /// MIME type of the rendered bytes
    fn content_type(&self) -> &'static str;

    /// Suggested file extension, without the dot
    fn file_extension(&self) -> &'static str;

    /// # Errors
    /// `Serialization` when the document cannot be produced
    fn render(&self, dictionary: &DataDictionary, options: &ExportOptions) -> Result<Vec<u8>>;
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(flatten)]
    dictionary: DataDictionary,
}

/// Renders the canonical model as JSON
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer {
    pub pretty: bool,
}

impl JsonRenderer {
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl DictionaryRenderer for JsonRenderer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, dictionary: &DataDictionary, options: &ExportOptions) -> Result<Vec<u8>> {
        let document = JsonDocument {
            title: &options.title,
            description: Some(options.description.as_str()).filter(|d| !d.is_empty()),
            dictionary: options.apply(dictionary),
        };
        let rendered = if self.pretty {
            serde_json::to_vec_pretty(&document)
        } else {
            serde_json::to_vec(&document)
        };
        rendered.map_err(|source| DataDictError::Serialization {
            context: format!("Failed to render '{}' as JSON", dictionary.database_name),
            source,
        })
    }
}
