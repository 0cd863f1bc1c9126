//! Field inference over a small document sample.
//!
//! Only top-level fields become columns; nested documents and arrays are
//! reported as `object` and `array`. Fields keep the order in which the
//! sample first showed them.

use std::collections::HashMap;

use mongodb::bson::Document;

use super::type_mapping::{MIXED_TYPE, bson_type_name};
use crate::introspect::FieldTypeStrategy;
use crate::models::Column;

/// Field name treated as the collection's primary key
pub const ID_FIELD: &str = "_id";

/// One top-level field seen in the sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredField {
    pub name: String,
    /// Type of the first occurrence
    pub first_type: &'static str,
    /// Distinct types in first-seen order
    pub observed_types: Vec<&'static str>,
    /// Documents that contained the field
    pub occurrences: u32,
}

impl InferredField {
    /// Observed types with `null` left out
    fn non_null_types(&self) -> Vec<&'static str> {
        self.observed_types
            .iter()
            .copied()
            .filter(|t| *t != "null")
            .collect()
    }

    /// Column type and extra text under `strategy`
    fn resolved_type(&self, strategy: FieldTypeStrategy) -> (&'static str, Option<String>) {
        match strategy {
            FieldTypeStrategy::FirstOccurrence => (self.first_type, None),
            FieldTypeStrategy::Unanimous => match self.non_null_types().as_slice() {
                [] => (self.first_type, None),
                [single] => (*single, None),
                several => (MIXED_TYPE, Some(several.join(", "))),
            },
        }
    }

    fn to_column(&self, strategy: FieldTypeStrategy) -> Column {
        let (data_type, extra) = self.resolved_type(strategy);
        let mut column = Column::new(self.name.as_str(), data_type);
        if self.name == ID_FIELD {
            column = column.primary_key();
        }
        if let Some(extra) = extra {
            column = column.with_extra(extra);
        }
        column
    }
}

/// Accumulates field types across sampled documents
#[derive(Debug, Default)]
pub struct SchemaInferrer {
    fields: Vec<InferredField>,
    positions: HashMap<String, usize>,
    document_count: u32,
}

impl SchemaInferrer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze_document(&mut self, doc: &Document) {
        self.document_count = self.document_count.saturating_add(1);
        for (key, value) in doc {
            self.record(key, bson_type_name(value));
        }
    }

    fn record(&mut self, name: &str, type_name: &'static str) {
        let index = match self.positions.get(name) {
            Some(index) => *index,
            None => {
                self.fields.push(InferredField {
                    name: name.to_string(),
                    first_type: type_name,
                    observed_types: Vec::new(),
                    occurrences: 0,
                });
                let index = self.fields.len().saturating_sub(1);
                self.positions.insert(name.to_string(), index);
                index
            }
        };

        let field = &mut self.fields[index];
        field.occurrences = field.occurrences.saturating_add(1);
        if !field.observed_types.contains(&type_name) {
            field.observed_types.push(type_name);
        }
    }

    pub fn document_count(&self) -> u32 {
        self.document_count
    }

    pub fn fields(&self) -> &[InferredField] {
        &self.fields
    }

    /// Columns in first-seen order
    pub fn into_columns(self, strategy: FieldTypeStrategy) -> Vec<Column> {
        self.fields
            .iter()
            .map(|field| field.to_column(strategy))
            .collect()
    }
}
