//! Callback interface for reading a document's stored fields.
//!
//! The reader asks the visitor about each field in turn through
//! [`needs_field`][StoredFieldVisitor::needs_field], then hands accepted values to the callback
//! matching their type. Rejected fields are skipped without being decoded.

use crate::field::{FieldInfo, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A visitor's answer for one field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Decode the field and pass it to the visitor.
    Yes,
    /// Skip this field.
    No,
    /// Skip this field and every remaining field of the document.
    Stop,
}

pub trait StoredFieldVisitor {
    fn needs_field(&mut self, field: &FieldInfo) -> Status;

    fn string_field(&mut self, _field: &FieldInfo, _value: &str) {}
    fn binary_field(&mut self, _field: &FieldInfo, _value: &[u8]) {}
    fn int_field(&mut self, _field: &FieldInfo, _value: i32) {}
    fn float_field(&mut self, _field: &FieldInfo, _value: f32) {}
    fn long_field(&mut self, _field: &FieldInfo, _value: i64) {}
    fn double_field(&mut self, _field: &FieldInfo, _value: f64) {}
}

/// One named value of a loaded document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredField {
    pub name: String,
    pub value: FieldValue,
}

/// A document's stored fields, in the order they were written.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub fields: Vec<StoredField>,
}

impl Document {
    /// First value of the named field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Every value of the named field.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldValue> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name == name)
            .map(|f| &f.value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Collects fields into a [`Document`], either all of them or only those with the given names.
#[derive(Clone, Debug, Default)]
pub struct DocumentVisitor {
    wanted: Option<HashSet<String>>,
    doc: Document,
}

impl DocumentVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            wanted: Some(names.into_iter().map(Into::into).collect()),
            doc: Document::default(),
        }
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    fn push(&mut self, field: &FieldInfo, value: FieldValue) {
        self.doc.fields.push(StoredField {
            name: field.name.clone(),
            value,
        });
    }
}

impl StoredFieldVisitor for DocumentVisitor {
    fn needs_field(&mut self, field: &FieldInfo) -> Status {
        match &self.wanted {
            Some(wanted) if !wanted.contains(&field.name) => Status::No,
            _ => Status::Yes,
        }
    }

    fn string_field(&mut self, field: &FieldInfo, value: &str) {
        self.push(field, FieldValue::String(value.to_string()));
    }

    fn binary_field(&mut self, field: &FieldInfo, value: &[u8]) {
        self.push(field, FieldValue::Binary(value.to_vec()));
    }

    fn int_field(&mut self, field: &FieldInfo, value: i32) {
        self.push(field, FieldValue::Int(value));
    }

    fn float_field(&mut self, field: &FieldInfo, value: f32) {
        self.push(field, FieldValue::Float(value));
    }

    fn long_field(&mut self, field: &FieldInfo, value: i64) {
        self.push(field, FieldValue::Long(value));
    }

    fn double_field(&mut self, field: &FieldInfo, value: f64) {
        self.push(field, FieldValue::Double(value));
    }
}
