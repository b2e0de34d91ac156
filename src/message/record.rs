// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::ElementRegistry;

/// Field length marking a variable-length encoding.
pub const VARIABLE_LENGTH: u16 = 0xFFFF;

/// Private enterprise number of the reverse direction of biflow records.
pub const REVERSE_PEN: u32 = 29305;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record truncated: field {field} needs {needed} bytes, {available} left")]
    Truncated {
        field: usize,
        needed: usize,
        available: usize,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    #[default]
    Data,
    Options,
}

/// One field specifier of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(default)]
    pub enterprise: u32,
    pub id: u16,
    pub length: u16,
}

impl FieldSpec {
    pub fn new(enterprise: u32, id: u16, length: u16) -> Self {
        Self {
            enterprise,
            id,
            length,
        }
    }

    pub fn iana(id: u16, length: u16) -> Self {
        Self::new(0, id, length)
    }

    pub fn is_variable(&self) -> bool {
        self.length == VARIABLE_LENGTH
    }

    pub fn is_reverse(&self) -> bool {
        self.enterprise == REVERSE_PEN
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: u16,
    #[serde(default)]
    pub kind: TemplateKind,
    pub fields: Vec<FieldSpec>,
}

impl Template {
    pub fn new(id: u16, kind: TemplateKind, fields: Vec<FieldSpec>) -> Self {
        Self { id, kind, fields }
    }
}

/// A single data record: raw field values laid out as its template describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub template: Arc<Template>,
    pub data: Bytes,
}

impl Record {
    pub fn new(template: Arc<Template>, data: impl Into<Bytes>) -> Self {
        Self {
            template,
            data: data.into(),
        }
    }

    pub fn is_options(&self) -> bool {
        self.template.kind == TemplateKind::Options
    }

    /// Walks the record's fields in template order.
    pub fn fields(&self) -> FieldIter<'_> {
        FieldIter {
            specs: &self.template.fields,
            data: &self.data,
            index: 0,
            offset: 0,
        }
    }
}

pub struct FieldIter<'a> {
    specs: &'a [FieldSpec],
    data: &'a [u8],
    index: usize,
    offset: usize,
}

impl<'a> FieldIter<'a> {
    fn take(&mut self, needed: usize) -> Result<&'a [u8], RecordError> {
        let available = self.data.len() - self.offset;
        if needed > available {
            return Err(RecordError::Truncated {
                field: self.index,
                needed,
                available,
            });
        }
        let value = &self.data[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(value)
    }

    fn next_value(&mut self, spec: &FieldSpec) -> Result<&'a [u8], RecordError> {
        if !spec.is_variable() {
            return self.take(spec.length as usize);
        }
        // 1-byte length, or 255 followed by a 2-byte length
        let len = match self.take(1)?[0] {
            255 => {
                let prefix = self.take(2)?;
                u16::from_be_bytes([prefix[0], prefix[1]]) as usize
            }
            short => short as usize,
        };
        self.take(len)
    }
}

impl<'a> Iterator for FieldIter<'a> {
    type Item = Result<(&'a FieldSpec, &'a [u8]), RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let specs = self.specs;
        let spec = specs.get(self.index)?;
        let item = self.next_value(spec).map(|value| (spec, value));
        if item.is_err() {
            // stop after the first malformed field
            self.index = specs.len();
        } else {
            self.index += 1;
        }
        Some(item)
    }
}

/// A unit of work: records that arrived together plus the element
/// definitions needed to convert them. One worker owns a batch end to end;
/// dropping it releases every record.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    records: Vec<Record>,
    elements: Arc<ElementRegistry>,
}

impl MessageBatch {
    pub fn new(records: Vec<Record>, elements: Arc<ElementRegistry>) -> Self {
        Self { records, elements }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn elements(&self) -> &ElementRegistry {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
