//! Flow records as handed over by the collector.
//!
//! A [`MessageBatch`] groups the [`Record`]s of one export message together
//! with the [`ElementRegistry`] used to name and type their fields.

pub use element::{ElementDef, ElementRegistry, ElementType};
pub use record::{
    FieldIter, FieldSpec, MessageBatch, Record, RecordError, Template, TemplateKind, REVERSE_PEN,
    VARIABLE_LENGTH,
};

mod element;
mod record;
