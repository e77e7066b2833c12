use serde::{Deserialize, Serialize};

use crate::config::BYTES_PER_VEC4;
use crate::error::{MemError, MemResult};

/// Storage class of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    Byte,
    Short,
    Int,
    Float,
    ByteArray(usize),
    ShortArray(usize),
    IntArray(usize),
    FloatArray(usize),
    /// `n` elements of four packed floats each.
    Vec4Array(usize),
}

/// Primitive element type a field is read and written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    U8,
    I16,
    I32,
    F32,
}

impl FieldKind {
    pub fn element_type(self) -> ElementType {
        match self {
            FieldKind::Byte | FieldKind::ByteArray(_) => ElementType::U8,
            FieldKind::Short | FieldKind::ShortArray(_) => ElementType::I16,
            FieldKind::Int | FieldKind::IntArray(_) => ElementType::I32,
            FieldKind::Float | FieldKind::FloatArray(_) | FieldKind::Vec4Array(_) => ElementType::F32,
        }
    }

    /// Bytes per addressable element.
    pub fn element_size(self) -> usize {
        match self.element_type() {
            ElementType::U8 => 1,
            ElementType::I16 => 2,
            ElementType::I32 | ElementType::F32 => 4,
        }
    }

    /// Addressable elements in the field. A vec4 counts as four floats.
    pub fn len(self) -> usize {
        match self {
            FieldKind::Byte | FieldKind::Short | FieldKind::Int | FieldKind::Float => 1,
            FieldKind::ByteArray(n)
            | FieldKind::ShortArray(n)
            | FieldKind::IntArray(n)
            | FieldKind::FloatArray(n) => n,
            FieldKind::Vec4Array(n) => n * (BYTES_PER_VEC4 / 4),
        }
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(self) -> usize {
        self.element_size() * self.len()
    }
}

/// One laid-out field of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    /// Byte offset within a record.
    pub offset: usize,
}

/// Ordered record layout. Offsets are cumulative in declaration order and
/// fixed once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
    object_size: usize,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Record size: the sum of all field sizes, unpadded.
    pub fn object_size(&self) -> usize {
        self.object_size
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    fields: Vec<(String, FieldKind)>,
}

impl SchemaBuilder {
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }

    pub fn build(self) -> MemResult<Schema> {
        let mut offset = 0;
        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, kind) in self.fields {
            fields.push(Field { name, kind, offset });
            offset += kind.size_bytes();
        }
        if offset == 0 {
            return Err(MemError::EmptySchema);
        }
        Ok(Schema {
            fields,
            object_size: offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate_in_declaration_order() {
        let schema = Schema::builder()
            .field("flags", FieldKind::Byte)
            .field("kind", FieldKind::Short)
            .field("id", FieldKind::Int)
            .field("verts", FieldKind::Vec4Array(2))
            .field("tags", FieldKind::ByteArray(3))
            .build()
            .unwrap();
        let offsets: Vec<usize> = schema.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 1, 3, 7, 39]);
        assert_eq!(schema.object_size(), 42);
        assert_eq!(schema.field("id").unwrap().kind, FieldKind::Int);
        assert!(schema.field("missing").is_none());
    }

    #[test]
    fn vec4_elements_are_floats() {
        assert_eq!(FieldKind::Vec4Array(3).len(), 12);
        assert_eq!(FieldKind::Vec4Array(3).size_bytes(), 48);
        assert_eq!(FieldKind::Vec4Array(1).element_type(), ElementType::F32);
    }

    #[test]
    fn empty_schema_is_rejected() {
        assert_eq!(Schema::builder().build().unwrap_err(), MemError::EmptySchema);
        let zero = Schema::builder().field("none", FieldKind::IntArray(0)).build();
        assert_eq!(zero.unwrap_err(), MemError::EmptySchema);
    }
}
