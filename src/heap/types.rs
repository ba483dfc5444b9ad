//! Resolved type records and their classification.
//!
//! A [`ClrType`] is one entry in the heap's type arena: an immutable record built from a raw
//! method table, with the expensive parts (base type, element kind, GC descriptor, fields,
//! interfaces) left to lazy cells that the owning [`crate::heap::ClrHeap`] fills on demand.
//! Cross-references between types are arena indices, never object references - the arena is
//! dropped wholesale on flush, so there are no lifetime cycles to manage.
//!
//! The original runtime models arrays and signature-synthesized placeholders as subclasses of
//! a common type class; here that is the [`TypeKind`] sum type, dispatched by pattern
//! matching.

use std::sync::OnceLock;

use crate::{heap::fields::TypeFields, heap::gcdesc::GcDesc, token::Token};

/// Composite key identifying a resolved type within one revision of the target.
///
/// Arrays share a single well-known method table; their identity needs the
/// component method table as well, hence the pair. Equality and hash are
/// structural over both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle {
    /// Method table address
    pub method_table: u64,
    /// Component method table address; 0 for non-arrays and unknown components
    pub component_method_table: u64,
}

impl TypeHandle {
    /// Create a handle from a method table and optional component table.
    #[must_use]
    pub fn new(method_table: u64, component_method_table: u64) -> Self {
        TypeHandle {
            method_table,
            component_method_table,
        }
    }
}

/// Position of a type record in the heap's arena.
///
/// Indices are handed out sequentially at construction and stay valid until
/// the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeIndex(pub(crate) u32);

impl TypeIndex {
    /// Raw arena position.
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }
}

/// Element kind of a type or field, mirroring the CLR's CorElementType.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ClrElementType {
    /// Not determined / unrecognized byte
    Unknown,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    Int8,
    /// `System.Byte`
    UInt8,
    /// `System.Int16`
    Int16,
    /// `System.UInt16`
    UInt16,
    /// `System.Int32`
    Int32,
    /// `System.UInt32`
    UInt32,
    /// `System.Int64`
    Int64,
    /// `System.UInt64`
    UInt64,
    /// `System.Single`
    Float,
    /// `System.Double`
    Double,
    /// `System.String`
    String,
    /// Unmanaged pointer
    Pointer,
    /// Value type (struct)
    Struct,
    /// Reference type
    Class,
    /// Multi-dimensional or non-zero-based array
    Array,
    /// `System.IntPtr`
    NativeInt,
    /// `System.UIntPtr`
    NativeUInt,
    /// Function pointer
    FunctionPointer,
    /// `System.Object`
    Object,
    /// Single-dimensional zero-based array
    SZArray,
}

impl ClrElementType {
    /// Decode a raw CorElementType byte.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x02 => ClrElementType::Boolean,
            0x03 => ClrElementType::Char,
            0x04 => ClrElementType::Int8,
            0x05 => ClrElementType::UInt8,
            0x06 => ClrElementType::Int16,
            0x07 => ClrElementType::UInt16,
            0x08 => ClrElementType::Int32,
            0x09 => ClrElementType::UInt32,
            0x0A => ClrElementType::Int64,
            0x0B => ClrElementType::UInt64,
            0x0C => ClrElementType::Float,
            0x0D => ClrElementType::Double,
            0x0E => ClrElementType::String,
            0x0F => ClrElementType::Pointer,
            0x11 => ClrElementType::Struct,
            0x12 => ClrElementType::Class,
            0x14 => ClrElementType::Array,
            0x18 => ClrElementType::NativeInt,
            0x19 => ClrElementType::NativeUInt,
            0x1B => ClrElementType::FunctionPointer,
            0x1C => ClrElementType::Object,
            0x1D => ClrElementType::SZArray,
            _ => ClrElementType::Unknown,
        }
    }

    /// Raw CorElementType byte for this kind.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            ClrElementType::Unknown => 0x00,
            ClrElementType::Boolean => 0x02,
            ClrElementType::Char => 0x03,
            ClrElementType::Int8 => 0x04,
            ClrElementType::UInt8 => 0x05,
            ClrElementType::Int16 => 0x06,
            ClrElementType::UInt16 => 0x07,
            ClrElementType::Int32 => 0x08,
            ClrElementType::UInt32 => 0x09,
            ClrElementType::Int64 => 0x0A,
            ClrElementType::UInt64 => 0x0B,
            ClrElementType::Float => 0x0C,
            ClrElementType::Double => 0x0D,
            ClrElementType::String => 0x0E,
            ClrElementType::Pointer => 0x0F,
            ClrElementType::Struct => 0x11,
            ClrElementType::Class => 0x12,
            ClrElementType::Array => 0x14,
            ClrElementType::NativeInt => 0x18,
            ClrElementType::NativeUInt => 0x19,
            ClrElementType::FunctionPointer => 0x1B,
            ClrElementType::Object => 0x1C,
            ClrElementType::SZArray => 0x1D,
        }
    }

    /// Whether values of this kind are GC object references.
    #[must_use]
    pub fn is_object_reference(self) -> bool {
        matches!(
            self,
            ClrElementType::String
                | ClrElementType::Class
                | ClrElementType::Array
                | ClrElementType::SZArray
                | ClrElementType::Object
        )
    }

    /// Whether this kind is a fixed-width primitive.
    #[must_use]
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            ClrElementType::Boolean
                | ClrElementType::Char
                | ClrElementType::Int8
                | ClrElementType::UInt8
                | ClrElementType::Int16
                | ClrElementType::UInt16
                | ClrElementType::Int32
                | ClrElementType::UInt32
                | ClrElementType::Int64
                | ClrElementType::UInt64
                | ClrElementType::Float
                | ClrElementType::Double
                | ClrElementType::NativeInt
                | ClrElementType::NativeUInt
        )
    }
}

/// Map a fully qualified name to its primitive element kind.
///
/// Used when element-kind inference reaches `System.ValueType`: the dozen or so
/// primitive CLR value types are told apart by name alone.
#[must_use]
pub(crate) fn primitive_from_name(name: &str) -> Option<ClrElementType> {
    match name {
        "System.Boolean" => Some(ClrElementType::Boolean),
        "System.Char" => Some(ClrElementType::Char),
        "System.SByte" => Some(ClrElementType::Int8),
        "System.Byte" => Some(ClrElementType::UInt8),
        "System.Int16" => Some(ClrElementType::Int16),
        "System.UInt16" => Some(ClrElementType::UInt16),
        "System.Int32" => Some(ClrElementType::Int32),
        "System.UInt32" => Some(ClrElementType::UInt32),
        "System.Int64" => Some(ClrElementType::Int64),
        "System.UInt64" => Some(ClrElementType::UInt64),
        "System.Single" => Some(ClrElementType::Float),
        "System.Double" => Some(ClrElementType::Double),
        "System.IntPtr" => Some(ClrElementType::NativeInt),
        "System.UIntPtr" => Some(ClrElementType::NativeUInt),
        _ => None,
    }
}

/// Placeholder name used when the target cannot produce a type name.
///
/// Such names never participate in the generic-collapse equality check: two
/// method tables that both resolve to `<UNKNOWN>` stay distinct entries.
pub const UNKNOWN_TYPE_NAME: &str = "<UNKNOWN>";

/// Array-specific state of a type record.
#[derive(Debug, Default)]
pub struct ArrayInfo {
    /// Component method table, once known. May be backfilled later from a
    /// concrete object's element-type handle.
    pub(crate) component_mt: OnceLock<u64>,
    /// Resolved component type, `None` when resolution failed
    pub(crate) component: OnceLock<Option<TypeIndex>>,
    /// Component element kind, when known without a full type
    pub(crate) component_element: OnceLock<ClrElementType>,
    /// Array rank; 1 for SZ arrays
    pub(crate) rank: u32,
}

impl ArrayInfo {
    pub(crate) fn new(rank: u32) -> Self {
        ArrayInfo {
            rank,
            ..ArrayInfo::default()
        }
    }

    /// Array rank (1 for single-dimensional zero-based arrays).
    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Component element kind, if it has been determined.
    #[must_use]
    pub fn component_element(&self) -> Option<ClrElementType> {
        self.component_element.get().copied()
    }
}

/// What kind of record a [`ClrType`] is.
///
/// Replaces the inheritance hierarchy of the original model: one tagged
/// variant carrying only the state relevant to its tag.
#[derive(Debug)]
pub enum TypeKind {
    /// An ordinary reference or value type backed by a real method table
    Object,
    /// An array type; component resolution state lives in [`ArrayInfo`]
    Array(ArrayInfo),
    /// A type synthesized from a field signature blob because the real type
    /// was not loaded; approximate by design (rank/bounds may be
    /// under-specified)
    Placeholder {
        /// Element kind the signature declared
        element: ClrElementType,
    },
}

/// One resolved managed type.
///
/// Owned exclusively by the heap's arena; everything else refers to it by
/// [`TypeIndex`] or through a cheap `Arc` clone. The record itself is
/// immutable - the `OnceLock` cells are write-once caches filled by the
/// owning heap, which is also why every lazy accessor lives on
/// [`crate::heap::ClrHeap`] rather than here.
pub struct ClrType {
    pub(crate) index: TypeIndex,
    pub(crate) revision: u32,
    pub(crate) handle: TypeHandle,
    pub(crate) name: String,
    pub(crate) module: u64,
    pub(crate) token: Token,
    pub(crate) base_size: u64,
    pub(crate) component_size: u32,
    pub(crate) contains_pointers: bool,
    pub(crate) shared: bool,
    pub(crate) is_free: bool,
    pub(crate) parent_mt: u64,
    pub(crate) first_field: u64,
    pub(crate) num_instance_fields: u32,
    pub(crate) num_static_fields: u32,
    pub(crate) num_thread_static_fields: u32,
    pub(crate) kind: TypeKind,
    pub(crate) base_type: OnceLock<Option<TypeIndex>>,
    pub(crate) element_type: OnceLock<ClrElementType>,
    pub(crate) gc_desc: OnceLock<Option<GcDesc>>,
    pub(crate) fields: OnceLock<std::sync::Arc<TypeFields>>,
    pub(crate) interfaces: OnceLock<std::sync::Arc<Vec<String>>>,
}

impl ClrType {
    /// Position of this record in the heap's type list.
    #[must_use]
    pub fn index(&self) -> TypeIndex {
        self.index
    }

    /// The `(method table, component)` handle this record was resolved from.
    #[must_use]
    pub fn handle(&self) -> TypeHandle {
        self.handle
    }

    /// Method table address.
    #[must_use]
    pub fn method_table(&self) -> u64 {
        self.handle.method_table
    }

    /// Fully qualified type name, or [`UNKNOWN_TYPE_NAME`].
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the module the type is defined in.
    #[must_use]
    pub fn module_address(&self) -> u64 {
        self.module
    }

    /// Metadata token. For dynamic modules this is the raw method table
    /// address reinterpreted, since those have no stable tokens.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Fixed instance size in bytes.
    #[must_use]
    pub fn base_size(&self) -> u64 {
        self.base_size
    }

    /// Array element stride; 0 for non-array types.
    #[must_use]
    pub fn component_size(&self) -> u32 {
        self.component_size
    }

    /// Whether instances contain GC references.
    #[must_use]
    pub fn contains_pointers(&self) -> bool {
        self.contains_pointers
    }

    /// Whether the type is loaded domain-neutral.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Whether this is the "Free" pseudo-type marking dead heap space.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.is_free
    }

    /// The record's kind tag.
    #[must_use]
    pub fn kind(&self) -> &TypeKind {
        &self.kind
    }

    /// Whether this record describes an array.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array(_))
    }

    /// Array state, when [`Self::is_array`].
    #[must_use]
    pub fn array_info(&self) -> Option<&ArrayInfo> {
        match &self.kind {
            TypeKind::Array(info) => Some(info),
            _ => None,
        }
    }

    /// Element kind, if it has already been inferred. Use
    /// [`crate::heap::ClrHeap::element_type`] to force inference.
    #[must_use]
    pub fn cached_element_type(&self) -> Option<ClrElementType> {
        self.element_type.get().copied()
    }
}

impl std::fmt::Debug for ClrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClrType")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("mt", &format_args!("{:#x}", self.handle.method_table))
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
