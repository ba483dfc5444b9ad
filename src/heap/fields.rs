//! Field resolution: from raw field descriptors to addresses and values.
//!
//! For a given field descriptor and a context - an object address for instance fields, an
//! AppDomain for statics, a thread for thread-statics - this module computes where the field's
//! storage lives in the target and decodes the value stored there.
//!
//! # Addressing rules
//!
//! - Instance fields of heap objects live at `object + offset + pointer_size`; the extra word
//!   skips the object header. Fields of an *embedded* struct (interior access) live at
//!   `address + offset` with no header skip - the caller states which mode applies.
//! - Static fields live in the domain-local storage block of their (module, AppDomain) pair,
//!   gated by a per-class initialization bit; an uninitialized class reports no address at
//!   all rather than a garbage read.
//! - Thread-static fields are located by a DAC request against the thread's TLS blocks.
//!
//! # The signature fallback
//!
//! A field whose type has not been loaded yet has a zero type-method-table; the only
//! description left is the raw metadata signature blob. The fallback parser decodes just
//! enough of it (calling convention, custom modifier skip, element byte, array peek) to
//! classify the field and synthesize a placeholder array type. It is deliberately
//! approximate: exact rank bounds are not recovered, which is acceptable for a type that the
//! target itself never materialized.

use crate::{
    heap::types::{ClrElementType, TypeIndex, UNKNOWN_TYPE_NAME},
    heap::ClrHeap,
    memory::MemoryReader,
    parser::Parser,
    runtime::domains::AppDomain,
    runtime::threads::ClrThread,
    token::Token,
};

/// FIELD calling-convention tag of a field signature blob (ECMA-335 II.23.2.4).
const SIG_FIELD: u8 = 0x06;
/// Required custom modifier marker.
const ELEM_CMOD_REQD: u8 = 0x1F;
/// Optional custom modifier marker.
const ELEM_CMOD_OPT: u8 = 0x20;
/// Class/valuetype element bytes carry a trailing compressed token.
const ELEM_CLASS: u8 = 0x12;
const ELEM_VALUETYPE: u8 = 0x11;

/// Per-class static initialization bit inside the domain-local class-data blob.
const CLASS_INIT_FLAG: u8 = 0x01;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum ClrValue {
    /// Boolean
    Boolean(bool),
    /// UTF-16 code unit
    Char(u16),
    /// Signed 8-bit
    Int8(i8),
    /// Unsigned 8-bit
    UInt8(u8),
    /// Signed 16-bit
    Int16(i16),
    /// Unsigned 16-bit
    UInt16(u16),
    /// Signed 32-bit
    Int32(i32),
    /// Unsigned 32-bit
    UInt32(u32),
    /// Signed 64-bit
    Int64(i64),
    /// Unsigned 64-bit
    UInt64(u64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// Pointer-sized integer (IntPtr/UIntPtr/unmanaged pointers)
    NativeWord(u64),
    /// Object reference (address on the GC heap, 0 for null)
    ObjectRef(u64),
    /// Decoded string contents
    String(String),
    /// Embedded value type; the address of its first byte
    Struct(u64),
}

/// State shared by all three field flavors.
#[derive(Debug, Clone)]
pub struct FieldCore {
    /// Field name, or `<UNKNOWN>` when metadata could not be read
    pub name: String,
    /// Field definition token
    pub token: Token,
    /// Offset within the instance or static block
    pub offset: u32,
    /// Element kind
    pub element: ClrElementType,
    /// Resolved (or placeholder) type of the field, when available
    pub field_type: Option<TypeIndex>,
    /// Module owning the field definition
    pub module: u64,
}

/// An ordinary per-instance field.
#[derive(Debug, Clone)]
pub struct InstanceField {
    /// Common field state
    pub core: FieldCore,
}

impl InstanceField {
    /// Storage address of this field for the object (or embedded struct) at
    /// `address`.
    ///
    /// Heap objects carry a header word before their field block, so the
    /// non-interior form adds one pointer size; `interior` access into an
    /// embedded struct starts at the struct's own first byte.
    #[must_use]
    pub fn address(&self, heap: &ClrHeap, address: u64, interior: bool) -> u64 {
        if interior {
            address.wrapping_add(u64::from(self.core.offset))
        } else {
            address
                .wrapping_add(u64::from(self.core.offset))
                .wrapping_add(heap.abi().pointer_size())
        }
    }

    /// Decode the field's value for the object at `address`.
    ///
    /// Returns `None` when the storage is unreadable.
    #[must_use]
    pub fn read(&self, heap: &ClrHeap, address: u64, interior: bool) -> Option<ClrValue> {
        read_value(heap, self.address(heap, address, interior), self.core.element)
    }
}

/// A static field, stored per AppDomain (or once, for domain-neutral types).
#[derive(Debug, Clone)]
pub struct StaticField {
    /// Common field state
    pub core: FieldCore,
    /// Module the declaring type lives in
    pub declaring_module: u64,
    /// Runtime module id, the key for shared static storage lookup
    pub module_id: u64,
    /// Declaring type's token; indexes the per-class init flags
    pub declaring_token: Token,
    /// Whether the declaring type is loaded domain-neutral
    pub shared: bool,
}

impl StaticField {
    /// Storage address of this static within `domain`, or `None` when the
    /// class has not been initialized there (or storage cannot be located).
    #[must_use]
    pub fn address(&self, heap: &ClrHeap, domain: &AppDomain) -> Option<u64> {
        let dlm = if self.shared {
            heap.dac()
                .domain_local_module(domain.address(), self.module_id)
                .ok()?
        } else {
            heap.dac()
                .domain_local_module_by_module(self.declaring_module)
                .ok()?
        };

        if !self.class_initialized(heap, dlm.class_data) {
            return None;
        }

        let base = if self.core.element.is_object_reference()
            || self.core.element == ClrElementType::Struct
        {
            dlm.gc_static_data_start
        } else {
            dlm.non_gc_static_data_start
        };
        if base == 0 {
            return None;
        }
        Some(base.wrapping_add(u64::from(self.core.offset)))
    }

    /// Decode the static's value within `domain`. `None` when uninitialized
    /// or unreadable.
    #[must_use]
    pub fn read(&self, heap: &ClrHeap, domain: &AppDomain) -> Option<ClrValue> {
        let address = self.address(heap, domain)?;
        read_value(heap, address, self.core.element)
    }

    fn class_initialized(&self, heap: &ClrHeap, class_data: u64) -> bool {
        if class_data == 0 {
            return false;
        }
        let row = self.declaring_token.row();
        if row == 0 {
            return false;
        }
        let flag_address = class_data.wrapping_add(u64::from(row - 1));
        match heap.dac().read_u8(flag_address) {
            Ok(flags) => flags & CLASS_INIT_FLAG != 0,
            Err(_) => false,
        }
    }
}

/// A thread-static field, stored in per-thread TLS blocks.
#[derive(Debug, Clone)]
pub struct ThreadStaticField {
    /// Common field state
    pub core: FieldCore,
    /// Runtime module id of the defining module
    pub module_id: u64,
    /// Whether the declaring type is loaded domain-neutral
    pub shared: bool,
}

impl ThreadStaticField {
    /// Storage address of this field for `thread`, or `None` when the thread
    /// has no TLS block for it yet.
    ///
    /// The element kind selects between the thread's GC and non-GC static
    /// blocks; the DAC resolves the final address.
    #[must_use]
    pub fn address(&self, heap: &ClrHeap, thread: &ClrThread) -> Option<u64> {
        let address = heap
            .dac()
            .thread_static_pointer(
                thread.address(),
                self.core.element.to_u8(),
                self.core.offset,
                self.module_id,
                self.shared,
            )
            .ok()?;
        if address == 0 {
            None
        } else {
            Some(address)
        }
    }

    /// Decode the field's value for `thread`.
    #[must_use]
    pub fn read(&self, heap: &ClrHeap, thread: &ClrThread) -> Option<ClrValue> {
        let address = self.address(heap, thread)?;
        read_value(heap, address, self.core.element)
    }
}

/// All fields of one type, grouped by storage flavor.
#[derive(Debug, Default)]
pub struct TypeFields {
    /// Per-instance fields
    pub instance: Vec<InstanceField>,
    /// Per-domain statics
    pub statics: Vec<StaticField>,
    /// Per-thread statics
    pub thread_statics: Vec<ThreadStaticField>,
}

impl TypeFields {
    /// Find an instance field by name.
    #[must_use]
    pub fn instance_by_name(&self, name: &str) -> Option<&InstanceField> {
        self.instance.iter().find(|f| f.core.name == name)
    }

    /// Find a static field by name.
    #[must_use]
    pub fn static_by_name(&self, name: &str) -> Option<&StaticField> {
        self.statics.iter().find(|f| f.core.name == name)
    }

    /// Total field count across all flavors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instance.len() + self.statics.len() + self.thread_statics.len()
    }

    /// Whether the type has no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decode a value of `element` kind stored at `address`.
pub(crate) fn read_value(heap: &ClrHeap, address: u64, element: ClrElementType) -> Option<ClrValue> {
    let dac = heap.dac();
    let width = heap.abi().pointer_width();
    match element {
        ClrElementType::Boolean => Some(ClrValue::Boolean(dac.read_u8(address).ok()? != 0)),
        ClrElementType::Char => Some(ClrValue::Char(dac.read_u16(address).ok()?)),
        ClrElementType::Int8 => Some(ClrValue::Int8(dac.read_u8(address).ok()? as i8)),
        ClrElementType::UInt8 => Some(ClrValue::UInt8(dac.read_u8(address).ok()?)),
        ClrElementType::Int16 => Some(ClrValue::Int16(dac.read_u16(address).ok()? as i16)),
        ClrElementType::UInt16 => Some(ClrValue::UInt16(dac.read_u16(address).ok()?)),
        ClrElementType::Int32 => Some(ClrValue::Int32(dac.read_u32(address).ok()? as i32)),
        ClrElementType::UInt32 => Some(ClrValue::UInt32(dac.read_u32(address).ok()?)),
        ClrElementType::Int64 => Some(ClrValue::Int64(dac.read_u64(address).ok()? as i64)),
        ClrElementType::UInt64 => Some(ClrValue::UInt64(dac.read_u64(address).ok()?)),
        ClrElementType::Float => Some(ClrValue::Float(dac.read_f32(address).ok()?)),
        ClrElementType::Double => Some(ClrValue::Double(dac.read_f64(address).ok()?)),
        ClrElementType::NativeInt
        | ClrElementType::NativeUInt
        | ClrElementType::Pointer
        | ClrElementType::FunctionPointer => {
            Some(ClrValue::NativeWord(dac.read_pointer(address, width).ok()?))
        }
        ClrElementType::String => {
            // The stored word is itself an object reference; redirect and
            // decode the payload.
            let target = dac.read_pointer(address, width).ok()?;
            if target == 0 {
                return Some(ClrValue::ObjectRef(0));
            }
            let contents = heap.string_contents(target).ok()??;
            Some(ClrValue::String(contents))
        }
        ClrElementType::Class
        | ClrElementType::Object
        | ClrElementType::Array
        | ClrElementType::SZArray => {
            Some(ClrValue::ObjectRef(dac.read_pointer(address, width).ok()?))
        }
        ClrElementType::Struct => Some(ClrValue::Struct(address)),
        ClrElementType::Unknown => None,
    }
}

/// Decode a field's metadata signature blob into an element kind and, for
/// arrays, a synthesized placeholder type.
///
/// Returns `None` for blobs that are not field signatures or are truncated.
pub(crate) fn parse_field_signature(
    heap: &ClrHeap,
    signature: &[u8],
) -> Option<(ClrElementType, Option<TypeIndex>)> {
    let mut parser = Parser::new(signature);

    let convention = parser.read_u8().ok()?;
    if convention & 0x0F != SIG_FIELD {
        return None;
    }

    // Custom modifiers precede the element byte; each carries a token.
    loop {
        match parser.peek_byte().ok()? {
            ELEM_CMOD_REQD | ELEM_CMOD_OPT => {
                parser.read_u8().ok()?;
                parser.read_compressed_token().ok()?;
            }
            _ => break,
        }
    }

    let element_byte = parser.read_u8().ok()?;
    let element = ClrElementType::from_u8(element_byte);
    match element {
        ClrElementType::SZArray => {
            let component = ClrElementType::from_u8(parser.peek_byte().ok()?);
            let placeholder = heap.synthesize_array_type(component, 1);
            Some((ClrElementType::SZArray, placeholder))
        }
        ClrElementType::Array => {
            let component_byte = parser.read_u8().ok()?;
            let component = ClrElementType::from_u8(component_byte);
            if matches!(component_byte, ELEM_CLASS | ELEM_VALUETYPE) {
                // Component identity is a token we cannot resolve offline;
                // keep only the kind.
                let _ = parser.read_compressed_token();
            }
            let rank = parser.read_compressed_uint().unwrap_or(1).max(1);
            let placeholder = heap.synthesize_array_type(component, rank);
            Some((ClrElementType::Array, placeholder))
        }
        _ => Some((element, None)),
    }
}

/// Build the complete field collections for a type by walking the runtime's
/// linked field-descriptor list.
///
/// Bounded by the counts the EEClass reported plus a hard cap, so a corrupted
/// `next` chain cannot loop.
pub(crate) fn build_fields(heap: &ClrHeap, ty: &crate::heap::types::ClrType) -> TypeFields {
    let mut fields = TypeFields::default();

    let total = ty
        .num_instance_fields
        .saturating_add(ty.num_static_fields)
        .saturating_add(ty.num_thread_static_fields)
        .min(10_000);

    let module_id = heap.module_id(ty.module).unwrap_or(0);

    let mut address = ty.first_field;
    let mut visited = 0u32;
    while address != 0 && visited < total {
        let Ok(data) = heap.dac().field_data(address) else {
            break;
        };
        visited += 1;

        let name = heap
            .dac()
            .field_name(data.module, data.token)
            .ok()
            .flatten()
            .unwrap_or_else(|| UNKNOWN_TYPE_NAME.to_string());

        let mut element = ClrElementType::from_u8(data.element_type);
        let mut field_type = heap
            .heap_type(data.type_method_table, 0, 0)
            .ok()
            .flatten()
            .map(|t| t.index());

        if field_type.is_none() {
            if let Ok(Some(signature)) = heap.dac().field_signature(data.module, data.token) {
                if let Some((sig_element, placeholder)) =
                    parse_field_signature(heap, &signature)
                {
                    if element == ClrElementType::Unknown {
                        element = sig_element;
                    }
                    field_type = placeholder;
                }
            }
        }

        let core = FieldCore {
            name,
            token: Token::new(data.token),
            offset: data.offset,
            element,
            field_type,
            module: data.module,
        };

        if data.is_thread_local {
            fields.thread_statics.push(ThreadStaticField {
                core,
                module_id,
                shared: ty.shared,
            });
        } else if data.is_static {
            fields.statics.push(StaticField {
                core,
                declaring_module: ty.module,
                module_id,
                declaring_token: ty.token,
                shared: ty.shared,
            });
        } else {
            fields.instance.push(InstanceField { core });
        }

        address = data.next_field;
    }

    fields
}
