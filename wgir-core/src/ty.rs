//! Canonicalised, interned type graph with WGSL layout rules.

use std::fmt;

use fnv::FnvHashMap as HashMap;

use crate::{ice, ice_assert};

/// Handle to an interned type. Only meaningful with the [`TypeManager`] that
/// produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TypeId(pub u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Address space of a pointer, reference or variable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    Handle,
    Immediate,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            AddressSpace::Function => "function",
            AddressSpace::Private => "private",
            AddressSpace::Workgroup => "workgroup",
            AddressSpace::Uniform => "uniform",
            AddressSpace::Storage => "storage",
            AddressSpace::Handle => "handle",
            AddressSpace::Immediate => "immediate",
        })
    }
}

/// Memory access mode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::ReadWrite => "read_write",
        })
    }
}

/// Texture dimensionality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TextureDim {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

impl TextureDim {
    /// Returns true for arrayed dimensionalities.
    pub fn is_array(self) -> bool {
        matches!(self, TextureDim::D2Array | TextureDim::CubeArray)
    }
}

impl fmt::Display for TextureDim {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TextureDim::D1 => "1d",
            TextureDim::D2 => "2d",
            TextureDim::D2Array => "2d_array",
            TextureDim::D3 => "3d",
            TextureDim::Cube => "cube",
            TextureDim::CubeArray => "cube_array",
        })
    }
}

/// Texel format of a storage texture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TexelFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba8Snorm,
    Rgba16Float,
    Rgba32Float,
    R32Uint,
    R32Sint,
    R32Float,
}

impl fmt::Display for TexelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            TexelFormat::Rgba8Unorm => "rgba8unorm",
            TexelFormat::Bgra8Unorm => "bgra8unorm",
            TexelFormat::Rgba8Snorm => "rgba8snorm",
            TexelFormat::Rgba16Float => "rgba16float",
            TexelFormat::Rgba32Float => "rgba32float",
            TexelFormat::R32Uint => "r32uint",
            TexelFormat::R32Sint => "r32sint",
            TexelFormat::R32Float => "r32float",
        })
    }
}

/// Role of a subgroup matrix in a cooperative multiply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum SubgroupMatrixKind {
    Left,
    Right,
    Result,
}

impl fmt::Display for SubgroupMatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SubgroupMatrixKind::Left => "left",
            SubgroupMatrixKind::Right => "right",
            SubgroupMatrixKind::Result => "result",
        })
    }
}

/// Element count of an array type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ArrayCount {
    Constant(u32),
    Runtime,
}

/// A member of a structure type, with its resolved layout.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct StructMember {
    pub name: String,
    pub ty: TypeId,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

/// A member request handed to [`TypeManager::struct_`]; layout is computed.
#[derive(Clone, Debug)]
pub struct StructMemberDesc {
    pub name: String,
    pub ty: TypeId,
}

impl StructMemberDesc {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A canonical type. Instances are interned by the [`TypeManager`]; two
/// structurally equal types always share a [`TypeId`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    Void,
    Bool,
    I8,
    U8,
    U16,
    I32,
    U32,
    F16,
    F32,
    Vector {
        elem: TypeId,
        width: u32,
        packed: bool,
    },
    Matrix {
        columns: u32,
        column_type: TypeId,
    },
    Array {
        element: TypeId,
        count: ArrayCount,
        stride: u32,
        implicit_stride: u32,
    },
    Struct {
        name: String,
        members: Vec<StructMember>,
        size: u32,
        align: u32,
    },
    Pointer {
        space: AddressSpace,
        store: TypeId,
        access: Access,
    },
    Reference {
        space: AddressSpace,
        store: TypeId,
        access: Access,
    },
    Atomic {
        inner: TypeId,
    },
    SampledTexture {
        dim: TextureDim,
        sample_type: TypeId,
    },
    MultisampledTexture {
        dim: TextureDim,
        sample_type: TypeId,
    },
    DepthTexture {
        dim: TextureDim,
    },
    DepthMultisampledTexture {
        dim: TextureDim,
    },
    StorageTexture {
        dim: TextureDim,
        format: TexelFormat,
        access: Access,
    },
    Sampler,
    ComparisonSampler,
    SubgroupMatrix {
        kind: SubgroupMatrixKind,
        elem: TypeId,
        cols: u32,
        rows: u32,
    },
}

impl Type {
    /// Returns true for scalar kinds (bool and numeric scalars).
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::I8
                | Type::U8
                | Type::U16
                | Type::I32
                | Type::U32
                | Type::F16
                | Type::F32
        )
    }

    /// Returns true for integer scalar kinds.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::I8 | Type::U8 | Type::U16 | Type::I32 | Type::U32
        )
    }

    /// Returns true for floating point scalar kinds.
    pub fn is_float(&self) -> bool {
        matches!(self, Type::F16 | Type::F32)
    }
}

/// Round `value` up to the next multiple of `align`.
pub fn round_up(value: u32, align: u32) -> u32 {
    ice_assert!(align > 0, "round_up with zero alignment");
    ((value + align - 1) / align) * align
}

/// Interning manager. One per module; every [`TypeId`] indexes into it.
#[derive(Default)]
pub struct TypeManager {
    types: Vec<Type>,
    lookup: HashMap<Type, TypeId>,
}

impl TypeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `ty`, deduplicating against all previously created types.
    pub fn intern(&mut self, ty: Type) -> TypeId {
        self.check(&ty);
        if let Some(id) = self.lookup.get(&ty) {
            return *id;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty.clone());
        self.lookup.insert(ty, id);
        id
    }

    /// Resolve a handle.
    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    fn check(&self, ty: &Type) {
        match ty {
            Type::Vector { width, elem, .. } => {
                ice_assert!((2..=4).contains(width), "vector width {} out of range", width);
                ice_assert!(self.get(*elem).is_scalar(), "vector of non-scalar element");
            }
            Type::Matrix {
                columns,
                column_type,
            } => {
                ice_assert!(
                    (2..=4).contains(columns),
                    "matrix column count {} out of range",
                    columns
                );
                ice_assert!(
                    matches!(self.get(*column_type), Type::Vector { .. }),
                    "matrix column type must be a vector"
                );
            }
            Type::Pointer { store, .. } | Type::Reference { store, .. } => {
                ice_assert!(
                    !matches!(self.get(*store), Type::Pointer { .. } | Type::Reference { .. }),
                    "pointer store type is a pointer"
                );
            }
            _ => {}
        }
    }

    // Scalar constructors.

    pub fn void_(&mut self) -> TypeId {
        self.intern(Type::Void)
    }
    pub fn bool_(&mut self) -> TypeId {
        self.intern(Type::Bool)
    }
    pub fn i8(&mut self) -> TypeId {
        self.intern(Type::I8)
    }
    pub fn u8(&mut self) -> TypeId {
        self.intern(Type::U8)
    }
    pub fn u16(&mut self) -> TypeId {
        self.intern(Type::U16)
    }
    pub fn i32(&mut self) -> TypeId {
        self.intern(Type::I32)
    }
    pub fn u32(&mut self) -> TypeId {
        self.intern(Type::U32)
    }
    pub fn f16(&mut self) -> TypeId {
        self.intern(Type::F16)
    }
    pub fn f32(&mut self) -> TypeId {
        self.intern(Type::F32)
    }

    // Composite constructors.

    pub fn vec(&mut self, elem: TypeId, width: u32) -> TypeId {
        self.intern(Type::Vector {
            elem,
            width,
            packed: false,
        })
    }
    pub fn packed_vec(&mut self, elem: TypeId, width: u32) -> TypeId {
        self.intern(Type::Vector {
            elem,
            width,
            packed: true,
        })
    }
    pub fn vec2(&mut self, elem: TypeId) -> TypeId {
        self.vec(elem, 2)
    }
    pub fn vec3(&mut self, elem: TypeId) -> TypeId {
        self.vec(elem, 3)
    }
    pub fn vec4(&mut self, elem: TypeId) -> TypeId {
        self.vec(elem, 4)
    }
    pub fn vec2u(&mut self) -> TypeId {
        let elem = self.u32();
        self.vec(elem, 2)
    }
    pub fn vec3u(&mut self) -> TypeId {
        let elem = self.u32();
        self.vec(elem, 3)
    }
    pub fn vec4u(&mut self) -> TypeId {
        let elem = self.u32();
        self.vec(elem, 4)
    }

    /// A matrix of `columns` columns, each a `vec<rows, elem>`.
    pub fn mat(&mut self, columns: u32, rows: u32, elem: TypeId) -> TypeId {
        let column_type = self.vec(elem, rows);
        self.intern(Type::Matrix {
            columns,
            column_type,
        })
    }

    /// Fixed-size array with the implicit (layout-derived) stride.
    pub fn array(&mut self, element: TypeId, count: u32) -> TypeId {
        let stride = self.implicit_stride_of(element);
        self.intern(Type::Array {
            element,
            count: ArrayCount::Constant(count),
            stride,
            implicit_stride: stride,
        })
    }

    /// Fixed-size array with an explicit stride.
    pub fn array_with_stride(&mut self, element: TypeId, count: u32, stride: u32) -> TypeId {
        let implicit_stride = self.implicit_stride_of(element);
        ice_assert!(
            stride >= implicit_stride,
            "array stride {} smaller than implicit stride {}",
            stride,
            implicit_stride
        );
        self.intern(Type::Array {
            element,
            count: ArrayCount::Constant(count),
            stride,
            implicit_stride,
        })
    }

    /// Runtime-sized array.
    pub fn runtime_array(&mut self, element: TypeId) -> TypeId {
        let stride = self.implicit_stride_of(element);
        self.intern(Type::Array {
            element,
            count: ArrayCount::Runtime,
            stride,
            implicit_stride: stride,
        })
    }

    /// Structure with layout computed from the member types.
    pub fn struct_(&mut self, name: &str, members: Vec<StructMemberDesc>) -> TypeId {
        let mut offset = 0u32;
        let mut struct_align = 1u32;
        let mut out = Vec::with_capacity(members.len());
        for desc in members {
            let size = self.size_of(desc.ty);
            let align = self.align_of(desc.ty);
            offset = round_up(offset, align);
            out.push(StructMember {
                name: desc.name,
                ty: desc.ty,
                offset,
                size,
                align,
            });
            struct_align = struct_align.max(align);
            offset += size;
        }
        let size = round_up(offset, struct_align);
        self.intern(Type::Struct {
            name: name.to_owned(),
            members: out,
            size,
            align: struct_align,
        })
    }

    /// Structure with caller-provided member offsets.
    ///
    /// Offsets must be non-decreasing past the previous member's end and
    /// multiples of the member alignment.
    pub fn struct_with_offsets(
        &mut self,
        name: &str,
        members: Vec<(StructMemberDesc, u32)>,
    ) -> TypeId {
        let mut end = 0u32;
        let mut struct_align = 1u32;
        let mut out = Vec::with_capacity(members.len());
        for (desc, offset) in members {
            let size = self.size_of(desc.ty);
            let align = self.align_of(desc.ty);
            ice_assert!(offset >= end, "struct member offset {} overlaps previous", offset);
            ice_assert!(offset % align == 0, "struct member offset {} misaligned", offset);
            out.push(StructMember {
                name: desc.name,
                ty: desc.ty,
                offset,
                size,
                align,
            });
            struct_align = struct_align.max(align);
            end = offset + size;
        }
        let size = round_up(end, struct_align);
        self.intern(Type::Struct {
            name: name.to_owned(),
            members: out,
            size,
            align: struct_align,
        })
    }

    pub fn ptr(&mut self, space: AddressSpace, store: TypeId, access: Access) -> TypeId {
        self.intern(Type::Pointer {
            space,
            store,
            access,
        })
    }

    pub fn ref_(&mut self, space: AddressSpace, store: TypeId, access: Access) -> TypeId {
        self.intern(Type::Reference {
            space,
            store,
            access,
        })
    }

    pub fn atomic(&mut self, inner: TypeId) -> TypeId {
        ice_assert!(
            matches!(self.get(inner), Type::I32 | Type::U32),
            "atomic of non-32-bit-integer type"
        );
        self.intern(Type::Atomic { inner })
    }

    pub fn sampled_texture(&mut self, dim: TextureDim, sample_type: TypeId) -> TypeId {
        self.intern(Type::SampledTexture { dim, sample_type })
    }

    pub fn multisampled_texture(&mut self, dim: TextureDim, sample_type: TypeId) -> TypeId {
        self.intern(Type::MultisampledTexture { dim, sample_type })
    }

    pub fn depth_texture(&mut self, dim: TextureDim) -> TypeId {
        self.intern(Type::DepthTexture { dim })
    }

    pub fn depth_multisampled_texture(&mut self, dim: TextureDim) -> TypeId {
        self.intern(Type::DepthMultisampledTexture { dim })
    }

    pub fn storage_texture(
        &mut self,
        dim: TextureDim,
        format: TexelFormat,
        access: Access,
    ) -> TypeId {
        self.intern(Type::StorageTexture {
            dim,
            format,
            access,
        })
    }

    pub fn sampler(&mut self) -> TypeId {
        self.intern(Type::Sampler)
    }

    pub fn comparison_sampler(&mut self) -> TypeId {
        self.intern(Type::ComparisonSampler)
    }

    pub fn subgroup_matrix(
        &mut self,
        kind: SubgroupMatrixKind,
        elem: TypeId,
        cols: u32,
        rows: u32,
    ) -> TypeId {
        self.intern(Type::SubgroupMatrix {
            kind,
            elem,
            cols,
            rows,
        })
    }

    pub fn subgroup_matrix_left(&mut self, elem: TypeId, cols: u32, rows: u32) -> TypeId {
        self.subgroup_matrix(SubgroupMatrixKind::Left, elem, cols, rows)
    }

    pub fn subgroup_matrix_right(&mut self, elem: TypeId, cols: u32, rows: u32) -> TypeId {
        self.subgroup_matrix(SubgroupMatrixKind::Right, elem, cols, rows)
    }

    pub fn subgroup_matrix_result(&mut self, elem: TypeId, cols: u32, rows: u32) -> TypeId {
        self.subgroup_matrix(SubgroupMatrixKind::Result, elem, cols, rows)
    }

    // Layout queries.

    /// Size of the type in bytes, following WGSL layout rules.
    ///
    /// Runtime-sized arrays report the size of one element. Types with no
    /// memory representation (void, handles, pointers) report zero.
    pub fn size_of(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Type::Void => 0,
            Type::Bool => 4,
            Type::I8 | Type::U8 => 1,
            Type::U16 | Type::F16 => 2,
            Type::I32 | Type::U32 | Type::F32 => 4,
            Type::Vector { elem, width, .. } => self.size_of(*elem) * width,
            Type::Matrix {
                columns,
                column_type,
            } => columns * self.column_stride_of(*column_type),
            Type::Array { count, stride, .. } => match count {
                ArrayCount::Constant(n) => stride * (*n).max(1),
                ArrayCount::Runtime => *stride,
            },
            Type::Struct { size, .. } => *size,
            Type::Atomic { inner } => self.size_of(*inner),
            Type::Pointer { .. }
            | Type::Reference { .. }
            | Type::SampledTexture { .. }
            | Type::MultisampledTexture { .. }
            | Type::DepthTexture { .. }
            | Type::DepthMultisampledTexture { .. }
            | Type::StorageTexture { .. }
            | Type::Sampler
            | Type::ComparisonSampler
            | Type::SubgroupMatrix { .. } => 0,
        }
    }

    /// Alignment of the type in bytes, following WGSL layout rules.
    pub fn align_of(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Type::Vector {
                elem,
                width,
                packed,
            } => {
                let elem_size = self.size_of(*elem);
                if *packed {
                    self.align_of(*elem)
                } else {
                    match width {
                        2 => 2 * elem_size,
                        // A vec3 aligns like a vec4.
                        3 | 4 => 4 * elem_size,
                        _ => ice!("vector width {} out of range", width),
                    }
                }
            }
            Type::Matrix { column_type, .. } => self.align_of(*column_type),
            Type::Array { element, .. } => self.align_of(*element),
            Type::Struct { align, .. } => *align,
            Type::Atomic { inner } => self.align_of(*inner),
            _ => self.size_of(id).max(1),
        }
    }

    /// `round_up(size, align)`: the stride an array of this element would use.
    pub fn implicit_stride_of(&self, id: TypeId) -> u32 {
        round_up(self.size_of(id).max(1), self.align_of(id))
    }

    /// Byte stride between matrix columns: the column vector's alignment.
    fn column_stride_of(&self, column_type: TypeId) -> u32 {
        self.align_of(column_type)
    }

    /// Byte stride between the columns of the matrix `id`.
    pub fn column_stride(&self, id: TypeId) -> u32 {
        match self.get(id) {
            Type::Matrix { column_type, .. } => self.column_stride_of(*column_type),
            _ => ice!("column_stride of non-matrix type"),
        }
    }

    // Shape queries.

    /// Store type of a pointer or reference.
    pub fn store_type(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Pointer { store, .. } | Type::Reference { store, .. } => Some(*store),
            _ => None,
        }
    }

    /// Address space of a pointer or reference.
    pub fn address_space(&self, id: TypeId) -> Option<AddressSpace> {
        match self.get(id) {
            Type::Pointer { space, .. } | Type::Reference { space, .. } => Some(*space),
            _ => None,
        }
    }

    /// Access mode of a pointer or reference.
    pub fn access_of(&self, id: TypeId) -> Option<Access> {
        match self.get(id) {
            Type::Pointer { access, .. } | Type::Reference { access, .. } => Some(*access),
            _ => None,
        }
    }

    /// Element type and width of a vector.
    pub fn as_vector(&self, id: TypeId) -> Option<(TypeId, u32)> {
        match self.get(id) {
            Type::Vector { elem, width, .. } => Some((*elem, *width)),
            _ => None,
        }
    }

    /// Column count and column type of a matrix.
    pub fn as_matrix(&self, id: TypeId) -> Option<(u32, TypeId)> {
        match self.get(id) {
            Type::Matrix {
                columns,
                column_type,
            } => Some((*columns, *column_type)),
            _ => None,
        }
    }

    /// Element type and count of an array.
    pub fn as_array(&self, id: TypeId) -> Option<(TypeId, ArrayCount)> {
        match self.get(id) {
            Type::Array { element, count, .. } => Some((*element, *count)),
            _ => None,
        }
    }

    /// The scalar at the bottom of a vector/matrix/array/atomic nest;
    /// `id` itself for scalars and other leaves.
    pub fn deepest_element(&self, id: TypeId) -> TypeId {
        match self.get(id) {
            Type::Vector { elem, .. } => self.deepest_element(*elem),
            Type::Matrix { column_type, .. } => self.deepest_element(*column_type),
            Type::Array { element, .. } => self.deepest_element(*element),
            Type::Atomic { inner } => self.deepest_element(*inner),
            _ => id,
        }
    }

    /// A type with `scalar` elements and the vector width of `shape`
    /// (or `scalar` itself when `shape` is not a vector).
    pub fn match_width(&mut self, scalar: TypeId, shape: TypeId) -> TypeId {
        match self.as_vector(shape) {
            Some((_, width)) => self.vec(scalar, width),
            None => scalar,
        }
    }

    /// Whether the type has a runtime-sized tail: a runtime array, or a
    /// struct whose last member is one.
    pub fn has_runtime_size(&self, id: TypeId) -> bool {
        match self.get(id) {
            Type::Array { count, .. } => matches!(count, ArrayCount::Runtime),
            Type::Struct { members, .. } => members
                .last()
                .map(|m| matches!(self.get(m.ty), Type::Array { count: ArrayCount::Runtime, .. }))
                .unwrap_or(false),
            _ => false,
        }
    }

    /// WGSL-ish rendering of the type, used by the disassembler.
    pub fn type_name(&self, id: TypeId) -> String {
        match self.get(id) {
            Type::Void => "void".to_owned(),
            Type::Bool => "bool".to_owned(),
            Type::I8 => "i8".to_owned(),
            Type::U8 => "u8".to_owned(),
            Type::U16 => "u16".to_owned(),
            Type::I32 => "i32".to_owned(),
            Type::U32 => "u32".to_owned(),
            Type::F16 => "f16".to_owned(),
            Type::F32 => "f32".to_owned(),
            Type::Vector {
                elem,
                width,
                packed,
            } => {
                if *packed {
                    format!("packed_vec{}<{}>", width, self.type_name(*elem))
                } else {
                    format!("vec{}<{}>", width, self.type_name(*elem))
                }
            }
            Type::Matrix {
                columns,
                column_type,
            } => {
                let (elem, rows) = self
                    .as_vector(*column_type)
                    .unwrap_or_else(|| ice!("matrix column is not a vector"));
                format!("mat{}x{}<{}>", columns, rows, self.type_name(elem))
            }
            Type::Array {
                element, count, ..
            } => match count {
                ArrayCount::Constant(n) => format!("array<{}, {}>", self.type_name(*element), n),
                ArrayCount::Runtime => format!("array<{}>", self.type_name(*element)),
            },
            Type::Struct { name, .. } => name.clone(),
            Type::Pointer {
                space,
                store,
                access,
            } => format!("ptr<{}, {}, {}>", space, self.type_name(*store), access),
            Type::Reference {
                space,
                store,
                access,
            } => format!("ref<{}, {}, {}>", space, self.type_name(*store), access),
            Type::Atomic { inner } => format!("atomic<{}>", self.type_name(*inner)),
            Type::SampledTexture { dim, sample_type } => {
                format!("texture_{}<{}>", dim, self.type_name(*sample_type))
            }
            Type::MultisampledTexture { dim, sample_type } => {
                format!("texture_multisampled_{}<{}>", dim, self.type_name(*sample_type))
            }
            Type::DepthTexture { dim } => format!("texture_depth_{}", dim),
            Type::DepthMultisampledTexture { dim } => {
                format!("texture_depth_multisampled_{}", dim)
            }
            Type::StorageTexture {
                dim,
                format,
                access,
            } => format!("texture_storage_{}<{}, {}>", dim, format, access),
            Type::Sampler => "sampler".to_owned(),
            Type::ComparisonSampler => "sampler_comparison".to_owned(),
            Type::SubgroupMatrix {
                kind,
                elem,
                cols,
                rows,
            } => format!(
                "subgroup_matrix_{}<{}, {}, {}>",
                kind,
                self.type_name(*elem),
                cols,
                rows
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let mut ty = TypeManager::new();
        let f32 = ty.f32();
        let a = ty.vec3(f32);
        let b = ty.vec3(f32);
        assert_eq!(a, b);
        let c = ty.vec4(f32);
        assert_ne!(a, c);
    }

    #[test]
    fn scalar_layout() {
        let mut ty = TypeManager::new();
        let f16 = ty.f16();
        let u32_ = ty.u32();
        assert_eq!(ty.size_of(f16), 2);
        assert_eq!(ty.align_of(f16), 2);
        assert_eq!(ty.size_of(u32_), 4);
        assert_eq!(ty.align_of(u32_), 4);
    }

    #[test]
    fn vector_layout() {
        let mut ty = TypeManager::new();
        let f32 = ty.f32();
        let f16 = ty.f16();
        let v2f = ty.vec2(f32);
        let v3f = ty.vec3(f32);
        let v4f = ty.vec4(f32);
        let v3h = ty.vec3(f16);
        assert_eq!((ty.size_of(v2f), ty.align_of(v2f)), (8, 8));
        assert_eq!((ty.size_of(v3f), ty.align_of(v3f)), (12, 16));
        assert_eq!((ty.size_of(v4f), ty.align_of(v4f)), (16, 16));
        assert_eq!((ty.size_of(v3h), ty.align_of(v3h)), (6, 8));
    }

    #[test]
    fn matrix_layout() {
        let mut ty = TypeManager::new();
        let f32 = ty.f32();
        let f16 = ty.f16();
        let m4x4f = ty.mat(4, 4, f32);
        let m2x3f = ty.mat(2, 3, f32);
        let m3x2h = ty.mat(3, 2, f16);
        assert_eq!(ty.column_stride(m4x4f), 16);
        assert_eq!(ty.size_of(m4x4f), 64);
        // vec3 columns are padded to vec4 alignment.
        assert_eq!(ty.column_stride(m2x3f), 16);
        assert_eq!(ty.size_of(m2x3f), 32);
        assert_eq!(ty.column_stride(m3x2h), 4);
        assert_eq!(ty.size_of(m3x2h), 12);
    }

    #[test]
    fn array_stride() {
        let mut ty = TypeManager::new();
        let f32 = ty.f32();
        let v3f = ty.vec3(f32);
        let arr = ty.array(v3f, 4);
        match ty.get(arr) {
            Type::Array {
                stride,
                implicit_stride,
                ..
            } => {
                assert_eq!(*stride, 16);
                assert_eq!(*implicit_stride, 16);
            }
            _ => unreachable!(),
        }
        assert_eq!(ty.size_of(arr), 64);
    }

    #[test]
    fn struct_layout() {
        let mut ty = TypeManager::new();
        let u32_ = ty.u32();
        let f32 = ty.f32();
        let v3f = ty.vec3(f32);
        let s = ty.struct_(
            "S",
            vec![
                StructMemberDesc::new("a", u32_),
                StructMemberDesc::new("b", v3f),
                StructMemberDesc::new("c", f32),
            ],
        );
        match ty.get(s) {
            Type::Struct { members, size, align, .. } => {
                assert_eq!(members[0].offset, 0);
                assert_eq!(members[1].offset, 16);
                assert_eq!(members[2].offset, 28);
                assert_eq!(*align, 16);
                assert_eq!(*size, 32);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn runtime_tail() {
        let mut ty = TypeManager::new();
        let u32_ = ty.u32();
        let ra = ty.runtime_array(u32_);
        let s = ty.struct_(
            "S",
            vec![
                StructMemberDesc::new("len", u32_),
                StructMemberDesc::new("data", ra),
            ],
        );
        assert!(ty.has_runtime_size(ra));
        assert!(ty.has_runtime_size(s));
        let fixed = ty.array(u32_, 4);
        assert!(!ty.has_runtime_size(fixed));
    }

    #[test]
    fn type_names() {
        let mut ty = TypeManager::new();
        let f16 = ty.f16();
        let u32_ = ty.u32();
        let v4u = ty.vec4(u32_);
        let arr = ty.array(v4u, 4);
        let p = ty.ptr(AddressSpace::Uniform, arr, Access::Read);
        assert_eq!(ty.type_name(p), "ptr<uniform, array<vec4<u32>, 4>, read>");
        let sm = ty.subgroup_matrix_left(f16, 8, 8);
        assert_eq!(ty.type_name(sm), "subgroup_matrix_left<f16, 8, 8>");
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn vector_width_out_of_range_ices() {
        let mut ty = TypeManager::new();
        let f32 = ty.f32();
        ty.vec(f32, 5);
    }
}
