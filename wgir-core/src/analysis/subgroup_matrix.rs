//! Collects the subgroup-matrix shapes a module uses.
//!
//! Backends need the set of distinct cooperative-matrix configurations to
//! emit pipeline metadata, and the set of multiply shapes to pick hardware
//! paths. Both sets are deduplicated; iteration order is unspecified, so
//! tests sort before comparing.

use fnv::FnvHashSet as HashSet;

use crate::inst::{BuiltinFn, InstKind};
use crate::module::{BlockId, Module};
use crate::ty::{SubgroupMatrixKind, Type, TypeId};

/// Scalar element type of a subgroup matrix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum SubgroupMatrixType {
    F16,
    F32,
    U8,
    I8,
    U32,
    I32,
}

/// One distinct matrix configuration seen in the module.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SubgroupMatrixConfig {
    pub kind: SubgroupMatrixKind,
    pub ty: SubgroupMatrixType,
    pub cols: u32,
    pub rows: u32,
}

/// One distinct multiply shape: Left is MxK, Right is KxN, Result is MxN.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SubgroupMatrixMultiply {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub input_type: SubgroupMatrixType,
    pub output_type: SubgroupMatrixType,
}

#[derive(Default, Debug)]
pub struct SubgroupMatrixInfo {
    pub configs: HashSet<SubgroupMatrixConfig>,
    pub multiplies: HashSet<SubgroupMatrixMultiply>,
}

/// Walk every instruction and every type used by the module, recording the
/// deduplicated matrix configurations and multiply shapes.
pub fn gather_subgroup_matrix_info(module: &Module) -> SubgroupMatrixInfo {
    let mut info = SubgroupMatrixInfo::default();
    gather_block(module, module.root_block(), &mut info);
    for func in &module.functions {
        let data = module.function(*func);
        for p in &data.params {
            scan_type(module, module.value_ty(*p), &mut info);
        }
        gather_block(module, data.block, &mut info);
    }
    info
}

fn gather_block(module: &Module, block: BlockId, info: &mut SubgroupMatrixInfo) {
    for p in &module.block(block).params {
        scan_type(module, module.value_ty(*p), info);
    }
    for inst in module.insts_of(block) {
        for operand in module.operands(inst).iter().flatten() {
            scan_type(module, module.value_ty(*operand), info);
        }
        for result in module.results(inst) {
            scan_type(module, module.value_ty(*result), info);
        }
        if let InstKind::CoreBuiltinCall(
            BuiltinFn::SubgroupMatrixMultiply | BuiltinFn::SubgroupMatrixMultiplyAccumulate,
        ) = module.kind(inst)
        {
            record_multiply(module, inst, info);
        }
        for child in module.kind(inst).control_blocks() {
            gather_block(module, child, info);
        }
    }
}

fn record_multiply(
    module: &Module,
    inst: crate::inst::InstId,
    info: &mut SubgroupMatrixInfo,
) {
    let left = module
        .operand(inst, 0)
        .and_then(|v| as_subgroup_matrix(module, module.value_ty(v)));
    let right = module
        .operand(inst, 1)
        .and_then(|v| as_subgroup_matrix(module, module.value_ty(v)));
    let result = as_subgroup_matrix(module, module.value_ty(module.inst_result(inst, 0)));
    if let (Some(left), Some(right), Some(result)) = (left, right, result) {
        info.multiplies.insert(SubgroupMatrixMultiply {
            m: left.rows,
            n: right.cols,
            k: left.cols,
            input_type: left.ty,
            output_type: result.ty,
        });
    }
}

fn as_subgroup_matrix(module: &Module, ty: TypeId) -> Option<SubgroupMatrixConfig> {
    match module.types.get(ty) {
        Type::SubgroupMatrix {
            kind,
            elem,
            cols,
            rows,
        } => Some(SubgroupMatrixConfig {
            kind: *kind,
            ty: element_type(module, *elem)?,
            cols: *cols,
            rows: *rows,
        }),
        _ => None,
    }
}

fn element_type(module: &Module, elem: TypeId) -> Option<SubgroupMatrixType> {
    match module.types.get(elem) {
        Type::F16 => Some(SubgroupMatrixType::F16),
        Type::F32 => Some(SubgroupMatrixType::F32),
        Type::U8 => Some(SubgroupMatrixType::U8),
        Type::I8 => Some(SubgroupMatrixType::I8),
        Type::U32 => Some(SubgroupMatrixType::U32),
        Type::I32 => Some(SubgroupMatrixType::I32),
        _ => None,
    }
}

fn scan_type(module: &Module, ty: TypeId, info: &mut SubgroupMatrixInfo) {
    if let Some(config) = as_subgroup_matrix(module, ty) {
        info.configs.insert(config);
        return;
    }
    match module.types.get(ty) {
        Type::Vector { elem, .. } => scan_type(module, *elem, info),
        Type::Matrix { column_type, .. } => scan_type(module, *column_type, info),
        Type::Array { element, .. } => scan_type(module, *element, info),
        Type::Struct { members, .. } => {
            for m in members.clone() {
                scan_type(module, m.ty, info);
            }
        }
        Type::Pointer { store, .. } | Type::Reference { store, .. } => {
            scan_type(module, *store, info)
        }
        Type::Atomic { inner } => scan_type(module, *inner, info),
        _ => {}
    }
}
