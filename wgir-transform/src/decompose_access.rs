//! Rewrites buffer accesses over a canonical element type.
//!
//! Each decomposed variable's store type becomes `array<BaseElem[, N]>`
//! where `BaseElem` is one of `u16`, `u32`, `vec2<u32>` or `vec4<u32>`,
//! chosen from the smallest access the shader performs (uniform buffers
//! always use `vec4<u32>`). Every typed load and store is rewritten to
//! compute a byte offset, fetch base elements, and reassemble the original
//! value with bitcasts, swizzles and constructs. Aggregate loads and stores
//! go through helper functions memoised per variable and type.

use fnv::FnvHashMap as HashMap;

use wgir_core::builder::Builder;
use wgir_core::function::FuncId;
use wgir_core::inst::{BuiltinFn, InstId, InstKind};
use wgir_core::module::Module;
use wgir_core::ty::{Access, AddressSpace, ArrayCount, Type, TypeId};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::{Usage, ValueId};
use wgir_core::ice;

use crate::TransformResult;

/// Which address spaces to decompose. Uniform buffers always use a
/// `vec4<u32>` base; the other spaces derive the base from their accesses.
pub struct DecomposeAccessOptions {
    pub storage: bool,
    pub uniform: bool,
    pub workgroup: bool,
}

impl Default for DecomposeAccessOptions {
    fn default() -> Self {
        Self {
            storage: true,
            uniform: true,
            workgroup: true,
        }
    }
}

pub fn decompose_access(module: &mut Module, options: &DecomposeAccessOptions) -> TransformResult {
    validate_and_dump_if_needed(
        module,
        "DecomposeAccess",
        Capabilities::ALLOW_8BIT_INTEGERS
            | Capabilities::ALLOW_16BIT_INTEGERS
            | Capabilities::ALLOW_CLIP_DISTANCES_ON_F32
            | Capabilities::ALLOW_DUPLICATE_BINDINGS
            | Capabilities::ALLOW_NON_CORE_TYPES,
    )?;

    let mut b = Builder::new(module);
    let mut state = State {
        options,
        base_ty: None,
        base_ptr_ty: None,
        load_fns: HashMap::default(),
        store_fns: HashMap::default(),
    };
    state.process(&mut b);
    Ok(())
}

/// A byte offset: the sum of a constant part and any number of dynamic u32
/// expressions.
#[derive(Clone, Default)]
struct Offset {
    const_bytes: u32,
    exprs: Vec<ValueId>,
}

struct State<'a> {
    options: &'a DecomposeAccessOptions,
    /// Base element type for the variable currently being rewritten.
    base_ty: Option<TypeId>,
    base_ptr_ty: Option<TypeId>,
    /// Helper functions memoised per (variable, loaded/stored type).
    load_fns: HashMap<(InstId, TypeId), FuncId>,
    store_fns: HashMap<(InstId, TypeId), FuncId>,
}

impl<'a> State<'a> {
    fn process(&mut self, b: &mut Builder) {
        let mut var_worklist = Vec::new();
        for inst in b.module.insts_of(b.module.root_block()) {
            if !matches!(b.module.kind(inst), InstKind::Var { .. }) {
                continue;
            }
            let ptr_ty = b.module.value_ty(b.module.inst_result(inst, 0));
            let (space, store) = match (
                b.module.types.address_space(ptr_ty),
                b.module.types.store_type(ptr_ty),
            ) {
                (Some(space), Some(store)) => (space, store),
                _ => continue,
            };
            let wanted = match space {
                AddressSpace::Storage => self.options.storage,
                AddressSpace::Uniform => self.options.uniform,
                AddressSpace::Workgroup => self.options.workgroup,
                _ => false,
            };
            // Atomics keep their typed representation.
            if wanted && !contains_atomic(b.module, store) {
                var_worklist.push(inst);
            }
        }

        for var in var_worklist {
            self.process_var(b, var);
        }
    }

    fn process_var(&mut self, b: &mut Builder, var: InstId) {
        let result = b.module.inst_result(var, 0);
        let ptr_ty = b.module.value_ty(result);
        let space = b.module.types.address_space(ptr_ty).unwrap();
        let access = b.module.types.access_of(ptr_ty).unwrap();
        let store_ty = b.module.types.store_type(ptr_ty).unwrap();
        self.set_base_elem_type(b, var, space, access);

        let mut worklist: Vec<Usage> = b.module.uses_sorted(result);
        while let Some(usage) = worklist.pop() {
            let inst = usage.inst;
            // Uses can be destroyed while their access chain is replaced.
            if !b.module.alive(inst) {
                continue;
            }
            match b.module.kind(inst).clone() {
                InstKind::LoadVectorElement => {
                    self.process_lve(b, inst, var, Offset::default());
                }
                InstKind::StoreVectorElement => {
                    self.process_sve(b, inst, var, Offset::default());
                }
                InstKind::Load => {
                    self.process_load(b, inst, var, Offset::default());
                }
                InstKind::Store => {
                    self.process_store(b, inst, var, Offset::default());
                }
                InstKind::Access => {
                    let obj = b.module.operand(inst, 0).unwrap();
                    let obj_ty = b.module.value_ty(obj);
                    self.process_access(b, inst, var, obj_ty, Offset::default());
                }
                InstKind::Let => {
                    // A let of the var is an alias; fold it away and pick up
                    // its uses.
                    let let_result = b.module.inst_result(inst, 0);
                    worklist.extend(b.module.uses_sorted(let_result));
                    b.module.replace_all_uses_with(let_result, result);
                    b.module.destroy(inst);
                }
                InstKind::CoreBuiltinCall(f) => match f {
                    BuiltinFn::ArrayLength => {
                        self.rewrite_array_length(b, inst, var, store_ty, Offset::default());
                    }
                    BuiltinFn::BufferLength => {
                        self.rewrite_buffer_length(b, inst, var, store_ty);
                    }
                    BuiltinFn::BufferView => {
                        self.process_buffer_view(b, inst, var, Offset::default());
                    }
                    _ => ice!("unhandled builtin use of a decomposed buffer"),
                },
                _ => ice!("unhandled use of a decomposed buffer"),
            }
        }

        // Swap the store type for the canonical array.
        let base = self.base_ty.unwrap();
        let new_store = if b.module.types.has_runtime_size(store_ty) {
            b.module.types.runtime_array(base)
        } else {
            let n = self.num_base_elements(b.module, store_ty);
            b.module.types.array(base, n)
        };
        let new_ptr = b.module.types.ptr(space, new_store, access);
        b.module.set_value_ty(result, new_ptr);
    }

    // Base element selection.

    fn set_base_elem_type(
        &mut self,
        b: &mut Builder,
        var: InstId,
        space: AddressSpace,
        access: Access,
    ) {
        let size = if space == AddressSpace::Uniform {
            16
        } else {
            smallest_access_size(b.module, var)
        };
        let base = match size {
            // 6 is a vec3<f16>; it needs 2-byte granularity.
            2 | 6 => b.module.types.u16(),
            // 12 is a vec3<u32>; it needs 4-byte granularity.
            1 | 3 | 4 | 5 | 7 | 12 => b.module.types.u32(),
            8..=11 => b.module.types.vec2u(),
            13..=16 => b.module.types.vec4u(),
            _ => ice!("unexpected smallest access size {}", size),
        };
        self.base_ty = Some(base);
        self.base_ptr_ty = Some(b.module.types.ptr(space, base, access));
    }

    fn base_ty(&self) -> TypeId {
        self.base_ty.unwrap()
    }

    fn base_ptr_ty(&self) -> TypeId {
        self.base_ptr_ty.unwrap()
    }

    fn base_size(&self, module: &Module) -> u32 {
        module.types.size_of(self.base_ty())
    }

    /// Number of base elements needed to represent `ty`, rounded up.
    fn num_base_elements(&self, module: &Module, ty: TypeId) -> u32 {
        let bs = self.base_size(module);
        (module.types.size_of(ty) + bs - 1) / bs
    }

    // Offset arithmetic.

    /// Materialise an offset as a u32 value. A pure zero becomes the literal
    /// `0u` so index math always has a value to work from.
    fn offset_to_value(&mut self, b: &mut Builder, offset: Offset) -> ValueId {
        let mut val = if offset.const_bytes != 0 {
            Some(b.u32_(offset.const_bytes))
        } else if offset.exprs.is_empty() {
            return b.u32_(0);
        } else {
            None
        };
        for expr in offset.exprs {
            val = Some(match val {
                None => expr,
                Some(v) => {
                    let add = b.add(v, expr);
                    b.result(add)
                }
            });
        }
        val.unwrap()
    }

    /// Convert a byte offset into an index of the canonical array.
    fn offset_to_array_index(&mut self, b: &mut Builder, byte_idx: ValueId) -> ValueId {
        let bs = self.base_size(b.module);
        if let Some(c) = b.module.const_u32(byte_idx) {
            return b.u32_(c / bs);
        }
        let bs = b.u32_(bs);
        let div = b.divide(byte_idx, bs);
        b.result(div)
    }

    /// Index of the lane holding the byte at `byte_idx % size(vec)`.
    /// Bitwise-and plus shift rather than modulo plus divide, which
    /// miscompiles under FXC.
    fn calc_vector_offset(&mut self, b: &mut Builder, byte_idx: ValueId, vec_ty: TypeId) -> ValueId {
        let size = b.module.types.size_of(vec_ty);
        let (elem, _) = b.module.types.as_vector(vec_ty).unwrap();
        let elem_size = b.module.types.size_of(elem);
        if let Some(c) = b.module.const_u32(byte_idx) {
            return b.u32_((c % size) / elem_size);
        }
        let mask = b.u32_(size - 1);
        let masked = b.and_(byte_idx, mask);
        let masked = b.result(masked);
        let shift = b.u32_(elem_size.trailing_zeros());
        let shifted = b.shift_right(masked, shift);
        b.result(shifted)
    }

    /// Fold `index * elem_size` into the offset.
    fn update_offset(&mut self, b: &mut Builder, index: ValueId, elem_size: u32, offset: &mut Offset) {
        if let Some(c) = b.module.const_u32(index) {
            offset.const_bytes += c * elem_size;
        } else {
            let u32_ = b.module.types.u32();
            let idx = b.convert_if_needed(u32_, index);
            let size = b.u32_(elem_size);
            let mul = b.multiply(idx, size);
            offset.exprs.push(b.result(mul));
        }
    }

    // Access chain walking.

    fn process_access(
        &mut self,
        b: &mut Builder,
        access: InstId,
        var: InstId,
        obj_ty: TypeId,
        mut offset: Offset,
    ) {
        // The object may be a partially resolved chain, not the var itself.
        let mut ty = match b.module.types.store_type(obj_ty) {
            Some(store) => store,
            None => obj_ty,
        };
        let operand_count = b.module.operands(access).len();
        for i in 1..operand_count {
            let index = b.module.operand(access, i).unwrap();
            match b.module.types.get(ty).clone() {
                Type::Vector { elem, .. } => {
                    let elem_size = b.module.types.size_of(elem);
                    b.insert_before(access, |b| {
                        self.update_offset(b, index, elem_size, &mut offset);
                    });
                    ty = elem;
                }
                Type::Matrix { column_type, .. } => {
                    let stride = b.module.types.align_of(column_type);
                    b.insert_before(access, |b| {
                        self.update_offset(b, index, stride, &mut offset);
                    });
                    ty = column_type;
                }
                Type::Array {
                    element,
                    implicit_stride,
                    ..
                } => {
                    b.insert_before(access, |b| {
                        self.update_offset(b, index, implicit_stride, &mut offset);
                    });
                    ty = element;
                }
                Type::Struct { members, .. } => {
                    let idx = b
                        .module
                        .const_u32(index)
                        .unwrap_or_else(|| ice!("struct access index is not a constant"));
                    let member = &members[idx as usize];
                    offset.const_bytes += member.offset;
                    ty = member.ty;
                }
                _ => ice!("access into a non-composite type"),
            }
        }
        self.access_uses(b, access, var, ty, offset);
    }

    fn process_buffer_view(&mut self, b: &mut Builder, call: InstId, var: InstId, mut offset: Offset) {
        let offset_arg = b.module.operand(call, 1).unwrap();
        b.insert_before(call, |b| {
            self.update_offset(b, offset_arg, 1, &mut offset);
        });
        let result_ty = b.module.value_ty(b.module.inst_result(call, 0));
        let obj_ty = b
            .module
            .types
            .store_type(result_ty)
            .unwrap_or_else(|| ice!("bufferView result is not a pointer"));
        self.access_uses(b, call, var, obj_ty, offset);
    }

    /// Replace every use of a resolved chain element, then drop it.
    fn access_uses(
        &mut self,
        b: &mut Builder,
        inst: InstId,
        var: InstId,
        obj_ty: TypeId,
        offset: Offset,
    ) {
        let result = b.module.inst_result(inst, 0);
        let mut usages = b.module.uses_sorted(result);
        while let Some(usage) = usages.pop() {
            let user = usage.inst;
            if !b.module.alive(user) {
                continue;
            }
            match b.module.kind(user).clone() {
                InstKind::Let => {
                    let let_result = b.module.inst_result(user, 0);
                    usages.extend(b.module.uses_sorted(let_result));
                    b.module.replace_all_uses_with(let_result, result);
                    b.module.destroy(user);
                }
                InstKind::Access => {
                    // A chain of the chain: continue from where this one
                    // stopped.
                    self.process_access(b, user, var, obj_ty, offset.clone());
                }
                InstKind::Load => {
                    self.process_load(b, user, var, offset.clone());
                }
                InstKind::Store => {
                    self.process_store(b, user, var, offset.clone());
                }
                InstKind::LoadVectorElement => {
                    self.process_lve(b, user, var, offset.clone());
                }
                InstKind::StoreVectorElement => {
                    self.process_sve(b, user, var, offset.clone());
                }
                InstKind::CoreBuiltinCall(BuiltinFn::ArrayLength) => {
                    self.rewrite_array_length(b, user, var, obj_ty, offset.clone());
                }
                _ => ice!("unhandled use of a decomposed access chain"),
            }
        }
        b.module.destroy(inst);
    }

    // Loads.

    fn process_load(&mut self, b: &mut Builder, ld: InstId, var: InstId, offset: Offset) {
        let result = b.module.inst_result(ld, 0);
        let result_ty = b.module.value_ty(result);
        b.insert_before(ld, |b| {
            let byte_idx = self.offset_to_value(b, offset);
            let loaded = self.make_load(b, var, result_ty, byte_idx);
            let loaded = b.module.inst_result(loaded, 0);
            b.module.replace_all_uses_with(result, loaded);
        });
        b.module.destroy(ld);
    }

    fn process_lve(&mut self, b: &mut Builder, lve: InstId, var: InstId, mut offset: Offset) {
        let result = b.module.inst_result(lve, 0);
        let result_ty = b.module.value_ty(result);
        let index = b.module.operand(lve, 1).unwrap();
        let elem_size = b.module.types.size_of(result_ty);
        b.insert_before(lve, |b| {
            self.update_offset(b, index, elem_size, &mut offset);
            let byte_idx = self.offset_to_value(b, offset.clone());
            let loaded = self.make_load(b, var, result_ty, byte_idx);
            let loaded = b.module.inst_result(loaded, 0);
            b.module.replace_all_uses_with(result, loaded);
        });
        b.module.destroy(lve);
    }

    /// The load instructions for `result_ty` at `byte_idx`, returning the
    /// instruction producing the final value.
    fn make_load(
        &mut self,
        b: &mut Builder,
        var: InstId,
        result_ty: TypeId,
        byte_idx: ValueId,
    ) -> InstId {
        match b.module.types.get(result_ty).clone() {
            Type::Struct { .. } | Type::Matrix { .. } | Type::Array { .. } => {
                let f = self.load_fn_for(b, var, result_ty);
                b.call(f, vec![byte_idx])
            }
            Type::Vector { .. } => self.make_vector_load(b, var, result_ty, byte_idx),
            ty if ty.is_scalar() => self.make_scalar_load(b, var, result_ty, byte_idx),
            _ => ice!("cannot decompose a load of this type"),
        }
    }

    /// `n` consecutive base-element loads starting at `start_idx`.
    fn make_n_load_insts(
        &mut self,
        b: &mut Builder,
        var: InstId,
        start_idx: ValueId,
        n: u32,
    ) -> Vec<InstId> {
        let var_ptr = b.module.inst_result(var, 0);
        let base_ptr = self.base_ptr_ty();
        let mut loads = Vec::with_capacity(n as usize);
        let mut idx = start_idx;
        for i in 0..n {
            if i > 0 {
                idx = self.increment_index(b, idx);
            }
            let access = b.access(base_ptr, var_ptr, vec![idx]);
            let access = b.result(access);
            loads.push(b.load(access));
        }
        loads
    }

    fn make_n_loads(
        &mut self,
        b: &mut Builder,
        var: InstId,
        start_idx: ValueId,
        n: u32,
    ) -> Vec<ValueId> {
        self.make_n_load_insts(b, var, start_idx, n)
            .into_iter()
            .map(|i| b.module.inst_result(i, 0))
            .collect()
    }

    fn increment_index(&mut self, b: &mut Builder, idx: ValueId) -> ValueId {
        if let Some(c) = b.module.const_u32(idx) {
            b.u32_(c + 1)
        } else {
            let one = b.u32_(1);
            let add = b.add(idx, one);
            b.result(add)
        }
    }

    /// Bitcast or convert to `result_ty`. Bools cannot be bitcast, so they
    /// round-trip through a u32 of matching width.
    fn cast_value(&mut self, b: &mut Builder, result_ty: TypeId, from: ValueId) -> ValueId {
        let from_ty = b.module.value_ty(from);
        let result_leaf = b.module.types.deepest_element(result_ty);
        if matches!(b.module.types.get(result_leaf), Type::Bool) {
            let u32_ = b.module.types.u32();
            let mid_ty = b.module.types.match_width(u32_, result_ty);
            let mid = b.bitcast_if_needed(mid_ty, from);
            let cvt = b.convert(result_ty, mid);
            return b.module.inst_result(cvt, 0);
        }
        let from_leaf = b.module.types.deepest_element(from_ty);
        if matches!(b.module.types.get(from_leaf), Type::Bool) {
            let u32_ = b.module.types.u32();
            let mid_ty = b.module.types.match_width(u32_, from_ty);
            let cvt = b.convert(mid_ty, from);
            let mid = b.module.inst_result(cvt, 0);
            return b.bitcast_if_needed(result_ty, mid);
        }
        b.bitcast_if_needed(result_ty, from)
    }

    /// Like [`State::cast_value`], returning the producing instruction (the
    /// input instruction when no cast is needed).
    fn cast_inst(&mut self, b: &mut Builder, result_ty: TypeId, inst: InstId) -> InstId {
        let from = b.module.inst_result(inst, 0);
        if b.module.value_ty(from) == result_ty {
            return inst;
        }
        let cast = self.cast_value(b, result_ty, from);
        match b.module.value(cast).kind {
            wgir_core::value::ValueKind::InstructionResult { inst, .. } => inst,
            _ => ice!("cast produced a non-instruction value"),
        }
    }

    fn make_scalar_load(
        &mut self,
        b: &mut Builder,
        var: InstId,
        result_ty: TypeId,
        byte_idx: ValueId,
    ) -> InstId {
        let num = self.num_base_elements(b.module, result_ty);
        let array_idx = self.offset_to_array_index(b, byte_idx);
        if num > 1 {
            // Only possible with a u16 base and a 4-byte scalar.
            if num != 2 {
                ice!("scalar load spanning {} base elements", num);
            }
            let base = self.base_ty();
            let vec_ty = b.module.types.vec(base, num);
            let loads = self.make_n_loads(b, var, array_idx, num);
            let construct = b.construct(vec_ty, loads);
            return self.cast_inst(b, result_ty, construct);
        }

        let var_ptr = b.module.inst_result(var, 0);
        let base_ptr = self.base_ptr_ty();
        let access = b.access(base_ptr, var_ptr, vec![array_idx]);
        let access = b.result(access);

        let base = self.base_ty();
        let load = if matches!(b.module.types.get(base), Type::Vector { .. }) {
            let vec_idx = self.calc_vector_offset(b, byte_idx, base);
            b.load_vector_element(access, vec_idx)
        } else {
            b.load(access)
        };

        let loaded_ty = b.module.value_ty(b.module.inst_result(load, 0));
        if b.module.types.size_of(result_ty) < b.module.types.size_of(loaded_ty) {
            return self.extract_scalar_2bytes(b, load, result_ty, byte_idx);
        }
        self.cast_inst(b, result_ty, load)
    }

    /// Pick a sub-element out of a wider load: bitcast the loaded word to a
    /// vector of `result_ty` and extract the lane holding `byte_idx`.
    fn extract_scalar_2bytes(
        &mut self,
        b: &mut Builder,
        load: InstId,
        result_ty: TypeId,
        byte_idx: ValueId,
    ) -> InstId {
        let loaded = b.module.inst_result(load, 0);
        let load_size = b.module.types.size_of(b.module.value_ty(loaded));
        let num = load_size / b.module.types.size_of(result_ty);
        let vec_ty = b.module.types.vec(result_ty, num);
        let element_index = if let Some(c) = b.module.const_u32(byte_idx) {
            if c % 4 == 0 {
                b.u32_(0)
            } else {
                b.u32_(1)
            }
        } else {
            let u32_ = b.module.types.u32();
            let four = b.u32_(4);
            let rem = b.modulo(byte_idx, four);
            let rem = b.result(rem);
            let zero = b.u32_(0);
            let cmp = b.equal(rem, zero);
            let cond = b.result(cmp);
            let one = b.u32_(1);
            let select = b.select(u32_, one, zero, cond);
            b.result(select)
        };
        let bitcast = b.bitcast(vec_ty, loaded);
        let bitcast = b.result(bitcast);
        b.access(result_ty, bitcast, vec![element_index])
    }

    fn make_vector_load(
        &mut self,
        b: &mut Builder,
        var: InstId,
        result_ty: TypeId,
        byte_idx: ValueId,
    ) -> InstId {
        let (elem, width) = b.module.types.as_vector(result_ty).unwrap();
        if b.module.types.size_of(elem) == 2 {
            return self.make_vector_load_f16(b, var, result_ty, byte_idx);
        }

        let array_idx = self.offset_to_array_index(b, byte_idx);
        let mut num_loads = self.num_base_elements(b.module, result_ty);
        let mut loads = self.make_n_load_insts(b, var, array_idx, num_loads);

        let base = self.base_ty();
        let base_size = self.base_size(b.module);
        if base_size < b.module.types.size_of(elem) {
            // u16 base under 4-byte elements: pair base loads into u32s.
            if !matches!(b.module.types.get(base), Type::U16) {
                ice!("undersized base element is not u16");
            }
            let u32_ = b.module.types.u32();
            let pair_ty = b.module.types.vec2(base);
            let mut paired = Vec::new();
            let mut i = 0;
            while i < num_loads as usize {
                let lo = b.module.inst_result(loads[i], 0);
                let hi = b.module.inst_result(loads[i + 1], 0);
                let pair = b.construct(pair_ty, vec![lo, hi]);
                let pair = b.result(pair);
                paired.push(b.bitcast(u32_, pair));
                i += 2;
            }
            loads = paired;
            num_loads /= 2;
        }

        let first_ty = b.module.value_ty(b.module.inst_result(loads[0], 0));
        let u32_ = b.module.types.u32();
        let vec2u = b.module.types.vec2u();
        let vec4u = b.module.types.vec4u();
        let args: Vec<ValueId> = loads
            .iter()
            .map(|l| b.module.inst_result(*l, 0))
            .collect();
        let value = if first_ty == u32_ {
            let vec_ty = b.module.types.vec(u32_, num_loads);
            b.construct(vec_ty, args)
        } else if first_ty == vec2u {
            if loads.len() > 1 {
                b.construct(vec4u, args)
            } else {
                loads[0]
            }
        } else if first_ty == vec4u {
            loads[0]
        } else {
            ice!("unexpected base load type");
        };

        let load = match width {
            4 => value,
            3 => {
                let vec3u = b.module.types.vec3u();
                let v = b.module.inst_result(value, 0);
                b.swizzle(vec3u, v, vec![0, 1, 2])
            }
            2 => {
                let value_size =
                    b.module
                        .types
                        .size_of(b.module.value_ty(b.module.inst_result(value, 0)));
                if value_size == b.module.types.size_of(result_ty) {
                    value
                } else {
                    // A vec2 inside a vec4 word: low nibble 0 takes .xy,
                    // 8 takes .zw.
                    let v = b.module.inst_result(value, 0);
                    let vec_idx = self.calc_vector_offset(b, byte_idx, vec4u);
                    if let Some(c) = b.module.const_u32(vec_idx) {
                        if c == 2 {
                            b.swizzle(vec2u, v, vec![2, 3])
                        } else {
                            b.swizzle(vec2u, v, vec![0, 1])
                        }
                    } else {
                        let zw = b.swizzle(vec2u, v, vec![2, 3]);
                        let zw = b.result(zw);
                        let xy = b.swizzle(vec2u, v, vec![0, 1]);
                        let xy = b.result(xy);
                        let two = b.u32_(2);
                        let cmp = b.equal(vec_idx, two);
                        let cond = b.result(cmp);
                        b.select(vec2u, xy, zw, cond)
                    }
                }
            }
            _ => ice!("unexpected vector width"),
        };
        self.cast_inst(b, result_ty, load)
    }

    /// Loads of 2-byte-element vectors. With a `vec4<u32>` base the vector
    /// occupies one half (or one lane) of the 16-byte word:
    ///
    /// byte:       0         4         8        12
    /// vec4<u32>:  |    x    |    y    |    z    |    w    |
    /// vec4<f16>:  | x  | y  | z  | w  | x  | y  | z  | w  |
    /// vec2<f16>:  | x  | y  | x  | y  | x  | y  | x  | y  |
    fn make_vector_load_f16(
        &mut self,
        b: &mut Builder,
        var: InstId,
        result_ty: TypeId,
        byte_idx: ValueId,
    ) -> InstId {
        let (_, width) = b.module.types.as_vector(result_ty).unwrap();
        let array_idx = self.offset_to_array_index(b, byte_idx);
        let num_loads = self.num_base_elements(b.module, result_ty);
        let loads = self.make_n_loads(b, var, array_idx, num_loads);

        let base = self.base_ty();
        let u32_ = b.module.types.u32();
        let vec2u = b.module.types.vec2u();
        let vec4u = b.module.types.vec4u();

        if matches!(b.module.types.get(base), Type::U16) {
            // One scalar load per element.
            let vec_ty = b.module.types.vec(base, num_loads);
            let construct = b.construct(vec_ty, loads);
            if vec_ty != result_ty {
                let c = b.module.inst_result(construct, 0);
                return b.bitcast(result_ty, c);
            }
            return construct;
        }
        if base == u32_ {
            if width == 2 {
                return b.bitcast(result_ty, loads[0]);
            }
            if width != 4 {
                ice!("vec3<f16> cannot load from a u32 base");
            }
            let construct = b.construct(vec2u, loads);
            let c = b.module.inst_result(construct, 0);
            return b.bitcast(result_ty, c);
        }
        if base == vec2u {
            if width != 4 {
                ice!("only vec4 of 2-byte elements fits a vec2<u32> base");
            }
            return b.bitcast(result_ty, loads[0]);
        }
        if base != vec4u || loads.len() != 1 {
            ice!("unexpected base element for an f16 vector load");
        }

        if width == 3 || width == 4 {
            // Take the half-word holding the vector, then bitcast. A vec3 is
            // stored as a vec4, so bitcast as vec4 and swizzle off the tail.
            let vec_idx = self.calc_vector_offset(b, byte_idx, vec4u); // 0 or 2
            let half = if let Some(c) = b.module.const_u32(vec_idx) {
                if c == 2 {
                    b.swizzle(vec2u, loads[0], vec![2, 3])
                } else {
                    b.swizzle(vec2u, loads[0], vec![0, 1])
                }
            } else {
                let zw = b.swizzle(vec2u, loads[0], vec![2, 3]);
                let zw = b.result(zw);
                let xy = b.swizzle(vec2u, loads[0], vec![0, 1]);
                let xy = b.result(xy);
                let two = b.u32_(2);
                let cmp = b.equal(vec_idx, two);
                let cond = b.result(cmp);
                b.select(vec2u, xy, zw, cond)
            };
            let half = b.module.inst_result(half, 0);
            if width == 3 {
                let (elem, _) = b.module.types.as_vector(result_ty).unwrap();
                let vec4e = b.module.types.vec4(elem);
                let bc = b.bitcast(vec4e, half);
                let bc = b.result(bc);
                return b.swizzle(result_ty, bc, vec![0, 1, 2]);
            }
            return b.bitcast(result_ty, half);
        }

        // vec2: pick the u32 lane and bitcast.
        let vec_idx = self.calc_vector_offset(b, byte_idx, vec4u); // 0..3
        let lane = if let Some(c) = b.module.const_u32(vec_idx) {
            b.swizzle(u32_, loads[0], vec![c])
        } else {
            b.access(u32_, loads[0], vec![vec_idx])
        };
        let lane = b.module.inst_result(lane, 0);
        b.bitcast(result_ty, lane)
    }

    // Aggregate load helpers.

    fn load_fn_for(&mut self, b: &mut Builder, var: InstId, ty: TypeId) -> FuncId {
        if let Some(f) = self.load_fns.get(&(var, ty)) {
            return *f;
        }
        let name = helper_name(b.module, "load", ty);
        let f = b.function(&name, ty);
        let u32_ = b.module.types.u32();
        let start = b.function_param("start_byte_offset", u32_);
        b.module.set_function_params(f, vec![start]);
        self.load_fns.insert((var, ty), f);

        let body = b.body(f);
        match b.module.types.get(ty).clone() {
            Type::Matrix {
                columns,
                column_type,
            } => {
                let stride = b.module.types.align_of(column_type);
                b.append_to(body, |b| {
                    let mut columns_vals = Vec::with_capacity(columns as usize);
                    for i in 0..columns {
                        let offset = Offset {
                            const_bytes: i * stride,
                            exprs: vec![start],
                        };
                        let byte_idx = self.offset_to_value(b, offset);
                        let col = self.make_load(b, var, column_type, byte_idx);
                        columns_vals.push(b.module.inst_result(col, 0));
                    }
                    let construct = b.construct(ty, columns_vals);
                    let value = b.result(construct);
                    b.return_value(f, value);
                });
            }
            Type::Array {
                element,
                count,
                implicit_stride,
                ..
            } => {
                let n = match count {
                    ArrayCount::Constant(n) => n,
                    ArrayCount::Runtime => ice!("helper load of a runtime-sized array"),
                };
                b.append_to(body, |b| {
                    let zero = b.zero(ty);
                    let result_arr = b.var_named("a", AddressSpace::Function, ty, Access::ReadWrite);
                    b.set_initializer(result_arr, zero);
                    let result_ptr = b.result(result_arr);
                    let elem_ptr_ty =
                        b.module
                            .types
                            .ptr(AddressSpace::Function, element, Access::ReadWrite);
                    let lo = b.u32_(0);
                    let hi = b.u32_(n);
                    let step = b.u32_(1);
                    b.loop_range(lo, hi, step, |b, idx| {
                        let stride_v = b.u32_(implicit_stride);
                        let mul = b.multiply(idx, stride_v);
                        let stride_expr = b.result(mul);
                        let offset = Offset {
                            const_bytes: 0,
                            exprs: vec![start, stride_expr],
                        };
                        let byte_idx = self.offset_to_value(b, offset);
                        let slot = b.access(elem_ptr_ty, result_ptr, vec![idx]);
                        let slot = b.result(slot);
                        let value = self.make_load(b, var, element, byte_idx);
                        let value = b.module.inst_result(value, 0);
                        b.store(slot, value);
                    });
                    let load = b.load(result_ptr);
                    let value = b.result(load);
                    b.return_value(f, value);
                });
            }
            Type::Struct { members, .. } => {
                b.append_to(body, |b| {
                    let mut values = Vec::with_capacity(members.len());
                    for member in &members {
                        let offset = Offset {
                            const_bytes: member.offset,
                            exprs: vec![start],
                        };
                        let byte_idx = self.offset_to_value(b, offset);
                        let value = self.make_load(b, var, member.ty, byte_idx);
                        values.push(b.module.inst_result(value, 0));
                    }
                    let construct = b.construct(ty, values);
                    let value = b.result(construct);
                    b.return_value(f, value);
                });
            }
            _ => ice!("no load helper for this type"),
        }
        f
    }

    // arrayLength / bufferLength.

    /// The transformed variable's `arrayLength` counts base elements; divide
    /// by the element-to-base ratio and subtract any view or struct prefix.
    /// When the prefix and the element stride are not commensurate the
    /// integer division truncates.
    fn rewrite_array_length(
        &mut self,
        b: &mut Builder,
        call: InstId,
        var: InstId,
        obj_ty: TypeId,
        offset: Offset,
    ) {
        let (prefix, array_ty) = match b.module.types.get(obj_ty).clone() {
            Type::Array {
                count: ArrayCount::Runtime,
                ..
            } => (0, obj_ty),
            // For a struct-typed buffer the length refers to the trailing
            // runtime array; its start joins the byte prefix.
            Type::Struct { members, .. } => {
                let last = members.last().unwrap();
                (last.offset, last.ty)
            }
            _ => ice!("arrayLength of a non-runtime-sized object"),
        };
        if !matches!(
            b.module.types.get(array_ty),
            Type::Array {
                count: ArrayCount::Runtime,
                ..
            }
        ) {
            ice!("arrayLength target does not end in a runtime-sized array");
        }
        let mut offset = offset;
        offset.const_bytes += prefix;

        let bs = self.base_size(b.module);
        let stride = match b.module.types.get(array_ty) {
            Type::Array { stride, .. } => *stride,
            _ => ice!("arrayLength of a non-array"),
        };
        let ratio = stride / bs;

        let var_ptr = b.module.inst_result(var, 0);
        let old_result = b.module.inst_result(call, 0);
        b.insert_before(call, |b| {
            let u32_ = b.module.types.u32();
            let mut inst = b.builtin_call(u32_, BuiltinFn::ArrayLength, vec![var_ptr]);

            if offset.exprs.len() > 1 {
                ice!("arrayLength with more than one dynamic offset");
            }
            let mut value = None;
            if offset.const_bytes > 0 && !offset.exprs.is_empty() {
                let c = b.u32_(offset.const_bytes);
                let add = b.add(offset.exprs[0], c);
                value = Some(b.result(add));
            } else if !offset.exprs.is_empty() {
                value = Some(offset.exprs[0]);
            } else if offset.const_bytes > 0 {
                value = Some(b.u32_(offset.const_bytes / bs));
            }
            if let Some(v) = value {
                if !offset.exprs.is_empty() {
                    let bs_v = b.u32_(bs);
                    let div = b.divide(v, bs_v);
                    value = Some(b.result(div));
                } else {
                    value = Some(v);
                }
            }
            if let Some(v) = value {
                let len = b.module.inst_result(inst, 0);
                inst = b.subtract(len, v);
            }
            if ratio != 1 {
                let prev = b.module.inst_result(inst, 0);
                let ratio_v = b.u32_(ratio);
                inst = b.divide(prev, ratio_v);
            }
            let new_result = b.module.inst_result(inst, 0);
            b.module.replace_all_uses_with(old_result, new_result);
        });
        b.module.destroy(call);
    }

    /// `bufferLength` becomes the view's injected limit, the type's constant
    /// size, or `arrayLength(var) * base_size`.
    fn rewrite_buffer_length(&mut self, b: &mut Builder, call: InstId, var: InstId, store_ty: TypeId) {
        let old_result = b.module.inst_result(call, 0);
        if b.module.operands(call).len() > 1 {
            // Direct variable access injected a lower limit.
            let limit = b.module.operand(call, 1).unwrap();
            b.module.replace_all_uses_with(old_result, limit);
        } else if !b.module.types.has_runtime_size(store_ty) {
            let size = b.module.types.size_of(store_ty);
            let c = b.u32_(size);
            b.module.replace_all_uses_with(old_result, c);
        } else {
            let var_ptr = b.module.inst_result(var, 0);
            let bs = self.base_size(b.module);
            b.insert_before(call, |b| {
                let u32_ = b.module.types.u32();
                let len = b.builtin_call(u32_, BuiltinFn::ArrayLength, vec![var_ptr]);
                let len = b.result(len);
                let bs_v = b.u32_(bs);
                let mul = b.multiply(len, bs_v);
                let total = b.result(mul);
                b.module.replace_all_uses_with(old_result, total);
            });
        }
        b.module.destroy(call);
    }

    // Stores.

    fn process_store(&mut self, b: &mut Builder, s: InstId, var: InstId, offset: Offset) {
        let from = b.module.operand(s, 1).unwrap();
        b.insert_before(s, |b| {
            let byte_idx = self.offset_to_value(b, offset);
            self.make_store(b, var, from, byte_idx);
        });
        b.module.destroy(s);
    }

    fn process_sve(&mut self, b: &mut Builder, s: InstId, var: InstId, mut offset: Offset) {
        let index = b.module.operand(s, 1).unwrap();
        let from = b.module.operand(s, 2).unwrap();
        let elem_size = b.module.types.size_of(b.module.value_ty(from));
        b.insert_before(s, |b| {
            self.update_offset(b, index, elem_size, &mut offset);
            let byte_idx = self.offset_to_value(b, offset.clone());
            self.make_store(b, var, from, byte_idx);
        });
        b.module.destroy(s);
    }

    fn make_store(&mut self, b: &mut Builder, var: InstId, from: ValueId, byte_idx: ValueId) {
        let from_ty = b.module.value_ty(from);
        match b.module.types.get(from_ty).clone() {
            Type::Struct { .. } | Type::Matrix { .. } | Type::Array { .. } => {
                let f = self.store_fn_for(b, var, from_ty);
                b.call(f, vec![byte_idx, from]);
            }
            Type::Vector { .. } => self.make_vector_store(b, var, from, byte_idx),
            ty if ty.is_scalar() => self.make_scalar_store(b, var, from, byte_idx),
            _ => ice!("cannot decompose a store of this type"),
        }
    }

    fn make_scalar_store(&mut self, b: &mut Builder, var: InstId, from: ValueId, byte_idx: ValueId) {
        let st_ty = b.module.value_ty(from);
        let num = self.num_base_elements(b.module, st_ty);
        let mut array_idx = self.offset_to_array_index(b, byte_idx);
        let var_ptr = b.module.inst_result(var, 0);
        let base = self.base_ty();
        let base_ptr = self.base_ptr_ty();
        if num > 1 {
            // u16 base storing a 4-byte scalar: split into two lanes.
            if num != 2 || !matches!(b.module.types.get(base), Type::U16) {
                ice!("scalar store spanning {} base elements", num);
            }
            let vec_ty = b.module.types.vec(base, num);
            let cast = self.cast_value(b, vec_ty, from);
            for i in 0..num {
                let access = b.access(base_ptr, var_ptr, vec![array_idx]);
                let slot = b.result(access);
                let lane = b.access_u32(base, cast, i);
                let lane = b.result(lane);
                b.store(slot, lane);
                if i + 1 < num {
                    array_idx = self.increment_index(b, array_idx);
                }
            }
            return;
        }

        // A smaller store size would have selected a smaller base type.
        if b.module.types.size_of(st_ty) != self.base_size(b.module) {
            ice!("scalar store size does not match the base element");
        }
        let value = self.cast_value(b, base, from);
        let access = b.access(base_ptr, var_ptr, vec![array_idx]);
        let slot = b.result(access);
        b.store(slot, value);
    }

    fn make_vector_store(&mut self, b: &mut Builder, var: InstId, from: ValueId, byte_idx: ValueId) {
        let st_ty = b.module.value_ty(from);
        let num = self.num_base_elements(b.module, st_ty);
        let mut array_idx = self.offset_to_array_index(b, byte_idx);
        let var_ptr = b.module.inst_result(var, 0);
        let base = self.base_ty();
        let base_ptr = self.base_ptr_ty();

        if matches!(b.module.types.get(base), Type::Vector { .. }) {
            // | base  | possible store sizes            | stores |
            // | vec2u | vec2u, vec4u, vec4h (not vec3u) | 1 or 2 |
            // | vec4u | vec4u                           | 1      |
            if num == 1 {
                let value = self.cast_value(b, base, from);
                let access = b.access(base_ptr, var_ptr, vec![array_idx]);
                let slot = b.result(access);
                b.store(slot, value);
            } else {
                let leaf = b.module.types.deepest_element(st_ty);
                let sub_vec_ty = b.module.types.vec2(leaf);
                let first = b.swizzle(sub_vec_ty, from, vec![0, 1]);
                let first = b.module.inst_result(first, 0);
                let first = self.cast_value(b, base, first);
                let access = b.access(base_ptr, var_ptr, vec![array_idx]);
                let slot = b.result(access);
                b.store(slot, first);

                array_idx = self.increment_index(b, array_idx);
                let second = b.swizzle(sub_vec_ty, from, vec![2, 3]);
                let second = b.module.inst_result(second, 0);
                let second = self.cast_value(b, base, second);
                let access = b.access(base_ptr, var_ptr, vec![array_idx]);
                let slot = b.result(access);
                b.store(slot, second);
            }
            return;
        }

        // Scalar base: store each piece at successive indices.
        let leaf = b.module.types.deepest_element(st_ty);
        let ratio = b.module.types.size_of(leaf) / self.base_size(b.module);
        if ratio != 1 && ratio != 2 {
            ice!("unexpected element-to-base ratio {}", ratio);
        }
        for i in 0..num {
            let lane = b.access_u32(leaf, from, i / ratio);
            let mut value = b.module.inst_result(lane, 0);
            if ratio == 2 {
                let pair_ty = b.module.types.vec2(base);
                let pair = self.cast_value(b, pair_ty, value);
                let sub = b.access_u32(base, pair, i % 2);
                value = b.module.inst_result(sub, 0);
            } else if leaf != base {
                value = self.cast_value(b, base, value);
            }
            let access = b.access(base_ptr, var_ptr, vec![array_idx]);
            let slot = b.result(access);
            b.store(slot, value);
            if i + 1 < num {
                array_idx = self.increment_index(b, array_idx);
            }
        }
    }

    fn store_fn_for(&mut self, b: &mut Builder, var: InstId, ty: TypeId) -> FuncId {
        if let Some(f) = self.store_fns.get(&(var, ty)) {
            return *f;
        }
        let name = helper_name(b.module, "store", ty);
        let void = b.module.types.void_();
        let f = b.function(&name, void);
        let u32_ = b.module.types.u32();
        let start = b.function_param("start_byte_offset", u32_);
        let object = b.function_param("object", ty);
        b.module.set_function_params(f, vec![start, object]);
        self.store_fns.insert((var, ty), f);

        let body = b.body(f);
        match b.module.types.get(ty).clone() {
            Type::Struct { members, .. } => {
                b.append_to(body, |b| {
                    for (i, member) in members.iter().enumerate() {
                        let offset = Offset {
                            const_bytes: member.offset,
                            exprs: vec![start],
                        };
                        let byte_idx = self.offset_to_value(b, offset);
                        let from = b.access_u32(member.ty, object, i as u32);
                        let from = b.result(from);
                        self.make_store(b, var, from, byte_idx);
                    }
                    b.return_(f);
                });
            }
            Type::Matrix {
                columns,
                column_type,
            } => {
                let stride = b.module.types.align_of(column_type);
                b.append_to(body, |b| {
                    for c in 0..columns {
                        let offset = Offset {
                            const_bytes: c * stride,
                            exprs: vec![start],
                        };
                        let byte_idx = self.offset_to_value(b, offset);
                        let from = b.access_u32(column_type, object, c);
                        let from = b.result(from);
                        self.make_store(b, var, from, byte_idx);
                    }
                    b.return_(f);
                });
            }
            Type::Array {
                element,
                count,
                implicit_stride,
                ..
            } => {
                let n = match count {
                    ArrayCount::Constant(n) => n,
                    ArrayCount::Runtime => ice!("helper store of a runtime-sized array"),
                };
                b.append_to(body, |b| {
                    let lo = b.u32_(0);
                    let hi = b.u32_(n);
                    let step = b.u32_(1);
                    b.loop_range(lo, hi, step, |b, idx| {
                        let stride_v = b.u32_(implicit_stride);
                        let mul = b.multiply(idx, stride_v);
                        let stride_expr = b.result(mul);
                        let offset = Offset {
                            const_bytes: 0,
                            exprs: vec![start, stride_expr],
                        };
                        let byte_idx = self.offset_to_value(b, offset);
                        let from = b.access(element, object, vec![idx]);
                        let from = b.result(from);
                        self.make_store(b, var, from, byte_idx);
                    });
                    b.return_(f);
                });
            }
            _ => ice!("no store helper for this type"),
        }
        f
    }
}

fn contains_atomic(module: &Module, ty: TypeId) -> bool {
    match module.types.get(ty).clone() {
        Type::Atomic { .. } => true,
        Type::Array { element, .. } => contains_atomic(module, element),
        Type::Struct { members, .. } => members.iter().any(|m| contains_atomic(module, m.ty)),
        _ => false,
    }
}

/// The smallest scalar a load or store of `ty` touches; whole-vector sizes
/// for vec2/vec4, the element size for vec3 (which is not size-aligned).
fn smallest_element_size(module: &Module, ty: TypeId) -> u32 {
    match module.types.get(ty).clone() {
        Type::Vector { elem, width, .. } => {
            if width == 3 {
                module.types.size_of(elem)
            } else {
                module.types.size_of(ty)
            }
        }
        Type::Matrix { column_type, .. } => smallest_element_size(module, column_type),
        Type::Array { element, .. } => smallest_element_size(module, element),
        Type::Struct { members, .. } => members
            .iter()
            .map(|m| smallest_element_size(module, m.ty))
            .min()
            .unwrap_or(u32::MAX),
        _ => module.types.size_of(ty),
    }
}

/// Smallest access size reachable from the variable's uses, clamped to 16.
fn smallest_access_size(module: &Module, var: InstId) -> u32 {
    let result = module.inst_result(var, 0);
    let mut size = u32::MAX;
    let mut worklist = module.uses_sorted(result);
    while let Some(usage) = worklist.pop() {
        let inst = usage.inst;
        let candidate = match module.kind(inst) {
            InstKind::LoadVectorElement => {
                module.types.size_of(module.value_ty(module.inst_result(inst, 0)))
            }
            InstKind::StoreVectorElement => {
                let value = module.operand(inst, 2).unwrap();
                module.types.size_of(module.value_ty(value))
            }
            InstKind::Load => {
                smallest_element_size(module, module.value_ty(module.inst_result(inst, 0)))
            }
            InstKind::Store => {
                let value = module.operand(inst, 1).unwrap();
                smallest_element_size(module, module.value_ty(value))
            }
            InstKind::CoreBuiltinCall(BuiltinFn::ArrayLength) => {
                let arg = module.operand(inst, 0).unwrap();
                let store = module.types.store_type(module.value_ty(arg)).unwrap();
                smallest_element_size(module, store)
            }
            InstKind::Access
            | InstKind::Let
            | InstKind::CoreBuiltinCall(BuiltinFn::BufferView) => {
                if let Some(r) = module.try_inst_result(inst) {
                    worklist.extend(module.uses_sorted(r));
                }
                size
            }
            _ => size,
        };
        size = size.min(candidate);
    }
    // Nothing is gained above a vec4<u32>.
    size.min(16)
}

fn helper_name(module: &Module, prefix: &str, ty: TypeId) -> String {
    let raw = module.types.type_name(ty);
    let mut out = String::with_capacity(prefix.len() + raw.len() + 1);
    out.push_str(prefix);
    out.push('_');
    let mut last_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    out.trim_end_matches('_').to_owned()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use wgir_core::builder::Builder;
    use wgir_core::disasm::disassemble;
    use wgir_core::ty::StructMemberDesc;
    use wgir_core::validate::validate;

    use super::*;

    fn run(module: &mut Module) {
        decompose_access(module, &DecomposeAccessOptions::default()).unwrap();
    }

    fn buffer_var(
        b: &mut Builder,
        space: AddressSpace,
        store_ty: TypeId,
        access: Access,
    ) -> ValueId {
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("v", space, store_ty, access);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        b.result(var)
    }

    #[test]
    fn scalar_f32_in_storage() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let v = buffer_var(&mut b, AddressSpace::Storage, f32, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(v);
            let loaded = b.result(load);
            b.let_named("x", loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let expect = "\
$B1: {  # root
  %v:ptr<storage, array<u32, 1>, read> = var undef @binding_point(0, 0)
}
%main = @compute @workgroup_size(1u, 1u, 1u) func():void {
  $B2: {
    %3:ptr<storage, u32, read> = access %v, 0u
    %4:u32 = load %3
    %5:f32 = bitcast %4
    %x:f32 = let %5
    ret
  }
}
";
        assert_eq!(disassemble(&m), expect);
    }

    #[test]
    fn uniform_vec4f_vector_element() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let v4f = b.module.types.vec4(f32);
        let v = buffer_var(&mut b, AddressSpace::Uniform, v4f, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let two = b.u32_(2);
            let lve = b.load_vector_element(v, two);
            let loaded = b.result(lve);
            b.let_named("x", loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let expect = "\
$B1: {  # root
  %v:ptr<uniform, array<vec4<u32>, 1>, read> = var undef @binding_point(0, 0)
}
%main = @compute @workgroup_size(1u, 1u, 1u) func():void {
  $B2: {
    %3:ptr<uniform, vec4<u32>, read> = access %v, 0u
    %4:u32 = load_vector_element %3, 2u
    %5:f32 = bitcast %4
    %x:f32 = let %5
    ret
  }
}
";
        assert_eq!(disassemble(&m), expect);
    }

    #[test]
    fn uniform_mat4x4_load_uses_helper() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let mat = b.module.types.mat(4, 4, f32);
        let v = buffer_var(&mut b, AddressSpace::Uniform, mat, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(v);
            let loaded = b.result(load);
            b.let_named("x", loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("%v:ptr<uniform, array<vec4<u32>, 4>, read> = var"));
        assert!(text.contains("call %load_mat4x4_f32, 0u"));
        assert!(
            text.contains("%load_mat4x4_f32 = func(%start_byte_offset:u32):mat4x4<f32>"),
            "missing helper:\n{}",
            text
        );
        // One column load per column, reassembled with a construct.
        assert_eq!(text.matches("= load %").count(), 4);
        assert!(text.contains("= construct"));
        assert!(text.contains("add 16u, %start_byte_offset"));
    }

    #[test]
    fn matrix_load_helper_is_memoised() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let mat = b.module.types.mat(4, 4, f32);
        let v = buffer_var(&mut b, AddressSpace::Uniform, mat, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let l1 = b.load(v);
            let l1 = b.result(l1);
            b.let_(l1);
            let l2 = b.load(v);
            let l2 = b.result(l2);
            b.let_(l2);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        // main plus exactly one helper.
        assert_eq!(m.functions.len(), 2);
        assert_eq!(disassemble(&m).matches("call %load_mat4x4_f32").count(), 2);
    }

    #[test]
    fn storage_vec2h_load_bitcasts_one_word() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f16 = b.module.types.f16();
        let v2h = b.module.types.vec2(f16);
        let v = buffer_var(&mut b, AddressSpace::Storage, v2h, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(v);
            let loaded = b.result(load);
            b.let_(loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        // A 4-byte vector loads as a single u32 and bitcasts.
        assert!(text.contains("array<u32, 1>"));
        assert!(text.contains("= bitcast"));
    }

    #[test]
    fn storage_vec3h_uses_u16_base() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f16 = b.module.types.f16();
        let v3h = b.module.types.vec3(f16);
        let v = buffer_var(&mut b, AddressSpace::Storage, v3h, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(v);
            let loaded = b.result(load);
            b.let_(loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::ALLOW_16BIT_INTEGERS).unwrap();
        let text = disassemble(&m);
        // vec3<f16> needs 2-byte granularity.
        assert!(text.contains("array<u16, 3>"));
        assert_eq!(text.matches("= load %").count(), 3);
    }

    #[test]
    fn scalar_store_bitcasts_into_base() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let v = buffer_var(&mut b, AddressSpace::Storage, f32, Access::ReadWrite);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let one = b.f32_(1.0);
            b.store(v, one);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("array<u32, 1>"));
        assert!(text.contains("= bitcast 1.0f"));
        assert!(text.contains("store %"));
    }

    #[test]
    fn struct_load_goes_through_helper() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let f32 = m.types.f32();
        let s = m.types.struct_(
            "S",
            vec![
                StructMemberDesc::new("a", u32_),
                StructMemberDesc::new("b", f32),
            ],
        );
        let mut b = Builder::new(&mut m);
        let v = buffer_var(&mut b, AddressSpace::Storage, s, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(v);
            let loaded = b.result(load);
            b.let_(loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("array<u32, 2>"));
        assert!(text.contains("call %load_S, 0u"));
        // Both members load inside the helper and rebuild the struct.
        assert_eq!(text.matches("= load %").count(), 2);
        assert!(text.contains("= construct"));
    }

    #[test]
    fn access_chain_folds_member_offsets() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let f32 = m.types.f32();
        let v4f = m.types.vec4(f32);
        let s = m.types.struct_(
            "S",
            vec![
                StructMemberDesc::new("a", u32_),
                StructMemberDesc::new("b", v4f),
            ],
        );
        let mut b = Builder::new(&mut m);
        let v = buffer_var(&mut b, AddressSpace::Storage, s, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            // &v.b, then load a single element.
            let ptr_ty = b
                .module
                .types
                .ptr(AddressSpace::Storage, v4f, Access::Read);
            let chain = b.access_u32(ptr_ty, v, 1);
            let chain = b.result(chain);
            let one = b.u32_(1);
            let lve = b.load_vector_element(chain, one);
            let loaded = b.result(lve);
            b.let_named("x", loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        // Member b sits at offset 16; element 1 adds 4 bytes: index 5.
        assert!(text.contains("access %v, 5u"), "wrong index:\n{}", text);
    }

    #[test]
    fn array_length_of_runtime_buffer() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let ra = m.types.runtime_array(u32_);
        let mut b = Builder::new(&mut m);
        let v = buffer_var(&mut b, AddressSpace::Storage, ra, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let len = b.builtin_call(u32_, BuiltinFn::ArrayLength, vec![v]);
            let len = b.result(len);
            b.let_named("len", len);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        // u32 elements over a u32 base: ratio 1, no divide.
        assert_eq!(text.matches("arrayLength").count(), 1);
        assert!(!text.contains("= div"));
        assert!(text.contains("array<u32>"));
    }

    #[test]
    fn array_length_subtracts_struct_prefix() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let ra = m.types.runtime_array(u32_);
        let s = m.types.struct_(
            "S",
            vec![
                StructMemberDesc::new("len", u32_),
                StructMemberDesc::new("data", ra),
            ],
        );
        let mut b = Builder::new(&mut m);
        let v = buffer_var(&mut b, AddressSpace::Storage, s, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let ra_ptr = b.module.types.ptr(AddressSpace::Storage, ra, Access::Read);
            let chain = b.access_u32(ra_ptr, v, 1);
            let chain = b.result(chain);
            let len = b.builtin_call(u32_, BuiltinFn::ArrayLength, vec![chain]);
            let len = b.result(len);
            b.let_named("len", len);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        // The 4-byte prefix becomes one base element subtracted from the
        // whole-variable length.
        assert!(text.contains("= sub"), "missing prefix subtract:\n{}", text);
        assert!(text.contains("1u"));
    }

    #[test]
    fn buffer_view_seeds_the_byte_offset() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let ra = m.types.runtime_array(u32_);
        let mut b = Builder::new(&mut m);
        let v = buffer_var(&mut b, AddressSpace::Storage, ra, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let view_ty = b.module.types.ptr(AddressSpace::Storage, u32_, Access::Read);
            let off = b.u32_(8);
            let view = b.builtin_call(view_ty, BuiltinFn::BufferView, vec![v, off]);
            let view = b.result(view);
            let load = b.load(view);
            let loaded = b.result(load);
            b.let_named("x", loaded);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        // 8 bytes over a u32 base is element 2.
        assert!(text.contains("access %v, 2u"), "wrong seed:\n{}", text);
        assert!(!text.contains("bufferView"));
    }

    #[test]
    fn buffer_length_of_fixed_size_buffer_is_constant() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let v4f = b.module.types.vec4(f32);
        let u32_ = b.module.types.u32();
        let v = buffer_var(&mut b, AddressSpace::Storage, v4f, Access::Read);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let len = b.builtin_call(u32_, BuiltinFn::BufferLength, vec![v]);
            let len = b.result(len);
            b.let_named("len", len);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("%len:u32 = let 16u"), "length not folded:\n{}", text);
        assert!(!text.contains("bufferLength"));
    }

    #[test]
    fn buffers_with_atomics_are_skipped() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let atomic = m.types.atomic(u32_);
        let s = m.types.struct_(
            "S",
            vec![
                StructMemberDesc::new("counter", atomic),
                StructMemberDesc::new("value", u32_),
            ],
        );
        let mut b = Builder::new(&mut m);
        let v = buffer_var(&mut b, AddressSpace::Storage, s, Access::ReadWrite);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let ptr_ty = b
                .module
                .types
                .ptr(AddressSpace::Storage, u32_, Access::ReadWrite);
            let chain = b.access_u32(ptr_ty, v, 1);
            let chain = b.result(chain);
            let one = b.u32_(1);
            b.store(chain, one);
            b.return_(func);
        });
        let before = disassemble(&m);
        run(&mut m);
        assert_eq!(disassemble(&m), before);
    }

    #[test]
    fn vector_store_through_vec4_base() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let v4f = b.module.types.vec4(f32);
        let v = buffer_var(&mut b, AddressSpace::Storage, v4f, Access::ReadWrite);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let value = b.zero(v4f);
            b.store(v, value);
            b.return_(func);
        });
        run(&mut m);
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("array<vec4<u32>, 1>"));
        assert!(text.contains("= bitcast"));
        assert!(text.contains("store %"));
    }
}
