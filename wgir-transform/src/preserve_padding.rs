//! Prevents whole-value stores from writing the padding bytes of their
//! destination.
//!
//! Host-visible buffers may be mapped concurrently with shader execution, so
//! a store of a padded type is decomposed into a helper function that writes
//! each leaf field individually.

use fnv::FnvHashMap as HashMap;

use wgir_core::builder::Builder;
use wgir_core::function::FuncId;
use wgir_core::inst::InstKind;
use wgir_core::module::Module;
use wgir_core::ty::{Access, AddressSpace, ArrayCount, Type, TypeId};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::ValueId;
use wgir_core::ice;

use crate::TransformResult;

pub fn preserve_padding(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "PreservePadding", Capabilities::all())?;

    let mut state = State {
        helpers: HashMap::default(),
    };

    // Find host-visible stores of types that contain padding bytes.
    let mut worklist = Vec::new();
    for inst in module.instructions() {
        if !matches!(module.kind(inst), InstKind::Store) || !module.alive(inst) {
            continue;
        }
        let ptr = match module.operand(inst, 0) {
            Some(p) => p,
            None => continue,
        };
        let ptr_ty = module.value_ty(ptr);
        if module.types.address_space(ptr_ty) != Some(AddressSpace::Storage) {
            continue;
        }
        let store_ty = module.types.store_type(ptr_ty).unwrap();
        if contains_padding(module, store_ty) {
            worklist.push(inst);
        }
    }

    let mut b = Builder::new(module);
    for store in worklist {
        let to = b.module.operand(store, 0).unwrap();
        let value = b.module.operand(store, 1).unwrap();
        let replacement = b.detached(|b| state.make_store(b, to, value));
        b.module.replace(store, replacement);
        b.module.destroy(store);
    }
    Ok(())
}

/// True when the in-memory layout of `ty` has bytes not covered by a field.
fn contains_padding(module: &Module, ty: TypeId) -> bool {
    match module.types.get(ty).clone() {
        Type::Array {
            element, stride, ..
        } => stride > module.types.size_of(element) || contains_padding(module, element),
        Type::Matrix { column_type, .. } => {
            // The column stride is the column vector's alignment.
            module.types.align_of(column_type) > module.types.size_of(column_type)
                || contains_padding(module, column_type)
        }
        Type::Struct { members, size, .. } => {
            let mut current_offset = 0;
            for member in &members {
                if member.offset > current_offset {
                    return true;
                }
                if contains_padding(module, member.ty) {
                    return true;
                }
                current_offset += module.types.size_of(member.ty);
            }
            current_offset < size
        }
        _ => false,
    }
}

struct State {
    /// Map from a store type to the helper function that stores it
    /// field by field.
    helpers: HashMap<TypeId, FuncId>,
}

impl State {
    /// An instruction that stores `value` through `to`, decomposing the
    /// access when the type is padded.
    fn make_store(&mut self, b: &mut Builder, to: ValueId, value: ValueId) -> wgir_core::inst::InstId {
        let store_ty = b.module.value_ty(value);
        if !contains_padding(b.module, store_ty) {
            return b.store(to, value);
        }
        let helper = self.helper_for(b, store_ty);
        b.call(helper, vec![to, value])
    }

    fn helper_for(&mut self, b: &mut Builder, store_ty: TypeId) -> FuncId {
        if let Some(f) = self.helpers.get(&store_ty) {
            return *f;
        }
        let void = b.module.types.void_();
        let ptr_ty = b
            .module
            .types
            .ptr(AddressSpace::Storage, store_ty, Access::ReadWrite);
        let func = b.function("store_and_preserve_padding", void);
        let target = b.function_param("target", ptr_ty);
        let value_param = b.function_param("value_param", store_ty);
        b.module.set_function_params(func, vec![target, value_param]);
        self.helpers.insert(store_ty, func);

        let body = b.body(func);
        b.append_to(body, |b| {
            match b.module.types.get(store_ty).clone() {
                Type::Array { element, count, .. } => {
                    let n = match count {
                        ArrayCount::Constant(n) => n,
                        ArrayCount::Runtime => {
                            ice!("padded store of a runtime-sized array")
                        }
                    };
                    let elem_ptr_ty =
                        b.module
                            .types
                            .ptr(AddressSpace::Storage, element, Access::ReadWrite);
                    let lo = b.u32_(0);
                    let hi = b.u32_(n);
                    let step = b.u32_(1);
                    b.loop_range(lo, hi, step, |b, idx| {
                        let el_ptr = b.access(elem_ptr_ty, target, vec![idx]);
                        let el_ptr = b.result(el_ptr);
                        let el_value = b.access(element, value_param, vec![idx]);
                        let el_value = b.result(el_value);
                        self.make_store(b, el_ptr, el_value);
                    });
                }
                Type::Matrix {
                    columns,
                    column_type,
                } => {
                    let col_ptr_ty =
                        b.module
                            .types
                            .ptr(AddressSpace::Storage, column_type, Access::ReadWrite);
                    for i in 0..columns {
                        let col_ptr = b.access_u32(col_ptr_ty, target, i);
                        let col_ptr = b.result(col_ptr);
                        let col_value = b.access_u32(column_type, value_param, i);
                        let col_value = b.result(col_value);
                        self.make_store(b, col_ptr, col_value);
                    }
                }
                Type::Struct { members, .. } => {
                    for (i, member) in members.iter().enumerate() {
                        let sub_ptr_ty = b.module.types.ptr(
                            AddressSpace::Storage,
                            member.ty,
                            Access::ReadWrite,
                        );
                        let sub_ptr = b.access_u32(sub_ptr_ty, target, i as u32);
                        let sub_ptr = b.result(sub_ptr);
                        let sub_value = b.access_u32(member.ty, value_param, i as u32);
                        let sub_value = b.result(sub_value);
                        self.make_store(b, sub_ptr, sub_value);
                    }
                }
                _ => ice!("padded store of a non-composite type"),
            }
            b.return_(func);
        });
        func
    }
}

#[cfg(test)]
mod test {
    use wgir_core::disasm::disassemble;
    use wgir_core::ty::StructMemberDesc;
    use wgir_core::validate::validate;

    use super::*;

    fn padded_struct(module: &mut Module) -> TypeId {
        let u32_ = module.types.u32();
        let f32 = module.types.f32();
        let v3f = module.types.vec3(f32);
        // vec3 at offset 16 leaves padding after the leading u32 and after
        // the trailing vec3.
        module.types.struct_(
            "S",
            vec![
                StructMemberDesc::new("a", u32_),
                StructMemberDesc::new("b", v3f),
            ],
        )
    }

    #[test]
    fn padded_struct_store_uses_helper() {
        let mut m = Module::new();
        let s = padded_struct(&mut m);
        let mut b = Builder::new(&mut m);
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("buf", AddressSpace::Storage, s, Access::ReadWrite);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let var_result = b.result(var);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let value = b.zero(s);
            b.store(var_result, value);
            b.return_(func);
        });
        preserve_padding(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("store_and_preserve_padding"));
        // The helper stores each member individually.
        assert_eq!(text.matches("= access %target").count(), 2);
    }

    #[test]
    fn unpadded_store_is_untouched() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let v4 = m.types.vec4(u32_);
        let mut b = Builder::new(&mut m);
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("buf", AddressSpace::Storage, v4, Access::ReadWrite);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let var_result = b.result(var);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let value = b.zero(v4);
            b.store(var_result, value);
            b.return_(func);
        });
        let before = disassemble(&m);
        preserve_padding(&mut m).unwrap();
        assert_eq!(disassemble(&m), before);
    }

    #[test]
    fn helper_is_memoised_per_type() {
        let mut m = Module::new();
        let s = padded_struct(&mut m);
        let mut b = Builder::new(&mut m);
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("buf", AddressSpace::Storage, s, Access::ReadWrite);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let var_result = b.result(var);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let value = b.zero(s);
            b.store(var_result, value);
            b.store(var_result, value);
            b.return_(func);
        });
        preserve_padding(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        // main + one helper.
        assert_eq!(m.functions.len(), 2);
    }
}
