//! Folds chained access instructions.
//!
//! `access(access(o, i...), j...)` becomes `access(o, i..., j...)`, and the
//! intermediate access is removed when nothing else uses it. Printers then
//! see a single index chain per pointer expression.

use wgir_core::inst::InstKind;
use wgir_core::module::Module;
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};

use crate::TransformResult;

pub fn combine_access_instructions(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "CombineAccessInstructions", Capabilities::all())?;

    for inst in module.instructions() {
        if !module.alive(inst) || !matches!(module.kind(inst), InstKind::Access) {
            continue;
        }
        let result = module.inst_result(inst, 0);
        for use_ in module.uses_sorted(result) {
            let child = use_.inst;
            // Only fold when the parent result is the child's object operand.
            if use_.operand != 0 || !matches!(module.kind(child), InstKind::Access) {
                continue;
            }
            let mut operands = vec![module.operands(inst)[0]];
            operands.extend_from_slice(&module.operands(inst)[1..]);
            operands.extend_from_slice(&module.operands(child)[1..]);
            module.set_operands(child, operands);
        }
        if !module.has_uses(result) {
            module.destroy(inst);
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use wgir_core::builder::Builder;
    use wgir_core::disasm::disassemble;
    use wgir_core::ty::{Access, AddressSpace, StructMemberDesc};
    use wgir_core::validate::{validate, Capabilities};

    use super::*;

    fn nested_access_module() -> Module {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let v4f = b.module.types.vec4(f32);
        let inner = b.module.types.struct_(
            "Inner",
            vec![StructMemberDesc::new("v", v4f)],
        );
        let outer = b.module.types.struct_(
            "Outer",
            vec![StructMemberDesc::new("inner", inner)],
        );
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("buf", AddressSpace::Storage, outer, Access::ReadWrite);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let var_result = b.result(var);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let inner_ptr_ty = b
                .module
                .types
                .ptr(AddressSpace::Storage, inner, Access::ReadWrite);
            let v_ptr_ty = b
                .module
                .types
                .ptr(AddressSpace::Storage, v4f, Access::ReadWrite);
            let a0 = b.access_u32(inner_ptr_ty, var_result, 0);
            let a0r = b.result(a0);
            let a1 = b.access_u32(v_ptr_ty, a0r, 0);
            let a1r = b.result(a1);
            let load = b.load(a1r);
            let loaded = b.result(load);
            b.let_(loaded);
            b.return_(func);
        });
        m
    }

    #[test]
    fn nested_accesses_are_folded() {
        let mut m = nested_access_module();
        combine_access_instructions(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("access %buf, 0u, 0u"));
        // The intermediate access is gone.
        assert_eq!(text.matches("= access").count(), 1);
    }

    #[test]
    fn idempotent() {
        let mut m = nested_access_module();
        combine_access_instructions(&mut m).unwrap();
        let first = disassemble(&m);
        combine_access_instructions(&mut m).unwrap();
        assert_eq!(disassemble(&m), first);
    }

    #[test]
    fn shared_intermediate_is_kept() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let v4f = b.module.types.vec4(f32);
        let arr = b.module.types.array(v4f, 4);
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("buf", AddressSpace::Storage, arr, Access::ReadWrite);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let var_result = b.result(var);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let v_ptr_ty = b
                .module
                .types
                .ptr(AddressSpace::Storage, v4f, Access::ReadWrite);
            let a0 = b.access_u32(v_ptr_ty, var_result, 0);
            let a0r = b.result(a0);
            // One chained use and one direct load keep the intermediate alive.
            let f32_ptr = b
                .module
                .types
                .ptr(AddressSpace::Storage, f32, Access::ReadWrite);
            let a1 = b.access_u32(f32_ptr, a0r, 1);
            let a1r = b.result(a1);
            let l1 = b.load(a1r);
            let l1r = b.result(l1);
            b.let_(l1r);
            let l0 = b.load(a0r);
            let l0r = b.result(l0);
            b.let_(l0r);
            b.return_(func);
        });
        combine_access_instructions(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert_eq!(text.matches("= access").count(), 2);
        assert!(text.contains("access %buf, 0u, 1u"));
    }
}
