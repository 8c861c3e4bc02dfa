//! Replaces bgra8unorm storage textures with rgba8unorm equivalents.
//!
//! Hardware lacking native bgra8 storage support gets an rgba8 texture plus
//! component swizzles on every `textureStore` value and `textureLoad`
//! result.

use wgir_core::builder::Builder;
use wgir_core::function::FuncId;
use wgir_core::inst::{BuiltinFn, InstId, InstKind};
use wgir_core::module::Module;
use wgir_core::ty::{Access, AddressSpace, TexelFormat, Type, TypeId};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::ValueId;
use wgir_core::ice;

use crate::TransformResult;

pub fn bgra8unorm_polyfill(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "Bgra8UnormPolyfill", Capabilities::all())?;

    let mut b = Builder::new(module);

    // Module-scope variables first.
    let mut to_replace = Vec::new();
    for inst in b.module.insts_of(b.module.root_block()) {
        if let InstKind::Var { .. } = b.module.kind(inst) {
            let ptr_ty = b.module.value_ty(b.module.inst_result(inst, 0));
            if let Some(store) = b.module.types.store_type(ptr_ty) {
                if let Some(bgra8) = as_bgra8(b.module, store) {
                    to_replace.push((inst, bgra8));
                }
            }
        }
    }
    for (var, bgra8) in to_replace {
        replace_var(&mut b, var, bgra8);
    }

    // Then function parameters.
    for func in b.module.functions.clone() {
        let params = b.module.function(func).params.clone();
        for (index, param) in params.into_iter().enumerate() {
            let ty = b.module.value_ty(param);
            if let Some(bgra8) = as_bgra8(b.module, ty) {
                replace_param(&mut b, func, param, index, bgra8);
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct Bgra8 {
    dim: wgir_core::ty::TextureDim,
    access: Access,
}

fn as_bgra8(module: &Module, ty: TypeId) -> Option<Bgra8> {
    match module.types.get(ty) {
        Type::StorageTexture {
            dim,
            format: TexelFormat::Bgra8Unorm,
            access,
        } => Some(Bgra8 {
            dim: *dim,
            access: *access,
        }),
        _ => None,
    }
}

/// Redeclare a module-scope texture variable with the rgba8unorm format.
fn replace_var(b: &mut Builder, old_var: InstId, bgra8: Bgra8) {
    let rgba8 = b
        .module
        .types
        .storage_texture(bgra8.dim, TexelFormat::Rgba8Unorm, bgra8.access);
    let new_var = b.detached(|b| b.var(AddressSpace::Handle, rgba8, Access::Read));
    if let Some(bp) = b.module.var_binding(old_var) {
        b.module.set_var_binding(new_var, bp.group, bp.binding);
    }
    b.module.insert_before(old_var, new_var);
    let old_result = b.module.inst_result(old_var, 0);
    let new_result = b.module.inst_result(new_var, 0);
    if let Some(name) = b.module.clear_name(old_result) {
        b.module.set_name_raw(new_result, name);
    }
    replace_uses(b, old_result, new_result);
    b.module.destroy(old_var);
}

/// Redeclare a function parameter with the rgba8unorm format.
fn replace_param(b: &mut Builder, func: FuncId, old_param: ValueId, index: usize, bgra8: Bgra8) {
    let rgba8 = b
        .module
        .types
        .storage_texture(bgra8.dim, TexelFormat::Rgba8Unorm, bgra8.access);
    let new_param = b.function_param("texture", rgba8);
    if let Some(name) = b.module.clear_name(old_param) {
        b.module.clear_name(new_param);
        b.module.set_name_raw(new_param, name);
    }
    let mut params = b.module.function(func).params.clone();
    params[index] = new_param;
    b.module.set_function_params(func, params);
    replace_uses(b, old_param, new_param);
}

/// Point every consumer of `old` at `new`, inserting swizzles around the
/// texture builtins that read or write texel values.
fn replace_uses(b: &mut Builder, old: ValueId, new: ValueId) {
    for use_ in b.module.uses_sorted(old) {
        let inst = use_.inst;
        match b.module.kind(inst).clone() {
            InstKind::Load => {
                // Rebuild the load so its result carries the new type.
                let new_load = b.detached(|b| b.load(new));
                b.module.insert_before(inst, new_load);
                let old_result = b.module.inst_result(inst, 0);
                let new_result = b.module.inst_result(new_load, 0);
                replace_uses(b, old_result, new_result);
                b.module.destroy(inst);
            }
            InstKind::CoreBuiltinCall(f) => {
                b.module.set_operand(inst, use_.operand as usize, Some(new));
                match f {
                    BuiltinFn::TextureStore => {
                        // Swizzle the texel value argument.
                        let old_ty = b.module.value_ty(old);
                        let value_index = match b.module.types.get(old_ty) {
                            Type::StorageTexture { dim, .. } if dim.is_array() => 3,
                            Type::StorageTexture { .. } => 2,
                            _ => ice!("textureStore argument is not a storage texture"),
                        };
                        let value = b
                            .module
                            .operand(inst, value_index)
                            .unwrap_or_else(|| ice!("textureStore has no value argument"));
                        let value_ty = b.module.value_ty(value);
                        let swizzle = b.detached(|b| b.swizzle(value_ty, value, vec![2, 1, 0, 3]));
                        b.module.insert_before(inst, swizzle);
                        let swizzled = b.module.inst_result(swizzle, 0);
                        b.module.set_operand(inst, value_index, Some(swizzled));
                    }
                    BuiltinFn::TextureLoad => {
                        // Swizzle the loaded texel.
                        let result = b.module.inst_result(inst, 0);
                        let result_ty = b.module.value_ty(result);
                        let swizzle = b.detached(|b| {
                            let s = b.module.new_inst(
                                InstKind::Swizzle {
                                    indices: vec![2, 1, 0, 3],
                                },
                                vec![None],
                                &[result_ty],
                            );
                            s
                        });
                        let swizzled = b.module.inst_result(swizzle, 0);
                        b.module.replace_all_uses_with(result, swizzled);
                        b.module.insert_after(inst, swizzle);
                        b.module.set_operand(swizzle, 0, Some(result));
                    }
                    _ => {}
                }
            }
            InstKind::UserCall => {
                // The parameter replacement pass rewrites the callee side.
                b.module.set_operand(inst, use_.operand as usize, Some(new));
            }
            _ => ice!("unhandled use of a bgra8unorm texture"),
        }
    }
}

#[cfg(test)]
mod test {
    use wgir_core::disasm::disassemble;
    use wgir_core::ty::TextureDim;
    use wgir_core::validate::validate;

    use super::*;

    fn texture_module() -> (Module, ValueId) {
        let mut m = Module::new();
        let tex_ty = m
            .types
            .storage_texture(TextureDim::D2, TexelFormat::Bgra8Unorm, Access::Write);
        let mut b = Builder::new(&mut m);
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("tex", AddressSpace::Handle, tex_ty, Access::Read);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let var_result = b.result(var);
        (m, var_result)
    }

    #[test]
    fn texture_store_value_is_swizzled() {
        let (mut m, var_result) = texture_module();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let void = b.module.types.void_();
            let f32 = b.module.types.f32();
            let u32_ = b.module.types.u32();
            let v2u = b.module.types.vec2(u32_);
            let v4f = b.module.types.vec4(f32);
            let load = b.load(var_result);
            let tex = b.result(load);
            let coords = b.zero(v2u);
            let texel = b.zero(v4f);
            b.builtin_call(void, BuiltinFn::TextureStore, vec![tex, coords, texel]);
            b.return_(func);
        });
        bgra8unorm_polyfill(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("texture_storage_2d<rgba8unorm, write>"));
        assert!(!text.contains("bgra8unorm"));
        assert!(text.contains("swizzle"));
        assert!(text.contains("zyxw") || text.contains(", zyxw"));
    }

    #[test]
    fn texture_load_result_is_swizzled() {
        let (mut m, var_result) = texture_module();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let f32 = b.module.types.f32();
            let u32_ = b.module.types.u32();
            let v2u = b.module.types.vec2(u32_);
            let v4f = b.module.types.vec4(f32);
            let load = b.load(var_result);
            let tex = b.result(load);
            let coords = b.zero(v2u);
            let call = b.builtin_call(v4f, BuiltinFn::TextureLoad, vec![tex, coords]);
            let texel = b.result(call);
            b.let_named("texel", texel);
            b.return_(func);
        });
        bgra8unorm_polyfill(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(!text.contains("bgra8unorm"));
        // The let now consumes the swizzled value.
        assert!(text.contains("swizzle"));
    }

    #[test]
    fn function_parameter_is_replaced() {
        let (mut m, var_result) = texture_module();
        let tex_bgra = m
            .types
            .storage_texture(TextureDim::D2, TexelFormat::Bgra8Unorm, Access::Write);
        let mut b = Builder::new(&mut m);
        let void = b.module.types.void_();
        let helper = b.function("helper", void);
        let p = b.function_param("t", tex_bgra);
        b.module.set_function_params(helper, vec![p]);
        let helper_body = b.body(helper);
        b.append_to(helper_body, |b| {
            b.return_(helper);
        });
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(var_result);
            let tex = b.result(load);
            b.call(helper, vec![tex]);
            b.return_(func);
        });
        bgra8unorm_polyfill(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        assert!(!disassemble(&m).contains("bgra8unorm"));
    }
}
