//! Adds runtime buffer offsets, fetched from the immediate-data block, to
//! byte-address-buffer member calls.
//!
//! Hosts bind large buffers once and select a region per draw by pushing a
//! byte offset in the immediate block. Offsets are packed into
//! `array<vec4<u32>, N>` to satisfy the 16-byte element alignment, so offset
//! `i` lives at `[i / 4][i % 4]`.

use fnv::FnvHashMap as HashMap;

use wgir_core::builder::Builder;
use wgir_core::function::BindingPoint;
use wgir_core::inst::{InstId, InstKind};
use wgir_core::module::Module;
use wgir_core::ty::{Access, AddressSpace, Type, TypeId};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::ValueId;
use wgir_core::ice;

use crate::TransformResult;

/// Where the packed offsets live and which buffers they apply to.
pub struct ArrayOffsetConfig {
    /// The module-scope immediate-data `var` whose store type is a struct
    /// containing the offsets array.
    pub immediate_var: InstId,
    /// Member index of the `array<vec4<u32>, N>` inside the immediate block.
    pub buffer_offsets_member: u32,
    /// Number of vec4 elements in the offsets array.
    pub buffer_offsets_elements: u32,
    /// Binding point of each offsettable buffer to its element index.
    pub bindpoint_to_offset_index: HashMap<BindingPoint, u32>,
}

pub fn array_offset_from_immediate(
    module: &mut Module,
    config: &ArrayOffsetConfig,
) -> TransformResult {
    validate_and_dump_if_needed(
        module,
        "ArrayOffsetFromImmediate",
        Capabilities::ALLOW_8BIT_INTEGERS
            | Capabilities::ALLOW_16BIT_INTEGERS
            | Capabilities::ALLOW_DUPLICATE_BINDINGS
            | Capabilities::ALLOW_NON_CORE_TYPES,
    )?;

    for (_, offset_index) in &config.bindpoint_to_offset_index {
        let vec4_index = offset_index / 4;
        if vec4_index >= config.buffer_offsets_elements {
            ice!(
                "offset index {} requires vec4 element {} but the offsets array has {}",
                offset_index,
                vec4_index,
                config.buffer_offsets_elements
            );
        }
    }

    let mut b = Builder::new(module);
    for inst in b.module.insts_of(b.module.root_block()) {
        if !matches!(b.module.kind(inst), InstKind::Var { .. }) {
            continue;
        }
        let binding = match b.module.var_binding(inst) {
            Some(bp) => bp,
            None => continue,
        };
        let offset_index = match config.bindpoint_to_offset_index.get(&binding) {
            Some(i) => *i,
            None => continue,
        };
        process_var(&mut b, config, inst, offset_index);
    }
    Ok(())
}

fn process_var(b: &mut Builder, config: &ArrayOffsetConfig, var: InstId, offset_index: u32) {
    // After storage decomposition, every access to this buffer is a
    // byte-address member call; patch its offset argument.
    let result = b.module.inst_result(var, 0);
    for use_ in b.module.uses_sorted(result) {
        let call = use_.inst;
        let f = match b.module.kind(call) {
            InstKind::MemberBuiltinCall(f) => *f,
            _ => ice!("unhandled use of an offsettable buffer"),
        };
        if !f.takes_byte_offset() || use_.operand != 0 {
            continue;
        }
        b.insert_before(call, |b| {
            let current = b
                .module
                .operand(call, 1)
                .unwrap_or_else(|| ice!("member call has no offset argument"));
            let dynamic = load_dynamic_offset(b, config, offset_index);
            let new_offset = b.add(current, dynamic);
            let new_offset = b.result(new_offset);
            b.module.set_operand(call, 1, Some(new_offset));
        });
    }
}

/// Load `[offset_index / 4][offset_index % 4]` from the offsets array in the
/// immediate block.
fn load_dynamic_offset(b: &mut Builder, config: &ArrayOffsetConfig, offset_index: u32) -> ValueId {
    let array_index = offset_index / 4;
    let vec_index = offset_index % 4;
    let imm = b.module.inst_result(config.immediate_var, 0);
    let vec4u = b.module.types.vec4u();
    let offsets_ty = offsets_array_type(b, config);
    let arr_ptr_ty = b
        .module
        .types
        .ptr(AddressSpace::Immediate, offsets_ty, Access::Read);
    let vec_ptr_ty = b
        .module
        .types
        .ptr(AddressSpace::Immediate, vec4u, Access::Read);
    let offsets = b.access_u32(arr_ptr_ty, imm, config.buffer_offsets_member);
    let offsets = b.result(offsets);
    let vec_ptr = b.access_u32(vec_ptr_ty, offsets, array_index);
    let vec_ptr = b.result(vec_ptr);
    let idx = b.u32_(vec_index);
    let load = b.load_vector_element(vec_ptr, idx);
    b.result(load)
}

fn offsets_array_type(b: &mut Builder, config: &ArrayOffsetConfig) -> TypeId {
    let imm = b.module.inst_result(config.immediate_var, 0);
    let ptr_ty = b.module.value_ty(imm);
    let store = b
        .module
        .types
        .store_type(ptr_ty)
        .unwrap_or_else(|| ice!("immediate var is not a pointer"));
    match b.module.types.get(store) {
        Type::Struct { members, .. } => members
            .get(config.buffer_offsets_member as usize)
            .map(|m| m.ty)
            .unwrap_or_else(|| ice!("immediate block has no offsets member")),
        _ => ice!("immediate block is not a struct"),
    }
}

#[cfg(test)]
mod test {
    use wgir_core::disasm::disassemble;
    use wgir_core::inst::MemberBuiltinFn;
    use wgir_core::ty::StructMemberDesc;
    use wgir_core::validate::validate;

    use super::*;

    fn build_module() -> (Module, ArrayOffsetConfig, InstId) {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let v4u = m.types.vec4u();
        let offsets = m.types.array(v4u, 1);
        let imm_block = m.types.struct_(
            "immediate_data",
            vec![StructMemberDesc::new("buffer_offsets", offsets)],
        );
        let byte_buf = m.types.runtime_array(u32_);
        let mut b = Builder::new(&mut m);
        let root = b.module.root_block();
        let (imm_var, buf_var) = b.append_to(root, |b| {
            let imm = b.var_named("immediates", AddressSpace::Immediate, imm_block, Access::Read);
            let buf = b.var_named("buf", AddressSpace::Storage, byte_buf, Access::ReadWrite);
            b.module.set_var_binding(buf, 0, 0);
            (imm, buf)
        });
        let buf_result = b.result(buf_var);
        let func = b.compute_function("main");
        let body = b.body(func);
        let call = b.append_to(body, |b| {
            let offset = b.u32_(16);
            let call = b.member_builtin_call(u32_, MemberBuiltinFn::Load, buf_result, vec![offset]);
            let loaded = b.result(call);
            b.let_(loaded);
            b.return_(func);
            call
        });
        let mut map = HashMap::default();
        map.insert(BindingPoint { group: 0, binding: 0 }, 0u32);
        let config = ArrayOffsetConfig {
            immediate_var: imm_var,
            buffer_offsets_member: 0,
            buffer_offsets_elements: 1,
            bindpoint_to_offset_index: map,
        };
        (m, config, call)
    }

    #[test]
    fn load_offset_argument_is_augmented() {
        let (mut m, config, call) = build_module();
        array_offset_from_immediate(&mut m, &config).unwrap();
        validate(
            &m,
            Capabilities::ALLOW_NON_CORE_TYPES | Capabilities::ALLOW_DUPLICATE_BINDINGS,
        )
        .unwrap();
        let text = disassemble(&m);
        // The offset is now `16u + immediates[0].buffer_offsets[0][0]`.
        assert!(text.contains("load_vector_element"));
        assert!(text.contains("= add 16u"));
        let new_offset = m.operand(call, 1).unwrap();
        assert!(m.as_constant(new_offset).is_none());
    }

    #[test]
    fn unmapped_binding_is_untouched() {
        let (mut m, mut config, _) = build_module();
        config.bindpoint_to_offset_index.clear();
        config
            .bindpoint_to_offset_index
            .insert(BindingPoint { group: 7, binding: 7 }, 0);
        let before = disassemble(&m);
        array_offset_from_immediate(&mut m, &config).unwrap();
        assert_eq!(disassemble(&m), before);
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn out_of_range_offset_index_ices() {
        let (mut m, mut config, _) = build_module();
        config.bindpoint_to_offset_index.clear();
        config
            .bindpoint_to_offset_index
            .insert(BindingPoint { group: 0, binding: 0 }, 8);
        let _ = array_offset_from_immediate(&mut m, &config);
    }
}
