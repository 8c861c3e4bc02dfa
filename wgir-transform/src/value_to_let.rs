//! Hoists values into `let` instructions where inlining them at the use site
//! could reorder memory accesses or duplicate side effects in a printer.
//!
//! A value can be inlined only when it has a single use in the same block and
//! no store-class access slips between its definition and that use. Anything
//! else is pinned with a `let`.

use fnv::FnvHashSet as HashSet;

use wgir_core::inst::{InstId, InstKind};
use wgir_core::module::{BlockId, Module};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::{ValueId, ValueKind};

use crate::TransformResult;

#[derive(Clone, Copy, Default, PartialEq, Eq)]
struct Accesses {
    load: bool,
    store: bool,
}

fn accesses_for(kind: &InstKind) -> Accesses {
    match kind {
        InstKind::Load | InstKind::LoadVectorElement => Accesses {
            load: true,
            store: false,
        },
        InstKind::Store | InstKind::StoreVectorElement => Accesses {
            load: false,
            store: true,
        },
        InstKind::UserCall
        | InstKind::CoreBuiltinCall(_)
        | InstKind::MemberBuiltinCall(_)
        | InstKind::IntrinsicCall(_) => Accesses {
            load: true,
            store: true,
        },
        _ => Accesses::default(),
    }
}

pub fn value_to_let(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "ValueToLet", Capabilities::all())?;

    for block in module.all_blocks() {
        process_block(module, block);
    }
    Ok(())
}

fn process_block(module: &mut Module, block: BlockId) {
    // Values that may still be inlined: single same-block use, not yet
    // ruled out by an intervening store.
    let mut pending: HashSet<ValueId> = HashSet::default();

    for inst in module.insts_of(block) {
        let mut accesses = accesses_for(module.kind(inst));
        let is_decl = matches!(module.kind(inst), InstKind::Var { .. } | InstKind::Let);

        for operand in module.operands(inst).to_vec().into_iter().flatten() {
            if pending.remove(&operand) {
                // Inlining the operand folds its instruction into this one,
                // so this instruction adopts the operand's load access.
                // Vars and lets are always statements and never inline.
                if !is_decl {
                    accesses.load = true;
                }
            }
        }

        if accesses.store {
            for value in drain_sorted(&mut pending) {
                put_in_let(module, value);
            }
            maybe_put_in_let(module, inst, &mut pending);
        } else if accesses.load {
            maybe_put_in_let(module, inst, &mut pending);
        }
    }
}

fn drain_sorted(pending: &mut HashSet<ValueId>) -> Vec<ValueId> {
    let mut values: Vec<ValueId> = pending.drain().collect();
    values.sort();
    values
}

fn maybe_put_in_let(module: &mut Module, inst: InstId, pending: &mut HashSet<ValueId>) {
    let result = match module.try_inst_result(inst) {
        Some(r) => r,
        None => return,
    };
    match module.uses(result).len() {
        0 => {}
        1 => {
            let usage = module.uses(result)[0];
            if module.inst(usage.inst).block == module.inst(inst).block {
                // Same-block single use: defer the decision.
                pending.insert(result);
            } else {
                put_in_let(module, result);
            }
        }
        _ => {
            put_in_let(module, result);
        }
    }
}

/// Pin `value` behind a fresh `let` placed straight after its instruction.
fn put_in_let(module: &mut Module, value: ValueId) {
    let inst = match module.value(value).kind {
        ValueKind::InstructionResult { inst, .. } => inst,
        _ => return,
    };
    let ty = module.value_ty(value);
    let let_inst = module.new_inst(InstKind::Let, vec![None], &[ty]);
    let let_result = module.inst_result(let_inst, 0);
    module.replace_all_uses_with(value, let_result);
    module.set_operand(let_inst, 0, Some(value));
    module.insert_after(inst, let_inst);
    if let Some(name) = module.clear_name(value) {
        module.set_name_raw(let_result, name);
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use wgir_core::builder::Builder;
    use wgir_core::disasm::disassemble;
    use wgir_core::ty::{Access, AddressSpace};
    use wgir_core::validate::validate;

    use super::*;

    fn storage_var(b: &mut Builder, name: &str) -> ValueId {
        let f32 = b.module.types.f32();
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named(name, AddressSpace::Storage, f32, Access::ReadWrite);
            let n = b.module.root_block();
            let count = b.module.block_len(n) as u32 - 1;
            b.module.set_var_binding(var, 0, count);
            var
        });
        b.result(var)
    }

    #[test]
    fn load_before_store_is_pinned() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let va = storage_var(&mut b, "a");
        let vb = storage_var(&mut b, "b");
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            // The load of `a` must not be reordered past the store to `b`.
            let load = b.load(va);
            let loaded = b.result(load);
            let one = b.f32_(1.0);
            b.store(vb, one);
            b.store(va, loaded);
            b.return_(func);
        });
        value_to_let(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("= let"), "load was not pinned:\n{}", text);
    }

    #[test]
    fn multi_use_value_is_pinned() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let va = storage_var(&mut b, "a");
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(va);
            let loaded = b.result(load);
            let sum = b.add(loaded, loaded);
            let sum = b.result(sum);
            b.store(va, sum);
            b.return_(func);
        });
        value_to_let(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("= let"));
    }

    #[test]
    fn single_use_load_consumed_by_store_stays_inline() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let va = storage_var(&mut b, "a");
        let vb = storage_var(&mut b, "b");
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(va);
            let loaded = b.result(load);
            b.store(vb, loaded);
            b.return_(func);
        });
        value_to_let(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert!(!text.contains("= let"), "unexpected let:\n{}", text);
    }

    #[test]
    fn name_migrates_to_the_let() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let va = storage_var(&mut b, "a");
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(va);
            let loaded = b.result(load);
            b.module.set_name(loaded, "x");
            let sum = b.add(loaded, loaded);
            let sum = b.result(sum);
            b.store(va, sum);
            b.return_(func);
        });
        value_to_let(&mut m).unwrap();
        let text = disassemble(&m);
        assert!(text.contains("%x:f32 = let"));
    }

    #[test]
    fn idempotent() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let va = storage_var(&mut b, "a");
        let vb = storage_var(&mut b, "b");
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(va);
            let loaded = b.result(load);
            let one = b.f32_(1.0);
            b.store(vb, one);
            b.store(va, loaded);
            b.return_(func);
        });
        value_to_let(&mut m).unwrap();
        let first = disassemble(&m);
        value_to_let(&mut m).unwrap();
        assert_eq!(disassemble(&m), first);
    }
}
