//! Converts discards into helper-invocation demotion.
//!
//! A fragment shader that discards must stop writing observable state but
//! keep executing so derivative operations stay defined. Each `discard`
//! becomes a write to a module-scope `continue_execution` flag; stores and
//! side-effecting builtins are wrapped in `if (continue_execution)`; every
//! return from the entry point is preceded by a conditional
//! `terminate_invocation`.

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};

use wgir_core::builder::Builder;
use wgir_core::function::{FuncId, PipelineStage};
use wgir_core::inst::{InstId, InstKind};
use wgir_core::module::{BlockId, Module};
use wgir_core::ty::{Access, AddressSpace, Type};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::{ValueId, ValueKind};

use crate::TransformResult;

pub fn demote_to_helper(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "DemoteToHelper", Capabilities::all())?;

    let mut state = State {
        continue_execution: None,
        discard_status: HashMap::default(),
        processed: HashSet::default(),
    };
    let mut b = Builder::new(module);
    state.process(&mut b);
    Ok(())
}

struct State {
    /// The module-scope "has not discarded" flag, created on demand.
    continue_execution: Option<ValueId>,
    /// Memoised per-function discard containment.
    discard_status: HashMap<FuncId, bool>,
    processed: HashSet<FuncId>,
}

impl State {
    fn process(&mut self, b: &mut Builder) {
        // Fragment entry points that transitively contain a discard.
        let mut to_process = Vec::new();
        for func in b.module.functions.clone() {
            if b.module.function(func).stage == PipelineStage::Fragment
                && self.has_discard(b.module, func)
            {
                to_process.push(func);
            }
        }
        if to_process.is_empty() {
            return;
        }

        let bool_ = b.module.types.bool_();
        let root = b.module.root_block();
        let flag = b.append_to(root, |b| {
            let var = b.var_named(
                "continue_execution",
                AddressSpace::Private,
                bool_,
                Access::ReadWrite,
            );
            let true_ = b.bool_(true);
            b.set_initializer(var, true_);
            var
        });
        self.continue_execution = Some(b.module.inst_result(flag, 0));

        for func in to_process {
            self.process_function(b, func);
        }
    }

    fn has_discard(&mut self, module: &Module, func: FuncId) -> bool {
        if let Some(known) = self.discard_status.get(&func) {
            return *known;
        }
        let result = self.block_has_discard(module, module.function(func).block);
        self.discard_status.insert(func, result);
        result
    }

    fn block_has_discard(&mut self, module: &Module, block: BlockId) -> bool {
        for inst in module.insts_of(block) {
            let found = match module.kind(inst) {
                InstKind::Discard => true,
                InstKind::UserCall => match self.callee(module, inst) {
                    Some(f) => self.has_discard(module, f),
                    None => false,
                },
                kind if kind.is_control() => {
                    let children = kind.control_blocks();
                    children
                        .into_iter()
                        .any(|blk| self.block_has_discard(module, blk))
                }
                _ => false,
            };
            if found {
                return true;
            }
        }
        false
    }

    fn callee(&self, module: &Module, call: InstId) -> Option<FuncId> {
        let callee = module.operand(call, 0)?;
        match module.value(callee).kind {
            ValueKind::Function(f) => Some(f),
            _ => None,
        }
    }

    fn process_function(&mut self, b: &mut Builder, func: FuncId) {
        if self.processed.insert(func) {
            self.process_block(b, b.module.function(func).block);
        }
    }

    fn process_block(&mut self, b: &mut Builder, block: BlockId) {
        let flag = self.continue_execution.unwrap();
        for inst in b.module.insts_of(block) {
            match b.module.kind(inst).clone() {
                InstKind::Discard => {
                    // Discarding just clears the flag; execution continues.
                    let store = b.detached(|b| {
                        let false_ = b.bool_(false);
                        b.store(flag, false_)
                    });
                    b.module.replace(inst, store);
                    b.module.destroy(inst);
                }
                InstKind::UserCall => {
                    if let Some(f) = self.callee(b.module, inst) {
                        self.process_function(b, f);
                    }
                }
                InstKind::Store => {
                    // Only stores to host-visible memory need masking.
                    let ptr = b.module.operand(inst, 0).unwrap();
                    let ptr_ty = b.module.value_ty(ptr);
                    if b.module.types.address_space(ptr_ty) == Some(AddressSpace::Storage) {
                        conditionalize(b, flag, inst);
                    }
                }
                InstKind::CoreBuiltinCall(f) => {
                    if f.has_side_effects() {
                        conditionalize(b, flag, inst);
                    }
                }
                InstKind::Return { func } => {
                    if b.module.function(func).stage == PipelineStage::Fragment {
                        b.insert_before(inst, |b| {
                            let cond_load = b.load(flag);
                            let cond = b.result(cond_load);
                            let not = b.not(cond);
                            let not = b.result(not);
                            let ifelse = b.if_(not);
                            let t = b.true_block(ifelse);
                            b.append_to(t, |b| {
                                b.terminate_invocation();
                            });
                        });
                    }
                }
                kind if kind.is_control() => {
                    for child in kind.control_blocks() {
                        self.process_block(b, child);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Wrap `inst` in `if (continue_execution) { ... }`, forwarding any result
/// out through the if.
fn conditionalize(b: &mut Builder, flag: ValueId, inst: InstId) {
    let (cond_load, ifelse) = b.detached(|b| {
        let cond_load = b.load(flag);
        let cond = b.result(cond_load);
        let ifelse = b.if_(cond);
        (cond_load, ifelse)
    });
    b.module.insert_before(inst, cond_load);
    b.module.replace(inst, ifelse);

    // Move the original instruction into the if-true block.
    let t = b.true_block(ifelse);
    b.module.append(t, inst);

    let has_value = b
        .module
        .try_inst_result(inst)
        .map(|r| !matches!(b.module.types.get(b.module.value_ty(r)), Type::Void))
        .unwrap_or(false);
    if has_value {
        let result = b.module.inst_result(inst, 0);
        let ty = b.module.value_ty(result);
        let if_result = b.module.add_result(ifelse, ty);
        b.module.replace_all_uses_with(result, if_result);
        b.append_to(t, |b| {
            b.exit_if_with(ifelse, vec![result]);
        });
    } else {
        b.append_to(t, |b| {
            b.exit_if(ifelse);
        });
    }
}
