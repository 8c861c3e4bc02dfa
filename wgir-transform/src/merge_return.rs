//! Rewrites functions so that only the final block instruction returns.
//!
//! Backends that cannot express early returns get a per-function
//! `continue_execution` flag and a `return_value` local. Early returns set
//! the flag and exit their control construct; the code after a construct
//! that may have returned is wrapped in `if (continue_execution)`.

use fnv::FnvHashSet as HashSet;

use wgir_core::builder::Builder;
use wgir_core::function::FuncId;
use wgir_core::inst::{InstId, InstKind};
use wgir_core::module::{BlockId, Module};
use wgir_core::ty::{Access, AddressSpace, Type};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::ValueId;
use wgir_core::ice;

use crate::TransformResult;

pub fn merge_return(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "MergeReturn", Capabilities::all())?;

    for func in module.functions.clone() {
        let mut b = Builder::new(module);
        let mut state = State {
            flag_var: None,
            flag_ptr: None,
            return_val: None,
            fn_return: None,
            holds_return: HashSet::default(),
        };
        state.process(&mut b, func);
    }
    Ok(())
}

struct State {
    /// The "has not returned" flag var, created on demand.
    flag_var: Option<InstId>,
    flag_ptr: Option<ValueId>,
    /// Pointer to the local holding the return value; `None` for void
    /// functions.
    return_val: Option<ValueId>,
    /// The return terminating the function's own block, if any.
    fn_return: Option<InstId>,
    /// Control instructions that transitively hold a return.
    holds_return: HashSet<InstId>,
}

impl State {
    fn process(&mut self, b: &mut Builder, func: FuncId) {
        let body = b.module.function(func).block;
        self.collect_returns(b.module, body, &[]);
        if self.holds_return.is_empty() {
            // Only the trailing return exists; nothing to do.
            return;
        }

        let bool_ = b.module.types.bool_();
        let flag = b.detached(|b| {
            let var = b.var_named(
                "continue_execution",
                AddressSpace::Function,
                bool_,
                Access::ReadWrite,
            );
            let true_ = b.bool_(true);
            b.set_initializer(var, true_);
            var
        });
        b.module.prepend(body, flag);
        self.flag_var = Some(flag);
        self.flag_ptr = Some(b.module.inst_result(flag, 0));

        let ret_ty = b.module.function(func).return_type;
        if !matches!(b.module.types.get(ret_ty), Type::Void) {
            let rv = b.detached(|b| {
                b.var_named("return_value", AddressSpace::Function, ret_ty, Access::ReadWrite)
            });
            b.module.prepend(body, rv);
            self.return_val = Some(b.module.inst_result(rv, 0));
        }

        self.fn_return = b
            .module
            .terminator(body)
            .filter(|t| matches!(b.module.kind(*t), InstKind::Return { .. }));

        self.process_block(b, body);

        if self.fn_return.is_none() {
            self.append_final_return(b, func, body);
        }

        self.drop_flag_if_only_assigned(b);
    }

    /// Record, for every return below `block`, the chain of control
    /// instructions between it and the function root.
    fn collect_returns(&mut self, module: &Module, block: BlockId, ctrl_stack: &[InstId]) {
        for inst in module.insts_of(block) {
            if matches!(module.kind(inst), InstKind::Return { .. }) && !ctrl_stack.is_empty() {
                for ctrl in ctrl_stack {
                    self.holds_return.insert(*ctrl);
                }
            }
            let children = module.kind(inst).control_blocks();
            if !children.is_empty() {
                let mut stack = ctrl_stack.to_vec();
                stack.push(inst);
                for child in children {
                    self.collect_returns(module, child, &stack);
                }
            }
        }
    }

    fn process_block(&mut self, b: &mut Builder, block: BlockId) {
        let mut inner_if: Option<InstId> = None;
        let insts = b.module.insts_of(block);
        for (pos, inst) in insts.iter().copied().enumerate() {
            if matches!(b.module.kind(inst), InstKind::Return { .. }) {
                self.process_return(b, inst, inner_if);
                break;
            }
            if matches!(b.module.kind(inst), InstKind::Unreachable) {
                // An unreachable terminator can become reachable once the
                // returns below it turn into exits; a real terminator is
                // appended during finalization.
                b.module.remove(inst);
                break;
            }

            // Past a returning construct, everything moves into the
            // inner-most guard.
            if let Some(guard) = inner_if {
                let t = true_block(b.module, guard);
                b.module.remove(inst);
                b.module.append(t, inst);
            }

            if b.module.kind(inst).is_control() && self.holds_return.contains(&inst) {
                for child in b.module.kind(inst).control_blocks() {
                    if b.module.block_len(child) > 0 {
                        self.process_block(b, child);
                    }
                }
                if let Some(next) = insts.get(pos + 1).copied() {
                    let skip = Some(next) == self.fn_return
                        || matches!(
                            b.module.kind(next),
                            InstKind::ExitIf { .. }
                                | InstKind::ExitSwitch { .. }
                                | InstKind::ExitLoop { .. }
                                | InstKind::Unreachable
                        );
                    if !skip {
                        inner_if = Some(self.create_guard_after(b, inst));
                    }
                }
            }
        }

        if let Some(guard) = inner_if {
            self.finalize_guard(b, guard);
        }
    }

    fn finalize_guard(&mut self, b: &mut Builder, guard: InstId) {
        let t = true_block(b.module, guard);
        match b.module.terminator(t) {
            Some(term) => {
                if matches!(b.module.kind(term), InstKind::ExitIf { .. }) {
                    // The moved terminator exited an outer if; retarget it at
                    // the guard and forward its values through guard results.
                    b.module.set_kind(term, InstKind::ExitIf { target: guard });
                    let args: Vec<ValueId> =
                        b.module.operands(term).iter().copied().flatten().collect();
                    for arg in &args {
                        let ty = b.module.value_ty(*arg);
                        b.module.add_result(guard, ty);
                    }
                }
            }
            None => {
                b.append_to(t, |b| {
                    b.exit_if(guard);
                });
            }
        }

        // Walk outwards, terminating every block left unterminated by the
        // moves, handing each if's results to its parent construct.
        let mut i = guard;
        loop {
            let blk = match b.module.inst(i).block {
                Some(blk) => blk,
                None => break,
            };
            if !b.module.is_terminated(blk) {
                if let Some(parent) = b.module.block(blk).parent {
                    let args = b.module.results(i).to_vec();
                    b.append_to(blk, |b| {
                        b.exit(parent, args);
                    });
                }
            }
            match b.module.block(blk).parent {
                Some(p) if matches!(b.module.kind(p), InstKind::If { .. }) => i = p,
                _ => break,
            }
        }
    }

    fn process_return(&mut self, b: &mut Builder, ret: InstId, guard: Option<InstId>) {
        if Some(ret) == self.fn_return {
            self.process_trailing_return(b, ret, guard);
        } else {
            self.process_nested_return(b, ret, guard);
        }
    }

    /// The return ending the function's own block: route its value through
    /// `return_value` and reload it unconditionally.
    fn process_trailing_return(&mut self, b: &mut Builder, ret: InstId, guard: Option<InstId>) {
        let return_val = match self.return_val {
            Some(rv) => rv,
            None => return,
        };
        let ret_value = b
            .module
            .operand(ret, 0)
            .unwrap_or_else(|| ice!("trailing return of a value-returning function has no value"));
        let guard = match guard {
            Some(g) => g,
            None => self.create_guard_before(b, ret),
        };
        let t = true_block(b.module, guard);
        b.append_to(t, |b| {
            b.store(return_val, ret_value);
            b.exit_if(guard);
        });
        let load = b.insert_before(ret, |b| b.load(return_val));
        let loaded = b.module.inst_result(load, 0);
        b.module.set_operand(ret, 0, Some(loaded));
    }

    /// A return inside a control construct: set the flag, stash the value,
    /// exit the construct.
    fn process_nested_return(&mut self, b: &mut Builder, ret: InstId, guard: Option<InstId>) {
        let flag = self.flag_ptr.unwrap();
        let block = match guard {
            Some(g) => true_block(b.module, g),
            None => b.module.inst(ret).block.unwrap(),
        };
        let ret_value = b.module.operand(ret, 0);
        b.append_to(block, |b| {
            let false_ = b.bool_(false);
            b.store(flag, false_);
            if let Some(rv) = self.return_val {
                let value = ret_value
                    .unwrap_or_else(|| ice!("nested return of a value-returning function has no value"));
                b.store(rv, value);
            }
        });
        let ctrl = b
            .module
            .block(block)
            .parent
            .unwrap_or_else(|| ice!("nested return outside any control instruction"));
        // Exit with undef slots for every result the construct expects.
        let arg_count = b.module.results(ctrl).len();
        let kind = match b.module.kind(ctrl) {
            InstKind::If { .. } => InstKind::ExitIf { target: ctrl },
            InstKind::Switch { .. } => InstKind::ExitSwitch { target: ctrl },
            InstKind::Loop { .. } => InstKind::ExitLoop { target: ctrl },
            _ => ice!("nested return inside a non-control parent"),
        };
        let exit = b.module.new_inst(kind, vec![None; arg_count], &[]);
        b.module.append(block, exit);
        b.module.destroy(ret);
    }

    /// `if (continue_execution)` inserted straight after `anchor`.
    fn create_guard_after(&mut self, b: &mut Builder, anchor: InstId) -> InstId {
        let flag = self.flag_ptr.unwrap();
        b.insert_after(anchor, |b| {
            let load = b.load(flag);
            let cond = b.result(load);
            b.if_(cond)
        })
    }

    /// `if (continue_execution)` inserted straight before `anchor`.
    fn create_guard_before(&mut self, b: &mut Builder, anchor: InstId) -> InstId {
        let flag = self.flag_ptr.unwrap();
        b.insert_before(anchor, |b| {
            let load = b.load(flag);
            let cond = b.result(load);
            b.if_(cond)
        })
    }

    fn append_final_return(&mut self, b: &mut Builder, func: FuncId, body: BlockId) {
        b.append_to(body, |b| {
            match self.return_val {
                Some(rv) => {
                    let load = b.load(rv);
                    let loaded = b.result(load);
                    b.return_value(func, loaded);
                }
                None => {
                    b.return_(func);
                }
            };
        });
    }

    /// The flag var is pure bookkeeping when nothing ever reads it.
    fn drop_flag_if_only_assigned(&mut self, b: &mut Builder) {
        let flag = match (self.flag_var, self.flag_ptr) {
            (Some(var), Some(ptr)) => (var, ptr),
            _ => return,
        };
        let uses = b.module.uses_sorted(flag.1);
        let only_assigned = uses
            .iter()
            .all(|u| matches!(b.module.kind(u.inst), InstKind::Store) && u.operand == 0);
        if only_assigned {
            for u in uses {
                b.module.destroy(u.inst);
            }
            b.module.destroy(flag.0);
        }
    }
}

fn true_block(module: &Module, if_: InstId) -> BlockId {
    match module.kind(if_) {
        InstKind::If { true_block, .. } => *true_block,
        _ => ice!("guard is not an if instruction"),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use wgir_core::disasm::disassemble;
    use wgir_core::validate::validate;

    use super::*;

    fn ret_count(text: &str) -> usize {
        text.lines()
            .filter(|l| {
                let l = l.trim();
                l == "ret" || l.starts_with("ret ")
            })
            .count()
    }

    #[test]
    fn trailing_return_only_is_untouched() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            b.return_(func);
        });
        let before = disassemble(&m);
        merge_return(&mut m).unwrap();
        assert_eq!(disassemble(&m), before);
    }

    #[test]
    fn early_return_with_value_merges() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let i32_ = b.module.types.i32();
        let bool_ = b.module.types.bool_();
        let func = b.function("f", i32_);
        let cond = b.function_param("cond", bool_);
        b.module.set_function_params(func, vec![cond]);
        let body = b.body(func);
        b.append_to(body, |b| {
            let if_ = b.if_(cond);
            let t = b.true_block(if_);
            b.append_to(t, |b| {
                let one = b.i32_(1);
                b.return_value(func, one);
            });
            let two = b.i32_(2);
            b.return_value(func, two);
        });
        merge_return(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        // A single return remains, fed from the return_value local.
        assert_eq!(ret_count(&text), 1);
        assert!(text.contains("%return_value"));
        assert!(text.contains("store %continue_execution, false"));
        assert!(text.contains("store %return_value, 1i"));
        assert!(text.contains("store %return_value, 2i"));
    }

    #[test]
    fn code_after_returning_construct_is_guarded() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let bool_ = b.module.types.bool_();
        let f32 = b.module.types.f32();
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("out", AddressSpace::Storage, f32, Access::ReadWrite);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let out = b.result(var);
        let void = b.module.types.void_();
        let func = b.function("f", void);
        let cond = b.function_param("cond", bool_);
        b.module.set_function_params(func, vec![cond]);
        let body = b.body(func);
        b.append_to(body, |b| {
            let if_ = b.if_(cond);
            let t = b.true_block(if_);
            b.append_to(t, |b| {
                b.return_(func);
            });
            let one = b.f32_(1.0);
            b.store(out, one);
            b.return_(func);
        });
        merge_return(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert_eq!(ret_count(&text), 1);
        // The trailing store is now guarded by the flag.
        assert!(text.contains("load %continue_execution"));
        let guarded = text.find("store %out").unwrap();
        let guard = text.find("load %continue_execution").unwrap();
        assert!(guard < guarded, "store is not behind the guard:\n{}", text);
    }

    #[test]
    fn nested_return_in_loop_exits_the_loop() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let void = b.module.types.void_();
        let func = b.function("f", void);
        let body = b.body(func);
        b.append_to(body, |b| {
            let l = b.loop_();
            let (_, loop_body, _) = b.loop_blocks(l);
            b.append_to(loop_body, |b| {
                b.return_(func);
            });
            b.return_(func);
        });
        merge_return(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();
        let text = disassemble(&m);
        assert_eq!(ret_count(&text), 1);
        assert!(text.contains("exit_loop"));
    }
}
