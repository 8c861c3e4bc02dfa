//! Threads module-scope variables through functions as an explicit struct.
//!
//! Backends without true module-scope storage get a structure holding one
//! pointer per module-scope variable. Entry points build it (private
//! variables become locals, resource variables become bound parameters) and
//! every transitively-called function receives it as a trailing parameter.

use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};

use wgir_core::builder::Builder;
use wgir_core::function::FuncId;
use wgir_core::inst::{InstId, InstKind};
use wgir_core::module::{BlockId, Module};
use wgir_core::ty::{AddressSpace, StructMemberDesc, TypeId};
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::{ValueId, ValueKind};
use wgir_core::ice;

use crate::TransformResult;

const MODULE_VARS_NAME: &str = "module_vars";

pub fn module_scope_vars(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "ModuleScopeVars", Capabilities::all())?;

    let mut b = Builder::new(module);
    State {
        struct_type: None,
        module_vars: Vec::new(),
        struct_value: HashMap::default(),
    }
    .process(&mut b);
    Ok(())
}

struct State {
    /// The structure holding one pointer per module-scope variable.
    struct_type: Option<TypeId>,
    module_vars: Vec<InstId>,
    /// Per function, the value holding the module-vars structure.
    struct_value: HashMap<FuncId, ValueId>,
}

impl State {
    fn process(&mut self, b: &mut Builder) {
        self.create_struct(b);
        if self.struct_type.is_none() {
            return;
        }

        let refs = transitive_var_references(b.module);

        // Callers must be processed before callees so that updating a
        // callee's callsites can read the caller's struct value.
        for func in caller_first_order(b.module) {
            let used: &HashSet<InstId> = match refs.get(&func) {
                Some(set) if !set.is_empty() => set,
                _ => continue,
            };
            if b.module.function(func).is_entry_point() {
                let value = self.build_struct_in_entry_point(b, func, used);
                self.struct_value.insert(func, value);
            } else {
                let value = self.add_struct_param(b, func);
                self.struct_value.insert(func, value);
            }
        }

        // Rewrite every variable use into an access on the struct, then
        // drop the variable.
        for (index, var) in self.module_vars.clone().into_iter().enumerate() {
            let result = b.module.inst_result(var, 0);
            let ptr_ty = b.module.value_ty(result);
            let struct_values = &self.struct_value;
            b.module.for_each_use(result, |m, use_| {
                let func = m
                    .containing_function(use_.inst)
                    .unwrap_or_else(|| ice!("module var used outside any function"));
                let struct_value = *struct_values
                    .get(&func)
                    .unwrap_or_else(|| ice!("function uses a module var but got no struct"));
                let idx = m.constants.u32(&mut m.types, index as u32);
                let idx = m.constant_value(idx);
                let access = m.new_inst(
                    InstKind::Access,
                    vec![Some(struct_value), Some(idx)],
                    &[ptr_ty],
                );
                m.insert_before(use_.inst, access);
                Some(m.inst_result(access, 0))
            });
            b.module.destroy(var);
        }
    }

    fn create_struct(&mut self, b: &mut Builder) {
        let mut members = Vec::new();
        for inst in b.module.insts_of(b.module.root_block()) {
            if let InstKind::Var { .. } = b.module.kind(inst) {
                let result = b.module.inst_result(inst, 0);
                let name = match b.module.name_of(result) {
                    Some(n) => n.to_owned(),
                    None => b.module.symbols.fresh(),
                };
                self.module_vars.push(inst);
                members.push(StructMemberDesc::new(name, b.module.value_ty(result)));
            }
        }
        if members.is_empty() {
            return;
        }
        let name = b.module.symbols.register("module_vars_struct");
        self.struct_type = Some(b.module.types.struct_(&name, members));
    }

    /// Declare replacements in the entry point and construct the struct.
    fn build_struct_in_entry_point(
        &mut self,
        b: &mut Builder,
        func: FuncId,
        used: &HashSet<InstId>,
    ) -> ValueId {
        let struct_type = self.struct_type.unwrap();
        let body = b.module.function(func).block;
        let front = b.module.front(body);

        let build = |b: &mut Builder| -> ValueId {
            let mut args: Vec<Option<ValueId>> = Vec::new();
            for var in self.module_vars.clone() {
                if !used.contains(&var) {
                    // Unused by this entry point: leave the member undef.
                    args.push(None);
                    continue;
                }
                let old_result = b.module.inst_result(var, 0);
                let ptr_ty = b.module.value_ty(old_result);
                let space = b
                    .module
                    .types
                    .address_space(ptr_ty)
                    .unwrap_or_else(|| ice!("module var is not a pointer"));
                let decl = match space {
                    AddressSpace::Private => {
                        // Private variables become locals declared in the
                        // entry point, keeping their pointer type.
                        let store = b.module.types.store_type(ptr_ty).unwrap();
                        let access = b.module.types.access_of(ptr_ty).unwrap();
                        let local = b.var(space, store, access);
                        if let Some(init) = b.module.var_initializer(var) {
                            b.module.set_operand(local, 0, Some(init));
                        }
                        b.module.inst_result(local, 0)
                    }
                    AddressSpace::Storage | AddressSpace::Uniform | AddressSpace::Handle => {
                        // Resource variables become bound entry parameters.
                        let param = b.function_param("resource", ptr_ty);
                        if let Some(bp) = b.module.var_binding(var) {
                            b.module.param_attrs_mut(param).binding = Some(bp);
                        }
                        b.module.append_function_param(func, param);
                        param
                    }
                    _ => ice!("unhandled module var address space: {}", space),
                };
                if let Some(name) = b.module.clear_name(old_result) {
                    b.module.set_name_raw(decl, name);
                }
                args.push(Some(decl));
            }
            let construct = b.construct_with_undef(struct_type, args);
            let construct = b.result(construct);
            let let_ = b.let_(construct);
            let let_result = b.result(let_);
            b.module
                .set_name_raw(let_result, MODULE_VARS_NAME.to_owned());
            let_result
        };

        match front {
            Some(front) => b.insert_before(front, build),
            None => b.append_to(body, build),
        }
    }

    /// Non-entry functions take the struct as a trailing parameter; every
    /// callsite passes the caller's struct along.
    fn add_struct_param(&mut self, b: &mut Builder, func: FuncId) -> ValueId {
        let struct_type = self.struct_type.unwrap();
        let param = b.function_param(MODULE_VARS_NAME, struct_type);
        b.module.set_name_raw(param, MODULE_VARS_NAME.to_owned());
        b.module.append_function_param(func, param);

        let callee_value = b.module.function(func).value;
        for use_ in b.module.uses_sorted(callee_value) {
            if let InstKind::UserCall = b.module.kind(use_.inst) {
                let caller = b
                    .module
                    .containing_function(use_.inst)
                    .unwrap_or_else(|| ice!("call outside any function"));
                let struct_value = *self
                    .struct_value
                    .get(&caller)
                    .unwrap_or_else(|| ice!("caller has no module-vars struct"));
                b.module.push_operand(use_.inst, Some(struct_value));
            }
        }
        param
    }
}

/// For each function, the set of module-scope vars it references directly or
/// through calls.
fn transitive_var_references(module: &Module) -> HashMap<FuncId, HashSet<InstId>> {
    let mut direct: HashMap<FuncId, HashSet<InstId>> = HashMap::default();
    for inst in module.insts_of(module.root_block()) {
        if let InstKind::Var { .. } = module.kind(inst) {
            let result = module.inst_result(inst, 0);
            for use_ in module.uses(result) {
                if let Some(func) = module.containing_function(use_.inst) {
                    direct.entry(func).or_default().insert(inst);
                }
            }
        }
    }
    // Propagate through the call graph to a fixed point.
    loop {
        let mut changed = false;
        for func in &module.functions {
            for callee in callees_of(module, *func) {
                let callee_refs: Vec<InstId> = direct
                    .get(&callee)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                if callee_refs.is_empty() {
                    continue;
                }
                let entry = direct.entry(*func).or_default();
                for var in callee_refs {
                    changed |= entry.insert(var);
                }
            }
        }
        if !changed {
            return direct;
        }
    }
}

fn callees_of(module: &Module, func: FuncId) -> Vec<FuncId> {
    let mut out = Vec::new();
    collect_callees(module, module.function(func).block, &mut out);
    out
}

fn collect_callees(module: &Module, block: BlockId, out: &mut Vec<FuncId>) {
    for inst in module.insts_of(block) {
        if let InstKind::UserCall = module.kind(inst) {
            if let Some(callee) = module.operand(inst, 0) {
                if let ValueKind::Function(f) = module.value(callee).kind {
                    out.push(f);
                }
            }
        }
        for child in module.kind(inst).control_blocks() {
            collect_callees(module, child, out);
        }
    }
}

/// Topological order of the call graph with callers before callees.
fn caller_first_order(module: &Module) -> Vec<FuncId> {
    let mut order = Vec::new();
    let mut visited = HashSet::default();
    for func in &module.functions {
        postorder(module, *func, &mut visited, &mut order);
    }
    order.reverse();
    order
}

fn postorder(
    module: &Module,
    func: FuncId,
    visited: &mut HashSet<FuncId>,
    order: &mut Vec<FuncId>,
) {
    if !visited.insert(func) {
        return;
    }
    for callee in callees_of(module, func) {
        postorder(module, callee, visited, order);
    }
    order.push(func);
}
