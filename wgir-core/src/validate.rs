//! The invariant validator.
//!
//! Decides whether a module is well-formed against a capability set. The
//! validator never mutates the module; every rule violation becomes one
//! diagnostic with the offending instruction disassembled and the enclosing
//! function named.

use std::fmt;

use bitflags::bitflags;
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};

use crate::disasm::{disassemble, disassemble_inst};
use crate::function::{BindingPoint, FuncId, PipelineStage};
use crate::inst::{BinaryOp, BuiltinFn, InstId, InstKind};
use crate::module::{BlockId, Module};
use crate::ty::{Access, AddressSpace, Type, TypeId};
use crate::value::Usage;

bitflags! {
    /// Constructs outside the core language the caller is willing to accept.
    pub struct Capabilities: u32 {
        const ALLOW_8BIT_INTEGERS = 1 << 0;
        const ALLOW_16BIT_INTEGERS = 1 << 1;
        const ALLOW_CLIP_DISTANCES_ON_F32 = 1 << 2;
        const ALLOW_DUPLICATE_BINDINGS = 1 << 3;
        const ALLOW_NON_CORE_TYPES = 1 << 4;
        const ALLOW_OVERRIDES = 1 << 5;
        const ALLOW_RESOURCE_BINDING = 1 << 6;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Note,
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

/// An ordered list of diagnostics; the error payload of validation.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of error-severity entries.
    pub fn error_count(&self) -> usize {
        self.0
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for d in &self.0 {
            match d.severity {
                Severity::Error => writeln!(f, "error: {}", d.message)?,
                Severity::Note => writeln!(f, "note: {}", d.message)?,
            }
        }
        Ok(())
    }
}

/// Validate `module` against `caps`.
pub fn validate(module: &Module, caps: Capabilities) -> Result<(), Diagnostics> {
    let mut v = Validator {
        module,
        caps,
        diags: Vec::new(),
        current_function: None,
        discard_functions: HashSet::default(),
    };
    v.run();
    if v.diags.is_empty() {
        Ok(())
    } else {
        Err(Diagnostics(v.diags))
    }
}

/// Transform-prologue helper: validate, and on failure log the diagnostics
/// together with the module disassembly.
pub fn validate_and_dump_if_needed(
    module: &Module,
    pass_name: &str,
    caps: Capabilities,
) -> Result<(), Diagnostics> {
    match validate(module, caps) {
        Ok(()) => Ok(()),
        Err(diags) => {
            log::error!(
                "{} validation failed:\n{}\n{}",
                pass_name,
                diags,
                disassemble(module)
            );
            Err(diags)
        }
    }
}

struct Validator<'m> {
    module: &'m Module,
    caps: Capabilities,
    diags: Vec<Diagnostic>,
    current_function: Option<FuncId>,
    /// Functions that directly contain a `discard`.
    discard_functions: HashSet<FuncId>,
}

impl<'m> Validator<'m> {
    fn error_at(&mut self, inst: InstId, message: &str) {
        self.diags.push(Diagnostic {
            severity: Severity::Error,
            message: format!("{}: {}", message, disassemble_inst(self.module, inst)),
        });
        if let Some(func) = self.current_function {
            let fname = self
                .module
                .name_of(self.module.function(func).value)
                .unwrap_or("<unnamed>");
            self.diags.push(Diagnostic {
                severity: Severity::Note,
                message: format!("in block of function '%{}'", fname),
            });
        }
    }

    fn error(&mut self, message: String) {
        self.diags.push(Diagnostic {
            severity: Severity::Error,
            message,
        });
    }

    fn run(&mut self) {
        self.check_root_block();
        self.check_use_lists();
        for func in self.module.functions.clone() {
            self.current_function = Some(func);
            self.check_function(func);
        }
        self.current_function = None;
        self.check_discard_reachability();
    }

    fn check_root_block(&mut self) {
        let root = self.module.root_block();
        let mut seen_bindings: HashMap<BindingPoint, InstId> = HashMap::default();
        for inst in self.module.insts_of(root) {
            match self.module.kind(inst) {
                InstKind::Var { space, binding, .. } => {
                    let space = *space;
                    if space == AddressSpace::Function {
                        self.error_at(inst, "module-scope var in the function address space");
                    }
                    match binding {
                        Some(bp) => {
                            if !matches!(
                                space,
                                AddressSpace::Storage | AddressSpace::Uniform | AddressSpace::Handle
                            ) {
                                self.error_at(
                                    inst,
                                    "binding point on a var outside the storage, uniform and handle address spaces",
                                );
                            }
                            if let Some(_prev) = seen_bindings.insert(*bp, inst) {
                                if !self.caps.contains(Capabilities::ALLOW_DUPLICATE_BINDINGS) {
                                    self.error_at(inst, "duplicate binding point");
                                }
                            }
                        }
                        None => {
                            if matches!(
                                space,
                                AddressSpace::Storage | AddressSpace::Uniform | AddressSpace::Handle
                            ) {
                                self.error_at(inst, "resource var requires a binding point");
                            }
                        }
                    }
                    self.check_inst(inst, root);
                }
                _ => self.error_at(inst, "root block may only contain var declarations"),
            }
        }
    }

    /// Both directions of the use/def mirror: every operand is recorded in
    /// the producer's use-list, and every recorded use points back at a live
    /// operand slot holding the value.
    fn check_use_lists(&mut self) {
        for inst in self.module.instructions() {
            for (i, operand) in self.module.operands(inst).iter().enumerate() {
                if let Some(v) = operand {
                    let usage = Usage {
                        inst,
                        operand: i as u32,
                    };
                    let count = self.module.uses(*v).iter().filter(|u| **u == usage).count();
                    if count != 1 {
                        self.error(format!(
                            "operand {} of {:?} appears {} times in its producer's use-list",
                            i, inst, count
                        ));
                    }
                }
            }
        }
        for value in self.module.all_values() {
            for usage in self.module.uses(value) {
                if !self.module.alive(usage.inst) {
                    self.error(format!(
                        "use-list of {:?} references destroyed instruction {:?}",
                        value, usage.inst
                    ));
                    continue;
                }
                if self.module.operand(usage.inst, usage.operand as usize) != Some(value) {
                    self.error(format!(
                        "use-list of {:?} disagrees with operand {} of {:?}",
                        value, usage.operand, usage.inst
                    ));
                }
            }
        }
    }

    fn check_function(&mut self, func: FuncId) {
        let data = self.module.function(func);
        if data.stage == PipelineStage::Compute && data.workgroup_size.is_none() {
            self.error(format!(
                "compute entry point '%{}' has no workgroup size",
                self.module.name_of(data.value).unwrap_or("<unnamed>")
            ));
        }
        let block = data.block;
        if self.module.terminator(block).is_none() {
            self.error(format!(
                "function '%{}' body does not end in a terminator",
                self.module.name_of(data.value).unwrap_or("<unnamed>")
            ));
        }
        for p in data.params.clone() {
            self.check_type_caps(self.module.value_ty(p));
        }
        let mut ctrl_stack = Vec::new();
        self.check_block(block, func, &mut ctrl_stack);
    }

    fn check_block(&mut self, block: BlockId, func: FuncId, ctrl_stack: &mut Vec<InstId>) {
        let insts = self.module.insts_of(block);
        let count = insts.len();
        for (i, inst) in insts.iter().copied().enumerate() {
            if !self.module.alive(inst) {
                self.error_at(inst, "destroyed instruction still linked in a block");
                continue;
            }
            if self.module.inst(inst).block != Some(block) {
                self.error_at(inst, "instruction block pointer disagrees with the list");
            }
            let is_term = self.module.kind(inst).is_terminator();
            if is_term && i + 1 != count {
                self.error_at(inst, "instruction after a terminator");
            }
            if !is_term && i + 1 == count {
                // Non-empty blocks must end in a terminator.
                self.error_at(inst, "block does not end in a terminator");
            }
            self.check_inst(inst, block);
            if self.module.kind(inst).is_control() {
                ctrl_stack.push(inst);
                for child in self.module.kind(inst).control_blocks() {
                    if self.module.block(child).parent != Some(inst) {
                        self.error_at(inst, "child block parent does not point at the control instruction");
                    }
                    if self.module.block_len(child) > 0 {
                        self.check_block(child, func, ctrl_stack);
                    }
                }
                ctrl_stack.pop();
            }
            if let InstKind::Discard = self.module.kind(inst) {
                self.discard_functions.insert(func);
            }
            self.check_terminator_context(inst, func, ctrl_stack);
        }
    }

    fn check_terminator_context(&mut self, inst: InstId, func: FuncId, ctrl_stack: &[InstId]) {
        match self.module.kind(inst) {
            InstKind::Return { func: target } => {
                if *target != func {
                    self.error_at(inst, "return targets a different function");
                }
                let ret_ty = self.module.function(func).return_type;
                let is_void = matches!(self.module.types.get(ret_ty), Type::Void);
                let operands = self.module.operands(inst).len();
                if is_void && operands != 0 {
                    self.error_at(inst, "value returned from a void function");
                }
                if !is_void {
                    if operands != 1 {
                        self.error_at(inst, "missing return value");
                    } else if let Some(v) = self.module.operand(inst, 0) {
                        if self.module.value_ty(v) != ret_ty {
                            self.error_at(inst, "return value type does not match the function return type");
                        }
                    }
                }
            }
            InstKind::ExitIf { target } => {
                if !ctrl_stack.contains(target) {
                    self.error_at(inst, "exit_if does not target an enclosing if");
                } else if !matches!(self.module.kind(*target), InstKind::If { .. }) {
                    self.error_at(inst, "exit_if targets a non-if instruction");
                }
            }
            InstKind::ExitSwitch { target } => {
                if !ctrl_stack.contains(target) {
                    self.error_at(inst, "exit_switch does not target an enclosing switch");
                } else if !matches!(self.module.kind(*target), InstKind::Switch { .. }) {
                    self.error_at(inst, "exit_switch targets a non-switch instruction");
                }
            }
            InstKind::ExitLoop { target }
            | InstKind::BreakIf { target }
            | InstKind::Continue { target }
            | InstKind::NextIteration { target } => {
                if !ctrl_stack.contains(target) {
                    self.error_at(inst, "loop terminator does not target an enclosing loop");
                } else if !matches!(self.module.kind(*target), InstKind::Loop { .. }) {
                    self.error_at(inst, "loop terminator targets a non-loop instruction");
                }
            }
            _ => {}
        }
    }

    fn check_inst(&mut self, inst: InstId, _block: BlockId) {
        // Operand slots must be filled except where undef is documented:
        // var initializers, construct arguments and exit values.
        let allows_undef = matches!(
            self.module.kind(inst),
            InstKind::Var { .. }
                | InstKind::Construct
                | InstKind::ExitIf { .. }
                | InstKind::ExitSwitch { .. }
                | InstKind::ExitLoop { .. }
        );
        if !allows_undef {
            for (i, operand) in self.module.operands(inst).iter().enumerate() {
                if operand.is_none() {
                    self.error_at(inst, &format!("operand {} is undefined", i));
                }
            }
        }
        for operand in self.module.operands(inst).iter().flatten() {
            self.check_type_caps(self.module.value_ty(*operand));
        }
        for result in self.module.results(inst) {
            self.check_type_caps(self.module.value_ty(*result));
        }
        match self.module.kind(inst).clone() {
            InstKind::Var { .. } => {
                let result_ty = self.module.value_ty(self.module.inst_result(inst, 0));
                if self.module.types.store_type(result_ty).is_none() {
                    self.error_at(inst, "var result is not a pointer");
                }
                if let (Some(init), Some(store)) = (
                    self.module.var_initializer(inst),
                    self.module.types.store_type(result_ty),
                ) {
                    if self.module.value_ty(init) != store {
                        self.error_at(inst, "initializer type does not match the var store type");
                    }
                }
            }
            InstKind::Let => {
                if let Some(v) = self.module.operand(inst, 0) {
                    let result = self.module.inst_result(inst, 0);
                    if self.module.value_ty(v) != self.module.value_ty(result) {
                        self.error_at(inst, "let result type does not match its value");
                    }
                }
            }
            InstKind::Load => {
                if let Some(ptr) = self.module.operand(inst, 0) {
                    let ptr_ty = self.module.value_ty(ptr);
                    match self.module.types.store_type(ptr_ty) {
                        Some(store) => {
                            let result = self.module.inst_result(inst, 0);
                            if self.module.value_ty(result) != store {
                                self.error_at(inst, "load result type does not match the store type");
                            }
                        }
                        None => self.error_at(inst, "load of a non-pointer value"),
                    }
                }
            }
            InstKind::Store => {
                if let (Some(ptr), Some(value)) =
                    (self.module.operand(inst, 0), self.module.operand(inst, 1))
                {
                    let ptr_ty = self.module.value_ty(ptr);
                    match self.module.types.store_type(ptr_ty) {
                        Some(store) => {
                            if self.module.value_ty(value) != store {
                                self.error_at(inst, "stored value type does not match the store type");
                            }
                            if self.module.types.access_of(ptr_ty) == Some(Access::Read) {
                                self.error_at(inst, "store through a read-only pointer");
                            }
                        }
                        None => self.error_at(inst, "store through a non-pointer value"),
                    }
                }
            }
            InstKind::LoadVectorElement => {
                if let Some(ptr) = self.module.operand(inst, 0) {
                    let ptr_ty = self.module.value_ty(ptr);
                    let elem = self
                        .module
                        .types
                        .store_type(ptr_ty)
                        .and_then(|s| self.module.types.as_vector(s))
                        .map(|(elem, _)| elem);
                    match elem {
                        Some(elem) => {
                            let result = self.module.inst_result(inst, 0);
                            if self.module.value_ty(result) != elem {
                                self.error_at(inst, "load_vector_element result is not the vector element type");
                            }
                        }
                        None => self.error_at(inst, "load_vector_element of a non-vector pointer"),
                    }
                }
            }
            InstKind::StoreVectorElement => {
                if let (Some(ptr), Some(value)) =
                    (self.module.operand(inst, 0), self.module.operand(inst, 2))
                {
                    let ptr_ty = self.module.value_ty(ptr);
                    let elem = self
                        .module
                        .types
                        .store_type(ptr_ty)
                        .and_then(|s| self.module.types.as_vector(s))
                        .map(|(elem, _)| elem);
                    match elem {
                        Some(elem) => {
                            if self.module.value_ty(value) != elem {
                                self.error_at(inst, "store_vector_element value is not the vector element type");
                            }
                        }
                        None => self.error_at(inst, "store_vector_element of a non-vector pointer"),
                    }
                }
            }
            InstKind::Binary(op) => self.check_binary(inst, op),
            InstKind::Access => self.check_access(inst),
            InstKind::Swizzle { indices } => {
                if let Some(obj) = self.module.operand(inst, 0) {
                    let obj_ty = self.module.value_ty(obj);
                    match self.module.types.as_vector(obj_ty) {
                        Some((_, width)) => {
                            if indices.iter().any(|i| *i >= width) {
                                self.error_at(inst, "swizzle index out of range");
                            }
                        }
                        None => self.error_at(inst, "swizzle of a non-vector value"),
                    }
                }
            }
            InstKind::UserCall => self.check_user_call(inst),
            InstKind::CoreBuiltinCall(f) => self.check_builtin_call(inst, f),
            InstKind::MemberBuiltinCall(_) | InstKind::IntrinsicCall(_) => {
                if !self.caps.contains(Capabilities::ALLOW_NON_CORE_TYPES) {
                    self.error_at(
                        inst,
                        "dialect instruction requires the AllowNonCoreTypes capability",
                    );
                }
            }
            InstKind::If { .. } => {
                if let Some(cond) = self.module.operand(inst, 0) {
                    if !matches!(
                        self.module.types.get(self.module.value_ty(cond)),
                        Type::Bool
                    ) {
                        self.error_at(inst, "if condition is not a bool");
                    }
                }
            }
            _ => {}
        }
    }

    fn check_binary(&mut self, inst: InstId, op: BinaryOp) {
        let lhs = self.module.operand(inst, 0);
        let rhs = self.module.operand(inst, 1);
        let (lhs, rhs) = match (lhs, rhs) {
            (Some(l), Some(r)) => (l, r),
            _ => return,
        };
        let lhs_ty = self.module.value_ty(lhs);
        let rhs_ty = self.module.value_ty(rhs);
        let result = self.module.value_ty(self.module.inst_result(inst, 0));
        let expected: TypeId = if op.is_comparison() {
            if lhs_ty != rhs_ty {
                self.error_at(inst, "comparison operand types differ");
            }
            // The recorded result must be bool with the operand width, but
            // the manager is immutable here; compare shape by hand.
            let ok = match self.module.types.as_vector(lhs_ty) {
                Some((_, width)) => {
                    matches!(self.module.types.as_vector(result), Some((elem, w))
                        if w == width && matches!(self.module.types.get(elem), Type::Bool))
                }
                None => matches!(self.module.types.get(result), Type::Bool),
            };
            if !ok {
                self.error_at(inst, "comparison result is not a bool of the operand width");
            }
            return;
        } else if matches!(op, BinaryOp::ShiftLeft | BinaryOp::ShiftRight) {
            // Shift amount must be an unsigned integer of matching width.
            let ok = match self.module.types.as_vector(rhs_ty) {
                Some((elem, _)) => matches!(self.module.types.get(elem), Type::U32),
                None => matches!(self.module.types.get(rhs_ty), Type::U32),
            };
            if !ok {
                self.error_at(inst, "shift amount is not an unsigned integer");
            }
            lhs_ty
        } else {
            if lhs_ty != rhs_ty {
                self.error_at(inst, "binary operand types differ");
            }
            lhs_ty
        };
        if result != expected {
            self.error_at(inst, "binary result type does not match the derived type");
        }
    }

    fn check_access(&mut self, inst: InstId) {
        let obj = match self.module.operand(inst, 0) {
            Some(o) => o,
            None => return,
        };
        let mut ty = self.module.value_ty(obj);
        let mut view = None;
        if let (Some(store), Some(space), Some(access)) = (
            self.module.types.store_type(ty),
            self.module.types.address_space(ty),
            self.module.types.access_of(ty),
        ) {
            ty = store;
            view = Some((space, access));
        }
        let operand_count = self.module.operands(inst).len();
        for i in 1..operand_count {
            let index = match self.module.operand(inst, i) {
                Some(v) => v,
                None => return,
            };
            let index_ty = self.module.value_ty(index);
            if !self.module.types.get(index_ty).is_integer() {
                self.error_at(inst, "access index is not an integer");
                return;
            }
            ty = match self.module.types.get(ty).clone() {
                Type::Vector { elem, .. } => elem,
                Type::Matrix { column_type, .. } => column_type,
                Type::Array { element, .. } => element,
                Type::Struct { members, .. } => match self.module.const_u32(index) {
                    Some(idx) => match members.get(idx as usize) {
                        Some(m) => m.ty,
                        None => {
                            self.error_at(inst, "struct member index out of range");
                            return;
                        }
                    },
                    None => {
                        self.error_at(inst, "struct access index is not a constant");
                        return;
                    }
                },
                _ => {
                    self.error_at(inst, "access into a non-composite type");
                    return;
                }
            };
        }
        let result = self.module.value_ty(self.module.inst_result(inst, 0));
        let matches = match view {
            Some((space, access)) => {
                self.module.types.store_type(result) == Some(ty)
                    && self.module.types.address_space(result) == Some(space)
                    && self.module.types.access_of(result) == Some(access)
            }
            None => result == ty,
        };
        if !matches {
            self.error_at(inst, "access result type does not match the accessed element");
        }
    }

    fn check_user_call(&mut self, inst: InstId) {
        let callee = match self.module.operand(inst, 0) {
            Some(c) => c,
            None => return,
        };
        let func = match self.module.value(callee).kind {
            crate::value::ValueKind::Function(f) => f,
            _ => {
                self.error_at(inst, "call target is not a function");
                return;
            }
        };
        if !self.module.functions.contains(&func) {
            self.error_at(inst, "call target is not part of the module");
            return;
        }
        let data = self.module.function(func);
        if data.is_entry_point() {
            self.error_at(inst, "call target is an entry point");
        }
        let args = self.module.operands(inst).len() - 1;
        if args != data.params.len() {
            self.error_at(inst, "call argument count does not match the target");
            return;
        }
        for (i, param) in data.params.clone().into_iter().enumerate() {
            if let Some(arg) = self.module.operand(inst, i + 1) {
                if self.module.value_ty(arg) != self.module.value_ty(param) {
                    self.error_at(
                        inst,
                        &format!("call argument {} type does not match the parameter", i),
                    );
                }
            }
        }
        let result = self.module.value_ty(self.module.inst_result(inst, 0));
        if result != data.return_type {
            self.error_at(inst, "call result type does not match the target return type");
        }
    }

    fn check_builtin_call(&mut self, inst: InstId, f: BuiltinFn) {
        match f {
            BuiltinFn::ArrayLength => {
                if let Some(arg) = self.module.operand(inst, 0) {
                    let arg_ty = self.module.value_ty(arg);
                    let ok = self
                        .module
                        .types
                        .store_type(arg_ty)
                        .map(|s| self.module.types.has_runtime_size(s))
                        .unwrap_or(false);
                    if !ok {
                        self.error_at(inst, "arrayLength of a non-runtime-sized pointer");
                    }
                }
                let result = self.module.value_ty(self.module.inst_result(inst, 0));
                if !matches!(self.module.types.get(result), Type::U32) {
                    self.error_at(inst, "arrayLength result is not u32");
                }
            }
            BuiltinFn::Select => {
                let result = self.module.value_ty(self.module.inst_result(inst, 0));
                for i in 0..2 {
                    if let Some(arg) = self.module.operand(inst, i) {
                        if self.module.value_ty(arg) != result {
                            self.error_at(inst, "select value type does not match the result");
                        }
                    }
                }
                if let Some(cond) = self.module.operand(inst, 2) {
                    let cond_ty = self.module.value_ty(cond);
                    let is_bool = match self.module.types.as_vector(cond_ty) {
                        Some((elem, _)) => matches!(self.module.types.get(elem), Type::Bool),
                        None => matches!(self.module.types.get(cond_ty), Type::Bool),
                    };
                    if !is_bool {
                        self.error_at(inst, "select condition is not a bool");
                    }
                }
            }
            BuiltinFn::AtomicLoad
            | BuiltinFn::AtomicStore
            | BuiltinFn::AtomicAdd
            | BuiltinFn::AtomicSub
            | BuiltinFn::AtomicMin
            | BuiltinFn::AtomicMax
            | BuiltinFn::AtomicAnd
            | BuiltinFn::AtomicOr
            | BuiltinFn::AtomicXor
            | BuiltinFn::AtomicExchange
            | BuiltinFn::AtomicCompareExchangeWeak => {
                if let Some(ptr) = self.module.operand(inst, 0) {
                    let ptr_ty = self.module.value_ty(ptr);
                    let is_atomic = self
                        .module
                        .types
                        .store_type(ptr_ty)
                        .map(|s| matches!(self.module.types.get(s), Type::Atomic { .. }))
                        .unwrap_or(false);
                    if !is_atomic {
                        self.error_at(inst, "atomic builtin on a non-atomic pointer");
                    }
                }
            }
            _ => {}
        }
    }

    /// 8/16-bit integer types are gated behind capabilities.
    fn check_type_caps(&mut self, ty: TypeId) {
        let mut needs8 = false;
        let mut needs16 = false;
        self.scan_type(ty, &mut needs8, &mut needs16, &mut HashSet::default());
        if needs8 && !self.caps.contains(Capabilities::ALLOW_8BIT_INTEGERS) {
            self.error(format!(
                "8-bit integer type '{}' requires the Allow8BitIntegers capability",
                self.module.types.type_name(ty)
            ));
        }
        if needs16 && !self.caps.contains(Capabilities::ALLOW_16BIT_INTEGERS) {
            self.error(format!(
                "16-bit integer type '{}' requires the Allow16BitIntegers capability",
                self.module.types.type_name(ty)
            ));
        }
    }

    fn scan_type(
        &self,
        ty: TypeId,
        needs8: &mut bool,
        needs16: &mut bool,
        seen: &mut HashSet<TypeId>,
    ) {
        if !seen.insert(ty) {
            return;
        }
        match self.module.types.get(ty) {
            Type::I8 | Type::U8 => *needs8 = true,
            Type::U16 => *needs16 = true,
            Type::Vector { elem, .. } => self.scan_type(*elem, needs8, needs16, seen),
            Type::Matrix { column_type, .. } => self.scan_type(*column_type, needs8, needs16, seen),
            Type::Array { element, .. } => self.scan_type(*element, needs8, needs16, seen),
            Type::Struct { members, .. } => {
                for m in members {
                    self.scan_type(m.ty, needs8, needs16, seen);
                }
            }
            Type::Pointer { store, .. } | Type::Reference { store, .. } => {
                self.scan_type(*store, needs8, needs16, seen)
            }
            Type::Atomic { inner } => self.scan_type(*inner, needs8, needs16, seen),
            _ => {}
        }
    }

    /// `discard` may only appear on paths reachable from fragment entry
    /// points.
    fn check_discard_reachability(&mut self) {
        if self.discard_functions.is_empty() {
            return;
        }
        // Propagate discard-ness up the call graph.
        let mut contains: HashSet<FuncId> = self.discard_functions.clone();
        loop {
            let mut changed = false;
            for func in self.module.functions.clone() {
                if contains.contains(&func) {
                    continue;
                }
                if self.calls_any(self.module.function(func).block, &contains) {
                    contains.insert(func);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for func in &contains {
            let data = self.module.function(*func);
            if data.is_entry_point() && data.stage != PipelineStage::Fragment {
                self.error(format!(
                    "discard reachable from non-fragment entry point '%{}'",
                    self.module.name_of(data.value).unwrap_or("<unnamed>")
                ));
            }
        }
    }

    fn calls_any(&self, block: BlockId, targets: &HashSet<FuncId>) -> bool {
        for inst in self.module.insts_of(block) {
            if let InstKind::UserCall = self.module.kind(inst) {
                if let Some(callee) = self.module.operand(inst, 0) {
                    if let crate::value::ValueKind::Function(f) = self.module.value(callee).kind {
                        if targets.contains(&f) {
                            return true;
                        }
                    }
                }
            }
            for child in self.module.kind(inst).control_blocks() {
                if self.calls_any(child, targets) {
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::Builder;
    use crate::ty::{Access, AddressSpace};

    #[test]
    fn empty_module_validates() {
        let m = Module::new();
        assert!(validate(&m, Capabilities::empty()).is_ok());
    }

    #[test]
    fn builder_module_validates() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("v", AddressSpace::Storage, f32, Access::Read);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let var_result = b.result(var);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let load = b.load(var_result);
            let loaded = b.result(load);
            b.let_(loaded);
            b.return_(func);
        });
        validate(&m, Capabilities::empty()).unwrap();
    }

    #[test]
    fn unterminated_function_is_rejected() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        b.compute_function("main");
        let err = validate(&m, Capabilities::empty()).unwrap_err();
        assert!(err.error_count() > 0);
        assert!(format!("{}", err).contains("does not end in a terminator"));
    }

    #[test]
    fn storage_var_without_binding_is_rejected() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let root = b.module.root_block();
        b.append_to(root, |b| {
            b.var(AddressSpace::Storage, f32, Access::Read)
        });
        let err = validate(&m, Capabilities::empty()).unwrap_err();
        assert!(format!("{}", err).contains("requires a binding point"));
    }

    #[test]
    fn duplicate_bindings_gated_by_capability() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let root = b.module.root_block();
        b.append_to(root, |b| {
            let v1 = b.var(AddressSpace::Storage, f32, Access::Read);
            b.module.set_var_binding(v1, 0, 0);
            let v2 = b.var(AddressSpace::Storage, f32, Access::Read);
            b.module.set_var_binding(v2, 0, 0);
        });
        assert!(validate(&m, Capabilities::empty()).is_err());
        assert!(validate(&m, Capabilities::ALLOW_DUPLICATE_BINDINGS).is_ok());
    }

    #[test]
    fn u16_type_gated_by_capability() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let u16_ = b.module.types.u16();
        let arr = b.module.types.array(u16_, 4);
        let root = b.module.root_block();
        b.append_to(root, |b| {
            let v = b.var(AddressSpace::Storage, arr, Access::Read);
            b.module.set_var_binding(v, 0, 0);
        });
        assert!(validate(&m, Capabilities::empty()).is_err());
        assert!(validate(&m, Capabilities::ALLOW_16BIT_INTEGERS).is_ok());
    }

    #[test]
    fn discard_outside_fragment_is_rejected() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            b.discard();
            b.return_(func);
        });
        let err = validate(&m, Capabilities::empty()).unwrap_err();
        assert!(format!("{}", err).contains("discard"));
    }

    #[test]
    fn discard_in_fragment_validates() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let func = b.fragment_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            b.discard();
            b.return_(func);
        });
        validate(&m, Capabilities::empty()).unwrap();
    }

    #[test]
    fn call_argument_mismatch_is_rejected() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let void = b.module.types.void_();
        let f32 = b.module.types.f32();
        let callee = b.function("f", void);
        let p = b.function_param("p", f32);
        b.module.set_function_params(callee, vec![p]);
        let callee_body = b.body(callee);
        b.append_to(callee_body, |b| {
            b.return_(callee);
        });
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let arg = b.u32_(0); // wrong type: u32 instead of f32
            b.call(callee, vec![arg]);
            b.return_(func);
        });
        let err = validate(&m, Capabilities::empty()).unwrap_err();
        assert!(format!("{}", err).contains("argument"));
    }

    #[test]
    fn calling_entry_point_is_rejected() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let ep = b.compute_function("ep");
        let ep_body = b.body(ep);
        b.append_to(ep_body, |b| {
            b.return_(ep);
        });
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            b.call(ep, vec![]);
            b.return_(func);
        });
        let err = validate(&m, Capabilities::empty()).unwrap_err();
        assert!(format!("{}", err).contains("entry point"));
    }

    #[test]
    fn switch_with_cases_validates() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let cond = b.i32_(1);
            let sw = b.switch(cond);
            let zero = b.module.constants.i32(&mut b.module.types, 0);
            let case = b.switch_case(sw, vec![Some(zero)]);
            b.append_to(case, |b| {
                b.exit_switch(sw);
            });
            let default = b.switch_case(sw, vec![None]);
            b.append_to(default, |b| {
                b.exit_switch(sw);
            });
            b.return_(func);
        });
        validate(&m, Capabilities::empty()).unwrap();
        let text = crate::disasm::disassemble(&m);
        assert!(text.contains("switch 1i [c: (0i, $B2), c: (default, $B3)]"));
    }

    #[test]
    fn exit_must_target_enclosing_control() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let cond = b.bool_(true);
            let if1 = b.if_(cond);
            let t1 = b.true_block(if1);
            b.append_to(t1, |b| {
                b.exit_if(if1);
            });
            let if2 = b.if_(cond);
            let t2 = b.true_block(if2);
            b.append_to(t2, |b| {
                // Wrong target: exits a sibling instead of the enclosing if.
                b.exit_if(if1);
            });
            b.return_(func);
        });
        let err = validate(&m, Capabilities::empty()).unwrap_err();
        assert!(format!("{}", err).contains("enclosing"));
    }
}
