//! Instruction factory with an explicit insertion-point stack.
//!
//! Instructions start detached; the builder attaches them according to the
//! innermost insertion scope (`append_to`, `insert_before`, `insert_after`).
//! Outside any scope the builder leaves instructions detached for the caller
//! to place.

use crate::constant::ConstId;
use crate::function::{FuncId, PipelineStage};
use crate::inst::{BinaryOp, BuiltinFn, InstId, InstKind, Intrinsic, MemberBuiltinFn, SwitchCase, UnaryOp};
use crate::module::{BlockId, Module};
use crate::ty::{Access, AddressSpace, TypeId};
use crate::value::{ValueId, ValueKind};
use crate::{ice, ice_assert};

#[derive(Clone, Copy)]
enum InsertPoint {
    Detached,
    AppendTo(BlockId),
    Before(InstId),
    After(InstId),
}

pub struct Builder<'m> {
    pub module: &'m mut Module,
    insert: Vec<InsertPoint>,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self {
            module,
            insert: Vec::new(),
        }
    }

    /// First result of an instruction.
    pub fn result(&self, inst: InstId) -> ValueId {
        self.module.inst_result(inst, 0)
    }

    fn emit(&mut self, inst: InstId) -> InstId {
        match self.insert.last().copied().unwrap_or(InsertPoint::Detached) {
            InsertPoint::Detached => {}
            InsertPoint::AppendTo(block) => self.module.append(block, inst),
            InsertPoint::Before(anchor) => self.module.insert_before(anchor, inst),
            InsertPoint::After(anchor) => {
                self.module.insert_after(anchor, inst);
                *self.insert.last_mut().unwrap() = InsertPoint::After(inst);
            }
        }
        inst
    }

    // Insertion scopes.

    pub fn append_to<R>(&mut self, block: BlockId, f: impl FnOnce(&mut Self) -> R) -> R {
        self.insert.push(InsertPoint::AppendTo(block));
        let out = f(self);
        self.insert.pop();
        out
    }

    pub fn insert_before<R>(&mut self, anchor: InstId, f: impl FnOnce(&mut Self) -> R) -> R {
        self.insert.push(InsertPoint::Before(anchor));
        let out = f(self);
        self.insert.pop();
        out
    }

    pub fn insert_after<R>(&mut self, anchor: InstId, f: impl FnOnce(&mut Self) -> R) -> R {
        self.insert.push(InsertPoint::After(anchor));
        let out = f(self);
        self.insert.pop();
        out
    }

    /// Build detached instructions regardless of the surrounding scope.
    pub fn detached<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.insert.push(InsertPoint::Detached);
        let out = f(self);
        self.insert.pop();
        out
    }

    // Constant values.

    pub fn u32_(&mut self, value: u32) -> ValueId {
        let c = self.module.constants.u32(&mut self.module.types, value);
        self.module.constant_value(c)
    }

    pub fn i32_(&mut self, value: i32) -> ValueId {
        let c = self.module.constants.i32(&mut self.module.types, value);
        self.module.constant_value(c)
    }

    pub fn f32_(&mut self, value: f32) -> ValueId {
        let c = self.module.constants.f32(&mut self.module.types, value);
        self.module.constant_value(c)
    }

    pub fn bool_(&mut self, value: bool) -> ValueId {
        let c = self.module.constants.bool_(&mut self.module.types, value);
        self.module.constant_value(c)
    }

    /// The zero value of `ty`.
    pub fn zero(&mut self, ty: TypeId) -> ValueId {
        let c = self.module.constants.zero(ty);
        self.module.constant_value(c)
    }

    pub fn constant(&mut self, id: ConstId) -> ValueId {
        self.module.constant_value(id)
    }

    // Memory.

    /// A `var` whose result is `ptr<space, store_ty, access>`.
    pub fn var(&mut self, space: AddressSpace, store_ty: TypeId, access: Access) -> InstId {
        let ptr = self.module.types.ptr(space, store_ty, access);
        let inst = self.module.new_inst(
            InstKind::Var {
                space,
                access,
                binding: None,
            },
            vec![None],
            &[ptr],
        );
        self.emit(inst)
    }

    pub fn var_named(
        &mut self,
        name: &str,
        space: AddressSpace,
        store_ty: TypeId,
        access: Access,
    ) -> InstId {
        let inst = self.var(space, store_ty, access);
        let result = self.result(inst);
        self.module.set_name(result, name);
        inst
    }

    /// Attach a constant initializer; its type must equal the store type.
    pub fn set_initializer(&mut self, var: InstId, value: ValueId) {
        let ptr = self.module.value_ty(self.result(var));
        let store = self
            .module
            .types
            .store_type(ptr)
            .unwrap_or_else(|| ice!("var result is not a pointer"));
        ice_assert!(
            self.module.value_ty(value) == store,
            "var initializer type does not match the store type"
        );
        self.module.set_operand(var, 0, Some(value));
    }

    pub fn let_(&mut self, value: ValueId) -> InstId {
        let ty = self.module.value_ty(value);
        let inst = self
            .module
            .new_inst(InstKind::Let, vec![Some(value)], &[ty]);
        self.emit(inst)
    }

    pub fn let_named(&mut self, name: &str, value: ValueId) -> InstId {
        let inst = self.let_(value);
        let result = self.result(inst);
        self.module.set_name(result, name);
        inst
    }

    pub fn load(&mut self, ptr: ValueId) -> InstId {
        let ptr_ty = self.module.value_ty(ptr);
        let store = self
            .module
            .types
            .store_type(ptr_ty)
            .unwrap_or_else(|| ice!("load of a non-pointer value"));
        let inst = self
            .module
            .new_inst(InstKind::Load, vec![Some(ptr)], &[store]);
        self.emit(inst)
    }

    pub fn load_vector_element(&mut self, ptr: ValueId, index: ValueId) -> InstId {
        let ptr_ty = self.module.value_ty(ptr);
        let store = self
            .module
            .types
            .store_type(ptr_ty)
            .unwrap_or_else(|| ice!("load_vector_element of a non-pointer value"));
        let (elem, _) = self
            .module
            .types
            .as_vector(store)
            .unwrap_or_else(|| ice!("load_vector_element of a non-vector store type"));
        let inst = self.module.new_inst(
            InstKind::LoadVectorElement,
            vec![Some(ptr), Some(index)],
            &[elem],
        );
        self.emit(inst)
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Store, vec![Some(ptr), Some(value)], &[]);
        self.emit(inst)
    }

    pub fn store_vector_element(&mut self, ptr: ValueId, index: ValueId, value: ValueId) -> InstId {
        let inst = self.module.new_inst(
            InstKind::StoreVectorElement,
            vec![Some(ptr), Some(index), Some(value)],
            &[],
        );
        self.emit(inst)
    }

    // Computation.

    pub fn binary(&mut self, op: BinaryOp, ty: TypeId, lhs: ValueId, rhs: ValueId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Binary(op), vec![Some(lhs), Some(rhs)], &[ty]);
        self.emit(inst)
    }

    fn arith(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> InstId {
        let ty = self.module.value_ty(lhs);
        self.binary(op, ty, lhs, rhs)
    }

    fn compare(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> InstId {
        let bool_ = self.module.types.bool_();
        let lhs_ty = self.module.value_ty(lhs);
        let ty = self.module.types.match_width(bool_, lhs_ty);
        self.binary(op, ty, lhs, rhs)
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::Add, lhs, rhs)
    }
    pub fn subtract(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::Sub, lhs, rhs)
    }
    pub fn multiply(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::Mul, lhs, rhs)
    }
    pub fn divide(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::Div, lhs, rhs)
    }
    pub fn modulo(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::Mod, lhs, rhs)
    }
    pub fn and_(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::And, lhs, rhs)
    }
    pub fn or_(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::Or, lhs, rhs)
    }
    pub fn shift_left(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::ShiftLeft, lhs, rhs)
    }
    pub fn shift_right(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.arith(BinaryOp::ShiftRight, lhs, rhs)
    }
    pub fn equal(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.compare(BinaryOp::Equal, lhs, rhs)
    }
    pub fn not_equal(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.compare(BinaryOp::NotEqual, lhs, rhs)
    }
    pub fn less_than(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.compare(BinaryOp::LessThan, lhs, rhs)
    }
    pub fn greater_than_equal(&mut self, lhs: ValueId, rhs: ValueId) -> InstId {
        self.compare(BinaryOp::GreaterThanEqual, lhs, rhs)
    }

    pub fn unary(&mut self, op: UnaryOp, ty: TypeId, value: ValueId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Unary(op), vec![Some(value)], &[ty]);
        self.emit(inst)
    }

    pub fn not(&mut self, value: ValueId) -> InstId {
        let ty = self.module.value_ty(value);
        self.unary(UnaryOp::Not, ty, value)
    }

    pub fn convert(&mut self, ty: TypeId, value: ValueId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Convert, vec![Some(value)], &[ty]);
        self.emit(inst)
    }

    pub fn bitcast(&mut self, ty: TypeId, value: ValueId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Bitcast, vec![Some(value)], &[ty]);
        self.emit(inst)
    }

    /// `value`, converted to `ty` when its type differs.
    pub fn convert_if_needed(&mut self, ty: TypeId, value: ValueId) -> ValueId {
        if self.module.value_ty(value) == ty {
            value
        } else {
            let inst = self.convert(ty, value);
            self.result(inst)
        }
    }

    /// `value`, bitcast to `ty` when its type differs.
    pub fn bitcast_if_needed(&mut self, ty: TypeId, value: ValueId) -> ValueId {
        if self.module.value_ty(value) == ty {
            value
        } else {
            let inst = self.bitcast(ty, value);
            self.result(inst)
        }
    }

    pub fn construct(&mut self, ty: TypeId, args: Vec<ValueId>) -> InstId {
        let operands = args.into_iter().map(Some).collect();
        self.construct_with_undef(ty, operands)
    }

    /// Construct where some argument slots may be undef.
    pub fn construct_with_undef(&mut self, ty: TypeId, args: Vec<Option<ValueId>>) -> InstId {
        let inst = self.module.new_inst(InstKind::Construct, args, &[ty]);
        self.emit(inst)
    }

    pub fn access(&mut self, ty: TypeId, object: ValueId, indices: Vec<ValueId>) -> InstId {
        let mut operands = vec![Some(object)];
        operands.extend(indices.into_iter().map(Some));
        let inst = self.module.new_inst(InstKind::Access, operands, &[ty]);
        self.emit(inst)
    }

    /// Access with a single constant u32 index.
    pub fn access_u32(&mut self, ty: TypeId, object: ValueId, index: u32) -> InstId {
        let index = self.u32_(index);
        self.access(ty, object, vec![index])
    }

    pub fn swizzle(&mut self, ty: TypeId, object: ValueId, indices: Vec<u32>) -> InstId {
        ice_assert!(
            indices.len() <= 4 && indices.iter().all(|i| *i < 4),
            "swizzle indices out of range"
        );
        let inst = self
            .module
            .new_inst(InstKind::Swizzle { indices }, vec![Some(object)], &[ty]);
        self.emit(inst)
    }

    // Calls.

    pub fn call(&mut self, func: FuncId, args: Vec<ValueId>) -> InstId {
        let callee = self.module.function(func).value;
        let ret = self.module.function(func).return_type;
        let mut operands = vec![Some(callee)];
        operands.extend(args.into_iter().map(Some));
        let inst = self.module.new_inst(InstKind::UserCall, operands, &[ret]);
        self.emit(inst)
    }

    pub fn builtin_call(&mut self, ty: TypeId, func: BuiltinFn, args: Vec<ValueId>) -> InstId {
        let operands = args.into_iter().map(Some).collect();
        let inst = self
            .module
            .new_inst(InstKind::CoreBuiltinCall(func), operands, &[ty]);
        self.emit(inst)
    }

    pub fn member_builtin_call(
        &mut self,
        ty: TypeId,
        func: MemberBuiltinFn,
        object: ValueId,
        args: Vec<ValueId>,
    ) -> InstId {
        let mut operands = vec![Some(object)];
        operands.extend(args.into_iter().map(Some));
        let inst = self
            .module
            .new_inst(InstKind::MemberBuiltinCall(func), operands, &[ty]);
        self.emit(inst)
    }

    pub fn intrinsic_call(&mut self, ty: TypeId, intrinsic: Intrinsic, args: Vec<ValueId>) -> InstId {
        let operands = args.into_iter().map(Some).collect();
        let inst = self
            .module
            .new_inst(InstKind::IntrinsicCall(intrinsic), operands, &[ty]);
        self.emit(inst)
    }

    /// `select(false_value, true_value, cond)`.
    pub fn select(&mut self, ty: TypeId, false_value: ValueId, true_value: ValueId, cond: ValueId) -> InstId {
        self.builtin_call(ty, BuiltinFn::Select, vec![false_value, true_value, cond])
    }

    // Control flow.

    /// An `if` with two freshly-created empty branch blocks.
    pub fn if_(&mut self, cond: ValueId) -> InstId {
        let true_block = self.module.new_block();
        let false_block = self.module.new_block();
        let inst = self.module.new_inst(
            InstKind::If {
                true_block,
                false_block: Some(false_block),
            },
            vec![Some(cond)],
            &[],
        );
        self.module.set_block_parent(true_block, inst);
        self.module.set_block_parent(false_block, inst);
        self.emit(inst)
    }

    pub fn true_block(&self, if_: InstId) -> BlockId {
        match self.module.kind(if_) {
            InstKind::If { true_block, .. } => *true_block,
            _ => ice!("true_block of a non-if instruction"),
        }
    }

    pub fn false_block(&self, if_: InstId) -> BlockId {
        match self.module.kind(if_) {
            InstKind::If {
                false_block: Some(b),
                ..
            } => *b,
            _ => ice!("false_block of a non-if instruction"),
        }
    }

    /// A `switch` with no cases; add them with [`Builder::switch_case`].
    pub fn switch(&mut self, cond: ValueId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Switch { cases: Vec::new() }, vec![Some(cond)], &[]);
        self.emit(inst)
    }

    /// Append a case arm; `None` selectors match the default.
    pub fn switch_case(&mut self, switch: InstId, selectors: Vec<Option<ConstId>>) -> BlockId {
        let block = self.module.new_block();
        self.module.set_block_parent(block, switch);
        match self.module.kind(switch).clone() {
            InstKind::Switch { mut cases } => {
                cases.push(SwitchCase { selectors, block });
                self.module.set_kind(switch, InstKind::Switch { cases });
            }
            _ => ice!("switch_case on a non-switch instruction"),
        }
        block
    }

    /// A `loop` with pre-created initializer, body and continuing blocks.
    /// The body and continuing blocks are multi-in.
    pub fn loop_(&mut self) -> InstId {
        let initializer = self.module.new_block();
        let body = self.module.new_multi_in_block();
        let continuing = self.module.new_multi_in_block();
        let inst = self.module.new_inst(
            InstKind::Loop {
                initializer,
                body,
                continuing,
            },
            Vec::new(),
            &[],
        );
        self.module.set_block_parent(initializer, inst);
        self.module.set_block_parent(body, inst);
        self.module.set_block_parent(continuing, inst);
        self.emit(inst)
    }

    pub fn loop_blocks(&self, loop_: InstId) -> (BlockId, BlockId, BlockId) {
        match self.module.kind(loop_) {
            InstKind::Loop {
                initializer,
                body,
                continuing,
            } => (*initializer, *body, *continuing),
            _ => ice!("loop_blocks of a non-loop instruction"),
        }
    }

    // Terminators.

    pub fn return_(&mut self, func: FuncId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Return { func }, Vec::new(), &[]);
        self.emit(inst)
    }

    pub fn return_value(&mut self, func: FuncId, value: ValueId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::Return { func }, vec![Some(value)], &[]);
        self.emit(inst)
    }

    pub fn exit_if(&mut self, target: InstId) -> InstId {
        self.exit_if_with(target, Vec::new())
    }

    pub fn exit_if_with(&mut self, target: InstId, args: Vec<ValueId>) -> InstId {
        let operands = args.into_iter().map(Some).collect();
        let inst = self
            .module
            .new_inst(InstKind::ExitIf { target }, operands, &[]);
        self.emit(inst)
    }

    pub fn exit_switch(&mut self, target: InstId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::ExitSwitch { target }, Vec::new(), &[]);
        self.emit(inst)
    }

    pub fn exit_loop(&mut self, target: InstId) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::ExitLoop { target }, Vec::new(), &[]);
        self.emit(inst)
    }

    /// Exit the control instruction `target`, whichever kind it is.
    pub fn exit(&mut self, target: InstId, args: Vec<ValueId>) -> InstId {
        match self.module.kind(target) {
            InstKind::If { .. } => self.exit_if_with(target, args),
            InstKind::Switch { .. } => self.exit_switch(target),
            InstKind::Loop { .. } => self.exit_loop(target),
            _ => ice!("exit of a non-control instruction"),
        }
    }

    pub fn break_if(&mut self, loop_: InstId, cond: ValueId) -> InstId {
        let (_, body, _) = self.loop_blocks(loop_);
        let inst = self
            .module
            .new_inst(InstKind::BreakIf { target: loop_ }, vec![Some(cond)], &[]);
        self.module.register_inbound_branch(body, inst);
        self.emit(inst)
    }

    pub fn continue_(&mut self, loop_: InstId, args: Vec<ValueId>) -> InstId {
        let (_, _, continuing) = self.loop_blocks(loop_);
        let operands = args.into_iter().map(Some).collect();
        let inst = self
            .module
            .new_inst(InstKind::Continue { target: loop_ }, operands, &[]);
        self.module.register_inbound_branch(continuing, inst);
        self.emit(inst)
    }

    pub fn next_iteration(&mut self, loop_: InstId, args: Vec<ValueId>) -> InstId {
        let (_, body, _) = self.loop_blocks(loop_);
        let operands = args.into_iter().map(Some).collect();
        let inst = self
            .module
            .new_inst(InstKind::NextIteration { target: loop_ }, operands, &[]);
        self.module.register_inbound_branch(body, inst);
        self.emit(inst)
    }

    pub fn discard(&mut self) -> InstId {
        let inst = self.module.new_inst(InstKind::Discard, Vec::new(), &[]);
        self.emit(inst)
    }

    pub fn terminate_invocation(&mut self) -> InstId {
        let inst = self
            .module
            .new_inst(InstKind::TerminateInvocation, Vec::new(), &[]);
        self.emit(inst)
    }

    pub fn unreachable(&mut self) -> InstId {
        let inst = self.module.new_inst(InstKind::Unreachable, Vec::new(), &[]);
        self.emit(inst)
    }

    // Functions.

    pub fn function(&mut self, name: &str, return_type: TypeId) -> FuncId {
        self.module
            .new_function(name, return_type, PipelineStage::Undefined)
    }

    /// A `@compute @workgroup_size(1, 1, 1)` entry point.
    pub fn compute_function(&mut self, name: &str) -> FuncId {
        let void = self.module.types.void_();
        let func = self.module.new_function(name, void, PipelineStage::Compute);
        self.module.function_mut(func).workgroup_size = Some([1, 1, 1]);
        func
    }

    pub fn fragment_function(&mut self, name: &str) -> FuncId {
        let void = self.module.types.void_();
        self.module.new_function(name, void, PipelineStage::Fragment)
    }

    /// A detached function parameter; anchor it with
    /// [`Module::set_function_params`].
    pub fn function_param(&mut self, name: &str, ty: TypeId) -> ValueId {
        let value = self.module.new_value(
            ValueKind::FunctionParam {
                func: FuncId(u32::MAX),
                index: u32::MAX,
            },
            ty,
        );
        self.module.set_name(value, name);
        value
    }

    /// The body root block of a function.
    pub fn body(&self, func: FuncId) -> BlockId {
        self.module.function(func).block
    }

    /// A canonical counted loop over `[lo, hi)` advancing by `step`. The
    /// body callback receives the index as the loop body's block parameter.
    pub fn loop_range(
        &mut self,
        lo: ValueId,
        hi: ValueId,
        step: ValueId,
        f: impl FnOnce(&mut Self, ValueId),
    ) -> InstId {
        let u32_ = self.module.types.u32();
        let l = self.loop_();
        let (init, body, continuing) = self.loop_blocks(l);
        let idx = self.module.add_block_param(body, u32_);
        self.append_to(init, |b| {
            b.next_iteration(l, vec![lo]);
        });
        self.append_to(body, |b| {
            let done = b.greater_than_equal(idx, hi);
            let done = b.result(done);
            let if_ = b.if_(done);
            let tb = b.true_block(if_);
            b.append_to(tb, |b| {
                b.exit_loop(l);
            });
            f(b, idx);
            b.continue_(l, vec![idx]);
        });
        let next_idx = self.module.add_block_param(continuing, u32_);
        self.append_to(continuing, |b| {
            let next = b.add(next_idx, step);
            let next = b.result(next);
            b.next_iteration(l, vec![next]);
        });
        l
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_list_integrity_with_loops() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let block = b.module.new_block();
        let (l1, l2, l3, l4) = b.append_to(block, |b| {
            let l1 = b.loop_();
            let l2 = b.loop_();
            let l3 = b.loop_();
            let l4 = b.detached(|b| b.loop_());
            (l1, l2, l3, l4)
        });
        assert_eq!(m.block_len(block), 3);
        assert_eq!(m.front(block), Some(l1));
        assert_eq!(m.inst(l1).next, Some(l2));
        assert_eq!(m.inst(l2).next, Some(l3));
        assert_eq!(m.inst(l3).next, None);
        assert_eq!(m.inst(l3).prev, Some(l2));
        m.insert_before(l3, l4);
        assert_eq!(m.insts_of(block), vec![l1, l2, l4, l3]);
        assert_eq!(m.block_len(block), 4);
    }

    #[test]
    fn var_result_is_pointer() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            b.var(AddressSpace::Storage, f32, Access::Read)
        });
        let result = b.result(var);
        let ty = b.module.value_ty(result);
        assert_eq!(b.module.types.store_type(ty), Some(f32));
        assert_eq!(
            b.module.types.address_space(ty),
            Some(AddressSpace::Storage)
        );
    }

    #[test]
    fn loop_has_back_linked_blocks() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let l = b.loop_();
        let (init, body, continuing) = b.loop_blocks(l);
        assert_eq!(m.block(init).parent, Some(l));
        assert_eq!(m.block(body).parent, Some(l));
        assert_eq!(m.block(continuing).parent, Some(l));
        assert!(m.block(body).multi_in);
        assert!(m.block(continuing).multi_in);
        assert!(!m.block(init).multi_in);
    }

    #[test]
    fn loop_range_shape() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body_block = b.body(func);
        let l = b.append_to(body_block, |b| {
            let lo = b.u32_(0);
            let hi = b.u32_(4);
            let step = b.u32_(1);
            let l = b.loop_range(lo, hi, step, |_, _| {});
            b.return_(func);
            l
        });
        let (init, body, continuing) = b.loop_blocks(l);
        // Initializer jumps into the body with the start index.
        assert!(m.is_terminated(init));
        // The body receives the index as a block parameter.
        assert_eq!(m.block(body).params.len(), 1);
        assert_eq!(m.block(continuing).params.len(), 1);
        // Branches into the multi-in blocks are registered.
        assert!(!m.block(body).inbound_branches.is_empty());
        assert!(!m.block(continuing).inbound_branches.is_empty());
    }

    #[test]
    fn insertion_scopes_nest() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let block = b.module.new_block();
        b.append_to(block, |b| {
            let x = b.u32_(1);
            let first = b.let_(x);
            let second = b.let_(x);
            b.insert_before(second, |b| {
                b.let_(x);
            });
            b.insert_after(first, |b| {
                // Consecutive emissions stay in order after the anchor.
                b.let_(x);
                b.let_(x);
            });
        });
        assert_eq!(m.block_len(block), 5);
    }
}
