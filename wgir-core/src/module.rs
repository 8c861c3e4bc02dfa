//! The module: single owner of every IR object.
//!
//! Values, instructions, blocks and functions live in pools indexed by handle
//! newtypes. Dropping the module frees everything. All operand mutation goes
//! through module methods so that use-lists and operand slots stay coherent.

use fnv::FnvHashMap as HashMap;

use crate::constant::{ConstId, ConstantPool};
use crate::function::{BindingPoint, FuncId, FunctionData, PipelineStage};
use crate::inst::{Inst, InstId, InstKind};
use crate::sym::SymbolTable;
use crate::ty::{TypeId, TypeManager};
use crate::value::{ParamAttrs, Usage, ValueData, ValueId, ValueKind};
use crate::{ice, ice_assert};

/// Handle to a block in the module's block pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pool entry for a block: an intrusive doubly-linked list of instructions
/// with a maintained length.
#[derive(Debug, Default)]
pub struct BlockData {
    pub first: Option<InstId>,
    pub last: Option<InstId>,
    pub len: usize,
    /// The control instruction this block belongs to, if any.
    pub parent: Option<InstId>,
    /// The function whose body root this block is, if any.
    pub owner: Option<FuncId>,
    /// Multi-in blocks carry phi-like parameters and registered inbound
    /// branches.
    pub multi_in: bool,
    pub params: Vec<ValueId>,
    pub inbound_branches: Vec<InstId>,
}

/// The root of the IR object graph.
pub struct Module {
    pub types: TypeManager,
    pub constants: ConstantPool,
    pub symbols: SymbolTable,
    /// Functions in insertion order.
    pub functions: Vec<FuncId>,
    values: Vec<ValueData>,
    insts: Vec<Inst>,
    blocks: Vec<BlockData>,
    funcs: Vec<FunctionData>,
    root: BlockId,
    names: HashMap<ValueId, String>,
    param_attrs: HashMap<ValueId, ParamAttrs>,
    const_values: HashMap<ConstId, ValueId>,
}

impl Module {
    pub fn new() -> Self {
        let mut module = Self {
            types: TypeManager::new(),
            constants: ConstantPool::new(),
            symbols: SymbolTable::new(),
            functions: Vec::new(),
            values: Vec::new(),
            insts: Vec::new(),
            blocks: Vec::new(),
            funcs: Vec::new(),
            root: BlockId(0),
            names: HashMap::default(),
            param_attrs: HashMap::default(),
            const_values: HashMap::default(),
        };
        module.root = module.new_block();
        module
    }

    /// The root block, holding the module-scope `var` declarations.
    pub fn root_block(&self) -> BlockId {
        self.root
    }

    // Blocks.

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData::default());
        id
    }

    pub fn new_multi_in_block(&mut self) -> BlockId {
        let id = self.new_block();
        self.blocks[id.index()].multi_in = true;
        id
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.index()]
    }

    pub fn set_block_parent(&mut self, block: BlockId, parent: InstId) {
        self.blocks[block.index()].parent = Some(parent);
    }

    /// Add a phi-like parameter to a multi-in block.
    pub fn add_block_param(&mut self, block: BlockId, ty: TypeId) -> ValueId {
        ice_assert!(self.block(block).multi_in, "block params on a plain block");
        let index = self.block(block).params.len() as u32;
        let value = self.new_value(ValueKind::BlockParam { block, index }, ty);
        self.blocks[block.index()].params.push(value);
        value
    }

    /// Register a branch into a multi-in block.
    pub fn register_inbound_branch(&mut self, block: BlockId, terminator: InstId) {
        self.blocks[block.index()].inbound_branches.push(terminator);
    }

    /// Every block in the module, in creation order.
    pub fn all_blocks(&self) -> Vec<BlockId> {
        (0..self.blocks.len() as u32).map(BlockId).collect()
    }

    // Values.

    pub fn new_value(&mut self, kind: ValueKind, ty: TypeId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            kind,
            ty,
            uses: Vec::new(),
        });
        id
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn value_ty(&self, id: ValueId) -> TypeId {
        self.values[id.index()].ty
    }

    pub fn set_value_ty(&mut self, id: ValueId, ty: TypeId) {
        self.values[id.index()].ty = ty;
    }

    /// Uses of a value in registration order (implementation-defined).
    pub fn uses(&self, id: ValueId) -> &[Usage] {
        &self.values[id.index()].uses
    }

    /// Snapshot of the uses, sorted for deterministic iteration.
    pub fn uses_sorted(&self, id: ValueId) -> Vec<Usage> {
        let mut uses = self.values[id.index()].uses.clone();
        uses.sort();
        uses
    }

    pub fn has_uses(&self, id: ValueId) -> bool {
        !self.values[id.index()].uses.is_empty()
    }

    fn add_use(&mut self, value: ValueId, usage: Usage) {
        self.values[value.index()].uses.push(usage);
    }

    fn remove_use(&mut self, value: ValueId, usage: Usage) {
        let uses = &mut self.values[value.index()].uses;
        match uses.iter().position(|u| *u == usage) {
            Some(i) => {
                uses.remove(i);
            }
            None => ice!(
                "use {:?} not present in the use-list of value {:?}",
                usage,
                value
            ),
        }
    }

    // Constants as values.

    /// The shared value for a constant, created on first request.
    pub fn constant_value(&mut self, id: ConstId) -> ValueId {
        if let Some(v) = self.const_values.get(&id) {
            return *v;
        }
        let ty = self.constants.get(id).ty;
        let v = self.new_value(ValueKind::Constant(id), ty);
        self.const_values.insert(id, v);
        v
    }

    /// The constant behind a value, when it is one.
    pub fn as_constant(&self, value: ValueId) -> Option<ConstId> {
        match self.value(value).kind {
            ValueKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// Constant u32 behind a value, when it is one.
    pub fn const_u32(&self, value: ValueId) -> Option<u32> {
        self.as_constant(value)
            .and_then(|c| self.constants.as_u32(c))
    }

    // Instructions.

    /// Create a detached instruction. Operand uses are registered; one
    /// result value is created per entry of `result_tys`.
    pub fn new_inst(
        &mut self,
        kind: InstKind,
        operands: Vec<Option<ValueId>>,
        result_tys: &[TypeId],
    ) -> InstId {
        let id = InstId(self.insts.len() as u32);
        for (i, operand) in operands.iter().enumerate() {
            if let Some(v) = operand {
                self.add_use(
                    *v,
                    Usage {
                        inst: id,
                        operand: i as u32,
                    },
                );
            }
        }
        let results = result_tys
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                self.new_value(
                    ValueKind::InstructionResult {
                        inst: id,
                        index: index as u32,
                    },
                    *ty,
                )
            })
            .collect();
        self.insts.push(Inst {
            kind,
            block: None,
            prev: None,
            next: None,
            operands,
            results,
            dead: false,
        });
        id
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id.index()]
    }

    pub fn kind(&self, id: InstId) -> &InstKind {
        &self.insts[id.index()].kind
    }

    /// Replace the structural payload of an instruction. Operands and
    /// results are untouched.
    pub fn set_kind(&mut self, id: InstId, kind: InstKind) {
        self.insts[id.index()].kind = kind;
    }

    pub fn alive(&self, id: InstId) -> bool {
        !self.insts[id.index()].dead
    }

    pub fn results(&self, id: InstId) -> &[ValueId] {
        &self.insts[id.index()].results
    }

    pub fn inst_result(&self, id: InstId, index: usize) -> ValueId {
        match self.insts[id.index()].results.get(index) {
            Some(v) => *v,
            None => ice!("instruction {:?} has no result {}", id, index),
        }
    }

    pub fn try_inst_result(&self, id: InstId) -> Option<ValueId> {
        self.insts[id.index()].results.first().copied()
    }

    /// Add a result value to an instruction (used when a control instruction
    /// grows a value, e.g. an `if` that yields its branch value).
    pub fn add_result(&mut self, id: InstId, ty: TypeId) -> ValueId {
        let index = self.insts[id.index()].results.len() as u32;
        let value = self.new_value(ValueKind::InstructionResult { inst: id, index }, ty);
        self.insts[id.index()].results.push(value);
        value
    }

    pub fn operands(&self, id: InstId) -> &[Option<ValueId>] {
        &self.insts[id.index()].operands
    }

    pub fn operand(&self, id: InstId, index: usize) -> Option<ValueId> {
        self.insts[id.index()].operands.get(index).copied().flatten()
    }

    /// Set one operand slot, keeping use-lists coherent.
    pub fn set_operand(&mut self, id: InstId, index: usize, value: Option<ValueId>) {
        let usage = Usage {
            inst: id,
            operand: index as u32,
        };
        let old = self.insts[id.index()].operands[index];
        if old == value {
            return;
        }
        if let Some(old) = old {
            self.remove_use(old, usage);
        }
        self.insts[id.index()].operands[index] = value;
        if let Some(new) = value {
            self.add_use(new, usage);
        }
    }

    /// Replace the whole operand list, keeping use-lists coherent.
    pub fn set_operands(&mut self, id: InstId, operands: Vec<Option<ValueId>>) {
        let old = std::mem::take(&mut self.insts[id.index()].operands);
        for (i, operand) in old.iter().enumerate() {
            if let Some(v) = operand {
                self.remove_use(
                    *v,
                    Usage {
                        inst: id,
                        operand: i as u32,
                    },
                );
            }
        }
        for (i, operand) in operands.iter().enumerate() {
            if let Some(v) = operand {
                self.add_use(
                    *v,
                    Usage {
                        inst: id,
                        operand: i as u32,
                    },
                );
            }
        }
        self.insts[id.index()].operands = operands;
    }

    /// Append an operand slot.
    pub fn push_operand(&mut self, id: InstId, value: Option<ValueId>) {
        let index = self.insts[id.index()].operands.len();
        self.insts[id.index()].operands.push(None);
        self.set_operand(id, index, value);
    }

    /// Point every consumer of `old` at `new`.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let uses = self.uses_sorted(old);
        for u in uses {
            self.set_operand(u.inst, u.operand as usize, Some(new));
        }
    }

    /// Visit every use of `value`. Iteration order is unspecified; mutation
    /// during the walk is allowed only through the callback's returned
    /// replacement (building the replacement value, e.g. inserting the
    /// instruction that produces it, counts). Returning `None` leaves the
    /// visited operand slot untouched.
    pub fn for_each_use<F>(&mut self, value: ValueId, mut f: F)
    where
        F: FnMut(&mut Module, Usage) -> Option<ValueId>,
    {
        let uses = self.uses_sorted(value);
        for u in uses {
            if let Some(new) = f(self, u) {
                self.set_operand(u.inst, u.operand as usize, Some(new));
            }
        }
    }

    /// Per-use substitution: `f` decides the replacement for each use.
    pub fn replace_uses_with_fn<F>(&mut self, old: ValueId, mut f: F)
    where
        F: FnMut(&mut Module, Usage) -> ValueId,
    {
        self.for_each_use(old, |m, u| Some(f(m, u)));
    }

    // Block list operations.

    pub fn append(&mut self, block: BlockId, inst: InstId) {
        self.check_detached(inst);
        let last = self.blocks[block.index()].last;
        match last {
            Some(last) => {
                self.insts[last.index()].next = Some(inst);
                self.insts[inst.index()].prev = Some(last);
            }
            None => self.blocks[block.index()].first = Some(inst),
        }
        self.blocks[block.index()].last = Some(inst);
        self.blocks[block.index()].len += 1;
        self.insts[inst.index()].block = Some(block);
    }

    pub fn prepend(&mut self, block: BlockId, inst: InstId) {
        self.check_detached(inst);
        let first = self.blocks[block.index()].first;
        match first {
            Some(first) => {
                self.insts[first.index()].prev = Some(inst);
                self.insts[inst.index()].next = Some(first);
            }
            None => self.blocks[block.index()].last = Some(inst),
        }
        self.blocks[block.index()].first = Some(inst);
        self.blocks[block.index()].len += 1;
        self.insts[inst.index()].block = Some(block);
    }

    /// Insert `inst` immediately before `anchor`. `anchor` must be attached,
    /// `inst` detached.
    pub fn insert_before(&mut self, anchor: InstId, inst: InstId) {
        self.check_detached(inst);
        let block = match self.insts[anchor.index()].block {
            Some(b) => b,
            None => ice!("insert_before anchor is not in a block"),
        };
        let prev = self.insts[anchor.index()].prev;
        self.insts[inst.index()].prev = prev;
        self.insts[inst.index()].next = Some(anchor);
        self.insts[anchor.index()].prev = Some(inst);
        match prev {
            Some(prev) => self.insts[prev.index()].next = Some(inst),
            None => self.blocks[block.index()].first = Some(inst),
        }
        self.blocks[block.index()].len += 1;
        self.insts[inst.index()].block = Some(block);
    }

    /// Insert `inst` immediately after `anchor`. `anchor` must be attached,
    /// `inst` detached.
    pub fn insert_after(&mut self, anchor: InstId, inst: InstId) {
        self.check_detached(inst);
        let block = match self.insts[anchor.index()].block {
            Some(b) => b,
            None => ice!("insert_after anchor is not in a block"),
        };
        let next = self.insts[anchor.index()].next;
        self.insts[inst.index()].next = next;
        self.insts[inst.index()].prev = Some(anchor);
        self.insts[anchor.index()].next = Some(inst);
        match next {
            Some(next) => self.insts[next.index()].prev = Some(inst),
            None => self.blocks[block.index()].last = Some(inst),
        }
        self.blocks[block.index()].len += 1;
        self.insts[inst.index()].block = Some(block);
    }

    /// Put `inst` in `target`'s position and detach `target`. Use-lists are
    /// not rewritten; callers decide whether to rewrite or destroy `target`.
    pub fn replace(&mut self, target: InstId, inst: InstId) {
        self.check_detached(inst);
        ice_assert!(
            self.insts[target.index()].block.is_some(),
            "replace target is not in a block"
        );
        self.insert_before(target, inst);
        self.remove(target);
    }

    /// Detach `inst` from its block without destroying it.
    pub fn remove(&mut self, inst: InstId) {
        let block = match self.insts[inst.index()].block {
            Some(b) => b,
            None => ice!("removing an instruction that is not in a block"),
        };
        let prev = self.insts[inst.index()].prev;
        let next = self.insts[inst.index()].next;
        match prev {
            Some(prev) => self.insts[prev.index()].next = next,
            None => self.blocks[block.index()].first = next,
        }
        match next {
            Some(next) => self.insts[next.index()].prev = prev,
            None => self.blocks[block.index()].last = prev,
        }
        self.blocks[block.index()].len -= 1;
        let i = &mut self.insts[inst.index()];
        i.block = None;
        i.prev = None;
        i.next = None;
    }

    fn check_detached(&self, inst: InstId) {
        ice_assert!(self.alive(inst), "inserting a destroyed instruction");
        ice_assert!(
            self.insts[inst.index()].block.is_none(),
            "inserting an instruction that is already in a block"
        );
    }

    pub fn block_len(&self, block: BlockId) -> usize {
        self.blocks[block.index()].len
    }

    pub fn front(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block.index()].first
    }

    pub fn back(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block.index()].last
    }

    /// The block's terminator, when the block is terminated.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        self.blocks[block.index()]
            .last
            .filter(|last| self.insts[last.index()].kind.is_terminator())
    }

    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.terminator(block).is_some()
    }

    /// Snapshot of the block's instructions in list order.
    pub fn insts_of(&self, block: BlockId) -> Vec<InstId> {
        let mut out = Vec::with_capacity(self.blocks[block.index()].len);
        let mut cursor = self.blocks[block.index()].first;
        while let Some(i) = cursor {
            out.push(i);
            cursor = self.insts[i.index()].next;
        }
        out
    }

    /// Destroy an instruction: detach it from its block, unregister its
    /// operand uses and mark it dead. The instruction's results must have no
    /// remaining users.
    pub fn destroy(&mut self, inst: InstId) {
        ice_assert!(self.alive(inst), "destroying an already-dead instruction");
        for result in self.insts[inst.index()].results.clone() {
            ice_assert!(
                !self.has_uses(result),
                "destroying an instruction whose result still has users"
            );
        }
        if self.insts[inst.index()].block.is_some() {
            self.remove(inst);
        }
        let operands = std::mem::take(&mut self.insts[inst.index()].operands);
        for (i, operand) in operands.iter().enumerate() {
            if let Some(v) = operand {
                self.remove_use(
                    *v,
                    Usage {
                        inst,
                        operand: i as u32,
                    },
                );
            }
        }
        self.insts[inst.index()].dead = true;
    }

    /// Every value in the pool, in creation order.
    pub fn all_values(&self) -> Vec<ValueId> {
        (0..self.values.len() as u32).map(ValueId).collect()
    }

    /// Every live instruction, in pool (creation) order.
    pub fn instructions(&self) -> Vec<InstId> {
        (0..self.insts.len() as u32)
            .map(InstId)
            .filter(|i| self.alive(*i))
            .collect()
    }

    // Functions.

    /// Create a function and append it to the module's function list.
    /// The function value's type is the return type.
    pub fn new_function(&mut self, name: &str, return_type: TypeId, stage: PipelineStage) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        let value = self.new_value(ValueKind::Function(id), return_type);
        let block = self.new_block();
        self.blocks[block.index()].owner = Some(id);
        self.funcs.push(FunctionData {
            value,
            return_type,
            stage,
            workgroup_size: None,
            params: Vec::new(),
            block,
            return_builtin: None,
            return_location: None,
            return_invariant: false,
        });
        self.functions.push(id);
        let unique = self.symbols.register(name);
        self.names.insert(value, unique);
        id
    }

    pub fn function(&self, id: FuncId) -> &FunctionData {
        &self.funcs[id.index()]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut FunctionData {
        &mut self.funcs[id.index()]
    }

    /// Replace the parameter list, re-anchoring each value's owner and index.
    pub fn set_function_params(&mut self, func: FuncId, params: Vec<ValueId>) {
        for (index, param) in params.iter().enumerate() {
            self.values[param.index()].kind = ValueKind::FunctionParam {
                func,
                index: index as u32,
            };
        }
        self.funcs[func.index()].params = params;
    }

    /// Append one parameter.
    pub fn append_function_param(&mut self, func: FuncId, param: ValueId) {
        let mut params = self.funcs[func.index()].params.clone();
        params.push(param);
        self.set_function_params(func, params);
    }

    /// Functions with a defined pipeline stage.
    pub fn entry_points(&self) -> Vec<FuncId> {
        self.functions
            .iter()
            .copied()
            .filter(|f| self.function(*f).is_entry_point())
            .collect()
    }

    /// The function containing an instruction, walking block parents up to a
    /// function root block.
    pub fn containing_function(&self, inst: InstId) -> Option<FuncId> {
        let mut block = self.insts[inst.index()].block?;
        loop {
            let data = self.block(block);
            if let Some(owner) = data.owner {
                return Some(owner);
            }
            let parent = data.parent?;
            block = self.insts[parent.index()].block?;
        }
    }

    // Names.

    pub fn name_of(&self, value: ValueId) -> Option<&str> {
        self.names.get(&value).map(|s| s.as_str())
    }

    pub fn set_name(&mut self, value: ValueId, name: &str) {
        let unique = self.symbols.register(name);
        self.names.insert(value, unique);
    }

    /// Move an already-registered name onto a value without re-uniquifying.
    pub fn set_name_raw(&mut self, value: ValueId, name: String) {
        self.names.insert(value, name);
    }

    pub fn clear_name(&mut self, value: ValueId) -> Option<String> {
        self.names.remove(&value)
    }

    // Parameter attributes.

    pub fn param_attrs(&self, value: ValueId) -> Option<&ParamAttrs> {
        self.param_attrs.get(&value)
    }

    pub fn param_attrs_mut(&mut self, value: ValueId) -> &mut ParamAttrs {
        self.param_attrs.entry(value).or_default()
    }

    /// Binding point of a `var` instruction.
    pub fn var_binding(&self, var: InstId) -> Option<BindingPoint> {
        match &self.insts[var.index()].kind {
            InstKind::Var { binding, .. } => *binding,
            _ => None,
        }
    }

    pub fn set_var_binding(&mut self, var: InstId, group: u32, binding: u32) {
        match &mut self.insts[var.index()].kind {
            InstKind::Var { binding: b, .. } => *b = Some(BindingPoint { group, binding }),
            _ => ice!("set_var_binding on a non-var instruction"),
        }
    }

    /// Initializer operand of a `var` instruction.
    pub fn var_initializer(&self, var: InstId) -> Option<ValueId> {
        self.operand(var, 0)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::inst::InstKind;

    fn plain_inst(module: &mut Module) -> InstId {
        module.new_inst(InstKind::Unreachable, Vec::new(), &[])
    }

    #[test]
    fn append_links_and_counts() {
        let mut m = Module::new();
        let b = m.new_block();
        let i1 = plain_inst(&mut m);
        let i2 = plain_inst(&mut m);
        let i3 = plain_inst(&mut m);
        m.append(b, i1);
        m.append(b, i2);
        m.append(b, i3);
        assert_eq!(m.block_len(b), 3);
        assert_eq!(m.front(b), Some(i1));
        assert_eq!(m.back(b), Some(i3));
        assert_eq!(m.inst(i1).next, Some(i2));
        assert_eq!(m.inst(i2).next, Some(i3));
        assert_eq!(m.inst(i3).next, None);
        assert_eq!(m.inst(i3).prev, Some(i2));
        assert_eq!(m.inst(i1).prev, None);
        for i in [i1, i2, i3] {
            assert_eq!(m.inst(i).block, Some(b));
        }
    }

    #[test]
    fn insert_before_anchor() {
        let mut m = Module::new();
        let b = m.new_block();
        let i1 = plain_inst(&mut m);
        let i2 = plain_inst(&mut m);
        let i3 = plain_inst(&mut m);
        let i4 = plain_inst(&mut m);
        m.append(b, i1);
        m.append(b, i2);
        m.append(b, i3);
        m.insert_before(i3, i4);
        assert_eq!(m.insts_of(b), vec![i1, i2, i4, i3]);
        assert_eq!(m.block_len(b), 4);
    }

    #[test]
    fn prepend_and_remove() {
        let mut m = Module::new();
        let b = m.new_block();
        let i1 = plain_inst(&mut m);
        let i2 = plain_inst(&mut m);
        m.append(b, i1);
        m.prepend(b, i2);
        assert_eq!(m.insts_of(b), vec![i2, i1]);
        m.remove(i2);
        assert_eq!(m.insts_of(b), vec![i1]);
        assert_eq!(m.inst(i2).block, None);
        assert_eq!(m.block_len(b), 1);
        // A removed instruction is still alive and can be re-inserted.
        assert!(m.alive(i2));
        m.append(b, i2);
        assert_eq!(m.insts_of(b), vec![i1, i2]);
    }

    #[test]
    fn replace_swaps_in_place() {
        let mut m = Module::new();
        let b = m.new_block();
        let i1 = plain_inst(&mut m);
        let i2 = plain_inst(&mut m);
        let i3 = plain_inst(&mut m);
        let new = plain_inst(&mut m);
        m.append(b, i1);
        m.append(b, i2);
        m.append(b, i3);
        m.replace(i2, new);
        assert_eq!(m.insts_of(b), vec![i1, new, i3]);
        assert_eq!(m.inst(i2).block, None);
    }

    #[test]
    #[should_panic(expected = "already in a block")]
    fn inserting_attached_instruction_ices() {
        let mut m = Module::new();
        let b1 = m.new_block();
        let b2 = m.new_block();
        let i = plain_inst(&mut m);
        m.append(b1, i);
        m.append(b2, i);
    }

    #[test]
    #[should_panic(expected = "not in a block")]
    fn removing_detached_instruction_ices() {
        let mut m = Module::new();
        let i = plain_inst(&mut m);
        m.remove(i);
    }

    #[test]
    fn operand_mutation_keeps_use_lists_coherent() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let c0 = m.constants.u32(&mut m.types, 0);
        let c1 = m.constants.u32(&mut m.types, 1);
        let v0 = m.constant_value(c0);
        let v1 = m.constant_value(c1);
        let inst = m.new_inst(InstKind::Let, vec![Some(v0)], &[u32_]);
        assert_eq!(m.uses(v0), &[Usage { inst, operand: 0 }]);
        m.set_operand(inst, 0, Some(v1));
        assert!(m.uses(v0).is_empty());
        assert_eq!(m.uses(v1), &[Usage { inst, operand: 0 }]);
    }

    #[test]
    fn replace_all_uses_with_rewrites_every_consumer() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let c0 = m.constants.u32(&mut m.types, 0);
        let c1 = m.constants.u32(&mut m.types, 1);
        let v0 = m.constant_value(c0);
        let v1 = m.constant_value(c1);
        let a = m.new_inst(InstKind::Let, vec![Some(v0)], &[u32_]);
        let b = m.new_inst(InstKind::Let, vec![Some(v0)], &[u32_]);
        m.replace_all_uses_with(v0, v1);
        assert!(m.uses(v0).is_empty());
        assert_eq!(m.operand(a, 0), Some(v1));
        assert_eq!(m.operand(b, 0), Some(v1));
        assert_eq!(m.uses(v1).len(), 2);
    }

    #[test]
    fn for_each_use_replaces_only_through_the_callback() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let c0 = m.constants.u32(&mut m.types, 0);
        let c1 = m.constants.u32(&mut m.types, 1);
        let v0 = m.constant_value(c0);
        let v1 = m.constant_value(c1);
        let a = m.new_inst(InstKind::Let, vec![Some(v0)], &[u32_]);
        let b = m.new_inst(
            InstKind::Binary(crate::inst::BinaryOp::Add),
            vec![Some(v0), Some(v0)],
            &[u32_],
        );
        let mut visited = 0;
        m.for_each_use(v0, |m, use_| {
            visited += 1;
            if use_.inst == a {
                Some(m.constant_value(c1))
            } else {
                None
            }
        });
        assert_eq!(visited, 3);
        assert_eq!(m.operand(a, 0), Some(v1));
        // Slots where the callback declined keep the original value.
        assert_eq!(m.operand(b, 0), Some(v0));
        assert_eq!(m.operand(b, 1), Some(v0));
        assert_eq!(m.uses(v0).len(), 2);
        assert_eq!(m.uses(v1), &[Usage { inst: a, operand: 0 }]);
    }

    #[test]
    fn per_use_replacement_preserves_slot_identity() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let c0 = m.constants.u32(&mut m.types, 0);
        let v0 = m.constant_value(c0);
        let a = m.new_inst(InstKind::Let, vec![Some(v0)], &[u32_]);
        let b = m.new_inst(InstKind::Binary(crate::inst::BinaryOp::Add), vec![Some(v0), Some(v0)], &[u32_]);
        let c1 = m.constants.u32(&mut m.types, 1);
        let c2 = m.constants.u32(&mut m.types, 2);
        m.replace_uses_with_fn(v0, |m, use_| {
            // Different replacement per operand slot.
            let c = if use_.operand == 0 { c1 } else { c2 };
            m.constant_value(c)
        });
        assert!(m.uses(v0).is_empty());
        assert_eq!(m.operand(a, 0), Some(m.constant_value(c1)));
        assert_eq!(m.operand(b, 0), Some(m.constant_value(c1)));
        assert_eq!(m.operand(b, 1), Some(m.constant_value(c2)));
    }

    #[test]
    fn destroy_unregisters_operand_uses() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let c0 = m.constants.u32(&mut m.types, 0);
        let v0 = m.constant_value(c0);
        let b = m.new_block();
        let inst = m.new_inst(InstKind::Let, vec![Some(v0)], &[u32_]);
        m.append(b, inst);
        m.destroy(inst);
        assert!(!m.alive(inst));
        assert!(m.uses(v0).is_empty());
        assert_eq!(m.block_len(b), 0);
    }

    #[test]
    #[should_panic(expected = "still has users")]
    fn destroying_used_instruction_ices() {
        let mut m = Module::new();
        let u32_ = m.types.u32();
        let c0 = m.constants.u32(&mut m.types, 0);
        let v0 = m.constant_value(c0);
        let a = m.new_inst(InstKind::Let, vec![Some(v0)], &[u32_]);
        let r = m.inst_result(a, 0);
        let _b = m.new_inst(InstKind::Let, vec![Some(r)], &[u32_]);
        m.destroy(a);
    }
}
