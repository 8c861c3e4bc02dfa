//! Line-oriented disassembly of a module.
//!
//! The output is deterministic for a given module and is used by tests and
//! the validate-and-dump diagnostic path. It is not a stable interchange
//! format.

use fnv::FnvHashMap as HashMap;

use crate::function::{FuncId, PipelineStage};
use crate::inst::{InstId, InstKind};
use crate::module::{BlockId, Module};
use crate::value::ValueId;

pub struct Disassembler<'m> {
    module: &'m Module,
    lines: Vec<String>,
    value_names: HashMap<ValueId, String>,
    block_names: HashMap<BlockId, String>,
    next_value: u32,
    next_block: u32,
}

/// Disassemble the whole module.
pub fn disassemble(module: &Module) -> String {
    Disassembler::new(module).run()
}

/// Disassemble a single instruction (operands rendered by name where the
/// module has them, placeholder ids otherwise).
pub fn disassemble_inst(module: &Module, inst: InstId) -> String {
    let mut d = Disassembler::new(module);
    d.prescan();
    d.inst_line(inst)
}

impl<'m> Disassembler<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            lines: Vec::new(),
            value_names: HashMap::default(),
            block_names: HashMap::default(),
            next_value: 1,
            next_block: 1,
        }
    }

    pub fn run(mut self) -> String {
        self.prescan();
        let root = self.module.root_block();
        if self.module.block_len(root) > 0 {
            let name = self.block_name(root);
            self.lines.push(format!("{}: {{  # root", name));
            for inst in self.module.insts_of(root) {
                let line = self.inst_line(inst);
                self.lines.push(format!("  {}", line));
            }
            self.lines.push("}".to_owned());
        }
        for func in self.module.functions.clone() {
            self.function(func);
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Assign stable names to every value and block, in program order.
    fn prescan(&mut self) {
        let root = self.module.root_block();
        if self.module.block_len(root) > 0 {
            self.block_name(root);
            for inst in self.module.insts_of(root) {
                for r in self.module.results(inst) {
                    self.value_name(*r);
                }
            }
        }
        for func in &self.module.functions {
            let data = self.module.function(*func);
            self.value_name(data.value);
            for p in data.params.clone() {
                self.value_name(p);
            }
            self.prescan_block(data.block);
        }
    }

    fn prescan_block(&mut self, block: BlockId) {
        self.block_name(block);
        for p in self.module.block(block).params.clone() {
            self.value_name(p);
        }
        for inst in self.module.insts_of(block) {
            for r in self.module.results(inst) {
                self.value_name(*r);
            }
            for child in self.module.kind(inst).control_blocks() {
                // Empty, parameterless blocks are not printed and take no
                // number.
                if self.module.block_len(child) > 0 || !self.module.block(child).params.is_empty()
                {
                    self.prescan_block(child);
                }
            }
        }
    }

    fn value_name(&mut self, value: ValueId) -> String {
        if let Some(name) = self.value_names.get(&value) {
            return name.clone();
        }
        let name = match self.module.name_of(value) {
            Some(n) => format!("%{}", n),
            None => format!("%{}", self.next_value),
        };
        self.next_value += 1;
        self.value_names.insert(value, name.clone());
        name
    }

    fn block_name(&mut self, block: BlockId) -> String {
        if let Some(name) = self.block_names.get(&block) {
            return name.clone();
        }
        let name = format!("$B{}", self.next_block);
        self.next_block += 1;
        self.block_names.insert(block, name.clone());
        name
    }

    fn operand_name(&mut self, inst: InstId, index: usize) -> String {
        match self.module.operand(inst, index) {
            Some(v) => self.value_ref(v),
            None => "undef".to_owned(),
        }
    }

    fn value_ref(&mut self, value: ValueId) -> String {
        if let Some(c) = self.module.as_constant(value) {
            return self.module.constants.display(&self.module.types, c);
        }
        self.value_name(value)
    }

    fn function(&mut self, func: FuncId) {
        let data = self.module.function(func);
        let fname = self.value_name(data.value);
        let mut header = format!("{} = ", fname);
        match data.stage {
            PipelineStage::Undefined => {}
            stage => header.push_str(&format!("@{} ", stage)),
        }
        if let Some([x, y, z]) = data.workgroup_size {
            header.push_str(&format!("@workgroup_size({}u, {}u, {}u) ", x, y, z));
        }
        let params: Vec<String> = data
            .params
            .clone()
            .into_iter()
            .map(|p| {
                let name = self.value_name(p);
                let ty = self.module.value_ty(p);
                format!("{}:{}", name, self.module.types.type_name(ty))
            })
            .collect();
        let ret = self.module.types.type_name(data.return_type);
        header.push_str(&format!("func({}):{} {{", params.join(", "), ret));
        self.lines.push(header);
        self.block(data.block, 1);
        self.lines.push("}".to_owned());
    }

    fn block(&mut self, block: BlockId, depth: usize) {
        let indent = "  ".repeat(depth);
        let name = self.block_name(block);
        let params = self.module.block(block).params.clone();
        if params.is_empty() {
            self.lines.push(format!("{}{}: {{", indent, name));
        } else {
            let params: Vec<String> = params
                .into_iter()
                .map(|p| {
                    let pname = self.value_name(p);
                    let ty = self.module.value_ty(p);
                    format!("{}:{}", pname, self.module.types.type_name(ty))
                })
                .collect();
            self.lines
                .push(format!("{}{} ({}): {{", indent, name, params.join(", ")));
        }
        for inst in self.module.insts_of(block) {
            let line = self.inst_line(inst);
            self.lines.push(format!("{}  {}", indent, line));
            if self.module.kind(inst).is_control() {
                for child in self.module.kind(inst).control_blocks() {
                    if self.module.block_len(child) > 0
                        || !self.module.block(child).params.is_empty()
                    {
                        self.block(child, depth + 2);
                    }
                }
                self.lines.push(format!("{}  }}", indent));
            }
        }
        self.lines.push(format!("{}}}", indent));
    }

    fn results_prefix(&mut self, inst: InstId) -> String {
        let results = self.module.results(inst).to_vec();
        if results.is_empty() {
            return String::new();
        }
        let parts: Vec<String> = results
            .into_iter()
            .map(|r| {
                let name = self.value_name(r);
                let ty = self.module.value_ty(r);
                format!("{}:{}", name, self.module.types.type_name(ty))
            })
            .collect();
        format!("{} = ", parts.join(", "))
    }

    fn operand_list(&mut self, inst: InstId, from: usize) -> String {
        let count = self.module.operands(inst).len();
        let parts: Vec<String> = (from..count).map(|i| self.operand_name(inst, i)).collect();
        parts.join(", ")
    }

    fn inst_line(&mut self, inst: InstId) -> String {
        let prefix = self.results_prefix(inst);
        let kind = self.module.kind(inst).clone();
        let body = match &kind {
            InstKind::Var { binding, .. } => {
                let init = self.operand_name(inst, 0);
                let mut s = format!("var {}", init);
                if let Some(bp) = binding {
                    s.push_str(&format!(" @binding_point({}, {})", bp.group, bp.binding));
                }
                s
            }
            InstKind::Swizzle { indices } => {
                let obj = self.operand_name(inst, 0);
                let mut sw = String::new();
                for i in indices {
                    sw.push(['x', 'y', 'z', 'w'][*i as usize]);
                }
                format!("swizzle {}, {}", obj, sw)
            }
            InstKind::UserCall => {
                let callee = self.operand_name(inst, 0);
                let args = self.operand_list(inst, 1);
                if args.is_empty() {
                    format!("call {}", callee)
                } else {
                    format!("call {}, {}", callee, args)
                }
            }
            InstKind::MemberBuiltinCall(f) => {
                let obj = self.operand_name(inst, 0);
                let args = self.operand_list(inst, 1);
                if args.is_empty() {
                    format!("{}.{}", obj, f.name())
                } else {
                    format!("{}.{} {}", obj, f.name(), args)
                }
            }
            InstKind::If { true_block, false_block } => {
                let cond = self.operand_name(inst, 0);
                let t = self.block_name(*true_block);
                let mut s = format!("if {} [t: {}", cond, t);
                if let Some(fb) = false_block {
                    if self.module.block_len(*fb) > 0 {
                        let f = self.block_name(*fb);
                        s.push_str(&format!(", f: {}", f));
                    }
                }
                s.push_str("] {");
                s
            }
            InstKind::Switch { cases } => {
                let cond = self.operand_name(inst, 0);
                let mut arms = Vec::new();
                for case in cases {
                    let sels: Vec<String> = case
                        .selectors
                        .iter()
                        .map(|s| match s {
                            Some(c) => self.module.constants.display(&self.module.types, *c),
                            None => "default".to_owned(),
                        })
                        .collect();
                    let b = self.block_name(case.block);
                    arms.push(format!("c: ({}, {})", sels.join(" "), b));
                }
                format!("switch {} [{}] {{", cond, arms.join(", "))
            }
            InstKind::Loop {
                initializer,
                body,
                continuing,
            } => {
                let mut parts = Vec::new();
                if self.module.block_len(*initializer) > 0 {
                    parts.push(format!("i: {}", self.block_name(*initializer)));
                }
                parts.push(format!("b: {}", self.block_name(*body)));
                if self.module.block_len(*continuing) > 0 {
                    parts.push(format!("c: {}", self.block_name(*continuing)));
                }
                format!("loop [{}] {{", parts.join(", "))
            }
            InstKind::Return { .. } => {
                if self.module.operands(inst).is_empty() {
                    "ret".to_owned()
                } else {
                    format!("ret {}", self.operand_name(inst, 0))
                }
            }
            _ => {
                let name = kind.name();
                let args = self.operand_list(inst, 0);
                if args.is_empty() {
                    name
                } else {
                    format!("{} {}", name, args)
                }
            }
        };
        format!("{}{}", prefix, body)
    }
}
