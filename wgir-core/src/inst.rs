//! Instructions.
//!
//! An instruction owns an ordered operand list (slots into the value pool)
//! and an ordered result list. Operand slot layout per kind:
//!
//! | kind                | operands                     |
//! |---------------------|------------------------------|
//! | Var                 | `[initializer?]`             |
//! | Let                 | `[value]`                    |
//! | Load                | `[ptr]`                      |
//! | LoadVectorElement   | `[ptr, index]`               |
//! | Store               | `[ptr, value]`               |
//! | StoreVectorElement  | `[ptr, index, value]`        |
//! | Binary              | `[lhs, rhs]`                 |
//! | Unary/Convert/Bitcast | `[value]`                  |
//! | Construct           | `[args...]` (slots may be undef) |
//! | Access              | `[object, indices...]`       |
//! | Swizzle             | `[object]`                   |
//! | UserCall            | `[callee, args...]`          |
//! | CoreBuiltinCall     | `[args...]`                  |
//! | MemberBuiltinCall   | `[object, args...]`          |
//! | IntrinsicCall       | `[args...]`                  |
//! | If / Switch         | `[cond]`                     |
//! | Return              | `[]` or `[value]`            |
//! | Exit* / NextIteration / Continue | `[args...]`     |
//! | BreakIf             | `[cond, args...]`            |

use crate::constant::ConstId;
use crate::function::{BindingPoint, FuncId};
use crate::module::BlockId;
use crate::ty::{Access, AddressSpace};
use crate::value::ValueId;

/// Handle to an instruction in the module's instruction pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl BinaryOp {
    /// Returns true when the result type is `bool` (per component) rather
    /// than the operand type.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanEqual
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::ShiftLeft => "shl",
            BinaryOp::ShiftRight => "shr",
            BinaryOp::Equal => "eq",
            BinaryOp::NotEqual => "neq",
            BinaryOp::LessThan => "lt",
            BinaryOp::LessThanEqual => "lte",
            BinaryOp::GreaterThan => "gt",
            BinaryOp::GreaterThanEqual => "gte",
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UnaryOp {
    Negate,
    Complement,
    Not,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Negate => "negate",
            UnaryOp::Complement => "complement",
            UnaryOp::Not => "not",
        }
    }
}

/// Core builtin functions modelled by the IR.
///
/// Deliberately not the full WGSL builtin catalogue; this is the set the
/// validator, the analyses and the transforms need to reason about.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BuiltinFn {
    ArrayLength,
    BufferLength,
    BufferView,
    Select,
    Min,
    Max,
    TextureLoad,
    TextureStore,
    TextureDimensions,
    AtomicLoad,
    AtomicStore,
    AtomicAdd,
    AtomicSub,
    AtomicMin,
    AtomicMax,
    AtomicAnd,
    AtomicOr,
    AtomicXor,
    AtomicExchange,
    AtomicCompareExchangeWeak,
    SubgroupMatrixLoad,
    SubgroupMatrixStore,
    SubgroupMatrixMultiply,
    SubgroupMatrixMultiplyAccumulate,
    WorkgroupBarrier,
    StorageBarrier,
}

impl BuiltinFn {
    /// True for builtins whose evaluation mutates observable state.
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            BuiltinFn::TextureStore
                | BuiltinFn::AtomicStore
                | BuiltinFn::AtomicAdd
                | BuiltinFn::AtomicSub
                | BuiltinFn::AtomicMin
                | BuiltinFn::AtomicMax
                | BuiltinFn::AtomicAnd
                | BuiltinFn::AtomicOr
                | BuiltinFn::AtomicXor
                | BuiltinFn::AtomicExchange
                | BuiltinFn::AtomicCompareExchangeWeak
                | BuiltinFn::SubgroupMatrixStore
                | BuiltinFn::WorkgroupBarrier
                | BuiltinFn::StorageBarrier
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinFn::ArrayLength => "arrayLength",
            BuiltinFn::BufferLength => "bufferLength",
            BuiltinFn::BufferView => "bufferView",
            BuiltinFn::Select => "select",
            BuiltinFn::Min => "min",
            BuiltinFn::Max => "max",
            BuiltinFn::TextureLoad => "textureLoad",
            BuiltinFn::TextureStore => "textureStore",
            BuiltinFn::TextureDimensions => "textureDimensions",
            BuiltinFn::AtomicLoad => "atomicLoad",
            BuiltinFn::AtomicStore => "atomicStore",
            BuiltinFn::AtomicAdd => "atomicAdd",
            BuiltinFn::AtomicSub => "atomicSub",
            BuiltinFn::AtomicMin => "atomicMin",
            BuiltinFn::AtomicMax => "atomicMax",
            BuiltinFn::AtomicAnd => "atomicAnd",
            BuiltinFn::AtomicOr => "atomicOr",
            BuiltinFn::AtomicXor => "atomicXor",
            BuiltinFn::AtomicExchange => "atomicExchange",
            BuiltinFn::AtomicCompareExchangeWeak => "atomicCompareExchangeWeak",
            BuiltinFn::SubgroupMatrixLoad => "subgroupMatrixLoad",
            BuiltinFn::SubgroupMatrixStore => "subgroupMatrixStore",
            BuiltinFn::SubgroupMatrixMultiply => "subgroupMatrixMultiply",
            BuiltinFn::SubgroupMatrixMultiplyAccumulate => "subgroupMatrixMultiplyAccumulate",
            BuiltinFn::WorkgroupBarrier => "workgroupBarrier",
            BuiltinFn::StorageBarrier => "storageBarrier",
        }
    }
}

/// Backend-dialect member builtins over byte-address buffers.
///
/// `Load*`/`Store*`/`Interlocked*` all take the byte offset as the first
/// argument after the object operand.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MemberBuiltinFn {
    Load,
    Load2,
    Load3,
    Load4,
    LoadF16,
    Load2F16,
    Load3F16,
    Load4F16,
    Store,
    Store2,
    Store3,
    Store4,
    StoreF16,
    Store2F16,
    Store3F16,
    Store4F16,
    InterlockedAdd,
    InterlockedMin,
    InterlockedMax,
    InterlockedAnd,
    InterlockedOr,
    InterlockedXor,
    InterlockedExchange,
    InterlockedCompareExchange,
    GetDimensions,
}

impl MemberBuiltinFn {
    /// True when the first argument after the object is a byte offset into
    /// the buffer.
    pub fn takes_byte_offset(self) -> bool {
        !matches!(self, MemberBuiltinFn::GetDimensions)
    }

    pub fn name(self) -> &'static str {
        match self {
            MemberBuiltinFn::Load => "Load",
            MemberBuiltinFn::Load2 => "Load2",
            MemberBuiltinFn::Load3 => "Load3",
            MemberBuiltinFn::Load4 => "Load4",
            MemberBuiltinFn::LoadF16 => "LoadF16",
            MemberBuiltinFn::Load2F16 => "Load2F16",
            MemberBuiltinFn::Load3F16 => "Load3F16",
            MemberBuiltinFn::Load4F16 => "Load4F16",
            MemberBuiltinFn::Store => "Store",
            MemberBuiltinFn::Store2 => "Store2",
            MemberBuiltinFn::Store3 => "Store3",
            MemberBuiltinFn::Store4 => "Store4",
            MemberBuiltinFn::StoreF16 => "StoreF16",
            MemberBuiltinFn::Store2F16 => "Store2F16",
            MemberBuiltinFn::Store3F16 => "Store3F16",
            MemberBuiltinFn::Store4F16 => "Store4F16",
            MemberBuiltinFn::InterlockedAdd => "InterlockedAdd",
            MemberBuiltinFn::InterlockedMin => "InterlockedMin",
            MemberBuiltinFn::InterlockedMax => "InterlockedMax",
            MemberBuiltinFn::InterlockedAnd => "InterlockedAnd",
            MemberBuiltinFn::InterlockedOr => "InterlockedOr",
            MemberBuiltinFn::InterlockedXor => "InterlockedXor",
            MemberBuiltinFn::InterlockedExchange => "InterlockedExchange",
            MemberBuiltinFn::InterlockedCompareExchange => "InterlockedCompareExchange",
            MemberBuiltinFn::GetDimensions => "GetDimensions",
        }
    }
}

/// Target-specific intrinsics introduced by lowering transforms.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Intrinsic {
    MatrixTimesScalar,
    MatrixTimesVector,
    VectorTimesMatrix,
    MatrixTimesMatrix,
}

impl Intrinsic {
    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::MatrixTimesScalar => "matrix_times_scalar",
            Intrinsic::MatrixTimesVector => "matrix_times_vector",
            Intrinsic::VectorTimesMatrix => "vector_times_matrix",
            Intrinsic::MatrixTimesMatrix => "matrix_times_matrix",
        }
    }
}

/// One arm of a `Switch`.
#[derive(Clone, Debug)]
pub struct SwitchCase {
    /// Selector constants; `None` is the default selector.
    pub selectors: Vec<Option<ConstId>>,
    pub block: BlockId,
}

/// The operation an instruction performs.
#[derive(Clone, Debug)]
pub enum InstKind {
    Var {
        space: AddressSpace,
        access: Access,
        binding: Option<BindingPoint>,
    },
    Let,
    Load,
    LoadVectorElement,
    Store,
    StoreVectorElement,
    Binary(BinaryOp),
    Unary(UnaryOp),
    Convert,
    Bitcast,
    Construct,
    Access,
    Swizzle {
        indices: Vec<u32>,
    },
    UserCall,
    CoreBuiltinCall(BuiltinFn),
    MemberBuiltinCall(MemberBuiltinFn),
    IntrinsicCall(Intrinsic),
    If {
        true_block: BlockId,
        false_block: Option<BlockId>,
    },
    Switch {
        cases: Vec<SwitchCase>,
    },
    Loop {
        initializer: BlockId,
        body: BlockId,
        continuing: BlockId,
    },
    Return {
        func: FuncId,
    },
    ExitIf {
        target: InstId,
    },
    ExitSwitch {
        target: InstId,
    },
    ExitLoop {
        target: InstId,
    },
    BreakIf {
        target: InstId,
    },
    Continue {
        target: InstId,
    },
    NextIteration {
        target: InstId,
    },
    Discard,
    TerminateInvocation,
    Unreachable,
}

impl InstKind {
    /// Terminators end a block and determine its outgoing edges.
    ///
    /// `Discard` is deliberately not one: execution continues after it so
    /// derivative operations stay defined, and the demotion transform
    /// rewrites it mid-block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Return { .. }
                | InstKind::ExitIf { .. }
                | InstKind::ExitSwitch { .. }
                | InstKind::ExitLoop { .. }
                | InstKind::BreakIf { .. }
                | InstKind::Continue { .. }
                | InstKind::NextIteration { .. }
                | InstKind::TerminateInvocation
                | InstKind::Unreachable
        )
    }

    /// Control instructions are structured containers of child blocks.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            InstKind::If { .. } | InstKind::Switch { .. } | InstKind::Loop { .. }
        )
    }

    /// Child blocks of a control instruction, in declaration order.
    pub fn control_blocks(&self) -> Vec<BlockId> {
        match self {
            InstKind::If {
                true_block,
                false_block,
            } => {
                let mut blocks = vec![*true_block];
                if let Some(fb) = false_block {
                    blocks.push(*fb);
                }
                blocks
            }
            InstKind::Switch { cases } => cases.iter().map(|c| c.block).collect(),
            InstKind::Loop {
                initializer,
                body,
                continuing,
            } => vec![*initializer, *body, *continuing],
            _ => Vec::new(),
        }
    }

    /// The control instruction an exit-style terminator targets.
    pub fn exit_target(&self) -> Option<InstId> {
        match self {
            InstKind::ExitIf { target }
            | InstKind::ExitSwitch { target }
            | InstKind::ExitLoop { target }
            | InstKind::BreakIf { target }
            | InstKind::Continue { target }
            | InstKind::NextIteration { target } => Some(*target),
            _ => None,
        }
    }

    /// Mnemonic used by the disassembler.
    pub fn name(&self) -> String {
        match self {
            InstKind::Var { .. } => "var".to_owned(),
            InstKind::Let => "let".to_owned(),
            InstKind::Load => "load".to_owned(),
            InstKind::LoadVectorElement => "load_vector_element".to_owned(),
            InstKind::Store => "store".to_owned(),
            InstKind::StoreVectorElement => "store_vector_element".to_owned(),
            InstKind::Binary(op) => op.name().to_owned(),
            InstKind::Unary(op) => op.name().to_owned(),
            InstKind::Convert => "convert".to_owned(),
            InstKind::Bitcast => "bitcast".to_owned(),
            InstKind::Construct => "construct".to_owned(),
            InstKind::Access => "access".to_owned(),
            InstKind::Swizzle { indices } => {
                let mut s = "swizzle ".to_owned();
                for i in indices {
                    s.push(['x', 'y', 'z', 'w'][*i as usize]);
                }
                s
            }
            InstKind::UserCall => "call".to_owned(),
            InstKind::CoreBuiltinCall(f) => f.name().to_owned(),
            InstKind::MemberBuiltinCall(f) => format!("member_call {}", f.name()),
            InstKind::IntrinsicCall(i) => i.name().to_owned(),
            InstKind::If { .. } => "if".to_owned(),
            InstKind::Switch { .. } => "switch".to_owned(),
            InstKind::Loop { .. } => "loop".to_owned(),
            InstKind::Return { .. } => "ret".to_owned(),
            InstKind::ExitIf { .. } => "exit_if".to_owned(),
            InstKind::ExitSwitch { .. } => "exit_switch".to_owned(),
            InstKind::ExitLoop { .. } => "exit_loop".to_owned(),
            InstKind::BreakIf { .. } => "break_if".to_owned(),
            InstKind::Continue { .. } => "continue".to_owned(),
            InstKind::NextIteration { .. } => "next_iteration".to_owned(),
            InstKind::Discard => "discard".to_owned(),
            InstKind::TerminateInvocation => "terminate_invocation".to_owned(),
            InstKind::Unreachable => "unreachable".to_owned(),
        }
    }
}

/// Pool entry for an instruction. Intrusive `prev`/`next` links place it in
/// its owning block's list.
#[derive(Debug)]
pub struct Inst {
    pub kind: InstKind,
    pub block: Option<BlockId>,
    pub prev: Option<InstId>,
    pub next: Option<InstId>,
    /// Operand slots. `None` is an explicit undef slot (allowed only where
    /// the kind documents it).
    pub operands: Vec<Option<ValueId>>,
    pub results: Vec<ValueId>,
    pub dead: bool,
}
