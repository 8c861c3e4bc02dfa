//! Lowers matrix arithmetic to operations backends can emit directly.
//!
//! Addition and subtraction decompose into per-column vector operations.
//! Multiplication becomes a target intrinsic call. Matrix conversion is
//! rebuilt column by column.

use wgir_core::builder::Builder;
use wgir_core::inst::{BinaryOp, InstId, InstKind, Intrinsic};
use wgir_core::module::Module;
use wgir_core::ty::Type;
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};
use wgir_core::value::ValueId;
use wgir_core::ice;

use crate::TransformResult;

pub fn handle_matrix_arithmetic(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "HandleMatrixArithmetic", Capabilities::all())?;

    // Find the instructions that need replacing before mutating anything.
    let mut binary_worklist = Vec::new();
    let mut convert_worklist = Vec::new();
    for inst in module.instructions() {
        match module.kind(inst) {
            InstKind::Binary(_) => {
                let lhs = module.operand(inst, 0);
                let rhs = module.operand(inst, 1);
                let is_matrix = |v: Option<ValueId>| {
                    v.map(|v| matches!(module.types.get(module.value_ty(v)), Type::Matrix { .. }))
                        .unwrap_or(false)
                };
                if is_matrix(lhs) || is_matrix(rhs) {
                    binary_worklist.push(inst);
                }
            }
            InstKind::Convert => {
                let result = module.inst_result(inst, 0);
                if matches!(
                    module.types.get(module.value_ty(result)),
                    Type::Matrix { .. }
                ) {
                    convert_worklist.push(inst);
                }
            }
            _ => {}
        }
    }

    let mut b = Builder::new(module);
    for inst in binary_worklist {
        replace_binary(&mut b, inst);
    }
    for inst in convert_worklist {
        replace_convert(&mut b, inst);
    }
    Ok(())
}

/// Swap `old` for `new` in place, migrating uses and any name.
fn replace_with(b: &mut Builder, old: InstId, new: InstId) {
    let old_result = b.result(old);
    let new_result = b.result(new);
    if let Some(name) = b.module.clear_name(old_result) {
        b.module.set_name_raw(new_result, name);
    }
    b.module.replace_all_uses_with(old_result, new_result);
    b.module.replace(old, new);
    b.module.destroy(old);
}

fn replace_binary(b: &mut Builder, binary: InstId) {
    let op = match b.module.kind(binary) {
        InstKind::Binary(op) => *op,
        _ => unreachable!(),
    };
    let lhs = b.module.operand(binary, 0).unwrap();
    let rhs = b.module.operand(binary, 1).unwrap();
    let lhs_ty = b.module.value_ty(lhs);
    let rhs_ty = b.module.value_ty(rhs);
    let result_ty = b.module.value_ty(b.result(binary));

    match op {
        BinaryOp::Add | BinaryOp::Sub => {
            // Per-column vector arithmetic, reassembled with a construct.
            let (columns, column_ty) = b
                .module
                .types
                .as_matrix(result_ty)
                .unwrap_or_else(|| ice!("matrix add/sub result is not a matrix"));
            let mut args = Vec::with_capacity(columns as usize);
            for col in 0..columns {
                b.insert_before(binary, |b| {
                    let lhs_col = b.access_u32(column_ty, lhs, col);
                    let lhs_col = b.result(lhs_col);
                    let rhs_col = b.access_u32(column_ty, rhs, col);
                    let rhs_col = b.result(rhs_col);
                    let op_inst = b.binary(op, column_ty, lhs_col, rhs_col);
                    args.push(b.result(op_inst));
                });
            }
            let construct = b.detached(|b| b.construct(result_ty, args));
            replace_with(b, binary, construct);
        }
        BinaryOp::Mul => {
            let lhs_is_matrix = matches!(b.module.types.get(lhs_ty), Type::Matrix { .. });
            let (intrinsic, a, c) = if lhs_is_matrix {
                match b.module.types.get(rhs_ty) {
                    Type::Matrix { .. } => (Intrinsic::MatrixTimesMatrix, lhs, rhs),
                    Type::Vector { .. } => (Intrinsic::MatrixTimesVector, lhs, rhs),
                    _ => (Intrinsic::MatrixTimesScalar, lhs, rhs),
                }
            } else {
                match b.module.types.get(lhs_ty) {
                    Type::Vector { .. } => (Intrinsic::VectorTimesMatrix, lhs, rhs),
                    // scalar * matrix: canonicalise to matrix * scalar.
                    _ => (Intrinsic::MatrixTimesScalar, rhs, lhs),
                }
            };
            let call = b.detached(|b| b.intrinsic_call(result_ty, intrinsic, vec![a, c]));
            replace_with(b, binary, call);
        }
        _ => ice!("unhandled matrix arithmetic instruction"),
    }
}

fn replace_convert(b: &mut Builder, convert: InstId) {
    let arg = b.module.operand(convert, 0).unwrap();
    let in_ty = b.module.value_ty(arg);
    let out_ty = b.module.value_ty(b.result(convert));
    let (_, in_col) = b
        .module
        .types
        .as_matrix(in_ty)
        .unwrap_or_else(|| ice!("matrix convert argument is not a matrix"));
    let (out_cols, out_col) = b.module.types.as_matrix(out_ty).unwrap();

    // Extract and convert each column separately.
    let mut args = Vec::with_capacity(out_cols as usize);
    for c in 0..out_cols {
        b.insert_before(convert, |b| {
            let col = b.access_u32(in_col, arg, c);
            let col = b.result(col);
            let new_col = b.convert(out_col, col);
            args.push(b.result(new_col));
        });
    }
    let construct = b.detached(|b| b.construct(out_ty, args));
    replace_with(b, convert, construct);
}
