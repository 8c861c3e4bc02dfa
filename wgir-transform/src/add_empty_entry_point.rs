//! Appends a trivial compute entry point to modules that have none, so that
//! backends always have something to emit.

use wgir_core::builder::Builder;
use wgir_core::module::Module;
use wgir_core::validate::{validate_and_dump_if_needed, Capabilities};

use crate::TransformResult;

pub fn add_empty_entry_point(module: &mut Module) -> TransformResult {
    validate_and_dump_if_needed(module, "AddEmptyEntryPoint", Capabilities::all())?;

    if !module.entry_points().is_empty() {
        return Ok(());
    }
    let mut b = Builder::new(module);
    let func = b.compute_function("unused_entry_point");
    let body = b.body(func);
    b.append_to(body, |b| {
        b.return_(func);
    });
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use wgir_core::disasm::disassemble;

    use super::*;

    #[test]
    fn empty_module_gains_an_entry_point() {
        let mut m = Module::new();
        add_empty_entry_point(&mut m).unwrap();
        let expect = "\
%unused_entry_point = @compute @workgroup_size(1u, 1u, 1u) func():void {
  $B1: {
    ret
  }
}
";
        assert_eq!(disassemble(&m), expect);
    }

    #[test]
    fn existing_entry_point_is_left_alone() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let func = b.compute_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            b.return_(func);
        });
        add_empty_entry_point(&mut m).unwrap();
        assert_eq!(m.entry_points().len(), 1);
    }

    #[test]
    fn idempotent() {
        let mut m = Module::new();
        add_empty_entry_point(&mut m).unwrap();
        let first = disassemble(&m);
        add_empty_entry_point(&mut m).unwrap();
        assert_eq!(disassemble(&m), first);
    }
}
