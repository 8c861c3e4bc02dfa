//! Lowering transforms over the WGIR module.
//!
//! Each transform validates its input against its own capability set (the
//! prologue), mutates the module in place, and leaves output validation to
//! the next pass's prologue. Pass ordering is caller-controlled through
//! [`Pipeline`].

pub mod add_empty_entry_point;
pub mod array_offset_from_immediate;
pub mod bgra8unorm_polyfill;
pub mod combine_access_instructions;
pub mod decompose_access;
pub mod demote_to_helper;
pub mod handle_matrix_arithmetic;
pub mod merge_return;
pub mod module_scope_vars;
pub mod preserve_padding;
pub mod value_to_let;

pub use add_empty_entry_point::add_empty_entry_point;
pub use array_offset_from_immediate::{array_offset_from_immediate, ArrayOffsetConfig};
pub use bgra8unorm_polyfill::bgra8unorm_polyfill;
pub use combine_access_instructions::combine_access_instructions;
pub use decompose_access::{decompose_access, DecomposeAccessOptions};
pub use demote_to_helper::demote_to_helper;
pub use handle_matrix_arithmetic::handle_matrix_arithmetic;
pub use merge_return::merge_return;
pub use module_scope_vars::module_scope_vars;
pub use preserve_padding::preserve_padding;
pub use value_to_let::value_to_let;

use wgir_core::module::Module;
use wgir_core::validate::Diagnostics;

/// Result of running a transform: `Ok` or the prologue diagnostics. When a
/// prologue fails, the module is left unchanged.
pub type TransformResult = Result<(), Diagnostics>;

type PassFn = Box<dyn Fn(&mut Module) -> TransformResult>;

/// An ordered list of named transforms.
pub struct Pipeline {
    passes: Vec<(String, PassFn)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn add(
        &mut self,
        name: &str,
        pass: impl Fn(&mut Module) -> TransformResult + 'static,
    ) -> &mut Self {
        self.passes.push((name.to_owned(), Box::new(pass)));
        self
    }

    /// Run every pass in order, stopping at the first failure.
    pub fn run(&self, module: &mut Module) -> TransformResult {
        for (name, pass) in &self.passes {
            log::debug!("running transform {}", name);
            pass(module).map_err(|diags| {
                log::debug!("transform {} refused its input", name);
                diags
            })?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use wgir_core::builder::Builder;

    #[test]
    fn pipeline_runs_passes_in_order() {
        let mut m = Module::new();
        let mut pipeline = Pipeline::new();
        pipeline
            .add("add_empty_entry_point", |m| add_empty_entry_point(m))
            .add("value_to_let", |m| value_to_let(m));
        pipeline.run(&mut m).unwrap();
        assert_eq!(m.entry_points().len(), 1);
    }

    #[test]
    fn lowering_sequence_validates_between_passes() {
        use wgir_core::ty::{Access, AddressSpace};
        use wgir_core::validate::{validate, Capabilities};

        // A fragment shader that stores, discards, and stores again; run a
        // realistic backend lowering order over it.
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        let f32 = b.module.types.f32();
        let root = b.module.root_block();
        let var = b.append_to(root, |b| {
            let var = b.var_named("out", AddressSpace::Storage, f32, Access::ReadWrite);
            b.module.set_var_binding(var, 0, 0);
            var
        });
        let out = b.result(var);
        let func = b.fragment_function("main");
        let body = b.body(func);
        b.append_to(body, |b| {
            let one = b.f32_(1.0);
            b.store(out, one);
            b.discard();
            let two = b.f32_(2.0);
            b.store(out, two);
            b.return_(func);
        });

        let mut pipeline = Pipeline::new();
        pipeline
            .add("merge_return", |m| merge_return(m))
            .add("demote_to_helper", |m| demote_to_helper(m))
            .add("decompose_access", |m| {
                decompose_access(m, &DecomposeAccessOptions::default())
            })
            .add("value_to_let", |m| value_to_let(m))
            .add("add_empty_entry_point", |m| add_empty_entry_point(m));
        pipeline.run(&mut m).unwrap();
        validate(&m, Capabilities::empty()).unwrap();

        let text = wgir_core::disasm::disassemble(&m);
        assert!(text.contains("continue_execution"));
        assert!(text.contains("array<u32, 1>"));
        assert!(!text.contains("discard"));
    }

    #[test]
    fn pipeline_stops_on_prologue_failure() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        // A function with no terminator fails every prologue.
        b.compute_function("main");
        let mut pipeline = Pipeline::new();
        pipeline.add("value_to_let", |m| value_to_let(m));
        assert!(pipeline.run(&mut m).is_err());
    }
}
