//! Symbol table for collision-free identifier generation.

use fnv::FnvHashSet as HashSet;

/// Owns every identifier used by a module and guarantees uniqueness.
///
/// `register` keeps a requested name when it is still free and derives a
/// `name_1`, `name_2`, ... variant otherwise. `fresh` generates an anonymous
/// `v{n}` identifier.
#[derive(Default)]
pub struct SymbolTable {
    taken: HashSet<String>,
    next_anon: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, returning it unchanged if free, or a uniquified
    /// variant otherwise.
    pub fn register(&mut self, name: &str) -> String {
        if self.taken.insert(name.to_owned()) {
            return name.to_owned();
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}_{}", name, n);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Generate a fresh anonymous identifier.
    pub fn fresh(&mut self) -> String {
        loop {
            let candidate = format!("v{}", self.next_anon);
            self.next_anon += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Returns true if `name` has been registered.
    pub fn contains(&self, name: &str) -> bool {
        self.taken.contains(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_uniquifies() {
        let mut sym = SymbolTable::new();
        assert_eq!(sym.register("a"), "a");
        assert_eq!(sym.register("a"), "a_1");
        assert_eq!(sym.register("a"), "a_2");
        assert_eq!(sym.register("b"), "b");
    }

    #[test]
    fn fresh_avoids_registered() {
        let mut sym = SymbolTable::new();
        sym.register("v0");
        assert_eq!(sym.fresh(), "v1");
    }
}
