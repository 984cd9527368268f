//! The host-function bridge (`ccall`).
//!
//! Host functions are modeled as a name-to-callable mapping, matching the
//! source's intent (a linked list of `{identifier, function}` pairs) while
//! using a `Vec` arena instead of pointer-linked nodes. Lookup is linear,
//! same as the original — the registry is small (a couple dozen entries)
//! and populated once at startup.

use crate::error::VmError;
use crate::vm::Vm;

/// The signature every host function implements: it pops its own arguments
/// from the guest stack and returns how many values it pushed back
/// (informational only, mirroring the original ABI).
pub type HostFn = fn(&mut Vm) -> Result<u32, VmError>;

#[derive(Default)]
pub struct HostRegistry {
    entries: Vec<(String, HostFn)>,
}

impl HostRegistry {
    pub fn new() -> Self {
        HostRegistry { entries: Vec::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, f: HostFn) {
        self.entries.push((name.into(), f));
    }

    pub fn lookup(&self, name: &str) -> Option<HostFn> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, f)| *f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_vm: &mut Vm) -> Result<u32, VmError> {
        Ok(0)
    }

    #[test]
    fn registers_and_looks_up_by_name() {
        let mut reg = HostRegistry::new();
        reg.register("noop", noop);
        assert!(reg.lookup("noop").is_some());
        assert!(reg.lookup("missing").is_none());
    }

    #[test]
    fn first_registration_wins_on_duplicate_names() {
        fn other(_vm: &mut Vm) -> Result<u32, VmError> {
            Ok(1)
        }
        let mut reg = HostRegistry::new();
        reg.register("f", noop);
        reg.register("f", other);
        let found = reg.lookup("f").unwrap();
        assert_eq!(found as usize, noop as usize);
    }
}
