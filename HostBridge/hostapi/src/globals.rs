//! Registry of global scope objects.
//!
//! The guest asks for the global object under one of four names. Names the
//! host never registered resolve to nothing, and the import returns 0.

use crate::types::{GlobalScope, HostValue};

#[derive(Debug, Clone, Default)]
pub struct Globals {
    scopes: [Option<HostValue>; 4],
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the same object under every scope name.
    pub fn with_global(value: HostValue) -> Self {
        let mut g = Self::new();
        for scope in [
            GlobalScope::Global,
            GlobalScope::GlobalThis,
            GlobalScope::SelfScope,
            GlobalScope::Window,
        ] {
            g.set(scope, value.clone());
        }
        g
    }

    pub fn set(&mut self, scope: GlobalScope, value: HostValue) {
        self.scopes[scope as usize] = Some(value);
    }

    pub fn get(&self, scope: GlobalScope) -> Option<&HostValue> {
        self.scopes[scope as usize].as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_scope_is_none() {
        let g = Globals::new();
        assert!(g.get(GlobalScope::Window).is_none());
    }

    #[test]
    fn test_set_single_scope() {
        let mut g = Globals::new();
        g.set(GlobalScope::SelfScope, HostValue::from("worker"));
        assert_eq!(g.get(GlobalScope::SelfScope).unwrap().as_str().unwrap(), "worker");
        assert!(g.get(GlobalScope::Window).is_none());
    }

    #[test]
    fn test_with_global_fills_all() {
        let g = Globals::with_global(HostValue::from("root"));
        assert!(g.get(GlobalScope::Global).is_some());
        assert!(g.get(GlobalScope::Window).is_some());
    }
}
