//! Scope management for variable resolution

use rustc_hash::FxHashMap;

/// How a name was introduced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    /// `var`
    Var,
    /// `let`
    Let,
    /// `const`
    Const,
    /// `function` declaration
    Function,
    /// Formal parameter
    Param,
}

impl DeclKind {
    /// Whether a later declaration of the same name in the same scope is allowed
    pub fn redeclarable(self) -> bool {
        matches!(self, Self::Var | Self::Function | Self::Param)
    }
}

/// A variable binding
#[derive(Debug, Clone)]
pub struct Binding {
    /// Local variable index
    pub index: u16,
    /// How the binding was declared
    pub kind: DeclKind,
}

/// A lexical scope
#[derive(Debug)]
pub struct Scope {
    /// Parent scope index (None for the function scope)
    pub parent: Option<usize>,
    /// Bindings in this scope
    pub bindings: FxHashMap<String, Binding>,
    /// Next local index
    pub next_local: u16,
    /// Is this a function scope
    pub is_function: bool,
}

impl Scope {
    /// Create a new scope
    pub fn new(parent: Option<usize>, is_function: bool) -> Self {
        Self {
            parent,
            bindings: FxHashMap::default(),
            next_local: 0,
            is_function,
        }
    }
}

/// Scope chain of a single function
#[derive(Debug, Default)]
pub struct ScopeChain {
    scopes: Vec<Scope>,
    current: Option<usize>,
}

impl ScopeChain {
    /// Create a new scope chain
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a new scope
    pub fn enter(&mut self, is_function: bool) {
        let idx = self.scopes.len();
        self.scopes.push(Scope::new(self.current, is_function));
        self.current = Some(idx);
    }

    /// Exit current scope
    pub fn exit(&mut self) {
        if let Some(idx) = self.current {
            self.current = self.scopes[idx].parent;
        }
    }

    /// Declare a variable, returning its local index and whether it is new.
    ///
    /// `var` and function declarations land in the function scope; `let` and
    /// `const` in the innermost block. Returns `None` on an illegal redeclaration.
    pub fn declare(&mut self, name: &str, kind: DeclKind) -> Option<(u16, bool)> {
        let function_idx = self.current_function_scope_index()?;
        let target = if matches!(kind, DeclKind::Var | DeclKind::Function) {
            function_idx
        } else {
            self.current?
        };

        if let Some(existing) = self.scopes[target].bindings.get(name) {
            if existing.kind.redeclarable() && kind.redeclarable() {
                return Some((existing.index, false));
            }
            return None;
        }

        // Local indices are allocated per function so they stay valid after
        // leaving a block.
        let index = self.scopes[function_idx].next_local;
        self.scopes[function_idx].next_local = index.checked_add(1)?;
        self.scopes[target]
            .bindings
            .insert(name.to_string(), Binding { index, kind });

        Some((index, true))
    }

    fn current_function_scope_index(&self) -> Option<usize> {
        let mut scope_idx = self.current?;
        loop {
            let scope = &self.scopes[scope_idx];
            if scope.is_function {
                return Some(scope_idx);
            }
            scope_idx = scope.parent?;
        }
    }

    /// Resolve a name declared in this function
    pub fn resolve(&self, name: &str) -> Option<&Binding> {
        let mut scope_idx = self.current?;
        loop {
            let scope = &self.scopes[scope_idx];
            if let Some(binding) = scope.bindings.get(name) {
                return Some(binding);
            }
            scope_idx = scope.parent?;
        }
    }

    /// Number of locals allocated in this function
    pub fn local_count(&self) -> u16 {
        self.current_function_scope_index()
            .map(|idx| self.scopes[idx].next_local)
            .unwrap_or(0)
    }
}

/// Result of resolving a variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedBinding {
    /// Local slot of the current function
    Local {
        /// Local index
        index: u8,
        /// Declared with `const`
        is_const: bool,
    },
    /// Global property
    Global {
        /// Property name
        name: String,
        /// Declared with top-level `const`
        is_const: bool,
    },
}

impl ResolvedBinding {
    /// Whether assignment is forbidden
    pub fn is_const(&self) -> bool {
        match self {
            Self::Local { is_const, .. } | Self::Global { is_const, .. } => *is_const,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_resolve() {
        let mut chain = ScopeChain::new();
        chain.enter(true);

        assert_eq!(chain.declare("x", DeclKind::Let), Some((0, true)));
        assert_eq!(chain.declare("y", DeclKind::Const), Some((1, true)));

        assert_eq!(chain.resolve("x").map(|b| b.index), Some(0));
        assert_eq!(chain.resolve("y").map(|b| b.kind), Some(DeclKind::Const));
        assert!(chain.resolve("z").is_none());
    }

    #[test]
    fn test_block_scope_keeps_indices() {
        let mut chain = ScopeChain::new();
        chain.enter(true);
        chain.declare("x", DeclKind::Let);

        chain.enter(false);
        assert_eq!(chain.declare("y", DeclKind::Let), Some((1, true)));
        assert_eq!(chain.declare("v", DeclKind::Var), Some((2, true)));
        chain.exit();

        assert!(chain.resolve("y").is_none());
        assert_eq!(chain.resolve("v").map(|b| b.index), Some(2));
        assert_eq!(chain.local_count(), 3);
    }

    #[test]
    fn test_redeclaration_rules() {
        let mut chain = ScopeChain::new();
        chain.enter(true);
        chain.declare("a", DeclKind::Param);
        assert_eq!(chain.declare("a", DeclKind::Var), Some((0, false)));
        chain.declare("b", DeclKind::Let);
        assert_eq!(chain.declare("b", DeclKind::Let), None);
        assert_eq!(chain.declare("b", DeclKind::Var), None);
    }
}
