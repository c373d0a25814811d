//! Lexical scope management for the Perl compiler.
//!
//! A [`PadBuilder`] tracks the scopes of one subroutine body and assigns
//! each declared `(sigil, name)` a pad slot in the emitted method. Scopes
//! also carry the current package (for unqualified-global normalization)
//! and the pragma hints (`strict`, `use integer`, `use bytes`) the emitter
//! consults when choosing operator variants.
//!
//! Lookup walks innermost to outermost; a miss means the name is a package
//! global of the scope's current package.

use perl_ast::Sigil;
use std::collections::HashMap;

/// Per-scope pragma hints, inherited by nested scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PragmaState {
    /// `strict 'vars'`: undeclared variables are compile errors
    pub strict_vars: bool,
    /// `strict 'subs'`: barewords are compile errors
    pub strict_subs: bool,
    /// `strict 'refs'`: symbolic dereference is a runtime error
    pub strict_refs: bool,
    /// `use warnings`
    pub warnings: bool,
    /// `use integer`: integer arithmetic variants
    pub use_integer: bool,
    /// `use bytes`: byte (not character) string semantics
    pub use_bytes: bool,
}

impl PragmaState {
    /// All three strict categories on (what `use strict;` does).
    pub fn all_strict() -> Self {
        Self { strict_vars: true, strict_subs: true, strict_refs: true, ..Self::default() }
    }

    /// Applies a `use`/`no` of a pragma module. Unknown modules are left to
    /// the module loader and ignored here.
    pub fn apply(&mut self, module: &str, args: &[String], is_no: bool) {
        let on = !is_no;
        match module {
            "strict" => {
                if args.is_empty() {
                    self.strict_vars = on;
                    self.strict_subs = on;
                    self.strict_refs = on;
                } else {
                    for arg in args {
                        match arg.trim_matches(|c| c == '\'' || c == '"') {
                            "vars" => self.strict_vars = on,
                            "subs" => self.strict_subs = on,
                            "refs" => self.strict_refs = on,
                            _ => {}
                        }
                    }
                }
            }
            "warnings" => self.warnings = on,
            "integer" => self.use_integer = on,
            "bytes" => self.use_bytes = on,
            _ => {}
        }
    }
}

/// How a pad binding was introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// `my`
    My,
    /// `our` - lexical alias to a package global
    Our,
    /// `state` - `my` plus once-initialization
    State,
    /// Introduced by the emitter (loop variables, temporaries)
    Implicit,
}

/// One resolved pad binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Slot index in the method pad
    pub slot: u16,
    /// Declaration kind
    pub kind: BindingKind,
    /// For `our`: the fully qualified global this slot aliases
    pub global_name: Option<String>,
    /// For `state`: the hidden boolean slot guarding first initialization
    pub guard_slot: Option<u16>,
}

#[derive(Debug, Default)]
struct Scope {
    vars: HashMap<(SigilKey, String), Binding>,
    package: Option<String>,
    pragmas: PragmaState,
}

/// Sigil namespace key. `$#a` resolves through the array namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SigilKey {
    Scalar,
    Array,
    Hash,
}

fn sigil_key(sigil: Sigil) -> SigilKey {
    match sigil {
        Sigil::Scalar => SigilKey::Scalar,
        Sigil::Array | Sigil::ArrayLast => SigilKey::Array,
        _ => SigilKey::Hash,
    }
}

/// Scope stack and slot allocator for one subroutine body.
#[derive(Debug)]
pub struct PadBuilder {
    scopes: Vec<Scope>,
    next_slot: u16,
}

impl PadBuilder {
    /// A fresh pad with one root scope carrying the given pragma state and
    /// package.
    pub fn new(package: String, pragmas: PragmaState) -> Self {
        Self {
            scopes: vec![Scope { vars: HashMap::new(), package: Some(package), pragmas }],
            next_slot: 0,
        }
    }

    /// Enters a nested scope inheriting pragmas.
    pub fn enter_scope(&mut self) {
        let pragmas = self.pragmas().clone();
        self.scopes.push(Scope { vars: HashMap::new(), package: None, pragmas });
    }

    /// Leaves the innermost scope. Slots are not recycled: every lexical
    /// keeps a distinct slot for the lifetime of the method, which keeps
    /// closure capture stable.
    pub fn exit_scope(&mut self) {
        debug_assert!(self.scopes.len() > 1, "cannot exit the root scope");
        self.scopes.pop();
    }

    /// Current nesting depth (root scope is 1).
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Allocates a raw slot without a name (emitter temporaries).
    pub fn alloc_slot(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Declares a variable in the innermost scope; returns its binding.
    /// Redeclaration in the same scope shadows by replacing the entry (and
    /// burning a fresh slot), as `my $x; my $x;` does.
    pub fn declare(&mut self, sigil: Sigil, name: &str, kind: BindingKind) -> Binding {
        let guard_slot = matches!(kind, BindingKind::State).then(|| self.alloc_slot());
        let global_name = None;
        let binding = Binding { slot: self.alloc_slot(), kind, global_name, guard_slot };
        self.innermost_mut()
            .vars
            .insert((sigil_key(sigil), name.to_string()), binding.clone());
        binding
    }

    /// Binds a name to an already-allocated slot (closure captures bind
    /// the capture slot under the captured name).
    pub fn bind_existing(&mut self, sigil: Sigil, name: &str, slot: u16, kind: BindingKind) {
        let binding = Binding { slot, kind, global_name: None, guard_slot: None };
        self.innermost_mut()
            .vars
            .insert((sigil_key(sigil), name.to_string()), binding);
    }

    /// Binds a capture in the *outermost* scope so it stays visible for
    /// the whole method body.
    pub fn bind_existing_root(&mut self, sigil: Sigil, name: &str, slot: u16, kind: BindingKind) {
        let binding = Binding { slot, kind, global_name: None, guard_slot: None };
        if let Some(root) = self.scopes.first_mut() {
            root.vars.insert((sigil_key(sigil), name.to_string()), binding);
        }
    }

    /// Declares an `our` alias to a fully qualified global.
    pub fn declare_our(&mut self, sigil: Sigil, name: &str, global_name: String) -> Binding {
        let binding = Binding {
            slot: self.alloc_slot(),
            kind: BindingKind::Our,
            global_name: Some(global_name),
            guard_slot: None,
        };
        self.innermost_mut()
            .vars
            .insert((sigil_key(sigil), name.to_string()), binding.clone());
        binding
    }

    /// Looks a name up, innermost scope outward.
    pub fn lookup(&self, sigil: Sigil, name: &str) -> Option<&Binding> {
        let key = (sigil_key(sigil), name.to_string());
        self.scopes.iter().rev().find_map(|s| s.vars.get(&key))
    }

    /// Number of slots the method prologue must allocate.
    pub fn slot_count(&self) -> u16 {
        self.next_slot
    }

    /// The package unqualified globals normalize against.
    pub fn current_package(&self) -> &str {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.package.as_deref())
            .unwrap_or("main")
    }

    /// `package NAME;` - rebinds the current scope's package.
    pub fn set_package(&mut self, name: String) {
        self.innermost_mut().package = Some(name);
    }

    /// Pragma state visible in the innermost scope.
    pub fn pragmas(&self) -> &PragmaState {
        &self
            .scopes
            .last()
            .unwrap_or_else(|| unreachable!("root scope always present"))
            .pragmas
    }

    /// Mutable pragma state of the innermost scope (`use`/`no` application).
    pub fn pragmas_mut(&mut self) -> &mut PragmaState {
        &mut self.innermost_mut().pragmas
    }

    fn innermost_mut(&mut self) -> &mut Scope {
        self.scopes
            .last_mut()
            .unwrap_or_else(|| unreachable!("root scope always present"))
    }
}

/// Normalizes a possibly-qualified name against a package.
///
/// - `x` in package `P` → `P::x`
/// - `Q::x` stays `Q::x`
/// - `::x` and punctuation variables → `main::x`
pub fn qualify(name: &str, package: &str) -> String {
    if let Some(stripped) = name.strip_prefix("::") {
        return format!("main::{stripped}");
    }
    if name.contains("::") {
        return name.to_string();
    }
    // Punctuation and control variables always live in main.
    let first = name.chars().next();
    let is_word = first.is_some_and(|c| c == '_' && name.len() > 1 || c.is_ascii_alphabetic());
    if is_word {
        format!("{package}::{name}")
    } else {
        format!("main::{name}")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn declare_and_lookup() {
        let mut pad = PadBuilder::new("main".into(), PragmaState::default());
        let b = pad.declare(Sigil::Scalar, "x", BindingKind::My);
        assert_eq!(b.slot, 0);
        assert_eq!(pad.lookup(Sigil::Scalar, "x").unwrap().slot, 0);
        // Same name, different namespace.
        assert!(pad.lookup(Sigil::Array, "x").is_none());
    }

    #[test]
    fn inner_scope_shadows_and_pops() {
        let mut pad = PadBuilder::new("main".into(), PragmaState::default());
        pad.declare(Sigil::Scalar, "x", BindingKind::My);
        pad.enter_scope();
        let inner = pad.declare(Sigil::Scalar, "x", BindingKind::My);
        assert_eq!(pad.lookup(Sigil::Scalar, "x").unwrap().slot, inner.slot);
        pad.exit_scope();
        assert_eq!(pad.lookup(Sigil::Scalar, "x").unwrap().slot, 0);
    }

    #[test]
    fn state_gets_guard_slot() {
        let mut pad = PadBuilder::new("main".into(), PragmaState::default());
        let b = pad.declare(Sigil::Scalar, "n", BindingKind::State);
        assert!(b.guard_slot.is_some());
        assert_ne!(b.guard_slot, Some(b.slot));
    }

    #[test]
    fn packages_scope_lexically() {
        let mut pad = PadBuilder::new("main".into(), PragmaState::default());
        pad.enter_scope();
        pad.set_package("Foo".into());
        assert_eq!(pad.current_package(), "Foo");
        pad.exit_scope();
        assert_eq!(pad.current_package(), "main");
    }

    #[test]
    fn pragmas_inherit_downward() {
        let mut pad = PadBuilder::new("main".into(), PragmaState::default());
        pad.pragmas_mut().apply("strict", &[], false);
        pad.enter_scope();
        assert!(pad.pragmas().strict_vars);
        pad.pragmas_mut().apply("strict", &["'refs'".into()], true);
        assert!(!pad.pragmas().strict_refs);
        pad.exit_scope();
        // no strict 'refs' was scoped to the inner block.
        assert!(pad.pragmas().strict_refs);
    }

    #[test]
    fn qualification() {
        assert_eq!(qualify("x", "main"), "main::x");
        assert_eq!(qualify("x", "Foo"), "Foo::x");
        assert_eq!(qualify("Bar::x", "Foo"), "Bar::x");
        assert_eq!(qualify("::x", "Foo"), "main::x");
        assert_eq!(qualify("_", "Foo"), "main::_");
        assert_eq!(qualify("@", "Foo"), "main::@");
        assert_eq!(qualify("_private", "Foo"), "Foo::_private");
    }
}
