//! Lexical scopes used during lowering.
//!
//! Scopes form a parent-pointer tree in one arena. Every scope belongs to a
//! frame layout: the root scope owns the global frame, each function scope
//! opens a new one, and nested block scopes keep allocating from their
//! function's counters, so sibling blocks never reuse a slot.

use std::collections::HashMap;

use super::types::Type;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Global,
    Local,
}

/// A slot index qualified by the frame it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub level: Level,
    pub index: usize,
}

pub type FuncId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    /// Scalar frame slot.
    Slot(SlotRef),
    /// Heap-table slot holding an array or struct reference.
    Heap(SlotRef),
    Function(FuncId),
    /// Read-only predefined value.
    Constant(Value),
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub storage: Storage,
}

/// Slot counts for one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    pub slots: usize,
    pub heap_slots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

/// `name` is already defined in the target scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateSymbol(pub String);

#[derive(Debug)]
struct ScopeData {
    parent: Option<ScopeId>,
    frame: usize,
    symbols: HashMap<String, Symbol>,
    types: HashMap<String, Type>,
}

#[derive(Debug)]
pub struct ScopeArena {
    scopes: Vec<ScopeData>,
    layouts: Vec<FrameLayout>,
}

const GLOBAL_FRAME: usize = 0;

impl Default for ScopeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeArena {
    pub fn new() -> Self {
        Self {
            scopes: vec![ScopeData {
                parent: None,
                frame: GLOBAL_FRAME,
                symbols: HashMap::new(),
                types: HashMap::new(),
            }],
            layouts: vec![FrameLayout::default()],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// A nested block scope sharing the parent's frame.
    pub fn child(&mut self, parent: ScopeId) -> ScopeId {
        let frame = self.scopes[parent.0].frame;
        self.push(parent, frame)
    }

    /// A function scope with a fresh frame layout.
    pub fn function_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.layouts.push(FrameLayout::default());
        let frame = self.layouts.len() - 1;
        self.push(parent, frame)
    }

    fn push(&mut self, parent: ScopeId, frame: usize) -> ScopeId {
        self.scopes.push(ScopeData {
            parent: Some(parent),
            frame,
            symbols: HashMap::new(),
            types: HashMap::new(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    fn level(&self, scope: ScopeId) -> Level {
        if self.scopes[scope.0].frame == GLOBAL_FRAME {
            Level::Global
        } else {
            Level::Local
        }
    }

    pub fn is_global(&self, scope: ScopeId) -> bool {
        self.level(scope) == Level::Global
    }

    /// The layout of the frame `scope` allocates from.
    pub fn layout(&self, scope: ScopeId) -> FrameLayout {
        self.layouts[self.scopes[scope.0].frame]
    }

    fn insert(&mut self, scope: ScopeId, symbol: Symbol) -> Result<Symbol, DuplicateSymbol> {
        let symbols = &mut self.scopes[scope.0].symbols;
        if symbols.contains_key(&symbol.name) {
            return Err(DuplicateSymbol(symbol.name));
        }
        symbols.insert(symbol.name.clone(), symbol.clone());
        Ok(symbol)
    }

    /// Define a variable, allocating a scalar slot, or a heap slot for
    /// arrays and structs.
    pub fn define(&mut self, scope: ScopeId, name: &str, ty: Type) -> Result<Symbol, DuplicateSymbol> {
        if self.scopes[scope.0].symbols.contains_key(name) {
            return Err(DuplicateSymbol(name.to_string()));
        }
        let level = self.level(scope);
        let layout = &mut self.layouts[self.scopes[scope.0].frame];
        let storage = if ty.is_reference() {
            layout.heap_slots += 1;
            Storage::Heap(SlotRef {
                level,
                index: layout.heap_slots - 1,
            })
        } else {
            layout.slots += 1;
            Storage::Slot(SlotRef {
                level,
                index: layout.slots - 1,
            })
        };
        self.insert(
            scope,
            Symbol {
                name: name.to_string(),
                ty,
                storage,
            },
        )
    }

    pub fn define_function(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Type,
        id: FuncId,
    ) -> Result<Symbol, DuplicateSymbol> {
        self.insert(
            scope,
            Symbol {
                name: name.to_string(),
                ty,
                storage: Storage::Function(id),
            },
        )
    }

    pub fn define_constant(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Type,
        value: Value,
    ) -> Result<Symbol, DuplicateSymbol> {
        self.insert(
            scope,
            Symbol {
                name: name.to_string(),
                ty,
                storage: Storage::Constant(value),
            },
        )
    }

    /// Nearest-enclosing lookup.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let data = &self.scopes[id.0];
            if let Some(symbol) = data.symbols.get(name) {
                return Some(symbol);
            }
            current = data.parent;
        }
        None
    }

    /// Lookup in `scope` only, without walking the chain.
    pub fn resolve_local(&self, scope: ScopeId, name: &str) -> Option<&Symbol> {
        self.scopes[scope.0].symbols.get(name)
    }

    pub fn define_type(&mut self, scope: ScopeId, name: &str, ty: Type) {
        self.scopes[scope.0].types.insert(name.to_string(), ty);
    }

    pub fn resolve_type(&self, scope: ScopeId, name: &str) -> Option<&Type> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let data = &self.scopes[id.0];
            if let Some(ty) = data.types.get(name) {
                return Some(ty);
            }
            current = data.parent;
        }
        None
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn slot(symbol: &Symbol) -> SlotRef {
        match symbol.storage {
            Storage::Slot(s) | Storage::Heap(s) => s,
            _ => panic!("no slot"),
        }
    }

    #[test]
    fn duplicate_in_same_scope_fails() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.define(root, "x", Type::I32).unwrap();
        assert_eq!(
            arena.define(root, "x", Type::I64).unwrap_err(),
            DuplicateSymbol("x".into())
        );
    }

    #[test]
    fn shadowing_uses_a_new_slot() {
        let mut arena = ScopeArena::new();
        let func = arena.function_scope(arena.root());
        let outer = arena.define(func, "x", Type::I32).unwrap();
        let inner_scope = arena.child(func);
        let inner = arena.define(inner_scope, "x", Type::F64).unwrap();

        assert_ne!(slot(&outer), slot(&inner));
        assert_eq!(arena.resolve(inner_scope, "x").unwrap().ty, Type::F64);
        assert_eq!(arena.resolve(func, "x").unwrap().ty, Type::I32);
    }

    #[test]
    fn sibling_blocks_never_reuse_slots() {
        let mut arena = ScopeArena::new();
        let func = arena.function_scope(arena.root());
        let a = arena.child(func);
        let b = arena.child(func);
        let first = arena.define(a, "i", Type::I32).unwrap();
        let second = arena.define(b, "i", Type::I32).unwrap();
        assert_eq!(slot(&first).index, 0);
        assert_eq!(slot(&second).index, 1);
        assert_eq!(arena.layout(func), FrameLayout { slots: 2, heap_slots: 0 });
    }

    #[test]
    fn arrays_get_heap_slots_and_globals_are_global() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        let g = arena.define(root, "buf", Type::Array(Box::new(Type::I64))).unwrap();
        assert!(matches!(
            g.storage,
            Storage::Heap(SlotRef { level: Level::Global, index: 0 })
        ));

        let func = arena.function_scope(root);
        let l = arena.define(func, "n", Type::I32).unwrap();
        assert_eq!(slot(&l).level, Level::Local);
        assert_eq!(arena.resolve(func, "buf").unwrap().name, "buf");
    }

    #[test]
    fn functions_take_no_slot() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.define_function(root, "main", Type::Void, 0).unwrap();
        assert_eq!(arena.layout(root), FrameLayout::default());
        assert!(arena.define(root, "main", Type::I32).is_err());
    }

    #[test]
    fn type_aliases_follow_the_chain() {
        let mut arena = ScopeArena::new();
        let root = arena.root();
        arena.define_type(root, "word", Type::U32);
        let func = arena.function_scope(root);
        let block = arena.child(func);
        assert_eq!(arena.resolve_type(block, "word"), Some(&Type::U32));
        arena.define_type(block, "word", Type::U64);
        assert_eq!(arena.resolve_type(block, "word"), Some(&Type::U64));
        assert_eq!(arena.resolve_type(func, "word"), Some(&Type::U32));
        assert_eq!(arena.resolve_type(func, "missing"), None);
    }
}
