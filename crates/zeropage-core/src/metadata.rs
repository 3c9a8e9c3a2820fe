//! Side table of analysis facts keyed by tree index.
//!
//! Facts are attached to expressions, statements and symbols through
//! [`NodeRef`]. Every key belongs to exactly one [`KeyNamespace`], and the
//! only way to write is through a [`MetadataWriter`] bound to a namespace,
//! so one analysis cannot overwrite another analysis's facts.
//!
//! An absent key means "unknown". The typed accessors return a documented
//! default (`false`, `0`, empty set) for absent keys; readers must treat
//! those defaults conservatively.

use crate::analysis::constant_propagation::ConstValue;
use crate::analysis::expressions::Coercion;
use crate::analysis::purity::PurityLevel;
use crate::analysis::target_hints::Register;
use crate::ast::{ExprId, StmtId};
use crate::memory::MemoryRegion;
use crate::symbols::SymbolId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

static EMPTY_SYMBOLS: BTreeSet<SymbolId> = BTreeSet::new();
static EMPTY_STATEMENTS: BTreeSet<StmtId> = BTreeSet::new();

/// The tree node a fact is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRef {
    Expr(ExprId),
    Stmt(StmtId),
    Symbol(SymbolId),
}

impl From<ExprId> for NodeRef {
    fn from(id: ExprId) -> Self {
        NodeRef::Expr(id)
    }
}

impl From<StmtId> for NodeRef {
    fn from(id: StmtId) -> Self {
        NodeRef::Stmt(id)
    }
}

impl From<SymbolId> for NodeRef {
    fn from(id: SymbolId) -> Self {
        NodeRef::Symbol(id)
    }
}

/// One namespace per analysis tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyNamespace {
    ControlFlow,
    Expressions,
    Escape,
    Constants,
    ReachingDefinitions,
    Liveness,
    Alias,
    Loops,
    Usage,
    Purity,
    CallGraph,
    TargetHints,
}

/// Shape of the value a key holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Number,
    Constant,
    Symbols,
    Statements,
    Region,
    Purity,
    Register,
    Coercion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetadataKey {
    // ControlFlow
    Unreachable,
    // Expressions
    Complexity,
    Coercion,
    // Escape
    AddressTaken,
    Escapes,
    StackAllocatable,
    // Constants
    ConstantValue,
    Foldable,
    EffectivelyConstant,
    ConstantCondition,
    // ReachingDefinitions
    ReachingDefinitions,
    DefinitionCount,
    // Liveness
    LiveIn,
    LiveOut,
    LiveRangeStart,
    LiveRangeEnd,
    DeadStore,
    // Alias
    PointsTo,
    NonAlias,
    MemoryRegion,
    StaticAddress,
    SelfModifyingWrite,
    // Loops
    LoopDepth,
    LoopInvariant,
    Hoistable,
    InductionVariable,
    TripCount,
    // Usage
    ReadCount,
    WriteCount,
    HotPathAccesses,
    // Purity
    PurityLevel,
    WrittenLocations,
    ReadLocations,
    // CallGraph
    CallSiteCount,
    Unused,
    Recursive,
    TailRecursive,
    TailCall,
    // TargetHints
    ZeroPagePriority,
    RegisterAffinity,
}

impl MetadataKey {
    pub fn namespace(self) -> KeyNamespace {
        use MetadataKey as K;
        match self {
            K::Unreachable => KeyNamespace::ControlFlow,
            K::Complexity | K::Coercion => KeyNamespace::Expressions,
            K::AddressTaken | K::Escapes | K::StackAllocatable => KeyNamespace::Escape,
            K::ConstantValue | K::Foldable | K::EffectivelyConstant | K::ConstantCondition => {
                KeyNamespace::Constants
            }
            K::ReachingDefinitions | K::DefinitionCount => KeyNamespace::ReachingDefinitions,
            K::LiveIn | K::LiveOut | K::LiveRangeStart | K::LiveRangeEnd | K::DeadStore => {
                KeyNamespace::Liveness
            }
            K::PointsTo | K::NonAlias | K::MemoryRegion | K::StaticAddress | K::SelfModifyingWrite => {
                KeyNamespace::Alias
            }
            K::LoopDepth | K::LoopInvariant | K::Hoistable | K::InductionVariable | K::TripCount => {
                KeyNamespace::Loops
            }
            K::ReadCount | K::WriteCount | K::HotPathAccesses => KeyNamespace::Usage,
            K::PurityLevel | K::WrittenLocations | K::ReadLocations => KeyNamespace::Purity,
            K::CallSiteCount | K::Unused | K::Recursive | K::TailRecursive | K::TailCall => {
                KeyNamespace::CallGraph
            }
            K::ZeroPagePriority | K::RegisterAffinity => KeyNamespace::TargetHints,
        }
    }

    pub fn value_kind(self) -> ValueKind {
        use MetadataKey as K;
        match self {
            K::Unreachable | K::AddressTaken | K::Escapes | K::StackAllocatable | K::Foldable
            | K::EffectivelyConstant | K::ConstantCondition | K::DeadStore | K::SelfModifyingWrite
            | K::LoopInvariant | K::Hoistable | K::InductionVariable | K::Unused | K::Recursive
            | K::TailRecursive | K::TailCall => ValueKind::Bool,
            K::Complexity | K::DefinitionCount | K::LiveRangeStart | K::LiveRangeEnd | K::StaticAddress
            | K::LoopDepth | K::TripCount | K::ReadCount | K::WriteCount | K::HotPathAccesses
            | K::CallSiteCount | K::ZeroPagePriority => ValueKind::Number,
            K::ConstantValue => ValueKind::Constant,
            K::LiveIn | K::LiveOut | K::PointsTo | K::NonAlias | K::WrittenLocations | K::ReadLocations => {
                ValueKind::Symbols
            }
            K::ReachingDefinitions => ValueKind::Statements,
            K::MemoryRegion => ValueKind::Region,
            K::PurityLevel => ValueKind::Purity,
            K::RegisterAffinity => ValueKind::Register,
            K::Coercion => ValueKind::Coercion,
        }
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}::{:?}", self.namespace(), self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataValue {
    Bool(bool),
    Number(i64),
    Constant(ConstValue),
    Symbols(BTreeSet<SymbolId>),
    Statements(BTreeSet<StmtId>),
    Region(MemoryRegion),
    Purity(PurityLevel),
    Register(Register),
    Coercion(Coercion),
}

impl MetadataValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            MetadataValue::Bool(_) => ValueKind::Bool,
            MetadataValue::Number(_) => ValueKind::Number,
            MetadataValue::Constant(_) => ValueKind::Constant,
            MetadataValue::Symbols(_) => ValueKind::Symbols,
            MetadataValue::Statements(_) => ValueKind::Statements,
            MetadataValue::Region(_) => ValueKind::Region,
            MetadataValue::Purity(_) => ValueKind::Purity,
            MetadataValue::Register(_) => ValueKind::Register,
            MetadataValue::Coercion(_) => ValueKind::Coercion,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("{key} belongs to namespace {actual:?}, writer is bound to {writer:?}")]
    NamespaceViolation {
        key: MetadataKey,
        writer: KeyNamespace,
        actual: KeyNamespace,
    },
    #[error("{key} holds {expected:?} values, got {actual:?}")]
    ValueKindMismatch {
        key: MetadataKey,
        expected: ValueKind,
        actual: ValueKind,
    },
}

/// One fact, as returned by [`MetadataStore::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub node: NodeRef,
    pub key: MetadataKey,
    pub value: MetadataValue,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    entries: FxHashMap<NodeRef, FxHashMap<MetadataKey, MetadataValue>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer restricted to the keys of `namespace`.
    pub fn writer(&mut self, namespace: KeyNamespace) -> MetadataWriter<'_> {
        MetadataWriter {
            store: self,
            namespace,
        }
    }

    pub fn get(&self, node: impl Into<NodeRef>, key: MetadataKey) -> Option<&MetadataValue> {
        self.entries.get(&node.into()).and_then(|keys| keys.get(&key))
    }

    pub fn has(&self, node: impl Into<NodeRef>, key: MetadataKey) -> bool {
        self.get(node, key).is_some()
    }

    /// Boolean fact; absent or non-boolean reads as `false`.
    pub fn bool_or_default(&self, node: impl Into<NodeRef>, key: MetadataKey) -> bool {
        matches!(self.get(node, key), Some(MetadataValue::Bool(true)))
    }

    /// Numeric fact; absent or non-numeric reads as `0`.
    pub fn number_or_default(&self, node: impl Into<NodeRef>, key: MetadataKey) -> i64 {
        match self.get(node, key) {
            Some(MetadataValue::Number(n)) => *n,
            _ => 0,
        }
    }

    pub fn number(&self, node: impl Into<NodeRef>, key: MetadataKey) -> Option<i64> {
        match self.get(node, key) {
            Some(MetadataValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Symbol-set fact; absent reads as the empty set.
    pub fn symbols_or_empty(&self, node: impl Into<NodeRef>, key: MetadataKey) -> &BTreeSet<SymbolId> {
        match self.get(node, key) {
            Some(MetadataValue::Symbols(set)) => set,
            _ => &EMPTY_SYMBOLS,
        }
    }

    /// Statement-set fact; absent reads as the empty set.
    pub fn statements_or_empty(&self, node: impl Into<NodeRef>, key: MetadataKey) -> &BTreeSet<StmtId> {
        match self.get(node, key) {
            Some(MetadataValue::Statements(set)) => set,
            _ => &EMPTY_STATEMENTS,
        }
    }

    pub fn constant(&self, node: impl Into<NodeRef>) -> Option<ConstValue> {
        match self.get(node, MetadataKey::ConstantValue) {
            Some(MetadataValue::Constant(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn region(&self, node: impl Into<NodeRef>) -> Option<MemoryRegion> {
        match self.get(node, MetadataKey::MemoryRegion) {
            Some(MetadataValue::Region(region)) => Some(*region),
            _ => None,
        }
    }

    pub fn purity(&self, node: impl Into<NodeRef>) -> Option<PurityLevel> {
        match self.get(node, MetadataKey::PurityLevel) {
            Some(MetadataValue::Purity(level)) => Some(*level),
            _ => None,
        }
    }

    pub fn register(&self, node: impl Into<NodeRef>) -> Option<Register> {
        match self.get(node, MetadataKey::RegisterAffinity) {
            Some(MetadataValue::Register(register)) => Some(*register),
            _ => None,
        }
    }

    pub fn coercion(&self, node: impl Into<NodeRef>) -> Option<Coercion> {
        match self.get(node, MetadataKey::Coercion) {
            Some(MetadataValue::Coercion(coercion)) => Some(*coercion),
            _ => None,
        }
    }

    /// Number of stored facts.
    pub fn len(&self) -> usize {
        self.entries.values().map(|keys| keys.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored facts in one namespace.
    pub fn count_in(&self, namespace: KeyNamespace) -> usize {
        self.entries
            .values()
            .flat_map(|keys| keys.keys())
            .filter(|key| key.namespace() == namespace)
            .count()
    }

    /// Drop every fact of every namespace.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All facts, sorted by node then key.
    pub fn snapshot(&self) -> Vec<MetadataEntry> {
        let mut entries: Vec<MetadataEntry> = self
            .entries
            .iter()
            .flat_map(|(node, keys)| {
                keys.iter().map(move |(key, value)| MetadataEntry {
                    node: *node,
                    key: *key,
                    value: value.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| (a.node, a.key).cmp(&(b.node, b.key)));
        entries
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    fn insert(&mut self, node: NodeRef, key: MetadataKey, value: MetadataValue) {
        self.entries.entry(node).or_default().insert(key, value);
    }

    fn remove(&mut self, node: NodeRef, key: MetadataKey) -> Option<MetadataValue> {
        let keys = self.entries.get_mut(&node)?;
        let removed = keys.remove(&key);
        if keys.is_empty() {
            self.entries.remove(&node);
        }
        removed
    }
}

/// Write access to one namespace of a [`MetadataStore`].
pub struct MetadataWriter<'a> {
    store: &'a mut MetadataStore,
    namespace: KeyNamespace,
}

impl MetadataWriter<'_> {
    pub fn namespace(&self) -> KeyNamespace {
        self.namespace
    }

    fn check(&self, key: MetadataKey, value: Option<&MetadataValue>) -> Result<(), MetadataError> {
        if key.namespace() != self.namespace {
            return Err(MetadataError::NamespaceViolation {
                key,
                writer: self.namespace,
                actual: key.namespace(),
            });
        }
        if let Some(value) = value {
            if value.kind() != key.value_kind() {
                return Err(MetadataError::ValueKindMismatch {
                    key,
                    expected: key.value_kind(),
                    actual: value.kind(),
                });
            }
        }
        Ok(())
    }

    pub fn set(
        &mut self,
        node: impl Into<NodeRef>,
        key: MetadataKey,
        value: MetadataValue,
    ) -> Result<(), MetadataError> {
        self.check(key, Some(&value))?;
        self.store.insert(node.into(), key, value);
        Ok(())
    }

    /// Write a batch of facts. Nothing is written unless every entry is valid.
    pub fn set_all(&mut self, entries: Vec<MetadataEntry>) -> Result<usize, MetadataError> {
        for entry in &entries {
            self.check(entry.key, Some(&entry.value))?;
        }
        let count = entries.len();
        for entry in entries {
            self.store.insert(entry.node, entry.key, entry.value);
        }
        Ok(count)
    }

    pub fn delete(
        &mut self,
        node: impl Into<NodeRef>,
        key: MetadataKey,
    ) -> Result<Option<MetadataValue>, MetadataError> {
        self.check(key, None)?;
        Ok(self.store.remove(node.into(), key))
    }

    /// Drop every fact of this writer's namespace.
    pub fn clear(&mut self) {
        let namespace = self.namespace;
        self.store.entries.retain(|_, keys| {
            keys.retain(|key, _| key.namespace() != namespace);
            !keys.is_empty()
        });
    }
}

/// Collects facts for one namespace before they are written in one batch.
#[derive(Debug, Default)]
pub struct FactBatch {
    entries: Vec<MetadataEntry>,
}

impl FactBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: impl Into<NodeRef>, key: MetadataKey, value: MetadataValue) {
        self.entries.push(MetadataEntry {
            node: node.into(),
            key,
            value,
        });
    }

    pub fn flag(&mut self, node: impl Into<NodeRef>, key: MetadataKey) {
        self.push(node, key, MetadataValue::Bool(true));
    }

    pub fn number(&mut self, node: impl Into<NodeRef>, key: MetadataKey, value: i64) {
        self.push(node, key, MetadataValue::Number(value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate and write the batch through a writer for `namespace`.
    pub fn commit(self, store: &mut MetadataStore, namespace: KeyNamespace) -> Result<usize, MetadataError> {
        store.writer(namespace).set_all(self.entries)
    }
}
