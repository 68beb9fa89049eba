//! Dynamic values and the lazy read-side containers.
//!
//! [`ReadStruct`] and [`ReadList`] hold a list of [`Entry`]s. An entry is either a realized
//! [`Value`] or a cache slot that an [`Accessor`] turns into one on first access. Resolution is
//! cached in place, so a container is mutated internally while staying read-only to callers.

use crate::{CondensedError, Result};
use indexmap::IndexSet;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Depth used by `Display`.
pub const DEFAULT_PRINT_DEPTH: usize = 8;

/// Printed in place of containers that are too deep or already on the current path.
pub const ELISION: &str = "...";

/// Resolves a deferred entry: `(entry index, cache slot) -> value`.
pub type Accessor = Rc<dyn Fn(usize, usize) -> Value>;

/// A value as written to or read from a stream.
///
/// Equality and hashing are structural. Floats compare by bit pattern, so `NaN == NaN`.
/// Struct equality ignores the type name and compares field names and values in order.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f32),
    Str(Rc<str>),
    List(Rc<ReadList>),
    Struct(Rc<ReadStruct>),
}

impl Value {
    /// Builds a realized list.
    pub fn list<I: IntoIterator<Item = Value>>(items: I) -> Value {
        Value::List(Rc::new(ReadList::new(items)))
    }

    /// Builds a realized struct record; fields are matched to struct types by name.
    pub fn record<S, I>(name: &str, fields: I) -> Value
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Value)>,
    {
        Value::Struct(Rc::new(ReadStruct::new(name, fields)))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Struct(_) => "struct",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Rc<ReadList>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Rc<ReadStruct>> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Identity of the container behind this value, if any.
    fn container_id(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(Rc::as_ptr(l) as *const () as usize),
            Value::Struct(s) => Some(Rc::as_ptr(s) as *const () as usize),
            _ => None,
        }
    }

    /// Resolves every entry reachable from this value.
    ///
    /// Containers already in `visited` are skipped, so shared or repeated containers are
    /// resolved once. Traversal uses an explicit work list and does not recurse.
    pub fn ensure_recursively_complete(&self, visited: &mut HashSet<usize>) {
        complete_recursively(vec![self.clone()], visited);
    }

    /// Renders the value, eliding containers nested deeper than `max_depth` or already on the
    /// path being printed.
    pub fn pretty(&self, max_depth: usize) -> String {
        let mut out = String::new();
        let mut path = HashSet::new();
        render(self, max_depth, &mut path, &mut out);
        out
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || **a == **b,
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(a, b) || **a == **b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::List(l) => l.hash(state),
            Value::Struct(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty(DEFAULT_PRINT_DEPTH))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(value: $t) -> Self {
                    Value::Int(i64::from(value))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::from(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::list(value)
    }
}

/// One slot of a lazy container.
#[derive(Clone, Debug)]
pub enum Entry {
    Resolved(Value),
    /// A cache slot, resolved through the container's accessor.
    Deferred(usize),
}

/// Shared plumbing of both containers: entries plus the accessor that resolves them.
struct Entries {
    entries: RefCell<Vec<Entry>>,
    accessor: Option<Accessor>,
}

impl Entries {
    fn realized(values: Vec<Value>) -> Self {
        Entries {
            entries: RefCell::new(values.into_iter().map(Entry::Resolved).collect()),
            accessor: None,
        }
    }

    fn lazy(entries: Vec<Entry>, accessor: Accessor) -> Self {
        Entries {
            entries: RefCell::new(entries),
            accessor: Some(accessor),
        }
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    fn resolve(&self, index: usize) -> Option<Value> {
        let slot = match self.entries.borrow().get(index)? {
            Entry::Resolved(value) => return Some(value.clone()),
            Entry::Deferred(slot) => *slot,
        };
        let value = match &self.accessor {
            Some(accessor) => accessor(index, slot),
            None => Value::Null,
        };
        self.entries.borrow_mut()[index] = Entry::Resolved(value.clone());
        Some(value)
    }

    fn is_resolved(&self, index: usize) -> bool {
        matches!(self.entries.borrow().get(index), Some(Entry::Resolved(_)))
    }

    fn resolve_all(&self) {
        for index in 0..self.len() {
            self.resolve(index);
        }
    }

    /// Already-resolved values only; never triggers the accessor.
    fn resolved_values(&self) -> Vec<Value> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|entry| match entry {
                Entry::Resolved(value) => Some(value.clone()),
                Entry::Deferred(_) => None,
            })
            .collect()
    }

    fn values(&self) -> Vec<Value> {
        (0..self.len()).filter_map(|i| self.resolve(i)).collect()
    }
}

/// A decoded (or caller-built) struct instance: named fields in declaration order.
pub struct ReadStruct {
    name: Rc<str>,
    fields: Rc<IndexSet<String>>,
    entries: Entries,
}

impl ReadStruct {
    /// Builds a realized struct. Later duplicates of a field name are dropped.
    pub fn new<S, I>(name: &str, fields: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Value)>,
    {
        let mut names = IndexSet::new();
        let mut values = Vec::new();
        for (field, value) in fields {
            if names.insert(field.into()) {
                values.push(value);
            }
        }
        ReadStruct {
            name: Rc::from(name),
            fields: Rc::new(names),
            entries: Entries::realized(values),
        }
    }

    /// Builds a struct whose deferred entries are resolved through `accessor`.
    ///
    /// # Errors
    /// Fails if the number of entries differs from the number of field names.
    pub fn lazy(
        name: &str,
        fields: Rc<IndexSet<String>>,
        entries: Vec<Entry>,
        accessor: Accessor,
    ) -> Result<Self> {
        if fields.len() != entries.len() {
            return Err(CondensedError::Decode(format!(
                "struct {} has {} fields but {} entries",
                name,
                fields.len(),
                entries.len()
            )));
        }
        Ok(ReadStruct {
            name: Rc::from(name),
            fields,
            entries: Entries::lazy(entries, accessor),
        })
    }

    pub(crate) fn from_parts(
        name: Rc<str>,
        fields: Rc<IndexSet<String>>,
        entries: Vec<Entry>,
        accessor: Option<Accessor>,
    ) -> Self {
        let entries = match accessor {
            Some(accessor) => Entries::lazy(entries, accessor),
            None => Entries {
                entries: RefCell::new(entries),
                accessor: None,
            },
        };
        ReadStruct {
            name,
            fields,
            entries,
        }
    }

    /// Name of the struct type this instance belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    /// Returns the field's value, resolving only that field.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.resolve(self.fields.get_index_of(name)?)
    }

    pub fn get_index(&self, index: usize) -> Option<Value> {
        self.entries.resolve(index)
    }

    pub fn is_resolved(&self, name: &str) -> bool {
        self.fields
            .get_index_of(name)
            .map_or(false, |index| self.entries.is_resolved(index))
    }

    /// All fields with their values, resolving every field.
    pub fn fields(&self) -> Vec<(&str, Value)> {
        self.field_names().zip(self.entries.values()).collect()
    }

    /// Resolves every direct field without descending into nested containers.
    pub fn ensure_complete(&self) -> &Self {
        self.entries.resolve_all();
        self
    }

    /// Resolves this struct and everything reachable from it. See
    /// [`Value::ensure_recursively_complete`].
    pub fn ensure_recursively_complete(&self, visited: &mut HashSet<usize>) -> &Self {
        let id = self as *const Self as *const () as usize;
        if visited.insert(id) {
            self.ensure_complete();
            complete_recursively(self.entries.resolved_values(), visited);
        }
        self
    }

    pub fn set(&self, _name: &str, _value: Value) -> Result<()> {
        Err(CondensedError::ReadOnly("ReadStruct::set"))
    }

    pub fn remove(&self, _name: &str) -> Result<Value> {
        Err(CondensedError::ReadOnly("ReadStruct::remove"))
    }
}

impl PartialEq for ReadStruct {
    fn eq(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().eq(other.fields.iter())
            && (0..self.fields.len()).all(|i| self.get_index(i) == other.get_index(i))
    }
}

impl Eq for ReadStruct {}

impl Hash for ReadStruct {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fields.len().hash(state);
        for (index, name) in self.fields.iter().enumerate() {
            name.hash(state);
            self.get_index(index).hash(state);
        }
    }
}

impl fmt::Debug for ReadStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        let mut path = HashSet::new();
        render_struct(self, DEFAULT_PRINT_DEPTH, &mut path, &mut out);
        f.write_str(&out)
    }
}

/// A decoded (or caller-built) array instance.
pub struct ReadList {
    entries: Entries,
}

impl ReadList {
    pub fn new<I: IntoIterator<Item = Value>>(items: I) -> Self {
        ReadList {
            entries: Entries::realized(items.into_iter().collect()),
        }
    }

    /// Builds a list whose deferred entries are resolved through `accessor`.
    pub fn lazy(entries: Vec<Entry>, accessor: Accessor) -> Self {
        ReadList {
            entries: Entries::lazy(entries, accessor),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the element, resolving only that element.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.entries.resolve(index)
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        self.entries.is_resolved(index)
    }

    /// Iterates the elements, resolving each as it is reached.
    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.entries.values()
    }

    /// Resolves every element without descending into nested containers.
    pub fn ensure_complete(&self) -> &Self {
        self.entries.resolve_all();
        self
    }

    /// See [`Value::ensure_recursively_complete`].
    pub fn ensure_recursively_complete(&self, visited: &mut HashSet<usize>) -> &Self {
        let id = self as *const Self as *const () as usize;
        if visited.insert(id) {
            self.ensure_complete();
            complete_recursively(self.entries.resolved_values(), visited);
        }
        self
    }

    pub fn push(&self, _value: Value) -> Result<()> {
        Err(CondensedError::ReadOnly("ReadList::push"))
    }

    pub fn set(&self, _index: usize, _value: Value) -> Result<()> {
        Err(CondensedError::ReadOnly("ReadList::set"))
    }
}

impl PartialEq for ReadList {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && (0..self.len()).all(|i| self.get(i) == other.get(i))
    }
}

impl Eq for ReadList {}

impl Hash for ReadList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len().hash(state);
        for value in self.iter() {
            value.hash(state);
        }
    }
}

impl fmt::Debug for ReadList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        let mut path = HashSet::new();
        render_list(self, DEFAULT_PRINT_DEPTH, &mut path, &mut out);
        f.write_str(&out)
    }
}

fn complete_recursively(mut pending: Vec<Value>, visited: &mut HashSet<usize>) {
    while let Some(value) = pending.pop() {
        let Some(id) = value.container_id() else {
            continue;
        };
        if !visited.insert(id) {
            continue;
        }
        match &value {
            Value::Struct(s) => {
                s.ensure_complete();
                pending.extend(s.entries.resolved_values());
            }
            Value::List(l) => {
                l.ensure_complete();
                pending.extend(l.entries.resolved_values());
            }
            _ => {}
        }
    }
}

fn render(value: &Value, depth: usize, path: &mut HashSet<usize>, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(&b.to_string()),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&f.to_string()),
        Value::Str(s) => out.push_str(&format!("{:?}", s)),
        Value::List(l) => render_list(l, depth, path, out),
        Value::Struct(s) => render_struct(s, depth, path, out),
    }
}

fn render_struct(s: &ReadStruct, depth: usize, path: &mut HashSet<usize>, out: &mut String) {
    let id = s as *const ReadStruct as *const () as usize;
    if depth == 0 || !path.insert(id) {
        out.push_str(ELISION);
        return;
    }
    out.push_str(s.name());
    out.push('{');
    for (i, (name, value)) in s.fields().into_iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(name);
        out.push_str(": ");
        render(&value, depth - 1, path, out);
    }
    out.push('}');
    path.remove(&id);
}

fn render_list(l: &ReadList, depth: usize, path: &mut HashSet<usize>, out: &mut String) {
    let id = l as *const ReadList as *const () as usize;
    if depth == 0 || !path.insert(id) {
        out.push_str(ELISION);
        return;
    }
    out.push('[');
    for (i, value) in l.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        render(&value, depth - 1, path, out);
    }
    out.push(']');
    path.remove(&id);
}
