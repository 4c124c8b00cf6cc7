//! Hierarchical state registry
//!
//! A tree of named, typed items addressed by slash-separated paths. Items are
//! described by [`StateVal`] descriptors whose getters and setters close over
//! registrant-owned data; the registry never caches a value, every read calls
//! the getter again.
//!
//! Items flagged per-port live under `ports/<ifindex>/...`. Without an owning
//! port such an item is instantiated for every port currently in the port
//! store; with an owning port it exists only for that port and disappears
//! when the port is destroyed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, TeamdError};
use crate::ports::Port;
use crate::team::Team;

/// First path segment of all per-port items
pub const PORTS_SEGMENT: &str = "ports";

const BOOL_TRUE: &str = "true";
const BOOL_FALSE: &str = "false";

/// Kind of a state item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateKind {
    Namespace,
    Int,
    String,
    Bool,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Namespace => "namespace",
            StateKind::Int => "int",
            StateKind::String => "string",
            StateKind::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Typed value of a state leaf
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateValue {
    Int(i64),
    String(String),
    Bool(bool),
}

impl StateValue {
    pub fn kind(&self) -> StateKind {
        match self {
            StateValue::Int(_) => StateKind::Int,
            StateValue::String(_) => StateKind::String,
            StateValue::Bool(_) => StateKind::Bool,
        }
    }

    /// Parse the textual encoding of a value of the given kind
    pub fn parse(kind: StateKind, text: &str) -> Result<Self> {
        match kind {
            StateKind::Int => text.parse::<i64>().map(StateValue::Int).map_err(|e| {
                TeamdError::Validation(format!("\"{}\" is not a valid int: {}", text, e))
            }),
            StateKind::Bool => match text {
                BOOL_TRUE => Ok(StateValue::Bool(true)),
                BOOL_FALSE => Ok(StateValue::Bool(false)),
                _ => Err(TeamdError::Validation(format!(
                    "\"{}\" is not a valid bool, expected \"{}\" or \"{}\"",
                    text, BOOL_TRUE, BOOL_FALSE
                ))),
            },
            StateKind::String => Ok(StateValue::String(text.to_string())),
            StateKind::Namespace => Err(TeamdError::Type(
                "a namespace does not hold a value".to_string(),
            )),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(v) => Some(v),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            StateValue::Int(v) => Value::from(*v),
            StateValue::String(v) => Value::from(v.as_str()),
            StateValue::Bool(v) => Value::from(*v),
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Int(v) => write!(f, "{}", v),
            StateValue::String(v) => f.write_str(v),
            StateValue::Bool(true) => f.write_str(BOOL_TRUE),
            StateValue::Bool(false) => f.write_str(BOOL_FALSE),
        }
    }
}

/// What a getter or setter sees: the team and, for per-port items, the port
pub struct StateCtx<'a> {
    team: &'a Team,
    port: Option<&'a Port>,
}

impl<'a> StateCtx<'a> {
    pub fn team(&self) -> &'a Team {
        self.team
    }

    /// The port a per-port item was resolved for
    pub fn port(&self) -> Result<&'a Port> {
        self.port.ok_or_else(|| {
            TeamdError::Config("item is not registered per port".to_string())
        })
    }
}

type Getter<T> = Arc<dyn Fn(&T, &StateCtx<'_>) -> Result<StateValue> + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&T, &StateCtx<'_>, StateValue) -> Result<()> + Send + Sync>;

static NEXT_VAL_ID: AtomicU64 = AtomicU64::new(1);

/// State item descriptor
///
/// `T` is the registrant's data type; it is handed to the registry as an
/// `Arc<T>` at registration and passed to every getter/setter call.
pub struct StateVal<T> {
    id: u64,
    subpath: String,
    kind: StateKind,
    getter: Option<Getter<T>>,
    setter: Option<Setter<T>>,
    vals: Vec<StateVal<T>>,
    per_port: bool,
}

impl<T: 'static> StateVal<T> {
    fn new(subpath: impl Into<String>, kind: StateKind, getter: Option<Getter<T>>) -> Self {
        Self {
            id: NEXT_VAL_ID.fetch_add(1, Ordering::Relaxed),
            subpath: subpath.into(),
            kind,
            getter,
            setter: None,
            vals: Vec::new(),
            per_port: false,
        }
    }

    /// Namespace grouping `vals` under `subpath`
    pub fn node(subpath: impl Into<String>, vals: Vec<StateVal<T>>) -> Self {
        let mut val = Self::new(subpath, StateKind::Namespace, None);
        val.vals = vals;
        val
    }

    pub fn int<F>(subpath: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&T, &StateCtx<'_>) -> Result<i64> + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(move |data: &T, ctx: &StateCtx<'_>| {
            getter(data, ctx).map(StateValue::Int)
        });
        Self::new(subpath, StateKind::Int, Some(getter))
    }

    pub fn string<F>(subpath: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&T, &StateCtx<'_>) -> Result<String> + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(move |data: &T, ctx: &StateCtx<'_>| {
            getter(data, ctx).map(StateValue::String)
        });
        Self::new(subpath, StateKind::String, Some(getter))
    }

    pub fn bool<F>(subpath: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&T, &StateCtx<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        let getter: Getter<T> = Arc::new(move |data: &T, ctx: &StateCtx<'_>| {
            getter(data, ctx).map(StateValue::Bool)
        });
        Self::new(subpath, StateKind::Bool, Some(getter))
    }

    /// Make the item writable; the setter receives a value of the item kind
    pub fn with_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&T, &StateCtx<'_>, StateValue) -> Result<()> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Instantiate per port; applies to the whole group when set on a node
    pub fn per_port(mut self) -> Self {
        self.per_port = true;
        self
    }

    pub fn subpath(&self) -> &str {
        &self.subpath
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn is_per_port(&self) -> bool {
        self.per_port
    }

    fn has_per_port_child(&self) -> bool {
        self.vals
            .iter()
            .any(|sub| sub.per_port || sub.has_per_port_child())
    }

    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }
}

type ErasedGetter = Arc<dyn Fn(&StateCtx<'_>) -> Result<StateValue> + Send + Sync>;
type ErasedSetter = Arc<dyn Fn(&StateCtx<'_>, StateValue) -> Result<()> + Send + Sync>;

/// Identity of one registration: descriptor id plus registrant data address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RegKey {
    val: u64,
    data: usize,
}

impl RegKey {
    fn new<T>(val: &StateVal<T>, data: &Arc<T>) -> Self {
        Self {
            val: val.id,
            data: Arc::as_ptr(data).cast::<()>() as usize,
        }
    }
}

#[derive(Clone)]
struct Leaf {
    kind: StateKind,
    getter: ErasedGetter,
    setter: Option<ErasedSetter>,
    key: RegKey,
}

impl Leaf {
    fn value(&self, ctx: &StateCtx<'_>, name: &str) -> Result<StateValue> {
        let value = (self.getter)(ctx)?;
        if value.kind() != self.kind {
            return Err(TeamdError::Type(format!(
                "getter of \"{}\" returned {} value, item is {}",
                name,
                value.kind(),
                self.kind
            )));
        }
        Ok(value)
    }
}

#[derive(Clone)]
enum Node {
    Namespace(Namespace),
    Leaf(Leaf),
}

#[derive(Clone, Default)]
struct Namespace {
    children: Vec<(String, Node)>,
}

impl Namespace {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children
            .iter()
            .find(|(child, _)| child == name)
            .map(|(_, node)| node)
    }

    fn child_namespace_mut(&mut self, name: &str) -> Result<&mut Namespace> {
        let pos = match self.children.iter().position(|(child, _)| child == name) {
            Some(pos) => pos,
            None => {
                self.children
                    .push((name.to_string(), Node::Namespace(Namespace::default())));
                self.children.len() - 1
            }
        };
        match &mut self.children[pos].1 {
            Node::Namespace(ns) => Ok(ns),
            Node::Leaf(_) => Err(TeamdError::Config(format!(
                "\"{}\" is already registered as a value",
                name
            ))),
        }
    }

    fn insert_leaf(&mut self, name: &str, leaf: Leaf) -> Result<()> {
        if self.child(name).is_some() {
            return Err(TeamdError::Config(format!(
                "\"{}\" is already registered",
                name
            )));
        }
        self.children.push((name.to_string(), Node::Leaf(leaf)));
        Ok(())
    }

    fn lookup(&self, segs: &[&str]) -> Option<&Node> {
        let (first, rest) = segs.split_first()?;
        let node = self.child(first)?;
        if rest.is_empty() {
            return Some(node);
        }
        match node {
            Node::Namespace(ns) => ns.lookup(rest),
            Node::Leaf(_) => None,
        }
    }

    fn remove_key(&mut self, key: RegKey) {
        self.children.retain_mut(|(_, node)| match node {
            Node::Leaf(leaf) => leaf.key != key,
            Node::Namespace(ns) => {
                ns.remove_key(key);
                !ns.is_empty()
            }
        });
    }

    fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn leaf_count(&self) -> usize {
        self.children
            .iter()
            .map(|(_, node)| match node {
                Node::Leaf(_) => 1,
                Node::Namespace(ns) => ns.leaf_count(),
            })
            .sum()
    }

    /// Both trees end up under the same port; they may share namespaces only
    fn check_disjoint(&self, other: &Namespace) -> Result<()> {
        for (name, node) in &self.children {
            match (node, other.child(name)) {
                (_, None) => {}
                (Node::Namespace(a), Some(Node::Namespace(b))) => a.check_disjoint(b)?,
                _ => {
                    return Err(TeamdError::Config(format!(
                        "\"{}\" is registered both for all ports and for a single port",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    fn dump(&self, ctx: &StateCtx<'_>) -> Result<Map<String, Value>> {
        let mut map = Map::new();
        for (name, node) in &self.children {
            let value = match node {
                Node::Leaf(leaf) => leaf.value(ctx, name)?.to_json(),
                Node::Namespace(ns) => Value::Object(ns.dump(ctx)?),
            };
            map.insert(name.clone(), value);
        }
        Ok(map)
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|seg| !seg.is_empty()).collect()
}

fn check_segment(seg: &str) -> Result<()> {
    if seg.is_empty() || seg.contains('/') {
        return Err(TeamdError::Config(format!(
            "invalid state path segment \"{}\"",
            seg
        )));
    }
    Ok(())
}

fn insert_val<T: Send + Sync + 'static>(
    ns: &mut Namespace,
    val: &StateVal<T>,
    data: &Arc<T>,
    key: RegKey,
) -> Result<()> {
    check_segment(&val.subpath)?;
    if val.kind == StateKind::Namespace {
        let child = ns.child_namespace_mut(&val.subpath)?;
        for sub in &val.vals {
            insert_val(child, sub, data, key)?;
        }
        return Ok(());
    }

    let getter = val.getter.clone().ok_or_else(|| {
        TeamdError::Config(format!("value \"{}\" has no getter", val.subpath))
    })?;
    let getter_data = Arc::clone(data);
    let getter: ErasedGetter =
        Arc::new(move |ctx: &StateCtx<'_>| getter(&*getter_data, ctx));
    let setter = val.setter.clone().map(|setter| {
        let setter_data = Arc::clone(data);
        Arc::new(move |ctx: &StateCtx<'_>, value: StateValue| {
            setter(&*setter_data, ctx, value)
        }) as ErasedSetter
    });
    ns.insert_leaf(
        &val.subpath,
        Leaf {
            kind: val.kind,
            getter,
            setter,
            key,
        },
    )
}

fn insert_at<T: Send + Sync + 'static>(
    ns: &mut Namespace,
    prefix: &[&str],
    val: &StateVal<T>,
    data: &Arc<T>,
    key: RegKey,
) -> Result<()> {
    let mut target = ns;
    for seg in prefix {
        target = target.child_namespace_mut(seg)?;
    }
    insert_val(target, val, data, key)
}

fn merge_objects(dst: &mut Map<String, Value>, src: Map<String, Value>) {
    for (name, value) in src {
        match value {
            Value::Object(incoming) => {
                let slot = dst
                    .entry(name)
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(existing) = slot {
                    merge_objects(existing, incoming);
                } else {
                    *slot = Value::Object(incoming);
                }
            }
            other => {
                dst.insert(name, other);
            }
        }
    }
}

/// Registry of state items
#[derive(Default)]
pub struct StateRegistry {
    root: Namespace,
    per_port: Namespace,
    owned: Vec<(u32, Namespace)>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor (and its children) with the registrant's data
    ///
    /// The item lands at `[ports/<ifindex>/]<path_suffix>/<subpath>`.
    /// Registration is all-or-nothing: on a clash nothing is inserted.
    pub fn register<T: Send + Sync + 'static>(
        &mut self,
        val: &StateVal<T>,
        data: &Arc<T>,
        owning_port: Option<&Port>,
        path_suffix: Option<&str>,
    ) -> Result<()> {
        if owning_port.is_some() && !val.per_port {
            return Err(TeamdError::Config(format!(
                "\"{}\" has an owning port but is not per-port",
                val.subpath
            )));
        }
        if !val.per_port && val.has_per_port_child() {
            return Err(TeamdError::Config(format!(
                "\"{}\" is global but holds per-port items",
                val.subpath
            )));
        }
        let prefix = split_path(path_suffix.unwrap_or(""));
        let first = prefix.first().copied().unwrap_or(val.subpath.as_str());
        if !val.per_port && first == PORTS_SEGMENT {
            return Err(TeamdError::Config(format!(
                "\"{}\" is reserved for per-port items",
                PORTS_SEGMENT
            )));
        }
        let key = RegKey::new(val, data);

        match owning_port {
            None if !val.per_port => {
                let mut staged = self.root.clone();
                insert_at(&mut staged, &prefix, val, data, key)?;
                self.root = staged;
            }
            None => {
                let mut staged = self.per_port.clone();
                insert_at(&mut staged, &prefix, val, data, key)?;
                for (_, owned) in &self.owned {
                    staged.check_disjoint(owned)?;
                }
                self.per_port = staged;
            }
            Some(port) => {
                let ifindex = port.ifindex();
                let pos = self.owned.iter().position(|(owner, _)| *owner == ifindex);
                let mut staged = match pos {
                    Some(pos) => self.owned[pos].1.clone(),
                    None => Namespace::default(),
                };
                insert_at(&mut staged, &prefix, val, data, key)?;
                self.per_port.check_disjoint(&staged)?;
                match pos {
                    Some(pos) => self.owned[pos].1 = staged,
                    None => self.owned.push((ifindex, staged)),
                }
            }
        }
        debug!(subpath = %val.subpath, per_port = val.per_port, "Registered state value");
        Ok(())
    }

    /// Remove everything registered with this descriptor and data
    ///
    /// Unknown registrations are ignored.
    pub fn unregister<T>(&mut self, val: &StateVal<T>, data: &Arc<T>) {
        let key = RegKey::new(val, data);
        self.root.remove_key(key);
        self.per_port.remove_key(key);
        for (_, owned) in self.owned.iter_mut() {
            owned.remove_key(key);
        }
        self.owned.retain(|(_, owned)| !owned.is_empty());
    }

    /// Drop items owned by ports for which `keep` returns false
    pub fn retain_ports<F: FnMut(u32) -> bool>(&mut self, mut keep: F) {
        self.owned.retain(|(ifindex, _)| {
            let kept = keep(*ifindex);
            if !kept {
                debug!(ifindex, "Dropped state values of destroyed port");
            }
            kept
        });
    }

    /// Number of registered leaves, per-port templates counted once
    pub fn len(&self) -> usize {
        self.root.leaf_count()
            + self.per_port.leaf_count()
            + self
                .owned
                .iter()
                .map(|(_, owned)| owned.leaf_count())
                .sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn owned_namespace(&self, ifindex: u32) -> Option<&Namespace> {
        self.owned
            .iter()
            .find(|(owner, _)| *owner == ifindex)
            .map(|(_, owned)| owned)
    }

    fn resolve<'a>(&'a self, team: &'a Team, path: &str) -> Result<(&'a Leaf, StateCtx<'a>)> {
        let segs = split_path(path);
        let not_found = || TeamdError::NotFound(format!("item path \"{}\" does not exist", path));

        let (node, port) = match segs.split_first() {
            None => return Err(not_found()),
            Some((&PORTS_SEGMENT, rest)) => {
                let (port_seg, rest) = rest.split_first().ok_or_else(not_found)?;
                let port = port_seg
                    .parse::<u32>()
                    .ok()
                    .and_then(|ifindex| team.ports().find(ifindex))
                    .ok_or_else(|| {
                        TeamdError::NotFound(format!("port \"{}\" does not exist", port_seg))
                    })?;
                let node = self.per_port.lookup(rest).or_else(|| {
                    self.owned_namespace(port.ifindex())
                        .and_then(|owned| owned.lookup(rest))
                });
                (node, Some(port))
            }
            Some(_) => (self.root.lookup(&segs), None),
        };

        match node.ok_or_else(not_found)? {
            Node::Leaf(leaf) => Ok((leaf, StateCtx { team, port })),
            Node::Namespace(_) => Err(TeamdError::Type(format!(
                "item path \"{}\" is a namespace",
                path
            ))),
        }
    }

    /// Read the current value at `path`
    pub fn get(&self, team: &Team, path: &str) -> Result<StateValue> {
        let (leaf, ctx) = self.resolve(team, path)?;
        leaf.value(&ctx, path)
    }

    /// Read the value at `path` in its textual encoding
    pub fn get_text(&self, team: &Team, path: &str) -> Result<String> {
        self.get(team, path).map(|value| value.to_string())
    }

    pub fn get_int(&self, team: &Team, path: &str) -> Result<i64> {
        match self.get(team, path)? {
            StateValue::Int(v) => Ok(v),
            other => Err(mismatch(path, StateKind::Int, other.kind())),
        }
    }

    pub fn get_bool(&self, team: &Team, path: &str) -> Result<bool> {
        match self.get(team, path)? {
            StateValue::Bool(v) => Ok(v),
            other => Err(mismatch(path, StateKind::Bool, other.kind())),
        }
    }

    pub fn get_string(&self, team: &Team, path: &str) -> Result<String> {
        match self.get(team, path)? {
            StateValue::String(v) => Ok(v),
            other => Err(mismatch(path, StateKind::String, other.kind())),
        }
    }

    /// Parse `text` as the item kind and hand it to the item setter
    ///
    /// Any setter rejection is reported as `Validation`.
    pub fn set(&self, team: &Team, path: &str, text: &str) -> Result<()> {
        let (leaf, ctx) = self.resolve(team, path)?;
        let setter = leaf.setter.as_ref().ok_or_else(|| {
            TeamdError::ReadOnly(format!("item path \"{}\" has no setter", path))
        })?;
        let value = StateValue::parse(leaf.kind, text)?;
        setter(&ctx, value).map_err(|e| match e {
            TeamdError::Validation(_) => e,
            other => TeamdError::Validation(format!("item path \"{}\": {}", path, other)),
        })
    }

    /// Serialize every reachable item
    ///
    /// Per-port items appear under `ports/<ifindex>` for every port in the
    /// port store, in store order.
    pub fn dump(&self, team: &Team) -> Result<Value> {
        let global = StateCtx { team, port: None };
        let mut root = self.root.dump(&global)?;

        let mut ports = Map::new();
        for port in team.ports().iter() {
            let ctx = StateCtx {
                team,
                port: Some(port),
            };
            let mut entry = self.per_port.dump(&ctx)?;
            if let Some(owned) = self.owned_namespace(port.ifindex()) {
                merge_objects(&mut entry, owned.dump(&ctx)?);
            }
            if !entry.is_empty() {
                ports.insert(port.ifindex().to_string(), Value::Object(entry));
            }
        }
        if !ports.is_empty() {
            root.insert(PORTS_SEGMENT.to_string(), Value::Object(ports));
        }
        Ok(Value::Object(root))
    }
}

fn mismatch(path: &str, expected: StateKind, found: StateKind) -> TeamdError {
    TeamdError::Type(format!(
        "item path \"{}\" holds {} value, {} expected",
        path, found, expected
    ))
}
