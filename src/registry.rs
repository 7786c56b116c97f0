//! The namespace registry: a trie of dotted namespace paths whose leaves
//! bind RPC names to typed body builders and parsers.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    io::Cursor,
    rc::Rc,
};

use crate::{ByteRange, Encoding, Error, Method, PacketAssembler, TypeCode, Value};

/// Builds an outbound RPC body from positional arguments.
pub type BodyBuilder = Rc<dyn Fn(&mut PacketAssembler, &[Value]) -> Result<(), Error>>;

/// Parses an inbound RPC body into a structured value.
pub type BodyParser = Rc<dyn Fn(ByteRange<'_>) -> Result<RpcValueMap, Error>>;

/// The structured result of a body parse.
///
/// Fields keep their insertion order and are addressable both by name and
/// by position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RpcValueMap {
    entries: Vec<(String, Value)>,
}

impl RpcValueMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named field.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    /// Look a field up by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find_map(|(n, v)| (n == name).then_some(v))
    }

    /// Look a field up by position.
    pub fn at(&self, i: usize) -> Option<&Value> {
        self.entries.get(i).map(|(_, v)| v)
    }

    /// The number of fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// The builder, parser and receive method bound to one send method of an
/// RPC.
#[derive(Clone)]
pub struct MethodEntry {
    recv: Method,
    arity: usize,
    builder: BodyBuilder,
    parser: BodyParser,
}

impl MethodEntry {
    /// Bind a builder/parser pair with the method the reply arrives on.
    pub fn new(recv: Method, arity: usize, builder: BodyBuilder, parser: BodyParser) -> Self {
        Self {
            recv,
            arity,
            builder,
            parser,
        }
    }

    /// The method the device answers this call with.
    pub fn recv(&self) -> Method {
        self.recv
    }

    /// The number of positional arguments the builder takes.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// The body builder.
    pub fn builder(&self) -> &BodyBuilder {
        &self.builder
    }

    /// The body parser.
    pub fn parser(&self) -> &BodyParser {
        &self.parser
    }
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("recv", &self.recv)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// The registry leaf for one (namespace, RPC name) pair.
///
/// Most RPCs accept a single send method. An RPC that accepts several
/// (`_pwr` answers both `get` and `critical`) holds one [`MethodEntry`]
/// per method; [`RpcEntry::promote`] converts the single form in place
/// when a second method is learned.
#[derive(Debug, Clone)]
pub enum RpcEntry {
    /// One send method, one builder/parser pair.
    Single {
        /// The only method this RPC accepts.
        method: Method,
        /// Its builder/parser binding.
        entry: MethodEntry,
    },

    /// A builder/parser pair per send method.
    Multi {
        /// The bindings, keyed by send method.
        methods: BTreeMap<Method, MethodEntry>,
    },
}

impl RpcEntry {
    /// A single-method entry.
    pub fn single(
        method: Method,
        recv: Method,
        arity: usize,
        builder: BodyBuilder,
        parser: BodyParser,
    ) -> Self {
        Self::Single {
            method,
            entry: MethodEntry::new(recv, arity, builder, parser),
        }
    }

    /// A multi-method entry.
    ///
    /// The first binding is taken separately so an entry can never be
    /// built empty.
    pub fn multi(
        first: (Method, MethodEntry),
        rest: impl IntoIterator<Item = (Method, MethodEntry)>,
    ) -> Self {
        let (method, entry) = first;
        let mut methods = BTreeMap::new();
        methods.insert(method, entry);
        methods.extend(rest);
        Self::Multi { methods }
    }

    /// Whether this RPC accepts more than one send method.
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi { .. })
    }

    /// The send methods this RPC accepts.
    pub fn send_methods(&self) -> Vec<Method> {
        match self {
            Self::Single { method, .. } => vec![*method],
            Self::Multi { methods } => methods.keys().copied().collect(),
        }
    }

    /// The method used when a caller does not pick one: the single
    /// method, or the lowest method byte of a multi-method entry.
    ///
    /// `None` only for a `Multi` whose map was built empty by hand;
    /// [`RpcEntry::multi`] cannot produce one.
    pub fn default_method(&self) -> Option<Method> {
        match self {
            Self::Single { method, .. } => Some(*method),
            // BTreeMap order follows the wire byte.
            Self::Multi { methods } => methods.keys().next().copied(),
        }
    }

    /// The binding for send method `m`, if the RPC accepts it.
    pub fn entry_for(&self, m: Method) -> Option<&MethodEntry> {
        match self {
            Self::Single { method, entry } if *method == m => Some(entry),
            Self::Single { .. } => None,
            Self::Multi { methods } => methods.get(&m),
        }
    }

    /// The binding whose *receive* method is `m`, with its send method.
    ///
    /// Inbound packets carry the receive method, so response
    /// classification searches by it.
    pub fn entry_for_recv(&self, m: Method) -> Option<(Method, &MethodEntry)> {
        match self {
            Self::Single { method, entry } if entry.recv == m => Some((*method, entry)),
            Self::Single { .. } => None,
            Self::Multi { methods } => methods
                .iter()
                .find(|(_, e)| e.recv == m)
                .map(|(m, e)| (*m, e)),
        }
    }

    /// Convert a single-method entry into the multi-method form.
    pub fn promote(&mut self) {
        if let Self::Single { method, entry } = self {
            let mut methods = BTreeMap::new();
            methods.insert(*method, entry.clone());
            *self = Self::Multi { methods };
        }
    }

    /// Add a binding for another send method.
    ///
    /// An existing binding for `method` wins; returns whether the entry
    /// was inserted.
    pub fn augment(&mut self, method: Method, entry: MethodEntry) -> bool {
        if self.entry_for(method).is_some() {
            return false;
        }

        self.promote();
        match self {
            Self::Multi { methods } => {
                methods.insert(method, entry);
                true
            }
            Self::Single { .. } => unreachable!("promote always yields the multi form"),
        }
    }
}

/// A source contribution of RPC bindings rooted at one dotted namespace
/// path.
///
/// This is the extension point the built-in [`crate::namespaces`] modules
/// use; hosts register further contributions through
/// [`crate::Device::supports_namespace`].
#[derive(Debug)]
pub struct NamespaceContribution {
    root: String,
    rpcs: Vec<(String, RpcEntry)>,
}

impl NamespaceContribution {
    /// A contribution rooted at `root` (a leading `com.` is stripped).
    pub fn new(root: &str) -> Self {
        Self {
            root: strip_com(root).to_owned(),
            rpcs: Vec::new(),
        }
    }

    /// Add an RPC binding.
    pub fn rpc(mut self, name: &str, entry: RpcEntry) -> Self {
        self.rpcs.push((name.to_owned(), entry));
        self
    }

    /// The dotted path this contribution roots at.
    pub fn root(&self) -> &str {
        &self.root
    }
}

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,
    rpcs: BTreeMap<String, RpcEntry>,
}

/// The namespace trie.
///
/// Lookup skips a lone `com` path segment, mirroring the `com.` strip
/// applied to stored names.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    root: Node,
    generation: u64,
}

/// Strip a leading `com.` component from a dotted path.
pub(crate) fn strip_com(path: &str) -> &str {
    path.strip_prefix("com.").unwrap_or(path)
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty() && *s != "com")
}

impl NamespaceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter bumped on every mutation; callers caching resolutions
    /// compare it to decide whether their cache is stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn node(&self, path: &str) -> Result<&Node, Error> {
        let mut node = &self.root;
        for seg in segments(path) {
            node = node
                .children
                .get(seg)
                .ok_or_else(|| Error::UndefinedNamespace(path.to_owned()))?;
        }
        Ok(node)
    }

    fn node_mut(&mut self, path: &str) -> &mut Node {
        let mut node = &mut self.root;
        for seg in segments(path) {
            node = node.children.entry(seg.to_owned()).or_default();
        }
        node
    }

    /// Whether `path` resolves to a registry node.
    pub fn contains_namespace(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    /// The RPC entry at (`namespace`, `rpc`).
    pub fn rpc(&self, namespace: &str, rpc: &str) -> Result<&RpcEntry, Error> {
        self.node(namespace)?
            .rpcs
            .get(rpc)
            .ok_or_else(|| Error::UndefinedRpc {
                namespace: namespace.to_owned(),
                rpc: rpc.to_owned(),
            })
    }

    /// The RPC names defined directly under `namespace`.
    pub fn rpc_names(&self, namespace: &str) -> Result<Vec<String>, Error> {
        Ok(self.node(namespace)?.rpcs.keys().cloned().collect())
    }

    /// Merge a contribution into the trie at the path named by its root.
    ///
    /// On an RPC name collision the existing entry wins, which lets a
    /// base module be layered underneath overrides.
    pub fn import_namespace(&mut self, contribution: NamespaceContribution) {
        let node = self.node_mut(&contribution.root);
        for (name, entry) in contribution.rpcs {
            node.rpcs.entry(name).or_insert(entry);
        }
        self.generation += 1;
    }

    /// Bind one (method, entry) pair at (`namespace`, `rpc`), creating
    /// the namespace path if needed.
    ///
    /// An RPC already bound for `method` keeps its existing binding; an
    /// RPC bound for other methods is promoted to the multi-method form.
    /// Used by introspection to graft discovered RPCs onto the trie.
    pub fn augment_rpc(&mut self, namespace: &str, rpc: &str, method: Method, entry: MethodEntry) {
        let node = self.node_mut(strip_com(namespace));
        match node.rpcs.get_mut(rpc) {
            Some(existing) => {
                existing.augment(method, entry);
            }
            None => {
                node.rpcs.insert(
                    rpc.to_owned(),
                    RpcEntry::Single {
                        method,
                        entry,
                    },
                );
            }
        }
        self.generation += 1;
    }
}

/// The namespace id table: wire id to dotted name.
///
/// Id zero is always `bcs.core`; the remaining ids are learned from the
/// device during namespace introspection. The reverse (name to id) map is
/// derived on demand and rebuilt whenever the forward map changes.
#[derive(Debug, Clone)]
pub struct NamespaceIdTable {
    forward: BTreeMap<u8, String>,
    reverse: Option<HashMap<String, u8>>,
}

impl Default for NamespaceIdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceIdTable {
    /// A table holding only the fixed `0 -> bcs.core` entry.
    pub fn new() -> Self {
        let mut forward = BTreeMap::new();
        forward.insert(0, "bcs.core".to_owned());
        Self {
            forward,
            reverse: None,
        }
    }

    /// The dotted name for wire id `id`.
    pub fn name_of(&self, id: u8) -> Option<&str> {
        self.forward.get(&id).map(String::as_str)
    }

    /// Record `id -> name` (a leading `com.` is stripped), invalidating
    /// any cached reverse map.
    pub fn insert(&mut self, id: u8, name: &str) {
        self.forward.insert(id, strip_com(name).to_owned());
        self.reverse = None;
    }

    /// The wire id for a dotted name, deriving the reverse map if the
    /// forward map changed since it was last built.
    pub fn id_of(&mut self, name: &str) -> Option<u8> {
        if self.reverse.is_none() {
            self.reverse = Some(
                self.forward
                    .iter()
                    .map(|(id, name)| (name.clone(), *id))
                    .collect(),
            );
        }
        self.reverse
            .as_ref()
            .and_then(|r| r.get(strip_com(name)).copied())
    }

    /// The number of known namespace ids.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the table is empty (never true; id zero is fixed).
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Iterate `(id, name)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.forward.iter().map(|(id, name)| (*id, name.as_str()))
    }
}

/// Whether a positional argument can serialise as the declared wire type.
fn conforms(code: TypeCode, v: &Value) -> bool {
    let got = v.type_code();
    if got == code {
        return true;
    }
    // ByteBuffer and UInt8Array share a wire shape.
    matches!(
        (code, got),
        (TypeCode::ByteBuffer, TypeCode::UInt8Array)
            | (TypeCode::UInt8Array, TypeCode::ByteBuffer)
    )
}

/// A builder that serialises positional arguments against a declared type
/// list, in order.
///
/// Introspection synthesises these for RPCs the host has no hand-written
/// binding for.
pub fn generic_builder(types: Vec<TypeCode>) -> BodyBuilder {
    Rc::new(move |asm, args| {
        if args.len() != types.len() {
            return Err(Error::ValueOutOfRange(
                "positional arguments do not match the declared send types",
            ));
        }
        for (code, arg) in types.iter().zip(args) {
            if !conforms(*code, arg) {
                return Err(Error::TypeMismatch {
                    wanted: *code,
                    got: arg.kind(),
                });
            }
            asm.push_value(arg)?;
        }
        Ok(())
    })
}

/// A parser that deserialises a declared type list, in order, into fields
/// keyed `arg0..argN`.
pub fn generic_parser(types: Vec<TypeCode>) -> BodyParser {
    Rc::new(move |body| {
        let slice = body.as_slice();
        let mut c = Cursor::new(slice);
        let mut map = RpcValueMap::new();
        for (i, code) in types.iter().enumerate() {
            let v = Value::from_cursor(*code, &mut c, Encoding::Ascii)?;
            map.insert(format!("arg{i}"), v);
        }
        Ok(map)
    })
}

/// A builder for RPCs that send an empty body.
pub fn empty_builder() -> BodyBuilder {
    Rc::new(|_, args| {
        if args.is_empty() {
            Ok(())
        } else {
            Err(Error::ValueOutOfRange(
                "positional arguments do not match the declared send types",
            ))
        }
    })
}

/// A parser for RPCs whose reply body carries nothing.
pub fn empty_parser() -> BodyParser {
    Rc::new(|_| Ok(RpcValueMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_entry(recv: Method) -> MethodEntry {
        MethodEntry::new(recv, 0, empty_builder(), empty_parser())
    }

    fn noop_single(method: Method) -> RpcEntry {
        RpcEntry::Single {
            method,
            entry: noop_entry(method),
        }
    }

    #[test]
    fn test_import_and_resolve() {
        let mut reg = NamespaceRegistry::new();
        reg.import_namespace(
            NamespaceContribution::new("bcs.core").rpc("_png", noop_single(Method::Get)),
        );

        assert!(reg.contains_namespace("bcs.core"));
        assert!(reg.rpc("bcs.core", "_png").is_ok());
        assert_eq!(
            reg.rpc("bcs.core", "_nms").unwrap_err(),
            Error::UndefinedRpc {
                namespace: "bcs.core".to_owned(),
                rpc: "_nms".to_owned()
            }
        );
        assert_eq!(
            reg.rpc("bcs.io", "_png").unwrap_err(),
            Error::UndefinedNamespace("bcs.io".to_owned())
        );
    }

    #[test]
    fn test_lone_com_segment_is_skipped() {
        let mut reg = NamespaceRegistry::new();
        reg.import_namespace(
            NamespaceContribution::new("com.neuronrobotics.dyio")
                .rpc("_pwr", noop_single(Method::Get)),
        );

        // The stored path lost its `com.` prefix, and lookup tolerates
        // one anyway.
        assert!(reg.contains_namespace("neuronrobotics.dyio"));
        assert!(reg.rpc("com.neuronrobotics.dyio", "_pwr").is_ok());
    }

    #[test]
    fn test_empty_path_resolves_to_the_root() {
        let reg = NamespaceRegistry::new();
        assert!(reg.contains_namespace(""));
    }

    #[test]
    fn test_collision_keeps_the_existing_entry() {
        let mut reg = NamespaceRegistry::new();
        reg.import_namespace(
            NamespaceContribution::new("bcs.core").rpc("_png", noop_single(Method::Get)),
        );
        reg.import_namespace(
            NamespaceContribution::new("bcs.core").rpc("_png", noop_single(Method::Post)),
        );

        let entry = reg.rpc("bcs.core", "_png").unwrap();
        assert_eq!(entry.default_method(), Some(Method::Get));
    }

    #[test]
    fn test_promotion_and_augment() {
        let mut entry = noop_single(Method::Get);
        assert!(!entry.is_multi());

        assert!(entry.augment(Method::Critical, noop_entry(Method::Critical)));
        assert!(entry.is_multi());
        assert_eq!(entry.send_methods(), vec![Method::Get, Method::Critical]);

        // The existing get binding wins over a late duplicate.
        assert!(!entry.augment(Method::Get, noop_entry(Method::Status)));
        assert_eq!(entry.entry_for(Method::Get).unwrap().recv(), Method::Get);

        // Default method is the lowest wire byte.
        assert_eq!(entry.default_method(), Some(Method::Get));
    }

    #[test]
    fn test_augment_rpc_creates_missing_paths() {
        let mut reg = NamespaceRegistry::new();
        let g0 = reg.generation();

        reg.augment_rpc("bcs.pid", "_pid", Method::Get, noop_entry(Method::Get));
        assert!(reg.rpc("bcs.pid", "_pid").is_ok());
        assert!(reg.generation() > g0);

        reg.augment_rpc("bcs.pid", "_pid", Method::Async, noop_entry(Method::Async));
        assert!(reg.rpc("bcs.pid", "_pid").unwrap().is_multi());
    }

    #[test]
    fn test_entry_for_recv_searches_the_reply_method() {
        let entry = RpcEntry::multi(
            (Method::Get, noop_entry(Method::Get)),
            [(Method::Critical, noop_entry(Method::Status))],
        );

        let (send, _) = entry.entry_for_recv(Method::Status).unwrap();
        assert_eq!(send, Method::Critical);
        assert!(entry.entry_for_recv(Method::Async).is_none());
    }

    #[test]
    fn test_hand_built_empty_multi_has_no_default_method() {
        let entry = RpcEntry::Multi {
            methods: BTreeMap::new(),
        };
        assert_eq!(entry.default_method(), None);
        assert!(entry.send_methods().is_empty());
    }

    #[test]
    fn test_id_table_reverse_map_invalidation() {
        let mut t = NamespaceIdTable::new();
        assert_eq!(t.name_of(0), Some("bcs.core"));
        assert_eq!(t.id_of("bcs.core"), Some(0));

        // A forward mutation invalidates the cached reverse map.
        t.insert(1, "com.bcs.rpc");
        assert_eq!(t.name_of(1), Some("bcs.rpc"));
        assert_eq!(t.id_of("bcs.rpc"), Some(1));
        assert_eq!(t.id_of("com.bcs.rpc"), Some(1));
        assert_eq!(t.id_of("bcs.io"), None);
    }

    #[test]
    fn test_generic_builder_and_parser() {
        let types = vec![TypeCode::UInt8, TypeCode::Int32];
        let builder = generic_builder(types.clone());
        let parser = generic_parser(types);

        let mut asm = PacketAssembler::new();
        builder(&mut asm, &[Value::UInt8(7), Value::Int32(-2)]).unwrap();
        let body = asm.assemble();

        let map = parser(ByteRange::of(&body)).unwrap();
        assert_eq!(map.get("arg0"), Some(&Value::UInt8(7)));
        assert_eq!(map.get("arg1"), Some(&Value::Int32(-2)));
        assert_eq!(map.at(1), Some(&Value::Int32(-2)));
    }

    #[test]
    fn test_generic_builder_rejects_type_mismatch() {
        let builder = generic_builder(vec![TypeCode::Int32]);
        let mut asm = PacketAssembler::new();
        let err = builder(&mut asm, &[Value::Bool(true)]).unwrap_err();
        assert_eq!(
            err,
            Error::TypeMismatch {
                wanted: TypeCode::Int32,
                got: "bool"
            }
        );
    }

    #[test]
    fn test_generic_builder_accepts_the_buffer_alias() {
        let builder = generic_builder(vec![TypeCode::ByteBuffer]);
        let mut asm = PacketAssembler::new();
        builder(&mut asm, &[Value::UInt8Array(vec![1, 2])]).unwrap();
        assert_eq!(asm.assemble(), vec![2, 1, 2]);
    }
}
