//! Device tree object model.
//!
//! An [`Fdt`] owns a tree of [`Piece`]s — [`Node`]s and [`Property`]s.
//! Children are keyed by name and iterate in ascending byte-lexicographic
//! name order, which is also the order the serializer emits them in, so
//! an unmodified tree round-trips byte-identically through
//! [`blob::serialize`](crate::blob::serialize).
//!
//! The tree is single-threaded by design: nodes exclusively own their
//! children, properties own their byte buffers, and no parent links are
//! stored. Operations that need a piece's absolute path (such as FIT
//! configuration verification) take the tree plus a path instead.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::value::{ArrayValues, FdtValue};
use crate::{Error, Result};

const MAX_NAME_LEN: usize = 31;

/// Characters allowed in node names and unit addresses (devicetree
/// specification table 2.1).
fn valid_node_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b',' | b'.' | b'_' | b'+' | b'-')
}

/// Characters allowed in property names (devicetree specification
/// table 2.2).
fn valid_property_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b',' | b'.' | b'_' | b'+' | b'?' | b'#' | b'-')
}

fn check_property_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("empty name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName("property name too long"));
    }
    if !name.bytes().all(valid_property_char) {
        return Err(Error::InvalidName("invalid property name"));
    }
    Ok(())
}

fn check_node_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidName("empty name"));
    }
    let (node_name, unit) = match name.split_once('@') {
        Some((n, u)) => (n, Some(u)),
        None => (name, None),
    };
    if node_name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName("node name too long"));
    }
    if node_name.is_empty() || !node_name.bytes().all(valid_node_char) {
        return Err(Error::InvalidName("invalid node name"));
    }
    if let Some(unit) = unit {
        if unit.is_empty() || !unit.bytes().all(valid_node_char) {
            return Err(Error::InvalidName("invalid unit address"));
        }
    }
    Ok(())
}

/// A devicetree property: an immutable name and an opaque byte value.
///
/// The value's type is not encoded in the FDT, so the `is_*` tests are
/// deliberately not mutually exclusive: `[0x70 0x6f 0x6f 0x00]` is a
/// valid `u32`, string and stringlist all at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    value: Vec<u8>,
}

impl Property {
    fn new(name: &str) -> Result<Self> {
        check_property_name(name)?;
        Ok(Self {
            name: name.to_string(),
            value: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Value is NUL terminated with no embedded NULs.
    pub fn is_string(&self) -> bool {
        self.value.len() >= 2
            && self.value.iter().position(|&b| b == 0) == Some(self.value.len() - 1)
    }

    /// Value is NUL terminated, may contain embedded NULs, and is not
    /// entirely NUL bytes.
    pub fn is_stringlist(&self) -> bool {
        self.value.len() >= 2
            && self.value.last() == Some(&0)
            && self.value.iter().any(|&b| b != 0)
    }

    /// Value length matches `T`'s encoded size exactly.
    pub fn is<T: FdtValue>(&self) -> bool {
        self.value.len() == T::BYTE_SIZE
    }

    /// Value is a non-empty whole number of `T` encodings.
    pub fn is_array<T: FdtValue>(&self) -> bool {
        !self.value.is_empty() && self.value.len() % T::BYTE_SIZE == 0
    }

    pub fn is_u32(&self) -> bool {
        self.is::<u32>()
    }

    pub fn is_u64(&self) -> bool {
        self.is::<u64>()
    }

    /// The raw value bytes. Always succeeds.
    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Decode the value as a `T` (big-endian).
    pub fn as_value<T: FdtValue>(&self) -> Result<T> {
        if !self.is::<T>() {
            return Err(Error::IncompatibleType);
        }
        Ok(T::read(&self.value))
    }

    pub fn as_u32(&self) -> Result<u32> {
        self.as_value()
    }

    pub fn as_u64(&self) -> Result<u64> {
        self.as_value()
    }

    /// View the value as a string, excluding the trailing NUL.
    pub fn as_str(&self) -> Result<&str> {
        if !self.is_string() {
            return Err(Error::IncompatibleType);
        }
        std::str::from_utf8(&self.value[..self.value.len() - 1])
            .map_err(|_| Error::IncompatibleType)
    }

    /// Split the value on NULs. Empty elements between consecutive NULs
    /// are dropped, not kept as `""`.
    pub fn as_stringlist(&self) -> Result<Vec<&str>> {
        if !self.is_stringlist() {
            return Err(Error::IncompatibleType);
        }
        let mut out = Vec::new();
        for part in self.value.split(|&b| b == 0) {
            if part.is_empty() {
                continue;
            }
            out.push(std::str::from_utf8(part).map_err(|_| Error::IncompatibleType)?);
        }
        Ok(out)
    }

    /// Decode the value as a lazy sequence of `T`s.
    pub fn as_array<T: FdtValue>(&self) -> Result<ArrayValues<'_, T>> {
        if !self.is_array::<T>() {
            return Err(Error::IncompatibleType);
        }
        Ok(ArrayValues::new(&self.value))
    }

    /// Replace the value, taking ownership of the bytes.
    pub fn set_bytes(&mut self, value: Vec<u8>) {
        self.value = value;
    }

    /// Store the big-endian encoding of `v`.
    pub fn set_value<T: FdtValue>(&mut self, v: T) {
        self.value.clear();
        v.write(&mut self.value);
    }

    pub fn set_u32(&mut self, v: u32) {
        self.set_value(v);
    }

    pub fn set_u64(&mut self, v: u64) {
        self.set_value(v);
    }

    /// Store a string, appending a NUL terminator unless one is already
    /// present. An empty string stores an empty value.
    pub fn set_str(&mut self, v: &str) {
        self.value.clear();
        self.value.extend_from_slice(v.as_bytes());
        if !v.is_empty() && !v.ends_with('\0') {
            self.value.push(0);
        }
    }

    /// Store a string list: each non-empty element followed by a NUL.
    pub fn set_stringlist<S: AsRef<str>>(&mut self, items: &[S]) {
        self.value.clear();
        for item in items {
            let item = item.as_ref();
            if item.is_empty() {
                continue;
            }
            self.value.extend_from_slice(item.as_bytes());
            if !item.ends_with('\0') {
                self.value.push(0);
            }
        }
    }
}

/// A piece of the devicetree structure: a node or a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    Node(Node),
    Property(Property),
}

impl Piece {
    pub fn name(&self) -> &str {
        match self {
            Piece::Node(n) => n.name(),
            Piece::Property(p) => p.name(),
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Piece::Node(_))
    }

    pub fn is_property(&self) -> bool {
        matches!(self, Piece::Property(_))
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Piece::Node(n) => Some(n),
            Piece::Property(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Piece::Node(n) => Some(n),
            Piece::Property(_) => None,
        }
    }

    pub fn as_property(&self) -> Option<&Property> {
        match self {
            Piece::Node(_) => None,
            Piece::Property(p) => Some(p),
        }
    }

    pub fn as_property_mut(&mut self) -> Option<&mut Property> {
        match self {
            Piece::Node(_) => None,
            Piece::Property(p) => Some(p),
        }
    }
}

/// A devicetree node: a named, ordered collection of properties and
/// subnodes keyed by name.
///
/// Child names are unique within a node and iteration order is always
/// ascending byte-lexicographic by name. Names are immutable after
/// construction, which keeps the ordering invariant intact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    name: String,
    children: BTreeMap<String, Piece>,
}

impl Node {
    /// The root node: empty name, no parent. Only [`Fdt`] creates one.
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn new(name: &str) -> Result<Self> {
        check_node_name(name)?;
        Ok(Self {
            name: name.to_string(),
            children: BTreeMap::new(),
        })
    }

    /// Full node name, including any `@unit-address`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The `node-name` part of the name, before any `@`.
    pub fn node_name(&self) -> &str {
        match self.name.split_once('@') {
            Some((n, _)) => n,
            None => &self.name,
        }
    }

    /// The unit address part of the name, after `@`, if present.
    pub fn unit_address(&self) -> Option<&str> {
        self.name.split_once('@').map(|(_, u)| u)
    }

    /// Add a subnode. Fails if a child of that name already exists or the
    /// name is invalid.
    pub fn add_node(&mut self, name: &str) -> Result<&mut Node> {
        let node = Node::new(name)?;
        match self.insert(Piece::Node(node))? {
            Piece::Node(n) => Ok(n),
            Piece::Property(_) => unreachable!(),
        }
    }

    /// Add a property. Fails if a child of that name already exists or
    /// the name is invalid.
    pub fn add_property(&mut self, name: &str) -> Result<&mut Property> {
        let prop = Property::new(name)?;
        match self.insert(Piece::Property(prop))? {
            Piece::Property(p) => Ok(p),
            Piece::Node(_) => unreachable!(),
        }
    }

    fn insert(&mut self, piece: Piece) -> Result<&mut Piece> {
        match self.children.entry(piece.name().to_string()) {
            Entry::Occupied(e) => Err(Error::NameExists(e.key().clone())),
            Entry::Vacant(e) => Ok(e.insert(piece)),
        }
    }

    /// All children in ascending name order.
    pub fn children(&self) -> impl Iterator<Item = &Piece> {
        self.children.values()
    }

    /// Properties in ascending name order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.children.values().filter_map(Piece::as_property)
    }

    /// Subnodes in ascending name order.
    pub fn subnodes(&self) -> impl Iterator<Item = &Node> {
        self.children.values().filter_map(Piece::as_node)
    }

    /// Exact-name child lookup.
    pub fn child(&self, name: &str) -> Option<&Piece> {
        self.children.get(name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Piece> {
        self.children.get_mut(name)
    }

    /// Match a path component against the children: exact name first,
    /// then (for a component without a unit address) the first child in
    /// name order whose `node-name` part equals the component. An
    /// ambiguous unit-address-free component is not diagnosed; the first
    /// match in sorted order wins.
    fn match_child_name(&self, component: &str) -> Option<String> {
        let (name, piece) = self
            .children
            .range::<str, _>((Bound::Included(component), Bound::Unbounded))
            .next()?;
        if name == component {
            return Some(name.clone());
        }
        match piece {
            Piece::Node(n) if n.node_name() == component => Some(name.clone()),
            _ => None,
        }
    }

    /// Find a descendant by a path relative to this node.
    ///
    /// The path must not start with `/` and must not contain empty
    /// components; violations fail with [`Error::BadPath`]. A missing
    /// component, or a property reached before the last component,
    /// yields `Ok(None)`.
    pub fn find(&self, path: &str) -> Result<Option<&Piece>> {
        let (component, rest) = match path.split_once('/') {
            Some((c, r)) => (c, Some(r)),
            None => (path, None),
        };
        if component.is_empty() {
            return Err(Error::BadPath);
        }
        let Some(name) = self.match_child_name(component) else {
            return Ok(None);
        };
        let Some(child) = self.children.get(&name) else {
            return Ok(None);
        };
        match rest {
            None => Ok(Some(child)),
            Some(rest) => match child.as_node() {
                Some(n) => n.find(rest),
                None => Ok(None),
            },
        }
    }

    /// Mutable variant of [`find`](Node::find).
    pub fn find_mut(&mut self, path: &str) -> Result<Option<&mut Piece>> {
        let (component, rest) = match path.split_once('/') {
            Some((c, r)) => (c, Some(r)),
            None => (path, None),
        };
        if component.is_empty() {
            return Err(Error::BadPath);
        }
        let Some(name) = self.match_child_name(component) else {
            return Ok(None);
        };
        let Some(child) = self.children.get_mut(&name) else {
            return Ok(None);
        };
        match rest {
            None => Ok(Some(child)),
            Some(rest) => match child.as_node_mut() {
                Some(n) => n.find_mut(rest),
                None => Ok(None),
            },
        }
    }

    /// Test whether a relative path resolves to a piece.
    pub fn contains(&self, path: &str) -> Result<bool> {
        Ok(self.find(path)?.is_some())
    }

    /// Resolve a relative path to a node.
    pub fn get_node(&self, path: &str) -> Result<&Node> {
        match self.find(path)? {
            None => Err(Error::NotFound(path.to_string())),
            Some(piece) => piece.as_node().ok_or_else(|| Error::NotANode(path.to_string())),
        }
    }

    /// Resolve a relative path to a property.
    pub fn get_property(&self, path: &str) -> Result<&Property> {
        match self.find(path)? {
            None => Err(Error::NotFound(path.to_string())),
            Some(piece) => piece
                .as_property()
                .ok_or_else(|| Error::NotAProperty(path.to_string())),
        }
    }

    pub fn get_node_mut(&mut self, path: &str) -> Result<&mut Node> {
        match self.find_mut(path)? {
            None => Err(Error::NotFound(path.to_string())),
            Some(piece) => piece
                .as_node_mut()
                .ok_or_else(|| Error::NotANode(path.to_string())),
        }
    }

    pub fn get_property_mut(&mut self, path: &str) -> Result<&mut Property> {
        match self.find_mut(path)? {
            None => Err(Error::NotFound(path.to_string())),
            Some(piece) => piece
                .as_property_mut()
                .ok_or_else(|| Error::NotAProperty(path.to_string())),
        }
    }
}

/// A flattened device tree: owns exactly one root node.
///
/// The memory reservation block and boot CPU id of the binary format are
/// not modelled: they are written as zero on serialization, ignored on
/// parse, and do not participate in equality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fdt {
    root: Node,
}

impl Fdt {
    /// An empty tree: a root node with no children.
    pub fn new() -> Self {
        Self { root: Node::root() }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    fn relative(path: &str) -> Result<&str> {
        path.strip_prefix('/').ok_or(Error::BadPath)
    }

    /// Find a piece by absolute path. The path must start with `/` and
    /// have at least one component; `find("/")` is invalid.
    pub fn find(&self, path: &str) -> Result<Option<&Piece>> {
        self.root.find(Self::relative(path)?)
    }

    pub fn find_mut(&mut self, path: &str) -> Result<Option<&mut Piece>> {
        self.root.find_mut(Self::relative(path)?)
    }

    /// Test whether an absolute path resolves to a piece.
    pub fn contains(&self, path: &str) -> Result<bool> {
        self.root.contains(Self::relative(path)?)
    }

    /// Resolve an absolute path to a node.
    pub fn get_node(&self, path: &str) -> Result<&Node> {
        self.root.get_node(Self::relative(path)?)
    }

    /// Resolve an absolute path to a property.
    pub fn get_property(&self, path: &str) -> Result<&Property> {
        self.root.get_property(Self::relative(path)?)
    }

    pub fn get_node_mut(&mut self, path: &str) -> Result<&mut Node> {
        self.root.get_node_mut(Self::relative(path)?)
    }

    pub fn get_property_mut(&mut self, path: &str) -> Result<&mut Property> {
        self.root.get_property_mut(Self::relative(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_tree() -> Fdt {
        // /l1@1/l2@1 { l1#1-l2#1-prop = <11> }
        // /l1@2/l2@1 { l1#2-l2#1-prop = <21> }
        let mut f = Fdt::new();
        let l1 = f.root_mut().add_node("l1@1").unwrap();
        l1.add_property("reg").unwrap().set_u32(1);
        let l2 = l1.add_node("l2@1").unwrap();
        l2.add_property("l1#1-l2#1-prop").unwrap().set_u32(11);
        let l1 = f.root_mut().add_node("l1@2").unwrap();
        let l2 = l1.add_node("l2@1").unwrap();
        l2.add_property("l1#2-l2#1-prop").unwrap().set_u32(21);
        f
    }

    #[test]
    fn set_and_get_u32() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_u32(0xdead_beef);
        assert_eq!(p.as_u32().unwrap(), 0xdead_beef);
        assert!(matches!(p.as_u64(), Err(Error::IncompatibleType)));
    }

    #[test]
    fn set_and_get_u64() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_u64(0xdead_beef_cafe_f00d);
        assert_eq!(p.as_u64().unwrap(), 0xdead_beef_cafe_f00d);
        assert!(matches!(p.as_u32(), Err(Error::IncompatibleType)));
    }

    #[test]
    fn set_and_get_string() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_str("hello world");
        assert_eq!(p.as_str().unwrap(), "hello world");
        assert_eq!(p.as_bytes(), b"hello world\0");
    }

    #[test]
    fn set_and_get_stringlist() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_stringlist(&["hello", "world"]);
        assert_eq!(p.as_stringlist().unwrap(), vec!["hello", "world"]);
        assert_eq!(p.as_bytes(), b"hello\0world\0");
    }

    #[test]
    fn stringlist_skips_empty_elements() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_stringlist(&["a", "", "b"]);
        assert_eq!(p.as_stringlist().unwrap(), vec!["a", "b"]);

        // embedded consecutive NULs are dropped on read too
        p.set_bytes(b"a\0\0b\0".to_vec());
        assert_eq!(p.as_stringlist().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn classification_is_not_exclusive() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_bytes(vec![0x70, 0x6f, 0x6f, 0x00]);
        assert!(p.is::<u32>());
        assert!(p.is_string());
        assert!(p.is_stringlist());
        assert!(!p.is::<u64>());
        assert!(!p.is_empty());
    }

    #[test]
    fn classification_edge_cases() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();

        assert!(p.is_empty());
        assert!(!p.is_string());
        assert!(!p.is_stringlist());
        assert!(!p.is_array::<u32>());

        // all-NUL value is not a stringlist
        p.set_bytes(vec![0, 0]);
        assert!(!p.is_string());
        assert!(!p.is_stringlist());

        // embedded NUL disqualifies string but not stringlist
        p.set_bytes(b"a\0b\0".to_vec());
        assert!(!p.is_string());
        assert!(p.is_stringlist());

        // missing terminator disqualifies both
        p.set_bytes(b"ab".to_vec());
        assert!(!p.is_string());
        assert!(!p.is_stringlist());
    }

    #[test]
    fn array_access() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_bytes(vec![0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
        assert!(p.is_array::<u32>());
        assert_eq!(p.as_array::<u32>().unwrap().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(!p.is_array::<(u32, u32)>());
        assert!(matches!(p.as_array::<u64>(), Err(Error::IncompatibleType)));
    }

    #[test]
    fn composite_access() {
        let mut f = Fdt::new();
        let p = f.root_mut().add_property("test").unwrap();
        p.set_value((0x11u32, 0x22u32));
        assert!(p.is::<(u32, u32)>());
        assert_eq!(p.as_value::<(u32, u32)>().unwrap(), (0x11, 0x22));
    }

    #[test]
    fn node_name_validation() {
        let mut f = Fdt::new();
        let root = f.root_mut();

        assert!(root.add_node("").is_err());
        assert!(root.add_node("@").is_err());
        assert!(root.add_node("empty-unit-address@").is_err());
        assert!(root.add_node("@empty-node-name").is_err());
        assert!(root
            .add_node("this-name-is-longer-than-the-31-character-limit")
            .is_err());
        assert!(root.add_node("!-is-not-allowed").is_err());
        assert!(root.add_node("valid@!-is-not-allowed").is_err());
        assert!(root.add_node("x@!").is_err());

        let n = root.add_node("node-name@unit-address").unwrap();
        assert_eq!(n.name(), "node-name@unit-address");
        assert_eq!(n.node_name(), "node-name");
        assert_eq!(n.unit_address(), Some("unit-address"));

        let n = root.add_node("x@y").unwrap();
        assert_eq!(n.node_name(), "x");
        assert_eq!(n.unit_address(), Some("y"));

        let n = root.add_node("plain").unwrap();
        assert_eq!(n.unit_address(), None);
    }

    #[test]
    fn property_name_validation() {
        let mut f = Fdt::new();
        let root = f.root_mut();

        assert!(root.add_property("").is_err());
        assert!(root
            .add_property("this-name-is-longer-than-the-31-character-limit")
            .is_err());
        assert!(root.add_property("no spaces").is_err());

        // '#' and '?' are allowed in property names but not node names
        assert!(root.add_property("#address-cells").is_ok());
        assert!(root.add_property("any?").is_ok());
        assert!(f.root_mut().add_node("bad#node").is_err());
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut f = Fdt::new();
        f.root_mut().add_property("empty").unwrap();
        assert!(matches!(
            f.root_mut().add_property("empty"),
            Err(Error::NameExists(_))
        ));
        let n1 = f.root_mut().add_node("n1").unwrap();
        n1.add_node("n2").unwrap();
        assert!(matches!(n1.add_node("n2"), Err(Error::NameExists(_))));
        // a node and a property cannot share a name either
        assert!(n1.add_property("n2").is_err());
    }

    #[test]
    fn children_are_name_ordered() {
        let mut f = Fdt::new();
        let root = f.root_mut();
        root.add_node("zz").unwrap();
        root.add_property("aa").unwrap();
        root.add_node("mm@1").unwrap();
        root.add_property("bb").unwrap();

        let names: Vec<_> = root.children().map(Piece::name).collect();
        assert_eq!(names, vec!["aa", "bb", "mm@1", "zz"]);

        let props: Vec<_> = root.properties().map(Property::name).collect();
        assert_eq!(props, vec!["aa", "bb"]);

        let nodes: Vec<_> = root.subnodes().map(Node::name).collect();
        assert_eq!(nodes, vec!["mm@1", "zz"]);
    }

    #[test]
    fn find_relative() {
        let f = path_tree();
        let root = f.root();

        let p = root.find("l1@1/l2@1/l1#1-l2#1-prop").unwrap().unwrap();
        assert_eq!(p.as_property().unwrap().as_u32().unwrap(), 11);
        assert!(root.find("l1@2/l2@1").unwrap().unwrap().is_node());

        // unit address may be elided
        assert!(root.find("l1@1/l2").unwrap().unwrap().is_node());
        let p = root.find("l1@1/l2/l1#1-l2#1-prop").unwrap().unwrap();
        assert_eq!(p.as_property().unwrap().as_u32().unwrap(), 11);

        assert!(matches!(root.find("l1@1//l2"), Err(Error::BadPath)));
        assert!(matches!(root.find("/x"), Err(Error::BadPath)));
        assert!(root.find("x").unwrap().is_none());
    }

    #[test]
    fn unit_address_elision_matches_same_node() {
        let f = path_tree();
        let exact = f.get_node("/l1@1/l2@1").unwrap();
        let elided = f.get_node("/l1@1/l2").unwrap();
        assert_eq!(exact as *const Node, elided as *const Node);
    }

    #[test]
    fn elision_first_in_sorted_order_wins() {
        let mut f = Fdt::new();
        f.root_mut().add_node("n@2").unwrap();
        f.root_mut()
            .add_node("n@1")
            .unwrap()
            .add_property("which")
            .unwrap()
            .set_u32(1);
        let n = f.get_node("/n").unwrap();
        assert_eq!(n.name(), "n@1");
    }

    #[test]
    fn find_absolute() {
        let f = path_tree();

        let p = f.find("/l1@2/l2@1/l1#2-l2#1-prop").unwrap().unwrap();
        assert_eq!(p.as_property().unwrap().as_u32().unwrap(), 21);
        assert!(f.find("/l1@1/l2").unwrap().unwrap().is_node());
        assert!(f.find("/x").unwrap().is_none());

        assert!(matches!(f.find("x"), Err(Error::BadPath)));
        assert!(matches!(f.find("/"), Err(Error::BadPath)));
        assert!(matches!(f.find("/l1@1//l2"), Err(Error::BadPath)));
    }

    #[test]
    fn contains() {
        let f = path_tree();
        assert!(f.contains("/l1@1/l2@1/l1#1-l2#1-prop").unwrap());
        assert!(f.contains("/l1@1/l2").unwrap());
        assert!(!f.contains("/x").unwrap());
        assert!(f.root().contains("l1@2/l2@1").unwrap());
        assert!(!f.root().contains("x").unwrap());
        assert!(f.root().contains("/x").is_err());
    }

    #[test]
    fn get_node_and_property() {
        let f = path_tree();

        assert_eq!(f.get_node("/l1@2/l2@1").unwrap().name(), "l2@1");
        assert!(matches!(f.get_node("x"), Err(Error::BadPath)));
        assert!(matches!(f.get_node("/x"), Err(Error::NotFound(_))));
        assert!(matches!(
            f.get_node("/l1@1/l2@1/l1#1-l2#1-prop"),
            Err(Error::NotANode(_))
        ));

        assert_eq!(
            f.get_property("/l1@1/l2@1/l1#1-l2#1-prop").unwrap().name(),
            "l1#1-l2#1-prop"
        );
        assert!(matches!(f.get_property("x"), Err(Error::BadPath)));
        assert!(matches!(f.get_property("/x"), Err(Error::NotFound(_))));
        assert!(matches!(f.get_property("/l1@1"), Err(Error::NotAProperty(_))));

        // relative lookups on a node
        let n = f.get_node("/l1@1").unwrap();
        assert_eq!(n.get_node("l2@1").unwrap().name(), "l2@1");
        assert!(matches!(n.get_node("/x"), Err(Error::BadPath)));
        assert!(matches!(n.get_node("x"), Err(Error::NotFound(_))));
        assert!(matches!(n.get_node("reg"), Err(Error::NotANode(_))));
        assert!(matches!(n.get_property("l2@1"), Err(Error::NotAProperty(_))));
    }

    #[test]
    fn mutate_through_path() {
        let mut f = path_tree();
        f.get_property_mut("/l1@1/l2@1/l1#1-l2#1-prop")
            .unwrap()
            .set_u32(99);
        assert_eq!(
            f.get_property("/l1@1/l2@1/l1#1-l2#1-prop")
                .unwrap()
                .as_u32()
                .unwrap(),
            99
        );
        f.get_node_mut("/l1@2").unwrap().add_property("extra").unwrap();
        assert!(f.contains("/l1@2/extra").unwrap());
    }

    #[test]
    fn tree_equality_is_structural() {
        let f1 = path_tree();
        let f2 = path_tree();
        assert_eq!(f1, f2);

        let mut f3 = path_tree();
        f3.get_property_mut("/l1@1/l2@1/l1#1-l2#1-prop")
            .unwrap()
            .set_u32(12);
        assert_ne!(f1, f3);

        let mut f4 = path_tree();
        f4.root_mut().add_node("extra").unwrap();
        assert_ne!(f1, f4);
    }
}
