//! In-Memory Value Model
//!
//! The keyspace holds a closed set of value shapes. Persistence code
//! dispatches on the variant, never on what a value happens to support.
//!
//! ```text
//! Value
//!  ├── Bytes       plain scalar
//!  ├── Item        scalar or composite wrapped with an optional expiry
//!  ├── List        ordered scalars
//!  ├── Hash        field → scalar
//!  ├── Set         members, each with an optional expiry
//!  └── SortedSet   member → score
//! ```
//!
//! Expiry timestamps are absolute Unix times in (fractional) seconds, which
//! is also how they are written to disk.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Absolute Unix timestamp in seconds. `None` at use sites means "never expires".
pub type ExpireAt = f64;

/// Returns the current Unix time in seconds.
pub fn now_secs() -> ExpireAt {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Checks whether an optional expiry timestamp has passed.
#[inline]
pub fn is_expired(expire_at: Option<ExpireAt>) -> bool {
    expire_at.is_some_and(|at| at < now_secs())
}

/// Redis-style TTL for an expiry timestamp.
///
/// - `-1` when there is no expiry
/// - `-2` when the timestamp has already passed
/// - otherwise the remaining whole seconds (truncated)
pub fn ttl_seconds(expire_at: Option<ExpireAt>) -> i64 {
    match expire_at {
        None => -1,
        Some(at) => {
            let now = now_secs();
            if at > now {
                (at - now) as i64
            } else {
                -2
            }
        }
    }
}

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Binary-safe scalar.
    Bytes(Bytes),
    /// A value wrapped with its own expiry.
    Item(Box<Item>),
    /// Ordered list of scalars.
    List(VecDeque<Bytes>),
    /// Field → value mapping.
    Hash(HashMap<Bytes, Bytes>),
    /// Unordered set of scalars with optional per-member expiry.
    Set(MemberSet),
    /// Member → score mapping.
    SortedSet(SortedSet),
}

impl Value {
    /// Creates a scalar value.
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Value::Bytes(data.into())
    }

    /// Wraps a value in an [`Item`].
    pub fn item(value: Value, expire_at: Option<ExpireAt>) -> Self {
        Value::Item(Box::new(Item { value, expire_at }))
    }

    /// Builds a list from anything yielding scalars.
    pub fn list<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a hash from field/value pairs.
    pub fn hash<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        Value::Hash(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Redis type name of the value (items report their inner type).
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "string",
            Value::Item(item) => item.value.type_name(),
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
        }
    }

    /// Returns the scalar payload, looking through an item wrapper.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Item(item) => item.value.as_bytes(),
            _ => None,
        }
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Item> for Value {
    fn from(item: Item) -> Self {
        Value::Item(Box::new(item))
    }
}

/// A value together with its expiry; the unit the dispatcher stores per key.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub value: Value,
    pub expire_at: Option<ExpireAt>,
}

impl Item {
    /// Creates an item that never expires.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            expire_at: None,
        }
    }

    /// Creates an item expiring at `expire_at`.
    pub fn with_expiry(value: impl Into<Value>, expire_at: ExpireAt) -> Self {
        Self {
            value: value.into(),
            expire_at: Some(expire_at),
        }
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        is_expired(self.expire_at)
    }

    pub fn ttl(&self) -> i64 {
        ttl_seconds(self.expire_at)
    }
}

/// A set whose members may carry their own expiry.
///
/// Expired members stay in the backing map until [`MemberSet::purge_expired`]
/// runs, but are invisible to every read method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberSet {
    members: BTreeMap<Bytes, Option<ExpireAt>>,
}

impl MemberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member without expiry. Returns `true` if it was not present.
    pub fn insert(&mut self, member: impl Into<Bytes>) -> bool {
        self.insert_with_expiry(member, None)
    }

    /// Adds a member with an optional expiry, replacing any previous expiry.
    pub fn insert_with_expiry(
        &mut self,
        member: impl Into<Bytes>,
        expire_at: Option<ExpireAt>,
    ) -> bool {
        match self.members.insert(member.into(), expire_at) {
            None => true,
            Some(previous) => is_expired(previous),
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.members.remove(member).is_some()
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.members
            .get(member)
            .is_some_and(|expire_at| !is_expired(*expire_at))
    }

    /// Live members in byte order.
    pub fn members(&self) -> impl Iterator<Item = &Bytes> {
        self.members
            .iter()
            .filter(|(_, expire_at)| !is_expired(**expire_at))
            .map(|(member, _)| member)
    }

    /// Every stored member with its expiry, including expired ones.
    pub fn entries(&self) -> impl Iterator<Item = (&Bytes, Option<ExpireAt>)> {
        self.members.iter().map(|(m, e)| (m, *e))
    }

    pub fn len(&self) -> usize {
        self.members().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired members. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let before = self.members.len();
        self.members.retain(|_, expire_at| !is_expired(*expire_at));
        before - self.members.len()
    }
}

impl<B: Into<Bytes>> FromIterator<B> for MemberSet {
    fn from_iter<I: IntoIterator<Item = B>>(iter: I) -> Self {
        let mut set = MemberSet::new();
        for member in iter {
            set.insert(member);
        }
        set
    }
}

/// Sorted set: unique members, each with a floating-point score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortedSet {
    scores: HashMap<Bytes, f64>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the score of a member. Returns the previous score, if any.
    pub fn insert(&mut self, member: impl Into<Bytes>, score: f64) -> Option<f64> {
        self.scores.insert(member.into(), score)
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.scores.get(member).copied()
    }

    pub fn remove(&mut self, member: &[u8]) -> Option<f64> {
        self.scores.remove(member)
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, f64)> {
        self.scores.iter().map(|(m, s)| (m, *s))
    }

    /// Members ordered by score, ties broken by member bytes.
    pub fn ranked(&self) -> Vec<(Bytes, f64)> {
        let mut out: Vec<(Bytes, f64)> = self
            .scores
            .iter()
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

impl<B: Into<Bytes>> FromIterator<(B, f64)> for SortedSet {
    fn from_iter<I: IntoIterator<Item = (B, f64)>>(iter: I) -> Self {
        let mut zset = SortedSet::new();
        for (member, score) in iter {
            zset.insert(member, score);
        }
        zset
    }
}
