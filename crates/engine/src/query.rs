//! Range queries over a domain
//!
//! A [`Query`] describes a contiguous key range plus paging. It is built
//! with the builder methods or parsed from a filter document:
//!
//! | Filter | Meaning |
//! |--------|---------|
//! | `$eq` | exactly this key |
//! | `$gt` / `$gte` | lower bound (exclusive / inclusive) |
//! | `$lt` / `$lte` | upper bound (exclusive / inclusive) |
//! | `$like` | keys starting with a string or array prefix |
//! | `$rev` | descending order |
//! | `$limit` | at most this many results |
//! | `$skip` | drop this many results first |
//!
//! Queries compile to a plan over encoded keys that cursors walk one
//! step at a time.

use tessera_core::{codec, BitSequence, Error, Key, Result, Stored, Value};
use tessera_index::{Direction, PersistentTree};

/// Key range and paging for a scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    eq: Option<Key>,
    gt: Option<Key>,
    gte: Option<Key>,
    lt: Option<Key>,
    lte: Option<Key>,
    like: Option<Key>,
    rev: bool,
    limit: Option<usize>,
    skip: usize,
}

impl Query {
    /// Match every key
    pub fn all() -> Self {
        Self::default()
    }

    /// Exactly `key`
    pub fn eq(mut self, key: impl Into<Key>) -> Self {
        self.eq = Some(key.into());
        self
    }

    /// Keys greater than `key`
    pub fn gt(mut self, key: impl Into<Key>) -> Self {
        self.gt = Some(key.into());
        self
    }

    /// Keys greater than or equal to `key`
    pub fn gte(mut self, key: impl Into<Key>) -> Self {
        self.gte = Some(key.into());
        self
    }

    /// Keys less than `key`
    pub fn lt(mut self, key: impl Into<Key>) -> Self {
        self.lt = Some(key.into());
        self
    }

    /// Keys less than or equal to `key`
    pub fn lte(mut self, key: impl Into<Key>) -> Self {
        self.lte = Some(key.into());
        self
    }

    /// Keys starting with a string or array prefix
    pub fn like(mut self, prefix: impl Into<Key>) -> Self {
        self.like = Some(prefix.into());
        self
    }

    /// Descending order
    pub fn rev(mut self) -> Self {
        self.rev = true;
        self
    }

    /// Return at most `n` entries
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skip the first `n` entries
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Parse a filter document (`null` matches everything)
    pub fn from_value(filter: &Value) -> Result<Self> {
        let fields = match filter {
            Value::Null => return Ok(Self::all()),
            Value::Object(fields) => fields,
            other => {
                return Err(Error::InvalidQuery(format!(
                    "filter must be an object, got {}",
                    other.type_name()
                )))
            }
        };

        let mut query = Self::all();
        for (name, value) in fields {
            match name.as_str() {
                "$eq" => query.eq = Some(bound_key(name, value)?),
                "$gt" => query.gt = Some(bound_key(name, value)?),
                "$gte" => query.gte = Some(bound_key(name, value)?),
                "$lt" => query.lt = Some(bound_key(name, value)?),
                "$lte" => query.lte = Some(bound_key(name, value)?),
                "$like" => query.like = Some(bound_key(name, value)?),
                "$rev" => match value {
                    Value::Bool(rev) => query.rev = *rev,
                    other => {
                        return Err(Error::InvalidQuery(format!(
                            "$rev must be a boolean, got {}",
                            other.type_name()
                        )))
                    }
                },
                "$limit" => query.limit = Some(count(name, value)?),
                "$skip" => query.skip = count(name, value)?,
                other => {
                    return Err(Error::InvalidQuery(format!("unknown filter {:?}", other)));
                }
            }
        }
        Ok(query)
    }

    /// Compile into encoded bounds
    pub(crate) fn plan(&self) -> Result<Plan> {
        let ranged = self.gt.is_some()
            || self.gte.is_some()
            || self.lt.is_some()
            || self.lte.is_some()
            || self.like.is_some();

        let mut lower: Option<Bound> = None;
        let mut upper: Option<Bound> = None;

        if let Some(key) = &self.eq {
            if ranged {
                return Err(Error::InvalidQuery(
                    "$eq cannot be combined with range filters".to_string(),
                ));
            }
            let bits = codec::encode(key)?;
            lower = Some(Bound::inclusive(bits.clone()));
            upper = Some(Bound::inclusive(bits));
        }

        for (key, inclusive) in [(&self.gt, false), (&self.gte, true)] {
            if let Some(key) = key {
                let bound = Bound::new(codec::encode(key)?, inclusive);
                lower = Some(tighter_lower(lower, bound));
            }
        }
        for (key, inclusive) in [(&self.lt, false), (&self.lte, true)] {
            if let Some(key) = key {
                let bound = Bound::new(codec::encode(key)?, inclusive);
                upper = Some(tighter_upper(upper, bound));
            }
        }
        if let Some(prefix) = &self.like {
            let (from, to) = codec::prefix_bounds(prefix)?;
            lower = Some(tighter_lower(lower, Bound::inclusive(from)));
            if let Some(to) = to {
                upper = Some(tighter_upper(upper, Bound::new(to, false)));
            }
        }

        Ok(Plan {
            lower,
            upper,
            direction: if self.rev {
                Direction::Backward
            } else {
                Direction::Forward
            },
            limit: self.limit,
            skip: self.skip,
        })
    }
}

impl TryFrom<&Value> for Query {
    type Error = Error;

    fn try_from(filter: &Value) -> Result<Self> {
        Query::from_value(filter)
    }
}

impl TryFrom<serde_json::Value> for Query {
    type Error = Error;

    fn try_from(filter: serde_json::Value) -> Result<Self> {
        Query::from_value(&Value::from(filter))
    }
}

fn bound_key(name: &str, value: &Value) -> Result<Key> {
    Key::try_from(value)
        .map_err(|e| Error::InvalidQuery(format!("{} is not a valid key: {}", name, e)))
}

fn count(name: &str, value: &Value) -> Result<usize> {
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= usize::MAX as f64 => {
            Ok(*n as usize)
        }
        other => Err(Error::InvalidQuery(format!(
            "{} must be a non-negative integer, got {:?}",
            name, other
        ))),
    }
}

// ============================================================================
// Compiled plan
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Bound {
    bits: BitSequence,
    inclusive: bool,
}

impl Bound {
    fn new(bits: BitSequence, inclusive: bool) -> Self {
        Self { bits, inclusive }
    }

    fn inclusive(bits: BitSequence) -> Self {
        Self::new(bits, true)
    }
}

fn tighter_lower(current: Option<Bound>, candidate: Bound) -> Bound {
    match current {
        None => candidate,
        Some(current) => match candidate.bits.cmp(&current.bits) {
            std::cmp::Ordering::Greater => candidate,
            std::cmp::Ordering::Less => current,
            std::cmp::Ordering::Equal => Bound::new(current.bits, current.inclusive && candidate.inclusive),
        },
    }
}

fn tighter_upper(current: Option<Bound>, candidate: Bound) -> Bound {
    match current {
        None => candidate,
        Some(current) => match candidate.bits.cmp(&current.bits) {
            std::cmp::Ordering::Less => candidate,
            std::cmp::Ordering::Greater => current,
            std::cmp::Ordering::Equal => Bound::new(current.bits, current.inclusive && candidate.inclusive),
        },
    }
}

/// Encoded scan range with paging
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plan {
    lower: Option<Bound>,
    upper: Option<Bound>,
    direction: Direction,
    pub(crate) limit: Option<usize>,
    pub(crate) skip: usize,
}

impl Plan {
    fn start(&self) -> Option<&Bound> {
        match self.direction {
            Direction::Forward => self.lower.as_ref(),
            Direction::Backward => self.upper.as_ref(),
        }
    }

    /// Whether `bits` lies beyond the far end of the range
    fn past_end(&self, bits: &BitSequence) -> bool {
        match self.direction {
            Direction::Forward => self
                .upper
                .as_ref()
                .is_some_and(|b| *bits > b.bits || (*bits == b.bits && !b.inclusive)),
            Direction::Backward => self
                .lower
                .as_ref()
                .is_some_and(|b| *bits < b.bits || (*bits == b.bits && !b.inclusive)),
        }
    }

    /// Next entry after `position`, consuming `skip` entries first
    ///
    /// `position` is the last key visited (returned or skipped) and is
    /// advanced past every entry this call looks at.
    pub(crate) fn advance(
        &self,
        tree: &PersistentTree,
        position: &mut Option<BitSequence>,
        skip: &mut usize,
    ) -> Result<Option<(BitSequence, Stored)>> {
        loop {
            let found = match position.as_ref() {
                Some(last) => tree.seek(Some(last), self.direction, false)?,
                None => {
                    let start = self.start();
                    tree.seek(
                        start.map(|b| &b.bits),
                        self.direction,
                        start.map_or(false, |b| b.inclusive),
                    )?
                }
            };
            let Some((bits, slot)) = found else {
                return Ok(None);
            };
            if self.past_end(&bits) {
                return Ok(None);
            }
            *position = Some(bits.clone());
            if *skip > 0 {
                *skip -= 1;
                continue;
            }
            return Ok(Some((bits, slot)));
        }
    }
}
