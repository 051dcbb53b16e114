//! Entity ids carried on the entity-update channel.
//!
//! Ids look like `<source>-<kind>-<numeric id>`, e.g. `mrs-serie-123`. The
//! entity type is everything before the second dash (`mrs-serie`); ids with
//! fewer than two dashes are their own type.

use std::fmt;

/// Return the entity-type prefix of `id`.
pub fn entity_type(id: &str) -> &str {
    match id.match_indices('-').nth(1) {
        Some((second_dash, _)) => &id[..second_dash],
        None => id,
    }
}

/// Borrowed view of an entity id split into its type prefix and remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityId<'a> {
    raw: &'a str,
    type_len: usize,
}

impl<'a> EntityId<'a> {
    pub fn parse(raw: &'a str) -> Self {
        Self {
            raw,
            type_len: entity_type(raw).len(),
        }
    }

    pub fn as_str(&self) -> &'a str {
        self.raw
    }

    pub fn entity_type(&self) -> &'a str {
        &self.raw[..self.type_len]
    }

    /// The part after the type prefix, `None` when the id has no prefix.
    pub fn local_id(&self) -> Option<&'a str> {
        self.raw.get(self.type_len + 1..).filter(|rest| !rest.is_empty())
    }

    /// Numeric form of [`local_id`](Self::local_id), when it is numeric.
    pub fn numeric_id(&self) -> Option<u64> {
        self.local_id()?.parse().ok()
    }
}

impl fmt::Display for EntityId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.raw)
    }
}
