//! Three-state owner tracking for directory statistics
//!
//! Every directory carries an owner uid and gid for its direct children and
//! for its whole subtree. Each one is a small join-semilattice:
//!
//! ```text
//!   Unseen  ──►  Single(id)  ──►  Mixed
//!    (-1)          (id)           (NULL)
//! ```
//!
//! Merging only ever moves right, and `merge` is associative and commutative,
//! so batches can be folded in any order and still produce the same state.
//! In SQLite the states are stored as `-1`, the id, and `NULL`.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};

/// Column value meaning "no files observed yet"
pub const OWNER_UNSEEN: i64 = -1;

/// Owner state of a set of files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OwnerState {
    /// No file has been observed
    #[default]
    Unseen,

    /// Every observed file has this owner
    Single(u32),

    /// At least two different owners were observed
    Mixed,
}

impl OwnerState {
    /// Join two states
    pub fn merge(self, other: OwnerState) -> OwnerState {
        match (self, other) {
            (OwnerState::Mixed, _) | (_, OwnerState::Mixed) => OwnerState::Mixed,
            (OwnerState::Unseen, state) | (state, OwnerState::Unseen) => state,
            (OwnerState::Single(a), OwnerState::Single(b)) if a == b => OwnerState::Single(a),
            (OwnerState::Single(_), OwnerState::Single(_)) => OwnerState::Mixed,
        }
    }

    /// Fold one file's owner into the state
    pub fn observe(&mut self, id: u32) {
        *self = self.merge(OwnerState::Single(id));
    }
}

impl ToSql for OwnerState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match *self {
            OwnerState::Unseen => Value::Integer(OWNER_UNSEEN),
            OwnerState::Single(id) => Value::Integer(i64::from(id)),
            OwnerState::Mixed => Value::Null,
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

impl FromSql for OwnerState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Null => Ok(OwnerState::Mixed),
            ValueRef::Integer(OWNER_UNSEEN) => Ok(OwnerState::Unseen),
            ValueRef::Integer(id) => u32::try_from(id)
                .map(OwnerState::Single)
                .map_err(|_| FromSqlError::OutOfRange(id)),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}
