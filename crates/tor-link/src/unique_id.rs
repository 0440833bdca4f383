//! Helper for unique identifiers for connections.

use std::fmt::{Display, Formatter};

/// Unique identifier for a connection, for use in log messages.
///
/// These identifiers are unique per engine.  Unlike a
/// [`ConnHandle`](crate::ConnHandle), they are never reused, so two
/// log lines with the same UniqId are about the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniqId(u64);

impl Display for UniqId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conn {}", self.0)
    }
}

/// Counter for allocating connection unique ids.
#[derive(Debug, Default)]
pub(crate) struct UniqIdContext {
    /// Next value to be handed out.
    next_id: u64,
}

impl UniqIdContext {
    /// Create a new UniqIdContext
    pub(crate) fn new() -> Self {
        UniqIdContext { next_id: 0 }
    }
    /// Construct a new UniqId
    pub(crate) fn next(&mut self) -> UniqId {
        let id = self.next_id;
        self.next_id += 1;
        UniqId(id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn conn_unique_id() {
        let mut ctx = UniqIdContext::new();
        let ids: Vec<UniqId> = (0..10).map(|_| ctx.next()).collect();

        // Make sure we got distinct numbers
        let mut all_nums: Vec<_> = ids.iter().map(|x| x.0).collect();
        all_nums.sort_unstable();
        all_nums.dedup();
        assert_eq!(all_nums.len(), ids.len());

        assert_eq!(format!("{}", ids[3]), "Conn 3");
    }
}
