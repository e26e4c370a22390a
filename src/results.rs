//! Result shapes and their normalization.
//!
//! Clients hand back either a bare row sequence (with the command tag and the
//! server row count riding along as side-channel attributes) or an already
//! structured result. [`normalize`] folds both into a [`CanonicalResult`] right at
//! the client boundary so nothing downstream has to branch on the shape again.

mod row;

pub use row::{ResultRow, rows_from_values};

/// Rows returned directly by a client, plus the out-of-band attributes it reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSequence {
    pub rows: Vec<ResultRow>,
    /// Command tag such as `SELECT`, `UPDATE` or `DELETE`
    pub command: Option<String>,
    /// Row count reported by the server; for UPDATE/DELETE this is the affected count
    pub count: Option<u64>,
}

impl RowSequence {
    #[must_use]
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self {
            rows,
            command: None,
            count: None,
        }
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Raw response of [`ClientConnection::execute`](crate::client::ClientConnection::execute).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientResponse {
    /// The client returned rows directly
    Rows(RowSequence),
    /// The client already returned the canonical shape
    Structured(CanonicalResult),
}

/// Canonical result of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalResult {
    pub rows: Vec<ResultRow>,
    /// Number of rows in `rows` when the client returned rows directly
    pub row_count: usize,
    pub command: Option<String>,
    /// Server-reported affected count, populated only for UPDATE/DELETE
    pub affected: Option<u64>,
}

impl CanonicalResult {
    /// Whether the command tag names a mutation that reports an affected count.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.command.as_deref().is_some_and(is_mutation_command)
    }

    /// Convert into the paired shape older callers expect.
    #[must_use]
    pub fn into_legacy(self) -> LegacyResult {
        if self.is_mutation() {
            let affected = self.affected.unwrap_or(0);
            LegacyResult::Paired(self, affected)
        } else {
            LegacyResult::Rows(self)
        }
    }
}

/// Result in the legacy shape: UPDATE/DELETE are paired with their affected count.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyResult {
    Rows(CanonicalResult),
    Paired(CanonicalResult, u64),
}

impl LegacyResult {
    #[must_use]
    pub fn result(&self) -> &CanonicalResult {
        match self {
            LegacyResult::Rows(result) | LegacyResult::Paired(result, _) => result,
        }
    }

    #[must_use]
    pub fn affected(&self) -> Option<u64> {
        match self {
            LegacyResult::Rows(_) => None,
            LegacyResult::Paired(_, affected) => Some(*affected),
        }
    }
}

/// Fold any client response into a [`CanonicalResult`].
///
/// Structured responses pass through untouched. Row sequences are wrapped with
/// `row_count` set to the sequence length; the side-channel count becomes
/// `affected` only for UPDATE/DELETE, since a DELETE without RETURNING yields no
/// rows yet may have removed many.
#[must_use]
pub fn normalize(response: ClientResponse) -> CanonicalResult {
    match response {
        ClientResponse::Structured(result) => result,
        ClientResponse::Rows(sequence) => {
            let affected = match sequence.command.as_deref() {
                Some(command) if is_mutation_command(command) => sequence.count,
                _ => None,
            };
            CanonicalResult {
                row_count: sequence.rows.len(),
                rows: sequence.rows,
                command: sequence.command,
                affected,
            }
        }
    }
}

fn is_mutation_command(command: &str) -> bool {
    let verb = command.split_whitespace().next().unwrap_or_default();
    verb.eq_ignore_ascii_case("UPDATE") || verb.eq_ignore_ascii_case("DELETE")
}
