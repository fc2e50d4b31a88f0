use std::sync::Arc;

use rand::Rng;

use super::clock::Clock;
use super::repository::{ExamRepository, IdentifierScope, RepositoryError};
use crate::config::EngineConfig;

/// Unambiguous upper-case alphabet (no `0/O`, `1/I/L`) used for access credentials.
pub const ACCESS_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// How candidates for a scope are produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationRule {
    /// `{prefix}{n:0width}` where `n` follows the highest value already in scope.
    Sequential { prefix: String, width: usize },
    /// `length` characters drawn uniformly from `alphabet`.
    Random {
        alphabet: &'static [u8],
        length: usize,
    },
}

/// Candidate value that was free in scope when checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub value: String,
    pub attempts: u32,
    /// Set when every candidate collided and a timestamp suffix was appended.
    pub fallback: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    #[error("could not insert a unique value for {scope} after {cycles} cycle(s)")]
    Exhausted { scope: IdentifierScope, cycles: u32 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Collision-resistant allocator. Existence checks are advisory: the storage uniqueness
/// constraint is authoritative and insert-time violations restart the whole cycle.
pub struct IdentifierGenerator<R> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    attempts: u32,
    insert_retries: u32,
}

impl<R> IdentifierGenerator<R>
where
    R: ExamRepository + 'static,
{
    pub fn new(repository: Arc<R>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            repository,
            clock,
            attempts: config.identifier_attempts.max(1),
            insert_retries: config.identifier_insert_retries.max(1),
        }
    }

    /// Produce a value not present in `scope` at check time.
    pub fn candidate(
        &self,
        scope: &IdentifierScope,
        rule: &GenerationRule,
    ) -> Result<Allocation, RepositoryError> {
        let base = match rule {
            GenerationRule::Sequential { prefix, .. } => {
                let highest = self.repository.highest_identifier(scope)?;
                highest
                    .as_deref()
                    .and_then(|value| sequence_number(value, prefix))
                    .unwrap_or(0)
            }
            GenerationRule::Random { .. } => 0,
        };

        let mut last = String::new();
        for attempt in 1..=self.attempts {
            let value = match rule {
                GenerationRule::Sequential { prefix, width } => {
                    format_sequential(prefix, *width, base + u64::from(attempt))
                }
                GenerationRule::Random { alphabet, length } => random_token(alphabet, *length),
            };

            if !self.repository.identifier_exists(scope, &value)? {
                return Ok(Allocation {
                    value,
                    attempts: attempt,
                    fallback: false,
                });
            }

            tracing::debug!(%scope, candidate = %value, attempt, "identifier candidate taken");
            last = value;
        }

        let now = self.clock.now();
        let suffix = now
            .timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros());
        let value = format!("{last}-{suffix}");
        tracing::warn!(
            %scope,
            attempts = self.attempts,
            fallback = %value,
            "identifier candidates exhausted, using timestamp fallback"
        );

        Ok(Allocation {
            value,
            attempts: self.attempts,
            fallback: true,
        })
    }

    /// Allocate a candidate and hand it to `insert`; a uniqueness violation on this scope's
    /// constraint restarts the cycle with a fresh candidate.
    pub fn insert_unique<T, F>(
        &self,
        scope: &IdentifierScope,
        rule: &GenerationRule,
        mut insert: F,
    ) -> Result<T, IdentifierError>
    where
        F: FnMut(&str) -> Result<T, RepositoryError>,
    {
        for cycle in 1..=self.insert_retries {
            let allocation = self.candidate(scope, rule)?;
            match insert(&allocation.value) {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::Conflict(constraint)) if constraint == scope.constraint() => {
                    tracing::warn!(
                        %scope,
                        candidate = %allocation.value,
                        cycle,
                        "identifier collided at insert, retrying"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(IdentifierError::Exhausted {
            scope: *scope,
            cycles: self.insert_retries,
        })
    }
}

pub fn random_token(alphabet: &[u8], length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())]))
        .collect()
}

fn format_sequential(prefix: &str, width: usize, number: u64) -> String {
    format!("{prefix}{number:0width$}")
}

/// Leading digits after `prefix`; fallback values carry a `-timestamp` tail which is ignored.
fn sequence_number(value: &str, prefix: &str) -> Option<u64> {
    let digits: String = value
        .strip_prefix(prefix)?
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_number_ignores_fallback_suffix() {
        assert_eq!(sequence_number("REG001-00042", "REG001-"), Some(42));
        assert_eq!(
            sequence_number("REG001-00042-1767225600000000000", "REG001-"),
            Some(42)
        );
        assert_eq!(sequence_number("OTHER-7", "REG001-"), None);
    }

    #[test]
    fn sequential_values_are_zero_padded() {
        assert_eq!(format_sequential("REG-", 5, 7), "REG-00007");
        assert_eq!(format_sequential("REG-", 2, 123), "REG-123");
    }

    #[test]
    fn random_tokens_stay_within_alphabet() {
        let token = random_token(ACCESS_ALPHABET, 24);
        assert_eq!(token.len(), 24);
        assert!(token.bytes().all(|byte| ACCESS_ALPHABET.contains(&byte)));
    }
}
