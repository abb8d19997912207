//! Verification helpers for recorded command logs

use thiserror::Error;

/// Verification error types
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerificationError {
    #[error("No command containing '{pattern}' was issued")]
    CommandNotFound { pattern: String },

    #[error("Expected {expected} commands containing '{pattern}', found {actual}")]
    CommandCountMismatch {
        pattern: String,
        expected: usize,
        actual: usize,
    },

    #[error("Command '{first}' was expected before '{second}'")]
    OrderViolation { first: String, second: String },

    #[error("Commands for '{group}' were interleaved with other commands at index {index}")]
    Interleaved { group: String, index: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Assertion helper over a recorded command log
#[derive(Debug, Clone)]
pub struct CommandLog {
    commands: Vec<String>,
}

impl CommandLog {
    /// Wrap a recorded command list
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    /// Index of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands.iter().position(|c| c.contains(pattern))
    }

    /// Number of commands containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.commands.iter().filter(|c| c.contains(pattern)).count()
    }

    /// Verify that some command contains `pattern`
    pub fn assert_issued(&self, pattern: &str) -> VerifyResult<()> {
        self.position(pattern)
            .map(|_| ())
            .ok_or_else(|| VerificationError::CommandNotFound {
                pattern: pattern.to_string(),
            })
    }

    /// Verify that no command contains `pattern`
    pub fn assert_not_issued(&self, pattern: &str) -> VerifyResult<()> {
        self.assert_count(pattern, 0)
    }

    /// Verify exactly `expected` commands contain `pattern`
    pub fn assert_count(&self, pattern: &str, expected: usize) -> VerifyResult<()> {
        let actual = self.count(pattern);
        if actual != expected {
            return Err(VerificationError::CommandCountMismatch {
                pattern: pattern.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Verify the first command containing `first` precedes the first
    /// command containing `second`
    pub fn assert_before(&self, first: &str, second: &str) -> VerifyResult<()> {
        let a = self.position(first).ok_or_else(|| VerificationError::CommandNotFound {
            pattern: first.to_string(),
        })?;
        let b = self.position(second).ok_or_else(|| VerificationError::CommandNotFound {
            pattern: second.to_string(),
        })?;
        if a >= b {
            return Err(VerificationError::OrderViolation {
                first: first.to_string(),
                second: second.to_string(),
            });
        }
        Ok(())
    }

    /// Verify that all commands containing `group` form one contiguous run
    pub fn assert_contiguous(&self, group: &str) -> VerifyResult<()> {
        let indices: Vec<usize> = self
            .commands
            .iter()
            .enumerate()
            .filter(|(_, c)| c.contains(group))
            .map(|(i, _)| i)
            .collect();

        for pair in indices.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(VerificationError::Interleaved {
                    group: group.to_string(),
                    index: pair[0] + 1,
                });
            }
        }
        Ok(())
    }
}
