//! SQL dialects and their identifier rules

use std::fmt;

use serde::Serialize;

use crate::util::{hash8, truncate_to_byte_boundary};

/// Target SQL engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SqlDialect {
    Pgsql,
    Mssql,
}

impl SqlDialect {
    pub fn rules(self) -> DialectRules {
        match self {
            SqlDialect::Pgsql => DialectRules {
                dialect: self,
                max_identifier_length: 63,
                measure: LengthMeasure::Bytes,
            },
            SqlDialect::Mssql => DialectRules {
                dialect: self,
                max_identifier_length: 128,
                measure: LengthMeasure::Characters,
            },
        }
    }

    /// Parse a dialect name as accepted on the command line.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pgsql" | "postgres" | "postgresql" => Some(SqlDialect::Pgsql),
            "mssql" | "sqlserver" => Some(SqlDialect::Mssql),
            _ => None,
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Pgsql => f.write_str("Pgsql"),
            SqlDialect::Mssql => f.write_str("Mssql"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthMeasure {
    Bytes,
    Characters,
}

/// Identifier length limit and shortening function of a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectRules {
    pub dialect: SqlDialect,
    pub max_identifier_length: usize,
    pub measure: LengthMeasure,
}

const HASH_SUFFIX_LENGTH: usize = 9; // "_" + 8 hex chars

impl DialectRules {
    pub fn identifier_length(&self, identifier: &str) -> usize {
        match self.measure {
            LengthMeasure::Bytes => identifier.len(),
            LengthMeasure::Characters => identifier.chars().count(),
        }
    }

    pub fn fits(&self, identifier: &str) -> bool {
        self.identifier_length(identifier) <= self.max_identifier_length
    }

    /// Shorten an identifier, hashing the identifier itself.
    pub fn shorten(&self, identifier: &str) -> String {
        self.shorten_with_signature(identifier, identifier)
    }

    /// Shorten an identifier that exceeds the limit to `{prefix}_{hash8(signature)}`.
    ///
    /// Identifiers within the limit are returned unchanged.
    pub fn shorten_with_signature(&self, identifier: &str, signature: &str) -> String {
        if self.fits(identifier) {
            return identifier.to_string();
        }

        let keep = self.max_identifier_length - HASH_SUFFIX_LENGTH;
        let prefix = match self.measure {
            LengthMeasure::Bytes => truncate_to_byte_boundary(identifier, keep).to_string(),
            LengthMeasure::Characters => identifier.chars().take(keep).collect(),
        };

        format!("{}_{}", prefix, hash8(signature))
    }

    /// Stage label used in collision reports, e.g. `Pgsql:63-bytes`.
    pub fn label(&self) -> String {
        let unit = match self.measure {
            LengthMeasure::Bytes => "bytes",
            LengthMeasure::Characters => "chars",
        };
        format!("{}:{}-{}", self.dialect, self.max_identifier_length, unit)
    }
}
