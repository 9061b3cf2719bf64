//! Identifier value types
//!
//! All identifiers compare by ordinal (byte-wise) string equality and are
//! case-preserving, so they can be used directly as map keys and sort keys.

use std::fmt;

use serde::Serialize;

macro_rules! identifier_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier_newtype!(
    /// Physical database schema name (e.g. `edfi`)
    DbSchemaName
);
identifier_newtype!(
    /// Column name within a table
    DbColumnName
);
identifier_newtype!(DbIndexName);
identifier_newtype!(DbTriggerName);

/// Schema-qualified table (or view) name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DbTableName {
    pub schema: DbSchemaName,
    pub name: String,
}

impl DbTableName {
    pub fn new(schema: DbSchemaName, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
        }
    }

    /// Same schema, different table name
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self::new(self.schema.clone(), name)
    }
}

impl fmt::Display for DbTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Global resource identity key shared by abstract and concrete resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedResourceName {
    pub project_name: String,
    pub resource_name: String,
}

impl QualifiedResourceName {
    pub fn new(project_name: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            resource_name: resource_name.into(),
        }
    }
}

impl fmt::Display for QualifiedResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project_name, self.resource_name)
    }
}
