use serde::{Deserialize, Serialize};

/// Tables covered by schema introspection, in display order.
pub const RECORD_TABLES: [&str; 4] = ["jobs", "tasks", "task_dependencies", "streams"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
}

/// Introspected layout of the record tables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaDescription {
    pub tables: Vec<TableSchema>,
    /// Whether the deployment stores task dependency edges.
    pub dependencies_enabled: bool,
}

impl SchemaDescription {
    /// Build a description with tables in [`RECORD_TABLES`] order.
    pub fn new(mut tables: Vec<TableSchema>, dependencies_enabled: bool) -> Self {
        tables.sort_by_key(|t| {
            RECORD_TABLES
                .iter()
                .position(|name| *name == t.name)
                .unwrap_or(RECORD_TABLES.len())
        });
        Self {
            tables,
            dependencies_enabled,
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }
}
