use serde::Serialize;

/// One user table as SQLite reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLayout {
    pub name: String,
    pub columns: Vec<ColumnLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnLayout {
    pub name: String,
    /// Declared type, empty when the column has none.
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

impl TableLayout {
    pub fn column(&self, name: &str) -> Option<&ColumnLayout> {
        self.columns.iter().find(|column| column.name == name)
    }
}
