use katana_payload::FieldNames;

/// Controls how schema mappings are decoded and read.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Field-name table used when reading schema documents.
    /// `None` reads keys verbatim.
    pub field_names: Option<FieldNames>,
    /// Maximum encoded size of one mappings update.
    pub max_mappings_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            field_names: Some(FieldNames::compact()),
            max_mappings_size: 8 * 1024 * 1024,
        }
    }
}

impl RegistryConfig {
    pub fn with_field_names(mut self, field_names: Option<FieldNames>) -> Self {
        self.field_names = field_names;
        self
    }

    pub fn with_max_mappings_size(mut self, max: usize) -> Self {
        self.max_mappings_size = max;
        self
    }
}
