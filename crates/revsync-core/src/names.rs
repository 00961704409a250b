//! Analyzer-generated symbol names.
//!
//! Auto-analysis names things like `sub_401000` or `loc_10A4`. Renames to
//! such names are not human edits and are never published.

/// Default name prefixes the analyzer assigns automatically.
pub const RESERVED_PREFIXES: &[&str] = &[
    "sub_", "locret_", "loc_", "off_", "seg_", "asc_", "byte_", "word_", "dword_", "qword_",
    "byte3_", "xmmword_", "ymmword_", "packreal_", "flt_", "dbl_", "tbyte_", "stru_",
    "custdata_", "algn_", "unk_",
];

/// A set of reserved name prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedNames {
    prefixes: Vec<String>,
}

impl ReservedNames {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `name` looks analyzer-generated.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }
}

impl Default for ReservedNames {
    fn default() -> Self {
        Self::new(RESERVED_PREFIXES.iter().copied())
    }
}
