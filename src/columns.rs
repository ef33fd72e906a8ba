//! Header resolution for detail reports.
//!
//! Each semantic field has an ordered list of accepted spellings. The first
//! spelling present in the (trimmed) header row wins. Matching is exact and
//! case-sensitive.

/// Phone number column spellings, highest priority first
pub const DEFAULT_PHONE_COLUMNS: &[&str] = &[
    "Número celular asignado",
    "Número de Teléfono",
    "Número celular",
    "Celular",
];

/// Evaluation stage column spellings
pub const DEFAULT_STAGE_COLUMNS: &[&str] = &["Evaluación", "Evaluacion", "Etapa"];

/// Commission amount column spellings
pub const DEFAULT_COMMISSION_COLUMNS: &[&str] =
    &["Comisión", "Comision", "Monto Comisión", "Monto"];

/// Recharge date column spellings; the latest date dates a paid artifact
pub const DEFAULT_DATE_COLUMNS: &[&str] = &["Fecha Primera Recarga", "Fecha Recarga"];

/// Ordered rule table for one semantic field
#[derive(Debug, Clone)]
pub struct ColumnResolver {
    accepted: Vec<String>,
}

impl ColumnResolver {
    pub fn new<S: AsRef<str>>(accepted: &[S]) -> Self {
        Self {
            accepted: accepted.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    /// Canonical header present in `headers`, by priority
    pub fn resolve<'h, S: AsRef<str>>(&self, headers: &'h [S]) -> Option<&'h str> {
        self.accepted.iter().find_map(|candidate| {
            headers
                .iter()
                .map(|h| h.as_ref())
                .find(|h| h.trim() == candidate.as_str())
        })
    }

    /// Accepted spellings joined for error messages
    pub fn describe(&self) -> String {
        self.accepted.join(", ")
    }
}
