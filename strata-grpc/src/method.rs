//! Call selection by full method name.

/// Split `/service/method` into its parts.
///
/// Identifiers without a separating slash yield `("unknown", "unknown")`.
pub fn split_method_name(full_method: &str) -> (&str, &str) {
    let trimmed = full_method.strip_prefix('/').unwrap_or(full_method);
    trimmed.split_once('/').unwrap_or(("unknown", "unknown"))
}

/// The one (service, method) pair whose responses get cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMethod {
    pub service: String,
    pub method: String,
}

impl CachedMethod {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// `strata.Store/Series`, the server-streaming series read.
    pub fn store_series() -> Self {
        Self::new("strata.Store", "Series")
    }

    pub fn matches(&self, full_method: &str) -> bool {
        let (service, method) = split_method_name(full_method);
        service == self.service && method == self.method
    }

    /// Request path as sent on the wire.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl Default for CachedMethod {
    fn default() -> Self {
        Self::store_series()
    }
}
