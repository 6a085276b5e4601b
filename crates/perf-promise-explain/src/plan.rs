use serde::Serialize;
use serde_json::Value;

/// Classification of one statement's execution plan.
///
/// A scanned table is present exactly when the plan is a full table scan; the
/// constructors are the only way to build one, so the pairing always holds.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PlanInfo {
    is_full_scan: bool,
    scanned_table: Option<String>,
    /// Backend-specific plan payload, kept for diagnostics only.
    raw: Option<Value>,
}

impl PlanInfo {
    /// A statement that was never explained (non-select, or the probe failed).
    pub fn none() -> Self {
        Self::default()
    }

    /// A plan that reads `table` in full.
    pub fn full_scan(table: impl Into<String>, raw: Option<Value>) -> Self {
        Self {
            is_full_scan: true,
            scanned_table: Some(table.into()),
            raw,
        }
    }

    /// A plan that only uses indexed access paths.
    pub fn indexed(raw: Option<Value>) -> Self {
        Self {
            is_full_scan: false,
            scanned_table: None,
            raw,
        }
    }

    pub fn is_full_scan(&self) -> bool {
        self.is_full_scan
    }

    pub fn scanned_table(&self) -> Option<&str> {
        self.scanned_table.as_deref()
    }

    pub fn raw(&self) -> Option<&Value> {
        self.raw.as_ref()
    }

    /// Whether a plan payload was captured at all.
    pub fn was_explained(&self) -> bool {
        self.raw.is_some()
    }

    /// The backend-agnostic part of the plan, used to group identical statements.
    pub fn shape(&self) -> (bool, Option<&str>) {
        (self.is_full_scan, self.scanned_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scan_always_carries_a_table() {
        let plan = PlanInfo::full_scan("users", None);
        assert!(plan.is_full_scan());
        assert_eq!(plan.scanned_table(), Some("users"));
        assert_eq!(plan.shape(), (true, Some("users")));
    }

    #[test]
    fn indexed_and_none_have_no_table() {
        let indexed = PlanInfo::indexed(Some(serde_json::json!([])));
        assert!(!indexed.is_full_scan());
        assert!(indexed.scanned_table().is_none());
        assert!(indexed.was_explained());

        let none = PlanInfo::none();
        assert_eq!(none.shape(), (false, None));
        assert!(!none.was_explained());
    }
}
