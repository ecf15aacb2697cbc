//! Eligibility rules.
//!
//! Decides whether a catalog record should have a document in the search
//! index. Both the reconciliation sweep and the event consumer evaluate the
//! same [`EligibilityRules`], so the two paths converge on the same index.

use std::fmt;

use crate::types::RecordRef;

/// Catalog holding records migrated from the previous system; never indexed.
pub const LEGACY_CATALOG: &str = "urn:nbn:fi:att:data-catalog-legacy";

/// Catalog holding preserved copies of datasets.
pub const PRESERVATION_CATALOG: &str = "urn:nbn:fi:att:data-catalog-pas";

/// Preservation state of a record that has been accepted into preservation.
pub const ACCEPTED_PRESERVATION_STATE: i64 = 120;

/// Why a record is kept out of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// The record names no source catalog.
    MissingCatalog,
    /// The record belongs to an excluded source catalog.
    ExcludedCatalog,
    /// The record is not published.
    Unpublished,
    /// The record is deprecated.
    Deprecated,
    /// A newer version of the record exists.
    Superseded,
    /// The record is a preserved copy of an origin record that is indexed.
    PreservationVariant,
    /// The record is in the preservation catalog but not yet accepted.
    PreservationPending,
}

impl Exclusion {
    /// Whether the record should never reach the index at all, as opposed to
    /// a known record that is deliberately removed from it.
    pub fn is_source_exclusion(&self) -> bool {
        matches!(
            self,
            Self::MissingCatalog | Self::ExcludedCatalog | Self::Unpublished
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingCatalog => "missing_catalog",
            Self::ExcludedCatalog => "excluded_catalog",
            Self::Unpublished => "unpublished",
            Self::Deprecated => "deprecated",
            Self::Superseded => "superseded",
            Self::PreservationVariant => "preservation_variant",
            Self::PreservationPending => "preservation_pending",
        }
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eligibility predicate.
#[derive(Debug, Clone)]
pub struct EligibilityRules {
    /// Source catalogs whose records are never indexed.
    pub excluded_catalogs: Vec<String>,
    /// Catalog whose records are indexed only once accepted into preservation.
    pub preservation_catalog: Option<String>,
    /// Preservation state that counts as accepted.
    pub accepted_preservation_state: i64,
}

impl Default for EligibilityRules {
    fn default() -> Self {
        Self {
            excluded_catalogs: vec![LEGACY_CATALOG.to_string()],
            preservation_catalog: Some(PRESERVATION_CATALOG.to_string()),
            accepted_preservation_state: ACCEPTED_PRESERVATION_STATE,
        }
    }
}

impl EligibilityRules {
    /// Check the rules that depend only on where the record comes from.
    pub fn source_check(&self, record: &RecordRef) -> Result<(), Exclusion> {
        let catalog_id = record
            .catalog_id
            .as_deref()
            .ok_or(Exclusion::MissingCatalog)?;

        if self.excluded_catalogs.iter().any(|c| c == catalog_id) {
            return Err(Exclusion::ExcludedCatalog);
        }
        if !record.published {
            return Err(Exclusion::Unpublished);
        }
        Ok(())
    }

    /// Whether the record sits in the preservation catalog without having
    /// been accepted yet.
    pub fn is_preservation_pending(&self, record: &RecordRef) -> bool {
        match (&self.preservation_catalog, &record.catalog_id) {
            (Some(preservation), Some(catalog)) if preservation == catalog => {
                record.preservation_state.unwrap_or(0) != self.accepted_preservation_state
            }
            _ => false,
        }
    }

    /// Evaluate the full predicate.
    pub fn check(&self, record: &RecordRef) -> Result<(), Exclusion> {
        self.source_check(record)?;

        if record.deprecated {
            return Err(Exclusion::Deprecated);
        }
        if record.next_version_id.is_some() {
            return Err(Exclusion::Superseded);
        }
        if record.has_origin_version {
            return Err(Exclusion::PreservationVariant);
        }
        if self.is_preservation_pending(record) {
            return Err(Exclusion::PreservationPending);
        }
        Ok(())
    }

    /// Whether the record belongs in the index.
    pub fn is_eligible(&self, record: &RecordRef) -> bool {
        self.check(record).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordId;

    const IDA: &str = "urn:nbn:fi:att:data-catalog-ida";

    #[test]
    fn test_published_record_is_eligible() {
        let rules = EligibilityRules::default();
        assert!(rules.is_eligible(&RecordRef::new("cr-1", IDA)));
    }

    #[test]
    fn test_source_exclusions() {
        let rules = EligibilityRules::default();

        let mut record = RecordRef::new("cr-1", IDA);
        record.catalog_id = None;
        assert_eq!(rules.check(&record), Err(Exclusion::MissingCatalog));

        let record = RecordRef::new("cr-1", LEGACY_CATALOG);
        assert_eq!(rules.check(&record), Err(Exclusion::ExcludedCatalog));

        let mut record = RecordRef::new("cr-1", IDA);
        record.published = false;
        assert_eq!(rules.check(&record), Err(Exclusion::Unpublished));
        assert!(Exclusion::Unpublished.is_source_exclusion());
    }

    #[test]
    fn test_business_exclusions() {
        let rules = EligibilityRules::default();

        let mut record = RecordRef::new("cr-1", IDA);
        record.deprecated = true;
        assert_eq!(rules.check(&record), Err(Exclusion::Deprecated));

        let mut record = RecordRef::new("cr-1", IDA);
        record.next_version_id = Some(RecordId::new("cr-2"));
        assert_eq!(rules.check(&record), Err(Exclusion::Superseded));

        let mut record = RecordRef::new("cr-1", IDA);
        record.has_origin_version = true;
        assert_eq!(rules.check(&record), Err(Exclusion::PreservationVariant));
        assert!(!Exclusion::PreservationVariant.is_source_exclusion());
    }

    #[test]
    fn test_preservation_catalog_requires_accepted_state() {
        let rules = EligibilityRules::default();

        let mut record = RecordRef::new("cr-1", PRESERVATION_CATALOG);
        assert_eq!(rules.check(&record), Err(Exclusion::PreservationPending));

        record.preservation_state = Some(80);
        assert!(rules.is_preservation_pending(&record));

        record.preservation_state = Some(ACCEPTED_PRESERVATION_STATE);
        assert!(rules.is_eligible(&record));
    }

    #[test]
    fn test_preservation_rule_can_be_disabled() {
        let rules = EligibilityRules {
            preservation_catalog: None,
            ..EligibilityRules::default()
        };
        assert!(rules.is_eligible(&RecordRef::new("cr-1", PRESERVATION_CATALOG)));
    }
}
