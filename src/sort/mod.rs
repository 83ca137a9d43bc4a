//! Sort key descriptions shared by every input of a merge run.

mod collation;

use std::{fmt, sync::Arc};

use arrow::compute::SortOptions;
pub use collation::{CaseInsensitive, Collator};

/// One column of the sort key.
#[derive(Clone, Debug)]
pub struct SortColumn {
    /// Position of the column in every input schema.
    pub position: usize,
    /// Direction and null placement.
    pub options: SortOptions,
    /// Optional collation, only valid on text columns.
    pub collation: Option<Arc<dyn Collator>>,
}

impl SortColumn {
    /// Ascending column with nulls placed first.
    pub fn asc(position: usize) -> Self {
        Self {
            position,
            options: SortOptions {
                descending: false,
                nulls_first: true,
            },
            collation: None,
        }
    }

    /// Descending column with nulls placed first.
    pub fn desc(position: usize) -> Self {
        Self {
            position,
            options: SortOptions {
                descending: true,
                nulls_first: true,
            },
            collation: None,
        }
    }

    /// Override null placement.
    pub fn nulls_first(self, nulls_first: bool) -> Self {
        SortColumn {
            options: SortOptions {
                nulls_first,
                ..self.options
            },
            ..self
        }
    }

    /// Compare text values of this column through `collator`.
    pub fn with_collation(self, collator: Arc<dyn Collator>) -> Self {
        SortColumn {
            collation: Some(collator),
            ..self
        }
    }

    /// Stable identifier, e.g. `2 DESC NULLS LAST COLLATE und-u-ks-level2`.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} NULLS {}",
            self.position,
            if self.options.descending {
                "DESC"
            } else {
                "ASC"
            },
            if self.options.nulls_first {
                "FIRST"
            } else {
                "LAST"
            },
        )?;
        if let Some(collator) = &self.collation {
            write!(f, " COLLATE {}", collator.locale())?;
        }
        Ok(())
    }
}

/// Ordered sort key: primary column first, then tie-breakers.
///
/// Immutable for the lifetime of a merge run.
#[derive(Clone, Debug, Default)]
pub struct SortDescription {
    columns: Vec<SortColumn>,
}

impl SortDescription {
    /// Build a description from columns in priority order.
    pub fn new(columns: Vec<SortColumn>) -> Self {
        Self { columns }
    }

    /// Ascending description over the given positions.
    pub fn ascending(positions: impl IntoIterator<Item = usize>) -> Self {
        Self::new(positions.into_iter().map(SortColumn::asc).collect())
    }

    /// Key columns in priority order.
    pub fn columns(&self) -> &[SortColumn] {
        &self.columns
    }

    /// Number of key columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the description names no column.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether any key column compares through a collator.
    pub fn has_collation(&self) -> bool {
        self.columns.iter().any(|column| column.collation.is_some())
    }

    /// Key column positions in priority order.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns.iter().map(|column| column.position)
    }
}

impl FromIterator<SortColumn> for SortDescription {
    fn from_iter<T: IntoIterator<Item = SortColumn>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_ids_are_stable() {
        assert_eq!(SortColumn::asc(0).id(), "0 ASC NULLS FIRST");
        assert_eq!(
            SortColumn::desc(3).nulls_first(false).id(),
            "3 DESC NULLS LAST"
        );
        assert_eq!(
            SortColumn::asc(1)
                .with_collation(Arc::new(CaseInsensitive))
                .id(),
            "1 ASC NULLS FIRST COLLATE und-u-ks-level2"
        );
    }

    #[test]
    fn description_reports_collation() {
        let plain = SortDescription::ascending([0, 2]);
        assert!(!plain.has_collation());
        assert_eq!(plain.positions().collect::<Vec<_>>(), vec![0, 2]);

        let collated: SortDescription = [
            SortColumn::asc(0),
            SortColumn::asc(1).with_collation(Arc::new(CaseInsensitive)),
        ]
        .into_iter()
        .collect();
        assert!(collated.has_collation());
        assert_eq!(collated.len(), 2);
    }
}
