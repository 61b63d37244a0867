//! Version / last-modifier markers.
//!
//! A marker is the idempotency key of a mutating operation. Two shapes exist:
//!
//! - **Scalar**: the write is valid only while the stored value is strictly less than
//!   the marker (ordering gate, e.g. authenticator counters).
//! - **List**: the write is valid only while the stored history does not already contain
//!   the marker (retry gate, so a re-delivered invocation cannot apply twice).
//!
//! A permanent marker is recorded into its field as part of the guarded write.

use crate::attr::AttributeValue;
use crate::expr::{Condition, FieldPath, SetAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerShape {
    Scalar,
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    at: AttributeValue,
    permanent: bool,
    shape: MarkerShape,
}

impl Marker {
    pub fn scalar(at: impl Into<AttributeValue>) -> Self {
        Self {
            at: at.into(),
            permanent: true,
            shape: MarkerShape::Scalar,
        }
    }

    pub fn list(at: impl Into<AttributeValue>) -> Self {
        Self {
            at: at.into(),
            permanent: true,
            shape: MarkerShape::List,
        }
    }

    /// Whether the guarded write records the marker into its field.
    pub fn permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    pub fn at(&self) -> &AttributeValue {
        &self.at
    }

    pub fn shape(&self) -> MarkerShape {
        self.shape
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    /// Check the marker against the stored value of its field.
    ///
    /// An absent field always admits the marker. A stored value of an incomparable type
    /// never does.
    pub fn admits(&self, stored: Option<&AttributeValue>) -> bool {
        let Some(stored) = stored else {
            return true;
        };
        match self.shape {
            MarkerShape::Scalar => matches!(
                stored.compare(&self.at),
                Some(std::cmp::Ordering::Less)
            ),
            MarkerShape::List => match stored {
                AttributeValue::L(history) => !history.contains(&self.at),
                _ => false,
            },
        }
    }

    /// Native condition equivalent to [`Marker::admits`], evaluated by the store at
    /// write time.
    pub fn guard(&self, field: &FieldPath) -> Condition {
        let admitted = match self.shape {
            MarkerShape::Scalar => {
                Condition::Compare(field.clone(), crate::expr::Comparator::Lt, self.at.clone())
            }
            MarkerShape::List => Condition::contains(field.clone(), self.at.clone()).negate(),
        };
        Condition::not_exists(field.clone()).or(admitted)
    }

    /// SET action recording the marker, for permanent markers.
    pub fn record(&self) -> Option<SetAction> {
        if !self.permanent {
            return None;
        }
        Some(match self.shape {
            MarkerShape::Scalar => SetAction::Assign(self.at.clone()),
            MarkerShape::List => SetAction::AppendList(vec![self.at.clone()]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Item;
    use crate::expr::eval::condition_holds;

    #[test]
    fn test_scalar_marker_requires_strict_increase() {
        let marker = Marker::scalar(5u32);
        assert!(marker.admits(None));
        assert!(marker.admits(Some(&AttributeValue::number(4))));
        assert!(!marker.admits(Some(&AttributeValue::number(5))));
        assert!(!marker.admits(Some(&AttributeValue::number(6))));
        assert!(!marker.admits(Some(&AttributeValue::from("4"))));
    }

    #[test]
    fn test_list_marker_rejects_seen_value() {
        let marker = Marker::list("invocation-2");
        let history = AttributeValue::L(vec!["invocation-1".into()]);
        assert!(marker.admits(Some(&history)));

        let history = AttributeValue::L(vec!["invocation-1".into(), "invocation-2".into()]);
        assert!(!marker.admits(Some(&history)));
    }

    #[test]
    fn test_guard_matches_admits() {
        let field = FieldPath::attr("sign_count");
        let marker = Marker::scalar(3u32);
        for stored in [None, Some(2), Some(3), Some(4)] {
            let mut item = Item::new();
            if let Some(n) = stored {
                item.insert("sign_count".into(), AttributeValue::number(n));
            }
            assert_eq!(
                condition_holds(&marker.guard(&field), Some(&item)),
                marker.admits(item.get("sign_count")),
                "stored = {stored:?}"
            );
        }
    }

    #[test]
    fn test_record_only_when_permanent() {
        assert!(Marker::list(1u32).record().is_some());
        assert!(Marker::list(1u32).permanent(false).record().is_none());
    }
}
