use crate::attr::AttributeValue;

use super::FieldPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean condition tree over item attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    AttributeExists(FieldPath),
    AttributeNotExists(FieldPath),
    Compare(FieldPath, Comparator, AttributeValue),
    /// List or string at the path contains the value.
    Contains(FieldPath, AttributeValue),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn exists(path: impl Into<FieldPath>) -> Self {
        Self::AttributeExists(path.into())
    }

    pub fn not_exists(path: impl Into<FieldPath>) -> Self {
        Self::AttributeNotExists(path.into())
    }

    pub fn eq(path: impl Into<FieldPath>, value: impl Into<AttributeValue>) -> Self {
        Self::Compare(path.into(), Comparator::Eq, value.into())
    }

    pub fn lt(path: impl Into<FieldPath>, value: impl Into<AttributeValue>) -> Self {
        Self::Compare(path.into(), Comparator::Lt, value.into())
    }

    pub fn gt(path: impl Into<FieldPath>, value: impl Into<AttributeValue>) -> Self {
        Self::Compare(path.into(), Comparator::Gt, value.into())
    }

    pub fn contains(path: impl Into<FieldPath>, value: impl Into<AttributeValue>) -> Self {
        Self::Contains(path.into(), value.into())
    }

    pub fn and(self, other: Condition) -> Self {
        match self {
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match self {
            Self::Or(mut terms) => {
                terms.push(other);
                Self::Or(terms)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}
