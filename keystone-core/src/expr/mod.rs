//! Update-expression builder.
//!
//! Turns typed `(FieldPath, SetAction)` descriptors, removals and condition trees into a
//! store-native conditional update:
//!
//! ```text
//! SET #n0 = if_not_exists(#n0, :v0) + :v1, #n1 = :v2 REMOVE #n2
//! attribute_exists(#n3) AND #n1 < :v3
//! ```
//!
//! Attribute names are aliased once per unique name and the alias cache is shared
//! between the SET, REMOVE and condition clauses, so a path used in several places
//! renders with the same placeholder. The structured form is kept alongside the
//! rendered text: backends without a native expression engine evaluate it through
//! [`eval`].

mod condition;
pub mod eval;
mod path;

use std::collections::{BTreeMap, HashMap};

use crate::attr::AttributeValue;

pub use condition::{Comparator, Condition};
pub use path::{FieldPath, PathSegment};

/// Right-hand side of a SET assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum SetAction {
    /// `p = :v`
    Assign(AttributeValue),
    /// `p = if_not_exists(p, :v)`
    IfNotExists(AttributeValue),
    /// `p = if_not_exists(p, :zero) + :delta`
    AddFrom {
        zero: AttributeValue,
        delta: AttributeValue,
    },
    /// `p = list_append(if_not_exists(p, :empty), :list)`
    AppendList(Vec<AttributeValue>),
}

impl SetAction {
    pub fn increment(delta: i64) -> Self {
        Self::AddFrom {
            zero: AttributeValue::number(0),
            delta: AttributeValue::number(delta),
        }
    }
}

/// A built, immutable conditional update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    set: Vec<(FieldPath, SetAction)>,
    remove: Vec<FieldPath>,
    condition: Option<Condition>,
    update_text: Option<String>,
    condition_text: Option<String>,
    names: BTreeMap<String, String>,
    values: BTreeMap<String, AttributeValue>,
}

impl Expression {
    /// Expression carrying only a condition.
    pub fn condition_only(condition: Condition) -> Self {
        ExpressionBuilder::new().condition(condition).build()
    }

    pub fn set_actions(&self) -> &[(FieldPath, SetAction)] {
        &self.set
    }

    pub fn removals(&self) -> &[FieldPath] {
        &self.remove
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub fn has_update(&self) -> bool {
        !self.set.is_empty() || !self.remove.is_empty()
    }

    /// Rendered `SET ... REMOVE ...` clause.
    pub fn update_expression(&self) -> Option<&str> {
        self.update_text.as_deref()
    }

    /// Rendered condition clause.
    pub fn condition_expression(&self) -> Option<&str> {
        self.condition_text.as_deref()
    }

    /// Placeholder → attribute name.
    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    /// Placeholder → value.
    pub fn values(&self) -> &BTreeMap<String, AttributeValue> {
        &self.values
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpressionBuilder {
    set: Vec<(FieldPath, SetAction)>,
    remove: Vec<FieldPath>,
    condition: Option<Condition>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<FieldPath>, action: SetAction) -> Self {
        self.set.push((path.into(), action));
        self
    }

    pub fn assign(self, path: impl Into<FieldPath>, value: impl Into<AttributeValue>) -> Self {
        self.set(path, SetAction::Assign(value.into()))
    }

    pub fn remove(mut self, path: impl Into<FieldPath>) -> Self {
        self.remove.push(path.into());
        self
    }

    /// Add a condition; repeated calls are AND-ed together.
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    pub fn build(self) -> Expression {
        let mut aliases = Aliases::default();

        let update_text = if self.set.is_empty() && self.remove.is_empty() {
            None
        } else {
            let mut clauses = Vec::new();
            if !self.set.is_empty() {
                let assignments: Vec<String> = self
                    .set
                    .iter()
                    .map(|(path, action)| aliases.render_set(path, action))
                    .collect();
                clauses.push(format!("SET {}", assignments.join(", ")));
            }
            if !self.remove.is_empty() {
                let paths: Vec<String> = self.remove.iter().map(|p| aliases.path(p)).collect();
                clauses.push(format!("REMOVE {}", paths.join(", ")));
            }
            Some(clauses.join(" "))
        };

        let condition_text = self
            .condition
            .as_ref()
            .map(|condition| aliases.render_condition(condition));

        Expression {
            set: self.set,
            remove: self.remove,
            condition: self.condition,
            update_text,
            condition_text,
            names: aliases.names,
            values: aliases.values,
        }
    }
}

/// Placeholder allocation shared by every clause of one expression.
#[derive(Default)]
struct Aliases {
    by_name: HashMap<String, String>,
    names: BTreeMap<String, String>,
    values: BTreeMap<String, AttributeValue>,
}

impl Aliases {
    fn name(&mut self, name: &str) -> String {
        if let Some(alias) = self.by_name.get(name) {
            return alias.clone();
        }
        let alias = format!("#n{}", self.by_name.len());
        self.by_name.insert(name.to_string(), alias.clone());
        self.names.insert(alias.clone(), name.to_string());
        alias
    }

    fn path(&mut self, path: &FieldPath) -> String {
        let mut rendered = String::new();
        for segment in path.segments() {
            match segment {
                PathSegment::Attr(name) => {
                    if !rendered.is_empty() {
                        rendered.push('.');
                    }
                    let alias = self.name(name);
                    rendered.push_str(&alias);
                }
                PathSegment::Index(index) => rendered.push_str(&format!("[{index}]")),
            }
        }
        rendered
    }

    fn value(&mut self, value: &AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value.clone());
        placeholder
    }

    fn render_set(&mut self, path: &FieldPath, action: &SetAction) -> String {
        let p = self.path(path);
        match action {
            SetAction::Assign(value) => format!("{p} = {}", self.value(value)),
            SetAction::IfNotExists(value) => {
                format!("{p} = if_not_exists({p}, {})", self.value(value))
            }
            SetAction::AddFrom { zero, delta } => {
                let zero = self.value(zero);
                let delta = self.value(delta);
                format!("{p} = if_not_exists({p}, {zero}) + {delta}")
            }
            SetAction::AppendList(list) => {
                let empty = self.value(&AttributeValue::empty_list());
                let list = self.value(&AttributeValue::L(list.clone()));
                format!("{p} = list_append(if_not_exists({p}, {empty}), {list})")
            }
        }
    }

    fn render_condition(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::AttributeExists(path) => format!("attribute_exists({})", self.path(path)),
            Condition::AttributeNotExists(path) => {
                format!("attribute_not_exists({})", self.path(path))
            }
            Condition::Compare(path, op, value) => {
                let p = self.path(path);
                format!("{p} {} {}", op.symbol(), self.value(value))
            }
            Condition::Contains(path, value) => {
                let p = self.path(path);
                format!("contains({p}, {})", self.value(value))
            }
            Condition::And(terms) => self.render_terms(terms, " AND "),
            Condition::Or(terms) => self.render_terms(terms, " OR "),
            Condition::Not(inner) => format!("NOT ({})", self.render_condition(inner)),
        }
    }

    fn render_terms(&mut self, terms: &[Condition], separator: &str) -> String {
        let rendered: Vec<String> = terms
            .iter()
            .map(|term| match term {
                Condition::And(_) | Condition::Or(_) => {
                    format!("({})", self.render_condition(term))
                }
                _ => self.render_condition(term),
            })
            .collect();
        rendered.join(separator)
    }
}
