use std::fmt;

/// One step in a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Attr(String),
    Index(usize),
}

/// Typed path to an attribute, possibly nested (`meta.tags[0]`).
///
/// Entities expose their paths as constructors instead of stringly-typed names so
/// update expressions are assembled from descriptors known at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn attr(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Attr(name.into())],
        }
    }

    pub fn child(mut self, name: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Attr(name.into()));
        self
    }

    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(PathSegment::Index(index));
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Name of the top-level attribute.
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(PathSegment::Attr(name)) => name,
            _ => "",
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Attr(name) if i == 0 => write!(f, "{name}")?,
                PathSegment::Attr(name) => write!(f, ".{name}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl From<&str> for FieldPath {
    fn from(name: &str) -> Self {
        Self::attr(name)
    }
}
