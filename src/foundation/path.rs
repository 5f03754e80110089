use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::foundation::error::{StratumError, StratumResult};

/// One namespace element of a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathElem {
    /// A prim name (`/World`).
    Prim(String),
    /// A variant selection (`{shading=red}`) scoping the content below it.
    Variant {
        /// Variant set name.
        set: String,
        /// Selected variant name.
        selection: String,
    },
}

/// Absolute namespace path of a prim, a variant, or a property.
///
/// Text form: `/World/Model{shading=red}Geom.color`. Paths order parents before their
/// descendants, so they can key ordered maps.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path {
    elems: SmallVec<[PathElem; 4]>,
    property: Option<String>,
}

impl Path {
    /// The absolute root path `/`.
    pub fn absolute_root() -> Self {
        Self {
            elems: SmallVec::new(),
            property: None,
        }
    }

    /// Parse a path from its text form.
    pub fn parse(s: &str) -> StratumResult<Self> {
        let s = s.trim();
        if !s.starts_with('/') {
            return Err(StratumError::validation(format!(
                "path '{s}' must be absolute"
            )));
        }
        let (prim_part, property) = match s.find('.') {
            Some(dot) => (&s[..dot], Some(&s[dot + 1..])),
            None => (s, None),
        };

        let mut out = Self::absolute_root();
        let bytes = prim_part.as_bytes();
        let mut i = 1;
        while i < bytes.len() {
            match bytes[i] {
                b'{' => {
                    let close = prim_part[i..].find('}').map(|c| c + i).ok_or_else(|| {
                        StratumError::validation(format!("unterminated variant selection in '{s}'"))
                    })?;
                    let body = &prim_part[i + 1..close];
                    let (set, selection) = body.split_once('=').ok_or_else(|| {
                        StratumError::validation(format!("variant selection '{body}' needs '='"))
                    })?;
                    out = out.append_variant(set.trim(), selection.trim())?;
                    i = close + 1;
                }
                b'/' => {
                    if !matches!(out.elems.last(), Some(PathElem::Prim(_))) {
                        return Err(StratumError::validation(format!(
                            "unexpected '/' in path '{s}'"
                        )));
                    }
                    i += 1;
                    if i == bytes.len() {
                        return Err(StratumError::validation(format!(
                            "path '{s}' must not end with '/'"
                        )));
                    }
                }
                _ => {
                    let end = prim_part[i..]
                        .find(['/', '{'])
                        .map(|e| e + i)
                        .unwrap_or(prim_part.len());
                    out = out.append_child(&prim_part[i..end])?;
                    i = end;
                }
            }
        }

        match property {
            Some(name) => out.append_property(name),
            None => Ok(out),
        }
    }

    /// Whether this is `/`.
    pub fn is_absolute_root(&self) -> bool {
        self.elems.is_empty() && self.property.is_none()
    }

    /// Whether this path names a property.
    pub fn is_property(&self) -> bool {
        self.property.is_some()
    }

    /// Whether any element is a variant selection.
    pub fn contains_variant_selection(&self) -> bool {
        self.elems
            .iter()
            .any(|e| matches!(e, PathElem::Variant { .. }))
    }

    /// Namespace elements, outermost first.
    pub fn elements(&self) -> &[PathElem] {
        &self.elems
    }

    /// Property name, if this is a property path.
    pub fn property_name(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// Name of the last element: the property name, else the last prim name.
    pub fn name(&self) -> Option<&str> {
        if let Some(p) = &self.property {
            return Some(p);
        }
        match self.elems.last()? {
            PathElem::Prim(name) => Some(name),
            PathElem::Variant { .. } => None,
        }
    }

    /// Number of prim elements (variant selections do not add depth).
    pub fn namespace_depth(&self) -> usize {
        self.elems
            .iter()
            .filter(|e| matches!(e, PathElem::Prim(_)))
            .count()
    }

    /// Append a child prim name.
    pub fn append_child(&self, name: &str) -> StratumResult<Self> {
        if self.property.is_some() {
            return Err(StratumError::validation(format!(
                "cannot append child '{name}' to property path '{self}'"
            )));
        }
        validate_identifier(name, false)?;
        let mut out = self.clone();
        out.elems.push(PathElem::Prim(name.to_string()));
        Ok(out)
    }

    /// Append a prim name taken from another valid path.
    pub(crate) fn join_name(&self, name: &str) -> Self {
        let mut out = self.prim_path();
        out.elems.push(PathElem::Prim(name.to_string()));
        out
    }

    /// Property path for a property name taken from another valid spec.
    pub(crate) fn join_property(&self, name: &str) -> Self {
        Self {
            elems: self.elems.clone(),
            property: Some(name.to_string()),
        }
    }

    /// Append a variant selection element.
    pub fn append_variant(&self, set: &str, selection: &str) -> StratumResult<Self> {
        if self.property.is_some() || self.elems.is_empty() {
            return Err(StratumError::validation(format!(
                "cannot select variant {{{set}={selection}}} on '{self}'"
            )));
        }
        validate_identifier(set, false)?;
        validate_identifier(selection, false)?;
        let mut out = self.clone();
        out.elems.push(PathElem::Variant {
            set: set.to_string(),
            selection: selection.to_string(),
        });
        Ok(out)
    }

    /// Append a property name.
    pub fn append_property(&self, name: &str) -> StratumResult<Self> {
        if self.property.is_some() || self.elems.is_empty() {
            return Err(StratumError::validation(format!(
                "cannot append property '{name}' to '{self}'"
            )));
        }
        validate_identifier(name, true)?;
        let mut out = self.clone();
        out.property = Some(name.to_string());
        Ok(out)
    }

    /// Parent path: the owning prim for a property, the enclosing element otherwise.
    pub fn parent(&self) -> Option<Self> {
        if self.property.is_some() {
            return Some(self.prim_path());
        }
        if self.elems.is_empty() {
            return None;
        }
        let mut out = self.clone();
        out.elems.pop();
        Some(out)
    }

    /// This path without its property part.
    pub fn prim_path(&self) -> Self {
        Self {
            elems: self.elems.clone(),
            property: None,
        }
    }

    /// This path with every variant selection removed.
    pub fn strip_variants(&self) -> Self {
        Self {
            elems: self
                .elems
                .iter()
                .filter(|e| matches!(e, PathElem::Prim(_)))
                .cloned()
                .collect(),
            property: self.property.clone(),
        }
    }

    /// Whether `prefix` is this path or one of its namespace ancestors.
    pub fn has_prefix(&self, prefix: &Self) -> bool {
        if prefix.property.is_some() {
            return self == prefix;
        }
        self.elems.starts_with(&prefix.elems)
    }

    /// Replace a leading `old` prefix with `new`; `None` when `old` is not a prefix.
    pub fn replace_prefix(&self, old: &Self, new: &Self) -> Option<Self> {
        if !self.has_prefix(old) {
            return None;
        }
        if old.property.is_some() {
            return Some(new.clone());
        }
        let mut elems = new.elems.clone();
        elems.extend(self.elems[old.elems.len()..].iter().cloned());
        Some(Self {
            elems,
            property: self.property.clone(),
        })
    }
}

fn validate_identifier(name: &str, allow_namespace: bool) -> StratumResult<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(StratumError::validation("path element must be non-empty"));
    };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(StratumError::validation(format!(
            "path element '{name}' must start with a letter or '_'"
        )));
    }
    let ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_namespace && c == ':'));
    if !ok || (allow_namespace && (name.ends_with(':') || name.contains("::"))) {
        return Err(StratumError::validation(format!(
            "invalid path element '{name}'"
        )));
    }
    Ok(())
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elems.is_empty() {
            return f.write_str("/");
        }
        let mut prev_variant = false;
        for elem in &self.elems {
            match elem {
                PathElem::Prim(name) => {
                    if !prev_variant {
                        f.write_str("/")?;
                    }
                    f.write_str(name)?;
                    prev_variant = false;
                }
                PathElem::Variant { set, selection } => {
                    write!(f, "{{{set}={selection}}}")?;
                    prev_variant = true;
                }
            }
        }
        if let Some(p) = &self.property {
            write!(f, ".{p}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl FromStr for Path {
    type Err = StratumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Path {
    type Error = StratumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Path> for String {
    fn from(value: Path) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/path.rs"]
mod tests;
