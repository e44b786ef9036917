//! Named grid axes and collections of them.
//!
//! Datasets following different conventions name the same axis differently
//! (`grid_xt` vs `lon`), and some files even use two names for one axis. An
//! [`AliasSet`] holds all acceptable names for an axis, with the first one
//! treated as canonical. A [`Dimension`] pairs an alias set with the global
//! size of the axis and the half-open window of it owned by this process.
use std::collections::HashMap;
use std::fmt::Display;

use crate::error::{RegridError, RegridResult};

/// A non-empty, ordered list of names for one dimension. Duplicates are dropped
/// on construction; the first name is the canonical one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasSet(Vec<String>);

impl AliasSet {
    pub fn new<I, S>(names: I) -> RegridResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let mut aliases: Vec<String> = vec![];
        for name in names {
            let name = name.to_string();
            if !aliases.contains(&name) {
                aliases.push(name);
            }
        }

        if aliases.is_empty() {
            return Err(RegridError::configuration("a dimension needs at least one name").into());
        }
        Ok(Self(aliases))
    }

    pub fn canonical(&self) -> &str {
        &self.0[0]
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|a| a == name)
    }

    pub fn intersects(&self, other: &AliasSet) -> bool {
        self.0.iter().any(|a| other.contains(a))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|a| a.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<&str> for AliasSet {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl Display for AliasSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.0.join("|"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaggerLocation {
    Center,
    Corner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateRole {
    X,
    Y,
    Time,
}

/// One axis of a grid or field as seen by the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    aliases: AliasSet,
    size: usize,
    lower: usize,
    upper: usize,
    stagger: StaggerLocation,
    role: CoordinateRole,
}

impl Dimension {
    /// Create a dimension, checking that `lower <= upper <= size`.
    pub fn new(
        aliases: AliasSet,
        size: usize,
        lower: usize,
        upper: usize,
        stagger: StaggerLocation,
        role: CoordinateRole,
    ) -> RegridResult<Self> {
        if lower > upper || upper > size {
            return Err(RegridError::configuration(format!(
                "local bounds [{lower}, {upper}) of dimension {aliases} do not fit in its size {size}"
            ))
            .into());
        }

        Ok(Self {
            aliases,
            size,
            lower,
            upper,
            stagger,
            role,
        })
    }

    pub fn aliases(&self) -> &AliasSet {
        &self.aliases
    }

    pub fn name(&self) -> &str {
        self.aliases.canonical()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn lower(&self) -> usize {
        self.lower
    }

    pub fn upper(&self) -> usize {
        self.upper
    }

    /// Number of indices owned by this process.
    pub fn local_len(&self) -> usize {
        self.upper - self.lower
    }

    pub fn stagger(&self) -> StaggerLocation {
        self.stagger
    }

    pub fn role(&self) -> CoordinateRole {
        self.role
    }

    /// The same axis and window under a different set of names.
    pub fn with_aliases(&self, aliases: AliasSet) -> Self {
        Self {
            aliases,
            ..self.clone()
        }
    }
}

/// Ordered dimensions of a grid or field. No alias may be shared by two members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionCollection(Vec<Dimension>);

impl DimensionCollection {
    pub fn new(dims: Vec<Dimension>) -> RegridResult<Self> {
        for (i, a) in dims.iter().enumerate() {
            for b in dims.iter().skip(i + 1) {
                if a.aliases.intersects(&b.aliases) {
                    return Err(RegridError::configuration(format!(
                        "dimensions {} and {} share a name",
                        a.aliases, b.aliases
                    ))
                    .into());
                }
            }
        }
        Ok(Self(dims))
    }

    /// Return the first dimension with any of the given names.
    pub fn get(&self, names: &AliasSet) -> RegridResult<&Dimension> {
        self.0
            .iter()
            .find(|d| d.aliases.intersects(names))
            .ok_or_else(|| RegridError::dimension_not_found(names.iter()).into())
    }

    /// Return the dimension with the given name.
    pub fn get_name(&self, name: &str) -> RegridResult<&Dimension> {
        self.0
            .iter()
            .find(|d| d.aliases.contains(name))
            .ok_or_else(|| RegridError::dimension_not_found([name]).into())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|d| d.aliases.contains(name))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Dimension> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Local shape, i.e. the window length of each dimension in order.
    pub fn local_shape(&self) -> Vec<usize> {
        self.0.iter().map(|d| d.local_len()).collect()
    }

    /// A new collection with `extra` appended at the end.
    pub fn with_appended(&self, extra: Dimension) -> RegridResult<Self> {
        let mut dims = self.0.clone();
        dims.push(extra);
        Self::new(dims)
    }

    /// Keep sizes and windows, but take each member's names from the member
    /// with the same role in `names_from`.
    pub fn renamed_from(&self, names_from: &DimensionCollection) -> RegridResult<Self> {
        let dims = self
            .0
            .iter()
            .map(|d| {
                names_from
                    .0
                    .iter()
                    .find(|other| other.role == d.role)
                    .map(|other| d.with_aliases(other.aliases.clone()))
                    .ok_or_else(|| {
                        RegridError::configuration(format!(
                            "no {:?} dimension to take names from for {}",
                            d.role, d.aliases
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(dims)
    }
}

impl<'a> IntoIterator for &'a DimensionCollection {
    type Item = &'a Dimension;
    type IntoIter = std::slice::Iter<'a, Dimension>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Map every alias of every member of `dims` to that member's position.
pub fn create_dimension_map(dims: &DimensionCollection) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (i, dim) in dims.iter().enumerate() {
        for alias in dim.aliases.iter() {
            map.insert(alias.to_string(), i);
        }
    }
    map
}
