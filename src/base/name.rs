//! Dotted names.
//!
//! RAINS names are sequences of labels separated by dots, always ending in
//! the empty root label. The leftmost label of a fully qualified name is the
//! *subject*; everything after the first dot is the *zone*. The root zone is
//! written as a lone dot.
//!
//! Names are kept as strings throughout the engine; this module provides the
//! little algebra the engine needs on top of them: splitting a query name
//! into subject and zone, rejoining the two, stripping a zone suffix, and
//! walking a name towards the root for redirect fallback.

use std::error;
use std::fmt;

//------------ split_subject_zone --------------------------------------------

/// Splits a fully qualified name into its subject and zone.
///
/// Fails if `name` does not end with the root dot. The root itself splits
/// into an empty subject and the root zone.
pub fn split_subject_zone(name: &str) -> Result<(&str, &str), NameError> {
    if !name.ends_with('.') {
        return Err(NameError::MissingRootLabel);
    }
    if name == "." {
        return Ok(("", "."));
    }
    let dot = match name.find('.') {
        Some(dot) => dot,
        None => return Err(NameError::MissingRootLabel),
    };
    let subject = &name[..dot];
    let zone = &name[dot + 1..];
    Ok((subject, if zone.is_empty() { "." } else { zone }))
}

//------------ fqdn ----------------------------------------------------------

/// Joins a subject and a zone back into a fully qualified name.
///
/// This is the inverse of [`split_subject_zone`].
pub fn fqdn(subject: &str, zone: &str) -> String {
    if zone == "." {
        format!("{}.", subject)
    } else {
        format!("{}.{}", subject, zone)
    }
}

//------------ strip_zone ----------------------------------------------------

/// Returns the subject part of `name` relative to `zone`.
///
/// Returns `None` if `zone` is not a proper suffix of `name`, in particular
/// when `name` equals the zone itself.
pub fn strip_zone(name: &str, zone: &str) -> Option<String> {
    if !name.ends_with(zone) {
        return None;
    }
    let zone_dots = zone.matches('.').count();
    let name_dots = name.matches('.').count();
    if name_dots <= zone_dots {
        return None;
    }
    let diff = name_dots - zone_dots;
    let subject = name.split('.').take(diff).collect::<Vec<_>>().join(".");
    Some(subject)
}

//------------ ancestors -----------------------------------------------------

/// Returns an iterator over the ancestor zones of `name`.
///
/// For `"ns.a."` the iterator yields `"a."` and then `"."`. The root has no
/// ancestors.
pub fn ancestors(name: &str) -> Ancestors<'_> {
    Ancestors { rest: Some(name) }
}

/// Iterator over a name's ancestor zones, ending at the root.
#[derive(Clone, Debug)]
pub struct Ancestors<'a> {
    /// The name whose parent is yielded next, if any.
    rest: Option<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let cur = self.rest?;
        if cur == "." || cur.is_empty() {
            self.rest = None;
            return None;
        }
        let parent = match cur.find('.') {
            Some(dot) if dot + 1 < cur.len() => &cur[dot + 1..],
            _ => ".",
        };
        self.rest = Some(parent);
        Some(parent)
    }
}

//------------ NameInterval --------------------------------------------------

/// An interval of names, used to probe negative evidence.
///
/// Both bounds are optional; a missing bound leaves that side open. The
/// interval for a single name has both bounds equal to it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NameInterval {
    /// The smallest name of interest, if bounded below.
    begin: Option<String>,

    /// The largest name of interest, if bounded above.
    end: Option<String>,
}

impl NameInterval {
    /// Creates the interval containing exactly `name`.
    pub fn point(name: impl Into<String>) -> Self {
        let name = name.into();
        NameInterval {
            begin: Some(name.clone()),
            end: Some(name),
        }
    }

    /// Creates an interval from optional bounds.
    pub fn range(begin: Option<String>, end: Option<String>) -> Self {
        NameInterval { begin, end }
    }

    /// The lower bound, if any.
    pub fn begin(&self) -> Option<&str> {
        self.begin.as_deref()
    }

    /// The upper bound, if any.
    pub fn end(&self) -> Option<&str> {
        self.end.as_deref()
    }
}

//------------ NameError -----------------------------------------------------

/// An error happened while taking a name apart.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NameError {
    /// The name does not end with the root dot.
    MissingRootLabel,
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NameError::MissingRootLabel => {
                write!(f, "name does not end with the root zone dot '.'")
            }
        }
    }
}

impl error::Error for NameError {}

//============ Tests =========================================================
