//! Per-item inclusion rules and scan cutoffs.
//!
//! A [`Rules`] value says whether one item is wanted; a [`Cutoff`] says
//! whether the scan may go on. They often share a boundary date but are kept
//! as separate values so an endpoint can have either without the other.
use chrono::NaiveDate;
use std::fmt;

use crate::model::Record;

/// Conjunction of type equality, status membership and a date floor. Unset
/// parts accept everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rules {
    pub kind: Option<String>,
    pub statuses: Option<Vec<String>>,
    pub date_floor: Option<NaiveDate>,
}

/// Stop the scan at the first item dated before `floor`. Pages are ordered
/// newest first, so nothing after that item can qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff {
    pub floor: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    WrongKind(Option<String>),
    WrongStatus(Option<String>),
    BeforeFloor(NaiveDate),
    MissingDate,
    NoAssociation,
    AssociationMismatch(String),
    Unnameable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::WrongKind(k) => write!(f, "type {:?} not wanted", k),
            SkipReason::WrongStatus(s) => write!(f, "status {:?} not wanted", s),
            SkipReason::BeforeFloor(d) => write!(f, "dated {} before floor", d),
            SkipReason::MissingDate => f.write_str("missing or malformed date"),
            SkipReason::NoAssociation => f.write_str("no association"),
            SkipReason::AssociationMismatch(t) => write!(f, "associated with {}", t),
            SkipReason::Unnameable(why) => write!(f, "cannot name file: {}", why),
        }
    }
}

/// Outcome of looking at one item before any network work is done for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Take,
    Exclude(SkipReason),
    Stop,
}

impl Rules {
    pub fn check<R: Record + ?Sized>(&self, item: &R) -> Result<(), SkipReason> {
        if let Some(kind) = &self.kind {
            if item.kind() != Some(kind.as_str()) {
                return Err(SkipReason::WrongKind(item.kind().map(str::to_owned)));
            }
        }
        if let Some(statuses) = &self.statuses {
            let ok = item
                .status()
                .is_some_and(|s| statuses.iter().any(|want| want == s));
            if !ok {
                return Err(SkipReason::WrongStatus(item.status().map(str::to_owned)));
            }
        }
        if let Some(floor) = self.date_floor {
            match item.relevant_date() {
                None => return Err(SkipReason::MissingDate),
                Some(d) if d < floor => return Err(SkipReason::BeforeFloor(d)),
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Pure inclusion predicate.
pub fn include<R: Record + ?Sized>(item: &R, rules: &Rules) -> bool {
    rules.check(item).is_ok()
}

impl Cutoff {
    pub fn new(floor: NaiveDate) -> Self {
        Self { floor }
    }

    /// Items without a usable date never stop the scan; the rules decide
    /// whether they are excluded.
    pub fn reached<R: Record + ?Sized>(&self, item: &R) -> bool {
        item.relevant_date().is_some_and(|d| d < self.floor)
    }
}

/// Cutoff first, then rules.
pub fn classify<R: Record + ?Sized>(item: &R, cutoff: Option<&Cutoff>, rules: &Rules) -> Verdict {
    if cutoff.is_some_and(|c| c.reached(item)) {
        return Verdict::Stop;
    }
    match rules.check(item) {
        Ok(()) => Verdict::Take,
        Err(reason) => Verdict::Exclude(reason),
    }
}
