//! Plans: declarative, multi-step transactions over event sets.
//!
//! A [`Plan`] is an ordered list of [`Step`]s sharing one base namespace and
//! one reference time. Steps thread a single accumulator (the current
//! selection of events) from left to right. Stores execute a whole plan as
//! one atomic, isolated unit via [`interpret::execute`], so a plan can
//! inspect state, decide, and mutate without racing other plans.

pub mod interpret;

use std::collections::BTreeSet;
use std::ops::Bound;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::event::EventId;
use crate::model::set::EventSet;

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// An ordered sequence of steps executed atomically.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Namespace shared by every event set the plan touches.
    pub base: String,
    /// Reference time for all time-relative comparisons in the plan.
    pub now: DateTime<Utc>,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(base: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            base: base.into(),
            now,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Into<Step>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Every event set named by a step or condition, in key order.
    pub fn sets(&self) -> BTreeSet<&EventSet> {
        let mut out = BTreeSet::new();
        for step in &self.steps {
            match step {
                Step::Select(select) => {
                    if let Some(set) = select.selection.set() {
                        out.insert(set);
                    }
                    if let Some(guard) = &select.guard {
                        guard.collect_sets(&mut out);
                    }
                }
                Step::AddTo { sets, .. } | Step::RemoveFrom { sets } => out.extend(sets.iter()),
                Step::Break(cond) => cond.collect_sets(&mut out),
            }
        }
        out
    }

    /// Check that every set the plan names lives in the plan's base.
    pub fn validate(&self) -> Result<()> {
        if let Some(stray) = self.sets().into_iter().find(|s| s.base != self.base) {
            return Err(Error::InvalidPlan(format!(
                "event set {stray} is outside plan base {:?}",
                self.base
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One step of a plan.
#[derive(Debug, Clone)]
pub enum Step {
    /// Replace (or extend, for unions) the accumulator.
    Select(Select),
    /// Insert every accumulated event into each set. `score` overrides the
    /// natural score. The accumulator is left untouched.
    AddTo {
        sets: Vec<EventSet>,
        score: Option<i64>,
    },
    /// Remove every accumulated event from each set. The accumulator is left
    /// untouched.
    RemoveFrom { sets: Vec<EventSet> },
    /// Stop the plan if the condition holds. Mutations already applied stay
    /// applied; the current accumulator is the plan's result.
    Break(Condition),
}

impl Step {
    pub fn add_to(sets: impl IntoIterator<Item = EventSet>) -> Self {
        Step::AddTo {
            sets: sets.into_iter().collect(),
            score: None,
        }
    }

    pub fn add_to_scored(sets: impl IntoIterator<Item = EventSet>, score: i64) -> Self {
        Step::AddTo {
            sets: sets.into_iter().collect(),
            score: Some(score),
        }
    }

    pub fn remove_from(sets: impl IntoIterator<Item = EventSet>) -> Self {
        Step::RemoveFrom {
            sets: sets.into_iter().collect(),
        }
    }

    pub fn break_if(cond: Condition) -> Self {
        Step::Break(cond)
    }
}

impl From<Select> for Step {
    fn from(select: Select) -> Self {
        Step::Select(select)
    }
}

/// A selecting step.
#[derive(Debug, Clone)]
pub struct Select {
    pub selection: Selection,
    /// Extend the accumulator instead of replacing it.
    pub union: bool,
    /// When present and false, the step is skipped entirely.
    pub guard: Option<Condition>,
}

impl Select {
    pub fn new(selection: Selection) -> Self {
        Self {
            selection,
            union: false,
            guard: None,
        }
    }

    pub fn union(mut self) -> Self {
        self.union = true;
        self
    }

    pub fn when(mut self, guard: Condition) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// Where a select draws its events from.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Seed the accumulator with known events. No set is consulted.
    Events(Vec<EventId>),
    /// Members of `set` whose score falls in `range`.
    ScoreRange { set: EventSet, range: ScoreRange },
    /// Members of `set` at ranks `start..=stop`, lowest score first.
    Rank {
        set: EventSet,
        start: usize,
        stop: usize,
    },
    /// `event`, if it is in `set` with a score inside `min..=max`.
    ScoreOf {
        set: EventSet,
        event: EventId,
        min: Option<i64>,
        max: Option<i64>,
    },
}

impl Selection {
    pub fn set(&self) -> Option<&EventSet> {
        match self {
            Selection::Events(_) => None,
            Selection::ScoreRange { set, .. }
            | Selection::Rank { set, .. }
            | Selection::ScoreOf { set, .. } => Some(set),
        }
    }

    pub fn events(ids: impl IntoIterator<Item = EventId>) -> Self {
        Selection::Events(ids.into_iter().collect())
    }

    pub fn range(set: EventSet, range: ScoreRange) -> Self {
        Selection::ScoreRange { set, range }
    }

    pub fn first(set: EventSet) -> Self {
        Selection::Rank {
            set,
            start: 0,
            stop: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Score ranges
// ---------------------------------------------------------------------------

/// A score window over one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: Bound<i64>,
    pub max: Bound<i64>,
    /// Take the lower bound's value from the smallest score in the
    /// accumulator, keeping `min`'s inclusive/exclusive kind (unbounded counts
    /// as inclusive). Selects nothing when the accumulator is empty.
    pub min_from_input: bool,
    pub limit: Option<usize>,
    /// Highest scores first.
    pub reverse: bool,
}

impl ScoreRange {
    pub fn all() -> Self {
        Self {
            min: Bound::Unbounded,
            max: Bound::Unbounded,
            min_from_input: false,
            limit: None,
            reverse: false,
        }
    }

    /// Scores strictly greater than `score`.
    pub fn above(score: i64) -> Self {
        Self {
            min: Bound::Excluded(score),
            ..Self::all()
        }
    }

    /// Scores strictly less than `score`.
    pub fn below(score: i64) -> Self {
        Self {
            max: Bound::Excluded(score),
            ..Self::all()
        }
    }

    /// Scores strictly greater than the smallest accumulated score.
    pub fn after_input() -> Self {
        Self {
            min: Bound::Excluded(0),
            min_from_input: true,
            ..Self::all()
        }
    }

    pub fn at_most(mut self, score: i64) -> Self {
        self.max = Bound::Included(score);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Resolve `min_from_input` against the accumulator's smallest score.
    /// `None` means the range cannot match anything.
    pub fn resolve(&self, input_min: Option<i64>) -> Option<ScoreRange> {
        if !self.min_from_input {
            return Some(self.clone());
        }
        let value = input_min?;
        let min = match self.min {
            Bound::Excluded(_) => Bound::Excluded(value),
            Bound::Included(_) | Bound::Unbounded => Bound::Included(value),
        };
        Some(ScoreRange {
            min,
            min_from_input: false,
            ..self.clone()
        })
    }

    /// True when no score can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        match (self.min, self.max) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// A predicate over the accumulator and the sets, evaluated against state as
/// mutated by the plan so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The accumulator is non-empty.
    IfInput,
    /// The accumulator is empty.
    IfNoInput,
    /// The set has no members.
    IfEmpty(EventSet),
    /// Every condition holds.
    All(Vec<Condition>),
}

impl Condition {
    fn collect_sets<'a>(&'a self, out: &mut BTreeSet<&'a EventSet>) {
        match self {
            Condition::IfEmpty(set) => {
                out.insert(set);
            }
            Condition::All(conds) => conds.iter().for_each(|c| c.collect_sets(out)),
            Condition::IfInput | Condition::IfNoInput => {}
        }
    }
}
