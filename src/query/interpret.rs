//! The plan interpreter.
//!
//! One stateless pass over a plan's steps, threading the accumulator
//! explicitly. The caller (a store) supplies the transaction and is
//! responsible for committing it; the interpreter knows nothing about queues.

use tracing::{debug, trace};

use crate::error::Result;
use crate::model::event::EventId;
use crate::model::set::Member;
use crate::query::{Condition, Plan, Selection, Step};
use crate::store::SetTxn;

/// Execute `plan` against `txn`, returning the final accumulator.
///
/// Stops at the first `Break` whose condition holds, or after the last step.
/// Any store error aborts immediately; the caller must not commit.
pub async fn execute<T>(plan: &Plan, txn: &mut T) -> Result<Vec<EventId>>
where
    T: SetTxn + ?Sized,
{
    plan.validate()?;

    let mut acc: Vec<Member> = Vec::new();
    for (idx, step) in plan.steps.iter().enumerate() {
        match step {
            Step::Select(select) => {
                if let Some(guard) = &select.guard {
                    if !holds(guard, &acc, txn).await? {
                        trace!(step = idx, "select guard false, skipping");
                        continue;
                    }
                }
                let found = select_members(&select.selection, &acc, txn).await?;
                if select.union {
                    for member in found {
                        if !acc.iter().any(|m| m.id == member.id) {
                            acc.push(member);
                        }
                    }
                } else {
                    acc = found;
                }
            }
            Step::AddTo { sets, score } => {
                if acc.is_empty() {
                    continue;
                }
                let members: Vec<Member> = acc
                    .iter()
                    .map(|m| Member::new(m.id, score.unwrap_or_else(|| m.id.score())))
                    .collect();
                for set in sets {
                    txn.add(set, &members).await?;
                }
            }
            Step::RemoveFrom { sets } => {
                if acc.is_empty() {
                    continue;
                }
                let ids: Vec<EventId> = acc.iter().map(|m| m.id).collect();
                for set in sets {
                    txn.remove(set, &ids).await?;
                }
            }
            Step::Break(cond) => {
                if holds(cond, &acc, txn).await? {
                    debug!(step = idx, selected = acc.len(), "plan break");
                    break;
                }
            }
        }
    }

    Ok(acc.into_iter().map(|m| m.id).collect())
}

async fn select_members<T>(selection: &Selection, acc: &[Member], txn: &mut T) -> Result<Vec<Member>>
where
    T: SetTxn + ?Sized,
{
    match selection {
        Selection::Events(ids) => Ok(ids.iter().copied().map(Member::natural).collect()),
        Selection::ScoreRange { set, range } => {
            let input_min = acc.iter().map(|m| m.score).min();
            match range.resolve(input_min) {
                Some(range) if !range.is_empty() && range.limit != Some(0) => {
                    txn.range_by_score(set, &range).await
                }
                _ => Ok(Vec::new()),
            }
        }
        Selection::Rank { set, start, stop } => {
            if start > stop {
                return Ok(Vec::new());
            }
            txn.range_by_rank(set, *start, *stop).await
        }
        Selection::ScoreOf {
            set,
            event,
            min,
            max,
        } => {
            let found = txn.score_of(set, *event).await?.filter(|score| {
                min.is_none_or(|m| *score >= m) && max.is_none_or(|m| *score <= m)
            });
            Ok(found.map(|score| Member::new(*event, score)).into_iter().collect())
        }
    }
}

/// Evaluate `cond` against the accumulator and the transaction's current
/// state. `All` is expanded onto a work stack; evaluation stops at the first
/// predicate that fails.
async fn holds<T>(cond: &Condition, acc: &[Member], txn: &mut T) -> Result<bool>
where
    T: SetTxn + ?Sized,
{
    let mut pending = vec![cond];
    while let Some(cond) = pending.pop() {
        let ok = match cond {
            Condition::IfInput => !acc.is_empty(),
            Condition::IfNoInput => acc.is_empty(),
            Condition::IfEmpty(set) => txn.is_empty(set).await?,
            Condition::All(conds) => {
                pending.extend(conds.iter().rev());
                continue;
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}
