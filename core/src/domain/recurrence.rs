//! # Recurrence Expansion
//!
//! Pure projection of a group map into concrete dated occurrences. Two
//! windows with distinct semantics: a single calendar month (what the month
//! view renders) and everything up to a cutoff date (what cumulative balance
//! math consumes). Pending (draft) groups never contribute to either.
//!
//! Templates only project forward from their stored anchor date, never
//! backward, and the input map is never mutated — expanding the same groups
//! twice yields identical output.

use chrono::{Datelike, Duration, Months, NaiveDate};
use shared::{RepeatRule, ScheduleGroup, ScheduleItem};
use std::collections::HashMap;

/// A concrete dated instance of an item: either the stored item itself or a
/// synthesized projection of a template. For synthesized occurrences
/// `original_date` carries the template's true stored date, so a displayed
/// occurrence can be traced back to its editable template.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub group_id: String,
    pub item: ScheduleItem,
    pub original_date: Option<NaiveDate>,
}

impl Occurrence {
    pub fn is_synthesized(&self) -> bool {
        self.original_date.is_some()
    }
}

/// Everything that falls in `target`'s calendar month.
///
/// Items dated in the month are included verbatim. A template anchored in or
/// before the month (and whose end month, if any, is not already past)
/// contributes one synthesized occurrence on the anchor's day-of-month,
/// clamped to the month's last valid day — a 31st-of-month template emits on
/// Feb 28/29 and Apr 30. Any repeat unit projects this way in month view;
/// weekly templates get the same one-per-month treatment the original client
/// gave them.
pub fn expand_for_month(
    groups: &HashMap<String, ScheduleGroup>,
    target: NaiveDate,
) -> Vec<Occurrence> {
    let target_month = month_ordinal(target);
    let mut occurrences = Vec::new();

    for (group_id, group) in groups {
        if group.is_pending {
            continue;
        }
        for item in group.items.values() {
            let anchor_month = month_ordinal(item.date);

            if anchor_month == target_month {
                occurrences.push(Occurrence {
                    group_id: group_id.clone(),
                    item: item.clone(),
                    original_date: None,
                });
                continue;
            }

            if item.repeat.is_none() || anchor_month > target_month {
                continue;
            }
            let within_end = item
                .repeat_end_date
                .map_or(true, |end| month_ordinal(end) >= target_month);
            if !within_end {
                continue;
            }

            let date = clamped_date(target.year(), target.month(), item.date.day());
            let mut projected = item.clone();
            projected.date = date;
            occurrences.push(Occurrence {
                group_id: group_id.clone(),
                item: projected,
                original_date: Some(item.date),
            });
        }
    }

    occurrences.sort_by(|a, b| (a.item.date, &a.item.id).cmp(&(b.item.date, &b.item.id)));
    occurrences
}

/// Every occurrence dated on or before `cutoff`.
///
/// Stored items are included verbatim when their date qualifies. Templates
/// additionally emit one synthesized occurrence per period, starting one
/// period after the anchor, while the cursor stays within both `cutoff` and
/// `repeat_end_date` (day-granular). Monthly steps are computed from the
/// anchor each time, so a 31st anchor keeps landing on month ends instead of
/// drifting after February.
pub fn expand_up_to(
    groups: &HashMap<String, ScheduleGroup>,
    cutoff: NaiveDate,
) -> Vec<Occurrence> {
    let mut occurrences = Vec::new();

    for (group_id, group) in groups {
        if group.is_pending {
            continue;
        }
        for item in group.items.values() {
            if item.date <= cutoff {
                occurrences.push(Occurrence {
                    group_id: group_id.clone(),
                    item: item.clone(),
                    original_date: None,
                });
            }

            let Some(rule) = item.repeat else {
                continue;
            };

            let mut previous = item.date;
            let mut step = 1u32;
            loop {
                let Some(next) = advance(item.date, rule, step) else {
                    break;
                };
                // the cutoff bounds the loop only because the cursor strictly
                // advances; bail out rather than spin if it ever stalls
                if next <= previous {
                    break;
                }
                if next > cutoff {
                    break;
                }
                if item.repeat_end_date.map_or(false, |end| next > end) {
                    break;
                }

                let mut projected = item.clone();
                projected.date = next;
                occurrences.push(Occurrence {
                    group_id: group_id.clone(),
                    item: projected,
                    original_date: Some(item.date),
                });

                previous = next;
                step += 1;
            }
        }
    }

    occurrences.sort_by(|a, b| (a.item.date, &a.item.id).cmp(&(b.item.date, &b.item.id)));
    occurrences
}

/// The `step`-th occurrence after the anchor.
fn advance(anchor: NaiveDate, rule: RepeatRule, step: u32) -> Option<NaiveDate> {
    match rule {
        RepeatRule::Monthly => anchor.checked_add_months(Months::new(step)),
        RepeatRule::Weekly => anchor.checked_add_signed(Duration::days(7 * step as i64)),
    }
}

/// Months since year zero; lets whole months compare across year boundaries.
fn month_ordinal(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// `day` in the given month, clamped to the month's last valid day.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap_or_else(|| last_day_of_month(year, month))
}

pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("first of month is always valid")
        .pred_opt()
        .expect("first of month has a predecessor")
}
