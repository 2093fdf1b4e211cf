//! Expansion of availability rules and exceptions into concrete slots.
//!
//! Everything here is pure: the same rules, exceptions, template, window and
//! `now` always produce the same ordered slot list. Storage access and the
//! advance-booking horizon are the caller's concern.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use uuid::Uuid;

use crate::models::{
    AvailabilityRule, ExceptionKind, RuleKind, ScheduleException, Slot, SlotProvenance, SlotTemplate,
};

/// 0 = Sunday, 1 = Monday, etc., matching the stored `day_of_week` values.
pub fn weekday_index(date: NaiveDate) -> i32 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

/// Expands `rules` into tiled slots over `[window_start, window_end]`,
/// removes `Unavailable` exception overlaps, appends `Available` exception
/// slots, and returns the deduplicated result ascending by start.
///
/// Slots starting at or before `now` are silently excluded. An empty result
/// is a normal outcome, never an error.
pub fn materialize(
    doctor_id: Uuid,
    rules: &[AvailabilityRule],
    exceptions: &[ScheduleException],
    template: &SlotTemplate,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<Slot> {
    if window_end <= window_start {
        return Vec::new();
    }

    // Unique by start time; exception-derived slots overwrite rule-derived
    // ones at the same start.
    let mut by_start: BTreeMap<DateTime<Utc>, Slot> = BTreeMap::new();

    for rule in rules.iter().filter(|r| r.doctor_id == doctor_id) {
        for (interval_start, interval_end) in rule_intervals(rule, window_start, window_end) {
            for (start, end) in tile(interval_start, interval_end, template) {
                if start <= now || start < window_start || end > window_end {
                    continue;
                }
                by_start.entry(start).or_insert(Slot {
                    doctor_id,
                    start_time: start,
                    end_time: end,
                    provenance: SlotProvenance::Rule(rule.id),
                });
            }
        }
    }

    let applicable: Vec<&ScheduleException> = exceptions
        .iter()
        .filter(|ex| ex.applies_to(doctor_id))
        .collect();

    let unavailable: Vec<&&ScheduleException> = applicable
        .iter()
        .filter(|ex| ex.kind == ExceptionKind::Unavailable)
        .collect();
    by_start.retain(|_, slot| !unavailable.iter().any(|ex| exception_blocks(ex, slot)));

    for exception in applicable.iter().filter(|ex| ex.kind == ExceptionKind::Available) {
        for (start, end) in exception_slots(exception, template, window_start, window_end) {
            if start <= now {
                continue;
            }
            by_start.insert(
                start,
                Slot {
                    doctor_id,
                    start_time: start,
                    end_time: end,
                    provenance: SlotProvenance::Exception(exception.id),
                },
            );
        }
    }

    remove_overlapping(by_start.into_values().collect())
}

/// Absolute intervals a rule contributes within the window. Recurring rules
/// expand lazily over the calendar dates matching their day-of-week inside
/// the window intersected with their validity range; one-off rules yield at
/// most their own interval. Degenerate shapes yield nothing.
fn rule_intervals(
    rule: &AvailabilityRule,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    match rule.kind {
        RuleKind::OneOff => match (rule.start_at, rule.end_at) {
            (Some(start), Some(end)) if start < end && start < window_end && end > window_start => {
                vec![(start, end)]
            }
            _ => Vec::new(),
        },
        RuleKind::Recurring => {
            let (day, start_time, end_time, valid_from) = match (
                rule.day_of_week,
                rule.start_time,
                rule.end_time,
                rule.valid_from,
            ) {
                (Some(d), Some(s), Some(e), Some(f)) => (d, s, e, f),
                _ => return Vec::new(),
            };
            if start_time >= end_time {
                return Vec::new();
            }

            let first = window_start.date_naive().max(valid_from);
            let mut last = window_end.date_naive();
            if let Some(valid_to) = rule.valid_to {
                last = last.min(valid_to);
            }

            recurring_dates(first, last, day)
                .map(|date| {
                    (
                        date.and_time(start_time).and_utc(),
                        date.and_time(end_time).and_utc(),
                    )
                })
                .collect()
        }
    }
}

fn recurring_dates(from: NaiveDate, to: NaiveDate, day_of_week: i32) -> impl Iterator<Item = NaiveDate> {
    from.iter_days()
        .take_while(move |date| *date <= to)
        .filter(move |date| weekday_index(*date) == day_of_week)
}

/// Tiles an interval into consecutive duration-sized slots separated by the
/// buffer, starting at the interval start. Slots whose end would exceed the
/// interval end are dropped; nothing partial is emitted.
fn tile(
    interval_start: DateTime<Utc>,
    interval_end: DateTime<Utc>,
    template: &SlotTemplate,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let duration = Duration::minutes(template.duration_minutes.max(0) as i64);
    let step = duration + Duration::minutes(template.buffer_minutes.max(0) as i64);
    if duration <= Duration::zero() {
        return Vec::new();
    }

    let mut slots = Vec::new();
    let mut current = interval_start;
    while current + duration <= interval_end {
        slots.push((current, current + duration));
        current += step;
    }
    slots
}

/// Whether an `Unavailable` exception removes this slot. A time-less
/// exception blocks every slot whose date falls in its range; a timed one
/// blocks slots overlapping its time window on each covered date.
fn exception_blocks(exception: &ScheduleException, slot: &Slot) -> bool {
    let slot_date = slot.start_time.date_naive();
    if !exception.covers_date(slot_date) {
        return false;
    }
    match (exception.start_time, exception.end_time) {
        (Some(start), Some(end)) => {
            let block_start = slot_date.and_time(start).and_utc();
            let block_end = slot_date.and_time(end).and_utc();
            slot.start_time < block_end && slot.end_time > block_start
        }
        _ => true,
    }
}

/// Tiles an `Available` exception's own time window (the whole day when no
/// times are set) for each covered date inside the query window.
fn exception_slots(
    exception: &ScheduleException,
    template: &SlotTemplate,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let first = window_start.date_naive().max(exception.date_from);
    let last = window_end.date_naive().min(exception.date_to);

    let mut slots = Vec::new();
    let mut date = first;
    while date <= last {
        let (interval_start, interval_end) = match (exception.start_time, exception.end_time) {
            (Some(start), Some(end)) => (
                date.and_time(start).and_utc(),
                date.and_time(end).and_utc(),
            ),
            _ => {
                let midnight = date.and_time(NaiveTime::MIN).and_utc();
                (midnight, midnight + Duration::days(1))
            }
        };
        for (start, end) in tile(interval_start, interval_end, template) {
            if start >= window_start && end <= window_end {
                slots.push((start, end));
            }
        }
        date = match date.checked_add_days(Days::new(1)) {
            Some(next) => next,
            None => break,
        };
    }
    slots
}

/// Final sweep: keeps the earliest-starting slot of any overlapping pair so
/// the output never contains overlapping intervals for the doctor.
fn remove_overlapping(slots: Vec<Slot>) -> Vec<Slot> {
    let mut result: Vec<Slot> = Vec::with_capacity(slots.len());
    let mut last_end = DateTime::<Utc>::MIN_UTC;

    for slot in slots {
        if slot.start_time >= last_end {
            last_end = slot.end_time;
            result.push(slot);
        }
    }

    result
}
