//! Conditional access expressions
//!
//! Parses `<value> @ (<condition>)` clauses separated by `;`, where the
//! condition is a small opening-hours subset: month ranges, weekday ranges and
//! time ranges (`Nov-Mar Mo-Fr 07:00-09:00,16:00-18:00`). Several rules inside
//! one condition are separated by `;` and OR-ed. Time ranges ending before they
//! start wrap midnight and belong to the day they start on.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::graph::{EdgeId, SideStorage};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse conditional '{input}': {reason}")]
pub struct ParseError {
    pub input: String,
    pub reason: String,
}

impl ParseError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

const WEEKDAYS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Inclusive range over a cyclic domain; `start > end` wraps around
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CyclicRange {
    start: u32,
    end: u32,
}

impl CyclicRange {
    fn contains(&self, v: u32) -> bool {
        if self.start <= self.end {
            self.start <= v && v <= self.end
        } else {
            v >= self.start || v <= self.end
        }
    }
}

/// Minutes since midnight, half open `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimeRange {
    start: u32,
    end: u32,
}

impl TimeRange {
    fn wraps(&self) -> bool {
        self.end < self.start
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Rule {
    months: Vec<CyclicRange>,
    weekdays: Vec<CyclicRange>,
    times: Vec<TimeRange>,
}

impl Rule {
    /// Month and weekday selectors only
    fn matches_day(&self, date: NaiveDate) -> bool {
        let month = date.month0();
        let weekday = date.weekday().num_days_from_monday();
        (self.months.is_empty() || self.months.iter().any(|r| r.contains(month)))
            && (self.weekdays.is_empty() || self.weekdays.iter().any(|r| r.contains(weekday)))
    }

    fn matches(&self, at: NaiveDateTime) -> bool {
        let date = at.date();
        let minute = at.hour() * 60 + at.minute();

        if self.times.is_empty() {
            return self.matches_day(date);
        }

        let today = self.matches_day(date);
        let yesterday = date
            .checked_sub_signed(Duration::days(1))
            .is_some_and(|d| self.matches_day(d));

        self.times.iter().any(|t| {
            if t.wraps() {
                (today && minute >= t.start) || (yesterday && minute < t.end)
            } else {
                today && minute >= t.start && minute < t.end
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    allowed: bool,
    rules: Vec<Rule>,
}

/// A parsed conditional access expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalAccess {
    clauses: Vec<Clause>,
}

impl ConditionalAccess {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let clauses = split_top_level(input)
            .into_iter()
            .map(|clause| parse_clause(input, clause))
            .collect::<Result<Vec<_>, _>>()?;

        if clauses.is_empty() {
            return Err(ParseError::new(input, "empty expression"));
        }
        Ok(Self { clauses })
    }

    /// Access at a local time. The last matching clause decides; without a
    /// match the edge stays accessible.
    pub fn allows(&self, at: NaiveDateTime) -> bool {
        self.clauses
            .iter()
            .rev()
            .find(|c| c.rules.iter().any(|r| r.matches(at)))
            .map_or(true, |c| c.allowed)
    }
}

/// Conditional expressions of a graph parsed once, read-only afterwards.
/// Unparsable expressions are kept as `None`.
#[derive(Debug, Clone, Default)]
pub struct ConditionalTable {
    parsed: FxHashMap<EdgeId, Option<ConditionalAccess>>,
    unparsable: usize,
}

impl ConditionalTable {
    pub fn parse(storage: &SideStorage) -> Self {
        let mut parsed = FxHashMap::default();
        let mut unparsable = 0;
        for (&edge, expr) in &storage.conditional_access {
            let access = match ConditionalAccess::parse(expr) {
                Ok(c) => Some(c),
                Err(e) => {
                    tracing::warn!(edge, error = %e, "conditional restriction will be ignored");
                    unparsable += 1;
                    None
                }
            };
            parsed.insert(edge, access);
        }
        Self { parsed, unparsable }
    }

    /// `None` if the edge has no expression, `Some(None)` if it did not parse
    pub fn get(&self, edge: EdgeId) -> Option<Option<&ConditionalAccess>> {
        self.parsed.get(&edge).map(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }

    pub fn unparsable(&self) -> usize {
        self.unparsable
    }
}

/// Split on `;` outside parentheses
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, ch) in input.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ';' if depth == 0 => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn parse_clause(input: &str, clause: &str) -> Result<Clause, ParseError> {
    let (value, condition) = clause
        .split_once('@')
        .ok_or_else(|| ParseError::new(input, format!("missing '@' in '{}'", clause.trim())))?;

    let allowed = match value.trim().to_ascii_lowercase().as_str() {
        "no" | "private" | "agricultural" | "forestry" => false,
        "yes" | "permissive" | "designated" | "destination" | "delivery" | "customers" => true,
        other => return Err(ParseError::new(input, format!("unknown access value '{}'", other))),
    };

    let condition = condition.trim();
    let condition = match condition.strip_prefix('(') {
        Some(inner) => inner
            .strip_suffix(')')
            .ok_or_else(|| ParseError::new(input, "unbalanced parentheses"))?,
        None => condition,
    };
    if condition.contains('(') || condition.contains(')') {
        return Err(ParseError::new(input, "unbalanced parentheses"));
    }

    let rules = condition
        .split(';')
        .filter(|r| !r.trim().is_empty())
        .map(|r| parse_rule(input, r))
        .collect::<Result<Vec<_>, _>>()?;
    if rules.is_empty() {
        return Err(ParseError::new(input, "empty condition"));
    }

    Ok(Clause { allowed, rules })
}

fn parse_rule(input: &str, rule: &str) -> Result<Rule, ParseError> {
    let mut parsed = Rule::default();
    for piece in rule
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|p| !p.is_empty())
    {
        if piece.contains(':') {
            parsed.times.push(parse_time_range(input, piece)?);
        } else if let Some(range) = parse_named_range(piece, &WEEKDAYS) {
            parsed.weekdays.push(range);
        } else if let Some(range) = parse_named_range(piece, &MONTHS) {
            parsed.months.push(range);
        } else {
            return Err(ParseError::new(input, format!("unknown token '{}'", piece)));
        }
    }
    Ok(parsed)
}

fn parse_named_range(piece: &str, names: &[&str]) -> Option<CyclicRange> {
    let index = |name: &str| names.iter().position(|n| *n == name).map(|i| i as u32);
    match piece.split_once('-') {
        Some((a, b)) => Some(CyclicRange {
            start: index(a)?,
            end: index(b)?,
        }),
        None => {
            let i = index(piece)?;
            Some(CyclicRange { start: i, end: i })
        }
    }
}

fn parse_time_range(input: &str, piece: &str) -> Result<TimeRange, ParseError> {
    let (a, b) = piece
        .split_once('-')
        .ok_or_else(|| ParseError::new(input, format!("time '{}' is not a range", piece)))?;
    let start = parse_time(input, a)?;
    let end = parse_time(input, b)?;
    if start == end {
        return Err(ParseError::new(input, format!("empty time range '{}'", piece)));
    }
    if start >= 24 * 60 {
        return Err(ParseError::new(input, format!("range '{}' starts at 24:00", piece)));
    }
    Ok(TimeRange { start, end })
}

fn parse_time(input: &str, time: &str) -> Result<u32, ParseError> {
    let bad = || ParseError::new(input, format!("invalid time '{}'", time));
    let (h, m) = time.split_once(':').ok_or_else(bad)?;
    let h: u32 = h.parse().map_err(|_| bad())?;
    let m: u32 = m.parse().map_err(|_| bad())?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    // 2024-03-04 is a Monday

    #[test]
    fn test_weekday_time_window() {
        let c = ConditionalAccess::parse("no @ (Mo-Fr 07:00-09:00)").unwrap();
        assert!(!c.allows(at("2024-03-04 08:00")));
        assert!(c.allows(at("2024-03-04 09:00")));
        assert!(c.allows(at("2024-03-09 08:00")), "saturday");
    }

    #[test]
    fn test_midnight_wrap_belongs_to_start_day() {
        let c = ConditionalAccess::parse("no @ (Fr 22:00-06:00)").unwrap();
        assert!(!c.allows(at("2024-03-08 23:00")), "friday night");
        assert!(!c.allows(at("2024-03-09 05:59")), "saturday early, started friday");
        assert!(c.allows(at("2024-03-09 23:00")), "saturday night");
        assert!(c.allows(at("2024-03-08 05:00")), "friday early, started thursday");
    }

    #[test]
    fn test_wrapping_weekday_and_month_ranges() {
        let c = ConditionalAccess::parse("no @ (Nov-Feb Sa-Mo)").unwrap();
        assert!(!c.allows(at("2024-01-07 12:00")), "january sunday");
        assert!(c.allows(at("2024-01-09 12:00")), "january tuesday");
        assert!(c.allows(at("2024-06-09 12:00")), "june sunday");
    }

    #[test]
    fn test_last_matching_clause_wins() {
        let c = ConditionalAccess::parse("no @ (Mo-Su); destination @ (Mo-Fr 06:00-20:00)")
            .unwrap();
        assert!(c.allows(at("2024-03-05 10:00")));
        assert!(!c.allows(at("2024-03-05 21:00")));
    }

    #[test]
    fn test_several_rules_inside_one_condition() {
        let c = ConditionalAccess::parse("no @ (Mo-Fr 07:00-09:00; Sa 10:00-12:00)").unwrap();
        assert!(!c.allows(at("2024-03-09 11:00")));
        assert!(!c.allows(at("2024-03-05 08:30")));
        assert!(c.allows(at("2024-03-10 11:00")));
    }

    #[test]
    fn test_time_lists_and_end_of_day() {
        let c = ConditionalAccess::parse("private @ (07:00-09:00,16:00-24:00)").unwrap();
        assert!(!c.allows(at("2024-03-05 23:59")));
        assert!(c.allows(at("2024-03-05 12:00")));
    }

    #[test]
    fn test_malformed_expressions() {
        for bad in [
            "no (Mo-Fr)",
            "maybe @ (Mo-Fr)",
            "no @ (Mo-Fr 7-9)",
            "no @ (PH)",
            "no @ (Mo-Fr 25:00-26:00)",
            "no @ (Mo-Fr",
            "",
        ] {
            assert!(ConditionalAccess::parse(bad).is_err(), "{:?} should fail", bad);
        }
    }

    #[test]
    fn test_table_parses_each_expression_once() {
        let mut storage = SideStorage::default();
        storage.conditional_access.insert(2, "no @ (Mo-Fr 07:00-09:00)".into());
        storage.conditional_access.insert(5, "no @ (sometimes)".into());
        let table = ConditionalTable::parse(&storage);

        assert_eq!(table.len(), 2);
        assert_eq!(table.unparsable(), 1);
        assert!(table.get(2).flatten().is_some_and(|c| !c.allows(at("2024-03-05 08:00"))));
        assert_eq!(table.get(5), Some(None));
        assert_eq!(table.get(3), None);
    }
}
