//! Minimal cron expression engine.
//!
//! `min hour dom mon dow`, optionally preceded by a seconds field. Supports
//! `*`, lists, ranges and steps; day-of-week 7 is Sunday.

use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};

use crate::{Error, Result};

/// Leap-day expressions can be eight years apart (2096 → 2104).
pub const SEARCH_DAYS: i64 = 8 * 366 + 1;

#[derive(Clone, Debug)]
pub struct CronExpr {
    sec: Field,
    min: Field,
    hour: Field,
    dom: Field,
    mon: Field,
    dow: Field,
}

#[derive(Clone, Debug)]
struct Field {
    min: u32,
    max: u32,
    any: bool,
    allowed: Vec<bool>, // index = value
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts = expr.split_whitespace().collect::<Vec<_>>();
        let (sec, rest) = match parts.len() {
            5 => (Field::single(0, 59, 0), &parts[..]),
            6 => (Field::parse(parts[0], 0, 59)?, &parts[1..]),
            n => {
                return Err(Error::Config(format!(
                    "expected 5 or 6 fields, got {n}"
                )))
            }
        };

        let mut dow = Field::parse(rest[4], 0, 7)?;
        if dow.allowed[7] {
            dow.allowed[0] = true;
        }
        dow.max = 6;
        dow.any = (0..=6).all(|v| dow.allowed[v]);

        Ok(Self {
            sec,
            min: Field::parse(rest[0], 0, 59)?,
            hour: Field::parse(rest[1], 0, 23)?,
            dom: Field::parse(rest[2], 1, 31)?,
            mon: Field::parse(rest[3], 1, 12)?,
            dow,
        })
    }

    pub fn matches(&self, dt: DateTime<Local>) -> bool {
        self.sec.contains(dt.second()) && self.matches_minute(dt)
    }

    fn matches_minute(&self, dt: DateTime<Local>) -> bool {
        self.min.contains(dt.minute())
            && self.hour.contains(dt.hour())
            && self.matches_date(dt.date_naive())
    }

    fn matches_date(&self, date: NaiveDate) -> bool {
        if !self.mon.contains(date.month()) {
            return false;
        }

        // Both DOM and DOW restricted: either may match.
        let dom_match = self.dom.contains(date.day());
        let dow_match = self.dow.contains(date.weekday().num_days_from_sunday());
        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (true, false) => dow_match,
            (false, true) => dom_match,
            (false, false) => dom_match || dow_match,
        }
    }

    /// First matching instant strictly after `now`, or `None` when nothing
    /// matches within [`SEARCH_DAYS`] (Feb 31 and the like).
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let minute = now.with_nanosecond(0)?.with_second(0)?;
        if self.matches_minute(minute) {
            if let Some(sec) = self.sec.first_from(now.second() + 1) {
                return minute.with_second(sec);
            }
        }

        let first_sec = self.sec.first_from(0)?;
        let start = minute.naive_local() + chrono::Duration::minutes(1);
        let last = start.date() + chrono::Duration::days(SEARCH_DAYS);

        let mut date = start.date();
        while date <= last {
            if self.matches_date(date) {
                let (from_hour, from_min) = if date == start.date() {
                    (start.hour(), start.minute())
                } else {
                    (0, 0)
                };
                for hour in self.hour.values_from(from_hour) {
                    let min_from = if hour == from_hour { from_min } else { 0 };
                    for min in self.min.values_from(min_from) {
                        let Some(naive) = date.and_hms_opt(hour, min, first_sec) else {
                            continue;
                        };
                        // Local times skipped by a DST jump have no instant.
                        if let Some(dt) = Local.from_local_datetime(&naive).earliest() {
                            if dt > now {
                                return Some(dt);
                            }
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }
}

impl Field {
    fn single(min: u32, max: u32, value: u32) -> Self {
        let mut allowed = vec![false; (max + 1) as usize];
        allowed[value as usize] = true;
        Self {
            min,
            max,
            any: false,
            allowed,
        }
    }

    fn parse(raw: &str, min: u32, max: u32) -> Result<Self> {
        let mut allowed = vec![false; (max + 1) as usize];
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::Config(format!("empty list item in '{raw}'")));
            }

            let (base, step) = match part.split_once('/') {
                Some((base, step)) => {
                    let step: u32 = step
                        .trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid step: {step}")))?;
                    if step == 0 {
                        return Err(Error::Config("step must be > 0".to_string()));
                    }
                    (base.trim(), Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                (parse_u32(a.trim())?, parse_u32(b.trim())?)
            } else {
                let a = parse_u32(base)?;
                if step.is_some() {
                    (a, max)
                } else {
                    (a, a)
                }
            };

            if start < min || end > max || start > end {
                return Err(Error::Config(format!(
                    "value out of range {min}-{max}: {base}"
                )));
            }

            let step = step.unwrap_or(1) as usize;
            for v in (start..=end).step_by(step) {
                allowed[v as usize] = true;
            }
        }

        let any = (min..=max).all(|v| allowed[v as usize]);
        Ok(Self {
            min,
            max,
            any,
            allowed,
        })
    }

    fn contains(&self, v: u32) -> bool {
        if v < self.min || v > self.max {
            return false;
        }
        self.allowed.get(v as usize).copied().unwrap_or(false)
    }

    fn first_from(&self, from: u32) -> Option<u32> {
        self.values_from(from).next()
    }

    fn values_from(&self, from: u32) -> impl Iterator<Item = u32> + '_ {
        (from.max(self.min)..=self.max).filter(|v| self.contains(*v))
    }
}

fn parse_u32(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| Error::Config(format!("invalid number: {s}")))
}
