//! `datetime`, backed by `chrono`
//!
//! Values are naive (no time zone). `date` is a datetime at midnight that
//! remembers it was built as a date, so it prints and compares as one.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::rc::Rc;

use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::value::{NativeFunction, NativeObject, Value};
use crate::error::{ExceptionKind, Result, SandboxError};

pub const EXPORTS: &[&str] = &["datetime", "date"];

/// Class-level callables reachable as `datetime.datetime.<name>`.
pub const DATETIME_CLASS_METHODS: &[&str] = &["now", "utcnow", "today"];

/// Class-level callables reachable as `datetime.date.<name>`.
pub const DATE_CLASS_METHODS: &[&str] = &["today"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTimeObject {
    value: NaiveDateTime,
    date_only: bool,
}

impl DateTimeObject {
    pub fn datetime(value: NaiveDateTime) -> Self {
        Self {
            value,
            date_only: false,
        }
    }

    pub fn date(date: NaiveDate) -> Self {
        Self {
            value: date.and_time(NaiveTime::MIN),
            date_only: true,
        }
    }

    fn class_name(&self) -> &'static str {
        if self.date_only {
            "date"
        } else {
            "datetime"
        }
    }

    fn isoformat(&self) -> String {
        if self.date_only {
            return self.value.format("%Y-%m-%d").to_string();
        }
        let mut out = self.value.format("%Y-%m-%dT%H:%M:%S").to_string();
        let micros = self.value.nanosecond() / 1_000;
        if micros > 0 {
            out.push_str(&format!(".{:06}", micros));
        }
        out
    }

    fn strftime(&self, pattern: &str) -> Result<String> {
        let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(SandboxError::value_error(format!(
                "invalid format string '{}'",
                pattern
            )));
        }
        let mut out = String::new();
        write!(out, "{}", self.value.format_with_items(items.into_iter()))
            .map_err(|_| SandboxError::value_error(format!("invalid format string '{}'", pattern)))?;
        Ok(out)
    }
}

impl NativeObject for DateTimeObject {
    fn type_name(&self) -> &'static str {
        if self.date_only {
            "datetime.date"
        } else {
            "datetime.datetime"
        }
    }

    fn repr(&self) -> String {
        let v = &self.value;
        let mut fields = vec![v.year().to_string(), v.month().to_string(), v.day().to_string()];
        if !self.date_only {
            let micros = v.nanosecond() / 1_000;
            fields.push(v.hour().to_string());
            fields.push(v.minute().to_string());
            if v.second() > 0 || micros > 0 {
                fields.push(v.second().to_string());
            }
            if micros > 0 {
                fields.push(micros.to_string());
            }
        }
        format!("datetime.{}({})", self.class_name(), fields.join(", "))
    }

    fn str(&self) -> String {
        if self.date_only {
            self.isoformat()
        } else {
            self.isoformat().replacen('T', " ", 1)
        }
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        let v = &self.value;
        let field = match name {
            "year" => v.year() as i64,
            "month" => v.month() as i64,
            "day" => v.day() as i64,
            "hour" if !self.date_only => v.hour() as i64,
            "minute" if !self.date_only => v.minute() as i64,
            "second" if !self.date_only => v.second() as i64,
            "microsecond" if !self.date_only => (v.nanosecond() / 1_000) as i64,
            _ => return None,
        };
        Some(Value::Int(field))
    }

    fn has_method(&self, name: &str) -> bool {
        match name {
            "isoformat" | "strftime" | "weekday" | "isoweekday" => true,
            "date" => !self.date_only,
            _ => false,
        }
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, args: Args) -> Result<Value> {
        match name {
            "isoformat" => {
                args.check(name, 0, 0)?;
                Ok(Value::from(self.isoformat()))
            }
            "strftime" => {
                args.check(name, 1, 1)?;
                let pattern = args.str(0, name)?;
                Ok(Value::from(self.strftime(&pattern)?))
            }
            "weekday" => {
                args.check(name, 0, 0)?;
                Ok(Value::Int(self.value.weekday().num_days_from_monday() as i64))
            }
            "isoweekday" => {
                args.check(name, 0, 0)?;
                Ok(Value::Int(self.value.weekday().number_from_monday() as i64))
            }
            "date" if !self.date_only => {
                args.check(name, 0, 0)?;
                Ok(Value::Object(Rc::new(DateTimeObject::date(self.value.date()))))
            }
            _ => Err(SandboxError::runtime(
                ExceptionKind::AttributeError,
                format!("'{}' object has no attribute '{}'", self.type_name(), name),
            )),
        }
    }

    fn equals(&self, other: &dyn NativeObject) -> Option<bool> {
        let other = other.as_any().downcast_ref::<DateTimeObject>()?;
        Some(self == other)
    }

    fn compare(&self, other: &dyn NativeObject) -> Option<Ordering> {
        let other = other.as_any().downcast_ref::<DateTimeObject>()?;
        (self.date_only == other.date_only).then(|| self.value.cmp(&other.value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Constructors
// ============================================================================

const DATETIME_FIELDS: [&str; 7] = ["year", "month", "day", "hour", "minute", "second", "microsecond"];

fn field(args: &mut Args, index: usize, func: &str, required: bool) -> Result<u32> {
    let name = DATETIME_FIELDS[index];
    match args.take(index, name) {
        Some(value) => {
            let n = value.as_int().ok_or_else(|| {
                SandboxError::type_error(format!(
                    "'{}' must be an integer, not {}",
                    name,
                    value.type_name()
                ))
            })?;
            u32::try_from(n).map_err(|_| out_of_range(name))
        }
        None if required => Err(SandboxError::type_error(format!(
            "{}() missing required argument '{}' (pos {})",
            func,
            name,
            index + 1
        ))),
        None => Ok(0),
    }
}

fn out_of_range(name: &str) -> SandboxError {
    SandboxError::value_error(format!("{} is out of range", name))
}

fn build_date(args: &mut Args, func: &str) -> Result<NaiveDate> {
    let year = field(args, 0, func, true)?;
    let month = field(args, 1, func, true)?;
    let day = field(args, 2, func, true)?;
    if !(1..=9999).contains(&year) {
        return Err(out_of_range("year"));
    }
    if !(1..=12).contains(&month) {
        return Err(SandboxError::value_error("month must be in 1..12"));
    }
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| SandboxError::value_error("day is out of range for month"))
}

fn build_datetime(args: &mut Args) -> Result<NaiveDateTime> {
    let date = build_date(args, "datetime")?;
    let hour = field(args, 3, "datetime", false)?;
    let minute = field(args, 4, "datetime", false)?;
    let second = field(args, 5, "datetime", false)?;
    let micro = field(args, 6, "datetime", false)?;
    let time = NaiveTime::from_hms_micro_opt(hour, minute, second, micro).ok_or_else(|| {
        let name = match (hour, minute, second) {
            (h, _, _) if h > 23 => "hour",
            (_, m, _) if m > 59 => "minute",
            (_, _, s) if s > 59 => "second",
            _ => "microsecond",
        };
        SandboxError::value_error(format!("{} must be in range", name))
    })?;
    Ok(date.and_time(time))
}

fn object(value: DateTimeObject) -> Value {
    Value::Object(Rc::new(value))
}

pub fn call(_interp: &mut Interpreter<'_>, native: NativeFunction, mut args: Args) -> Result<Value> {
    match (native.module, native.name) {
        ("datetime", "datetime") => {
            let value = build_datetime(&mut args)?;
            args.positional.truncate(0);
            args.check("datetime", 0, 0)?;
            Ok(object(DateTimeObject::datetime(value)))
        }
        ("datetime", "date") => {
            let value = build_date(&mut args, "date")?;
            args.positional.truncate(0);
            args.check("date", 0, 0)?;
            Ok(object(DateTimeObject::date(value)))
        }
        ("datetime.datetime", "now" | "today") => {
            args.check(native.name, 0, 0)?;
            Ok(object(DateTimeObject::datetime(Local::now().naive_local())))
        }
        ("datetime.datetime", "utcnow") => {
            args.check(native.name, 0, 0)?;
            Ok(object(DateTimeObject::datetime(Utc::now().naive_utc())))
        }
        ("datetime.date", "today") => {
            args.check(native.name, 0, 0)?;
            Ok(object(DateTimeObject::date(Local::now().date_naive())))
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module '{}' has no attribute '{}'", native.module, native.name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(values: &[i64]) -> Args {
        Args::new(values.iter().map(|v| Value::Int(*v)).collect())
    }

    fn sample() -> DateTimeObject {
        DateTimeObject::datetime(build_datetime(&mut args(&[2024, 3, 9, 14, 5, 7])).unwrap())
    }

    #[test]
    fn test_repr_and_str() {
        let dt = sample();
        assert_eq!(dt.repr(), "datetime.datetime(2024, 3, 9, 14, 5, 7)");
        assert_eq!(dt.str(), "2024-03-09 14:05:07");
        assert_eq!(dt.isoformat(), "2024-03-09T14:05:07");

        let midnight = DateTimeObject::datetime(build_datetime(&mut args(&[2024, 1, 1])).unwrap());
        assert_eq!(midnight.repr(), "datetime.datetime(2024, 1, 1, 0, 0)");

        let day = DateTimeObject::date(build_date(&mut args(&[2024, 1, 1]), "date").unwrap());
        assert_eq!(day.repr(), "datetime.date(2024, 1, 1)");
        assert_eq!(day.str(), "2024-01-01");
    }

    #[test]
    fn test_attributes() {
        let dt = sample();
        assert_eq!(dt.get_attr("year"), Some(Value::Int(2024)));
        assert_eq!(dt.get_attr("minute"), Some(Value::Int(5)));
        let day = DateTimeObject::date(dt.value.date());
        assert_eq!(day.get_attr("hour"), None);
    }

    #[test]
    fn test_strftime() {
        let dt = sample();
        assert_eq!(dt.strftime("%d/%m/%Y %H:%M").unwrap(), "09/03/2024 14:05");
        assert!(dt.strftime("%Q").is_err());
    }

    #[test]
    fn test_invalid_dates() {
        assert!(build_date(&mut args(&[2023, 2, 29]), "date").is_err());
        assert!(build_date(&mut args(&[2024, 13, 1]), "date").is_err());
        assert!(build_datetime(&mut args(&[2024, 1, 1, 24])).is_err());
        assert!(build_date(&mut args(&[2024, 1]), "date").is_err());
    }

    #[test]
    fn test_ordering_within_kind() {
        let early = sample();
        let late = DateTimeObject::datetime(build_datetime(&mut args(&[2025, 1, 1])).unwrap());
        assert_eq!(early.compare(&late), Some(Ordering::Less));
        let day = DateTimeObject::date(early.value.date());
        assert_eq!(early.compare(&day), None);
        assert_eq!(early.equals(&day), Some(false));
    }
}
