//! Field access and coercion over a Bronze payload.
//!
//! Every failure names the offending field. Null values and blank strings
//! count as absent.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use medallion_types::{BronzeRecord, PipelineError};
use rust_decimal::Decimal;
use serde_json::Value;

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
const YEAR_RANGE: core::ops::RangeInclusive<i32> = 1900..=2200;

pub struct Fields<'a> {
    record: &'a BronzeRecord,
}

impl<'a> Fields<'a> {
    pub const fn new(record: &'a BronzeRecord) -> Self {
        Self { record }
    }

    fn present(&self, name: &str) -> Option<&'a Value> {
        match self.record.field(name)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            v => Some(v),
        }
    }

    fn require(&self, name: &str) -> Result<&'a Value, PipelineError> {
        self.present(name)
            .ok_or_else(|| PipelineError::validation(name, "required field is missing"))
    }

    pub fn string(&self, name: &str) -> Result<String, PipelineError> {
        scalar_text(name, self.require(name)?)
    }

    pub fn decimal(&self, name: &str) -> Result<Decimal, PipelineError> {
        to_decimal(name, self.require(name)?)
    }

    pub fn opt_decimal(&self, name: &str) -> Result<Option<Decimal>, PipelineError> {
        self.present(name).map(|v| to_decimal(name, v)).transpose()
    }

    pub fn non_negative(&self, name: &str) -> Result<Decimal, PipelineError> {
        check_non_negative(name, self.decimal(name)?)
    }

    pub fn opt_non_negative(&self, name: &str) -> Result<Option<Decimal>, PipelineError> {
        self.opt_decimal(name)?
            .map(|d| check_non_negative(name, d))
            .transpose()
    }

    pub fn instant(&self, name: &str) -> Result<DateTime<Utc>, PipelineError> {
        to_instant(name, self.require(name)?)
    }

    pub fn date(&self, name: &str) -> Result<NaiveDate, PipelineError> {
        to_date(name, self.require(name)?)
    }

    pub fn opt_date(&self, name: &str) -> Result<Option<NaiveDate>, PipelineError> {
        self.present(name).map(|v| to_date(name, v)).transpose()
    }

    pub fn year(&self, name: &str) -> Result<i32, PipelineError> {
        to_year(name, self.require(name)?)
    }

    pub fn opt_year(&self, name: &str) -> Result<Option<i32>, PipelineError> {
        self.present(name).map(|v| to_year(name, v)).transpose()
    }

    /// Match a string field case-insensitively against a declared value set.
    pub fn declared<T>(
        &self,
        name: &str,
        parse: fn(&str) -> Option<T>,
        declared: &[&str],
    ) -> Result<T, PipelineError> {
        let raw = self.string(name)?;
        parse(&raw).ok_or_else(|| {
            PipelineError::validation(
                name,
                format!("`{raw}` is not one of {}", declared.join(", ")),
            )
        })
    }

    pub fn opt_declared<T>(
        &self,
        name: &str,
        parse: fn(&str) -> Option<T>,
        declared: &[&str],
    ) -> Result<Option<T>, PipelineError> {
        if self.present(name).is_none() {
            return Ok(None);
        }
        self.declared(name, parse, declared).map(Some)
    }
}

fn scalar_text(name: &str, value: &Value) -> Result<String, PipelineError> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) | Value::Null => Err(
            PipelineError::validation(name, "expected a string or number"),
        ),
    }
}

fn to_decimal(name: &str, value: &Value) -> Result<Decimal, PipelineError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(PipelineError::validation(name, "expected a decimal")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| PipelineError::validation(name, format!("`{text}` is not a decimal")))
}

fn check_non_negative(name: &str, value: Decimal) -> Result<Decimal, PipelineError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(PipelineError::validation(
            name,
            format!("{value} must be non-negative"),
        ));
    }
    Ok(value)
}

fn epoch_seconds(name: &str, secs: i64) -> Result<DateTime<Utc>, PipelineError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PipelineError::validation(name, format!("epoch {secs} out of range")))
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn to_instant(name: &str, value: &Value) -> Result<DateTime<Utc>, PipelineError> {
    match value {
        Value::Number(n) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| PipelineError::validation(name, "epoch seconds must be integral"))?;
            epoch_seconds(name, secs)
        }
        Value::String(s) => {
            if let Some(dt) = parse_instant(s) {
                return Ok(dt);
            }
            match s.trim().parse::<i64>() {
                Ok(secs) => epoch_seconds(name, secs),
                Err(_) => Err(PipelineError::validation(
                    name,
                    format!("`{}` is not a timestamp", s.trim()),
                )),
            }
        }
        _ => Err(PipelineError::validation(name, "expected a timestamp")),
    }
}

fn to_date(name: &str, value: &Value) -> Result<NaiveDate, PipelineError> {
    let Value::String(s) = value else {
        return Err(PipelineError::validation(name, "expected a date string"));
    };
    let text = s.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_instant(text).map(|dt| dt.date_naive()))
        .ok_or_else(|| PipelineError::validation(name, format!("`{text}` is not a date")))
}

fn to_year(name: &str, value: &Value) -> Result<i32, PipelineError> {
    let year = match value {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
    .ok_or_else(|| PipelineError::validation(name, "expected an integer year"))?;
    if !YEAR_RANGE.contains(&year) {
        return Err(PipelineError::validation(
            name,
            format!("year {year} out of range"),
        ));
    }
    Ok(year)
}
