//! The uniform dynamically-typed value handed around the interpreter.
//!
//! Scalars are carried inline; structured data goes through the three
//! capability traits ([`Record`], [`Sequence`], [`RowSource`]) so callers
//! can project whatever they hold into a template without the engine
//! knowing the concrete type. Absence is a first-class value (`Empty`),
//! not an error.

use std::fmt;
use std::rc::Rc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Record-like access by field name.
pub trait Record {
    fn field(&self, name: &str) -> Option<Value>;
}

/// List-like access by position. Out-of-range reads yield `Empty`.
pub trait Sequence {
    fn len(&self) -> usize;
    fn at(&self, index: usize) -> Value;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sequence for Vec<Value> {
    fn len(&self) -> usize {
        Vec::len(self)
    }
    fn at(&self, index: usize) -> Value {
        self.get(index).cloned().unwrap_or(Value::Empty)
    }
}

/// Tabular data with named columns and a current cursor row. Accessing a
/// column outside a loop reads from the cursor row; loop iteration reads
/// row by row.
pub trait RowSource {
    fn len(&self) -> usize;
    fn position(&self) -> usize;
    fn cell(&self, row: usize, column: &str) -> Option<Value>;
}

#[derive(Clone)]
pub enum Value {
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Currency(f64),
    Bcd(f64),
    Object(Rc<dyn Record>),
    List(Rc<dyn Sequence>),
    Rows(Rc<dyn RowSource>),
}

impl Value {
    /// Build a list value from anything convertible to `Value`.
    pub fn list<I, T>(items: I) -> Value
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        let items: Vec<Value> = items.into_iter().map(Into::into).collect();
        Value::List(Rc::new(items))
    }

    pub fn object(record: impl Record + 'static) -> Value {
        Value::Object(Rc::new(record))
    }

    pub fn rows(rows: impl RowSource + 'static) -> Value {
        Value::Rows(Rc::new(rows))
    }

    pub fn has_value(&self) -> bool {
        !matches!(self, Value::Empty)
    }

    pub fn is_iterable(&self) -> bool {
        matches!(self, Value::List(_) | Value::Rows(_))
    }

    /// Number of elements for iterable values; `None` for everything else.
    pub fn iter_len(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(l.len()),
            Value::Rows(r) => Some(r.len()),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => write!(f, "Empty"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::Date(v) => write!(f, "Date({v})"),
            Value::DateTime(v) => write!(f, "DateTime({v})"),
            Value::Time(v) => write!(f, "Time({v})"),
            Value::Currency(v) => write!(f, "Currency({v})"),
            Value::Bcd(v) => write!(f, "Bcd({v})"),
            Value::Object(_) => write!(f, "Object(..)"),
            Value::List(l) => write!(f, "List(len={})", l.len()),
            Value::Rows(r) => write!(f, "Rows(len={})", r.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

/// Nullable wrappers collapse to `Empty` when absent.
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Empty,
        }
    }
}

/// Locale-sensitive formatting knobs. The default is an invariant locale:
/// dot decimal separator, no digit grouping, `yyyy-mm-dd` dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSettings {
    pub decimal_separator: char,
    pub thousand_separator: Option<char>,
    /// Delphi-style pattern: `yyyy`/`yy`, `mm`/`m`, `dd`/`d`.
    pub short_date_format: String,
    /// Delphi-style pattern: `hh`, `nn`, `ss`.
    pub long_time_format: String,
    pub currency_decimals: u8,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            thousand_separator: None,
            short_date_format: "yyyy-mm-dd".into(),
            long_time_format: "hh:nn:ss".into(),
            currency_decimals: 2,
        }
    }
}

/// Render a value to its output string under the active locale.
/// Containers have no textual form and render empty.
pub fn format_value(value: &Value, fs: &FormatSettings) -> String {
    match value {
        Value::Empty => String::new(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) | Value::Bcd(v) => format_float(*v, fs),
        Value::Bool(v) => if *v { "true" } else { "false" }.to_string(),
        Value::Str(v) => v.clone(),
        Value::Date(v) => format_date_parts(&fs.short_date_format, v.year(), v.month(), v.day(), 0, 0, 0),
        Value::DateTime(v) => {
            let date = format_date_parts(
                &fs.short_date_format,
                v.year(),
                v.month(),
                v.day(),
                v.hour(),
                v.minute(),
                v.second(),
            );
            let time = format_date_parts(
                &fs.long_time_format,
                v.year(),
                v.month(),
                v.day(),
                v.hour(),
                v.minute(),
                v.second(),
            );
            format!("{date} {time}")
        }
        Value::Time(v) => {
            format_date_parts(&fs.long_time_format, 0, 0, 0, v.hour(), v.minute(), v.second())
        }
        Value::Currency(v) => format_fixed(*v, fs.currency_decimals as usize, fs),
        Value::Object(_) | Value::List(_) | Value::Rows(_) => String::new(),
    }
}

fn format_float(v: f64, fs: &FormatSettings) -> String {
    let s = v.to_string();
    if fs.decimal_separator == '.' {
        s
    } else {
        s.replace('.', &fs.decimal_separator.to_string())
    }
}

/// Fixed-point rendering with optional thousand grouping; used for
/// `Currency` and the `formatfloat` filter.
pub fn format_fixed(v: f64, decimals: usize, fs: &FormatSettings) -> String {
    let s = format!("{:.*}", decimals, v);
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s.as_str(), None),
    };
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };
    let mut grouped = String::new();
    match fs.thousand_separator {
        Some(sep) => {
            let bytes = digits.as_bytes();
            for (i, b) in bytes.iter().enumerate() {
                if i > 0 && (bytes.len() - i) % 3 == 0 {
                    grouped.push(sep);
                }
                grouped.push(*b as char);
            }
        }
        None => grouped.push_str(digits),
    }
    let mut out = String::new();
    out.push_str(sign);
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push(fs.decimal_separator);
        out.push_str(frac);
    }
    out
}

/// Apply a Delphi-style date/time pattern. Recognized runs: `y`, `m`, `d`,
/// `h`, `n`, `s` (case-insensitive); a run of two or more pads to two
/// digits, `yyyy` to four. Everything else is copied through.
pub fn format_date_parts(
    pattern: &str,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> String {
    let mut out = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i].to_ascii_lowercase();
        let run = chars[i..]
            .iter()
            .take_while(|ch| ch.to_ascii_lowercase() == c)
            .count();
        match c {
            'y' => {
                if run >= 4 {
                    out.push_str(&format!("{:04}", year));
                } else {
                    out.push_str(&format!("{:02}", year.rem_euclid(100)));
                }
            }
            'm' => push_num(&mut out, month, run),
            'd' => push_num(&mut out, day, run),
            'h' => push_num(&mut out, hour, run),
            'n' => push_num(&mut out, minute, run),
            's' => push_num(&mut out, second, run),
            _ => {
                for ch in &chars[i..i + run] {
                    out.push(*ch);
                }
            }
        }
        i += run;
    }
    out
}

fn push_num(out: &mut String, v: u32, run: usize) {
    if run >= 2 {
        out.push_str(&format!("{:02}", v));
    } else {
        out.push_str(&v.to_string());
    }
}

/// `Empty` is false, `Bool` is itself; anything else is judged by its
/// locale string form: false iff empty, `"false"`, or `"0"`
/// (case-insensitive).
pub fn is_truthy(value: &Value, fs: &FormatSettings) -> bool {
    match value {
        Value::Empty => false,
        Value::Bool(b) => *b,
        other => {
            let s = format_value(other, fs);
            !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> FormatSettings {
        FormatSettings::default()
    }

    #[test]
    fn scalar_formatting() {
        assert_eq!(format_value(&Value::Int(42), &fs()), "42");
        assert_eq!(format_value(&Value::Float(1.5), &fs()), "1.5");
        assert_eq!(format_value(&Value::Float(1.0), &fs()), "1");
        assert_eq!(format_value(&Value::Bool(true), &fs()), "true");
        assert_eq!(format_value(&Value::Empty, &fs()), "");
    }

    #[test]
    fn date_formatting_uses_short_date() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_value(&Value::Date(d), &fs()), "2024-03-07");
    }

    #[test]
    fn datetime_formatting_appends_time() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        assert_eq!(format_value(&Value::DateTime(d), &fs()), "2024-03-07 09:05:01");
    }

    #[test]
    fn currency_uses_locale() {
        let mut settings = fs();
        settings.thousand_separator = Some(',');
        assert_eq!(
            format_value(&Value::Currency(1234567.891), &settings),
            "1,234,567.89"
        );
        assert_eq!(
            format_value(&Value::Currency(-1234.5), &settings),
            "-1,234.50"
        );
    }

    #[test]
    fn decimal_separator_is_respected() {
        let mut settings = fs();
        settings.decimal_separator = ',';
        assert_eq!(format_value(&Value::Float(1.5), &settings), "1,5");
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&Value::Empty, &fs()));
        assert!(!is_truthy(&Value::Bool(false), &fs()));
        assert!(is_truthy(&Value::Bool(true), &fs()));
        assert!(!is_truthy(&Value::Str("".into()), &fs()));
        assert!(!is_truthy(&Value::Str("FALSE".into()), &fs()));
        assert!(!is_truthy(&Value::Int(0), &fs()));
        assert!(is_truthy(&Value::Int(7), &fs()));
        assert!(is_truthy(&Value::Str("no".into()), &fs()));
    }

    #[test]
    fn nullable_collapses_to_empty() {
        let present: Value = Some(3i64).into();
        let absent: Value = Option::<i64>::None.into();
        assert!(present.has_value());
        assert!(!absent.has_value());
    }

    #[test]
    fn list_roundtrip() {
        let v = Value::list(["a", "b"]);
        assert_eq!(v.iter_len(), Some(2));
        match v {
            Value::List(l) => {
                assert_eq!(format_value(&l.at(1), &fs()), "b");
                assert!(matches!(l.at(9), Value::Empty));
            }
            _ => panic!("expected a list"),
        }
    }
}
