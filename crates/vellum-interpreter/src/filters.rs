//! Filter registry and the built-in filter library.
//!
//! A filter is a pure function `(value, params, format) -> value`. Names
//! are case-insensitive; registering over an existing name replaces it.
//! Locale-dependent filters (number/date formatting, comparisons over
//! dates) receive the active [`FormatSettings`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

use vellum_diagnostics::RenderError;

use crate::escape::{escape_html, escape_json};
use crate::value::{format_date_parts, format_fixed, format_value, FormatSettings, Value};

use chrono::{Datelike, Timelike};

pub type FilterFn = Rc<dyn Fn(&Value, &[Value], &FormatSettings) -> Result<Value, RenderError>>;

pub struct FilterRegistry {
    map: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    /// Registry pre-loaded with the built-in library.
    pub fn with_builtins() -> Self {
        let mut reg = Self {
            map: HashMap::new(),
        };
        reg.register("uppercase", |v, p, fs| {
            expect_params("uppercase", p, 0)?;
            Ok(Value::Str(format_value(v, fs).to_uppercase()))
        });
        reg.register("lowercase", |v, p, fs| {
            expect_params("lowercase", p, 0)?;
            Ok(Value::Str(format_value(v, fs).to_lowercase()))
        });
        reg.register("capitalize", |v, p, fs| {
            expect_params("capitalize", p, 0)?;
            let s = format_value(v, fs);
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            };
            Ok(Value::Str(out))
        });
        reg.register("trim", |v, p, fs| {
            expect_params("trim", p, 0)?;
            Ok(Value::Str(format_value(v, fs).trim().to_string()))
        });
        reg.register("padleft", |v, p, fs| pad("padleft", v, p, fs, true));
        reg.register("padright", |v, p, fs| pad("padright", v, p, fs, false));
        reg.register("substring", substring);
        reg.register("startswith", |v, p, fs| {
            let needle = one_string("startswith", p, fs)?;
            Ok(Value::Bool(format_value(v, fs).starts_with(&needle)))
        });
        reg.register("endswith", |v, p, fs| {
            let needle = one_string("endswith", p, fs)?;
            Ok(Value::Bool(format_value(v, fs).ends_with(&needle)))
        });
        reg.register("contains", |v, p, fs| {
            let needle = one_string("contains", p, fs)?;
            Ok(Value::Bool(format_value(v, fs).contains(&needle)))
        });
        reg.register("formatfloat", format_float_filter);
        reg.register("formatdate", format_date_filter);
        reg.register("htmlescape", |v, p, fs| {
            expect_params("htmlescape", p, 0)?;
            Ok(Value::Str(escape_html(&format_value(v, fs))))
        });
        reg.register("jsonescape", |v, p, fs| {
            expect_params("jsonescape", p, 0)?;
            Ok(Value::Str(escape_json(&format_value(v, fs))))
        });
        reg.register("count", |v, p, _fs| {
            expect_params("count", p, 0)?;
            match v {
                Value::Empty => Ok(Value::Int(0)),
                Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                other => match other.iter_len() {
                    Some(n) => Ok(Value::Int(n as i64)),
                    None => Err(RenderError::filter("count", "value is not countable")),
                },
            }
        });
        for name in ["eq", "ne", "gt", "ge", "lt", "le"] {
            reg.register(name, move |v, p, fs| compare(name, v, p, fs));
        }
        reg
    }

    pub fn register(
        &mut self,
        name: &str,
        f: impl Fn(&Value, &[Value], &FormatSettings) -> Result<Value, RenderError> + 'static,
    ) {
        self.map.insert(name.to_ascii_lowercase(), Rc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.map.get(&name.to_ascii_lowercase()).cloned()
    }
}

fn expect_params(name: &str, params: &[Value], n: usize) -> Result<(), RenderError> {
    if params.len() == n {
        Ok(())
    } else {
        Err(RenderError::filter(
            name,
            format!("expects {} parameter(s), got {}", n, params.len()),
        ))
    }
}

fn one_string(name: &str, params: &[Value], fs: &FormatSettings) -> Result<String, RenderError> {
    expect_params(name, params, 1)?;
    Ok(format_value(&params[0], fs))
}

fn param_int(name: &str, param: &Value) -> Result<i64, RenderError> {
    match param {
        Value::Int(v) => Ok(*v),
        Value::Float(v) | Value::Currency(v) | Value::Bcd(v) => Ok(*v as i64),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| RenderError::filter(name, format!("'{s}' is not an integer"))),
        other => Err(RenderError::filter(
            name,
            format!("{other:?} is not an integer"),
        )),
    }
}

fn param_float(name: &str, param: &Value) -> Result<f64, RenderError> {
    match param {
        Value::Int(v) => Ok(*v as f64),
        Value::Float(v) | Value::Currency(v) | Value::Bcd(v) => Ok(*v),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RenderError::filter(name, format!("'{s}' is not a number"))),
        other => Err(RenderError::filter(
            name,
            format!("{other:?} is not a number"),
        )),
    }
}

fn pad(
    name: &str,
    v: &Value,
    params: &[Value],
    fs: &FormatSettings,
    left: bool,
) -> Result<Value, RenderError> {
    if params.is_empty() || params.len() > 2 {
        return Err(RenderError::filter(name, "expects a width and an optional pad string"));
    }
    let width = param_int(name, &params[0])?.max(0) as usize;
    let pad_char = match params.get(1) {
        Some(p) => format_value(p, fs).chars().next().unwrap_or(' '),
        None => ' ',
    };
    let s = format_value(v, fs);
    let len = s.chars().count();
    if len >= width {
        return Ok(Value::Str(s));
    }
    let filler: String = std::iter::repeat(pad_char).take(width - len).collect();
    Ok(Value::Str(if left {
        format!("{filler}{s}")
    } else {
        format!("{s}{filler}")
    }))
}

/// 1-based start position, optional length; out-of-range reads clamp.
fn substring(v: &Value, params: &[Value], fs: &FormatSettings) -> Result<Value, RenderError> {
    if params.is_empty() || params.len() > 2 {
        return Err(RenderError::filter(
            "substring",
            "expects a start position and an optional length",
        ));
    }
    let start = param_int("substring", &params[0])?.max(1) as usize - 1;
    let s = format_value(v, fs);
    let tail = s.chars().skip(start);
    let out: String = match params.get(1) {
        Some(p) => {
            let len = param_int("substring", p)?.max(0) as usize;
            tail.take(len).collect()
        }
        None => tail.collect(),
    };
    Ok(Value::Str(out))
}

fn format_float_filter(
    v: &Value,
    params: &[Value],
    fs: &FormatSettings,
) -> Result<Value, RenderError> {
    expect_params("formatfloat", params, 1)?;
    let decimals = param_int("formatfloat", &params[0])?.max(0) as usize;
    let num = param_float("formatfloat", v)
        .map_err(|_| RenderError::filter("formatfloat", "value is not numeric"))?;
    Ok(Value::Str(format_fixed(num, decimals, fs)))
}

fn format_date_filter(
    v: &Value,
    params: &[Value],
    fs: &FormatSettings,
) -> Result<Value, RenderError> {
    let pattern = one_string("formatdate", params, fs)?;
    let out = match v {
        Value::Date(d) => format_date_parts(&pattern, d.year(), d.month(), d.day(), 0, 0, 0),
        Value::DateTime(d) => format_date_parts(
            &pattern,
            d.year(),
            d.month(),
            d.day(),
            d.hour(),
            d.minute(),
            d.second(),
        ),
        Value::Time(t) => format_date_parts(&pattern, 0, 0, 0, t.hour(), t.minute(), t.second()),
        _ => return Err(RenderError::filter("formatdate", "value is not a date or time")),
    };
    Ok(Value::Str(out))
}

/// Comparison used from `if` pipelines. One parameter exactly. Integer
/// values coerce the comparand to integer, floats to float, dates render
/// via the locale short date and compare as strings, everything else
/// compares as strings. A missing value compares false, except `ne`.
fn compare(
    name: &str,
    v: &Value,
    params: &[Value],
    fs: &FormatSettings,
) -> Result<Value, RenderError> {
    expect_params(name, params, 1)?;
    let param = &params[0];

    if let Value::Empty = v {
        return Ok(Value::Bool(name == "ne"));
    }

    let ord = match v {
        Value::Int(a) => a.cmp(&param_int(name, param)?),
        Value::Bool(a) => (*a as i64).cmp(&param_int(name, param)?),
        Value::Float(a) | Value::Currency(a) | Value::Bcd(a) => {
            let b = param_float(name, param)?;
            a.partial_cmp(&b)
                .ok_or_else(|| RenderError::filter(name, "comparison is undefined (NaN)"))?
        }
        Value::Date(_) | Value::DateTime(_) => {
            let a = short_date_form(v, fs);
            let b = match param {
                Value::Date(_) | Value::DateTime(_) => short_date_form(param, fs),
                other => format_value(other, fs),
            };
            a.cmp(&b)
        }
        other => format_value(other, fs).cmp(&format_value(param, fs)),
    };

    let result = match name {
        "eq" => ord == Ordering::Equal,
        "ne" => ord != Ordering::Equal,
        "gt" => ord == Ordering::Greater,
        "ge" => ord != Ordering::Less,
        "lt" => ord == Ordering::Less,
        "le" => ord != Ordering::Greater,
        _ => return Err(RenderError::filter(name, "unknown comparison")),
    };
    Ok(Value::Bool(result))
}

fn short_date_form(v: &Value, fs: &FormatSettings) -> String {
    match v {
        Value::Date(d) => format_date_parts(&fs.short_date_format, d.year(), d.month(), d.day(), 0, 0, 0),
        Value::DateTime(d) => {
            format_date_parts(&fs.short_date_format, d.year(), d.month(), d.day(), 0, 0, 0)
        }
        other => format_value(other, fs),
    }
}
