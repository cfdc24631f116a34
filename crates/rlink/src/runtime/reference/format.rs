//! Console formatting in the style of R's `print` and `as.character`

use crate::identifier::is_syntactic_name;
use crate::robject::{RData, RObject};

/// Significant digits used by `print` and `cat`
pub const PRINT_DIGITS: usize = 7;
/// Significant digits used by `as.character` and `paste`
pub const CHARACTER_DIGITS: usize = 15;

const LINE_WIDTH: usize = 80;

/// Decomposition of a finite double at a given precision
#[derive(Debug, Clone, Copy)]
struct Decimal {
    negative: bool,
    /// Decimal exponent of the leading significant digit
    exponent: i32,
    /// Significant digits after trailing zeros are dropped
    significant: usize,
}

impl Decimal {
    fn of(x: f64, digits: usize) -> Self {
        if x == 0.0 {
            return Self {
                negative: false,
                exponent: 0,
                significant: 1,
            };
        }
        let sci = format!("{:.*e}", digits.saturating_sub(1), x.abs());
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let significant = mantissa.trim_end_matches('0').trim_end_matches('.').len();
        let significant = significant - usize::from(significant > 1);
        Self {
            negative: x < 0.0,
            exponent: exponent.parse().unwrap_or(0),
            significant: significant.max(1),
        }
    }

    /// Digits needed after the decimal point in fixed notation
    fn fixed_decimals(self) -> usize {
        (self.significant as i32 - 1 - self.exponent).max(0) as usize
    }

    fn fixed_int_width(self) -> usize {
        usize::from(self.negative) + (self.exponent.max(0) as usize + 1)
    }
}

/// Shared layout for a set of doubles printed together
#[derive(Debug, Clone, Copy)]
enum Layout {
    Fixed { decimals: usize },
    Scientific { mantissa_digits: usize },
}

fn choose_layout(values: &[f64], digits: usize) -> Layout {
    let finite: Vec<Decimal> = values
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| Decimal::of(*x, digits))
        .collect();
    if finite.is_empty() {
        return Layout::Fixed { decimals: 0 };
    }

    let decimals = finite.iter().map(|d| d.fixed_decimals()).max().unwrap_or(0);
    let int_width = finite.iter().map(|d| d.fixed_int_width()).max().unwrap_or(1);
    let fixed_width = int_width + if decimals > 0 { decimals + 1 } else { 0 };

    let mantissa_digits = finite.iter().map(|d| d.significant).max().unwrap_or(1);
    let negative = finite.iter().any(|d| d.negative);
    let wide_exponent = finite.iter().any(|d| d.exponent.abs() >= 100);
    let sci_width = usize::from(negative)
        + if mantissa_digits > 1 {
            mantissa_digits + 1
        } else {
            1
        }
        + if wide_exponent { 5 } else { 4 };

    if fixed_width <= sci_width {
        Layout::Fixed { decimals }
    } else {
        Layout::Scientific { mantissa_digits }
    }
}

fn render(x: f64, layout: Layout) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    match layout {
        Layout::Fixed { decimals } => {
            let text = format!("{:.*}", decimals, x);
            // -0 prints as 0
            if text.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
                text.trim_start_matches('-').to_string()
            } else {
                text
            }
        }
        Layout::Scientific { mantissa_digits } => {
            let sci = format!("{:.*e}", mantissa_digits.saturating_sub(1), x);
            let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
    }
}

/// A single double at `digits` significant digits, chosen independently
pub fn format_double(x: f64, digits: usize) -> String {
    render(x, choose_layout(&[x], digits))
}

/// Doubles formatted with one shared layout, as `print` does
pub fn format_doubles(values: &[f64], digits: usize) -> Vec<String> {
    let layout = choose_layout(values, digits);
    values.iter().map(|x| render(*x, layout)).collect()
}

pub fn format_logical(b: bool) -> &'static str {
    if b {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// A string as `print` shows it: quoted and escaped
pub fn quote_string(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            '\r' => quoted.push_str("\\r"),
            c if c.is_control() => quoted.push_str(&format!("\\u{:04x}", c as u32)),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Elements of an atomic vector as `as.character` renders them
pub fn as_character(object: &RObject) -> Option<Vec<String>> {
    match &object.data {
        RData::Null => Some(Vec::new()),
        RData::Logical(v) => Some(v.iter().map(|b| format_logical(*b).to_string()).collect()),
        RData::Double(v) => Some(
            v.iter()
                .map(|x| format_double(*x, CHARACTER_DIGITS))
                .collect(),
        ),
        RData::Character(v) => Some(v.clone()),
        RData::List(items) => items
            .iter()
            .map(|item| match as_character(item)?.as_slice() {
                [single] => Some(single.clone()),
                _ => None,
            })
            .collect(),
        RData::Opaque(_) => None,
    }
}

fn display_width(s: &str) -> usize {
    s.chars().count()
}

fn pad_left(s: &str, width: usize) -> String {
    let padding = width.saturating_sub(display_width(s));
    format!("{}{}", " ".repeat(padding), s)
}

fn pad_right(s: &str, width: usize) -> String {
    let padding = width.saturating_sub(display_width(s));
    format!("{}{}", s, " ".repeat(padding))
}

/// Elements rendered for printing, plus whether they are left-aligned
fn print_cells(data: &RData) -> (Vec<String>, bool) {
    match data {
        RData::Logical(v) => (v.iter().map(|b| format_logical(*b).to_string()).collect(), false),
        RData::Double(v) => (format_doubles(v, PRINT_DIGITS), false),
        RData::Character(v) => (v.iter().map(|s| quote_string(s)).collect(), true),
        _ => (Vec::new(), false),
    }
}

fn empty_form(object: &RObject) -> String {
    match (&object.data, &object.attrs.names) {
        (RData::Logical(_), _) => "logical(0)".to_string(),
        (RData::Double(_), _) => "numeric(0)".to_string(),
        (RData::Character(_), _) => "character(0)".to_string(),
        (RData::List(_), Some(_)) => "named list()".to_string(),
        (RData::List(_), None) => "list()".to_string(),
        _ => "NULL".to_string(),
    }
}

/// Render `object` the way R's `print` would, including the final newline
pub fn print_object(object: &RObject) -> String {
    let mut out = String::new();
    print_into(object, "", &mut out);
    out
}

fn print_into(object: &RObject, tag: &str, out: &mut String) {
    match &object.data {
        RData::Null => out.push_str("NULL\n"),
        RData::Opaque(class) => out.push_str(&format!("<{}>\n", class)),
        RData::List(items) if items.is_empty() => {
            out.push_str(&empty_form(object));
            out.push('\n');
        }
        RData::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let name = object
                    .attrs
                    .names
                    .as_ref()
                    .and_then(|names| names.get(i))
                    .filter(|name| !name.is_empty());
                let item_tag = match name {
                    Some(name) if is_syntactic_name(name) => format!("{}${}", tag, name),
                    Some(name) => format!("{}$`{}`", tag, name),
                    None => format!("{}[[{}]]", tag, i + 1),
                };
                out.push_str(&item_tag);
                out.push('\n');
                print_into(item, &item_tag, out);
                out.push('\n');
            }
        }
        _ if object.is_empty() => {
            out.push_str(&empty_form(object));
            out.push('\n');
        }
        data => match (&object.attrs.dim, &object.attrs.names) {
            (Some(dim), _) if dim.len() == 2 => print_matrix(data, dim[0], dim[1], out),
            (_, Some(names)) => print_named(data, names, out),
            _ => print_plain(data, out),
        },
    }
}

fn print_plain(data: &RData, out: &mut String) {
    let (cells, left) = print_cells(data);
    let width = cells.iter().map(|c| display_width(c)).max().unwrap_or(0);
    let label_width = format!("[{}]", cells.len()).len();
    let per_line = ((LINE_WIDTH - label_width) / (width + 1)).max(1);

    for (line, chunk) in cells.chunks(per_line).enumerate() {
        out.push_str(&pad_left(&format!("[{}]", line * per_line + 1), label_width));
        for cell in chunk {
            out.push(' ');
            out.push_str(&if left {
                pad_right(cell, width)
            } else {
                pad_left(cell, width)
            });
        }
        out.push('\n');
    }
}

fn print_named(data: &RData, names: &[String], out: &mut String) {
    let (cells, _) = print_cells(data);
    let width = cells
        .iter()
        .chain(names.iter())
        .map(|c| display_width(c))
        .max()
        .unwrap_or(0);
    let per_line = (LINE_WIDTH / (width + 1)).max(1);

    for (chunk_names, chunk_cells) in names.chunks(per_line).zip(cells.chunks(per_line)) {
        for name in chunk_names {
            out.push_str(&pad_left(name, width));
            out.push(' ');
        }
        out.push('\n');
        for cell in chunk_cells {
            out.push_str(&pad_left(cell, width));
            out.push(' ');
        }
        out.push('\n');
    }
}

fn print_matrix(data: &RData, nrow: usize, ncol: usize, out: &mut String) {
    let column = |j: usize| -> RData {
        let range = j * nrow..(j + 1) * nrow;
        match data {
            RData::Logical(v) => RData::Logical(v[range].to_vec()),
            RData::Double(v) => RData::Double(v[range].to_vec()),
            RData::Character(v) => RData::Character(v[range].to_vec()),
            other => other.clone(),
        }
    };
    let row_label_width = format!("[{},]", nrow).len();

    let mut columns = Vec::with_capacity(ncol);
    for j in 0..ncol {
        let header = format!("[,{}]", j + 1);
        let (cells, left) = print_cells(&column(j));
        let width = cells
            .iter()
            .map(|c| display_width(c))
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(0);
        columns.push((header, cells, left, width));
    }

    out.push_str(&" ".repeat(row_label_width));
    for (header, _, left, width) in &columns {
        out.push(' ');
        out.push_str(&if *left {
            pad_right(header, *width)
        } else {
            pad_left(header, *width)
        });
    }
    out.push('\n');

    for i in 0..nrow {
        out.push_str(&pad_right(&format!("[{},]", i + 1), row_label_width));
        for (_, cells, left, width) in &columns {
            let cell = cells.get(i).map_or("", String::as_str);
            out.push(' ');
            out.push_str(&if *left {
                pad_right(cell, *width)
            } else {
                pad_left(cell, *width)
            });
        }
        out.push('\n');
    }
}
