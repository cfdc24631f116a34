use indexmap::IndexMap;

use super::format::{as_character, format_double, format_logical, print_object, PRINT_DIGITS};
use super::parser::{Arg, BinaryOp, Expr, UnaryOp};
use crate::errors::BridgeError;
use crate::robject::{Attributes, RData, RObject};
use crate::sink::{OutputSink, OutputStream};

/// The global environment: bindings in insertion order
pub type Globals = IndexMap<String, RObject>;

type Args = Vec<(Option<String>, RObject)>;

/// Longest vector `:` will build
const MAX_RANGE_LEN: usize = 1 << 28;

/// Deepest evaluation the interpreter allows before giving up
const MAX_EVAL_DEPTH: usize = 256;

const BUILTINS: &[&str] = &[
    "as.character",
    "as.numeric",
    "c",
    "cat",
    "exists",
    "identity",
    "invisible",
    "is.null",
    "length",
    "list",
    "ls",
    "matrix",
    "mean",
    "message",
    "names",
    "nchar",
    "paste",
    "paste0",
    "print",
    "rm",
    "seq_len",
    "stop",
    "sum",
    "tolower",
    "toupper",
    "typeof",
    "warning",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Bindings of the base environment that scripts commonly rely on
fn base_constant(name: &str) -> Option<RObject> {
    let letters = |start: u8| (0..26).map(|i| char::from(start + i).to_string()).collect();
    match name {
        "T" => Some(RObject::logical(vec![true])),
        "F" => Some(RObject::logical(vec![false])),
        "pi" => Some(RObject::double(vec![std::f64::consts::PI])),
        "LETTERS" => Some(RObject::character(letters(b'A'))),
        "letters" => Some(RObject::character(letters(b'a'))),
        _ => None,
    }
}

fn eval_error(message: impl Into<String>) -> BridgeError {
    BridgeError::Eval(message.into())
}

fn na_unsupported() -> BridgeError {
    eval_error("NA values are not supported by the reference runtime")
}

/// Evaluates parsed expressions against a global environment, writing console
/// output to a sink
pub struct Interpreter<'a> {
    globals: &'a mut Globals,
    out: &'a mut dyn OutputSink,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(globals: &'a mut Globals, out: &'a mut dyn OutputSink) -> Self {
        Self {
            globals,
            out,
            depth: 0,
        }
    }

    /// Evaluate top-level expressions in order; the value of the last one is
    /// the result, `NULL` for an empty program
    pub fn run(&mut self, program: &[Expr]) -> Result<RObject, BridgeError> {
        let mut last = RObject::null();
        for expr in program {
            last = self.eval(expr)?;
        }
        Ok(last)
    }

    fn emit(&mut self, chunk: &str, stream: OutputStream) {
        if !chunk.is_empty() {
            self.out.write(chunk, stream);
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<RObject, BridgeError> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(eval_error(
                "evaluation nested too deeply: infinite recursion / options(expressions=)?",
            ));
        }
        self.depth += 1;
        let result = self.eval_expr(expr);
        self.depth -= 1;
        result
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<RObject, BridgeError> {
        match expr {
            Expr::Number(n) => Ok(RObject::double(vec![*n])),
            Expr::Str(s) => Ok(RObject::character(vec![s.clone()])),
            Expr::Bool(b) => Ok(RObject::logical(vec![*b])),
            Expr::Null => Ok(RObject::null()),
            Expr::Na => Err(na_unsupported()),
            Expr::Ident(name) => self.lookup(name),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                unary(*op, &value)
            }
            Expr::Binary {
                op: op @ (BinaryOp::AndAnd | BinaryOp::OrOr),
                lhs,
                rhs,
            } => self.short_circuit(*op, lhs, rhs),
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, &lhs, &rhs)
            }
            Expr::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value.clone())?;
                Ok(value)
            }
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::Dollar { object, name } => {
                let object = self.eval(object)?;
                dollar(&object, name)
            }
            Expr::Index {
                object,
                index,
                single,
            } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                if *single {
                    extract_one(&object, &index)
                } else {
                    subset(&object, &index)
                }
            }
            Expr::Block(body) => self.run(body),
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.eval(condition)?;
                if truthy(&condition)? {
                    self.eval(then)
                } else if let Some(otherwise) = otherwise {
                    self.eval(otherwise)
                } else {
                    Ok(RObject::null())
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<RObject, BridgeError> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = base_constant(name) {
            return Ok(value);
        }
        if is_builtin(name) {
            return Ok(RObject::opaque("function"));
        }
        Err(eval_error(format!("object '{}' not found", name)))
    }

    fn assign(&mut self, target: &Expr, value: RObject) -> Result<(), BridgeError> {
        match target {
            Expr::Ident(name) | Expr::Str(name) => {
                self.globals.insert(name.clone(), value);
                Ok(())
            }
            Expr::Dollar { object, name } => {
                let current = self.eval(object)?;
                let updated = set_field(current, name, value)?;
                self.assign(object, updated)
            }
            _ => Err(eval_error("invalid (do_set) left-hand side to assignment")),
        }
    }

    fn short_circuit(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<RObject, BridgeError> {
        let symbol = if op == BinaryOp::AndAnd { "&&" } else { "||" };
        let lhs = scalar_logical(&self.eval(lhs)?, symbol)?;
        let result = match (op, lhs) {
            (BinaryOp::AndAnd, false) => false,
            (BinaryOp::OrOr, true) => true,
            _ => scalar_logical(&self.eval(rhs)?, symbol)?,
        };
        Ok(RObject::logical(vec![result]))
    }

    fn call(&mut self, callee: &Expr, args: &[Arg]) -> Result<RObject, BridgeError> {
        let name = match callee {
            Expr::Ident(name) | Expr::Str(name) => name.as_str(),
            _ => return Err(eval_error("attempt to apply non-function")),
        };
        if !is_builtin(name) {
            return Err(eval_error(format!("could not find function \"{}\"", name)));
        }
        // rm() takes its arguments as symbols
        if name == "rm" {
            return self.remove(args);
        }

        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push((arg.name.clone(), self.eval(&arg.value)?));
        }
        self.builtin(name, evaluated)
    }

    fn builtin(&mut self, name: &str, mut args: Args) -> Result<RObject, BridgeError> {
        match name {
            "c" => combine(args),
            "list" => {
                let names = collect_arg_names(&args);
                let values = args.into_iter().map(|(_, value)| value).collect();
                Ok(RObject::list(values, names))
            }
            "paste" => paste(args, " "),
            "paste0" => paste(args, ""),
            "cat" => {
                let sep = match take_named(&mut args, "sep") {
                    Some(sep) => scalar_string(&sep, "sep")?,
                    None => " ".to_string(),
                };
                let mut items = Vec::new();
                for (position, (_, value)) in args.iter().enumerate() {
                    cat_items(value, position + 1, &mut items)?;
                }
                self.emit(&items.join(&sep), OutputStream::Stdout);
                Ok(RObject::null())
            }
            "print" => {
                let value = single_arg(name, args)?;
                self.emit(&print_object(&value), OutputStream::Stdout);
                Ok(value)
            }
            "message" => {
                let append_newline = match take_named(&mut args, "appendLF") {
                    Some(flag) => scalar_logical(&flag, "appendLF")?,
                    None => true,
                };
                let mut text = concat_text(&args)?;
                if append_newline {
                    text.push('\n');
                }
                self.emit(&text, OutputStream::Message);
                Ok(RObject::null())
            }
            "warning" => {
                let text = concat_text(&args)?;
                self.emit(&format!("Warning: {}\n", text), OutputStream::Message);
                Ok(RObject::character(vec![text]))
            }
            "stop" => Err(eval_error(concat_text(&args)?)),
            "length" => {
                let value = single_arg(name, args)?;
                Ok(RObject::double(vec![value.len() as f64]))
            }
            "sum" => {
                let _ = take_named(&mut args, "na.rm");
                let mut total = 0.0;
                for (_, value) in &args {
                    let values = as_doubles(value).ok_or_else(|| {
                        eval_error(format!("invalid 'type' ({}) of argument", value.type_of()))
                    })?;
                    total += values.iter().sum::<f64>();
                }
                Ok(RObject::double(vec![total]))
            }
            "mean" => {
                let value = single_arg(name, args)?;
                let values = as_doubles(&value)
                    .filter(|_| !value.is_null())
                    .ok_or_else(|| eval_error("argument is not numeric or logical"))?;
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                Ok(RObject::double(vec![mean]))
            }
            "names" => {
                let value = single_arg(name, args)?;
                Ok(value
                    .attrs
                    .names
                    .map_or_else(RObject::null, RObject::character))
            }
            "is.null" => {
                let value = single_arg(name, args)?;
                Ok(RObject::logical(vec![value.is_null()]))
            }
            "exists" => {
                let value = single_arg(name, args)?;
                let symbol = scalar_string(&value, "x")?;
                let found = self.globals.contains_key(&symbol)
                    || base_constant(&symbol).is_some()
                    || is_builtin(&symbol);
                Ok(RObject::logical(vec![found]))
            }
            "ls" => {
                let mut names: Vec<String> = self
                    .globals
                    .keys()
                    .filter(|name| !name.starts_with('.'))
                    .cloned()
                    .collect();
                names.sort();
                Ok(RObject::character(names))
            }
            "matrix" => matrix(args),
            "nchar" => {
                let value = single_arg(name, args)?;
                let counts = character_of(&value)?
                    .iter()
                    .map(|s| s.chars().count() as f64)
                    .collect();
                Ok(RObject::double(counts).with_names(value.attrs.names))
            }
            "toupper" | "tolower" => {
                let value = single_arg(name, args)?;
                let converted = character_of(&value)?
                    .iter()
                    .map(|s| {
                        if name == "toupper" {
                            s.to_uppercase()
                        } else {
                            s.to_lowercase()
                        }
                    })
                    .collect();
                Ok(RObject::character(converted).with_names(value.attrs.names))
            }
            "invisible" | "identity" => Ok(args
                .into_iter()
                .next()
                .map_or_else(RObject::null, |(_, value)| value)),
            "seq_len" => {
                let value = single_arg(name, args)?;
                let n = first_number(&value)
                    .filter(|n| n.is_finite() && *n >= 0.0)
                    .ok_or_else(|| {
                        eval_error("argument of length 0 or not coercible to non-negative integer")
                    })?;
                let n = n.floor() as usize;
                if n > MAX_RANGE_LEN {
                    return Err(eval_error("result would be too long a vector"));
                }
                Ok(RObject::double((1..=n).map(|i| i as f64).collect()))
            }
            "as.character" => {
                let value = single_arg(name, args)?;
                Ok(RObject::character(character_of(&value)?))
            }
            "as.numeric" => {
                let value = single_arg(name, args)?;
                as_numeric(&value)
            }
            "typeof" => {
                let value = single_arg(name, args)?;
                let type_name = match &value.data {
                    RData::Opaque(class) if class == "function" => "builtin".to_string(),
                    RData::Opaque(class) => class.clone(),
                    _ => value.type_of().to_string(),
                };
                Ok(RObject::character(vec![type_name]))
            }
            other => Err(eval_error(format!("could not find function \"{}\"", other))),
        }
    }

    fn remove(&mut self, args: &[Arg]) -> Result<RObject, BridgeError> {
        let mut names = Vec::new();
        for arg in args {
            match (arg.name.as_deref(), &arg.value) {
                (Some("list"), expr) => {
                    let listed = self.eval(expr)?;
                    names.extend(character_of(&listed)?);
                }
                (None, Expr::Ident(name) | Expr::Str(name)) => names.push(name.clone()),
                _ => return Err(eval_error("... must contain names or character strings")),
            }
        }
        for name in names {
            if self.globals.shift_remove(&name).is_none() {
                self.emit(
                    &format!("Warning in rm() : object '{}' not found\n", name),
                    OutputStream::Message,
                );
            }
        }
        Ok(RObject::null())
    }
}

fn take_named(args: &mut Args, key: &str) -> Option<RObject> {
    let position = args.iter().position(|(name, _)| name.as_deref() == Some(key))?;
    Some(args.remove(position).1)
}

fn collect_arg_names(args: &Args) -> Option<Vec<String>> {
    args.iter()
        .any(|(name, _)| name.is_some())
        .then(|| {
            args.iter()
                .map(|(name, _)| name.clone().unwrap_or_default())
                .collect()
        })
}

/// Match arguments against a fixed formal list: exact names first, then
/// positionals fill the remaining slots in order
fn match_args(function: &str, args: Args, formals: &[&str]) -> Result<Vec<Option<RObject>>, BridgeError> {
    let mut slots: Vec<Option<RObject>> = vec![None; formals.len()];
    let mut positional = Vec::new();
    for (name, value) in args {
        match name {
            Some(name) => {
                let slot = formals
                    .iter()
                    .position(|formal| *formal == name)
                    .ok_or_else(|| eval_error(format!("unused argument ({} = ...)", name)))?;
                slots[slot] = Some(value);
            }
            None => positional.push(value),
        }
    }
    for value in positional {
        let slot = slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| eval_error(format!("unused argument in call to '{}'", function)))?;
        slots[slot] = Some(value);
    }
    Ok(slots)
}

fn single_arg(function: &str, args: Args) -> Result<RObject, BridgeError> {
    match_args(function, args, &["x"])?
        .pop()
        .flatten()
        .ok_or_else(|| eval_error("argument \"x\" is missing, with no default"))
}

fn scalar_string(value: &RObject, what: &str) -> Result<String, BridgeError> {
    match &value.data {
        RData::Character(v) if v.len() == 1 => Ok(v[0].clone()),
        _ => Err(eval_error(format!("invalid '{}' argument", what))),
    }
}

fn first_number(value: &RObject) -> Option<f64> {
    as_doubles(value)?.first().copied()
}

fn as_doubles(value: &RObject) -> Option<Vec<f64>> {
    match &value.data {
        RData::Null => Some(Vec::new()),
        RData::Logical(v) => Some(v.iter().map(|b| f64::from(u8::from(*b))).collect()),
        RData::Double(v) => Some(v.clone()),
        _ => None,
    }
}

fn as_bools(value: &RObject) -> Option<Vec<bool>> {
    match &value.data {
        RData::Null => Some(Vec::new()),
        RData::Logical(v) => Some(v.clone()),
        RData::Double(v) => Some(v.iter().map(|x| *x != 0.0).collect()),
        _ => None,
    }
}

fn character_of(value: &RObject) -> Result<Vec<String>, BridgeError> {
    as_character(value).ok_or_else(|| {
        eval_error(format!(
            "cannot coerce type '{}' to vector of type 'character'",
            value.class_name()
        ))
    })
}

fn concat_text(args: &Args) -> Result<String, BridgeError> {
    let mut text = String::new();
    for (_, value) in args {
        text.push_str(&character_of(value)?.concat());
    }
    Ok(text)
}

fn scalar_logical(value: &RObject, op: &str) -> Result<bool, BridgeError> {
    match value.len() {
        0 => Err(eval_error(format!("invalid 'x' type in 'x {} y'", op))),
        1 => as_bools(value)
            .and_then(|b| b.first().copied())
            .ok_or_else(|| eval_error(format!("invalid 'x' type in 'x {} y'", op))),
        n => Err(eval_error(format!(
            "'length = {}' in coercion to 'logical(1)'",
            n
        ))),
    }
}

fn truthy(condition: &RObject) -> Result<bool, BridgeError> {
    if condition.is_empty() {
        return Err(eval_error("argument is of length zero"));
    }
    if condition.len() > 1 {
        return Err(eval_error("the condition has length > 1"));
    }
    match &condition.data {
        RData::Logical(v) => Ok(v[0]),
        RData::Double(v) if v[0].is_nan() => {
            Err(eval_error("missing value where TRUE/FALSE needed"))
        }
        RData::Double(v) => Ok(v[0] != 0.0),
        RData::Character(v) => match v[0].as_str() {
            "TRUE" | "true" | "True" | "T" => Ok(true),
            "FALSE" | "false" | "False" | "F" => Ok(false),
            _ => Err(eval_error("argument is not interpretable as logical")),
        },
        _ => Err(eval_error("argument is not interpretable as logical")),
    }
}

fn unary(op: UnaryOp, value: &RObject) -> Result<RObject, BridgeError> {
    let data = match op {
        UnaryOp::Not => RData::Logical(
            as_bools(value)
                .ok_or_else(|| eval_error("invalid argument type"))?
                .into_iter()
                .map(|b| !b)
                .collect(),
        ),
        UnaryOp::Neg | UnaryOp::Plus => {
            let values =
                as_doubles(value).ok_or_else(|| eval_error("invalid argument to unary operator"))?;
            RData::Double(if op == UnaryOp::Neg {
                values.into_iter().map(|x| -x).collect()
            } else {
                values
            })
        }
    };
    Ok(RObject {
        data,
        attrs: value.attrs.clone(),
    })
}

/// Attributes of a recycled result come from the operand that has its length
fn recycled_attrs(lhs: &RObject, rhs: &RObject, len: usize) -> Attributes {
    if len == 0 {
        Attributes::default()
    } else if lhs.len() == len && !lhs.attrs.is_empty() {
        lhs.attrs.clone()
    } else if rhs.len() == len {
        rhs.attrs.clone()
    } else {
        Attributes::default()
    }
}

fn recycled_len(a: usize, b: usize) -> usize {
    if a == 0 || b == 0 {
        0
    } else {
        a.max(b)
    }
}

fn binary(op: BinaryOp, lhs: &RObject, rhs: &RObject) -> Result<RObject, BridgeError> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => compare(op, lhs, rhs),
        BinaryOp::And | BinaryOp::Or => {
            let (Some(a), Some(b)) = (as_bools(lhs), as_bools(rhs)) else {
                return Err(eval_error(
                    "operations are possible only for numeric, logical or complex types",
                ));
            };
            let len = recycled_len(a.len(), b.len());
            let values = (0..len)
                .map(|i| {
                    let (x, y) = (a[i % a.len()], b[i % b.len()]);
                    if op == BinaryOp::And {
                        x && y
                    } else {
                        x || y
                    }
                })
                .collect();
            Ok(RObject {
                data: RData::Logical(values),
                attrs: recycled_attrs(lhs, rhs, len),
            })
        }
        BinaryOp::Range => range(lhs, rhs),
        BinaryOp::AndAnd | BinaryOp::OrOr => {
            let symbol = if op == BinaryOp::AndAnd { "&&" } else { "||" };
            let (a, b) = (scalar_logical(lhs, symbol)?, scalar_logical(rhs, symbol)?);
            Ok(RObject::logical(vec![if op == BinaryOp::AndAnd {
                a && b
            } else {
                a || b
            }]))
        }
    }
}

fn arithmetic(op: BinaryOp, lhs: &RObject, rhs: &RObject) -> Result<RObject, BridgeError> {
    let (Some(a), Some(b)) = (as_doubles(lhs), as_doubles(rhs)) else {
        return Err(eval_error("non-numeric argument to binary operator"));
    };
    let len = recycled_len(a.len(), b.len());
    let values = (0..len)
        .map(|i| {
            let (x, y) = (a[i % a.len()], b[i % b.len()]);
            match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                _ => x.powf(y),
            }
        })
        .collect();
    Ok(RObject {
        data: RData::Double(values),
        attrs: recycled_attrs(lhs, rhs, len),
    })
}

fn compare(op: BinaryOp, lhs: &RObject, rhs: &RObject) -> Result<RObject, BridgeError> {
    use std::cmp::Ordering;

    let atomic = |v: &RObject| {
        matches!(
            v.data,
            RData::Null | RData::Logical(_) | RData::Double(_) | RData::Character(_)
        )
    };
    if !atomic(lhs) || !atomic(rhs) {
        return Err(eval_error(
            "comparison is possible only for atomic and list types",
        ));
    }

    let textual = matches!(lhs.data, RData::Character(_)) || matches!(rhs.data, RData::Character(_));
    let orderings: Vec<Ordering> = if textual {
        let (a, b) = (character_of(lhs)?, character_of(rhs)?);
        let len = recycled_len(a.len(), b.len());
        (0..len).map(|i| a[i % a.len()].cmp(&b[i % b.len()])).collect()
    } else {
        let (a, b) = (
            as_doubles(lhs).unwrap_or_default(),
            as_doubles(rhs).unwrap_or_default(),
        );
        let len = recycled_len(a.len(), b.len());
        (0..len)
            .map(|i| a[i % a.len()].partial_cmp(&b[i % b.len()]).ok_or_else(na_unsupported))
            .collect::<Result<_, _>>()?
    };

    let values = orderings
        .iter()
        .map(|ordering| match op {
            BinaryOp::Eq => ordering.is_eq(),
            BinaryOp::Ne => ordering.is_ne(),
            BinaryOp::Lt => ordering.is_lt(),
            BinaryOp::Le => ordering.is_le(),
            BinaryOp::Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        })
        .collect::<Vec<_>>();
    let len = values.len();
    Ok(RObject {
        data: RData::Logical(values),
        attrs: Attributes {
            dim: None,
            ..recycled_attrs(lhs, rhs, len)
        },
    })
}

fn range(lhs: &RObject, rhs: &RObject) -> Result<RObject, BridgeError> {
    let (Some(from), Some(to)) = (first_number(lhs), first_number(rhs)) else {
        return Err(eval_error("argument of length 0"));
    };
    if from.is_nan() || to.is_nan() {
        return Err(eval_error("NA/NaN argument"));
    }
    let span = (to - from).abs().floor();
    if !span.is_finite() || span >= MAX_RANGE_LEN as f64 {
        return Err(eval_error("result would be too long a vector"));
    }
    let step = if from <= to { 1.0 } else { -1.0 };
    let values = (0..=span as usize).map(|i| from + step * i as f64).collect();
    Ok(RObject::double(values))
}

fn dollar(object: &RObject, name: &str) -> Result<RObject, BridgeError> {
    match &object.data {
        RData::Null => Ok(RObject::null()),
        RData::List(items) => Ok(object
            .attrs
            .names
            .as_ref()
            .and_then(|names| names.iter().position(|n| n == name))
            .and_then(|i| items.get(i).cloned())
            .unwrap_or_else(RObject::null)),
        RData::Opaque(class) => Err(eval_error(format!(
            "object of type '{}' is not subsettable",
            class
        ))),
        _ => Err(eval_error("$ operator is invalid for atomic vectors")),
    }
}

fn set_field(current: RObject, name: &str, value: RObject) -> Result<RObject, BridgeError> {
    let (mut items, mut names) = match current.data {
        RData::Null => (Vec::new(), Vec::new()),
        RData::List(items) => {
            let names = current
                .attrs
                .names
                .unwrap_or_else(|| vec![String::new(); items.len()]);
            (items, names)
        }
        _ => return Err(eval_error("$ operator is invalid for atomic vectors")),
    };

    match (names.iter().position(|n| n == name), value.is_null()) {
        (Some(i), true) => {
            items.remove(i);
            names.remove(i);
        }
        (Some(i), false) => items[i] = value,
        (None, true) => {}
        (None, false) => {
            items.push(value);
            names.push(name.to_string());
        }
    }
    Ok(RObject::list(items, Some(names)))
}

/// Pick elements by zero-based position
fn select(data: &RData, positions: &[usize]) -> RData {
    fn pick<T: Clone>(values: &[T], positions: &[usize]) -> Vec<T> {
        positions.iter().map(|p| values[*p].clone()).collect()
    }
    match data {
        RData::Logical(v) => RData::Logical(pick(v, positions)),
        RData::Double(v) => RData::Double(pick(v, positions)),
        RData::Character(v) => RData::Character(pick(v, positions)),
        RData::List(v) => RData::List(pick(v, positions)),
        other => other.clone(),
    }
}

/// Zero-based positions an index vector selects; `None` marks a position
/// past the end
fn positions(object: &RObject, index: &RObject) -> Result<Vec<Option<usize>>, BridgeError> {
    let len = object.len();
    match &index.data {
        RData::Null => Ok(Vec::new()),
        RData::Double(raw) => {
            let ks: Vec<f64> = raw.iter().map(|k| k.trunc()).collect();
            if ks.iter().any(|k| k.is_nan()) {
                return Err(na_unsupported());
            }
            let negative = ks.iter().any(|k| *k < 0.0);
            if negative {
                if ks.iter().any(|k| *k > 0.0) {
                    return Err(eval_error(
                        "can't mix positive and negative subscripts",
                    ));
                }
                let excluded: Vec<usize> = ks.iter().map(|k| (-k) as usize).collect();
                return Ok((0..len)
                    .filter(|i| !excluded.contains(&(i + 1)))
                    .map(Some)
                    .collect());
            }
            Ok(ks
                .iter()
                .filter(|k| **k >= 1.0)
                .map(|k| {
                    let p = *k as usize - 1;
                    (p < len).then_some(p)
                })
                .collect())
        }
        RData::Logical(mask) => {
            if mask.is_empty() {
                return Ok(Vec::new());
            }
            let n = len.max(mask.len());
            Ok((0..n)
                .filter(|i| mask[i % mask.len()])
                .map(|i| (i < len).then_some(i))
                .collect())
        }
        RData::Character(keys) => {
            let names = object.attrs.names.as_deref().unwrap_or_default();
            Ok(keys
                .iter()
                .map(|key| names.iter().position(|n| n == key))
                .collect())
        }
        _ => Err(eval_error(format!(
            "invalid subscript type '{}'",
            index.type_of()
        ))),
    }
}

/// `x[i]`
fn subset(object: &RObject, index: &RObject) -> Result<RObject, BridgeError> {
    if let RData::Opaque(class) = &object.data {
        return Err(eval_error(format!(
            "object of type '{}' is not subsettable",
            class
        )));
    }
    if object.is_null() {
        return Ok(RObject::null());
    }

    let selected = positions(object, index)?;
    let is_list = matches!(object.data, RData::List(_));
    let names = object.attrs.names.as_ref();

    let mut kept = Vec::with_capacity(selected.len());
    let mut kept_names = Vec::with_capacity(selected.len());
    let mut padded = Vec::new();
    for (slot, position) in selected.iter().enumerate() {
        match position {
            Some(p) => {
                kept.push(*p);
                kept_names.push(names.and_then(|n| n.get(*p)).cloned().unwrap_or_default());
            }
            // Out-of-range list elements come back as NULL
            None if is_list => {
                padded.push(slot);
                kept_names.push(String::new());
            }
            None => return Err(na_unsupported()),
        }
    }

    let mut data = select(&object.data, &kept);
    if let RData::List(items) = &mut data {
        for slot in padded {
            items.insert(slot, RObject::null());
        }
    }
    Ok(RObject::new(data).with_names(names.map(|_| kept_names)))
}

/// `x[[i]]`
fn extract_one(object: &RObject, index: &RObject) -> Result<RObject, BridgeError> {
    if let RData::Opaque(class) = &object.data {
        return Err(eval_error(format!(
            "object of type '{}' is not subsettable",
            class
        )));
    }
    if object.is_null() {
        return Ok(RObject::null());
    }
    if index.len() != 1 {
        return Err(eval_error(if index.is_empty() {
            "subscript of length 0"
        } else {
            "attempt to select more than one element"
        }));
    }

    let is_list = matches!(object.data, RData::List(_));
    let position = match &index.data {
        RData::Character(keys) => {
            let found = object
                .attrs
                .names
                .as_ref()
                .and_then(|names| names.iter().position(|n| *n == keys[0]));
            match found {
                Some(p) => p,
                None if is_list => return Ok(RObject::null()),
                None => return Err(eval_error("subscript out of bounds")),
            }
        }
        _ => {
            let k = first_number(index)
                .ok_or_else(|| eval_error(format!("invalid subscript type '{}'", index.type_of())))?
                .trunc();
            if k < 1.0 || k as usize > object.len() {
                return Err(eval_error("subscript out of bounds"));
            }
            k as usize - 1
        }
    };

    match &object.data {
        RData::List(items) => Ok(items[position].clone()),
        data => Ok(RObject::new(select(data, &[position]))),
    }
}

/// Coercion rank for `c()`: logical < double < character < list
fn type_rank(value: &RObject) -> u8 {
    match value.data {
        RData::Null | RData::Logical(_) => 0,
        RData::Double(_) => 1,
        RData::Character(_) => 2,
        RData::List(_) | RData::Opaque(_) => 3,
    }
}

/// Split a value into list elements
fn elements(value: &RObject) -> Vec<RObject> {
    match &value.data {
        RData::Null => Vec::new(),
        RData::List(items) => items.clone(),
        RData::Opaque(_) => vec![value.clone()],
        data => (0..value.len())
            .map(|i| RObject::new(select(data, &[i])))
            .collect(),
    }
}

fn combine(args: Args) -> Result<RObject, BridgeError> {
    let args: Args = args.into_iter().filter(|(_, v)| !v.is_null()).collect();
    if args.is_empty() {
        return Ok(RObject::null());
    }

    let mut names = Vec::new();
    for (arg_name, value) in &args {
        let len = value.len();
        for i in 0..len {
            let inner = value
                .attrs
                .names
                .as_ref()
                .and_then(|names| names.get(i))
                .filter(|name| !name.is_empty());
            names.push(match (arg_name, inner) {
                (Some(outer), Some(inner)) => format!("{}.{}", outer, inner),
                (Some(outer), None) if len == 1 => outer.clone(),
                (Some(outer), None) => format!("{}{}", outer, i + 1),
                (None, Some(inner)) => inner.clone(),
                (None, None) => String::new(),
            });
        }
    }
    let names = names.iter().any(|n| !n.is_empty()).then_some(names);

    let rank = args.iter().map(|(_, v)| type_rank(v)).max().unwrap_or(0);
    let data = match rank {
        0 => RData::Logical(
            args.iter()
                .flat_map(|(_, v)| as_bools(v).unwrap_or_default())
                .collect(),
        ),
        1 => RData::Double(
            args.iter()
                .flat_map(|(_, v)| as_doubles(v).unwrap_or_default())
                .collect(),
        ),
        2 => {
            let mut values = Vec::new();
            for (_, value) in &args {
                values.extend(character_of(value)?);
            }
            RData::Character(values)
        }
        _ => RData::List(args.iter().flat_map(|(_, v)| elements(v)).collect()),
    };
    Ok(RObject::new(data).with_names(names))
}

fn paste(mut args: Args, default_sep: &str) -> Result<RObject, BridgeError> {
    let sep = match take_named(&mut args, "sep") {
        Some(sep) => scalar_string(&sep, "sep")?,
        None => default_sep.to_string(),
    };
    let collapse = take_named(&mut args, "collapse")
        .filter(|c| !c.is_null())
        .map(|c| scalar_string(&c, "collapse"))
        .transpose()?;

    let mut columns = Vec::with_capacity(args.len());
    for (_, value) in &args {
        let column = character_of(value)?;
        if !column.is_empty() {
            columns.push(column);
        }
    }
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    let pasted: Vec<String> = (0..rows)
        .map(|i| {
            columns
                .iter()
                .map(|column| column[i % column.len()].as_str())
                .collect::<Vec<_>>()
                .join(&sep)
        })
        .collect();

    Ok(match collapse {
        Some(collapse) => RObject::character(vec![pasted.join(&collapse)]),
        None => RObject::character(pasted),
    })
}

fn cat_items(value: &RObject, position: usize, items: &mut Vec<String>) -> Result<(), BridgeError> {
    match &value.data {
        RData::Null => {}
        RData::Logical(v) => items.extend(v.iter().map(|b| format_logical(*b).to_string())),
        RData::Double(v) => items.extend(v.iter().map(|x| format_double(*x, PRINT_DIGITS))),
        RData::Character(v) => items.extend(v.iter().cloned()),
        RData::List(elements) => {
            for element in elements {
                match element.data {
                    RData::Logical(_) | RData::Double(_) | RData::Character(_)
                        if element.len() == 1 =>
                    {
                        cat_items(element, position, items)?;
                    }
                    _ => {
                        return Err(eval_error(format!(
                            "argument {} (type 'list') cannot be handled by 'cat'",
                            position
                        )))
                    }
                }
            }
        }
        RData::Opaque(class) => {
            return Err(eval_error(format!(
                "argument {} (type '{}') cannot be handled by 'cat'",
                position, class
            )))
        }
    }
    Ok(())
}

fn matrix(args: Args) -> Result<RObject, BridgeError> {
    let mut slots = match_args("matrix", args, &["data", "nrow", "ncol", "byrow"])?.into_iter();
    let data = slots.next().flatten().ok_or_else(na_unsupported)?;
    let dimension = |slot: Option<RObject>, what: &str| -> Result<Option<usize>, BridgeError> {
        slot.map(|value| {
            first_number(&value)
                .filter(|n| n.is_finite() && *n >= 0.0)
                .map(|n| n as usize)
                .ok_or_else(|| eval_error(format!("invalid '{}' value", what)))
        })
        .transpose()
    };
    let nrow = dimension(slots.next().flatten(), "nrow")?;
    let ncol = dimension(slots.next().flatten(), "ncol")?;
    let byrow = match slots.next().flatten() {
        Some(flag) => scalar_logical(&flag, "byrow")?,
        None => false,
    };

    if !matches!(
        data.data,
        RData::Logical(_) | RData::Double(_) | RData::Character(_) | RData::List(_)
    ) {
        return Err(eval_error(format!(
            "'data' must be of a vector type, was '{}'",
            data.type_of()
        )));
    }
    let len = data.len();
    if len == 0 {
        return Err(na_unsupported());
    }
    let per = |given: usize| if given == 0 { 0 } else { len.div_ceil(given) };
    let (nrow, ncol) = match (nrow, ncol) {
        (None, None) => (len, 1),
        (Some(r), None) => (r, per(r)),
        (None, Some(c)) => (per(c), c),
        (Some(r), Some(c)) => (r, c),
    };

    let total = nrow
        .checked_mul(ncol)
        .filter(|n| *n <= MAX_RANGE_LEN)
        .ok_or_else(|| eval_error("too many elements specified"))?;
    let order: Vec<usize> = (0..total)
        .map(|k| {
            let (i, j) = (k % nrow, k / nrow);
            let source = if byrow { i * ncol + j } else { k };
            source % len
        })
        .collect();
    Ok(RObject::new(select(&data.data, &order)).with_dim(Some(vec![nrow, ncol])))
}

fn as_numeric(value: &RObject) -> Result<RObject, BridgeError> {
    let values = match &value.data {
        RData::Character(strings) => strings
            .iter()
            .map(|s| {
                let s = s.trim();
                s.strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .map_or_else(
                        || s.parse::<f64>().ok(),
                        |hex| u64::from_str_radix(hex, 16).ok().map(|n| n as f64),
                    )
                    .ok_or_else(|| eval_error("NAs introduced by coercion"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => as_doubles(value).ok_or_else(|| {
            eval_error(format!(
                "'{}' object cannot be coerced to type 'double'",
                value.type_of()
            ))
        })?,
    };
    Ok(RObject::double(values))
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse_program;
    use super::*;
    use crate::sink::CaptureSink;

    fn run(globals: &mut Globals, sink: &CaptureSink, code: &str) -> Result<RObject, BridgeError> {
        let program = parse_program(code)?;
        let mut out = sink.clone();
        Interpreter::new(globals, &mut out).run(&program)
    }

    fn eval(code: &str) -> RObject {
        run(&mut Globals::new(), &CaptureSink::new(), code).unwrap()
    }

    fn eval_err(code: &str) -> String {
        match run(&mut Globals::new(), &CaptureSink::new(), code) {
            Err(BridgeError::Eval(message)) => message,
            other => panic!("expected eval error, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_recycles() {
        assert_eq!(eval("c(1, 2, 3, 4) * c(10, 100)"), RObject::double(vec![10.0, 200.0, 30.0, 400.0]));
        assert_eq!(eval("2 ^ 3 + TRUE"), RObject::double(vec![9.0]));
        assert_eq!(eval("1 + NULL"), RObject::double(vec![]));
    }

    #[test]
    fn test_assignment_forms() {
        let mut globals = Globals::new();
        let sink = CaptureSink::new();
        run(&mut globals, &sink, "x <- 1; 2 -> y; z = x + y; w <<- z").unwrap();
        assert_eq!(globals.get("w"), Some(&RObject::double(vec![3.0])));
        assert_eq!(globals.keys().collect::<Vec<_>>(), vec!["x", "y", "z", "w"]);
    }

    #[test]
    fn test_assignment_returns_value() {
        assert_eq!(eval("x <- 1"), RObject::double(vec![1.0]));
    }

    #[test]
    fn test_undefined_symbol_message() {
        assert_eq!(eval_err("doesNotExist"), "object 'doesNotExist' not found");
        assert_eq!(eval_err("nope(1)"), "could not find function \"nope\"");
    }

    #[test]
    fn test_record_paste_and_cat() {
        let mut globals = Globals::new();
        let sink = CaptureSink::new();
        globals.insert(
            "Y".into(),
            RObject::list(
                vec![
                    RObject::character(vec!["John".into()]),
                    RObject::character(vec!["Doe".into()]),
                ],
                Some(vec!["firstName".into(), "lastName".into()]),
            ),
        );
        run(
            &mut globals,
            &sink,
            "Name = paste(Y$firstName, Y$lastName, sep=\" \"); cat(Name)",
        )
        .unwrap();
        assert_eq!(sink.stdout(), "John Doe");
    }

    #[test]
    fn test_print_writes_to_stdout() {
        let sink = CaptureSink::new();
        let value = run(&mut Globals::new(), &sink, "print(c(1.5, 2))").unwrap();
        assert_eq!(sink.stdout(), "[1] 1.5 2.0\n");
        assert_eq!(value, RObject::double(vec![1.5, 2.0]));
    }

    #[test]
    fn test_message_and_warning_use_message_stream() {
        let sink = CaptureSink::new();
        run(&mut Globals::new(), &sink, "message('a', 1); warning('careful')").unwrap();
        assert_eq!(sink.messages(), "a1\nWarning: careful\n");
        assert!(sink.stdout().is_empty());
    }

    #[test]
    fn test_stop_carries_message() {
        assert_eq!(eval_err("stop('boom: ', 42)"), "boom: 42");
    }

    #[test]
    fn test_c_coerces_and_names() {
        assert_eq!(
            eval("c(1, 'a', TRUE)"),
            RObject::character(vec!["1".into(), "a".into(), "TRUE".into()])
        );
        assert_eq!(
            eval("c(a = 1, b = 2)"),
            RObject::double(vec![1.0, 2.0]).with_names(Some(vec!["a".into(), "b".into()]))
        );
        assert_eq!(eval("c()"), RObject::null());
    }

    #[test]
    fn test_dollar_assignment_builds_list() {
        let mut globals = Globals::new();
        let sink = CaptureSink::new();
        run(&mut globals, &sink, "p <- NULL; p$name <- 'Ann'; p$age <- 30; p$name <- NULL").unwrap();
        assert_eq!(
            globals.get("p"),
            Some(&RObject::list(
                vec![RObject::double(vec![30.0])],
                Some(vec!["age".into()])
            ))
        );
    }

    #[test]
    fn test_indexing() {
        assert_eq!(eval("x <- c(10, 20, 30); x[2]"), RObject::double(vec![20.0]));
        assert_eq!(eval("x <- c(10, 20, 30); x[-1]"), RObject::double(vec![20.0, 30.0]));
        assert_eq!(eval("x <- c(10, 20, 30); x[x > 15]"), RObject::double(vec![20.0, 30.0]));
        assert_eq!(eval("l <- list(a = 1, b = 'x'); l[['b']]"), RObject::character(vec!["x".into()]));
        assert_eq!(eval_err("x <- c(1, 2); x[[5]]"), "subscript out of bounds");
    }

    #[test]
    fn test_if_else_and_short_circuit() {
        assert_eq!(eval("if (1 > 2) 'a' else 'b'"), RObject::character(vec!["b".into()]));
        assert_eq!(eval("FALSE && stop('unreached')"), RObject::logical(vec![false]));
        assert_eq!(eval_err("if (c(TRUE, FALSE)) 1"), "the condition has length > 1");
    }

    #[test]
    fn test_matrix_fills_by_column_or_row() {
        let m = eval("matrix(1:4, nrow = 2)");
        assert_eq!(m.attrs.dim, Some(vec![2, 2]));
        assert_eq!(m.data, RData::Double(vec![1.0, 2.0, 3.0, 4.0]));
        let m = eval("matrix(1:4, 2, byrow = TRUE)");
        assert_eq!(m.data, RData::Double(vec![1.0, 3.0, 2.0, 4.0]));
    }

    #[test]
    fn test_oversized_matrix_is_an_error() {
        assert_eq!(eval_err("matrix(1, 1e10, 1e10)"), "too many elements specified");
        assert_eq!(eval_err("matrix(1, 1e5, 1e5)"), "too many elements specified");
        assert_eq!(eval("matrix(1, 0, 3)").attrs.dim, Some(vec![0, 3]));
    }

    #[test]
    fn test_deep_evaluation_is_an_error() {
        let mut expr = Expr::Number(1.0);
        for _ in 0..MAX_EVAL_DEPTH + 10 {
            expr = Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(expr),
            };
        }
        let mut globals = Globals::new();
        let mut out = CaptureSink::new();
        let err = Interpreter::new(&mut globals, &mut out)
            .run(std::slice::from_ref(&expr))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Eval(ref m) if m.starts_with("evaluation nested too deeply")));

        // the depth counter unwinds with the error
        let mut interpreter = Interpreter::new(&mut globals, &mut out);
        assert!(interpreter.run(std::slice::from_ref(&expr)).is_err());
        assert_eq!(interpreter.depth, 0);
        assert_eq!(interpreter.run(&[Expr::Number(2.0)]).unwrap(), RObject::double(vec![2.0]));
    }

    #[test]
    fn test_rm_exists_and_ls() {
        let mut globals = Globals::new();
        let sink = CaptureSink::new();
        let listed = run(&mut globals, &sink, "b <- 1; a <- 2; ls()").unwrap();
        assert_eq!(listed, RObject::character(vec!["a".into(), "b".into()]));
        let still = run(&mut globals, &sink, "rm(a); exists('a')").unwrap();
        assert_eq!(still, RObject::logical(vec![false]));
        run(&mut globals, &sink, "rm(missing)").unwrap();
        assert!(sink.messages().contains("object 'missing' not found"));
    }

    #[test]
    fn test_string_builtins() {
        assert_eq!(eval("nchar('héllo')"), RObject::double(vec![5.0]));
        assert_eq!(eval("toupper('abc')"), RObject::character(vec!["ABC".into()]));
        assert_eq!(
            eval("paste0('x', 1:3, collapse = '+')"),
            RObject::character(vec!["x1+x2+x3".into()])
        );
    }

    #[test]
    fn test_builtin_names_are_opaque_functions() {
        assert_eq!(eval("paste"), RObject::opaque("function"));
        assert_eq!(eval("typeof(sum)"), RObject::character(vec!["builtin".into()]));
    }

    #[test]
    fn test_na_is_rejected() {
        assert!(eval_err("NA").contains("NA values"));
    }
}
