//! Arithmetic subset of bucket_script expressions
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := ("-" | "+") unary | primary
//! primary := "(" expr ")" | "Math." ident "(" args ")" | variable | number
//! variable:= "params." ident | ident
//! ```

use crate::error::Error;
use crate::Result;
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, multispace0, one_of},
    combinator::{all_consuming, map, opt, recognize},
    multi::{fold_many0, many0, separated_list0},
    number::complete::double,
    sequence::{delimited, pair, preceded},
    IResult,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    fn binary(op: char, lhs: Expr, rhs: Expr) -> Expr {
        let op = match op {
            '+' => BinaryOp::Add,
            '-' => BinaryOp::Sub,
            '*' => BinaryOp::Mul,
            '/' => BinaryOp::Div,
            _ => BinaryOp::Rem,
        };
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Neg(inner) => inner.collect_variables(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_variables(out)),
        }
    }

    pub fn eval(&self, vars: &HashMap<String, f64>) -> Result<f64> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Variable(name) => vars
                .get(name)
                .copied()
                .ok_or_else(|| Error::Script(format!("unbound variable {}", name))),
            Expr::Neg(inner) => Ok(-inner.eval(vars)?),
            Expr::Binary(op, lhs, rhs) => {
                let (l, r) = (lhs.eval(vars)?, rhs.eval(vars)?);
                Ok(match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Rem => l % r,
                })
            }
            Expr::Call(func, args) => {
                let args = args
                    .iter()
                    .map(|a| a.eval(vars))
                    .collect::<Result<Vec<_>>>()?;
                call(func, &args)
            }
        }
    }
}

fn call(func: &str, args: &[f64]) -> Result<f64> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(Error::Script(format!(
                "Math.{} expects {} argument(s), got {}",
                func,
                n,
                args.len()
            )))
        }
    };
    match func {
        "abs" => arity(1).map(|_| args[0].abs()),
        "sqrt" => arity(1).map(|_| args[0].sqrt()),
        "log" => arity(1).map(|_| args[0].ln()),
        "log10" => arity(1).map(|_| args[0].log10()),
        "exp" => arity(1).map(|_| args[0].exp()),
        "floor" => arity(1).map(|_| args[0].floor()),
        "ceil" => arity(1).map(|_| args[0].ceil()),
        "round" => arity(1).map(|_| args[0].round()),
        "pow" => arity(2).map(|_| args[0].powf(args[1])),
        "min" => arity(2).map(|_| args[0].min(args[1])),
        "max" => arity(2).map(|_| args[0].max(args[1])),
        other => Err(Error::Script(format!("unsupported function Math.{}", other))),
    }
}

/// A parsed bucket_script expression
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    source: String,
    expr: Expr,
}

impl Script {
    pub fn parse(source: &str) -> Result<Self> {
        let trimmed = source.trim().trim_end_matches(';').trim_end();
        // Painless allows a leading `return`
        let body = trimmed.strip_prefix("return ").unwrap_or(trimmed);
        match all_consuming(ws(expr))(body) {
            Ok((_, expr)) => Ok(Self {
                source: source.to_string(),
                expr,
            }),
            Err(e) => Err(Error::Script(format!("cannot parse {:?}: {}", source, e))),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variable names in order of first appearance
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.expr.collect_variables(&mut out);
        out
    }

    pub fn eval(&self, vars: &HashMap<String, f64>) -> Result<f64> {
        self.expr.eval(vars)
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn variable(input: &str) -> IResult<&str, Expr> {
    map(preceded(opt(tag("params.")), identifier), |name: &str| {
        Expr::Variable(name.to_string())
    })(input)
}

fn function_call(input: &str) -> IResult<&str, Expr> {
    let (input, name) = preceded(tag("Math."), identifier)(input)?;
    let (input, args) = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expr),
        ws(char(')')),
    )(input)?;
    Ok((input, Expr::Call(name.to_string(), args)))
}

fn parens(input: &str) -> IResult<&str, Expr> {
    delimited(ws(char('(')), expr, ws(char(')')))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((parens, function_call, variable, map(double, Expr::Number))))(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('-')), unary), |e| Expr::Neg(Box::new(e))),
        preceded(ws(char('+')), unary),
        primary,
    ))(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary(input)?;
    fold_many0(
        pair(ws(one_of("*/%")), unary),
        move || first.clone(),
        |acc, (op, rhs)| Expr::binary(op, acc, rhs),
    )(input)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = term(input)?;
    fold_many0(
        pair(ws(one_of("+-")), term),
        move || first.clone(),
        |acc, (op, rhs)| Expr::binary(op, acc, rhs),
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn eval(source: &str, pairs: &[(&str, f64)]) -> f64 {
        Script::parse(source).unwrap().eval(&vars(pairs)).unwrap()
    }

    #[test]
    fn test_product_of_params() {
        assert_eq!(eval("params.var1 * params.var2", &[("var1", 2.0), ("var2", 3.0)]), 6.0);
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", &[]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[]), 9.0);
        assert_eq!(eval("10 - 4 - 3", &[]), 3.0);
        assert_eq!(eval("12 / 3 / 2", &[]), 2.0);
        assert_eq!(eval("7 % 4", &[]), 3.0);
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(eval("-params.a + 5", &[("a", 2.0)]), 3.0);
        assert_eq!(eval("2 * -3", &[]), -6.0);
        assert_eq!(eval("--4", &[]), 4.0);
    }

    #[test]
    fn test_bare_identifiers_and_decimals() {
        assert_eq!(eval("a / 0.5", &[("a", 2.0)]), 4.0);
        assert_eq!(eval("_x + 1e2", &[("_x", 1.0)]), 101.0);
    }

    #[test]
    fn test_math_functions() {
        assert_eq!(eval("Math.max(params.a, params.b)", &[("a", 2.0), ("b", 5.0)]), 5.0);
        assert_eq!(eval("Math.abs(-3)", &[]), 3.0);
        assert_eq!(eval("Math.pow(2, 10)", &[]), 1024.0);
        assert_eq!(eval("Math.round(2.6) + Math.floor(1.9)", &[]), 4.0);
    }

    #[test]
    fn test_return_prefix_and_semicolon() {
        assert_eq!(eval("return params.a * 2;", &[("a", 4.0)]), 8.0);
    }

    #[test]
    fn test_variables_listed_once() {
        let script = Script::parse("params.var1 * params.var2 + params.var1").unwrap();
        assert_eq!(script.variables(), vec!["var1", "var2"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Script::parse("params.a *").is_err());
        assert!(Script::parse("if (params.a > 0) { return 1 }").is_err());
        assert!(Script::parse("").is_err());
    }

    #[test]
    fn test_unbound_variable_and_bad_arity() {
        let script = Script::parse("params.missing + 1").unwrap();
        assert!(script.eval(&HashMap::new()).is_err());

        let script = Script::parse("Math.sqrt(1, 2)").unwrap();
        assert!(script.eval(&HashMap::new()).is_err());

        let script = Script::parse("Math.hypot(3, 4)").unwrap();
        assert!(matches!(script.eval(&HashMap::new()), Err(Error::Script(_))));
    }

    #[test]
    fn test_division_by_zero_is_not_finite() {
        assert!(!eval("1 / 0", &[]).is_finite());
    }
}
