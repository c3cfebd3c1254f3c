//! Sandboxed boolean-expression evaluator for user-authored strategy rules.
//!
//! This is a tiny purpose-built interpreter, not a general-purpose one: the
//! environment is exactly `{rsi, price, ema20, volatility, trend,
//! volumeSpike, True, False}` and the operator set is the six comparisons
//! plus `and`/`or`/`not`. Any identifier outside the whitelist is a parse-time
//! rejection. A rule whose predicate cannot be parsed, or whose evaluation
//! hits a type mismatch, is never a crash: it is reported `faulted` and
//! treated as `false` for that cycle.

use crate::domain::indicators::{IndicatorState, Trend};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub predicate: String,
    pub action: RuleAction,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Buy,
    Sell,
}

impl From<RuleAction> for OrderAction {
    fn from(a: RuleAction) -> Self {
        match a {
            RuleAction::Buy => OrderAction::Buy,
            RuleAction::Sell => OrderAction::Sell,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Value {
    Num(f64),
    Bool(bool),
    Trend(Trend),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone)]
enum Ast {
    Lit(LitKind),
    Ident(Ident),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Cmp(Box<Ast>, CmpOp, Box<Ast>),
}

#[derive(Debug, Clone, Copy)]
enum LitKind {
    True,
    False,
    Num(f64),
    TrendLit(Trend),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ident {
    Rsi,
    Price,
    Ema20,
    Volatility,
    Trend,
    VolumeSpike,
}

const WHITELIST: &[&str] = &[
    "rsi",
    "price",
    "ema20",
    "volatility",
    "trend",
    "volumeSpike",
    "True",
    "False",
    "Bullish",
    "Bearish",
    "Neutral",
];

#[derive(Debug, Clone)]
pub struct RuleError(pub String);

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parsed, reusable form of a `Rule`'s predicate. Parse once at load time.
pub struct CompiledPredicate {
    ast: Ast,
}

struct Parser<'a> {
    tokens: Vec<&'a str>,
    pos: usize,
}

fn tokenize(src: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    let bytes = src.as_bytes();
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if "()".contains(c) {
            tokens.push(&src[i..i + 1]);
            chars.next();
            continue;
        }
        if "<>=!".contains(c) {
            let mut end = i + 1;
            if end < bytes.len() && bytes[end] as char == '=' {
                end += 1;
            }
            tokens.push(&src[i..end]);
            chars.nth(end - i - 1);
            continue;
        }
        // identifier / number
        let start = i;
        let mut end = i;
        while let Some(&(j, c2)) = chars.peek() {
            if c2.is_alphanumeric() || c2 == '_' || c2 == '.' {
                end = j + c2.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if end == start {
            // unknown char, skip to avoid infinite loop
            chars.next();
            continue;
        }
        tokens.push(&src[start..end]);
    }
    tokens
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<&'a str> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &str) -> Result<(), RuleError> {
        match self.advance() {
            Some(t) if t == tok => Ok(()),
            other => Err(RuleError(format!("expected '{}', found {:?}", tok, other))),
        }
    }

    fn parse_expr(&mut self) -> Result<Ast, RuleError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Ast, RuleError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Ast::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, RuleError> {
        let mut left = self.parse_not()?;
        while self.peek() == Some("and") {
            self.advance();
            let right = self.parse_not()?;
            left = Ast::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Ast, RuleError> {
        if self.peek() == Some("not") {
            self.advance();
            return Ok(Ast::Not(Box::new(self.parse_not()?)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Ast, RuleError> {
        let left = self.parse_atom()?;
        let op = match self.peek() {
            Some("<") => Some(CmpOp::Lt),
            Some("<=") => Some(CmpOp::Le),
            Some(">") => Some(CmpOp::Gt),
            Some(">=") => Some(CmpOp::Ge),
            Some("==") => Some(CmpOp::Eq),
            Some("!=") => Some(CmpOp::Ne),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_atom()?;
            Ok(Ast::Cmp(Box::new(left), op, Box::new(right)))
        } else {
            Ok(left)
        }
    }

    fn parse_atom(&mut self) -> Result<Ast, RuleError> {
        let tok = self
            .advance()
            .ok_or_else(|| RuleError("unexpected end of predicate".into()))?;
        if tok == "(" {
            let inner = self.parse_expr()?;
            self.expect(")")?;
            return Ok(inner);
        }
        if !WHITELIST.contains(&tok) {
            if let Ok(n) = tok.parse::<f64>() {
                return Ok(Ast::Lit(LitKind::Num(n)));
            }
            return Err(RuleError(format!("identifier '{}' not in whitelist", tok)));
        }
        let node = match tok {
            "True" => Ast::Lit(LitKind::True),
            "False" => Ast::Lit(LitKind::False),
            "Bullish" => Ast::Lit(LitKind::TrendLit(Trend::Bullish)),
            "Bearish" => Ast::Lit(LitKind::TrendLit(Trend::Bearish)),
            "Neutral" => Ast::Lit(LitKind::TrendLit(Trend::Neutral)),
            "rsi" => Ast::Ident(Ident::Rsi),
            "price" => Ast::Ident(Ident::Price),
            "ema20" => Ast::Ident(Ident::Ema20),
            "volatility" => Ast::Ident(Ident::Volatility),
            "trend" => Ast::Ident(Ident::Trend),
            "volumeSpike" => Ast::Ident(Ident::VolumeSpike),
            other => return Err(RuleError(format!("unhandled token '{}'", other))),
        };
        Ok(node)
    }
}

impl CompiledPredicate {
    pub fn parse(src: &str) -> Result<Self, RuleError> {
        let tokens = tokenize(src);
        if tokens.is_empty() {
            return Err(RuleError("empty predicate".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let ast = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(RuleError("trailing tokens after predicate".into()));
        }
        Ok(Self { ast })
    }

    pub fn evaluate(&self, state: &IndicatorState) -> Result<bool, RuleError> {
        match eval(&self.ast, state)? {
            Value::Bool(b) => Ok(b),
            other => Err(RuleError(format!("predicate did not reduce to a boolean: {:?}", other))),
        }
    }
}

fn ident_value(ident: Ident, state: &IndicatorState) -> Value {
    use rust_decimal::prelude::ToPrimitive;
    match ident {
        Ident::Rsi => Value::Num(state.rsi.to_f64().unwrap_or(0.0)),
        Ident::Price => Value::Num(state.price.to_f64().unwrap_or(0.0)),
        Ident::Ema20 => Value::Num(state.ema20.to_f64().unwrap_or(0.0)),
        Ident::Volatility => Value::Num(state.atr.to_f64().unwrap_or(0.0)),
        Ident::Trend => Value::Trend(state.trend),
        Ident::VolumeSpike => Value::Bool(state.volume_spike),
    }
}

fn eval(ast: &Ast, state: &IndicatorState) -> Result<Value, RuleError> {
    match ast {
        Ast::Lit(LitKind::True) => Ok(Value::Bool(true)),
        Ast::Lit(LitKind::False) => Ok(Value::Bool(false)),
        Ast::Lit(LitKind::Num(n)) => Ok(Value::Num(*n)),
        Ast::Lit(LitKind::TrendLit(t)) => Ok(Value::Trend(*t)),
        Ast::Ident(i) => Ok(ident_value(*i, state)),
        Ast::Not(inner) => match eval(inner, state)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(RuleError(format!("'not' requires boolean, got {:?}", other))),
        },
        Ast::And(l, r) => {
            let lv = eval(l, state)?;
            let rv = eval(r, state)?;
            match (lv, rv) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a && b)),
                other => Err(RuleError(format!("'and' requires booleans, got {:?}", other))),
            }
        }
        Ast::Or(l, r) => {
            let lv = eval(l, state)?;
            let rv = eval(r, state)?;
            match (lv, rv) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),
                other => Err(RuleError(format!("'or' requires booleans, got {:?}", other))),
            }
        }
        Ast::Cmp(l, op, r) => {
            let lv = eval(l, state)?;
            let rv = eval(r, state)?;
            compare(lv, *op, rv)
        }
    }
}

fn compare(lv: Value, op: CmpOp, rv: Value) -> Result<Value, RuleError> {
    match (lv, rv) {
        (Value::Num(a), Value::Num(b)) => Ok(Value::Bool(match op {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        })),
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => Ok(Value::Bool(a == b)),
            CmpOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(RuleError("ordering comparison on booleans".into())),
        },
        (Value::Trend(a), Value::Trend(b)) => match op {
            CmpOp::Eq => Ok(Value::Bool(a == b)),
            CmpOp::Ne => Ok(Value::Bool(a != b)),
            _ => Err(RuleError("ordering comparison on trend".into())),
        },
        (a, b) => Err(RuleError(format!("type mismatch: {:?} vs {:?}", a, b))),
    }
}

#[derive(Debug, Clone)]
pub struct TriggeredRule {
    pub id: String,
    pub name: String,
    pub action: OrderAction,
}

#[derive(Debug, Clone)]
pub struct FaultedRule {
    pub id: String,
    pub name: String,
    pub reason: String,
}

/// Evaluates every active rule against `state`, in order. Returns triggered
/// rules (first is authoritative for the cycle) and any that faulted.
pub fn evaluate_rules(rules: &[Rule], state: &IndicatorState) -> (Vec<TriggeredRule>, Vec<FaultedRule>) {
    let mut triggered = Vec::new();
    let mut faulted = Vec::new();
    for rule in rules.iter().filter(|r| r.active) {
        match CompiledPredicate::parse(&rule.predicate).and_then(|p| p.evaluate(state)) {
            Ok(true) => triggered.push(TriggeredRule {
                id: rule.id.clone(),
                name: rule.name.clone(),
                action: rule.action.into(),
            }),
            Ok(false) => {}
            Err(e) => faulted.push(FaultedRule {
                id: rule.id.clone(),
                name: rule.name.clone(),
                reason: e.0,
            }),
        }
    }
    (triggered, faulted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicators::IndicatorState;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn state_with(rsi: f64, trend: Trend) -> IndicatorState {
        IndicatorState {
            price: dec!(100),
            rsi: Decimal::try_from(rsi).unwrap(),
            ema9: dec!(101),
            ema20: dec!(101),
            ema50: dec!(99),
            atr: dec!(1),
            adx: dec!(20),
            di_plus: dec!(20),
            di_minus: dec!(15),
            bb_upper: dec!(110),
            bb_middle: dec!(100),
            bb_lower: dec!(90),
            bb_width: dec!(0.2),
            bb_percent_b: dec!(0.5),
            macd: dec!(0),
            macd_signal: dec!(0),
            macd_hist: dec!(0),
            volume_z_score: dec!(0),
            trend,
            volume_spike: false,
        }
    }

    #[test]
    fn rsi_buy_rule_triggers() {
        let predicate = CompiledPredicate::parse("rsi < 30").unwrap();
        let state = state_with(28.0, Trend::Neutral);
        assert!(predicate.evaluate(&state).unwrap());
    }

    #[test]
    fn rsi_buy_rule_does_not_trigger_above_threshold() {
        let predicate = CompiledPredicate::parse("rsi < 30").unwrap();
        let state = state_with(45.0, Trend::Neutral);
        assert!(!predicate.evaluate(&state).unwrap());
    }

    #[test]
    fn compound_predicate_with_and_or() {
        let predicate = CompiledPredicate::parse("rsi < 30 and trend == Bullish").unwrap();
        assert!(predicate.evaluate(&state_with(25.0, Trend::Bullish)).unwrap());
        assert!(!predicate.evaluate(&state_with(25.0, Trend::Bearish)).unwrap());
    }

    #[test]
    fn unknown_identifier_is_rejected_at_parse_time() {
        let result = CompiledPredicate::parse("os.system('rm') < 30");
        assert!(result.is_err());
    }

    #[test]
    fn evaluate_rules_reports_fault_without_panicking() {
        let rules = vec![Rule {
            id: "r1".into(),
            name: "bad".into(),
            predicate: "__import__('os')".into(),
            action: RuleAction::Buy,
            active: true,
        }];
        let state = state_with(50.0, Trend::Neutral);
        let (triggered, faulted) = evaluate_rules(&rules, &state);
        assert!(triggered.is_empty());
        assert_eq!(faulted.len(), 1);
    }

    #[test]
    fn first_triggered_rule_is_authoritative() {
        let rules = vec![
            Rule {
                id: "r1".into(),
                name: "first".into(),
                predicate: "rsi < 30".into(),
                action: RuleAction::Buy,
                active: true,
            },
            Rule {
                id: "r2".into(),
                name: "second".into(),
                predicate: "rsi < 40".into(),
                action: RuleAction::Sell,
                active: true,
            },
        ];
        let (triggered, _) = evaluate_rules(&rules, &state_with(25.0, Trend::Neutral));
        assert_eq!(triggered.first().unwrap().name, "first");
    }
}
