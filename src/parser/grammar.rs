//! Pest grammar parser for Sandpit scripts

use std::rc::Rc;
use std::sync::OnceLock;

use pest::error::LineColLocation;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

use crate::error::{Result, SandboxError};
use crate::parser::ast::*;
use crate::parser::fstring::{split_fstring, unescape, RawPart};
use crate::parser::layout::layout;

#[derive(Parser)]
#[grammar = "../grammar/sandpit.pest"]
pub struct SandpitParser;

/// Default bracket nesting cap used by [`parse_program`].
pub const DEFAULT_MAX_NESTING: usize = 100;

/// Parse a script into an AST
pub fn parse_program(source: &str) -> Result<Program> {
    parse_program_with_depth(source, DEFAULT_MAX_NESTING)
}

/// Parse a script, rejecting bracket nesting deeper than `max_nesting_depth`.
pub fn parse_program_with_depth(source: &str, max_nesting_depth: usize) -> Result<Program> {
    let text = layout(source, max_nesting_depth)?;
    let mut pairs = SandpitParser::parse(Rule::script, &text).map_err(syntax_error)?;

    let script = pairs
        .next()
        .ok_or_else(|| SandboxError::syntax("empty script", None))?;

    let mut builder = AstBuilder::default();
    let body = builder.statements(script.into_inner())?;
    Ok(Program { body })
}

fn syntax_error(err: pest::error::Error<Rule>) -> SandboxError {
    let line = match err.line_col {
        LineColLocation::Pos((line, _)) => line,
        LineColLocation::Span((line, _), _) => line,
    };
    SandboxError::syntax("invalid syntax", Some(line))
}

fn pratt() -> &'static PrattParser<Rule> {
    static PRATT: OnceLock<PrattParser<Rule>> = OnceLock::new();
    PRATT.get_or_init(|| {
        PrattParser::new()
            .op(Op::infix(Rule::bor, Assoc::Left))
            .op(Op::infix(Rule::bxor, Assoc::Left))
            .op(Op::infix(Rule::band, Assoc::Left))
            .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left)
                | Op::infix(Rule::div, Assoc::Left)
                | Op::infix(Rule::floordiv, Assoc::Left)
                | Op::infix(Rule::modulo, Assoc::Left))
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos) | Op::prefix(Rule::invert))
            .op(Op::infix(Rule::pow, Assoc::Right))
    })
}

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.line_col().0
}

fn expect<'i>(pairs: &mut Pairs<'i, Rule>, what: &str, line: usize) -> Result<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| SandboxError::syntax(format!("expected {}", what), Some(line)))
}

fn unexpected(pair: &Pair<Rule>) -> SandboxError {
    SandboxError::syntax(
        format!("unexpected {:?}", pair.as_rule()),
        Some(line_of(pair)),
    )
}

/// Walks pest pairs into AST nodes, handing out loop-site ids as it goes.
#[derive(Default)]
struct AstBuilder {
    next_site: u32,
}

impl AstBuilder {
    fn site(&mut self, line: usize) -> LoopSite {
        let id = self.next_site;
        self.next_site += 1;
        LoopSite { id, line }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statements(&mut self, pairs: Pairs<Rule>) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        for pair in pairs {
            if pair.as_rule() == Rule::EOI {
                continue;
            }
            body.push(self.statement(pair)?);
        }
        Ok(body)
    }

    fn block(&mut self, pair: Pair<Rule>) -> Result<Vec<Stmt>> {
        self.statements(pair.into_inner())
    }

    fn statement(&mut self, pair: Pair<Rule>) -> Result<Stmt> {
        let line = line_of(&pair);
        let kind = match pair.as_rule() {
            Rule::pass_stmt => StmtKind::Pass,
            Rule::break_stmt => StmtKind::Break,
            Rule::continue_stmt => StmtKind::Continue,
            Rule::return_stmt => {
                let value = match pair.into_inner().next() {
                    Some(p) => Some(self.testlist(p)?),
                    None => None,
                };
                StmtKind::Return(value)
            }
            Rule::raise_stmt => {
                let value = match pair.into_inner().next() {
                    Some(p) => Some(self.expr(p)?),
                    None => None,
                };
                StmtKind::Raise(value)
            }
            Rule::del_stmt => {
                let list = expect(&mut pair.into_inner(), "del target", line)?;
                let (targets, _) = self.target_items(list)?;
                StmtKind::Del(targets)
            }
            Rule::assert_stmt => {
                let mut inner = pair.into_inner();
                let test = self.expr(expect(&mut inner, "assert condition", line)?)?;
                let message = match inner.next() {
                    Some(p) => Some(self.expr(p)?),
                    None => None,
                };
                StmtKind::Assert { test, message }
            }
            Rule::import_stmt => {
                let mut aliases = Vec::new();
                for item in pair.into_inner() {
                    let mut inner = item.into_inner();
                    let module = dotted_name(expect(&mut inner, "module name", line)?);
                    let alias = inner.next().map(|p| p.as_str().to_string());
                    aliases.push(ImportAlias { module, alias });
                }
                StmtKind::Import(aliases)
            }
            Rule::from_import_stmt => self.from_import(pair, line)?,
            Rule::assign_stmt => {
                let mut lists: Vec<Pair<Rule>> = pair.into_inner().collect();
                let value_pair = lists
                    .pop()
                    .ok_or_else(|| SandboxError::syntax("expected value", Some(line)))?;
                let mut targets = Vec::with_capacity(lists.len());
                for list in lists {
                    targets.push(self.target_list(list)?);
                }
                let value = self.testlist(value_pair)?;
                StmtKind::Assign { targets, value }
            }
            Rule::aug_assign_stmt => {
                let mut inner = pair.into_inner();
                let target = self.target(expect(&mut inner, "target", line)?)?;
                if matches!(target, Target::Tuple(_) | Target::Starred(_)) {
                    return Err(SandboxError::syntax(
                        "illegal expression for augmented assignment",
                        Some(line),
                    ));
                }
                let op = aug_op(expect(&mut inner, "operator", line)?)?;
                let value = self.testlist(expect(&mut inner, "value", line)?)?;
                StmtKind::AugAssign { target, op, value }
            }
            Rule::ann_assign_stmt => {
                let mut inner = pair.into_inner();
                let target = self.target(expect(&mut inner, "target", line)?)?;
                let annotation = self.annotation(expect(&mut inner, "annotation", line)?)?;
                let value = match inner.next() {
                    Some(p) => Some(self.testlist(p)?),
                    None => None,
                };
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                }
            }
            Rule::expr_stmt => {
                let value = expect(&mut pair.into_inner(), "expression", line)?;
                StmtKind::Expr(self.testlist(value)?)
            }
            Rule::if_stmt => self.if_stmt(pair, line)?,
            Rule::while_stmt => {
                let site = self.site(line);
                let mut inner = pair.into_inner();
                let test = self.expr(expect(&mut inner, "condition", line)?)?;
                let body = self.block(expect(&mut inner, "block", line)?)?;
                let orelse = self.else_clause(inner.next())?;
                StmtKind::While {
                    site,
                    test,
                    body,
                    orelse,
                }
            }
            Rule::for_stmt => {
                let site = self.site(line);
                let mut inner = pair.into_inner();
                let target = self.target_list(expect(&mut inner, "loop target", line)?)?;
                let iter = self.testlist(expect(&mut inner, "iterable", line)?)?;
                let body = self.block(expect(&mut inner, "block", line)?)?;
                let orelse = self.else_clause(inner.next())?;
                StmtKind::For {
                    site,
                    target,
                    iter,
                    body,
                    orelse,
                }
            }
            Rule::def_stmt => StmtKind::FunctionDef(Rc::new(self.def_stmt(pair, line)?)),
            Rule::try_stmt => self.try_stmt(pair, line)?,
            _ => return Err(unexpected(&pair)),
        };
        Ok(Stmt { kind, line })
    }

    fn from_import(&mut self, pair: Pair<Rule>, line: usize) -> Result<StmtKind> {
        let mut inner = pair.into_inner();
        let module = dotted_name(expect(&mut inner, "module name", line)?);
        let mut names = Vec::new();
        for item in inner {
            match item.as_rule() {
                Rule::import_star => {
                    return Ok(StmtKind::ImportFrom {
                        module,
                        names: ImportNames::Star,
                    })
                }
                Rule::import_as_name => {
                    let mut parts = item.into_inner();
                    let name = expect(&mut parts, "imported name", line)?.as_str().to_string();
                    let alias = parts.next().map(|p| p.as_str().to_string());
                    names.push((name, alias));
                }
                _ => return Err(unexpected(&item)),
            }
        }
        Ok(StmtKind::ImportFrom {
            module,
            names: ImportNames::Names(names),
        })
    }

    fn if_stmt(&mut self, pair: Pair<Rule>, line: usize) -> Result<StmtKind> {
        let mut inner = pair.into_inner();
        let test = self.expr(expect(&mut inner, "condition", line)?)?;
        let body = self.block(expect(&mut inner, "block", line)?)?;
        let mut branches = vec![(test, body)];
        let mut orelse = Vec::new();

        for clause in inner {
            match clause.as_rule() {
                Rule::elif_clause => {
                    let clause_line = line_of(&clause);
                    let mut parts = clause.into_inner();
                    let test = self.expr(expect(&mut parts, "condition", clause_line)?)?;
                    let body = self.block(expect(&mut parts, "block", clause_line)?)?;
                    branches.push((test, body));
                }
                Rule::else_clause => orelse = self.else_clause(Some(clause))?,
                _ => return Err(unexpected(&clause)),
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn else_clause(&mut self, pair: Option<Pair<Rule>>) -> Result<Vec<Stmt>> {
        match pair {
            Some(clause) => {
                let line = line_of(&clause);
                self.block(expect(&mut clause.into_inner(), "block", line)?)
            }
            None => Ok(Vec::new()),
        }
    }

    fn try_stmt(&mut self, pair: Pair<Rule>, line: usize) -> Result<StmtKind> {
        let mut inner = pair.into_inner();
        let body = self.block(expect(&mut inner, "block", line)?)?;
        let mut handlers = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();

        for clause in inner {
            let clause_line = line_of(&clause);
            match clause.as_rule() {
                Rule::except_clause => {
                    let mut kind = None;
                    let mut name = None;
                    let mut body = Vec::new();
                    for part in clause.into_inner() {
                        match part.as_rule() {
                            Rule::identifier => name = Some(part.as_str().to_string()),
                            Rule::block => body = self.block(part)?,
                            _ => kind = Some(self.expr(part)?),
                        }
                    }
                    handlers.push(ExceptHandler {
                        kind,
                        name,
                        body,
                        line: clause_line,
                    });
                }
                Rule::else_clause => orelse = self.else_clause(Some(clause))?,
                Rule::finally_clause => {
                    finalbody = self.block(expect(&mut clause.into_inner(), "block", clause_line)?)?
                }
                _ => return Err(unexpected(&clause)),
            }
        }

        if let Some(pos) = handlers.iter().position(|h| h.kind.is_none()) {
            if pos + 1 != handlers.len() {
                return Err(SandboxError::syntax(
                    "default 'except:' must be last",
                    Some(handlers[pos].line),
                ));
            }
        }

        Ok(StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        })
    }

    fn def_stmt(&mut self, pair: Pair<Rule>, line: usize) -> Result<FunctionDef> {
        let mut name = String::new();
        let mut params = Vec::new();
        let mut returns = None;
        let mut body = Vec::new();

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::identifier => name = part.as_str().to_string(),
                Rule::parameters => {
                    for param in part.into_inner() {
                        params.push(self.parameter(param)?);
                    }
                }
                Rule::return_annotation => returns = Some(self.annotation(part)?),
                Rule::block => body = self.block(part)?,
                _ => return Err(unexpected(&part)),
            }
        }

        check_params(&params, line)?;
        Ok(FunctionDef {
            name,
            params,
            body,
            returns,
            line,
        })
    }

    fn parameter(&mut self, pair: Pair<Rule>) -> Result<Param> {
        let kind = match pair.as_rule() {
            Rule::kwargs_param | Rule::lambda_kwargs => ParamKind::KwArgs,
            Rule::varargs_param | Rule::lambda_varargs => ParamKind::VarArgs,
            _ => ParamKind::Regular,
        };
        let mut param = Param {
            name: String::new(),
            kind,
            default: None,
            annotation: None,
        };
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::identifier => param.name = part.as_str().to_string(),
                Rule::annotation => param.annotation = Some(self.annotation(part)?),
                _ => param.default = Some(self.expr(part)?),
            }
        }
        Ok(param)
    }

    fn annotation(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        let inner = expect(&mut pair.into_inner(), "annotation", line)?;
        self.expr(inner)
    }

    fn lambda(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        let mut params = Vec::new();
        let mut body = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::lambda_params => {
                    for param in part.into_inner() {
                        params.push(self.parameter(param)?);
                    }
                }
                _ => body = Some(self.expr(part)?),
            }
        }
        let body = body.ok_or_else(|| SandboxError::syntax("expected lambda body", Some(line)))?;
        check_params(&params, line)?;
        Ok(Expr::Lambda(Rc::new(FunctionDef {
            name: "<lambda>".to_string(),
            params,
            body: vec![Stmt {
                kind: StmtKind::Return(Some(body)),
                line,
            }],
            returns: None,
            line,
        })))
    }

    // ========================================================================
    // Targets
    // ========================================================================

    fn target_items(&mut self, pair: Pair<Rule>) -> Result<(Vec<Target>, bool)> {
        let mut items = Vec::new();
        let mut trailing = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::target => items.push(self.target(part)?),
                Rule::trailing_comma => trailing = true,
                _ => return Err(unexpected(&part)),
            }
        }
        Ok((items, trailing))
    }

    fn target_list(&mut self, pair: Pair<Rule>) -> Result<Target> {
        let (mut items, trailing) = self.target_items(pair)?;
        if items.len() == 1 && !trailing && !matches!(items[0], Target::Starred(_)) {
            Ok(items.remove(0))
        } else {
            Ok(Target::Tuple(items))
        }
    }

    fn target(&mut self, pair: Pair<Rule>) -> Result<Target> {
        let line = line_of(&pair);
        let bracketed = pair.as_str().starts_with('[');
        let inner = expect(&mut pair.into_inner(), "target", line)?;
        match inner.as_rule() {
            Rule::target_list if bracketed => {
                let (items, _) = self.target_items(inner)?;
                Ok(Target::Tuple(items))
            }
            Rule::target_list => self.target_list(inner),
            Rule::star_target => {
                let primary = expect(&mut inner.into_inner(), "starred target", line)?;
                let target = expr_to_target(self.primary(primary)?, line)?;
                Ok(Target::Starred(Box::new(target)))
            }
            Rule::primary => expr_to_target(self.primary(inner)?, line),
            _ => Err(unexpected(&inner)),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn testlist(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let mut items = Vec::new();
        let mut trailing = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::trailing_comma => trailing = true,
                _ => items.push(self.expr(part)?),
            }
        }
        if items.len() == 1 && !trailing {
            Ok(items.remove(0))
        } else {
            Ok(Expr::Tuple(items))
        }
    }

    fn expr(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        match pair.as_rule() {
            Rule::lambdef => self.lambda(pair),
            Rule::conditional => {
                let mut inner = pair.into_inner();
                let body = self.expr(expect(&mut inner, "expression", line)?)?;
                match inner.next() {
                    None => Ok(body),
                    Some(test) => {
                        let test = self.expr(test)?;
                        let orelse = self.expr(expect(&mut inner, "else branch", line)?)?;
                        Ok(Expr::IfExp {
                            test: Box::new(test),
                            body: Box::new(body),
                            orelse: Box::new(orelse),
                        })
                    }
                }
            }
            Rule::or_test | Rule::and_test => {
                let op = if pair.as_rule() == Rule::or_test {
                    BoolOp::Or
                } else {
                    BoolOp::And
                };
                let mut values = Vec::new();
                for part in pair.into_inner() {
                    values.push(self.expr(part)?);
                }
                if values.len() == 1 {
                    Ok(values.remove(0))
                } else {
                    Ok(Expr::BoolOp { op, values })
                }
            }
            Rule::not_test => {
                let mut inner = pair.into_inner();
                let first = expect(&mut inner, "expression", line)?;
                if first.as_rule() == Rule::not_op {
                    let operand = self.expr(expect(&mut inner, "operand", line)?)?;
                    Ok(Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    })
                } else {
                    self.expr(first)
                }
            }
            Rule::comparison => {
                let mut inner = pair.into_inner();
                let left = self.expr(expect(&mut inner, "operand", line)?)?;
                let mut ops = Vec::new();
                while let Some(op) = inner.next() {
                    let op = cmp_op(&op)?;
                    let right = self.expr(expect(&mut inner, "operand", line)?)?;
                    ops.push((op, right));
                }
                if ops.is_empty() {
                    Ok(left)
                } else {
                    Ok(Expr::Compare {
                        left: Box::new(left),
                        ops,
                    })
                }
            }
            Rule::arith => self.arith(pair),
            Rule::primary => self.primary(pair),
            _ => Err(unexpected(&pair)),
        }
    }

    fn arith(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let mut inner = pair.clone().into_inner();
        if let (Some(only), None) = (inner.next(), inner.next()) {
            return self.primary(only);
        }

        pratt()
            .map_primary(|primary| self.primary(primary))
            .map_prefix(|op, operand| {
                let op = match op.as_rule() {
                    Rule::neg => UnaryOp::Neg,
                    Rule::pos => UnaryOp::Pos,
                    Rule::invert => UnaryOp::Invert,
                    _ => return Err(unexpected(&op)),
                };
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand?),
                })
            })
            .map_infix(|left, op, right| {
                Ok(Expr::Binary {
                    op: bin_op(&op)?,
                    left: Box::new(left?),
                    right: Box::new(right?),
                })
            })
            .parse(pair.into_inner())
    }

    fn primary(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        let mut inner = pair.into_inner();
        let mut expr = self.atom(expect(&mut inner, "atom", line)?)?;

        for trailer in inner {
            expr = match trailer.as_rule() {
                Rule::attribute => {
                    let attr = expect(&mut trailer.into_inner(), "attribute name", line)?;
                    Expr::Attribute {
                        value: Box::new(expr),
                        attr: attr.as_str().to_string(),
                    }
                }
                Rule::call => Expr::Call {
                    func: Box::new(expr),
                    args: self.arguments(trailer)?,
                },
                Rule::subscription => Expr::Subscript {
                    value: Box::new(expr),
                    index: Box::new(self.subscription(trailer)?),
                },
                _ => return Err(unexpected(&trailer)),
            };
        }
        Ok(expr)
    }

    fn arguments(&mut self, pair: Pair<Rule>) -> Result<Vec<Argument>> {
        let mut args = Vec::new();
        let mut seen_keyword = false;
        for arg in pair.into_inner() {
            let line = line_of(&arg);
            let rule = arg.as_rule();
            let mut inner = arg.into_inner();
            let built = match rule {
                Rule::keyword_arg => {
                    let name = expect(&mut inner, "keyword", line)?.as_str().to_string();
                    let value = self.expr(expect(&mut inner, "keyword value", line)?)?;
                    Argument::Keyword(name, value)
                }
                Rule::double_star_arg => {
                    Argument::DoubleStar(self.expr(expect(&mut inner, "mapping", line)?)?)
                }
                Rule::star_arg => Argument::Star(self.expr(expect(&mut inner, "iterable", line)?)?),
                Rule::positional_arg => {
                    let element = self.expr(expect(&mut inner, "argument", line)?)?;
                    match inner.next() {
                        Some(comp) => Argument::Positional(Expr::GeneratorExp {
                            element: Box::new(element),
                            generators: self.comp_for(comp)?,
                        }),
                        None => Argument::Positional(element),
                    }
                }
                _ => return Err(SandboxError::syntax("invalid argument", Some(line))),
            };
            match built {
                Argument::Keyword(..) | Argument::DoubleStar(_) => seen_keyword = true,
                Argument::Positional(_) if seen_keyword => {
                    return Err(SandboxError::syntax(
                        "positional argument follows keyword argument",
                        Some(line),
                    ))
                }
                _ => {}
            }
            args.push(built);
        }
        Ok(args)
    }

    fn subscription(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let mut items = Vec::new();
        let mut trailing = false;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::trailing_comma => trailing = true,
                Rule::subscript => items.push(self.subscript(part)?),
                _ => return Err(unexpected(&part)),
            }
        }
        if items.len() == 1 && !trailing {
            Ok(items.remove(0))
        } else {
            Ok(Expr::Tuple(items))
        }
    }

    fn subscript(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        let mut lower = None;
        let mut tail = None;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::slice_lower => lower = Some(self.inner_expr(part)?),
                Rule::slice_tail => tail = Some(part),
                _ => return Err(unexpected(&part)),
            }
        }

        let Some(tail) = tail else {
            return lower.ok_or_else(|| SandboxError::syntax("expected index", Some(line)));
        };

        let mut upper = None;
        let mut step = None;
        for part in tail.into_inner() {
            match part.as_rule() {
                Rule::slice_upper => upper = Some(Box::new(self.inner_expr(part)?)),
                Rule::slice_step => step = Some(Box::new(self.inner_expr(part)?)),
                _ => return Err(unexpected(&part)),
            }
        }
        Ok(Expr::Slice {
            lower: lower.map(Box::new),
            upper,
            step,
        })
    }

    /// Build the single expression wrapped by a named helper rule.
    fn inner_expr(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        let inner = expect(&mut pair.into_inner(), "expression", line)?;
        self.expr(inner)
    }

    // ========================================================================
    // Atoms
    // ========================================================================

    fn atom(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        match pair.as_rule() {
            Rule::identifier => Ok(Expr::Name(pair.as_str().to_string())),
            Rule::none_lit => Ok(Expr::Constant(Constant::None)),
            Rule::true_lit => Ok(Expr::Constant(Constant::Bool(true))),
            Rule::false_lit => Ok(Expr::Constant(Constant::Bool(false))),
            Rule::int => parse_int(pair.as_str(), line).map(Expr::int),
            Rule::float => pair
                .as_str()
                .replace('_', "")
                .parse::<f64>()
                .map(|f| Expr::Constant(Constant::Float(f)))
                .map_err(|_| SandboxError::syntax("invalid float literal", Some(line))),
            Rule::string_group => self.string_group(pair),
            Rule::paren | Rule::list_display => self.sequence_display(pair),
            Rule::brace => self.brace(pair),
            _ => Err(unexpected(&pair)),
        }
    }

    fn element(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        if pair.as_rule() == Rule::star_expr {
            Ok(Expr::Starred(Box::new(self.inner_expr(pair)?)))
        } else {
            self.expr(pair)
        }
    }

    fn sequence_display(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let is_list = pair.as_rule() == Rule::list_display;
        let mut items = Vec::new();
        let mut trailing = false;
        let mut generators = None;

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::trailing_comma => trailing = true,
                Rule::comp_for => generators = Some(self.comp_for(part)?),
                _ => items.push(self.element(part)?),
            }
        }

        if let Some(generators) = generators {
            let element = Box::new(items.remove(0));
            return Ok(if is_list {
                Expr::ListComp {
                    element,
                    generators,
                }
            } else {
                Expr::GeneratorExp {
                    element,
                    generators,
                }
            });
        }

        if is_list {
            return Ok(Expr::List(items));
        }
        if items.len() == 1 && !trailing && !matches!(items[0], Expr::Starred(_)) {
            return Ok(items.remove(0));
        }
        Ok(Expr::Tuple(items))
    }

    fn brace(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        let mut pairs = Vec::new();
        let mut singles = Vec::new();
        let mut dict_items = Vec::new();
        let mut generators = None;

        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::trailing_comma => {}
                Rule::comp_for => generators = Some(self.comp_for(part)?),
                Rule::dict_unpack => dict_items.push(DictItem::Unpack(self.inner_expr(part)?)),
                Rule::star_expr => singles.push(self.element(part)?),
                Rule::brace_entry => {
                    let mut inner = part.into_inner();
                    let key = self.expr(expect(&mut inner, "key", line)?)?;
                    match inner.next() {
                        Some(value) => {
                            let value = self.expr(value)?;
                            pairs.push((key.clone(), value.clone()));
                            dict_items.push(DictItem::Pair(key, value));
                        }
                        None => singles.push(key),
                    }
                }
                _ => return Err(unexpected(&part)),
            }
        }

        let is_dict = singles.is_empty();
        if !is_dict && !dict_items.is_empty() {
            return Err(SandboxError::syntax("invalid syntax", Some(line)));
        }

        if let Some(generators) = generators {
            if is_dict {
                let (key, value) = pairs
                    .into_iter()
                    .next()
                    .ok_or_else(|| SandboxError::syntax("invalid syntax", Some(line)))?;
                return Ok(Expr::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators,
                });
            }
            return Ok(Expr::SetComp {
                element: Box::new(singles.remove(0)),
                generators,
            });
        }

        if is_dict {
            Ok(Expr::Dict(dict_items))
        } else {
            Ok(Expr::Set(singles))
        }
    }

    fn comp_for(&mut self, pair: Pair<Rule>) -> Result<Vec<Comprehension>> {
        let mut generators: Vec<Comprehension> = Vec::new();
        for part in pair.into_inner() {
            let line = line_of(&part);
            match part.as_rule() {
                Rule::comp_clause => {
                    let site = self.site(line);
                    let mut inner = part.into_inner();
                    let target = self.target_list(expect(&mut inner, "target", line)?)?;
                    let iter = self.expr(expect(&mut inner, "iterable", line)?)?;
                    generators.push(Comprehension {
                        site,
                        target,
                        iter,
                        ifs: Vec::new(),
                    });
                }
                Rule::comp_if => {
                    let condition = self.inner_expr(part)?;
                    let last = generators
                        .last_mut()
                        .ok_or_else(|| SandboxError::syntax("invalid comprehension", Some(line)))?;
                    last.ifs.push(condition);
                }
                _ => return Err(unexpected(&part)),
            }
        }
        Ok(generators)
    }

    // ========================================================================
    // Strings
    // ========================================================================

    fn string_group(&mut self, pair: Pair<Rule>) -> Result<Expr> {
        let line = line_of(&pair);
        let mut parts: Vec<FStringPart> = Vec::new();
        let mut formatted = false;

        for lit in pair.into_inner() {
            let mut inner = lit.into_inner();
            let prefix = expect(&mut inner, "string prefix", line)?
                .as_str()
                .to_ascii_lowercase();
            let body_pair = expect(&mut inner, "string body", line)?;
            let quote_len = match body_pair.as_rule() {
                Rule::triple_dq | Rule::triple_sq => 3,
                _ => 1,
            };
            let text = body_pair.as_str();
            let body = &text[quote_len..text.len() - quote_len];
            let raw = prefix.contains('r');

            if prefix.contains('f') {
                formatted = true;
                for raw_part in split_fstring(body, raw, line)? {
                    parts.push(self.fstring_part(raw_part, line)?);
                }
            } else {
                let value = if raw { body.to_string() } else { unescape(body, line)? };
                parts.push(FStringPart::Literal(value));
            }
        }

        if formatted {
            return Ok(Expr::FString(merge_literals(parts)));
        }
        let mut joined = String::new();
        for part in parts {
            if let FStringPart::Literal(text) = part {
                joined.push_str(&text);
            }
        }
        Ok(Expr::str(joined))
    }

    fn fstring_part(&mut self, part: RawPart, line: usize) -> Result<FStringPart> {
        match part {
            RawPart::Literal(text) => Ok(FStringPart::Literal(text)),
            RawPart::Field {
                source,
                conversion,
                spec,
            } => {
                let mut pairs = SandpitParser::parse(Rule::fstring_expr, source.trim())
                    .map_err(|_| SandboxError::syntax("f-string: invalid syntax", Some(line)))?;
                let entry = expect(&mut pairs, "f-string expression", line)?;
                let testlist = expect(&mut entry.into_inner(), "f-string expression", line)?;
                let expr = self.testlist(testlist)?;
                let mut spec_parts = Vec::with_capacity(spec.len());
                for piece in spec {
                    spec_parts.push(self.fstring_part(piece, line)?);
                }
                Ok(FStringPart::Field {
                    expr: Box::new(expr),
                    conversion,
                    spec: spec_parts,
                })
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn dotted_name(pair: Pair<Rule>) -> String {
    pair.into_inner()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn expr_to_target(expr: Expr, line: usize) -> Result<Target> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name)),
        Expr::Attribute { value, attr } => Ok(Target::Attribute {
            value: *value,
            attr,
        }),
        Expr::Subscript { value, index } => Ok(Target::Subscript {
            value: *value,
            index: *index,
        }),
        Expr::Tuple(items) | Expr::List(items) => {
            let mut targets = Vec::with_capacity(items.len());
            for item in items {
                targets.push(expr_to_target(item, line)?);
            }
            Ok(Target::Tuple(targets))
        }
        Expr::Starred(inner) => Ok(Target::Starred(Box::new(expr_to_target(*inner, line)?))),
        Expr::Call { .. } => Err(SandboxError::syntax(
            "cannot assign to function call",
            Some(line),
        )),
        _ => Err(SandboxError::syntax(
            "cannot assign to expression",
            Some(line),
        )),
    }
}

fn check_params(params: &[Param], line: usize) -> Result<()> {
    let mut seen_default = false;
    let mut names = std::collections::HashSet::new();
    for param in params {
        if !names.insert(param.name.as_str()) {
            return Err(SandboxError::syntax(
                format!("duplicate argument '{}' in function definition", param.name),
                Some(line),
            ));
        }
        match param.kind {
            ParamKind::Regular if param.default.is_some() => seen_default = true,
            ParamKind::Regular if seen_default => {
                return Err(SandboxError::syntax(
                    "non-default argument follows default argument",
                    Some(line),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn merge_literals(parts: Vec<FStringPart>) -> Vec<FStringPart> {
    let mut merged: Vec<FStringPart> = Vec::with_capacity(parts.len());
    for part in parts {
        if let FStringPart::Literal(text) = &part {
            if let Some(FStringPart::Literal(previous)) = merged.last_mut() {
                previous.push_str(text);
                continue;
            }
        }
        merged.push(part);
    }
    merged
}

fn parse_int(text: &str, line: usize) -> Result<i64> {
    let cleaned = text.replace('_', "").to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = cleaned.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = cleaned.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = cleaned.strip_prefix("0b") {
        (rest, 2)
    } else {
        (cleaned.as_str(), 10)
    };
    i64::from_str_radix(digits, radix)
        .map_err(|_| SandboxError::syntax("integer literal too large", Some(line)))
}

fn aug_op(pair: Pair<Rule>) -> Result<BinOp> {
    let op = match pair.as_str() {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "<<=" => BinOp::LShift,
        ">>=" => BinOp::RShift,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "&=" => BinOp::BitAnd,
        _ => return Err(unexpected(&pair)),
    };
    Ok(op)
}

fn bin_op(pair: &Pair<Rule>) -> Result<BinOp> {
    let op = match pair.as_rule() {
        Rule::add => BinOp::Add,
        Rule::sub => BinOp::Sub,
        Rule::mul => BinOp::Mul,
        Rule::div => BinOp::Div,
        Rule::floordiv => BinOp::FloorDiv,
        Rule::modulo => BinOp::Mod,
        Rule::pow => BinOp::Pow,
        Rule::shl => BinOp::LShift,
        Rule::shr => BinOp::RShift,
        Rule::bor => BinOp::BitOr,
        Rule::bxor => BinOp::BitXor,
        Rule::band => BinOp::BitAnd,
        _ => return Err(unexpected(pair)),
    };
    Ok(op)
}

fn cmp_op(pair: &Pair<Rule>) -> Result<CmpOp> {
    let op = match pair.as_rule() {
        Rule::eq => CmpOp::Eq,
        Rule::ne => CmpOp::NotEq,
        Rule::lt => CmpOp::Lt,
        Rule::le => CmpOp::LtE,
        Rule::gt => CmpOp::Gt,
        Rule::ge => CmpOp::GtE,
        Rule::in_op => CmpOp::In,
        Rule::not_in => CmpOp::NotIn,
        Rule::is_op => CmpOp::Is,
        Rule::is_not => CmpOp::IsNot,
        _ => return Err(unexpected(pair)),
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        parse_program(source).unwrap()
    }

    fn single_expr(source: &str) -> Expr {
        let program = parse(source);
        match program.body.into_iter().next().map(|s| s.kind) {
            Some(StmtKind::Expr(expr)) => expr,
            other => panic!("Expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_print_call() {
        let expr = single_expr("print(1 + 1)");
        match expr {
            Expr::Call { func, args } => {
                assert_eq!(*func, Expr::name("print"));
                assert_eq!(
                    args,
                    vec![Argument::Positional(Expr::Binary {
                        op: BinOp::Add,
                        left: Box::new(Expr::int(1)),
                        right: Box::new(Expr::int(1)),
                    })]
                );
            }
            _ => panic!("Expected call"),
        }
    }

    #[test]
    fn test_precedence() {
        let expr = single_expr("1 + 2 * 3");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinOp::Add,
                left: Box::new(Expr::int(1)),
                right: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    left: Box::new(Expr::int(2)),
                    right: Box::new(Expr::int(3)),
                }),
            }
        );
    }

    #[test]
    fn test_unary_minus_binds_looser_than_power() {
        let expr = single_expr("-2 ** 2");
        match expr {
            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => assert!(matches!(*operand, Expr::Binary { op: BinOp::Pow, .. })),
            other => panic!("Expected negation, got {:?}", other),
        }
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = single_expr("2 ** 3 ** 2");
        match expr {
            Expr::Binary {
                op: BinOp::Pow,
                left,
                right,
            } => {
                assert_eq!(*left, Expr::int(2));
                assert!(matches!(*right, Expr::Binary { op: BinOp::Pow, .. }));
            }
            other => panic!("Expected power, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_lines() {
        let program = parse("x = 1\n\n# note\ny = (1,\n     2)\nz = 3\n");
        let lines: Vec<usize> = program.body.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 4, 6]);
    }

    #[test]
    fn test_if_elif_else() {
        let program = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        match &program.body[0].kind {
            StmtKind::If { branches, orelse } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(orelse.len(), 1);
                assert_eq!(orelse[0].line, 6);
            }
            other => panic!("Expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_loop_sites_are_distinct() {
        let program = parse("for i in range(3):\n    while i:\n        i -= 1\nys = [j for j in xs]\n");
        let mut sites = Vec::new();
        match &program.body[0].kind {
            StmtKind::For { site, body, .. } => {
                sites.push(site.id);
                if let StmtKind::While { site, .. } = &body[0].kind {
                    sites.push(site.id);
                }
            }
            other => panic!("Expected for, got {:?}", other),
        }
        match &program.body[1].kind {
            StmtKind::Assign {
                value: Expr::ListComp { generators, .. },
                ..
            } => sites.push(generators[0].site.id),
            other => panic!("Expected comprehension, got {:?}", other),
        }
        sites.sort_unstable();
        sites.dedup();
        assert_eq!(sites.len(), 3);
    }

    #[test]
    fn test_function_def() {
        let program = parse("def f(a, b=2, *args, **kw) -> int:\n    return a + b\n");
        match &program.body[0].kind {
            StmtKind::FunctionDef(def) => {
                assert_eq!(def.name, "f");
                let kinds: Vec<ParamKind> = def.params.iter().map(|p| p.kind).collect();
                assert_eq!(
                    kinds,
                    vec![
                        ParamKind::Regular,
                        ParamKind::Regular,
                        ParamKind::VarArgs,
                        ParamKind::KwArgs
                    ]
                );
                assert!(def.params[1].default.is_some());
                assert!(def.returns.is_some());
            }
            other => panic!("Expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_non_default_after_default_rejected() {
        assert!(parse_program("def f(a=1, b):\n    pass\n").is_err());
    }

    #[test]
    fn test_tuple_unpacking_targets() {
        let program = parse("a, (b, c) = 1, (2, 3)\nfirst, *rest = xs\n");
        match &program.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(
                    targets[0],
                    Target::Tuple(vec![
                        Target::Name("a".to_string()),
                        Target::Tuple(vec![
                            Target::Name("b".to_string()),
                            Target::Name("c".to_string())
                        ]),
                    ])
                );
                assert!(matches!(value, Expr::Tuple(items) if items.len() == 2));
            }
            other => panic!("Expected assignment, got {:?}", other),
        }
        match &program.body[1].kind {
            StmtKind::Assign { targets, .. } => match &targets[0] {
                Target::Tuple(items) => assert!(matches!(items[1], Target::Starred(_))),
                other => panic!("Expected tuple target, got {:?}", other),
            },
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_chained_assignment() {
        let program = parse("a = b = 0\n");
        match &program.body[0].kind {
            StmtKind::Assign { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("Expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_augmented_assignment() {
        let program = parse("x **= 2\ny //= 3\n");
        let ops: Vec<BinOp> = program
            .body
            .iter()
            .map(|s| match &s.kind {
                StmtKind::AugAssign { op, .. } => *op,
                other => panic!("Expected augmented assignment, got {:?}", other),
            })
            .collect();
        assert_eq!(ops, vec![BinOp::Pow, BinOp::FloorDiv]);
    }

    #[test]
    fn test_keyword_prefixed_identifiers() {
        let program = parse("iffy = 1\nnothing = iffy\nformat_ = nothing\n");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn test_comparison_operators() {
        let expr = single_expr("a not in b is not c < d");
        match expr {
            Expr::Compare { ops, .. } => {
                let kinds: Vec<CmpOp> = ops.iter().map(|(op, _)| *op).collect();
                assert_eq!(kinds, vec![CmpOp::NotIn, CmpOp::IsNot, CmpOp::Lt]);
            }
            other => panic!("Expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_dict_set_and_comprehensions() {
        assert!(matches!(single_expr("{}"), Expr::Dict(items) if items.is_empty()));
        assert!(matches!(single_expr("{1, 2}"), Expr::Set(items) if items.len() == 2));
        assert!(matches!(single_expr("{'a': 1, **rest}"), Expr::Dict(items) if items.len() == 2));
        assert!(matches!(single_expr("{k: v for k, v in items}"), Expr::DictComp { .. }));
        assert!(matches!(single_expr("{x for x in xs if x}"), Expr::SetComp { .. }));
        assert!(matches!(single_expr("(x for x in xs)"), Expr::GeneratorExp { .. }));
        assert!(matches!(single_expr("(1)"), Expr::Constant(Constant::Int(1))));
        assert!(matches!(single_expr("(1,)"), Expr::Tuple(items) if items.len() == 1));
        assert!(matches!(single_expr("()"), Expr::Tuple(items) if items.is_empty()));
    }

    #[test]
    fn test_slices() {
        match single_expr("xs[1:-1:2]") {
            Expr::Subscript { index, .. } => match *index {
                Expr::Slice { lower, upper, step } => {
                    assert!(lower.is_some() && upper.is_some() && step.is_some())
                }
                other => panic!("Expected slice, got {:?}", other),
            },
            other => panic!("Expected subscript, got {:?}", other),
        }
        match single_expr("xs[::-1]") {
            Expr::Subscript { index, .. } => {
                assert!(matches!(*index, Expr::Slice { lower: None, upper: None, step: Some(_) }))
            }
            other => panic!("Expected subscript, got {:?}", other),
        }
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(single_expr("'a' \"b\""), Expr::str("ab"));
        assert_eq!(single_expr(r"r'\d+'"), Expr::str(r"\d+"));
        assert_eq!(single_expr("'tab\\there'"), Expr::str("tab\there"));
        assert_eq!(single_expr("\"\"\"multi\nline\"\"\""), Expr::str("multi\nline"));
    }

    #[test]
    fn test_fstring() {
        match single_expr("f'{name!r:>10} has {n + 1} items'") {
            Expr::FString(parts) => {
                assert_eq!(parts.len(), 4);
                assert!(matches!(&parts[0], FStringPart::Field { conversion: Some('r'), .. }));
                assert_eq!(parts[1], FStringPart::Literal(" has ".to_string()));
            }
            other => panic!("Expected f-string, got {:?}", other),
        }
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(single_expr("0xff"), Expr::int(255));
        assert_eq!(single_expr("1_000_000"), Expr::int(1_000_000));
        assert_eq!(single_expr("0b101"), Expr::int(5));
        assert_eq!(single_expr("1e3"), Expr::Constant(Constant::Float(1000.0)));
        assert_eq!(single_expr(".5"), Expr::Constant(Constant::Float(0.5)));
        assert!(parse_program("99999999999999999999").is_err());
    }

    #[test]
    fn test_lambda_and_keyword_args() {
        match single_expr("sorted(xs, key=lambda p: p[1], reverse=True)") {
            Expr::Call { args, .. } => {
                assert_eq!(args.len(), 3);
                assert!(matches!(&args[1], Argument::Keyword(name, Expr::Lambda(_)) if name == "key"));
            }
            other => panic!("Expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_try_except() {
        let source = "try:\n    x = 1 / 0\nexcept ZeroDivisionError as e:\n    pass\nexcept:\n    pass\nelse:\n    pass\nfinally:\n    pass\n";
        match &parse(source).body[0].kind {
            StmtKind::Try {
                handlers,
                orelse,
                finalbody,
                ..
            } => {
                assert_eq!(handlers.len(), 2);
                assert_eq!(handlers[0].name.as_deref(), Some("e"));
                assert!(handlers[1].kind.is_none());
                assert_eq!(orelse.len(), 1);
                assert_eq!(finalbody.len(), 1);
            }
            other => panic!("Expected try, got {:?}", other),
        }
    }

    #[test]
    fn test_imports() {
        let program = parse("import math, matplotlib.pyplot as plt\nfrom os import system as s\nfrom math import *\n");
        match &program.body[0].kind {
            StmtKind::Import(aliases) => {
                assert_eq!(aliases[1].module, "matplotlib.pyplot");
                assert_eq!(aliases[1].bound_name(), "plt");
            }
            other => panic!("Expected import, got {:?}", other),
        }
        match &program.body[1].kind {
            StmtKind::ImportFrom { module, names } => {
                assert_eq!(module, "os");
                assert_eq!(
                    names,
                    &ImportNames::Names(vec![("system".to_string(), Some("s".to_string()))])
                );
            }
            other => panic!("Expected from-import, got {:?}", other),
        }
        assert!(matches!(
            &program.body[2].kind,
            StmtKind::ImportFrom { names: ImportNames::Star, .. }
        ));
    }

    #[test]
    fn test_inline_block_and_semicolons() {
        let program = parse("if x: a = 1; b = 2\nwhile False: pass\n");
        match &program.body[0].kind {
            StmtKind::If { branches, .. } => assert_eq!(branches[0].1.len(), 2),
            other => panic!("Expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_line() {
        let err = parse_program("x = 1\ny = = 2\n").unwrap_err();
        assert_eq!(err.to_string(), "SyntaxError: invalid syntax (line 2)");
    }

    #[test]
    fn test_class_is_not_supported() {
        assert!(parse_program("class A:\n    pass\n").is_err());
    }
}
