//! Abstract Syntax Tree definitions for Sandpit scripts

use std::rc::Rc;

/// A parsed script
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// A statement together with the script line it starts on
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

/// Identity of a syntactic loop construct. Iteration budgets are tracked per
/// site, so every `while`, `for` and comprehension `for` clause gets its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopSite {
    pub id: u32,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `a = b = value`; one entry per `=`-separated target list
    Assign {
        targets: Vec<Target>,
        value: Expr,
    },
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    AnnAssign {
        target: Target,
        annotation: Expr,
        value: Option<Expr>,
    },
    Pass,
    Break,
    Continue,
    Return(Option<Expr>),
    Raise(Option<Expr>),
    Del(Vec<Target>),
    Assert {
        test: Expr,
        message: Option<Expr>,
    },
    Import(Vec<ImportAlias>),
    ImportFrom {
        module: String,
        names: ImportNames,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
    },
    While {
        site: LoopSite,
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    For {
        site: LoopSite,
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    FunctionDef(Rc<FunctionDef>),
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
}

// ============================================================================
// Imports
// ============================================================================

/// `import a.b as c`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportAlias {
    pub module: String,
    pub alias: Option<String>,
}

impl ImportAlias {
    /// Name bound in the importing scope: the alias, or the first segment of
    /// the dotted module path.
    pub fn bound_name(&self) -> &str {
        match &self.alias {
            Some(alias) => alias,
            None => self.module.split('.').next().unwrap_or(&self.module),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportNames {
    Star,
    /// `(name, alias)` pairs
    Names(Vec<(String, Option<String>)>),
}

// ============================================================================
// Functions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub returns: Option<Expr>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub default: Option<Expr>,
    pub annotation: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Regular,
    VarArgs,
    KwArgs,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub kind: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
    pub line: usize,
}

// ============================================================================
// Assignment targets
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Attribute { value: Expr, attr: String },
    Subscript { value: Expr, index: Expr },
    Tuple(Vec<Target>),
    Starred(Box<Target>),
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Literal(String),
    Field {
        expr: Box<Expr>,
        conversion: Option<char>,
        spec: Vec<FStringPart>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DictItem {
    Pair(Expr, Expr),
    Unpack(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Positional(Expr),
    Star(Expr),
    Keyword(String, Expr),
    DoubleStar(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub site: LoopSite,
    pub target: Target,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Constant),
    FString(Vec<FStringPart>),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Set(Vec<Expr>),
    Dict(Vec<DictItem>),
    Starred(Box<Expr>),
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        lower: Option<Box<Expr>>,
        upper: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Argument>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Lambda(Rc<FunctionDef>),
    ListComp {
        element: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        element: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    /// Generator expressions are evaluated eagerly into an iterator.
    GeneratorExp {
        element: Box<Expr>,
        generators: Vec<Comprehension>,
    },
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Constant(Constant::Str(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Expr::Constant(Constant::Int(value))
    }

    /// Dotted form of a pure `a.b.c` attribute chain rooted at a name.
    pub fn dotted_path(&self) -> Option<Vec<&str>> {
        match self {
            Expr::Name(name) => Some(vec![name.as_str()]),
            Expr::Attribute { value, attr } => {
                let mut path = value.dotted_path()?;
                path.push(attr.as_str());
                Some(path)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_alias_bound_name() {
        let plain = ImportAlias {
            module: "matplotlib.pyplot".to_string(),
            alias: None,
        };
        assert_eq!(plain.bound_name(), "matplotlib");

        let aliased = ImportAlias {
            module: "matplotlib.pyplot".to_string(),
            alias: Some("plt".to_string()),
        };
        assert_eq!(aliased.bound_name(), "plt");
    }

    #[test]
    fn test_dotted_path() {
        let expr = Expr::Attribute {
            value: Box::new(Expr::Attribute {
                value: Box::new(Expr::name("os")),
                attr: "path".to_string(),
            }),
            attr: "join".to_string(),
        };
        assert_eq!(expr.dotted_path(), Some(vec!["os", "path", "join"]));

        let call = Expr::Call {
            func: Box::new(Expr::name("f")),
            args: vec![],
        };
        assert_eq!(call.dotted_path(), None);
    }
}
