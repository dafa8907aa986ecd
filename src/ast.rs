// Shared surface types: the opcode alphabet and the expression tree
// that both the compiler and the heap loader consume.
//
// An expression is either an atom (NIL, an integer, an opcode symbol,
// or an identifier) or a nested list. Code emitted by the compiler is
// itself an expression list, so one type serves for programs, operands
// and decoded heap structure alike.

use std::fmt;
use std::str::FromStr;


// The fixed opcode alphabet. Opcodes are stored inline in code lists
// and behave as constants at fetch time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpCode {
    Add,
    Sub,
    Mul,
    Div,
    Nil,
    Cons,
    Car,
    Cdr,
    Null,
    Ldc,
    Ld,
    Ldf,
    Ap,
    Rtn,
    Dum,
    Rap,
    Sel,
    Join,
    Stop,
    WriteI,
    WriteC,
    ReadC,
    ReadI,
    ZeroP,
    Gt0P,
    Lt0P,
}


// Handy for exhaustive tests and table-driven checks.
pub const OP_CODES: [OpCode; 26] = [
    OpCode::Add, OpCode::Sub, OpCode::Mul, OpCode::Div,
    OpCode::Nil, OpCode::Cons, OpCode::Car, OpCode::Cdr, OpCode::Null,
    OpCode::Ldc, OpCode::Ld, OpCode::Ldf, OpCode::Ap, OpCode::Rtn,
    OpCode::Dum, OpCode::Rap, OpCode::Sel, OpCode::Join, OpCode::Stop,
    OpCode::WriteI, OpCode::WriteC, OpCode::ReadC, OpCode::ReadI,
    OpCode::ZeroP, OpCode::Gt0P, OpCode::Lt0P,
];


impl OpCode {
    // The canonical mnemonic, as it appears in assembly listings.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Add    => "ADD",
            OpCode::Sub    => "SUB",
            OpCode::Mul    => "MUL",
            OpCode::Div    => "DIV",
            OpCode::Nil    => "NIL",
            OpCode::Cons   => "CONS",
            OpCode::Car    => "CAR",
            OpCode::Cdr    => "CDR",
            OpCode::Null   => "NULL",
            OpCode::Ldc    => "LDC",
            OpCode::Ld     => "LD",
            OpCode::Ldf    => "LDF",
            OpCode::Ap     => "AP",
            OpCode::Rtn    => "RTN",
            OpCode::Dum    => "DUM",
            OpCode::Rap    => "RAP",
            OpCode::Sel    => "SEL",
            OpCode::Join   => "JOIN",
            OpCode::Stop   => "STOP",
            OpCode::WriteI => "WRITEI",
            OpCode::WriteC => "WRITEC",
            OpCode::ReadC  => "READC",
            OpCode::ReadI  => "READI",
            OpCode::ZeroP  => "ZEROP",
            OpCode::Gt0P   => "GT0P",
            OpCode::Lt0P   => "LT0P",
        }
    }
}


impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}


impl FromStr for OpCode {
    type Err = ();

    fn from_str(word: &str) -> Result<OpCode, ()> {
        for &op in OP_CODES.iter() {
            if op.name() == word {
                return Ok(op);
            }
        }
        Err(())
    }
}


// The expression tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Nil,
    Int(i64),
    Op(OpCode),
    Sym(String),
    List(Vec<Expr>),
}


impl Expr {
    pub fn sym(name: &str) -> Expr {
        Expr::Sym(String::from(name))
    }

    pub fn list(items: Vec<Expr>) -> Expr {
        Expr::List(items)
    }

    // Everything except a list is an atom.
    pub fn is_atom(&self) -> bool {
        match self {
            Expr::List(_) => false,
            _ => true,
        }
    }
}


impl From<i64> for Expr {
    fn from(x: i64) -> Expr {
        Expr::Int(x)
    }
}

impl From<OpCode> for Expr {
    fn from(op: OpCode) -> Expr {
        Expr::Op(op)
    }
}

impl From<Vec<Expr>> for Expr {
    fn from(items: Vec<Expr>) -> Expr {
        Expr::List(items)
    }
}

// A string is the NIL literal, an opcode mnemonic, or an identifier,
// in that order of precedence.
impl From<&str> for Expr {
    fn from(word: &str) -> Expr {
        if word == "NIL" {
            Expr::Nil
        } else if let Ok(op) = word.parse::<OpCode>() {
            Expr::Op(op)
        } else {
            Expr::sym(word)
        }
    }
}


// Renders s-expression syntax: (SUB x y), (LDC (1 2 3)), NIL.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Expr::Nil => f.write_str("NIL"),
            Expr::Int(x) => write!(f, "{}", x),
            Expr::Op(op) => write!(f, "{}", op),
            Expr::Sym(name) => f.write_str(name),
            Expr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}


// List-builder sugar so programs read almost like the Lisp they are:
//
//     sexp![OpCode::Sub, "x", "y"]  =>  (SUB x y)
//
// Accepts anything with an Into<Expr> conversion, including nested
// sexp! invocations.
#[macro_export]
macro_rules! sexp(
    ( $($item:expr),* $(,)? ) => {
        $crate::ast::Expr::List(vec![ $( $crate::ast::Expr::from($item) ),* ])
    };
);
