// (C) 2020 Brandon Lewis
//
// The Lisp-to-SECD compiler: a syntax-directed translation from the
// surface expression tree to a flat opcode list, after Kogge, The
// Architecture of Symbolic Computers (1991), figures 7-21 and 7-22.
//
// Translation is accumulator-passing: every helper takes the code
// suffix `c` that should follow whatever it emits, and returns the
// finished list. Argument lists are compiled right to left, so the
// leftmost argument is pushed last and ends up on top of the stack.
//
// Lexical addressing uses a name list `n`, the compile-time mirror of
// the runtime environment: a list of frames, each frame a list of
// symbol names. A variable compiles to LD with the 1-based
// (frame, slot) coordinates reported by index(); frame 1 is the
// innermost scope, because new frames are prepended.
//
// Unresolved atoms compile to an LDC of the symbol by default, which
// the loader rejects later; strict mode turns them into a compile
// error carrying the scope snapshot.

use crate::ast::{Expr, OpCode};
use std::fmt;


// Keywords of the surface language.
pub const IF: &str = "IF";
pub const LAMBDA: &str = "LAMBDA";
pub const LET: &str = "LET";
pub const LETREC: &str = "LETREC";
pub const LIST: &str = "LIST";


// One lexical frame of bound names.
pub type Frame = Vec<String>;

// The full name list, innermost frame first.
pub type NameList = Vec<Frame>;


#[derive(Clone, Debug, PartialEq)]
pub enum CompileError {
    Unbound {
        symbol: String,
        scope: NameList
    },
    BadForm(String),
}

pub type Result<T> = core::result::Result<T, CompileError>;


impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CompileError::Unbound { symbol, scope } => {
                write!(f, "unbound variable {} in scope {:?}", symbol, scope)
            }
            CompileError::BadForm(why) => write!(f, "bad form: {}", why),
        }
    }
}


// 1-based (frame, slot) coordinates of `sym` in the name list, or
// None. Searches frames outermost-last: n[0] is the innermost scope
// and is reported as frame 1.
pub fn index(sym: &str, n: &[Frame]) -> Option<(i64, i64)> {
    for (i, frame) in n.iter().enumerate() {
        for (j, name) in frame.iter().enumerate() {
            if name == sym {
                return Some((i as i64 + 1, j as i64 + 1));
            }
        }
    }
    None
}


// The eight opcodes the language exposes as built-in functions.
fn is_builtin(op: OpCode) -> bool {
    match op {
        OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::WriteI
        | OpCode::WriteC
        | OpCode::Car
        | OpCode::Cdr => true,
        _ => false,
    }
}


fn seq(mut prefix: Vec<Expr>, c: Vec<Expr>) -> Vec<Expr> {
    prefix.extend(c);
    prefix
}

fn op(o: OpCode) -> Expr {
    Expr::Op(o)
}

fn coord(i: i64, j: i64) -> Expr {
    Expr::List(vec![Expr::Int(i), Expr::Int(j)])
}

// [frame] prepended to n.
fn extend(n: &[Frame], frame: Frame) -> NameList {
    let mut out = vec![frame];
    out.extend_from_slice(n);
    out
}

// A name frame is a (possibly empty) list of plain symbols.
fn name_frame(e: &Expr) -> Result<Frame> {
    let items = match e {
        Expr::List(items) => items,
        Expr::Nil => return Ok(vec![]),
        other => {
            return Err(CompileError::BadForm(format!("not a name frame: {}", other)))
        }
    };

    items
        .iter()
        .map(|item| match item {
            Expr::Sym(name) => Ok(name.clone()),
            other => Err(CompileError::BadForm(
                format!("not a name: {}", other),
            )),
        })
        .collect()
}

fn value_list(e: &Expr) -> Result<&[Expr]> {
    match e {
        Expr::List(items) => Ok(items),
        other => Err(CompileError::BadForm(
            format!("not a value list: {}", other),
        )),
    }
}


pub struct Compiler {
    strict: bool,
}


impl Compiler {
    // Lenient mode: unresolved atoms become LDC constants.
    pub fn new() -> Compiler {
        Compiler { strict: false }
    }

    // Strict mode: unresolved atoms are compile errors.
    pub fn strict() -> Compiler {
        Compiler { strict: true }
    }

    // Compile expression `e` against name list `n`, emitting code
    // that will be followed by the suffix `c`.
    pub fn compile(&self, e: &Expr, n: &[Frame], c: Vec<Expr>) -> Result<Vec<Expr>> {
        trace!("compile: e: {}; n: {:?}", e, n);

        match e {
            Expr::Nil => Ok(seq(vec![op(OpCode::Nil)], c)),
            Expr::Int(_) | Expr::Op(_) => Ok(seq(vec![op(OpCode::Ldc), e.clone()], c)),
            Expr::Sym(name) => match index(name, n) {
                Some((i, j)) => Ok(seq(vec![op(OpCode::Ld), coord(i, j)], c)),
                None if self.strict => Err(CompileError::Unbound {
                    symbol: name.clone(),
                    scope: n.to_vec(),
                }),
                None => Ok(seq(vec![op(OpCode::Ldc), e.clone()], c)),
            },
            Expr::List(items) => match items.split_first() {
                None => Err(CompileError::BadForm(String::from("empty application"))),
                Some((fcn, args)) => self.compile_form(fcn, args, n, c),
            },
        }
    }

    // A compound expression: built-in, special form, or application.
    fn compile_form(
        &self,
        fcn: &Expr,
        args: &[Expr],
        n: &[Frame],
        c: Vec<Expr>,
    ) -> Result<Vec<Expr>> {
        match fcn {
            Expr::Op(o) if is_builtin(*o) => {
                self.compile_builtin(args, n, seq(vec![op(*o)], c))
            }

            Expr::Sym(name) if name == LIST => {
                let body = self.compile_app(args, n, c)?;
                Ok(seq(vec![op(OpCode::Nil)], body))
            }

            Expr::Sym(name) if name == LAMBDA => {
                if args.len() != 2 {
                    return Err(CompileError::BadForm(
                        format!("LAMBDA takes a name frame and a body, got {} forms", args.len()),
                    ));
                }
                let frame = name_frame(&args[0])?;
                let inner = extend(n, frame);
                self.compile_lambda(&args[1], &inner, c)
            }

            Expr::Sym(name) if name == IF => {
                if args.len() != 3 {
                    return Err(CompileError::BadForm(
                        format!("IF takes test/then/else, got {} forms", args.len()),
                    ));
                }
                self.compile_if(&args[0], &args[1], &args[2], n, c)
            }

            Expr::Sym(name) if name == LET || name == LETREC => {
                if args.len() != 3 {
                    return Err(CompileError::BadForm(format!(
                        "{} takes a name frame, values and a body, got {} forms",
                        name,
                        args.len()
                    )));
                }
                let frame = name_frame(&args[0])?;
                let values = value_list(&args[1])?;
                if frame.len() != values.len() {
                    return Err(CompileError::BadForm(format!(
                        "{} binds {} names to {} values",
                        name,
                        frame.len(),
                        values.len()
                    )));
                }
                let body = &args[2];
                let inner = extend(n, frame);

                if name == LET {
                    // Values evaluate in the enclosing scope.
                    let call =
                        self.compile_lambda(body, &inner, seq(vec![op(OpCode::Ap)], c))?;
                    let app = self.compile_app(values, n, call)?;
                    Ok(seq(vec![op(OpCode::Nil)], app))
                } else {
                    // Values evaluate in the extended scope, which is
                    // what lets them refer to each other.
                    let call =
                        self.compile_lambda(body, &inner, seq(vec![op(OpCode::Rap)], c))?;
                    let app = self.compile_app(values, &inner, call)?;
                    Ok(seq(vec![op(OpCode::Dum), op(OpCode::Nil)], app))
                }
            }

            // A user-defined function bound somewhere in scope.
            Expr::Sym(name) => match index(name, n) {
                Some((i, j)) => {
                    let call = seq(
                        vec![op(OpCode::Ld), coord(i, j), op(OpCode::Ap)],
                        c,
                    );
                    let app = self.compile_app(args, n, call)?;
                    Ok(seq(vec![op(OpCode::Nil)], app))
                }
                None => Err(CompileError::Unbound {
                    symbol: name.clone(),
                    scope: n.to_vec(),
                }),
            },

            // A computed function in head position.
            Expr::List(_) => {
                let call = self.compile(fcn, n, seq(vec![op(OpCode::Ap)], c))?;
                let app = self.compile_app(args, n, call)?;
                Ok(seq(vec![op(OpCode::Nil)], app))
            }

            other => Err(CompileError::BadForm(format!("cannot apply {}", other))),
        }
    }

    // Arguments for a built-in, right to left, so the first argument
    // is pushed last.
    fn compile_builtin(&self, args: &[Expr], n: &[Frame], c: Vec<Expr>) -> Result<Vec<Expr>> {
        match args.split_first() {
            None => Ok(c),
            Some((first, rest)) => {
                let suffix = self.compile(first, n, c)?;
                self.compile_builtin(rest, n, suffix)
            }
        }
    }

    // Arguments for an application, right to left, each followed by
    // CONS so they pile up into a list. The caller prefixes NIL to
    // seed it.
    fn compile_app(&self, args: &[Expr], n: &[Frame], c: Vec<Expr>) -> Result<Vec<Expr>> {
        match args.split_first() {
            None => Ok(c),
            Some((first, rest)) => {
                let suffix = self.compile(first, n, seq(vec![op(OpCode::Cons)], c))?;
                self.compile_app(rest, n, suffix)
            }
        }
    }

    // The function body as an inline code list, closed by RTN.
    fn compile_lambda(&self, body: &Expr, n: &[Frame], c: Vec<Expr>) -> Result<Vec<Expr>> {
        let body_code = self.compile(body, n, vec![op(OpCode::Rtn)])?;
        Ok(seq(vec![op(OpCode::Ldf), Expr::List(body_code)], c))
    }

    // Both branches are self-contained code lists ending in JOIN; SEL
    // picks one at run time.
    fn compile_if(
        &self,
        test: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
        n: &[Frame],
        c: Vec<Expr>,
    ) -> Result<Vec<Expr>> {
        let then_code = self.compile(then_branch, n, vec![op(OpCode::Join)])?;
        let else_code = self.compile(else_branch, n, vec![op(OpCode::Join)])?;

        let suffix = seq(
            vec![
                op(OpCode::Sel),
                Expr::List(then_code),
                Expr::List(else_code),
            ],
            c,
        );
        self.compile(test, n, suffix)
    }
}


// Convenience entry point: lenient mode, empty scope.
pub fn compile(e: &Expr, suffix: Vec<Expr>) -> Result<Vec<Expr>> {
    Compiler::new().compile(e, &[], suffix)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OpCode::*;
    use crate::sexp;

    fn ops(e: Expr) -> Vec<Expr> {
        match e {
            Expr::List(items) => items,
            other => vec![other],
        }
    }

    // compile() against an expected code list, both written with
    // sexp! for legibility.
    fn assert_compiles_to(e: Expr, suffix: Vec<Expr>, expected: Expr) {
        let code = compile(&e, suffix).unwrap();
        assert_eq!(Expr::List(code), expected);
    }

    #[test]
    fn test_atoms() {
        assert_compiles_to(Expr::Nil, ops(sexp![Stop]), sexp![Nil, Stop]);
        assert_compiles_to(Expr::Int(3), ops(sexp![Stop]), sexp![Ldc, 3, Stop]);
        // An unresolved name is a constant in lenient mode.
        assert_compiles_to(Expr::sym("w"), ops(sexp![Stop]), sexp![Ldc, "w", Stop]);
    }

    #[test]
    fn test_builtin() {
        assert_compiles_to(
            sexp![Add, 1, 2],
            ops(sexp![Stop]),
            sexp![Ldc, 2, Ldc, 1, Add, Stop],
        );

        // Nested arguments keep the right-to-left discipline.
        assert_compiles_to(
            sexp![Add, 1, sexp![Mul, 3, 4]],
            ops(sexp![Stop]),
            sexp![Ldc, 4, Ldc, 3, Mul, Ldc, 1, Add, Stop],
        );
    }

    #[test]
    fn test_if() {
        assert_compiles_to(
            sexp!["IF", 1, 2, 3],
            ops(sexp![Stop]),
            sexp![
                Ldc, 1,
                Sel,
                sexp![Ldc, 2, Join],
                sexp![Ldc, 3, Join],
                Stop
            ],
        );
    }

    #[test]
    fn test_lambda() {
        assert_compiles_to(
            sexp!["LAMBDA", sexp!["x", "y"], sexp![Add, "x", "y"]],
            ops(sexp![Stop]),
            sexp![
                Ldf,
                sexp![Ld, sexp![1, 2], Ld, sexp![1, 1], Add, Rtn],
                Stop
            ],
        );
    }

    #[test]
    fn test_lambda_application() {
        assert_compiles_to(
            sexp![sexp!["LAMBDA", sexp!["x", "y"], sexp![Sub, "x", "y"]], 8, 9],
            ops(sexp![WriteI, Stop]),
            sexp![
                Nil, Ldc, 9, Cons, Ldc, 8, Cons,
                Ldf,
                sexp![Ld, sexp![1, 2], Ld, sexp![1, 1], Sub, Rtn],
                Ap, WriteI, Stop
            ],
        );
    }

    #[test]
    fn test_list() {
        assert_compiles_to(
            sexp!["LIST", 1, 2, 3],
            ops(sexp![Stop]),
            sexp![Nil, Ldc, 3, Cons, Ldc, 2, Cons, Ldc, 1, Cons, Stop],
        );
    }

    #[test]
    fn test_let() {
        assert_compiles_to(
            sexp!["LET", sexp!["x"], sexp![sexp!["LIST", 1, 2, 3]], sexp![Car, "x"]],
            ops(sexp![WriteI, Stop]),
            sexp![
                Nil,
                Nil, Ldc, 3, Cons, Ldc, 2, Cons, Ldc, 1, Cons, Cons,
                Ldf,
                sexp![Ld, sexp![1, 1], Car, Rtn],
                Ap, WriteI, Stop
            ],
        );
    }

    #[test]
    fn test_letrec() {
        // The value is compiled in the extended scope: f itself is
        // addressable at (2 1) from inside the lambda body.
        assert_compiles_to(
            sexp![
                "LETREC",
                sexp!["f"],
                sexp![sexp!["LAMBDA", sexp!["n"], sexp!["f", "n"]]],
                sexp!["f", 0]
            ],
            ops(sexp![Stop]),
            sexp![
                Dum, Nil,
                Ldf,
                sexp![
                    Nil, Ld, sexp![1, 1], Cons,
                    Ld, sexp![2, 1], Ap, Rtn
                ],
                Cons,
                Ldf,
                sexp![Nil, Ldc, 0, Cons, Ld, sexp![1, 1], Ap, Rtn],
                Rap, Stop
            ],
        );
    }

    #[test]
    fn test_shadowing() {
        // The inner frame wins: x resolves to (1 1), not the outer
        // binding.
        assert_compiles_to(
            sexp![
                "LET", sexp!["x"], sexp![1],
                sexp!["LET", sexp!["x"], sexp![2], "x"]
            ],
            ops(sexp![Stop]),
            sexp![
                Nil, Ldc, 1, Cons,
                Ldf,
                sexp![
                    Nil, Ldc, 2, Cons,
                    Ldf, sexp![Ld, sexp![1, 1], Rtn],
                    Ap, Rtn
                ],
                Ap, Stop
            ],
        );
    }

    #[test]
    fn test_index() {
        let n: NameList = vec![
            vec![String::from("x"), String::from("y")],
            vec![String::from("z")],
        ];
        assert_eq!(index("x", &n), Some((1, 1)));
        assert_eq!(index("y", &n), Some((1, 2)));
        assert_eq!(index("z", &n), Some((2, 1)));
        assert_eq!(index("w", &n), None);

        // Shadowing: the innermost frame is searched first.
        let shadowed: NameList = vec![
            vec![String::from("x")],
            vec![String::from("x")],
        ];
        assert_eq!(index("x", &shadowed), Some((1, 1)));
    }

    // index() and the machine's environment addressing agree: if
    // index(v, n) says (i, j), then running (LD (i j)) against the
    // value lists corresponding to n yields v's value.
    #[test]
    fn test_index_matches_locate() {
        use crate::vm::Machine;

        let n: NameList = vec![
            vec![String::from("x"), String::from("y")],
            vec![String::from("z")],
        ];
        let runtime_env = sexp![sexp![10, 20], sexp![30]];
        let bindings = [("x", 10i64), ("y", 20), ("z", 30)];

        for (name, value) in bindings.iter() {
            let (i, j) = index(name, &n).unwrap();
            let code = ops(sexp![Ld, sexp![i, j], Stop]);

            let mut m = Machine::new().unwrap();
            m.load_program(&code, &[]).unwrap();
            m.install_env(&runtime_env).unwrap();
            m.run().unwrap();
            assert_eq!(m.peek().unwrap(), Expr::Int(*value));
        }
    }

    #[test]
    fn test_strict_mode() {
        let err = Compiler::strict()
            .compile(&Expr::sym("w"), &[], vec![Expr::Op(Stop)])
            .unwrap_err();
        match err {
            CompileError::Unbound { symbol, scope } => {
                assert_eq!(symbol, "w");
                assert!(scope.is_empty());
            }
            other => panic!("expected Unbound, got {:?}", other),
        }

        // Bound names still compile.
        let n: NameList = vec![vec![String::from("w")]];
        let code = Compiler::strict()
            .compile(&Expr::sym("w"), &n, vec![Expr::Op(Stop)])
            .unwrap();
        assert_eq!(Expr::List(code), sexp![Ld, sexp![1, 1], Stop]);
    }

    #[test]
    fn test_unbound_head_is_always_an_error() {
        for compiler in &[Compiler::new(), Compiler::strict()] {
            let err = compiler
                .compile(&sexp!["g", 1], &[], vec![Expr::Op(Stop)])
                .unwrap_err();
            match err {
                CompileError::Unbound { symbol, .. } => assert_eq!(symbol, "g"),
                other => panic!("expected Unbound, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_bad_forms() {
        assert!(compile(&Expr::List(vec![]), vec![]).is_err());
        assert!(compile(&sexp!["IF", 1, 2], vec![]).is_err());
        assert!(compile(&sexp!["LAMBDA", 3, 4], vec![]).is_err());
        assert!(compile(&sexp!["LET", sexp!["x"], sexp![1, 2], "x"], vec![]).is_err());
        assert!(compile(&sexp![3, 4], vec![]).is_err());
    }
}
