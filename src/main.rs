// secd: a toy Lisp on the classical SECD abstract machine.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::env::args;

use secd::ast::Expr;
use secd::ast::OpCode::{Mul, Stop, Sub, WriteI};
use secd::compiler;
use secd::config::Config;
use secd::sexp;
use secd::vm::Machine;

fn main() {
    let config = match args().nth(1) {
        Some(path) => Config::load(path).expect("couldn't load config"),
        None => Config::default(),
    };

    // (letrec (fact)
    //     ((lambda (n) (if n (* n (fact (- n 1))) 1)))
    //   (fact 6))
    //
    // Kept small so it fits comfortably under the default memory
    // ceiling; there is no garbage collector.
    let program = sexp![
        "LETREC",
        sexp!["fact"],
        sexp![sexp![
            "LAMBDA",
            sexp!["n"],
            sexp![
                "IF",
                "n",
                sexp![Mul, "n", sexp!["fact", sexp![Sub, "n", 1]]],
                1
            ]
        ]],
        sexp!["fact", 6]
    ];

    let code = compiler::compile(&program, vec![Expr::Op(WriteI), Expr::Op(Stop)])
        .expect("couldn't compile program");

    let mut machine = Machine::with_config(config).expect("couldn't build machine");
    machine.load_program(&code, &[]).expect("couldn't load program");
    machine.run().expect("machine fault");
}
