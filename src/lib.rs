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

extern crate enumflags2;
extern crate regex;
extern crate ron;
extern crate serde;
#[macro_use]
extern crate lazy_static;


#[macro_use]
pub mod util;
#[macro_use]
pub mod ast;
pub mod compiler;
pub mod config;
pub mod graph;
pub mod heap;
pub mod vm;
