// (C) 2020 Brandon Lewis
//
// The SECD abstract machine.
//
// Four registers, each rooting a linked structure in the tagged-cell
// heap:
//
// - S, the operand stack;
// - E, the environment: a list of frames, each frame a list of values,
//   addressed by 1-based (frame, slot) coordinates;
// - C, the code: a cons chain of opcodes and inline operands;
// - D, the dump: saved (C, E, S) triples for call/return, plus join
//   targets pushed by SEL.
//
// *Execution Model*
//
// The dispatcher runs one opcode per step: fetch the cell at the head
// of C, check that it wears an opcode, and hand it to the matching
// handler. Each handler is responsible for advancing C past its own
// operands. STOP clears the running flag; stepping a stopped machine
// is an error.
//
// *Validity*
//
// The set of runtime faults is the Error enum in heap.rs. All are
// fatal: the first fault clears the running flag and the machine is
// finished. dump_registers() gives the post-mortem view.
//
// *Closures and recursion*
//
// LDF packages (body, E) as a two-cell list on S; AP unpacks it,
// saving the caller's world on D. DUM/RAP close the letrec knot by
// patching a placeholder environment frame in place, producing a
// genuinely cyclic heap structure. Nothing in the opcode path ever
// walks a full structure, so the cycle is harmless; decode() carries
// a visited set for the observers that do walk.
//
// *I/O*
//
// WRITEI/WRITEC write synchronously to the injected output stream,
// READI reads a decimal integer from the injected input stream after
// issuing the "? " prompt. Defaults are stdout/stdin.

use crate::ast::{Expr, OpCode};
use crate::config::Config;
use crate::heap::{Addr, Error, Heap, Result, NIL_ADDR};
use regex::Regex;
use std::io;
use std::io::{BufRead, BufReader, Write};


// The four machine roots, by name. The stack helpers operate on S, E
// and D; C is a bare code pointer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Reg {
    S,
    E,
    C,
    D,
}


// The entire machine state.
pub struct Machine {
    heap: Heap,
    s: Addr,
    e: Addr,
    c: Addr,
    d: Addr,
    running: bool,
    debug: bool,
    input: Box<dyn BufRead>,
    output: Box<dyn Write>,
}


fn read_fault(e: io::Error) -> Error {
    Error::ReadError(e.to_string())
}

fn write_fault(e: io::Error) -> Error {
    Error::WriteError(e.to_string())
}


impl Machine {
    pub fn new() -> Result<Machine> {
        Machine::with_config(Config::default())
    }

    // Construction allocates the three stack roots, so a pathological
    // memory ceiling can fail here already.
    pub fn with_config(config: Config) -> Result<Machine> {
        let mut heap = Heap::new(config.memory_ceiling);

        let s = heap.alloc()?;
        heap.set_cons(s, NIL_ADDR, NIL_ADDR)?;
        let e = heap.alloc()?;
        heap.set_cons(e, NIL_ADDR, NIL_ADDR)?;
        let d = heap.alloc()?;
        heap.set_cons(d, NIL_ADDR, NIL_ADDR)?;

        Ok(Machine {
            heap,
            s,
            e,
            c: NIL_ADDR,
            d,
            running: false,
            debug: config.debug,
            input: Box::new(BufReader::new(io::stdin())),
            output: Box::new(io::stdout()),
        })
    }

    pub fn set_input(&mut self, input: Box<dyn BufRead>) {
        self.input = input;
    }

    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn reg(&self, r: Reg) -> Addr {
        match r {
            Reg::S => self.s,
            Reg::E => self.e,
            Reg::C => self.c,
            Reg::D => self.d,
        }
    }

    fn set_reg(&mut self, r: Reg, addr: Addr) {
        match r {
            Reg::S => self.s = addr,
            Reg::E => self.e = addr,
            Reg::C => self.c = addr,
            Reg::D => self.d = addr,
        }
    }

    // R <- cons(x, R)
    fn push(&mut self, r: Reg, x: Addr) -> Result<()> {
        let rest = self.reg(r);
        let head = self.heap.alloc()?;
        self.heap.set_cons(head, x, rest)?;
        self.set_reg(r, head);
        Ok(())
    }

    // R <- cdr(R)
    fn pop(&mut self, r: Reg) -> Result<()> {
        let rest = self.heap.cdr(self.reg(r))?;
        self.set_reg(r, rest);
        Ok(())
    }

    // Pop the integer at the top of S.
    fn pop_int(&mut self) -> Result<i64> {
        let top = self.heap.car(self.s)?;
        let value = self.heap.get_int(top)?;
        self.pop(Reg::S)?;
        Ok(value)
    }

    // Allocate an integer cell and push it onto S.
    fn push_int(&mut self, value: i64) -> Result<()> {
        let cell = self.heap.alloc()?;
        self.heap.set_int(cell, value)?;
        self.push(Reg::S, cell)
    }

    // C <- cdr(C), for handlers with no inline operands.
    fn advance(&mut self) -> Result<()> {
        self.c = self.heap.cdr(self.c)?;
        Ok(())
    }

    // Lay out `code` as a cons chain rooted in C, `stack` likewise in
    // S, and mark the machine runnable.
    pub fn load_program(&mut self, code: &[Expr], stack: &[Expr]) -> Result<()> {
        let program = self.heap.alloc()?;
        self.heap.store_list(program, code)?;
        self.c = program;

        self.heap.store_list(self.s, stack)?;
        self.running = true;
        Ok(())
    }

    // Decoded view of the top of S.
    pub fn peek(&self) -> Result<Expr> {
        let top = self.heap.car(self.s)?;
        self.heap.decode(top)
    }

    // Overwrite the environment root with a host structure, for hosts
    // that want code to run against a preassembled environment.
    pub fn install_env(&mut self, env: &Expr) -> Result<()> {
        self.heap.store_tree(self.e, env)
    }

    // Run until STOP. Any fault along the way is final.
    pub fn run(&mut self) -> Result<()> {
        if !self.running {
            return Err(Error::Halted);
        }
        while self.running {
            self.step()?;
        }
        Ok(())
    }

    // Execute a single opcode. A fault leaves the machine dead.
    pub fn step(&mut self) -> Result<()> {
        if !self.running {
            return Err(Error::Halted);
        }

        let result = match self.fetch() {
            Ok(op) => {
                if self.debug {
                    eprintln!(
                        "step: {} S={} E={} C={} D={}",
                        op, self.s, self.e, self.c, self.d
                    );
                }
                self.dispatch(op)
            }
            Err(e) => Err(e),
        };

        if result.is_err() {
            self.running = false;
            if self.debug {
                eprintln!("{}", self.dump_registers());
            }
        }
        result
    }

    fn fetch(&self) -> Result<OpCode> {
        let addr = self.heap.car(self.c)?;
        self.heap.get_op(addr)
    }

    // The register snapshot, in post-mortem friendly form. C holds a
    // bare code address, so it is reported by address alone.
    pub fn dump_registers(&self) -> String {
        format!(
            "S: address = {} value: {}\n\
             E: address = {} value: {}\n\
             C: address = {} value: {}\n\
             D: address = {} value: {}\n",
            self.s,
            self.render(self.s),
            self.e,
            self.render(self.e),
            self.c,
            self.c,
            self.d,
            self.render(self.d),
        )
    }

    fn render(&self, addr: Addr) -> String {
        match self.heap.decode(addr) {
            Ok(value) => format!("{}", value),
            Err(e) => format!("<{}>", e),
        }
    }

    // The j-th element of the i-th frame of the environment rooted at
    // `env`. Both coordinates are 1-based; frame 1 is the most
    // recently pushed frame.
    fn locate(&self, i: i64, j: i64, env: Addr) -> Result<Addr> {
        let frame = self.nth(i, env)?;
        self.nth(j, frame)
    }

    fn nth(&self, mut y: i64, mut z: Addr) -> Result<Addr> {
        if y < 1 {
            return Err(Error::MalformedProgram(format!("bad coordinate {}", y)));
        }
        while y > 1 {
            z = self.heap.cdr(z)?;
            y -= 1;
        }
        self.heap.car(z)
    }

    // Dispatch table for the opcode alphabet.
    fn dispatch(&mut self, op: OpCode) -> Result<()> {
        match op {
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => self.arith(op),
            OpCode::Nil => self.nil(),
            OpCode::Cons => self.cons(),
            OpCode::Car => self.car(),
            OpCode::Cdr => self.cdr(),
            OpCode::Null => self.null(),
            OpCode::Ldc => self.ldc(),
            OpCode::Ld => self.ld(),
            OpCode::Ldf => self.ldf(),
            OpCode::Ap => self.ap(),
            OpCode::Rtn => self.rtn(),
            OpCode::Dum => self.dum(),
            OpCode::Rap => self.rap(),
            OpCode::Sel => self.sel(),
            OpCode::Join => self.join(),
            OpCode::Stop => self.stop(),
            OpCode::WriteI => self.writei(),
            OpCode::WriteC => self.writec(),
            OpCode::ReadI => self.readi(),
            OpCode::ReadC => Err(Error::MalformedProgram(
                String::from("READC is reserved and not implemented"),
            )),
            OpCode::ZeroP | OpCode::Gt0P | OpCode::Lt0P => self.predicate(op),
        }
    }

    // Integer arithmetic. The first value popped is the left operand;
    // the compiler emits arguments right to left to line this up.
    fn arith(&mut self, op: OpCode) -> Result<()> {
        let v1 = self.pop_int()?;
        let v2 = self.pop_int()?;

        let result = match op {
            OpCode::Add => v1 + v2,
            OpCode::Sub => v1 - v2,
            OpCode::Mul => v1 * v2,
            OpCode::Div => {
                if v2 == 0 {
                    return Err(Error::DivideByZero);
                }
                // Truncates toward zero.
                v1 / v2
            }
            _ => unreachable!(),
        };

        self.push_int(result)?;
        self.advance()
    }

    // Push the empty list.
    fn nil(&mut self) -> Result<()> {
        let cell = self.heap.alloc()?;
        self.heap.set_cons(cell, NIL_ADDR, NIL_ADDR)?;
        self.push(Reg::S, cell)?;
        self.advance()
    }

    // (x y . rest) becomes (cons(x, y) . rest): prepend x to the
    // list y.
    fn cons(&mut self) -> Result<()> {
        let x = self.heap.car(self.s)?;
        self.pop(Reg::S)?;
        let y = self.heap.car(self.s)?;
        self.pop(Reg::S)?;

        let pair = self.heap.alloc()?;
        self.heap.set_cons(pair, x, y)?;
        self.push(Reg::S, pair)?;
        self.advance()
    }

    // Replace the top of S with its car.
    fn car(&mut self) -> Result<()> {
        let list = self.heap.car(self.s)?;
        let value = self.heap.car(list)?;
        self.pop(Reg::S)?;
        self.push(Reg::S, value)?;
        self.advance()
    }

    // Replace the top of S with its cdr. The original head cell is
    // left untouched.
    fn cdr(&mut self) -> Result<()> {
        let list = self.heap.car(self.s)?;
        let value = self.heap.cdr(list)?;
        self.pop(Reg::S)?;
        self.push(Reg::S, value)?;
        self.advance()
    }

    // Push 1 if the top of S is the empty list, else 0. Does not pop.
    fn null(&mut self) -> Result<()> {
        let list = self.heap.car(self.s)?;
        let empty =
            self.heap.car(list)? == NIL_ADDR && self.heap.cdr(list)? == NIL_ADDR;
        self.push_int(empty as i64)?;
        self.advance()
    }

    // The next code cell is the operand, possibly a whole list; push
    // its address onto S.
    fn ldc(&mut self) -> Result<()> {
        let operand = self.heap.car(self.heap.cdr(self.c)?)?;
        self.push(Reg::S, operand)?;

        self.c = self.heap.cdr(self.c)?; // skip LDC
        self.c = self.heap.cdr(self.c)?; // skip the operand
        Ok(())
    }

    // The next code cell is an (i j) pair; push the value at those
    // environment coordinates.
    fn ld(&mut self) -> Result<()> {
        let ij = self.heap.car(self.heap.cdr(self.c)?)?;
        let i = self.heap.get_int(self.heap.car(ij)?)?;
        let j = self.heap.get_int(self.heap.car(self.heap.cdr(ij)?)?)?;

        let value = self.locate(i, j, self.e)?;
        self.push(Reg::S, value)?;

        self.c = self.heap.cdr(self.c)?; // skip LD
        self.c = self.heap.cdr(self.c)?; // skip (i j)
        Ok(())
    }

    // Build the closure (body E) and push it onto S. Execution starts
    // later, at an AP.
    fn ldf(&mut self) -> Result<()> {
        let body = self.heap.car(self.heap.cdr(self.c)?)?;

        let closure = self.heap.alloc()?;
        let tail = self.heap.alloc()?;
        let nil = self.heap.alloc()?;
        self.heap.set_cons(closure, body, tail)?;
        self.heap.set_cons(tail, self.e, nil)?;
        self.heap.set_cons(nil, NIL_ADDR, NIL_ADDR)?;

        self.push(Reg::S, closure)?;

        self.c = self.heap.cdr(self.c)?; // skip LDF
        self.c = self.heap.cdr(self.c)?; // skip the body
        Ok(())
    }

    // Apply the closure on top of S to the argument list beneath it.
    // The caller's stack remainder, environment and return point go
    // onto the dump; the callee starts with an empty stack and the
    // argument frame on top of the closure's environment.
    fn ap(&mut self) -> Result<()> {
        let closure = self.heap.car(self.s)?;
        let args = self.heap.car(self.heap.cdr(self.s)?)?;
        let rest = self.heap.cdr(self.heap.cdr(self.s)?)?;

        self.push(Reg::D, rest)?;
        let saved_e = self.e;
        self.push(Reg::D, saved_e)?;
        let ret = self.heap.cdr(self.c)?;
        self.push(Reg::D, ret)?;

        let body = self.heap.car(closure)?;
        let env = self.heap.car(self.heap.cdr(closure)?)?;

        let fresh = self.heap.alloc()?;
        self.heap.set_cons(fresh, NIL_ADDR, NIL_ADDR)?;
        self.s = fresh;

        let frame = self.heap.alloc()?;
        self.heap.set_cons(frame, args, env)?;
        self.e = frame;

        self.c = body;
        Ok(())
    }

    // Undo an AP: cons the single result onto the saved stack and
    // restore the saved environment and code pointer.
    fn rtn(&mut self) -> Result<()> {
        let result = self.heap.car(self.s)?;

        let saved_c = self.heap.car(self.d)?;
        let saved_e = self.heap.car(self.heap.cdr(self.d)?)?;
        let saved_s = self.heap.car(self.heap.cdr(self.heap.cdr(self.d)?)?)?;

        let head = self.heap.alloc()?;
        self.heap.set_cons(head, result, saved_s)?;
        self.s = head;
        self.e = saved_e;
        self.c = saved_c;

        self.pop(Reg::D)?; // C
        self.pop(Reg::D)?; // E
        self.pop(Reg::D)?; // S
        Ok(())
    }

    // Prepend the placeholder frame that RAP will patch: a cons whose
    // car is the raw nil pointer.
    fn dum(&mut self) -> Result<()> {
        let cell = self.heap.alloc()?;
        self.heap.set_cons(cell, NIL_ADDR, self.e)?;
        self.e = cell;
        self.advance()
    }

    // Recursive apply. Same stack shape as AP, but the argument list
    // (a list of closures whose environments already point at the
    // current E) is patched into the placeholder frame, closing the
    // letrec cycle. The environment saved on the dump is the pre-DUM
    // one.
    fn rap(&mut self) -> Result<()> {
        if self.heap.car(self.e)? != NIL_ADDR {
            return Err(Error::MalformedProgram(
                String::from("RAP without a DUM placeholder"),
            ));
        }

        let closure = self.heap.car(self.s)?;
        let args = self.heap.car(self.heap.cdr(self.s)?)?;
        let rest = self.heap.cdr(self.heap.cdr(self.s)?)?;

        self.push(Reg::D, rest)?;
        let saved_e = self.heap.cdr(self.e)?;
        self.push(Reg::D, saved_e)?;
        let ret = self.heap.cdr(self.c)?;
        self.push(Reg::D, ret)?;

        let body = self.heap.car(closure)?;

        // Patch the placeholder in place; E itself stays put.
        let e_tail = self.heap.cdr(self.e)?;
        self.heap.set_cons(self.e, args, e_tail)?;

        let fresh = self.heap.alloc()?;
        self.heap.set_cons(fresh, NIL_ADDR, NIL_ADDR)?;
        self.s = fresh;

        self.c = body;
        Ok(())
    }

    // Pop an integer off S and pick a branch. The address of the code
    // following the else branch goes onto the dump as an integer cell,
    // for JOIN to return to.
    fn sel(&mut self) -> Result<()> {
        let value = self.pop_int()?;

        let then_branch = self.heap.car(self.heap.cdr(self.c)?)?;
        let else_branch = self.heap.car(self.heap.cdr(self.heap.cdr(self.c)?)?)?;
        let join_target = self.heap.cdr(self.heap.cdr(self.heap.cdr(self.c)?)?)?;

        let cell = self.heap.alloc()?;
        self.heap.set_int(cell, join_target as i64)?;
        self.push(Reg::D, cell)?;

        self.c = if value != 0 { then_branch } else { else_branch };
        Ok(())
    }

    // Pop the join target off the dump and continue there.
    fn join(&mut self) -> Result<()> {
        let top = self.heap.car(self.d)?;
        let target = self.heap.get_int(top)?;
        self.pop(Reg::D)?;

        if target < 0 {
            return Err(Error::MalformedProgram(
                format!("bad join target {}", target),
            ));
        }
        self.c = target as Addr;
        Ok(())
    }

    // Clear the running flag. The dispatcher refuses to execute
    // anything further.
    fn stop(&mut self) -> Result<()> {
        self.running = false;
        trace!("machine halted");
        Ok(())
    }

    // Pop an integer, write its decimal form and a newline.
    fn writei(&mut self) -> Result<()> {
        let value = self.pop_int()?;
        writeln!(self.output, "{}", value).map_err(write_fault)?;
        self.output.flush().map_err(write_fault)?;
        self.advance()
    }

    // Pop an integer, write the character with that code point and a
    // newline.
    fn writec(&mut self) -> Result<()> {
        let value = self.pop_int()?;

        let ch = if 0 <= value && value <= i64::from(std::u32::MAX) {
            std::char::from_u32(value as u32)
        } else {
            None
        };
        let ch = match ch {
            Some(ch) => ch,
            None => return Err(Error::BadChar(value)),
        };

        writeln!(self.output, "{}", ch).map_err(write_fault)?;
        self.output.flush().map_err(write_fault)?;
        self.advance()
    }

    // Prompt for and push a decimal integer.
    fn readi(&mut self) -> Result<()> {
        lazy_static! {
            static ref INT_TOKEN: Regex = Regex::new("^-?[0-9]+$").unwrap();
        }

        write!(self.output, "? ").map_err(write_fault)?;
        self.output.flush().map_err(write_fault)?;

        let mut line = String::new();
        self.input.read_line(&mut line).map_err(read_fault)?;
        let token = line.trim();

        if !INT_TOKEN.is_match(token) {
            return Err(Error::ReadError(format!("not an integer: {:?}", token)));
        }
        let value = token
            .parse::<i64>()
            .map_err(|e| Error::ReadError(e.to_string()))?;

        self.push_int(value)?;
        self.advance()
    }

    // ZEROP/GT0P/LT0P inspect the integer on top of S without popping
    // it, and push 1 or 0.
    fn predicate(&mut self, op: OpCode) -> Result<()> {
        let top = self.heap.car(self.s)?;
        let value = self.heap.get_int(top)?;

        let result = match op {
            OpCode::ZeroP => value == 0,
            OpCode::Gt0P => value > 0,
            OpCode::Lt0P => value < 0,
            _ => unreachable!(),
        };

        self.push_int(result as i64)?;
        self.advance()
    }
}
