// Graphviz rendering of heap structure: a record-shaped node per
// cell, edges from car/cdr fields. Strictly a debugging observer; it
// tolerates the cyclic structure letrec environments produce by
// keeping a visited set.

use crate::heap::{Addr, Cell, Heap, NIL_ADDR};
use std::collections::HashSet;


// A dot record label: "<f0> a|<f1> b|<f2> c".
fn record(fields: &[String]) -> String {
    fields
        .iter()
        .enumerate()
        .map(|(i, field)| format!("<f{}> {}", i, field))
        .collect::<Vec<String>>()
        .join("|")
}

fn node(out: &mut String, addr: Addr, fields: &[String]) {
    out.push_str(&format!(
        "node{} [shape=record, label=\"{}\"];",
        addr,
        record(fields)
    ));
}

fn edge(out: &mut String, from: Addr, field: usize, to: Addr) {
    out.push_str(&format!("node{}:f{} -> node{}:f0;", from, field, to));
}


// The digraph for the linked structure rooted at `addr`.
pub fn render(heap: &Heap, root: Addr) -> String {
    let mut out = String::from("digraph heap {rankdir=LR;");
    let mut seen = HashSet::new();
    walk(heap, root, &mut seen, &mut out);
    out.push('}');
    out
}

fn walk(heap: &Heap, addr: Addr, seen: &mut HashSet<Addr>, out: &mut String) {
    if addr == NIL_ADDR || !seen.insert(addr) {
        return;
    }

    match heap.get(addr) {
        Err(_) => {
            node(out, addr, &[addr.to_string(), String::from("unallocated")]);
        }
        Ok(Cell::Int(x)) => {
            node(out, addr, &[addr.to_string(), x.to_string()]);
        }
        Ok(Cell::Op(op)) => {
            node(out, addr, &[addr.to_string(), op.to_string()]);
        }
        Ok(Cell::Cons(car, cdr)) => {
            let car_label = if car == NIL_ADDR {
                String::from("nil")
            } else {
                format!("car {}", car)
            };
            let cdr_label = if cdr == NIL_ADDR {
                String::from("nil")
            } else {
                format!("cdr {}", cdr)
            };
            node(out, addr, &[addr.to_string(), car_label, cdr_label]);

            if car != NIL_ADDR {
                edge(out, addr, 1, car);
                walk(heap, car, seen, out);
            }
            if cdr != NIL_ADDR {
                edge(out, addr, 2, cdr);
                walk(heap, cdr, seen, out);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::sexp;

    fn stored(value: &Expr) -> (Heap, Addr) {
        let mut heap = Heap::new(1000);
        let root = heap.alloc().unwrap();
        heap.store_tree(root, value).unwrap();
        (heap, root)
    }

    #[test]
    fn test_single_integer() {
        let (heap, root) = stored(&Expr::Int(5));
        assert_eq!(
            render(&heap, root),
            format!(
                "digraph heap {{rankdir=LR;node{} [shape=record, label=\"<f0> {}|<f1> 5\"];}}",
                root, root
            )
        );
    }

    #[test]
    fn test_empty_list() {
        let (heap, root) = stored(&Expr::List(vec![]));
        assert!(render(&heap, root).contains(&format!(
            "node{} [shape=record, label=\"<f0> {}|<f1> nil|<f2> nil\"];",
            root, root
        )));
    }

    #[test]
    fn test_list_structure() {
        let (heap, root) = stored(&sexp![1, 2]);
        let dot = render(&heap, root);

        // One spine cell per element, one edge per non-nil field.
        assert!(dot.contains(&format!("node{}:f1 -> ", root)));
        assert!(dot.contains(&format!("node{}:f2 -> ", root)));
        assert!(dot.contains("|<f1> 1\"];"));
        assert!(dot.contains("|<f1> 2\"];"));
    }

    #[test]
    fn test_cycle_terminates() {
        let mut heap = Heap::new(1000);
        let val = heap.alloc().unwrap();
        heap.set_int(val, 7).unwrap();
        let knot = heap.alloc().unwrap();
        heap.set_cons(knot, val, knot).unwrap();

        let dot = render(&heap, knot);
        // The knot appears exactly once.
        assert_eq!(dot.matches("shape=record").count(), 2);
    }
}
