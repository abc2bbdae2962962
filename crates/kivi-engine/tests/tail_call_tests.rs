//! Tail recursion runs in bounded native stack: `if` and `progn` hand the
//! winning expression back to the evaluator's dispatch loop instead of
//! recursing.

use kivi_engine::{Runtime, RuntimeOptions};

fn rt() -> Runtime {
    Runtime::new(RuntimeOptions::default())
}

#[test]
fn test_counting_loop() {
    let mut rt = rt();
    rt.eval_str("(defun cnt (n acc) (if (eq n 0) acc (cnt (- n 1) (+ acc 1))))");
    assert_eq!(rt.eval_str("(cnt 1000000 0)").as_int(), 1000000);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_tail_call_through_progn() {
    let mut rt = rt();
    rt.eval_str("(defun spin (n) (progn 0 (if (eq n 0) 'done (spin (- n 1)))))");
    let done = rt.intern("done");
    assert_eq!(rt.eval_str("(spin 100000)"), done);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_mutual_iteration_via_accumulator() {
    let mut rt = rt();
    rt.eval_str(
        "(defun sum-to (n acc) (if (eq n 0) acc (sum-to (- n 1) (+ acc n))))",
    );
    assert_eq!(rt.eval_str("(sum-to 10000 0)").as_int(), 50005000);
    assert!(rt.drain_errors().is_empty());
}

// Ten million rounds stays in constant native stack; slow under an
// unoptimized build, so opt-in.
#[test]
#[ignore]
fn test_ten_million_iterations() {
    let mut rt = rt();
    rt.eval_str("(defun loopy (n) (if (eq n 0) nil (loopy (- n 1))))");
    assert_eq!(rt.eval_str("(loopy 10000000)"), kivi_engine::runtime::value::NIL);
    assert!(rt.drain_errors().is_empty());
}
