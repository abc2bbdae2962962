//! Native-code execution tests. `compile` must agree with the interpreter
//! on every admitted function, and rejected functions must keep working
//! interpreted.

#![cfg(all(feature = "jit", unix, target_arch = "x86_64"))]

use kivi_engine::runtime::value::{NIL, TRUE};
use kivi_engine::{Runtime, RuntimeOptions};

fn rt() -> Runtime {
    Runtime::new(RuntimeOptions::default())
}

#[test]
fn test_compile_constant_function() {
    let mut rt = rt();
    rt.eval_str("(defun fortytwo () 42)");
    assert_eq!(rt.eval_str("(compile fortytwo)"), TRUE);
    assert_eq!(rt.eval_str("(fortytwo)").as_int(), 42);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compile_identity_and_negation() {
    let mut rt = rt();
    rt.eval_str("(defun ident (n) n)");
    rt.eval_str("(defun negate (n) (- n))");
    assert_eq!(rt.eval_str("(compile ident negate)"), TRUE);
    assert_eq!(rt.eval_str("(ident 99)").as_int(), 99);
    assert_eq!(rt.eval_str("(negate 5)").as_int(), -5);
    assert_eq!(rt.eval_str("(negate -5)").as_int(), 5);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_sum_matches_interpreter() {
    let mut rt = rt();
    rt.eval_str("(defun sum (n) (if (eq n 0) 0 (+ n (sum (- n 1)))))");
    let interpreted = rt.eval_str("(sum 10)").as_int();
    assert_eq!(interpreted, 55);

    assert_eq!(rt.eval_str("(compile sum)"), TRUE);
    assert_eq!(rt.eval_str("(sum 10)").as_int(), interpreted);
    assert_eq!(rt.eval_str("(sum 100)").as_int(), 5050);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_tail_recursion_counts_fast() {
    let mut rt = rt();
    rt.eval_str("(defun cnt (n acc) (if (eq n 0) acc (cnt (- n 1) (+ acc 1))))");
    assert_eq!(rt.eval_str("(cnt 1000 0)").as_int(), 1000);

    assert_eq!(rt.eval_str("(compile cnt)"), TRUE);
    // Recursion compiles to an in-frame jump; a million rounds is cheap.
    assert_eq!(rt.eval_str("(cnt 1000000 0)").as_int(), 1000000);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_fibonacci_uses_non_tail_calls() {
    let mut rt = rt();
    rt.eval_str("(defun fib (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))");
    let interpreted = rt.eval_str("(fib 15)").as_int();
    assert_eq!(interpreted, 610);

    assert_eq!(rt.eval_str("(compile fib)"), TRUE);
    assert_eq!(rt.eval_str("(fib 15)").as_int(), interpreted);
    assert_eq!(rt.eval_str("(fib 20)").as_int(), 6765);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_comparisons() {
    let mut rt = rt();
    rt.eval_str("(defun lt (a b) (< a b))");
    rt.eval_str("(defun same (a b) (eq a b))");
    assert_eq!(rt.eval_str("(compile lt same)"), TRUE);

    assert_eq!(rt.eval_str("(lt 1 2)"), TRUE);
    assert_eq!(rt.eval_str("(lt 2 1)"), NIL);
    assert_eq!(rt.eval_str("(lt -5 3)"), TRUE);
    assert_eq!(rt.eval_str("(same 7 7)"), TRUE);
    assert_eq!(rt.eval_str("(same 7 8)"), NIL);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_car_cdr() {
    let mut rt = rt();
    rt.eval_str("(defun first (p) (car p))");
    rt.eval_str("(defun rest (p) (cdr p))");
    assert_eq!(rt.eval_str("(compile first rest)"), TRUE);

    assert_eq!(rt.eval_str("(first (cons 1 2))").as_int(), 1);
    assert_eq!(rt.eval_str("(rest (cons 1 2))").as_int(), 2);
    assert_eq!(rt.eval_str("(first (list 7 8 9))").as_int(), 7);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_spill_heavy_expression() {
    let mut rt = rt();
    // Wide constants force every operand into a register; the balanced
    // tree then exceeds the four allocatable ones and spills.
    rt.eval_str(
        "(defun wide (a b c d e f g h)
           (+ (+ (+ (+ a 4294967296) (+ b 4294967296))
                 (+ (+ c 4294967296) (+ d 4294967296)))
              (+ (+ (+ e 4294967296) (+ f 4294967296))
                 (+ (+ g 4294967296) (+ h 4294967296)))))",
    );
    let interpreted = rt.eval_str("(wide 1 2 3 4 5 6 7 8)").as_int();
    assert_eq!(interpreted, 36 + 8 * 4294967296);

    assert_eq!(rt.eval_str("(compile wide)"), TRUE);
    assert_eq!(rt.eval_str("(wide 1 2 3 4 5 6 7 8)").as_int(), interpreted);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_function_calls_compiled_function() {
    let mut rt = rt();
    rt.eval_str("(defun double (n) (+ n n))");
    assert_eq!(rt.eval_str("(compile double)"), TRUE);
    // `double` resolves to an already-compiled callee in quad's body.
    rt.eval_str("(defun quad (n) (+ (double n) (double n)))");
    assert_eq!(rt.eval_str("(compile quad)"), TRUE);
    assert_eq!(rt.eval_str("(quad 10)").as_int(), 40);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_rejected_function_stays_interpreted() {
    let mut rt = rt();
    rt.eval_str("(defun pairup (a b) (cons a b))");
    // `cons` is outside the whitelist; compile declines quietly.
    assert_eq!(rt.eval_str("(compile pairup)"), NIL);
    assert!(rt.drain_errors().is_empty());

    assert_eq!(rt.eval_str("(car (pairup 1 2))").as_int(), 1);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compile_unknown_name_reports() {
    let mut rt = rt();
    assert_eq!(rt.eval_str("(compile nothing-here)"), NIL);
    assert!(matches!(
        rt.drain_errors().as_slice(),
        [kivi_engine::RuntimeError::UndefinedSymbol(n)] if n == "nothing-here"
    ));

    assert_eq!(rt.eval_str("(define notfn 5) (compile notfn)"), NIL);
    assert_eq!(
        rt.drain_errors(),
        vec![kivi_engine::RuntimeError::NotAFunction]
    );
}

#[test]
fn test_freeze_resolves_without_codegen() {
    let mut rt = rt();
    rt.eval_str("(defun inc (n) (+ n 1))");
    assert_eq!(rt.eval_str("(freeze inc)"), TRUE);
    // Still interpreted, body resolved in place.
    assert_eq!(rt.eval_str("(inc 41)").as_int(), 42);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_functions_survive_collections() {
    let mut rt = rt();
    rt.eval_str("(defun triple (n) (+ n n n))");
    assert_eq!(rt.eval_str("(compile triple)"), TRUE);
    assert_eq!(rt.eval_str("(triple 3)").as_int(), 9);

    // The function object moves; the code page does not.
    for _ in 0..50 {
        rt.eval_str("(list 1 2 3 4 5 6 7 8)");
    }
    rt.collect();
    assert_eq!(rt.eval_str("(triple 5)").as_int(), 15);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_compiled_arg_count_still_checked() {
    let mut rt = rt();
    rt.eval_str("(defun two (a b) (+ a b))");
    assert_eq!(rt.eval_str("(compile two)"), TRUE);
    assert_eq!(rt.eval_str("(two 1)"), NIL);
    assert!(matches!(
        rt.drain_errors().as_slice(),
        [kivi_engine::RuntimeError::ArgCountMismatch { expected: 2, actual: 1, .. }]
    ));
    assert_eq!(rt.eval_str("(two 20 22)").as_int(), 42);
}

#[test]
fn test_global_constants_resolve_into_code() {
    let mut rt = rt();
    rt.eval_str("(define offset 100)");
    rt.eval_str("(defun shifted (n) (+ n offset))");
    assert_eq!(rt.eval_str("(compile shifted)"), TRUE);
    assert_eq!(rt.eval_str("(shifted 1)").as_int(), 101);
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_jit_equivalence_over_inputs() {
    let mut rt = rt();
    rt.eval_str("(defun spec-i (n) (if (< n 10) (+ n 1) (- n 10)))");
    rt.eval_str("(defun spec-c (n) (if (< n 10) (+ n 1) (- n 10)))");
    assert_eq!(rt.eval_str("(compile spec-c)"), TRUE);

    for n in [-20i64, -1, 0, 1, 9, 10, 11, 1000, -1000] {
        let i = rt.eval_str(&format!("(spec-i {n})"));
        let c = rt.eval_str(&format!("(spec-c {n})"));
        assert_eq!(i, c, "diverged at n = {n}");
    }
    assert!(rt.drain_errors().is_empty());
}

#[test]
fn test_jit_free_unmaps_pages() {
    let mut rt = rt();
    rt.eval_str("(defun k () 1)");
    assert_eq!(rt.eval_str("(compile k)"), TRUE);
    rt.jit_free();
    // Teardown only; calling `k` afterwards would be invalid.
}
