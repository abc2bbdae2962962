//! End-to-end tests of the `kivi` binary: flag handling, REPL output, file
//! loading, and error reporting.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn kivi() -> Command {
    Command::cargo_bin("kivi").unwrap()
}

#[test]
fn test_evaluates_stdin() {
    kivi()
        .arg("-q")
        .write_stdin("(+ 1 2 3)\n")
        .assert()
        .success()
        .stdout("6\n");
}

#[test]
fn test_prints_each_toplevel_value() {
    kivi()
        .arg("-q")
        .write_stdin("1 (cons 1 2) 'x\n")
        .assert()
        .success()
        .stdout("1\n(1 . 2)\nx\n");
}

#[test]
fn test_multiline_expression() {
    kivi()
        .arg("-q")
        .write_stdin("(+ 1\n   2)\n")
        .assert()
        .success()
        .stdout("3\n");
}

#[test]
fn test_errors_go_to_stderr() {
    kivi()
        .arg("-q")
        .write_stdin("(car 5)\n")
        .assert()
        .success()
        .stdout("nil\n")
        .stderr(predicate::str::contains("error: not a list"));
}

#[test]
fn test_exit_terminates_cleanly() {
    kivi()
        .arg("-q")
        .write_stdin("(exit)\n(+ 1 1)\n")
        .assert()
        .success()
        .stdout("nil\n");
}

#[test]
fn test_loads_files_before_repl() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lib.lisp");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "(defun inc (n) (+ n 1))").unwrap();
    drop(f);

    kivi()
        .arg("-q")
        .arg(&path)
        .write_stdin("(inc 41)\n")
        .assert()
        .success()
        .stdout("42\n");
}

#[test]
fn test_banner_unless_quiet() {
    kivi()
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains("kivi"));
}

#[test]
fn test_bad_threshold_is_an_argument_error() {
    kivi().args(["-m", "0"]).assert().failure();
    kivi().args(["-m", "100"]).assert().failure();
    kivi().args(["-m", "not-a-number"]).assert().failure();
}

#[test]
fn test_gc_logging_flag() {
    // A tiny expression stream with -g should run fine whether or not a
    // collection happens to trigger.
    kivi()
        .args(["-q", "-g"])
        .write_stdin("(+ 1 2)\n")
        .assert()
        .success()
        .stdout("3\n");
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_compile_and_run_from_repl() {
    kivi()
        .arg("-q")
        .write_stdin(
            "(defun sum (n) (if (eq n 0) 0 (+ n (sum (- n 1)))))\n(compile sum)\n(sum 10)\n",
        )
        .assert()
        .success()
        .stdout(predicate::str::ends_with("t\n55\n"));
}
