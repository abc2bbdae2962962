//! Bite optimization
//!
//! Two passes before code generation: constant folding over the additive
//! operators, and Sethi–Ullman register counting. Folding works on the raw
//! tagged words, which stay closed under addition and subtraction because
//! the integer tag bits are zero.

use crate::runtime::value::Value;

use super::ir::{BiteId, BiteOp, Bites};

fn const_word(b: &Bites, id: BiteId) -> Option<usize> {
    match *b.op(id) {
        BiteOp::Constant(w) if Value::from_raw(w).is_int() => Some(w),
        _ => None,
    }
}

fn fold_words(op: &BiteOp, lhs: usize, rhs: usize) -> usize {
    let l = Value::from_raw(lhs).as_int();
    let r = Value::from_raw(rhs).as_int();
    match op {
        BiteOp::Add(_, _) => Value::int(l.wrapping_add(r)).raw(),
        BiteOp::Sub(_, _) => Value::int(l.wrapping_sub(r)).raw(),
        _ => unreachable!("folding a non-additive op"),
    }
}

/// Fold constants bottom-up. All-literal `+`/`-` trees collapse to a single
/// `Constant`; a right-hand constant also merges through a chain of the
/// same operator, so `(+ x 1 2)` carries one combined addend.
pub fn fold_constants(b: &mut Bites, id: BiteId) -> BiteId {
    match b.op(id).clone() {
        BiteOp::Constant(_) | BiteOp::Parameter(_) => id,

        BiteOp::Add(lhs, rhs) | BiteOp::Sub(lhs, rhs) => {
            let lhs = fold_constants(b, lhs);
            let rhs = fold_constants(b, rhs);
            let op = b.op(id).clone();

            if let (Some(l), Some(r)) = (const_word(b, lhs), const_word(b, rhs)) {
                b.node_mut(id).op = BiteOp::Constant(fold_words(&op, l, r));
                return id;
            }

            // (x ± c1) ± c2 → x ± (c1 + c2): both chains accumulate their
            // right-hand constants additively.
            if let Some(c2) = const_word(b, rhs) {
                let same_kind = |candidate: &BiteOp| {
                    matches!(
                        (&op, candidate),
                        (BiteOp::Add(_, _), BiteOp::Add(_, _))
                            | (BiteOp::Sub(_, _), BiteOp::Sub(_, _))
                    )
                };
                if same_kind(b.op(lhs)) {
                    let (inner_lhs, inner_rhs) = match *b.op(lhs) {
                        BiteOp::Add(a, c) | BiteOp::Sub(a, c) => (a, c),
                        _ => unreachable!(),
                    };
                    if let Some(c1) = const_word(b, inner_rhs) {
                        let sum = Value::int(
                            Value::from_raw(c1)
                                .as_int()
                                .wrapping_add(Value::from_raw(c2).as_int()),
                        )
                        .raw();
                        b.node_mut(inner_rhs).op = BiteOp::Constant(sum);
                        rewrite_children(b, id, inner_lhs, inner_rhs);
                        return id;
                    }
                }
            }

            rewrite_children(b, id, lhs, rhs);
            id
        }

        BiteOp::Less(lhs, rhs) | BiteOp::Eq(lhs, rhs) => {
            let lhs = fold_constants(b, lhs);
            let rhs = fold_constants(b, rhs);
            rewrite_children(b, id, lhs, rhs);
            id
        }

        BiteOp::Neg(v) => {
            let v = fold_constants(b, v);
            b.node_mut(id).op = BiteOp::Neg(v);
            id
        }
        BiteOp::Ptr(v, disp) => {
            let v = fold_constants(b, v);
            b.node_mut(id).op = BiteOp::Ptr(v, disp);
            id
        }

        BiteOp::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let cond = fold_constants(b, cond);
            let then_branch = fold_constants(b, then_branch);
            let else_branch = fold_constants(b, else_branch);
            b.node_mut(id).op = BiteOp::If {
                cond,
                then_branch,
                else_branch,
            };
            id
        }

        BiteOp::Recurse(args) => {
            let args = args.into_iter().map(|a| fold_constants(b, a)).collect();
            b.node_mut(id).op = BiteOp::Recurse(args);
            id
        }
        BiteOp::Call { args, entry } => {
            let args = args.into_iter().map(|a| fold_constants(b, a)).collect();
            b.node_mut(id).op = BiteOp::Call { args, entry };
            id
        }
        BiteOp::Progn(args) => {
            let args = args.into_iter().map(|a| fold_constants(b, a)).collect();
            b.node_mut(id).op = BiteOp::Progn(args);
            id
        }
        BiteOp::WriteChar(args) => {
            let args = args.into_iter().map(|a| fold_constants(b, a)).collect();
            b.node_mut(id).op = BiteOp::WriteChar(args);
            id
        }
    }
}

fn rewrite_children(b: &mut Bites, id: BiteId, lhs: BiteId, rhs: BiteId) {
    let op = match b.op(id) {
        BiteOp::Add(_, _) => BiteOp::Add(lhs, rhs),
        BiteOp::Sub(_, _) => BiteOp::Sub(lhs, rhs),
        BiteOp::Less(_, _) => BiteOp::Less(lhs, rhs),
        BiteOp::Eq(_, _) => BiteOp::Eq(lhs, rhs),
        _ => unreachable!(),
    };
    b.node_mut(id).op = op;
}

/// Annotate every node with its Sethi–Ullman register requirement.
///
/// A right-hand constant that fits a 32-bit immediate costs nothing, and so
/// does a right-hand parameter (it can be a memory operand). Binary nodes
/// whose children tie need one extra register; otherwise the larger child
/// wins. `left_leaf` marks operands that must land in a register.
pub fn count_registers(b: &mut Bites, id: BiteId, left_leaf: bool) {
    let count = match b.op(id).clone() {
        BiteOp::Constant(w) => {
            // A word outside the signed 32-bit range cannot ride along as
            // an immediate operand and must be materialized in a register.
            let val = w as i64;
            if left_leaf || i32::try_from(val).is_err() {
                1
            } else {
                0
            }
        }
        BiteOp::Parameter(_) => u32::from(left_leaf),

        BiteOp::Add(lhs, rhs)
        | BiteOp::Sub(lhs, rhs)
        | BiteOp::Less(lhs, rhs)
        | BiteOp::Eq(lhs, rhs) => {
            count_registers(b, lhs, true);
            count_registers(b, rhs, false);
            let l = b.node(lhs).reg_count;
            let r = b.node(rhs).reg_count;
            if l == r {
                l + 1
            } else {
                l.max(r)
            }
        }

        BiteOp::Neg(v) | BiteOp::Ptr(v, _) => {
            count_registers(b, v, true);
            b.node(v).reg_count
        }

        BiteOp::If {
            cond,
            then_branch,
            else_branch,
        } => {
            count_registers(b, cond, true);
            count_registers(b, then_branch, true);
            count_registers(b, else_branch, true);
            b.node(cond)
                .reg_count
                .max(b.node(then_branch).reg_count)
                .max(b.node(else_branch).reg_count)
                .max(1)
        }

        BiteOp::Recurse(args)
        | BiteOp::Call { args, .. }
        | BiteOp::Progn(args)
        | BiteOp::WriteChar(args) => {
            let mut count = 1;
            for arg in args {
                count_registers(b, arg, true);
                count = count.max(b.node(arg).reg_count);
            }
            count
        }
    };
    b.node_mut(id).reg_count = count;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(b: &mut Bites, n: i64) -> BiteId {
        b.push(BiteOp::Constant(Value::int(n).raw()))
    }

    #[test]
    fn test_fold_binary_constants() {
        let mut b = Bites::new();
        let l = constant(&mut b, 2);
        let r = constant(&mut b, 3);
        let add = b.push(BiteOp::Add(l, r));

        let root = fold_constants(&mut b, add);
        assert!(matches!(b.op(root), BiteOp::Constant(w) if *w == Value::int(5).raw()));
    }

    #[test]
    fn test_nested_literals_fold_to_single_constant() {
        // (- (+ 1 (+ 2 3)) 4) => 2, with no Add/Sub left at the root.
        let mut b = Bites::new();
        let c2 = constant(&mut b, 2);
        let c3 = constant(&mut b, 3);
        let inner = b.push(BiteOp::Add(c2, c3));
        let c1 = constant(&mut b, 1);
        let mid = b.push(BiteOp::Add(c1, inner));
        let c4 = constant(&mut b, 4);
        let root = b.push(BiteOp::Sub(mid, c4));

        let root = fold_constants(&mut b, root);
        assert!(matches!(b.op(root), BiteOp::Constant(w) if *w == Value::int(2).raw()));
    }

    #[test]
    fn test_chain_merge_through_same_operator() {
        // (+ (+ x 1) 2) => (+ x 3)
        let mut b = Bites::new();
        let x = b.push(BiteOp::Parameter(0));
        let c1 = constant(&mut b, 1);
        let inner = b.push(BiteOp::Add(x, c1));
        let c2 = constant(&mut b, 2);
        let root = b.push(BiteOp::Add(inner, c2));

        let root = fold_constants(&mut b, root);
        let BiteOp::Add(lhs, rhs) = *b.op(root) else {
            panic!("expected Add");
        };
        assert!(matches!(b.op(lhs), BiteOp::Parameter(0)));
        assert!(matches!(b.op(rhs), BiteOp::Constant(w) if *w == Value::int(3).raw()));
    }

    #[test]
    fn test_sub_chain_accumulates() {
        // (- (- x 1) 2) => (- x 3)
        let mut b = Bites::new();
        let x = b.push(BiteOp::Parameter(0));
        let c1 = constant(&mut b, 1);
        let inner = b.push(BiteOp::Sub(x, c1));
        let c2 = constant(&mut b, 2);
        let root = b.push(BiteOp::Sub(inner, c2));

        let root = fold_constants(&mut b, root);
        let BiteOp::Sub(lhs, rhs) = *b.op(root) else {
            panic!("expected Sub");
        };
        assert!(matches!(b.op(lhs), BiteOp::Parameter(0)));
        assert!(matches!(b.op(rhs), BiteOp::Constant(w) if *w == Value::int(3).raw()));
    }

    #[test]
    fn test_register_count_leaves() {
        let mut b = Bites::new();
        let c = constant(&mut b, 7);
        count_registers(&mut b, c, false);
        assert_eq!(b.node(c).reg_count, 0);
        count_registers(&mut b, c, true);
        assert_eq!(b.node(c).reg_count, 1);

        let p = b.push(BiteOp::Parameter(0));
        count_registers(&mut b, p, false);
        assert_eq!(b.node(p).reg_count, 0);
        count_registers(&mut b, p, true);
        assert_eq!(b.node(p).reg_count, 1);
    }

    #[test]
    fn test_wide_constants_need_a_register() {
        let mut b = Bites::new();
        let c = constant(&mut b, 1 << 40);
        count_registers(&mut b, c, false);
        assert_eq!(b.node(c).reg_count, 1);
    }

    #[test]
    fn test_balanced_tree_counts_up() {
        // (a + b) + (c + d): each inner add needs 1, the tie bumps the root
        // to 2.
        let mut b = Bites::new();
        let a = b.push(BiteOp::Parameter(0));
        let b1 = b.push(BiteOp::Parameter(8));
        let c = b.push(BiteOp::Parameter(16));
        let d = b.push(BiteOp::Parameter(24));
        let l = b.push(BiteOp::Add(a, b1));
        let r = b.push(BiteOp::Add(c, d));
        let root = b.push(BiteOp::Add(l, r));

        count_registers(&mut b, root, false);
        assert_eq!(b.node(l).reg_count, 1);
        assert_eq!(b.node(r).reg_count, 1);
        assert_eq!(b.node(root).reg_count, 2);
    }

    #[test]
    fn test_right_memory_operand_is_free() {
        // (a + b) with b on the right costs one register total.
        let mut b = Bites::new();
        let a = b.push(BiteOp::Parameter(0));
        let b1 = b.push(BiteOp::Parameter(8));
        let root = b.push(BiteOp::Add(a, b1));
        count_registers(&mut b, root, false);
        assert_eq!(b.node(root).reg_count, 1);
    }
}
