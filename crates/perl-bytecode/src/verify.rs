//! Stack-map verification of listed method bodies.
//!
//! Recomputes the operand-stack depth at every reachable instruction. A
//! method is rejected when two paths reach the same instruction with
//! different depths, when a pop underflows, or when a jump leaves the
//! body. This is the execution engine's stack-map mechanism: the emitter's
//! spill discipline (empty stack at statement-level join labels) is what
//! makes methods pass it.

use crate::op::Instr;
use thiserror::Error;

/// Verification failures; all indicate emitter bugs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerifyError {
    /// Two predecessors disagree about the stack depth at a join
    #[error("instruction {index}: join depth mismatch ({first} vs {second})")]
    JoinMismatch {
        /// Instruction index of the join
        index: usize,
        /// Depth recorded first
        first: usize,
        /// Conflicting depth
        second: usize,
    },
    /// An instruction pops more than the stack holds
    #[error("instruction {index}: stack underflow (depth {depth}, pops {pops})")]
    Underflow {
        /// Instruction index
        index: usize,
        /// Depth before the instruction
        depth: usize,
        /// How many operands it pops
        pops: usize,
    },
    /// A jump target is out of bounds
    #[error("instruction {index}: jump target {target} out of bounds")]
    BadTarget {
        /// Instruction index
        index: usize,
        /// The target
        target: u32,
    },
    /// Control can run off the end of the body
    #[error("control falls off the end of the method body")]
    FallsOffEnd,
}

/// Verifies a listed body; returns the maximum operand-stack depth.
pub fn verify(instrs: &[Instr]) -> Result<usize, VerifyError> {
    if instrs.is_empty() {
        return Err(VerifyError::FallsOffEnd);
    }
    let mut depths: Vec<Option<usize>> = vec![None; instrs.len()];
    let mut work = vec![(0usize, 0usize)];
    let mut max_depth = 0usize;

    while let Some((index, depth)) = work.pop() {
        if index >= instrs.len() {
            return Err(VerifyError::FallsOffEnd);
        }
        match depths[index] {
            Some(existing) => {
                if existing != depth {
                    return Err(VerifyError::JoinMismatch {
                        index,
                        first: existing,
                        second: depth,
                    });
                }
                continue;
            }
            None => depths[index] = Some(depth),
        }

        let instr = &instrs[index];
        let (pops, pushes) = instr.stack_effect();
        if depth < pops {
            return Err(VerifyError::Underflow { index, depth, pops });
        }
        let after = depth - pops + pushes;
        max_depth = max_depth.max(after);

        for target in instr.targets() {
            if target as usize >= instrs.len() {
                return Err(VerifyError::BadTarget { index, target });
            }
            // Every branching instruction has already consumed its
            // operands and pushes nothing, so branch edges carry the
            // post-instruction depth. PushHandler's catch target enters
            // with the depth at installation.
            work.push((target as usize, after));
        }

        if !instr.is_terminator() {
            if index + 1 >= instrs.len() {
                return Err(VerifyError::FallsOffEnd);
            }
            work.push((index + 1, after));
        }
    }
    Ok(max_depth)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::op::{BinCode, Instr};

    #[test]
    fn straight_line_ok() {
        let instrs = vec![
            Instr::PushInt(1),
            Instr::PushInt(2),
            Instr::Binary(BinCode::Add),
            Instr::MakeList(1),
            Instr::Return,
        ];
        assert_eq!(verify(&instrs), Ok(2));
    }

    #[test]
    fn branch_depths_agree() {
        // if-else with both arms leaving one value via a spill slot
        let instrs = vec![
            Instr::PushInt(1),
            Instr::JumpIfFalse(5),
            Instr::PushInt(10),
            Instr::StoreSpill(0),
            Instr::Jump(7),
            Instr::PushInt(20),
            Instr::StoreSpill(0),
            Instr::LoadSpill(0),
            Instr::MakeList(1),
            Instr::Return,
        ];
        assert!(verify(&instrs).is_ok());
    }

    #[test]
    fn join_mismatch_rejected() {
        // One path leaves a value on the stack, the other does not.
        let instrs = vec![
            Instr::PushInt(1),
            Instr::JumpIfFalse(3),
            Instr::PushInt(10),
            Instr::PushUndef,
            Instr::MakeList(1),
            Instr::Return,
        ];
        let err = verify(&instrs).unwrap_err();
        assert!(matches!(err, VerifyError::JoinMismatch { .. }));
    }

    #[test]
    fn underflow_rejected() {
        let instrs = vec![Instr::Pop, Instr::Return];
        assert!(matches!(verify(&instrs).unwrap_err(), VerifyError::Underflow { .. }));
    }

    #[test]
    fn fall_off_end_rejected() {
        let instrs = vec![Instr::PushUndef];
        assert!(matches!(verify(&instrs).unwrap_err(), VerifyError::FallsOffEnd));
    }

    #[test]
    fn bad_target_rejected() {
        let instrs = vec![Instr::Jump(17)];
        assert!(matches!(verify(&instrs).unwrap_err(), VerifyError::BadTarget { .. }));
    }
}
