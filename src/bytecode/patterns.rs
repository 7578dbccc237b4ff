//! Compilation of `match` expressions
//!
//! A match lowers to a chain of pattern tests. The scrutinee is stored once
//! in a synthetic local; each arm emits its checks, each check jumping to
//! the next arm on mismatch. Bindings a pattern introduces land in the
//! enclosing scope, so they are visible to both the guard and the body.
//! After the last arm a `push null` guarantees the match always yields a
//! value.

use smallvec::SmallVec;

use crate::ast::{FieldPattern, MatchArm, Pattern};
use crate::value::Value;

use super::compiler::{CompileResult, Compiler};
use super::opcodes::Opcode;
use super::program::JumpLabel;

/// Mismatch placeholders produced while testing one arm
type MismatchJumps = SmallVec<[JumpLabel; 4]>;

/// Compile `match scrutinee { arms }`, leaving the selected body's value
/// (or null) on the stack
pub(crate) fn compile_match(
    c: &mut Compiler,
    scrutinee: &crate::ast::Expr,
    arms: &[MatchArm],
) -> CompileResult<()> {
    c.compile_expr(scrutinee)?;
    let scrutinee_slot = c.define_synthetic("match");

    let mut end_jumps: SmallVec<[JumpLabel; 8]> = SmallVec::new();
    for arm in arms {
        let mut mismatches: MismatchJumps = SmallVec::new();
        compile_pattern(c, scrutinee_slot, &arm.pattern, &mut mismatches)?;

        if let Some(guard) = &arm.guard {
            c.compile_expr(guard)?;
            mismatches.push(c.builder.emit_jump(Opcode::JumpIfFalse));
        }

        c.compile_expr(&arm.body)?;
        end_jumps.push(c.builder.emit_jump(Opcode::Jump));

        // Mismatches fall through to the next arm (or the default null)
        for label in mismatches {
            c.builder.patch_jump(label);
        }
    }

    c.builder.emit_constant(Value::Null);
    for label in end_jumps {
        c.builder.patch_jump(label);
    }
    Ok(())
}

/// Emit the test-and-bind sequence for one pattern against the value stored
/// in `slot`
fn compile_pattern(
    c: &mut Compiler,
    slot: u32,
    pattern: &Pattern,
    mismatches: &mut MismatchJumps,
) -> CompileResult<()> {
    match pattern {
        Pattern::Literal(lit) => {
            c.builder.emit_with(Opcode::LoadVar, slot);
            c.builder.emit_constant(lit.to_value());
            c.builder.emit(Opcode::Eq);
            mismatches.push(c.builder.emit_jump(Opcode::JumpIfFalse));
            Ok(())
        }
        Pattern::Variable(name) => {
            c.builder.emit_with(Opcode::LoadVar, slot);
            let binding = c.define_local(name);
            c.builder.emit_with(Opcode::StoreVar, binding);
            Ok(())
        }
        Pattern::Wildcard => Ok(()),
        Pattern::Object(fields) => {
            for FieldPattern { key, pattern } in fields {
                c.builder.emit_with(Opcode::LoadVar, slot);
                c.builder.emit_constant(Value::string(key));
                c.builder.emit(Opcode::GetField);
                match pattern {
                    Some(subpattern) => {
                        let temp = c.define_synthetic("field");
                        compile_pattern(c, temp, subpattern, mismatches)?;
                    }
                    // Bare key binds the field value under the key's name
                    None => {
                        let binding = c.define_local(key);
                        c.builder.emit_with(Opcode::StoreVar, binding);
                    }
                }
            }
            Ok(())
        }
        Pattern::Array { elements, rest } => {
            for (i, subpattern) in elements.iter().enumerate() {
                c.builder.emit_with(Opcode::LoadVar, slot);
                c.builder.emit_constant(Value::Int(i as i64));
                c.builder.emit(Opcode::GetIndex);
                let temp = c.define_synthetic("elem");
                compile_pattern(c, temp, subpattern, mismatches)?;
            }
            if let Some(rest_name) = rest {
                c.builder.emit_with(Opcode::LoadVar, slot);
                let binding = c.define_local(rest_name);
                c.builder.emit_with(Opcode::StoreVar, binding);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{BinaryOp, Expr, FieldPattern, Literal, MatchArm, Pattern, Route, Stmt};
    use crate::bytecode::optimizer::OptLevel;
    use crate::bytecode::compiler::Compiler;
    use crate::bytecode::vm::Vm;
    use crate::value::Value;

    fn eval_match(scrutinee: Value, arms: Vec<MatchArm>) -> Value {
        let route = Route {
            method: "GET".to_string(),
            path: "/m".to_string(),
            injections: vec!["subject".to_string()],
            auth: None,
            body: vec![Stmt::Return(Expr::Match {
                scrutinee: Box::new(Expr::Variable("subject".to_string())),
                arms,
            })],
        };
        let mut compiler = Compiler::with_optimization(OptLevel::None);
        let program = compiler.compile_route(&route).expect("match compiles");
        let mut vm = Vm::new(program);
        vm.set_local("subject", scrutinee);
        vm.execute().expect("match executes")
    }

    fn lit_arm(lit: Literal, body: Expr) -> MatchArm {
        MatchArm {
            pattern: Pattern::Literal(lit),
            guard: None,
            body,
        }
    }

    #[test]
    fn test_first_matching_arm_wins() {
        let result = eval_match(
            Value::Int(2),
            vec![
                lit_arm(Literal::Int(1), Expr::Literal(Literal::String("one".into()))),
                lit_arm(Literal::Int(2), Expr::Literal(Literal::String("two".into()))),
                MatchArm {
                    pattern: Pattern::Wildcard,
                    guard: None,
                    body: Expr::Literal(Literal::String("other".into())),
                },
            ],
        );
        assert_eq!(result, Value::string("two"));
    }

    #[test]
    fn test_guard_failure_falls_to_next_arm() {
        let arms = vec![
            MatchArm {
                pattern: Pattern::Variable("n".to_string()),
                guard: Some(Expr::Binary {
                    op: BinaryOp::Gt,
                    lhs: Box::new(Expr::Variable("n".to_string())),
                    rhs: Box::new(Expr::Literal(Literal::Int(10))),
                }),
                body: Expr::Literal(Literal::String("big".into())),
            },
            MatchArm {
                pattern: Pattern::Variable("n".to_string()),
                guard: None,
                // Pattern bindings are visible to the body
                body: Expr::Variable("n".to_string()),
            },
        ];
        assert_eq!(eval_match(Value::Int(3), arms.clone()), Value::Int(3));
        assert_eq!(eval_match(Value::Int(30), arms), Value::string("big"));
    }

    #[test]
    fn test_nested_object_in_array_pattern() {
        // [{id: 7}, second] against [{id: 7}, "x"]
        let arms = vec![
            MatchArm {
                pattern: Pattern::Array {
                    elements: vec![
                        Pattern::Object(vec![FieldPattern {
                            key: "id".to_string(),
                            pattern: Some(Pattern::Literal(Literal::Int(7))),
                        }]),
                        Pattern::Variable("second".to_string()),
                    ],
                    rest: None,
                },
                guard: None,
                body: Expr::Variable("second".to_string()),
            },
            MatchArm {
                pattern: Pattern::Wildcard,
                guard: None,
                body: Expr::Literal(Literal::Null),
            },
        ];

        let matching = Value::array([
            Value::object([("id".to_string(), Value::Int(7))]),
            Value::string("x"),
        ]);
        assert_eq!(eval_match(matching, arms.clone()), Value::string("x"));

        let wrong_id = Value::array([
            Value::object([("id".to_string(), Value::Int(8))]),
            Value::string("x"),
        ]);
        assert_eq!(eval_match(wrong_id, arms), Value::Null);
    }

    #[test]
    fn test_rest_binds_whole_scrutinee() {
        let arms = vec![MatchArm {
            pattern: Pattern::Array {
                elements: vec![Pattern::Wildcard],
                rest: Some("tail".to_string()),
            },
            guard: None,
            body: Expr::Variable("tail".to_string()),
        }];
        let xs = Value::array([Value::Int(1), Value::Int(2)]);
        assert_eq!(eval_match(xs.clone(), arms), xs);
    }

    #[test]
    fn test_null_literal_pattern() {
        let arms = vec![
            lit_arm(Literal::Null, Expr::Literal(Literal::String("nothing".into()))),
            MatchArm {
                pattern: Pattern::Wildcard,
                guard: None,
                body: Expr::Literal(Literal::String("something".into())),
            },
        ];
        assert_eq!(eval_match(Value::Null, arms.clone()), Value::string("nothing"));
        assert_eq!(eval_match(Value::Int(0), arms), Value::string("something"));
    }
}
