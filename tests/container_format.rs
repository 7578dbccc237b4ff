//! Bit-exact container layout, constant round-tripping, and jump-offset
//! properties over compiled programs.

mod common;

use common::*;

use glyphcore::ast::{BinaryOp, Stmt};
use glyphcore::bytecode::optimizer::OptLevel;
use glyphcore::{BytecodeProgram, Compiler, Opcode, Value};

fn compile(body: Vec<Stmt>) -> std::sync::Arc<BytecodeProgram> {
    init_tracing();
    let mut compiler = Compiler::with_optimization(OptLevel::None);
    compiler
        .compile_route(&test_route(body))
        .expect("compilation should succeed")
}

#[test]
fn test_header_is_bit_exact() {
    let program = compile(vec![ret(int(1))]);
    let bytes = program.as_bytes();

    assert_eq!(&bytes[0..4], &[0x47, 0x4C, 0x59, 0x50]);
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 1);

    let constant_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    assert_eq!(constant_count as usize, program.constants().len());

    // Instruction count sits right before the code block
    let code_start = program.code_start();
    let declared =
        u32::from_le_bytes(bytes[code_start - 4..code_start].try_into().unwrap()) as usize;
    assert_eq!(declared, bytes.len() - code_start);
}

#[test]
fn test_serialized_constants_round_trip() {
    let program = compile(vec![
        assign("a", int(-7)),
        assign("b", float(2.75)),
        assign("c", string("héllo")),
        assign("d", boolean(true)),
        assign("e", null()),
        ret(var("a")),
    ]);

    let decoded = BytecodeProgram::from_bytes(program.as_bytes()).unwrap();
    assert_eq!(decoded.constants(), program.constants());
    assert_eq!(decoded.as_bytes(), program.as_bytes());

    // Every scalar shape survives
    let constants = decoded.constants();
    assert!(constants.contains(&Value::Int(-7)));
    assert!(constants.contains(&Value::Float(2.75)));
    assert!(constants.contains(&Value::string("héllo")));
    assert!(constants.contains(&Value::Bool(true)));
    assert!(constants.contains(&Value::Null));
}

/// Walk the instruction block, collecting each instruction's image offset
fn instruction_offsets(program: &BytecodeProgram) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut offset = program.code_start();
    while offset < program.len() {
        offsets.push(offset);
        let opcode = Opcode::from_byte(program.read_byte(offset).unwrap())
            .expect("compiled programs contain only assigned opcodes");
        offset += opcode.instruction_size();
    }
    offsets
}

#[test]
fn test_every_jump_lands_on_an_instruction_boundary() {
    let program = compile(vec![
        assign("n", int(0)),
        Stmt::While {
            condition: binary(BinaryOp::Lt, var("n"), int(3)),
            body: vec![
                Stmt::If {
                    condition: binary(BinaryOp::Eq, var("n"), int(1)),
                    then_block: vec![reassign("n", binary(BinaryOp::Add, var("n"), int(2)))],
                    else_block: Some(vec![reassign(
                        "n",
                        binary(BinaryOp::Add, var("n"), int(1)),
                    )]),
                },
            ],
        },
        ret(var("n")),
    ]);

    let boundaries = instruction_offsets(&program);
    let header = program.code_start();
    let mut jumps_seen = 0;

    for &offset in &boundaries {
        let opcode = Opcode::from_byte(program.read_byte(offset).unwrap()).unwrap();
        if !opcode.is_jump() {
            continue;
        }
        jumps_seen += 1;
        let target = program.read_u32(offset + 1).unwrap() as usize;

        // Absolute operands never point into the header
        assert!(target >= header, "jump into the header at {:04x}", offset);
        assert!(target <= program.len());
        // The absolute target and its block-relative form decode the same
        // instruction
        assert!(
            boundaries.contains(&target) || target == program.len(),
            "jump target {:04x} is not an instruction boundary",
            target
        );
        assert_eq!(
            program.read_byte(target),
            program.code().get(target - header).copied()
        );
    }
    assert!(jumps_seen >= 4, "loop + branch should emit several jumps");
}

#[test]
fn test_identical_input_compiles_byte_identical() {
    let body = || {
        vec![
            assign("x", binary(BinaryOp::Mul, int(3), int(4))),
            Stmt::If {
                condition: binary(BinaryOp::Gt, var("x"), int(10)),
                then_block: vec![ret(string("big"))],
                else_block: Some(vec![ret(string("small"))]),
            },
        ]
    };
    for level in [OptLevel::None, OptLevel::Basic, OptLevel::Aggressive] {
        let mut a = Compiler::with_optimization(level);
        let mut b = Compiler::with_optimization(level);
        let pa = a.compile_route(&test_route(body())).unwrap();
        let pb = b.compile_route(&test_route(body())).unwrap();
        assert_eq!(pa.as_bytes(), pb.as_bytes(), "nondeterminism at {:?}", level);
    }
}

#[test]
fn test_disassembly_of_compiled_route() {
    let program = compile(vec![
        assign("greeting", string("hello")),
        ret(var("greeting")),
    ]);
    let disasm = program.disassemble();
    assert!(disasm.contains("store_var"));
    assert!(disasm.contains("load_var"));
    assert!(disasm.contains("return"));
    assert!(disasm.contains("\"hello\""));
}
