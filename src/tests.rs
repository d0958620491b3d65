use crate::{
    bank::Bank,
    lir::{
        arg::Arg, code::Code, inst::Inst, iterated_register_coalescing,
        liveness_adapter::UnifiedTmpLivenessAdapter, opcode::Opcode, tmp::Tmp,
    },
    liveness::Liveness,
    move_constants::move_constants,
    opcode::Opcode as IrOpcode,
    procedure::Procedure,
    typ::Type,
    value::{Value, ValueData, ValueId},
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn assert_fully_colored(code: &Code) {
    for block in code.blocks.iter() {
        for inst in block.insts.iter() {
            inst.for_each_tmp(|tmp, _, _| {
                assert!(tmp.is_reg(), "{} left unallocated in `{}`", tmp, inst);
            });
        }
    }
}

fn assert_no_self_moves(code: &Code) {
    for block in code.blocks.iter() {
        for inst in block.insts.iter() {
            if matches!(inst.opcode, Opcode::Move | Opcode::MoveDouble)
                && inst.args[0].is_tmp()
                && inst.args[1].is_tmp()
            {
                assert_ne!(inst.args[0], inst.args[1], "self-move survived: `{}`", inst);
            }
        }
    }
}

fn restrict_gp_registers(code: &mut Code, k: usize) {
    let regs = code.regs_in_priority_order(Bank::GP)[..k].to_vec();
    code.set_regs_in_priority_order(Bank::GP, &regs);
}

#[test]
fn s1_trivial_coalesce() {
    init_logging();
    let mut code = Code::new();
    let block = code.add_block();
    let t0 = code.new_tmp(Bank::GP);
    let t1 = code.new_tmp(Bank::GP);
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Move, &[Arg::new_tmp(t0), Arg::new_tmp(t1)]));
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Ret64, &[Arg::new_tmp(t1)]));

    iterated_register_coalescing(&mut code).unwrap();

    assert_eq!(
        code.block(block).insts.len(),
        1,
        "the move must coalesce away"
    );
    let first_reg = code.regs_in_priority_order(Bank::GP)[0];
    assert_eq!(
        code.block(block).insts[0],
        Inst::new(Opcode::Ret64, &[Arg::new_tmp(Tmp::from_reg(first_reg))])
    );
}

#[test]
fn s2_forced_non_coalesce() {
    init_logging();
    let mut code = Code::new();
    let block = code.add_block();
    let t0 = code.new_tmp(Bank::GP);
    let t2 = code.new_tmp(Bank::GP);

    // t2 takes a copy of t0; t0 is then redefined while t2 is still live, so
    // the pair interferes and the move must not coalesce.
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Move, &[Arg::new_tmp(t0), Arg::new_tmp(t2)]));
    code.block_mut(block).insts.push(Inst::new(
        Opcode::Add64,
        &[Arg::new_tmp(t2), Arg::new_tmp(t0)],
    ));
    code.block_mut(block).insts.push(Inst::new(
        Opcode::Test64,
        &[Arg::new_tmp(t0), Arg::new_tmp(t2)],
    ));
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Ret64, &[Arg::new_tmp(t0)]));

    iterated_register_coalescing(&mut code).unwrap();

    let insts = &code.block(block).insts;
    assert_eq!(insts.len(), 4, "the move must survive");
    assert_eq!(insts[0].opcode, Opcode::Move);
    assert_ne!(
        insts[0].args[0], insts[0].args[1],
        "the move's endpoints need distinct registers"
    );
    assert_fully_colored(&code);
    assert_no_self_moves(&code);
}

#[test]
fn s3_briggs_cascade() {
    init_logging();
    let mut code = Code::new();
    restrict_gp_registers(&mut code, 3);
    let block = code.add_block();

    let x = code.new_tmp(Bank::GP);
    let y = code.new_tmp(Bank::GP);
    let z = code.new_tmp(Bank::GP);
    let b = code.new_tmp(Bank::GP);
    let a = code.new_tmp(Bank::GP);

    // Interference: x-y, x-z, y-z, b-x, b-y, a-x, a-y, with a move b -> a.
    // Combining a and b leaves the merged vertex with exactly two
    // high-degree neighbors (x and y), fewer than K = 3, so Briggs allows
    // the coalesce and the remaining graph is 3-colorable.
    let insts = vec![
        Inst::new(Opcode::Move, &[Arg::new_imm(1), Arg::new_tmp(x)]),
        Inst::new(Opcode::Move, &[Arg::new_imm(2), Arg::new_tmp(y)]),
        Inst::new(Opcode::Move, &[Arg::new_imm(3), Arg::new_tmp(z)]),
        Inst::new(Opcode::Test64, &[Arg::new_tmp(z), Arg::new_tmp(z)]),
        Inst::new(Opcode::Move, &[Arg::new_imm(4), Arg::new_tmp(b)]),
        Inst::new(Opcode::Move, &[Arg::new_tmp(b), Arg::new_tmp(a)]),
        Inst::new(Opcode::Test64, &[Arg::new_tmp(a), Arg::new_tmp(x)]),
        Inst::new(Opcode::Test64, &[Arg::new_tmp(y), Arg::new_tmp(b)]),
        Inst::new(Opcode::Oops, &[]),
    ];
    code.block_mut(block).insts = insts;

    iterated_register_coalescing(&mut code).unwrap();

    assert_eq!(
        code.block(block).insts.len(),
        8,
        "the b -> a move must coalesce away"
    );
    assert!(code.stack_slots.is_empty(), "nothing may spill");
    assert_fully_colored(&code);
    assert_no_self_moves(&code);
}

#[test]
fn s4_spill_and_restart() {
    init_logging();
    let mut code = Code::new();
    restrict_gp_registers(&mut code, 3);
    let block = code.add_block();

    // K + 1 mutually live temporaries, none move-related.
    let tmps: Vec<Tmp> = (0..4).map(|_| code.new_tmp(Bank::GP)).collect();
    for (i, &tmp) in tmps.iter().enumerate() {
        code.block_mut(block).insts.push(Inst::new(
            Opcode::Move,
            &[Arg::new_imm(i as i64), Arg::new_tmp(tmp)],
        ));
    }
    code.block_mut(block).insts.push(Inst::new(
        Opcode::Test64,
        &[Arg::new_tmp(tmps[0]), Arg::new_tmp(tmps[1])],
    ));
    code.block_mut(block).insts.push(Inst::new(
        Opcode::Test64,
        &[Arg::new_tmp(tmps[2]), Arg::new_tmp(tmps[3])],
    ));
    code.block_mut(block).insts.push(Inst::new(Opcode::Oops, &[]));

    iterated_register_coalescing(&mut code).unwrap();

    assert_eq!(code.stack_slots.len(), 1, "exactly one temporary spills");
    assert!(code.stack_slots[0].is_spill());
    assert_eq!(code.stack_slots[0].byte_size(), 8);

    // Both of the spilled tmp's accesses admitted a memory operand, so they
    // were rewritten to direct stack references.
    let stack_args: usize = code
        .block(block)
        .insts
        .iter()
        .map(|inst| inst.args.iter().filter(|arg| arg.is_stack()).count())
        .sum();
    assert_eq!(stack_args, 2);
    assert_fully_colored(&code);
}

#[test]
fn spill_inserts_fill_through_fresh_tmp() {
    init_logging();
    let mut code = Code::new();
    restrict_gp_registers(&mut code, 2);
    let block = code.add_block();

    let t0 = code.new_tmp(Bank::GP);
    let t1 = code.new_tmp(Bank::GP);
    let t2 = code.new_tmp(Bank::GP);
    let insts = vec![
        Inst::new(Opcode::Move, &[Arg::new_imm(1), Arg::new_tmp(t0)]),
        Inst::new(Opcode::Move, &[Arg::new_imm(2), Arg::new_tmp(t1)]),
        Inst::new(Opcode::Move, &[Arg::new_imm(3), Arg::new_tmp(t2)]),
        Inst::new(Opcode::Test64, &[Arg::new_tmp(t1), Arg::new_tmp(t2)]),
        // Ret64 does not admit a memory operand, so the spilled t0 must be
        // filled into a fresh temporary right before it.
        Inst::new(Opcode::Ret64, &[Arg::new_tmp(t0)]),
    ];
    code.block_mut(block).insts = insts;

    iterated_register_coalescing(&mut code).unwrap();

    assert_eq!(code.stack_slots.len(), 1);
    let insts = &code.block(block).insts;
    assert_eq!(insts.len(), 6);
    let fill = &insts[4];
    assert_eq!(fill.opcode, Opcode::Move);
    assert!(fill.args[0].is_stack());
    assert!(fill.args[1].is_reg());
    assert_eq!(insts[5].opcode, Opcode::Ret64);
    assert_eq!(insts[5].args[0], fill.args[1]);
    assert_fully_colored(&code);
    assert_no_self_moves(&code);
}

#[test]
fn coalesce_with_precolored_source() {
    init_logging();
    let mut code = Code::new();
    let block = code.add_block();
    let rax = Tmp::from_reg(code.regs_in_priority_order(Bank::GP)[0]);
    let t = code.new_tmp(Bank::GP);
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Move, &[Arg::new_tmp(rax), Arg::new_tmp(t)]));
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Ret64, &[Arg::new_tmp(t)]));

    iterated_register_coalescing(&mut code).unwrap();

    assert_eq!(code.block(block).insts.len(), 1);
    assert_eq!(
        code.block(block).insts[0],
        Inst::new(Opcode::Ret64, &[Arg::new_tmp(rax)])
    );
}

#[test]
fn dead_tmp_gets_first_register() {
    init_logging();
    let mut code = Code::new();
    let block = code.add_block();
    let t = code.new_tmp(Bank::GP);
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Move, &[Arg::new_imm(1), Arg::new_tmp(t)]));
    code.block_mut(block).insts.push(Inst::new(Opcode::Oops, &[]));

    iterated_register_coalescing(&mut code).unwrap();

    let first_reg = code.regs_in_priority_order(Bank::GP)[0];
    assert_eq!(
        code.block(block).insts[0].args[1],
        Arg::new_tmp(Tmp::from_reg(first_reg))
    );
}

#[test]
fn bank_isolation() {
    init_logging();
    let mut code = Code::new();
    let block = code.add_block();
    let p = code.new_tmp(Bank::GP);
    let q = code.new_tmp(Bank::GP);
    let f0 = code.new_tmp(Bank::FP);
    let f1 = code.new_tmp(Bank::FP);

    let insts = vec![
        Inst::new(Opcode::Move, &[Arg::new_imm(0x1000), Arg::new_tmp(p)]),
        Inst::new(Opcode::MoveDouble, &[Arg::new_addr(p, 0), Arg::new_tmp(f0)]),
        Inst::new(Opcode::MoveDouble, &[Arg::new_addr(p, 8), Arg::new_tmp(f1)]),
        Inst::new(Opcode::AddDouble, &[Arg::new_tmp(f0), Arg::new_tmp(f1)]),
        Inst::new(Opcode::MoveDouble, &[Arg::new_tmp(f1), Arg::new_addr(p, 16)]),
        Inst::new(Opcode::Lea64, &[Arg::new_addr(p, 24), Arg::new_tmp(q)]),
        Inst::new(Opcode::Ret64, &[Arg::new_tmp(q)]),
    ];
    code.block_mut(block).insts = insts;

    iterated_register_coalescing(&mut code).unwrap();

    assert_fully_colored(&code);
    for inst in code.block(block).insts.iter() {
        inst.for_each_tmp(|tmp, _, bank| match bank {
            Bank::GP => assert!(tmp.reg().is_gpr(), "{} must be a GPR in `{}`", tmp, inst),
            Bank::FP => assert!(tmp.reg().is_fpr(), "{} must be an FPR in `{}`", tmp, inst),
        });
    }
}

#[test]
fn idempotent_on_colored_program() {
    init_logging();
    let mut code = Code::new();
    let block = code.add_block();
    let t0 = code.new_tmp(Bank::GP);
    let t2 = code.new_tmp(Bank::GP);
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Move, &[Arg::new_tmp(t0), Arg::new_tmp(t2)]));
    code.block_mut(block).insts.push(Inst::new(
        Opcode::Add64,
        &[Arg::new_tmp(t2), Arg::new_tmp(t0)],
    ));
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Ret64, &[Arg::new_tmp(t0)]));

    iterated_register_coalescing(&mut code).unwrap();
    let first = code.to_string();
    iterated_register_coalescing(&mut code).unwrap();
    assert_eq!(code.to_string(), first);
}

#[test]
fn liveness_across_blocks() {
    let mut code = Code::new();
    let b0 = code.add_block();
    let b1 = code.add_block();
    let t = code.new_tmp(Bank::GP);
    code.block_mut(b0)
        .insts
        .push(Inst::new(Opcode::Move, &[Arg::new_imm(1), Arg::new_tmp(t)]));
    code.block_mut(b0).insts.push(Inst::new(Opcode::Jump, &[]));
    code.block_mut(b0).successors.push(b1);
    code.block_mut(b1)
        .insts
        .push(Inst::new(Opcode::Ret64, &[Arg::new_tmp(t)]));
    code.reset_reachability();

    let index = t.linear_index(&code);
    let mut adapter = UnifiedTmpLivenessAdapter::new(&code);
    let mut liveness = Liveness::new(&mut adapter);
    liveness.compute();

    assert!(liveness.raw_live_at_head(b1).contains(&index));
    assert!(liveness.raw_live_at_tail(b0).contains(&index));
    assert!(
        liveness.raw_live_at_head(b0).is_empty(),
        "t is defined in BB0, so nothing is live into it"
    );
}

#[test]
fn s5_constant_motion_dedup() {
    init_logging();
    let mut proc = Procedure::new();
    let block = proc.add_block();
    let pi = proc.add_to_block(
        block,
        Value::new(
            IrOpcode::ConstDouble,
            Type::Double,
            &[],
            ValueData::ConstDouble(3.14),
        ),
    );
    let u1 = proc.add_to_block(
        block,
        Value::new(IrOpcode::Add, Type::Double, &[pi, pi], ValueData::None),
    );
    let u2 = proc.add_to_block(
        block,
        Value::new(IrOpcode::Add, Type::Double, &[u1, pi], ValueData::None),
    );
    proc.add_to_block(
        block,
        Value::new(IrOpcode::Return, Type::Void, &[u2], ValueData::None),
    );

    move_constants(&mut proc);

    assert_eq!(proc.data_sections.len(), 1);
    assert_eq!(proc.data_section(0).size(), 8);
    assert_eq!(
        proc.data_section(0).read_i64(0),
        (3.14f64).to_bits() as i64
    );

    let kinds_of = |proc: &Procedure, kind: IrOpcode| -> Vec<ValueId> {
        proc.block(block)
            .values
            .iter()
            .copied()
            .filter(|&id| proc.value(id).kind == kind)
            .collect()
    };

    let loads = kinds_of(&proc, IrOpcode::Load);
    assert_eq!(loads.len(), 1, "exactly one materialization per block");
    let bases = kinds_of(&proc, IrOpcode::Const64);
    assert_eq!(bases.len(), 1, "the table base materializes once too");

    assert_eq!(proc.value(pi).kind, IrOpcode::Nop);
    let load = loads[0];
    assert_eq!(proc.value(load).memory_offset(), Some(0));
    assert_eq!(proc.value(load).children[0], bases[0]);
    assert_eq!(proc.value(u1).children[0], load);
    assert_eq!(proc.value(u1).children[1], load);
    assert_eq!(proc.value(u2).children[1], load);

    // Dependencies sit before their first user.
    let position = |id: ValueId| {
        proc.block(block)
            .values
            .iter()
            .position(|&value| value == id)
            .unwrap()
    };
    assert!(position(bases[0]) < position(load));
    assert!(position(load) < position(u1));
}

#[test]
fn s6_constant_motion_zero() {
    init_logging();
    let mut proc = Procedure::new();
    let block = proc.add_block();
    let zero = proc.add_to_block(
        block,
        Value::new(
            IrOpcode::ConstDouble,
            Type::Double,
            &[],
            ValueData::ConstDouble(0.0),
        ),
    );
    let u1 = proc.add_to_block(
        block,
        Value::new(IrOpcode::Add, Type::Double, &[zero, zero], ValueData::None),
    );
    let u2 = proc.add_to_block(
        block,
        Value::new(IrOpcode::Add, Type::Double, &[u1, zero], ValueData::None),
    );
    proc.add_to_block(
        block,
        Value::new(IrOpcode::Return, Type::Void, &[u2], ValueData::None),
    );

    move_constants(&mut proc);

    // Zero never goes in the table; it rematerializes inline, once.
    assert_eq!(proc.data_section(0).size(), 0);
    let doubles: Vec<ValueId> = proc
        .block(block)
        .values
        .iter()
        .copied()
        .filter(|&id| proc.value(id).kind == IrOpcode::ConstDouble)
        .collect();
    assert_eq!(doubles.len(), 1);
    let materialized = doubles[0];
    assert_ne!(materialized, zero);
    assert_eq!(proc.value(materialized).as_double(), Some(0.0));
    assert_eq!(proc.value(zero).kind, IrOpcode::Nop);
    assert_eq!(proc.value(u1).children[0], materialized);
    assert_eq!(proc.value(u2).children[1], materialized);
}

#[test]
fn constant_motion_integer_policy() {
    init_logging();
    let mut proc = Procedure::new();
    let block = proc.add_block();
    let small = proc.add_to_block(
        block,
        Value::new(
            IrOpcode::Const64,
            Type::Int64,
            &[],
            ValueData::Const64(42),
        ),
    );
    let big = proc.add_to_block(
        block,
        Value::new(
            IrOpcode::Const64,
            Type::Int64,
            &[],
            ValueData::Const64(1 << 40),
        ),
    );
    let sum = proc.add_to_block(
        block,
        Value::new(IrOpcode::Add, Type::Int64, &[small, big], ValueData::None),
    );
    proc.add_to_block(
        block,
        Value::new(IrOpcode::Return, Type::Void, &[sum], ValueData::None),
    );

    move_constants(&mut proc);

    // 32-bit-representable integers stay put.
    assert_eq!(proc.value(small).kind, IrOpcode::Const64);
    assert_eq!(proc.value(sum).children[0], small);

    // Large integers move, but per block rather than into the table.
    assert_eq!(proc.data_section(0).size(), 0);
    assert_eq!(proc.value(big).kind, IrOpcode::Nop);
    let replacement = proc.value(sum).children[1];
    assert_ne!(replacement, big);
    assert_eq!(proc.value(replacement).as_int(), Some(1 << 40));
}
