use chromajit::{
    bank::Bank,
    lir::{arg::Arg, code::Code, inst::Inst, iterated_register_coalescing, opcode::Opcode},
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn move_chain(length: usize) -> Code {
    let mut code = Code::new();
    let block = code.add_block();
    let mut prev = code.new_tmp(Bank::GP);
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Move, &[Arg::new_imm(1), Arg::new_tmp(prev)]));
    for _ in 0..length {
        let next = code.new_tmp(Bank::GP);
        code.block_mut(block)
            .insts
            .push(Inst::new(Opcode::Move, &[Arg::new_tmp(prev), Arg::new_tmp(next)]));
        prev = next;
    }
    code.block_mut(block)
        .insts
        .push(Inst::new(Opcode::Ret64, &[Arg::new_tmp(prev)]));
    code
}

fn bench_coalescing(c: &mut Criterion) {
    // Small enough for the bit-matrix edge set.
    c.bench_function("irc_move_chain_256", |b| {
        b.iter(|| {
            let mut code = move_chain(256);
            iterated_register_coalescing(&mut code).unwrap();
            black_box(&code);
        })
    });

    // Large enough to switch to the packed-pair edge set.
    c.bench_function("irc_move_chain_1024", |b| {
        b.iter(|| {
            let mut code = move_chain(1024);
            iterated_register_coalescing(&mut code).unwrap();
            black_box(&code);
        })
    });
}

criterion_group!(benches, bench_coalescing);
criterion_main!(benches);
