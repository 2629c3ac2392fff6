//! Performance benchmarks for token validation.
//!
//! Run with: `cargo bench --bench validation`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Metadata parse | <2µs | One SEND with 19 outputs |
//! | Graph walk | Linear in chain length | All transactions local |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

use slp_dag_validator::validator::DecideContext;
use slp_dag_validator::{
    Address, OutPoint, TokenGraph, TokenMessage, TokenType, Transaction, TxId, TxInput, TxOutput, Validator,
    Validity,
};

fn make_tx(txid: u128, spends: Option<(u128, u32)>, msg: &TokenMessage, n_outputs: usize) -> Arc<Transaction> {
    let inputs = spends
        .map(|(t, v)| TxInput::new(OutPoint::new(TxId::from_u128(t), v)))
        .into_iter()
        .collect();
    let mut outputs = vec![TxOutput::op_return(msg.to_script())];
    for i in 1..n_outputs {
        outputs.push(TxOutput::to_address(Address::p2pkh([i as u8; 20]), 546));
    }
    Arc::new(Transaction::new(TxId::from_u128(txid), inputs, outputs))
}

/// GENESIS followed by `len` single-output SENDs, target last.
fn make_chain(len: usize) -> Vec<Arc<Transaction>> {
    let token = 1u128;
    let mut chain = vec![make_tx(token, Some((0xf00, 0)), &TokenMessage::genesis(TokenType::Fungible, 0, None, 1_000), 2)];
    for i in 0..len as u128 {
        let msg = TokenMessage::send(TokenType::Fungible, TxId::from_u128(token), vec![1_000]);
        chain.push(make_tx(token + i + 1, Some((token + i, 1)), &msg, 2));
    }
    chain
}

fn bench_parse(c: &mut Criterion) {
    let msg = TokenMessage::send(TokenType::Fungible, TxId::from_u128(1), (1..=19).collect());
    let script = msg.to_script();
    c.bench_function("parse_send_19", |b| {
        b.iter(|| TokenMessage::parse(black_box(&script)).map(|m| m.send_total()))
    });
}

fn bench_graph_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_walk");

    for len in [10, 100, 1_000] {
        let chain = make_chain(len);
        group.throughput(Throughput::Elements(chain.len() as u64));
        group.bench_with_input(BenchmarkId::new("chain", len), &chain, |b, chain| {
            b.iter(|| {
                let mut graph = TokenGraph::new(Validator::for_token(TxId::from_u128(1), TokenType::Fungible));
                let target = chain[chain.len() - 1].txid();
                graph.set_targets(&[target]).unwrap();
                let mut ctx = DecideContext::default();
                for tx in chain.iter().rev() {
                    graph.load_tx(tx.txid(), tx, None).unwrap();
                    graph.run_sched(&mut ctx).unwrap();
                }
                assert_eq!(graph.validity(&target), Validity::Valid);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse, bench_graph_walk);
criterion_main!(benches);
