//! Latency benchmarks for the per-transaction work
//!
//! Covers the CPU-bound steps a task runs once its transaction is fetched:
//! router check, call data decode and record serialization.

use std::path::Path;

use alloy::primitives::{address, Address, Bytes, TxHash};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use routerwatch_ingestor::decoder::{decode_call, hex_to_bytes};
use routerwatch_ingestor::{AbiRegistry, PendingTransaction, RouterSet, SinkMessage};

const SWAP_CALLDATA: &str = "0x38ed17390000000000000000000000000000000000000000000000000de0b6b3a7640000000000000000000000000000000000000000000000000000000000000000000100000000000000000000000000000000000000000000000000000000000000a0000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb9226600000000000000000000000000000000000000000000000000000000677f50000000000000000000000000000000000000000000000000000000000000000002000000000000000000000000c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2000000000000000000000000a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

const UNISWAP_V2: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");

fn registry() -> AbiRegistry {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("abis/UniswapV2Router.json");
    AbiRegistry::load_file(path).expect("bundled ABI should load")
}

/// Benchmark call data decoding
fn bench_decode_call(c: &mut Criterion) {
    let registry = registry();
    let data = hex_to_bytes(SWAP_CALLDATA).unwrap();

    c.bench_function("decode_call", |b| {
        b.iter(|| black_box(decode_call(black_box(&registry), black_box(&data)).unwrap()))
    });
}

/// Benchmark the router membership check
fn bench_is_router(c: &mut Criterion) {
    let routers = RouterSet::defaults();
    let hit = Some(UNISWAP_V2);
    let miss = Some(Address::repeat_byte(0x42));

    c.bench_function("is_router_hit", |b| b.iter(|| black_box(routers.is_router(black_box(hit.as_ref())))));
    c.bench_function("is_router_miss", |b| b.iter(|| black_box(routers.is_router(black_box(miss.as_ref())))));
}

/// Benchmark JSON record formatting
fn bench_format_message(c: &mut Criterion) {
    let registry = registry();
    let data = hex_to_bytes(SWAP_CALLDATA).unwrap();
    let call = decode_call(&registry, &data).unwrap();
    let tx = PendingTransaction {
        hash: TxHash::repeat_byte(0x12),
        to: Some(UNISWAP_V2),
        input: Bytes::from(data),
    };
    let message = SinkMessage::decoded(&tx, &call);

    c.bench_function("format_message_json", |b| b.iter(|| black_box(message.to_json().unwrap())));
}

criterion_group!(benches, bench_decode_call, bench_is_router, bench_format_message);

criterion_main!(benches);
