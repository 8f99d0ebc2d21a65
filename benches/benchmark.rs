use criterion::{Criterion, criterion_group, criterion_main};
use order_book_engine::engine::MatchingEngine;
use order_book_engine::orders::{Order, OrderType, Side};
use rust_decimal::Decimal;
use uuid::Uuid;

fn setup_engine(depth: u64, orders_per_level: u64) -> MatchingEngine {
    let (mut engine, _price_rx) = MatchingEngine::new(Decimal::ZERO);
    for price in 1..=depth {
        let price = Decimal::from(price);
        for _ in 0..orders_per_level {
            engine.add_order(Order::new(Uuid::new_v4(), Side::Sell, OrderType::Limit, Some(price), Decimal::ONE));
            engine.add_order(Order::new(Uuid::new_v4(), Side::Buy, OrderType::Limit, Some(price), Decimal::ONE));
        }
    }
    engine
}

fn bench_match_order(c: &mut Criterion) {
    let depth = 100;
    let orders_per_level = 10;

    c.bench_function("match 1 market order", |b| {
        b.iter_batched(
            || setup_engine(depth, orders_per_level),
            |mut engine| {
                let qty = Decimal::from(depth * orders_per_level / 2);
                let market_buy = Order::new(Uuid::new_v4(), Side::Buy, OrderType::Market, None, qty);
                engine.add_order(market_buy);
            },
            criterion::BatchSize::LargeInput,
        )
    });

    c.bench_function("match 1 limit crossing order", |b| {
        b.iter_batched(
            || setup_engine(depth, orders_per_level),
            |mut engine| {
                let price = Decimal::from(depth / 2);
                let qty = Decimal::from(depth * orders_per_level);
                let limit_sell = Order::new(Uuid::new_v4(), Side::Sell, OrderType::Limit, Some(price), qty);
                engine.add_order(limit_sell);
            },
            criterion::BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_match_order);
criterion_main!(benches);
