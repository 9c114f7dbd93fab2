use std::sync::Arc;

use common::{Money, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    BroadcastHub, CartService, CatalogService, CheckoutRequest, InMemoryJobQueue, OrderService,
    ProductInput, ServiceSettings,
};
use store::{InMemoryStore, model::PaymentMethod};

fn request(cart_items: Vec<common::CartItemId>) -> CheckoutRequest {
    CheckoutRequest {
        cart_items,
        payment_method: Some(PaymentMethod::Card),
        recipient_name: "Bench".to_string(),
        recipient_phone: "0100000000".to_string(),
        shipping_address1: "1 Bench Way".to_string(),
        shipping_zip_code: "00000".to_string(),
        ..CheckoutRequest::default()
    }
}

fn bench_checkout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let settings = ServiceSettings::default();
    let catalog = CatalogService::new(store.clone(), Arc::new(BroadcastHub::default()), &settings);
    let cart = CartService::new(store.clone(), queue.clone(), settings.low_stock_threshold);
    let orders = OrderService::new(store.clone(), queue.clone());

    let product = rt.block_on(async {
        catalog
            .create_product(ProductInput::new(
                "Bench Widget",
                Money::from_minor(1_000),
                u32::MAX,
            ))
            .await
            .unwrap()
    });

    c.bench_function("domain/add_then_checkout", |b| {
        b.iter(|| {
            rt.block_on(async {
                let user = UserId::new();
                let line = cart.add_or_increment(user, product.id, 2).await.unwrap();
                orders
                    .checkout(user, request(vec![line.id]))
                    .await
                    .unwrap();
            });
        });
    });

    rt.block_on(queue.drain());
}

fn bench_cart_summary(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let queue = Arc::new(InMemoryJobQueue::new());
    let settings = ServiceSettings::default();
    let catalog = CatalogService::new(store.clone(), Arc::new(BroadcastHub::default()), &settings);
    let cart = CartService::new(store.clone(), queue, settings.low_stock_threshold);
    let user = UserId::new();

    rt.block_on(async {
        for i in 0..20 {
            let product = catalog
                .create_product(ProductInput::new(
                    format!("Item {i}"),
                    Money::from_minor(500 + i),
                    100,
                ))
                .await
                .unwrap();
            cart.add_or_increment(user, product.id, 1).await.unwrap();
        }
    });

    c.bench_function("domain/cart_summary_20_lines", |b| {
        b.iter(|| {
            rt.block_on(async {
                cart.summary(user).await.unwrap();
            });
        });
    });
}

criterion_group!(benches, bench_checkout, bench_cart_summary);
criterion_main!(benches);
