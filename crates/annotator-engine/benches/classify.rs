use std::hint::black_box;

use annotator_core::{HostTree, MemoryTree, NodeSpec, PassId, Selector};
use annotator_engine::{Classifier, Region};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn gen_tree(messages: usize) -> MemoryTree {
    let list = NodeSpec::new("div").with_class("MessageList").with_children(
        (0..messages).map(|i| {
            NodeSpec::new("div")
                .with_class("Message")
                .with_attr("id", format!("message-{i}"))
                .with_child(
                    NodeSpec::new("div")
                        .with_class("content-inner")
                        .with_child(NodeSpec::new("div").with_class("text-content").with_text(format!("text {i}"))),
                )
        }),
    );
    MemoryTree::from_specs(&[NodeSpec::new("div")
        .with_id("root")
        .with_children([NodeSpec::new("div").with_id("LeftColumn"), list])])
    .unwrap()
}

fn classifier() -> Classifier {
    let mut classifier = Classifier::new(vec!["aria-".into(), "role".into(), "tabindex".into()]);
    classifier.add_region(
        PassId(0),
        Region::new("left-column", Selector::parse("#LeftColumn").unwrap()),
    );
    classifier.add_region(
        PassId(1),
        Region::new("message-list", Selector::parse(".MessageList").unwrap()),
    );
    classifier.add_region(
        PassId(2),
        Region::observed("hide-invisible")
            .on_inserted(Selector::parse("#message-input-text .placeholder-text").unwrap()),
    );
    classifier
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_classify");
    for &n in &[100usize, 1_000] {
        let mut tree = gen_tree(n);
        let root = tree.find("#root").unwrap().unwrap();
        for message in tree.find_all(".text-content").unwrap() {
            tree.set_attribute(message, "class", "text-content edited").unwrap();
            tree.set_attribute(message, "aria-hidden", "true").unwrap();
        }
        let records = tree.take_records();
        let classifier = classifier();

        group.throughput(Throughput::Elements(records.len() as u64));
        group.bench_with_input(BenchmarkId::new("records", n), &n, |b, _| {
            b.iter(|| {
                let hits = records
                    .iter()
                    .filter(|record| classifier.classify(&tree, root, record).is_ok())
                    .count();
                black_box(hits)
            })
        });
    }
    group.finish();
}

fn bench_selector_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_selector_query");
    for &n in &[100usize, 1_000] {
        let tree = gen_tree(n);
        let selector = Selector::parse(r#".MessageList .Message:not([data-accessible-message="true"])"#).unwrap();

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("query_all", n), &n, |b, _| {
            b.iter(|| black_box(selector.query_all(&tree, tree.document()).len()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_classify, bench_selector_query);
criterion_main!(benches);
