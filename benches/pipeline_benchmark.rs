//! Ingestion Benchmarks
//!
//! Measures document key hashing, batch dedup and feed parsing.
//! Run with: cargo bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

use perception_ingestion::article_store::{ArticleSink, ArticleStore};
use perception_ingestion::dedup::{article_id, author_id, dedup_by_url};
use perception_ingestion::feeds::parse_feed;
use perception_ingestion::schemas::{Article, RawArticle, Source, StoreArticlesRequest};
use perception_ingestion::storage::MemoryDocumentStore;

fn articles(count: usize, distinct: usize) -> Vec<Article> {
    let source = Source::new("Bench Feed", "https://bench.example.com/rss", "tech");
    (0..count)
        .map(|i| {
            Article::from_raw(
                &RawArticle {
                    title: Some(format!("Story {i}")),
                    url: Some(format!("https://bench.example.com/story/{}", i % distinct)),
                    categories: vec!["ai".to_string()],
                    ..Default::default()
                },
                &source,
            )
        })
        .collect()
}

fn bench_key_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_hashing");

    let url = "https://news.example.com/2024/01/15/a-reasonably-long-article-slug-with-tracking?utm_source=rss";
    group.bench_function("article_id", |b| b.iter(|| article_id(black_box(url))));
    group.bench_function("author_id", |b| {
        b.iter(|| author_id(black_box("https://news.example.com/feed.xml")))
    });

    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup_by_url");

    for (count, distinct) in [(200, 200), (200, 50), (2_000, 1_000)] {
        let batch = articles(count, distinct);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{count}_items_{distinct}_distinct")),
            &batch,
            |b, batch| b.iter(|| dedup_by_url(black_box(batch.clone()))),
        );
    }

    group.finish();
}

fn bench_feed_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("feed_parsing");

    let pub_date = Utc::now().to_rfc2822();
    let items: String = (0..100)
        .map(|i| {
            format!(
                "<item><title>Story {i}</title><link>https://bench.example.com/{i}</link>\
                 <pubDate>{pub_date}</pubDate><description>Body {i}</description></item>"
            )
        })
        .collect();
    let body = format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Bench</title>{items}</channel></rss>"#
    );

    group.throughput(Throughput::Elements(100));
    group.bench_function("rss_100_items", |b| {
        b.iter(|| parse_feed(black_box(body.as_bytes()), 24, 50, Utc::now()))
    });

    group.finish();
}

fn bench_store_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("store_articles");

    let batch = articles(200, 150);
    group.throughput(Throughput::Elements(200));
    group.bench_function("memory_store_200", |b| {
        b.iter(|| {
            rt.block_on(async {
                let sink = ArticleStore::new(Arc::new(MemoryDocumentStore::new()));
                sink.store_articles(StoreArticlesRequest {
                    run_id: "run-bench".to_string(),
                    articles: batch.clone(),
                })
                .await
            })
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_key_hashing,
    bench_dedup,
    bench_feed_parsing,
    bench_store_batch
);
criterion_main!(benches);
