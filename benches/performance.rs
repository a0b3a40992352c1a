/// 1万記事規模のスコアリング・選抜・ティア構築ベンチマーク。
use chrono::{Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rss_digest::pipeline::{
    article::Article,
    select::{CandidateSelector, scoring::InterestProfile, scoring::KeywordScorer},
    tiers::{TierAssembler, TierPlan, TierSpec},
};

const TOPICS: [&str; 6] = [
    "new R programming package for biostatistics",
    "clinical trial design with causal inference",
    "gardening tips for the weekend",
    "machine learning benchmarks revisited",
    "sponsored: cloud cost webinar",
    "data visualization in practice",
];

fn profile() -> InterestProfile {
    let critical: Vec<String> = ["biostatistics", "clinical trial", "causal inference"]
        .iter()
        .map(ToString::to_string)
        .collect();
    let standard: Vec<String> = ["R programming", "machine learning", "data visualization", "r"]
        .iter()
        .map(ToString::to_string)
        .collect();
    InterestProfile::from_tiers(3, &critical, 1, &standard).expect("valid profile")
}

fn synthetic_articles(count: usize) -> Vec<Article> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let topic = TOPICS[i % TOPICS.len()];
            Article::new(
                format!("{topic} #{i}"),
                format!("https://example.com/{i}"),
                format!("<p>Longer feed description about {topic}, item {i}.</p>"),
                format!("feed-{}", i % 17),
                now - Duration::minutes(i64::try_from(i % 2_000).unwrap_or(0)),
            )
        })
        .collect()
}

fn bench_keyword_scoring(c: &mut Criterion) {
    let scorer = KeywordScorer::new(&profile()).expect("scorer");
    let articles = synthetic_articles(1_000);

    c.bench_function("keyword_scoring_1k_articles", |b| {
        b.iter(|| {
            let total: i32 = articles
                .iter()
                .map(|a| scorer.score(a.title(), a.raw_summary()).score)
                .sum();
            black_box(total);
        });
    });
}

fn bench_selection(c: &mut Criterion) {
    let selector = CandidateSelector::new(24, &profile(), &["sponsored".to_string()], 1, 40)
        .expect("selector");
    let articles = synthetic_articles(10_000);

    c.bench_function("select_candidates_10k_articles", |b| {
        b.iter(|| {
            let selection = selector.select(articles.clone(), Utc::now());
            black_box(selection.candidates.len());
        });
    });
}

fn bench_tier_assembly(c: &mut Criterion) {
    let plan = TierPlan::new(
        TierSpec::new(5, Some(10), Some(6_000)),
        TierSpec::new(5, Some(10), Some(6_000)),
        TierSpec::new(10, Some(3), Some(500)),
    )
    .expect("plan");
    let assembler = TierAssembler::new(plan);
    let selector = CandidateSelector::new(24, &profile(), &[], 0, 40).expect("selector");
    let candidates = selector.select(synthetic_articles(200), Utc::now()).candidates;

    c.bench_function("assemble_tiers_40_candidates", |b| {
        b.iter(|| {
            let digest = assembler.assemble(candidates.clone());
            black_box(digest.units().len());
        });
    });
}

criterion_group!(
    benches,
    bench_keyword_scoring,
    bench_selection,
    bench_tier_assembly
);
criterion_main!(benches);
