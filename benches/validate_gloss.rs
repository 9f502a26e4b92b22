//! Extraction and vocabulary validation over a dictionary-sized vocabulary.
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use signclip::extract::extract_final_result;
use signclip::validate::Verdict;
use signclip::vocabulary::{ClipId, Vocabulary};

fn bench_judge(c: &mut Criterion) {
    let vocabulary = Vocabulary::from_entries(
        (0..5_000u64).map(|index| (format!("word{index}"), ClipId::new(index))),
    )
    .expect("build vocabulary");
    let accepted = format!(
        "Thinking...\n<final_result>{}</final_result>",
        (0..40).map(|index| format!("word{}", index * 97)).collect::<Vec<_>>().join(" ")
    );
    let rejected = format!("{} mars venus", accepted.replace("</final_result>", ""));

    let mut group = c.benchmark_group("validate_gloss");
    group.bench_function("extract_and_accept_40_words", |b| {
        b.iter(|| {
            let candidate = extract_final_result(black_box(&accepted));
            black_box(Verdict::judge(&candidate, &vocabulary))
        });
    });
    group.bench_function("extract_and_reject_untagged", |b| {
        b.iter(|| {
            let candidate = extract_final_result(black_box(&rejected));
            black_box(Verdict::judge(&candidate, &vocabulary))
        });
    });
    group.finish();
}

criterion_group!(benches, bench_judge);
criterion_main!(benches);
