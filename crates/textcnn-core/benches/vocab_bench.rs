use criterion::{black_box, criterion_group, criterion_main, Criterion};
use textcnn_core::{VocabBuilder, VocabTable};

fn bench_vocab(c: &mut Criterion) {
    let rows: Vec<String> = (0..2000)
        .map(|i| {
            format!(
                "review {} was a {} film with {} acting and a {} ending",
                i % 97,
                ["great", "dull", "long", "short"][i % 4],
                ["wooden", "superb", "uneven"][i % 3],
                ["happy", "sad"][i % 2]
            )
        })
        .collect();

    let builder = VocabBuilder::default();
    c.bench_function("build_vocab_2000_rows", |b| {
        b.iter(|| builder.build_from_rows(rows.iter().map(|r| black_box(r.as_str()))));
    });

    let vocab = builder.build_from_rows(rows.iter().map(String::as_str));
    let mut tokens = vec![textcnn_core::PAD_WORD.to_string()];
    tokens.extend(vocab.iter().map(str::to_string));
    let table = VocabTable::from_tokens(tokens, 1).unwrap();

    c.bench_function("encode_document_100", |b| {
        b.iter(|| table.encode(black_box(rows[17].as_str()), 100));
    });
}

criterion_group!(benches, bench_vocab);
criterion_main!(benches);
