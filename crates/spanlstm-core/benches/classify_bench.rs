use candle_core::Device;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use spanlstm_core::{AlphabetBuilder, EntityModel, ModelConfig, Vocabulary};

fn bench_classify_line(c: &mut Criterion) {
    let mut features = AlphabetBuilder::for_features();
    for token in "the patient was started on <e> metformin </e> for diabetes".split_whitespace() {
        features.intern(token);
    }
    let mut labels = AlphabetBuilder::new();
    labels.intern("negated");
    labels.intern("asserted");

    let model = EntityModel::untrained(
        ModelConfig::default(),
        Vocabulary::new(features.freeze(), labels.freeze()),
        42,
        &Device::Cpu,
    )
    .unwrap();

    let inputs = vec![
        "the patient was started on <e> metformin </e> for diabetes",
        "no evidence of <e> pneumonia </e>",
        "<e> aspirin </e> 81 mg daily",
    ];

    c.bench_function("classify_line_single", |b| {
        b.iter(|| model.classify_line(black_box(inputs[0])).unwrap());
    });

    c.bench_function("classify_line_batch_3", |b| {
        b.iter(|| {
            for input in &inputs {
                let _ = model.classify_line(black_box(input)).unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_classify_line);
criterion_main!(benches);
