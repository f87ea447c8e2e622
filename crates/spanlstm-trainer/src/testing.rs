//! Fixtures shared by the unit tests.

use std::path::Path;

use spanlstm_core::io::TRAINING_DATA_FILE;

use crate::data::Dataset;

/// Binary task: the token inside the markers decides the label.
pub fn toy_dataset() -> Dataset {
    // ids: 2 = <e>, 3 = </e>, 4..=6 positive entities, 7..=9 negative, 10..=12 context
    let mut instances = Vec::new();
    let mut outcomes = Vec::new();
    for i in 0..40u32 {
        let positive = i % 2 == 0;
        let entity = if positive { 4 + i % 3 } else { 7 + i % 3 };
        let context = 10 + i % 3;
        instances.push(vec![0, context, 2, entity, 3, context, 0]);
        outcomes.push(u32::from(!positive));
    }
    Dataset::new(instances, outcomes, 2, 13)
}

/// Write a small cleartk token-sequence file into `dir`.
pub fn write_training_data(dir: &Path) {
    let drugs = ["aspirin", "metformin", "warfarin"];
    let findings = ["fever", "cough", "rash"];
    let contexts = ["patient reports", "history of", "started on"];

    let mut lines = Vec::new();
    for i in 0..30 {
        let context = contexts[i % contexts.len()];
        if i % 2 == 0 {
            lines.push(format!("drug | {context} <e> {} </e> today", drugs[i % drugs.len()]));
        } else {
            lines.push(format!("finding | {context} <e> {} </e> today", findings[i % findings.len()]));
        }
    }
    std::fs::write(dir.join(TRAINING_DATA_FILE), lines.join("\n")).unwrap();
}
