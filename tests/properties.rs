//! Property-Based Tests
//!
//! - Every frame ends up in exactly one block, whatever its geometry
//! - Criterion chains order any values without failing, consistently

mod common;

use common::{CORONAL, SyntheticSeries};
use dicom_series_sort::tag::well_known;
use dicom_series_sort::{
    CriterionChain, DicomSeriesReader, InMemoryTagSource, Record, SortCriterion,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct FrameLayout {
    position: Option<(u8, u8)>,
    coronal: bool,
    series: u8,
}

fn frame_layout() -> impl Strategy<Value = FrameLayout> {
    (
        proptest::option::weighted(0.9, (0u8..3, 0u8..8)),
        any::<bool>(),
        0u8..2,
    )
        .prop_map(|(position, coronal, series)| FrameLayout {
            position,
            coronal,
            series,
        })
}

fn tag_value() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        (-20i32..20).prop_map(|n| Some(n.to_string())),
        (-100.0f64..100.0).prop_map(|x| Some(format!("{x:.2}"))),
        "[A-Z]{0,3}".prop_map(Some),
    ]
}

// ============================================================================
// Partition totality
// ============================================================================

/// Property: the blocks of the full pipeline hold every input frame once
#[test]
fn proptest_pipeline_keeps_every_frame() {
    proptest!(ProptestConfig::with_cases(64), |(layouts in prop::collection::vec(frame_layout(), 0..24))| {
        for mut reader in [DicomSeriesReader::classic(), DicomSeriesReader::new()] {
            let mut series = SyntheticSeries::new(&reader);
            for (index, layout) in layouts.iter().enumerate() {
                let name = format!("f{index}");
                series.set_orientation(if layout.coronal { CORONAL } else { common::AXIAL });
                let record = match layout.position {
                    Some((x, z)) => series.frame(&name, [f64::from(x) * 0.5, 0.0, f64::from(z) * 1.5]),
                    None => series.frame_without_position(&name),
                };
                series.set(&record, well_known::SERIES_INSTANCE_UID, &format!("1.2.{}", layout.series));
            }

            let outputs = reader.analyze(&series.records, &series.source).unwrap();
            prop_assert!(outputs.iter().all(|block| !block.is_empty()));

            let mut seen: Vec<Record> = outputs
                .iter()
                .flat_map(|block| block.records().iter().cloned())
                .collect();
            seen.sort();
            let mut expected = series.records.clone();
            expected.sort();
            prop_assert_eq!(seen, expected);
        }
    });
}

// ============================================================================
// Criterion totality
// ============================================================================

/// Property: sorting never fails and the "before" relation is a strict order
#[test]
fn proptest_criterion_chain_is_a_strict_order() {
    proptest!(|(values in prop::collection::vec((tag_value(), tag_value()), 1..12))| {
        let mut source = InMemoryTagSource::new();
        source.declare(well_known::INSTANCE_NUMBER);
        source.declare(well_known::ACQUISITION_NUMBER);
        let records: Vec<Record> = values
            .iter()
            .enumerate()
            .map(|(index, (instance, acquisition))| {
                let record = Record::new(format!("r{index}"), 0);
                source.add_record(record.clone());
                if let Some(instance) = instance {
                    source.set(&record, well_known::INSTANCE_NUMBER, instance.as_str());
                }
                if let Some(acquisition) = acquisition {
                    source.set(&record, well_known::ACQUISITION_NUMBER, acquisition.as_str());
                }
                record
            })
            .collect();

        let chain = CriterionChain::by(SortCriterion::ByTagValue(well_known::INSTANCE_NUMBER))
            .then(SortCriterion::ByTagValue(well_known::ACQUISITION_NUMBER));

        let mut sorted = records.clone();
        chain.sort(&mut sorted, &source).unwrap();
        prop_assert_eq!(sorted.len(), records.len());

        for (i, left) in sorted.iter().enumerate() {
            prop_assert!(!chain.is_left_before_right(left, left, &source).unwrap());
            for right in &sorted[i + 1..] {
                prop_assert!(chain.is_left_before_right(left, right, &source).unwrap());
                prop_assert!(!chain.is_left_before_right(right, left, &source).unwrap());
            }
        }
    });
}
