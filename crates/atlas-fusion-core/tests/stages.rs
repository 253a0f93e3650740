//! Fusion, correction and parcellation stages against the voxel fake.

mod common;

use std::sync::Arc;

use atlas_fusion_core::fakes::{
    read_voxels, write_voxels, VoxelToolkit, FUSE_LABELS, IMAGE_ARITHMETIC, RELABEL,
};
use atlas_fusion_core::naming::SubjectLayout;
use atlas_fusion_core::{
    assemble_and_write, AtlasLabelManifest, BatchPool, FusionBlocks, FusionSkip, Parcellator,
    PvcValidator, PvcVerdict, RegistrationScheduler, Reporter, SegmentationRunner, Subject,
    TransformApplier,
};
use tempfile::TempDir;

use common::{context, library, scheme, write_atlas, write_subject};

/// Register and warp every matched atlas, then write the fusion manifest.
async fn prepared_manifest(
    tmp: &TempDir,
    atlases: &[(&str, i32, bool)],
) -> (Subject, SubjectLayout, AtlasLabelManifest) {
    let root = tmp.path().join("atlases");
    let lines: Vec<String> = atlases
        .iter()
        .map(|(name, age, labelled)| {
            let labels = if *labelled {
                vec![("tissue", vec![112, 112, 5])]
            } else {
                vec![]
            };
            write_atlas(&root, name, *age, &labels)
        })
        .collect();
    let lib = library(&root, &lines);
    let subject = Subject::new(write_subject(&tmp.path().join("in"), "sub01"), Some(30));
    let ctx = context(&tmp.path().join("out"), &lib, &subject, &scheme("tissue"));

    let fake = Arc::new(VoxelToolkit::new());
    RegistrationScheduler::new(fake.clone(), BatchPool::new(2))
        .run(&ctx)
        .await;
    TransformApplier::new(fake, BatchPool::new(2)).run(&ctx).await;
    let manifest = assemble_and_write(&ctx).unwrap();
    (subject, ctx.layout.clone(), manifest)
}

fn runner(fake: &Arc<VoxelToolkit>) -> SegmentationRunner {
    SegmentationRunner::new(fake.clone(), FusionBlocks::default(), 1)
}

#[tokio::test]
async fn test_manifest_excludes_atlas_without_label() {
    let tmp = TempDir::new().unwrap();
    let (_, layout, manifest) =
        prepared_manifest(&tmp, &[("a", 29, true), ("b", 30, false), ("c", 31, true)]).await;

    assert_eq!(manifest.len(), 2);
    assert!(manifest.atlases[0].to_string_lossy().contains("t2w_a_atlas_to_sub01_"));
    assert!(manifest.labels[1].to_string_lossy().contains("t2w_c_tissue_to_sub01"));

    let written = AtlasLabelManifest::read(
        &layout.atlas_manifest(&scheme("tissue")),
        &layout.label_manifest(&scheme("tissue")),
    )
    .unwrap();
    assert_eq!(written, manifest);
}

#[tokio::test]
async fn test_fusion_skipped_with_a_single_pair() {
    let tmp = TempDir::new().unwrap();
    let (subject, layout, manifest) =
        prepared_manifest(&tmp, &[("a", 30, true), ("b", 31, false)]).await;
    assert_eq!(manifest.len(), 1);

    let fake = Arc::new(VoxelToolkit::new());
    let outcome = runner(&fake)
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .unwrap();

    assert_eq!(outcome.skipped, Some(FusionSkip::TooFewPairs { pairs: 1 }));
    assert!(!outcome.invoked);
    assert!(!outcome.created);
    assert_eq!(fake.count(FUSE_LABELS), 0);
}

#[tokio::test]
async fn test_fusion_runs_with_two_pairs_and_only_once() {
    let tmp = TempDir::new().unwrap();
    let (subject, layout, _) = prepared_manifest(&tmp, &[("a", 30, true), ("b", 31, true)]).await;

    let fake = Arc::new(VoxelToolkit::new());
    let first = runner(&fake)
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .unwrap();
    assert!(first.invoked);
    assert!(first.created);
    assert_eq!(read_voxels(&first.output_path).unwrap(), vec![112, 112, 5]);

    let second = runner(&fake)
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .unwrap();
    assert_eq!(second.skipped, Some(FusionSkip::AlreadyFused));
    assert_eq!(fake.count(FUSE_LABELS), 1);
}

/// A subject whose fused tissue map holds 100 voxels of label 112.
fn fused_subject(tmp: &TempDir) -> (Subject, SubjectLayout) {
    let subject = Subject::new(write_subject(&tmp.path().join("in"), "sub01"), Some(30));
    let layout = SubjectLayout::new(&tmp.path().join("out"), &subject);
    layout.create_all().unwrap();
    let mut voxels = vec![112; 100];
    voxels.extend([5; 20]);
    write_voxels(&layout.fused(&scheme("tissue")), &voxels).unwrap();
    (subject, layout)
}

#[tokio::test]
async fn test_pvc_reduction_above_threshold_passes() {
    let tmp = TempDir::new().unwrap();
    let (subject, layout) = fused_subject(&tmp);
    let fake = Arc::new(VoxelToolkit::new().with_correction(112, 4));
    let validator = PvcValidator::new(fake, 112, 0.5, 2.0);

    let outcome = validator
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .unwrap();
    assert_eq!(outcome.before_volume, Some(100.0));
    assert_eq!(outcome.after_volume, Some(96.0));
    assert!((outcome.reduction_percent.unwrap() - 4.0).abs() < 1e-9);
    assert_eq!(outcome.verdict, PvcVerdict::Success);
    assert!(outcome.computed);
}

#[tokio::test]
async fn test_pvc_small_reduction_is_reported_as_failure() {
    let tmp = TempDir::new().unwrap();
    let (subject, layout) = fused_subject(&tmp);
    let fake = Arc::new(VoxelToolkit::new().with_correction(112, 1));
    let validator = PvcValidator::new(fake, 112, 0.5, 2.0);

    let outcome = validator
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .unwrap();
    assert_eq!(outcome.verdict, PvcVerdict::Failure);
    assert!(outcome.output_path.exists());

    let mut reporter = Reporter::new("run", 1, vec!["tissue".to_string()]);
    reporter.record_pvc(outcome);
    let summary = reporter.finish().render_summary();
    assert!(summary.contains("FAILED"));
    assert!(summary.contains("sub01 [tissue]"));
}

#[tokio::test]
async fn test_existing_correction_is_validated_not_recomputed() {
    let tmp = TempDir::new().unwrap();
    let (subject, layout) = fused_subject(&tmp);
    let fake = Arc::new(VoxelToolkit::new().with_correction(112, 10));
    let validator = PvcValidator::new(fake.clone(), 112, 0.5, 2.0);
    validator
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .unwrap();
    fake.clear();

    let outcome = validator
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .unwrap();
    assert!(!outcome.computed);
    assert_eq!(outcome.verdict, PvcVerdict::Success);
    assert_eq!(fake.count(atlas_fusion_core::fakes::CORRECT_VOLUME), 0);
    assert_eq!(fake.count(atlas_fusion_core::fakes::MEASURE_VOLUME), 2);
}

#[tokio::test]
async fn test_pvc_without_fused_map_is_skipped() {
    let tmp = TempDir::new().unwrap();
    let subject = Subject::new(write_subject(&tmp.path().join("in"), "sub01"), Some(30));
    let layout = SubjectLayout::new(&tmp.path().join("out"), &subject);
    layout.create_all().unwrap();
    let validator = PvcValidator::new(Arc::new(VoxelToolkit::new()), 112, 0.5, 2.0);
    assert!(validator
        .run(&subject, &layout, &scheme("tissue"))
        .await
        .is_none());
}

#[tokio::test]
async fn test_parcellation_combines_complement_and_regions() {
    let tmp = TempDir::new().unwrap();
    let layout = SubjectLayout::for_name(tmp.path(), "sub01");
    layout.create_all().unwrap();
    let tissue = scheme("tissue");
    let regional = scheme("regional");
    write_voxels(&layout.corrected(&tissue), &[0, 112, 5, 113, 7, 112]).unwrap();
    write_voxels(&layout.fused(&regional), &[9, 21, 9, 22, 9, 23]).unwrap();

    let fake = Arc::new(VoxelToolkit::new());
    let parcellator = Parcellator::new(fake.clone(), vec![112, 113]);
    let outcomes = parcellator.run(&layout, &tissue, &regional).await.unwrap();

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(outcome.created && outcome.invoked);
    assert_eq!(
        outcome.output_path,
        layout.calc_dir().join("sub01_mas_tissue_parc.nii.gz")
    );
    assert_eq!(
        read_voxels(&outcome.output_path).unwrap(),
        vec![0, 21, 5, 22, 7, 23]
    );

    let leftovers: Vec<_> = std::fs::read_dir(layout.calc_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1, "temporaries left behind: {:?}", leftovers);
    assert_eq!(fake.count(RELABEL), 2);
    assert_eq!(fake.count(IMAGE_ARITHMETIC), 2);

    fake.clear();
    let again = parcellator.run(&layout, &tissue, &regional).await.unwrap();
    assert!(!again[0].invoked);
    assert!(fake.invocations().is_empty());
}

#[tokio::test]
async fn test_parcellation_needs_regional_map() {
    let tmp = TempDir::new().unwrap();
    let layout = SubjectLayout::for_name(tmp.path(), "sub01");
    layout.create_all().unwrap();
    write_voxels(&layout.corrected(&scheme("tissue")), &[112]).unwrap();

    let fake = Arc::new(VoxelToolkit::new());
    let outcomes = Parcellator::new(fake.clone(), vec![112, 113])
        .run(&layout, &scheme("tissue"), &scheme("regional"))
        .await
        .unwrap();
    assert!(outcomes.is_empty());
    assert!(fake.invocations().is_empty());
}
