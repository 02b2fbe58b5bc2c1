//! End-to-end semantic ID generation.

mod common;

use burn::module::AutodiffModule;
use hygrec_core::backend::{init_cpu_device, CpuAutodiffBackend, CpuBackend};
use hygrec_rqvae::{
    IndexFormat, IndexGenerator, IndexGeneratorConfig, RqVaeConfig, RqVaeError, RqVaeTrainer,
    ScaleProfile, SemanticIndex, TrainerConfig,
};

fn three_level_config(in_dim: usize) -> RqVaeConfig {
    RqVaeConfig::from(ScaleProfile::Dev)
        .with_in_dim(in_dim)
        .with_layers(vec![32])
        .with_e_dim(8)
        .with_num_emb_list(vec![8, 8, 8])
        .with_sk_epsilons(vec![0.0, 0.0, 0.003])
}

#[test]
fn test_near_identical_items_get_distinct_ids() {
    let device = init_cpu_device();
    let seeds = [1u64, 2, 3];

    let mut resolved_rates = Vec::new();
    for seed in seeds {
        let catalog = common::near_duplicates(5, 16, 0.1, seed);
        let model = three_level_config(16)
            .init::<CpuBackend>(&device)
            .expect("model");

        let (index, report) = IndexGenerator::new(&model, IndexGeneratorConfig::default(), &device)
            .generate(&catalog)
            .expect("generate");
        assert_eq!(index.len(), 5);
        assert!(index.codes().iter().all(|c| c.len() == 3));
        assert!(index.codes().iter().flatten().all(|&c| c < 8));
        assert_eq!(report.final_collision_rate, index.collision_rate());
        assert!(report.rounds <= 20);
        // At most two of the five items may still share an ID
        assert!(
            report.final_collision_rate <= 0.4,
            "seed {seed}: collision rate {} -> {}",
            report.initial_collision_rate,
            report.final_collision_rate
        );

        resolved_rates.push(report.final_collision_rate);
    }

    let fully_resolved = resolved_rates.iter().filter(|&&r| r == 0.0).count();
    assert!(
        fully_resolved >= 2,
        "unique IDs for only {fully_resolved} of seeds {seeds:?} ({resolved_rates:?})"
    );
}

#[test]
fn test_resolution_can_be_disabled() {
    let device = init_cpu_device();
    let catalog = common::near_duplicates(5, 16, 0.1, 7);
    let model = three_level_config(16)
        .init::<CpuBackend>(&device)
        .expect("model");

    let (index, report) = IndexGenerator::new(
        &model,
        IndexGeneratorConfig::default().with_resolution(false),
        &device,
    )
    .generate(&catalog)
    .expect("generate");
    assert_eq!(report.rounds, 0);
    assert_eq!(report.initial_collision_rate, report.final_collision_rate);
    let batch = catalog.batch::<CpuBackend>(&[0, 1, 2, 3, 4], &device);
    let nearest = model.encode_codes(batch, &model.nearest_plan());
    assert_eq!(index.codes(), nearest);
}

#[test]
fn test_generation_is_deterministic() {
    let device = init_cpu_device();
    let catalog = common::clustered_catalog(4, 10, 16, 0.2, 9);
    let model = three_level_config(16)
        .init::<CpuBackend>(&device)
        .expect("model");

    let generator = IndexGenerator::new(&model, IndexGeneratorConfig::default(), &device);
    let (first, _) = generator.generate(&catalog).expect("first");
    let (second, _) = generator.generate(&catalog).expect("second");
    assert_eq!(first, second);
}

#[test]
fn test_dimension_mismatch() {
    let device = init_cpu_device();
    let catalog = common::near_duplicates(4, 10, 0.1, 0);
    let model = three_level_config(16)
        .init::<CpuBackend>(&device)
        .expect("model");

    let result = IndexGenerator::new(&model, IndexGeneratorConfig::default(), &device)
        .generate(&catalog);
    assert!(matches!(
        result,
        Err(RqVaeError::DimensionMismatch {
            expected: 16,
            got: 10
        })
    ));
}

#[test]
fn test_trained_index_file_round_trip() {
    let device = init_cpu_device();
    let catalog = common::clustered_catalog(8, 16, 16, 0.1, 4);
    let trainer = RqVaeTrainer::<CpuAutodiffBackend>::new(
        three_level_config(16),
        TrainerConfig::default()
            .with_epochs(5)
            .with_batch_size(32)
            .with_learning_rate(3e-3),
        &device,
    );
    let (model, _) = trainer.fit(&catalog).expect("train");
    let frozen = model.valid();

    let (index, report) = IndexGenerator::new(&frozen, IndexGeneratorConfig::default(), &device)
        .generate(&catalog)
        .expect("generate");
    assert_eq!(report.n_items, 128);
    assert_eq!(report.n_levels, 3);
    assert!(report.rounds <= 20);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("synthetic.index.json");
    index.write_json(&path, IndexFormat::Codes).expect("write");
    let loaded = SemanticIndex::read_json(&path).expect("read");
    assert_eq!(loaded, index);
    assert_eq!(loaded.ids()[0], "0");
}
