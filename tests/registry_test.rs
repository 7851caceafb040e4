//! Integration tests for graph-level simulation through the registry

use quantsim::config::{build_registry, parse_yaml};
use quantsim::io::{load_encodings, save_encodings, FileFormat, SaveConfig};
use quantsim::{Error, OpMode};
use tempfile::TempDir;

const CONFIG: &str = r#"
defaults:
  bitwidth: 8
  seed: 7

activations:
  relu.output: {}

params:
  fc.weight:
    bitwidth: 4
    symmetric: true
"#;

fn calibrated_registry() -> quantsim::QuantizerRegistry {
    let registry = build_registry(&parse_yaml(CONFIG).unwrap()).unwrap();
    let mut output = [0.0f32; 4];
    for (id, _, _) in registry.iter() {
        registry
            .compute(id, &[-0.3, 0.0, 0.9, 1.7], &mut output)
            .unwrap();
    }
    assert_eq!(registry.compute_encodings_all().unwrap(), 2);
    registry
}

#[test]
fn test_export_import_through_files() {
    let source = calibrated_registry();
    let exported = source.export_encodings();
    let dir = TempDir::new().unwrap();

    for (file_name, format) in [("enc.json", FileFormat::Json), ("enc.yaml", FileFormat::Yaml)] {
        let path = dir.path().join(file_name);
        save_encodings(&exported, &path, &SaveConfig::new(format)).unwrap();

        let target = build_registry(&parse_yaml(CONFIG).unwrap()).unwrap();
        let loaded = load_encodings(&path).unwrap();
        assert_eq!(target.import_encodings(&loaded).unwrap(), 2);
        assert_eq!(target.export_encodings(), exported);

        // imported encodings drive inference identically
        source.set_op_mode_all(OpMode::QuantizeDequantize);
        target.set_op_mode_all(OpMode::QuantizeDequantize);
        let input = [-0.31f32, 0.05, 0.42, 1.2, 2.5];
        for (id, name, _) in source.iter() {
            let mut a = [0.0f32; 5];
            let mut b = [0.0f32; 5];
            source.compute(id, &input, &mut a).unwrap();
            target
                .compute(target.id_of(name).unwrap(), &input, &mut b)
                .unwrap();
            assert_eq!(a, b);
        }
    }
}

#[test]
fn test_import_into_unrelated_graph_fails() {
    let exported = calibrated_registry().export_encodings();
    let other = build_registry(&parse_yaml("activations:\n  other: {}\n").unwrap()).unwrap();

    assert!(matches!(
        other.import_encodings(&exported),
        Err(Error::UnknownQuantizer(_))
    ));
    assert!(other.iter().all(|(_, _, q)| q.encoding().is_none()));
}

#[test]
fn test_uncalibrated_quantizers_are_not_exported() {
    let registry = build_registry(&parse_yaml(CONFIG).unwrap()).unwrap();
    let id = registry.id_of("relu.output").unwrap();
    let mut output = [0.0f32; 2];
    registry.compute(id, &[0.0, 1.0], &mut output).unwrap();

    assert_eq!(registry.compute_encodings_all().unwrap(), 1);
    let exported = registry.export_encodings();
    assert_eq!(exported.len(), 1);
    assert!(exported.param_encodings.is_empty());
}
