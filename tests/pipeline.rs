mod common;

use std::fs;
use std::path::Path;

use anyhow::Result;
use chankit::pipeline::{self, BatchOutcome, GenerateOptions, WorkerPool};
use chankit::verify::{ApkVerifier, StructuralVerifier, VerifyResult};
use chankit::v1;
use common::{temp_root, write_v1_apk, write_v2_apk};

/// Проверяльщик, не подтверждающий ни одну схему подписи.
struct RejectingVerifier;

impl ApkVerifier for RejectingVerifier {
    fn verify(&self, _apk: &Path) -> Result<VerifyResult> {
        Ok(VerifyResult {
            v1: false,
            v2: false,
            v3: false,
        })
    }
}

fn channels(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn v1_batch_with_base_substitution() {
    let root = temp_root("pipe-v1");
    let base = root.join("app-base-release.apk");
    let out = root.join("out");
    write_v1_apk(&base);

    let outcome = pipeline::generate(
        &base,
        &out,
        &channels(&["gp", "huawei"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .unwrap();

    let BatchOutcome::Generated(summary) = outcome else {
        panic!("expected Generated");
    };
    assert_eq!(summary.requested, 2);
    assert_eq!(summary.succeeded, 2);
    assert!(summary.failures.is_empty());

    for channel in ["gp", "huawei"] {
        let dest = out.join(format!("app-{}-release.apk", channel));
        assert_eq!(v1::read_channel(&dest).unwrap(), Some(channel.to_string()));
    }

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn v2_batch_roundtrip() {
    let root = temp_root("pipe-v2");
    let base = root.join("pkg.apk");
    let out = root.join("out");
    write_v2_apk(&base);

    let outcome = pipeline::generate(
        &base,
        &out,
        &channels(&["gp", "xiaomi"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .unwrap();

    let BatchOutcome::Generated(summary) = outcome else {
        panic!("expected Generated");
    };
    assert_eq!(summary.succeeded, 2);
    // Без "base" в имени канал идёт префиксом.
    for channel in ["gp", "xiaomi"] {
        let dest = out.join(format!("{}-pkg.apk", channel));
        assert_eq!(
            pipeline::read_channel(&dest).unwrap(),
            Some(channel.to_string())
        );
    }

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn verification_failure_fails_only_that_channel_batch() {
    let root = temp_root("pipe-verify");
    let base = root.join("app-base.apk");
    let out = root.join("out");
    write_v1_apk(&base);

    let outcome = pipeline::generate(
        &base,
        &out,
        &channels(&["gp", "huawei"]),
        &GenerateOptions::default(),
        &RejectingVerifier,
        None,
    )
    .unwrap();

    let BatchOutcome::Generated(summary) = outcome else {
        panic!("expected Generated");
    };
    assert_eq!(summary.requested, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failures.len(), 2);
    // Непрошедшие проверку выходы не остаются на диске.
    assert!(!out.join("app-gp.apk").exists());
    assert!(!out.join("app-huawei.apk").exists());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn failed_destination_does_not_affect_siblings() {
    let root = temp_root("pipe-mixed");
    let base = root.join("app-base.apk");
    let out = root.join("out");
    write_v1_apk(&base);

    // Каталог на месте одного из выходных путей: запись этого канала
    // упадёт, соседние должны дойти до конца.
    fs::create_dir_all(out.join("app-boom.apk")).unwrap();

    let outcome = pipeline::generate(
        &base,
        &out,
        &channels(&["gp", "boom", "huawei"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .unwrap();

    let BatchOutcome::Generated(summary) = outcome else {
        panic!("expected Generated");
    };
    assert_eq!(summary.requested, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].channel, "boom");
    for channel in ["gp", "huawei"] {
        let dest = out.join(format!("app-{}.apk", channel));
        assert_eq!(v1::read_channel(&dest).unwrap(), Some(channel.to_string()));
    }

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn fast_mode_skips_verification() {
    let root = temp_root("pipe-fast");
    let base = root.join("app-base.apk");
    let out = root.join("out");
    write_v1_apk(&base);

    let opts = GenerateOptions {
        fast_mode: true,
        low_memory: false,
    };
    let outcome = pipeline::generate(
        &base,
        &out,
        &channels(&["gp"]),
        &opts,
        &RejectingVerifier,
        None,
    )
    .unwrap();

    let BatchOutcome::Generated(summary) = outcome else {
        panic!("expected Generated");
    };
    assert_eq!(summary.succeeded, 1);
    assert!(out.join("app-gp.apk").exists());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn already_tagged_base_skips_batch() {
    let root = temp_root("pipe-tagged");
    let base = root.join("app-base.apk");
    let out = root.join("out");
    write_v1_apk(&base);
    v1::write_channel(&base, "preload").unwrap();

    let outcome = pipeline::generate(
        &base,
        &out,
        &channels(&["gp"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .unwrap();

    match outcome {
        BatchOutcome::AlreadyTagged { channel } => assert_eq!(channel, "preload"),
        other => panic!("expected AlreadyTagged, got {:?}", other),
    }
    assert!(!out.exists());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn unsigned_base_fails_whole_batch() {
    let root = temp_root("pipe-unsigned");
    let base = root.join("plain.apk");
    let out = root.join("out");
    common::write_apk(&base, false);

    let err = pipeline::generate(
        &base,
        &out,
        &channels(&["gp"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .unwrap_err();
    assert!(err.to_string().contains("undetermined signing scheme"));
    assert!(!out.exists());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn multithreaded_v1_batch() {
    let root = temp_root("pipe-mt");
    let base = root.join("app-base.apk");
    let out = root.join("out");
    write_v1_apk(&base);

    let pool = WorkerPool::new(4);
    let list = channels(&["gp", "huawei", "xiaomi", "oppo", "vivo"]);
    let outcome = pipeline::generate(
        &base,
        &out,
        &list,
        &GenerateOptions::default(),
        &StructuralVerifier,
        Some(&pool),
    )
    .unwrap();

    let BatchOutcome::Generated(summary) = outcome else {
        panic!("expected Generated");
    };
    assert_eq!(summary.succeeded, 5);
    for channel in ["gp", "huawei", "xiaomi", "oppo", "vivo"] {
        let dest = out.join(format!("app-{}.apk", channel));
        assert_eq!(v1::read_channel(&dest).unwrap(), Some(channel.to_string()));
    }

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn exact_apk_output_path() {
    let root = temp_root("pipe-exact");
    let base = root.join("app-base.apk");
    let dest = root.join("exact-name.apk");
    write_v1_apk(&base);

    let outcome = pipeline::generate(
        &base,
        &dest,
        &channels(&["gp"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .unwrap();
    let BatchOutcome::Generated(summary) = outcome else {
        panic!("expected Generated");
    };
    assert_eq!(summary.outputs, vec![dest.display().to_string()]);
    assert_eq!(v1::read_channel(&dest).unwrap(), Some("gp".to_string()));

    // Точный путь и несколько каналов несовместимы.
    assert!(pipeline::generate(
        &base,
        &dest,
        &channels(&["a", "b"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .is_err());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn remove_works_for_both_schemes() {
    let root = temp_root("pipe-remove");
    let v1_apk = root.join("app-base.apk");
    let v2_apk = root.join("pkg.apk");
    write_v1_apk(&v1_apk);
    write_v2_apk(&v2_apk);

    v1::write_channel(&v1_apk, "gp").unwrap();
    assert!(pipeline::remove_channel(&v1_apk, false).unwrap());
    assert_eq!(pipeline::read_channel(&v1_apk).unwrap(), None);

    let out = root.join("out");
    pipeline::generate(
        &v2_apk,
        &out,
        &channels(&["gp"]),
        &GenerateOptions::default(),
        &StructuralVerifier,
        None,
    )
    .unwrap();
    let tagged = out.join("gp-pkg.apk");
    assert!(pipeline::remove_channel(&tagged, false).unwrap());
    assert_eq!(pipeline::read_channel(&tagged).unwrap(), None);
    assert!(!pipeline::remove_channel(&tagged, false).unwrap());

    fs::remove_dir_all(&root).unwrap();
}
