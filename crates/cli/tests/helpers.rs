mod common;

use std::fs;

use common::{artifact_for, write_pick_elf};
use symtrace::{
    batch_command, build_options, canonicalize_or_current, dump_command, make_loader,
    ExploreArgs,
};
use symtrace_core::analysis::{ExplorationMode, FunctionFilter};
use symtrace_core::config::DumpOptions;
use tempfile::tempdir;

#[test]
fn no_flags_yield_default_options() {
    let options = build_options(&ExploreArgs::default()).expect("options");
    assert_eq!(options, DumpOptions::default());
}

#[test]
fn flags_override_config_file_values() {
    let dir = tempdir().expect("tempdir");
    let config = dir.path().join("opts.yaml");
    fs::write(&config, "tracelet: 5\nloop_bound: 2\nverbosity: 1\nfunctions: [a]\n")
        .expect("write config");

    let args = ExploreArgs {
        functions: vec!["main".into(), "init".into()],
        tracelet: Some(-1),
        verbose: 3,
        config: Some(config.to_string_lossy().into_owned()),
        ..ExploreArgs::default()
    };
    let options = build_options(&args).expect("options");

    assert_eq!(options.mode(), ExplorationMode::Full);
    assert_eq!(options.loop_bound, 2);
    assert_eq!(options.verbosity, 3);
    assert_eq!(options.functions, Some(FunctionFilter::new(["init", "main"])));
}

#[test]
fn unreadable_config_is_reported() {
    let dir = tempdir().expect("tempdir");
    let args = ExploreArgs {
        config: Some(dir.path().join("absent.yaml").to_string_lossy().into_owned()),
        ..ExploreArgs::default()
    };
    let err = build_options(&args).unwrap_err();
    assert!(err.to_string().contains("Failed to load options from"), "unexpected error: {err}");
}

#[test]
fn arch_flag_becomes_loader_hint() {
    let args = ExploreArgs { arch: Some("x86_64".into()), ..ExploreArgs::default() };
    assert_eq!(make_loader(&args).arch_hint.as_deref(), Some("x86_64"));
    assert_eq!(make_loader(&ExploreArgs::default()).arch_hint, None);
}

#[test]
fn canonicalize_or_current_resolves_existing_paths() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("input.bin");
    fs::write(&file, b"x").expect("write");

    let resolved = canonicalize_or_current(&file.to_string_lossy()).expect("canonicalize");
    assert_eq!(resolved, file.canonicalize().expect("canon"));
}

#[test]
fn canonicalize_or_current_keeps_missing_absolute_paths() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("not-here.bin");
    let resolved = canonicalize_or_current(&missing.to_string_lossy()).expect("canonicalize");
    assert_eq!(resolved, missing);
}

#[test]
fn dump_command_writes_once() {
    let dir = tempdir().expect("tempdir");
    let binary = write_pick_elf(dir.path()).to_string_lossy().into_owned();

    let first = dump_command(&binary, &ExploreArgs::default()).expect("dump");
    assert!(!first.is_cached());
    let second = dump_command(&binary, &ExploreArgs::default()).expect("dump again");
    assert!(second.is_cached());
    assert_eq!(first.path(), second.path());
}

#[test]
fn batch_command_counts_each_input_once() {
    let dir = tempdir().expect("tempdir");
    let binary = write_pick_elf(dir.path());
    let name = binary.to_string_lossy().into_owned();

    let report =
        batch_command(&[name.clone(), name], Some(1), &ExploreArgs::default()).expect("batch");
    assert_eq!(report.total(), 1);
    assert_eq!(report.written.len(), 1);
    assert!(artifact_for(&binary.canonicalize().expect("canon")).is_file());
}

#[test]
fn batch_command_fails_when_any_input_fails() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("missing.bin").to_string_lossy().into_owned();

    let err = batch_command(&[missing], None, &ExploreArgs::default()).unwrap_err();
    assert!(err.to_string().contains("1 of 1 inputs failed"), "unexpected error: {err}");
}
