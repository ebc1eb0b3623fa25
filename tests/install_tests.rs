// Install orchestration scenarios against an isolated prefix
// All downloads are served from memory; source builds run real `sh` steps


use pourover::spec::SoftwareSpec;
use pourover::{
    BottlePolicy, Checksum, Formula, InstallError, InstallOptions, InstallState, Keg, SpecKind,
    Tab,
};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use test_helpers::*;

#[tokio::test]
async fn test_bottle_install_and_uninstall() {
    let env = TestEnvironment::new();
    let (installer, states) = record_states(env.installer());
    let mut formula = bottled_formula(&env, "foo", "1.0");
    formula.options = vec!["--with-docs".into()];

    let outcome = installer
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    assert!(outcome.poured_from_bottle);
    assert!(!outcome.already_installed);
    assert_eq!(
        outcome.states,
        vec![
            InstallState::Idle,
            InstallState::Resolving,
            InstallState::Locked,
            InstallState::Fetching,
            InstallState::Verifying,
            InstallState::PouringBottle,
            InstallState::Linking,
            InstallState::RecordingTab,
            InstallState::Done,
        ]
    );
    assert_eq!(*states.lock().unwrap(), outcome.states);

    assert!(outcome.keg.is_installed());
    assert_eq!(outcome.keg.path(), env.cellar().join("foo/1.0"));
    assert!(env.prefix().join("bin/foo").symlink_metadata().is_ok());
    assert!(env.prefix().join("opt/foo").symlink_metadata().is_ok());
    assert!(!env.lock_marker("foo").exists());

    // Bottle was fetched by its bintray name and cached by its local name
    assert_eq!(
        env.fetcher.requests(),
        vec!["https://homebrew.bintray.com/bottles/foo-1.0.arm64_sonoma.bottle.tar.gz"]
    );
    assert!(env.config.cache.join("foo--1.0.arm64_sonoma.bottle.tar.gz").exists());

    let tab = Tab::for_keg(&outcome.keg).unwrap();
    assert!(tab.poured_from_bottle);
    assert!(tab.built_as_bottle);
    assert!(tab.installed_on_request);
    assert_eq!(tab.spec(), SpecKind::Stable);
    assert!(tab.used_options.is_empty());
    assert_eq!(tab.unused_options, vec!["--with-docs"]);
    assert_eq!(tab.source.versions.stable.as_deref(), Some("1.0"));

    let uninstalled = installer.uninstall("foo", false).unwrap();
    assert_eq!(uninstalled.versions, vec!["1.0"]);
    assert!(!outcome.keg.exists());
    assert!(Tab::for_keg(&outcome.keg).is_err());
    assert!(env.prefix().join("bin/foo").symlink_metadata().is_err());
    assert!(env.prefix().join("opt/foo").symlink_metadata().is_err());
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_nothing_behind() {
    let env = TestEnvironment::new();
    let (installer, states) = record_states(env.installer_with_tools());
    let formula = bottled_formula_with(
        &env,
        "foo",
        "1.0",
        bottle_tarball("foo", "1.0"),
        sha256(b"something else"),
    );

    let err = installer
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap_err();

    match &err {
        InstallError::ChecksumMismatch { expected, actual, .. } => {
            assert_eq!(*expected, sha256(b"something else"));
            assert_eq!(*actual, sha256(&bottle_tarball("foo", "1.0")));
        }
        other => panic!("unexpected error: {other}"),
    }

    // No fallback to source, no keg, lock released, cache entry discarded
    assert!(!env.cellar().join("foo").exists());
    assert!(!env.lock_marker("foo").exists());
    assert!(!env.config.cache.join("foo--1.0.arm64_sonoma.bottle.tar.gz").exists());
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            InstallState::Idle,
            InstallState::Resolving,
            InstallState::Locked,
            InstallState::Fetching,
            InstallState::Verifying,
            InstallState::Error,
        ]
    );
}

#[tokio::test]
async fn test_operation_in_progress() {
    let env = TestEnvironment::new();
    let (installer, states) = record_states(env.installer());
    let formula = bottled_formula(&env, "foo", "1.0");

    // Another process holds the lock
    fs::create_dir_all(&env.config.locks).unwrap();
    fs::write(env.lock_marker("foo"), "pid=1 holder=1-0\n").unwrap();

    let err = installer
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, InstallError::OperationInProgress { ref name } if name == "foo"));
    assert!(env.lock_marker("foo").exists());
    assert!(env.fetcher.requests().is_empty());
    assert_eq!(
        *states.lock().unwrap(),
        vec![InstallState::Idle, InstallState::Resolving, InstallState::Error]
    );
}

#[tokio::test]
async fn test_already_installed_short_circuits() {
    let env = TestEnvironment::new();
    let installer = env.installer();
    let formula = bottled_formula(&env, "foo", "1.0");

    installer
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();
    let again = installer
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    assert!(again.already_installed);
    assert!(again.tab.is_some());
    assert_eq!(
        again.states,
        vec![InstallState::Idle, InstallState::Resolving, InstallState::Done]
    );
    assert_eq!(env.fetcher.requests().len(), 1);

    let forced = installer
        .install(
            &formula,
            &InstallOptions {
                force: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!forced.already_installed);
    assert!(forced.keg.is_installed());
    // Served from the download cache
    assert_eq!(env.fetcher.requests().len(), 1);
    // The replaced keg is gone
    assert!(!env.cellar().join("foo/.1.0.reinstall").exists());
    assert_eq!(installer.cellar().installed_kegs("foo").unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_reinstall_restores_previous_keg() {
    let env = TestEnvironment::new();
    let installer = env.installer();
    installer
        .install(&bottled_formula(&env, "foo", "1.0"), &InstallOptions::default())
        .await
        .unwrap();

    // Same version, but the declared checksum no longer matches the cached bottle
    let tampered = bottled_formula_with(
        &env,
        "foo",
        "1.0",
        bottle_tarball("foo", "1.0"),
        Checksum::sha256("00"),
    );
    let force = InstallOptions {
        force: true,
        ..Default::default()
    };
    let err = installer.install(&tampered, &force).await.unwrap_err();
    assert!(matches!(err, InstallError::ChecksumMismatch { .. }));

    let keg = installer.cellar().keg("foo", "1.0");
    assert!(keg.is_installed());
    assert!(Tab::for_keg(&keg).unwrap().poured_from_bottle);
    // Links resolve to the restored keg
    assert!(fs::metadata(env.prefix().join("bin/foo")).is_ok());
    assert!(fs::metadata(env.prefix().join("opt/foo/bin/foo")).is_ok());
    assert!(!env.cellar().join("foo/.1.0.reinstall").exists());
    assert!(!env.lock_marker("foo").exists());
}

#[tokio::test]
async fn test_reinstall_without_toolchain_keeps_previous_keg() {
    let env = TestEnvironment::new();
    let installer = env.installer();
    let formula = bottled_formula(&env, "foo", "1.0");
    installer
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    let rebuild = InstallOptions {
        force: true,
        build_from_source: true,
        ..Default::default()
    };
    let err = installer.install(&formula, &rebuild).await.unwrap_err();
    assert!(matches!(err, InstallError::BuildTools { .. }));

    let keg = installer.cellar().keg("foo", "1.0");
    assert!(keg.path().join("bin/foo").exists());
    assert!(Tab::for_keg(&keg).is_ok());
    assert!(fs::metadata(env.prefix().join("bin/foo")).is_ok());
}

#[tokio::test]
async fn test_install_finished_by_another_holder_while_waiting() {
    let env = TestEnvironment::new();
    let cellar = env.cellar();
    // Simulates a concurrent run completing the install right before the lock is taken
    let installer = env.installer().with_observer(move |_, state| {
        if state == InstallState::Locked {
            let keg = Keg::new(&cellar, "foo", "1.0");
            fs::create_dir_all(keg.path().join("bin")).unwrap();
            fs::write(keg.path().join("bin/foo"), "#!/bin/sh\n").unwrap();
            Tab::new(&keg).write().unwrap();
        }
    });

    let outcome = installer
        .install(&bottled_formula(&env, "foo", "1.0"), &InstallOptions::default())
        .await
        .unwrap();

    assert!(outcome.already_installed);
    assert!(outcome.tab.is_some());
    assert_eq!(
        outcome.states,
        vec![
            InstallState::Idle,
            InstallState::Resolving,
            InstallState::Locked,
            InstallState::Done,
        ]
    );
    assert!(env.fetcher.requests().is_empty());
    assert!(!env.lock_marker("foo").exists());
}

#[tokio::test]
async fn test_keg_without_receipt_is_reinstalled() {
    let env = TestEnvironment::new();
    let stray = env.cellar().join("foo/1.0/bin");
    fs::create_dir_all(&stray).unwrap();
    fs::write(stray.join("leftover"), "partial").unwrap();

    let outcome = env
        .installer()
        .install(&bottled_formula(&env, "foo", "1.0"), &InstallOptions::default())
        .await
        .unwrap();

    assert!(!outcome.already_installed);
    assert!(outcome.poured_from_bottle);
    assert!(Tab::for_keg(&outcome.keg).is_ok());
    assert!(outcome.keg.path().join("bin/foo").exists());
    assert!(!outcome.keg.path().join("bin/leftover").exists());
}

#[tokio::test]
async fn test_receipt_failure_removes_links() {
    let env = TestEnvironment::new();
    // A directory where the receipt belongs makes the final rename fail
    let bottle = tarball(&[
        ("foo/1.0/bin/foo".to_string(), "#!/bin/sh\n"),
        ("foo/1.0/INSTALL_RECEIPT.json/keep".to_string(), ""),
    ]);
    let formula = bottled_formula_with(&env, "foo", "1.0", bottle.clone(), sha256(&bottle));
    let (installer, states) = record_states(env.installer());

    assert!(installer
        .install(&formula, &InstallOptions::default())
        .await
        .is_err());

    let states = states.lock().unwrap();
    assert_eq!(
        &states[states.len() - 2..],
        &[InstallState::RecordingTab, InstallState::Error]
    );
    assert!(env.prefix().join("bin/foo").symlink_metadata().is_err());
    assert!(env.prefix().join("opt/foo").symlink_metadata().is_err());
    assert!(!env.cellar().join("foo").exists());
    assert!(!env.lock_marker("foo").exists());
}

#[tokio::test]
async fn test_source_build_with_options() {
    let env = TestEnvironment::new();
    let installer = env.installer_with_tools();
    let mut formula = bottled_formula(&env, "foo", "1.0");
    formula.options = vec!["--with-docs".into(), "--without-nls".into()];
    formula.install = vec![
        copy_step(),
        vec![
            "sh".into(),
            "-c".into(),
            "mkdir -p {prefix}/share && echo {options} > {prefix}/share/options".into(),
        ],
    ];

    let outcome = installer
        .install(
            &formula,
            &InstallOptions {
                options: vec!["--with-docs".into(), "--with-bogus".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Requested options rule out the bottle
    assert!(!outcome.poured_from_bottle);
    assert!(outcome.states.contains(&InstallState::BuildingFromSource));
    assert!(!outcome.states.contains(&InstallState::PouringBottle));
    assert_eq!(outcome.invalid_options, vec!["--with-bogus"]);

    let keg = outcome.keg.path();
    assert!(keg.join("bin/foo").exists());
    assert_eq!(
        fs::read_to_string(keg.join("share/options")).unwrap().trim(),
        "--with-docs"
    );

    let tab = Tab::for_keg(&outcome.keg).unwrap();
    assert!(!tab.poured_from_bottle);
    assert_eq!(tab.used_options, vec!["--with-docs"]);
    assert_eq!(tab.unused_options, vec!["--without-nls"]);
    assert!(tab.with_option("docs"));
    assert!(tab.with_option("nls"));
}

#[tokio::test]
async fn test_no_bottle_and_no_toolchain() {
    let env = TestEnvironment::new();
    let formula = source_formula(&env, "foo", "1.0");

    let err = env
        .installer()
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, InstallError::BuildTools { ref name } if name == "foo"));
    assert!(!env.cellar().join("foo").exists());
    assert!(!env.lock_marker("foo").exists());
}

#[tokio::test]
async fn test_failed_build_step() {
    let env = TestEnvironment::new();
    let mut formula = source_formula(&env, "foo", "1.0");
    formula.install = vec![vec![
        "sh".into(),
        "-c".into(),
        "mkdir -p {prefix}/bin; echo compile error 1>&2; exit 2".into(),
    ]];

    let err = env
        .installer_with_tools()
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap_err();

    match err {
        InstallError::Execution(e) => {
            assert_eq!(e.status, Some(2));
            assert!(e.to_string().contains("compile error"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!env.cellar().join("foo/1.0").exists());
    assert!(!env.lock_marker("foo").exists());
}

#[tokio::test]
async fn test_broken_bottle_falls_back_to_source() {
    let env = TestEnvironment::new();
    let garbage = b"not a tarball".to_vec();
    let formula = bottled_formula_with(&env, "foo", "1.0", garbage.clone(), sha256(&garbage));

    let outcome = env
        .installer_with_tools()
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    assert!(!outcome.poured_from_bottle);
    assert!(outcome.states.contains(&InstallState::PouringBottle));
    assert!(outcome.states.contains(&InstallState::BuildingFromSource));
    assert!(outcome.keg.path().join("bin/foo").exists());

    // Without a toolchain the pour error is final
    let env = TestEnvironment::new();
    let formula = bottled_formula_with(&env, "foo", "1.0", garbage.clone(), sha256(&garbage));
    let err = env
        .installer()
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, InstallError::Other(_)));
    assert!(!env.cellar().join("foo/1.0").exists());
}

#[tokio::test]
async fn test_pour_hooks_and_veto() {
    let env = TestEnvironment::new();
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let (b, a) = (before.clone(), after.clone());
    let policy = BottlePolicy::new()
        .with_pour_bottle(|formula: &Formula| formula.name != "vetoed")
        .with_before_pour(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        })
        .with_after_pour(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
    let installer = env.installer_with_tools().with_policy(policy);

    let poured = installer
        .install(&bottled_formula(&env, "foo", "1.0"), &InstallOptions::default())
        .await
        .unwrap();
    assert!(poured.poured_from_bottle);

    let built = installer
        .install(&bottled_formula(&env, "vetoed", "1.0"), &InstallOptions::default())
        .await
        .unwrap();
    assert!(!built.poured_from_bottle);

    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_keg_only_is_not_linked() {
    let env = TestEnvironment::new();
    let mut formula = bottled_formula(&env, "foo", "1.0");
    formula.keg_only = true;

    let outcome = env
        .installer()
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.linked, 0);
    assert!(env.prefix().join("bin/foo").symlink_metadata().is_err());
    assert!(env.prefix().join("opt/foo").symlink_metadata().is_ok());
}

#[tokio::test]
async fn test_link_failure_is_not_fatal() {
    let env = TestEnvironment::new();
    let formula = bottled_formula(&env, "foo", "1.0");
    // A plain file where the prefix's bin directory should be
    fs::write(env.prefix().join("bin"), "in the way").unwrap();

    let outcome = env
        .installer()
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    assert!(outcome.link_error.is_some());
    assert!(outcome.keg.is_installed());
    assert!(Tab::for_keg(&outcome.keg).is_ok());
    assert_eq!(outcome.states.last(), Some(&InstallState::Done));
}

#[tokio::test]
async fn test_head_install() {
    let env = TestEnvironment::new();
    env.fetcher.serve("foo.git", b"#!/bin/sh\necho head\n".to_vec());

    let mut formula = source_formula(&env, "foo", "1.0");
    formula.specs.head = Some(SoftwareSpec::new("https://example.com/foo.git", ""));
    formula.install = vec![vec![
        "sh".into(),
        "-c".into(),
        "mkdir -p {prefix}/bin && cp {name}--{version}.git {prefix}/bin/{name}".into(),
    ]];

    let outcome = env
        .installer_with_tools()
        .install(
            &formula,
            &InstallOptions {
                spec: Some(SpecKind::Head),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.spec, SpecKind::Head);
    assert_eq!(outcome.keg.version(), "HEAD");
    // Head has no checksum to verify
    assert!(!outcome.states.contains(&InstallState::Verifying));
    assert_eq!(Tab::for_keg(&outcome.keg).unwrap().spec(), SpecKind::Head);
}

#[tokio::test]
async fn test_devel_requested_but_missing_falls_back() {
    let env = TestEnvironment::new();
    let formula = bottled_formula(&env, "foo", "1.0");

    let outcome = env
        .installer()
        .install(
            &formula,
            &InstallOptions {
                spec: Some(SpecKind::Devel),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.spec, SpecKind::Stable);
    assert_eq!(outcome.keg.version(), "1.0");
}

#[tokio::test]
async fn test_revision_in_keg_path() {
    let env = TestEnvironment::new();
    let mut formula = bottled_formula(&env, "foo", "1.0_1");
    let stable = formula.specs.stable.take().unwrap();
    // Declared version stays 1.0; the revision comes from the formula
    let bottle = stable.bottle().unwrap().clone();
    formula.specs.stable = Some(
        SoftwareSpec::new(stable.url(), "1.0")
            .with_checksum(stable.checksum().unwrap().clone())
            .with_bottle(bottle),
    );
    formula.revision = 1;

    let outcome = env
        .installer()
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.keg.path(), env.cellar().join("foo/1.0_1"));
    assert!(outcome.poured_from_bottle);
}

#[tokio::test]
async fn test_runtime_dependencies_recorded_and_enforced() {
    let env = TestEnvironment::new();
    let installer = env.installer();
    let lib = bottled_formula(&env, "lib", "2.1");
    let mut app = bottled_formula(&env, "app", "1.0");
    app.dependencies = vec!["lib".into()];

    installer.install(&lib, &InstallOptions::default()).await.unwrap();
    let outcome = installer.install(&app, &InstallOptions::default()).await.unwrap();

    let tab = outcome.tab.unwrap();
    assert_eq!(tab.runtime_dependencies.len(), 1);
    assert_eq!(tab.runtime_dependencies[0].full_name, "lib");
    assert_eq!(tab.runtime_dependencies[0].version, "2.1");

    match installer.uninstall("lib", false) {
        Err(InstallError::HasDependents { dependents, .. }) => assert_eq!(dependents, vec!["app"]),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(env.cellar().join("lib/2.1").exists());
    assert!(!env.lock_marker("lib").exists());

    installer.uninstall("lib", true).unwrap();
    assert!(!env.cellar().join("lib").exists());
}

#[tokio::test]
async fn test_uninstall_missing() {
    let env = TestEnvironment::new();
    assert!(matches!(
        env.installer().uninstall("nope", false),
        Err(InstallError::NotInstalled(ref name)) if name == "nope"
    ));
}

#[tokio::test]
async fn test_batch_failures_are_independent() {
    let env = TestEnvironment::new();
    let good = bottled_formula(&env, "good", "1.0");
    let bad = bottled_formula_with(
        &env,
        "bad",
        "1.0",
        bottle_tarball("bad", "1.0"),
        Checksum::sha256("00"),
    );
    let other = bottled_formula(&env, "other", "3.2");

    let results = env
        .installer()
        .install_all(&[good, bad, other], &InstallOptions::default())
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].as_ref().unwrap().poured_from_bottle);
    assert!(matches!(results[1], Err(InstallError::ChecksumMismatch { .. })));
    assert!(results[2].as_ref().unwrap().keg.is_installed());
    for name in ["good", "bad", "other"] {
        assert!(!env.lock_marker(name).exists());
    }
}

#[tokio::test]
async fn test_link_and_unlink() {
    let env = TestEnvironment::new();
    let installer = env.installer();
    installer
        .install(&bottled_formula(&env, "foo", "1.0"), &InstallOptions::default())
        .await
        .unwrap();

    let removed = installer.unlink("foo").unwrap();
    assert_eq!(removed.len(), 1);
    assert!(env.prefix().join("bin/foo").symlink_metadata().is_err());

    let linked = installer.link("foo").unwrap();
    assert_eq!(linked.len(), 1);
    assert!(env.prefix().join("bin/foo").symlink_metadata().is_ok());

    assert!(matches!(installer.link("bar"), Err(InstallError::NotInstalled(_))));
}

#[tokio::test]
async fn test_source_build_does_not_stall_other_installs() {
    let env = TestEnvironment::new();
    let mut slow = source_formula(&env, "slow", "1.0");
    slow.install = vec![vec![
        "sh".into(),
        "-c".into(),
        "sleep 3 && mkdir -p {prefix}/bin && cp hello.sh {prefix}/bin/{name}".into(),
    ]];
    let quick = bottled_formula(&env, "quick", "1.0");

    let results = env
        .installer_with_tools()
        .install_all(&[slow, quick], &InstallOptions::default())
        .await;

    let slow = results[0].as_ref().unwrap();
    let quick = results[1].as_ref().unwrap();
    assert!(!slow.poured_from_bottle);
    assert!(slow.time_ms >= 3000);
    assert!(quick.poured_from_bottle);
    assert!(quick.time_ms < 2000, "bottle took {}ms", quick.time_ms);
}

#[tokio::test]
async fn test_sandboxed_build_runs_through_wrapper() {
    let env = TestEnvironment::new();
    let mut config = env.config.clone();
    config.sandbox = true;
    config.sandbox_wrapper = Some(vec!["env".into()]);
    let mut formula = source_formula(&env, "foo", "1.0");
    formula.install = vec![
        copy_step(),
        vec![
            "sh".into(),
            "-c".into(),
            "echo \"$HOMEBREW_SANDBOX_WRITABLE\" > {prefix}/writable".into(),
        ],
    ];

    let outcome = env
        .installer_for(config)
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap();

    let writable = fs::read_to_string(outcome.keg.path().join("writable")).unwrap();
    assert!(writable
        .trim()
        .split(':')
        .any(|path| path == outcome.keg.path().display().to_string()));
}

#[tokio::test]
async fn test_sandboxed_build_without_wrapper_fails() {
    let env = TestEnvironment::new();
    let mut config = env.config.clone();
    config.sandbox = true;
    let formula = source_formula(&env, "foo", "1.0");

    let err = env
        .installer_for(config)
        .install(&formula, &InstallOptions::default())
        .await
        .unwrap_err();

    match err {
        InstallError::Execution(e) => assert!(e.to_string().contains("HOMEBREW_SANDBOX_WRAPPER")),
        other => panic!("expected an execution error, got {other}"),
    }
    assert!(!env.cellar().join("foo").exists());
    assert!(!env.lock_marker("foo").exists());
}
