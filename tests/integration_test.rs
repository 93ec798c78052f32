use assert_cmd::Command;
use tempdir::TempDir;

#[test]
fn test_help_should_succeed() {
    let mut cmd = Command::cargo_bin("mongo-selected-tests").unwrap();

    cmd.arg("--help").assert().success();
}

#[test]
fn test_evaluate_help_should_succeed() {
    let mut cmd = Command::cargo_bin("evaluate-selected-tests").unwrap();

    cmd.arg("--help").assert().success();
}

#[test]
fn test_evaluate_without_versions_should_fail() {
    let mut cmd = Command::cargo_bin("evaluate-selected-tests").unwrap();

    cmd.args(&["--selected-tests-config", "selected_tests.yml"])
        .assert()
        .failure();
}

#[test]
fn test_missing_expansion_file_should_fail() {
    let mut cmd = Command::cargo_bin("mongo-selected-tests").unwrap();
    let tmp_dir = TempDir::new("generated_resmoke_config").unwrap();

    cmd.args(&[
        "--target-directory",
        tmp_dir.path().to_str().unwrap(),
        "--expansion-file",
        "tests/data/does_not_exist.yml",
        "--selected-tests-config",
        "tests/data/does_not_exist.yml",
        "--build-variant",
        "enterprise-rhel-80-64-bit",
    ])
    .assert()
    .code(1);

    let files = std::fs::read_dir(tmp_dir.path()).unwrap();
    assert_eq!(0, files.into_iter().count());
}

#[test]
fn test_missing_project_file_should_fail() {
    let mut cmd = Command::cargo_bin("mongo-selected-tests").unwrap();
    let tmp_dir = TempDir::new("generated_resmoke_config").unwrap();

    cmd.args(&[
        "--target-directory",
        tmp_dir.path().to_str().unwrap(),
        "--expansion-file",
        "tests/data/sample_expansions.yml",
        "--evg-project-file",
        "tests/data/does_not_exist.yml",
        "--selected-tests-config",
        "tests/data/does_not_exist.yml",
        "--build-variant",
        "enterprise-rhel-80-64-bit",
    ])
    .assert()
    .code(1);
}
