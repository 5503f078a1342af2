use crate::common::{briareus, fixture};

#[test]
fn test_offline_refuses_forge_access() {
    let output = briareus().input(fixture("single-repo.json")).run();

    assert_eq!(output.status, Some(2));
    assert!(
        output.stderr.contains("refusing network access") && output.stderr.contains("github.com"),
        "unexpected stderr: {}",
        output.stderr
    );
}

#[test]
fn test_offline_error_is_independent_of_output_format() {
    let output = briareus()
        .input(fixture("single-repo.json"))
        .args(["--output-format", "jobset"])
        .run();

    assert_eq!(output.status, Some(2));
}
