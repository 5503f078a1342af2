use crate::common::{briareus, fixture};

#[test]
fn test_report_without_builder_results_rejected() {
    let output = briareus()
        .input(fixture("single-repo.json"))
        .args(["--output-format", "report"])
        .run();

    assert_eq!(output.status, Some(1));
    assert!(
        output.stderr.contains("--output-format=report requires --builder-results"),
        "unexpected stderr: {}",
        output.stderr
    );
}

#[test]
fn test_help_exits_successfully() {
    let output = briareus().args(["--help"]).input("unused").offline(false).run();

    assert_eq!(output.status, Some(0));
    assert!(output.stdout.contains("Usage:"), "unexpected stdout: {}", output.stdout);
}
