#![allow(clippy::expect_used)]

use stackup_e2e::harness::{RunResult, run_stackup, write_file};
use tempfile::TempDir;

fn run(args: &[&str]) -> RunResult {
    let output = run_stackup(args).expect("run stackup");
    println!("{}", output.transcript());
    output
}

fn json(output: &RunResult) -> serde_json::Value {
    serde_json::from_str(&output.stdout).expect("stdout is JSON")
}

#[test]
fn deploy_publishes_every_unit() {
    let output = run(&["deploy", "--color", "never"]);

    assert_eq!(output.exit_code, 0, "{}", output.transcript());
    assert!(output.stdout.starts_with("deploy dev/us-west-2\n"));
    for unit in ["network", "cluster", "observability", "pipelines"] {
        assert!(
            output.stdout.contains(&format!("published       {unit}")),
            "{unit} not published:\n{}",
            output.stdout
        );
    }
    for key in ["network.vpc.id", "cluster.name", "pipelines.traces.url"] {
        assert!(
            output.stdout.contains(&format!("    {key}\n")),
            "{key} not listed:\n{}",
            output.stdout
        );
    }
    assert!(
        output
            .stdout
            .contains("Deployed: 4 published, 0 failed, 0 skipped")
    );
}

#[test]
fn failed_unit_skips_dependents_and_exits_nonzero() {
    let output = run(&["deploy", "--color", "never", "--simulate-failure", "cluster"]);

    assert_eq!(output.exit_code, 1, "{}", output.transcript());
    assert!(output.stdout.contains("published       network"));
    assert!(output.stdout.contains("failed          cluster"));
    assert!(
        output
            .stdout
            .contains("skipped         observability blocked by cluster")
    );
    assert!(
        output
            .stdout
            .contains("skipped         pipelines blocked by cluster")
    );
    assert!(
        output
            .stdout
            .contains("Deployed: 1 published, 1 failed, 2 skipped")
    );
}

#[test]
fn json_report_lists_states_in_application_order() {
    let output = run(&["deploy", "--format", "json", "--parallel"]);
    assert_eq!(output.exit_code, 0, "{}", output.transcript());

    let report = json(&output);
    let order: Vec<&str> = report["order"]
        .as_array()
        .expect("order array")
        .iter()
        .filter_map(serde_json::Value::as_str)
        .collect();
    assert_eq!(order, ["network", "cluster", "observability", "pipelines"]);
    assert_eq!(report["units"][3]["state"], "published");
    assert_eq!(report["config"]["node_count"], 2);
    assert_eq!(report["config"]["vpc_cidr"], "10.0.0.0/16");
    assert!(
        report["exports"]
            .as_array()
            .expect("exports")
            .iter()
            .any(|entry| entry["key"] == "pipelines.traces.url")
    );
}

#[test]
fn invalid_node_count_is_fatal() {
    let output = run(&["deploy", "--node-count", "0"]);

    assert_eq!(output.exit_code, 1, "{}", output.transcript());
    assert!(output.stdout.is_empty());
    assert!(output.stderr.starts_with("error: "));
    assert!(output.stderr.contains("node_count"));
}

#[test]
fn invalid_vpc_cidr_names_the_field() {
    let output = run(&["deploy", "--vpc-cidr", "10.0.0.1/16"]);

    assert_eq!(output.exit_code, 1, "{}", output.transcript());
    assert!(output.stderr.contains("vpc_cidr"));
}

#[test]
fn unknown_environment_falls_back_unless_strict() {
    let output = run(&[
        "deploy",
        "--environment",
        "qa",
        "--format",
        "json",
    ]);
    assert_eq!(output.exit_code, 0, "{}", output.transcript());
    let report = json(&output);
    assert_eq!(report["config"]["profile"], "dev");
    assert_eq!(report["config"]["environment"], "qa");
    assert_eq!(report["warnings"].as_array().expect("warnings").len(), 1);

    let strict = run(&["deploy", "--environment", "qa", "--strict-environment"]);
    assert_eq!(strict.exit_code, 1, "{}", strict.transcript());
    assert!(strict.stderr.contains("unknown environment"));
}

#[test]
fn prod_defaults_apply_without_flags() {
    let output = run(&["plan", "--environment", "prod", "--format", "json"]);
    assert_eq!(output.exit_code, 0, "{}", output.transcript());

    let plan = json(&output);
    assert_eq!(plan["config"]["region"], "us-east-1");
    assert_eq!(plan["config"]["node_count"], 5);
    assert_eq!(plan["config"]["instance_class"], "m5.xlarge");
}

#[test]
fn plan_prints_order_without_applying() {
    let output = run(&["plan", "--color", "never"]);

    assert_eq!(output.exit_code, 0, "{}", output.transcript());
    assert!(output.stdout.starts_with("plan dev/us-west-2\n"));
    assert!(
        output
            .stdout
            .contains("apply           pipelines after cluster, observability")
    );
    assert!(output.stdout.contains("Plan: 4 units to apply"));
    assert!(!output.stdout.contains("Deployed:"));
}

#[test]
fn targeted_deploy_imports_published_dependencies() {
    let temp = TempDir::new().expect("tempdir");
    let published = temp.path().join("published.json");
    write_file(
        &published,
        r#"{
  "network": {
    "network.vpc.id": "vpc-0123",
    "network.vpc.cidr": "10.0.0.0/16",
    "network.subnets.private_ids": ["subnet-a", "subnet-b"],
    "network.subnets.public_ids": ["subnet-c"]
  }
}"#,
    )
    .expect("write published outputs");
    let published = published.to_string_lossy().into_owned();

    let output = run(&[
        "deploy",
        "--unit",
        "cluster",
        "--published",
        &published,
        "--format",
        "json",
    ]);
    assert_eq!(output.exit_code, 0, "{}", output.transcript());

    let report = json(&output);
    let units = report["units"].as_array().expect("units");
    assert_eq!(units.len(), 2);
    assert_eq!(units[0]["unit"], "network");
    assert_eq!(units[0]["imported"], true);
    assert_eq!(units[1]["unit"], "cluster");
    assert_eq!(units[1]["state"], "published");
    assert_eq!(report["target"], "cluster");
}

#[test]
fn published_outputs_without_a_target_are_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let published = temp.path().join("published.json");
    write_file(&published, "{}").expect("write published outputs");
    let published = published.to_string_lossy().into_owned();

    let output = run(&["deploy", "--published", &published]);
    assert_eq!(output.exit_code, 1, "{}", output.transcript());
    assert!(output.stdout.is_empty());
    assert!(output.stderr.contains("--unit"), "{}", output.stderr);
}

#[test]
fn unknown_target_unit_is_fatal() {
    let output = run(&["deploy", "--unit", "database"]);
    assert_eq!(output.exit_code, 1, "{}", output.transcript());
    assert!(output.stderr.contains("database"));
}

#[test]
fn custom_pipeline_with_unbound_token_fails_only_pipelines() {
    let temp = TempDir::new().expect("tempdir");
    write_file(
        &temp.path().join("pipelines/custom.yaml"),
        "sink:\n  hosts: [\"${OPENSEARCH_ENDPOINT}\"]\n  token: \"${NOT_A_BINDING}\"\n",
    )
    .expect("write pipeline");
    let root = temp.path().join("pipelines");
    let root = root.to_string_lossy().into_owned();

    let output = run(&["deploy", "--pipelines", &root, "--format", "json"]);
    assert_eq!(output.exit_code, 1, "{}", output.transcript());

    let report = json(&output);
    assert_eq!(report["units"][2]["state"], "published");
    assert_eq!(report["units"][3]["unit"], "pipelines");
    assert_eq!(report["units"][3]["state"], "failed");
    assert_eq!(
        report["units"][3]["failure"]["kind"],
        "unresolved_placeholder"
    );
}

#[test]
fn custom_pipeline_directory_publishes_one_url_per_document() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path().join("pipelines");
    write_file(
        &root.join("audit.yml"),
        "sink:\n  hosts: [\"${OPENSEARCH_ENDPOINT}\"]\n  cluster: \"${CLUSTER_NAME}\"\n",
    )
    .expect("write pipeline");
    write_file(&root.join("notes.txt"), "ignored").expect("write notes");
    let root = root.to_string_lossy().into_owned();

    let output = run(&["deploy", "--pipelines", &root, "--format", "json"]);
    assert_eq!(output.exit_code, 0, "{}", output.transcript());

    let report = json(&output);
    assert_eq!(
        report["units"][3]["published"],
        serde_json::json!(["pipelines.audit.url"])
    );
}

#[test]
fn empty_pipeline_directory_is_fatal() {
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path().to_string_lossy().into_owned();

    let output = run(&["deploy", "--pipelines", &root]);
    assert_eq!(output.exit_code, 1, "{}", output.transcript());
    assert!(output.stderr.contains("no pipeline documents"));
}

#[test]
fn help_and_version_exit_zero() {
    let help = run(&["--help"]);
    assert_eq!(help.exit_code, 0);
    assert!(help.stdout.contains("deploy"));

    let version = run(&["--version"]);
    assert_eq!(version.exit_code, 0);
    assert!(version.stdout.contains("stackup"));
}
