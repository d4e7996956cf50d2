use assert_cmd::prelude::*;
use assert_cmd::cargo_bin;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

#[test]
fn test_schedule_prints_csv() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args(["schedule", "--principal", "50000", "--rate", "8.5", "--term", "12"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(
            "period,payment,principal,interest,remaining_balance",
        ))
        .stdout(predicate::str::contains("1,4357.66,"));
}

#[test]
fn test_payoff_prints_json() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args(["payoff", "--principal", "50000", "--rate", "8.5", "--term", "12"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"early_payoff\""))
        .stdout(predicate::str::contains("\"biweekly\""));
}

#[test]
fn test_refinance_prints_json() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args([
        "refinance",
        "--balance",
        "20000",
        "--rate",
        "12",
        "--remaining",
        "36",
        "--new-rate",
        "7",
        "--new-term",
        "36",
    ]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"closing_costs\""));
}

#[test]
fn test_collateral_assessment() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "kind, quantity, base_value").unwrap();
    writeln!(file, "REAL_ESTATE, 1, 400000").unwrap();

    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args(["collateral", "--type", "MORTGAGE", "--amount", "200000"])
        .arg(file.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"coverage_ratio\""));
}

#[test]
fn test_originate_auto_approves() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args(["originate", "--amount", "30000", "--term", "12"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"auto_approved\": true"))
        .stdout(predicate::str::contains("ACTIVE"));
}

#[test]
fn test_originate_rejects_low_score() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args(["originate", "--amount", "30000", "--term", "12", "--score", "550"]);

    cmd.assert().failure();
}

#[test]
fn test_missing_collateral_file() {
    let mut cmd = Command::new(cargo_bin!("loanflow"));
    cmd.args([
        "collateral",
        "--type",
        "MORTGAGE",
        "--amount",
        "1000",
        "no_such_collateral.csv",
    ]);

    cmd.assert().failure();
}
