use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::process::Command; // Run programs

#[test]
fn help_lists_flags() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("sessionender")?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--delay"))
        .stdout(predicate::str::contains("-n"))
        .stdout(predicate::str::contains("--socket-dir"));

    Ok(())
}

#[test]
fn delay_must_be_a_number() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("sessionender")?
        .args(&["--delay", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("soon"));

    Ok(())
}

#[test]
fn delay_must_be_positive() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("sessionender")?
        .args(&["--delay", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--delay"));

    Ok(())
}
