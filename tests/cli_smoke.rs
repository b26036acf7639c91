//! CLI smoke tests: drive the binary end to end against a temp data dir.

use std::io::Write;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const SWITCH_MIB: &str = "\
-- Cisco Systems device definitions
SWITCH-MIB DEFINITIONS ::= BEGIN
switchPorts OBJECT-TYPE
END
";

fn fleetmon(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("fleetmon").expect("binary builds");
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

fn write_zip(path: &Path) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("switch.mib", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(SWITCH_MIB.as_bytes()).unwrap();
    zip.finish().unwrap();
}

#[test]
fn components_lists_the_catalog() {
    let tmp = TempDir::new().unwrap();
    fleetmon(tmp.path())
        .arg("components")
        .assert()
        .success()
        .stdout(predicate::str::contains("node_exporter"))
        .stdout(predicate::str::contains("alertmanager"));
}

#[test]
fn add_host_then_list_shows_it_disconnected() {
    let tmp = TempDir::new().unwrap();
    fleetmon(tmp.path())
        .args([
            "add-host",
            "--name",
            "edge-1",
            "--address",
            "192.0.2.10",
            "--user",
            "ops",
            "--password",
            "secret",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("registered host"));

    fleetmon(tmp.path())
        .arg("hosts")
        .assert()
        .success()
        .stdout(predicate::str::contains("edge-1"))
        .stdout(predicate::str::contains("disconnected"));
}

#[test]
fn probe_reports_unreachable_for_closed_port() {
    let tmp = TempDir::new().unwrap();
    fleetmon(tmp.path())
        .args([
            "add-host",
            "--name",
            "dead",
            "--address",
            "127.0.0.1",
            "--port",
            "1",
            "--user",
            "ops",
            "--password",
            "pw",
        ])
        .assert()
        .success();

    fleetmon(tmp.path())
        .args(["probe", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unreachable"));
}

#[test]
fn upload_extract_and_list_mibs() {
    let tmp = TempDir::new().unwrap();
    let archive = tmp.path().join("switch-mibs.zip");
    write_zip(&archive);
    let data_dir = tmp.path().join("data");

    fleetmon(&data_dir)
        .arg("upload")
        .arg(&archive)
        .assert()
        .success()
        .stdout(predicate::str::contains("registered archive"));

    fleetmon(&data_dir)
        .args(["extract", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("extracted 1/1 files"));

    fleetmon(&data_dir)
        .arg("archives")
        .assert()
        .success()
        .stdout(predicate::str::contains("switch-mibs.zip"))
        .stdout(predicate::str::contains("extracted"));

    fleetmon(&data_dir)
        .arg("mibs")
        .assert()
        .success()
        .stdout(predicate::str::contains("switch.mib"))
        .stdout(predicate::str::contains("Cisco"));
}

#[test]
fn extract_of_unknown_archive_fails() {
    let tmp = TempDir::new().unwrap();
    fleetmon(tmp.path())
        .args(["extract", "99"])
        .assert()
        .failure();
}
