use metaid_engine::{Chain, KeyMaterial, KeyRing, Network};
use serde_json::Value;
use std::process::{Command, Output};

const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

fn cli(args: &[&str]) -> Output {
    let binary_path = assert_cmd::cargo::cargo_bin!("metaid-engine");
    Command::new(binary_path)
        .args(args)
        .env_remove("METAID_MNEMONIC")
        .env_remove("METAID_NETWORK")
        .output()
        .expect("cli runs")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn cli_prints_derived_addresses() {
    let output = cli(&["--mnemonic", ABANDON, "address"]);
    assert!(output.status.success(), "cli failed: {}", stderr(&output));

    let stdout = String::from_utf8(output.stdout).expect("stdout is utf8");
    let json: Value = serde_json::from_str(&stdout).expect("stdout is valid json");

    let ring = KeyRing::with_depth(&KeyMaterial::from_mnemonic(ABANDON).unwrap(), Network::Mainnet, 1).unwrap();
    assert_eq!(json["mvc"], ring.address(Chain::Mvc));
    assert_eq!(json["doge"], ring.address(Chain::Doge));
    assert!(json["doge"].as_str().unwrap().starts_with('D'));
}

#[test]
fn cli_testnet_flag_changes_addresses() {
    let main = cli(&["--mnemonic", ABANDON, "address"]);
    let test = cli(&["--mnemonic", ABANDON, "--network", "testnet", "address"]);
    assert!(test.status.success(), "cli failed: {}", stderr(&test));
    assert_ne!(main.stdout, test.stdout);
}

#[test]
fn cli_rejects_modify_without_target() {
    // No mnemonic given: the path check has to fail first
    let output = cli(&["pin", "--operation", "modify", "--path", "/info/name", "--body", "bob"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("requires the target pin id"), "{}", stderr(&output));
}

#[test]
fn cli_requires_mnemonic() {
    let output = cli(&["address"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("METAID_MNEMONIC"));
}

#[test]
fn cli_rejects_bad_input() {
    let chain = cli(&["--mnemonic", ABANDON, "transfer", "--chain", "btc", "--to", "x:1"]);
    assert!(!chain.status.success());

    let receiver = cli(&["--mnemonic", ABANDON, "transfer", "--to", "not-a-receiver"]);
    assert!(!receiver.status.success());
    assert!(stderr(&receiver).contains("ADDRESS:AMOUNT"));

    let mnemonic = cli(&["--mnemonic", "not a real phrase", "address"]);
    assert!(!mnemonic.status.success());
}

fn mvc_address(output: &Output) -> String {
    assert!(output.status.success(), "cli failed: {}", stderr(output));
    let json: Value = serde_json::from_slice(&output.stdout).expect("stdout is valid json");
    json["mvc"].as_str().expect("mvc address").to_string()
}

#[test]
fn cli_signs_from_chosen_address_index() {
    let ring = KeyRing::with_depth(&KeyMaterial::from_mnemonic(ABANDON).unwrap(), Network::Mainnet, 2).unwrap();
    let second = ring.derive(Chain::Mvc, 1).unwrap().address;

    let by_index = cli(&["--mnemonic", ABANDON, "--address-index", "1", "address"]);
    assert_eq!(mvc_address(&by_index), second);

    let by_path = cli(&["--mnemonic", ABANDON, "--derivation-path", "m/44'/10001'/0'/0/1", "address"]);
    assert_eq!(mvc_address(&by_path), second);

    let both = cli(&[
        "--mnemonic",
        ABANDON,
        "--address-index",
        "1",
        "--derivation-path",
        "m/44'/10001'/0'/0/1",
        "address",
    ]);
    assert!(!both.status.success());

    let hardened = cli(&["--mnemonic", ABANDON, "--derivation-path", "m/44'/10001'/0'/0/1'", "address"]);
    assert!(!hardened.status.success());
}

#[test]
fn cli_checks_record_batches_before_the_mnemonic() {
    let garbage = cli(&["pin", "--records", "not json"]);
    assert!(!garbage.status.success());
    assert!(stderr(&garbage).contains("--records"), "{}", stderr(&garbage));

    let batch = r#"[
        {"metaidData": {"operation": "create", "path": "/protocols/simplebuzz", "body": "hi"}},
        {"metaidData": {"operation": "modify", "path": "/info/name", "body": "bob"}, "options": {"refs": {"{0}": 0}}}
    ]"#;
    let output = cli(&["pin", "--records", batch]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("requires the target pin id"), "{}", stderr(&output));

    let clash = cli(&["pin", "--path", "/info/name", "--records", "[]"]);
    assert!(!clash.status.success());

    let neither = cli(&["pin"]);
    assert!(!neither.status.success());
}

#[test]
fn cli_valid_record_batch_gets_to_the_mnemonic() {
    let batch = r#"[{"metaidData": {"operation": "create", "path": "/protocols/simplebuzz", "body": "{0}"}, "options": {"refs": {"{0}": 0}}}]"#;
    let output = cli(&["pin", "--records", batch]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("METAID_MNEMONIC"), "{}", stderr(&output));
}
