use vault_orchestrator::config::Config;
use vault_orchestrator::registry::AccountRegistry;

fn devnet_path() -> String {
    format!("{}/config/devnet.toml", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn test_devnet_config_is_valid() {
    let config = Config::from_file(&devnet_path()).expect("devnet config parses");
    config.validate().expect("devnet config validates");

    assert!(!config.protocols.bundle_a.is_empty());
    assert!(!config.protocols.bundle_b.is_empty());
    assert_eq!(config.submit.confirm_timeout_secs, 90);
    assert!(!config.submit.preflight_simulation);
}

#[test]
fn test_devnet_table_fits_one_lookup_table() {
    let config = Config::from_file(&devnet_path()).unwrap();
    let registry = AccountRegistry::from_config(&config.program, &config.protocols).unwrap();
    let wallet = solana_sdk::pubkey::Pubkey::new_unique();

    let addresses = registry.lookup_table_addresses(&wallet);
    assert!(addresses.len() <= 256);
    assert_eq!(addresses[0], wallet);

    let mut unique = addresses.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), addresses.len());
}

#[test]
fn test_remaining_accounts_keep_bundle_order() {
    let config = Config::from_file(&devnet_path()).unwrap();
    let registry = AccountRegistry::from_config(&config.program, &config.protocols).unwrap();

    let tail = registry.remaining_accounts();
    let expected: Vec<String> = config
        .protocols
        .bundle_a
        .iter()
        .chain(&config.protocols.bundle_b)
        .map(|b| b.address.clone())
        .collect();
    let actual: Vec<String> = tail.iter().map(|m| m.pubkey.to_string()).collect();
    assert_eq!(actual, expected);
}

#[test]
fn test_invalid_batch_size_rejected() {
    let mut config = Config::from_file(&devnet_path()).unwrap();
    config.lookup_table.batch_size = 0;
    assert!(config.validate().is_err());
    config.lookup_table.batch_size = 31;
    assert!(config.validate().is_err());
}
