use app_config::LomsConfig;

#[test]
fn test_load_default_config() {
    let cfg = LomsConfig::load().unwrap();
    assert_eq!(cfg.db_host, "localhost");
    assert_eq!(cfg.db_name, "loms_db");
}
