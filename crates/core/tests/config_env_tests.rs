use std::io::Write;

use batchd_core::{AppConfig, StoreBackend};

// 环境变量是进程级的，这个测试文件只放一个用例
#[test]
fn test_environment_overrides_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(b"[worker]\nname = \"from-file\"\nmax_jobs_running = 2\n")
        .unwrap();

    std::env::set_var("BATCHD_WORKER__MAX_JOBS_RUNNING", "8");
    std::env::set_var("BATCHD_STORE__BACKEND", "sqlite");
    let config = AppConfig::load(Some(file.path().to_str().unwrap()));
    std::env::remove_var("BATCHD_WORKER__MAX_JOBS_RUNNING");
    std::env::remove_var("BATCHD_STORE__BACKEND");

    let config = config.unwrap();
    assert_eq!(config.worker.name, "from-file");
    assert_eq!(config.worker.max_jobs_running, 8);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
}
