use datamart::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        env::remove_var("DATAMART_PROFILE");
        env::remove_var("DATAMART_LOG_LEVEL");
        env::remove_var("DATAMART_DATABASE_URL");
        env::remove_var("DATAMART_REMOTE_TOKEN");
        env::remove_var("DATAMART_REMOTE_FOLDER");
        env::remove_var("DATAMART_QUERY_RETRIES");
        env::remove_var("DATAMART_DATE_FORMAT");
        env::remove_var("DATAMART_PAID_STATUS");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.remote_folder, "extracts");
    assert_eq!(cfg.query_retry.retries, 3);
    assert_eq!(cfg.query_retry.delay_seconds, 5);
    assert_eq!(cfg.mart.date_format, "DD.MM.YYYY HH24:MI");
    assert_eq!(cfg.mart.paid_status, "Paid");
    assert!(cfg.remote_token.is_none());

    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "DATAMART_REMOTE_FOLDER=from-env\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "DATAMART_REMOTE_FOLDER=from-env-test\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "DATAMART_REMOTE_FOLDER=from-env-test-local\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "DATAMART_PROFILE=test\nDATAMART_REMOTE_FOLDER=from-env-local\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.remote_folder, "from-env-test-local");

    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "DATAMART_REMOTE_FOLDER=from-file\n");

    unsafe {
        env::set_var("DATAMART_REMOTE_FOLDER", "from-process-env");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.remote_folder, "from-process-env");

    clear_env();
}

#[test]
fn production_profile_without_token_fails() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "DATAMART_PROFILE=production\n");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("missing token should fail");
    assert!(format!("{err}").contains("remote store token"));

    clear_env();
}

#[test]
fn out_of_range_retries_fail_validation() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "DATAMART_QUERY_RETRIES=0\n");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("zero retries should fail");
    assert!(format!("{err}").contains("query retries"));

    clear_env();
}

#[test]
fn mart_parameters_come_from_env() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "DATAMART_DATE_FORMAT=\"YYYY-MM-DD HH24:MI:SS\"\nDATAMART_PAID_STATUS=Settled\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads");
    assert_eq!(cfg.mart.date_format, "YYYY-MM-DD HH24:MI:SS");
    assert_eq!(cfg.mart.paid_status, "Settled");

    clear_env();
}
