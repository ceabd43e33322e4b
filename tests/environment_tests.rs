//! Integration tests for named environments: create, clone, list, delete.

use std::fs;

use envvault::config::Settings;
use envvault::crypto::{Argon2Params, Auth};
use envvault::environment::EnvironmentManager;
use envvault::errors::EnvVaultError;
use tempfile::TempDir;

const FAST: Argon2Params = Argon2Params {
    memory_kib: 8_192,
    iterations: 1,
    parallelism: 1,
};

const PASSWORD: Auth<'static> = Auth::Password(b"env-password");

/// Helper: a manager over `<tmp>/.envvault` with fast KDF params.
fn manager() -> (TempDir, EnvironmentManager) {
    let dir = TempDir::new().expect("create temp dir");
    let manager = EnvironmentManager::new(dir.path().join(".envvault")).with_argon2_params(FAST);
    (dir, manager)
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

#[test]
fn create_makes_vault_dir_and_file() {
    let (_dir, envs) = manager();
    assert!(!envs.vault_dir().exists());

    let store = envs.create("dev", &PASSWORD).unwrap();
    assert_eq!(store.environment(), "dev");
    assert!(envs.exists("dev").unwrap());
    assert_eq!(store.path(), envs.vault_path("dev").unwrap());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(envs.vault_dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

#[test]
fn create_existing_environment_is_duplicate() {
    let (_dir, envs) = manager();
    envs.create("dev", &PASSWORD).unwrap();
    assert!(matches!(
        envs.create("dev", &PASSWORD),
        Err(EnvVaultError::Duplicate(name)) if name == "dev"
    ));
}

#[test]
fn create_seeded_imports_values() {
    let (_dir, envs) = manager();
    let seed = [("DB_URL", "postgres://localhost/db"), ("PORT", "5432")];
    envs.create_seeded("dev", &PASSWORD, seed).unwrap();

    let store = envs.open("dev", &PASSWORD).unwrap();
    assert_eq!(store.list(), vec!["DB_URL", "PORT"]);
    assert_eq!(store.get_string("PORT").unwrap().as_str(), "5432");
}

#[test]
fn create_seeded_with_bad_name_writes_nothing() {
    let (_dir, envs) = manager();
    let seed = [("GOOD", "1"), ("BAD NAME", "2")];
    assert!(matches!(
        envs.create_seeded("dev", &PASSWORD, seed),
        Err(EnvVaultError::InvalidSecretName(_))
    ));
    assert!(!envs.exists("dev").unwrap());
}

#[test]
fn invalid_environment_names_are_rejected() {
    let (_dir, envs) = manager();
    for name in ["", "Dev", "-dev", "dev-", "../etc", "a/b", "with space"] {
        assert!(
            matches!(
                envs.create(name, &PASSWORD),
                Err(EnvVaultError::InvalidEnvironmentName(_))
            ),
            "{name:?} should be rejected"
        );
    }
    assert!(envs.create(&"a".repeat(65), &PASSWORD).is_err());
    assert!(envs.create("staging-2", &PASSWORD).is_ok());
}

// ---------------------------------------------------------------------------
// Open
// ---------------------------------------------------------------------------

#[test]
fn open_missing_environment_fails() {
    let (_dir, envs) = manager();
    assert!(matches!(
        envs.open("prod", &PASSWORD),
        Err(EnvVaultError::EnvironmentNotFound(name)) if name == "prod"
    ));
}

#[test]
fn load_leaves_environment_locked() {
    let (_dir, envs) = manager();
    envs.create_seeded("dev", &PASSWORD, [("A", "1")]).unwrap();

    let store = envs.load("dev").unwrap();
    assert!(!store.is_unlocked());
    assert_eq!(store.list(), vec!["A"]);
}

// ---------------------------------------------------------------------------
// Clone
// ---------------------------------------------------------------------------

#[test]
fn clone_with_same_password() {
    let (_dir, envs) = manager();
    envs.create_seeded("dev", &PASSWORD, [("A", "1"), ("B", "2")])
        .unwrap();

    let staging = envs.clone("dev", "staging", &PASSWORD, None).unwrap();
    assert_eq!(staging.environment(), "staging");
    assert_eq!(staging.list(), vec!["A", "B"]);

    let reopened = envs.open("staging", &PASSWORD).unwrap();
    assert_eq!(reopened.get_string("B").unwrap().as_str(), "2");
}

#[test]
fn clone_uses_a_fresh_salt() {
    let (_dir, envs) = manager();
    let dev = envs.create_seeded("dev", &PASSWORD, [("A", "1")]).unwrap();
    let staging = envs.clone("dev", "staging", &PASSWORD, None).unwrap();

    assert_ne!(dev.header().salt, staging.header().salt);
    assert_eq!(dev.header().argon2_params(), staging.header().argon2_params());
}

#[test]
fn clone_uses_manager_argon2_params() {
    let dir = TempDir::new().unwrap();
    let vault_dir = dir.path().join(".envvault");

    let fast = EnvironmentManager::new(&vault_dir).with_argon2_params(FAST);
    fast.create_seeded("dev", &PASSWORD, [("A", "1")]).unwrap();

    let stronger = Argon2Params {
        memory_kib: 16_384,
        iterations: 2,
        parallelism: 2,
    };
    let envs = EnvironmentManager::new(&vault_dir).with_argon2_params(stronger);
    let staging = envs.clone("dev", "staging", &PASSWORD, None).unwrap();
    assert_eq!(staging.header().argon2_params(), stronger);

    let reopened = envs.open("staging", &PASSWORD).unwrap();
    assert_eq!(reopened.header().argon2_params(), stronger);
    assert_eq!(reopened.get_string("A").unwrap().as_str(), "1");

    // The source keeps its own parameters.
    let dev = envs.open("dev", &PASSWORD).unwrap();
    assert_eq!(dev.header().argon2_params(), FAST);
}

#[test]
fn clone_with_new_password() {
    let (_dir, envs) = manager();
    envs.create_seeded("dev", &PASSWORD, [("A", "1")]).unwrap();

    let prod_auth = Auth::Password(b"prod-only");
    envs.clone("dev", "prod", &PASSWORD, Some(&prod_auth)).unwrap();

    assert!(matches!(
        envs.open("prod", &PASSWORD),
        Err(EnvVaultError::Authentication)
    ));
    let prod = envs.open("prod", &prod_auth).unwrap();
    assert_eq!(prod.get_string("A").unwrap().as_str(), "1");

    // Source is untouched.
    assert!(envs.open("dev", &PASSWORD).is_ok());
}

#[test]
fn clone_onto_existing_target_is_duplicate() {
    let (_dir, envs) = manager();
    envs.create_seeded("dev", &PASSWORD, [("A", "1")]).unwrap();
    envs.create("staging", &PASSWORD).unwrap();

    assert!(matches!(
        envs.clone("dev", "staging", &PASSWORD, None),
        Err(EnvVaultError::Duplicate(name)) if name == "staging"
    ));

    let staging = envs.open("staging", &PASSWORD).unwrap();
    assert!(staging.is_empty());
}

#[test]
fn clone_with_wrong_source_password_creates_nothing() {
    let (_dir, envs) = manager();
    envs.create("dev", &PASSWORD).unwrap();

    assert!(matches!(
        envs.clone("dev", "staging", &Auth::Password(b"wrong"), None),
        Err(EnvVaultError::Authentication)
    ));
    assert!(!envs.exists("staging").unwrap());
}

#[test]
fn clone_of_missing_source_fails() {
    let (_dir, envs) = manager();
    assert!(matches!(
        envs.clone("dev", "staging", &PASSWORD, None),
        Err(EnvVaultError::EnvironmentNotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// List and delete
// ---------------------------------------------------------------------------

#[test]
fn list_is_sorted_and_ignores_other_files() {
    let (_dir, envs) = manager();
    assert!(envs.list().unwrap().is_empty());

    envs.create("staging", &PASSWORD).unwrap();
    envs.create("dev", &PASSWORD).unwrap();
    envs.create("prod", &PASSWORD).unwrap();
    fs::write(envs.vault_dir().join("notes.txt"), "hi").unwrap();

    let names: Vec<String> = envs.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["dev", "prod", "staging"]);
    assert!(envs.list().unwrap().iter().all(|e| e.size > 0));
}

#[test]
fn list_only_returns_openable_names() {
    let (_dir, envs) = manager();
    envs.create("dev", &PASSWORD).unwrap();
    fs::write(envs.vault_dir().join("Foo.vault"), b"not a vault").unwrap();

    let listed = envs.list().unwrap();
    assert_eq!(listed.len(), 1);
    for info in listed {
        assert!(envs.open(&info.name, &PASSWORD).is_ok());
    }
}

#[test]
fn delete_removes_environment() {
    let (_dir, envs) = manager();
    envs.create("dev", &PASSWORD).unwrap();
    envs.create("staging", &PASSWORD).unwrap();

    envs.delete("staging").unwrap();
    assert!(!envs.exists("staging").unwrap());

    let names: Vec<String> = envs.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["dev"]);
}

#[test]
fn delete_missing_environment_fails() {
    let (_dir, envs) = manager();
    assert!(matches!(
        envs.delete("ghost"),
        Err(EnvVaultError::EnvironmentNotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[test]
fn manager_from_settings_uses_configured_dir_and_params() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join(".envvault.toml"),
        "vault_dir = \"secrets\"\nargon2_memory_kib = 8192\nargon2_iterations = 1\nargon2_parallelism = 1\n",
    )
    .unwrap();

    let settings = Settings::load(dir.path()).unwrap();
    let envs = EnvironmentManager::from_settings(dir.path(), &settings).unwrap();

    assert_eq!(envs.vault_dir(), dir.path().join("secrets"));
    assert_eq!(*envs.argon2_params(), FAST);

    let store = envs.create("dev", &PASSWORD).unwrap();
    assert_eq!(store.header().argon2_params(), FAST);
    assert!(dir.path().join("secrets").join("dev.vault").is_file());
}

#[test]
fn manager_from_settings_rejects_weak_params() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::from_toml_str("argon2_memory_kib = 16\n").unwrap();
    assert!(matches!(
        EnvironmentManager::from_settings(dir.path(), &settings),
        Err(EnvVaultError::Config(_))
    ));
}

#[test]
fn config_params_do_not_affect_unlocking_existing_vaults() {
    let dir = TempDir::new().unwrap();
    let vault_dir = dir.path().join(".envvault");

    let envs = EnvironmentManager::new(&vault_dir).with_argon2_params(FAST);
    envs.create_seeded("dev", &PASSWORD, [("A", "1")]).unwrap();

    // A manager configured with different params still opens the vault.
    let stronger = Argon2Params {
        memory_kib: 16_384,
        iterations: 2,
        parallelism: 2,
    };
    let other = EnvironmentManager::new(&vault_dir).with_argon2_params(stronger);
    let store = other.open("dev", &PASSWORD).unwrap();
    assert_eq!(store.header().argon2_params(), FAST);
}
