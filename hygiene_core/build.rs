// build.rs - TOML-driven compile-time limit generation
use std::env;
use std::fs;
use std::path::Path;

#[derive(serde::Deserialize)]
struct CompileTimeConfig {
    documents: DocumentLimits,
    batch: BatchLimits,
    resolution: ResolutionLimits,
    logging: LoggingLimits,
}

#[derive(serde::Deserialize)]
struct DocumentLimits {
    max_document_bytes: usize,
    max_plugin_output_length: usize,
    max_os_classes: usize,
    max_extra_fields: usize,
    max_cve_entries: usize,
}

#[derive(serde::Deserialize)]
struct BatchLimits {
    max_documents_per_batch: usize,
    max_files_per_batch: usize,
    max_file_size: u64,
}

#[derive(serde::Deserialize)]
struct ResolutionLimits {
    max_commit_retries: usize,
    max_history_per_key: usize,
}

#[derive(serde::Deserialize)]
struct LoggingLimits {
    max_error_collection: usize,
    log_buffer_size: usize,
    max_log_message_length: usize,
    max_log_events_per_source: usize,
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=HYGIENE_BUILD_PROFILE");
    println!("cargo:rerun-if-env-changed=HYGIENE_CONFIG_DIR");

    let profile = env::var("HYGIENE_BUILD_PROFILE").unwrap_or_else(|_| "development".to_string());
    let config_dir = env::var("HYGIENE_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

    // Config lives at the workspace root, one level above this crate
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let workspace_root = Path::new(&manifest_dir)
        .parent()
        .expect("Could not find workspace root (parent directory)");

    let config_path = workspace_root
        .join(&config_dir)
        .join(format!("{}.toml", profile));

    println!("cargo:rerun-if-changed={}", config_path.display());

    if !config_path.exists() {
        panic!(
            "Configuration file not found: {}\nWorkspace root: {}\nLooking for: {}/{}/{}.toml",
            config_path.display(),
            workspace_root.display(),
            workspace_root.display(),
            config_dir,
            profile
        );
    }

    let config_content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", config_path.display(), e));

    let config: CompileTimeConfig = toml::from_str(&config_content)
        .unwrap_or_else(|e| panic!("Invalid TOML in {}: {}", config_path.display(), e));

    validate_limits(&config, &profile);
    generate_constants(&config, &profile);
}

fn validate_limits(config: &CompileTimeConfig, profile: &str) {
    const ABSOLUTE_MAX_DOCUMENT_BYTES: usize = 64 * 1024 * 1024;
    const ABSOLUTE_MAX_FILE_SIZE: u64 = 1_000_000_000;
    const ABSOLUTE_MAX_COMMIT_RETRIES: usize = 64;

    if config.documents.max_document_bytes > ABSOLUTE_MAX_DOCUMENT_BYTES {
        panic!("LIMITS: max_document_bytes exceeds absolute maximum");
    }

    if config.batch.max_file_size > ABSOLUTE_MAX_FILE_SIZE {
        panic!("LIMITS: max_file_size exceeds absolute maximum");
    }

    if config.resolution.max_commit_retries == 0
        || config.resolution.max_commit_retries > ABSOLUTE_MAX_COMMIT_RETRIES
    {
        panic!("LIMITS: max_commit_retries must be within 1..=64");
    }

    if config.resolution.max_history_per_key == 0 {
        panic!("LIMITS: max_history_per_key must be at least 1");
    }

    if config.logging.max_log_events_per_source > config.logging.log_buffer_size {
        panic!("LIMITS: max_log_events_per_source exceeds log_buffer_size");
    }

    if profile == "production" && config.batch.max_file_size > 256_000_000 {
        panic!("PRODUCTION: max_file_size too high for production");
    }
}

fn generate_constants(config: &CompileTimeConfig, profile: &str) {
    let out_dir = env::var("OUT_DIR").unwrap();
    let output_path = Path::new(&out_dir).join("constants.rs");

    let constants_code = format!(
        r#"
// Generated compile-time constants from TOML configuration
// Profile: {}
// DO NOT EDIT - Generated by build.rs

pub mod compile_time {{
    pub mod documents {{
        pub const MAX_DOCUMENT_BYTES: usize = {};
        pub const MAX_PLUGIN_OUTPUT_LENGTH: usize = {};
        pub const MAX_OS_CLASSES: usize = {};
        pub const MAX_EXTRA_FIELDS: usize = {};
        pub const MAX_CVE_ENTRIES: usize = {};
    }}

    pub mod batch {{
        pub const MAX_DOCUMENTS_PER_BATCH: usize = {};
        pub const MAX_FILES_PER_BATCH: usize = {};
        pub const MAX_FILE_SIZE: u64 = {};
    }}

    pub mod resolution {{
        pub const MAX_COMMIT_RETRIES: usize = {};
        pub const MAX_HISTORY_PER_KEY: usize = {};
    }}

    pub mod logging {{
        pub const MAX_ERROR_COLLECTION: usize = {};
        pub const LOG_BUFFER_SIZE: usize = {};
        pub const MAX_LOG_MESSAGE_LENGTH: usize = {};
        pub const MAX_LOG_EVENTS_PER_SOURCE: usize = {};
    }}
}}
"#,
        profile,
        // Documents
        config.documents.max_document_bytes,
        config.documents.max_plugin_output_length,
        config.documents.max_os_classes,
        config.documents.max_extra_fields,
        config.documents.max_cve_entries,
        // Batch
        config.batch.max_documents_per_batch,
        config.batch.max_files_per_batch,
        config.batch.max_file_size,
        // Resolution
        config.resolution.max_commit_retries,
        config.resolution.max_history_per_key,
        // Logging
        config.logging.max_error_collection,
        config.logging.log_buffer_size,
        config.logging.max_log_message_length,
        config.logging.max_log_events_per_source,
    );

    fs::write(output_path, constants_code).unwrap();
}
