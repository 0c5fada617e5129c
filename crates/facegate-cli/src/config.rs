use facegate_core::session::LoginConfig;
use facegate_core::{matcher, session};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding the enrolled reference images.
    pub face_dir: PathBuf,
    /// SeetaFace detector model file.
    pub detector_model: String,
    /// Smallest face edge, in pixels, the detector will report.
    pub min_face_size: u32,
    /// A face matches when its best norm difference is strictly below this.
    pub match_threshold: f64,
    /// Consecutive face-less frames before a login times out.
    pub max_misses: u32,
    /// Category taxonomy file; the built-in animal set when unset.
    pub taxonomy: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            face_dir: std::env::var("FACEGATE_FACE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("face_data")),
            detector_model: std::env::var("FACEGATE_DETECTOR_MODEL")
                .unwrap_or_else(|_| "seeta_fd_frontal_v1.0.bin".to_string()),
            min_face_size: env_u32("FACEGATE_MIN_FACE_SIZE", 20),
            match_threshold: env_f64("FACEGATE_MATCH_THRESHOLD", matcher::DEFAULT_MATCH_THRESHOLD),
            max_misses: env_u32("FACEGATE_MAX_MISSES", session::DEFAULT_MAX_MISSES),
            taxonomy: std::env::var("FACEGATE_TAXONOMY").ok().map(PathBuf::from),
        }
    }

    pub fn login_config(&self) -> LoginConfig {
        LoginConfig {
            match_threshold: self.match_threshold,
            max_misses: self.max_misses,
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_fallbacks() {
        assert_eq!(env_u32("FACEGATE_TEST_UNSET_U32", 7), 7);
        assert_eq!(env_f64("FACEGATE_TEST_UNSET_F64", 1.5), 1.5);
    }

    #[test]
    fn test_unparsable_value_uses_default() {
        std::env::set_var("FACEGATE_TEST_BAD_U32", "lots");
        assert_eq!(env_u32("FACEGATE_TEST_BAD_U32", 100), 100);
        std::env::set_var("FACEGATE_TEST_GOOD_F64", "4500.5");
        assert_eq!(env_f64("FACEGATE_TEST_GOOD_F64", 8000.0), 4500.5);
    }

    #[test]
    fn test_login_config_from_fields() {
        let config = Config {
            face_dir: PathBuf::from("faces"),
            detector_model: "model.bin".into(),
            min_face_size: 20,
            match_threshold: 1234.0,
            max_misses: 9,
            taxonomy: None,
        };
        assert_eq!(
            config.login_config(),
            LoginConfig {
                match_threshold: 1234.0,
                max_misses: 9
            }
        );
    }
}
