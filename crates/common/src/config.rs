use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn from_env() -> Self {
        match env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
            .as_str()
        {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Read `key` and parse it, falling back to `default` when the variable is
/// unset or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Read `key` as a string, falling back to `default` when unset.
pub fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read `key` as a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Read `key` as an optional value; unset, empty or unparsable yields `None`.
pub fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    // SAFETY (all tests): env mutation is serialized through `#[serial]`.

    #[test]
    #[serial]
    fn environment_defaults_to_development() {
        unsafe { env::remove_var("ENVIRONMENT") };
        assert_eq!(Environment::from_env(), Environment::Development);
    }

    #[test]
    #[serial]
    fn environment_accepts_prod_alias() {
        unsafe { env::set_var("ENVIRONMENT", "PROD") };
        assert_eq!(Environment::from_env(), Environment::Production);
        unsafe { env::remove_var("ENVIRONMENT") };
    }

    #[test]
    #[serial]
    fn env_or_falls_back_on_garbage() {
        unsafe { env::set_var("COMMON_TEST_PORT", "not-a-number") };
        assert_eq!(env_or("COMMON_TEST_PORT", 9888u16), 9888);

        unsafe { env::set_var("COMMON_TEST_PORT", " 7000 ") };
        assert_eq!(env_or("COMMON_TEST_PORT", 9888u16), 7000);
        unsafe { env::remove_var("COMMON_TEST_PORT") };
    }

    #[test]
    #[serial]
    fn env_flag_parses_common_spellings() {
        unsafe { env::set_var("COMMON_TEST_FLAG", "off") };
        assert!(!env_flag("COMMON_TEST_FLAG", true));

        unsafe { env::set_var("COMMON_TEST_FLAG", "Yes") };
        assert!(env_flag("COMMON_TEST_FLAG", false));

        unsafe { env::set_var("COMMON_TEST_FLAG", "maybe") };
        assert!(env_flag("COMMON_TEST_FLAG", true));
        unsafe { env::remove_var("COMMON_TEST_FLAG") };
    }

    #[test]
    #[serial]
    fn env_opt_treats_empty_as_unset() {
        unsafe { env::set_var("COMMON_TEST_OPT", "") };
        assert_eq!(env_opt::<f32>("COMMON_TEST_OPT"), None);

        unsafe { env::set_var("COMMON_TEST_OPT", "0.0005") };
        assert_eq!(env_opt::<f32>("COMMON_TEST_OPT"), Some(0.0005));
        unsafe { env::remove_var("COMMON_TEST_OPT") };
    }
}
