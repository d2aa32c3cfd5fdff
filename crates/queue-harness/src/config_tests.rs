//! Tests for harness settings.

use super::*;
use serial_test::serial;
use std::io::Write;

fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Removes an environment variable when dropped
struct EnvGuard(&'static str);

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        std::env::set_var(key, value);
        Self(key)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        std::env::remove_var(self.0);
    }
}

mod defaults {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = HarnessSettings::default();

        assert!(settings.validate().is_ok());
        assert_eq!(settings.exchange.max_attempts, 50);
        assert_eq!(settings.exchange.delay(), Duration::from_millis(200));
        assert_eq!(settings.drain.batch_size, 10);
        assert_eq!(settings.push.input_queue, "harness-input");
        assert_eq!(settings.runtime.concurrency_limit, 1);
    }

    #[test]
    fn test_retry_budget_worst_case_wait() {
        let budget = RetryBudget::new(3, Duration::from_millis(50));

        assert_eq!(budget.max_attempts, 3);
        assert_eq!(budget.worst_case_wait(), Duration::from_millis(150));
    }

    #[test]
    fn test_zero_attempt_budget_has_no_wait() {
        let budget = RetryBudget::new(0, Duration::from_millis(50));
        assert_eq!(budget.worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn test_sub_millisecond_delay_rounds_up() {
        let budget = RetryBudget::new(3, Duration::from_micros(900));

        assert_eq!(budget.delay_ms, 1);
        assert_eq!(budget.delay(), Duration::from_millis(1));
        assert_eq!(budget.worst_case_wait(), Duration::from_millis(3));
    }

    #[test]
    fn test_zero_delay_stays_zero() {
        let budget = RetryBudget::new(3, Duration::ZERO);

        assert_eq!(budget.delay_ms, 0);
        assert_eq!(budget.worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn test_oversized_delay_saturates() {
        let budget = RetryBudget::new(1, Duration::MAX);
        assert_eq!(budget.delay_ms, u64::MAX);
    }

    #[test]
    fn test_worst_case_wait_saturates_on_overflow() {
        let budget = RetryBudget {
            max_attempts: u32::MAX,
            delay_ms: u64::MAX,
        };

        assert_eq!(budget.worst_case_wait(), Duration::MAX);
    }
}

mod validation {
    use super::*;

    #[test]
    fn test_rejects_zero_attempts() {
        let mut settings = HarnessSettings::default();
        settings.exchange.max_attempts = 0;

        assert!(matches!(
            settings.validate(),
            Err(ConfigurationError::Invalid { .. })
        ));
    }

    #[test]
    fn test_rejects_batch_size_outside_receive_limit() {
        let mut settings = HarnessSettings::default();

        settings.drain.batch_size = 0;
        assert!(settings.validate().is_err());

        settings.drain.batch_size = MAX_RECEIVE_BATCH + 1;
        assert!(settings.validate().is_err());

        settings.drain.batch_size = MAX_RECEIVE_BATCH;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_input_queue() {
        let mut settings = HarnessSettings::default();
        settings.push.input_queue = "  ".to_string();

        match settings.validate() {
            Err(ConfigurationError::Missing { key }) => assert_eq!(key, "push.input_queue"),
            other => panic!("expected missing input queue, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_concurrency_and_threshold() {
        let mut settings = HarnessSettings::default();
        settings.runtime.concurrency_limit = 0;
        assert!(settings.validate().is_err());

        let mut settings = HarnessSettings::default();
        settings.push.critical_failure_threshold = 0;
        assert!(settings.validate().is_err());
    }
}

mod loading {
    use super::*;

    #[test]
    #[serial]
    fn test_load_without_file_uses_defaults() {
        let settings = HarnessSettings::load(None).unwrap();
        assert_eq!(settings, HarnessSettings::default());
    }

    #[test]
    #[serial]
    fn test_load_yaml_overrides_only_given_fields() {
        let file = write_yaml(
            r#"
exchange:
  max_attempts: 3
  delay_ms: 50
push:
  input_queue: orders-input
  error_queue: orders-errors
"#,
        );

        let settings = HarnessSettings::load(Some(file.path())).unwrap();

        assert_eq!(settings.exchange, RetryBudget::new(3, Duration::from_millis(50)));
        assert_eq!(settings.push.input_queue, "orders-input");
        assert_eq!(settings.push.error_queue.as_deref(), Some("orders-errors"));
        assert_eq!(settings.drain, DrainSettings::default());
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let file = write_yaml("exchange:\n  max_attempts: 3\n");
        let _guard = EnvGuard::set("QH__EXCHANGE__MAX_ATTEMPTS", "10");

        let settings = HarnessSettings::load(Some(file.path())).unwrap();

        assert_eq!(settings.exchange.max_attempts, 10);
    }

    #[test]
    #[serial]
    fn test_invalid_values_fail_validation_after_loading() {
        let file = write_yaml("drain:\n  batch_size: 25\n");

        let result = HarnessSettings::load(Some(file.path()));

        assert!(matches!(result, Err(ConfigurationError::Invalid { .. })));
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let result = HarnessSettings::load(Some(&path));

        assert!(matches!(result, Err(ConfigurationError::Parsing { .. })));
    }

    #[test]
    #[serial]
    fn test_malformed_value_is_a_parsing_error() {
        let file = write_yaml("exchange:\n  max_attempts: many\n");

        let result = HarnessSettings::load(Some(file.path()));

        assert!(matches!(result, Err(ConfigurationError::Parsing { .. })));
    }
}
