//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(ShardsetError)` on parser failure.
///
/// Example:
/// ```no_run
/// use shardset::parsed_config;
/// use shardset::ShardsetError;
///
/// #[derive(Default)]
/// struct MyConfig {
///     poll_ms: u64,
///     file_path: String,
/// }
///
/// fn example(config_str: Option<&str>) -> Result<(), ShardsetError> {
///     let config = parsed_config!(config_str => MyConfig; poll_ms, file_path)?;
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, ShardsetError> {
            let mut config: $config_type = Default::default();
            if config_str.is_none() {
                return Ok(config);
            }

            let mut table = config_str.unwrap().parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if !table.is_empty() {
                return Err(ShardsetError(format!(
                    "invalid field name '{}' in config",
                    table.keys().next().unwrap(),
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::ShardsetError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        poll_ms: u64,
        name: String,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                poll_ms: 100,
                name: "tick".into(),
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), ShardsetError> {
        let config = parsed_config!(None => TestConfig; poll_ms, name)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), ShardsetError> {
        let config_str = Some("poll_ms = 250");
        let config = parsed_config!(config_str => TestConfig; poll_ms, name)?;
        let ref_config = TestConfig {
            poll_ms: 250,
            name: "tick".into(),
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("warp_factor = 9");
        assert!(parsed_config!(config_str => TestConfig; poll_ms).is_err());
    }
}
