//! Settings for a light unit, read from a json file layered over defaults.
//!
//! Lookups go: value from the file (or set at runtime by a command line
//! override), then the caller's explicit default, then the built-in defaults.
//! A key found nowhere is a [`MissingConfigError`].
use json::JsonValue;
use log::{info, warn};
use regex::Regex;
use std::{error::Error, fmt, io::ErrorKind};

#[derive(Debug)]
pub struct MissingConfigError {
    key: String,
}

impl fmt::Display for MissingConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Required configuration value '{}' is missing", self.key)
    }
}

impl Error for MissingConfigError {}

pub struct Config {
    filename: String,
    settings: JsonValue,
    defaults: JsonValue,
}

impl Config {
    /// Build a config from `filename`.  A missing or unparseable file is not an
    /// error, the defaults carry the unit.  A filename with anything other than
    /// letters, digits, `_`, `-`, `.` and a `.json` extension is rejected.
    pub fn build(filename: &str, defaults: JsonValue) -> Result<Config, std::io::Error> {
        let filename_regex = Regex::new(r"^[a-zA-Z0-9_\-\.]+\.json$")
            .map_err(|e| std::io::Error::new(ErrorKind::Other, e.to_string()))?;
        if !filename_regex.is_match(filename) {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("Invalid filename '{}' - use letters, numbers, underscore, dash, dot and end in .json", filename),
            ));
        }

        let mut config = Config {
            filename: filename.to_string(),
            settings: json::object! {},
            defaults,
        };
        if let Err(err) = config.load_from_file() {
            warn!("{}: using default settings ({})", config.filename, err);
        }
        Ok(config)
    }

    pub fn get_filename(&self) -> &str {
        &self.filename
    }

    fn load_from_file(&mut self) -> std::io::Result<()> {
        let raw_data = std::fs::read_to_string(&self.filename)?;
        match json::parse(&raw_data) {
            Ok(parsed) => {
                self.settings = parsed;
                info!("Loaded settings from {}: {}", self.filename, self.settings.dump());
            }
            Err(err) => {
                warn!("Failed to parse config file {}: {}", self.filename, err);
            }
        }
        Ok(())
    }

    fn lookup<T>(
        &self,
        key: &str,
        default: Option<T>,
        extract: impl Fn(&JsonValue) -> Option<T>,
    ) -> Result<T, MissingConfigError> {
        if let Some(val) = extract(&self.settings[key]) {
            return Ok(val);
        }
        if let Some(def) = default {
            return Ok(def);
        }
        extract(&self.defaults[key]).ok_or_else(|| MissingConfigError {
            key: key.to_string(),
        })
    }

    pub fn get_str_value(&self, key: &str, default: Option<String>) -> Result<String, MissingConfigError> {
        self.lookup(key, default, |v| v.as_str().map(String::from))
    }

    pub fn get_bool_value(&self, key: &str, default: Option<bool>) -> Result<bool, MissingConfigError> {
        self.lookup(key, default, |v| v.as_bool())
    }

    pub fn get_u32_value(&self, key: &str, default: Option<u32>) -> Result<u32, MissingConfigError> {
        self.lookup(key, default, |v| v.as_u32())
    }

    pub fn get_f64_value(&self, key: &str, default: Option<f64>) -> Result<f64, MissingConfigError> {
        self.lookup(key, default, |v| v.as_f64())
    }

    /// Override a setting for the life of the process (command line flags land here)
    pub fn set_value(&mut self, key: &str, val: impl Into<JsonValue>) -> Result<(), String> {
        let json_val = val.into();
        match json_val {
            JsonValue::Short(_) | JsonValue::String(_) | JsonValue::Boolean(_) | JsonValue::Number(_) => {
                self.settings[key] = json_val;
                Ok(())
            }
            _ => Err(format!("Unsupported value type for key: {}", key)),
        }
    }
}

#[cfg(test)]
mod test_config {
    use super::*;

    fn test_defaults() -> JsonValue {
        json::object! {
            "room": "basement",
            "dithering": true,
            "strip_length": 60,
            "bpm": 120.0
        }
    }

    fn test_config(filename: &str) -> Config {
        match Config::build(filename, test_defaults()) {
            Ok(config) => config,
            Err(e) => panic!("Failed to build config: {}", e),
        }
    }

    #[test]
    fn builds_without_a_file() {
        let config = test_config("no_such_light_settings.json");
        assert_eq!(config.get_filename(), "no_such_light_settings.json");
        assert_eq!(config.get_str_value("room", None).unwrap(), "basement");
        assert_eq!(config.get_bool_value("dithering", None).unwrap(), true);
        assert_eq!(config.get_u32_value("strip_length", None).unwrap(), 60);
        assert_eq!(config.get_f64_value("bpm", None).unwrap(), 120.0);
    }

    #[test]
    fn rejects_bad_filenames() {
        match Config::build("lights;rm -rf.json", test_defaults()) {
            Ok(_) => panic!("Expected error for invalid filename"),
            Err(e) => assert_eq!(e.kind(), ErrorKind::InvalidInput),
        }
        assert!(Config::build("lights.toml", test_defaults()).is_err());
    }

    #[test]
    fn override_beats_default() {
        let mut config = test_config("no_such_light_settings.json");
        config.set_value("strip_length", 144).unwrap();
        config.set_value("room", "garage").unwrap();
        assert_eq!(config.get_u32_value("strip_length", None).unwrap(), 144);
        assert_eq!(config.get_str_value("room", Some("ignored".to_string())).unwrap(), "garage");
    }

    #[test]
    fn explicit_default_beats_builtin() {
        let config = test_config("no_such_light_settings.json");
        assert_eq!(config.get_u32_value("strip_length", Some(8)).unwrap(), 8);
        assert_eq!(config.get_u32_value("frame_rate", Some(40)).unwrap(), 40);
    }

    #[test]
    fn missing_key_is_an_error() {
        let config = test_config("no_such_light_settings.json");
        let boom = config.get_str_value("ws_url", None);
        assert_eq!(
            boom.err().unwrap().to_string(),
            "Required configuration value 'ws_url' is missing"
        );
    }

    #[test]
    fn arrays_cannot_be_set() {
        let mut config = test_config("no_such_light_settings.json");
        let res = config.set_value("tracks", json::array![1, 2]);
        assert_eq!(res.err().unwrap(), "Unsupported value type for key: tracks");
    }

    #[test]
    fn reads_values_from_file() {
        let path = "rtjam_lights_test_settings.json";
        std::fs::write(path, r#"{ "room": "attic", "strip_length": 30 }"#).unwrap();
        let config = test_config(path);
        let _ = std::fs::remove_file(path);
        assert_eq!(config.get_str_value("room", None).unwrap(), "attic");
        assert_eq!(config.get_u32_value("strip_length", None).unwrap(), 30);
        assert_eq!(config.get_bool_value("dithering", None).unwrap(), true);
    }
}
