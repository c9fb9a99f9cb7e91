use super::*;
use tempfile::TempDir;

#[test]
fn defaults_are_valid() {
    let config = Config {
        model: ModelConfig::default(),
        embedding: EmbeddingConfig::default(),
        search: SearchConfig::default(),
        locale: LocaleConfig::default(),
        base_dir: PathBuf::new(),
    };
    assert!(config.validate().is_ok());
    assert_eq!(config.model.temperature, 0.5);
    assert_eq!(config.model.max_tool_rounds, 6);
    assert_eq!(config.search.restaurant_results, 3);
    assert_eq!(config.search.dish_results, 5);
}

#[test]
fn load_missing_file_returns_defaults() {
    let dir = TempDir::new().expect("temp dir");
    let config = Config::load(dir.path()).expect("load");
    assert_eq!(config.model, ModelConfig::default());
    assert_eq!(config.base_dir, dir.path());
}

#[test]
fn save_and_reload_round_trip() {
    let dir = TempDir::new().expect("temp dir");
    let mut config = Config::load(dir.path()).expect("load");
    config.model.model = "gpt-4o-mini".to_string();
    config.model.temperature = 0.2;
    config.search.dish_results = 7;
    config.save().expect("save");

    let reloaded = Config::load(dir.path()).expect("reload");
    assert_eq!(reloaded.model.model, "gpt-4o-mini");
    assert_eq!(reloaded.model.temperature, 0.2);
    assert_eq!(reloaded.search.dish_results, 7);
}

#[test]
fn rejects_bad_temperature() {
    let mut model = ModelConfig::default();
    model.temperature = 3.5;
    assert!(matches!(
        model.validate(),
        Err(ConfigError::InvalidTemperature(_))
    ));
}

#[test]
fn rejects_zero_tool_rounds() {
    let mut model = ModelConfig::default();
    model.max_tool_rounds = 0;
    assert!(matches!(
        model.validate(),
        Err(ConfigError::InvalidToolRounds(0))
    ));
}

#[test]
fn rejects_default_count_above_cap() {
    let search = SearchConfig {
        restaurant_results: 20,
        dish_results: 5,
        max_results: 10,
    };
    assert!(matches!(
        search.validate(),
        Err(ConfigError::DefaultExceedsMax(20, 10))
    ));
}

#[test]
fn rejects_unknown_timezone() {
    let mut locale = LocaleConfig::default();
    locale.timezone = "Mars/Olympus_Mons".to_string();
    assert!(matches!(
        locale.validate(),
        Err(ConfigError::InvalidTimezone(_))
    ));
}

#[test]
fn rejects_inverted_meal_window() {
    let mut locale = LocaleConfig::default();
    std::mem::swap(&mut locale.lunch.start, &mut locale.lunch.end);
    assert!(matches!(
        locale.validate(),
        Err(ConfigError::InvalidMealWindow(..))
    ));
}

#[test]
fn meal_window_contains_is_half_open() {
    let locale = LocaleConfig::default();
    let at = |s: &str| s.parse::<TimeOfDay>().expect("time");
    assert!(locale.lunch.contains(at("13:00")));
    assert!(locale.lunch.contains(at("15:59")));
    assert!(!locale.lunch.contains(at("16:00")));
    assert!(!locale.lunch.contains(at("12:59")));
}

#[test]
fn rejects_bad_embedding_protocol() {
    let mut embedding = EmbeddingConfig::default();
    embedding.protocol = "ftp".to_string();
    assert!(matches!(
        embedding.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));
}
