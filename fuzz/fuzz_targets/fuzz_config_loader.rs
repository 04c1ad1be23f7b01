#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse, validate and convert arbitrary TOML; every step may reject, none may panic.
    let Ok(cfg) = brew_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_err() {
        return;
    }
    if let Ok(brew) = brew_core::BrewConfig::try_from(&cfg) {
        let _ = brew.validate();
    }
    let _ = brew_core::EngineCfg::from(&cfg);
});
