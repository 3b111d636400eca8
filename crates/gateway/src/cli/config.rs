use tern_domain::config::{Config, ConfigSeverity};

/// Print every validation finding for the loaded config.
///
/// Returns `false` when any finding is an error, so `main` can exit
/// non-zero.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let findings = config.validate();
    if findings.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let mut errors = 0usize;
    let mut warnings = 0usize;
    for finding in &findings {
        println!("{finding}");
        match finding.severity {
            ConfigSeverity::Error => errors += 1,
            ConfigSeverity::Warning => warnings += 1,
        }
    }
    println!("\n{errors} error(s), {warnings} warning(s) in {config_path}");

    errors == 0
}

/// Print the effective configuration as TOML, defaults included.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => print!("{rendered}"),
        Err(e) => {
            eprintln!("could not render config as TOML: {e}");
            std::process::exit(1);
        }
    }
}
