//! `copanel status` — Show the resolved configuration.

use copanel_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let or_unset = |v: &Option<String>| v.clone().unwrap_or_else(|| "(unset)".into());

    println!("copanel Status");
    println!("==============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Backend:      {}", config.backend.base_url);
    println!("  Timeout:      {}s", config.backend.timeout_secs);
    println!("  Reply type:   {:?}", config.backend.reply_type);
    println!("  Direction:    {:?}", config.panels.direction);
    println!("  Transition:   {}ms", config.panels.transition_ms);
    println!(
        "  Persistence:  {}",
        if config.session.persist {
            format!("on ({})", config.session.store_path().display())
        } else {
            "off".into()
        }
    );
    println!("  User:         {}", or_unset(&config.session.user_id));
    println!("  Subject:      {}", or_unset(&config.session.subject_id));
    println!(
        "  Matcher:      top {} (similarity {}, frequency {}, position {})",
        config.matcher.max_suggestions,
        config.matcher.similarity_weight,
        config.matcher.frequency_weight,
        config.matcher.positional_bonus
    );

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file, using defaults. Run `copanel onboard` to create one.");
    }

    Ok(())
}
