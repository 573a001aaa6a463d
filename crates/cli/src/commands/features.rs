//! `copanel features` — The feature table as configured.

use copanel_config::AppConfig;
use copanel_core::EventBus;
use copanel_panels::PanelStateMachine;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let panels = PanelStateMachine::from_config(&config, EventBus::default());

    println!("Features ({:?})", config.panels.direction);
    println!(
        "  {:<10} {:<12} {:<7} {:>7} {:>5} {:>5}  bars",
        "feature", "route", "edge", "default", "min", "max"
    );
    for feature in panels.feature_table().iter() {
        let bars = match (feature.top_bar, feature.bottom_bar) {
            (true, true) => "top+bottom",
            (true, false) => "top",
            (false, true) => "bottom",
            (false, false) => "-",
        };
        println!(
            "  {:<10} {:<12} {:<7} {:>7} {:>5} {:>5}  {}",
            feature.feature_id.to_string(),
            feature.path_prefix,
            panels.physical_position(feature.position).to_string(),
            feature.default_size,
            feature.min_size,
            feature.max_size,
            bars
        );
    }

    Ok(())
}
