use anyhow::Result;
use colored::*;
use is_terminal::IsTerminal;
use std::io;
use tabled::{
    settings::{object::Rows, Alignment, Color, Modify, Style},
    Table, Tabled,
};

use crate::cli::OutputFormat;
use scenariod::ScenarioRegistry;

/// Listing sections, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioGroup {
    PacketLoss,
    Latency,
    MultiFailure,
    Outage,
}

impl ScenarioGroup {
    pub fn of(name: &str) -> Self {
        if name.starts_with("packet-loss") {
            ScenarioGroup::PacketLoss
        } else if name.starts_with("latency") {
            ScenarioGroup::Latency
        } else if name.starts_with("multi-failure") {
            ScenarioGroup::MultiFailure
        } else {
            ScenarioGroup::Outage
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ScenarioGroup::PacketLoss => "Packet loss",
            ScenarioGroup::Latency => "Latency",
            ScenarioGroup::MultiFailure => "Multiple failures",
            ScenarioGroup::Outage => "Outages",
        }
    }
}

#[derive(Tabled)]
struct ScenarioRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Phased")]
    phased: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ScenarioInfo {
    pub name: String,
    pub group: ScenarioGroup,
    pub description: String,
    pub phased: bool,
}

/// Every registered scenario, grouped then sorted by name
pub fn scenario_infos(registry: &ScenarioRegistry) -> Vec<ScenarioInfo> {
    let mut infos: Vec<ScenarioInfo> = registry
        .sorted()
        .iter()
        .map(|s| ScenarioInfo {
            name: s.name().to_string(),
            group: ScenarioGroup::of(s.name()),
            description: s.description().to_string(),
            phased: s.reports_outcome(),
        })
        .collect();
    infos.sort_by(|a, b| a.group.cmp(&b.group).then_with(|| a.name.cmp(&b.name)));
    infos
}

pub fn run_list_command(registry: &ScenarioRegistry, format: OutputFormat) -> Result<()> {
    let infos = scenario_infos(registry);

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&infos)?;
            println!("{}", json);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&infos)?;
            print!("{}", yaml);
        }
        OutputFormat::Table => display_table(&infos),
    }

    Ok(())
}

fn display_table(infos: &[ScenarioInfo]) {
    if infos.is_empty() {
        println!("No scenarios registered.");
        return;
    }

    let is_tty = io::stdout().is_terminal();

    let rows: Vec<ScenarioRow> = infos
        .iter()
        .map(|info| ScenarioRow {
            name: info.name.clone(),
            group: info.group.title().to_string(),
            phased: if info.phased { "yes" } else { "no" }.to_string(),
            description: info.description.clone(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());

    if is_tty {
        table.with(Modify::new(Rows::one(0)).with(Color::FG_BRIGHT_CYAN));

        for (i, info) in infos.iter().enumerate() {
            let row_index = i + 1;
            let color = match info.group {
                ScenarioGroup::PacketLoss => Color::FG_YELLOW,
                ScenarioGroup::Latency => Color::FG_BLUE,
                ScenarioGroup::MultiFailure => Color::FG_MAGENTA,
                ScenarioGroup::Outage => Color::FG_RED,
            };
            table.with(Modify::new(Rows::one(row_index)).with(color));
        }
    }

    table.with(Modify::new(Rows::new(1..)).with(Alignment::left()));
    println!("{}", table);

    if is_tty {
        println!();
        println!("{} scenarios", infos.len().to_string().bold());
        println!(
            "Run one with {} or everything with {}",
            "--scenario <name>".green(),
            "--scenario all".green()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenariod::{CatalogOptions, NoopMetrics};
    use std::sync::Arc;

    #[test]
    fn test_group_of() {
        assert_eq!(ScenarioGroup::of("packet-loss"), ScenarioGroup::PacketLoss);
        assert_eq!(ScenarioGroup::of("packet-loss-25-pct"), ScenarioGroup::PacketLoss);
        assert_eq!(ScenarioGroup::of("latency-200ms-5s"), ScenarioGroup::Latency);
        assert_eq!(
            ScenarioGroup::of("multi-failure-2-servers-latency"),
            ScenarioGroup::MultiFailure
        );
        assert_eq!(ScenarioGroup::of("flapping-node"), ScenarioGroup::Outage);
        assert_eq!(ScenarioGroup::of("total-packet-drop"), ScenarioGroup::Outage);
    }

    #[test]
    fn test_infos_grouped_and_sorted() {
        let registry =
            ScenarioRegistry::builtin(Arc::new(NoopMetrics), &CatalogOptions::default());
        let infos = scenario_infos(&registry);

        assert_eq!(infos.len(), registry.len());
        assert_eq!(infos[0].group, ScenarioGroup::PacketLoss);
        assert_eq!(infos.last().unwrap().group, ScenarioGroup::Outage);
        for pair in infos.windows(2) {
            let ordered = pair[0].group < pair[1].group
                || (pair[0].group == pair[1].group && pair[0].name < pair[1].name);
            assert!(ordered, "{} before {}", pair[0].name, pair[1].name);
        }
    }

    #[test]
    fn test_json_shape() {
        let registry =
            ScenarioRegistry::builtin(Arc::new(NoopMetrics), &CatalogOptions::default());
        let infos = scenario_infos(&registry);
        let value = serde_json::to_value(&infos).unwrap();

        let first = &value[0];
        assert_eq!(first["group"], "packet-loss");
        assert!(first["name"].as_str().unwrap().starts_with("packet-loss"));
        assert!(first["phased"].is_boolean());
    }
}
