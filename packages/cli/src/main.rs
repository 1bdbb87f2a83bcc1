#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for foundation grant-geography analysis and scoring.
//!
//! Uses `indicatif-log-bridge` (via [`grant_scout_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod config;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use grant_scout_database::FoundationDb;
use grant_scout_database::scores::CandidateOrder;
use grant_scout_geo::ZipResolver;
use grant_scout_geo::analyzer::{AnalyzeOptions, HomeZipPolicy};
use grant_scout_geo_models::Relation;

use crate::config::{Config, TARGET_ZIP_ENV};

#[derive(Parser)]
#[command(
    name = "grant_scout",
    about = "Foundation grant geography and candidacy scoring"
)]
struct Cli {
    /// Config file (defaults to `grant_scout.toml` if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// `DuckDB` file (overrides the config file and `GRANT_SCOUT_DB`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RelationArg {
    Grants,
    KeyContacts,
    All,
}

impl RelationArg {
    const fn relations(self) -> &'static [Relation] {
        match self {
            Self::Grants => &[Relation::Grants],
            Self::KeyContacts => &[Relation::KeyContacts],
            Self::All => &Relation::ALL,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Score,
    Distance,
}

impl From<OrderArg> for CandidateOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::Score => Self::Score,
            OrderArg::Distance => Self::Distance,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize grant and key-contact geography per foundation
    Analyze {
        /// Which relation to analyze
        #[arg(long, value_enum, default_value_t = RelationArg::All)]
        relation: RelationArg,
        /// Skip foundations whose rows disagree on their home ZIP
        #[arg(long)]
        strict_home_zip: bool,
    },
    /// Score every foundation against the target ZIP
    Score {
        /// Target ZIP (overrides the config file and `GRANT_SCOUT_TARGET_ZIP`)
        #[arg(long)]
        target_zip: Option<String>,
    },
    /// Analyze both relations, then score
    Run {
        /// Target ZIP (overrides the config file and `GRANT_SCOUT_TARGET_ZIP`)
        #[arg(long)]
        target_zip: Option<String>,
        /// Skip foundations whose rows disagree on their home ZIP
        #[arg(long)]
        strict_home_zip: bool,
    },
    /// Load ZIP reference coordinates from a `zipcode,latitude,longitude` CSV
    ImportZips {
        /// CSV file path
        path: PathBuf,
    },
    /// List ZIP codes that could not be resolved
    UnknownZips,
    /// List stored candidates
    Candidates {
        /// Maximum rows to print
        #[arg(long, default_value = "25")]
        limit: usize,
        /// Sort order
        #[arg(long, value_enum, default_value_t = OrderArg::Score)]
        order: OrderArg,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn open_db(config: &Config) -> Result<FoundationDb, Box<dyn std::error::Error>> {
    let db = match &config.database {
        Some(path) => {
            log::info!("Opening {}", path.display());
            FoundationDb::open(path)?
        }
        None => FoundationDb::open_default()?,
    };
    Ok(db)
}

fn analyze_options(config: &Config, strict_flag: bool) -> AnalyzeOptions {
    AnalyzeOptions {
        home_zip_policy: if strict_flag || config.strict_home_zip {
            HomeZipPolicy::Strict
        } else {
            HomeZipPolicy::FirstRowWins
        },
        ..AnalyzeOptions::default()
    }
}

fn target_zip(config: &Config, flag: Option<String>) -> Result<String, String> {
    flag.or_else(|| config.target_zip.clone()).ok_or_else(|| {
        format!("No target ZIP configured (use --target-zip, {TARGET_ZIP_ENV}, or target_zip in the config file)")
    })
}

#[allow(clippy::too_many_lines)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = grant_scout_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database = Some(db);
    }

    match cli.command {
        Commands::Analyze {
            relation,
            strict_home_zip,
        } => {
            let db = open_db(&config)?;
            let mut resolver = ZipResolver::new(&db);
            let options = analyze_options(&config, strict_home_zip);

            for &relation in relation.relations() {
                let report =
                    pipeline::run_analyze(&db, &mut resolver, relation, options, &multi)?;
                pipeline::print_analyze_report(relation, &report);
            }

            resolver.log_stats("analyze");
        }
        Commands::Score { target_zip: flag } => {
            let target = target_zip(&config, flag)?;
            let db = open_db(&config)?;
            let mut resolver = ZipResolver::new(&db);

            let report =
                pipeline::run_score(&db, &mut resolver, &target, config.scoring, &multi)?;
            pipeline::print_scoring_report(&report);

            resolver.log_stats("score");
        }
        Commands::Run {
            target_zip: flag,
            strict_home_zip,
        } => {
            let target = target_zip(&config, flag)?;
            let db = open_db(&config)?;
            let mut resolver = ZipResolver::new(&db);
            let options = analyze_options(&config, strict_home_zip);

            for relation in Relation::ALL {
                let report =
                    pipeline::run_analyze(&db, &mut resolver, relation, options, &multi)?;
                pipeline::print_analyze_report(relation, &report);
            }

            let report =
                pipeline::run_score(&db, &mut resolver, &target, config.scoring, &multi)?;
            pipeline::print_scoring_report(&report);

            resolver.log_stats("run");
        }
        Commands::ImportZips { path } => {
            let db = open_db(&config)?;
            let report = db.import_zip_csv(&path)?;
            println!(
                "Imported {} ZIP coordinates ({} skipped)",
                report.imported, report.skipped
            );
        }
        Commands::UnknownZips => {
            let db = open_db(&config)?;
            let unknown = db.unknown_zips()?;
            println!("{:<10} FIRST SEEN", "ZIP");
            println!("{}", "-".repeat(40));
            for (zip, first_seen) in &unknown {
                println!("{zip:<10} {first_seen}");
            }
            println!("{} unknown ZIP codes", unknown.len());
        }
        Commands::Candidates { limit, order, json } => {
            let db = open_db(&config)?;
            let candidates = db.top_candidates(limit, order.into())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else {
                println!(
                    "{:<12} {:<36} {:<5} {:<6} {:>6} {:>6} {:>7} {:>12} {:>9}",
                    "EIN", "NAME", "STATE", "ZIP", "SCORE", "SIM", "GRANTS", "AVG GRANT", "MILES"
                );
                println!("{}", "-".repeat(110));
                for c in &candidates {
                    println!(
                        "{:<12} {:<36} {:<5} {:<6} {:>6.3} {:>6} {:>7} {:>12.0} {:>9}",
                        c.ein,
                        c.name.chars().take(36).collect::<String>(),
                        c.state.as_deref().unwrap_or("-"),
                        c.zipcode.as_deref().unwrap_or("-"),
                        c.score,
                        c.semantic_similarity
                            .map_or_else(|| "-".to_string(), |s| format!("{s:.3}")),
                        c.total_relevant_grants,
                        c.avg_grant_size,
                        c.distance_to_target
                            .map_or_else(|| "-".to_string(), |d| format!("{d:.1}")),
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_config_target() {
        let config = Config {
            target_zip: Some("10001".to_string()),
            ..Config::default()
        };

        assert_eq!(target_zip(&config, Some("02134".to_string())).unwrap(), "02134");
        assert_eq!(target_zip(&config, None).unwrap(), "10001");
        assert!(target_zip(&Config::default(), None).is_err());
    }

    #[test]
    fn strict_policy_from_flag_or_config() {
        let config = Config::default();
        assert_eq!(
            analyze_options(&config, false).home_zip_policy,
            HomeZipPolicy::FirstRowWins
        );
        assert_eq!(
            analyze_options(&config, true).home_zip_policy,
            HomeZipPolicy::Strict
        );

        let strict = Config {
            strict_home_zip: true,
            ..Config::default()
        };
        assert_eq!(
            analyze_options(&strict, false).home_zip_policy,
            HomeZipPolicy::Strict
        );
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "grant_scout",
            "--db",
            "x.duckdb",
            "candidates",
            "--limit",
            "5",
            "--order",
            "distance",
        ])
        .unwrap();

        assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("x.duckdb")));
        assert!(matches!(
            cli.command,
            Commands::Candidates {
                limit: 5,
                order: OrderArg::Distance,
                json: false
            }
        ));
    }
}
