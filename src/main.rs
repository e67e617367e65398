use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ecosentinel::config::{Config, LogFormat, LoggingConfig};
use ecosentinel::detect::{Scorer, Trainer};
use ecosentinel::features::{FeatureSchema, IncidentRecord};
use ecosentinel::storage::dataset::load_incidents;
use ecosentinel::storage::ModelArtifact;

#[derive(Parser)]
#[command(
    name = "ecosentinel",
    about = "Anomaly scoring for geolocated environmental incident reports",
    version,
    long_about = None
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API with the trained model
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Train a model on an incidents file and save the artifact
    Train {
        /// Incidents JSON file (`{"incidents": [...]}`)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Feature schema: incident_type or damage_level
        #[arg(long)]
        schema: Option<FeatureSchema>,

        /// Number of isolation trees
        #[arg(long)]
        trees: Option<usize>,

        /// Expected fraction of anomalies in the training data
        #[arg(long)]
        contamination: Option<f64>,

        /// Random seed for tree construction
        #[arg(long)]
        seed: Option<u64>,

        /// Artifact output path
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Score a single report against the saved model
    Score {
        /// Latitude
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        /// Longitude
        #[arg(long, allow_negative_numbers = true)]
        lng: f64,

        /// Incident type ("Illegal Cutting", "Dumping", "Erosion")
        #[arg(long = "type", conflicts_with = "damage_level", required_unless_present = "damage_level")]
        incident_type: Option<String>,

        /// Damage level (severity code)
        #[arg(long, allow_negative_numbers = true)]
        damage_level: Option<i64>,

        /// Report identifier
        #[arg(long, default_value = "report")]
        id: String,

        /// Model artifact path
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Train in memory on an incidents file and print a prediction per incident
    Run {
        /// Incidents JSON file
        #[arg(long)]
        data: Option<PathBuf>,

        /// Feature schema: incident_type or damage_level
        #[arg(long)]
        schema: Option<FeatureSchema>,
    },

    /// Show metadata of the saved model
    Inspect {
        /// Model artifact path
        #[arg(long)]
        model: Option<PathBuf>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

/// Resolve the configuration under a stderr logger, since the configured one
/// depends on the result.
fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(bootstrap, || Config::resolve(explicit))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = resolve_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting ecosentinel API");
            ecosentinel::serve(config).await?;
        }
        Commands::Train {
            data,
            schema,
            trees,
            contamination,
            seed,
            output,
        } => {
            let data_path = data.unwrap_or(config.data.incidents_path);
            let schema = schema.unwrap_or(config.data.schema);
            let output = output.unwrap_or(config.model.artifact_path.clone());
            let mut params = config.model.train_params();
            if let Some(trees) = trees {
                params.n_estimators = trees;
            }
            if let Some(contamination) = contamination {
                params.contamination = contamination;
            }
            if let Some(seed) = seed {
                params.seed = seed;
            }

            tracing::info!(data = %data_path.display(), %schema, ?params, "Training model");
            let incidents = load_incidents(&data_path)?;
            let (model, batch) = Trainer::new(params).fit_records(schema, &incidents, config.data.invalid_records)?;
            model.persist(&output)?;

            let anomalies = model.predict(&batch.rows)?.into_iter().filter(|l| l.is_anomaly()).count();
            println!("Model trained and saved successfully!");
            println!("  artifact:  {}", output.display());
            println!("  schema:    {}", schema);
            println!("  records:   {} used, {} rejected", batch.len(), batch.rejected.len());
            println!("  anomalies: {} in training set", anomalies);
            for rejected in &batch.rejected {
                println!("  skipped {}: {}", rejected.id, rejected.reason);
            }
        }
        Commands::Score {
            lat,
            lng,
            incident_type,
            damage_level,
            id,
            model,
        } => {
            let model_path = model.unwrap_or(config.model.artifact_path);
            let schema = if incident_type.is_some() {
                FeatureSchema::IncidentType
            } else {
                FeatureSchema::DamageLevel
            };
            let record = IncidentRecord {
                id,
                lat,
                lng,
                incident_type,
                damage_level,
                timestamp: None,
            };

            let scorer = Scorer::load(&model_path)?;
            let label = scorer.score_record(schema, &record)?;

            println!("Report Data: {}", serde_json::to_string(&record)?);
            println!("Prediction Result: {}", label);
        }
        Commands::Run { data, schema } => {
            let data_path = data.unwrap_or(config.data.incidents_path);
            let schema = schema.unwrap_or(config.data.schema);

            let incidents = load_incidents(&data_path)?;
            let (model, batch) = Trainer::new(config.model.train_params()).fit_records(
                schema,
                &incidents,
                config.data.invalid_records,
            )?;
            let labels = model.predict(&batch.rows)?;

            let mut labels = batch.positions.iter().zip(labels).peekable();
            for (index, incident) in incidents.iter().enumerate() {
                let Some((_, label)) = labels.next_if(|(position, _)| **position == index) else {
                    continue;
                };
                let kind = match schema {
                    FeatureSchema::IncidentType => format!("Type: {}", incident.incident_type.as_deref().unwrap_or("-")),
                    FeatureSchema::DamageLevel => format!(
                        "Damage Level: {}",
                        incident.damage_level.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
                    ),
                };
                println!(
                    "Incident ID: {}, {}, Lat: {}, Lng: {}, Prediction: {}",
                    incident.id, kind, incident.lat, incident.lng, label
                );
            }
            for rejected in &batch.rejected {
                println!("Incident ID: {}, skipped: {}", rejected.id, rejected.reason);
            }
        }
        Commands::Inspect { model, json } => {
            let model_path = model.unwrap_or(config.model.artifact_path);
            let artifact = ModelArtifact::load(&model_path)
                .with_context(|| format!("cannot inspect {}", model_path.display()))?;
            let summary = artifact.summary();

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\necosentinel model artifact");
                println!("{:<16} | {}", "Path", model_path.display());
                println!("{:<16} | {}", "Schema", summary.schema);
                println!("{:<16} | {}", "Features", summary.feature_names.join(", "));
                println!("{:<16} | {}", "Trained at", summary.trained_at.to_rfc3339());
                println!("{:<16} | {}", "Training rows", summary.training_rows);
                println!("{:<16} | {}", "Trees", summary.params.n_estimators);
                println!("{:<16} | {}", "Contamination", summary.params.contamination);
                println!("{:<16} | {}", "Seed", summary.params.seed);
                println!("{:<16} | {:.6}", "Offset", summary.offset);
                println!();
            }
        }
    }

    Ok(())
}
