use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use clinic_types::NonEmptyText;
use fhir::identifier::PERSONAL_ID_SYSTEM;
use fhir::{
    CoverageOrder, Encounter, Identifier, Patient, PatientData, Reference, VisitStatus, VisitType,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinic_core::config::import_pacing_from_env_values;
use clinic_core::constants::{DEFAULT_CURRENCY, DEFAULT_DATA_DIR};
use clinic_core::import::ColumnMap;
use clinic_core::{
    CancelFlag, CatalogService, CoreConfig, CoverageService, CoverageValues, DuplicateCheck,
    DuplicateResolution, FileResourceStore, ImportPipeline, LinkKind, PatientRegistration,
    RegistrationOutcome, VisitSearch, VisitService,
};

const ORGANIZATION: &str = "Organization";

#[derive(Parser)]
#[command(name = "clinic")]
#[command(about = "Clinic records: service catalog import, coverages and patient checks")]
struct Cli {
    /// Data directory (overrides CLINIC_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Operator name recorded in audit logs (overrides CLINIC_OPERATOR)
    #[arg(long, global = true)]
    operator: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import service catalog rows from a JSON or YAML file
    Import {
        /// Source file (.json, .yaml or .yml)
        source: PathBuf,
        /// Column mapping file (optional)
        #[arg(long)]
        columns: Option<PathBuf>,
    },
    /// Look up patients by personal id
    CheckDuplicate { personal_id: String },
    /// Register a patient, checking for duplicates first
    RegisterPatient {
        #[arg(long)]
        personal_id: Option<String>,
        #[arg(long)]
        family: String,
        /// Given name (repeatable)
        #[arg(long)]
        given: Vec<String>,
        /// Open the existing patient when the personal id is taken
        #[arg(long, conflicts_with = "register_anyway")]
        open_existing: bool,
        /// Register despite a duplicate; the reason is recorded
        #[arg(long)]
        register_anyway: Option<String>,
    },
    /// List the coverages of a visit in slot order
    Coverages { encounter_id: String },
    /// Create or replace the coverage in one slot of a visit
    SetCoverage {
        encounter_id: String,
        /// Slot 1, 2 or 3
        #[arg(long)]
        order: u8,
        /// Paying organisation id
        #[arg(long)]
        payor: String,
        /// Patient id
        #[arg(long)]
        beneficiary: String,
    },
    /// Delete one coverage; the other slots keep their order
    DeleteCoverage { coverage_id: String },
    /// Link specimen or observation definitions to a service
    Link {
        /// Service code
        code: String,
        #[arg(long)]
        specimen: Vec<String>,
        #[arg(long)]
        observation: Vec<String>,
    },
    /// Remove a specimen or observation link from a service
    Unlink {
        /// Service code
        code: String,
        #[arg(long)]
        specimen: Option<String>,
        #[arg(long)]
        observation: Option<String>,
    },
    /// Enable or disable lab integration for a service
    LabIntegration {
        /// Service code
        code: String,
        #[arg(long)]
        disable: bool,
        #[arg(long)]
        provider: Option<String>,
    },
    /// Search visits
    Visits {
        /// Insurance company (organisation id)
        #[arg(long)]
        insurer: Option<String>,
        #[arg(long)]
        personal_id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        registration_number: Option<String>,
        /// Visit status (planned, arrived, in-progress, finished, ...)
        #[arg(long, value_parser = parse_visit_status)]
        status: Option<VisitStatus>,
        /// Visit type: stationary, ambulatory or emergency (IMP, AMB, EMER also accepted)
        #[arg(long, value_parser = parse_visit_type)]
        visit_type: Option<VisitType>,
        /// First visit date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last visit date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        count: Option<usize>,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

/// Entry point for the `clinic` command.
///
/// # Environment Variables
/// - `CLINIC_DATA_DIR`: data directory (default: "clinic_data")
/// - `CLINIC_OPERATOR`: operator name, required
/// - `CLINIC_CURRENCY`: currency for imported prices (default: "PLN")
/// - `CLINIC_IMPORT_PAUSE_EVERY` / `CLINIC_IMPORT_PAUSE_MS`: import pacing
///
/// Exits non-zero on configuration errors and when an import has failed rows.
fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("clinic=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::debug!(data_dir = %config.data_dir().display(), "opening store");
    let store = FileResourceStore::open(config.data_dir())?;

    match cli.command {
        Commands::Import { source, columns } => {
            let mut pipeline = ImportPipeline::new(&store, &config);
            if let Some(path) = columns {
                pipeline = pipeline.with_columns(ColumnMap::from_file(&path)?);
            }
            let summary = pipeline.run_file(&source, &CancelFlag::new())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.is_failure() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::CheckDuplicate { personal_id } => {
            let registration = PatientRegistration::new(&store, config.operator().clone());
            match registration.detector().find_by_personal_id(&personal_id)? {
                DuplicateCheck::NoMatch => println!("No patient with personal id {personal_id}."),
                DuplicateCheck::Match { patient, warning } => {
                    println!(
                        "Match: Patient/{} {}",
                        patient.id.as_deref().unwrap_or_default(),
                        patient.display_name()
                    );
                    if let Some(warning) = warning {
                        println!("Warning: {warning}");
                    }
                }
            }
        }
        Commands::RegisterPatient {
            personal_id,
            family,
            given,
            open_existing,
            register_anyway,
        } => {
            let identifiers = personal_id
                .map(|id| Identifier::new(PERSONAL_ID_SYSTEM, &id))
                .transpose()?
                .into_iter()
                .collect();
            let patient = PatientData {
                identifiers,
                family: Some(family),
                given,
                ..PatientData::default()
            };
            let resolution = match (open_existing, register_anyway) {
                (true, _) => Some(DuplicateResolution::OpenExisting),
                (false, Some(reason)) => Some(DuplicateResolution::RegisterAnyway {
                    reason: NonEmptyText::new(&reason)?,
                }),
                (false, None) => None,
            };
            let registration = PatientRegistration::new(&store, config.operator().clone());
            match registration.register(&patient, resolution.as_ref())? {
                RegistrationOutcome::Created(p) => {
                    println!("Created Patient/{}", p.id.as_deref().unwrap_or_default())
                }
                RegistrationOutcome::OpenedExisting(p) => {
                    println!("Existing Patient/{}", p.id.as_deref().unwrap_or_default())
                }
                RegistrationOutcome::Cancelled => println!("Cancelled."),
            }
        }
        Commands::Coverages { encounter_id } => {
            let encounter = Reference::new(Encounter::RESOURCE_TYPE, &encounter_id)?;
            let coverages = CoverageService::new(&store).fetch_coverages_for_encounter(&encounter)?;
            if coverages.is_empty() {
                println!("No coverages found.");
            }
            for coverage in coverages {
                let order = coverage
                    .order
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "[{order}] Coverage/{} payor: {}, status: {}",
                    coverage.id.as_deref().unwrap_or_default(),
                    coverage.payor,
                    coverage.status.to_wire()
                );
            }
        }
        Commands::SetCoverage {
            encounter_id,
            order,
            payor,
            beneficiary,
        } => {
            let encounter = Reference::new(Encounter::RESOURCE_TYPE, &encounter_id)?;
            let values = CoverageValues::new(
                Reference::new(ORGANIZATION, &payor)?,
                Reference::new(Patient::RESOURCE_TYPE, &beneficiary)?,
            );
            let stored = CoverageService::new(&store).upsert_coverage(
                &encounter,
                &values,
                CoverageOrder::new(order)?,
            )?;
            println!(
                "Stored Coverage/{} in slot {order}",
                stored.id.as_deref().unwrap_or_default()
            );
        }
        Commands::DeleteCoverage { coverage_id } => {
            CoverageService::new(&store).delete_coverage(&coverage_id)?;
            println!("Deleted Coverage/{coverage_id}");
        }
        Commands::Link {
            code,
            specimen,
            observation,
        } => {
            let catalog = CatalogService::new(&store);
            let id = service_id(&catalog, &code)?;
            let specimen: Vec<&str> = specimen.iter().map(String::as_str).collect();
            let observation: Vec<&str> = observation.iter().map(String::as_str).collect();
            let mut changed = catalog.link(&id, LinkKind::Specimen, &specimen)?;
            changed |= catalog.link(&id, LinkKind::Observation, &observation)?;
            report_change(&code, changed);
        }
        Commands::Unlink {
            code,
            specimen,
            observation,
        } => {
            let catalog = CatalogService::new(&store);
            let id = service_id(&catalog, &code)?;
            let mut changed = false;
            if let Some(target) = specimen {
                changed |= catalog.unlink(&id, LinkKind::Specimen, &target)?;
            }
            if let Some(target) = observation {
                changed |= catalog.unlink(&id, LinkKind::Observation, &target)?;
            }
            report_change(&code, changed);
        }
        Commands::LabIntegration {
            code,
            disable,
            provider,
        } => {
            let catalog = CatalogService::new(&store);
            let id = service_id(&catalog, &code)?;
            let changed = catalog.set_lab_integration(&id, !disable, provider.as_deref())?;
            report_change(&code, changed);
        }
        Commands::Visits {
            insurer,
            personal_id,
            name,
            registration_number,
            status,
            visit_type,
            from,
            to,
            count,
            offset,
        } => {
            let criteria = VisitSearch {
                insurance_company: insurer
                    .map(|id| Reference::new(ORGANIZATION, &id))
                    .transpose()?,
                personal_id,
                name,
                registration_number,
                status,
                visit_type,
                from,
                to,
                count,
                offset,
            };
            let records = VisitService::new(&store).search(&criteria)?;
            if records.is_empty() {
                println!("No visits found.");
            }
            for record in records {
                let start = record
                    .visit
                    .period
                    .start
                    .map(|s| s.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "Encounter/{} {} {} {start}, coverages: {}",
                    record.visit.id.as_deref().unwrap_or_default(),
                    record.visit.patient,
                    record.visit.status.to_wire(),
                    record.coverages.len()
                );
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(cli: &Cli) -> anyhow::Result<CoreConfig> {
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| std::env::var_os("CLINIC_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let operator = cli
        .operator
        .clone()
        .or_else(|| std::env::var("CLINIC_OPERATOR").ok())
        .unwrap_or_default();
    let currency = std::env::var("CLINIC_CURRENCY").unwrap_or_else(|_| DEFAULT_CURRENCY.into());
    let pacing = import_pacing_from_env_values(
        std::env::var("CLINIC_IMPORT_PAUSE_EVERY").ok(),
        std::env::var("CLINIC_IMPORT_PAUSE_MS").ok(),
    )?;

    Ok(CoreConfig::new(data_dir, &operator, &currency, pacing)?)
}

fn service_id<S: clinic_core::ResourceStore>(
    catalog: &CatalogService<S>,
    code: &str,
) -> anyhow::Result<String> {
    catalog
        .find_by_code(code)?
        .and_then(|entry| entry.id)
        .ok_or_else(|| anyhow::anyhow!("no service with code {code}"))
}

fn parse_visit_status(value: &str) -> Result<VisitStatus, String> {
    VisitStatus::from_wire(&value.trim().to_ascii_lowercase())
        .ok_or_else(|| format!("unknown visit status '{value}'"))
}

fn parse_visit_type(value: &str) -> Result<VisitType, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "stationary" | "imp" => Ok(VisitType::Stationary),
        "ambulatory" | "amb" => Ok(VisitType::Ambulatory),
        "emergency" | "emer" => Ok(VisitType::Emergency),
        _ => Err(format!("unknown visit type '{value}'")),
    }
}

fn report_change(code: &str, changed: bool) {
    if changed {
        println!("Updated service {code}.");
    } else {
        println!("Service {code} already up to date.");
    }
}
