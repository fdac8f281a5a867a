use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::NaiveDateTime;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use expdb::app::{App, DeriveStep, UploadRequest};
use expdb::catalog::Catalog;
use expdb::codec::Codecs;
use expdb::config::ConfigLoader;
use expdb::domain::{Data, DataType, Modality, NewSubject, TimecourseId};
use expdb::error::ExpdbError;
use expdb::output::JsonOutput;
use expdb::provenance::{GitCli, SystemClock};

#[derive(Parser)]
#[command(name = "expdb")]
#[command(about = "Catalog of human-subject recordings with lineage and provenance")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./expdb.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create, list or show studies")]
    Study(StudyArgs),
    #[command(about = "Create subjects")]
    Subject(SubjectArgs),
    #[command(about = "Enroll a subject in a study")]
    Enroll { study: String, subject: String },
    #[command(about = "Ingest a local file as a new timecourse")]
    Upload(UploadArgs),
    #[command(about = "Derive a timecourse with built-in transforms")]
    Derive(DeriveArgs),
    #[command(about = "Set or clear the pilot flag across a lineage component")]
    Pilot {
        id: i64,
        #[arg(long)]
        clear: bool,
    },
    #[command(about = "Latest timecourse per upload for a subject and modality")]
    Latest { subject: String, modality: Modality },
    #[command(about = "Trace a timecourse back to its original upload")]
    Origin { id: i64 },
    #[command(about = "Most recent timecourse derived from a timecourse")]
    Descendant { id: i64 },
    #[command(about = "Show a timecourse with its lineage edges")]
    Show { id: i64 },
}

#[derive(Args)]
struct StudyArgs {
    #[command(subcommand)]
    command: StudyCommand,
}

#[derive(Subcommand)]
enum StudyCommand {
    Create {
        name: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    Show {
        name: String,
    },
}

#[derive(Args)]
struct SubjectArgs {
    #[command(subcommand)]
    command: SubjectCommand,
}

#[derive(Subcommand)]
enum SubjectCommand {
    Create {
        code: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        meditation_experience: Option<u32>,
    },
}

#[derive(Args)]
struct UploadArgs {
    file: Utf8PathBuf,
    #[arg(long)]
    study: String,
    #[arg(long)]
    subject: String,
    #[arg(long)]
    modality: Modality,
    #[arg(long = "type")]
    data_type: DataType,
    #[arg(long)]
    sampling_rate: f64,
    #[arg(long)]
    pilot: bool,
    /// Collection time, `YYYY-MM-DD HH:MM:SS`; defaults to now
    #[arg(long, value_parser = parse_datetime)]
    date: Option<NaiveDateTime>,
    #[arg(long)]
    description: Option<String>,
}

#[derive(Args)]
struct DeriveArgs {
    #[arg(required = true)]
    inputs: Vec<i64>,
    /// Channels to keep, comma separated
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,
    /// Keep every n-th sample (applied after --select)
    #[arg(long)]
    decimate: Option<usize>,
    #[arg(long)]
    description: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ExpdbError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ExpdbError) -> u8 {
    match error {
        ExpdbError::NotFound(_) | ExpdbError::ConfigRead(_) | ExpdbError::ConfigParse(_) => 2,
        ExpdbError::Transport { .. }
        | ExpdbError::MissingTool(_)
        | ExpdbError::Transcode(_)
        | ExpdbError::SourceControl(_) => 3,
        ExpdbError::Integrity(_) | ExpdbError::UnreproducibleState => 4,
        _ => 1,
    }
}

fn parse_datetime(value: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| format!("expected YYYY-MM-DD HH:MM:SS, got {value}"))
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolved = ConfigLoader::resolve(cli.config.as_deref())?;
    debug!(environment = %resolved.environment, database = %resolved.database, "resolved config");

    let catalog = Catalog::open(&resolved.database)?;
    let storage = resolved.backend.build(Codecs::system())?;
    let mut app = App::new(
        catalog,
        storage,
        GitCli::new(),
        SystemClock,
        resolved.debug,
    );

    match cli.command {
        Commands::Study(args) => match args.command {
            StudyCommand::Create {
                name,
                repo,
                description,
            } => {
                let study = app.create_study(&name, description.as_deref(), &repo)?;
                JsonOutput::print(&study).into_diagnostic()
            }
            StudyCommand::List => JsonOutput::print(&app.studies()?).into_diagnostic(),
            StudyCommand::Show { name } => JsonOutput::print(&app.study(&name)?).into_diagnostic(),
        },
        Commands::Subject(args) => match args.command {
            SubjectCommand::Create {
                code,
                name,
                age,
                meditation_experience,
            } => {
                let subject = app.create_subject(NewSubject {
                    code,
                    name,
                    age,
                    meditation_experience,
                })?;
                JsonOutput::print(&subject).into_diagnostic()
            }
        },
        Commands::Enroll { study, subject } => {
            JsonOutput::print(&app.enroll(&study, &subject)?).into_diagnostic()
        }
        Commands::Upload(args) => {
            let request = UploadRequest {
                data: Data::new(args.sampling_rate, args.modality, args.data_type)?,
                study: args.study,
                subject: args.subject,
                is_pilot: args.pilot,
                source: args.file,
                date_collected: args.date,
                description: args.description,
            };
            JsonOutput::print(&app.upload(request)?).into_diagnostic()
        }
        Commands::Derive(args) => {
            let mut steps = Vec::new();
            if !args.select.is_empty() {
                steps.push(DeriveStep::SelectChannels(args.select));
            }
            if let Some(factor) = args.decimate {
                steps.push(DeriveStep::Decimate(factor));
            }
            let inputs = args.inputs.into_iter().map(TimecourseId).collect();
            JsonOutput::print(&app.derive(&steps, inputs, args.description)?).into_diagnostic()
        }
        Commands::Pilot { id, clear } => {
            JsonOutput::print(&app.set_pilot(TimecourseId(id), !clear)?).into_diagnostic()
        }
        Commands::Latest { subject, modality } => {
            JsonOutput::print(&app.latest(&subject, modality)?).into_diagnostic()
        }
        Commands::Origin { id } => {
            JsonOutput::print(&app.origin(TimecourseId(id))?).into_diagnostic()
        }
        Commands::Descendant { id } => {
            JsonOutput::print(&app.descendant(TimecourseId(id))?).into_diagnostic()
        }
        Commands::Show { id } => JsonOutput::print(&app.show(TimecourseId(id))?).into_diagnostic(),
    }
}
