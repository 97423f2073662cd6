use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use dsclient::{
    DataStore, DataStoreConfig, DataStoreRegistry, DataStoreTransport, MockDataStore,
    OrderedDataStore, ProtocolGeneration, ReqwestTransport, SessionContext, SortDirection,
    StoreOptions, StoredValue, VersionQuery, WriteOptions,
};
use serde_json::{Map, Value};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dsclient-cli")]
#[command(about = "Command line access to remote data stores")]
struct Cli {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, value_enum, default_value_t = Backend::Http, global = true)]
    backend: Backend,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct TargetArgs {
    /// Store name. Omit to use the unnamed legacy store.
    #[arg(long, global = true)]
    store: Option<String>,
    #[arg(long, global = true)]
    scope: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    ordered: bool,
    #[arg(long = "all-scopes", action = ArgAction::SetTrue, global = true)]
    all_scopes: bool,
    /// Overrides DSCLIENT_GENERATION.
    #[arg(long, value_enum, global = true)]
    generation: Option<GenerationArg>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Get {
        key: String,
    },
    Set {
        key: String,
        /// JSON text of the value.
        value: String,
        #[arg(long = "user-id")]
        user_ids: Vec<i64>,
        /// JSON object stored alongside the value.
        #[arg(long)]
        metadata: Option<String>,
    },
    Increment {
        key: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    Remove {
        key: String,
    },
    GetVersion {
        key: String,
        version: String,
    },
    /// The version that was current at an RFC 3339 time.
    GetVersionAt {
        key: String,
        time: String,
    },
    RemoveVersion {
        key: String,
        version: String,
    },
    ListKeys {
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(long, default_value_t = 50)]
        page_size: usize,
    },
    ListVersions {
        key: String,
        #[arg(long, action = ArgAction::SetTrue)]
        descending: bool,
        #[arg(long, default_value_t = 50)]
        page_size: usize,
    },
    Sorted {
        #[arg(long, action = ArgAction::SetTrue)]
        descending: bool,
        #[arg(long, default_value_t = 50)]
        page_size: usize,
        #[arg(long, allow_hyphen_values = true)]
        min: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        max: Option<f64>,
    },
    ListStores {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, default_value_t = 50)]
        page_size: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Http,
    /// In-memory emulation; state lives for one invocation.
    Mock,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GenerationArg {
    Legacy,
    V1,
    V2,
}

impl From<GenerationArg> for ProtocolGeneration {
    fn from(value: GenerationArg) -> Self {
        match value {
            GenerationArg::Legacy => ProtocolGeneration::Legacy,
            GenerationArg::V1 => ProtocolGeneration::V1,
            GenerationArg::V2 => ProtocolGeneration::V2,
        }
    }
}

enum Target {
    Standard(Arc<DataStore>),
    Ordered(Arc<OrderedDataStore>),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        };
        if let Ok(directive) = level.parse() {
            filter = filter.add_directive(directive);
        }
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run(cli: Cli) -> Result<ExitCode, String> {
    let registry = build_registry(cli.backend, cli.target.generation)?;
    if let Commands::ListStores { prefix, page_size } = &cli.command {
        let stores = registry
            .list_stores(prefix.as_deref(), *page_size)
            .await
            .map_err(|e| e.to_string())?
            .collect_remaining()
            .await
            .map_err(|e| e.to_string())?;
        for store in stores {
            println!("{}", store.name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    match open_target(&registry, &cli.target)? {
        Target::Standard(store) => run_standard(&store, cli.command).await,
        Target::Ordered(store) => run_ordered(&store, cli.command).await,
    }
}

fn build_registry(
    backend: Backend,
    generation: Option<GenerationArg>,
) -> Result<DataStoreRegistry, String> {
    let mut config = DataStoreConfig::from_env().map_err(|e| e.to_string())?;
    if let Some(generation) = generation {
        config.generation = generation.into();
    }

    let (session, transport): (SessionContext, Arc<dyn DataStoreTransport>) = match backend {
        Backend::Http => {
            let session = SessionContext::from_env().map_err(|e| e.to_string())?;
            let transport = ReqwestTransport::new(&config).map_err(|e| e.to_string())?;
            (session, Arc::new(transport))
        }
        Backend::Mock => {
            let session = SessionContext::from_env()
                .unwrap_or_else(|_| SessionContext::new("mock", 1, 1));
            (session, Arc::new(MockDataStore::new()))
        }
    };
    Ok(DataStoreRegistry::new(config, session, transport))
}

fn open_target(registry: &DataStoreRegistry, args: &TargetArgs) -> Result<Target, String> {
    let target = match (args.store.as_deref(), args.ordered) {
        (None, true) => return Err("--ordered requires --store".to_string()),
        (None, false) => registry.get_legacy_store().map(Target::Standard),
        (Some(name), true) => registry
            .get_ordered_store(name, args.scope.as_deref())
            .map(Target::Ordered),
        (Some(name), false) => registry
            .get_store(
                name,
                args.scope.as_deref(),
                StoreOptions {
                    all_scopes: args.all_scopes,
                    generation: None,
                },
            )
            .map(Target::Standard),
    };
    target.map_err(|e| e.to_string())
}

async fn run_standard(store: &DataStore, command: Commands) -> Result<ExitCode, String> {
    match command {
        Commands::Get { key } => {
            let stored = store.get(&key).await.map_err(|e| e.to_string())?;
            print_stored(stored.as_ref());
        }
        Commands::Set {
            key,
            value,
            user_ids,
            metadata,
        } => {
            let value = parse_json(&value)?;
            let mut options = WriteOptions::default().with_user_ids(user_ids);
            if let Some(metadata) = metadata {
                options = options.with_metadata(parse_metadata(&metadata)?);
            }
            let version = store
                .set(&key, &value, &options)
                .await
                .map_err(|e| e.to_string())?;
            println!("version: {}", version.as_deref().unwrap_or("<none>"));
        }
        Commands::Increment { key, delta } => {
            let stored = store
                .increment(&key, delta, &WriteOptions::default())
                .await
                .map_err(|e| e.to_string())?;
            print_stored(Some(&stored));
        }
        Commands::Remove { key } => {
            let previous = store.remove(&key).await.map_err(|e| e.to_string())?;
            print_stored(previous.as_ref());
        }
        Commands::GetVersion { key, version } => {
            let stored = store
                .get_version(&key, &version)
                .await
                .map_err(|e| e.to_string())?;
            print_stored(Some(&stored));
        }
        Commands::GetVersionAt { key, time } => {
            let time = DateTime::parse_from_rfc3339(&time)
                .map_err(|e| format!("invalid time '{time}': {e}"))?
                .with_timezone(&Utc);
            let stored = store
                .get_version_at_time(&key, time)
                .await
                .map_err(|e| e.to_string())?;
            print_stored(stored.as_ref());
        }
        Commands::RemoveVersion { key, version } => {
            store
                .remove_version(&key, &version)
                .await
                .map_err(|e| e.to_string())?;
            println!("removed: {version}");
        }
        Commands::ListKeys { prefix, page_size } => {
            let keys = store
                .list_keys(&prefix, page_size)
                .await
                .map_err(|e| e.to_string())?
                .collect_remaining()
                .await
                .map_err(|e| e.to_string())?;
            for record in keys {
                println!("{}", record.key);
            }
        }
        Commands::ListVersions {
            key,
            descending,
            page_size,
        } => {
            let query = VersionQuery {
                direction: if descending {
                    SortDirection::Descending
                } else {
                    SortDirection::Ascending
                },
                min_date: None,
                max_date: None,
                page_size,
            };
            let versions = store
                .list_versions(&key, query)
                .await
                .map_err(|e| e.to_string())?
                .collect_remaining()
                .await
                .map_err(|e| e.to_string())?;
            for record in versions {
                println!(
                    "{} {}{}",
                    record.version,
                    record.created_at.to_rfc3339(),
                    if record.is_deleted { " deleted" } else { "" }
                );
            }
        }
        Commands::Sorted { .. } => {
            return Err("sorted listings need --ordered".to_string());
        }
        Commands::ListStores { .. } => {
            return Err("list-stores does not address a single store".to_string());
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_ordered(store: &OrderedDataStore, command: Commands) -> Result<ExitCode, String> {
    match command {
        Commands::Get { key } => {
            let stored = store.get(&key).await.map_err(|e| e.to_string())?;
            print_stored(stored.as_ref());
        }
        Commands::Set { key, value, .. } => {
            let value = parse_json(&value)?;
            let version = store.set(&key, &value).await.map_err(|e| e.to_string())?;
            println!("version: {}", version.as_deref().unwrap_or("<none>"));
        }
        Commands::Increment { key, delta } => {
            let stored = store
                .increment(&key, delta)
                .await
                .map_err(|e| e.to_string())?;
            print_stored(Some(&stored));
        }
        Commands::Remove { key } => {
            let previous = store.remove(&key).await.map_err(|e| e.to_string())?;
            print_stored(previous.as_ref());
        }
        Commands::Sorted {
            descending,
            page_size,
            min,
            max,
        } => {
            let entries = store
                .get_sorted(!descending, page_size, min, max)
                .await
                .map_err(|e| e.to_string())?
                .collect_remaining()
                .await
                .map_err(|e| e.to_string())?;
            for entry in entries {
                println!("{} {}", entry.key, entry.value);
            }
        }
        other => {
            return Err(format!(
                "{} is not supported by ordered data stores",
                command_name(&other)
            ));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Get { .. } => "get",
        Commands::Set { .. } => "set",
        Commands::Increment { .. } => "increment",
        Commands::Remove { .. } => "remove",
        Commands::GetVersion { .. } => "get-version",
        Commands::GetVersionAt { .. } => "get-version-at",
        Commands::RemoveVersion { .. } => "remove-version",
        Commands::ListKeys { .. } => "list-keys",
        Commands::ListVersions { .. } => "list-versions",
        Commands::Sorted { .. } => "sorted",
        Commands::ListStores { .. } => "list-stores",
    }
}

fn parse_json(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|e| format!("value is not valid JSON: {e}"))
}

fn parse_metadata(text: &str) -> Result<Map<String, Value>, String> {
    serde_json::from_str(text).map_err(|e| format!("metadata must be a JSON object: {e}"))
}

fn print_stored(stored: Option<&StoredValue>) {
    let Some(stored) = stored else {
        println!("value: <none>");
        return;
    };
    println!("value: {}", stored.value);
    if let Some(version) = stored.version() {
        println!("version: {version}");
    }
    if let Some(info) = stored.info.as_ref() {
        println!("created_at: {}", info.created_at.to_rfc3339());
        if !info.user_ids.is_empty() {
            let ids: Vec<String> = info.user_ids.iter().map(i64::to_string).collect();
            println!("user_ids: {}", ids.join(","));
        }
        if !info.metadata.is_empty() {
            println!("metadata: {}", Value::Object(info.metadata.clone()));
        }
    }
}
