use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use rusty_p4_shell::bench::{run_insert_delete, BenchLog, Scenario};
use rusty_p4_shell::sim::{program, SimDevice};
use rusty_p4_shell::{ConnectionOption, ElectionId, FwdPipeConfig, Session, SubmitMode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "rusty-p4-shell")]
#[command(about = "Insert, delete and read P4Runtime table and counter entries", long_about = None)]
struct Args {
    /// JSON connection options; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    device_id: Option<u64>,

    /// gRPC address of the device
    #[arg(long)]
    address: Option<String>,

    #[arg(long)]
    election_high: Option<u64>,

    #[arg(long)]
    election_low: Option<u64>,

    /// Binary P4Info to push at setup, together with --device-config
    #[arg(long)]
    p4info: Option<PathBuf>,

    #[arg(long)]
    device_config: Option<PathBuf>,

    /// Run against an in-process device loaded with the VLAN switch pipeline
    #[arg(long)]
    simulate: bool,

    /// Keep up to N writes in flight instead of one at a time
    #[arg(long)]
    pipelined: Option<usize>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert then delete a generated batch on one of the benchmark tables
    TableAdd {
        #[arg(value_enum)]
        table: Preset,
        #[arg(long, default_value = "1000")]
        count: usize,
        /// Append the insert time to this file
        #[arg(long, default_value = "tests.csv")]
        bench_log: PathBuf,
    },
    /// Like table-add, with the batch described by a JSON file
    Scenario {
        file: PathBuf,
        #[arg(long, default_value = "tests.csv")]
        bench_log: PathBuf,
    },
    /// Read a counter, every cell unless --index is given
    CounterRead {
        name: String,
        #[arg(long)]
        index: Option<i64>,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum Preset {
    Switching,
    IngressVlan,
    EgressVlan,
}

fn connection_option(args: &Args) -> anyhow::Result<ConnectionOption> {
    let mut option = match &args.config {
        Some(path) => ConnectionOption::from_file(path)?,
        None => ConnectionOption::default(),
    };
    if let Some(device_id) = args.device_id {
        option.device_id = device_id;
    }
    if let Some(address) = &args.address {
        option.address = address.clone();
    }
    option.election_id = ElectionId::new(
        args.election_high.unwrap_or(option.election_id.high),
        args.election_low.unwrap_or(option.election_id.low),
    );
    Ok(option)
}

async fn run(session: &Session, args: &Args) -> anyhow::Result<()> {
    let mode = match args.pipelined {
        Some(depth) => SubmitMode::Pipelined { depth },
        None => SubmitMode::Sequential,
    };
    let (scenario, log) = match &args.command {
        Command::TableAdd {
            table,
            count,
            bench_log,
        } => {
            let scenario = match table {
                Preset::Switching => Scenario::switching(*count),
                Preset::IngressVlan => Scenario::ingress_vlan(*count),
                Preset::EgressVlan => Scenario::egress_vlan(*count),
            };
            (scenario, BenchLog::new(bench_log))
        }
        Command::Scenario { file, bench_log } => (Scenario::from_file(file)?, BenchLog::new(bench_log)),
        Command::CounterRead { name, index } => {
            let mut entry = session.repository().counter_entry(name)?;
            if let Some(index) = index {
                entry = entry.with_index(*index)?;
            }
            let start = Instant::now();
            let count = entry.read(session, |record| println!("{}", record)).await?;
            println!("{} records, time = {:?}", count, start.elapsed());
            return Ok(());
        }
    };

    let result = run_insert_delete(session, &scenario, mode, Some(&log)).await?;
    println!(
        "{}: {} inserted in {:?}, {} deleted in {:?}",
        scenario.label(),
        result.insert.applied(),
        result.insert.elapsed,
        result.delete.applied(),
        result.delete.elapsed
    );
    if let Some((index, e)) = result.insert.first_failure() {
        bail!("insert of entry {} failed: {}", index, e);
    }
    if let Some((index, e)) = result.delete.first_failure() {
        bail!("delete of entry {} failed: {}", index, e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _logger = flexi_logger::Logger::try_with_env_or_str(&args.log_level)?.start()?;

    let option = connection_option(&args)?;
    let pipeline = match (&args.p4info, &args.device_config) {
        (Some(p4info), Some(device_config)) => Some(FwdPipeConfig::new(p4info, device_config)),
        (None, None) => None,
        _ => bail!("--p4info and --device-config must be given together"),
    };

    let session = if args.simulate {
        info!("using a simulated device {}", option.device_id);
        let device = match pipeline {
            Some(_) => SimDevice::new(option.device_id),
            None => SimDevice::with_pipeline(option.device_id, program::p4info()),
        };
        Session::setup(Arc::new(device), &option, pipeline).await?
    } else {
        Session::connect(&option, pipeline).await?
    };

    let result = run(&session, &args).await;
    session.teardown().await;
    result
}
